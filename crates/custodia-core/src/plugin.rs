//! Plugin base: typed option binding over an already-parsed configuration
//! section, plus the audit hook every plugin owns.
//!
//! Turning an on-disk `.ini` file into a `PluginConfig` per section is an
//! external collaborator's job; this module only validates and converts the
//! raw strings a section hands it.

use std::collections::{HashMap, HashSet};

use crate::error::PluginError;

/// A parsed configuration section: raw option name to raw string value.
pub type PluginConfig = HashMap<String, String>;

/// Look up a required string option.
///
/// # Errors
///
/// Returns [`PluginError::MissingOption`] if `name` is absent.
pub fn get_str<'a>(cfg: &'a PluginConfig, name: &str) -> Result<&'a str, PluginError> {
    cfg.get(name)
        .map(String::as_str)
        .ok_or_else(|| PluginError::MissingOption { name: name.to_string() })
}

/// Look up an optional string option, falling back to `default`.
#[must_use]
pub fn get_str_or<'a>(cfg: &'a PluginConfig, name: &str, default: &'a str) -> &'a str {
    cfg.get(name).map(String::as_str).unwrap_or(default)
}

/// Parse a required base-10 integer option.
///
/// # Errors
///
/// Returns [`PluginError::MissingOption`] or [`PluginError::InvalidOption`].
pub fn get_int(cfg: &PluginConfig, name: &str) -> Result<i64, PluginError> {
    let raw = get_str(cfg, name)?;
    raw.parse::<i64>()
        .map_err(|_| invalid(name, raw, "base-10 integer"))
}

/// Parse a base-8 (octal) integer option, e.g. a file mode.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] on malformed input.
pub fn get_oct(cfg: &PluginConfig, name: &str) -> Result<u32, PluginError> {
    let raw = get_str(cfg, name)?;
    u32::from_str_radix(raw.trim_start_matches("0o"), 8)
        .map_err(|_| invalid(name, raw, "octal integer"))
}

/// Parse a base-16 (hex) integer option.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] on malformed input.
pub fn get_hex(cfg: &PluginConfig, name: &str) -> Result<u64, PluginError> {
    let raw = get_str(cfg, name)?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|_| invalid(name, raw, "hexadecimal integer"))
}

/// Parse a boolean option. Accepts `true`/`false` case-insensitively.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] on anything else.
pub fn get_bool(cfg: &PluginConfig, name: &str, default: bool) -> Result<bool, PluginError> {
    match cfg.get(name) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid(name, raw, "boolean")),
        },
    }
}

/// Parse a floating-point option.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] on malformed input.
pub fn get_float(cfg: &PluginConfig, name: &str) -> Result<f64, PluginError> {
    let raw = get_str(cfg, name)?;
    raw.parse::<f64>().map_err(|_| invalid(name, raw, "float"))
}

/// Compile a regular-expression option.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] if the pattern does not compile.
pub fn get_regex(cfg: &PluginConfig, name: &str) -> Result<regex::Regex, PluginError> {
    let raw = get_str(cfg, name)?;
    regex::Regex::new(raw).map_err(|_| invalid(name, raw, "regular expression"))
}

/// Parse a whitespace-separated set of unique strings.
#[must_use]
pub fn get_str_set(cfg: &PluginConfig, name: &str) -> HashSet<String> {
    cfg.get(name)
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Parse a whitespace-separated, order-preserving list of strings.
#[must_use]
pub fn get_str_list(cfg: &PluginConfig, name: &str) -> Vec<String> {
    cfg.get(name)
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Parse a JSON-valued option.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] if the value does not parse.
pub fn get_json(cfg: &PluginConfig, name: &str) -> Result<serde_json::Value, PluginError> {
    let raw = get_str(cfg, name)?;
    serde_json::from_str(raw).map_err(|_| invalid(name, raw, "JSON value"))
}

/// Resolve a user-or-uid option to a numeric uid. Numeric strings are taken
/// literally; anything else is treated as a username lookup, which this
/// binder does not perform itself — callers needing name resolution should
/// pre-resolve before handing the section to this binder. `-1` means "ignore
/// this check" and is passed through unchanged.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] if the value is neither a valid
/// integer nor left unset (in which case `-1` is returned).
pub fn get_pwd_uid(cfg: &PluginConfig, name: &str) -> Result<i64, PluginError> {
    match cfg.get(name) {
        None => Ok(-1),
        Some(raw) => raw.parse::<i64>().map_err(|_| invalid(name, raw, "uid")),
    }
}

/// Resolve a group-or-gid option to a numeric gid. See [`get_pwd_uid`] for
/// the same caveats applied to groups.
///
/// # Errors
///
/// Returns [`PluginError::InvalidOption`] if the value is neither a valid
/// integer nor left unset (in which case `-1` is returned).
pub fn get_grp_gid(cfg: &PluginConfig, name: &str) -> Result<i64, PluginError> {
    match cfg.get(name) {
        None => Ok(-1),
        Some(raw) => raw.parse::<i64>().map_err(|_| invalid(name, raw, "gid")),
    }
}

/// Reject a section that carries options the plugin does not declare.
///
/// # Errors
///
/// Returns [`PluginError::UnknownOption`] naming the first surplus key found.
pub fn reject_unknown_options(cfg: &PluginConfig, known: &[&str]) -> Result<(), PluginError> {
    for key in cfg.keys() {
        if !known.contains(&key.as_str()) {
            return Err(PluginError::UnknownOption { name: key.clone() });
        }
    }
    Ok(())
}

fn invalid(name: &str, value: &str, expected: &'static str) -> PluginError {
    PluginError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
        expected,
    }
}

/// Outcome of a service-access decision, for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvcAccess {
    AuthPass,
    AuthFail,
    AuthzPass,
    AuthzFail,
}

/// Outcome of a key-access decision, for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAccess {
    Allowed,
    Denied,
}

/// Every plugin's audit hook: record a decision tagged with the plugin's own
/// origin name, the acting client, and the path or key involved.
pub trait AuditHook: Send + Sync {
    fn audit_svc_access(&self, origin: &str, outcome: SvcAccess, client_id: &str, path: &str);

    fn audit_key_access(
        &self,
        origin: &str,
        outcome: KeyAccess,
        client_id: &str,
        key: &str,
        action: &str,
    );
}

/// An [`AuditHook`] that emits `tracing` events — the default in-process
/// hook, always available even when no audit file is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditHook;

impl AuditHook for TracingAuditHook {
    fn audit_svc_access(&self, origin: &str, outcome: SvcAccess, client_id: &str, path: &str) {
        tracing::info!(
            target: "custodia::audit",
            origin,
            outcome = ?outcome,
            client_id,
            path,
            "service access"
        );
    }

    fn audit_key_access(
        &self,
        origin: &str,
        outcome: KeyAccess,
        client_id: &str,
        key: &str,
        action: &str,
    ) {
        tracing::info!(
            target: "custodia::audit",
            origin,
            outcome = ?outcome,
            client_id,
            key,
            action,
            "key access"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> PluginConfig {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn missing_required_option_errors() {
        let c = cfg(&[]);
        assert!(matches!(get_str(&c, "path"), Err(PluginError::MissingOption { .. })));
    }

    #[test]
    fn bool_parses_case_insensitively() {
        let c = cfg(&[("debug", "True")]);
        assert!(get_bool(&c, "debug", false).unwrap());
    }

    #[test]
    fn unknown_option_rejected() {
        let c = cfg(&[("paths", "/secrets"), ("bogus", "x")]);
        assert!(matches!(
            reject_unknown_options(&c, &["paths"]),
            Err(PluginError::UnknownOption { .. })
        ));
    }

    #[test]
    fn str_set_splits_on_whitespace() {
        let c = cfg(&[("ids", "alice bob  carol")]);
        let set = get_str_set(&c, "ids");
        assert_eq!(set.len(), 3);
        assert!(set.contains("bob"));
    }

    #[test]
    fn pwd_uid_defaults_to_ignore() {
        let c = cfg(&[]);
        assert_eq!(get_pwd_uid(&c, "uid").unwrap(), -1);
    }
}
