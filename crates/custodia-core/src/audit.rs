//! File-based audit backend.
//!
//! Appends one JSON-lines entry per audit-worthy decision. The file is
//! opened in append-only mode — no update or delete is ever performed.
//!
//! # Thread safety
//!
//! A blocking `std::sync::Mutex` around the file handle serializes writes.
//! This is acceptable because audit writes are infrequent relative to
//! request throughput and the critical section is a single small `write`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::plugin::{AuditHook, KeyAccess, SvcAccess};

#[derive(Serialize)]
struct AuditLine<'a> {
    ts: u64,
    origin: &'a str,
    kind: &'static str,
    outcome: &'static str,
    client_id: &'a str,
    subject: &'a str,
    action: Option<&'a str>,
}

/// Audit hook that writes JSON-lines to a file, in addition to the default
/// `tracing` emission every deployment gets for free.
pub struct FileAuditHook {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAuditHook {
    /// Create a hook writing to `path`. The file is opened (or created)
    /// lazily on first write.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    fn write_line(&self, line: &AuditLine<'_>) {
        let Ok(mut json) = serde_json::to_vec(line) else {
            return;
        };
        json.push(b'\n');

        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if guard.is_none() {
            *guard = OpenOptions::new().create(true).append(true).open(&self.path).ok();
        }
        if let Some(file) = guard.as_mut() {
            let _ = file.write_all(&json);
            let _ = file.flush();
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl AuditHook for FileAuditHook {
    fn audit_svc_access(&self, origin: &str, outcome: SvcAccess, client_id: &str, path: &str) {
        let outcome = match outcome {
            SvcAccess::AuthPass => "auth_pass",
            SvcAccess::AuthFail => "auth_fail",
            SvcAccess::AuthzPass => "authz_pass",
            SvcAccess::AuthzFail => "authz_fail",
        };
        self.write_line(&AuditLine {
            ts: now_unix(),
            origin,
            kind: "svc_access",
            outcome,
            client_id,
            subject: path,
            action: None,
        });
    }

    fn audit_key_access(
        &self,
        origin: &str,
        outcome: KeyAccess,
        client_id: &str,
        key: &str,
        action: &str,
    ) {
        let outcome = match outcome {
            KeyAccess::Allowed => "allowed",
            KeyAccess::Denied => "denied",
        };
        self.write_line(&AuditLine {
            ts: now_unix(),
            origin,
            kind: "key_access",
            outcome,
            client_id,
            subject: key,
            action: Some(action),
        });
    }
}

impl std::fmt::Debug for FileAuditHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditHook").field("path", &self.path).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = tempfile_dir();
        let path = dir.join("audit.log");
        let hook = FileAuditHook::new(&path);

        hook.audit_svc_access("PathAuthz", SvcAccess::AuthzPass, "client-1", "/secrets/alice/");
        hook.audit_key_access("Secrets", KeyAccess::Allowed, "client-1", "keys/alice/k1", "get");

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("authz_pass"));
        assert!(contents.contains("\"action\":\"get\""));
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("custodia-audit-test-{:?}", std::thread::current().id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }
}
