//! Type-tagged message envelope validation.
//!
//! A request or response value is always a JSON object
//! `{"type": <name>, "value": <payload>}`. The validator checks the
//! envelope's shape and that `type` is both known and allowed for this
//! deployment; the per-type payload transform (trivial for `simple`,
//! sign/encrypt for `kem`) happens downstream in the secrets consumer.

use std::collections::HashSet;

use crate::error::MessageError;

/// A message type this deployment knows how to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `{"type": "simple", "value": <string>}` — an opaque string, passed
    /// through untouched.
    Simple,
    /// `{"type": "kem", "value": <compact JWS or JWE>}` — see [`crate::kem`].
    Kem,
}

impl MessageType {
    fn as_str(self) -> &'static str {
        match self {
            MessageType::Simple => "simple",
            MessageType::Kem => "kem",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(MessageType::Simple),
            "kem" => Some(MessageType::Kem),
            _ => None,
        }
    }
}

/// Validates incoming message envelopes against a deployment's allow-list.
pub struct Validator {
    allowed: HashSet<MessageType>,
}

impl Default for Validator {
    fn default() -> Self {
        Self { allowed: HashSet::from([MessageType::Simple]) }
    }
}

impl Validator {
    /// Build a validator allowing exactly `allowed` types.
    #[must_use]
    pub fn new(allowed: HashSet<MessageType>) -> Self {
        Self { allowed }
    }

    /// Validate the envelope's shape and type, returning the recognized
    /// [`MessageType`] and the raw `value` payload.
    ///
    /// # Errors
    ///
    /// - [`MessageError::Invalid`] if `msg` is not an object, or is missing
    ///   `type`/`value`.
    /// - [`MessageError::UnknownType`] if `type` names a type this build has
    ///   never heard of.
    /// - [`MessageError::UnallowedType`] if `type` is known but not enabled
    ///   for this deployment.
    pub fn parse<'a>(
        &self,
        msg: &'a serde_json::Value,
    ) -> Result<(MessageType, &'a serde_json::Value), MessageError> {
        let obj = msg.as_object().ok_or_else(|| MessageError::Invalid("the message must be an object".to_string()))?;

        let type_name = obj
            .get("type")
            .ok_or_else(|| MessageError::Invalid("the type is missing".to_string()))?
            .as_str()
            .ok_or_else(|| MessageError::Invalid("the type must be a string".to_string()))?;

        let value = obj
            .get("value")
            .ok_or_else(|| MessageError::Invalid("the value is missing".to_string()))?;

        let msg_type = MessageType::from_str(type_name)
            .ok_or_else(|| MessageError::UnknownType(type_name.to_string()))?;

        if !self.allowed.contains(&msg_type) {
            return Err(MessageError::UnallowedType(type_name.to_string()));
        }

        Ok((msg_type, value))
    }
}

/// Validate and extract the string payload of a `simple` message.
///
/// # Errors
///
/// Returns [`MessageError::Invalid`] if `value` is not a JSON string.
pub fn parse_simple_value(value: &serde_json::Value) -> Result<String, MessageError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::Invalid("simple value must be a string".to_string()))
}

/// Build the envelope for a `simple` reply.
#[must_use]
pub fn simple_envelope(value: &str) -> serde_json::Value {
    serde_json::json!({ "type": MessageType::Simple.as_str(), "value": value })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_object() {
        let v = Validator::default();
        let err = v.parse(&serde_json::json!("not an object")).unwrap_err();
        assert!(matches!(err, MessageError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_type() {
        let v = Validator::default();
        let err = v.parse(&serde_json::json!({"value": "x"})).unwrap_err();
        assert!(matches!(err, MessageError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_type() {
        let v = Validator::default();
        let err = v.parse(&serde_json::json!({"type": "exotic", "value": "x"})).unwrap_err();
        assert!(matches!(err, MessageError::UnknownType(_)));
    }

    #[test]
    fn rejects_unallowed_type() {
        let v = Validator::default();
        let err = v.parse(&serde_json::json!({"type": "kem", "value": "x"})).unwrap_err();
        assert!(matches!(err, MessageError::UnallowedType(_)));
    }

    #[test]
    fn accepts_allowed_simple() {
        let v = Validator::default();
        let input = serde_json::json!({"type": "simple", "value": "hello"});
        let (t, value) = v.parse(&input).unwrap();
        assert_eq!(t, MessageType::Simple);
        assert_eq!(parse_simple_value(value).unwrap(), "hello");
    }
}
