// src/error.rs
//! Failure taxonomy for the generation workflow and the rules that turn a raw
//! remote error into something a person can act on.
//!
//! Remote failures reach us in three shapes: a structured JSON payload, a
//! plain message, or a message that is itself a serialized JSON payload. We
//! unwrap one level of that nesting, never more, then classify by substring.

use serde_json::Value;
use thiserror::Error;

pub const CREDENTIAL_MARKERS: [&str; 2] = ["API key not valid", "Requested entity was not found"];
pub const QUOTA_MARKERS: [&str; 2] = ["exceeded your current quota", "RESOURCE_EXHAUSTED"];

pub const CREDENTIAL_INVALID_MESSAGE: &str =
    "The API key is invalid or lacks permission. Please select a valid API key to continue.";
pub const QUOTA_EXCEEDED_MESSAGE: &str = "You have exceeded your usage quota. Check your plan and billing, then try again later. See https://ai.google.dev/gemini-api/docs/rate-limits";
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Submission(String),
    #[error("{0}")]
    Poll(String),
    #[error("{0}")]
    Retrieval(String),
    #[error("{0}")]
    Credential(String),
    #[error("{0}")]
    Quota(String),
    #[error("No API key is selected. Select an API key to continue.")]
    MissingCredential,
    #[error("Video generation did not finish after {attempts} status checks")]
    Timeout { attempts: u32 },
    #[error("Video generation was cancelled")]
    Cancelled,
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GenerationError {
    /// Short stable name, used in logs and `--json` output.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "validation",
            GenerationError::Submission(_) => "submission",
            GenerationError::Poll(_) => "poll",
            GenerationError::Retrieval(_) => "retrieval",
            GenerationError::Credential(_) => "credential",
            GenerationError::Quota(_) => "quota",
            GenerationError::MissingCredential => "missing_credential",
            GenerationError::Timeout { .. } => "timeout",
            GenerationError::Cancelled => "cancelled",
            GenerationError::Storage(_) => "storage",
        }
    }

    pub fn is_credential(&self) -> bool {
        matches!(self, GenerationError::Credential(_))
    }

    /// Re-derives the message and reclassifies remote-originated failures.
    /// Local failures (validation, missing key, timeout, cancellation,
    /// storage) pass through untouched.
    pub fn reclassify(self) -> GenerationError {
        let raw = match &self {
            GenerationError::Submission(m)
            | GenerationError::Poll(m)
            | GenerationError::Retrieval(m)
            | GenerationError::Credential(m)
            | GenerationError::Quota(m) => m.clone(),
            _ => return self,
        };
        let message = derive_message(&ErrorPayload::Text(raw));
        match classify(&message) {
            ErrorClass::CredentialInvalid => GenerationError::Credential(message),
            ErrorClass::QuotaExceeded => GenerationError::Quota(message),
            ErrorClass::Unclassified => match self {
                GenerationError::Submission(_) => GenerationError::Submission(message),
                GenerationError::Poll(_) => GenerationError::Poll(message),
                GenerationError::Retrieval(_) => GenerationError::Retrieval(message),
                // Already classified upstream; keep the stronger verdict.
                other => other,
            },
        }
    }

    /// The single message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Credential(_) => CREDENTIAL_INVALID_MESSAGE.to_string(),
            GenerationError::Quota(_) => QUOTA_EXCEEDED_MESSAGE.to_string(),
            other => {
                let text = other.to_string();
                if text.trim().is_empty() {
                    UNKNOWN_ERROR_MESSAGE.to_string()
                } else {
                    text
                }
            }
        }
    }
}

impl From<crate::history::HistoryError> for GenerationError {
    fn from(e: crate::history::HistoryError) -> Self {
        GenerationError::Storage(e.to_string())
    }
}

/// Raw error as it arrives from the remote service.
#[derive(Debug, Clone)]
pub enum ErrorPayload {
    Structured(Value),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    CredentialInvalid,
    QuotaExceeded,
    Unclassified,
}

fn nested_error_message(value: &Value) -> Option<&str> {
    value.get("error")?.get("message")?.as_str()
}

/// Extracts the most informative message from a raw payload, unwrapping one
/// level of JSON-in-a-string.
pub fn derive_message(payload: &ErrorPayload) -> String {
    let message = match payload {
        ErrorPayload::Structured(value) => nested_error_message(value)
            .or_else(|| value.get("message").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        ErrorPayload::Text(text) => text.clone(),
    };

    match serde_json::from_str::<Value>(&message) {
        Ok(parsed) => match nested_error_message(&parsed) {
            Some(inner) => inner.to_string(),
            None => message,
        },
        Err(_) => message,
    }
}

pub fn classify(message: &str) -> ErrorClass {
    if CREDENTIAL_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::CredentialInvalid
    } else if QUOTA_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::QuotaExceeded
    } else {
        ErrorClass::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_payload_uses_nested_message() {
        let payload = ErrorPayload::Structured(json!({
            "error": { "code": 400, "message": "API key not valid. Please pass a valid API key." }
        }));
        let message = derive_message(&payload);
        assert_eq!(message, "API key not valid. Please pass a valid API key.");
        assert_eq!(classify(&message), ErrorClass::CredentialInvalid);
    }

    #[test]
    fn test_structured_payload_with_top_level_message() {
        let payload = ErrorPayload::Structured(json!({ "message": "Requested entity was not found." }));
        assert_eq!(derive_message(&payload), "Requested entity was not found.");
    }

    #[test]
    fn test_double_encoded_message_is_unwrapped_once() {
        let inner = json!({ "error": { "message": "API key not valid" } }).to_string();
        let message = derive_message(&ErrorPayload::Text(inner));
        assert_eq!(message, "API key not valid");
        assert_eq!(classify(&message), ErrorClass::CredentialInvalid);
    }

    #[test]
    fn test_unwrap_stops_after_one_level() {
        let level_two = json!({ "error": { "message": "deepest" } }).to_string();
        let level_one = json!({ "error": { "message": level_two.clone() } }).to_string();
        assert_eq!(derive_message(&ErrorPayload::Text(level_one)), level_two);
    }

    #[test]
    fn test_structured_outer_wrapping_serialized_inner() {
        // Outer payload is valid JSON but only carries a serialized copy of the real error.
        let inner = json!({ "error": { "code": 403, "message": "API key not valid" } }).to_string();
        let outer = ErrorPayload::Structured(json!({ "error": { "message": inner } }));
        let message = derive_message(&outer);
        assert_eq!(message, "API key not valid");
        assert_eq!(classify(&message), ErrorClass::CredentialInvalid);
    }

    #[test]
    fn test_json_without_error_message_falls_back_to_raw_text() {
        let raw = r#"{"status":"INTERNAL"}"#.to_string();
        assert_eq!(derive_message(&ErrorPayload::Text(raw.clone())), raw);
        assert_eq!(derive_message(&ErrorPayload::Text("plain failure".into())), "plain failure");
    }

    #[test]
    fn test_quota_markers() {
        assert_eq!(classify("429 RESOURCE_EXHAUSTED"), ErrorClass::QuotaExceeded);
        assert_eq!(
            classify("You exceeded your current quota, please check your plan"),
            ErrorClass::QuotaExceeded
        );
        assert_eq!(classify("Internal error"), ErrorClass::Unclassified);
    }

    #[test]
    fn test_reclassify_maps_remote_failures() {
        let quota = GenerationError::Retrieval("RESOURCE_EXHAUSTED".into()).reclassify();
        assert_eq!(quota.kind(), "quota");
        assert_eq!(quota.user_message(), QUOTA_EXCEEDED_MESSAGE);

        let cred = GenerationError::Poll("Requested entity was not found".into()).reclassify();
        assert!(cred.is_credential());
        assert_eq!(cred.user_message(), CREDENTIAL_INVALID_MESSAGE);

        let generic = GenerationError::Submission("bad image".into()).reclassify();
        assert_eq!(generic, GenerationError::Submission("bad image".into()));
    }

    #[test]
    fn test_local_failures_pass_through() {
        assert_eq!(GenerationError::Cancelled.reclassify(), GenerationError::Cancelled);
        let v = GenerationError::Validation("Prompt is required".into());
        assert_eq!(v.clone().reclassify(), v);
    }

    #[test]
    fn test_empty_message_becomes_unknown() {
        assert_eq!(GenerationError::Poll(String::new()).user_message(), UNKNOWN_ERROR_MESSAGE);
    }
}
