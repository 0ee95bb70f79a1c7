// Classification of adapter error responses.
//
// Adapters report trouble in-band with HTTP 200: either a top-level
// `_api_error` code or, when the embedded firmware runs out of heap, a
// `__no_memory` marker somewhere in the body.

use std::fmt;

use serde_json::Value;

const API_ERROR_KEY: &str = "_api_error";
const NO_MEMORY_MARKER: &str = "__no_memory";

/// A busy/broken-adapter condition found in a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFault {
    /// `serializer_error`: the adapter failed to build its reply.
    Serializer,
    /// `device_authentication_error`: the adapter rejected the token,
    /// typically transient under load.
    DeviceAuthentication,
    /// Memory-exhaustion marker anywhere in the response.
    NoMemory,
    /// Any other `_api_error` code.
    Other(String),
}

impl ApiFault {
    /// Inspect a response. `None` means the response carries no fault marker.
    pub fn classify(response: &Value) -> Option<Self> {
        let code = response.get(API_ERROR_KEY).and_then(Value::as_str);
        match code {
            Some("serializer_error") => return Some(Self::Serializer),
            Some("device_authentication_error") => return Some(Self::DeviceAuthentication),
            _ => {}
        }
        if response.to_string().contains(NO_MEMORY_MARKER) {
            return Some(Self::NoMemory);
        }
        code.map(|c| Self::Other(c.to_owned()))
    }

    /// Wire code for this fault.
    pub fn code(&self) -> &str {
        match self {
            Self::Serializer => "serializer_error",
            Self::DeviceAuthentication => "device_authentication_error",
            Self::NoMemory => "no_memory",
            Self::Other(code) => code,
        }
    }

    /// Conditions that warrant rebooting the adapter instead of retrying.
    pub fn is_rebootable(&self) -> bool {
        matches!(self, Self::Serializer | Self::NoMemory)
    }

    /// Conditions worth another attempt after a short pause.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Serializer | Self::DeviceAuthentication | Self::NoMemory
        )
    }
}

impl fmt::Display for ApiFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_known_codes() {
        let serializer = ApiFault::classify(&json!({ "_api_error": "serializer_error" }));
        assert_eq!(serializer, Some(ApiFault::Serializer));

        let auth = ApiFault::classify(&json!({ "_api_error": "device_authentication_error" }));
        assert_eq!(auth, Some(ApiFault::DeviceAuthentication));

        let other = ApiFault::classify(&json!({ "_api_error": "unknown_command" }));
        assert_eq!(other, Some(ApiFault::Other("unknown_command".into())));
        assert_eq!(other.unwrap().to_string(), "unknown_command");
    }

    #[test]
    fn finds_memory_marker_anywhere() {
        let nested = json!({ "r": { "indoorUnit": { "status": "__no_memory" } } });
        assert_eq!(ApiFault::classify(&nested), Some(ApiFault::NoMemory));
    }

    #[test]
    fn healthy_response_has_no_fault() {
        assert_eq!(ApiFault::classify(&json!({ "r": { "mode": "cool" } })), None);
        assert_eq!(ApiFault::classify(&json!({})), None);
    }

    #[test]
    fn reboot_and_retry_policy() {
        assert!(ApiFault::Serializer.is_rebootable());
        assert!(ApiFault::NoMemory.is_rebootable());
        assert!(!ApiFault::DeviceAuthentication.is_rebootable());

        assert!(ApiFault::DeviceAuthentication.is_retryable());
        assert!(ApiFault::Serializer.is_retryable());
        assert!(!ApiFault::Other("x".into()).is_retryable());
        assert_eq!(ApiFault::Serializer.code(), "serializer_error");
    }
}
