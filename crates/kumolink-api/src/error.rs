use thiserror::Error;

/// Top-level error type for the `kumolink-api` crate.
///
/// Covers every failure mode across all API surfaces:
/// local adapter requests, cloud authentication, cloud REST, and the
/// realtime polling session. `kumolink-core` decides which of these are
/// soft failures (logged, stale data) and which surface to callers.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or refresh was refused (wrong credentials, missing token, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The cloud kept answering 401 after one refresh-and-retry.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// An authenticated call was attempted before `login()`.
    #[error("Not logged in to the cloud service")]
    NotLoggedIn,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (timeout, connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Cloud ───────────────────────────────────────────────────────
    /// Non-success HTTP status from a cloud endpoint.
    #[error("Cloud API error (HTTP {status}): {message}")]
    CloudApi { status: u16, message: String },

    // ── Local device ────────────────────────────────────────────────
    /// The adapter answered with an `_api_error` code.
    #[error("Device API error: {code}")]
    DeviceApi { code: String },

    // ── Realtime ────────────────────────────────────────────────────
    /// The polling handshake did not produce a session id.
    #[error("Realtime handshake failed: {0}")]
    Handshake(String),

    /// The namespace connect was answered with a connect-error frame.
    #[error("Realtime namespace connection rejected")]
    StreamRejected,

    // ── Credentials ─────────────────────────────────────────────────
    /// Password or cryptoSerial missing, malformed, or too short.
    #[error("Invalid credential{}: {reason}", serial.as_deref().map(|s| format!(" for {s}")).unwrap_or_default())]
    InvalidCredential {
        serial: Option<String>,
        reason: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::SessionExpired
                | Self::StreamRejected
                | Self::CloudApi { status: 401, .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::DeviceApi { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the underlying transport gave up waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    pub(crate) fn invalid_credential(serial: Option<&str>, reason: impl Into<String>) -> Self {
        Self::InvalidCredential {
            serial: serial.map(String::from),
            reason: reason.into(),
        }
    }

    /// Wrap a JSON parse failure, keeping the raw body and a short preview.
    pub(crate) fn deserialization(err: &serde_json::Error, body: String) -> Self {
        let preview: String = body.chars().take(200).collect();
        Self::Deserialization {
            message: format!("{err} (body preview: {preview:?})"),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credential_message_names_serial() {
        let err = Error::invalid_credential(Some("2234P009K"), "cryptoSerial too short");
        assert_eq!(
            err.to_string(),
            "Invalid credential for 2234P009K: cryptoSerial too short"
        );

        let anonymous = Error::invalid_credential(None, "empty password");
        assert_eq!(anonymous.to_string(), "Invalid credential: empty password");
    }

    #[test]
    fn auth_expired_classification() {
        assert!(Error::SessionExpired.is_auth_expired());
        assert!(Error::StreamRejected.is_auth_expired());
        assert!(
            Error::CloudApi {
                status: 401,
                message: String::new()
            }
            .is_auth_expired()
        );
        assert!(
            !Error::CloudApi {
                status: 500,
                message: String::new()
            }
            .is_auth_expired()
        );
        assert!(!Error::NotLoggedIn.is_auth_expired());
    }
}
