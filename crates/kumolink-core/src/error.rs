// ── Core error types ──
//
// Errors callers of kumolink-core see. Query retrieval and harvesting never
// return these (they degrade to stale or empty data); login, credential
// decoding and schedule transport do.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request timed out")]
    Timeout,

    // ── Credential errors ────────────────────────────────────────────
    #[error("Invalid credential: {message}")]
    InvalidCredential { message: String },

    // ── Schedule errors ──────────────────────────────────────────────
    #[error("Schedule unavailable from {address}")]
    ScheduleUnavailable { address: String },

    #[error("Schedule rejected by adapter: {code}")]
    ScheduleRejected { code: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<kumolink_api::Error> for CoreError {
    fn from(err: kumolink_api::Error) -> Self {
        use kumolink_api::Error as ApiError;

        match err {
            ApiError::Authentication { message } => CoreError::AuthenticationFailed { message },
            ApiError::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            ApiError::NotLoggedIn => CoreError::AuthenticationFailed {
                message: "Not logged in".into(),
            },
            ApiError::StreamRejected => CoreError::AuthenticationFailed {
                message: "Realtime stream rejected the access token".into(),
            },
            ApiError::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        target: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            ApiError::InvalidUrl(e) => CoreError::ValidationFailed {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::CloudApi { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            ApiError::DeviceApi { code } => CoreError::Api {
                message: format!("Device API error: {code}"),
                status: None,
            },
            ApiError::Handshake(reason) => CoreError::ConnectionFailed {
                target: "realtime".into(),
                reason,
            },
            ApiError::InvalidCredential { .. } => CoreError::InvalidCredential {
                message: err.to_string(),
            },
            ApiError::Deserialization { message, body: _ } => CoreError::Api {
                message: format!("Deserialization error: {message}"),
                status: None,
            },
        }
    }
}
