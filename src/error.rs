// Error handling module
// Defines the session error taxonomy and the user-facing wording for it

use serde_json::Value;
use thiserror::Error;

/// Errors produced by the session manager, the request pipeline and the
/// resource clients
#[derive(Error, Debug)]
pub enum SessionError {
    /// The authentication endpoint rejected the credentials
    #[error("Invalid credentials: {0}")]
    InvalidCredential(String),

    /// Registration payload rejected (identifier in use, failed validation)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Token could not be decoded into its expiry claim
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The server refused to exchange the current token
    #[error("Token refresh denied: {0}")]
    RefreshDenied(String),

    /// Transport-level failure (connect, DNS, timeout, body)
    #[error("Network error ({kind}): {message}")]
    NetworkError { kind: &'static str, message: String },

    /// Profile could not be loaded; never fatal for the session
    #[error("Failed to fetch user profile: {0}")]
    ProfileFetchFailed(String),

    /// The session was cleared and the caller must authenticate again
    #[error("Session expired")]
    SessionExpired,

    /// The API answered 403
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Any other non-2xx answer from the API
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Token persistence failed
    #[error("Token storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SessionError {
    /// Classify a reqwest transport error
    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_request() {
            "request_error"
        } else if err.is_body() {
            "body_error"
        } else if err.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };

        SessionError::NetworkError {
            kind,
            message: err.to_string(),
        }
    }

    /// Whether the error is a transport failure
    pub fn is_network(&self) -> bool {
        matches!(self, SessionError::NetworkError { .. })
    }

    /// Whether the error means the caller has to sign in again
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            SessionError::SessionExpired
                | SessionError::RefreshDenied(_)
                | SessionError::MalformedToken(_)
        )
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            SessionError::SessionExpired
            | SessionError::RefreshDenied(_)
            | SessionError::MalformedToken(_) => {
                "Session expired. Please sign in again.".to_string()
            }
            SessionError::Forbidden(_) => {
                "You do not have permission to perform this action.".to_string()
            }
            SessionError::NetworkError { .. } => {
                "Unable to connect to server. Please check your internet connection.".to_string()
            }
            SessionError::InvalidCredential(msg)
            | SessionError::ValidationError(msg)
            | SessionError::ProfileFetchFailed(msg) => msg.clone(),
            SessionError::Api { message, .. } if !message.is_empty() => message.clone(),
            _ => "An unexpected error occurred".to_string(),
        }
    }
}

/// Extract the `detail` message from an error body.
///
/// Accepts `{"detail": "text"}` and the list form
/// `{"detail": [{"msg": "..."}, ...]}`; anything else yields `None`.
pub fn extract_detail(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;

    match json.get("detail")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
