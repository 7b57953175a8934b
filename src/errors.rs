use thiserror::Error;

/// Error raised for any call to the QRPlan API that did not succeed.
///
/// Carries the server-supplied message when there is one, otherwise a generated
/// `"Request failed with status N"`, together with the HTTP status of the response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    /// Generic error for a response whose body could not be used.
    pub fn from_status(status: u16) -> Self {
        Self::new(format!("Request failed with status {status}"), status)
    }

    /// The API returned a 401: Unauthorized status code.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// QRPlan session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The API answered, but the call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Failed to send a request to the QRPlan API (no response).
    #[error("Failed to send a request to the QRPlan API: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token storage adapter failed.
    #[error("Token storage error: {0}")]
    Storage(#[from] StorageError),

    /// The configured API origin is not a valid URL.
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

impl SessionError {
    /// HTTP status of the failed call, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Api(err) => Some(err.status),
            SessionError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Api(err) if err.is_unauthorized())
    }
}

/// A token whose claims could not be read.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The token is not made of three `.`-separated segments.
    #[error("Malformed token: expected three segments.")]
    Malformed,

    /// The claims segment is not valid base64.
    #[error("Failed to decode token claims: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The claims segment is not a JSON object.
    #[error("Failed to parse token claims: {0}")]
    Json(#[from] serde_json::Error),
}

/// Token storage adapter errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The backing store can't be reached right now.
    #[error("Token storage unavailable: {0}")]
    Unavailable(String),
}
