use serde::{Deserialize, Serialize};

pub mod client;
pub mod session;
pub mod user;

use user::AuthUser;

/// Wrapper around every QRPlan API response body.
///
/// `data` is present when `success` is true; `error` may be present when it is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Data returned by the server after `signup()` or `login()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: AuthUser,
}

/// Data returned by the server after `refresh()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}
