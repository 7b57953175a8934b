//! Client-side session lifecycle for the QRPlan API.
//!
//! A [`SessionStore`] owns the bearer token, the signed-in [`AuthUser`] and their
//! [`UserPlan`]. It restores a stored session at startup, signs users in and out,
//! renews the token ahead of its expiry, and collapses the session when any
//! authenticated call comes back 401.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qrplan_session::{
//!     ApiClient, ClientOptions, FileTokenStorage, SessionExpiry, SessionStore,
//! };
//!
//! # async fn run() -> Result<(), qrplan_session::SessionError> {
//! let expiry = Arc::new(SessionExpiry::default());
//! let api = ApiClient::new(ClientOptions::from_env(), expiry.clone())?;
//! let store = SessionStore::new(
//!     Arc::new(api),
//!     Arc::new(FileTokenStorage::new("session.token")),
//!     expiry,
//! );
//!
//! store.initialize().await?;
//! if !store.is_logged_in() {
//!     store.login("a@b.com", "hunter2").await?;
//! }
//! println!("{:?}", store.state().plan);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod expiry;
pub mod notify;
pub mod storage;
pub mod structs;
pub mod token;

pub use errors::{ApiError, DecodeError, SessionError, StorageError};
pub use expiry::{is_unauthorized, ExpiryHandler, HandlerResult, SessionExpiry};
pub use notify::{ConsoleNotifier, NotificationSink};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use structs::client::{ApiClient, AuthApi, ClientOptions, RequestOptions, DEFAULT_BASE_URL};
pub use structs::session::{SessionOptions, SessionStore};
pub use structs::user::{AuthUser, PlanTier, SessionState, UserPlan};
pub use structs::{ApiEnvelope, AuthResponse, TokenResponse};
pub use token::{decode_unverified, is_expired, Claims};
