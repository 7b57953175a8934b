//! Single-fire "session expired" signal shared by everything that talks to the API.
//!
//! Many requests can observe the same dead session at once. The first one to
//! report it shows the notification and runs the registered handler; the rest
//! are ignored until [`SessionExpiry::reset`] re-arms the signal after the next
//! successful sign-in.

use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::{ApiError, SessionError};
use crate::notify::{ConsoleNotifier, NotificationSink};

/// Message shown to the user when the session dies.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Callback run once per expiry.
pub type ExpiryHandler = Arc<dyn Fn() -> HandlerResult + Send + Sync>;

pub struct SessionExpiry {
    handler: Mutex<Option<ExpiryHandler>>,
    fired: AtomicBool,
    sink: Arc<dyn NotificationSink>,
}

impl SessionExpiry {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            handler: Mutex::new(None),
            fired: AtomicBool::new(false),
            sink,
        }
    }

    /// Replaces the handler. The fired flag is left alone.
    pub fn register(&self, handler: Option<ExpiryHandler>) {
        *self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Re-arms the signal so the next [`notify`](Self::notify) fires again.
    pub fn reset(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Fires the signal unless it already fired since the last reset.
    ///
    /// The handler is best effort: an error or panic from it is logged and
    /// dropped, and never reaches the caller.
    pub fn notify(&self) {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("session expiry already signalled");
            return;
        }

        tracing::info!("session expired");
        self.sink.show(SESSION_EXPIRED_MESSAGE);

        // Clone out so the lock isn't held while the handler runs.
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(handler) = handler else {
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| handler())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "session expiry handler failed");
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(%reason, "session expiry handler panicked");
            }
        }
    }
}

impl Default for SessionExpiry {
    fn default() -> Self {
        Self::new(Arc::new(ConsoleNotifier))
    }
}

impl std::fmt::Debug for SessionExpiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionExpiry")
            .field("fired", &self.has_fired())
            .finish_non_exhaustive()
    }
}

/// True iff `err`, or any error in its source chain, is an [`ApiError`] with status 401.
pub fn is_unauthorized(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(api) = err.downcast_ref::<ApiError>() {
            return api.is_unauthorized();
        }
        // `SessionError::Api` is transparent, so the chain skips the inner error.
        if let Some(SessionError::Api(api)) = err.downcast_ref::<SessionError>() {
            return api.is_unauthorized();
        }
        current = err.source();
    }
    false
}
