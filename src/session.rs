//! Session lifecycle and retry policy
//!
//! Owns the carrier session: login on first use, expiry tracking, and the
//! retry rules wrapped around every carrier call. An operation failing with
//! an auth error invalidates the session and runs exactly once more after a
//! fresh login; transient failures back off exponentially up to the
//! configured limit. Everything else surfaces immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::CarrierApi;
use crate::error::Result;
use crate::types::{Credentials, DhlConfig, Session, RETRY_MAX_BACKOFF_SECS};

/// Session lifecycle: unauthenticated until first use, authenticated after a
/// successful login, back to unauthenticated on expiry or invalidation.
#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(Session),
}

/// Serializes login and session renewal for all concurrent callers
pub struct SessionManager {
    api: Arc<dyn CarrierApi>,
    credentials: Credentials,
    state: Mutex<SessionState>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl SessionManager {
    pub fn new(api: Arc<dyn CarrierApi>, config: &DhlConfig) -> Self {
        Self {
            api,
            credentials: config.credentials.clone(),
            state: Mutex::new(SessionState::Unauthenticated),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        }
    }

    /// Return the current session, logging in if there is none or it expired.
    ///
    /// The state lock is held across the login call so concurrent callers
    /// wait for the in-flight attempt instead of issuing duplicate logins.
    pub async fn ensure_session(&self) -> Result<Session> {
        let mut state = self.state.lock().await;
        if let SessionState::Authenticated(session) = &*state {
            if !session.is_expired() {
                return Ok(session.clone());
            }
            debug!("Session expired, re-authenticating");
        }
        match self.api.login(&self.credentials).await {
            Ok(session) => {
                info!("Authenticated with carrier");
                *state = SessionState::Authenticated(session.clone());
                Ok(session)
            }
            Err(e) => {
                *state = SessionState::Unauthenticated;
                Err(e)
            }
        }
    }

    /// Drop the stored session, but only if `stale` is still the one stored.
    /// A session renewed by a concurrent caller is left alone.
    async fn invalidate(&self, stale: &Session) {
        let mut state = self.state.lock().await;
        let matches_stored =
            matches!(&*state, SessionState::Authenticated(current) if current.token == stale.token);
        if matches_stored {
            debug!("Invalidating rejected session");
            *state = SessionState::Unauthenticated;
        }
    }

    /// Run a carrier operation under a valid session.
    ///
    /// An auth failure invalidates the session and the operation runs exactly
    /// once more after re-login. Transient failures (login or operation) are
    /// retried with exponential backoff, bounded by `max_retries`.
    pub async fn with_session<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut reauthenticated = false;
        let mut attempt: u32 = 0;
        loop {
            let session = match self.ensure_session().await {
                Ok(session) => session,
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt, self.retry_base_delay);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Login failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match op(session.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_auth() && !reauthenticated => {
                    warn!("Session rejected by carrier, logging in again");
                    self.invalidate(&session).await;
                    reauthenticated = true;
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt, self.retry_base_delay);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Carrier call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff: base * 2^(attempt-1), capped
fn retry_backoff(attempt: u32, base: Duration) -> Duration {
    let cap = Duration::from_secs(RETRY_MAX_BACKOFF_SECS);
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(cap)
}
