//! Circuit breaker for one guarded store.
//!
//! # Configuration
//!
//! - `failure_threshold`: failures before opening (default: 3)
//! - `cooldown`: time before an open breaker lets one probe through (default: 30s)

use crate::domain::{BreakerState, CircuitStatus};
use crate::error::{CircuitOpenError, GuardError};
use parking_lot::Mutex;
use shared_store::keys::breaker_key;
use shared_store::{SharedStore, SharedStoreExt};
use shared_types::Clock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration before an open circuit admits a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: BreakerState,
    /// A half-open probe has been handed out and not yet reported.
    probe_in_flight: bool,
}

/// Breaker guarding a single store.
pub struct CircuitBreaker {
    store_name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    /// Where state is persisted. Must not be the guarded store.
    persistence: Option<Arc<dyn SharedStore>>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker with no persistence.
    pub fn new(
        store_name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store_name: store_name.into(),
            config,
            clock,
            persistence: None,
            inner: Mutex::new(Inner {
                state: BreakerState::default(),
                probe_in_flight: false,
            }),
        }
    }

    /// Create a breaker whose state is loaded from and saved to `persistence`.
    ///
    /// A missing or unreadable persisted state starts the breaker closed.
    pub fn with_persistence(
        store_name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        persistence: Arc<dyn SharedStore>,
    ) -> Self {
        let store_name = store_name.into();
        let state = match persistence.get_json::<BreakerState>(&breaker_key(&store_name)) {
            Ok(Some(state)) => {
                debug!(store = %store_name, status = %state.status, "Restored breaker state");
                state
            }
            Ok(None) => BreakerState::default(),
            Err(e) => {
                warn!(store = %store_name, error = %e, "Could not restore breaker state");
                BreakerState::default()
            }
        };
        Self {
            store_name,
            config,
            clock,
            persistence: Some(persistence),
            inner: Mutex::new(Inner {
                state,
                probe_in_flight: false,
            }),
        }
    }

    /// Name of the guarded store.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> CircuitStatus {
        self.inner.lock().state.status
    }

    /// Ask permission to touch the store.
    ///
    /// # Errors
    ///
    /// `CircuitOpenError` while open and cooling down, or while half-open
    /// with the single probe already handed out.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.state.status {
            CircuitStatus::Closed => Ok(()),
            CircuitStatus::Open if now >= inner.state.next_retry => {
                info!(store = %self.store_name, "Circuit breaker transitioning to half-open");
                inner.state.status = CircuitStatus::HalfOpen;
                inner.probe_in_flight = true;
                self.persist(&inner.state);
                Ok(())
            }
            CircuitStatus::Open => {
                debug!(
                    store = %self.store_name,
                    remaining_ms = inner.state.next_retry.saturating_sub(now),
                    "Circuit breaker is open, rejecting operation"
                );
                Err(self.open_error(&inner.state))
            }
            CircuitStatus::HalfOpen if inner.probe_in_flight => Err(self.open_error(&inner.state)),
            CircuitStatus::HalfOpen => {
                inner.probe_in_flight = true;
                Ok(())
            }
        }
    }

    /// Record a successful store operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state.status == CircuitStatus::HalfOpen {
            info!(store = %self.store_name, "Circuit breaker closing after successful probe");
            inner.state.status = CircuitStatus::Closed;
            inner.state.failures = 0;
            inner.probe_in_flight = false;
            self.persist(&inner.state);
        }
    }

    /// Record a failed store operation.
    pub fn record_failure(&self) {
        let now = self.clock.now_ms();
        let cooldown = self.config.cooldown.as_millis() as u64;
        let mut inner = self.inner.lock();
        inner.state.last_failure = now;

        match inner.state.status {
            CircuitStatus::Closed => {
                inner.state.failures = inner.state.failures.saturating_add(1);
                if inner.state.failures >= self.config.failure_threshold {
                    warn!(
                        store = %self.store_name,
                        failures = inner.state.failures,
                        threshold = self.config.failure_threshold,
                        cooldown_ms = cooldown,
                        "Circuit breaker opening due to failures"
                    );
                    inner.state.status = CircuitStatus::Open;
                    inner.state.next_retry = now.saturating_add(cooldown);
                }
            }
            CircuitStatus::HalfOpen => {
                warn!(store = %self.store_name, "Circuit breaker reopening after probe failure");
                inner.state.status = CircuitStatus::Open;
                inner.state.next_retry = now.saturating_add(cooldown);
                inner.probe_in_flight = false;
            }
            CircuitStatus::Open => {}
        }
        self.persist(&inner.state);
    }

    /// Run `op` if the breaker allows it, recording the outcome.
    ///
    /// # Errors
    ///
    /// `GuardError::Open` without running `op`, or `GuardError::Inner` with
    /// the operation's own error.
    pub fn guard<T, E>(&self, op: impl FnOnce() -> Result<T, E>) -> Result<T, GuardError<E>> {
        self.try_acquire()?;
        match op() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(GuardError::Inner(e))
            }
        }
    }

    /// Force the breaker closed (admin/testing).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(store = %self.store_name, "Circuit breaker manually reset");
        inner.state = BreakerState::default();
        inner.probe_in_flight = false;
        self.persist(&inner.state);
    }

    fn open_error(&self, state: &BreakerState) -> CircuitOpenError {
        CircuitOpenError {
            store: self.store_name.clone(),
            next_retry: state.next_retry,
        }
    }

    fn persist(&self, state: &BreakerState) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.set_json(&breaker_key(&self.store_name), state) {
            debug!(store = %self.store_name, error = %e, "Failed to persist breaker state");
        }
    }
}
