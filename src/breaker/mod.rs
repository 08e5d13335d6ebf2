//! Per-line failure isolation.
//!
//! Each (site, line) pair owns a circuit breaker. While closed, probes run
//! and failures are counted. Reaching the threshold opens the breaker and
//! further probes are refused without touching the network. Once the reset
//! timeout has passed since the last failure, a single trial probe decides
//! whether the breaker closes again or goes back to open.

mod registry;

pub use registry::*;

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::site::Line;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half-open",
            BreakerState::Open => "open",
        }
    }

    /// Numeric encoding used by the state gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The breaker refused the call; the operation was not invoked.
    #[error("circuit breaker '{name}' is {state}")]
    Open { name: String, state: BreakerState },
    #[error("{0}")]
    Inner(E),
}

/// A state change, delivered to the registry listener.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerTransition {
    pub site_id: String,
    pub line: Line,
    pub from: BreakerState,
    pub to: BreakerState,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    site_id: String,
    line: Line,
    name: String,
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
    notify: Option<mpsc::UnboundedSender<BreakerTransition>>,
}

impl CircuitBreaker {
    pub fn new(
        site_id: &str,
        line: Line,
        threshold: u32,
        reset_timeout: Duration,
        notify: Option<mpsc::UnboundedSender<BreakerTransition>>,
    ) -> Self {
        Self {
            site_id: site_id.to_string(),
            line,
            name: format!("{}/{}", site_id, line),
            threshold: threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
            notify,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker whose timeout has elapsed still reports
    /// open until the next call moves it to half-open.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    /// Run `op` if the breaker allows it, recording the outcome.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.acquire::<E>()?;

        let result = op().await;
        permit.settled = true;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }

        result.map_err(BreakerError::Inner)
    }

    fn acquire<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let mut transition = None;
        let outcome = {
            let mut inner = self.lock();
            match inner.state {
                BreakerState::Closed => Ok(false),
                BreakerState::Open => {
                    let elapsed = inner
                        .last_failure
                        .map(|t| t.elapsed() > self.reset_timeout)
                        .unwrap_or(true);
                    if elapsed {
                        transition = self.set_state(&mut inner, BreakerState::HalfOpen);
                        inner.trial_in_flight = true;
                        Ok(true)
                    } else {
                        Err(self.refusal(&inner))
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.trial_in_flight {
                        Err(self.refusal(&inner))
                    } else {
                        inner.trial_in_flight = true;
                        Ok(true)
                    }
                }
            }
        };
        self.emit(transition);

        match outcome {
            Ok(trial) => Ok(Permit {
                breaker: self,
                trial,
                settled: false,
            }),
            Err(err) => {
                tracing::warn!(
                    "Circuit breaker {} refused probe ({} failures)",
                    self.name,
                    self.failures()
                );
                Err(err)
            }
        }
    }

    fn record_success(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.trial_in_flight = false;
            inner.failures = 0;
            match inner.state {
                BreakerState::HalfOpen => self.set_state(&mut inner, BreakerState::Closed),
                _ => None,
            }
        };
        self.emit(transition);
    }

    fn record_failure(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.trial_in_flight = false;
            inner.failures = inner.failures.saturating_add(1);
            inner.last_failure = Some(Instant::now());
            match inner.state {
                BreakerState::Closed if inner.failures >= self.threshold => {
                    self.set_state(&mut inner, BreakerState::Open)
                }
                BreakerState::HalfOpen => self.set_state(&mut inner, BreakerState::Open),
                _ => None,
            }
        };
        tracing::debug!("Circuit breaker {} recorded failure", self.name);
        self.emit(transition);
    }

    fn set_state(&self, inner: &mut Inner, to: BreakerState) -> Option<BreakerTransition> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        Some(BreakerTransition {
            site_id: self.site_id.clone(),
            line: self.line,
            from,
            to,
        })
    }

    /// Send outside the lock; an unbounded send never waits.
    fn emit(&self, transition: Option<BreakerTransition>) {
        if let (Some(t), Some(tx)) = (transition, &self.notify) {
            let _ = tx.send(t);
        }
    }

    fn refusal<E>(&self, inner: &Inner) -> BreakerError<E> {
        BreakerError::Open {
            name: self.name.clone(),
            state: inner.state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held for the duration of a call. A half-open trial that is cancelled
/// before finishing frees the trial slot again.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}
