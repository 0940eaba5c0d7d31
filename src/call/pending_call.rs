//! A call awaiting its acknowledgement.
//!
//! Three sources race to finish a [`PendingCall`]: the acknowledgement, the
//! deadline, and the connection closing. The state lock is the
//! single-resolution guard: the first [`PendingCall::resolve`] wins and
//! every later one returns `false` without touching the outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::Payload;
use crate::error::OverlayError;

/// Process-unique identifier of a pending call (never on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Terminal outcome of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The responder returned a value.
    Succeeded(Payload),
    /// No acknowledgement before the deadline.
    TimedOut,
    /// The connection failed or closed before acknowledgement.
    TransportFailed(String),
    /// The remote handler failed and attached this marker.
    HandlerFailed(Payload),
}

/// Outcome slot of a [`PendingCall`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    /// Still waiting.
    Pending,
    /// Resolved exactly once.
    Resolved(CallOutcome),
}

/// One in-flight call.
#[derive(Debug)]
pub struct PendingCall {
    id: CallId,
    event: String,
    payload: Payload,
    timeout: Duration,
    deadline: Instant,
    state: Mutex<CallState>,
    notify: Mutex<Option<oneshot::Sender<CallOutcome>>>,
}

impl PendingCall {
    /// Creates a pending call whose deadline starts now.
    ///
    /// The receiver fires once, with the winning outcome.
    #[must_use]
    pub fn new(
        event: impl Into<String>,
        payload: Payload,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            id: CallId::next(),
            event: event.into(),
            payload,
            timeout,
            deadline: Instant::now() + timeout,
            state: Mutex::new(CallState::Pending),
            notify: Mutex::new(Some(tx)),
        };
        (call, rx)
    }

    /// Identifier of this call.
    #[must_use]
    pub const fn id(&self) -> CallId {
        self.id
    }

    /// Event name the call was issued for.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Payload the call was issued with.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Instant after which the call times out.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Moves the call out of `Pending`. Returns `false`, leaving the
    /// recorded outcome untouched, if it was already resolved.
    pub fn resolve(&self, outcome: CallOutcome) -> bool {
        {
            let mut state = self.state.lock();
            if *state != CallState::Pending {
                return false;
            }
            *state = CallState::Resolved(outcome.clone());
        }
        if let Some(tx) = self.notify.lock().take() {
            let _ = tx.send(outcome);
        }
        true
    }

    /// Returns `true` once resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        *self.state.lock() != CallState::Pending
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.state.lock().clone()
    }

    /// Converts the recorded outcome into the caller-facing result.
    ///
    /// # Errors
    ///
    /// Returns the [`OverlayError`] matching a failed outcome; an unresolved
    /// call reports [`OverlayError::Internal`].
    pub fn result(&self) -> Result<Payload, OverlayError> {
        match self.state() {
            CallState::Pending => Err(OverlayError::Internal(format!(
                "call `{}` read before resolution",
                self.event
            ))),
            CallState::Resolved(outcome) => self.outcome_to_result(outcome),
        }
    }

    fn outcome_to_result(&self, outcome: CallOutcome) -> Result<Payload, OverlayError> {
        match outcome {
            CallOutcome::Succeeded(value) => Ok(value),
            CallOutcome::TimedOut => Err(OverlayError::Timeout {
                event: self.event.clone(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            CallOutcome::TransportFailed(reason) => Err(OverlayError::TransportError(reason)),
            CallOutcome::HandlerFailed(marker) => Err(OverlayError::HandlerError(marker)),
        }
    }
}
