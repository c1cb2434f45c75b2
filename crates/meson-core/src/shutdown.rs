//! Shared, level-triggered shutdown flag.
//!
//! A `ShutdownSignal` is the closed-flag of a pipeline. It only ever moves from
//! open to closed, any clone observes the transition, and tasks can suspend
//! until it happens.

use tokio::sync::watch;
use std::sync::Arc;

/// A monotonic closed-flag shared between the tasks of one connection.
///
/// # Example
///
/// ```
/// use meson_core::shutdown::ShutdownSignal;
///
/// let signal = ShutdownSignal::new();
/// let observer = signal.clone();
///
/// assert!(signal.trigger());
/// assert!(!signal.trigger());
/// assert!(observer.is_triggered());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Flip the flag to closed.
    ///
    /// Returns `true` only for the caller that performed the transition, so
    /// exactly one of any number of racing callers sees `true`.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Check whether the flag has been flipped.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspend until the flag is flipped. Returns immediately if it already is.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` can only return Ok.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
