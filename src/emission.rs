//! Scheduling of fragment emission on the send path.
//!
//! In production every action leaves as one uninterrupted burst of
//! fragments. Reproducing races such as a view change between two fragments
//! needs finer control, so test builds can construct a session with
//! [`EmissionPolicy::Stepped`], where each fragment waits for an explicit
//! [`Stepper::step`].

use serde::{Deserialize, Serialize};
#[cfg(any(test, feature = "test-helpers"))]
use {
    std::{sync::Arc, time::Duration},
    tokio::sync::{Mutex, mpsc, oneshot},
};

/// How the send path emits the fragments of an action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmissionPolicy {
    /// Emit all fragments back to back.
    #[default]
    Burst,
    /// Emit one fragment per [`Stepper::step`] call.
    #[cfg(any(test, feature = "test-helpers"))]
    Stepped,
}

/// Permission to emit one fragment; dropping it marks the emission finished.
#[derive(Debug, Default)]
pub(crate) struct EmissionPermit {
    #[cfg(any(test, feature = "test-helpers"))]
    _done: Option<oneshot::Sender<()>>,
}

#[cfg(any(test, feature = "test-helpers"))]
type Waiter = oneshot::Sender<EmissionPermit>;

#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug)]
struct StepGate {
    waiters_tx: mpsc::UnboundedSender<Waiter>,
    waiters_rx: Mutex<mpsc::UnboundedReceiver<Waiter>>,
}

/// Emission scheduler owned by a session.
#[derive(Debug)]
pub(crate) enum Emitter {
    Burst,
    #[cfg(any(test, feature = "test-helpers"))]
    Stepped(Arc<StepGate>),
}

impl Emitter {
    pub(crate) fn new(policy: EmissionPolicy) -> Self {
        match policy {
            EmissionPolicy::Burst => Self::Burst,
            #[cfg(any(test, feature = "test-helpers"))]
            EmissionPolicy::Stepped => {
                let (waiters_tx, waiters_rx) = mpsc::unbounded_channel();
                Self::Stepped(Arc::new(StepGate {
                    waiters_tx,
                    waiters_rx: Mutex::new(waiters_rx),
                }))
            }
        }
    }

    /// Wait until the next fragment may be emitted.
    pub(crate) async fn acquire(&self) -> EmissionPermit {
        match self {
            Self::Burst => EmissionPermit::default(),
            #[cfg(any(test, feature = "test-helpers"))]
            Self::Stepped(gate) => {
                let (tx, rx) = oneshot::channel();
                if gate.waiters_tx.send(tx).is_err() {
                    return EmissionPermit::default();
                }
                rx.await.unwrap_or_default()
            }
        }
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub(crate) fn stepper(&self) -> Option<Stepper> {
        match self {
            Self::Burst => None,
            Self::Stepped(gate) => Some(Stepper { gate: gate.clone() }),
        }
    }
}

/// Releases fragments one at a time on a session built with
/// [`EmissionPolicy::Stepped`].
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Clone, Debug)]
pub struct Stepper {
    gate: Arc<StepGate>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl Stepper {
    /// Let exactly one waiting fragment through.
    ///
    /// Waits up to `timeout` for a sender to block on its next fragment, then
    /// releases it and waits for that fragment's emission to finish. Returns
    /// `true` if a blocked sender was released, `false` if none arrived in
    /// time.
    pub async fn step(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut waiters = self.gate.waiters_rx.lock().await;
        loop {
            let Ok(Some(waiter)) = tokio::time::timeout_at(deadline, waiters.recv()).await else {
                return false;
            };
            let (done_tx, done_rx) = oneshot::channel();
            let permit = EmissionPermit {
                _done: Some(done_tx),
            };
            if waiter.send(permit).is_err() {
                // The sender was cancelled before its turn came.
                continue;
            }
            let _ = done_rx.await;
            return true;
        }
    }
}
