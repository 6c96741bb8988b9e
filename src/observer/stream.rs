use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{ExecutionError, KyroFactResult};
use crate::network::CancellationToken;
use crate::storage::ProjectedResult;

use super::dispatcher::ControlMsg;
use super::events::{ObservationEvent, ObserverId};

/// A live view of a specification's results.
///
/// Dropping the observer attempts best-effort unregistration.
#[derive(Debug)]
pub struct Observer {
    id: ObserverId,
    initial: Vec<ProjectedResult>,
    rx: Receiver<ObservationEvent>,
    control_tx: Sender<ControlMsg>,
    cancel: CancellationToken,
    unregistered: AtomicBool,
}

impl Observer {
    pub(crate) fn new(
        id: ObserverId,
        initial: Vec<ProjectedResult>,
        rx: Receiver<ObservationEvent>,
        control_tx: Sender<ControlMsg>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            initial,
            rx,
            control_tx,
            cancel,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The id this observer was registered under.
    #[must_use]
    pub const fn id(&self) -> ObserverId {
        self.id
    }

    /// Results as of registration.
    #[must_use]
    pub fn initial_results(&self) -> &[ProjectedResult] {
        &self.initial
    }

    /// Stop observing. Non-blocking and idempotent.
    ///
    /// Also cancels the token the observer was registered with, so a fetch
    /// sharing it stops too.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.control_tx.try_send(ControlMsg::Unregister { id: self.id });
    }

    /// True once the observer has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> KyroFactResult<ObservationEvent> {
        self.rx.recv().map_err(|_| {
            ExecutionError::Disconnected {
                path: "observer_stream".to_string(),
            }
            .into()
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> KyroFactResult<ObservationEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| {
            match err {
                RecvTimeoutError::Timeout => ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => ExecutionError::Disconnected {
                    path: "observer_stream".to_string(),
                },
            }
            .into()
        })
    }

    /// The next event if one is ready.
    #[must_use]
    pub fn try_recv(&self) -> Option<ObservationEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        // Best-effort: do not block on shutdown.
        if !self.unregistered.swap(true, Ordering::AcqRel) {
            let _ = self.control_tx.try_send(ControlMsg::Unregister { id: self.id });
        }
    }
}
