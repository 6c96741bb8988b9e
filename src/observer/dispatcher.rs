//! Observer dispatcher worker.
//!
//! This module owns observer registrations and turns saved facts into
//! [`ObservationEvent`]s. Saves enqueue notifications on a bounded channel
//! and never block the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, never, select, Receiver, Sender, TrySendError};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ExecutionError, KyroFactError, KyroFactResult};
use crate::fact::FactReference;
use crate::network::CancellationToken;
use crate::specification::Specification;
use crate::storage::{FactStore, ProjectedResult};

use super::events::{ObservationEvent, ObserverId};
use super::listener::Listener;
use super::stream::Observer;

#[allow(missing_docs)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObserverSystemConfig {
    /// Max queued save notifications before new ones are dropped.
    pub notification_queue_capacity: usize,
    /// Max queued control messages (register/unregister).
    pub control_queue_capacity: usize,
    /// Per-observer event buffer capacity.
    pub stream_capacity: usize,
}

impl Default for ObserverSystemConfig {
    fn default() -> Self {
        Self {
            notification_queue_capacity: 4096,
            control_queue_capacity: 1024,
            stream_capacity: 1024,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Register {
        id: ObserverId,
        start: Vec<FactReference>,
        specification: Specification,
        cancel: CancellationToken,
        stream_tx: Sender<ObservationEvent>,
        reply: Sender<KyroFactResult<Vec<ProjectedResult>>>,
    },
    Unregister {
        id: ObserverId,
    },
}

#[derive(Debug, Clone)]
struct NotifyMsg {
    facts: Vec<FactReference>,
}

fn disconnected() -> KyroFactError {
    ExecutionError::Disconnected {
        path: "observer_control".to_string(),
    }
    .into()
}

/// Observer system: owns observer registrations and dispatches events.
///
/// This system runs a dedicated worker thread. Saves enqueue the new fact
/// references using non-blocking `try_send` to avoid stalling callers.
#[derive(Debug)]
pub struct ObserverSystem {
    cfg: ObserverSystemConfig,
    control_tx: Sender<ControlMsg>,
    notify_tx: Sender<NotifyMsg>,
    dropped_notifications: AtomicU64,
    dropped_events: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ObserverSystem {
    /// Spawn the dispatcher thread over `store`.
    pub fn new(cfg: ObserverSystemConfig, store: Arc<dyn FactStore>) -> KyroFactResult<Self> {
        let (control_tx, control_rx) = bounded::<ControlMsg>(cfg.control_queue_capacity.max(1));
        let (notify_tx, notify_rx) = bounded::<NotifyMsg>(cfg.notification_queue_capacity.max(1));
        let dropped_events = Arc::new(AtomicU64::new(0));

        let thread_dropped_events = Arc::clone(&dropped_events);
        let join = thread::Builder::new()
            .name("kyrofact-observer".to_string())
            .spawn(move || worker_loop(store.as_ref(), &thread_dropped_events, control_rx, notify_rx))
            .map_err(|e| KyroFactError::internal(format!("failed to spawn observer worker: {e}")))?;

        Ok(Self {
            cfg,
            control_tx,
            notify_tx,
            dropped_notifications: AtomicU64::new(0),
            dropped_events,
            join: Mutex::new(Some(join)),
        })
    }

    /// Start observing `specification` from the facts in `start`.
    ///
    /// The initial results are read on the worker before this returns and
    /// are available from [`Observer::initial_results`]. Later changes arrive
    /// as events on the observer.
    pub fn watch(
        &self,
        start: &[FactReference],
        specification: &Specification,
        cancel: CancellationToken,
    ) -> KyroFactResult<Observer> {
        cancel.check()?;
        let id = ObserverId::new();
        let (stream_tx, stream_rx) = bounded::<ObservationEvent>(self.cfg.stream_capacity.max(1));
        let (reply_tx, reply_rx) = bounded::<KyroFactResult<Vec<ProjectedResult>>>(1);

        self.control_tx
            .send(ControlMsg::Register {
                id,
                start: start.to_vec(),
                specification: specification.clone(),
                cancel: cancel.clone(),
                stream_tx,
                reply: reply_tx,
            })
            .map_err(|_| disconnected())?;

        let initial = reply_rx.recv().map_err(|_| disconnected())??;
        Ok(Observer::new(id, initial, stream_rx, self.control_tx.clone(), cancel))
    }

    /// Non-blocking notification that facts were saved.
    pub fn notify_saved(&self, facts: Vec<FactReference>) {
        if facts.is_empty() {
            return;
        }
        match self.notify_tx.try_send(NotifyMsg { facts }) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped_notifications.fetch_add(1, Ordering::Relaxed);
                warn!("observer notification dropped");
            }
        }
    }

    /// Save notifications dropped because the queue was full.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications.load(Ordering::Relaxed)
    }

    /// Result events dropped because a subscriber lagged.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

impl Drop for ObserverSystem {
    fn drop(&mut self) {
        // Close channels first so the worker can terminate.
        let (dummy_control_tx, _) = bounded::<ControlMsg>(1);
        drop(std::mem::replace(&mut self.control_tx, dummy_control_tx));

        let (dummy_notify_tx, _) = bounded::<NotifyMsg>(1);
        drop(std::mem::replace(&mut self.notify_tx, dummy_notify_tx));

        if let Ok(mut guard) = self.join.lock() {
            // Observers hold control senders and may outlive the system, so
            // the worker is detached. It exits once the last sender is gone.
            drop(guard.take());
        }
    }
}

fn register(
    store: &dyn FactStore,
    listeners: &mut HashMap<ObserverId, Listener>,
    msg: ControlMsg,
) {
    match msg {
        ControlMsg::Register {
            id,
            start,
            specification,
            cancel,
            stream_tx,
            reply,
        } => {
            if cancel.is_cancelled() {
                let _ = reply.send(Err(ExecutionError::Cancelled.into()));
                return;
            }
            let mut listener = Listener::new(start, specification, cancel, stream_tx);
            match listener.initial_load(store) {
                Ok(initial) => {
                    debug!(observer = %id, rows = initial.len(), "observer registered");
                    listeners.insert(id, listener);
                    let _ = reply.send(Ok(initial));
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            }
        }
        ControlMsg::Unregister { id } => {
            if listeners.remove(&id).is_some() {
                debug!(observer = %id, "observer unregistered");
            }
        }
    }
}

fn dispatch(
    store: &dyn FactStore,
    listeners: &mut HashMap<ObserverId, Listener>,
    dropped_events: &AtomicU64,
    facts: &[FactReference],
) {
    listeners.retain(|id, listener| {
        if listener.cancel.is_cancelled() {
            return false;
        }
        let events = match listener.on_saved(store, facts) {
            Ok(events) => events,
            Err(err) => {
                // Fail closed: the observer misses this change rather than
                // receiving a partial one.
                warn!(observer = %id, error = %err, "failed to evaluate inverses");
                return true;
            }
        };
        for event in events {
            // Never block the worker: drop if the observer is slow.
            match listener.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped_events.fetch_add(1, Ordering::Relaxed);
                    warn!(observer = %id, "observer event dropped");
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
        true
    });
}

fn worker_loop(
    store: &dyn FactStore,
    dropped_events: &AtomicU64,
    mut control_rx: Receiver<ControlMsg>,
    mut notify_rx: Receiver<NotifyMsg>,
) {
    let mut listeners: HashMap<ObserverId, Listener> = HashMap::new();

    let mut control_closed = false;
    let mut notify_closed = false;

    loop {
        select! {
            recv(control_rx) -> msg => match msg {
                Ok(msg) => register(store, &mut listeners, msg),
                Err(_) => control_closed = true,
            },
            recv(notify_rx) -> msg => match msg {
                Ok(NotifyMsg { facts }) => dispatch(store, &mut listeners, dropped_events, &facts),
                Err(_) => notify_closed = true,
            },
        }

        // A closed channel is swapped for one that never fires so the
        // select keeps blocking on the other.
        if control_closed {
            control_rx = never();
        }
        if notify_closed {
            notify_rx = never();
        }

        if control_closed && notify_closed {
            break;
        }
    }
}
