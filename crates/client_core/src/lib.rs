use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::domain::{Forageable, ForageableId};
use storage::{ForageableStore, RecordStream, StoreError};
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch},
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, warn};

pub mod error;
mod factory;
pub use factory::{ControllerFactory, ControllerKind};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Returns true when both form fields are non-blank after trimming.
pub fn is_valid_entry(name: &str, address: &str) -> bool {
    !name.trim().is_empty() && !address.trim().is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

impl WriteOp {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
            WriteOp::Delete => "delete",
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one fire-and-forget write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    WriteCompleted {
        op: WriteOp,
        id: Option<ForageableId>,
        /// False when an update/delete matched no stored forageable.
        changed: bool,
    },
    WriteFailed {
        op: WriteOp,
        id: Option<ForageableId>,
        message: String,
    },
}

/// UI-facing mediator over a [`ForageableStore`].
///
/// Reads are live store queries handed straight through. Writes return
/// immediately and run as tasks owned by the controller; they are unordered
/// relative to each other and are aborted, without rollback, when the
/// controller is closed or dropped.
pub struct ForageableController {
    store: Arc<dyn ForageableStore>,
    runtime: Handle,
    writes: Mutex<JoinSet<()>>,
    in_flight: Arc<watch::Sender<usize>>,
    events: broadcast::Sender<ControllerEvent>,
}

/// Counts one scheduled write; released when the write task's future is
/// dropped, whether it finished or was aborted.
struct InFlightWrite(Arc<watch::Sender<usize>>);

impl InFlightWrite {
    fn acquire(in_flight: &Arc<watch::Sender<usize>>) -> Self {
        in_flight.send_modify(|count| *count += 1);
        Self(Arc::clone(in_flight))
    }
}

impl Drop for InFlightWrite {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl ForageableController {
    pub fn new(store: Arc<dyn ForageableStore>, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            runtime,
            writes: Mutex::new(JoinSet::new()),
            in_flight: Arc::new(watch::channel(0).0),
            events,
        }
    }

    pub fn observe_all(&self) -> RecordStream<Vec<Forageable>> {
        self.store.query_all()
    }

    /// Emits nothing until a forageable with `id` exists.
    pub fn observe_one(&self, id: ForageableId) -> RecordStream<Forageable> {
        self.store.query_by_id(id)
    }

    /// Callers check this before `add_forageable`/`update_forageable`; the
    /// write paths themselves accept any input.
    pub fn is_valid_entry(&self, name: &str, address: &str) -> bool {
        is_valid_entry(name, address)
    }

    pub fn add_forageable(
        &self,
        name: impl Into<String>,
        address: impl Into<String>,
        in_season: bool,
        notes: impl Into<String>,
    ) {
        let forageable = Forageable::new(name, address, in_season, notes);
        self.schedule(WriteOp::Insert, forageable);
    }

    pub fn update_forageable(
        &self,
        id: ForageableId,
        name: impl Into<String>,
        address: impl Into<String>,
        in_season: bool,
        notes: impl Into<String>,
    ) {
        let forageable = Forageable::new(name, address, in_season, notes).with_id(id);
        self.schedule(WriteOp::Update, forageable);
    }

    pub fn delete_forageable(&self, forageable: Forageable) {
        self.schedule(WriteOp::Delete, forageable);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Number of scheduled writes that have neither finished nor been aborted.
    pub fn pending_writes(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Waits until no write is in flight.
    ///
    /// Cancel-safe: dropping this future leaves every pending write running.
    pub async fn settle(&self) {
        let mut in_flight = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = in_flight.wait_for(|count| *count == 0).await;
        reap_finished(&mut self.lock_writes());
    }

    /// Aborts every pending write. Already committed writes stay committed.
    pub fn close(&self) {
        let mut writes = self.lock_writes();
        if !writes.is_empty() {
            debug!(pending = writes.len(), "aborting pending forageable writes");
        }
        writes.abort_all();
    }

    fn schedule(&self, op: WriteOp, forageable: Forageable) {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let in_flight = InFlightWrite::acquire(&self.in_flight);

        let task = async move {
            let _in_flight = in_flight;
            let event = match run_write(store.as_ref(), op, &forageable).await {
                Ok((id, changed)) => {
                    debug!(
                        op = op.as_str(),
                        forageable_id = id.map(|id| id.0),
                        changed,
                        "forageable write completed"
                    );
                    ControllerEvent::WriteCompleted { op, id, changed }
                }
                Err(err) => {
                    warn!(
                        op = op.as_str(),
                        forageable_id = forageable.id.map(|id| id.0),
                        error = %err,
                        "forageable write failed"
                    );
                    ControllerEvent::WriteFailed {
                        op,
                        id: forageable.id,
                        message: err.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        };

        let mut writes = self.lock_writes();
        reap_finished(&mut writes);
        writes.spawn_on(task, &self.runtime);
    }

    fn lock_writes(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ForageableController {
    fn drop(&mut self) {
        let writes = self.writes.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !writes.is_empty() {
            debug!(pending = writes.len(), "abandoning pending forageable writes");
        }
        writes.abort_all();
    }
}

async fn run_write(
    store: &dyn ForageableStore,
    op: WriteOp,
    forageable: &Forageable,
) -> Result<(Option<ForageableId>, bool), StoreError> {
    match op {
        WriteOp::Insert => store.insert(forageable).await.map(|id| (Some(id), true)),
        WriteOp::Update => store
            .update(forageable)
            .await
            .map(|changed| (forageable.id, changed)),
        WriteOp::Delete => store
            .delete(forageable)
            .await
            .map(|changed| (forageable.id, changed)),
    }
}

fn reap_finished(writes: &mut JoinSet<()>) {
    while let Some(joined) = writes.try_join_next() {
        log_join_failure(joined);
    }
}

fn log_join_failure(joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {}
        Err(err) => error!(error = %err, "forageable write task panicked"),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
