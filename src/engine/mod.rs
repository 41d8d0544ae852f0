mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::{ConflictKind, EngineError};

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, NotifyHub};
use crate::observability;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then one
/// fsync for the lot and answer every sender with the shared outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Non-appends see the log only after this batch is durable.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();

    let (events, senders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    // A failed batch is cut back off the log, so none of its callers see it.
    let result = wal.append_batch(&events);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for tx in senders {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal.compact(&events);
            if result.is_ok() {
                metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Room and reservation store with per-room write serialization.
///
/// Every mutation is appended to the WAL before it is applied in memory.
/// Lock order is catalog mutex, then a single room lock.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Exact room name → room id.
    room_names: DashMap<String, Ulid>,
    /// Reverse lookup: reservation id → room id.
    reservation_to_room: DashMap<Ulid, Ulid>,
    /// Serializes room create/update/delete and compaction snapshots.
    catalog: Mutex<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: NotifyHub,
}

impl Engine {
    /// Recover state from the WAL at `wal_path` and start its writer task.
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, notify: NotifyHub) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            room_names: DashMap::new(),
            reservation_to_room: DashMap::new(),
            catalog: Mutex::new(()),
            wal_tx,
            notify,
        };

        let replayed = events.len();
        let mut states: HashMap<Ulid, RoomState> = HashMap::new();
        for event in events {
            engine.replay_event(&mut states, event);
        }
        for (id, rs) in states {
            engine.room_names.insert(rs.room.name.clone(), id);
            engine.rooms.insert(id, Arc::new(RwLock::new(rs)));
        }
        metrics::gauge!(observability::ROOMS_TOTAL).set(engine.rooms.len() as f64);

        info!(
            wal = %wal_path.display(),
            events = replayed,
            rooms = engine.rooms.len(),
            reservations = engine.reservation_to_room.len(),
            "engine recovered"
        );
        Ok(engine)
    }

    fn replay_event(&self, states: &mut HashMap<Ulid, RoomState>, event: Event) {
        match event {
            Event::RoomCreated { room } => {
                states.insert(room.id, RoomState::new(room));
            }
            Event::RoomUpdated { room } => match states.get_mut(&room.id) {
                Some(rs) => rs.room = room,
                None => warn!(room_id = %room.id, "replay: update for unknown room"),
            },
            Event::RoomDeleted { id } => {
                states.remove(&id);
            }
            Event::ReservationCreated { reservation } => {
                match states.get_mut(&reservation.room_id) {
                    Some(rs) => {
                        self.reservation_to_room
                            .insert(reservation.id, reservation.room_id);
                        rs.insert_reservation(reservation);
                    }
                    None => warn!(
                        reservation_id = %reservation.id,
                        room_id = %reservation.room_id,
                        "replay: reservation for unknown room"
                    ),
                }
            }
            Event::ReservationDeleted { id, room_id } => {
                if let Some(rs) = states.get_mut(&room_id) {
                    rs.remove_reservation(id);
                }
                self.reservation_to_room.remove(&id);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await;
        let result = match sent {
            Ok(()) => match rx.await {
                Ok(r) => r.map_err(|e| e.to_string()),
                Err(_) => Err("WAL writer dropped response".to_string()),
            },
            Err(_) => Err("WAL writer shut down".to_string()),
        };
        result.map_err(|e| {
            error!(error = %e, event = ?event, "WAL append failed");
            EngineError::Internal(format!("WAL error: {e}"))
        })
    }

    pub(super) fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of all room handles; no map shard lock survives the call.
    pub(super) fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_room.len()
    }

    /// Best-effort hand-off to the notification channel. Never fails the caller.
    pub(super) fn publish(&self, notification: Notification) {
        let reservation_id = notification.reservation_id();
        match self.notify.send(notification) {
            Ok(()) => {
                metrics::counter!(observability::NOTIFICATIONS_SENT_TOTAL).increment(1);
                info!(%reservation_id, "reservation notification enqueued");
            }
            Err(e) => {
                metrics::counter!(observability::NOTIFICATIONS_FAILED_TOTAL, "stage" => "enqueue")
                    .increment(1);
                error!(%reservation_id, "failed to send reservation notification: {e}");
            }
        }
    }
}

/// Time and count an engine operation.
pub(super) async fn observed<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let started = Instant::now();
    let result = fut.await;
    observability::record_operation(operation, result.is_ok(), started);
    result
}
