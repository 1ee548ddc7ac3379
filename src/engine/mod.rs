mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedCabinState = Arc<RwLock<CabinState>>;
pub type SharedGuestState = Arc<RwLock<GuestState>>;

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
    Close {
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
///
/// Exits on `Close` or when every sender is gone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let pending = match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                pending
            }
            other => Some(other),
        };

        if let Some(cmd) = pending
            && handle_non_append(&mut wal, cmd).is_break()
        {
            return;
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Close { response } => {
            let _ = response.send(wal.flush_sync());
            return ControlFlow::Break(());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
    ControlFlow::Continue(())
}

/// Cabins, guests, reservations and payments for one lodging complex.
///
/// Each cabin and each guest sits behind its own lock. Admission holds the
/// cabin's write lock from the overlap scan until the reservation is in the
/// WAL and in memory, so two overlapping requests for one cabin serialize.
/// Lock order is always commit gate → cabin → guest → create locks.
pub struct Engine {
    pub(super) cabins: DashMap<Ulid, SharedCabinState>,
    pub(super) guests: DashMap<Ulid, SharedGuestState>,
    pub(super) payments: DashMap<Ulid, Payment>,
    /// Reverse lookup: reservation id → cabin id
    pub(super) reservation_to_cabin: DashMap<Ulid, Ulid>,
    /// Reservation id → ids of its payments, in recording order.
    pub(super) payments_by_reservation: DashMap<Ulid, Vec<Ulid>>,
    /// Shared by every mutation, exclusive for compaction snapshots.
    pub(super) commit_gate: RwLock<()>,
    /// Held from the duplicate-id check until the new record is in its map.
    pub(super) cabin_create: Mutex<()>,
    pub(super) guest_create: Mutex<()>,
    pub(super) payment_create: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a reservation event to its cabin (caller holds the lock).
fn apply_to_cabin(cs: &mut CabinState, event: &Event) {
    match event {
        Event::ReservationAdmitted {
            id,
            guest_id,
            cabin_id,
            stay,
        } => cs.insert_reservation(Reservation {
            id: *id,
            guest_id: *guest_id,
            cabin_id: *cabin_id,
            stay: *stay,
        }),
        Event::ReservationDeleted { id, .. } => {
            cs.remove_reservation(*id);
        }
        _ => {}
    }
}

/// Apply a reservation event to its guest (caller holds the lock).
fn apply_to_guest(gs: &mut GuestState, event: &Event) {
    match event {
        Event::ReservationAdmitted { id, .. } => gs.reservations.push(*id),
        Event::ReservationDeleted { id, .. } => gs.reservations.retain(|r| r != id),
        _ => {}
    }
}

/// Cabin and guest touched by an event, for routing during replay.
fn event_owners(event: &Event) -> (Option<Ulid>, Option<Ulid>) {
    match event {
        Event::ReservationAdmitted {
            cabin_id, guest_id, ..
        }
        | Event::ReservationDeleted {
            cabin_id, guest_id, ..
        } => (Some(*cabin_id), Some(*guest_id)),
        _ => (None, None),
    }
}

impl Engine {
    /// Open the engine over the WAL at `wal_path`, replaying it first.
    /// Spawns the WAL writer task, so it must run inside a Tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            cabins: DashMap::new(),
            guests: DashMap::new(),
            payments: DashMap::new(),
            reservation_to_cabin: DashMap::new(),
            payments_by_reservation: DashMap::new(),
            commit_gate: RwLock::new(()),
            cabin_create: Mutex::new(()),
            guest_create: Mutex::new(()),
            payment_create: Mutex::new(()),
            wal_tx,
        };

        // Replay into plain maps (nobody else can see them yet), then publish.
        let mut cabins: HashMap<Ulid, CabinState> = HashMap::new();
        let mut guests: HashMap<Ulid, GuestState> = HashMap::new();
        for event in &events {
            match event {
                Event::CabinCreated { id, name, capacity } => {
                    cabins.insert(*id, CabinState::new(*id, name.clone(), *capacity));
                }
                Event::CabinDeleted { id } => {
                    cabins.remove(id);
                }
                Event::GuestCreated {
                    id,
                    name,
                    document,
                    phone,
                } => {
                    guests.insert(
                        *id,
                        GuestState::new(*id, name.clone(), document.clone(), phone.clone()),
                    );
                }
                Event::GuestDeleted { id } => {
                    guests.remove(id);
                }
                other => {
                    let (cabin_id, guest_id) = event_owners(other);
                    if let Some(cid) = cabin_id
                        && let Some(cs) = cabins.get_mut(&cid)
                    {
                        apply_to_cabin(cs, other);
                    }
                    if let Some(gid) = guest_id
                        && let Some(gs) = guests.get_mut(&gid)
                    {
                        apply_to_guest(gs, other);
                    }
                }
            }
            engine.apply_to_indexes(event);
        }

        for (id, cs) in cabins {
            engine.cabins.insert(id, Arc::new(RwLock::new(cs)));
        }
        for (id, gs) in guests {
            engine.guests.insert(id, Arc::new(RwLock::new(gs)));
        }

        info!(
            events = events.len(),
            cabins = engine.cabins.len(),
            guests = engine.guests.len(),
            reservations = engine.reservation_to_cabin.len(),
            payments = engine.payments.len(),
            "engine opened: {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Flush the WAL and stop its writer. Later mutations fail with a
    /// storage error; reads keep working.
    pub async fn close(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Close { response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Keep the id-keyed indexes (payments, reservation → cabin) in step
    /// with an event. Entity state behind locks is handled separately.
    pub(super) fn apply_to_indexes(&self, event: &Event) {
        match event {
            Event::ReservationAdmitted { id, cabin_id, .. } => {
                self.reservation_to_cabin.insert(*id, *cabin_id);
            }
            Event::ReservationDeleted {
                id, payment_ids, ..
            } => {
                for pid in payment_ids {
                    self.payments.remove(pid);
                }
                self.payments_by_reservation.remove(id);
                self.reservation_to_cabin.remove(id);
            }
            Event::PaymentRecorded {
                id,
                reservation_id,
                amount,
                method,
                recorded_on,
            } => {
                self.payments.insert(
                    *id,
                    Payment {
                        id: *id,
                        reservation_id: *reservation_id,
                        amount: *amount,
                        method: *method,
                        recorded_on: *recorded_on,
                    },
                );
                self.payments_by_reservation
                    .entry(*reservation_id)
                    .or_default()
                    .push(*id);
            }
            Event::CabinCreated { .. }
            | Event::CabinDeleted { .. }
            | Event::GuestCreated { .. }
            | Event::GuestDeleted { .. } => {}
        }
    }

    pub fn get_cabin(&self, id: &Ulid) -> Option<SharedCabinState> {
        self.cabins.get(id).map(|e| e.value().clone())
    }

    pub fn get_guest(&self, id: &Ulid) -> Option<SharedGuestState> {
        self.guests.get(id).map(|e| e.value().clone())
    }

    pub fn cabin_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_cabin.get(reservation_id).map(|e| *e.value())
    }

    /// Lookup reservation → cabin, get cabin, acquire its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<CabinState>, EngineError> {
        let cabin_id = self
            .cabin_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let cs = self
            .get_cabin(&cabin_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let guard = cs.write_owned().await;
        // Deleted while we waited for the lock.
        if guard.reservation(*reservation_id).is_none() {
            return Err(EngineError::NotFound(*reservation_id));
        }
        Ok(guard)
    }
}
