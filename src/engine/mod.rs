mod availability;
mod booking;
mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
mod store;

pub use availability::{effective_hours, resolve, resolve_available_slots, resolve_for_date, DayPlan};
pub use booking::submit_booking;
pub use error::EngineError;
pub use slots::{covered_range, generate_candidate_slots, CandidateSlots};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedBusinessState = Arc<RwLock<BusinessState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have before handling the non-append command
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
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
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// One tenant's schedule configuration and commitment ledger.
pub struct Engine {
    pub state: DashMap<Ulid, SharedBusinessState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub defaults: BusinessDefaults,
    /// Reverse lookup: entity (break/holiday/blocked slot/booking) id → business id
    pub(super) entity_to_business: DashMap<Ulid, Ulid>,
}

fn map_entity(entity_map: &DashMap<Ulid, Ulid>, id: Ulid, business_id: Ulid) {
    entity_map.insert(id, business_id);
}

/// Apply an event to a BusinessState (no locking; caller holds the lock).
fn apply_to_business(bs: &mut BusinessState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BusinessUpdated { business } => {
            bs.business = business.clone();
        }
        Event::WeeklyHoursReplaced { hours, .. } => {
            bs.replace_weekly_hours(hours);
        }
        Event::BreakAdded { window } => {
            map_entity(entity_map, window.id, window.business_id);
            bs.insert_break(window.clone());
        }
        Event::BreakRemoved { id, .. } => {
            bs.remove_break(*id);
            entity_map.remove(id);
        }
        Event::HolidayAdded { holiday } => {
            map_entity(entity_map, holiday.id, holiday.business_id);
            bs.insert_holiday(holiday.clone());
        }
        Event::HolidayRemoved { id, .. } => {
            bs.remove_holiday(*id);
            entity_map.remove(id);
        }
        Event::SlotBlocked { blocked } => {
            map_entity(entity_map, blocked.id, blocked.business_id);
            bs.insert_blocked(blocked.clone());
        }
        Event::SlotUnblocked { id, .. } => {
            bs.remove_blocked(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            map_entity(entity_map, booking.id, booking.business_id);
            bs.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(booking) = bs.booking_mut(*id) {
                booking.status = *status;
            }
        }
        // Created/Deleted are handled at the DashMap level, not here
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_defaults(wal_path, notify, BusinessDefaults::default())
    }

    pub fn with_defaults(wal_path: PathBuf, notify: Arc<NotifyHub>, defaults: BusinessDefaults) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let entity_to_business = DashMap::new();

        // Rebuild plain state first; it is wrapped in locks only once replay is done.
        let mut businesses: HashMap<Ulid, BusinessState> = HashMap::new();
        for event in &events {
            match event {
                Event::BusinessCreated { business } => {
                    businesses.insert(business.id, BusinessState::new(business.clone()));
                }
                Event::BusinessDeleted { id } => {
                    businesses.remove(id);
                    entity_to_business.retain(|_, owner: &mut Ulid| *owner != *id);
                }
                other => {
                    if let Some(bs) = businesses.get_mut(&other.business_id()) {
                        apply_to_business(bs, other, &entity_to_business);
                    }
                }
            }
        }

        let state = DashMap::new();
        for (id, bs) in businesses {
            state.insert(id, Arc::new(RwLock::new(bs)));
        }

        Ok(Self {
            state,
            wal_tx,
            notify,
            defaults,
            entity_to_business,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_business(&self, id: &Ulid) -> Option<SharedBusinessState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// False once `bs` has been deleted (or replaced) while a caller waited on its lock.
    pub(super) fn is_live(&self, id: &Ulid, bs: &SharedBusinessState) -> bool {
        self.state.get(id).is_some_and(|e| Arc::ptr_eq(e.value(), bs))
    }

    pub fn get_business_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_business.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        bs: &mut BusinessState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_business(bs, event, &self.entity_to_business);
        self.notify.send(event.business_id(), event);
        Ok(())
    }

    /// Lookup entity → business, get business, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<BusinessState>), EngineError> {
        let business_id = self
            .get_business_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.clone().write_owned().await;
        if !self.is_live(&business_id, &bs) {
            return Err(EngineError::NotFound(*entity_id));
        }
        Ok((business_id, guard))
    }
}
