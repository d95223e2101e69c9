use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_slot_free, validate_business, validate_day_of_week, validate_label, validate_weekly_hours,
    validate_window,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_business(&self, business: Business) -> Result<(), EngineError> {
        if self.state.len() >= MAX_BUSINESSES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        validate_business(&business)?;
        if self.state.contains_key(&business.id) {
            return Err(EngineError::AlreadyExists(business.id));
        }

        let id = business.id;
        let event = Event::BusinessCreated {
            business: business.clone(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(BusinessState::new(business))));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_business(&self, business: Business) -> Result<(), EngineError> {
        validate_business(&business)?;
        let id = business.id;
        let bs = self.get_business(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = bs.write().await;
        if !self.is_live(&id, &bs) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BusinessUpdated { business };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Drops the business with all of its configuration and bookings.
    pub async fn delete_business(&self, id: Ulid) -> Result<(), EngineError> {
        let bs = self.get_business(&id).ok_or(EngineError::NotFound(id))?;
        // Wait out in-flight writers on this business.
        let _guard = bs.write().await;
        if !self.is_live(&id, &bs) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::BusinessDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.entity_to_business.retain(|_, owner| *owner != id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Replace-all: weekdays missing from `hours` fall back to defaults.
    pub async fn replace_weekly_hours(&self, business_id: Ulid, hours: Vec<WeeklyHours>) -> Result<(), EngineError> {
        validate_weekly_hours(&hours)?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if !self.is_live(&business_id, &bs) {
            return Err(EngineError::NotFound(business_id));
        }
        let event = Event::WeeklyHoursReplaced { business_id, hours };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_break(&self, window: BreakWindow) -> Result<(), EngineError> {
        validate_day_of_week(window.day_of_week)?;
        validate_window(window.start_time, window.end_time)?;
        validate_label("label", window.label.as_deref(), MAX_LABEL_LEN)?;
        if self.entity_to_business.contains_key(&window.id) {
            return Err(EngineError::AlreadyExists(window.id));
        }
        let business_id = window.business_id;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if !self.is_live(&business_id, &bs) {
            return Err(EngineError::NotFound(business_id));
        }
        if guard.breaks.len() >= MAX_BREAKS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many breaks on business"));
        }
        let event = Event::BreakAdded { window };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_break(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.breaks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BreakRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    /// At most one holiday per date.
    pub async fn add_holiday(&self, holiday: Holiday) -> Result<(), EngineError> {
        validate_label("label", holiday.label.as_deref(), MAX_LABEL_LEN)?;
        if self.entity_to_business.contains_key(&holiday.id) {
            return Err(EngineError::AlreadyExists(holiday.id));
        }
        let business_id = holiday.business_id;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if !self.is_live(&business_id, &bs) {
            return Err(EngineError::NotFound(business_id));
        }
        if let Some(existing) = guard.holiday_on(holiday.date) {
            return Err(EngineError::AlreadyExists(existing.id));
        }
        if guard.holidays.len() >= MAX_HOLIDAYS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many holidays on business"));
        }
        let event = Event::HolidayAdded { holiday };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_holiday(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.holidays.values().any(|h| h.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::HolidayRemoved { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    /// Blocking a range never touches bookings already inside it.
    pub async fn block_slot(&self, blocked: BlockedSlot) -> Result<(), EngineError> {
        validate_window(blocked.start_time, blocked.end_time)?;
        validate_label("reason", blocked.reason.as_deref(), MAX_LABEL_LEN)?;
        if self.entity_to_business.contains_key(&blocked.id) {
            return Err(EngineError::AlreadyExists(blocked.id));
        }
        let business_id = blocked.business_id;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if !self.is_live(&business_id, &bs) {
            return Err(EngineError::NotFound(business_id));
        }
        if guard.blocked.len() >= MAX_BLOCKED_SLOTS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many blocked slots on business"));
        }
        let event = Event::SlotBlocked { blocked };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn unblock_slot(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.blocked.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::SlotUnblocked { id, business_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(business_id)
    }

    /// Conflict check and insert under the business write lock.
    /// Returns once the `BookingCreated` record is durable.
    pub(super) async fn commit_booking(&self, booking: Booking) -> Result<Booking, EngineError> {
        let business_id = booking.business_id;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut guard = bs.write().await;
        if !self.is_live(&business_id, &bs) {
            return Err(EngineError::NotFound(business_id));
        }
        if self.entity_to_business.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        let active = guard
            .bookings_on(booking.date)
            .iter()
            .filter(|b| b.status.is_active())
            .count();
        if active >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on date"));
        }

        if let Err(e) = check_slot_free(&guard, &booking, &self.defaults) {
            debug!(booking = %booking.id, date = %booking.date, time = %booking.time, "booking rejected under lock: {e}");
            return Err(e);
        }

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(booking)
    }

    /// Moves a booking along `pending → confirmed → completed`, or cancels it.
    /// Terminal states release the slot.
    pub async fn update_booking_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        let (business_id, mut guard) = self.resolve_entity_write(&id).await?;
        let from = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(id))?;
        if !from.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { from, to: status });
        }
        let event = Event::BookingStatusChanged {
            id,
            business_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Read locks on every business are held until the rewrite is done, so no
    /// write can land in the old file after its business was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let businesses: Vec<_> = self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();

        let mut guards = Vec::with_capacity(businesses.len());
        for (id, bs) in businesses {
            let guard = bs.clone().read_owned().await;
            // Deleted while we waited; its BusinessDeleted record is already in the old file.
            if self.is_live(&id, &bs) {
                guards.push(guard);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            let business_id = guard.id();
            events.push(Event::BusinessCreated {
                business: guard.business.clone(),
            });
            let hours: Vec<WeeklyHours> = guard.weekly_hours.iter().flatten().copied().collect();
            if !hours.is_empty() {
                events.push(Event::WeeklyHoursReplaced { business_id, hours });
            }
            events.extend(guard.breaks.iter().map(|w| Event::BreakAdded { window: w.clone() }));
            events.extend(
                guard
                    .holidays
                    .values()
                    .map(|h| Event::HolidayAdded { holiday: h.clone() }),
            );
            events.extend(
                guard
                    .blocked
                    .iter()
                    .map(|b| Event::SlotBlocked { blocked: b.clone() }),
            );
            // Bookings carry their current status, so no status events are needed.
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
