use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::resolve_available_slots;
use super::{Engine, EngineError};

impl Engine {
    /// Free slot starts for `(business, date[, employee])` with this engine's defaults.
    pub async fn available_slots(
        &self,
        business_id: Ulid,
        date: &str,
        employee_id: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        resolve_available_slots(self, &self.defaults, business_id, date, employee_id).await
    }

    pub async fn list_businesses(&self) -> Vec<Business> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for bs in shared {
            out.push(bs.read().await.business.clone());
        }
        out.sort_by_key(|b| b.id);
        out
    }

    /// Bookings of every status, ordered by `(date, time)`.
    /// Unknown businesses have no bookings.
    pub async fn get_bookings(&self, business_id: Ulid, date: Option<NaiveDate>) -> Vec<Booking> {
        let Some(bs) = self.get_business(&business_id) else {
            return vec![];
        };
        let guard = bs.read().await;
        match date {
            Some(date) => guard.bookings_on(date).to_vec(),
            None => guard.bookings.clone(),
        }
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let business_id = self
            .get_business_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let guard = bs.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn get_weekly_hours(&self, business_id: Ulid) -> Vec<WeeklyHours> {
        let Some(bs) = self.get_business(&business_id) else {
            return vec![];
        };
        let guard = bs.read().await;
        guard.weekly_hours.iter().flatten().copied().collect()
    }

    pub async fn get_breaks(&self, business_id: Ulid) -> Vec<BreakWindow> {
        let Some(bs) = self.get_business(&business_id) else {
            return vec![];
        };
        bs.read().await.breaks.clone()
    }

    pub async fn get_holidays(&self, business_id: Ulid) -> Vec<Holiday> {
        let Some(bs) = self.get_business(&business_id) else {
            return vec![];
        };
        bs.read().await.holidays.values().cloned().collect()
    }

    pub async fn get_blocked_slots(&self, business_id: Ulid, date: Option<NaiveDate>) -> Vec<BlockedSlot> {
        let Some(bs) = self.get_business(&business_id) else {
            return vec![];
        };
        let guard = bs.read().await;
        match date {
            Some(date) => guard.blocked_on(date).to_vec(),
            None => guard.blocked.clone(),
        }
    }
}
