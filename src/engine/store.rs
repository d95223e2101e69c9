use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::store::{CommitmentLedger, ScheduleStore};

use super::{Engine, EngineError, SharedBusinessState};

impl Engine {
    fn business_or_not_found(&self, business_id: Ulid) -> Result<SharedBusinessState, EngineError> {
        self.get_business(&business_id)
            .ok_or(EngineError::NotFound(business_id))
    }
}

#[async_trait]
impl ScheduleStore for Engine {
    async fn business(&self, business_id: Ulid) -> Result<Business, EngineError> {
        let bs = self.business_or_not_found(business_id)?;
        let guard = bs.read().await;
        Ok(guard.business.clone())
    }

    async fn weekly_hours(&self, business_id: Ulid) -> Result<Vec<WeeklyHours>, EngineError> {
        let bs = self.business_or_not_found(business_id)?;
        let guard = bs.read().await;
        Ok(guard.weekly_hours.iter().flatten().copied().collect())
    }

    async fn breaks(&self, business_id: Ulid) -> Result<Vec<BreakWindow>, EngineError> {
        let bs = self.business_or_not_found(business_id)?;
        let guard = bs.read().await;
        Ok(guard.breaks.clone())
    }

    async fn holidays(
        &self,
        business_id: Ulid,
        dates: RangeInclusive<NaiveDate>,
    ) -> Result<Vec<Holiday>, EngineError> {
        let bs = self.business_or_not_found(business_id)?;
        if dates.start() > dates.end() {
            return Ok(vec![]);
        }
        let guard = bs.read().await;
        Ok(guard.holidays.range(dates).map(|(_, h)| h.clone()).collect())
    }
}

#[async_trait]
impl CommitmentLedger for Engine {
    async fn active_booking_times(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        employee_id: Option<Ulid>,
    ) -> Result<Vec<TimeOfDay>, EngineError> {
        let bs = self.business_or_not_found(business_id)?;
        let guard = bs.read().await;
        let mut times: Vec<TimeOfDay> = guard
            .bookings_on(date)
            .iter()
            .filter(|b| b.occupies_for(employee_id))
            .map(|b| b.time)
            .collect();
        times.dedup();
        Ok(times)
    }

    async fn blocked_ranges(&self, business_id: Ulid, date: NaiveDate) -> Result<Vec<BlockedSlot>, EngineError> {
        let bs = self.business_or_not_found(business_id)?;
        let guard = bs.read().await;
        Ok(guard.blocked_on(date).to_vec())
    }

    async fn insert_booking_if_free(&self, booking: Booking) -> Result<Booking, EngineError> {
        self.commit_booking(booking).await
    }
}
