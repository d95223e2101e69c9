//! Storage seams read by the availability resolver and the booking guard.
//!
//! [`crate::engine::Engine`] implements both traits over its in-memory,
//! WAL-backed state. The resolver and guard are generic over them.

use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// Per-business schedule configuration. Read-only from the resolver.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// `NotFound` if the business does not exist.
    async fn business(&self, business_id: Ulid) -> Result<Business, EngineError>;

    /// Explicit weekday rows; weekdays without a row fall back to defaults.
    async fn weekly_hours(&self, business_id: Ulid) -> Result<Vec<WeeklyHours>, EngineError>;

    /// Recurring breaks for every weekday.
    async fn breaks(&self, business_id: Ulid) -> Result<Vec<BreakWindow>, EngineError>;

    async fn holidays(
        &self,
        business_id: Ulid,
        dates: RangeInclusive<NaiveDate>,
    ) -> Result<Vec<Holiday>, EngineError>;
}

/// Bookings and manually blocked ranges.
#[async_trait]
pub trait CommitmentLedger: Send + Sync {
    /// Times held by pending or confirmed bookings on `date`.
    ///
    /// With an employee: that employee's bookings plus unassigned ones.
    /// Without: every active booking of the business.
    async fn active_booking_times(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        employee_id: Option<Ulid>,
    ) -> Result<Vec<TimeOfDay>, EngineError>;

    async fn blocked_ranges(&self, business_id: Ulid, date: NaiveDate) -> Result<Vec<BlockedSlot>, EngineError>;

    /// Check-and-insert as one atomic step: fails with `SlotUnavailable` if an
    /// overlapping active booking (or any other exclusion) now holds the slot.
    /// Returns once the booking is durable.
    async fn insert_booking_if_free(&self, booking: Booking) -> Result<Booking, EngineError>;
}
