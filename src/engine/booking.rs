use tracing::debug;

use crate::model::*;
use crate::store::{CommitmentLedger, ScheduleStore};

use super::availability::resolve_for_date;
use super::conflict::now_ms;
use super::{Engine, EngineError};

// ── Booking Acceptance Guard ──────────────────────────────────────

/// Accept `request` only if its exact slot is free right now.
///
/// Input is validated before any storage access. The availability pre-check
/// gives a friendly early rejection; the binding decision is made by
/// [`CommitmentLedger::insert_booking_if_free`]. Nothing is written on failure.
pub async fn submit_booking<S>(
    store: &S,
    defaults: &BusinessDefaults,
    request: BookingRequest,
) -> Result<Booking, EngineError>
where
    S: ScheduleStore + CommitmentLedger + ?Sized,
{
    let date = parse_date(&request.date).map_err(EngineError::date)?;
    let time: TimeOfDay = request
        .time
        .parse()
        .map_err(|e| EngineError::time("time", e))?;

    let availability =
        resolve_for_date(store, defaults, request.business_id, date, request.employee_id).await?;
    if let Some(reason) = availability.closed_reason {
        return Err(EngineError::BusinessClosed { date, reason });
    }
    if !availability.contains(time) {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        debug!(business = %request.business_id, %date, %time, "slot not offered");
        return Err(EngineError::SlotUnavailable { date, time });
    }

    let booking = Booking {
        id: request.id,
        user_id: request.user_id,
        business_id: request.business_id,
        employee_id: request.employee_id,
        service_id: request.service_id,
        date,
        time,
        status: BookingStatus::Pending,
        created_at: now_ms(),
    };

    store.insert_booking_if_free(booking).await.inspect_err(|e| {
        if matches!(e, EngineError::SlotUnavailable { .. }) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        }
    })
}

impl Engine {
    /// [`submit_booking`] against this engine with its configured defaults.
    pub async fn submit_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        submit_booking(self, &self.defaults, request).await
    }
}
