use crate::limits::*;
use crate::model::*;

use super::availability::resolve_state;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_window(start: TimeOfDay, end: TimeOfDay) -> Result<Window, EngineError> {
    Window::try_new(start, end)
        .ok_or_else(|| EngineError::validation("end_time", format!("{end} is not after start {start}")))
}

pub(crate) fn validate_day_of_week(day_of_week: u8) -> Result<(), EngineError> {
    if day_of_week > 6 {
        return Err(EngineError::validation(
            "day_of_week",
            format!("{day_of_week} is not in 0..=6 (Sunday = 0)"),
        ));
    }
    Ok(())
}

pub(crate) fn validate_label(field: &'static str, label: Option<&str>, max: usize) -> Result<(), EngineError> {
    if let Some(l) = label
        && l.len() > max
    {
        return Err(EngineError::validation(field, format!("longer than {max} bytes")));
    }
    Ok(())
}

pub(crate) fn validate_business(business: &Business) -> Result<(), EngineError> {
    validate_label("name", business.name.as_deref(), MAX_NAME_LEN)?;
    if let Some(duration) = business.slot_duration
        && !(MIN_SLOT_DURATION..=MAX_SLOT_DURATION).contains(&duration)
    {
        return Err(EngineError::validation(
            "slot_duration",
            format!("{duration} is not in {MIN_SLOT_DURATION}..={MAX_SLOT_DURATION} minutes"),
        ));
    }
    if let (Some(open), Some(close)) = (business.open_time, business.close_time) {
        validate_window(open, close).map_err(|_| {
            EngineError::validation("close_time", format!("{close} is not after open {open}"))
        })?;
    }
    Ok(())
}

/// Every weekday at most once; open rows need `open < close`.
pub(crate) fn validate_weekly_hours(hours: &[WeeklyHours]) -> Result<(), EngineError> {
    let mut seen = [false; 7];
    for row in hours {
        validate_day_of_week(row.day_of_week)?;
        let slot = &mut seen[row.day_of_week as usize];
        if *slot {
            return Err(EngineError::validation(
                "day_of_week",
                format!("weekday {} listed twice", row.day_of_week),
            ));
        }
        *slot = true;
        if !row.is_closed && row.open_time >= row.close_time {
            return Err(EngineError::validation(
                "close_time",
                format!("{} is not after open {}", row.close_time, row.open_time),
            ));
        }
    }
    Ok(())
}

/// Full availability re-check for `booking` against locked state.
///
/// Runs under the business write lock, so nothing can slip in between this
/// check and the insert.
pub(crate) fn check_slot_free(
    bs: &BusinessState,
    booking: &Booking,
    defaults: &BusinessDefaults,
) -> Result<(), EngineError> {
    let unavailable = || EngineError::SlotUnavailable {
        date: booking.date,
        time: booking.time,
    };

    if bs
        .active_bookings_at(booking.date, booking.time)
        .any(|b| employees_overlap(b.employee_id, booking.employee_id))
    {
        return Err(unavailable());
    }

    let availability = resolve_state(bs, booking.date, booking.employee_id, defaults);
    if let Some(reason) = availability.closed_reason {
        return Err(EngineError::BusinessClosed {
            date: booking.date,
            reason,
        });
    }
    if !availability.contains(booking.time) {
        return Err(unavailable());
    }
    Ok(())
}
