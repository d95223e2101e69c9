use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::store::{CommitmentLedger, ScheduleStore};

use super::slots::{covered_range, generate_candidate_slots};
use super::EngineError;

// ── Availability Resolver ─────────────────────────────────────────

/// Everything needed to resolve one business-day, already fetched.
#[derive(Debug, Clone, Copy)]
pub struct DayPlan<'a> {
    pub business: &'a Business,
    pub date: NaiveDate,
    pub holiday: Option<&'a Holiday>,
    pub weekly_hours: &'a [WeeklyHours],
    /// Breaks for any weekday; only those on `date`'s weekday apply.
    pub breaks: &'a [BreakWindow],
    /// Active booking times, already filtered by employee.
    pub booked: &'a [TimeOfDay],
    /// Blocked ranges; only those dated `date` apply.
    pub blocked: &'a [BlockedSlot],
}

/// Opening window for a weekday, or `None` when the business is closed.
///
/// A weekday row wins. Without one, the default closed days apply and the
/// hours come from the business record, then from `defaults`.
/// An effective `open >= close` counts as closed.
pub fn effective_hours(
    business: &Business,
    weekly_hours: &[WeeklyHours],
    day_of_week: u8,
    defaults: &BusinessDefaults,
) -> Option<Window> {
    let (open, close) = match weekly_hours.iter().find(|h| h.day_of_week == day_of_week) {
        Some(row) if row.is_closed => return None,
        Some(row) => (row.open_time, row.close_time),
        None if defaults.closed_days.get(day_of_week as usize) == Some(&true) => return None,
        None => (
            business.open_time.unwrap_or(defaults.open_time),
            business.close_time.unwrap_or(defaults.close_time),
        ),
    };
    Window::try_new(open, close)
}

pub fn slot_duration(business: &Business, defaults: &BusinessDefaults) -> u16 {
    business.slot_duration.unwrap_or(defaults.slot_duration)
}

/// Candidates for the day minus breaks, blocked ranges and booked times.
/// Candidate order is kept.
pub fn resolve(plan: &DayPlan<'_>, defaults: &BusinessDefaults) -> Availability {
    let business_id = plan.business.id;
    if let Some(holiday) = plan.holiday {
        return Availability::closed(business_id, plan.date, ClosedReason::Holiday, holiday.label.clone());
    }

    let dow = day_of_week(plan.date);
    let Some(hours) = effective_hours(plan.business, plan.weekly_hours, dow, defaults) else {
        return Availability::closed(business_id, plan.date, ClosedReason::WeeklyClosed, None);
    };

    let candidates: Vec<TimeOfDay> =
        generate_candidate_slots(hours.start, hours.end, slot_duration(plan.business, defaults)).collect();
    let mut free = vec![true; candidates.len()];

    let breaks = plan
        .breaks
        .iter()
        .filter(|b| b.day_of_week == dow)
        .filter_map(BreakWindow::window);
    let blocked = plan
        .blocked
        .iter()
        .filter(|b| b.date == plan.date)
        .filter_map(BlockedSlot::window);
    for window in breaks.chain(blocked) {
        free[covered_range(&candidates, &window)].fill(false);
    }

    for time in plan.booked {
        if let Ok(i) = candidates.binary_search(time) {
            free[i] = false;
        }
    }

    let slots = candidates
        .into_iter()
        .zip(free)
        .filter_map(|(t, is_free)| is_free.then_some(t))
        .collect();

    Availability {
        business_id,
        date: plan.date,
        slots,
        closed_reason: None,
        holiday_label: None,
    }
}

/// Resolve straight from a business's in-memory state. Caller holds its lock.
pub(crate) fn resolve_state(
    bs: &BusinessState,
    date: NaiveDate,
    employee_id: Option<Ulid>,
    defaults: &BusinessDefaults,
) -> Availability {
    let weekly_hours: Vec<WeeklyHours> = bs.weekly_hours.iter().flatten().copied().collect();
    let booked: Vec<TimeOfDay> = bs
        .bookings_on(date)
        .iter()
        .filter(|b| b.occupies_for(employee_id))
        .map(|b| b.time)
        .collect();
    resolve(
        &DayPlan {
            business: &bs.business,
            date,
            holiday: bs.holiday_on(date),
            weekly_hours: &weekly_hours,
            breaks: &bs.breaks,
            booked: &booked,
            blocked: bs.blocked_on(date),
        },
        defaults,
    )
}

/// Free slot starts for `(business, date[, employee])`.
///
/// The date is validated before any storage access.
pub async fn resolve_available_slots<S>(
    store: &S,
    defaults: &BusinessDefaults,
    business_id: Ulid,
    date: &str,
    employee_id: Option<Ulid>,
) -> Result<Availability, EngineError>
where
    S: ScheduleStore + CommitmentLedger + ?Sized,
{
    let date = parse_date(date).map_err(EngineError::date)?;
    resolve_for_date(store, defaults, business_id, date, employee_id).await
}

/// Same as [`resolve_available_slots`] for an already parsed date.
/// Closed days return before the ledger is read.
pub async fn resolve_for_date<S>(
    store: &S,
    defaults: &BusinessDefaults,
    business_id: Ulid,
    date: NaiveDate,
    employee_id: Option<Ulid>,
) -> Result<Availability, EngineError>
where
    S: ScheduleStore + CommitmentLedger + ?Sized,
{
    let business = store.business(business_id).await?;

    let holidays = store.holidays(business_id, date..=date).await?;
    if let Some(holiday) = holidays.iter().find(|h| h.date == date) {
        return Ok(Availability::closed(
            business_id,
            date,
            ClosedReason::Holiday,
            holiday.label.clone(),
        ));
    }

    let weekly_hours = store.weekly_hours(business_id).await?;
    if effective_hours(&business, &weekly_hours, day_of_week(date), defaults).is_none() {
        return Ok(Availability::closed(business_id, date, ClosedReason::WeeklyClosed, None));
    }

    let breaks = store.breaks(business_id).await?;
    let booked = store.active_booking_times(business_id, date, employee_id).await?;
    let blocked = store.blocked_ranges(business_id, date).await?;

    Ok(resolve(
        &DayPlan {
            business: &business,
            date,
            holiday: None,
            weekly_hours: &weekly_hours,
            breaks: &breaks,
            booked: &booked,
            blocked: &blocked,
        },
        defaults,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::RangeInclusive;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    const MONDAY: &str = "2024-06-10";
    const SUNDAY: &str = "2024-06-09";

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn render(a: &Availability) -> Vec<String> {
        a.slots.iter().map(|s| s.to_string()).collect()
    }

    fn hours(day_of_week: u8, open: &str, close: &str) -> WeeklyHours {
        WeeklyHours {
            day_of_week,
            open_time: t(open),
            close_time: t(close),
            is_closed: false,
        }
    }

    fn business(slot_duration: u16) -> Business {
        Business {
            slot_duration: Some(slot_duration),
            ..Business::new(Ulid::new())
        }
    }

    fn break_on(business_id: Ulid, day_of_week: u8, start: &str, end: &str) -> BreakWindow {
        BreakWindow {
            id: Ulid::new(),
            business_id,
            day_of_week,
            start_time: t(start),
            end_time: t(end),
            label: Some("Lunch".into()),
        }
    }

    fn blocked_on(business_id: Ulid, date: &str, start: &str, end: &str) -> BlockedSlot {
        BlockedSlot {
            id: Ulid::new(),
            business_id,
            date: d(date),
            start_time: t(start),
            end_time: t(end),
            reason: None,
        }
    }

    fn plan<'a>(business: &'a Business, date: &str, weekly_hours: &'a [WeeklyHours]) -> DayPlan<'a> {
        DayPlan {
            business,
            date: d(date),
            holiday: None,
            weekly_hours,
            breaks: &[],
            booked: &[],
            blocked: &[],
        }
    }

    fn booking(business_id: Ulid, date: &str, time: &str, employee_id: Option<Ulid>, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            business_id,
            employee_id,
            service_id: None,
            date: d(date),
            time: t(time),
            status,
            created_at: 0,
        }
    }

    #[test]
    fn hourly_weekday_eight_slots() {
        let b = business(60);
        let rows = [hours(1, "09:00", "17:00")];
        let a = resolve(&plan(&b, MONDAY, &rows), &BusinessDefaults::STANDARD);
        assert!(!a.is_closed());
        assert_eq!(
            render(&a),
            vec!["09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00"]
        );
    }

    #[test]
    fn holiday_closes_regardless_of_hours() {
        let b = business(30);
        let rows = [hours(1, "09:00", "17:00")];
        let holiday = Holiday {
            id: Ulid::new(),
            business_id: b.id,
            date: d(MONDAY),
            label: Some("Whit Monday".into()),
        };
        let booked = [t("10:00")];
        let a = resolve(
            &DayPlan {
                holiday: Some(&holiday),
                booked: &booked,
                ..plan(&b, MONDAY, &rows)
            },
            &BusinessDefaults::STANDARD,
        );
        assert!(a.slots.is_empty());
        assert_eq!(a.closed_reason, Some(ClosedReason::Holiday));
        assert_eq!(a.holiday_label.as_deref(), Some("Whit Monday"));
    }

    #[test]
    fn closed_weekday_row() {
        let b = business(30);
        let rows = [WeeklyHours {
            is_closed: true,
            ..hours(1, "09:00", "17:00")
        }];
        let a = resolve(&plan(&b, MONDAY, &rows), &BusinessDefaults::STANDARD);
        assert!(a.slots.is_empty());
        assert_eq!(a.closed_reason, Some(ClosedReason::WeeklyClosed));
    }

    #[test]
    fn sunday_closed_by_default() {
        let b = business(30);
        let a = resolve(&plan(&b, SUNDAY, &[]), &BusinessDefaults::STANDARD);
        assert_eq!(a.closed_reason, Some(ClosedReason::WeeklyClosed));

        // An explicit Sunday row opens it.
        let rows = [hours(0, "10:00", "12:00")];
        let a = resolve(&plan(&b, SUNDAY, &rows), &BusinessDefaults::STANDARD);
        assert_eq!(render(&a), vec!["10:00", "10:30", "11:00", "11:30"]);
    }

    #[test]
    fn inverted_hours_treated_as_closed() {
        let b = business(30);
        let rows = [hours(1, "18:00", "09:00")];
        let a = resolve(&plan(&b, MONDAY, &rows), &BusinessDefaults::STANDARD);
        assert_eq!(a.closed_reason, Some(ClosedReason::WeeklyClosed));

        let rows = [hours(1, "12:00", "12:00")];
        let a = resolve(&plan(&b, MONDAY, &rows), &BusinessDefaults::STANDARD);
        assert_eq!(a.closed_reason, Some(ClosedReason::WeeklyClosed));
    }

    #[test]
    fn defaults_fill_missing_configuration() {
        let b = Business::new(Ulid::new());
        let a = resolve(&plan(&b, MONDAY, &[]), &BusinessDefaults::STANDARD);
        assert_eq!(a.slots.len(), 18);
        assert_eq!(a.slots.first(), Some(&t("09:00")));
        assert_eq!(a.slots.last(), Some(&t("17:30")));

        let b = Business {
            open_time: Some(t("08:00")),
            close_time: Some(t("10:00")),
            slot_duration: Some(60),
            ..Business::new(Ulid::new())
        };
        let a = resolve(&plan(&b, MONDAY, &[]), &BusinessDefaults::STANDARD);
        assert_eq!(render(&a), vec!["08:00", "09:00"]);
    }

    #[test]
    fn injected_defaults_are_honored() {
        let defaults = BusinessDefaults {
            open_time: t("07:00"),
            close_time: t("08:00"),
            slot_duration: 20,
            closed_days: [false, true, false, false, false, false, false],
        };
        let b = Business::new(Ulid::new());
        let a = resolve(&plan(&b, SUNDAY, &[]), &defaults);
        assert_eq!(render(&a), vec!["07:00", "07:20", "07:40"]);
        let a = resolve(&plan(&b, MONDAY, &[]), &defaults);
        assert!(a.is_closed());
    }

    #[test]
    fn break_excludes_only_covered_slots() {
        let b = business(30);
        let rows = [hours(1, "09:00", "12:00")];
        let breaks = [
            break_on(b.id, 1, "10:00", "10:30"),
            break_on(b.id, 2, "09:00", "12:00"),
        ];
        let a = resolve(
            &DayPlan {
                breaks: &breaks,
                ..plan(&b, MONDAY, &rows)
            },
            &BusinessDefaults::STANDARD,
        );
        assert_eq!(render(&a), vec!["09:00", "09:30", "10:30", "11:00", "11:30"]);
    }

    #[test]
    fn booked_time_excluded_alone() {
        let b = business(60);
        let rows = [hours(1, "09:00", "17:00")];
        let booked = [t("11:00")];
        let a = resolve(
            &DayPlan {
                booked: &booked,
                ..plan(&b, MONDAY, &rows)
            },
            &BusinessDefaults::STANDARD,
        );
        assert_eq!(
            render(&a),
            vec!["09:00", "10:00", "12:00", "13:00", "14:00", "15:00", "16:00"]
        );
    }

    #[test]
    fn blocked_ranges_apply_on_their_date_only() {
        let b = business(30);
        let rows = [hours(1, "09:00", "12:00")];
        let blocked = [
            blocked_on(b.id, MONDAY, "09:00", "10:00"),
            blocked_on(b.id, "2024-06-17", "11:00", "12:00"),
        ];
        let a = resolve(
            &DayPlan {
                blocked: &blocked,
                ..plan(&b, MONDAY, &rows)
            },
            &BusinessDefaults::STANDARD,
        );
        assert_eq!(render(&a), vec!["10:00", "10:30", "11:00", "11:30"]);
    }

    #[test]
    fn misaligned_window_removes_grid_slots_inside_it() {
        let b = business(30);
        let rows = [hours(1, "09:00", "12:00")];
        let blocked = [blocked_on(b.id, MONDAY, "10:15", "11:15")];
        let a = resolve(
            &DayPlan {
                blocked: &blocked,
                ..plan(&b, MONDAY, &rows)
            },
            &BusinessDefaults::STANDARD,
        );
        assert_eq!(render(&a), vec!["09:00", "09:30", "10:00", "11:30"]);
    }

    #[test]
    fn never_emits_at_or_after_close_and_stays_ordered() {
        let b = business(45);
        let rows = [hours(1, "09:00", "18:00")];
        let breaks = [break_on(b.id, 1, "12:00", "13:00")];
        let booked = [t("09:45"), t("15:00")];
        let a = resolve(
            &DayPlan {
                breaks: &breaks,
                booked: &booked,
                ..plan(&b, MONDAY, &rows)
            },
            &BusinessDefaults::STANDARD,
        );
        for s in &a.slots {
            assert!(*s >= t("09:00") && *s < t("18:00"));
            assert!(!(t("12:00") <= *s && *s < t("13:00")));
            assert!(!booked.contains(s));
        }
        assert!(a.slots.windows(2).all(|p| p[0] < p[1]));
    }

    #[test]
    fn state_resolution_counts_only_active_bookings() {
        let b = business(60);
        let mut state = BusinessState::new(b.clone());
        state.replace_weekly_hours(&[hours(1, "09:00", "12:00")]);
        state.insert_booking(booking(b.id, MONDAY, "09:00", None, BookingStatus::Cancelled));
        state.insert_booking(booking(b.id, MONDAY, "10:00", None, BookingStatus::Pending));
        state.insert_booking(booking(b.id, MONDAY, "11:00", None, BookingStatus::Completed));

        let a = resolve_state(&state, d(MONDAY), None, &BusinessDefaults::STANDARD);
        assert_eq!(render(&a), vec!["09:00", "11:00"]);
    }

    #[test]
    fn state_resolution_employee_filter() {
        let b = business(60);
        let alice = Ulid::new();
        let bob = Ulid::new();
        let mut state = BusinessState::new(b.clone());
        state.replace_weekly_hours(&[hours(1, "09:00", "12:00")]);
        state.insert_booking(booking(b.id, MONDAY, "09:00", Some(alice), BookingStatus::Confirmed));
        state.insert_booking(booking(b.id, MONDAY, "10:00", None, BookingStatus::Pending));

        let defaults = BusinessDefaults::STANDARD;
        let for_bob = resolve_state(&state, d(MONDAY), Some(bob), &defaults);
        assert_eq!(render(&for_bob), vec!["09:00", "11:00"]);
        let for_alice = resolve_state(&state, d(MONDAY), Some(alice), &defaults);
        assert_eq!(render(&for_alice), vec!["11:00"]);
        let business_wide = resolve_state(&state, d(MONDAY), None, &defaults);
        assert_eq!(render(&business_wide), vec!["11:00"]);
    }

    // ── Store-backed resolution ──────────────────────────────

    /// Fixed-data store that counts every storage access.
    struct FixtureStore {
        state: BusinessState,
        reads: AtomicUsize,
    }

    impl FixtureStore {
        fn new(state: BusinessState) -> Self {
            Self {
                state,
                reads: AtomicUsize::new(0),
            }
        }

        fn touch(&self, business_id: Ulid) -> Result<(), EngineError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if business_id == self.state.id() {
                Ok(())
            } else {
                Err(EngineError::NotFound(business_id))
            }
        }
    }

    #[async_trait]
    impl ScheduleStore for FixtureStore {
        async fn business(&self, business_id: Ulid) -> Result<Business, EngineError> {
            self.touch(business_id)?;
            Ok(self.state.business.clone())
        }

        async fn weekly_hours(&self, business_id: Ulid) -> Result<Vec<WeeklyHours>, EngineError> {
            self.touch(business_id)?;
            Ok(self.state.weekly_hours.iter().flatten().copied().collect())
        }

        async fn breaks(&self, business_id: Ulid) -> Result<Vec<BreakWindow>, EngineError> {
            self.touch(business_id)?;
            Ok(self.state.breaks.clone())
        }

        async fn holidays(
            &self,
            business_id: Ulid,
            dates: RangeInclusive<NaiveDate>,
        ) -> Result<Vec<Holiday>, EngineError> {
            self.touch(business_id)?;
            Ok(self.state.holidays.range(dates).map(|(_, h)| h.clone()).collect())
        }
    }

    #[async_trait]
    impl CommitmentLedger for FixtureStore {
        async fn active_booking_times(
            &self,
            business_id: Ulid,
            date: NaiveDate,
            employee_id: Option<Ulid>,
        ) -> Result<Vec<TimeOfDay>, EngineError> {
            self.touch(business_id)?;
            Ok(self
                .state
                .bookings_on(date)
                .iter()
                .filter(|b| b.occupies_for(employee_id))
                .map(|b| b.time)
                .collect())
        }

        async fn blocked_ranges(&self, business_id: Ulid, date: NaiveDate) -> Result<Vec<BlockedSlot>, EngineError> {
            self.touch(business_id)?;
            Ok(self.state.blocked_on(date).to_vec())
        }

        async fn insert_booking_if_free(&self, _booking: Booking) -> Result<Booking, EngineError> {
            unreachable!("read-only fixture")
        }
    }

    fn fixture() -> FixtureStore {
        let b = business(30);
        let mut state = BusinessState::new(b.clone());
        state.replace_weekly_hours(&[hours(1, "09:00", "12:00")]);
        state.insert_break(break_on(b.id, 1, "10:00", "10:30"));
        state.insert_booking(booking(b.id, MONDAY, "11:00", None, BookingStatus::Confirmed));
        FixtureStore::new(state)
    }

    #[tokio::test]
    async fn store_backed_matches_pure_resolution() {
        let store = fixture();
        let id = store.state.id();
        let defaults = BusinessDefaults::STANDARD;
        let a = resolve_available_slots(&store, &defaults, id, MONDAY, None)
            .await
            .unwrap();
        assert_eq!(render(&a), vec!["09:00", "09:30", "10:30", "11:30"]);
        assert_eq!(a, resolve_state(&store.state, d(MONDAY), None, &defaults));
    }

    #[tokio::test]
    async fn malformed_date_rejected_before_storage() {
        let store = fixture();
        let id = store.state.id();
        for bad in ["2024-6-10", "2024-02-30", "tomorrow", ""] {
            let err = resolve_available_slots(&store, &BusinessDefaults::STANDARD, id, bad, None)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_INPUT");
        }
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn closed_day_skips_ledger_reads() {
        let store = fixture();
        let id = store.state.id();
        let a = resolve_available_slots(&store, &BusinessDefaults::STANDARD, id, SUNDAY, None)
            .await
            .unwrap();
        assert_eq!(a.closed_reason, Some(ClosedReason::WeeklyClosed));
        // business, holidays, weekly hours
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_business_is_not_found() {
        let store = fixture();
        let err = resolve_available_slots(&store, &BusinessDefaults::STANDARD, Ulid::new(), MONDAY, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
