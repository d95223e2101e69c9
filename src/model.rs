use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

// ── Time arithmetic ──────────────────────────────────────────────

/// Time of day at minute resolution, `00:00` through `23:59`.
///
/// Displayed and serialized as `"HH:MM"`. Arithmetic never wraps past
/// midnight: [`TimeOfDay::checked_add`] returns `None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub const fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self(hour * 60 + minute))
        } else {
            None
        }
    }

    pub const fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes < MINUTES_PER_DAY {
            Some(Self(minutes))
        } else {
            None
        }
    }

    /// Minutes since midnight.
    pub const fn minutes(self) -> u16 {
        self.0
    }

    pub const fn hour(self) -> u16 {
        self.0 / 60
    }

    pub const fn minute(self) -> u16 {
        self.0 % 60
    }

    /// Advance by `minutes`, carrying into the hour. `None` past 23:59.
    pub fn checked_add(self, minutes: u16) -> Option<Self> {
        self.0.checked_add(minutes).and_then(Self::from_minutes)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day {0:?}, expected HH:MM")]
pub struct TimeParseError(pub String);

fn two_digits(s: &str) -> Option<u16> {
    if s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    /// Accepts `HH:MM`, and `HH:MM:00` as rendered by SQL `TIME` columns.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TimeParseError(s.to_string());
        let mut parts = s.trim().split(':');
        let hour = parts.next().and_then(two_digits).ok_or_else(err)?;
        let minute = parts.next().and_then(two_digits).ok_or_else(err)?;
        if let Some(seconds) = parts.next()
            && two_digits(seconds) != Some(0)
        {
            return Err(err());
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date {0:?}, expected YYYY-MM-DD")]
pub struct DateParseError(pub String);

/// Strict `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, DateParseError> {
    let s = s.trim();
    if s.len() != 10 {
        return Err(DateParseError(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| DateParseError(s.to_string()))
}

/// Day of week with Sunday = 0.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Half-open time-of-day window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Window {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: TimeOfDay, end: TimeOfDay) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Schedule configuration ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: Ulid,
    pub name: Option<String>,
    /// Slot granularity in minutes; `None` falls back to [`BusinessDefaults`].
    pub slot_duration: Option<u16>,
    /// Business-level hours used for weekdays without a [`WeeklyHours`] row.
    pub open_time: Option<TimeOfDay>,
    pub close_time: Option<TimeOfDay>,
}

impl Business {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            name: None,
            slot_duration: None,
            open_time: None,
            close_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyHours {
    /// Sunday = 0.
    pub day_of_week: u8,
    pub open_time: TimeOfDay,
    pub close_time: TimeOfDay,
    pub is_closed: bool,
}

/// Recurring weekly break, e.g. lunch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakWindow {
    pub id: Ulid,
    pub business_id: Ulid,
    pub day_of_week: u8,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub label: Option<String>,
}

impl BreakWindow {
    pub fn window(&self) -> Option<Window> {
        Window::try_new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
    pub id: Ulid,
    pub business_id: Ulid,
    pub date: NaiveDate,
    pub label: Option<String>,
}

/// One-off unavailable range on a specific date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedSlot {
    pub id: Ulid,
    pub business_id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub reason: Option<String>,
}

impl BlockedSlot {
    pub fn window(&self) -> Option<Window> {
        Window::try_new(self.start_time, self.end_time)
    }
}

/// Fallbacks applied when a business has no explicit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessDefaults {
    pub open_time: TimeOfDay,
    pub close_time: TimeOfDay,
    pub slot_duration: u16,
    /// Indexed by day of week (Sunday = 0).
    pub closed_days: [bool; 7],
}

impl BusinessDefaults {
    pub const STANDARD: BusinessDefaults = BusinessDefaults {
        open_time: TimeOfDay(9 * 60),
        close_time: TimeOfDay(18 * 60),
        slot_duration: 30,
        closed_days: [true, false, false, false, false, false, false],
    };
}

impl Default for BusinessDefaults {
    fn default() -> Self {
        Self::STANDARD
    }
}

// ── Commitments ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings occupy their slot.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Whether two employee assignments compete for the same slot.
///
/// An unassigned booking ("any employee") competes with every booking at that
/// time; two assigned bookings compete only for the same employee.
pub fn employees_overlap(a: Option<Ulid>, b: Option<Ulid>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub business_id: Ulid,
    pub employee_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl Booking {
    /// True if this booking holds its slot against `employee`
    /// (`None` = the business-wide view).
    pub fn occupies_for(&self, employee: Option<Ulid>) -> bool {
        self.status.is_active() && employees_overlap(self.employee_id, employee)
    }
}

/// A proposed booking as submitted by a client, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub id: Ulid,
    pub user_id: Ulid,
    pub business_id: Ulid,
    pub date: String,
    pub time: String,
    pub employee_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
}

impl BookingRequest {
    pub fn new(user_id: Ulid, business_id: Ulid, date: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            user_id,
            business_id,
            date: date.into(),
            time: time.into(),
            employee_id: None,
            service_id: None,
        }
    }

    pub fn with_employee(mut self, employee_id: Ulid) -> Self {
        self.employee_id = Some(employee_id);
        self
    }

    pub fn with_service(mut self, service_id: Ulid) -> Self {
        self.service_id = Some(service_id);
        self
    }
}

// ── Per-business state ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BusinessState {
    pub business: Business,
    /// Indexed by day of week (Sunday = 0).
    pub weekly_hours: [Option<WeeklyHours>; 7],
    /// Sorted by `(day_of_week, start_time)`.
    pub breaks: Vec<BreakWindow>,
    pub holidays: BTreeMap<NaiveDate, Holiday>,
    /// Sorted by `(date, start_time)`.
    pub blocked: Vec<BlockedSlot>,
    /// Bookings of every status, sorted by `(date, time)`.
    pub bookings: Vec<Booking>,
}

impl BusinessState {
    pub fn new(business: Business) -> Self {
        Self {
            business,
            weekly_hours: [None; 7],
            breaks: Vec::new(),
            holidays: BTreeMap::new(),
            blocked: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.business.id
    }

    /// Replace-all semantics: weekdays absent from `hours` revert to defaults.
    pub fn replace_weekly_hours(&mut self, hours: &[WeeklyHours]) {
        self.weekly_hours = [None; 7];
        for row in hours {
            if let Some(slot) = self.weekly_hours.get_mut(row.day_of_week as usize) {
                *slot = Some(*row);
            }
        }
    }

    pub fn insert_break(&mut self, window: BreakWindow) {
        let key = (window.day_of_week, window.start_time);
        let pos = self
            .breaks
            .partition_point(|b| (b.day_of_week, b.start_time) <= key);
        self.breaks.insert(pos, window);
    }

    pub fn remove_break(&mut self, id: Ulid) -> Option<BreakWindow> {
        let pos = self.breaks.iter().position(|b| b.id == id)?;
        Some(self.breaks.remove(pos))
    }

    pub fn insert_holiday(&mut self, holiday: Holiday) {
        self.holidays.insert(holiday.date, holiday);
    }

    pub fn remove_holiday(&mut self, id: Ulid) -> Option<Holiday> {
        let date = self.holidays.values().find(|h| h.id == id)?.date;
        self.holidays.remove(&date)
    }

    pub fn holiday_on(&self, date: NaiveDate) -> Option<&Holiday> {
        self.holidays.get(&date)
    }

    pub fn insert_blocked(&mut self, blocked: BlockedSlot) {
        let key = (blocked.date, blocked.start_time);
        let pos = self
            .blocked
            .partition_point(|b| (b.date, b.start_time) <= key);
        self.blocked.insert(pos, blocked);
    }

    pub fn remove_blocked(&mut self, id: Ulid) -> Option<BlockedSlot> {
        let pos = self.blocked.iter().position(|b| b.id == id)?;
        Some(self.blocked.remove(pos))
    }

    pub fn blocked_on(&self, date: NaiveDate) -> &[BlockedSlot] {
        let lo = self.blocked.partition_point(|b| b.date < date);
        let hi = self.blocked.partition_point(|b| b.date <= date);
        &self.blocked[lo..hi]
    }

    /// Insert maintaining `(date, time)` order; equal keys keep arrival order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.time);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.time) <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn active_bookings_at(&self, date: NaiveDate, time: TimeOfDay) -> impl Iterator<Item = &Booking> {
        self.bookings_on(date)
            .iter()
            .filter(move |b| b.time == time && b.status.is_active())
    }
}

/// The event types, flat and unnested. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessCreated {
        business: Business,
    },
    BusinessUpdated {
        business: Business,
    },
    BusinessDeleted {
        id: Ulid,
    },
    WeeklyHoursReplaced {
        business_id: Ulid,
        hours: Vec<WeeklyHours>,
    },
    BreakAdded {
        window: BreakWindow,
    },
    BreakRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    HolidayAdded {
        holiday: Holiday,
    },
    HolidayRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    SlotBlocked {
        blocked: BlockedSlot,
    },
    SlotUnblocked {
        id: Ulid,
        business_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        business_id: Ulid,
        status: BookingStatus,
    },
}

impl Event {
    pub fn business_id(&self) -> Ulid {
        match self {
            Event::BusinessCreated { business } | Event::BusinessUpdated { business } => business.id,
            Event::BusinessDeleted { id } => *id,
            Event::WeeklyHoursReplaced { business_id, .. }
            | Event::BreakRemoved { business_id, .. }
            | Event::HolidayRemoved { business_id, .. }
            | Event::SlotUnblocked { business_id, .. }
            | Event::BookingStatusChanged { business_id, .. } => *business_id,
            Event::BreakAdded { window } => window.business_id,
            Event::HolidayAdded { holiday } => holiday.business_id,
            Event::SlotBlocked { blocked } => blocked.business_id,
            Event::BookingCreated { booking } => booking.business_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClosedReason {
    Holiday,
    WeeklyClosed,
}

impl ClosedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ClosedReason::Holiday => "holiday",
            ClosedReason::WeeklyClosed => "weekly-closed",
        }
    }
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub business_id: Ulid,
    pub date: NaiveDate,
    pub slots: Vec<TimeOfDay>,
    pub closed_reason: Option<ClosedReason>,
    pub holiday_label: Option<String>,
}

impl Availability {
    pub fn closed(business_id: Ulid, date: NaiveDate, reason: ClosedReason, holiday_label: Option<String>) -> Self {
        Self {
            business_id,
            date,
            slots: Vec::new(),
            closed_reason: Some(reason),
            holiday_label,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_reason.is_some()
    }

    pub fn contains(&self, time: TimeOfDay) -> bool {
        self.slots.binary_search(&time).is_ok()
    }
}
