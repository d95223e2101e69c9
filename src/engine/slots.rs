use std::iter::FusedIterator;
use std::ops::Range;

use crate::model::{TimeOfDay, Window};

// ── Slot Generator ────────────────────────────────────────────────

/// Candidate slot starts `open, open + step, ...` while the start is `< close`.
///
/// Only the slot *start* is bounded by `close`; the last slot may end after
/// closing time. Stops at 23:59 rather than wrapping into the next day.
/// Restartable by cloning.
#[derive(Debug, Clone)]
pub struct CandidateSlots {
    next: Option<TimeOfDay>,
    close: TimeOfDay,
    step: u16,
}

pub fn generate_candidate_slots(open: TimeOfDay, close: TimeOfDay, slot_duration: u16) -> CandidateSlots {
    CandidateSlots {
        next: (slot_duration > 0).then_some(open),
        close,
        step: slot_duration,
    }
}

impl Iterator for CandidateSlots {
    type Item = TimeOfDay;

    fn next(&mut self) -> Option<TimeOfDay> {
        let current = self.next.filter(|t| *t < self.close)?;
        self.next = current.checked_add(self.step);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            Some(t) if t < self.close => {
                let n = (self.close.minutes() - t.minutes()).div_ceil(self.step) as usize;
                (n.min(1), Some(n))
            }
            _ => (0, Some(0)),
        }
    }
}

impl FusedIterator for CandidateSlots {}

/// Index range of the sorted `candidates` whose start falls inside `window`.
pub fn covered_range(candidates: &[TimeOfDay], window: &Window) -> Range<usize> {
    let lo = candidates.partition_point(|t| *t < window.start);
    let hi = candidates.partition_point(|t| *t < window.end);
    lo..hi
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn render(slots: impl Iterator<Item = TimeOfDay>) -> Vec<String> {
        slots.map(|s| s.to_string()).collect()
    }

    #[test]
    fn one_hour_half_hour_slots() {
        let slots = generate_candidate_slots(t("09:00"), t("10:00"), 30);
        assert_eq!(render(slots), vec!["09:00", "09:30"]);
    }

    #[test]
    fn hourly_business_day() {
        let slots = generate_candidate_slots(t("09:00"), t("17:00"), 60);
        assert_eq!(
            render(slots),
            vec!["09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00"]
        );
    }

    #[test]
    fn uneven_duration_last_slot_runs_past_close() {
        // 17:45 starts before 18:00 and is emitted even though it ends at 18:30.
        let slots = generate_candidate_slots(t("17:00"), t("18:00"), 45);
        assert_eq!(render(slots), vec!["17:00", "17:45"]);
    }

    #[test]
    fn minute_overflow_carries_into_hour() {
        let slots = generate_candidate_slots(t("09:50"), t("10:30"), 20);
        assert_eq!(render(slots), vec!["09:50", "10:10"]);
    }

    #[test]
    fn never_wraps_past_midnight() {
        let slots = generate_candidate_slots(t("23:00"), t("23:59"), 45);
        assert_eq!(render(slots), vec!["23:00", "23:45"]);
        let slots = generate_candidate_slots(t("22:00"), t("23:59"), 120);
        assert_eq!(render(slots), vec!["22:00"]);
    }

    #[test]
    fn empty_when_open_not_before_close() {
        assert_eq!(generate_candidate_slots(t("10:00"), t("10:00"), 30).count(), 0);
        assert_eq!(generate_candidate_slots(t("11:00"), t("10:00"), 30).count(), 0);
    }

    #[test]
    fn zero_duration_yields_nothing() {
        assert_eq!(generate_candidate_slots(t("09:00"), t("18:00"), 0).count(), 0);
    }

    #[test]
    fn restartable_by_clone() {
        let slots = generate_candidate_slots(t("09:00"), t("12:00"), 30);
        let first: Vec<_> = slots.clone().collect();
        let second: Vec<_> = slots.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn bounds_and_strict_order_across_grid() {
        let opens = ["00:00", "06:15", "09:00", "13:07"];
        let closes = ["09:30", "18:00", "23:59"];
        for open in opens {
            for close in closes {
                for step in [1u16, 7, 15, 30, 45, 60, 90, 240] {
                    let (open, close) = (t(open), t(close));
                    let slots: Vec<_> = generate_candidate_slots(open, close, step).collect();
                    let (lower, upper) = generate_candidate_slots(open, close, step).size_hint();
                    assert!(lower <= slots.len() && Some(slots.len()) <= upper);
                    for s in &slots {
                        assert!(open <= *s && *s < close);
                    }
                    for pair in slots.windows(2) {
                        assert!(pair[0] < pair[1]);
                        assert_eq!(pair[1].minutes() - pair[0].minutes(), step);
                    }
                }
            }
        }
    }

    #[test]
    fn covered_range_aligned_and_misaligned() {
        let candidates: Vec<_> = generate_candidate_slots(t("09:00"), t("12:00"), 30).collect();

        let aligned = covered_range(&candidates, &Window::new(t("10:00"), t("10:30")));
        assert_eq!(render(candidates[aligned].iter().copied()), vec!["10:00"]);

        let misaligned = covered_range(&candidates, &Window::new(t("10:15"), t("11:15")));
        assert_eq!(render(candidates[misaligned].iter().copied()), vec!["10:30", "11:00"]);

        let outside = covered_range(&candidates, &Window::new(t("12:00"), t("13:00")));
        assert!(outside.is_empty());
    }
}
