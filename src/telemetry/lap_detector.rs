use std::time::Instant;

use log::debug;

/// A completed lap, detected from the polled "last lap time" value.
#[derive(Clone, Copy, Debug)]
pub struct LapEvent {
    pub lap_time_s: f32,
    pub detected_at: Instant,
}

/// Turns the continuously sampled last-lap-time value into discrete lap events.
///
/// An event fires when the value is positive and differs from the value that
/// fired the previous event, so re-reading an unchanged value never fires twice.
#[derive(Clone, Debug, Default)]
pub struct LapEventDetector {
    last_recorded_lap_time: Option<f32>,
    last_lap_counter: Option<i32>,
}

impl LapEventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the raw lap-completed counter. Returns true when the counter went
    /// backwards (session restart), in which case the guard has been cleared and
    /// any derived windows should be reset by the caller.
    pub fn check_restart(&mut self, lap_counter: Option<i32>) -> bool {
        let Some(counter) = lap_counter else {
            return false;
        };
        let restarted = matches!(self.last_lap_counter, Some(previous) if counter < previous);
        self.last_lap_counter = Some(counter);
        if restarted {
            debug!("Lap counter went backwards to {counter}, resetting lap guard");
            self.last_recorded_lap_time = None;
        }
        restarted
    }

    pub fn observe(&mut self, last_lap_time_s: Option<f32>) -> Option<LapEvent> {
        let lap_time_s = last_lap_time_s.filter(|t| *t > 0.)?;
        if self.last_recorded_lap_time == Some(lap_time_s) {
            return None;
        }
        self.last_recorded_lap_time = Some(lap_time_s);
        Some(LapEvent {
            lap_time_s,
            detected_at: Instant::now(),
        })
    }

    /// Replace the guard with the value re-read after the settle delay so a
    /// late-published lap time does not fire a second event on the next tick.
    pub fn settle(&mut self, event: LapEvent, settled_lap_time_s: Option<f32>) -> LapEvent {
        match settled_lap_time_s.filter(|t| *t > 0.) {
            Some(lap_time_s) => {
                self.last_recorded_lap_time = Some(lap_time_s);
                LapEvent {
                    lap_time_s,
                    ..event
                }
            }
            None => event,
        }
    }

    /// Forget everything, e.g. when a new session starts.
    pub fn reset(&mut self) {
        self.last_recorded_lap_time = None;
        self.last_lap_counter = None;
    }
}

/// Lazy lap events over a finite sequence of sampled last-lap-time values.
pub struct LapEvents<I> {
    values: I,
    detector: LapEventDetector,
}

impl<I: Iterator<Item = f32>> Iterator for LapEvents<I> {
    type Item = LapEvent;

    fn next(&mut self) -> Option<Self::Item> {
        for value in self.values.by_ref() {
            if let Some(event) = self.detector.observe(Some(value)) {
                return Some(event);
            }
        }
        None
    }
}

pub fn lap_events<I: IntoIterator<Item = f32>>(values: I) -> LapEvents<I::IntoIter> {
    LapEvents {
        values: values.into_iter(),
        detector: LapEventDetector::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unchanged_value_does_not_refire() {
        let mut detector = LapEventDetector::new();
        assert!(detector.observe(Some(95.2)).is_some());
        assert!(detector.observe(Some(95.2)).is_none());
        assert!(detector.observe(Some(95.2)).is_none());
        assert!(detector.observe(Some(94.8)).is_some());
    }

    #[test]
    fn test_invalid_values_ignored() {
        let mut detector = LapEventDetector::new();
        assert!(detector.observe(None).is_none());
        assert!(detector.observe(Some(-1.)).is_none());
        assert!(detector.observe(Some(0.)).is_none());
    }

    #[test]
    fn test_invalid_value_does_not_clear_guard() {
        let mut detector = LapEventDetector::new();
        assert!(detector.observe(Some(95.2)).is_some());
        assert!(detector.observe(Some(-1.)).is_none());
        assert!(detector.observe(Some(95.2)).is_none());
    }

    #[test]
    fn test_identical_consecutive_lap_times_are_one_event() {
        let times: Vec<f32> = lap_events(vec![90., 90., 91., 91., 90.])
            .map(|e| e.lap_time_s)
            .collect();
        assert_eq!(times, vec![90., 91., 90.]);
    }

    #[test]
    fn test_restart_clears_guard() {
        let mut detector = LapEventDetector::new();
        assert!(!detector.check_restart(Some(4)));
        assert!(detector.observe(Some(95.2)).is_some());
        assert!(!detector.check_restart(Some(5)));
        assert!(detector.check_restart(Some(0)));
        assert!(detector.observe(Some(95.2)).is_some());
    }

    #[test]
    fn test_settle_moves_guard_to_settled_value() {
        let mut detector = LapEventDetector::new();
        let event = detector.observe(Some(95.2)).unwrap();
        let settled = detector.settle(event, Some(95.3));
        assert_eq!(settled.lap_time_s, 95.3);
        assert!(detector.observe(Some(95.3)).is_none());

        let event = detector.observe(Some(96.0)).unwrap();
        let settled = detector.settle(event, Some(-1.));
        assert_eq!(settled.lap_time_s, 96.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_fires_iff_positive_and_changed(values in prop::collection::vec(prop::sample::select(vec![-1f32, 0., 88.5, 89.1, 90.0]), 0..100)) {
            let mut detector = LapEventDetector::new();
            let mut accepted: Option<f32> = None;
            for value in values {
                let fired = detector.observe(Some(value)).is_some();
                let expected = value > 0. && accepted != Some(value);
                prop_assert_eq!(fired, expected);
                if expected {
                    accepted = Some(value);
                }
            }
        }

        #[test]
        fn prop_rereads_never_double_fire(value in 1f32..300., repeats in 1usize..50) {
            let events = lap_events(std::iter::repeat_n(value, repeats)).count();
            prop_assert_eq!(events, 1);
        }
    }
}
