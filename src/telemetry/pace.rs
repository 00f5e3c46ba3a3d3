use log::debug;
use simple_moving_average::{SMA, SumTreeSMA};

use super::round3;

/// Number of laps in the moving averages.
pub const WINDOW_SIZE: usize = 3;
/// A single-lap burn at or above this is a swap or refuel artifact.
pub const MAX_PLAUSIBLE_CONSUMPTION_L: f32 = 20.;
/// Fuel at or below this is read while a teammate drives remotely and is not usable.
pub const MIN_READABLE_FUEL_L: f32 = 0.1;
/// Upper bound for a session-laps-remaining counter to count as finite.
pub const MAX_FINITE_LAPS_REMAIN: i32 = 10_000;

/// How the fuel reading of a lap was interpreted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FuelDelta {
    /// A plausible burn, entered into the consumption window
    Accepted(f32),
    /// Fuel went up since the previous lap
    Refuel,
    /// No baseline, unreadable fuel, zero or implausible burn
    Rejected,
}

impl FuelDelta {
    pub fn consumption(&self) -> f32 {
        match self {
            Self::Accepted(liters) => *liters,
            Self::Refuel | Self::Rejected => 0.,
        }
    }
}

pub fn fuel_delta(fuel_at_previous_lap: Option<f32>, fuel_now: f32) -> FuelDelta {
    let Some(previous) = fuel_at_previous_lap else {
        return FuelDelta::Rejected;
    };
    if fuel_now <= MIN_READABLE_FUEL_L {
        return FuelDelta::Rejected;
    }
    if fuel_now > previous {
        return FuelDelta::Refuel;
    }
    let burned = round3(previous - fuel_now);
    if burned > 0. && burned < MAX_PLAUSIBLE_CONSUMPTION_L {
        FuelDelta::Accepted(burned)
    } else {
        FuelDelta::Rejected
    }
}

/// Derived pace and fuel figures for one lap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaceSnapshot {
    pub avg_lap_time_s: f32,
    pub fuel_used_l: f32,
    pub avg_fuel_used_l: f32,
    pub fuel_autonomy_laps: f32,
}

/// Moving averages of lap time and fuel consumption over the last
/// [`WINDOW_SIZE`] laps. Early in a session the averages cover however many
/// laps are available.
pub struct PaceEstimator {
    lap_times: SumTreeSMA<f32, f32, WINDOW_SIZE>,
    consumption: SumTreeSMA<f32, f32, WINDOW_SIZE>,
    fuel_at_last_lap: Option<f32>,
}

impl Default for PaceEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PaceEstimator {
    pub fn new() -> Self {
        Self {
            lap_times: SumTreeSMA::new(),
            consumption: SumTreeSMA::new(),
            fuel_at_last_lap: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Fuel the car starts the session with, so the first lap has a baseline.
    pub fn set_fuel_baseline(&mut self, fuel_l: f32) {
        self.fuel_at_last_lap = Some(fuel_l);
    }

    pub fn fuel_baseline(&self) -> Option<f32> {
        self.fuel_at_last_lap
    }

    pub fn record_lap(&mut self, lap_time_s: f32, fuel_now: f32) -> PaceSnapshot {
        self.lap_times.add_sample(lap_time_s);

        let delta = fuel_delta(self.fuel_at_last_lap, fuel_now);
        match delta {
            FuelDelta::Accepted(liters) => self.consumption.add_sample(liters),
            FuelDelta::Refuel => debug!(
                "Fuel went up from {:?} to {fuel_now}, lap not counted in consumption",
                self.fuel_at_last_lap
            ),
            FuelDelta::Rejected => debug!(
                "Fuel reading {fuel_now} against {:?} not usable for consumption",
                self.fuel_at_last_lap
            ),
        }
        if fuel_now > MIN_READABLE_FUEL_L {
            self.fuel_at_last_lap = Some(fuel_now);
        }

        let avg_fuel_used_l = self.avg_consumption();
        PaceSnapshot {
            avg_lap_time_s: round3(self.avg_lap_time()),
            fuel_used_l: round3(delta.consumption()),
            avg_fuel_used_l: round3(avg_fuel_used_l),
            fuel_autonomy_laps: fuel_autonomy(fuel_now, avg_fuel_used_l),
        }
    }

    pub fn avg_lap_time(&self) -> f32 {
        average(&self.lap_times)
    }

    pub fn avg_consumption(&self) -> f32 {
        average(&self.consumption)
    }

    pub fn laps_in_window(&self) -> usize {
        self.lap_times.get_num_samples()
    }
}

fn average(window: &SumTreeSMA<f32, f32, WINDOW_SIZE>) -> f32 {
    if window.get_num_samples() == 0 {
        0.
    } else {
        window.get_average()
    }
}

/// Laps the current fuel lasts at the average consumption.
pub fn fuel_autonomy(fuel_now: f32, avg_consumption: f32) -> f32 {
    if avg_consumption > 0. {
        fuel_now / avg_consumption
    } else {
        0.
    }
}

/// Laps left in the session: the source's lap counter when it is finite,
/// otherwise the remaining time over the average lap.
pub fn laps_remaining(
    session_laps_remain: Option<i32>,
    session_time_remain_s: Option<f64>,
    avg_lap_time_s: f32,
) -> f32 {
    if let Some(laps) = session_laps_remain.filter(|l| *l > 0 && *l < MAX_FINITE_LAPS_REMAIN) {
        return laps as f32;
    }
    match session_time_remain_s {
        Some(time_remain) if time_remain > 0. && avg_lap_time_s > 0. => {
            ((time_remain / avg_lap_time_s as f64) * 10.).round() as f32 / 10.
        }
        _ => 0.,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_steady_stint_consumption_and_autonomy() {
        let mut estimator = PaceEstimator::new();
        estimator.set_fuel_baseline(20.);
        estimator.record_lap(90., 19.5);
        estimator.record_lap(91., 19.);
        let snapshot = estimator.record_lap(92., 18.5);

        assert_eq!(snapshot.fuel_used_l, 0.5);
        assert_eq!(snapshot.avg_fuel_used_l, 0.5);
        assert_eq!(snapshot.fuel_autonomy_laps, 37.);
        assert_eq!(snapshot.avg_lap_time_s, 91.);
    }

    #[test]
    fn test_average_over_available_laps() {
        let mut estimator = PaceEstimator::new();
        assert_eq!(estimator.avg_lap_time(), 0.);
        assert_eq!(estimator.record_lap(90., 10.).avg_lap_time_s, 90.);
        assert_eq!(estimator.record_lap(92., 9.).avg_lap_time_s, 91.);
        estimator.record_lap(94., 8.);
        // window is full, 90 drops out
        assert_eq!(estimator.record_lap(96., 7.).avg_lap_time_s, 94.);
        assert_eq!(estimator.laps_in_window(), WINDOW_SIZE);
    }

    #[test]
    fn test_refuel_excluded_from_window() {
        let mut estimator = PaceEstimator::new();
        estimator.set_fuel_baseline(6.);
        estimator.record_lap(90., 5.);
        let snapshot = estimator.record_lap(120., 20.);
        assert_eq!(snapshot.fuel_used_l, 0.);
        assert_eq!(snapshot.avg_fuel_used_l, 1.);
    }

    #[test]
    fn test_unreadable_fuel_keeps_baseline() {
        let mut estimator = PaceEstimator::new();
        estimator.set_fuel_baseline(20.);
        let snapshot = estimator.record_lap(90., 0.);
        assert_eq!(snapshot.fuel_used_l, 0.);
        assert_eq!(estimator.fuel_baseline(), Some(20.));
        assert_eq!(estimator.record_lap(90., 19.).fuel_used_l, 1.);
    }

    #[test]
    fn test_first_lap_without_baseline_has_no_consumption() {
        let mut estimator = PaceEstimator::new();
        let snapshot = estimator.record_lap(90., 19.);
        assert_eq!(snapshot.fuel_used_l, 0.);
        assert_eq!(snapshot.avg_fuel_used_l, 0.);
        assert_eq!(snapshot.fuel_autonomy_laps, 0.);
    }

    #[test]
    fn test_fuel_delta_classification() {
        assert_eq!(fuel_delta(None, 10.), FuelDelta::Rejected);
        assert_eq!(fuel_delta(Some(10.), 9.5), FuelDelta::Accepted(0.5));
        assert_eq!(fuel_delta(Some(5.), 20.), FuelDelta::Refuel);
        assert_eq!(fuel_delta(Some(60.), 35.), FuelDelta::Rejected);
        assert_eq!(fuel_delta(Some(10.), 0.), FuelDelta::Rejected);
        assert_eq!(fuel_delta(Some(10.), 10.), FuelDelta::Rejected);
    }

    #[test]
    fn test_laps_remaining_sources() {
        assert_eq!(laps_remaining(Some(12), Some(3600.), 90.), 12.);
        assert_eq!(laps_remaining(Some(32767), Some(900.), 90.), 10.);
        assert_eq!(laps_remaining(Some(32767), Some(1000.), 90.), 11.1);
        assert_eq!(laps_remaining(None, None, 90.), 0.);
        assert_eq!(laps_remaining(None, Some(1000.), 0.), 0.);
    }

    #[test]
    fn test_reset_clears_windows_and_baseline() {
        let mut estimator = PaceEstimator::new();
        estimator.set_fuel_baseline(20.);
        estimator.record_lap(90., 19.);
        estimator.reset();
        assert_eq!(estimator.laps_in_window(), 0);
        assert_eq!(estimator.avg_consumption(), 0.);
        assert_eq!(estimator.fuel_baseline(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_consumption_always_in_range(fuel in prop::collection::vec(0f32..120., 1..60)) {
            let mut estimator = PaceEstimator::new();
            for level in fuel {
                let snapshot = estimator.record_lap(90., level);
                prop_assert!(snapshot.fuel_used_l >= 0.);
                prop_assert!(snapshot.fuel_used_l < MAX_PLAUSIBLE_CONSUMPTION_L);
                prop_assert!(snapshot.avg_fuel_used_l >= 0.);
                prop_assert!(snapshot.avg_fuel_used_l < MAX_PLAUSIBLE_CONSUMPTION_L);
            }
        }

        #[test]
        fn prop_short_window_is_plain_mean(times in prop::collection::vec(60f32..200., 1..=WINDOW_SIZE)) {
            let mut estimator = PaceEstimator::new();
            for t in &times {
                estimator.record_lap(*t, 10.);
            }
            let mean = times.iter().sum::<f32>() / times.len() as f32;
            prop_assert!((estimator.avg_lap_time() - mean).abs() < 1e-3);
        }
    }
}
