use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::{DriverIdentity, LapRecord, pace::MIN_READABLE_FUEL_L, round3};

/// Fuel gain between two laps above which the car is considered refuelled.
pub const REFUEL_THRESHOLD_L: f32 = 0.5;

struct PreviousLap {
    driver: DriverIdentity,
    /// Last readable fuel level, carried over laps with an unreadable reading
    fuel_l: Option<f32>,
}

/// Assigns stint ids to consecutive laps. A new stint starts when the driver
/// changes or the car gained more than [`REFUEL_THRESHOLD_L`] since the
/// previous lap of the same session. Ids never go backwards, also across
/// sessions.
pub struct StintSegmenter {
    current_id: u32,
    previous: Option<PreviousLap>,
}

impl Default for StintSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl StintSegmenter {
    pub fn new() -> Self {
        Self {
            current_id: 0,
            previous: None,
        }
    }

    /// Forget the previous lap so the next lap opens a new stint.
    pub fn start_session(&mut self) {
        self.previous = None;
    }

    /// Stint id of a lap. Fuel readings at or below [`MIN_READABLE_FUEL_L`]
    /// are ignored for the refuel rule.
    pub fn assign(&mut self, driver: &DriverIdentity, fuel_now: f32) -> u32 {
        let readable = (fuel_now > MIN_READABLE_FUEL_L).then_some(fuel_now);
        let new_stint = match &self.previous {
            None => true,
            Some(previous) => {
                !previous.driver.same_driver(driver)
                    || matches!(
                        (previous.fuel_l, readable),
                        (Some(before), Some(now)) if now > before + REFUEL_THRESHOLD_L
                    )
            }
        };
        if new_stint {
            self.current_id += 1;
        }
        let fuel_l = match (readable, &self.previous) {
            (Some(fuel), _) => Some(fuel),
            (None, Some(previous)) if !new_stint => previous.fuel_l,
            (None, _) => None,
        };
        self.previous = Some(PreviousLap {
            driver: driver.clone(),
            fuel_l,
        });
        self.current_id
    }

    pub fn current_id(&self) -> u32 {
        self.current_id
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StintSummary {
    pub stint_id: u32,
    pub driver: String,
    pub laps: usize,
    pub best_lap_s: f32,
    pub avg_lap_s: f32,
    pub fuel_used_l: f32,
    pub first_lap: i32,
    pub last_lap: i32,
}

/// Anything that can be grouped into stints.
pub trait StintLap {
    fn driver(&self) -> &str;
    fn driver_id(&self) -> i64;
    fn lap(&self) -> i32;
    fn lap_time_s(&self) -> f32;
    /// Fuel in the car when the lap was recorded
    fn fuel(&self) -> f32;
    fn fuel_used_l(&self) -> f32;
}

impl StintLap for LapRecord {
    fn driver(&self) -> &str {
        &self.driver
    }
    fn driver_id(&self) -> i64 {
        self.driver_id
    }
    fn lap(&self) -> i32 {
        self.lap
    }
    fn lap_time_s(&self) -> f32 {
        self.lap_time_s
    }
    fn fuel(&self) -> f32 {
        self.fuel_remaining_l
    }
    fn fuel_used_l(&self) -> f32 {
        self.fuel_used_l
    }
}

/// Re-derive per-stint aggregates from an ordered record sequence, applying
/// the same boundaries as [`StintSegmenter`]. Ids carried by the records are
/// not trusted: several capture processes may feed one sequence and each
/// numbers its own stints. Records without a lap time (heartbeats) are
/// ignored.
pub fn summarize<L: StintLap>(records: &[L]) -> Vec<StintSummary> {
    let mut segmenter = StintSegmenter::new();
    records
        .iter()
        .filter(|r| r.lap_time_s() > 0.)
        .map(|r| {
            let driver = DriverIdentity {
                name: r.driver().to_string(),
                id: r.driver_id(),
            };
            (segmenter.assign(&driver, r.fuel()), r)
        })
        .chunk_by(|(stint_id, _)| *stint_id)
        .into_iter()
        .map(|(stint_id, laps)| {
            let laps: Vec<&L> = laps.map(|(_, lap)| lap).collect();
            let total: f32 = laps.iter().map(|l| l.lap_time_s()).sum();
            StintSummary {
                stint_id,
                driver: laps[0].driver().to_string(),
                laps: laps.len(),
                best_lap_s: laps
                    .iter()
                    .map(|l| l.lap_time_s())
                    .fold(f32::INFINITY, f32::min),
                avg_lap_s: round3(total / laps.len() as f32),
                fuel_used_l: round3(laps.iter().map(|l| l.fuel_used_l()).sum()),
                first_lap: laps[0].lap(),
                last_lap: laps[laps.len() - 1].lap(),
            }
        })
        .collect()
}
