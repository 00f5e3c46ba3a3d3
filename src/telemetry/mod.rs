pub mod collector;
pub mod lap_detector;
pub mod pace;
pub mod position;
pub mod producer;
pub mod stint;

pub use collector::{Collector, TickOutcome};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_DRIVER: &str = "Unknown";
pub const UNKNOWN_TEAM: &str = "N/A";
pub const UNKNOWN_TRACK: &str = "---";
pub const UNKNOWN_SESSION: &str = "Session";
pub const UNKNOWN_DRIVER_ID: i64 = -1;

/// Session state as published by the simulator (irsdk_SessionState).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Invalid,
    GetInCar,
    Warmup,
    ParadeLaps,
    Racing,
    Checkered,
    CoolDown,
}

impl SessionState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::GetInCar,
            2 => Self::Warmup,
            3 => Self::ParadeLaps,
            4 => Self::Racing,
            5 => Self::Checkered,
            6 => Self::CoolDown,
            _ => Self::Invalid,
        }
    }

    /// The car is on track under the driver's control.
    pub fn is_active_driving(&self) -> bool {
        matches!(self, Self::Racing | Self::Checkered | Self::CoolDown)
    }
}

/// Instantaneous state of the simulated car and session, read once per tick.
///
/// Every field the simulator can fail to publish is an `Option`: a missing
/// value is a degraded read, not an unreachable source. Whether the source is
/// reachable at all is expressed by the `Result` returned from
/// [`producer::TelemetryProducer::sample`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySample {
    /// Index of the car the local client is attached to. Negative when not in a car.
    pub car_idx: i32,
    pub session_num: Option<i32>,
    /// Session label, e.g. "Practice" or "Race"
    pub session_type: Option<String>,
    pub session_state: SessionState,
    pub driver_name: Option<String>,
    pub driver_id: Option<i64>,
    pub team_name: Option<String>,
    pub track_name: Option<String>,
    /// Raw lap-completed counter for the local driver
    pub lap_completed: Option<i32>,
    /// Lap counter of the car, shared by every driver of the team
    pub car_lap: Option<i32>,
    pub last_lap_time_s: Option<f32>,
    pub fuel_level_l: Option<f32>,
    pub position: Option<i32>,
    pub class_position: Option<i32>,
    pub session_time_remain_s: Option<f64>,
    pub session_laps_remain: Option<i32>,
}

impl Default for TelemetrySample {
    fn default() -> Self {
        Self {
            car_idx: -1,
            session_num: None,
            session_type: None,
            session_state: SessionState::Invalid,
            driver_name: None,
            driver_id: None,
            team_name: None,
            track_name: None,
            lap_completed: None,
            car_lap: None,
            last_lap_time_s: None,
            fuel_level_l: None,
            position: None,
            class_position: None,
            session_time_remain_s: None,
            session_laps_remain: None,
        }
    }
}

impl TelemetrySample {
    pub fn in_car(&self) -> bool {
        self.car_idx >= 0
    }

    pub fn driver(&self) -> DriverIdentity {
        DriverIdentity {
            name: self
                .driver_name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNKNOWN_DRIVER.to_string()),
            id: self.driver_id.unwrap_or(UNKNOWN_DRIVER_ID),
        }
    }

    pub fn team(&self) -> String {
        self.team_name
            .clone()
            .filter(|team| !team.is_empty())
            .unwrap_or_else(|| UNKNOWN_TEAM.to_string())
    }

    pub fn track(&self) -> String {
        self.track_name
            .clone()
            .filter(|track| !track.is_empty())
            .unwrap_or_else(|| UNKNOWN_TRACK.to_string())
    }

    pub fn session_label(&self) -> String {
        self.session_type
            .clone()
            .unwrap_or_else(|| UNKNOWN_SESSION.to_string())
    }

    /// Index of the lap that just completed. The car lap counter is bumped when
    /// the next lap starts, so the completed lap is one behind it.
    pub fn completed_lap_index(&self) -> i32 {
        match (self.car_lap, self.lap_completed) {
            (Some(car_lap), _) if car_lap > 0 => car_lap - 1,
            (_, Some(lap_completed)) => lap_completed,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverIdentity {
    pub name: String,
    pub id: i64,
}

impl DriverIdentity {
    /// Two identities are the same driver when their ids match, or when
    /// either id is unknown and the names match.
    pub fn same_driver(&self, other: &DriverIdentity) -> bool {
        if self.id != UNKNOWN_DRIVER_ID && other.id != UNKNOWN_DRIVER_ID {
            self.id == other.id
        } else {
            self.name == other.name
        }
    }
}

/// One completed lap, as appended to the local lap log and mirrored remotely.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LapRecord {
    pub timestamp: String,
    pub session: String,
    pub track: String,
    pub team: String,
    pub driver: String,
    pub driver_id: i64,
    pub lap: i32,
    pub lap_time_s: f32,
    pub avg_lap_time_s: f32,
    pub fuel_used_l: f32,
    pub avg_fuel_used_l: f32,
    pub fuel_remaining_l: f32,
    pub position: i32,
    pub class_position: i32,
    pub laps_remaining_est: f32,
    pub fuel_autonomy_laps: f32,
    pub stint_id: u32,
}

pub(crate) fn round3(value: f32) -> f32 {
    (value * 1000.).round() / 1000.
}
