//! In-memory store of the records pushed by every capture process, keyed by
//! session id.

pub mod server;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    status::ConnectionState,
    telemetry::{
        LapRecord,
        stint::{StintLap, StintSummary, summarize},
    },
};

/// One entry of a session: a lap, or a heartbeat (`lap` 0, `lap_time` 0.0).
///
/// The first nine fields are what every client sends; the rest are optional
/// so that minimal clients are accepted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub driver: String,
    pub user_id: i64,
    pub lap: i32,
    pub lap_time: f32,
    pub fuel: f32,
    pub position: i32,
    pub timestamp: String,
    pub state: ConnectionState,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub class_position: Option<i32>,
    #[serde(default)]
    pub avg_lap_time: Option<f32>,
    #[serde(default)]
    pub fuel_used: Option<f32>,
    #[serde(default)]
    pub avg_fuel_used: Option<f32>,
    #[serde(default)]
    pub laps_remaining: Option<f32>,
    #[serde(default)]
    pub stint_id: Option<u32>,
}

impl SessionRecord {
    pub fn from_lap(session_id: &str, state: ConnectionState, lap: &LapRecord) -> Self {
        Self {
            session_id: session_id.to_string(),
            driver: lap.driver.clone(),
            user_id: lap.driver_id,
            lap: lap.lap,
            lap_time: lap.lap_time_s,
            fuel: lap.fuel_remaining_l,
            position: lap.position,
            timestamp: lap.timestamp.clone(),
            state,
            team: Some(lap.team.clone()),
            track: Some(lap.track.clone()),
            session: Some(lap.session.clone()),
            class_position: Some(lap.class_position),
            avg_lap_time: Some(lap.avg_lap_time_s),
            fuel_used: Some(lap.fuel_used_l),
            avg_fuel_used: Some(lap.avg_fuel_used_l),
            laps_remaining: Some(lap.laps_remaining_est),
            stint_id: Some(lap.stint_id),
        }
    }

    pub fn heartbeat(
        session_id: &str,
        state: ConnectionState,
        driver: &str,
        fuel: f32,
        position: i32,
        timestamp: String,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            driver: driver.to_string(),
            user_id: -1,
            lap: 0,
            lap_time: 0.,
            fuel,
            position,
            timestamp,
            state,
            team: None,
            track: None,
            session: None,
            class_position: None,
            avg_lap_time: None,
            fuel_used: None,
            avg_fuel_used: None,
            laps_remaining: None,
            stint_id: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.lap_time <= 0.
    }
}

impl StintLap for SessionRecord {
    fn driver(&self) -> &str {
        &self.driver
    }
    fn driver_id(&self) -> i64 {
        self.user_id
    }
    fn lap(&self) -> i32 {
        self.lap
    }
    fn lap_time_s(&self) -> f32 {
        self.lap_time
    }
    fn fuel(&self) -> f32 {
        self.fuel
    }
    fn fuel_used_l(&self) -> f32 {
        self.fuel_used.unwrap_or(0.)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RegistryConfig {
    /// Keep at most this many records per session, dropping the oldest.
    /// `None` keeps everything for the lifetime of the process.
    pub max_records_per_session: Option<usize>,
}

type SessionLog = Arc<Mutex<VecDeque<SessionRecord>>>;

/// Concurrently writable store of per-session record sequences.
///
/// The session map is behind a read-write lock that writers only take
/// exclusively to create a missing session; appends then lock that session
/// alone, so pushes to different sessions never contend.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionLog>>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn session_log(&self, session_id: &str) -> SessionLog {
        if let Some(log) = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return log.clone();
        }
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("New session {session_id}");
                Arc::new(Mutex::new(VecDeque::new()))
            })
            .clone()
    }

    /// Append a record under its session id. Duplicates are kept.
    pub fn append(&self, record: SessionRecord) {
        let log = self.session_log(&record.session_id);
        let mut records = log.lock().unwrap_or_else(PoisonError::into_inner);
        records.push_back(record);
        if let Some(max) = self.config.max_records_per_session {
            while records.len() > max {
                records.pop_front();
            }
        }
    }

    /// Snapshot of a session in append order, empty for unknown ids.
    pub fn session(&self, session_id: &str) -> Vec<SessionRecord> {
        let log = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned();
        match log {
            Some(log) => log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn stints(&self, session_id: &str) -> Vec<StintSummary> {
        summarize(&self.session(session_id))
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(session_id: &str, driver: &str, lap: i32) -> SessionRecord {
        SessionRecord {
            session_id: session_id.to_string(),
            driver: driver.to_string(),
            user_id: driver.bytes().next().map_or(-1, i64::from),
            lap,
            lap_time: 90. + lap as f32,
            fuel: 20. - lap as f32 * 0.5,
            position: 3,
            timestamp: "12:00:00".to_string(),
            state: ConnectionState::Cockpit,
            team: None,
            track: None,
            session: None,
            class_position: None,
            avg_lap_time: None,
            fuel_used: Some(0.5),
            avg_fuel_used: None,
            laps_remaining: None,
            stint_id: Some(1),
        }
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let registry = SessionRegistry::default();
        assert!(registry.session("nope").is_empty());
        assert!(registry.session_ids().is_empty());
    }

    #[test]
    fn test_append_keeps_order_and_duplicates() {
        let registry = SessionRegistry::default();
        registry.append(record("race", "A", 1));
        registry.append(record("race", "A", 2));
        registry.append(record("race", "A", 2));
        registry.append(record("other", "B", 1));

        let laps: Vec<i32> = registry.session("race").iter().map(|r| r.lap).collect();
        assert_eq!(laps, vec![1, 2, 2]);
        assert_eq!(registry.session("other").len(), 1);
        assert_eq!(registry.session_ids(), vec!["other", "race"]);
    }

    #[test]
    fn test_bounded_session_drops_oldest() {
        let registry = SessionRegistry::new(RegistryConfig {
            max_records_per_session: Some(2),
        });
        for lap in 1..=4 {
            registry.append(record("race", "A", lap));
        }
        let laps: Vec<i32> = registry.session("race").iter().map(|r| r.lap).collect();
        assert_eq!(laps, vec![3, 4]);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let registry = Arc::new(SessionRegistry::default());
        let handles: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|driver| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for lap in 1..=250 {
                        registry.append(record("race", driver, lap));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = registry.session("race");
        assert_eq!(records.len(), 1000);
        for driver in ["A", "B", "C", "D"] {
            let laps: Vec<i32> = records
                .iter()
                .filter(|r| r.driver == driver)
                .map(|r| r.lap)
                .collect();
            assert_eq!(laps, (1..=250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_minimal_client_payload_accepted() {
        let payload = r#"{"session_id": "Daytona_Test", "driver": "Rodrigo", "user_id": 739024,
            "lap": 3, "lap_time": 17.2, "fuel": 19.4, "position": 2,
            "timestamp": "21:04:11", "state": "cockpit"}"#;
        let record: SessionRecord = serde_json::from_str(payload).unwrap();
        assert_eq!(record.stint_id, None);
        assert_eq!(record.state, ConnectionState::Cockpit);
        assert!(!record.is_heartbeat());
    }

    #[test]
    fn test_stints_ignore_heartbeats() {
        let registry = SessionRegistry::default();
        registry.append(SessionRecord::heartbeat(
            "race",
            ConnectionState::Cockpit,
            "A",
            20.,
            3,
            "12:00:00".to_string(),
        ));
        registry.append(record("race", "A", 1));
        registry.append(record("race", "A", 2));
        let stints = registry.stints("race");
        assert_eq!(stints.len(), 1);
        assert_eq!(stints[0].laps, 2);
    }

    #[test]
    fn test_stints_derived_without_client_ids() {
        let registry = SessionRegistry::default();
        for (driver, lap) in [("A", 1), ("A", 2), ("B", 3), ("B", 4)] {
            let payload = serde_json::json!({
                "session_id": "race", "driver": driver, "user_id": 739000 + lap / 3,
                "lap": lap, "lap_time": 90.5, "fuel": 20. - lap as f32 * 0.5,
                "position": 2, "timestamp": "21:04:11", "state": "cockpit"
            });
            registry.append(serde_json::from_value(payload).unwrap());
        }
        let stints: Vec<(u32, String, usize)> = registry
            .stints("race")
            .into_iter()
            .map(|s| (s.stint_id, s.driver, s.laps))
            .collect();
        assert_eq!(
            stints,
            vec![(1, "A".to_string(), 2), (2, "B".to_string(), 2)]
        );
    }

    #[test]
    fn test_stints_split_when_processes_reuse_ids() {
        // each capture process numbers its own stints from 1
        let registry = SessionRegistry::default();
        for (driver, lap) in [("A", 1), ("A", 2), ("B", 3), ("B", 4)] {
            registry.append(record("race", driver, lap));
        }
        let stints = registry.stints("race");
        assert_eq!(stints.len(), 2);
        assert_eq!((stints[0].driver.as_str(), stints[0].laps), ("A", 2));
        assert_eq!((stints[1].stint_id, stints[1].first_lap), (2, 3));
    }
}
