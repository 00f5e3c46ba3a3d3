//! Connection state machine and the status file read by viewers.

use std::{
    fmt,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    PitwallError,
    telemetry::{TelemetrySample, UNKNOWN_DRIVER, UNKNOWN_TRACK},
};

/// A status older than this is shown as offline.
pub const STALE_AFTER: Duration = Duration::from_secs(10);
const NO_VALUE: &str = "---";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Offline,
    Connected,
    Cockpit,
}

impl ConnectionState {
    /// Next state given this tick's read of the source. `None` means the
    /// source could not be read at all.
    pub fn next(self, sample: Option<&TelemetrySample>) -> ConnectionState {
        match (self, sample) {
            (_, None) => Self::Offline,
            (Self::Offline, Some(_)) => Self::Connected,
            (_, Some(sample)) if sample.in_car() && sample.session_state.is_active_driving() => {
                Self::Cockpit
            }
            (_, Some(_)) => Self::Connected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Connected => write!(f, "connected"),
            Self::Cockpit => write!(f, "cockpit"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub driver: String,
    pub track: String,
    /// Seconds since the unix epoch
    pub last_update: f64,
}

impl ConnectionStatus {
    pub fn offline(now: f64) -> Self {
        Self {
            state: ConnectionState::Offline,
            driver: NO_VALUE.to_string(),
            track: NO_VALUE.to_string(),
            last_update: now,
        }
    }

    pub fn is_stale(&self, now: f64) -> bool {
        now - self.last_update > STALE_AFTER.as_secs_f64()
    }

    /// The state a reader should display, degrading to offline when stale.
    pub fn effective_state(&self, now: f64) -> ConnectionState {
        if self.is_stale(now) {
            ConnectionState::Offline
        } else {
            self.state
        }
    }
}

pub fn now_epoch_s() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.
}

/// Owns the current [`ConnectionStatus`] and keeps the status file in sync
/// with it every tick.
pub struct StatusTracker {
    status: ConnectionStatus,
    path: Option<PathBuf>,
}

impl StatusTracker {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            status: ConnectionStatus::offline(now_epoch_s()),
            path,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state
    }

    /// Advance the state machine with this tick's read and overwrite the
    /// status. Returns the new state.
    pub fn observe(&mut self, sample: Option<&TelemetrySample>) -> ConnectionState {
        let previous = self.status.state;
        let state = previous.next(sample);
        if state != previous {
            info!("Connection state {previous} -> {state}");
        }

        self.status = match (state, sample) {
            (ConnectionState::Offline, _) | (_, None) => ConnectionStatus::offline(now_epoch_s()),
            (ConnectionState::Connected, Some(sample)) if !sample.in_car() => ConnectionStatus {
                state,
                driver: UNKNOWN_DRIVER.to_string(),
                track: UNKNOWN_TRACK.to_string(),
                last_update: now_epoch_s(),
            },
            (_, Some(sample)) => ConnectionStatus {
                state,
                driver: sample.driver().name,
                track: sample.track(),
                last_update: now_epoch_s(),
            },
        };
        self.persist();
        state
    }

    /// Mark the capture as offline, used when the process shuts down.
    pub fn shutdown(&mut self) {
        self.status = ConnectionStatus::offline(now_epoch_s());
        self.persist();
    }

    fn persist(&self) {
        if let Some(path) = &self.path {
            if let Err(e) = write_status(path, &self.status) {
                warn!("Could not write status file {}: {}", path.display(), e);
            }
        }
    }
}

pub fn write_status(path: &Path, status: &ConnectionStatus) -> Result<(), PitwallError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PitwallError::StatusWriteError { source: e })?;
    }
    // write next to the target and rename so readers never see a partial file
    let tmp_path = path.with_extension("json.tmp");
    let file =
        File::create(&tmp_path).map_err(|e| PitwallError::StatusWriteError { source: e })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, status)
        .map_err(|e| PitwallError::StatusSerializeError { source: e })?;
    writer
        .flush()
        .map_err(|e| PitwallError::StatusWriteError { source: e })?;
    drop(writer);
    fs::rename(&tmp_path, path).map_err(|e| PitwallError::StatusWriteError { source: e })
}

/// Read the status file the way a viewer does: anything unreadable or stale
/// is reported as offline.
pub fn read_status(path: &Path, now: f64) -> ConnectionStatus {
    let status = File::open(path)
        .ok()
        .and_then(|file| serde_json::from_reader::<_, ConnectionStatus>(file).ok());
    match status {
        Some(status) if !status.is_stale(now) => status,
        Some(_) => {
            debug!("Status file {} is stale", path.display());
            ConnectionStatus::offline(now)
        }
        None => ConnectionStatus::offline(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SessionState;

    fn in_car(state: SessionState) -> TelemetrySample {
        TelemetrySample {
            car_idx: 3,
            session_state: state,
            driver_name: Some("A".to_string()),
            track_name: Some("Daytona".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_transitions() {
        let menu = TelemetrySample::default();
        let driving = in_car(SessionState::Racing);
        let gridding = in_car(SessionState::GetInCar);

        assert_eq!(ConnectionState::Offline.next(None), ConnectionState::Offline);
        assert_eq!(
            ConnectionState::Offline.next(Some(&driving)),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::Connected.next(Some(&driving)),
            ConnectionState::Cockpit
        );
        assert_eq!(
            ConnectionState::Connected.next(Some(&gridding)),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::Cockpit.next(Some(&menu)),
            ConnectionState::Connected
        );
        assert_eq!(ConnectionState::Cockpit.next(None), ConnectionState::Offline);
        assert_eq!(ConnectionState::Connected.next(None), ConnectionState::Offline);
    }

    #[test]
    fn test_staleness() {
        let status = ConnectionStatus {
            state: ConnectionState::Cockpit,
            driver: "A".to_string(),
            track: "Daytona".to_string(),
            last_update: 1000.,
        };
        assert_eq!(status.effective_state(1005.), ConnectionState::Cockpit);
        assert_eq!(status.effective_state(1010.), ConnectionState::Cockpit);
        assert_eq!(status.effective_state(1010.5), ConnectionState::Offline);
    }

    #[test]
    fn test_tracker_writes_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut tracker = StatusTracker::new(Some(path.clone()));

        tracker.observe(Some(&in_car(SessionState::Racing)));
        let state = tracker.observe(Some(&in_car(SessionState::Racing)));
        assert_eq!(state, ConnectionState::Cockpit);

        let status = read_status(&path, now_epoch_s());
        assert_eq!(status.state, ConnectionState::Cockpit);
        assert_eq!(status.driver, "A");
        assert_eq!(status.track, "Daytona");

        tracker.shutdown();
        assert_eq!(read_status(&path, now_epoch_s()).state, ConnectionState::Offline);
    }

    #[test]
    fn test_missing_status_file_reads_offline() {
        let dir = tempfile::tempdir().unwrap();
        let status = read_status(&dir.path().join("missing.json"), now_epoch_s());
        assert_eq!(status.state, ConnectionState::Offline);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Cockpit).unwrap(),
            "\"cockpit\""
        );
    }
}
