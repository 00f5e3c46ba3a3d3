use std::path::Path;
#[cfg(windows)]
use std::time::Duration;

#[cfg(windows)]
use log::{debug, info};

use crate::PitwallError;

use super::TelemetrySample;

#[cfg(windows)]
const CONN_RETRY_WAIT_MS: u64 = 200;
#[cfg(windows)]
const CONNECT_ATTEMPT_MS: u64 = 500;

/// A trait for reading the current state of the simulator.
///
/// `sample()` is called once per poll tick. An `Err` means the source could
/// not be read at all (simulator closed, shared memory gone) and drives the
/// connection state to offline; the poller keeps calling `sample()` on the
/// following ticks, so implementations must reconnect lazily. Individual
/// fields the source fails to publish are `None` in the returned sample.
pub trait TelemetryProducer {
    fn sample(&mut self) -> Result<TelemetrySample, PitwallError>;
}

#[cfg(windows)]
pub struct IRacingTelemetryProducer {
    client: Option<simetry::iracing::Client>,
    runtime: tokio::runtime::Runtime,
    retry_wait_ms: u64,
}

#[cfg(windows)]
impl IRacingTelemetryProducer {
    pub fn new() -> Result<Self, PitwallError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| PitwallError::RuntimeError { source: e })?;
        Ok(Self {
            client: None,
            runtime,
            retry_wait_ms: CONN_RETRY_WAIT_MS,
        })
    }

    fn connect(&mut self) -> Result<(), PitwallError> {
        if self.client.is_none() {
            let retry_delay = Duration::from_millis(self.retry_wait_ms);
            let client = self
                .runtime
                .block_on(async {
                    tokio::time::timeout(
                        Duration::from_millis(CONNECT_ATTEMPT_MS),
                        simetry::iracing::Client::connect(retry_delay),
                    )
                    .await
                })
                .map_err(|_| PitwallError::SourceUnavailable {
                    description: "iRacing is not running".to_string(),
                })?;
            info!("iRacing: connected to shared memory");
            self.client = Some(client);
        }
        Ok(())
    }
}

#[cfg(windows)]
impl TelemetryProducer for IRacingTelemetryProducer {
    fn sample(&mut self) -> Result<TelemetrySample, PitwallError> {
        self.connect()?;
        let client = self
            .client
            .as_mut()
            .ok_or(PitwallError::MissingIRacingSession)?;
        let state = match self.runtime.block_on(client.next_sim_state()) {
            Some(state) => state,
            None => {
                debug!("iRacing: no sim state, dropping connection");
                self.client = None;
                return Err(PitwallError::SourceUnavailable {
                    description: "iRacing connection lost".to_string(),
                });
            }
        };
        Ok(sample_from_iracing_state(&state))
    }
}

#[cfg(windows)]
fn sample_from_iracing_state(state: &simetry::iracing::SimState) -> TelemetrySample {
    let session_info = state.session_info();
    let car_idx = session_info["DriverInfo"]["DriverCarIdx"]
        .as_i64()
        .map(|v| v as i32)
        .unwrap_or(-1);
    let session_num: Option<i32> = state.read_name("SessionNum");

    let driver = session_info["DriverInfo"]["Drivers"]
        .as_vec()
        .and_then(|drivers| {
            drivers
                .iter()
                .find(|d| d["CarIdx"].as_i64() == Some(car_idx as i64))
        });
    let session_type = session_num.and_then(|num| {
        session_info["SessionInfo"]["Sessions"]
            .as_vec()?
            .iter()
            .find(|s| s["SessionNum"].as_i64() == Some(num as i64))?["SessionType"]
            .as_str()
            .map(str::to_string)
    });

    TelemetrySample {
        car_idx,
        session_num,
        session_type,
        session_state: state
            .read_name::<i32>("SessionState")
            .map(super::SessionState::from_raw)
            .unwrap_or_default(),
        driver_name: driver.and_then(|d| d["UserName"].as_str().map(str::to_string)),
        driver_id: driver.and_then(|d| d["UserID"].as_i64()),
        team_name: driver.and_then(|d| d["TeamName"].as_str().map(str::to_string)),
        track_name: session_info["WeekendInfo"]["TrackDisplayName"]
            .as_str()
            .map(str::to_string),
        lap_completed: state.read_name("LapCompleted"),
        car_lap: state.read_name("Lap"),
        last_lap_time_s: state.read_name("LapLastLapTime"),
        fuel_level_l: state.read_name("FuelLevel"),
        position: state.read_name("PlayerCarPosition"),
        class_position: state.read_name("PlayerCarClassPosition"),
        session_time_remain_s: state.read_name("SessionTimeRemain"),
        session_laps_remain: state.read_name("SessionLapsRemain"),
    }
}

/// Replays a fixed sequence of samples, one per tick.
///
/// An entry of `None` simulates a tick where the source is unreachable. Once
/// the sequence is exhausted every further tick reports the source as
/// unreachable.
#[derive(Default)]
pub struct MockTelemetryProducer {
    cur_tick: usize,
    samples: Vec<Option<TelemetrySample>>,
}

impl MockTelemetryProducer {
    pub fn from_samples(samples: Vec<TelemetrySample>) -> Self {
        Self::from_ticks(samples.into_iter().map(Some).collect())
    }

    pub fn from_ticks(samples: Vec<Option<TelemetrySample>>) -> Self {
        Self {
            cur_tick: 0,
            samples,
        }
    }

    /// Load samples from a JSON Lines file, one `TelemetrySample` per line.
    pub fn from_file(file: &Path) -> Result<Self, PitwallError> {
        if !file.exists() {
            return Err(PitwallError::InvalidTelemetryFile {
                path: file.display().to_string(),
            });
        }
        let samples = serde_jsonlines::json_lines::<TelemetrySample, _>(file)
            .map_err(|e| PitwallError::TelemetryLoaderError { source: e })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PitwallError::TelemetryLoaderError { source: e })?;
        Ok(Self::from_samples(samples))
    }

    pub fn remaining(&self) -> usize {
        self.samples.len().saturating_sub(self.cur_tick)
    }
}

impl TelemetryProducer for MockTelemetryProducer {
    fn sample(&mut self) -> Result<TelemetrySample, PitwallError> {
        let tick = self.samples.get(self.cur_tick).cloned();
        self.cur_tick += 1;
        match tick {
            Some(Some(sample)) => Ok(sample),
            Some(None) => Err(PitwallError::SourceUnavailable {
                description: "simulated outage".to_string(),
            }),
            None => Err(PitwallError::SourceUnavailable {
                description: "end of recorded samples".to_string(),
            }),
        }
    }
}
