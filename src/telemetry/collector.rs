use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::{
    PitwallError,
    config::CaptureConfig,
    publisher::{DualSinkPublisher, HttpSink, PushStatus, RemoteSink},
    status::{ConnectionState, ConnectionStatus, StatusTracker},
    writer::LapLog,
};

use super::{
    LapRecord, SessionState, TelemetrySample, UNKNOWN_DRIVER,
    lap_detector::{LapEvent, LapEventDetector},
    pace::{PaceEstimator, laps_remaining},
    position::PositionStabilizer,
    producer::TelemetryProducer,
    round3,
    stint::{REFUEL_THRESHOLD_L, StintSegmenter},
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Result of one poll tick.
#[derive(Clone, Debug)]
pub struct TickOutcome {
    pub state: ConnectionState,
    pub lap: Option<LapRecord>,
}

/// The capture engine: polls the producer, derives lap records and hands
/// them to the publisher.
pub struct Collector<P: TelemetryProducer, S: RemoteSink = HttpSink> {
    producer: P,
    config: CaptureConfig,
    status: StatusTracker,
    positions: PositionStabilizer,
    detector: LapEventDetector,
    pace: PaceEstimator,
    stints: StintSegmenter,
    publisher: DualSinkPublisher<S>,
    session_num: Option<i32>,
    grid_recorded: bool,
}

impl<P: TelemetryProducer> Collector<P, HttpSink> {
    /// Build a collector writing to a fresh lap log in the configured log
    /// directory and pushing to the configured registry, if any.
    pub fn from_config(producer: P, config: CaptureConfig) -> Result<Self, PitwallError> {
        let lap_log = LapLog::for_run(&config.log_dir, chrono::Local::now());
        let remote = match &config.remote_url {
            Some(url) => Some(HttpSink::new(url.clone(), config.push_timeout())?),
            None => None,
        };
        let publisher = DualSinkPublisher::new(
            config.session_id.clone(),
            lap_log,
            remote,
            config.push_timeout(),
            config.heartbeat_interval(),
        )?;
        Ok(Self::new(producer, config, publisher))
    }
}

impl<P: TelemetryProducer, S: RemoteSink> Collector<P, S> {
    pub fn new(producer: P, config: CaptureConfig, publisher: DualSinkPublisher<S>) -> Self {
        let status = StatusTracker::new(Some(config.status_path()));
        Self {
            producer,
            config,
            status,
            positions: PositionStabilizer::new(),
            detector: LapEventDetector::new(),
            pace: PaceEstimator::new(),
            stints: StintSegmenter::new(),
            publisher,
            session_num: None,
            grid_recorded: false,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        self.status.status()
    }

    pub fn publisher(&self) -> &DualSinkPublisher<S> {
        &self.publisher
    }

    /// Poll until `shutdown` is raised, then mark the capture offline.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            "Capture started for session '{}', logging laps to {}",
            self.config.session_id,
            self.publisher.lap_log().path().display()
        );
        while !shutdown.load(Ordering::Relaxed) {
            let outcome = self.tick();
            let wait = match outcome.state {
                ConnectionState::Offline => self.config.offline_retry(),
                _ => self.config.tick_interval(),
            };
            sleep_unless(shutdown, wait);
        }
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        info!("Capture stopping");
        self.status.shutdown();
    }

    /// One poll of the source. Never fails: an unreachable source is reported
    /// as offline and the next tick tries again.
    pub fn tick(&mut self) -> TickOutcome {
        let sample = match self.producer.sample() {
            Ok(sample) => sample,
            Err(e) => {
                debug!("Telemetry source unavailable: {e}");
                return TickOutcome {
                    state: self.status.observe(None),
                    lap: None,
                };
            }
        };
        let state = self.status.observe(Some(&sample));
        if !sample.in_car() {
            let (position, _) = self.positions.current();
            self.publisher.heartbeat(state, UNKNOWN_DRIVER, 0., position);
            return TickOutcome { state, lap: None };
        }

        self.track_session(&sample);
        let (position, _) = self
            .positions
            .update(sample.position, sample.class_position);
        let fuel_now = sample.fuel_level_l.unwrap_or(0.);
        self.publisher
            .heartbeat(state, &sample.driver().name, fuel_now, position);

        if !self.grid_recorded
            && sample.session_state == SessionState::Racing
            && fuel_now > REFUEL_THRESHOLD_L
        {
            self.grid_recorded = true;
            if self.pace.fuel_baseline().is_none() {
                info!("{} on the grid with {fuel_now:.2} L", sample.driver().name);
                self.pace.set_fuel_baseline(fuel_now);
            }
        }

        let Some(event) = self.detector.observe(sample.last_lap_time_s) else {
            return TickOutcome { state, lap: None };
        };
        let settled = self.settle(sample);
        let event = self.detector.settle(event, settled.last_lap_time_s);
        let record = self.derive_record(&settled, event);

        match self.publisher.publish_lap(&record, state) {
            Ok(PushStatus::Dispatched) => info!(
                "Lap {} | {} | {:.3}s | stint {} | pushed",
                record.lap, record.driver, record.lap_time_s, record.stint_id
            ),
            Ok(PushStatus::Disabled) => info!(
                "Lap {} | {} | {:.3}s | stint {}",
                record.lap, record.driver, record.lap_time_s, record.stint_id
            ),
            Err(e) => error!("Could not write lap {} to the lap log: {e}", record.lap),
        }

        TickOutcome {
            state,
            lap: Some(record),
        }
    }

    /// Session changes and restarts reset everything derived from the
    /// previous session's laps.
    fn track_session(&mut self, sample: &TelemetrySample) {
        if sample.session_num.is_some() && sample.session_num != self.session_num {
            info!("New session detected: {}", sample.session_label());
            self.session_num = sample.session_num;
            self.reset_session();
        }
        if self.detector.check_restart(sample.lap_completed) {
            info!("Lap counter went backwards, session restarted");
            self.pace.reset();
            self.stints.start_session();
            self.grid_recorded = false;
        }
    }

    fn reset_session(&mut self) {
        self.detector.reset();
        self.pace.reset();
        self.stints.start_session();
        self.grid_recorded = false;
    }

    /// The source publishes a new lap time slightly before it refreshes the
    /// driver, fuel and position, so those are re-read after the settle delay.
    fn settle(&mut self, trigger: TelemetrySample) -> TelemetrySample {
        let delay = self.config.settle_delay();
        if delay.is_zero() {
            return trigger;
        }
        thread::sleep(delay);
        match self.producer.sample() {
            Ok(settled) if settled.in_car() => settled,
            Ok(_) => {
                warn!("Left the car during lap settle, using the triggering sample");
                trigger
            }
            Err(e) => {
                warn!("Could not re-read telemetry after lap settle: {e}");
                trigger
            }
        }
    }

    fn derive_record(&mut self, sample: &TelemetrySample, event: LapEvent) -> LapRecord {
        let (position, class_position) = self
            .positions
            .update(sample.position, sample.class_position);
        let driver = sample.driver();
        let fuel_now = sample.fuel_level_l.unwrap_or(0.);

        let pace = self.pace.record_lap(event.lap_time_s, fuel_now);
        let stint_id = self.stints.assign(&driver, fuel_now);
        debug!(
            "Lap derived {:?} after detection",
            Instant::now().duration_since(event.detected_at)
        );

        LapRecord {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            session: sample.session_label(),
            track: sample.track(),
            team: sample.team(),
            driver: driver.name,
            driver_id: driver.id,
            lap: sample.completed_lap_index(),
            lap_time_s: round3(event.lap_time_s),
            avg_lap_time_s: pace.avg_lap_time_s,
            fuel_used_l: pace.fuel_used_l,
            avg_fuel_used_l: pace.avg_fuel_used_l,
            fuel_remaining_l: round3(fuel_now),
            position,
            class_position,
            laps_remaining_est: laps_remaining(
                sample.session_laps_remain,
                sample.session_time_remain_s,
                pace.avg_lap_time_s,
            ),
            fuel_autonomy_laps: round3(pace.fuel_autonomy_laps),
            stint_id,
        }
    }
}

fn sleep_unless(shutdown: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}
