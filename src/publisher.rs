//! Writes every lap to the local lap log and mirrors it to the session
//! registry without ever waiting on the network.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    PitwallError,
    registry::SessionRecord,
    status::ConnectionState,
    telemetry::LapRecord,
    writer::LapLog,
};

/// Destination of the best-effort mirror.
pub trait RemoteSink: Send + Sync + 'static {
    fn push(&self, record: SessionRecord)
    -> impl Future<Output = Result<(), PitwallError>> + Send;
}

/// Pushes records as JSON to the registry's append endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PitwallError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl RemoteSink for HttpSink {
    async fn push(&self, record: SessionRecord) -> Result<(), PitwallError> {
        let response = self.client.post(&self.url).json(&record).send().await?;
        response.error_for_status()?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushCounts {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct PushStats {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// What happened to a lap in the publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushStatus {
    /// Handed to the background push
    Dispatched,
    /// No remote sink configured
    Disabled,
}

pub struct DualSinkPublisher<S: RemoteSink = HttpSink> {
    session_id: String,
    lap_log: LapLog,
    remote: Option<Arc<S>>,
    push_timeout: Duration,
    heartbeat_interval: Duration,
    last_heartbeat: Option<Instant>,
    stats: Arc<PushStats>,
    runtime: tokio::runtime::Runtime,
}

impl<S: RemoteSink> DualSinkPublisher<S> {
    pub fn new(
        session_id: impl Into<String>,
        lap_log: LapLog,
        remote: Option<S>,
        push_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Result<Self, PitwallError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pitwall-push")
            .enable_all()
            .build()
            .map_err(|e| PitwallError::RuntimeError { source: e })?;
        Ok(Self {
            session_id: session_id.into(),
            lap_log,
            remote: remote.map(Arc::new),
            push_timeout,
            heartbeat_interval,
            last_heartbeat: None,
            stats: Arc::new(PushStats::default()),
            runtime,
        })
    }

    pub fn lap_log(&self) -> &LapLog {
        &self.lap_log
    }

    /// Append the lap locally, then dispatch the remote push. A local write
    /// failure is returned; the push still goes out.
    pub fn publish_lap(
        &self,
        lap: &LapRecord,
        state: ConnectionState,
    ) -> Result<PushStatus, PitwallError> {
        let local = self.lap_log.append(lap);
        let status = self.dispatch(SessionRecord::from_lap(&self.session_id, state, lap));
        local.map(|_| status)
    }

    /// Push a heartbeat unless one went out less than the heartbeat interval
    /// ago. Returns whether one was dispatched.
    pub fn heartbeat(
        &mut self,
        state: ConnectionState,
        driver: &str,
        fuel: f32,
        position: i32,
    ) -> bool {
        if state == ConnectionState::Offline || self.remote.is_none() {
            return false;
        }
        let due = self
            .last_heartbeat
            .is_none_or(|sent| sent.elapsed() >= self.heartbeat_interval);
        if !due {
            return false;
        }
        self.last_heartbeat = Some(Instant::now());
        let record = SessionRecord::heartbeat(
            &self.session_id,
            state,
            driver,
            fuel,
            position,
            chrono::Local::now().format("%H:%M:%S").to_string(),
        );
        self.dispatch(record) == PushStatus::Dispatched
    }

    fn dispatch(&self, record: SessionRecord) -> PushStatus {
        let Some(remote) = self.remote.clone() else {
            return PushStatus::Disabled;
        };
        let stats = self.stats.clone();
        let timeout = self.push_timeout;
        stats.attempted.fetch_add(1, Ordering::Relaxed);

        self.runtime.spawn(async move {
            let lap = record.lap;
            let result = match tokio::time::timeout(timeout, remote.push(record)).await {
                Ok(result) => result,
                Err(_) => Err(PitwallError::PushTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            match result {
                Ok(()) => {
                    stats.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!("Pushed lap {lap} to registry");
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Registry push for lap {lap} dropped: {e}");
                }
            }
        });
        PushStatus::Dispatched
    }

    pub fn push_counts(&self) -> PushCounts {
        PushCounts {
            attempted: self.stats.attempted.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}
