// Error types for pitwall

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum PitwallError {
    // Errors for the telemetry source
    #[snafu(display("Telemetry source unavailable: {description}"))]
    SourceUnavailable { description: String },
    #[snafu(display("Missing iRacing client, session not initialized"))]
    MissingIRacingSession,
    #[snafu(display("Could not start async runtime"))]
    RuntimeError { source: io::Error },

    // Errors for the local lap log
    #[snafu(display("Error writing lap log {path}"))]
    LapLogIoError { path: String, source: io::Error },
    #[snafu(display("Error encoding lap log row"))]
    LapLogError { source: csv::Error },

    // Errors for the connection status file
    #[snafu(display("Error writing status file"))]
    StatusWriteError { source: io::Error },
    #[snafu(display("Error serializing status"))]
    StatusSerializeError { source: serde_json::Error },

    // Errors for the remote push
    #[snafu(display("Remote push failed: {description}"))]
    PushFailed { description: String },
    #[snafu(display("Remote push timed out after {timeout_ms} ms"))]
    PushTimeout { timeout_ms: u64 },

    // Session registry errors
    #[snafu(display("Could not bind registry to {bind}"))]
    RegistryBindError { bind: String, source: io::Error },
    #[snafu(display("Registry server error"))]
    RegistryServeError { source: io::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
    #[snafu(display("Error parsing config file"))]
    ConfigParseError { source: serde_json::Error },

    // Replay errors
    #[snafu(display("Invalid telemetry file: {path}"))]
    InvalidTelemetryFile { path: String },
    #[snafu(display("Error loading telemetry file"))]
    TelemetryLoaderError { source: io::Error },
}

impl From<reqwest::Error> for PitwallError {
    fn from(value: reqwest::Error) -> Self {
        PitwallError::PushFailed {
            description: value.to_string(),
        }
    }
}
