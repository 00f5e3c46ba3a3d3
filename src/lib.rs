// Library interface for pitwall
// The binary and the integration tests both build on these modules

pub mod config;
pub mod errors;
pub mod publisher;
pub mod registry;
pub mod status;
pub mod telemetry;
pub mod writer;

// Re-export commonly used types
pub use config::CaptureConfig;
pub use errors::PitwallError;
pub use publisher::{DualSinkPublisher, HttpSink, RemoteSink};
pub use registry::{SessionRecord, SessionRegistry};
pub use status::{ConnectionState, ConnectionStatus};
pub use telemetry::{Collector, LapRecord, TelemetrySample};
