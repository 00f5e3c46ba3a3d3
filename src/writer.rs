use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{PitwallError, telemetry::LapRecord};

/// Append-only CSV log of the laps of one capture run.
///
/// The file is opened, appended to and flushed on every lap so a crash or a
/// network outage never costs more than the lap in flight.
pub struct LapLog {
    path: PathBuf,
}

impl LapLog {
    /// One log per capture run, named after the time the run started.
    pub fn for_run(log_dir: &Path, started_at: chrono::DateTime<chrono::Local>) -> Self {
        Self::at(log_dir.join(format!("stint_{}.csv", started_at.format("%Y%m%d_%H%M%S"))))
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &LapRecord) -> Result<(), PitwallError> {
        let io_error = |e| PitwallError::LapLogIoError {
            path: self.path.display().to_string(),
            source: e,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;
        let needs_header = file.metadata().map_err(io_error)?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(record)
            .map_err(|e| PitwallError::LapLogError { source: e })?;
        writer.flush().map_err(io_error)?;

        let file = writer
            .into_inner()
            .map_err(|e| io_error(e.into_error()))?;
        file.sync_data().map_err(io_error)
    }
}

/// Read a lap log back, e.g. for offline review.
pub fn read_laps(path: &Path) -> Result<Vec<LapRecord>, PitwallError> {
    let mut reader =
        csv::Reader::from_path(path).map_err(|e| PitwallError::LapLogError { source: e })?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| PitwallError::LapLogError { source: e }))
        .collect()
}
