use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::http::errors::FetchFailureKind;
use crate::traffic::{Direction, SpeedCategory};

pub const TELEMETRY_FILE: &str = "refresh_telemetry.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPhase {
    /// Fresh data fetched from the server.
    Fetched,
    /// Fetch failed; the persisted table was served instead.
    Fallback,
    /// Fetch failed and nothing was persisted either.
    Failed,
    /// No server configured; persisted data only.
    Offline,
}

#[derive(Serialize)]
struct RefreshEntry<'a> {
    ts_ms: u128,
    event: &'static str,
    phase: RefreshPhase,
    direction: &'a str,
    category: &'a str,
    populated: usize,
    files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FetchFailureKind>,
}

/// Outcome of one refresh, as written to the telemetry log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRecord {
    pub phase: RefreshPhase,
    pub direction: Direction,
    pub category: SpeedCategory,
    pub populated: usize,
    pub files: usize,
    pub failure: Option<FetchFailureKind>,
}

/// Append-only JSON-lines log of refresh outcomes under the cache dir.
pub struct RefreshTelemetry {
    file: Mutex<File>,
}

impl RefreshTelemetry {
    pub fn open(cache_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(cache_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(cache_dir.join(TELEMETRY_FILE))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, record: &RefreshRecord) -> io::Result<()> {
        let entry = RefreshEntry {
            ts_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
            event: "refresh",
            phase: record.phase,
            direction: record.direction.as_str(),
            category: record.category.as_str(),
            populated: record.populated,
            files: record.files,
            failure: record.failure,
        };
        let line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        if let Ok(mut file) = self.file.lock() {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
