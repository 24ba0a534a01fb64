use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const LEVEL_ENV: &str = "TRAFFICFLOW_LOG_LEVEL";
const PATH_ENV: &str = "TRAFFICFLOW_LOG_PATH";

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl FromStr for LogLevel {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

/// Level-filtered stderr logger with an optional append-only file sink.
///
/// Shared between the main loop and the refresh worker behind an `Arc`;
/// each line carries the emitting thread's name.
pub struct Logger {
    level: LogLevel,
    file: Option<Mutex<File>>,
}

impl Logger {
    /// `TRAFFICFLOW_LOG_LEVEL` and `TRAFFICFLOW_LOG_PATH` override the
    /// arguments when set.
    pub fn new(level: LogLevel, file_path: Option<String>) -> Self {
        let effective_level = std::env::var(LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::from_str(&s).ok())
            .unwrap_or(level);

        let path = std::env::var(PATH_ENV).ok().or(file_path);
        let file = path.and_then(|p| {
            match OpenOptions::new().create(true).append(true).open(&p) {
                Ok(file) => Some(Mutex::new(file)),
                Err(err) => {
                    eprintln!("log file {p} unavailable: {err}");
                    None
                }
            }
        });
        Self {
            level: effective_level,
            file,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: LogLevel, msg: impl AsRef<str>) {
        if !self.enabled(level) {
            return;
        }
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let current = std::thread::current();
        let thread = current.name().unwrap_or("-");
        let line = format!("[{ts:.3}] [{level:?}] [{thread}] {}", msg.as_ref());
        eprintln!("{line}");
        if let Some(file) = self.file.as_ref() {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{line}");
            }
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Error, msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Debug, msg);
    }

    pub fn trace(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Trace, msg);
    }
}
