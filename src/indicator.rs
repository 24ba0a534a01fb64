use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::app::Logger;

pub const DEFAULT_FLASH_PERIOD: Duration = Duration::from_millis(500);

/// The single status light shared by every worker.
pub trait Indicator: Send {
    fn set_steady(&mut self, on: bool);
    fn start_flashing(&mut self, period: Duration);
    fn stop_flashing(&mut self);
    fn is_flashing(&self) -> bool;
}

struct Flasher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives an LED through a sysfs-style brightness file (`1`/`0`).
pub struct LedFileIndicator {
    path: PathBuf,
    flasher: Option<Flasher>,
}

impl LedFileIndicator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flasher: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_level(path: &Path, on: bool) {
    let _ = fs::write(path, if on { "1" } else { "0" });
}

impl Indicator for LedFileIndicator {
    fn set_steady(&mut self, on: bool) {
        write_level(&self.path, on);
    }

    fn start_flashing(&mut self, period: Duration) {
        if self.flasher.is_some() {
            return;
        }
        let (stop, stopped) = channel::bounded::<()>(0);
        let path = self.path.clone();
        let spawned = thread::Builder::new()
            .name("trafficflow-flasher".into())
            .spawn(move || {
                let mut on = true;
                loop {
                    write_level(&path, on);
                    on = !on;
                    match stopped.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            });
        match spawned {
            Ok(handle) => self.flasher = Some(Flasher { stop, handle }),
            // No flasher thread available; a steady light still signals trouble.
            Err(_) => write_level(&self.path, true),
        }
    }

    fn stop_flashing(&mut self) {
        if let Some(flasher) = self.flasher.take() {
            drop(flasher.stop);
            let _ = flasher.handle.join();
        }
    }

    fn is_flashing(&self) -> bool {
        self.flasher.is_some()
    }
}

impl Drop for LedFileIndicator {
    fn drop(&mut self) {
        self.stop_flashing();
    }
}

/// Indicator for hosts without a status LED: state changes go to the log.
pub struct LogIndicator {
    logger: Arc<Logger>,
    flashing: bool,
}

impl LogIndicator {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            logger,
            flashing: false,
        }
    }
}

impl Indicator for LogIndicator {
    fn set_steady(&mut self, on: bool) {
        self.logger
            .debug(format!("indicator {}", if on { "on" } else { "off" }));
    }

    fn start_flashing(&mut self, period: Duration) {
        if !self.flashing {
            self.flashing = true;
            self.logger
                .debug(format!("indicator flashing every {}ms", period.as_millis()));
        }
    }

    fn stop_flashing(&mut self) {
        if self.flashing {
            self.flashing = false;
            self.logger.debug("indicator flashing stopped");
        }
    }

    fn is_flashing(&self) -> bool {
        self.flashing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorEvent {
    Steady(bool),
    StartFlashing(Duration),
    StopFlashing,
}

/// Test indicator that records every call; clones share one event log.
#[derive(Clone, Default)]
pub struct RecordingIndicator {
    events: Arc<Mutex<Vec<IndicatorEvent>>>,
    flashing: Arc<Mutex<bool>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IndicatorEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn push(&self, event: IndicatorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn set_flashing(&self, value: bool) {
        if let Ok(mut flashing) = self.flashing.lock() {
            *flashing = value;
        }
    }
}

impl Indicator for RecordingIndicator {
    fn set_steady(&mut self, on: bool) {
        self.push(IndicatorEvent::Steady(on));
    }

    fn start_flashing(&mut self, period: Duration) {
        self.set_flashing(true);
        self.push(IndicatorEvent::StartFlashing(period));
    }

    fn stop_flashing(&mut self) {
        self.set_flashing(false);
        self.push(IndicatorEvent::StopFlashing);
    }

    fn is_flashing(&self) -> bool {
        self.flashing.lock().map(|f| *f).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_file_indicator_writes_levels_and_flashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brightness");
        let mut led = LedFileIndicator::new(&path);

        led.set_steady(true);
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");

        led.start_flashing(Duration::from_millis(5));
        assert!(led.is_flashing());
        thread::sleep(Duration::from_millis(30));
        led.stop_flashing();
        assert!(!led.is_flashing());

        led.set_steady(false);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn recording_indicator_shares_log_between_clones() {
        let recorder = RecordingIndicator::new();
        let mut boxed: Box<dyn Indicator> = Box::new(recorder.clone());
        boxed.start_flashing(DEFAULT_FLASH_PERIOD);
        assert!(recorder.is_flashing());
        boxed.stop_flashing();
        boxed.set_steady(false);
        assert_eq!(
            recorder.events(),
            vec![
                IndicatorEvent::StartFlashing(DEFAULT_FLASH_PERIOD),
                IndicatorEvent::StopFlashing,
                IndicatorEvent::Steady(false),
            ]
        );
    }
}
