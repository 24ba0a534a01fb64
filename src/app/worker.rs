use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};

use super::lifecycle::sleep_while_running;
use super::Logger;
use crate::error_state::ErrorState;
use crate::refresh::{Refresher, INIT_ORDER};
use crate::traffic::{Direction, SpeedCategory, TrafficData};
use crate::Result;

const STOP_TICK: Duration = Duration::from_millis(100);

/// How often each category is refetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub live: Duration,
    pub typical: Duration,
}

/// Reports sent from the refresh worker to the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    Updated {
        direction: Direction,
        category: SpeedCategory,
        populated: usize,
    },
    Unavailable {
        direction: Direction,
        category: SpeedCategory,
    },
}

/// Guard that keeps the refresh worker alive until stopped or dropped.
///
/// The thread is never joined: a worker halted by a fatal error never
/// finishes.
pub struct RefreshWorker {
    receiver: Receiver<RefreshEvent>,
    running: Arc<AtomicBool>,
}

impl RefreshWorker {
    pub fn receiver(&self) -> &Receiver<RefreshEvent> {
        &self.receiver
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Spawn the worker that owns `refresher`: it loads every table once, then
/// refreshes each category on its own interval.
///
/// The worker is the only owner of the handleable flag: it is raised while
/// any (direction, category) has no table at all and resolved once every
/// pair has one again.
pub fn start_refresh_worker(
    refresher: Refresher,
    data: Arc<TrafficData>,
    errors: Arc<ErrorState>,
    schedule: RefreshSchedule,
    logger: Arc<Logger>,
) -> Result<RefreshWorker> {
    let (tx, rx) = channel::unbounded();
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    thread::Builder::new()
        .name("trafficflow-refresh".into())
        .spawn(move || {
            let mut worker = Worker {
                refresher,
                data,
                errors,
                logger,
                events: tx,
                missing: HashSet::new(),
                handleable: false,
            };
            worker.run(schedule, &running_clone);
        })?;
    Ok(RefreshWorker {
        receiver: rx,
        running,
    })
}

struct Worker {
    refresher: Refresher,
    data: Arc<TrafficData>,
    errors: Arc<ErrorState>,
    logger: Arc<Logger>,
    events: Sender<RefreshEvent>,
    missing: HashSet<(Direction, SpeedCategory)>,
    handleable: bool,
}

impl Worker {
    fn run(&mut self, schedule: RefreshSchedule, running: &AtomicBool) {
        for (direction, category) in INIT_ORDER {
            self.refresh_one(direction, category);
        }
        self.sync_handleable();

        let start = Instant::now();
        let mut next_typical = start + schedule.typical;
        let mut next_live = start + schedule.live;
        loop {
            let wait = next_typical
                .min(next_live)
                .saturating_duration_since(Instant::now());
            if !sleep_while_running(running, wait, STOP_TICK) {
                break;
            }

            let now = Instant::now();
            if now >= next_typical {
                self.refresh_category(SpeedCategory::Typical);
                next_typical = now + schedule.typical;
            }
            if now >= next_live {
                self.refresh_category(SpeedCategory::Live);
                next_live = now + schedule.live;
            }
            self.sync_handleable();
        }
        self.logger.debug("refresh worker stopped");
    }

    fn refresh_category(&mut self, category: SpeedCategory) {
        for direction in Direction::ALL {
            self.refresh_one(direction, category);
        }
    }

    fn refresh_one(&mut self, direction: Direction, category: SpeedCategory) {
        let event = match self.refresher.refresh(direction, category) {
            Ok(table) => {
                let populated = table.populated();
                if let Err(err) = self.data.update(direction, category, table) {
                    self.errors.raise_fatal(&format!("publish {category} {direction}: {err}"));
                }
                self.missing.remove(&(direction, category));
                RefreshEvent::Updated {
                    direction,
                    category,
                    populated,
                }
            }
            Err(err) => {
                self.logger
                    .warn(format!("{category} {direction} unavailable: {err}"));
                self.missing.insert((direction, category));
                RefreshEvent::Unavailable {
                    direction,
                    category,
                }
            }
        };
        // The main loop may already be gone during shutdown.
        let _ = self.events.send(event);
    }

    fn sync_handleable(&mut self) {
        if !self.missing.is_empty() && !self.handleable {
            self.logger.warn(format!(
                "{} table(s) have no data from server or store",
                self.missing.len()
            ));
            self.errors.raise_handleable();
            self.handleable = true;
        } else if self.missing.is_empty() && self.handleable {
            self.errors.resolve_handleable(false);
            self.handleable = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addendum::{first_addendum_url, DEFAULT_FIRST_ADDENDUM};
    use crate::app::LogLevel;
    use crate::error_state::ErrorKind;
    use crate::http::{FakeEndpoint, FakeHttpClient};
    use crate::indicator::RecordingIndicator;
    use crate::refresh::{RefreshSettings, DEFAULT_DATA_VERSION};
    use crate::store::MemoryStore;
    use crate::traffic::data_file_url;

    fn endpoint_url(direction: Direction, category: SpeedCategory) -> String {
        first_addendum_url(
            &data_file_url("http://h", direction, category, DEFAULT_DATA_VERSION),
            DEFAULT_FIRST_ADDENDUM,
        )
    }

    fn spawn(client: FakeHttpClient) -> (RefreshWorker, Arc<TrafficData>, Arc<ErrorState>) {
        let logger = Arc::new(Logger::new(LogLevel::Error, None));
        let errors = Arc::new(ErrorState::new(
            Box::new(RecordingIndicator::new()),
            Duration::from_millis(50),
            logger.clone(),
        ));
        let settings = RefreshSettings {
            server_url: Some("http://h".into()),
            num_leds: 8,
            ..RefreshSettings::default()
        };
        let refresher = Refresher::new(
            settings,
            Box::new(client),
            Box::new(MemoryStore::new()),
            errors.clone(),
            logger.clone(),
        );
        let data = Arc::new(TrafficData::new());
        let schedule = RefreshSchedule {
            live: Duration::from_secs(3600),
            typical: Duration::from_secs(3600),
        };
        let worker =
            start_refresh_worker(refresher, data.clone(), errors.clone(), schedule, logger)
                .unwrap();
        (worker, data, errors)
    }

    fn collect(worker: &RefreshWorker, count: usize) -> Vec<RefreshEvent> {
        (0..count)
            .map(|_| {
                worker
                    .receiver()
                    .recv_timeout(Duration::from_secs(5))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn initial_load_publishes_every_table() {
        let mut client = FakeHttpClient::new();
        for (direction, category) in INIT_ORDER {
            client.set_endpoint(&endpoint_url(direction, category), FakeEndpoint::ok("1,40\n2,41\n"));
        }
        let (worker, data, errors) = spawn(client);

        let events = collect(&worker, 4);
        assert_eq!(
            events[0],
            RefreshEvent::Updated {
                direction: Direction::North,
                category: SpeedCategory::Typical,
                populated: 2
            }
        );
        assert!(events
            .iter()
            .all(|e| matches!(e, RefreshEvent::Updated { populated: 2, .. })));
        let table = data
            .snapshot(Direction::South, SpeedCategory::Live)
            .unwrap()
            .unwrap();
        assert_eq!(table.get(2).unwrap().speed, 41);
        assert_eq!(errors.current(), ErrorKind::NoError);
        worker.stop();
    }

    #[test]
    fn missing_tables_raise_handleable() {
        let client = FakeHttpClient::new().with_endpoint(
            &endpoint_url(Direction::North, SpeedCategory::Typical),
            FakeEndpoint::ok("1,40\n"),
        );
        let (worker, _, errors) = spawn(client);

        let events = collect(&worker, 4);
        assert!(matches!(events[0], RefreshEvent::Updated { .. }));
        assert!(matches!(events[3], RefreshEvent::Unavailable { .. }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while errors.current() != ErrorKind::HandleableAndNoServerConnection {
            assert!(Instant::now() < deadline, "handleable never raised");
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
    }
}
