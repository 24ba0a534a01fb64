use crate::{
    addendum::FetchOptions,
    cli::RunOptions,
    config::Config,
    error_state::{ErrorKind, ErrorState},
    http::TcpHttpClient,
    indicator::{Indicator, LedFileIndicator, LogIndicator},
    refresh::{RefreshSettings, Refresher},
    store::FileStore,
    telemetry::RefreshTelemetry,
    traffic::TrafficData,
    Result,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

mod lifecycle;
mod logger;
pub mod worker;

pub use logger::{LogLevel, Logger};
use worker::{start_refresh_worker, RefreshEvent, RefreshSchedule};

const EVENT_POLL: Duration = Duration::from_millis(250);

/// Config for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub refresh: RefreshSettings,
    pub schedule: RefreshSchedule,
    pub error_flash: Duration,
    pub indicator_path: Option<String>,
    pub store_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
    pub once: bool,
}

impl AppConfig {
    pub fn from_sources(config: Config, opts: RunOptions) -> Result<Self> {
        let server_url = if opts.offline {
            None
        } else {
            opts.server.or_else(|| config.server_url.clone())
        };
        let merged = Config {
            server_url,
            device_id: opts.device_id.or_else(|| config.device_id.clone()),
            ..config
        };
        crate::config::validate(&merged)?;

        Ok(Self {
            store_dir: merged.resolved_store_dir()?,
            cache_dir: merged.resolved_cache_dir()?,
            refresh: RefreshSettings {
                server_url: merged.server_url,
                data_version: merged.data_version,
                first_addendum: merged.first_addendum,
                num_leds: merged.num_leds,
                fetch: FetchOptions {
                    block_size: merged.block_size,
                    attempts: merged.retry_count,
                    device_id: merged.device_id,
                    ..FetchOptions::default()
                },
            },
            schedule: RefreshSchedule {
                live: merged.live_refresh,
                typical: merged.typical_refresh,
            },
            error_flash: Duration::from_millis(merged.error_flash_ms),
            indicator_path: merged.indicator_path,
            log_level: opts
                .log_level
                .as_deref()
                .and_then(|s| LogLevel::from_str(s).ok())
                .unwrap_or_default(),
            log_file: opts.log_file,
            once: opts.once,
        })
    }
}

pub struct App {
    config: AppConfig,
    logger: Arc<Logger>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let logger = Arc::new(Logger::new(config.log_level, config.log_file.clone()));
        Self { config, logger }
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = match opts.config_path.as_deref() {
            Some(path) => Config::load_from_path(Path::new(path))?,
            None => Config::load_or_default()?,
        };
        let merged = AppConfig::from_sources(cfg_file, opts)?;
        Ok(Self::new(merged))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Build the refresh pipeline around the shared error state.
    pub fn build_refresher(&self, errors: Arc<ErrorState>) -> Refresher {
        let refresher = Refresher::new(
            self.config.refresh.clone(),
            Box::new(TcpHttpClient::default()),
            Box::new(FileStore::new(&self.config.store_dir)),
            errors,
            self.logger.clone(),
        );
        match RefreshTelemetry::open(&self.config.cache_dir) {
            Ok(telemetry) => refresher.with_telemetry(telemetry),
            Err(err) => {
                self.logger.warn(format!(
                    "telemetry disabled ({}): {err}",
                    self.config.cache_dir.display()
                ));
                refresher
            }
        }
    }

    fn build_error_state(&self) -> Arc<ErrorState> {
        let indicator: Box<dyn Indicator> = match &self.config.indicator_path {
            Some(path) => Box::new(LedFileIndicator::new(path)),
            None => Box::new(LogIndicator::new(self.logger.clone())),
        };
        Arc::new(ErrorState::new(
            indicator,
            self.config.error_flash,
            self.logger.clone(),
        ))
    }

    /// Entry point for the daemon.
    pub fn run(&self) -> Result<()> {
        let errors = self.build_error_state();
        let data = Arc::new(TrafficData::new());
        let refresher = self.build_refresher(errors.clone());
        self.logger.info(format!(
            "trafficflow start (server={}, leds={}, store={})",
            self.config.refresh.server_url.as_deref().unwrap_or("offline"),
            self.config.refresh.num_leds,
            self.config.store_dir.display()
        ));

        if self.config.once {
            return self.run_once(refresher, &data);
        }

        let running = lifecycle::create_shutdown_flag()?;
        let worker = start_refresh_worker(
            refresher,
            data,
            errors.clone(),
            self.config.schedule,
            self.logger.clone(),
        )?;

        let mut halted = false;
        while running.load(Ordering::SeqCst) {
            if let Ok(event) = worker.receiver().recv_timeout(EVENT_POLL) {
                if !halted {
                    self.log_event(&event);
                }
            }
            if !halted && errors.current() == ErrorKind::Fatal {
                self.logger
                    .error("fatal error: refreshing halted until restart");
                halted = true;
            }
        }

        worker.stop();
        self.logger.info("shutdown requested; exiting");
        Ok(())
    }

    fn run_once(&self, mut refresher: Refresher, data: &TrafficData) -> Result<()> {
        let missing = refresher.init_tables(data)?;
        for (direction, category) in &missing {
            self.logger
                .warn(format!("no {category} {direction} table available"));
        }
        self.logger.info(format!(
            "loaded {} of 4 tables",
            4 - missing.len()
        ));
        Ok(())
    }

    fn log_event(&self, event: &RefreshEvent) {
        match event {
            RefreshEvent::Updated {
                direction,
                category,
                populated,
            } => self.logger.debug(format!(
                "{category} {direction} table updated ({populated} leds)"
            )),
            RefreshEvent::Unavailable {
                direction,
                category,
            } => self
                .logger
                .warn(format!("{category} {direction} table unavailable")),
        }
    }
}
