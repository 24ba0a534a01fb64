use std::sync::Arc;

use crate::addendum::{fetch_and_merge, FetchOptions, MergeStats, DEFAULT_FIRST_ADDENDUM};
use crate::app::Logger;
use crate::error_state::ErrorState;
use crate::http::errors::classify_error;
use crate::http::HttpClient;
use crate::store::{load_table, save_table, PersistentStore};
use crate::telemetry::{RefreshPhase, RefreshRecord, RefreshTelemetry};
use crate::traffic::{
    data_file_url, store_key, Direction, LedTable, SpeedCategory, TrafficData, DEFAULT_NUM_LEDS,
};
use crate::{Error, Result};

pub const DEFAULT_DATA_VERSION: &str = "V1_0_5";

/// Order tables are loaded at startup: baselines before live data.
pub const INIT_ORDER: [(Direction, SpeedCategory); 4] = [
    (Direction::North, SpeedCategory::Typical),
    (Direction::South, SpeedCategory::Typical),
    (Direction::North, SpeedCategory::Live),
    (Direction::South, SpeedCategory::Live),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSettings {
    /// `None` means no network endpoint: serve persisted tables only.
    pub server_url: Option<String>,
    pub data_version: String,
    pub first_addendum: String,
    pub num_leds: usize,
    pub fetch: FetchOptions,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            data_version: DEFAULT_DATA_VERSION.to_string(),
            first_addendum: DEFAULT_FIRST_ADDENDUM.to_string(),
            num_leds: DEFAULT_NUM_LEDS,
            fetch: FetchOptions::default(),
        }
    }
}

/// Fetches, persists and falls back for one (direction, category) at a time.
pub struct Refresher {
    settings: RefreshSettings,
    client: Box<dyn HttpClient + Send>,
    store: Box<dyn PersistentStore>,
    errors: Arc<ErrorState>,
    logger: Arc<Logger>,
    telemetry: Option<RefreshTelemetry>,
}

impl Refresher {
    pub fn new(
        settings: RefreshSettings,
        client: Box<dyn HttpClient + Send>,
        store: Box<dyn PersistentStore>,
        errors: Arc<ErrorState>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            settings,
            client,
            store,
            errors,
            logger,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: RefreshTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Produce the table to display for `(direction, category)`.
    ///
    /// A successful fetch is persisted and clears the connectivity error. A
    /// failed fetch raises it and serves the last persisted table instead.
    /// Only when neither source has a table is an error returned.
    pub fn refresh(&mut self, direction: Direction, category: SpeedCategory) -> Result<LedTable> {
        let key = store_key(direction, category);
        let Some(server) = self.settings.server_url.clone() else {
            let table = self.load_persisted(key)?;
            self.record(RefreshPhase::Offline, direction, category, Some(&table), None, None);
            return Ok(table);
        };

        let url = data_file_url(&server, direction, category, &self.settings.data_version);
        let mut table = LedTable::new(self.settings.num_leds);
        let fetched = fetch_and_merge(
            self.client.as_mut(),
            &mut table,
            &url,
            &self.settings.first_addendum,
            &self.settings.fetch,
            &self.logger,
        );

        match fetched {
            Ok(stats) => {
                if let Err(err) = save_table(self.store.as_mut(), key, &table) {
                    self.logger.warn(format!("persist {key} failed: {err}"));
                }
                self.errors.resolve_no_connection(true);
                self.logger.info(format!(
                    "refreshed {category} {direction}: {} leds from {} file(s)",
                    table.populated(),
                    stats.files
                ));
                self.record(RefreshPhase::Fetched, direction, category, Some(&table), Some(stats), None);
                Ok(table)
            }
            Err(err) => {
                self.logger
                    .warn(format!("fetch {category} {direction} from {url} failed: {err}"));
                self.errors.raise_no_connection();
                match self.load_persisted(key) {
                    Ok(table) => {
                        self.record(
                            RefreshPhase::Fallback,
                            direction,
                            category,
                            Some(&table),
                            None,
                            Some(&err),
                        );
                        Ok(table)
                    }
                    Err(load_err) => {
                        self.logger
                            .warn(format!("no fallback for {key}: {load_err}"));
                        self.record(RefreshPhase::Failed, direction, category, None, None, Some(&err));
                        Err(err)
                    }
                }
            }
        }
    }

    /// Refresh and publish into `data`. Returns whether a table was published.
    pub fn refresh_into(
        &mut self,
        data: &TrafficData,
        direction: Direction,
        category: SpeedCategory,
    ) -> Result<bool> {
        match self.refresh(direction, category) {
            Ok(table) => {
                data.update(direction, category, table)?;
                Ok(true)
            }
            Err(err) => {
                self.logger.warn(format!(
                    "no {category} {direction} table available: {err}"
                ));
                Ok(false)
            }
        }
    }

    /// Load every table in [`INIT_ORDER`]. Returns the pairs left without a
    /// table.
    pub fn init_tables(&mut self, data: &TrafficData) -> Result<Vec<(Direction, SpeedCategory)>> {
        let mut missing = Vec::new();
        for (direction, category) in INIT_ORDER {
            if !self.refresh_into(data, direction, category)? {
                missing.push((direction, category));
            }
        }
        Ok(missing)
    }

    fn load_persisted(&self, key: &str) -> Result<LedTable> {
        load_table(self.store.as_ref(), key, self.settings.num_leds)?
            .ok_or_else(|| Error::Store(format!("nothing persisted under '{key}'")))
    }

    fn record(
        &self,
        phase: RefreshPhase,
        direction: Direction,
        category: SpeedCategory,
        table: Option<&LedTable>,
        stats: Option<MergeStats>,
        failure: Option<&Error>,
    ) {
        let Some(telemetry) = self.telemetry.as_ref() else {
            return;
        };
        let record = RefreshRecord {
            phase,
            direction,
            category,
            populated: table.map(LedTable::populated).unwrap_or(0),
            files: stats.map(|s| s.files).unwrap_or(0),
            failure: failure.map(classify_error),
        };
        if let Err(err) = telemetry.record(&record) {
            self.logger.debug(format!("telemetry write failed: {err}"));
        }
    }
}
