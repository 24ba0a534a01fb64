use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::{Error, Result};

/// Number of LEDs on the production board.
pub const DEFAULT_NUM_LEDS: usize = 326;

/// One speed record for a hardware LED. `led_num` is 1-based; zero marks an
/// unpopulated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bincode::Encode, bincode::Decode)]
pub struct LedData {
    pub led_num: u16,
    pub speed: i8,
}

/// Outcome of offering one record to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Written,
    /// An earlier file in the chain already claimed this slot.
    AlreadySet,
    OutOfRange,
}

/// Fixed-length table indexed by `led_num - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedTable {
    entries: Vec<LedData>,
}

impl LedTable {
    pub fn new(len: usize) -> Self {
        Self {
            entries: vec![LedData::default(); len],
        }
    }

    pub fn from_entries(entries: Vec<LedData>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedData] {
        &self.entries
    }

    pub fn get(&self, led_num: u16) -> Option<&LedData> {
        let idx = usize::from(led_num).checked_sub(1)?;
        self.entries.get(idx)
    }

    /// Number of slots that hold a record.
    pub fn populated(&self) -> usize {
        self.entries.iter().filter(|e| e.led_num != 0).count()
    }

    /// Write `data` into its slot unless the slot is already claimed.
    pub fn merge_entry(&mut self, data: LedData) -> MergeOutcome {
        let Some(slot) = usize::from(data.led_num)
            .checked_sub(1)
            .and_then(|idx| self.entries.get_mut(idx))
        else {
            return MergeOutcome::OutOfRange;
        };
        if slot.led_num != 0 {
            return MergeOutcome::AlreadySet;
        }
        *slot = data;
        MergeOutcome::Written
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::North, Direction::South];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeedCategory {
    Live,
    Typical,
}

impl SpeedCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedCategory::Live => "live",
            SpeedCategory::Typical => "typical",
        }
    }

    /// File name prefix used on the data server.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            SpeedCategory::Live => "data",
            SpeedCategory::Typical => "typical",
        }
    }
}

impl fmt::Display for SpeedCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent-store key for a (direction, category) pair.
pub fn store_key(direction: Direction, category: SpeedCategory) -> &'static str {
    match (direction, category) {
        (Direction::North, SpeedCategory::Live) => "current_north",
        (Direction::South, SpeedCategory::Live) => "current_south",
        (Direction::North, SpeedCategory::Typical) => "typical_north",
        (Direction::South, SpeedCategory::Typical) => "typical_south",
    }
}

/// `<server>/current_data/<prefix>_<direction>_<version>.csv`
pub fn data_file_url(
    server: &str,
    direction: Direction,
    category: SpeedCategory,
    version: &str,
) -> String {
    format!(
        "{}/current_data/{}_{}_{}.csv",
        server.trim_end_matches('/'),
        category.file_prefix(),
        direction.as_str(),
        version
    )
}

#[derive(Debug, Default)]
struct DirectionTables {
    north: Option<LedTable>,
    south: Option<LedTable>,
}

impl DirectionTables {
    fn slot(&mut self, direction: Direction) -> &mut Option<LedTable> {
        match direction {
            Direction::North => &mut self.north,
            Direction::South => &mut self.south,
        }
    }
}

/// Latest tables shared between the refresh worker and display consumers.
/// Each category has its own lock so a live refresh never blocks readers of
/// typical data.
#[derive(Debug, Default)]
pub struct TrafficData {
    live: Mutex<DirectionTables>,
    typical: Mutex<DirectionTables>,
}

impl TrafficData {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self, category: SpeedCategory) -> &Mutex<DirectionTables> {
        match category {
            SpeedCategory::Live => &self.live,
            SpeedCategory::Typical => &self.typical,
        }
    }

    /// Replace the table for `(direction, category)` as a whole.
    pub fn update(
        &self,
        direction: Direction,
        category: SpeedCategory,
        table: LedTable,
    ) -> Result<()> {
        let mut guard = self.tables(category).lock().map_err(poisoned)?;
        *guard.slot(direction) = Some(table);
        Ok(())
    }

    /// Copy of the current table, if one has been published.
    pub fn snapshot(&self, direction: Direction, category: SpeedCategory) -> Result<Option<LedTable>> {
        let mut guard = self.tables(category).lock().map_err(poisoned)?;
        Ok(guard.slot(direction).clone())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::InvalidArgs("traffic data lock poisoned".into())
}
