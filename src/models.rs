use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DefaultOnNull, serde_as, skip_serializing_none};
use std::collections::HashMap;
use uuid::Uuid;

/// Spreadsheet header names the sync reads.
pub mod columns {
    pub const SERIAL_NUMBER: &str = "S.N.";
    pub const NAME: &str = "Car Name";
    pub const MODEL_YEAR: &str = "Model";
    pub const CHASSIS_NUMBER: &str = "Chasis Number";
    pub const COLOR: &str = "Colour";
    pub const MILEAGE: &str = "Mileage";
    pub const ENGINE: &str = "Engine";
    pub const GRADE: &str = "Grade";
    pub const DETAILS: &str = "Details";
    pub const PRICE: &str = "Price";
    pub const STATUS: &str = "Status";
    pub const LANDING: &str = "Landing";
    pub const LOCATION: &str = "Location";
    pub const ALL_IMAGES: &str = "All Images";
}

/// One spreadsheet line keyed by header. A column the line is too short to
/// reach is absent, which is not the same as an empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    cells: HashMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.cells.insert(column.into(), value.into());
    }

    pub fn text(&self, column: &str) -> String {
        self.get(column).unwrap_or_default().to_string()
    }

    /// Trimmed business key, `None` when absent or blank.
    pub fn serial_number(&self) -> Option<&str> {
        self.get(columns::SERIAL_NUMBER)
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl<K, V> FromIterator<(K, V)> for RawRow
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            cells: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Stored documents may carry `null` for any column; those read as empty.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InventoryRecord {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub serial_number: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub name: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub model_year: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub chassis_number: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub color: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub mileage: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub engine: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub grade: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub details: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub price: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub status: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub landing: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub location: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub optimized_images: Vec<String>,
    pub last_synced: Option<DateTime<Utc>>,
}

impl InventoryRecord {
    /// Builds the persisted document for `serial_number` from the row's cells.
    pub fn from_row(
        serial_number: &str,
        row: &RawRow,
        optimized_images: Vec<String>,
        synced_at: DateTime<Utc>,
    ) -> Self {
        let price = row
            .get(columns::PRICE)
            .or_else(|| row.get(columns::LANDING))
            .unwrap_or_default()
            .to_string();
        Self {
            serial_number: serial_number.to_string(),
            name: row.text(columns::NAME),
            model_year: row.text(columns::MODEL_YEAR),
            chassis_number: row.text(columns::CHASSIS_NUMBER),
            color: row.text(columns::COLOR),
            mileage: row.text(columns::MILEAGE),
            engine: row.text(columns::ENGINE),
            grade: row.text(columns::GRADE).trim().to_string(),
            details: row.text(columns::DETAILS),
            price,
            status: row.text(columns::STATUS),
            landing: row.text(columns::LANDING),
            location: row.text(columns::LOCATION),
            optimized_images,
            last_synced: Some(synced_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounters {
    pub rows_fetched: usize,
    pub rows_missing_key: usize,
    pub duplicate_rows: usize,
    pub unique_records: usize,
    pub records_reuploaded: usize,
    pub records_carried_forward: usize,
    pub images_uploaded: usize,
    pub image_failures: usize,
    pub records_committed: usize,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub counters: SyncCounters,
    pub stages: Vec<StageReport>,
}

impl SyncReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            dry_run,
            counters: SyncCounters::default(),
            stages: Vec::new(),
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}
