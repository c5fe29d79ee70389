use crate::models::RawRow;
use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("malformed table: {0}")]
    Malformed(String),
}

/// Source of spreadsheet rows for a sync run.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SheetError>;
}

/// Published CSV export of the inventory sheet.
#[derive(Debug, Clone)]
pub struct SheetClient {
    export_url: String,
    http: Client,
}

impl SheetClient {
    pub fn new(export_url: impl Into<String>, http: Client) -> Self {
        Self {
            export_url: export_url.into(),
            http,
        }
    }
}

#[async_trait]
impl TableSource for SheetClient {
    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SheetError> {
        let response = self
            .http
            .get(&self.export_url)
            .send()
            .await
            .map_err(|err| SheetError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SheetError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| SheetError::Request(err.to_string()))?;
        let rows = parse_table(&body)?;
        info!(target: "showroom.sheet", rows = rows.len(), "sheet_parsed");
        Ok(rows)
    }
}

/// Parses CSV text whose first line is the header. Short lines leave their
/// trailing columns absent; surplus cells are ignored; blank lines are skipped.
pub fn parse_table(text: &str) -> Result<Vec<RawRow>, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| SheetError::Malformed(err.to_string()))?
        .clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(SheetError::Malformed("missing header row".into()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| SheetError::Malformed(err.to_string()))?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.trim(), cell))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}
