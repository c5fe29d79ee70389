use crate::config::StoreConfig;
use crate::models::InventoryRecord;
use crate::store::{RecordStore, StoreError};
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;
use urlencoding::encode;

const KEY_COLUMN: &str = "serialNumber";

/// PostgREST-backed record store. An upsert batch is a single request, which
/// PostgREST runs in one transaction.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    base_url: String,
    service_key: String,
    table: String,
    http: Client,
}

impl SupabaseStore {
    pub fn new(config: &StoreConfig, http: Client) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            table: config.table.clone(),
            http,
        }
    }

    fn lookup_url(&self, serial_number: &str) -> String {
        format!(
            "{}/rest/v1/{}?{}=eq.{}&select=*&limit=1",
            self.base_url,
            self.table,
            KEY_COLUMN,
            encode(serial_number)
        )
    }

    fn upsert_url(&self) -> String {
        format!(
            "{}/rest/v1/{}?on_conflict={}",
            self.base_url, self.table, KEY_COLUMN
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }
}

#[async_trait]
impl RecordStore for SupabaseStore {
    async fn get(&self, serial_number: &str) -> Result<Option<InventoryRecord>, StoreError> {
        let response = self
            .authorized(self.http.get(self.lookup_url(serial_number)))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let mut payload: Vec<InventoryRecord> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(payload.pop())
    }

    async fn upsert_batch(&self, records: &[InventoryRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let response = self
            .authorized(self.http.post(self.upsert_url()))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(records)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StoreError::Commit(format!("HTTP {status}: {detail}")));
        }
        info!(
            target: "showroom.store",
            table = %self.table,
            records = records.len(),
            "batch_upserted"
        );
        Ok(())
    }
}
