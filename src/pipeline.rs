use crate::cdn::{CloudinaryUploader, ImageUploader};
use crate::config::SyncConfig;
use crate::http::build_client;
use crate::images::{DriveLinkStyle, parse_image_field};
use crate::models::{InventoryRecord, RawRow, StageReport, SyncCounters, SyncReport, columns};
use crate::sheet::{SheetClient, TableSource};
use crate::store::RecordStore;
use crate::supabase::SupabaseStore;
use chrono::Utc;
use serde_json::{Value, json};
use std::{collections::HashSet, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_MAX_IMAGES_PER_RECORD: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_images_per_record: usize,
    pub dry_run: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_images_per_record: DEFAULT_MAX_IMAGES_PER_RECORD,
            dry_run: false,
        }
    }
}

/// One-pass reconciliation of the inventory sheet into the record store.
#[derive(Clone)]
pub struct SyncPipeline {
    source: Arc<dyn TableSource>,
    store: Arc<dyn RecordStore>,
    uploader: Arc<dyn ImageUploader>,
    settings: PipelineSettings,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn TableSource>,
        store: Arc<dyn RecordStore>,
        uploader: Arc<dyn ImageUploader>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            uploader,
            settings,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        let http = build_client(&config.http);
        Self::new(
            Arc::new(SheetClient::new(config.sheet_url.clone(), http.clone())),
            Arc::new(SupabaseStore::new(&config.store, http.clone())),
            Arc::new(CloudinaryUploader::new(config.cdn.clone(), http)),
            PipelineSettings {
                max_images_per_record: config.max_images_per_record,
                dry_run: config.dry_run,
            },
        )
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Fetch, dedupe, reconcile, commit. Any stage error aborts the run; the
    /// store is only written by the final stage.
    pub async fn run(&self) -> Result<(SyncReport, Vec<InventoryRecord>), SyncError> {
        let mut report = SyncReport::new(self.settings.dry_run);
        info!(
            target: "showroom.sync",
            run_id = %report.run_id,
            dry_run = self.settings.dry_run,
            "sync_started"
        );

        let rows = self
            .capture_stage(
                "fetch_table",
                &mut report.stages,
                stages::fetch_table(self.source.as_ref()),
            )
            .await?;
        report.counters.rows_fetched = rows.len();

        let deduped = self
            .capture_stage("dedupe_rows", &mut report.stages, async move {
                Ok::<_, SyncError>(stages::dedupe_rows(rows))
            })
            .await?;
        report.counters.rows_missing_key = deduped.missing_key;
        report.counters.duplicate_rows = deduped.duplicates;
        report.counters.unique_records = deduped.unique.len();

        let records = self
            .capture_stage(
                "reconcile_records",
                &mut report.stages,
                stages::reconcile_records(
                    self.store.as_ref(),
                    self.uploader.as_ref(),
                    &deduped.unique,
                    self.settings,
                    &mut report.counters,
                ),
            )
            .await?;

        if self.settings.dry_run {
            info!(
                target: "showroom.sync",
                run_id = %report.run_id,
                records = records.len(),
                "dry_run_skipping_commit"
            );
            return Ok((report, records));
        }

        let committed = self
            .capture_stage(
                "commit_batch",
                &mut report.stages,
                stages::commit_batch(self.store.as_ref(), &records),
            )
            .await?;
        report.counters.records_committed = committed;

        info!(
            target: "showroom.sync",
            run_id = %report.run_id,
            committed = committed,
            "sync_complete"
        );
        Ok((report, records))
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, SyncError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, SyncError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct SyncError {
    stage: &'static str,
    message: String,
    kind: SyncErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// The sheet could not be fetched or parsed.
    Source,
    /// A record lookup failed.
    Store,
    /// The final batch write was rejected.
    Commit,
}

impl SyncError {
    pub fn table(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, SyncErrorKind::Source)
    }

    pub fn lookup(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, SyncErrorKind::Store)
    }

    pub fn commit(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, SyncErrorKind::Commit)
    }

    fn new(stage: &'static str, message: impl Into<String>, kind: SyncErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> SyncErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[derive(Debug, Default)]
pub struct DedupedRows {
    /// Trimmed key and its first row, in source order.
    pub unique: Vec<(String, RawRow)>,
    pub missing_key: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    Upload,
    CarryForward,
}

/// New records always upload. Existing records re-upload only when the sheet
/// lists some images and their count differs from what is hosted; a swap at
/// the same count goes unnoticed.
pub fn decide_upload(
    existing: Option<&InventoryRecord>,
    candidate_count: usize,
) -> UploadDecision {
    match existing {
        None => UploadDecision::Upload,
        Some(record)
            if candidate_count > 0 && record.optimized_images.len() != candidate_count =>
        {
            UploadDecision::Upload
        }
        Some(_) => UploadDecision::CarryForward,
    }
}

pub mod stages {
    use super::*;

    pub async fn fetch_table(
        source: &dyn TableSource,
    ) -> Result<StageOutcome<Vec<RawRow>>, SyncError> {
        let rows = source
            .fetch_rows()
            .await
            .map_err(|err| SyncError::table("fetch_table", err.to_string()))?;
        let count = rows.len();
        Ok(StageOutcome::new(rows, json!({ "rows": count })))
    }

    pub fn dedupe_rows(rows: Vec<RawRow>) -> StageOutcome<DedupedRows> {
        let mut seen = HashSet::new();
        let mut deduped = DedupedRows::default();
        for row in rows {
            let Some(key) = row.serial_number().map(str::to_string) else {
                deduped.missing_key += 1;
                continue;
            };
            if seen.insert(key.clone()) {
                deduped.unique.push((key, row));
            } else {
                deduped.duplicates += 1;
            }
        }
        let output = json!({
            "unique": deduped.unique.len(),
            "missing_key": deduped.missing_key,
            "duplicates": deduped.duplicates,
        });
        StageOutcome::new(deduped, output)
    }

    pub async fn reconcile_records(
        store: &dyn RecordStore,
        uploader: &dyn ImageUploader,
        rows: &[(String, RawRow)],
        settings: PipelineSettings,
        counters: &mut SyncCounters,
    ) -> Result<StageOutcome<Vec<InventoryRecord>>, SyncError> {
        let mut records = Vec::with_capacity(rows.len());
        for (serial_number, row) in rows {
            let existing = store
                .get(serial_number)
                .await
                .map_err(|err| {
                    SyncError::lookup("reconcile_records", format!("{serial_number}: {err}"))
                })?;
            let candidates =
                parse_image_field(row.get(columns::ALL_IMAGES), DriveLinkStyle::Download);
            let carried = existing
                .as_ref()
                .map(|record| record.optimized_images.clone())
                .unwrap_or_default();

            let images = match decide_upload(existing.as_ref(), candidates.len()) {
                UploadDecision::CarryForward => {
                    info!(
                        target: "showroom.sync",
                        serial_number = %serial_number,
                        hosted = carried.len(),
                        "images_unchanged"
                    );
                    counters.records_carried_forward += 1;
                    carried
                }
                UploadDecision::Upload if settings.dry_run => {
                    info!(
                        target: "showroom.sync",
                        serial_number = %serial_number,
                        candidates = candidates.len(),
                        "dry_run_would_upload"
                    );
                    counters.records_reuploaded += 1;
                    carried
                }
                UploadDecision::Upload => {
                    info!(
                        target: "showroom.sync",
                        serial_number = %serial_number,
                        is_new = existing.is_none(),
                        hosted = carried.len(),
                        candidates = candidates.len(),
                        "images_resyncing"
                    );
                    counters.records_reuploaded += 1;
                    let uploaded = upload_images(
                        uploader,
                        serial_number,
                        &candidates,
                        settings.max_images_per_record,
                    )
                    .await;
                    counters.images_uploaded += uploaded.hosted.len();
                    counters.image_failures += uploaded.failures;
                    uploaded.hosted
                }
            };

            records.push(InventoryRecord::from_row(
                serial_number,
                row,
                images,
                Utc::now(),
            ));
        }

        let output = json!({
            "records": records.len(),
            "reuploaded": counters.records_reuploaded,
            "carried_forward": counters.records_carried_forward,
            "images_uploaded": counters.images_uploaded,
            "image_failures": counters.image_failures,
        });
        Ok(StageOutcome::new(records, output))
    }

    pub async fn commit_batch(
        store: &dyn RecordStore,
        records: &[InventoryRecord],
    ) -> Result<StageOutcome<usize>, SyncError> {
        store
            .upsert_batch(records)
            .await
            .map_err(|err| SyncError::commit("commit_batch", err.to_string()))?;
        Ok(StageOutcome::new(
            records.len(),
            json!({ "committed": records.len() }),
        ))
    }

    #[derive(Debug, Default)]
    pub struct UploadedImages {
        pub hosted: Vec<String>,
        pub failures: usize,
    }

    /// Uploads one image at a time, up to `cap`. Failures are logged and
    /// skipped.
    pub async fn upload_images(
        uploader: &dyn ImageUploader,
        serial_number: &str,
        candidates: &[String],
        cap: usize,
    ) -> UploadedImages {
        let mut result = UploadedImages::default();
        for (index, source) in candidates.iter().take(cap).enumerate() {
            match uploader.upload(serial_number, source, index).await {
                Ok(hosted) => {
                    crate::metrics::image_upload("ok");
                    result.hosted.push(hosted);
                }
                Err(err) => {
                    crate::metrics::image_upload("failed");
                    warn!(
                        target: "showroom.cdn",
                        serial_number = %serial_number,
                        index = index,
                        source = %source,
                        error = %err,
                        "image_upload_failed"
                    );
                    result.failures += 1;
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdn::UploadError;
    use crate::sheet::{SheetError, parse_table};
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedSource(Result<Vec<RawRow>, String>);

    #[async_trait]
    impl TableSource for FixedSource {
        async fn fetch_rows(&self) -> Result<Vec<RawRow>, SheetError> {
            self.0.clone().map_err(SheetError::Request)
        }
    }

    /// Hosts every source except those containing "fail".
    #[derive(Default)]
    struct RecordingUploader {
        calls: Mutex<Vec<(String, String, usize)>>,
    }

    impl RecordingUploader {
        fn calls(&self) -> Vec<(String, String, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageUploader for RecordingUploader {
        async fn upload(
            &self,
            serial_number: &str,
            source_url: &str,
            index: usize,
        ) -> Result<String, UploadError> {
            self.calls.lock().unwrap().push((
                serial_number.to_string(),
                source_url.to_string(),
                index,
            ));
            if source_url.contains("fail") {
                return Err(UploadError::Rejected("blocked".into()));
            }
            Ok(format!("https://cdn.test/{serial_number}/image_{index}.webp"))
        }
    }

    struct BrokenLookupStore;

    #[async_trait]
    impl RecordStore for BrokenLookupStore {
        async fn get(&self, _: &str) -> Result<Option<InventoryRecord>, StoreError> {
            Err(StoreError::Request("HTTP 503".into()))
        }

        async fn upsert_batch(&self, _: &[InventoryRecord]) -> Result<(), StoreError> {
            panic!("commit must not be reached");
        }
    }

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().copied().collect()
    }

    fn urls(n: usize) -> String {
        (0..n)
            .map(|i| format!("https://img.test/{i}.jpg"))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn hosted(key: &str, n: usize) -> InventoryRecord {
        InventoryRecord {
            serial_number: key.into(),
            optimized_images: (0..n).map(|i| format!("https://old.cdn/{key}/{i}")).collect(),
            ..Default::default()
        }
    }

    fn pipeline(
        rows: Vec<RawRow>,
        store: Arc<dyn RecordStore>,
        uploader: Arc<RecordingUploader>,
        settings: PipelineSettings,
    ) -> SyncPipeline {
        SyncPipeline::new(Arc::new(FixedSource(Ok(rows))), store, uploader, settings)
    }

    #[test]
    fn dedupe_keeps_first_and_drops_blank_keys() {
        let rows = vec![
            row(&[("S.N.", "A1"), ("Car Name", "first")]),
            row(&[("S.N.", ""), ("Car Name", "blank")]),
            row(&[("Car Name", "absent")]),
            row(&[("S.N.", " A1 "), ("Car Name", "second")]),
            row(&[("S.N.", "B2"), ("Car Name", "other")]),
        ];
        let out = stages::dedupe_rows(rows).value;
        let keys: Vec<&str> = out.unique.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["A1", "B2"]);
        assert_eq!(out.unique[0].1.get("Car Name"), Some("first"));
        assert_eq!(out.missing_key, 2);
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn upload_decision_follows_counts() {
        let existing = hosted("A1", 3);
        assert_eq!(decide_upload(None, 0), UploadDecision::Upload);
        assert_eq!(decide_upload(None, 4), UploadDecision::Upload);
        assert_eq!(
            decide_upload(Some(&existing), 3),
            UploadDecision::CarryForward
        );
        assert_eq!(decide_upload(Some(&existing), 5), UploadDecision::Upload);
        assert_eq!(
            decide_upload(Some(&existing), 0),
            UploadDecision::CarryForward
        );
    }

    #[tokio::test]
    async fn equal_counts_carry_existing_images_forward() {
        let store = Arc::new(MemoryStore::new());
        let existing = hosted("A1", 3);
        store.seed(&existing).unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let rows = vec![row(&[("S.N.", "A1"), ("All Images", urls(3).as_str())])];

        let (report, records) = pipeline(rows, store.clone(), uploader.clone(), Default::default())
            .run()
            .await
            .expect("run");

        assert!(uploader.calls().is_empty());
        assert_eq!(records[0].optimized_images, existing.optimized_images);
        let stored = store.get("A1").await.unwrap().unwrap();
        assert_eq!(stored.optimized_images, existing.optimized_images);
        assert_eq!(report.counters.records_carried_forward, 1);
    }

    #[tokio::test]
    async fn count_change_reuploads_and_skips_failures() {
        let store = Arc::new(MemoryStore::new());
        store.seed(&hosted("A1", 3)).unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let field = "https://img.test/0.jpg https://img.test/fail.jpg https://img.test/2.jpg \
                     https://img.test/3.jpg https://img.test/4.jpg";
        let rows = vec![row(&[("S.N.", "A1"), ("All Images", field)])];

        let (report, records) = pipeline(rows, store, uploader.clone(), Default::default())
            .run()
            .await
            .expect("run");

        assert_eq!(uploader.calls().len(), 5);
        assert_eq!(records[0].optimized_images.len(), 4);
        assert!(records[0].optimized_images.len() <= 5usize.min(12));
        assert_eq!(
            records[0].optimized_images[1],
            "https://cdn.test/A1/image_2.webp"
        );
        assert_eq!(report.counters.image_failures, 1);
        assert_eq!(report.counters.images_uploaded, 4);
    }

    #[tokio::test]
    async fn uploads_are_sequential_and_capped() {
        let uploader = Arc::new(RecordingUploader::default());
        let rows = vec![row(&[("S.N.", "N9"), ("All Images", urls(15).as_str())])];

        let (_, records) = pipeline(
            rows,
            Arc::new(MemoryStore::new()),
            uploader.clone(),
            Default::default(),
        )
        .run()
        .await
        .expect("run");

        let calls = uploader.calls();
        assert_eq!(calls.len(), 12);
        let indexes: Vec<usize> = calls.iter().map(|(_, _, i)| *i).collect();
        assert_eq!(indexes, (0..12).collect::<Vec<_>>());
        assert_eq!(calls[4].1, "https://img.test/4.jpg");
        assert_eq!(records[0].optimized_images.len(), 12);
    }

    #[tokio::test]
    async fn end_to_end_new_record() {
        let store = Arc::new(MemoryStore::new());
        let uploader = Arc::new(RecordingUploader::default());
        let rows = parse_table(
            "S.N.,Car Name,All Images\n\
             A1,Test,\"http://x/file/d/ID1/view, http://y?id=ID2\"\n",
        )
        .unwrap();

        let (report, records) = pipeline(rows, store.clone(), uploader.clone(), Default::default())
            .run()
            .await
            .expect("run");

        let sources: Vec<String> = uploader.calls().into_iter().map(|(_, s, _)| s).collect();
        assert_eq!(
            sources,
            vec![
                "https://drive.google.com/uc?export=download&id=ID1",
                "https://drive.google.com/uc?export=download&id=ID2",
            ]
        );
        let stored = store.get("A1").await.unwrap().expect("persisted");
        assert_eq!(stored.serial_number, "A1");
        assert_eq!(stored.name, "Test");
        assert!(stored.optimized_images.len() <= 2);
        assert!(stored.last_synced.is_some());
        assert_eq!(records.len(), 1);
        assert_eq!(
            report.stage_names(),
            vec!["fetch_table", "dedupe_rows", "reconcile_records", "commit_batch"]
        );
        assert_eq!(report.counters.records_committed, 1);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_before_lookup() {
        let pipeline = SyncPipeline::new(
            Arc::new(FixedSource(Err("HTTP 500".into()))),
            Arc::new(BrokenLookupStore),
            Arc::new(RecordingUploader::default()),
            Default::default(),
        );
        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.kind(), SyncErrorKind::Source);
        assert_eq!(err.stage(), "fetch_table");
    }

    #[tokio::test]
    async fn lookup_failure_aborts_before_commit() {
        let uploader = Arc::new(RecordingUploader::default());
        let rows = vec![row(&[("S.N.", "A1"), ("All Images", urls(1).as_str())])];
        let err = pipeline(rows, Arc::new(BrokenLookupStore), uploader.clone(), Default::default())
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SyncErrorKind::Store);
        assert!(err.detail().contains("A1"));
        assert!(uploader.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_commit_is_fatal_and_writes_nothing() {
        let store = Arc::new(MemoryStore::rejecting_commits());
        let rows = vec![row(&[("S.N.", "A1")]), row(&[("S.N.", "A2")])];
        let err = pipeline(
            rows,
            store.clone(),
            Arc::new(RecordingUploader::default()),
            Default::default(),
        )
        .run()
        .await
        .unwrap_err();
        assert_eq!(err.kind(), SyncErrorKind::Commit);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn dry_run_neither_uploads_nor_commits() {
        let store = Arc::new(MemoryStore::new());
        let uploader = Arc::new(RecordingUploader::default());
        let rows = vec![row(&[("S.N.", "A1"), ("All Images", urls(2).as_str())])];
        let settings = PipelineSettings {
            dry_run: true,
            ..Default::default()
        };

        let (report, records) = pipeline(rows, store.clone(), uploader.clone(), settings)
            .run()
            .await
            .expect("run");

        assert!(uploader.calls().is_empty());
        assert!(store.is_empty());
        assert!(records[0].optimized_images.is_empty());
        assert!(report.dry_run);
        assert_eq!(report.counters.records_reuploaded, 1);
        assert!(!report.stage_names().contains(&"commit_batch"));
    }

    #[tokio::test]
    async fn merge_preserves_fields_the_sync_does_not_own() {
        let store = Arc::new(MemoryStore::with_documents([(
            "A1".to_string(),
            json!({"serialNumber": "A1", "featured": true, "optimizedImages": []}),
        )]));
        let rows = vec![row(&[("S.N.", "A1"), ("Car Name", "Axio")])];
        pipeline(
            rows,
            store.clone(),
            Arc::new(RecordingUploader::default()),
            Default::default(),
        )
        .run()
        .await
        .expect("run");
        let doc = store.document("A1").unwrap();
        assert_eq!(doc["featured"], json!(true));
        assert_eq!(doc["name"], json!("Axio"));
    }

    #[tokio::test]
    async fn null_stored_fields_read_as_empty() {
        let store = Arc::new(MemoryStore::with_documents([(
            "A1".to_string(),
            json!({"serialNumber": "A1", "name": null, "optimizedImages": null}),
        )]));
        let uploader = Arc::new(RecordingUploader::default());
        let rows = vec![row(&[
            ("S.N.", "A1"),
            ("Car Name", "Axio"),
            ("All Images", urls(1).as_str()),
        ])];

        let (report, _) = pipeline(rows, store.clone(), uploader.clone(), Default::default())
            .run()
            .await
            .expect("run");

        assert_eq!(uploader.calls().len(), 1);
        assert_eq!(report.counters.records_reuploaded, 1);
        let stored = store.get("A1").await.unwrap().expect("persisted");
        assert_eq!(stored.name, "Axio");
        assert_eq!(
            stored.optimized_images,
            vec!["https://cdn.test/A1/image_0.webp"]
        );
    }
}
