use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{Duration, SubsecRound, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Error,
    events::{Event, EventBus},
    repositories::WatermarkRepository,
    storage::{SyncWatermark, env_parse},
    sync::{
        FieldTypeMap, Row, RowFailure, RowTransformer, SyncMode, SyncReport, TableReport,
        TableSource, Warehouse,
    },
    validation::validate_table_name,
};

/// Tables that hold credentials or bookkeeping and never leave the database.
pub const INTERNAL_TABLES: &[&str] = &[
    "_aula_migrations",
    "sqlite_sequence",
    "users",
    "passwords",
    "sessions",
    "recovery_codes",
    "failed_login_attempts",
    "login_blocks",
    "audit_events",
    "sync_watermarks",
];

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    /// Pause between truncating a warehouse table and writing to it again.
    pub truncate_settle_delay: StdDuration,
    pub watermark_ttl: Duration,
    pub field_types: FieldTypeMap,
    pub excluded_tables: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            truncate_settle_delay: StdDuration::from_secs(10),
            watermark_ttl: Duration::days(7),
            field_types: FieldTypeMap::default(),
            excluded_tables: INTERNAL_TABLES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Self::default();
        Ok(Self {
            batch_size: env_parse("AULA_SYNC_BATCH_SIZE").unwrap_or(defaults.batch_size),
            truncate_settle_delay: env_parse("AULA_SYNC_SETTLE_SECONDS")
                .map(StdDuration::from_secs)
                .unwrap_or(defaults.truncate_settle_delay),
            watermark_ttl: env_parse("AULA_SYNC_WATERMARK_TTL_DAYS")
                .map(Duration::days)
                .unwrap_or(defaults.watermark_ttl),
            field_types: FieldTypeMap::from_env()?,
            excluded_tables: defaults.excluded_tables,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_truncate_settle_delay(mut self, delay: StdDuration) -> Self {
        self.truncate_settle_delay = delay;
        self
    }

    pub fn with_watermark_ttl(mut self, ttl: Duration) -> Self {
        self.watermark_ttl = ttl;
        self
    }

    pub fn with_field_types(mut self, field_types: FieldTypeMap) -> Self {
        self.field_types = field_types;
        self
    }

    pub fn exclude(mut self, table: &str) -> Self {
        self.excluded_tables.push(table.to_string());
        self
    }

    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables.iter().any(|t| t == table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Tables to synchronize. Empty means every non-internal table of the source.
    pub tables: Vec<String>,
    /// Empty each warehouse table before writing to it.
    pub truncate: bool,
}

impl SyncOptions {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            tables: Vec::new(),
            truncate: false,
        }
    }

    pub fn full() -> Self {
        Self::new(SyncMode::Full)
    }

    pub fn incremental() -> Self {
        Self::new(SyncMode::Incremental)
    }

    pub fn with_tables<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::full()
    }
}

/// One lock per table name. Clones share the same locks, so every
/// synchronizer built with the same handle serializes runs on a table.
#[derive(Clone, Default)]
pub struct TableLocks(Arc<DashMap<String, Arc<Mutex<()>>>>);

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self, table: &str) -> OwnedMutexGuard<()> {
        let lock = self.0.entry(table.to_string()).or_default().clone();
        match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(table = %table, "Table sync already running, waiting");
                lock.lock_owned().await
            }
        }
    }
}

/// Pushes source tables into a warehouse.
///
/// Runs touching the same table are serialized; different tables may be
/// synchronized concurrently.
pub struct TableSynchronizer<S: TableSource, W: Warehouse, M: WatermarkRepository> {
    source: Arc<S>,
    warehouse: Arc<W>,
    watermarks: Arc<M>,
    config: SyncConfig,
    locks: TableLocks,
    event_bus: Option<EventBus>,
}

impl<S: TableSource, W: Warehouse, M: WatermarkRepository> TableSynchronizer<S, W, M> {
    pub fn new(source: Arc<S>, warehouse: Arc<W>, watermarks: Arc<M>, config: SyncConfig) -> Self {
        Self {
            source,
            warehouse,
            watermarks,
            config,
            locks: TableLocks::new(),
            event_bus: None,
        }
    }

    /// Share table locks with other synchronizers.
    pub fn with_locks(mut self, locks: TableLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronize the requested tables one after another.
    ///
    /// Never fails: every problem is recorded in the report and the job moves
    /// on to the next table.
    pub async fn run(&self, options: &SyncOptions) -> SyncReport {
        let mut report = SyncReport::new(options.mode);

        let tables = if options.tables.is_empty() {
            match self.source.list_tables().await {
                Ok(tables) => tables
                    .into_iter()
                    .filter(|t| !self.config.is_excluded(t))
                    .collect(),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list source tables");
                    report.errors.push(format!("cannot list tables: {e}"));
                    Vec::new()
                }
            }
        } else {
            options.tables.clone()
        };

        tracing::info!(
            mode = %options.mode,
            tables = tables.len(),
            truncate = options.truncate,
            "Starting table sync"
        );

        for table in &tables {
            let table_report = self.sync_table(table, options.mode, options.truncate).await;
            report.tables.push(table_report);
        }

        report.finished_at = Utc::now();
        tracing::info!(
            synced = report.total_synced(),
            tables = report.tables.len(),
            has_errors = report.has_errors(),
            "Table sync finished"
        );
        report
    }

    pub async fn sync_table(&self, table: &str, mode: SyncMode, truncate: bool) -> TableReport {
        let report = TableReport::new(table);
        if let Err(e) = validate_table_name(table) {
            return report.skip(e.to_string());
        }
        if self.config.is_excluded(table) {
            return report.skip("internal table is never synchronized");
        }

        let _guard = self.locks.acquire(table).await;

        let report = self.sync_locked(table, mode, truncate, report).await;

        if report.skipped {
            tracing::error!(table = %table, errors = ?report.errors, "Table skipped");
        } else {
            tracing::info!(
                table = %table,
                mode = %mode,
                synced = report.synced_count,
                errors = report.errors.len(),
                watermark_advanced = report.watermark_advanced,
                "Table synced"
            );
            self.emit(Event::TableSynced {
                table: table.to_string(),
                mode,
                synced_count: report.synced_count,
                errors: report.errors.len(),
                timestamp: Utc::now(),
            })
            .await;
        }

        report
    }

    async fn sync_locked(
        &self,
        table: &str,
        mode: SyncMode,
        truncate: bool,
        mut report: TableReport,
    ) -> TableReport {
        // Rows changed while this run is in flight are picked up by the next one.
        // Whole seconds; sources compare at second precision.
        let started_at = Utc::now().trunc_subsecs(0);

        // An incremental load into an emptied table would lose every older row.
        let fetch_mode = if truncate { SyncMode::Full } else { mode };
        let rows = match self.fetch(table, fetch_mode).await {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                tracing::warn!(table = %table, "No change-tracking column, nothing pushed");
                report.notes.push(
                    "no updated_at or created_at column: incremental runs push nothing, \
                     use a full sync with truncate to refresh"
                        .to_string(),
                );
                Vec::new()
            }
            Err(e) => return report.skip(format!("cannot read source table: {e}")),
        };

        if truncate {
            if let Err(e) = self.warehouse.truncate(table).await {
                return report.skip(format!("cannot truncate warehouse table: {e}"));
            }
            tokio::time::sleep(self.config.truncate_settle_delay).await;
        }

        let transformer = RowTransformer::new(table, &self.config.field_types);
        let mut transformed = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            match transformer.transform(row) {
                Ok(row) => transformed.push(row),
                Err(e) => {
                    tracing::warn!(table = %table, row = %row_label(row, index), error = %e, "Malformed row");
                    report.errors.push(format!("row {}: {e}", row_label(row, index)));
                }
            }
        }

        let mut complete = true;
        if !transformed.is_empty() {
            let schema = match transformer.infer_schema(&transformed) {
                Ok(schema) => schema,
                Err(e) => return report.skip(format!("cannot derive table schema: {e}")),
            };
            if let Err(e) = self.warehouse.ensure_table(table, &schema).await {
                return report.skip(format!("cannot prepare warehouse table: {e}"));
            }
            complete = self.push_batches(table, &transformed, &mut report).await;
        }

        if complete {
            let watermark = SyncWatermark::new(table, started_at, self.config.watermark_ttl);
            match self.watermarks.set(&watermark).await {
                Ok(()) => report.watermark_advanced = true,
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "Failed to save sync watermark");
                    report.errors.push(format!("watermark not saved: {e}"));
                }
            }
        }

        report
    }

    /// `None` when an incremental read is impossible because the table has no
    /// change-tracking column.
    async fn fetch(&self, table: &str, mode: SyncMode) -> Result<Option<Vec<Row>>, Error> {
        if mode == SyncMode::Incremental {
            if let Some(watermark) = self.watermarks.get(table).await? {
                tracing::debug!(
                    table = %table,
                    since = %watermark.last_synced_at,
                    "Fetching rows changed since watermark"
                );
                return self
                    .source
                    .fetch_changed_since(table, watermark.last_synced_at)
                    .await;
            }
            tracing::info!(table = %table, "No sync watermark, falling back to a full sync");
        }
        self.source.fetch_all(table).await.map(Some)
    }

    /// Push rows in batches. Returns false if any batch request failed outright.
    async fn push_batches(&self, table: &str, rows: &[Row], report: &mut TableReport) -> bool {
        let mut complete = true;

        for (number, batch) in rows.chunks(self.config.batch_size.max(1)).enumerate() {
            match self.warehouse.insert_rows(table, batch).await {
                Ok(outcome) => {
                    report.synced_count += batch.len().saturating_sub(outcome.failed.len()) as u64;
                    if !outcome.is_complete() {
                        tracing::warn!(
                            table = %table,
                            batch = number,
                            failed = outcome.failed.len(),
                            "Batch partially rejected, retrying rows individually"
                        );
                        self.retry_rows(table, batch, &outcome.failed, report).await;
                    }
                }
                Err(e) => {
                    tracing::error!(table = %table, batch = number, error = %e, "Batch insert failed");
                    report.errors.push(format!("batch {number}: {e}"));
                    complete = false;
                }
            }
        }

        complete
    }

    /// Retry each rejected row once on its own.
    async fn retry_rows(
        &self,
        table: &str,
        batch: &[Row],
        failures: &[RowFailure],
        report: &mut TableReport,
    ) {
        for failure in failures {
            let Some(row) = batch.get(failure.index) else {
                report
                    .errors
                    .push(format!("row #{}: {}", failure.index, failure.reason));
                continue;
            };
            let label = row_label(row, failure.index);

            match self
                .warehouse
                .insert_rows(table, std::slice::from_ref(row))
                .await
            {
                Ok(outcome) if outcome.is_complete() => {
                    tracing::info!(table = %table, row = %label, "Row accepted on retry");
                    report.synced_count += 1;
                }
                Ok(outcome) => {
                    let reason = outcome
                        .failed
                        .first()
                        .map_or(failure.reason.as_str(), |f| f.reason.as_str());
                    tracing::warn!(table = %table, row = %label, reason = %reason, "Row rejected");
                    report.errors.push(format!("row {label}: {reason}"));
                }
                Err(e) => {
                    tracing::warn!(table = %table, row = %label, error = %e, "Row retry failed");
                    report.errors.push(format!("row {label}: {e}"));
                }
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(event_bus) = &self.event_bus {
            if let Err(e) = event_bus.emit(&event).await {
                tracing::warn!(error = %e, kind = event.kind(), "Failed to record event");
            }
        }
    }
}

/// `id=42` when the row has an id, else its position.
fn row_label(row: &Row, index: usize) -> String {
    match row.get("id") {
        Some(id) if !id.is_null() => format!("id={id}"),
        _ => format!("#{index}"),
    }
}
