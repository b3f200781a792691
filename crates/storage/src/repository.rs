//! Dedup repository for the `wallpapers` table.
//!
//! Uniqueness of `(market_code, resolution_code, hash)` is enforced by a
//! unique index, never by a prior existence check. An insert that trips the
//! index is reported as "already present" (`false` / not counted), which keeps
//! concurrent collectors correct without any application-level locking.
//!
//! [`WallpaperRepository::bulk_save_if_not_exists`] runs in two phases:
//! an optimistic multi-row insert of the rows not already stored, and, if a
//! concurrent writer slipped a duplicate in between, a sequential fallback
//! through the single-row primitive.

use std::collections::{BTreeSet, HashSet};

use binggo_core::{
    MarketCode, NaturalKey, NewWallpaper, ResolutionCode, RetryPolicy, WallpaperInfo,
    WallpaperRecord,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::StorageError;

/// Audit user recorded on every row written by the collector.
const DEFAULT_AUDIT_USER: &str = "default";

/// Rows per multi-row INSERT. 10 columns per row keeps well under SQLite's
/// bound-parameter limit.
const INSERT_CHUNK_ROWS: usize = 500;

const SELECT_COLUMNS: &str = "id, market_code, resolution_code, hash, actual_date, info_json, \
                              created_at, created_by, last_modified_at, last_modified_by";

// ── Row mapping ──────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct WallpaperRow {
    id: String,
    market_code: String,
    resolution_code: String,
    hash: String,
    actual_date: NaiveDate,
    info_json: String,
    created_at: DateTime<Utc>,
    created_by: String,
    last_modified_at: DateTime<Utc>,
    last_modified_by: String,
}

impl TryFrom<WallpaperRow> for WallpaperRecord {
    type Error = StorageError;

    fn try_from(row: WallpaperRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| StorageError::InvalidRow { id: row.id.clone(), reason };
        let id = Uuid::parse_str(&row.id).map_err(|e| invalid(e.to_string()))?;
        let market: MarketCode = row.market_code.parse().map_err(|e| invalid(format!("{e}")))?;
        let resolution: ResolutionCode =
            row.resolution_code.parse().map_err(|e| invalid(format!("{e}")))?;
        let info: WallpaperInfo = serde_json::from_str(&row.info_json)?;

        Ok(WallpaperRecord {
            id,
            market,
            resolution,
            hash: row.hash,
            actual_date: row.actual_date,
            info,
            created_at: row.created_at,
            created_by: row.created_by,
            last_modified_at: row.last_modified_at,
            last_modified_by: row.last_modified_by,
        })
    }
}

/// Fully-bound insert payload. Built once per record so that retries reuse
/// the same surrogate id.
#[derive(Debug, Clone)]
struct InsertRow {
    id: String,
    market_code: &'static str,
    resolution_code: &'static str,
    hash: String,
    actual_date: NaiveDate,
    info_json: String,
    now: DateTime<Utc>,
}

impl InsertRow {
    fn from_new(record: &NewWallpaper) -> Result<Self, StorageError> {
        if record.hash.trim().is_empty() {
            return Err(StorageError::InvalidArgument(
                "wallpaper hash must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::now_v7().to_string(),
            market_code: record.market.code(),
            resolution_code: record.resolution.code(),
            hash: record.hash.clone(),
            actual_date: record.actual_date,
            info_json: serde_json::to_string(&record.info)?,
            now: Utc::now(),
        })
    }
}

enum BatchOutcome {
    Inserted(usize),
    Conflict,
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

async fn insert_one(pool: &SqlitePool, row: &InsertRow) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "INSERT INTO wallpapers (id, market_code, resolution_code, hash, actual_date, info_json,
                                 created_at, created_by, last_modified_at, last_modified_by)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(row.market_code)
    .bind(row.resolution_code)
    .bind(&row.hash)
    .bind(row.actual_date)
    .bind(&row.info_json)
    .bind(row.now)
    .bind(DEFAULT_AUDIT_USER)
    .bind(row.now)
    .bind(DEFAULT_AUDIT_USER)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// One transaction, chunked multi-row INSERTs. Any unique violation rolls the
/// whole batch back and reports [`BatchOutcome::Conflict`].
async fn insert_batch(pool: &SqlitePool, rows: &[InsertRow]) -> Result<BatchOutcome, StorageError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO wallpapers (id, market_code, resolution_code, hash, actual_date, info_json,
                                     created_at, created_by, last_modified_at, last_modified_by) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.id)
                .push_bind(row.market_code)
                .push_bind(row.resolution_code)
                .push_bind(&row.hash)
                .push_bind(row.actual_date)
                .push_bind(&row.info_json)
                .push_bind(row.now)
                .push_bind(DEFAULT_AUDIT_USER)
                .push_bind(row.now)
                .push_bind(DEFAULT_AUDIT_USER);
        });

        match qb.build().execute(&mut *tx).await {
            Ok(done) => inserted += done.rows_affected() as usize,
            // Dropping `tx` rolls back whatever earlier chunks wrote.
            Err(e) if is_unique_violation(&e) => return Ok(BatchOutcome::Conflict),
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit().await?;
    Ok(BatchOutcome::Inserted(inserted))
}

async fn existing_keys(
    pool: &SqlitePool,
    hashes: &BTreeSet<&str>,
) -> Result<HashSet<NaturalKey>, StorageError> {
    let mut keys = HashSet::new();
    let hashes: Vec<&str> = hashes.iter().copied().collect();

    for chunk in hashes.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT market_code, resolution_code, hash FROM wallpapers WHERE hash IN (",
        );
        let mut sep = qb.separated(", ");
        for h in chunk {
            sep.push_bind(*h);
        }
        sep.push_unseparated(")");

        let rows: Vec<(String, String, String)> = qb.build_query_as().fetch_all(pool).await?;
        for (market, resolution, hash) in rows {
            // Rows with codes this build doesn't know can't collide with
            // anything we'd insert.
            match (market.parse(), resolution.parse()) {
                (Ok(market), Ok(resolution)) => {
                    keys.insert(NaturalKey { market, resolution, hash });
                }
                _ => debug!(market = %market, resolution = %resolution, "skipping unknown key"),
            }
        }
    }
    Ok(keys)
}

// ── Repository ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WallpaperRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl WallpaperRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, retry: RetryPolicy::storage() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert `record` unless its natural key is already stored.
    ///
    /// Returns `true` if a row was written, `false` if the unique index
    /// rejected it. Other errors propagate once the retry policy gives up.
    pub async fn save_if_not_exists(&self, record: &NewWallpaper) -> Result<bool, StorageError> {
        let row = InsertRow::from_new(record)?;
        let pool = &self.pool;
        let row = &row;
        let inserted = self
            .retry
            .run("save_if_not_exists", move || insert_one(pool, row))
            .await?;

        if !inserted {
            debug!(
                market = %record.market,
                resolution = %record.resolution,
                hash = %record.hash,
                "wallpaper already stored"
            );
        }
        Ok(inserted)
    }

    /// Insert every record whose natural key is absent; returns how many rows
    /// were actually written.
    ///
    /// Duplicates inside `records` collapse to one row: the bulk attempt
    /// fails on the index and the sequential fallback keeps the first.
    pub async fn bulk_save_if_not_exists(
        &self,
        records: &[NewWallpaper],
        cancel: &CancellationToken,
    ) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        // Phase 0: drop candidates that are already stored.
        let hashes: BTreeSet<&str> = records.iter().map(|r| r.hash.as_str()).collect();
        let pool = &self.pool;
        let hashes_ref = &hashes;
        let existing = self
            .retry
            .run("existing_keys", move || existing_keys(pool, hashes_ref))
            .await?;

        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            if existing.contains(&record.natural_key()) {
                continue;
            }
            match InsertRow::from_new(record) {
                Ok(row) => candidates.push(row),
                Err(e) => error!(
                    market = record.market.code(),
                    resolution = record.resolution.code(),
                    hash = %record.hash,
                    error = %e,
                    "skipping invalid wallpaper"
                ),
            }
        }

        let skipped = records.len() - candidates.len();
        if candidates.is_empty() {
            debug!(total = records.len(), "bulk save: nothing new to insert");
            return Ok(0);
        }
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        // Phase 1: optimistic multi-row insert.
        let rows = &candidates;
        let outcome = self
            .retry
            .run("bulk_insert", move || insert_batch(pool, rows))
            .await?;

        match outcome {
            BatchOutcome::Inserted(n) => {
                info!(total = records.len(), inserted = n, skipped, "bulk save complete");
                Ok(n)
            }
            BatchOutcome::Conflict => {
                warn!(
                    candidates = candidates.len(),
                    "bulk insert hit a unique conflict, falling back to per-record inserts"
                );
                self.insert_sequential(&candidates, cancel).await
            }
        }
    }

    /// Phase 2: one row at a time through the single-record primitive.
    /// A record that fails for a non-conflict reason is logged and skipped.
    async fn insert_sequential(
        &self,
        rows: &[InsertRow],
        cancel: &CancellationToken,
    ) -> Result<usize, StorageError> {
        let pool = &self.pool;
        let mut inserted = 0usize;

        for (i, row) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(inserted, remaining = rows.len() - i, "bulk save cancelled");
                return Err(StorageError::Cancelled);
            }
            match self.retry.run("save_if_not_exists", move || insert_one(pool, row)).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => error!(
                    market = row.market_code,
                    resolution = row.resolution_code,
                    hash = %row.hash,
                    error = %e,
                    "failed to save wallpaper"
                ),
            }
        }

        info!(candidates = rows.len(), inserted, "sequential fallback complete");
        Ok(inserted)
    }

    // ── Queries ──────────────────────────────────────────────

    /// Page through a market's wallpapers, newest first. `page` is 1-based.
    pub async fn get_by_market(
        &self,
        market: MarketCode,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<WallpaperRecord>, StorageError> {
        if page == 0 || page_size == 0 {
            return Err(StorageError::InvalidArgument(format!(
                "page and page_size must be >= 1 (got page={page}, page_size={page_size})"
            )));
        }
        let offset = i64::from(page - 1) * i64::from(page_size);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM wallpapers WHERE market_code = ?
             ORDER BY actual_date DESC, created_at DESC LIMIT ? OFFSET ?"
        );
        let sql = sql.as_str();
        let pool = &self.pool;
        let rows = self
            .retry
            .run("get_by_market", move || async move {
                sqlx::query_as::<_, WallpaperRow>(sql)
                    .bind(market.code())
                    .bind(i64::from(page_size))
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;
        rows.into_iter().map(WallpaperRecord::try_from).collect()
    }

    /// Wallpapers with `start <= actual_date <= end`, newest first.
    pub async fn get_by_date_range(
        &self,
        market: MarketCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WallpaperRecord>, StorageError> {
        if start > end {
            return Err(StorageError::InvalidArgument(format!(
                "start date {start} is after end date {end}"
            )));
        }
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM wallpapers
             WHERE market_code = ? AND actual_date >= ? AND actual_date <= ?
             ORDER BY actual_date DESC, created_at DESC"
        );
        let sql = sql.as_str();
        let pool = &self.pool;
        let rows = self
            .retry
            .run("get_by_date_range", move || async move {
                sqlx::query_as::<_, WallpaperRow>(sql)
                    .bind(market.code())
                    .bind(start)
                    .bind(end)
                    .fetch_all(pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;
        rows.into_iter().map(WallpaperRecord::try_from).collect()
    }

    /// The `count` most recent wallpapers for a market.
    pub async fn get_latest(
        &self,
        market: MarketCode,
        count: u32,
    ) -> Result<Vec<WallpaperRecord>, StorageError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.get_by_market(market, 1, count).await
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<WallpaperRecord>, StorageError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM wallpapers WHERE id = ?");
        let sql = sql.as_str();
        let id = id.to_string();
        let id = id.as_str();
        let pool = &self.pool;
        let row = self
            .retry
            .run("get_by_id", move || async move {
                sqlx::query_as::<_, WallpaperRow>(sql)
                    .bind(id)
                    .fetch_optional(pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;
        row.map(WallpaperRecord::try_from).transpose()
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        let pool = &self.pool;
        self.retry
            .run("count", move || async move {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM wallpapers")
                    .fetch_one(pool)
                    .await
                    .map_err(StorageError::from)
            })
            .await
    }
}
