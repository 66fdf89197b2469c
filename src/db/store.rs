//! SQLite database store implementation.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::{params, types::Type, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::outages::{
    consecutive_failure_runs, sliding_window_runs, Observation, CONSECUTIVE_FAILURE_THRESHOLD,
    SLIDING_WINDOW_FAILURES, SLIDING_WINDOW_LIMIT, SLIDING_WINDOW_SIZE,
};

/// Maximum rows returned by [`Store::recent`].
pub const RECENT_LIMIT: i64 = 10_000;

/// Raw samples older than this are rolled up and deleted.
pub const RAW_RETENTION_DAYS: i64 = 7;

/// Hourly patterns older than this are dropped, and raw samples older than this are
/// not rolled up. Archived `hourly_stats` rows are kept indefinitely.
pub const AGGREGATE_RETENTION_DAYS: i64 = 90;

/// Trailing window recomputed by [`Store::aggregate_recent`].
pub const PATTERN_RECOMPUTE_DAYS: i64 = 2;

/// Days of history returned by [`Store::pattern_detail`].
pub const PATTERN_DETAIL_DAYS: i64 = 30;

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";
const HOUR_SECONDS: i64 = 3600;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Row counts touched by one [`Store::archive_and_prune`] pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub archived_hours: usize,
    pub deleted_samples: usize,
    pub deleted_patterns: usize,
    pub compacted: bool,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    /// (year, month) of the last compaction pass.
    last_compaction: Arc<Mutex<Option<(i32, u32)>>>,
}

impl Store {
    /// Open the store at the given path and create the schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            last_compaction: Arc::new(Mutex::new(None)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;

        // WAL lets API readers run while the sink writes
        match conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        }) {
            Ok(mode) => tracing::debug!("Store: journal mode {}", mode),
            Err(e) => tracing::warn!("Store: failed to enable WAL: {}", e),
        }
        if let Err(e) = conn.pragma_update(None, "synchronous", "NORMAL") {
            tracing::warn!("Store: failed to set synchronous=NORMAL: {}", e);
        }

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // --- Raw samples ---

    /// Persist one probe outcome.
    pub fn append(&self, sample: &Sample) -> Result<(), DbError> {
        let rtt = if sample.success { Some(sample.rtt_ms) } else { None };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ping_results (timestamp, target, success, rtt_ms, error_message) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_db_time(sample.timestamp),
                sample.target,
                sample.success,
                rtt,
                sample.error_message,
            ],
        )?;
        Ok(())
    }

    /// Samples from the last `hours`, newest first, capped at [`RECENT_LIMIT`].
    pub fn recent(&self, hours: i64) -> Result<Vec<Sample>, DbError> {
        let cutoff = format_db_time(hours_before(Utc::now(), hours));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, target, success, rtt_ms, error_message FROM ping_results
             WHERE timestamp > ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cutoff, RECENT_LIMIT], |row| {
            Ok(Sample {
                timestamp: row_time(row, 0)?,
                target: row.get(1)?,
                success: row.get(2)?,
                rtt_ms: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                error_message: row.get(4)?,
            })
        })?;

        collect_skipping(rows, "recent")
    }

    /// Per-target totals and latency over the last `hours`.
    pub fn stats(&self, hours: i64) -> Result<Vec<TargetStats>, DbError> {
        self.stats_since(hours_before(Utc::now(), hours))
    }

    /// Same as [`Store::stats`] with an explicit start of the window.
    pub fn stats_since(&self, since: DateTime<Utc>) -> Result<Vec<TargetStats>, DbError> {
        let cutoff = format_db_time(since);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT
                target,
                COUNT(*) AS total_pings,
                SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS successful_pings,
                AVG(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS avg_rtt,
                MIN(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS min_rtt,
                MAX(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS max_rtt,
                ROUND((1.0 - (CAST(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS REAL) / COUNT(*))) * 100, 2) AS packet_loss
             FROM ping_results
             WHERE timestamp > ?1
             GROUP BY target
             ORDER BY target",
        )?;

        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(TargetStats {
                target: row.get(0)?,
                total_pings: row.get(1)?,
                successful_pings: row.get(2)?,
                avg_rtt: row.get(3)?,
                min_rtt: row.get(4)?,
                max_rtt: row.get(5)?,
                packet_loss: row.get(6)?,
            })
        })?;

        collect_skipping(rows, "stats")
    }

    /// Runs of at least three consecutive failures over the last `days`.
    pub fn outages_simple(&self, days: i64) -> Result<Vec<Outage>, DbError> {
        self.outages_simple_since(days_before(Utc::now(), days))
    }

    /// Same as [`Store::outages_simple`] with an explicit start of the window.
    pub fn outages_simple_since(&self, since: DateTime<Utc>) -> Result<Vec<Outage>, DbError> {
        let observations = self.observations_since(since)?;
        Ok(consecutive_failure_runs(&observations, CONSECUTIVE_FAILURE_THRESHOLD))
    }

    /// Runs where five of any ten consecutive pings failed, over the last `days`.
    pub fn outages_sliding(&self, days: i64) -> Result<Vec<Outage>, DbError> {
        let observations = self.observations_since(days_before(Utc::now(), days))?;
        Ok(sliding_window_runs(
            &observations,
            SLIDING_WINDOW_SIZE,
            SLIDING_WINDOW_FAILURES,
            SLIDING_WINDOW_LIMIT,
        ))
    }

    fn observations_since(&self, since: DateTime<Utc>) -> Result<Vec<Observation>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target, timestamp, success FROM ping_results
             WHERE timestamp > ?1 ORDER BY target, timestamp",
        )?;

        let rows = stmt.query_map(params![format_db_time(since)], |row| {
            Ok(Observation {
                target: row.get(0)?,
                timestamp: row_time(row, 1)?,
                success: row.get(2)?,
            })
        })?;

        collect_skipping(rows, "outage")
    }

    // --- Hourly patterns ---

    /// Hour-of-day failure and latency profile per target over the last `days`.
    pub fn heatmap(&self, days: i64) -> Result<Vec<HeatmapPoint>, DbError> {
        let cutoff = format_db_date(days_before(Utc::now(), days));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT
                hour,
                target,
                AVG(failure_rate) AS avg_failure_rate,
                AVG(avg_rtt_ms) AS avg_latency,
                MAX(max_rtt_ms) AS max_latency,
                SUM(failed_pings) AS total_failures,
                SUM(total_pings) AS total_pings,
                COUNT(DISTINCT date) AS days_with_data
             FROM hourly_patterns
             WHERE date > ?1
             GROUP BY hour, target
             ORDER BY hour, target",
        )?;

        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(HeatmapPoint {
                hour: row.get(0)?,
                target: row.get(1)?,
                failure_rate: row.get(2)?,
                avg_latency: row.get(3)?,
                max_latency: row.get(4)?,
                total_failures: row.get(5)?,
                total_pings: row.get(6)?,
                days_with_data: row.get(7)?,
            })
        })?;

        collect_skipping(rows, "heatmap")
    }

    /// Daily rows for one hour of the day, newest date first.
    pub fn pattern_detail(&self, hour: u32) -> Result<Vec<HourlyPattern>, DbError> {
        if hour > 23 {
            return Err(DbError::InvalidArgument(format!(
                "hour must be between 0 and 23, got {}",
                hour
            )));
        }

        let cutoff = format_db_date(Utc::now() - ChronoDuration::days(PATTERN_DETAIL_DAYS));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, hour, target, total_pings, failed_pings, avg_rtt_ms, max_rtt_ms, failure_rate
             FROM hourly_patterns
             WHERE hour = ?1 AND date > ?2
             ORDER BY date DESC, target",
        )?;

        let rows = stmt.query_map(params![hour, cutoff], pattern_from_row)?;
        collect_skipping(rows, "pattern")
    }

    /// Recompute hourly patterns from the trailing raw window.
    ///
    /// Every (date, hour, target) row in range is replaced wholesale, so repeated runs
    /// converge on the same rows.
    pub fn aggregate_recent(&self) -> Result<usize, DbError> {
        self.aggregate_recent_at(Utc::now())
    }

    pub(crate) fn aggregate_recent_at(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        // Start on an hour boundary so the oldest bucket is recomputed from complete data
        let since = truncate_to_window(
            now - ChronoDuration::days(PATTERN_RECOMPUTE_DAYS),
            HOUR_SECONDS,
        );

        let conn = self.conn()?;
        let updated = conn.execute(
            "INSERT OR REPLACE INTO hourly_patterns
                (date, hour, target, total_pings, failed_pings, avg_rtt_ms, max_rtt_ms, failure_rate)
             SELECT
                substr(timestamp, 1, 10) AS date,
                CAST(substr(timestamp, 12, 2) AS INTEGER) AS hour,
                target,
                COUNT(*) AS total_pings,
                SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) AS failed_pings,
                AVG(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS avg_rtt_ms,
                MAX(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS max_rtt_ms,
                ROUND(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) * 100.0 / COUNT(*), 2) AS failure_rate
             FROM ping_results
             WHERE timestamp >= ?1
             GROUP BY date, hour, target",
            params![format_db_time(since)],
        )?;

        Ok(updated)
    }

    // --- Retention ---

    /// Roll up and delete expired raw samples, drop expired patterns and compact the
    /// database on the first day of a month.
    pub fn archive_and_prune(&self) -> Result<PruneReport, DbError> {
        self.archive_and_prune_at(Utc::now())
    }

    pub(crate) fn archive_and_prune_at(&self, now: DateTime<Utc>) -> Result<PruneReport, DbError> {
        // Hour-aligned so a partially expired hour is archived only once it is complete
        let raw_cutoff = truncate_to_window(
            now - ChronoDuration::days(RAW_RETENTION_DAYS),
            HOUR_SECONDS,
        );
        let aggregate_cutoff = now - ChronoDuration::days(AGGREGATE_RETENTION_DAYS);

        let mut report = PruneReport::default();
        {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;

            report.archived_hours = tx.execute(
                "INSERT OR IGNORE INTO hourly_stats
                    (hour, target, total_pings, successful_pings, avg_rtt_ms, max_rtt_ms, min_rtt_ms, packet_loss_percent)
                 SELECT
                    substr(timestamp, 1, 13) || ':00:00' AS hour,
                    target,
                    COUNT(*) AS total_pings,
                    SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS successful_pings,
                    AVG(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS avg_rtt_ms,
                    MAX(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS max_rtt_ms,
                    MIN(CASE WHEN success = 1 AND rtt_ms > 0 THEN rtt_ms END) AS min_rtt_ms,
                    ROUND((1.0 - (CAST(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS REAL) / COUNT(*))) * 100, 2) AS packet_loss_percent
                 FROM ping_results
                 WHERE timestamp < ?1 AND timestamp > ?2
                 GROUP BY hour, target",
                params![format_db_time(raw_cutoff), format_db_time(aggregate_cutoff)],
            )?;

            report.deleted_samples = tx.execute(
                "DELETE FROM ping_results WHERE timestamp < ?1",
                params![format_db_time(raw_cutoff)],
            )?;

            report.deleted_patterns = tx.execute(
                "DELETE FROM hourly_patterns WHERE date < ?1",
                params![format_db_date(aggregate_cutoff)],
            )?;

            tx.commit()?;
        }

        if now.day() == 1 && self.claim_compaction(now)? {
            self.conn()?.execute_batch("VACUUM")?;
            report.compacted = true;
        }

        Ok(report)
    }

    /// Returns true once per calendar month.
    fn claim_compaction(&self, now: DateTime<Utc>) -> Result<bool, DbError> {
        let mut last = self
            .last_compaction
            .lock()
            .map_err(|_| DbError::LockPoisoned)?;
        let month = (now.year(), now.month());
        if *last == Some(month) {
            return Ok(false);
        }
        *last = Some(month);
        Ok(true)
    }

    /// Archived hourly rollups from the last `days`, newest first.
    pub fn archived_stats(&self, days: i64) -> Result<Vec<HourlyStat>, DbError> {
        let cutoff = days_before(Utc::now(), days)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hour, target, total_pings, successful_pings, avg_rtt_ms, max_rtt_ms, min_rtt_ms, packet_loss_percent
             FROM hourly_stats
             WHERE hour > ?1
             ORDER BY hour DESC, target",
        )?;

        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(HourlyStat {
                hour: row.get(0)?,
                target: row.get(1)?,
                total_pings: row.get(2)?,
                successful_pings: row.get(3)?,
                avg_rtt: row.get(4)?,
                max_rtt: row.get(5)?,
                min_rtt: row.get(6)?,
                packet_loss: row.get(7)?,
            })
        })?;

        collect_skipping(rows, "archive")
    }

    // --- Status ---

    /// Database size and row counts.
    pub fn storage_info(&self) -> Result<StorageInfo, DbError> {
        let conn = self.conn()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        let freelist_count: i64 = conn.query_row("PRAGMA freelist_count", [], |r| r.get(0))?;
        let count = |table: &str| -> Result<i64, DbError> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
        };

        Ok(StorageInfo {
            db_size_bytes: page_count * page_size,
            page_size,
            page_count,
            freelist_count,
            raw_samples: count("ping_results")?,
            hourly_patterns: count("hourly_patterns")?,
            hourly_stats: count("hourly_stats")?,
        })
    }
}

fn pattern_from_row(row: &Row<'_>) -> SqlResult<HourlyPattern> {
    Ok(HourlyPattern {
        date: row.get(0)?,
        hour: row.get(1)?,
        target: row.get(2)?,
        total_pings: row.get(3)?,
        failed_pings: row.get(4)?,
        avg_rtt: row.get(5)?,
        max_rtt: row.get(6)?,
        failure_rate: row.get(7)?,
    })
}

/// Keep well-formed rows and log the ones that fail to convert.
///
/// Any other error means the statement itself failed and is returned.
fn collect_skipping<T>(
    rows: impl Iterator<Item = SqlResult<T>>,
    query: &str,
) -> Result<Vec<T>, DbError> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(value) => out.push(value),
            Err(
                e @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::InvalidColumnIndex(_)),
            ) => tracing::warn!("Store: skipping malformed {} row: {}", query, e),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

fn row_time(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(idx, format!("timestamp {:?}", raw), Type::Text)
    })
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

fn format_db_date(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

/// `now` minus `hours`, saturating at the earliest representable time.
pub fn hours_before(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    window_start(now, ChronoDuration::try_hours(hours))
}

/// `now` minus `days`, saturating at the earliest representable time.
pub fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    window_start(now, ChronoDuration::try_days(days))
}

fn window_start(now: DateTime<Utc>, span: Option<ChronoDuration>) -> DateTime<Utc> {
    span.and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Truncate a datetime to the start of its containing window.
pub fn truncate_to_window(dt: DateTime<Utc>, window_seconds: i64) -> DateTime<Utc> {
    let ts = dt.timestamp();
    let truncated = ts - ts.rem_euclid(window_seconds);
    DateTime::from_timestamp(truncated, 0).unwrap_or(dt)
}
