//! Run ledger: which slots already ran on which day

use std::collections::HashSet;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::{LedgerError, Result};
use crate::summary::RunSummary;
use crate::types::{OutcomeStatus, PlatformKind};

/// One recorded (slot, platform) outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub slot_id: String,
    pub platform: String,
    pub status: String,
    pub reason: Option<String>,
    pub attempts: u32,
    pub remote_id: Option<String>,
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (or create) the ledger database and apply migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(LedgerError::IoError)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(LedgerError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(LedgerError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Store every outcome of a run that made at least one publish attempt
    ///
    /// Skipped pairs and pairs that never started (run cancelled before the
    /// slot, source errors, unavailable publishers) are left out so that the
    /// slot can run again later the same day. Returns the generated run id.
    pub async fn record_summary(&self, run_date: NaiveDate, summary: &RunSummary) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let date = run_date.format("%Y-%m-%d").to_string();
        let recorded_at = Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(LedgerError::SqlxError)?;
        for outcome in summary
            .outcomes()
            .iter()
            .filter(|o| o.status != OutcomeStatus::Skipped && o.attempts > 0)
        {
            sqlx::query(
                r#"
                INSERT INTO slot_runs
                    (run_id, run_date, slot_id, platform, status, reason, attempts, remote_id, recorded_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run_id)
            .bind(&date)
            .bind(&outcome.slot_id)
            .bind(outcome.platform.as_str())
            .bind(outcome.status.as_str())
            .bind(&outcome.reason)
            .bind(i64::from(outcome.attempts))
            .bind(outcome.receipt.as_ref().map(|r| r.remote_id.clone()))
            .bind(recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(LedgerError::SqlxError)?;
        }
        tx.commit().await.map_err(LedgerError::SqlxError)?;

        Ok(run_id)
    }

    /// Slot ids with at least one recorded outcome on `date`
    pub async fn slots_run_on(&self, date: NaiveDate) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT DISTINCT slot_id FROM slot_runs WHERE run_date = ?")
            .bind(date.format("%Y-%m-%d").to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(LedgerError::SqlxError)?;

        Ok(rows.iter().map(|row| row.get::<String, _>("slot_id")).collect())
    }

    /// Entries recorded on `date`, oldest first
    pub async fn entries_on(&self, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, run_date, slot_id, platform, status, reason, attempts, remote_id
            FROM slot_runs
            WHERE run_date = ?
            ORDER BY id ASC
            "#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::SqlxError)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let platform: String = row.get("platform");
            if platform.parse::<PlatformKind>().is_err() {
                tracing::warn!(platform = %platform, "Unknown platform in ledger row");
            }
            let attempts: i64 = row.get("attempts");
            entries.push(LedgerEntry {
                run_id: row.get("run_id"),
                run_date: date,
                slot_id: row.get("slot_id"),
                platform,
                status: row.get("status"),
                reason: row.get("reason"),
                attempts: u32::try_from(attempts).unwrap_or(0),
                remote_id: row.get("remote_id"),
            });
        }
        Ok(entries)
    }
}
