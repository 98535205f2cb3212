//! SQLite-backed [`LedgerStore`] implementation.
//!
//! Decimals are stored as TEXT in their exact string form, dates as
//! `YYYY-MM-DD`, timestamps as RFC 3339 with nanoseconds, and the typed
//! entry metadata as JSON. A row read back is equal to the entry written.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use carbon_ledger_core::factor::{EmissionFactor, FactorKey, GasBreakdown};
use carbon_ledger_core::models::{EntryMetadata, MetricEntry};
use carbon_ledger_core::quota::QuotaSnapshot;
use carbon_ledger_core::store::{EntryFilter, LedgerStore};

const ENTRY_COLUMNS: &str = "id, metric_catalog_id, organization_id, site_id, period_start, \
    period_end, activity_type, scope, value, unit, co2e_emissions, metadata_json, data_quality, \
    verification_status, activity_hash, created_at";

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

fn parse_decimal(s: &str, column: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid decimal '{}' in {}", s, column))
}

fn parse<T: FromStr<Err = String>>(s: &str) -> Result<T> {
    s.parse::<T>().map_err(anyhow::Error::msg)
}

fn row_to_entry(row: &SqliteRow) -> Result<MetricEntry> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: EntryMetadata =
        serde_json::from_str(&metadata_json).context("invalid metadata_json")?;

    Ok(MetricEntry {
        id: row.get("id"),
        metric_catalog_id: row.get("metric_catalog_id"),
        organization_id: row.get("organization_id"),
        site_id: row.get("site_id"),
        period_start: NaiveDate::from_str(row.get::<&str, _>("period_start"))?,
        period_end: NaiveDate::from_str(row.get::<&str, _>("period_end"))?,
        activity_type: parse(row.get::<&str, _>("activity_type"))?,
        scope: parse(row.get::<&str, _>("scope"))?,
        value: parse_decimal(row.get::<&str, _>("value"), "value")?,
        unit: row.get("unit"),
        co2e_emissions: parse_decimal(row.get::<&str, _>("co2e_emissions"), "co2e_emissions")?,
        metadata,
        data_quality: parse(row.get::<&str, _>("data_quality"))?,
        verification_status: parse(row.get::<&str, _>("verification_status"))?,
        activity_hash: row.get("activity_hash"),
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn insert(&self, entry: &MetricEntry) -> Result<()> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO metric_entries (id, metric_catalog_id, organization_id, site_id,
                                        period_start, period_end, activity_type, scope,
                                        value, unit, co2e_emissions, metadata_json,
                                        data_quality, verification_status, activity_hash,
                                        supersedes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.metric_catalog_id)
        .bind(&entry.organization_id)
        .bind(&entry.site_id)
        .bind(entry.period_start.to_string())
        .bind(entry.period_end.to_string())
        .bind(entry.activity_type.as_str())
        .bind(entry.scope.as_str())
        .bind(entry.value.to_string())
        .bind(&entry.unit)
        .bind(entry.co2e_emissions.to_string())
        .bind(&metadata_json)
        .bind(entry.data_quality.as_str())
        .bind(entry.verification_status.as_str())
        .bind(&entry.activity_hash)
        .bind(&entry.metadata.supersedes)
        .bind(format_ts(&entry.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert ledger entry {}", entry.id))?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MetricEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM metric_entries WHERE id = ?",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn query(&self, organization_id: &str, filter: &EntryFilter) -> Result<Vec<MetricEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM metric_entries
            WHERE organization_id = ?
              AND (? IS NULL OR period_start >= ?)
              AND (? IS NULL OR period_end <= ?)
              AND (? OR id NOT IN (
                    SELECT supersedes FROM metric_entries WHERE supersedes IS NOT NULL))
            ORDER BY period_start, created_at
            "#,
            ENTRY_COLUMNS
        ))
        .bind(organization_id)
        .bind(filter.period_from.map(|d| d.to_string()))
        .bind(filter.period_from.map(|d| d.to_string()))
        .bind(filter.period_to.map(|d| d.to_string()))
        .bind(filter.period_to.map(|d| d.to_string()))
        .bind(filter.include_superseded)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = row_to_entry(row)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn find_by_activity_hash(&self, activity_hash: &str) -> Result<Option<MetricEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM metric_entries WHERE activity_hash = ? AND supersedes IS NULL LIMIT 1",
            ENTRY_COLUMNS
        ))
        .bind(activity_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn save_factor(&self, factor: &EmissionFactor, resolved_at: DateTime<Utc>) -> Result<()> {
        let breakdown_json = factor
            .gas_breakdown
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO emission_factors (factor_key, value, unit, gas_breakdown_json,
                                          source, source_year, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(factor_key) DO UPDATE SET
                value = excluded.value,
                unit = excluded.unit,
                gas_breakdown_json = excluded.gas_breakdown_json,
                source = excluded.source,
                source_year = excluded.source_year,
                resolved_at = excluded.resolved_at
            "#,
        )
        .bind(factor.key.id())
        .bind(factor.value.to_string())
        .bind(&factor.unit)
        .bind(breakdown_json)
        .bind(&factor.source)
        .bind(factor.source_year)
        .bind(format_ts(&resolved_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_factors(&self) -> Result<Vec<(EmissionFactor, DateTime<Utc>)>> {
        let rows = sqlx::query(
            r#"
            SELECT factor_key, value, unit, gas_breakdown_json, source, source_year, resolved_at
            FROM emission_factors
            ORDER BY factor_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut factors = Vec::with_capacity(rows.len());
        for row in &rows {
            let key: FactorKey = parse(row.get::<&str, _>("factor_key"))?;
            let gas_breakdown = row
                .get::<Option<&str>, _>("gas_breakdown_json")
                .map(serde_json::from_str::<GasBreakdown>)
                .transpose()
                .context("invalid gas_breakdown_json")?;
            let factor = EmissionFactor {
                key,
                value: parse_decimal(row.get::<&str, _>("value"), "value")?,
                unit: row.get("unit"),
                gas_breakdown,
                source: row.get("source"),
                source_year: row.get("source_year"),
            };
            factors.push((factor, parse_ts(row.get::<&str, _>("resolved_at"))?));
        }
        Ok(factors)
    }

    async fn delete_factor(&self, key: &FactorKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM emission_factors WHERE factor_key = ?")
            .bind(key.id())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_factors(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM emission_factors")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_quota(
        &self,
        snapshot: &QuotaSnapshot,
        spent: u64,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let mut tx = self.pool.begin().await?;

        // The open-window test compares RFC 3339 strings of equal width.
        sqlx::query(
            r#"
            INSERT INTO quota_state (id, calls_this_window, window_limit, window_reset_at, resets)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                calls_this_window = CASE WHEN quota_state.window_reset_at > ?6
                    THEN quota_state.calls_this_window + ?5
                    ELSE excluded.calls_this_window END,
                resets = CASE WHEN quota_state.window_reset_at > ?6
                    THEN MAX(quota_state.resets, excluded.resets)
                    ELSE excluded.resets END,
                window_reset_at = CASE WHEN quota_state.window_reset_at > ?6
                    THEN quota_state.window_reset_at
                    ELSE excluded.window_reset_at END,
                window_limit = excluded.window_limit
            "#,
        )
        .bind(snapshot.calls_this_window as i64)
        .bind(snapshot.window_limit as i64)
        .bind(format_ts(&snapshot.window_reset_at))
        .bind(snapshot.resets as i64)
        .bind(spent as i64)
        .bind(format_ts(&now))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT calls_this_window, window_limit, window_reset_at, resets FROM quota_state WHERE id = 1",
        )
        .fetch_one(&mut *tx)
        .await?;
        let stored = row_to_quota(&row)?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn load_quota(&self) -> Result<Option<QuotaSnapshot>> {
        let row = sqlx::query(
            "SELECT calls_this_window, window_limit, window_reset_at, resets FROM quota_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_quota).transpose()
    }
}

fn row_to_quota(row: &SqliteRow) -> Result<QuotaSnapshot> {
    Ok(QuotaSnapshot {
        calls_this_window: row.get::<i64, _>("calls_this_window").max(0) as u64,
        window_limit: row.get::<i64, _>("window_limit").max(0) as u64,
        window_reset_at: parse_ts(row.get::<&str, _>("window_reset_at"))?,
        resets: row.get::<i64, _>("resets").max(0) as u64,
    })
}
