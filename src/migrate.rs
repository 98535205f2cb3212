use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Ledger rows; decimals are TEXT so they round-trip exactly
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_entries (
            id TEXT PRIMARY KEY,
            metric_catalog_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            site_id TEXT,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            activity_type TEXT NOT NULL,
            scope TEXT NOT NULL,
            value TEXT NOT NULL,
            unit TEXT NOT NULL,
            co2e_emissions TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            data_quality TEXT NOT NULL,
            verification_status TEXT NOT NULL,
            activity_hash TEXT NOT NULL,
            supersedes TEXT REFERENCES metric_entries(id),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metric_entries_org_period ON metric_entries(organization_id, period_start)",
    )
    .execute(pool)
    .await?;

    // One original row per activity; corrections may repeat the hash
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_metric_entries_activity
        ON metric_entries(activity_hash) WHERE supersedes IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metric_entries_supersedes ON metric_entries(supersedes)",
    )
    .execute(pool)
    .await?;

    // Resolved factors, used to warm the cache across runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emission_factors (
            factor_key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            unit TEXT NOT NULL,
            gas_breakdown_json TEXT,
            source TEXT NOT NULL,
            source_year INTEGER NOT NULL,
            resolved_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row quota window
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quota_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            calls_this_window INTEGER NOT NULL,
            window_limit INTEGER NOT NULL,
            window_reset_at TEXT NOT NULL,
            resets INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
