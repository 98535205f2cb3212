//! `carbon factors` and `carbon quota`: inspect and invalidate persisted
//! provider state.

use anyhow::Result;
use chrono::Utc;

use carbon_ledger_core::factor::FactorKey;
use carbon_ledger_core::store::LedgerStore;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteLedger;

async fn open_store(config: &Config) -> Result<SqliteLedger> {
    let pool = db::connect(config).await?;
    migrate::create_schema(&pool).await?;
    Ok(SqliteLedger::new(pool))
}

pub async fn run_factors_list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let factors = store.load_factors().await?;

    if factors.is_empty() {
        println!("No factors cached.");
    } else {
        println!(
            "{:<56} {:>12} {:<5} {:<24} {:>6}  RESOLVED",
            "KEY", "VALUE", "UNIT", "SOURCE", "YEAR"
        );
        println!("{}", "-".repeat(130));
        for (factor, resolved_at) in &factors {
            println!(
                "{:<56} {:>12} {:<5} {:<24} {:>6}  {}",
                factor.key.id(),
                factor.value,
                factor.unit,
                factor.source,
                factor.source_year,
                resolved_at.format("%Y-%m-%d %H:%M")
            );
        }
        println!();
        println!("{} factor(s).", factors.len());
    }

    store.pool().close().await;
    Ok(())
}

/// Forget one persisted factor, or all of them, so the next calculation
/// fetches it again.
pub async fn run_factors_refresh(config: &Config, key: Option<&str>, all: bool) -> Result<u64> {
    let store = open_store(config).await?;

    let removed = match (key, all) {
        (_, true) => store.delete_all_factors().await?,
        (Some(key), false) => {
            let key: FactorKey = key.parse().map_err(anyhow::Error::msg)?;
            u64::from(store.delete_factor(&key).await?)
        }
        (None, false) => anyhow::bail!("pass a factor key or --all"),
    };
    println!("Invalidated {} factor(s).", removed);

    store.pool().close().await;
    Ok(removed)
}

pub async fn run_quota_status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    match store.load_quota().await? {
        Some(snapshot) => {
            let now = Utc::now();
            let elapsed = now >= snapshot.window_reset_at;
            let used = if elapsed { 0 } else { snapshot.calls_this_window };
            println!("Factor lookup quota");
            println!("  Used:       {} / {}", used, config.quota.monthly_limit);
            println!(
                "  Resets at:  {}{}",
                snapshot.window_reset_at.format("%Y-%m-%d %H:%M UTC"),
                if elapsed { " (elapsed)" } else { "" }
            );
            println!("  Rollovers:  {}", snapshot.resets);
        }
        None => {
            println!("Factor lookup quota");
            println!("  Used:       0 / {}", config.quota.monthly_limit);
            println!("  No lookups recorded yet.");
        }
    }

    store.pool().close().await;
    Ok(())
}
