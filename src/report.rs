//! `carbon report`: period summary for one organization.

use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;

use carbon_ledger_core::aggregate::PeriodSummary;
use carbon_ledger_core::store::{EntryFilter, LedgerStore};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteLedger;

/// The same period one year earlier (Feb 29 maps to Feb 28).
pub fn previous_year(from: NaiveDate, to: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let year = Months::new(12);
    Some((from.checked_sub_months(year)?, to.checked_sub_months(year)?))
}

pub async fn build_report(
    store: &dyn LedgerStore,
    organization_id: &str,
    from: NaiveDate,
    to: NaiveDate,
    denominator: Option<Decimal>,
) -> Result<PeriodSummary> {
    if to < from {
        anyhow::bail!("--to {} is before --from {}", to, from);
    }
    let current = store
        .query(organization_id, &EntryFilter::period(from, to))
        .await?;
    let previous = match previous_year(from, to) {
        Some((pf, pt)) => store.query(organization_id, &EntryFilter::period(pf, pt)).await?,
        None => Vec::new(),
    };
    Ok(PeriodSummary::build(&current, Some(previous.as_slice()), denominator))
}

fn pct(value: Option<Decimal>) -> String {
    value
        .map(|v| format!("{}%", v.round_dp(2)))
        .unwrap_or_else(|| "n/a".to_string())
}

pub async fn run_report(
    config: &Config,
    organization_id: &str,
    from: NaiveDate,
    to: NaiveDate,
    denominator: Option<Decimal>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::create_schema(&pool).await?;
    let store = SqliteLedger::new(pool);
    let summary = build_report(&store, organization_id, from, to, denominator).await?;

    if json {
        let out = serde_json::to_string_pretty(&summary).context("Failed to encode report")?;
        println!("{}", out);
    } else {
        let t = &summary.scope_totals;
        println!("Emissions report: {} ({} to {})", organization_id, from, to);
        println!("================================");
        println!();
        println!("  Entries:        {}", summary.entry_count);
        println!("  Scope 1:        {} kg CO2e", t.scope1.round_dp(2));
        println!("  Scope 2:        {} kg CO2e", t.scope2.round_dp(2));
        println!("  Scope 3:        {} kg CO2e", t.scope3.round_dp(2));
        println!("  Total:          {} kg CO2e", t.total.round_dp(2));
        if !t.unscoped.is_zero() {
            println!("  Unscoped:       {} kg CO2e", t.unscoped.round_dp(2));
        }
        println!();
        println!("  Avoided:        {} kg CO2e", summary.avoided.round_dp(2));
        println!("  Disposal:       {} kg CO2e", summary.disposal.round_dp(2));
        println!("  Net:            {} kg CO2e", summary.net_emissions.round_dp(2));
        println!("  Diversion rate: {}", pct(Some(summary.diversion_rate)));
        println!(
            "  Intensity:      {}",
            summary
                .intensity
                .map(|i| format!("{} kg CO2e/unit", i.round_dp(4)))
                .unwrap_or_else(|| "n/a".to_string())
        );
        println!("  Year over year: {}", pct(summary.year_over_year));
        println!();
    }

    store.pool().close().await;
    Ok(())
}
