//! `carbon calculate`: run a batch of activities through the engine and
//! record the results.

use std::path::Path;

use anyhow::{Context, Result};

use carbon_ledger_core::models::ActivityRecord;

use crate::config::Config;
use crate::service::Service;

/// Counts reported at the end of a run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CalculateSummary {
    pub calculated: usize,
    pub recorded: usize,
    pub already_recorded: usize,
    pub failed: usize,
}

pub fn load_activities(path: &Path) -> Result<Vec<ActivityRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read activities file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse activities in {}", path.display()))
}

pub async fn run_calculate(config: &Config, path: &Path, dry_run: bool) -> Result<CalculateSummary> {
    let activities = load_activities(path)?;
    let mut service = Service::open(config).await?;
    let summary = calculate_and_record(&mut service, &activities, dry_run).await?;

    println!();
    println!(
        "Calculated {} of {} activities: {} recorded, {} already recorded, {} failed.",
        summary.calculated,
        activities.len(),
        summary.recorded,
        summary.already_recorded,
        summary.failed
    );

    Ok(summary)
}

/// Run the batch, save the quota and factor state it produced, then record
/// the new entries unless `dry_run`.
pub async fn calculate_and_record(
    service: &mut Service,
    activities: &[ActivityRecord],
    dry_run: bool,
) -> Result<CalculateSummary> {
    let outcome = service.engine.calculate_batch(activities).await;

    // Lookups are billed whether or not the entries get recorded.
    service.persist_state().await?;

    let mut summary = CalculateSummary {
        calculated: outcome.entries.len(),
        failed: outcome.failures.len(),
        ..CalculateSummary::default()
    };

    for entry in &outcome.entries {
        let status = if dry_run {
            "dry-run"
        } else if service.writer.record_if_new(entry).await? {
            summary.recorded += 1;
            "recorded"
        } else {
            summary.already_recorded += 1;
            "exists"
        };
        println!(
            "  {:<22} {:>16} kg CO2e  {:<8} [{:?}] {}",
            entry.activity_type.as_str(),
            entry.co2e_emissions.round_dp(4),
            entry.scope.as_str(),
            entry.metadata.factor.origin,
            status
        );
    }

    for failure in &outcome.failures {
        println!("  #{:<3} failed: {}", failure.index, failure.error);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon_ledger_core::models::{ActivityType, Provenance, Scope};
    use carbon_ledger_core::store::LedgerStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn config_in(dir: &Path) -> Config {
        toml::from_str(&format!(
            r#"
            [db]
            path = "{}/carbon.sqlite"

            [[defaults]]
            activity_type = "waste_diverted"
            value = "-1.05"
            source = "recycling study"
            source_year = 2023
            "#,
            dir.display()
        ))
        .unwrap()
    }

    fn paper() -> ActivityRecord {
        ActivityRecord {
            activity_type: ActivityType::WasteDiverted,
            subtype: "paper_recycling".into(),
            amount: dec!(150),
            unit: "kg".into(),
            scope: Scope::Scope3,
            region: "PT".into(),
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            organization_id: "acme".into(),
            site_id: None,
            method: None,
            metric_catalog_id: "waste".into(),
            provenance: Provenance::Measured,
        }
    }

    #[tokio::test]
    async fn test_records_new_entries_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut service = Service::open(&config_in(tmp.path())).await.unwrap();

        let first = calculate_and_record(&mut service, &[paper()], false).await.unwrap();
        assert_eq!(first.recorded, 1);
        let again = calculate_and_record(&mut service, &[paper()], false).await.unwrap();
        assert_eq!(again.already_recorded, 1);
        let dry = calculate_and_record(&mut service, &[paper()], true).await.unwrap();
        assert_eq!((dry.calculated, dry.recorded, dry.already_recorded), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_quota_is_saved_when_recording_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut service = Service::open(&config_in(tmp.path())).await.unwrap();
        // Calls already billed during this run.
        assert!(service.quota.try_acquire());
        assert!(service.quota.try_acquire());

        sqlx::query("DROP TABLE metric_entries")
            .execute(service.store.pool())
            .await
            .unwrap();
        assert!(calculate_and_record(&mut service, &[paper()], false).await.is_err());

        let saved = service.store.load_quota().await.unwrap().unwrap();
        assert_eq!(saved.calls_this_window, 2);
    }
}
