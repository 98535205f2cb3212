use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use rust_decimal::Decimal;
use tempfile::TempDir;

fn carbon_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_carbon"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    // Offline: no provider, so only the defaults below resolve.
    let config_content = format!(
        r#"[db]
path = "{}/data/carbon.sqlite"

[quota]
monthly_limit = 1000

[[defaults]]
activity_type = "purchased_electricity"
region = "PT"
value = "0.161"
source = "regional average"
source_year = 2023

[[defaults]]
activity_type = "waste_diverted"
subtype = "paper_recycling"
value = "-1.05"
source = "recycling study"
source_year = 2023
"#,
        root.display()
    );
    let config_path = config_dir.join("carbon.toml");
    fs::write(&config_path, config_content).unwrap();

    let activities = r#"[
  {
    "activity_type": "purchased_electricity",
    "subtype": "grid",
    "amount": "10",
    "unit": "MWh",
    "scope": "scope_2",
    "region": "pt",
    "period_start": "2024-01-01",
    "period_end": "2024-12-31",
    "organization_id": "acme",
    "method": "location_based",
    "metric_catalog_id": "electricity"
  },
  {
    "activity_type": "waste_diverted",
    "subtype": "paper_recycling",
    "amount": "150",
    "unit": "kg",
    "scope": "scope_3",
    "region": "PT",
    "period_start": "2024-01-01",
    "period_end": "2024-12-31",
    "organization_id": "acme",
    "metric_catalog_id": "waste"
  },
  {
    "activity_type": "business_travel",
    "subtype": "air",
    "amount": "1200",
    "unit": "km",
    "scope": "scope_3",
    "region": "PT",
    "period_start": "2024-03-01",
    "period_end": "2024-03-31",
    "organization_id": "acme",
    "metric_catalog_id": "travel"
  }
]"#;
    fs::write(root.join("activities.json"), activities).unwrap();

    (tmp, config_path)
}

fn run_carbon(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = carbon_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run carbon binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn activities_path(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("activities.json")
        .to_string_lossy()
        .to_string()
}

fn decimal_at(value: &serde_json::Value, path: &[&str]) -> Decimal {
    let mut v = value;
    for p in path {
        v = &v[*p];
    }
    match v {
        serde_json::Value::String(s) => s.parse().unwrap(),
        serde_json::Value::Number(n) => n.to_string().parse().unwrap(),
        other => panic!("expected a decimal at {:?}, got {}", path, other),
    }
}

#[test]
fn test_init() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_carbon(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));

    // Idempotent
    let (_, stderr, success) = run_carbon(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_carbon(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_calculate_offline_with_defaults() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);
    let file = activities_path(&config);

    let (stdout, stderr, success) = run_carbon(&config, &["calculate", &file]);
    assert!(success, "calculate failed: {}", stderr);
    assert!(stdout.contains("purchased_electricity"));
    assert!(stdout.contains("failed"), "travel has no factor: {}", stdout);
    assert!(stdout.contains(
        "Calculated 2 of 3 activities: 2 recorded, 0 already recorded, 1 failed."
    ));
}

#[test]
fn test_calculate_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);
    let file = activities_path(&config);

    run_carbon(&config, &["calculate", &file]);
    let (stdout, stderr, success) = run_carbon(&config, &["calculate", &file]);
    assert!(success, "second calculate failed: {}", stderr);
    assert!(stdout.contains("0 recorded, 2 already recorded"), "{}", stdout);
}

#[test]
fn test_dry_run_records_nothing() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);
    let file = activities_path(&config);

    let (stdout, _, success) = run_carbon(&config, &["calculate", &file, "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));

    let (stdout, _, _) = run_carbon(&config, &["calculate", &file]);
    assert!(stdout.contains("2 recorded, 0 already recorded"), "{}", stdout);
}

#[test]
fn test_report_json() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);
    run_carbon(&config, &["calculate", &activities_path(&config)]);

    let (stdout, stderr, success) = run_carbon(
        &config,
        &[
            "report",
            "--org",
            "acme",
            "--from",
            "2024-01-01",
            "--to",
            "2024-12-31",
            "--denominator",
            "10",
            "--json",
        ],
    );
    assert!(success, "report failed: {}", stderr);

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["entry_count"], 2);
    assert_eq!(decimal_at(&report, &["scope_totals", "scope2"]), Decimal::new(1610, 0));
    assert_eq!(decimal_at(&report, &["scope_totals", "scope3"]), Decimal::new(-1575, 1));
    assert_eq!(decimal_at(&report, &["scope_totals", "total"]), Decimal::new(14525, 1));
    assert_eq!(decimal_at(&report, &["avoided"]), Decimal::new(-1575, 1));
    assert_eq!(decimal_at(&report, &["intensity"]), Decimal::new(14525, 2));
    // Nothing recorded for 2023.
    assert!(report["year_over_year"].is_null());
}

#[test]
fn test_report_other_org_is_empty() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);
    run_carbon(&config, &["calculate", &activities_path(&config)]);

    let (stdout, _, success) = run_carbon(
        &config,
        &["report", "--org", "globex", "--from", "2024-01-01", "--to", "2024-12-31"],
    );
    assert!(success);
    assert!(stdout.contains("Entries:        0"));
}

#[test]
fn test_report_rejects_inverted_period() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);
    let (_, stderr, success) = run_carbon(
        &config,
        &["report", "--org", "acme", "--from", "2024-12-31", "--to", "2024-01-01"],
    );
    assert!(!success);
    assert!(stderr.contains("before"));
}

#[test]
fn test_factors_list_and_refresh() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);
    run_carbon(&config, &["calculate", &activities_path(&config)]);

    // Default factors are never cached.
    let (stdout, _, success) = run_carbon(&config, &["factors", "list"]);
    assert!(success);
    assert!(stdout.contains("No factors cached."));

    let (stdout, _, success) = run_carbon(&config, &["factors", "refresh", "--all"]);
    assert!(success);
    assert!(stdout.contains("Invalidated 0 factor(s)."));

    let (_, _, success) = run_carbon(&config, &["factors", "refresh", "not-a-key"]);
    assert!(!success);

    let (_, _, success) = run_carbon(&config, &["factors", "refresh"]);
    assert!(!success);
}

#[test]
fn test_quota_status() {
    let (_tmp, config) = setup_test_env();
    run_carbon(&config, &["init"]);

    let (stdout, _, success) = run_carbon(&config, &["quota"]);
    assert!(success);
    assert!(stdout.contains("No lookups recorded yet."));

    run_carbon(&config, &["calculate", &activities_path(&config)]);
    let (stdout, _, success) = run_carbon(&config, &["quota"]);
    assert!(success);
    assert!(stdout.contains("Used:       0 / 1000"), "{}", stdout);
}
