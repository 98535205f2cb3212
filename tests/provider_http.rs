//! HTTP factor source against an in-process axum server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use carbon_ledger::http_source::HttpFactorSource;
use carbon_ledger_core::factor::FactorKey;
use carbon_ledger_core::models::{ActivityType, Scope2Method};
use carbon_ledger_core::provider::{ProviderClient, RetryPolicy};
use carbon_ledger_core::quota::QuotaTracker;
use carbon_ledger_core::FetchError;

/// How the fake provider answers.
#[derive(Clone, Copy)]
enum Behavior {
    Ok,
    /// Fail with 503 this many times, then succeed.
    FlakyThenOk(usize),
    NotFound,
    Slow,
    Garbage,
}

#[derive(Clone)]
struct FakeProvider {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    seen_auth: Arc<parking_lot::Mutex<Option<String>>>,
    seen_query: Arc<parking_lot::Mutex<HashMap<String, String>>>,
}

async fn factors(
    State(fake): State<FakeProvider>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let n = fake.calls.fetch_add(1, Ordering::SeqCst);
    *fake.seen_auth.lock() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *fake.seen_query.lock() = query;

    let body = json!({
        "value": "0.161",
        "unit": "kWh",
        "source": "grid operator",
        "source_year": 2024,
        "gas_breakdown": {"co2": "0.95", "ch4": "0.05"}
    });

    match fake.behavior {
        Behavior::Ok => (StatusCode::OK, Json(body)),
        Behavior::FlakyThenOk(failures) if n < failures => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
        }
        Behavior::FlakyThenOk(_) => (StatusCode::OK, Json(body)),
        Behavior::NotFound => (StatusCode::NOT_FOUND, Json(json!({"error": "no such factor"}))),
        Behavior::Slow => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            (StatusCode::OK, Json(body))
        }
        Behavior::Garbage => (StatusCode::OK, Json(json!({"unexpected": true}))),
    }
}

async fn spawn_provider(behavior: Behavior) -> (String, FakeProvider) {
    let fake = FakeProvider {
        behavior,
        calls: Arc::new(AtomicUsize::new(0)),
        seen_auth: Arc::new(parking_lot::Mutex::new(None)),
        seen_query: Arc::new(parking_lot::Mutex::new(HashMap::new())),
    };
    let app = Router::new()
        .route("/v1/factors", get(factors))
        .with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/v1/", addr), fake)
}

fn electricity_key() -> FactorKey {
    FactorKey::new(
        ActivityType::PurchasedElectricity,
        "grid",
        "pt",
        2024,
        Some(Scope2Method::LocationBased),
    )
}

fn client(base_url: &str, api_key: Option<&str>, limit: u64) -> ProviderClient {
    let source = HttpFactorSource::new(base_url, api_key.map(str::to_string), Duration::from_secs(5))
        .unwrap();
    let quota = Arc::new(QuotaTracker::new(limit, chrono::Duration::days(30), Utc::now()));
    ProviderClient::new(Arc::new(source), quota).with_retry(RetryPolicy {
        max_retries: 2,
        backoff: vec![Duration::from_millis(10)],
    })
}

// ─── Success ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_parses_factor_and_sends_bearer_token() {
    let (url, fake) = spawn_provider(Behavior::Ok).await;
    let client = client(&url, Some("secret-token"), 10);

    let factor = client.fetch(&electricity_key()).await.unwrap();
    assert_eq!(factor.value, dec!(0.161));
    assert_eq!(factor.unit, "kWh");
    assert_eq!(factor.source, "grid operator");
    assert_eq!(factor.key, electricity_key());
    assert!(factor.gas_breakdown.is_some());

    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fake.seen_auth.lock().as_deref(), Some("Bearer secret-token"));
    let query = fake.seen_query.lock().clone();
    assert_eq!(query.get("activity_type").map(String::as_str), Some("purchased_electricity"));
    assert_eq!(query.get("region").map(String::as_str), Some("PT"));
    assert_eq!(query.get("method").map(String::as_str), Some("location_based"));
    assert_eq!(client.quota().snapshot().calls_this_window, 1);
}

#[tokio::test]
async fn test_no_auth_header_without_key() {
    let (url, fake) = spawn_provider(Behavior::Ok).await;
    client(&url, None, 10).fetch(&electricity_key()).await.unwrap();
    assert_eq!(*fake.seen_auth.lock(), None);
}

// ─── Failures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (url, fake) = spawn_provider(Behavior::FlakyThenOk(2)).await;
    let client = client(&url, None, 10);

    let factor = client.fetch(&electricity_key()).await.unwrap();
    assert_eq!(factor.value, dec!(0.161));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    // Every attempt is billed.
    assert_eq!(client.quota().snapshot().calls_this_window, 3);
}

#[tokio::test]
async fn test_retries_exhausted_reports_unavailable() {
    let (url, fake) = spawn_provider(Behavior::FlakyThenOk(10)).await;
    let err = client(&url, None, 10).fetch(&electricity_key()).await.unwrap_err();
    assert!(matches!(err, FetchError::Unavailable(_)), "got {:?}", err);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let (url, fake) = spawn_provider(Behavior::NotFound).await;
    let err = client(&url, None, 10).fetch(&electricity_key()).await.unwrap_err();
    assert!(matches!(err, FetchError::Rejected { status: 404, .. }), "got {:?}", err);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_body() {
    let (url, _fake) = spawn_provider(Behavior::Garbage).await;
    let err = client(&url, None, 10).fetch(&electricity_key()).await.unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let (url, _fake) = spawn_provider(Behavior::Slow).await;
    let client = client(&url, None, 10)
        .with_retry(RetryPolicy::none())
        .with_timeout(Duration::from_millis(200));
    let err = client.fetch(&electricity_key()).await.unwrap_err();
    assert_eq!(err, FetchError::Timeout(200));
}

#[tokio::test]
async fn test_exhausted_quota_skips_network() {
    let (url, fake) = spawn_provider(Behavior::Ok).await;
    let err = client(&url, None, 0).fetch(&electricity_key()).await.unwrap_err();
    assert_eq!(err, FetchError::QuotaExceeded);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}
