//! # Carbon Ledger Core
//!
//! Shared logic for Carbon Ledger: the activity and ledger data model,
//! unit conversion, the emission-factor cache, quota tracking, the
//! provider client, the calculation engine, and aggregation.
//!
//! This crate contains no sqlx, reqwest, or filesystem I/O. The only
//! runtime dependency is tokio's timer, used to bound provider calls.
//!
//! ## Data flow
//!
//! ```text
//! ActivityRecord ──▶ CalculationEngine ──▶ MetricEntry ──▶ LedgerWriter ──▶ LedgerStore
//!                        │      ▲                                              │
//!                        ▼      │                                              ▼
//!                   FactorCache (single-flight)                          aggregate::*
//!                        │ miss
//!                        ▼
//!                   ProviderClient ──▶ QuotaTracker
//!                        │
//!                        ▼
//!                   FactorSource (HTTP, fakes)
//! ```

pub mod aggregate;
pub mod cache;
pub mod engine;
pub mod error;
pub mod factor;
pub mod ledger;
pub mod models;
pub mod provider;
pub mod quota;
pub mod store;
pub mod units;

pub use error::{CalcError, FetchError};
