//! # Carbon Ledger
//!
//! An emission-factor cache and CO2e calculation engine for sustainability
//! ledgers.
//!
//! Carbon Ledger converts activity records (fuel burned, electricity bought,
//! waste diverted, kilometers traveled) into signed kg CO2e ledger entries,
//! resolving emission factors from an external provider behind a
//! single-flight cache and a monthly call quota. The calculation logic lives
//! in [`carbon_ledger_core`]; this crate adds configuration, SQLite
//! persistence, the HTTP factor source, and the `carbon` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌───────────┐
//! │ activities │──▶│ CalculationEngine │──▶│  SQLite    │
//! │   (JSON)   │   │ cache + quota    │   │  ledger    │
//! └────────────┘   └────────┬─────────┘   └─────┬─────┘
//!                           │ miss              │
//!                           ▼                   ▼
//!                   ┌──────────────┐      ┌──────────┐
//!                   │ HTTP factor  │      │  report  │
//!                   │   provider   │      │ (totals) │
//!                   └──────────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! carbon init
//! carbon calculate activities.json
//! carbon report --org acme --from 2024-01-01 --to 2024-12-31
//! carbon factors list
//! carbon quota
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `LedgerStore` |
//! | [`http_source`] | HTTP factor provider |
//! | [`service`] | Wiring of store, cache, quota and engine |
//! | [`calculate`] | `carbon calculate` |
//! | [`report`] | `carbon report` |
//! | [`factors`] | `carbon factors` and `carbon quota` |

pub mod calculate;
pub mod config;
pub mod db;
pub mod factors;
pub mod http_source;
pub mod migrate;
pub mod report;
pub mod service;
pub mod sqlite_store;
