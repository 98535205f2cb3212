//! HTTP [`FactorSource`] backed by `reqwest`.
//!
//! One `lookup` is one `GET {base_url}/factors` request; retries, quota
//! and the per-attempt deadline are applied by
//! [`ProviderClient`](carbon_ledger_core::provider::ProviderClient).
//!
//! Status mapping:
//!
//! | Response | Result |
//! |----------|--------|
//! | 2xx | parsed factor, or `Malformed` if the body does not decode |
//! | 429, 5xx | `Unavailable` (retried) |
//! | other 4xx | `Rejected` (not retried) |
//! | transport error | `Unavailable` |
//! | client timeout | `Timeout` |

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use carbon_ledger_core::factor::{EmissionFactor, FactorKey, GasBreakdown};
use carbon_ledger_core::provider::FactorSource;
use carbon_ledger_core::FetchError;

/// Response body of `GET /factors`.
#[derive(Debug, Deserialize)]
struct FactorResponse {
    value: Decimal,
    unit: String,
    #[serde(default)]
    gas_breakdown: Option<GasBreakdown>,
    source: String,
    source_year: i32,
}

pub struct HttpFactorSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpFactorSource {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    fn query_params(key: &FactorKey) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("activity_type", key.activity_type().as_str().to_string()),
            ("year", key.year().to_string()),
        ];
        if !key.subtype().is_empty() {
            params.push(("subtype", key.subtype().to_string()));
        }
        if !key.region().is_empty() {
            params.push(("region", key.region().to_string()));
        }
        if let Some(method) = key.method() {
            params.push(("method", method.as_str().to_string()));
        }
        params
    }

    fn transport_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout.as_millis() as u64)
        } else {
            FetchError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl FactorSource for HttpFactorSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn lookup(&self, key: &FactorKey) -> Result<EmissionFactor, FetchError> {
        let mut request = self
            .client
            .get(format!("{}/factors", self.base_url))
            .query(&Self::query_params(key));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status.is_success() {
            let body: FactorResponse = response
                .json()
                .await
                .map_err(|e| FetchError::Malformed(e.to_string()))?;
            return Ok(EmissionFactor {
                key: key.clone(),
                value: body.value,
                unit: body.unit,
                gas_breakdown: body.gas_breakdown,
                source: body.source,
                source_year: body.source_year,
            });
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FetchError::Unavailable(format!("{}: {}", status, body_text)));
        }
        Err(FetchError::Rejected {
            status: status.as_u16(),
            message: body_text,
        })
    }
}
