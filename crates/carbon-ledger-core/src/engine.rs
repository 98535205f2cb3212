//! Activity → CO2e calculation.
//!
//! Pipeline for one activity:
//!
//! 1. validate the record
//! 2. convert the amount into the activity type's base unit
//! 3. resolve the factor (cache, then provider with single-flight, then
//!    configured defaults when the quota is exhausted or no provider exists)
//! 4. check the factor's unit and sign against the activity
//! 5. multiply and build the [`MetricEntry`]
//!
//! The engine never writes to the ledger; see [`crate::ledger`].

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{FactorCache, Lookup};
use crate::error::{CalcError, FetchError};
use crate::factor::{EmissionFactor, FactorKey, GasBreakdown};
use crate::models::{
    ActivityMetadata, ActivityRecord, ActivityType, EntryMetadata, FactorOrigin,
    FactorProvenance, MetricEntry, Scope, SignClass, VerificationStatus,
};
use crate::provider::ProviderClient;
use crate::units::{normalize_unit, UnitConverter};

/// A configured fallback factor, used only when a live lookup is impossible.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultFactor {
    pub activity_type: ActivityType,
    subtype: Option<String>,
    region: Option<String>,
    pub value: Decimal,
    pub gas_breakdown: Option<GasBreakdown>,
    pub source: String,
    pub source_year: i32,
}

impl DefaultFactor {
    /// `subtype` and `region` of `None` match any value.
    pub fn new(
        activity_type: ActivityType,
        subtype: Option<&str>,
        region: Option<&str>,
        value: Decimal,
        source: &str,
        source_year: i32,
    ) -> Self {
        // Normalize through FactorKey so matching uses the same rules as lookups.
        let probe = FactorKey::new(
            activity_type,
            subtype.unwrap_or_default(),
            region.unwrap_or_default(),
            source_year,
            None,
        );
        Self {
            activity_type,
            subtype: subtype.map(|_| probe.subtype().to_string()),
            region: region.map(|_| probe.region().to_string()),
            value,
            gas_breakdown: None,
            source: source.to_string(),
            source_year,
        }
    }

    pub fn with_gas_breakdown(mut self, breakdown: GasBreakdown) -> Self {
        self.gas_breakdown = Some(breakdown);
        self
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn matches(&self, key: &FactorKey) -> bool {
        self.activity_type == key.activity_type()
            && self.subtype.as_deref().map_or(true, |s| s == key.subtype())
            && self.region.as_deref().map_or(true, |r| r == key.region())
    }

    fn specificity(&self) -> u8 {
        (self.subtype.is_some() as u8) * 2 + self.region.is_some() as u8
    }
}

/// Table of fallback factors with most-specific-match lookup.
#[derive(Debug, Clone, Default)]
pub struct DefaultFactors {
    entries: Vec<DefaultFactor>,
}

impl DefaultFactors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, factor: DefaultFactor) {
        self.entries.push(factor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most specific default matching `key`.
    ///
    /// A subtype match outranks a region match; among equals the first
    /// configured wins.
    pub fn resolve(&self, key: &FactorKey) -> Option<EmissionFactor> {
        let mut best: Option<&DefaultFactor> = None;
        for candidate in self.entries.iter().filter(|d| d.matches(key)) {
            if best.map_or(true, |b| candidate.specificity() > b.specificity()) {
                best = Some(candidate);
            }
        }
        best.map(|d| EmissionFactor {
            key: key.clone(),
            value: d.value,
            unit: d.activity_type.base_unit().to_string(),
            gas_breakdown: d.gas_breakdown.clone(),
            source: d.source.clone(),
            source_year: d.source_year,
        })
    }
}

impl FromIterator<DefaultFactor> for DefaultFactors {
    fn from_iter<I: IntoIterator<Item = DefaultFactor>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One failed item of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    /// Position in the submitted batch.
    pub index: usize,
    pub activity_hash: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: CalcError,
}

fn serialize_display<S: serde::Serializer>(err: &CalcError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// Per-item results of [`CalculationEngine::calculate_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Successful entries in submission order.
    pub entries: Vec<MetricEntry>,
    pub failures: Vec<BatchFailure>,
}

pub struct CalculationEngine {
    units: Arc<UnitConverter>,
    cache: Arc<FactorCache>,
    provider: Option<Arc<ProviderClient>>,
    defaults: Arc<DefaultFactors>,
}

impl CalculationEngine {
    pub fn new(units: Arc<UnitConverter>, cache: Arc<FactorCache>) -> Self {
        Self {
            units,
            cache,
            provider: None,
            defaults: Arc::new(DefaultFactors::new()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<ProviderClient>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_defaults(mut self, defaults: Arc<DefaultFactors>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn cache(&self) -> &Arc<FactorCache> {
        &self.cache
    }

    pub async fn calculate(&self, activity: &ActivityRecord) -> Result<MetricEntry, CalcError> {
        validate(activity)?;

        let base_unit = activity.activity_type.base_unit();
        let subtype = Some(activity.subtype.as_str()).filter(|s| !s.trim().is_empty());
        let base_amount = self
            .units
            .convert_for(subtype, activity.amount, &activity.unit, base_unit)?;

        let key = FactorKey::for_activity(activity);
        let (factor, origin) = self.resolve_factor(&key).await?;
        check_factor(activity.activity_type, &key, &factor)?;

        let co2e = base_amount.checked_mul(factor.value).ok_or_else(|| {
            CalcError::Validation(format!(
                "{} {} × {} overflows",
                base_amount, base_unit, factor.value
            ))
        })?;
        let gas_breakdown = factor.gas_breakdown.as_ref().map(|b| b.distribute(co2e));

        debug!(key = %key, co2e = %co2e, origin = ?origin, "activity calculated");

        Ok(MetricEntry {
            id: Uuid::new_v4().to_string(),
            metric_catalog_id: activity.metric_catalog_id.clone(),
            organization_id: activity.organization_id.clone(),
            site_id: activity.site_id.clone(),
            period_start: activity.period_start,
            period_end: activity.period_end,
            activity_type: activity.activity_type,
            scope: activity.scope,
            value: activity.amount,
            unit: activity.unit.clone(),
            co2e_emissions: co2e,
            metadata: EntryMetadata {
                factor: FactorProvenance {
                    factor_id: key.id(),
                    value: factor.value,
                    unit: normalize_unit(&factor.unit),
                    source: factor.source.clone(),
                    source_year: factor.source_year,
                    origin,
                },
                base_amount,
                base_unit: base_unit.to_string(),
                gas_breakdown,
                note: None,
                supersedes: None,
                details: ActivityMetadata::for_activity(activity),
            },
            data_quality: activity.provenance.into(),
            verification_status: VerificationStatus::Pending,
            activity_hash: activity.fingerprint(),
            created_at: Utc::now(),
        })
    }

    /// Calculate every activity concurrently; one failure never aborts the rest.
    ///
    /// Activities sharing a factor key resolve it through a single upstream
    /// fetch.
    pub async fn calculate_batch(&self, activities: &[ActivityRecord]) -> BatchOutcome {
        let results = join_all(activities.iter().map(|a| self.calculate(a))).await;

        let mut outcome = BatchOutcome::default();
        for (index, (activity, result)) in activities.iter().zip(results).enumerate() {
            match result {
                Ok(entry) => outcome.entries.push(entry),
                Err(error) => {
                    warn!(index, activity_type = %activity.activity_type, error = %error, "activity failed");
                    outcome.failures.push(BatchFailure {
                        index,
                        activity_hash: activity.fingerprint(),
                        error,
                    });
                }
            }
        }
        info!(
            succeeded = outcome.entries.len(),
            failed = outcome.failures.len(),
            "batch calculated"
        );
        outcome
    }

    async fn resolve_factor(
        &self,
        key: &FactorKey,
    ) -> Result<(EmissionFactor, FactorOrigin), CalcError> {
        let Some(provider) = &self.provider else {
            if let Some(factor) = self.cache.get(key) {
                return Ok((factor, FactorOrigin::Cache));
            }
            return self.fallback(key, "no factor provider configured");
        };

        let provider = Arc::clone(provider);
        let fetch_key = key.clone();
        let outcome = self
            .cache
            .get_or_fetch(key, move || async move { provider.fetch(&fetch_key).await })
            .await;

        match outcome {
            Ok((factor, Lookup::Hit)) => Ok((factor, FactorOrigin::Cache)),
            Ok((factor, _)) => Ok((factor, FactorOrigin::Provider)),
            Err(FetchError::QuotaExceeded) => self.fallback(key, "factor lookup quota exhausted"),
            Err(e @ (FetchError::Unavailable(_) | FetchError::Timeout(_))) => {
                Err(CalcError::ProviderUnavailable(e.to_string()))
            }
            Err(e @ (FetchError::Rejected { .. } | FetchError::Malformed(_))) => {
                Err(CalcError::FactorUnavailable {
                    key: key.id(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn fallback(
        &self,
        key: &FactorKey,
        reason: &str,
    ) -> Result<(EmissionFactor, FactorOrigin), CalcError> {
        match self.defaults.resolve(key) {
            Some(factor) => {
                info!(key = %key, reason, source = %factor.source, "using default factor");
                Ok((factor, FactorOrigin::Default))
            }
            None => Err(CalcError::FactorUnavailable {
                key: key.id(),
                reason: format!("{} and no default factor is configured", reason),
            }),
        }
    }
}

fn validate(activity: &ActivityRecord) -> Result<(), CalcError> {
    if activity.amount.is_sign_negative() && !activity.amount.is_zero() {
        return Err(CalcError::Validation(format!(
            "amount must be non-negative, got {}",
            activity.amount
        )));
    }
    if activity.unit.trim().is_empty() {
        return Err(CalcError::Validation("unit is required".into()));
    }
    if activity.organization_id.trim().is_empty() {
        return Err(CalcError::Validation("organization_id is required".into()));
    }
    if activity.metric_catalog_id.trim().is_empty() {
        return Err(CalcError::Validation("metric_catalog_id is required".into()));
    }
    if activity.period_end < activity.period_start {
        return Err(CalcError::Validation(format!(
            "period_end {} precedes period_start {}",
            activity.period_end, activity.period_start
        )));
    }
    match (activity.scope, activity.method) {
        (Scope::Scope2, None) => Err(CalcError::Validation(
            "scope_2 activities require a method (location_based or market_based)".into(),
        )),
        (scope, Some(method)) if scope != Scope::Scope2 => Err(CalcError::Validation(format!(
            "method {} only applies to scope_2, activity is {}",
            method.as_str(),
            scope.as_str()
        ))),
        _ => Ok(()),
    }
}

fn check_factor(
    activity_type: ActivityType,
    key: &FactorKey,
    factor: &EmissionFactor,
) -> Result<(), CalcError> {
    let factor_unit = normalize_unit(&factor.unit);
    let base_unit = activity_type.base_unit();
    if factor_unit != base_unit {
        return Err(CalcError::UnsupportedUnit {
            from: factor_unit,
            to: base_unit.to_string(),
        });
    }

    let consistent = match activity_type.sign_class() {
        SignClass::Avoidance => factor.value <= Decimal::ZERO,
        SignClass::Emitting => factor.value >= Decimal::ZERO,
    };
    if !consistent {
        return Err(CalcError::FactorUnavailable {
            key: key.id(),
            reason: format!(
                "factor {} has the wrong sign for {}",
                factor.value, activity_type
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn activity(activity_type: ActivityType, subtype: &str, amount: Decimal, unit: &str) -> ActivityRecord {
        ActivityRecord {
            activity_type,
            subtype: subtype.to_string(),
            amount,
            unit: unit.to_string(),
            scope: Scope::Scope1,
            region: "PT".to_string(),
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            organization_id: "org-1".to_string(),
            site_id: None,
            method: None,
            metric_catalog_id: "catalog-1".to_string(),
            provenance: Provenance::Measured,
        }
    }

    fn engine_with(factors: Vec<EmissionFactor>) -> CalculationEngine {
        let cache = Arc::new(FactorCache::new());
        cache.warm(factors);
        CalculationEngine::new(Arc::new(UnitConverter::default()), cache)
    }

    fn factor_for(activity: &ActivityRecord, value: Decimal) -> EmissionFactor {
        EmissionFactor {
            key: FactorKey::for_activity(activity),
            value,
            unit: activity.activity_type.base_unit().to_string(),
            gas_breakdown: None,
            source: "test".to_string(),
            source_year: 2024,
        }
    }

    #[tokio::test]
    async fn test_cached_factor_multiplies() {
        let a = activity(ActivityType::StationaryCombustion, "natural_gas", dec!(10000), "kWh");
        let engine = engine_with(vec![factor_for(&a, dec!(0.18316))]);
        let entry = engine.calculate(&a).await.unwrap();
        assert_eq!(entry.co2e_emissions, dec!(1831.6));
        assert_eq!(entry.metadata.factor.origin, FactorOrigin::Cache);
        assert_eq!(entry.verification_status, VerificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_zero_amount_is_zero_emissions() {
        let a = activity(ActivityType::StationaryCombustion, "natural_gas", dec!(0), "kWh");
        let engine = engine_with(vec![factor_for(&a, dec!(0.18316))]);
        assert!(engine.calculate(&a).await.unwrap().co2e_emissions.is_zero());
    }

    #[tokio::test]
    async fn test_validation_rules() {
        let engine = engine_with(vec![]);

        let negative = activity(ActivityType::WasteDisposed, "landfill", dec!(-1), "kg");
        assert!(matches!(engine.calculate(&negative).await, Err(CalcError::Validation(_))));

        let mut backwards = activity(ActivityType::WasteDisposed, "landfill", dec!(1), "kg");
        backwards.period_end = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert!(matches!(engine.calculate(&backwards).await, Err(CalcError::Validation(_))));

        let mut no_method = activity(ActivityType::PurchasedElectricity, "grid", dec!(1), "kWh");
        no_method.scope = Scope::Scope2;
        assert!(matches!(engine.calculate(&no_method).await, Err(CalcError::Validation(_))));

        let mut stray_method = activity(ActivityType::StationaryCombustion, "diesel", dec!(1), "l");
        stray_method.method = Some(crate::models::Scope2Method::MarketBased);
        assert!(matches!(engine.calculate(&stray_method).await, Err(CalcError::Validation(_))));
    }

    #[tokio::test]
    async fn test_wrong_sign_factor_is_rejected() {
        let a = activity(ActivityType::WasteDiverted, "paper_recycling", dec!(150), "kg");
        let engine = engine_with(vec![factor_for(&a, dec!(1.05))]);
        assert!(matches!(
            engine.calculate(&a).await,
            Err(CalcError::FactorUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_factor_in_wrong_unit_is_rejected() {
        let a = activity(ActivityType::PurchasedElectricity, "grid", dec!(1), "MWh");
        let mut f = factor_for(&a, dec!(205));
        f.unit = "MWh".to_string();
        let engine = engine_with(vec![f]);
        assert!(matches!(
            engine.calculate(&a).await,
            Err(CalcError::UnsupportedUnit { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_provider_uses_defaults() {
        let a = activity(ActivityType::WasteDisposed, "landfill", dec!(2), "t");
        let defaults: DefaultFactors = vec![
            DefaultFactor::new(ActivityType::WasteDisposed, None, None, dec!(0.4), "generic", 2023),
            DefaultFactor::new(ActivityType::WasteDisposed, Some("Landfill"), Some("pt"), dec!(0.5), "national", 2023),
            DefaultFactor::new(ActivityType::WasteDisposed, None, Some("PT"), dec!(0.45), "regional", 2023),
        ]
        .into_iter()
        .collect();
        let engine = engine_with(vec![]).with_defaults(Arc::new(defaults));

        let entry = engine.calculate(&a).await.unwrap();
        assert_eq!(entry.metadata.base_amount, dec!(2000));
        assert_eq!(entry.co2e_emissions, dec!(1000.0));
        assert_eq!(entry.metadata.factor.origin, FactorOrigin::Default);
        assert_eq!(entry.metadata.factor.source, "national");
        // defaults are never cached
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_default_specificity_prefers_subtype_over_region() {
        let defaults: DefaultFactors = vec![
            DefaultFactor::new(ActivityType::WasteDisposed, None, Some("PT"), dec!(0.45), "regional", 2023),
            DefaultFactor::new(ActivityType::WasteDisposed, Some("landfill"), None, dec!(0.5), "by-route", 2023),
        ]
        .into_iter()
        .collect();
        let key = FactorKey::new(ActivityType::WasteDisposed, "landfill", "PT", 2024, None);
        assert_eq!(defaults.resolve(&key).unwrap().source, "by-route");

        let other = FactorKey::new(ActivityType::WasteGenerated, "landfill", "PT", 2024, None);
        assert!(defaults.resolve(&other).is_none());
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let good = activity(ActivityType::StationaryCombustion, "natural_gas", dec!(100), "kWh");
        let bad_unit = activity(ActivityType::StationaryCombustion, "natural_gas", dec!(100), "furlong");
        let engine = engine_with(vec![factor_for(&good, dec!(0.2))]);

        let outcome = engine
            .calculate_batch(&[good.clone(), bad_unit.clone(), good.clone()])
            .await;
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(outcome.failures[0].activity_hash, bad_unit.fingerprint());
        assert!(matches!(outcome.failures[0].error, CalcError::UnsupportedUnit { .. }));
    }
}
