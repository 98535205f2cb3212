//! Emission factors and their lookup keys.
//!
//! A [`FactorKey`] normalizes its components on construction so that the
//! same logical factor always produces the same key, whoever builds it.
//! The canonical id has the form
//! `{activity_type}/{subtype}/{region}/{year}/{method}` with `-` standing
//! in for an empty component:
//!
//! ```rust
//! use carbon_ledger_core::factor::FactorKey;
//! use carbon_ledger_core::models::{ActivityType, Scope2Method};
//!
//! let key = FactorKey::new(
//!     ActivityType::PurchasedElectricity,
//!     " Grid ",
//!     "pt",
//!     2024,
//!     Some(Scope2Method::LocationBased),
//! );
//! assert_eq!(key.id(), "purchased_electricity/grid/PT/2024/location_based");
//! assert_eq!(key.id().parse::<FactorKey>().unwrap(), key);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{ActivityRecord, ActivityType, Scope2Method};

const EMPTY_COMPONENT: &str = "-";

/// Composite lookup key for an emission factor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FactorKey {
    activity_type: ActivityType,
    subtype: String,
    region: String,
    year: i32,
    method: Option<Scope2Method>,
}

fn normalize_component(s: &str, case: fn(&str) -> String) -> String {
    let normalized: String = case(s.trim())
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' { '_' } else { c })
        .collect();
    // `-` is how an empty component renders, so it is one.
    if normalized == EMPTY_COMPONENT {
        String::new()
    } else {
        normalized
    }
}

fn normalize_subtype(s: &str) -> String {
    normalize_component(s, str::to_lowercase)
}

fn normalize_region(s: &str) -> String {
    normalize_component(s, str::to_uppercase)
}

impl FactorKey {
    pub fn new(
        activity_type: ActivityType,
        subtype: &str,
        region: &str,
        year: i32,
        method: Option<Scope2Method>,
    ) -> Self {
        Self {
            activity_type,
            subtype: normalize_subtype(subtype),
            region: normalize_region(region),
            year,
            method,
        }
    }

    /// Key for the factor an activity needs; the year is the period's start year.
    pub fn for_activity(activity: &ActivityRecord) -> Self {
        Self::new(
            activity.activity_type,
            &activity.subtype,
            &activity.region,
            activity.period_start.year(),
            activity.method,
        )
    }

    pub fn activity_type(&self) -> ActivityType {
        self.activity_type
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn method(&self) -> Option<Scope2Method> {
        self.method
    }

    pub fn id(&self) -> String {
        fn component(s: &str) -> &str {
            if s.is_empty() {
                EMPTY_COMPONENT
            } else {
                s
            }
        }
        format!(
            "{}/{}/{}/{}/{}",
            self.activity_type.as_str(),
            component(&self.subtype),
            component(&self.region),
            self.year,
            self.method.map(|m| m.as_str()).unwrap_or(EMPTY_COMPONENT)
        )
    }
}

impl fmt::Display for FactorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for FactorKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 5 {
            return Err(format!(
                "factor key '{}' must have 5 '/'-separated components",
                s
            ));
        }
        let activity_type: ActivityType = parts[0].parse()?;
        let year: i32 = parts[3]
            .parse()
            .map_err(|_| format!("invalid year '{}' in factor key", parts[3]))?;
        let method = match parts[4] {
            EMPTY_COMPONENT => None,
            m => Some(m.parse::<Scope2Method>()?),
        };
        Ok(Self::new(activity_type, parts[1], parts[2], year, method))
    }
}

impl TryFrom<String> for FactorKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FactorKey> for String {
    fn from(key: FactorKey) -> Self {
        key.id()
    }
}

/// Allowed deviation of summed gas proportions from 1.0.
const BREAKDOWN_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Per-gas share of a factor's total, e.g. `{co2: 0.98, ch4: 0.015, n2o: 0.005}`.
///
/// Proportions are non-negative and sum to 1.0; when applied to a negative
/// (avoided) total, each gas receives the same sign as the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Decimal>", into = "BTreeMap<String, Decimal>")]
pub struct GasBreakdown(BTreeMap<String, Decimal>);

impl GasBreakdown {
    pub fn new(proportions: BTreeMap<String, Decimal>) -> Result<Self, String> {
        if proportions.is_empty() {
            return Err("gas breakdown must name at least one gas".to_string());
        }
        if let Some((gas, p)) = proportions.iter().find(|(_, p)| p.is_sign_negative()) {
            return Err(format!("gas proportion for '{}' is negative: {}", gas, p));
        }
        let sum: Decimal = proportions.values().copied().sum();
        if (sum - Decimal::ONE).abs() > BREAKDOWN_TOLERANCE {
            return Err(format!("gas proportions sum to {}, expected 1.0", sum));
        }
        Ok(Self(proportions))
    }

    pub fn proportions(&self) -> &BTreeMap<String, Decimal> {
        &self.0
    }

    /// Split `total` across gases by proportion.
    ///
    /// The amounts always sum to `total` exactly: whatever the proportions
    /// leave over (they may be off 1.0 by the tolerance) goes to the gas
    /// with the largest share.
    pub fn distribute(&self, total: Decimal) -> BTreeMap<String, Decimal> {
        let mut amounts: BTreeMap<String, Decimal> = self
            .0
            .iter()
            .map(|(gas, p)| (gas.clone(), total.saturating_mul(*p)))
            .collect();
        let assigned = amounts
            .values()
            .fold(Decimal::ZERO, |sum, a| sum.saturating_add(*a));
        let remainder = total.saturating_sub(assigned);
        let largest = self
            .0
            .iter()
            .fold(None::<(&String, Decimal)>, |best, (gas, p)| match best {
                Some((_, bp)) if bp >= *p => best,
                _ => Some((gas, *p)),
            });
        if let Some((gas, _)) = largest {
            if let Some(amount) = amounts.get_mut(gas) {
                *amount = amount.saturating_add(remainder);
            }
        }
        amounts
    }
}

impl TryFrom<BTreeMap<String, Decimal>> for GasBreakdown {
    type Error = String;

    fn try_from(value: BTreeMap<String, Decimal>) -> Result<Self, Self::Error> {
        GasBreakdown::new(value)
    }
}

impl From<GasBreakdown> for BTreeMap<String, Decimal> {
    fn from(value: GasBreakdown) -> Self {
        value.0
    }
}

/// A resolved conversion ratio: kg CO2e per base unit of the activity.
///
/// `value` is negative for avoided-emission factors (recycling, composting).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionFactor {
    pub key: FactorKey,
    pub value: Decimal,
    /// Denominator unit; must match the activity type's base unit.
    pub unit: String,
    #[serde(default)]
    pub gas_breakdown: Option<GasBreakdown>,
    pub source: String,
    pub source_year: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_key_normalizes_components() {
        let a = FactorKey::new(ActivityType::WasteDiverted, "Paper Recycling", " pt", 2024, None);
        let b = FactorKey::new(ActivityType::WasteDiverted, "paper_recycling", "PT ", 2024, None);
        assert_eq!(a, b);
        assert_eq!(a.id(), "waste_diverted/paper_recycling/PT/2024/-");
    }

    #[test]
    fn test_key_components_cannot_collide_through_separator() {
        let a = FactorKey::new(ActivityType::WasteDisposed, "a/b", "PT", 2024, None);
        assert_eq!(a.id().split('/').count(), 5);
        assert_eq!(a.id().parse::<FactorKey>().unwrap(), a);
    }

    #[test]
    fn test_distinct_keys_have_distinct_ids() {
        let dash = FactorKey::new(ActivityType::WasteDisposed, " - ", "-", 2024, None);
        let empty = FactorKey::new(ActivityType::WasteDisposed, "", "", 2024, None);
        assert_eq!(dash, empty);
        assert_eq!(dash.id().parse::<FactorKey>().unwrap(), dash);

        let keys = [
            empty,
            FactorKey::new(ActivityType::WasteDisposed, "--", "", 2024, None),
            FactorKey::new(ActivityType::WasteDisposed, "a_b", "", 2024, None),
            FactorKey::new(ActivityType::WasteDisposed, "", "a_b", 2024, None),
            FactorKey::new(ActivityType::WasteDisposed, "landfill", "PT", 2024, None),
            FactorKey::new(ActivityType::WasteDisposed, "landfill", "PT", 2025, None),
        ];
        for (i, a) in keys.iter().enumerate() {
            assert_eq!(&a.id().parse::<FactorKey>().unwrap(), a);
            for b in &keys[i + 1..] {
                assert_ne!(a.id(), b.id(), "{:?} and {:?} share an id", a, b);
            }
        }
    }

    #[test]
    fn test_key_parse_rejects_garbage() {
        assert!("purchased_electricity/grid/PT".parse::<FactorKey>().is_err());
        assert!("purchased_electricity/grid/PT/twenty/-".parse::<FactorKey>().is_err());
        assert!("purchased_electricity/grid/PT/2024/solar".parse::<FactorKey>().is_err());
    }

    #[test]
    fn test_empty_components_roundtrip() {
        let key = FactorKey::new(ActivityType::WaterWithdrawal, "", "", 2023, None);
        assert_eq!(key.id(), "water_withdrawal/-/-/2023/-");
        assert_eq!(key.id().parse::<FactorKey>().unwrap(), key);
    }

    #[test]
    fn test_key_serializes_as_id() {
        let key = FactorKey::new(ActivityType::BusinessTravel, "rail", "EU", 2024, None);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"business_travel/rail/EU/2024/-\"");
        let back: FactorKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_breakdown_validation() {
        let ok: BTreeMap<String, Decimal> = [
            ("co2".to_string(), dec!(0.98)),
            ("ch4".to_string(), dec!(0.015)),
            ("n2o".to_string(), dec!(0.005)),
        ]
        .into_iter()
        .collect();
        assert!(GasBreakdown::new(ok).is_ok());

        let short: BTreeMap<String, Decimal> =
            [("co2".to_string(), dec!(0.9))].into_iter().collect();
        assert!(GasBreakdown::new(short).is_err());

        let negative: BTreeMap<String, Decimal> = [
            ("co2".to_string(), dec!(1.1)),
            ("ch4".to_string(), dec!(-0.1)),
        ]
        .into_iter()
        .collect();
        assert!(GasBreakdown::new(negative).is_err());
    }

    #[test]
    fn test_breakdown_keeps_sign_of_total() {
        let breakdown = GasBreakdown::new(
            [
                ("co2".to_string(), dec!(0.8)),
                ("ch4".to_string(), dec!(0.2)),
            ]
            .into_iter()
            .collect(),
        )
        .unwrap();
        let split = breakdown.distribute(dec!(-157.5));
        assert_eq!(split["co2"], dec!(-126.0));
        assert_eq!(split["ch4"], dec!(-31.5));
    }

    #[test]
    fn test_breakdown_amounts_sum_to_total_within_tolerance() {
        // 0.9999 is accepted; the missing share lands on the largest gas.
        let breakdown = GasBreakdown::new(
            [
                ("co2".to_string(), dec!(0.6)),
                ("ch4".to_string(), dec!(0.3999)),
            ]
            .into_iter()
            .collect(),
        )
        .unwrap();
        for total in [dec!(100), dec!(-157.5), dec!(2050.0)] {
            let split = breakdown.distribute(total);
            assert_eq!(split.values().copied().sum::<Decimal>(), total);
            assert_eq!(split["ch4"], total * dec!(0.3999));
        }
        let split = breakdown.distribute(dec!(100));
        assert_eq!(split["co2"], dec!(60.01));
    }
}
