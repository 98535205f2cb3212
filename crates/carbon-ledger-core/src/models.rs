//! Core data models used throughout Carbon Ledger.
//!
//! These types represent the activity records that enter the calculation
//! engine and the immutable ledger rows ([`MetricEntry`]) that come out of it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of observed activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    StationaryCombustion,
    MobileCombustion,
    PurchasedElectricity,
    PurchasedHeat,
    WaterWithdrawal,
    WaterDischarge,
    WasteGenerated,
    WasteDiverted,
    WasteDisposed,
    BusinessTravel,
    EmployeeCommuting,
}

/// Whether an activity's factor emits (`>= 0`) or avoids (`<= 0`) CO2e.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignClass {
    Emitting,
    Avoidance,
}

impl ActivityType {
    pub const ALL: [ActivityType; 11] = [
        ActivityType::StationaryCombustion,
        ActivityType::MobileCombustion,
        ActivityType::PurchasedElectricity,
        ActivityType::PurchasedHeat,
        ActivityType::WaterWithdrawal,
        ActivityType::WaterDischarge,
        ActivityType::WasteGenerated,
        ActivityType::WasteDiverted,
        ActivityType::WasteDisposed,
        ActivityType::BusinessTravel,
        ActivityType::EmployeeCommuting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::StationaryCombustion => "stationary_combustion",
            ActivityType::MobileCombustion => "mobile_combustion",
            ActivityType::PurchasedElectricity => "purchased_electricity",
            ActivityType::PurchasedHeat => "purchased_heat",
            ActivityType::WaterWithdrawal => "water_withdrawal",
            ActivityType::WaterDischarge => "water_discharge",
            ActivityType::WasteGenerated => "waste_generated",
            ActivityType::WasteDiverted => "waste_diverted",
            ActivityType::WasteDisposed => "waste_disposed",
            ActivityType::BusinessTravel => "business_travel",
            ActivityType::EmployeeCommuting => "employee_commuting",
        }
    }

    /// Unit every amount of this type is normalized into before the
    /// factor is applied. Factors are expressed per this unit.
    pub fn base_unit(&self) -> &'static str {
        match self {
            ActivityType::StationaryCombustion
            | ActivityType::MobileCombustion
            | ActivityType::PurchasedElectricity
            | ActivityType::PurchasedHeat => "kWh",
            ActivityType::WaterWithdrawal | ActivityType::WaterDischarge => "m3",
            ActivityType::WasteGenerated
            | ActivityType::WasteDiverted
            | ActivityType::WasteDisposed => "kg",
            ActivityType::BusinessTravel | ActivityType::EmployeeCommuting => "km",
        }
    }

    pub fn sign_class(&self) -> SignClass {
        match self {
            ActivityType::WasteDiverted => SignClass::Avoidance,
            _ => SignClass::Emitting,
        }
    }

    pub fn is_waste(&self) -> bool {
        matches!(
            self,
            ActivityType::WasteGenerated | ActivityType::WasteDiverted | ActivityType::WasteDisposed
        )
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown activity type: '{}'", s))
    }
}

/// GHG Protocol scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "scope_1")]
    Scope1,
    #[serde(rename = "scope_2")]
    Scope2,
    #[serde(rename = "scope_3")]
    Scope3,
    #[serde(rename = "none")]
    None,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Scope1 => "scope_1",
            Scope::Scope2 => "scope_2",
            Scope::Scope3 => "scope_3",
            Scope::None => "none",
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scope_1" => Ok(Scope::Scope1),
            "scope_2" => Ok(Scope::Scope2),
            "scope_3" => Ok(Scope::Scope3),
            "none" => Ok(Scope::None),
            other => Err(format!("unknown scope: '{}'", other)),
        }
    }
}

/// Scope 2 accounting method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope2Method {
    LocationBased,
    MarketBased,
}

impl Scope2Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope2Method::LocationBased => "location_based",
            Scope2Method::MarketBased => "market_based",
        }
    }
}

impl FromStr for Scope2Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "location_based" => Ok(Scope2Method::LocationBased),
            "market_based" => Ok(Scope2Method::MarketBased),
            other => Err(format!("unknown scope 2 method: '{}'", other)),
        }
    }
}

/// How the caller obtained the activity amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Direct meter reading or invoice.
    #[default]
    Measured,
    /// Derived from a formula.
    Calculated,
    Estimated,
}

/// Audit confidence tier of a ledger value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Measured,
    Calculated,
    Estimated,
}

impl From<Provenance> for DataQuality {
    fn from(p: Provenance) -> Self {
        match p {
            Provenance::Measured => DataQuality::Measured,
            Provenance::Calculated => DataQuality::Calculated,
            Provenance::Estimated => DataQuality::Estimated,
        }
    }
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Measured => "measured",
            DataQuality::Calculated => "calculated",
            DataQuality::Estimated => "estimated",
        }
    }
}

impl FromStr for DataQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "measured" => Ok(DataQuality::Measured),
            "calculated" => Ok(DataQuality::Calculated),
            "estimated" => Ok(DataQuality::Estimated),
            other => Err(format!("unknown data quality: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!("unknown verification status: '{}'", other)),
        }
    }
}

/// One observed activity to be converted to emissions.
///
/// `amount` must be non-negative; the sign of the resulting emissions is
/// decided by the factor, never by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub activity_type: ActivityType,
    /// Fuel, treatment route, or travel mode (e.g. `natural_gas`, `paper_recycling`).
    #[serde(default)]
    pub subtype: String,
    pub amount: Decimal,
    pub unit: String,
    pub scope: Scope,
    pub region: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub organization_id: String,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub method: Option<Scope2Method>,
    pub metric_catalog_id: String,
    #[serde(default)]
    pub provenance: Provenance,
}

impl ActivityRecord {
    /// SHA-256 of the record's canonical JSON form.
    ///
    /// Two records describing the same activity hash identically even if
    /// the amount was written with a different number of trailing zeros.
    pub fn fingerprint(&self) -> String {
        let mut canonical = self.clone();
        canonical.amount = canonical.amount.normalize();
        let json = serde_json::to_string(&canonical).unwrap_or_else(|_| format!("{:?}", canonical));
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Where the factor used for an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorOrigin {
    Cache,
    Provider,
    Default,
}

/// Provenance of the factor applied to an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorProvenance {
    pub factor_id: String,
    pub value: Decimal,
    /// Denominator unit of `value` as resolved.
    pub unit: String,
    pub source: String,
    pub source_year: i32,
    pub origin: FactorOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterFlow {
    Withdrawal,
    Discharge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WasteStream {
    Generated,
    Diverted,
    Disposed,
}

/// Activity-specific detail recorded with each entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityMetadata {
    Combustion {
        fuel: String,
    },
    Electricity {
        method: Option<Scope2Method>,
        region: String,
    },
    Water {
        flow: WaterFlow,
    },
    Waste {
        treatment: String,
        stream: WasteStream,
    },
    Travel {
        mode: String,
    },
}

impl ActivityMetadata {
    pub fn for_activity(activity: &ActivityRecord) -> Self {
        match activity.activity_type {
            ActivityType::StationaryCombustion | ActivityType::MobileCombustion => {
                ActivityMetadata::Combustion {
                    fuel: activity.subtype.clone(),
                }
            }
            ActivityType::PurchasedElectricity | ActivityType::PurchasedHeat => {
                ActivityMetadata::Electricity {
                    method: activity.method,
                    region: activity.region.clone(),
                }
            }
            ActivityType::WaterWithdrawal => ActivityMetadata::Water {
                flow: WaterFlow::Withdrawal,
            },
            ActivityType::WaterDischarge => ActivityMetadata::Water {
                flow: WaterFlow::Discharge,
            },
            ActivityType::WasteGenerated => ActivityMetadata::Waste {
                treatment: activity.subtype.clone(),
                stream: WasteStream::Generated,
            },
            ActivityType::WasteDiverted => ActivityMetadata::Waste {
                treatment: activity.subtype.clone(),
                stream: WasteStream::Diverted,
            },
            ActivityType::WasteDisposed => ActivityMetadata::Waste {
                treatment: activity.subtype.clone(),
                stream: WasteStream::Disposed,
            },
            ActivityType::BusinessTravel | ActivityType::EmployeeCommuting => {
                ActivityMetadata::Travel {
                    mode: activity.subtype.clone(),
                }
            }
        }
    }
}

/// Typed provenance bag stored with every ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub factor: FactorProvenance,
    /// Activity amount after conversion to the base unit.
    pub base_amount: Decimal,
    pub base_unit: String,
    /// Absolute CO2e attributed to each gas, same sign as the total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_breakdown: Option<BTreeMap<String, Decimal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Id of the entry this one corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    pub details: ActivityMetadata,
}

/// A ledger row. Immutable once written; corrections are new rows whose
/// `metadata.supersedes` names the corrected row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub id: String,
    pub metric_catalog_id: String,
    pub organization_id: String,
    pub site_id: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub activity_type: ActivityType,
    pub scope: Scope,
    /// Raw activity amount as submitted.
    pub value: Decimal,
    /// Raw activity unit as submitted.
    pub unit: String,
    /// Signed CO2e in kg; negative means avoided.
    pub co2e_emissions: Decimal,
    pub metadata: EntryMetadata,
    pub data_quality: DataQuality,
    pub verification_status: VerificationStatus,
    pub activity_hash: String,
    pub created_at: DateTime<Utc>,
}

impl MetricEntry {
    pub fn is_rejected(&self) -> bool {
        self.verification_status == VerificationStatus::Rejected
    }
}
