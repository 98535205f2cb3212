//! Pure aggregation over ledger entries.
//!
//! Every function skips entries whose verification status is `rejected`.
//! Percentages are returned on a 0–100 scale. Sums saturate at the
//! `Decimal` range instead of panicking; derived ratios that cannot be
//! represented come back as unavailable.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::CalcError;
use crate::models::{ActivityType, MetricEntry, Scope};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn counted(entries: &[MetricEntry]) -> impl Iterator<Item = &MetricEntry> {
    entries.iter().filter(|e| !e.is_rejected())
}

/// Signed CO2e per scope. `total` covers scopes 1–3 only; entries with
/// scope `none` are reported in `unscoped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeTotals {
    pub scope1: Decimal,
    pub scope2: Decimal,
    pub scope3: Decimal,
    pub unscoped: Decimal,
    pub total: Decimal,
}

pub fn sum_by_scope(entries: &[MetricEntry]) -> ScopeTotals {
    let mut totals = ScopeTotals::default();
    for entry in counted(entries) {
        let slot = match entry.scope {
            Scope::Scope1 => &mut totals.scope1,
            Scope::Scope2 => &mut totals.scope2,
            Scope::Scope3 => &mut totals.scope3,
            Scope::None => &mut totals.unscoped,
        };
        *slot = slot.saturating_add(entry.co2e_emissions);
    }
    totals.total = totals
        .scope1
        .saturating_add(totals.scope2)
        .saturating_add(totals.scope3);
    totals
}

/// `total / denominator`, e.g. kg CO2e per employee or per m².
pub fn intensity(total: Decimal, denominator: Decimal) -> Result<Decimal, CalcError> {
    if denominator.is_zero() {
        return Err(CalcError::DivisionByZero);
    }
    if denominator.is_sign_negative() {
        return Err(CalcError::Validation(format!(
            "intensity denominator must be positive, got {}",
            denominator
        )));
    }
    total.checked_div(denominator).ok_or(CalcError::DivisionByZero)
}

/// Share of waste kept out of disposal, clamped to [0, 100].
///
/// Zero when nothing was diverted or disposed.
pub fn diversion_rate(diverted: Decimal, disposed: Decimal) -> Decimal {
    let rate = match diverted.checked_add(disposed) {
        Some(handled) if handled <= Decimal::ZERO => return Decimal::ZERO,
        Some(handled) => diverted.checked_div(handled).and_then(|share| {
            share.checked_mul(HUNDRED).or(Some(if share.is_sign_negative() {
                Decimal::ZERO
            } else {
                HUNDRED
            }))
        }),
        // Both totals near the top of the range: 100 / (1 + disposed / diverted).
        None if diverted.is_sign_positive() => disposed
            .checked_div(diverted)
            .and_then(|ratio| Decimal::ONE.checked_add(ratio))
            .and_then(|denominator| HUNDRED.checked_div(denominator)),
        None => return Decimal::ZERO,
    };
    rate.unwrap_or(Decimal::ZERO).max(Decimal::ZERO).min(HUNDRED)
}

/// Percent change from `previous` to `current`; `None` when `previous` is 0
/// or the change does not fit a `Decimal`.
pub fn year_over_year(current: Decimal, previous: Decimal) -> Option<Decimal> {
    if previous.is_zero() {
        return None;
    }
    current
        .checked_sub(previous)?
        .checked_div(previous)?
        .checked_mul(HUNDRED)
}

/// Disposal emissions plus (negative) avoided emissions.
pub fn net_emissions(disposal: Decimal, avoided: Decimal) -> Decimal {
    disposal.saturating_add(avoided)
}

/// Waste mass in kg per stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WasteTotals {
    pub generated: Decimal,
    pub diverted: Decimal,
    pub disposed: Decimal,
}

pub fn waste_totals(entries: &[MetricEntry]) -> WasteTotals {
    let mut totals = WasteTotals::default();
    for entry in counted(entries) {
        let mass = entry.metadata.base_amount;
        let slot = match entry.activity_type {
            ActivityType::WasteGenerated => &mut totals.generated,
            ActivityType::WasteDiverted => &mut totals.diverted,
            ActivityType::WasteDisposed => &mut totals.disposed,
            _ => continue,
        };
        *slot = slot.saturating_add(mass);
    }
    totals
}

/// Split signed CO2e into `(avoided, disposal)`: the sum of negative
/// entries and the sum of all others.
pub fn avoided_and_disposal(entries: &[MetricEntry]) -> (Decimal, Decimal) {
    counted(entries).fold((Decimal::ZERO, Decimal::ZERO), |(avoided, disposal), e| {
        if e.co2e_emissions.is_sign_negative() {
            (avoided.saturating_add(e.co2e_emissions), disposal)
        } else {
            (avoided, disposal.saturating_add(e.co2e_emissions))
        }
    })
}

/// Reporting view of one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub entry_count: usize,
    pub scope_totals: ScopeTotals,
    pub avoided: Decimal,
    pub disposal: Decimal,
    pub net_emissions: Decimal,
    pub waste: WasteTotals,
    pub diversion_rate: Decimal,
    /// `None` without a denominator or when it is zero.
    pub intensity: Option<Decimal>,
    /// `None` without a previous period or when its total is zero.
    pub year_over_year: Option<Decimal>,
}

impl PeriodSummary {
    pub fn build(
        current: &[MetricEntry],
        previous: Option<&[MetricEntry]>,
        denominator: Option<Decimal>,
    ) -> Self {
        let scope_totals = sum_by_scope(current);
        let (avoided, disposal) = avoided_and_disposal(current);
        let waste = waste_totals(current);
        Self {
            entry_count: counted(current).count(),
            scope_totals,
            avoided,
            disposal,
            net_emissions: net_emissions(disposal, avoided),
            waste,
            diversion_rate: diversion_rate(waste.diverted, waste.disposed),
            intensity: denominator.and_then(|d| intensity(scope_totals.total, d).ok()),
            year_over_year: previous
                .and_then(|p| year_over_year(scope_totals.total, sum_by_scope(p).total)),
        }
    }
}
