//! Physical unit normalization.
//!
//! The converter holds a static directed graph of `unit → unit` edges, each
//! carrying a decimal multiplier. Registering an edge also registers its
//! inverse. Conversions search the graph breadth-first and compose the
//! multipliers along the shortest path, so `MWh → MJ` works through `kWh`
//! without a dedicated edge.
//!
//! Edges may be scoped to a subtype: a liter of diesel and a liter of LPG
//! carry different energy, so `l → kWh` only exists for a named fuel.
//!
//! ```rust
//! use carbon_ledger_core::units::UnitConverter;
//! use rust_decimal::Decimal;
//!
//! let units = UnitConverter::default();
//! let kwh = units.convert(Decimal::new(2, 0), "MWh", "kWh").unwrap();
//! assert_eq!(kwh, Decimal::new(2000, 0));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use rust_decimal::Decimal;

use crate::error::CalcError;

#[derive(Debug, Clone)]
struct Edge {
    to: String,
    factor: Decimal,
    subtype: Option<String>,
}

/// Converts amounts between registered units.
#[derive(Debug, Clone)]
pub struct UnitConverter {
    edges: HashMap<String, Vec<Edge>>,
}

/// Canonical symbol for a unit string, resolving common aliases.
///
/// Unknown units are returned trimmed but otherwise unchanged.
pub fn normalize_unit(unit: &str) -> String {
    let trimmed = unit.trim();
    let canonical = match trimmed.to_lowercase().as_str() {
        "l" | "liter" | "liters" | "litre" | "litres" => "l",
        "m3" | "m³" | "cubic_meter" | "cubic_meters" | "cubic_metre" | "cubic_metres" => "m3",
        "gal" | "gallon" | "gallons" | "us_gal" => "gal",
        "wh" => "Wh",
        "kwh" => "kWh",
        "mwh" => "MWh",
        "gwh" => "GWh",
        "mj" => "MJ",
        "gj" => "GJ",
        "therm" | "therms" => "therm",
        "mmbtu" => "MMBtu",
        "g" | "gram" | "grams" => "g",
        "kg" | "kilogram" | "kilograms" => "kg",
        "t" | "tonne" | "tonnes" | "metric_ton" | "metric_tons" => "t",
        "lb" | "lbs" | "pound" | "pounds" => "lb",
        "m" | "meter" | "meters" | "metre" | "metres" => "m",
        "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => "km",
        "mi" | "mile" | "miles" => "mi",
        _ => return trimmed.to_string(),
    };
    canonical.to_string()
}

impl UnitConverter {
    /// A converter with no edges.
    pub fn empty() -> Self {
        Self {
            edges: HashMap::new(),
        }
    }

    /// A converter preloaded with SI/imperial edges and common fuel
    /// calorific values.
    pub fn with_defaults() -> Self {
        let mut units = Self::empty();
        let generic: &[(&str, &str, Decimal)] = &[
            // energy
            ("Wh", "kWh", Decimal::new(1, 3)),
            ("MWh", "kWh", Decimal::new(1000, 0)),
            ("GWh", "MWh", Decimal::new(1000, 0)),
            ("kWh", "MJ", Decimal::new(36, 1)),
            ("GJ", "MJ", Decimal::new(1000, 0)),
            ("therm", "kWh", Decimal::new(293071, 4)),
            ("MMBtu", "kWh", Decimal::new(293071, 3)),
            // volume
            ("m3", "l", Decimal::new(1000, 0)),
            ("gal", "l", Decimal::new(3785411784, 9)),
            // mass
            ("t", "kg", Decimal::new(1000, 0)),
            ("kg", "g", Decimal::new(1000, 0)),
            ("lb", "kg", Decimal::new(45359237, 8)),
            // distance
            ("km", "m", Decimal::new(1000, 0)),
            ("mi", "km", Decimal::new(1609344, 6)),
        ];
        for (from, to, factor) in generic {
            units.insert_pair(from, to, *factor, None);
        }

        let fuels: &[(&str, &str, &str, Decimal)] = &[
            ("natural_gas", "m3", "kWh", Decimal::new(1055, 2)),
            ("diesel", "l", "kWh", Decimal::new(1072, 2)),
            ("petrol", "l", "kWh", Decimal::new(961, 2)),
            ("gasoline", "l", "kWh", Decimal::new(961, 2)),
            ("lpg", "l", "kWh", Decimal::new(708, 2)),
            ("heating_oil", "l", "kWh", Decimal::new(1035, 2)),
        ];
        for (fuel, from, to, factor) in fuels {
            units.insert_pair(from, to, *factor, Some(fuel));
        }
        units
    }

    /// Register `1 from = factor × to` (and the inverse).
    ///
    /// `subtype` restricts the edge to conversions for that subtype.
    pub fn register(
        &mut self,
        from: &str,
        to: &str,
        factor: Decimal,
        subtype: Option<&str>,
    ) -> Result<(), CalcError> {
        if factor <= Decimal::ZERO {
            return Err(CalcError::Validation(format!(
                "conversion factor {} → {} must be positive, got {}",
                from, to, factor
            )));
        }
        self.insert_pair(from, to, factor, subtype);
        Ok(())
    }

    fn insert_pair(&mut self, from: &str, to: &str, factor: Decimal, subtype: Option<&str>) {
        let from = normalize_unit(from);
        let to = normalize_unit(to);
        let subtype = subtype.map(|s| s.trim().to_lowercase());
        let inverse = Decimal::ONE / factor;

        self.edges.entry(from.clone()).or_default().push(Edge {
            to: to.clone(),
            factor,
            subtype: subtype.clone(),
        });
        self.edges.entry(to).or_default().push(Edge {
            to: from,
            factor: inverse,
            subtype,
        });
    }

    /// Convert using generic (unscoped) edges only.
    pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal, CalcError> {
        self.convert_for(None, amount, from, to)
    }

    /// Convert using generic edges plus those scoped to `subtype`.
    pub fn convert_for(
        &self,
        subtype: Option<&str>,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal, CalcError> {
        let factor = self.path_factor(subtype, from, to)?;
        amount.checked_mul(factor).ok_or_else(|| {
            CalcError::Validation(format!("amount {} {} overflows on conversion", amount, from))
        })
    }

    /// Composite multiplier along the shortest path `from → to`.
    fn path_factor(&self, subtype: Option<&str>, from: &str, to: &str) -> Result<Decimal, CalcError> {
        let from = normalize_unit(from);
        let to = normalize_unit(to);
        if from == to {
            return Ok(Decimal::ONE);
        }
        let subtype = subtype.map(|s| s.trim().to_lowercase());

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, Decimal)> = VecDeque::new();
        visited.insert(from.as_str());
        queue.push_back((from.as_str(), Decimal::ONE));

        while let Some((unit, acc)) = queue.pop_front() {
            let Some(edges) = self.edges.get(unit) else {
                continue;
            };
            for edge in edges {
                let usable = match (&edge.subtype, &subtype) {
                    (None, _) => true,
                    (Some(scoped), Some(wanted)) => scoped == wanted,
                    (Some(_), None) => false,
                };
                if !usable || visited.contains(edge.to.as_str()) {
                    continue;
                }
                let Some(next) = acc.checked_mul(edge.factor) else {
                    continue;
                };
                if edge.to == to {
                    return Ok(next);
                }
                visited.insert(edge.to.as_str());
                queue.push_back((edge.to.as_str(), next));
            }
        }

        Err(CalcError::UnsupportedUnit {
            from: from.clone(),
            to: to.clone(),
        })
    }
}

impl Default for UnitConverter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
