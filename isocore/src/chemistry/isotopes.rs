use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::chemistry::constants::{ABUNDANCE_DECIMALS, MAX_ISOTOPE_MASS_GAP, MAX_TRACER_MASS_DEVIATION};
use crate::error::{IsoCorError, Result};

static TRACER_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([A-Z][a-z]*)$").expect("tracer code pattern"));

/// Isotopes of one element, ordered by increasing mass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementIsotopes {
    pub mass: Vec<Decimal>,
    pub abundance: Vec<f64>,
}

impl ElementIsotopes {
    pub fn new(mass: Vec<Decimal>, abundance: Vec<f64>) -> Self {
        ElementIsotopes { mass, abundance }
    }

    /// Number of isotopes.
    pub fn len(&self) -> usize {
        self.mass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    /// Mass of the lightest isotope.
    pub fn reference_mass(&self) -> Decimal {
        self.mass[0]
    }

    fn validate(&self, element: &str) -> Result<()> {
        let invalid = |reason: String| IsoCorError::InvalidIsotopeTable {
            element: element.to_string(),
            reason,
        };

        if self.mass.is_empty() {
            return Err(invalid("no isotope provided".to_string()));
        }
        if self.mass.len() != self.abundance.len() {
            return Err(invalid(format!(
                "there should always be the same number of isotope masses ({}) and abundances ({})",
                self.mass.len(),
                self.abundance.len()
            )));
        }

        let max_gap = Decimal::from_f64(MAX_ISOTOPE_MASS_GAP).unwrap_or(Decimal::ONE);
        for (i, mass) in self.mass.iter().enumerate() {
            if *mass <= Decimal::ZERO {
                return Err(invalid(format!("isotope mass {} is not positive", mass)));
            }
            if i > 0 {
                let previous = self.mass[i - 1];
                if *mass <= previous {
                    return Err(invalid(
                        "isotope masses should always be in increasing order".to_string(),
                    ));
                }
                if *mass - previous > max_gap {
                    return Err(invalid(format!(
                        "data seem incomplete, an isotope is missing between masses {} Da and {} Da",
                        previous, mass
                    )));
                }
            }
        }

        let mut total = Decimal::ZERO;
        for abundance in &self.abundance {
            if !(0.0..=1.0).contains(abundance) {
                return Err(invalid(format!("abundance {} is not a valid probability", abundance)));
            }
            let exact = Decimal::from_f64(*abundance)
                .ok_or_else(|| invalid(format!("abundance {} is not representable", abundance)))?;
            total += exact.round_dp(ABUNDANCE_DECIMALS);
        }
        if total != Decimal::ONE {
            return Err(invalid(format!(
                "the sum of the natural abundance of each isotope should always equal 1 (found {})",
                total
            )));
        }

        Ok(())
    }
}

/// Validated isotopic reference data, element symbol to its isotopes.
///
/// Immutable once built; correctors share it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IsotopeTable {
    elements: BTreeMap<String, ElementIsotopes>,
}

impl IsotopeTable {
    /// Validate raw isotope data and build the table.
    ///
    /// Arguments:
    ///
    /// * `elements` - isotopes per element symbol
    ///
    /// Returns:
    ///
    /// * `Result<IsotopeTable>` - the table, or the first structural problem found
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use rust_decimal_macros::dec;
    /// use isocore::chemistry::isotopes::{ElementIsotopes, IsotopeTable};
    ///
    /// let mut elements = BTreeMap::new();
    /// elements.insert("C".to_string(), ElementIsotopes::new(vec![dec!(12.0), dec!(13.003354835)], vec![0.9893, 0.0107]));
    /// let table = IsotopeTable::new(elements).unwrap();
    /// assert_eq!(table.element("C").unwrap().len(), 2);
    /// ```
    pub fn new(elements: BTreeMap<String, ElementIsotopes>) -> Result<Self> {
        for (element, isotopes) in &elements {
            isotopes.validate(element)?;
        }
        Ok(IsotopeTable { elements })
    }

    /// Build a table from its JSON representation,
    /// `{"C": {"mass": ["12.0", "13.003354835"], "abundance": [0.9893, 0.0107]}}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let elements: BTreeMap<String, ElementIsotopes> =
            serde_json::from_str(json).map_err(|e| IsoCorError::InvalidParameter {
                name: "data_isotopes".to_string(),
                reason: e.to_string(),
            })?;
        IsotopeTable::new(elements)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let elements: BTreeMap<String, ElementIsotopes> =
            serde_json::from_value(value).map_err(|e| IsoCorError::InvalidParameter {
                name: "data_isotopes".to_string(),
                reason: e.to_string(),
            })?;
        IsotopeTable::new(elements)
    }

    pub fn element(&self, symbol: &str) -> Result<&ElementIsotopes> {
        self.elements
            .get(symbol)
            .ok_or_else(|| IsoCorError::UnknownElement(symbol.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ElementIsotopes)> {
        self.elements.iter().map(|(symbol, isotopes)| (symbol.as_str(), isotopes))
    }

    /// Resolve a tracer code such as "13C" to its element and isotope index.
    ///
    /// The isotope whose mass is the closest to the mass number is selected;
    /// it must lie within half a mass unit.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::chemistry::isotopes::IsotopeTable;
    ///
    /// let table = IsotopeTable::default();
    /// assert_eq!(table.parse_tracer("13C").unwrap(), ("C".to_string(), 1));
    /// assert_eq!(table.parse_tracer("18O").unwrap(), ("O".to_string(), 2));
    /// ```
    pub fn parse_tracer(&self, code: &str) -> Result<(String, usize)> {
        let invalid = |reason: &str| IsoCorError::InvalidTracer {
            code: code.to_string(),
            reason: reason.to_string(),
        };

        let capture = TRACER_CODE
            .captures(code.trim())
            .ok_or_else(|| invalid("expected a mass number followed by an element symbol"))?;
        let mass_number = capture[1]
            .parse::<u32>()
            .map_err(|_| invalid("mass number is out of range"))?;
        let element = &capture[2];
        let isotopes = self
            .elements
            .get(element)
            .ok_or_else(|| invalid("this element is not in the isotope table"))?;

        let target = Decimal::from(mass_number);
        let (index, distance) = isotopes
            .mass
            .iter()
            .map(|mass| (*mass - target).abs())
            .enumerate()
            .min_by(|a, b| a.1.cmp(&b.1))
            .ok_or_else(|| invalid("no isotope registered for this element"))?;

        if distance.to_f64().unwrap_or(f64::INFINITY) >= MAX_TRACER_MASS_DEVIATION {
            return Err(invalid("this isotope is not in the isotope table"));
        }

        Ok((element.to_string(), index))
    }
}

impl Default for IsotopeTable {
    /// Isotopic compositions of the elements 2013, Pure Appl. Chem. 88 (2016) 293-306.
    fn default() -> Self {
        let mut elements = BTreeMap::new();
        elements.insert(
            "C".to_string(),
            ElementIsotopes::new(vec![dec!(12.0), dec!(13.003354835)], vec![0.9893, 0.0107]),
        );
        elements.insert(
            "H".to_string(),
            ElementIsotopes::new(vec![dec!(1.0078250322), dec!(2.0141017781)], vec![0.999885, 0.000115]),
        );
        elements.insert(
            "N".to_string(),
            ElementIsotopes::new(vec![dec!(14.003074004), dec!(15.000108899)], vec![0.99636, 0.00364]),
        );
        elements.insert(
            "P".to_string(),
            ElementIsotopes::new(vec![dec!(30.973761998)], vec![1.0]),
        );
        elements.insert(
            "O".to_string(),
            ElementIsotopes::new(
                vec![dec!(15.99491462), dec!(16.999131757), dec!(17.999159613)],
                vec![0.99757, 0.00038, 0.00205],
            ),
        );
        elements.insert(
            "S".to_string(),
            ElementIsotopes::new(
                vec![dec!(31.972071174), dec!(32.971458910), dec!(33.9678670), dec!(35.0), dec!(35.967081)],
                vec![0.9499, 0.0075, 0.0425, 0.0, 0.0001],
            ),
        );
        elements.insert(
            "Si".to_string(),
            ElementIsotopes::new(
                vec![dec!(27.976926535), dec!(28.976494665), dec!(29.9737701)],
                vec![0.92223, 0.04685, 0.03092],
            ),
        );
        IsotopeTable { elements }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Exaggerated abundances that make every term of an expected matrix visible.
    pub(crate) fn fixture_table() -> IsotopeTable {
        IsotopeTable::from_value(serde_json::json!({
            "C": {"abundance": [0.7, 0.3], "mass": ["12.0", "13.0033548378"]},
            "H": {"abundance": [0.8, 0.2], "mass": ["1.0078250321", "2.014101778"]},
            "N": {"abundance": [0.9, 0.1], "mass": ["14.0030740052", "15.0001088984"]},
            "P": {"abundance": [1.0], "mass": ["30.97376151"]},
            "O": {"abundance": [0.6, 0.3, 0.1], "mass": ["15.9949146221", "16.9991315", "17.9991604"]}
        }))
        .unwrap()
    }

    #[test]
    fn test_default_table_is_valid() {
        let table = IsotopeTable::default();
        let elements: BTreeMap<String, ElementIsotopes> = table
            .iter()
            .map(|(symbol, isotopes)| (symbol.to_string(), isotopes.clone()))
            .collect();
        assert!(IsotopeTable::new(elements).is_ok());
    }

    #[test]
    fn test_fixture_table_parses() {
        let table = fixture_table();
        let oxygen = table.element("O").unwrap();
        assert_eq!(oxygen.len(), 3);
        assert_eq!(oxygen.reference_mass(), dec!(15.9949146221));
    }

    #[test]
    fn test_invalid_tables_are_rejected() {
        let bad_tables = [
            r#"{"C": {}}"#,
            r#"{"C": {"masses": [], "abundance": []}}"#,
            r#"{"C": {"mass": [12, 13], "abundance": [1.0]}}"#,
            r#"{"C": {"mass": [12, 13], "abundance": [1.0, 1.0]}}"#,
            r#"{"C": {"mass": [12, 14], "abundance": [0.5, 0.5]}}"#,
            r#"{"C": {"mass": [13, 12], "abundance": [0.5, 0.5]}}"#,
            r#"{"C": {"mass": [12, 13], "abundance": [1.5, -0.5]}}"#,
            r#"{"C": {"mass": [], "abundance": []}}"#,
        ];
        for json in bad_tables {
            assert!(IsotopeTable::from_json(json).is_err(), "accepted {}", json);
        }
    }

    #[test]
    fn test_abundance_sum_uses_decimal_arithmetic() {
        let json = r#"{"X": {"mass": [10, 11, 12], "abundance": [0.1, 0.2, 0.7]}}"#;
        assert!(IsotopeTable::from_json(json).is_ok());

        let json = r#"{"X": {"mass": [10, 11], "abundance": [0.5, 0.4999]}}"#;
        assert!(matches!(
            IsotopeTable::from_json(json),
            Err(IsoCorError::InvalidIsotopeTable { .. })
        ));
    }

    #[test]
    fn test_parse_tracer() {
        let table = fixture_table();
        assert_eq!(table.parse_tracer("13C").unwrap(), ("C".to_string(), 1));
        assert_eq!(table.parse_tracer("17O").unwrap(), ("O".to_string(), 1));
        assert_eq!(table.parse_tracer("2H").unwrap(), ("H".to_string(), 1));
        assert_eq!(table.parse_tracer("12C").unwrap(), ("C".to_string(), 0));
    }

    #[test]
    fn test_parse_invalid_tracer() {
        let table = fixture_table();
        for code in ["C", "13", "", "14C", "13Xx", "c13"] {
            assert!(
                matches!(table.parse_tracer(code), Err(IsoCorError::InvalidTracer { .. })),
                "accepted {}",
                code
            );
        }
    }
}
