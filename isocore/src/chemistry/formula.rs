use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IsoCorError, Result};

static FORMULA_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z][a-z]*)(\d*)").expect("formula token pattern"));
static FORMULA_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Z][a-z]*\d*)*$").expect("formula pattern"));

/// Elemental composition of a chemical moiety, element symbol to atom count.
///
/// Symbols that appear several times in a formula accumulate, `"CH3CH3"`
/// yields `{C: 2, H: 6}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementalComposition {
    elements: BTreeMap<String, u32>,
}

impl ElementalComposition {
    pub fn new(elements: BTreeMap<String, u32>) -> Self {
        let elements = elements.into_iter().filter(|(_, count)| *count > 0).collect();
        ElementalComposition { elements }
    }

    /// Number of atoms of `element`, zero when absent.
    pub fn count(&self, element: &str) -> u32 {
        self.elements.get(element).copied().unwrap_or(0)
    }

    pub fn contains(&self, element: &str) -> bool {
        self.count(element) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.elements.iter().map(|(element, count)| (element.as_str(), *count))
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// Copy of this composition with `element` removed.
    pub fn without(&self, element: &str) -> Self {
        let mut elements = self.elements.clone();
        elements.remove(element);
        ElementalComposition { elements }
    }

    /// Element-wise sum of two compositions.
    pub fn union(&self, other: &ElementalComposition) -> Self {
        let mut elements = self.elements.clone();
        for (element, count) in other.iter() {
            *elements.entry(element.to_string()).or_insert(0) += count;
        }
        ElementalComposition { elements }
    }
}

impl Display for ElementalComposition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (element, count) in self.iter() {
            if count == 1 {
                write!(f, "{}", element)?;
            } else {
                write!(f, "{}{}", element, count)?;
            }
        }
        Ok(())
    }
}

/// Parse an elemental formula into an [`ElementalComposition`].
///
/// Arguments:
///
/// * `formula` - elemental formula, e.g. "C3H7O6P"
///
/// Returns:
///
/// * `Result<ElementalComposition>` - counts per element; an empty input
///   yields an empty composition
///
/// # Examples
///
/// ```
/// use isocore::chemistry::formula::parse_formula;
///
/// let composition = parse_formula("C3H7O6P").unwrap();
/// assert_eq!(composition.count("C"), 3);
/// assert_eq!(composition.count("P"), 1);
/// assert_eq!(composition.count("N"), 0);
/// ```
pub fn parse_formula(formula: &str) -> Result<ElementalComposition> {
    let formula = formula.trim();
    if !FORMULA_FULL.is_match(formula) {
        return Err(IsoCorError::InvalidFormula(formula.to_string()));
    }

    let mut elements: BTreeMap<String, u32> = BTreeMap::new();
    for capture in FORMULA_TOKEN.captures_iter(formula) {
        let count = match &capture[2] {
            "" => 1,
            digits => digits
                .parse::<u32>()
                .map_err(|_| IsoCorError::InvalidFormula(formula.to_string()))?,
        };
        *elements.entry(capture[1].to_string()).or_insert(0) += count;
    }

    Ok(ElementalComposition::new(elements))
}
