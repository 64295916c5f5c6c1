use std::sync::{Arc, OnceLock};

use rust_decimal::Decimal;

use crate::chemistry::formula::{parse_formula, ElementalComposition};
use crate::chemistry::isotopes::{ElementIsotopes, IsotopeTable};
use crate::error::{IsoCorError, Result};

/// A tracer-labeled chemical considered for isotope correction.
///
/// The chemical is made of a metabolite moiety (`formula`), which carries the
/// traced atoms, and an optional derivative moiety whose atoms, tracer element
/// included, are always corrected at natural abundance.
///
/// Instances are immutable; any parameter change requires a new instance.
#[derive(Clone, Debug)]
pub struct LabeledChemical {
    formula: ElementalComposition,
    derivative_formula: ElementalComposition,
    tracer_code: String,
    tracer_element: String,
    tracer_index: usize,
    tracer_isotopes: ElementIsotopes,
    tracer_purity: Vec<f64>,
    correct_na_tracer: bool,
    charge: Option<u32>,
    isotopes: Arc<IsotopeTable>,
    label: String,
    inchi: Option<String>,
    mzshift_tracer: Decimal,
    molecular_weight: OnceLock<Decimal>,
    correction_formula: OnceLock<ElementalComposition>,
}

impl LabeledChemical {
    pub fn builder(formula: &str, tracer: &str) -> LabeledChemicalBuilder {
        LabeledChemicalBuilder::new(formula, tracer)
    }

    /// Elemental composition of the metabolite moiety.
    pub fn formula(&self) -> &ElementalComposition {
        &self.formula
    }

    /// Elemental composition of the derivative moiety (possibly empty).
    pub fn derivative_formula(&self) -> &ElementalComposition {
        &self.derivative_formula
    }

    pub fn tracer_code(&self) -> &str {
        &self.tracer_code
    }

    pub fn tracer_element(&self) -> &str {
        &self.tracer_element
    }

    /// Index of the labeled isotope within the tracer element's isotopes.
    pub fn tracer_index(&self) -> usize {
        self.tracer_index
    }

    /// Isotopes of the tracer element.
    pub fn tracer_isotopes(&self) -> &ElementIsotopes {
        &self.tracer_isotopes
    }

    pub fn tracer_purity(&self) -> &[f64] {
        &self.tracer_purity
    }

    pub fn correct_na_tracer(&self) -> bool {
        self.correct_na_tracer
    }

    /// Absolute value of the charge, if one was given.
    pub fn charge(&self) -> Option<u32> {
        self.charge
    }

    pub fn isotopes(&self) -> &Arc<IsotopeTable> {
        &self.isotopes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn inchi(&self) -> Option<&str> {
        self.inchi.as_deref()
    }

    /// Number of tracer atoms in the metabolite moiety (N).
    pub fn tracer_count(&self) -> usize {
        self.formula.count(&self.tracer_element) as usize
    }

    /// Size of the measurement and correction vectors (N + 1).
    pub fn isotopologue_count(&self) -> usize {
        self.tracer_count() + 1
    }

    /// Mass shift between the labeled isotope and the lightest isotope of the tracer.
    pub fn mzshift_tracer(&self) -> Decimal {
        self.mzshift_tracer
    }

    /// Exact molecular weight of metabolite and derivative moieties, computed
    /// from the lightest isotope of every element.
    pub fn molecular_weight(&self) -> Decimal {
        *self.molecular_weight.get_or_init(|| {
            self.formula
                .iter()
                .chain(self.derivative_formula.iter())
                .filter_map(|(element, count)| {
                    self.isotopes
                        .element(element)
                        .ok()
                        .map(|isotopes| isotopes.reference_mass() * Decimal::from(count))
                })
                .sum()
        })
    }

    /// Atoms corrected for natural abundance: every non-tracer atom of the
    /// metabolite plus every atom of the derivative.
    pub fn correction_formula(&self) -> &ElementalComposition {
        self.correction_formula.get_or_init(|| {
            self.formula
                .without(&self.tracer_element)
                .union(&self.derivative_formula)
        })
    }
}

/// Builder validating every input of a [`LabeledChemical`].
#[derive(Clone, Debug)]
pub struct LabeledChemicalBuilder {
    formula: String,
    tracer: String,
    derivative_formula: Option<String>,
    tracer_purity: Option<Vec<f64>>,
    correct_na_tracer: bool,
    charge: Option<i64>,
    isotopes: Option<Arc<IsotopeTable>>,
    label: Option<String>,
    inchi: Option<String>,
}

impl LabeledChemicalBuilder {
    pub fn new(formula: &str, tracer: &str) -> Self {
        LabeledChemicalBuilder {
            formula: formula.to_string(),
            tracer: tracer.to_string(),
            derivative_formula: None,
            tracer_purity: None,
            correct_na_tracer: false,
            charge: None,
            isotopes: None,
            label: None,
            inchi: None,
        }
    }

    pub fn derivative_formula(mut self, derivative_formula: Option<&str>) -> Self {
        self.derivative_formula = derivative_formula.map(str::to_string);
        self
    }

    /// Isotopic composition of the tracer reagent; perfect purity when unset.
    pub fn tracer_purity(mut self, tracer_purity: Option<Vec<f64>>) -> Self {
        self.tracer_purity = tracer_purity;
        self
    }

    pub fn correct_na_tracer(mut self, correct_na_tracer: bool) -> Self {
        self.correct_na_tracer = correct_na_tracer;
        self
    }

    pub fn charge(mut self, charge: Option<i64>) -> Self {
        self.charge = charge;
        self
    }

    /// Isotope reference data; the IUPAC defaults when unset.
    pub fn isotopes(mut self, isotopes: Arc<IsotopeTable>) -> Self {
        self.isotopes = Some(isotopes);
        self
    }

    pub fn label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn inchi(mut self, inchi: Option<String>) -> Self {
        self.inchi = inchi;
        self
    }

    pub fn build(self) -> Result<LabeledChemical> {
        let isotopes = self.isotopes.unwrap_or_else(|| Arc::new(IsotopeTable::default()));

        let charge = match self.charge {
            Some(0) => return Err(IsoCorError::InvalidCharge(0)),
            Some(charge) => Some(
                u32::try_from(charge.unsigned_abs()).map_err(|_| IsoCorError::InvalidCharge(charge))?,
            ),
            None => None,
        };

        let (tracer_element, tracer_index) = isotopes.parse_tracer(&self.tracer)?;
        let tracer_isotopes = isotopes.element(&tracer_element)?.clone();

        let tracer_purity = match self.tracer_purity {
            Some(purity) => purity,
            None => {
                let mut purity = vec![0.0; tracer_isotopes.len()];
                purity[tracer_index] = 1.0;
                purity
            }
        };
        if tracer_purity.len() != tracer_isotopes.len() {
            return Err(IsoCorError::TracerPurityLength {
                expected: tracer_isotopes.len(),
                found: tracer_purity.len(),
            });
        }
        if let Some(value) = tracer_purity.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(IsoCorError::InvalidParameter {
                name: "tracer_purity".to_string(),
                reason: format!("{} is not a valid proportion", value),
            });
        }

        let derivative_text = self.derivative_formula.unwrap_or_default();
        let formula = parse_formula(&self.formula)?;
        let derivative_formula = parse_formula(&derivative_text)?;
        let label = self
            .label
            .unwrap_or_else(|| [self.formula.as_str(), derivative_text.as_str(), self.tracer.as_str()].join("|"));

        if formula.is_empty() {
            return Err(IsoCorError::EmptyFormula(label));
        }
        if !formula.contains(&tracer_element) {
            return Err(IsoCorError::TracerNotInFormula {
                tracer: tracer_element,
                formula: self.formula,
            });
        }
        for element in formula.elements().chain(derivative_formula.elements()) {
            isotopes.element(element)?;
        }

        let mzshift_tracer = tracer_isotopes.mass[tracer_index] - tracer_isotopes.reference_mass();
        if mzshift_tracer <= Decimal::ZERO {
            return Err(IsoCorError::InvalidTracer {
                code: self.tracer,
                reason: format!("unexpected non-positive tracer mass shift ({})", mzshift_tracer),
            });
        }

        Ok(LabeledChemical {
            formula,
            derivative_formula,
            tracer_code: self.tracer,
            tracer_element,
            tracer_index,
            tracer_isotopes,
            tracer_purity,
            correct_na_tracer: self.correct_na_tracer,
            charge,
            isotopes,
            label,
            inchi: self.inchi,
            mzshift_tracer,
            molecular_weight: OnceLock::new(),
            correction_formula: OnceLock::new(),
        })
    }
}
