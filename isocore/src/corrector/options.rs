//! Corrector configuration.

use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::algorithm::resolution::{CustomResolutionFormula, ResolutionFormula};
use crate::chemistry::constants::{DEFAULT_PRUNING_THRESHOLD, PRUNING_MASS_LIMIT};
use crate::error::{IsoCorError, Result};

/// Probability under which isotopic species are dropped from high-resolution
/// isotopic clusters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbabilityThreshold {
    /// no pruning below 500 Da, 1e-10 above
    #[default]
    Auto,
    /// keep every species
    Disabled,
    Fixed(f64),
}

impl ProbabilityThreshold {
    /// threshold applied to a molecule of the given molecular weight
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::corrector::options::ProbabilityThreshold;
    ///
    /// assert_eq!(ProbabilityThreshold::Auto.resolve(180.0), None);
    /// assert_eq!(ProbabilityThreshold::Auto.resolve(750.0), Some(1e-10));
    /// assert_eq!(ProbabilityThreshold::Fixed(1e-6).resolve(180.0), Some(1e-6));
    /// ```
    pub fn resolve(&self, molecular_weight: f64) -> Option<f64> {
        match self {
            ProbabilityThreshold::Auto if molecular_weight < PRUNING_MASS_LIMIT => None,
            ProbabilityThreshold::Auto => Some(DEFAULT_PRUNING_THRESHOLD),
            ProbabilityThreshold::Disabled => None,
            ProbabilityThreshold::Fixed(p) => Some(*p),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ProbabilityThreshold::Fixed(p) if !(0.0..=1.0).contains(p) => Err(IsoCorError::InvalidParameter {
                name: "threshold_p".to_string(),
                reason: format!("unexpected probability {}", p),
            }),
            _ => Ok(()),
        }
    }
}

/// Optional parameters of a metabolite corrector.
///
/// Leaving `resolution` and `mz_of_resolution` unset selects low-resolution
/// correction; setting both together with `charge` selects high resolution.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorOptions {
    pub label: Option<String>,
    pub inchi: Option<String>,
    pub derivative_formula: Option<String>,
    /// isotopic composition of the tracer reagent, perfect purity if unset
    pub tracer_purity: Option<Vec<f64>>,
    pub correct_na_tracer: bool,
    pub charge: Option<i64>,
    pub resolution: Option<f64>,
    pub mz_of_resolution: Option<f64>,
    pub resolution_formula: ResolutionFormula,
    /// replaces `resolution_formula` when set
    #[serde(skip)]
    pub custom_resolution_formula: Option<CustomResolutionFormula>,
    pub threshold_p: ProbabilityThreshold,
}

impl Debug for CorrectorOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrectorOptions")
            .field("label", &self.label)
            .field("inchi", &self.inchi)
            .field("derivative_formula", &self.derivative_formula)
            .field("tracer_purity", &self.tracer_purity)
            .field("correct_na_tracer", &self.correct_na_tracer)
            .field("charge", &self.charge)
            .field("resolution", &self.resolution)
            .field("mz_of_resolution", &self.mz_of_resolution)
            .field("resolution_formula", &self.resolution_formula)
            .field("custom_resolution_formula", &self.custom_resolution_formula.is_some())
            .field("threshold_p", &self.threshold_p)
            .finish()
    }
}

impl CorrectorOptions {
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_inchi(mut self, inchi: &str) -> Self {
        self.inchi = Some(inchi.to_string());
        self
    }

    pub fn with_derivative_formula(mut self, derivative_formula: &str) -> Self {
        self.derivative_formula = Some(derivative_formula.to_string());
        self
    }

    pub fn with_tracer_purity(mut self, tracer_purity: Vec<f64>) -> Self {
        self.tracer_purity = Some(tracer_purity);
        self
    }

    pub fn with_correct_na_tracer(mut self, correct_na_tracer: bool) -> Self {
        self.correct_na_tracer = correct_na_tracer;
        self
    }

    pub fn with_charge(mut self, charge: i64) -> Self {
        self.charge = Some(charge);
        self
    }

    /// Calibration of a high-resolution instrument: `resolution` measured at `mz_of_resolution`.
    pub fn with_resolution(mut self, resolution: f64, mz_of_resolution: f64) -> Self {
        self.resolution = Some(resolution);
        self.mz_of_resolution = Some(mz_of_resolution);
        self
    }

    pub fn with_resolution_formula(mut self, resolution_formula: ResolutionFormula) -> Self {
        self.resolution_formula = resolution_formula;
        self
    }

    pub fn with_custom_resolution_formula(mut self, formula: CustomResolutionFormula) -> Self {
        self.custom_resolution_formula = Some(formula);
        self
    }

    pub fn with_threshold_p(mut self, threshold_p: ProbabilityThreshold) -> Self {
        self.threshold_p = threshold_p;
        self
    }
}
