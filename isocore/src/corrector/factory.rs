use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::algorithm::resolution::ResolutionFormula;
use crate::chemistry::isotopes::IsotopeTable;
use crate::chemistry::labeled::LabeledChemical;
use crate::corrector::metabolite::MetaboliteCorrector;
use crate::corrector::options::{CorrectorOptions, ProbabilityThreshold};
use crate::error::{IsoCorError, Result};

/// Selects and builds the corrector suited to the instrument.
///
/// * no `resolution` and no `mz_of_resolution`: low resolution
/// * `resolution`, `mz_of_resolution` and `charge`: high resolution, falling
///   back to low resolution when the instrument cannot separate nominal masses
/// * anything else is rejected
pub struct MetaboliteCorrectorFactory;

impl MetaboliteCorrectorFactory {
    /// build a corrector for `formula` labeled with `tracer`
    ///
    /// Arguments:
    ///
    /// * `formula` - elemental formula of the metabolite moiety, e.g. "C3H7O6P"
    /// * `tracer` - isotopic tracer, e.g. "13C"
    /// * `options` - optional parameters
    /// * `isotopes` - isotope reference data, the IUPAC defaults if `None`
    ///
    /// Returns:
    ///
    /// * `Result<MetaboliteCorrector>` - ready to use corrector
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::corrector::builder::CorrectionStrategy;
    /// use isocore::corrector::factory::MetaboliteCorrectorFactory;
    /// use isocore::corrector::options::CorrectorOptions;
    ///
    /// let options = CorrectorOptions::default().with_resolution(1e4, 400.0).with_charge(-1);
    /// let corrector = MetaboliteCorrectorFactory::build("C3H7O6P", "13C", options, None).unwrap();
    /// assert_eq!(corrector.strategy(), CorrectionStrategy::High);
    /// ```
    pub fn build(
        formula: &str,
        tracer: &str,
        options: CorrectorOptions,
        isotopes: Option<Arc<IsotopeTable>>,
    ) -> Result<MetaboliteCorrector> {
        let mut builder = LabeledChemical::builder(formula, tracer)
            .derivative_formula(options.derivative_formula.as_deref())
            .tracer_purity(options.tracer_purity.clone())
            .correct_na_tracer(options.correct_na_tracer)
            .charge(options.charge)
            .label(options.label.clone())
            .inchi(options.inchi.clone());
        if let Some(isotopes) = isotopes {
            builder = builder.isotopes(isotopes);
        }
        let chemical = builder.build()?;

        match (options.resolution, options.mz_of_resolution, options.charge) {
            (None, None, _) => {
                debug!("MetaboliteCorrectorFactory chose to use a low-resolution corrector for {}.", formula);
                MetaboliteCorrector::low_resolution(chemical, options.threshold_p)
            }
            (Some(resolution), Some(mz_of_resolution), Some(_)) => {
                debug!("MetaboliteCorrectorFactory chose to use a high-resolution corrector for {}.", formula);
                match MetaboliteCorrector::high_resolution(
                    chemical.clone(),
                    resolution,
                    mz_of_resolution,
                    options.resolution_formula,
                    options.custom_resolution_formula.as_ref(),
                    options.threshold_p,
                ) {
                    Err(reason) if reason.is_recoverable() => {
                        warn!(
                            "Improper usage of high-resolution corrector by MetaboliteCorrectorFactory. \
                             Falling back to low-resolution corrector. Reason: {}",
                            reason
                        );
                        MetaboliteCorrector::low_resolution(chemical, options.threshold_p)
                    }
                    result => result,
                }
            }
            (resolution, mz_of_resolution, charge) => {
                let message = format!(
                    "resolution ({:?}), mz_of_resolution ({:?}) and charge ({:?}) must be given together \
                     for high resolution, or resolution and mz_of_resolution left out for low resolution",
                    resolution, mz_of_resolution, charge
                );
                error!("MetaboliteCorrectorFactory was unable to select a correction strategy: {}", message);
                Err(IsoCorError::AmbiguousStrategy(message))
            }
        }
    }

    /// build a corrector from loosely typed parameters
    ///
    /// Recognised keys: `label`, `inchi`, `data_isotopes`, `derivative_formula`,
    /// `tracer_purity`, `correct_NA_tracer`, `resolution`, `mz_of_resolution`,
    /// `resolution_formula_code`, `charge` and `threshold_p` (a probability,
    /// `"auto"`, or `null` to disable pruning). Any other key is reported as unused.
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::corrector::factory::MetaboliteCorrectorFactory;
    /// use isocore::error::IsoCorError;
    /// use serde_json::json;
    ///
    /// let params = json!({"resolution": 1e4, "mz_of_resolution": 400, "charge": 1});
    /// let corrector =
    ///     MetaboliteCorrectorFactory::from_params("C6H12O6", "13C", params.as_object().unwrap().clone()).unwrap();
    /// assert!(corrector.correction_limit().is_some());
    ///
    /// let params = json!({"resolutoin": 1e4});
    /// let result = MetaboliteCorrectorFactory::from_params("C6H12O6", "13C", params.as_object().unwrap().clone());
    /// assert!(matches!(result, Err(IsoCorError::UnusedParameters(_))));
    /// ```
    pub fn from_params(formula: &str, tracer: &str, mut params: Map<String, Value>) -> Result<MetaboliteCorrector> {
        let isotopes = match params.remove("data_isotopes") {
            None | Some(Value::Null) => None,
            Some(value) => Some(Arc::new(IsotopeTable::from_value(value)?)),
        };
        let resolution_formula = match take::<String>(&mut params, "resolution_formula_code")? {
            Some(code) => code.parse()?,
            None => ResolutionFormula::default(),
        };

        let options = CorrectorOptions {
            label: take(&mut params, "label")?,
            inchi: take(&mut params, "inchi")?,
            derivative_formula: take(&mut params, "derivative_formula")?,
            tracer_purity: take(&mut params, "tracer_purity")?,
            correct_na_tracer: take(&mut params, "correct_NA_tracer")?.unwrap_or(false),
            charge: take_charge(&mut params)?,
            resolution: take_number(&mut params, "resolution")?,
            mz_of_resolution: take_number(&mut params, "mz_of_resolution")?,
            resolution_formula,
            custom_resolution_formula: None,
            threshold_p: take_threshold(&mut params)?,
        };

        let corrector = Self::build(formula, tracer, options, isotopes)?;
        if !params.is_empty() {
            let unused: Vec<String> = params.keys().cloned().collect();
            error!("Unused parameters: {:?}. Maybe a typo?", unused);
            return Err(IsoCorError::UnusedParameters(unused));
        }
        Ok(corrector)
    }
}

fn invalid(key: &str, reason: impl ToString) -> IsoCorError {
    IsoCorError::InvalidParameter {
        name: key.to_string(),
        reason: reason.to_string(),
    }
}

fn take<T: DeserializeOwned>(params: &mut Map<String, Value>, key: &str) -> Result<Option<T>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| invalid(key, e)),
    }
}

/// numbers may also be given as numeric strings
fn take_number(params: &mut Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| invalid(key, "not representable as f64")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(key, format!("should be numeric ({})", s))),
        Some(other) => Err(invalid(key, format!("should be numeric ({})", other))),
    }
}

/// integral numbers or numeric strings, `-1`, `-1.0` and `"-1"` alike
fn take_charge(params: &mut Map<String, Value>) -> Result<Option<i64>> {
    match take_number(params, "charge")? {
        Some(charge) if charge.fract() == 0.0 && charge.abs() <= i32::MAX as f64 => Ok(Some(charge as i64)),
        Some(charge) => Err(invalid("charge", format!("should be an integer ({})", charge))),
        None => Ok(None),
    }
}

fn take_threshold(params: &mut Map<String, Value>) -> Result<ProbabilityThreshold> {
    match params.remove("threshold_p") {
        None => Ok(ProbabilityThreshold::Auto),
        Some(Value::Null) => Ok(ProbabilityThreshold::Disabled),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(ProbabilityThreshold::Fixed)
            .ok_or_else(|| invalid("threshold_p", "not representable as f64")),
        Some(value) => serde_json::from_value(value).map_err(|e| invalid("threshold_p", e)),
    }
}
