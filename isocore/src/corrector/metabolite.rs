use std::sync::OnceLock;

use nalgebra::DMatrix;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::algorithm::cluster::{self, IsotopicCluster};
use crate::algorithm::resolution::{self, CustomResolutionFormula, ResolutionFormula};
use crate::algorithm::solver::{self, CorrectionResult};
use crate::chemistry::formula::ElementalComposition;
use crate::chemistry::labeled::LabeledChemical;
use crate::corrector::builder::{CorrectionMatrixBuilder, CorrectionStrategy, HighResolution, LowResolution};
use crate::corrector::options::ProbabilityThreshold;
use crate::error::{IsoCorError, Result};

/// Corrects the measurements of one labeled metabolite for natural isotopes
/// and tracer purity.
///
/// The correction matrix is computed on first use and kept until
/// [`MetaboliteCorrector::invalidate_correction_matrix`] is called.
#[derive(Debug)]
pub struct MetaboliteCorrector {
    chemical: LabeledChemical,
    builder: Box<dyn CorrectionMatrixBuilder>,
    threshold_p: Option<f64>,
    correction_matrix: OnceLock<DMatrix<f64>>,
}

impl MetaboliteCorrector {
    pub(crate) fn new(
        chemical: LabeledChemical,
        builder: Box<dyn CorrectionMatrixBuilder>,
        threshold_p: Option<f64>,
    ) -> Self {
        debug!(
            "New {} metabolite corrector, {}: formula={}, derivative={}, tracer={}, purity={:?}, correct_NA_tracer={}, charge={:?}, correction_limit={:?}",
            builder.strategy(),
            chemical.label(),
            chemical.formula(),
            chemical.derivative_formula(),
            chemical.tracer_code(),
            chemical.tracer_purity(),
            chemical.correct_na_tracer(),
            chemical.charge(),
            builder.correction_limit()
        );
        MetaboliteCorrector {
            chemical,
            builder,
            threshold_p,
            correction_matrix: OnceLock::new(),
        }
    }

    /// low-resolution corrector
    pub fn low_resolution(chemical: LabeledChemical, threshold_p: ProbabilityThreshold) -> Result<Self> {
        threshold_p.validate()?;
        let threshold = threshold_p.resolve(molecular_weight_f64(&chemical));
        Ok(MetaboliteCorrector::new(chemical, Box::new(LowResolution), threshold))
    }

    /// high-resolution corrector
    ///
    /// Arguments:
    ///
    /// * `chemical` - the labeled chemical, its charge must be set
    /// * `resolution` - calibration resolution of the instrument
    /// * `mz_of_resolution` - m/z at which `resolution` was measured
    /// * `resolution_formula` - preset relation between resolution and m/z
    /// * `custom_formula` - caller supplied relation, replaces the preset
    /// * `threshold_p` - isotopic cluster pruning threshold
    ///
    /// Returns:
    ///
    /// * `Result<MetaboliteCorrector>` - fails with `CorrectionLimitTooLarge` when the
    ///   instrument cannot separate nominal masses
    ///
    pub fn high_resolution(
        chemical: LabeledChemical,
        resolution: f64,
        mz_of_resolution: f64,
        resolution_formula: ResolutionFormula,
        custom_formula: Option<&CustomResolutionFormula>,
        threshold_p: ProbabilityThreshold,
    ) -> Result<Self> {
        threshold_p.validate()?;
        let charge = chemical.charge().ok_or_else(|| IsoCorError::InvalidParameter {
            name: "charge".to_string(),
            reason: "a charge is required at high resolution".to_string(),
        })?;
        let mw = molecular_weight_f64(&chemical);
        let limit = resolution::correction_limit(
            mw,
            charge,
            resolution,
            mz_of_resolution,
            resolution_formula,
            custom_formula,
        )?;
        let threshold = threshold_p.resolve(mw);
        Ok(MetaboliteCorrector::new(
            chemical,
            Box::new(HighResolution::new(limit, threshold)?),
            threshold,
        ))
    }

    pub fn chemical(&self) -> &LabeledChemical {
        &self.chemical
    }

    pub fn label(&self) -> &str {
        self.chemical.label()
    }

    pub fn strategy(&self) -> CorrectionStrategy {
        self.builder.strategy()
    }

    pub fn molecular_weight(&self) -> Decimal {
        self.chemical.molecular_weight()
    }

    pub fn mzshift_tracer(&self) -> Decimal {
        self.chemical.mzshift_tracer()
    }

    pub fn correction_formula(&self) -> &ElementalComposition {
        self.chemical.correction_formula()
    }

    pub fn tracer_element(&self) -> &str {
        self.chemical.tracer_element()
    }

    pub fn tracer_index(&self) -> usize {
        self.chemical.tracer_index()
    }

    /// operative correction limit in Da, `None` at low resolution
    pub fn correction_limit(&self) -> Option<f64> {
        self.builder.correction_limit()
    }

    /// probability threshold applied to isotopic clusters
    pub fn threshold_p(&self) -> Option<f64> {
        self.threshold_p
    }

    pub fn mass_distribution_vector(&self) -> Result<Vec<f64>> {
        self.builder.mass_distribution_vector(&self.chemical)
    }

    /// full isotopic cluster of the atoms corrected at natural abundance,
    /// `None` when there is no such atom
    pub fn isotopic_cluster(&self) -> Result<Option<IsotopicCluster>> {
        cluster::isotopic_cluster(&self.chemical, self.threshold_p)
    }

    /// compute the correction matrix without caching it
    pub fn compute_correction_matrix(&self) -> Result<DMatrix<f64>> {
        debug!("Computing correction matrix for {}...", self.chemical.label());
        self.builder.correction_matrix(&self.chemical)
    }

    /// correction matrix, computed on first access
    pub fn correction_matrix(&self) -> Result<&DMatrix<f64>> {
        if let Some(matrix) = self.correction_matrix.get() {
            return Ok(matrix);
        }
        let matrix = self.compute_correction_matrix()?;
        Ok(self.correction_matrix.get_or_init(|| matrix))
    }

    /// drop the cached correction matrix, the next access recomputes it
    pub fn invalidate_correction_matrix(&mut self) {
        self.correction_matrix.take();
    }

    /// correct a measurement vector of N + 1 areas
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::corrector::factory::MetaboliteCorrectorFactory;
    /// use isocore::corrector::options::CorrectorOptions;
    ///
    /// let corrector = MetaboliteCorrectorFactory::build("C3H7O6P", "13C", CorrectorOptions::default(), None).unwrap();
    /// let result = corrector.correct(&[0.9, 0.05, 0.03, 0.02]).unwrap();
    /// assert_eq!(result.isotopologue_fraction.len(), 4);
    /// assert!(corrector.correct(&[1.0, 0.0]).is_err());
    /// ```
    pub fn correct(&self, measurement: &[f64]) -> Result<CorrectionResult> {
        debug!("New correction for {} with: measurement={:?}.", self.chemical.label(), measurement);
        let expected = self.chemical.isotopologue_count();
        if measurement.len() != expected {
            return Err(IsoCorError::MeasurementLength {
                expected,
                found: measurement.len(),
            });
        }

        let result = solver::correct(self.correction_matrix()?, measurement);
        debug!("Finished correction. Residuum (normalized to 1): {:?}", result.residuum);
        Ok(result)
    }

    /// correct many measurement vectors in parallel
    ///
    /// The correction matrix is computed once before the work is spread over
    /// `num_threads` threads; each measurement gets its own result.
    pub fn correct_batch(&self, measurements: &[Vec<f64>], num_threads: usize) -> Vec<Result<CorrectionResult>> {
        if let Err(e) = self.correction_matrix() {
            return measurements.iter().map(|_| Err(e.clone())).collect();
        }

        let thread_pool = match ThreadPoolBuilder::new().num_threads(num_threads).build() {
            Ok(thread_pool) => thread_pool,
            Err(e) => {
                let error = IsoCorError::InvalidParameter {
                    name: "num_threads".to_string(),
                    reason: e.to_string(),
                };
                return measurements.iter().map(|_| Err(error.clone())).collect();
            }
        };

        thread_pool.install(|| {
            measurements
                .par_iter()
                .map(|measurement| self.correct(measurement))
                .collect()
        })
    }
}

fn molecular_weight_f64(chemical: &LabeledChemical) -> f64 {
    chemical.molecular_weight().to_f64().unwrap_or(f64::MAX)
}
