use std::fmt::{self, Debug, Display, Formatter};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::algorithm::{cluster, convolution, resolution};
use crate::chemistry::labeled::LabeledChemical;
use crate::corrector::options::ProbabilityThreshold;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionStrategy {
    /// isotopologues sharing a nominal mass are measured together
    Low,
    /// species apart by more than the correction limit are resolved
    High,
}

impl Display for CorrectionStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionStrategy::Low => write!(f, "low-resolution"),
            CorrectionStrategy::High => write!(f, "high-resolution"),
        }
    }
}

/// Builds the correction matrix of a labeled chemical for a given kind of instrument.
pub trait CorrectionMatrixBuilder: Debug + Send + Sync {
    fn strategy(&self) -> CorrectionStrategy;

    /// minimal mass difference resolved by the instrument, high resolution only
    fn correction_limit(&self) -> Option<f64> {
        None
    }

    /// natural abundance mass distribution of the atoms corrected at natural abundance
    fn mass_distribution_vector(&self, chemical: &LabeledChemical) -> Result<Vec<f64>>;

    fn correction_matrix(&self, chemical: &LabeledChemical) -> Result<DMatrix<f64>>;
}

/// Unit-resolution instruments: only the total mass shift is observed.
#[derive(Clone, Copy, Debug, Default)]
pub struct LowResolution;

impl CorrectionMatrixBuilder for LowResolution {
    fn strategy(&self) -> CorrectionStrategy {
        CorrectionStrategy::Low
    }

    fn mass_distribution_vector(&self, chemical: &LabeledChemical) -> Result<Vec<f64>> {
        Ok(convolution::mass_distribution_vector(chemical))
    }

    fn correction_matrix(&self, chemical: &LabeledChemical) -> Result<DMatrix<f64>> {
        let mass_distribution = convolution::mass_distribution_vector(chemical);
        Ok(convolution::convolution_matrix(chemical, &mass_distribution))
    }
}

/// High-resolution instruments, pooling only the species closer than the
/// correction limit to a tracer isotopologue.
#[derive(Clone, Copy, Debug)]
pub struct HighResolution {
    correction_limit: f64,
    threshold: Option<f64>,
}

impl HighResolution {
    /// Fails unless `0 < correction_limit < 0.5` Da and `threshold` is a probability.
    pub fn new(correction_limit: f64, threshold: Option<f64>) -> Result<Self> {
        let correction_limit = resolution::check_correction_limit(correction_limit)?;
        if let Some(p) = threshold {
            ProbabilityThreshold::Fixed(p).validate()?;
        }
        Ok(HighResolution { correction_limit, threshold })
    }
}

impl CorrectionMatrixBuilder for HighResolution {
    fn strategy(&self) -> CorrectionStrategy {
        CorrectionStrategy::High
    }

    fn correction_limit(&self) -> Option<f64> {
        Some(self.correction_limit)
    }

    fn mass_distribution_vector(&self, chemical: &LabeledChemical) -> Result<Vec<f64>> {
        cluster::mass_distribution_vector(chemical, self.correction_limit, self.threshold)
    }

    fn correction_matrix(&self, chemical: &LabeledChemical) -> Result<DMatrix<f64>> {
        // with two tracer isotopes the pooled distribution convolves like at low resolution
        if chemical.tracer_isotopes().len() == 2 {
            let mass_distribution = self.mass_distribution_vector(chemical)?;
            Ok(convolution::convolution_matrix(chemical, &mass_distribution))
        } else {
            cluster::combination_matrix(chemical, self.correction_limit, self.threshold)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use crate::chemistry::isotopes::tests::fixture_table;
    use crate::error::IsoCorError;

    fn chemical(formula: &str, tracer: &str, purity: Vec<f64>) -> LabeledChemical {
        LabeledChemical::builder(formula, tracer)
            .tracer_purity(Some(purity))
            .isotopes(Arc::new(fixture_table()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unresolved_high_resolution_matches_low_resolution() {
        for (formula, tracer, purity) in [
            ("C2O2P10", "13C", vec![0.0, 1.0]),
            ("C2H2N2P10", "13C", vec![0.1, 0.9]),
            ("OH2", "18O", vec![0.0, 0.0, 1.0]),
        ] {
            let chemical = chemical(formula, tracer, purity);
            let low = LowResolution.correction_matrix(&chemical).unwrap();
            // wide enough to pool every species, narrow enough to keep nominal masses apart
            let high = HighResolution::new(0.1, None).unwrap().correction_matrix(&chemical).unwrap();
            assert_relative_eq!(low, high, max_relative = 1e-10, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_resolved_matrix_ignores_natural_abundance() {
        let (p16o, p1h, p14n) = (0.6, 0.8, 0.9);
        let cases = [("C2O2P10", p16o * p16o), ("C2H2P10", p1h * p1h), ("C2H2N2P10", p1h * p1h * p14n * p14n)];
        for (formula, diagonal) in cases {
            let chemical = chemical(formula, "13C", vec![0.0, 1.0]);
            let matrix = HighResolution::new(5e-4, None).unwrap().correction_matrix(&chemical).unwrap();
            assert_relative_eq!(matrix, DMatrix::identity(3, 3) * diagonal, max_relative = 1e-10, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_strategies() {
        assert_eq!(LowResolution.strategy(), CorrectionStrategy::Low);
        assert_eq!(LowResolution.correction_limit(), None);
        let high = HighResolution::new(0.01, Some(1e-10)).unwrap();
        assert_eq!(high.strategy(), CorrectionStrategy::High);
        assert_eq!(high.correction_limit(), Some(0.01));
        assert_eq!(CorrectionStrategy::High.to_string(), "high-resolution");
    }

    #[test]
    fn test_high_resolution_rejects_unresolvable_limits() {
        assert!(matches!(
            HighResolution::new(1.5, None),
            Err(IsoCorError::CorrectionLimitTooLarge { .. })
        ));
        assert!(matches!(
            HighResolution::new(f64::NAN, None),
            Err(IsoCorError::CorrectionLimitTooLarge { .. })
        ));
        assert!(matches!(
            HighResolution::new(-0.01, None),
            Err(IsoCorError::InvalidParameter { .. })
        ));
        assert!(matches!(
            HighResolution::new(0.01, Some(1.5)),
            Err(IsoCorError::InvalidParameter { .. })
        ));
    }
}
