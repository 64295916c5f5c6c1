use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chemistry::constants::{MAX_CORRECTION_LIMIT, PRECISION_FLOOR_FACTOR, RESOLUTION_FORMULA_FACTOR};
use crate::error::{IsoCorError, Result};

/// Caller supplied resolution formula, `(mw, resolution, at_mz) -> delta mass`.
pub type CustomResolutionFormula = Arc<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>;

/// Preset relations between the calibration resolution of an instrument and
/// the smallest mass difference it resolves at a given m/z.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionFormula {
    #[default]
    #[serde(rename = "orbitrap")]
    Orbitrap,
    #[serde(rename = "ft-icr")]
    FtIcr,
    #[serde(rename = "constant")]
    Constant,
    /// resolution read per row from a data file, applied as a constant
    #[serde(rename = "datafile")]
    Datafile,
}

impl ResolutionFormula {
    pub fn code(&self) -> &'static str {
        match self {
            ResolutionFormula::Orbitrap => "orbitrap",
            ResolutionFormula::FtIcr => "ft-icr",
            ResolutionFormula::Constant => "constant",
            ResolutionFormula::Datafile => "datafile",
        }
    }

    /// minimal resolved mass difference at `mw`
    ///
    /// Arguments:
    ///
    /// * `mw` - m/z where the difference is evaluated
    /// * `resolution` - calibration resolution of the instrument
    /// * `at_mz` - m/z of the calibration
    ///
    /// Returns:
    ///
    /// * `f64` - minimal mass difference, in Da
    ///
    /// # Examples
    ///
    /// ```
    /// use isocore::algorithm::resolution::ResolutionFormula;
    ///
    /// let delta = ResolutionFormula::Constant.delta_mass(400.0, 1e4, 400.0);
    /// assert!((delta - 0.0664).abs() < 1e-12);
    /// ```
    pub fn delta_mass(&self, mw: f64, resolution: f64, at_mz: f64) -> f64 {
        match self {
            ResolutionFormula::Orbitrap => RESOLUTION_FORMULA_FACTOR * mw.powf(1.5) / (resolution * at_mz.sqrt()),
            ResolutionFormula::FtIcr => RESOLUTION_FORMULA_FACTOR * mw.powi(2) / (resolution * at_mz),
            ResolutionFormula::Constant | ResolutionFormula::Datafile => RESOLUTION_FORMULA_FACTOR * mw / resolution,
        }
    }
}

impl Display for ResolutionFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for ResolutionFormula {
    type Err = IsoCorError;

    fn from_str(code: &str) -> Result<Self> {
        match code {
            "orbitrap" => Ok(ResolutionFormula::Orbitrap),
            "ft-icr" => Ok(ResolutionFormula::FtIcr),
            "constant" => Ok(ResolutionFormula::Constant),
            "datafile" => Ok(ResolutionFormula::Datafile),
            other => Err(IsoCorError::UnknownResolutionFormula(other.to_string())),
        }
    }
}

/// Correction limit of a charged molecule: the smallest mass difference, in Da,
/// between two species the instrument still separates.
///
/// The formula is evaluated at m/z = `mw / charge` and the result scaled back
/// by the charge. A custom formula, when given, replaces the preset.
///
/// Arguments:
///
/// * `mw` - molecular weight
/// * `charge` - absolute charge
/// * `resolution` - calibration resolution, must be > 0
/// * `mz_of_resolution` - calibration m/z, must be > 0
/// * `formula` - preset formula
/// * `custom` - optional caller supplied formula
///
/// Returns:
///
/// * `Result<f64>` - the correction limit, raised to a precision floor if too
///   small; `CorrectionLimitTooLarge` when it reaches 0.5 Da
///
pub fn correction_limit(
    mw: f64,
    charge: u32,
    resolution: f64,
    mz_of_resolution: f64,
    formula: ResolutionFormula,
    custom: Option<&CustomResolutionFormula>,
) -> Result<f64> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(IsoCorError::InvalidResolution { name: "resolution", value: resolution });
    }
    if !mz_of_resolution.is_finite() || mz_of_resolution <= 0.0 {
        return Err(IsoCorError::InvalidResolution { name: "mz_of_resolution", value: mz_of_resolution });
    }

    let charge = f64::from(charge);
    let mz = mw / charge;
    let limit = match custom {
        Some(custom) => custom(mz, resolution, mz_of_resolution),
        None => formula.delta_mass(mz, resolution, mz_of_resolution),
    } * charge;

    let precision_floor = PRECISION_FLOOR_FACTOR * f64::EPSILON;
    if (0.0..precision_floor).contains(&limit) {
        warn!(
            "Correction limit ({}) is close to machine limits for floating point operations, reset to: {}",
            limit, precision_floor
        );
        return Ok(precision_floor);
    }
    check_correction_limit(limit)
}

/// check that a correction limit lies in `0 < limit < 0.5` Da
///
/// A limit of 0.5 Da or more cannot tell apart isotopologues one nominal mass
/// away; that error is recoverable by falling back to low resolution.
pub fn check_correction_limit(limit: f64) -> Result<f64> {
    if limit.is_nan() || limit >= MAX_CORRECTION_LIMIT {
        Err(IsoCorError::CorrectionLimitTooLarge { limit })
    } else if limit <= 0.0 {
        Err(IsoCorError::InvalidParameter {
            name: "correction_limit".to_string(),
            reason: format!("should be a positive mass difference ({})", limit),
        })
    } else {
        Ok(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MW_C20: f64 = 240.0;

    #[test]
    fn test_orbitrap_limits() {
        for (resolution, charge, expected) in [
            (1e4, 1, 0.03086),
            (1e4, 2, 0.021821),
            (1e5, 1, 0.003086),
            (1e5, 2, 0.0021821),
        ] {
            let limit =
                correction_limit(MW_C20, charge, resolution, 400.0, ResolutionFormula::Orbitrap, None).unwrap();
            let theoretical = 1.66 * (MW_C20 / charge as f64).powf(1.5) / (resolution * 20.0) * charge as f64;
            assert_relative_eq!(limit, theoretical, max_relative = 1e-12);
            assert!((limit - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_preset_formulas() {
        assert_relative_eq!(
            ResolutionFormula::FtIcr.delta_mass(200.0, 1e5, 400.0),
            0.00166,
            max_relative = 1e-12
        );
        assert_eq!(
            ResolutionFormula::Datafile.delta_mass(200.0, 1e4, 400.0),
            ResolutionFormula::Constant.delta_mass(200.0, 1e4, 400.0)
        );
    }

    #[test]
    fn test_codes() {
        for formula in [
            ResolutionFormula::Orbitrap,
            ResolutionFormula::FtIcr,
            ResolutionFormula::Constant,
            ResolutionFormula::Datafile,
        ] {
            assert_eq!(formula.code().parse::<ResolutionFormula>().unwrap(), formula);
            assert_eq!(serde_json::to_string(&formula).unwrap(), format!("\"{}\"", formula));
        }
        assert!(matches!(
            "tof".parse::<ResolutionFormula>(),
            Err(IsoCorError::UnknownResolutionFormula(_))
        ));
    }

    #[test]
    fn test_limit_too_large() {
        let result = correction_limit(MW_C20, 1, 10.0, 400.0, ResolutionFormula::Orbitrap, None);
        assert!(matches!(result, Err(IsoCorError::CorrectionLimitTooLarge { .. })));
        assert!(result.unwrap_err().is_recoverable());
    }

    #[test]
    fn test_limit_clamped_to_precision_floor() {
        let limit = correction_limit(MW_C20, 1, 1e42, 400.0, ResolutionFormula::Orbitrap, None).unwrap();
        assert_eq!(limit, 1e3 * f64::EPSILON);
    }

    #[test]
    fn test_invalid_calibration() {
        assert!(matches!(
            correction_limit(MW_C20, 1, 0.0, 400.0, ResolutionFormula::Orbitrap, None),
            Err(IsoCorError::InvalidResolution { name: "resolution", .. })
        ));
        assert!(matches!(
            correction_limit(MW_C20, 1, 1e4, -1.0, ResolutionFormula::Orbitrap, None),
            Err(IsoCorError::InvalidResolution { name: "mz_of_resolution", .. })
        ));
    }

    #[test]
    fn test_check_correction_limit() {
        assert_eq!(check_correction_limit(0.01), Ok(0.01));
        for limit in [0.5, 1.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                check_correction_limit(limit),
                Err(IsoCorError::CorrectionLimitTooLarge { .. })
            ));
        }
        for limit in [0.0, -0.01] {
            assert!(matches!(
                check_correction_limit(limit),
                Err(IsoCorError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_negative_custom_limit_is_rejected() {
        let custom: CustomResolutionFormula = Arc::new(|_, _, _| -0.01);
        assert!(matches!(
            correction_limit(MW_C20, 1, 1e4, 400.0, ResolutionFormula::Orbitrap, Some(&custom)),
            Err(IsoCorError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_custom_formula_takes_precedence() {
        let custom: CustomResolutionFormula = Arc::new(|_, _, _| 0.01);
        let limit = correction_limit(MW_C20, 2, 1e4, 400.0, ResolutionFormula::Orbitrap, Some(&custom)).unwrap();
        assert_relative_eq!(limit, 0.02, max_relative = 1e-12);
    }
}
