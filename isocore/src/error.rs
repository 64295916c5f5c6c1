use thiserror::Error;

/// Errors raised while configuring a corrector or correcting a measurement.
///
/// Every variant except [`IsoCorError::MeasurementLength`] is a configuration
/// error raised at construction time; a failed construction never yields a
/// usable corrector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IsoCorError {
    #[error("invalid elemental formula '{0}'")]
    InvalidFormula(String),

    #[error("the elemental formula of '{0}' is empty")]
    EmptyFormula(String),

    #[error("invalid tracer code '{code}': {reason}")]
    InvalidTracer { code: String, reason: String },

    #[error("element '{0}' is missing from the isotope table")]
    UnknownElement(String),

    #[error("invalid isotope data for element '{element}': {reason}")]
    InvalidIsotopeTable { element: String, reason: String },

    #[error("the isotopic tracer ({tracer}) must be present in the metabolite {formula}")]
    TracerNotInFormula { tracer: String, formula: String },

    #[error("unexpected length of tracer purity vector: expected {expected}, found {found}")]
    TracerPurityLength { expected: usize, found: usize },

    #[error("'charge' parameter should be a non-null integer ({0})")]
    InvalidCharge(i64),

    #[error("'{name}' parameter should be a positive number ({value})")]
    InvalidResolution { name: &'static str, value: f64 },

    #[error("no resolution formula registered for code '{0}'")]
    UnknownResolutionFormula(String),

    #[error(
        "the correction limit is expected to be sufficient to distinguish peaks \
         with a delta-mass of 1 amu ({limit} >= 0.5)"
    )]
    CorrectionLimitTooLarge { limit: f64 },

    #[error("unable to select a correction strategy: {0}")]
    AmbiguousStrategy(String),

    #[error("unused parameters: {0:?}. Maybe a typo?")]
    UnusedParameters(Vec<String>),

    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error(
        "the length of the measured isotopic cluster ({found}) is different than the required \
         number of measurements: {expected} (i.e. N + 1, where N is the number of atoms that \
         could be traced)"
    )]
    MeasurementLength { expected: usize, found: usize },
}

impl IsoCorError {
    /// Whether the factory may recover from this error by falling back to
    /// low-resolution correction.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IsoCorError::CorrectionLimitTooLarge { .. })
    }
}

pub type Result<T> = std::result::Result<T, IsoCorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_correction_limit_is_recoverable() {
        assert!(IsoCorError::CorrectionLimitTooLarge { limit: 0.7 }.is_recoverable());
        assert!(!IsoCorError::InvalidCharge(0).is_recoverable());
        assert!(!IsoCorError::MeasurementLength { expected: 3, found: 2 }.is_recoverable());
    }

    #[test]
    fn test_messages_name_the_offending_value() {
        let err = IsoCorError::InvalidResolution { name: "resolution", value: -1.0 };
        assert!(err.to_string().contains("'resolution'"));
        assert!(err.to_string().contains("-1"));

        let err = IsoCorError::UnusedParameters(vec!["resolutoin".to_string()]);
        assert!(err.to_string().contains("resolutoin"));
    }
}
