// chemistry module
pub mod chemistry {
    pub mod constants;
    pub mod formula;
    pub mod isotopes;
    pub mod labeled;
}

// algorithm module
pub mod algorithm {
    pub mod convolution;
    pub mod cluster;
    pub mod resolution;
    pub mod solver;
}

// corrector module
pub mod corrector {
    pub mod builder;
    pub mod options;
    pub mod factory;
    pub mod metabolite;
}

pub mod error;

pub use algorithm::solver::CorrectionResult;
pub use corrector::factory::MetaboliteCorrectorFactory;
pub use corrector::metabolite::MetaboliteCorrector;
pub use corrector::options::{CorrectorOptions, ProbabilityThreshold};
pub use error::{IsoCorError, Result};
