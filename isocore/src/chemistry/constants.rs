// Purpose: To store constants that are used in the program
pub const MAX_ISOTOPE_MASS_GAP: f64 = 1.2; // Unified atomic mass unit
pub const MAX_TRACER_MASS_DEVIATION: f64 = 0.5; // Unified atomic mass unit
pub const ABUNDANCE_DECIMALS: u32 = 12;

// Resolution model
pub const RESOLUTION_FORMULA_FACTOR: f64 = 1.66;
pub const MAX_CORRECTION_LIMIT: f64 = 0.5; // Unified atomic mass unit
pub const PRECISION_FLOOR_FACTOR: f64 = 1e3; // times f64::EPSILON

// Isotopic cluster pruning
pub const PRUNING_MASS_LIMIT: f64 = 500.0; // Unified atomic mass unit
pub const DEFAULT_PRUNING_THRESHOLD: f64 = 1e-10;

// Bounded least-squares solver
pub const SOLVER_MEMORY: usize = 10;
pub const SOLVER_FACTR: f64 = 1e3; // times f64::EPSILON
pub const SOLVER_PGTOL: f64 = 1e-10;
pub const SOLVER_MAX_ITERATIONS: usize = 15_000;
pub const SOLVER_MAX_LINE_SEARCH_STEPS: usize = 60;
