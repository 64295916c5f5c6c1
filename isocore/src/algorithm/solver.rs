//! Bounded least-squares inversion of a correction matrix.
//!
//! The corrected areas `x` minimize `||b - A x||^2` subject to `x >= 0`, where
//! `A` is the correction matrix and `b` the measurement. The problem is solved
//! with a projected limited-memory BFGS iteration started from zero, followed
//! by an exact least-squares refinement on the set of non-zero components.

use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::chemistry::constants::{
    SOLVER_FACTR, SOLVER_MAX_ITERATIONS, SOLVER_MAX_LINE_SEARCH_STEPS, SOLVER_MEMORY, SOLVER_PGTOL,
};

const ARMIJO: f64 = 1e-4;

/// Outcome of the correction of one measurement vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    /// corrected area of each isotopologue
    pub corrected_area: Vec<f64>,
    /// corrected areas normalized to 1, NaN if they sum to 0
    pub isotopologue_fraction: Vec<f64>,
    /// `measurement - matrix * corrected_area` normalized by the total measured area
    pub residuum: Vec<f64>,
    /// mean tracer enrichment, in [0, 1]
    pub mean_enrichment: f64,
}

/// compensated sum (Neumaier)
///
/// # Examples
///
/// ```
/// use isocore::algorithm::solver::neumaier_sum;
///
/// assert_eq!(neumaier_sum([1.0, 1e100, 1.0, -1e100]), 2.0);
/// ```
pub fn neumaier_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut compensation = 0.0;
    for value in values {
        let t = sum + value;
        if sum.abs() >= value.abs() {
            compensation += (sum - t) + value;
        } else {
            compensation += (value - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

fn objective(matrix: &DMatrix<f64>, measurement: &DVector<f64>, x: &DVector<f64>) -> (f64, DVector<f64>) {
    let residual = measurement - matrix * x;
    let gradient = matrix.tr_mul(&residual) * -2.0;
    (residual.norm_squared(), gradient)
}

/// components held at the lower bound by a gradient pushing outwards
fn active_set(x: &DVector<f64>, gradient: &DVector<f64>) -> Vec<bool> {
    x.iter().zip(gradient.iter()).map(|(xi, gi)| *xi <= 0.0 && *gi > 0.0).collect()
}

fn projected_gradient_norm(x: &DVector<f64>, gradient: &DVector<f64>) -> f64 {
    x.iter()
        .zip(gradient.iter())
        .map(|(xi, gi)| (xi - (xi - gi).max(0.0)).abs())
        .fold(0.0, f64::max)
}

fn masked(vector: &DVector<f64>, active: &[bool]) -> DVector<f64> {
    DVector::from_iterator(
        vector.len(),
        vector.iter().zip(active.iter()).map(|(v, a)| if *a { 0.0 } else { *v }),
    )
}

/// L-BFGS two-loop recursion restricted to the free components
fn search_direction(
    gradient: &DVector<f64>,
    active: &[bool],
    memory: &VecDeque<(DVector<f64>, DVector<f64>)>,
) -> DVector<f64> {
    let mut q = masked(gradient, active);
    let mut alphas = Vec::with_capacity(memory.len());
    for (s, y) in memory.iter().rev() {
        let alpha = s.dot(&q) / y.dot(s);
        q -= y * alpha;
        alphas.push(alpha);
    }

    if let Some((s, y)) = memory.back() {
        q *= s.dot(y) / y.dot(y);
    }

    for ((s, y), alpha) in memory.iter().zip(alphas.into_iter().rev()) {
        let beta = y.dot(&q) / y.dot(s);
        q += s * (alpha - beta);
    }
    -masked(&q, active)
}

/// Projected L-BFGS over the non-negative orthant.
fn projected_lbfgs(matrix: &DMatrix<f64>, measurement: &DVector<f64>) -> DVector<f64> {
    let mut x = DVector::zeros(matrix.ncols());
    let (mut f, mut gradient) = objective(matrix, measurement, &x);
    let mut memory: VecDeque<(DVector<f64>, DVector<f64>)> = VecDeque::with_capacity(SOLVER_MEMORY);

    for _ in 0..SOLVER_MAX_ITERATIONS {
        if projected_gradient_norm(&x, &gradient) <= SOLVER_PGTOL {
            break;
        }

        let active = active_set(&x, &gradient);
        let mut direction = search_direction(&gradient, &active, &memory);
        if direction.dot(&gradient) >= 0.0 {
            memory.clear();
            direction = -masked(&gradient, &active);
        }

        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..SOLVER_MAX_LINE_SEARCH_STEPS {
            let candidate = (&x + &direction * step).map(|v| v.max(0.0));
            let (f_candidate, g_candidate) = objective(matrix, measurement, &candidate);
            if f_candidate <= f + ARMIJO * gradient.dot(&(&candidate - &x)) {
                accepted = Some((candidate, f_candidate, g_candidate));
                break;
            }
            step *= 0.5;
        }

        let (x_new, f_new, gradient_new) = match accepted {
            Some(accepted) => accepted,
            None if !memory.is_empty() => {
                memory.clear();
                continue;
            }
            None => break,
        };

        let s = &x_new - &x;
        let y = &gradient_new - &gradient;
        if s.dot(&y) > f64::EPSILON * y.norm_squared() {
            if memory.len() == SOLVER_MEMORY {
                memory.pop_front();
            }
            memory.push_back((s, y));
        }

        let decrease = (f - f_new) / f.abs().max(f_new.abs()).max(1.0);
        x = x_new;
        f = f_new;
        gradient = gradient_new;
        if decrease <= SOLVER_FACTR * f64::EPSILON {
            break;
        }
    }
    x
}

/// Exact least squares on the components left free by the iterative solver.
///
/// Components that come out non-positive leave the free set, bound components
/// whose gradient still points inwards join it, until the optimality
/// conditions hold.
fn refine_on_free_set(
    matrix: &DMatrix<f64>,
    measurement: &DVector<f64>,
    x: &DVector<f64>,
) -> Option<DVector<f64>> {
    let n = x.len();
    let mut free: Vec<usize> = (0..n).filter(|&i| x[i] > 0.0).collect();
    for _ in 0..(3 * n + 10) {
        let mut refined = DVector::zeros(n);
        if !free.is_empty() {
            let sub_matrix = matrix.select_columns(free.iter());
            let solution = sub_matrix.svd(true, true).solve(measurement, f64::EPSILON).ok()?;
            if solution.iter().any(|v| *v <= 0.0) {
                free = free
                    .iter()
                    .zip(solution.iter())
                    .filter(|(_, v)| **v > 0.0)
                    .map(|(i, _)| *i)
                    .collect();
                continue;
            }
            for (value, &i) in solution.iter().zip(free.iter()) {
                refined[i] = *value;
            }
        }

        let (_, gradient) = objective(matrix, measurement, &refined);
        let entering = (0..n)
            .filter(|i| !free.contains(i) && gradient[*i] < -SOLVER_PGTOL)
            .min_by(|a, b| gradient[*a].total_cmp(&gradient[*b]));
        match entering {
            Some(i) => free.push(i),
            None => return Some(refined),
        }
    }
    None
}

/// non-negative least squares solution of `matrix * x = measurement`
///
/// Arguments:
///
/// * `matrix` - correction matrix
/// * `measurement` - measured areas
///
/// Returns:
///
/// * `DVector<f64>` - non-negative corrected areas
///
pub fn solve_nonnegative(matrix: &DMatrix<f64>, measurement: &DVector<f64>) -> DVector<f64> {
    let x = projected_lbfgs(matrix, measurement);
    match refine_on_free_set(matrix, measurement, &x) {
        Some(refined)
            if objective(matrix, measurement, &refined).0 <= objective(matrix, measurement, &x).0 =>
        {
            refined
        }
        _ => x,
    }
}

/// correct a measurement vector, the length of which must match the matrix
///
/// Arguments:
///
/// * `matrix` - (N+1)x(N+1) correction matrix
/// * `measurement` - N + 1 measured areas
///
/// Returns:
///
/// * `CorrectionResult` - corrected areas, fractions, residuum and mean enrichment
///
/// # Examples
///
/// ```
/// use isocore::algorithm::solver::correct;
/// use nalgebra::DMatrix;
///
/// let result = correct(&DMatrix::identity(2, 2), &[3.0, 1.0]);
/// assert!((result.isotopologue_fraction[0] - 0.75).abs() < 1e-9);
/// assert!((result.mean_enrichment - 0.25).abs() < 1e-9);
/// ```
pub fn correct(matrix: &DMatrix<f64>, measurement: &[f64]) -> CorrectionResult {
    let measured = DVector::from_column_slice(measurement);
    let corrected = solve_nonnegative(matrix, &measured);
    let residual = &measured - matrix * &corrected;

    let sum_p = neumaier_sum(corrected.iter().copied());
    let (isotopologue_fraction, mean_enrichment) = if sum_p != 0.0 {
        let fractions: Vec<f64> = corrected.iter().map(|p| p / sum_p).collect();
        let n_tracers = fractions.len().saturating_sub(1).max(1) as f64;
        let enrichment = neumaier_sum(fractions.iter().enumerate().map(|(i, p)| i as f64 * p)) / n_tracers;
        (fractions, enrichment)
    } else {
        (vec![f64::NAN; corrected.len()], f64::NAN)
    };

    let sum_m = neumaier_sum(measurement.iter().copied());
    let residuum = if sum_m != 0.0 {
        residual.iter().map(|v| v / sum_m).collect()
    } else {
        vec![f64::NAN; residual.len()]
    };

    CorrectionResult {
        corrected_area: corrected.iter().copied().collect(),
        isotopologue_fraction,
        residuum,
        mean_enrichment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn lower_triangular() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[0.64, 0.0, 0.0, 0.32, 0.64, 0.0, 0.04, 0.32, 0.64])
    }

    #[test]
    fn test_recovers_exact_solution() {
        let matrix = lower_triangular();
        let truth = DVector::from_vec(vec![0.7, 0.2, 0.1]);
        let measurement = &matrix * &truth;

        let result = correct(&matrix, measurement.as_slice());
        for (a, b) in result.isotopologue_fraction.iter().zip(truth.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-7);
        }
        assert_relative_eq!(result.mean_enrichment, (0.2 + 0.2) / 2.0, max_relative = 1e-7);
        assert!(result.residuum.iter().all(|r| r.abs() < 1e-9));
    }

    #[test]
    fn test_negative_solutions_are_clipped() {
        // unconstrained solution is [1, -0.5]
        let matrix = DMatrix::identity(2, 2);
        let result = correct(&matrix, &[1.0, -0.5]);
        assert_relative_eq!(result.corrected_area[0], 1.0, epsilon = 1e-9);
        assert_eq!(result.corrected_area[1], 0.0);
        assert_eq!(result.isotopologue_fraction, vec![1.0, 0.0]);
        assert_eq!(result.mean_enrichment, 0.0);
        assert_relative_eq!(result.residuum[1], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_measurement_gives_nan() {
        let result = correct(&lower_triangular(), &[0.0, 0.0, 0.0]);
        assert_eq!(result.corrected_area, vec![0.0, 0.0, 0.0]);
        assert!(result.isotopologue_fraction.iter().all(|f| f.is_nan()));
        assert!(result.residuum.iter().all(|r| r.is_nan()));
        assert!(result.mean_enrichment.is_nan());
    }

    #[test]
    fn test_random_systems_satisfy_optimality() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let n = rng.gen_range(2..8);
            let matrix = DMatrix::from_fn(n, n, |i, j| {
                if i == j {
                    rng.gen_range(0.5..1.0)
                } else {
                    rng.gen_range(0.0..0.2)
                }
            });
            let measurement = DVector::from_fn(n, |_, _| rng.gen_range(-0.2..1.0));

            let x = solve_nonnegative(&matrix, &measurement);
            let (_, gradient) = objective(&matrix, &measurement, &x);
            for i in 0..n {
                assert!(x[i] >= 0.0);
                if x[i] > 0.0 {
                    assert!(gradient[i].abs() < 1e-7, "free component with gradient {}", gradient[i]);
                } else {
                    assert!(gradient[i] > -1e-7, "bound component with gradient {}", gradient[i]);
                }
            }
        }
    }

    #[test]
    fn test_neumaier_sum() {
        assert_eq!(neumaier_sum(Vec::<f64>::new()), 0.0);
        assert_eq!(neumaier_sum(vec![0.1; 10]), 1.0);
    }
}
