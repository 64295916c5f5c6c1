use nalgebra::DMatrix;
use tracing::debug;

use crate::chemistry::labeled::LabeledChemical;

/// convolve two discrete distributions (full mode)
///
/// Arguments:
///
/// * `a` - first distribution, indexed by mass shift
/// * `b` - second distribution, indexed by mass shift
///
/// Returns:
///
/// * `Vec<f64>` - distribution of the summed shifts, of length `a.len() + b.len() - 1`
///
/// # Examples
///
/// ```
/// use isocore::algorithm::convolution::convolve;
///
/// let result = convolve(&[0.5, 0.5], &[0.5, 0.5]);
/// assert_eq!(result, vec![0.25, 0.5, 0.25]);
/// ```
pub fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }

    let mut result = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            result[i + j] += x * y;
        }
    }
    result
}

/// convolve a distribution `n` times with the same kernel
pub fn convolve_pow(dist: &[f64], kernel: &[f64], n: usize) -> Vec<f64> {
    (0..n).fold(dist.to_vec(), |acc, _| convolve(&acc, kernel))
}

/// low-resolution mass distribution vector of the atoms corrected at natural abundance
///
/// Entry `k` is the probability of a +k nominal mass shift caused by natural
/// isotopes of the correction formula (non-tracer atoms plus derivative).
///
/// Arguments:
///
/// * `chemical` - the labeled chemical
///
/// Returns:
///
/// * `Vec<f64>` - mass distribution vector, `[1.0]` for an empty correction formula
///
pub fn mass_distribution_vector(chemical: &LabeledChemical) -> Vec<f64> {
    let mut result = vec![1.0];
    for (element, count) in chemical.correction_formula().iter() {
        if let Ok(isotopes) = chemical.isotopes().element(element) {
            result = convolve_pow(&result, &isotopes.abundance, count as usize);
        }
    }
    debug!(
        "Done computing mass distribution vector for non-tracer elements of {} (convolution method): {:?}",
        chemical.label(),
        result
    );
    result
}

/// build the correction matrix by iterative convolution of a mass distribution vector
///
/// Column `j` holds the expected measurement of a molecule carrying `j` labeled
/// tracer atoms: the mass distribution vector convolved `j` times with the tracer
/// purity and, when enabled, `N - j` times with the tracer natural abundance.
/// Only shifts that are multiples of the tracer isotope index are kept.
///
/// Arguments:
///
/// * `chemical` - the labeled chemical
/// * `mass_distribution` - mass distribution vector of the non-tracer atoms
///
/// Returns:
///
/// * `DMatrix<f64>` - (N+1)x(N+1) correction matrix
///
pub fn convolution_matrix(chemical: &LabeledChemical, mass_distribution: &[f64]) -> DMatrix<f64> {
    let n_isotopologues = chemical.isotopologue_count();
    let tracer_abundance = &chemical.tracer_isotopes().abundance;
    let mask: Vec<usize> = (0..n_isotopologues).map(|n| n * chemical.tracer_index()).collect();

    let mut correction_matrix = DMatrix::zeros(n_isotopologues, n_isotopologues);
    for j in 0..n_isotopologues {
        let mut column = convolve_pow(mass_distribution, chemical.tracer_purity(), j);
        if chemical.correct_na_tracer() {
            column = convolve_pow(&column, tracer_abundance, n_isotopologues - j - 1);
        }
        for (i, &shift) in mask.iter().enumerate() {
            correction_matrix[(i, j)] = column.get(shift).copied().unwrap_or(0.0);
        }
    }

    debug!(
        "Done computing correction matrix (convolution) for {}: {}",
        chemical.label(),
        correction_matrix
    );
    correction_matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use crate::chemistry::isotopes::tests::fixture_table;

    const P1H: f64 = 0.8;
    const P2H: f64 = 0.2;
    const P12C: f64 = 0.7;
    const P13C: f64 = 0.3;
    const P14N: f64 = 0.9;
    const P15N: f64 = 0.1;
    const P16O: f64 = 0.6;
    const P17O: f64 = 0.3;
    const P18O: f64 = 0.1;

    fn matrix(
        formula: &str,
        derivative: &str,
        correct_na_tracer: bool,
        tracer_purity: Vec<f64>,
    ) -> DMatrix<f64> {
        let chemical = LabeledChemical::builder(formula, "13C")
            .derivative_formula(Some(derivative))
            .correct_na_tracer(correct_na_tracer)
            .tracer_purity(Some(tracer_purity))
            .isotopes(Arc::new(fixture_table()))
            .build()
            .unwrap();
        convolution_matrix(&chemical, &mass_distribution_vector(&chemical))
    }

    fn assert_matrix_eq(actual: &DMatrix<f64>, expected: [[f64; 3]; 3]) {
        let expected = DMatrix::from_fn(3, 3, |i, j| expected[i][j]);
        assert_relative_eq!(*actual, expected, max_relative = 1e-12, epsilon = 1e-15);
    }

    #[test]
    fn test_convolve_matches_full_mode() {
        assert_eq!(convolve(&[1.0], &[0.6, 0.3, 0.1]), vec![0.6, 0.3, 0.1]);
        assert_eq!(convolve(&[1.0, 2.0, 3.0], &[0.0, 1.0]), vec![0.0, 1.0, 2.0, 3.0]);
        assert!(convolve(&[], &[1.0]).is_empty());
        assert_eq!(convolve_pow(&[1.0], &[0.5, 0.5], 0), vec![1.0]);
    }

    #[test]
    fn test_mass_distribution_against_brute_force() {
        let table = Arc::new(fixture_table());
        for formula in ["CN", "CO", "CN2", "CO2", "CN20H20O20P4", "C20N20H20O20P4"] {
            let chemical = LabeledChemical::builder(formula, "13C")
                .isotopes(table.clone())
                .build()
                .unwrap();
            let optimized = mass_distribution_vector(&chemical);

            let mut expected = vec![1.0];
            let composition = chemical.formula().without("C");
            for (element, count) in composition.iter() {
                for _ in 0..count {
                    expected = convolve(&expected, &table.element(element).unwrap().abundance);
                }
            }

            assert_eq!(optimized.len(), expected.len());
            assert_relative_eq!(optimized.iter().sum::<f64>(), 1.0, max_relative = 1e-12);
            for (a, b) in optimized.iter().zip(expected.iter()) {
                assert_relative_eq!(a, b, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_three_isotope_element() {
        let m = matrix("C2O2P10", "", false, vec![0.0, 1.0]);
        assert_matrix_eq(
            &m,
            [
                [P16O.powi(2), 0.0, 0.0],
                [P17O * P16O * 2.0, P16O.powi(2), 0.0],
                [P17O * P17O + P18O * P16O * 2.0, P17O * P16O * 2.0, P16O.powi(2)],
            ],
        );
    }

    #[test]
    fn test_two_isotope_element() {
        let m = matrix("C2H2P10", "", false, vec![0.0, 1.0]);
        assert_matrix_eq(
            &m,
            [
                [P1H.powi(2), 0.0, 0.0],
                [2.0 * P1H * P2H, P1H.powi(2), 0.0],
                [P2H.powi(2), 2.0 * P1H * P2H, P1H.powi(2)],
            ],
        );
    }

    #[test]
    fn test_tracer_natural_abundance() {
        let m = matrix("C2H2P10", "", true, vec![0.0, 1.0]);
        assert_matrix_eq(
            &m,
            [
                [P1H.powi(2) * P12C.powi(2), 0.0, 0.0],
                [
                    2.0 * P1H * P2H * P12C.powi(2) + 2.0 * P12C * P13C * P1H.powi(2),
                    P1H.powi(2) * P12C,
                    0.0,
                ],
                [
                    P2H.powi(2) * P12C.powi(2)
                        + 2.0 * P12C * P13C * P1H * P2H * 2.0
                        + P1H.powi(2) * P13C.powi(2),
                    P12C * P1H * P2H * 2.0 + P1H.powi(2) * P13C,
                    P1H.powi(2),
                ],
            ],
        );
    }

    #[test]
    fn test_two_elements() {
        let m = matrix("C2H2N2P10", "", false, vec![0.0, 1.0]);
        let m0 = P1H.powi(2) * P14N.powi(2);
        let m1 = 2.0 * P1H * P2H * P14N.powi(2) + 2.0 * P14N * P15N * P1H.powi(2);
        let m2 = P2H.powi(2) * P14N.powi(2)
            + 2.0 * P14N * P15N * P1H * P2H * 2.0
            + P1H.powi(2) * P15N.powi(2);
        assert_matrix_eq(&m, [[m0, 0.0, 0.0], [m1, m0, 0.0], [m2, m1, m0]]);
    }

    #[test]
    fn test_tracer_purity() {
        let (pur12, pur13) = (0.1, 0.9);
        let m = matrix("C2H2P10", "", false, vec![pur12, pur13]);
        assert_matrix_eq(
            &m,
            [
                [P1H.powi(2), P1H.powi(2) * pur12, P1H.powi(2) * pur12 * pur12],
                [
                    2.0 * P1H * P2H,
                    P1H.powi(2) * pur13 + 2.0 * P1H * P2H * pur12,
                    P1H.powi(2) * pur12 * pur13 * 2.0 + 2.0 * P1H * P2H * pur12 * pur12,
                ],
                [
                    P2H.powi(2),
                    2.0 * P1H * P2H * pur13 + P2H.powi(2) * pur12,
                    P2H.powi(2) * pur12 * pur12
                        + P1H.powi(2) * pur13 * pur13
                        + P1H * P2H * 2.0 * pur13 * pur12 * 2.0,
                ],
            ],
        );
    }

    #[test]
    fn test_derivative_moiety() {
        let m = matrix("C2H2P10", "C2", false, vec![0.0, 1.0]);
        let m0 = P1H.powi(2) * P12C.powi(2);
        let m1 = 2.0 * P1H * P2H * P12C.powi(2) + 2.0 * P12C * P13C * P1H.powi(2);
        let m2 = P2H.powi(2) * P12C.powi(2)
            + 2.0 * P12C * P13C * P1H * P2H * 2.0
            + P1H.powi(2) * P13C.powi(2);
        assert_matrix_eq(&m, [[m0, 0.0, 0.0], [m1, m0, 0.0], [m2, m1, m0]]);
    }

    #[test]
    fn test_no_correction_formula_gives_identity() {
        let m = matrix("C2", "", false, vec![0.0, 1.0]);
        assert_eq!(m, DMatrix::identity(3, 3));
    }

    #[test]
    fn test_columns_conserve_probability() {
        let table = Arc::new(fixture_table());
        for (formula, spread) in [("C4H2", 2), ("C6O", 2), ("C5N", 1)] {
            let chemical = LabeledChemical::builder(formula, "13C")
                .isotopes(table.clone())
                .build()
                .unwrap();
            let m = convolution_matrix(&chemical, &mass_distribution_vector(&chemical));
            let n = chemical.tracer_count();
            for j in 0..m.ncols() {
                let total: f64 = m.column(j).iter().sum();
                if j + spread <= n {
                    assert_relative_eq!(total, 1.0, max_relative = 1e-12);
                } else {
                    // heavier shifts fall outside the N + 1 measured isotopologues
                    assert!(total < 1.0);
                }
            }
        }
    }
}
