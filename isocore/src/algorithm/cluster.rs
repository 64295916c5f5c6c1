//! High-resolution isotopic cluster engine.
//!
//! An isotopic cluster maps every exact mass reachable by the natural isotopes
//! of a set of atoms to its probability. Clusters are built element by element
//! ("blocks"), combined by cartesian product, then pooled around the masses
//! expected for each tracer isotopologue, given the resolving power of the
//! instrument.

use std::collections::BTreeMap;

use itertools::Itertools;
use nalgebra::DMatrix;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use statrs::function::factorial::multinomial;
use tracing::debug;

use crate::algorithm::convolution::convolve_pow;
use crate::chemistry::labeled::LabeledChemical;
use crate::error::Result;

/// exact mass to probability
pub type IsotopicCluster = BTreeMap<Decimal, f64>;

/// block of an element with a single isotope
pub fn block_1(mass: Decimal, n_atoms: u32) -> IsotopicCluster {
    IsotopicCluster::from([(mass * Decimal::from(n_atoms), 1.0)])
}

/// block of an element with two isotopes, binomial distribution of the heavy isotope
pub fn block_2(masses: &[Decimal], abundances: &[f64], n_atoms: u32) -> IsotopicCluster {
    let distribution = convolve_pow(&[1.0], abundances, n_atoms as usize);
    (0..=n_atoms)
        .map(|i| {
            let mass = masses[0] * Decimal::from(n_atoms - i) + masses[1] * Decimal::from(i);
            (mass, distribution[i as usize])
        })
        .collect()
}

/// block of an element with any number of isotopes
///
/// Every multiset of `n_atoms` isotopes is visited once (combinations with
/// replacement) and weighted by its number of distinct permutations, so the
/// enumeration never materializes the individual isotopomers.
///
/// Arguments:
///
/// * `masses` - isotope masses
/// * `abundances` - isotope probabilities, same length as `masses`
/// * `n_atoms` - number of atoms of the element
///
/// Returns:
///
/// * `IsotopicCluster` - mass and probability of each isotope multiset
///
/// # Examples
///
/// ```
/// use isocore::algorithm::cluster::block_n;
/// use rust_decimal_macros::dec;
///
/// let block = block_n(&[dec!(1.0), dec!(2.0), dec!(3.0)], &[0.5, 0.3, 0.2], 2);
/// assert_eq!(block.len(), 5);
/// assert!((block[&dec!(4.0)] - (0.3 * 0.3 + 2.0 * 0.5 * 0.2)).abs() < 1e-15);
/// ```
pub fn block_n(masses: &[Decimal], abundances: &[f64], n_atoms: u32) -> IsotopicCluster {
    let mut block = IsotopicCluster::new();
    for combination in (0..masses.len()).combinations_with_replacement(n_atoms as usize) {
        let mut counts = vec![0u64; masses.len()];
        for &isotope in &combination {
            counts[isotope] += 1;
        }
        let mass: Decimal = combination.iter().map(|&isotope| masses[isotope]).sum();
        let probability = multinomial(n_atoms as u64, &counts)
            * combination.iter().map(|&isotope| abundances[isotope]).product::<f64>();
        *block.entry(mass).or_insert(0.0) += probability;
    }
    block
}

fn prune(cluster: IsotopicCluster, threshold: Option<f64>) -> IsotopicCluster {
    match threshold {
        Some(threshold) => cluster.into_iter().filter(|(_, p)| *p > threshold).collect(),
        None => cluster,
    }
}

/// isotopic blocks of every element of the correction formula
///
/// Blocks at or below `threshold` are dropped; combining blocks only multiplies
/// probabilities, so a dropped block could never rise above it again.
pub fn isotopic_blocks(
    chemical: &LabeledChemical,
    threshold: Option<f64>,
) -> Result<Vec<IsotopicCluster>> {
    chemical
        .correction_formula()
        .iter()
        .map(|(element, n_atoms)| {
            let isotopes = chemical.isotopes().element(element)?;
            let block = match isotopes.len() {
                1 => block_1(isotopes.reference_mass(), n_atoms),
                2 => block_2(&isotopes.mass, &isotopes.abundance, n_atoms),
                _ => block_n(&isotopes.mass, &isotopes.abundance, n_atoms),
            };
            Ok(prune(block, threshold))
        })
        .collect()
}

/// combine blocks into a single cluster, summing identical masses
///
/// Returns `None` when there is nothing to combine.
pub fn combine_blocks(
    blocks: impl IntoIterator<Item = IsotopicCluster>,
    threshold: Option<f64>,
) -> Option<IsotopicCluster> {
    let combined = blocks.into_iter().reduce(|acc, block| {
        let mut product = IsotopicCluster::new();
        for ((mass_a, p_a), (mass_b, p_b)) in acc.iter().cartesian_product(block.iter()) {
            *product.entry(*mass_a + *mass_b).or_insert(0.0) += p_a * p_b;
        }
        product
    })?;
    Some(prune(combined, threshold))
}

/// isotopic cluster of the correction formula, `None` if it holds no atom
pub fn isotopic_cluster(
    chemical: &LabeledChemical,
    threshold: Option<f64>,
) -> Result<Option<IsotopicCluster>> {
    if chemical.correction_formula().is_empty() {
        return Ok(None);
    }
    let blocks = isotopic_blocks(chemical, threshold)?;
    Ok(combine_blocks(blocks, threshold))
}

/// masses from `mz_min` to `mz_max` spaced by the tracer mass shift
///
/// A single peak is returned when both bounds are equal.
pub fn tracershifted_peaks_between(mz_min: Decimal, mz_max: Decimal, mzshift: Decimal) -> Vec<Decimal> {
    let n_peaks = ((mz_max - mz_min) / mzshift)
        .floor()
        .to_usize()
        .unwrap_or(0)
        + 1;
    (0..n_peaks).map(|n| mz_min + mzshift * Decimal::from(n)).collect()
}

/// pool the unresolved peaks of a cluster around each target mass
///
/// Targets are processed in ascending order; a target without any peak within
/// `correction_limit` gets 0.0. A negative limit pools exact matches only.
///
/// Arguments:
///
/// * `cluster` - isotopic cluster
/// * `targets` - masses around which peaks are pooled
/// * `correction_limit` - half-width of the pooling window, in Da
///
/// Returns:
///
/// * `Vec<f64>` - pooled probability per target, sorted by target mass
///
pub fn peaks_around(cluster: &IsotopicCluster, targets: &[Decimal], correction_limit: f64) -> Vec<f64> {
    let limit = Decimal::from_f64(correction_limit.max(0.0)).unwrap_or(Decimal::ZERO);
    targets
        .iter()
        .sorted()
        .map(|&target| {
            cluster
                .range(target - limit..=target + limit)
                .map(|(_, p)| p)
                .sum::<f64>()
        })
        .collect()
}

/// high-resolution mass distribution vector of the atoms corrected at natural abundance
///
/// The isotopic cluster is pooled around the masses reachable by successive
/// tracer mass shifts from the lightest isotope combination, so natural
/// isotopes resolved from the tracer isotopologues no longer contribute.
pub fn mass_distribution_vector(
    chemical: &LabeledChemical,
    correction_limit: f64,
    threshold: Option<f64>,
) -> Result<Vec<f64>> {
    let cluster = match isotopic_cluster(chemical, threshold)? {
        Some(cluster) => cluster,
        None => return Ok(vec![1.0]),
    };

    // lightest isotopes come first in the table, their sum is the cluster minimum
    let mut minimum_mass = Decimal::ZERO;
    for (element, count) in chemical.correction_formula().iter() {
        minimum_mass += chemical.isotopes().element(element)?.reference_mass() * Decimal::from(count);
    }
    let maximum_mass = cluster.keys().next_back().copied().unwrap_or(minimum_mass);

    let targets = tracershifted_peaks_between(minimum_mass, maximum_mass, chemical.mzshift_tracer());
    let result = peaks_around(&cluster, &targets, correction_limit);
    debug!(
        "Done computing mass distribution vector for non-tracer elements of {} (high-resolution method): {:?}",
        chemical.label(),
        result
    );
    Ok(result)
}

/// build the correction matrix column by column from isotopic clusters
///
/// Column `j` combines the non-tracer cluster with a purity block of `j`
/// tracer atoms and a block for the `N - j` remaining tracer atoms (natural
/// abundance if enabled, lightest isotope otherwise), then pools it around the
/// N + 1 tracer isotopologue masses.
///
/// Arguments:
///
/// * `chemical` - the labeled chemical
/// * `correction_limit` - instrument correction limit, in Da
/// * `threshold` - probability pruning threshold
///
/// Returns:
///
/// * `Result<DMatrix<f64>>` - (N+1)x(N+1) correction matrix
///
pub fn combination_matrix(
    chemical: &LabeledChemical,
    correction_limit: f64,
    threshold: Option<f64>,
) -> Result<DMatrix<f64>> {
    let n_tracers = chemical.tracer_count() as u32;
    let n_isotopologues = chemical.isotopologue_count();
    let tracer = chemical.tracer_isotopes();
    let cluster_notracer = isotopic_cluster(chemical, threshold)?;

    let main_peaks: Vec<Decimal> = (0..n_isotopologues)
        .map(|n| chemical.molecular_weight() + chemical.mzshift_tracer() * Decimal::from(n))
        .collect();

    let mut correction_matrix = DMatrix::zeros(n_isotopologues, n_isotopologues);
    for n_traced in 0..=n_tracers {
        let mut blocks = Vec::with_capacity(3);
        if let Some(cluster) = &cluster_notracer {
            blocks.push(cluster.clone());
        }
        if n_traced > 0 {
            blocks.push(block_n(&tracer.mass, chemical.tracer_purity(), n_traced));
        }
        let n_unlabeled = n_tracers - n_traced;
        if n_unlabeled > 0 {
            if chemical.correct_na_tracer() {
                blocks.push(block_n(&tracer.mass, &tracer.abundance, n_unlabeled));
            } else {
                blocks.push(block_1(tracer.reference_mass(), n_unlabeled));
            }
        }

        if let Some(cluster) = combine_blocks(blocks, threshold) {
            let column = peaks_around(&cluster, &main_peaks, correction_limit);
            for (i, value) in column.into_iter().enumerate() {
                correction_matrix[(i, n_traced as usize)] = value;
            }
        }
    }

    debug!(
        "Done computing correction matrix (isotopic-cluster method) for {}: {}",
        chemical.label(),
        correction_matrix
    );
    Ok(correction_matrix)
}
