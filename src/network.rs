//! Liability Network Construction
//!
//! Turns a cash vector and a liability vector into the matrix one cascade
//! trial runs on.
//!
//! ## Pipeline
//! 1. Cash -> connectivity scores (truncated natural log)
//! 2. Connectivity -> pairwise connection strengths
//! 3. Strengths -> directed 0/1 adjacency (seeded Bernoulli draws)
//! 4. Adjacency + liabilities -> per-edge liabilities, cash on the diagonal
//!
//! ## Convention
//! Row `i` is the debtor and column `j` the creditor: entry `[i][j]` is what
//! institution `i` owes institution `j`. The cascade engine reads the matrix
//! the same way.

use rand::Rng;

use crate::error::{ContagionError, Result};

/// Lower clamp applied before taking the log of cash.
pub const LOG_EPSILON: f64 = 1e-12;

/// Dense row-major `n x n` matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct SquareMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SquareMatrix {
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        let mut m = Self::zeros(n);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(ContagionError::DimensionMismatch { expected: n, actual: row.len() });
            }
            m.data[i * n..(i + 1) * n].copy_from_slice(row);
        }
        Ok(m)
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] = value;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// Sum of row `i` excluding the diagonal.
    pub fn off_diagonal_row_sum(&self, i: usize) -> f64 {
        self.row(i)
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, v)| v)
            .sum()
    }
}

/// Log-compresses cash into an integer connectivity score per institution.
///
/// Cash is clamped to [`LOG_EPSILON`] first, so the result is defined for
/// every input; the log is truncated toward zero, not rounded.
pub fn cash_to_connectivity(cash: &[f64]) -> Vec<i64> {
    cash.iter()
        .map(|&c| c.max(LOG_EPSILON).ln().trunc() as i64)
        .collect()
}

/// Pairwise connection strength: the pair's combined non-negative connectivity.
/// The diagonal is always zero.
pub fn make_connections(connectivity: &[i64]) -> SquareMatrix {
    let n = connectivity.len();
    let mut strength = SquareMatrix::zeros(n);
    for i in 0..n {
        let ci = connectivity[i].max(0) as f64;
        for j in 0..n {
            if i != j {
                let cj = connectivity[j].max(0) as f64;
                strength.set(i, j, ci + cj);
            }
        }
    }
    strength
}

/// Binarizes connection strengths into a directed adjacency matrix.
///
/// Strengths are normalized by the strongest off-diagonal pair and each entry
/// becomes an edge with that probability. A matrix with no positive strength
/// yields no edges.
pub fn binarize_probabilities(strength: &SquareMatrix, rng: &mut impl Rng) -> SquareMatrix {
    let n = strength.size();
    let mut adjacency = SquareMatrix::zeros(n);

    let max = (0..n)
        .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
        .map(|(i, j)| strength.get(i, j))
        .fold(0.0_f64, f64::max);
    if max <= 0.0 || !max.is_finite() {
        return adjacency;
    }

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let p = (strength.get(i, j) / max).clamp(0.0, 1.0);
            if p > 0.0 && rng.gen::<f64>() < p {
                adjacency.set(i, j, 1.0);
            }
        }
    }
    adjacency
}

/// Splits each institution's liabilities equally across its out-edges.
///
/// Institutions without out-edges keep their liabilities off the network.
/// The diagonal is left at zero; see [`NetworkMatrix::assemble`].
pub fn distribute_liabilities(adjacency: &SquareMatrix, liabilities: &[f64]) -> Result<SquareMatrix> {
    let n = adjacency.size();
    if liabilities.len() != n {
        return Err(ContagionError::DimensionMismatch { expected: n, actual: liabilities.len() });
    }

    let mut out = SquareMatrix::zeros(n);
    for (i, &total) in liabilities.iter().enumerate() {
        let edges: Vec<usize> = (0..n).filter(|&j| j != i && adjacency.get(i, j) > 0.0).collect();
        if edges.is_empty() {
            continue;
        }
        let share = total / edges.len() as f64;
        for j in edges {
            out.set(i, j, share);
        }
    }
    Ok(out)
}

/// Liabilities off the diagonal, capital on it.
///
/// Read-only once assembled; cascade trials share it and keep their own
/// scratch state.
#[derive(Clone, Debug)]
pub struct NetworkMatrix {
    matrix: SquareMatrix,
    /// `creditors[i]`: `(j, amount)` for every `j` that `i` owes.
    creditors: Vec<Vec<(usize, f64)>>,
    /// `debtors[j]`: `(i, amount)` for every `i` that owes `j`.
    debtors: Vec<Vec<(usize, f64)>>,
    owed: Vec<f64>,
}

impl NetworkMatrix {
    /// Writes `capital` onto the diagonal of the liability matrix.
    pub fn assemble(mut liabilities: SquareMatrix, capital: &[f64]) -> Result<Self> {
        let n = liabilities.size();
        if capital.len() != n {
            return Err(ContagionError::DimensionMismatch { expected: n, actual: capital.len() });
        }
        for (i, &c) in capital.iter().enumerate() {
            liabilities.set(i, i, c);
        }

        let mut creditors = vec![Vec::new(); n];
        let mut debtors = vec![Vec::new(); n];
        for i in 0..n {
            for j in 0..n {
                let amount = liabilities.get(i, j);
                if i != j && amount != 0.0 {
                    creditors[i].push((j, amount));
                    debtors[j].push((i, amount));
                }
            }
        }
        let owed = (0..n).map(|i| liabilities.off_diagonal_row_sum(i)).collect();

        Ok(Self { matrix: liabilities, creditors, debtors, owed })
    }

    pub fn size(&self) -> usize {
        self.matrix.size()
    }

    pub fn capital(&self, i: usize) -> f64 {
        self.matrix.get(i, i)
    }

    pub fn liability(&self, debtor: usize, creditor: usize) -> f64 {
        self.matrix.get(debtor, creditor)
    }

    /// Total interbank liabilities owed by `i`.
    pub fn owed_by(&self, i: usize) -> f64 {
        self.owed[i]
    }

    pub fn creditors_of(&self, i: usize) -> &[(usize, f64)] {
        &self.creditors[i]
    }

    pub fn debtors_of(&self, j: usize) -> &[(usize, f64)] {
        &self.debtors[j]
    }

    pub fn matrix(&self) -> &SquareMatrix {
        &self.matrix
    }

    pub fn stats(&self) -> NetworkStats {
        let n = self.size();
        let edges: usize = self.creditors.iter().map(Vec::len).sum();
        let isolated = (0..n)
            .filter(|&i| self.creditors[i].is_empty() && self.debtors[i].is_empty())
            .count();
        NetworkStats {
            institutions: n,
            edges,
            mean_out_degree: if n > 0 { edges as f64 / n as f64 } else { 0.0 },
            isolated,
            total_liabilities: self.owed.iter().sum(),
            total_capital: (0..n).map(|i| self.capital(i)).sum(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NetworkStats {
    pub institutions: usize,
    pub edges: usize,
    pub mean_out_degree: f64,
    pub isolated: usize,
    pub total_liabilities: f64,
    pub total_capital: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_connectivity_truncates_log() {
        let connectivity = cash_to_connectivity(&[1.0, 2.0, 3.0, 100.0, 0.0, -5.0]);
        assert_eq!(connectivity[0], 0);
        assert_eq!(connectivity[1], 0); // ln 2 = 0.69
        assert_eq!(connectivity[2], 1); // ln 3 = 1.09
        assert_eq!(connectivity[3], 4); // ln 100 = 4.6
        assert_eq!(connectivity[4], -27); // ln 1e-12 = -27.6
        assert_eq!(connectivity[5], -27);
    }

    #[test]
    fn test_zero_connectivity_yields_no_edges() {
        let strength = make_connections(&[0, 0, 0, 0]);
        let adjacency = binarize_probabilities(&strength, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(adjacency, SquareMatrix::zeros(4));
    }

    #[test]
    fn test_negative_connectivity_yields_no_edges() {
        let strength = make_connections(&[-23, -23, -5]);
        let adjacency = binarize_probabilities(&strength, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(adjacency, SquareMatrix::zeros(3));
    }

    #[test]
    fn test_binarize_is_seeded() {
        let strength = make_connections(&[1, 3, 0, 2, 5, 1]);
        let a = binarize_probabilities(&strength, &mut ChaCha8Rng::seed_from_u64(9));
        let b = binarize_probabilities(&strength, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_strongest_pair_always_connects() {
        let strength = make_connections(&[0, 0, 6, 6]);
        let adjacency = binarize_probabilities(&strength, &mut ChaCha8Rng::seed_from_u64(2));
        assert_eq!(adjacency.get(2, 3), 1.0);
        assert_eq!(adjacency.get(3, 2), 1.0);
        assert_eq!(adjacency.get(0, 1), 0.0);
    }

    #[test]
    fn test_density_scales_with_connectivity() {
        // Institution 0 is far better connected than the rest.
        let mut connectivity = vec![1_i64; 40];
        connectivity[0] = 8;
        let strength = make_connections(&connectivity);
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let mut hub_degree = 0.0;
        let mut leaf_degree = 0.0;
        for _ in 0..50 {
            let adjacency = binarize_probabilities(&strength, &mut rng);
            hub_degree += adjacency.row(0).iter().sum::<f64>();
            leaf_degree += adjacency.row(1).iter().sum::<f64>();
        }
        assert!(hub_degree > 2.0 * leaf_degree);
    }

    #[test]
    fn test_distribute_equal_split() {
        let adjacency = SquareMatrix::from_rows(&[
            vec![0.0, 1.0, 1.0],
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
        ])
        .unwrap();
        let out = distribute_liabilities(&adjacency, &[150.0, 40.0, 30.0]).unwrap();
        assert_eq!(out.row(0), &[0.0, 75.0, 75.0]);
        assert_eq!(out.row(1), &[0.0, 0.0, 0.0]);
        assert_eq!(out.row(2), &[30.0, 0.0, 0.0]);
    }

    #[test]
    fn test_distribute_rejects_wrong_length() {
        let adjacency = SquareMatrix::zeros(3);
        assert!(matches!(
            distribute_liabilities(&adjacency, &[1.0, 2.0]),
            Err(ContagionError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_assemble_writes_capital_and_indexes_edges() {
        let adjacency = SquareMatrix::from_rows(&[
            vec![0.0, 1.0, 1.0],
            vec![0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0],
        ])
        .unwrap();
        let liabilities = distribute_liabilities(&adjacency, &[150.0, 0.0, 0.0]).unwrap();
        let network = NetworkMatrix::assemble(liabilities, &[100.0, 100.0, 100.0]).unwrap();

        assert_eq!(network.capital(0), 100.0);
        assert_eq!(network.liability(0, 1), 75.0);
        assert_eq!(network.owed_by(0), 150.0);
        assert_eq!(network.creditors_of(0), &[(1, 75.0), (2, 75.0)]);
        assert_eq!(network.debtors_of(2), &[(0, 75.0)]);

        let stats = network.stats();
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.isolated, 0);
        assert!((stats.total_capital - 300.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_connectivity_total(cash in prop::collection::vec(1e-300_f64..1e300, 1..64)) {
            let connectivity = cash_to_connectivity(&cash);
            prop_assert_eq!(connectivity.len(), cash.len());
            for c in connectivity {
                prop_assert!((-700..=700).contains(&c));
            }
        }

        #[test]
        fn prop_adjacency_diagonal_is_zero(
            connectivity in prop::collection::vec(-30_i64..30, 1..24),
            seed in any::<u64>(),
        ) {
            let strength = make_connections(&connectivity);
            let adjacency = binarize_probabilities(&strength, &mut ChaCha8Rng::seed_from_u64(seed));
            for i in 0..connectivity.len() {
                prop_assert_eq!(strength.get(i, i), 0.0);
                prop_assert_eq!(adjacency.get(i, i), 0.0);
                for j in 0..connectivity.len() {
                    let v = adjacency.get(i, j);
                    prop_assert!(v == 0.0 || v == 1.0);
                }
            }
        }

        #[test]
        fn prop_distributed_rows_sum_to_liability(
            edges in prop::collection::vec(any::<bool>(), 64),
            liabilities in prop::collection::vec(0.0_f64..1e6, 8),
        ) {
            let n = 8;
            let mut adjacency = SquareMatrix::zeros(n);
            for i in 0..n {
                for j in 0..n {
                    if i != j && edges[i * n + j] {
                        adjacency.set(i, j, 1.0);
                    }
                }
            }
            let out = distribute_liabilities(&adjacency, &liabilities).unwrap();
            for i in 0..n {
                let degree = adjacency.row(i).iter().filter(|&&v| v > 0.0).count();
                let sum = out.off_diagonal_row_sum(i);
                if degree > 0 {
                    prop_assert!((sum - liabilities[i]).abs() <= 1e-9 * liabilities[i].max(1.0));
                } else {
                    prop_assert_eq!(sum, 0.0);
                }
                prop_assert_eq!(out.get(i, i), 0.0);
            }
        }
    }
}
