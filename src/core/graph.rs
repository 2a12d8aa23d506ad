//! Factor and factor graph contracts consumed by the layout and elimination core
//!
//! A factor exposes an ordered sequence of the variable keys it involves; the
//! position of a key in that sequence is the local column-block index of the
//! variable within the factor. A Gaussian factor additionally carries one
//! Jacobian block per key, a right-hand side, and the noise model that whitens
//! its rows.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::linalg::noise_model::SharedNoiseModel;

/// Unique identifier for variables in the factor graph
pub type Key = usize;

/// Errors that can occur when building factors or factor graphs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("factor involves duplicate key {0}")]
    DuplicateKey(Key),

    #[error("factor has {keys} keys but {blocks} jacobian blocks")]
    KeyBlockCountMismatch { keys: usize, blocks: usize },

    #[error("jacobian block {index} has {rows} rows but the right-hand side has {expected}")]
    BlockRowMismatch {
        index: usize,
        rows: usize,
        expected: usize,
    },

    #[error("noise model dimension {model} does not match residual dimension {residual}")]
    NoiseDimensionMismatch { model: usize, residual: usize },
}

/// Minimal iteration contract every factor satisfies
///
/// The returned slice is the factor-defined variable order; index = local
/// column-block index.
pub trait Factor {
    /// Ordered keys of the variables this factor involves
    fn keys(&self) -> &[Key];
}

/// An ordered, read-only collection of factors
#[derive(Debug, Clone, Default)]
pub struct FactorGraph<F: Factor> {
    factors: Vec<F>,
}

impl<F: Factor> FactorGraph<F> {
    /// Creates a new, empty factor graph
    pub fn new() -> Self {
        Self {
            factors: Vec::new(),
        }
    }

    /// Append a factor; insertion order defines the row-block order of a combination
    pub fn add(&mut self, factor: F) {
        self.factors.push(factor);
    }

    /// Number of factors
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// True if the graph holds no factors
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Iterate over factors in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, F> {
        self.factors.iter()
    }

    /// The factors as an ordered slice
    pub fn factors(&self) -> &[F] {
        &self.factors
    }
}

impl<'a, F: Factor> IntoIterator for &'a FactorGraph<F> {
    type Item = &'a F;
    type IntoIter = std::slice::Iter<'a, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.factors.iter()
    }
}

/// A linear (or linearized) factor: `A_1 x_1 + ... + A_k x_k - b`, with one
/// Jacobian block per involved variable and a noise model describing the
/// uncertainty of its rows.
///
/// All blocks share the same row count, equal to the length of the right-hand
/// side and to the noise model dimension. The noise model is shared, immutable
/// state; many factors may reference the same instance.
#[derive(Debug, Clone)]
pub struct GaussianFactor {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
    noise: SharedNoiseModel,
}

impl GaussianFactor {
    /// Build a factor from ordered keys, one Jacobian block per key, a
    /// right-hand side and a noise model.
    ///
    /// Rejects duplicate keys, mismatched block row counts, and a noise model
    /// whose dimension differs from the residual dimension.
    pub fn new(
        keys: Vec<Key>,
        blocks: Vec<DMatrix<f64>>,
        rhs: DVector<f64>,
        noise: SharedNoiseModel,
    ) -> Result<Self, GraphError> {
        if keys.len() != blocks.len() {
            return Err(GraphError::KeyBlockCountMismatch {
                keys: keys.len(),
                blocks: blocks.len(),
            });
        }
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                return Err(GraphError::DuplicateKey(*key));
            }
        }
        let rows = rhs.len();
        for (index, block) in blocks.iter().enumerate() {
            if block.nrows() != rows {
                return Err(GraphError::BlockRowMismatch {
                    index,
                    rows: block.nrows(),
                    expected: rows,
                });
            }
        }
        if noise.dim() != rows {
            return Err(GraphError::NoiseDimensionMismatch {
                model: noise.dim(),
                residual: rows,
            });
        }
        Ok(Self {
            keys,
            blocks,
            rhs,
            noise,
        })
    }

    /// Number of rows of this factor
    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    /// Column count of the Jacobian block in local slot `slot`
    pub fn dim(&self, slot: usize) -> usize {
        self.blocks[slot].ncols()
    }

    /// Jacobian block in local slot `slot`
    pub fn jacobian(&self, slot: usize) -> &DMatrix<f64> {
        &self.blocks[slot]
    }

    /// All Jacobian blocks, in key order
    pub fn jacobians(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    /// Right-hand side of the factor
    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    /// The noise model whitening this factor's rows
    pub fn noise_model(&self) -> &SharedNoiseModel {
        &self.noise
    }
}

impl Factor for GaussianFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::noise_model::NoiseModel;
    use nalgebra::{dmatrix, dvector};
    use std::sync::Arc;

    fn unit2() -> SharedNoiseModel {
        Arc::new(NoiseModel::unit(2))
    }

    #[test]
    fn test_gaussian_factor_valid() {
        let factor = GaussianFactor::new(
            vec![0, 1],
            vec![dmatrix![1.0, 0.0; 0.0, 1.0], dmatrix![2.0; 3.0]],
            dvector![1.0, 2.0],
            unit2(),
        )
        .unwrap();

        assert_eq!(factor.keys(), &[0, 1]);
        assert_eq!(factor.rows(), 2);
        assert_eq!(factor.dim(0), 2);
        assert_eq!(factor.dim(1), 1);
    }

    #[test]
    fn test_gaussian_factor_duplicate_key() {
        let result = GaussianFactor::new(
            vec![4, 4],
            vec![dmatrix![1.0; 1.0], dmatrix![2.0; 2.0]],
            dvector![0.0, 0.0],
            unit2(),
        );
        assert_eq!(result.unwrap_err(), GraphError::DuplicateKey(4));
    }

    #[test]
    fn test_gaussian_factor_block_row_mismatch() {
        let result = GaussianFactor::new(
            vec![0],
            vec![dmatrix![1.0, 0.0]],
            dvector![1.0, 2.0],
            unit2(),
        );
        assert!(matches!(
            result.unwrap_err(),
            GraphError::BlockRowMismatch {
                index: 0,
                rows: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn test_gaussian_factor_noise_dim_mismatch() {
        let result = GaussianFactor::new(
            vec![0],
            vec![dmatrix![1.0; 1.0; 1.0]],
            dvector![0.0, 0.0, 0.0],
            unit2(),
        );
        assert!(matches!(
            result.unwrap_err(),
            GraphError::NoiseDimensionMismatch {
                model: 2,
                residual: 3
            }
        ));
    }

    #[test]
    fn test_factor_graph_iteration_order() {
        struct KeysOnly(Vec<Key>);
        impl Factor for KeysOnly {
            fn keys(&self) -> &[Key] {
                &self.0
            }
        }

        let mut graph = FactorGraph::new();
        graph.add(KeysOnly(vec![1, 3]));
        graph.add(KeysOnly(vec![2]));

        assert_eq!(graph.len(), 2);
        assert!(!graph.is_empty());
        let key_lists: Vec<_> = graph.iter().map(|f| f.keys().to_vec()).collect();
        assert_eq!(key_lists, vec![vec![1, 3], vec![2]]);
    }
}
