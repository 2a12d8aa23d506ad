//! Combined-factor assembly and dense elimination
//!
//! The elimination of a clique proceeds in three steps: the column layout of
//! the union of involved variables is computed ([`VariableSlots`] +
//! [`Scatter`]), each component factor's rows are whitened by its own noise
//! model and scattered into the stacked augmented system, and the stacked
//! system is reduced in place by the combined model's QR. The leading rows of
//! the result describe the eliminated variables conditioned on the separator;
//! the remaining rows form a new, reduced factor.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::core::graph::{GaussianFactor, Key};
use crate::core::variable_slots::VariableSlots;
use crate::error::{SolverError, SolverResult};
use crate::linalg::noise_model::{Constrained, Diagonal, NoiseModel, SharedNoiseModel};
use crate::linalg::scatter::{Scatter, SlotEntry};
use crate::linalg::LinAlgError;

/// The rows `[R | S | d]` produced for the eliminated (frontal) variables,
/// conditioned on the separator, together with their noise model.
#[derive(Debug, Clone)]
pub struct GaussianConditional {
    keys: Vec<Key>,
    dims: Vec<usize>,
    nr_frontals: usize,
    rsd: DMatrix<f64>,
    noise: SharedNoiseModel,
}

impl GaussianConditional {
    /// All keys, frontal variables first, then the separator in layout order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// The eliminated variables
    pub fn frontal_keys(&self) -> &[Key] {
        &self.keys[..self.nr_frontals]
    }

    /// The conditioning variables
    pub fn separator_keys(&self) -> &[Key] {
        &self.keys[self.nr_frontals..]
    }

    /// Number of frontal variables
    pub fn nr_frontals(&self) -> usize {
        self.nr_frontals
    }

    /// Number of produced rows
    pub fn rows(&self) -> usize {
        self.rsd.nrows()
    }

    /// The stacked `[R | S | d]` rows
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.rsd
    }

    /// Noise model of the produced rows
    pub fn noise_model(&self) -> &SharedNoiseModel {
        &self.noise
    }

    /// Back-substitute the frontal variables given stacked separator values:
    /// `x_f = R⁻¹·(d - S·x_s)`.
    ///
    /// Requires a full-rank elimination (as many rows as frontal dimensions).
    pub fn solve(&self, separator: &DVector<f64>) -> Result<DVector<f64>, LinAlgError> {
        let front_dim: usize = self.dims[..self.nr_frontals].iter().sum();
        let sep_dim: usize = self.dims[self.nr_frontals..].iter().sum();
        if self.rsd.nrows() != front_dim {
            return Err(LinAlgError::Singular);
        }
        if separator.len() != sep_dim {
            return Err(LinAlgError::DimensionMismatch {
                expected: sep_dim,
                actual: separator.len(),
            });
        }

        let r = self.rsd.view((0, 0), (front_dim, front_dim));
        let s = self.rsd.view((0, front_dim), (front_dim, sep_dim));
        let d = self.rsd.column(self.rsd.ncols() - 1).into_owned();
        let rhs = d - s * separator;
        r.solve_upper_triangular(&rhs).ok_or(LinAlgError::Singular)
    }
}

/// Assemble several Gaussian factors into one combined factor.
///
/// Columns follow the ascending-key union layout; each component's whitened
/// Jacobian blocks land in the destination columns given by the factors'
/// [`VariableSlots`]. The combined noise model is unit, except that hard rows
/// of constrained components keep their zero sigma.
pub fn combine(factors: &[GaussianFactor]) -> SolverResult<GaussianFactor> {
    let slots = VariableSlots::from_factors(factors);
    let scatter = Scatter::from_factors(factors)?;
    let (ab, model) = assemble(factors, &slots, &scatter)?;
    factor_from_rows(&ab, &scatter, 0, 0, ab.nrows(), Arc::new(model))
}

/// Eliminate the `front` variables from a set of factors.
///
/// Combines the factors with the front keys laid out first, reduces the
/// augmented system in place with the combined model's QR, and splits the
/// result: the leading rows form the conditional on the front variables, the
/// remaining rows a reduced factor on the separator. A rank-deficient system
/// simply produces fewer rows.
pub fn eliminate(
    factors: &[GaussianFactor],
    front: &[Key],
) -> SolverResult<(GaussianConditional, GaussianFactor)> {
    if front.is_empty() {
        return Err(SolverError::InvalidInput(
            "front keys must not be empty".to_string(),
        ));
    }

    let scatter = Scatter::from_factors_ordered(factors, front)?;
    for (i, &key) in front.iter().enumerate() {
        let matches = scatter.get(i).map(|entry| entry.key == key);
        if matches != Some(true) {
            return Err(SolverError::InvalidInput(format!(
                "front key {key} must be a distinct variable of some factor"
            )));
        }
    }

    let slots = VariableSlots::from_factors(factors);
    let (mut ab, model) = assemble(factors, &slots, &scatter)?;

    tracing::debug!(
        front = front.len(),
        variables = scatter.len(),
        rows = ab.nrows(),
        "eliminating combined system"
    );
    let out_model = model.qr(&mut ab)?;
    let produced = out_model.dim();

    let front_dim: usize = scatter
        .iter()
        .take(front.len())
        .map(|entry| entry.dimension)
        .sum();
    let frontal_rows = produced.min(front_dim);

    let conditional = GaussianConditional {
        keys: scatter.iter().map(|entry| entry.key).collect(),
        dims: scatter.iter().map(|entry| entry.dimension).collect(),
        nr_frontals: front.len(),
        rsd: ab.rows(0, frontal_rows).into_owned(),
        noise: Arc::new(sub_model(&out_model, 0, frontal_rows)?),
    };

    let remaining_rows = produced - frontal_rows;
    let reduced = factor_from_rows(
        &ab,
        &scatter[front.len()..],
        front_dim,
        frontal_rows,
        remaining_rows,
        Arc::new(sub_model(&out_model, frontal_rows, remaining_rows)?),
    )?;

    Ok((conditional, reduced))
}

/// Stack the whitened component systems into one augmented matrix `[A | b]`
/// laid out by `scatter`, and derive the combined noise model.
fn assemble(
    factors: &[GaussianFactor],
    slots: &VariableSlots,
    scatter: &Scatter,
) -> SolverResult<(DMatrix<f64>, NoiseModel)> {
    let mut col_offsets: HashMap<Key, usize> = HashMap::with_capacity(scatter.len());
    let mut offset = 0;
    for entry in scatter.iter() {
        col_offsets.insert(entry.key, offset);
        offset += entry.dimension;
    }
    let total_cols = offset;

    let mut row_offsets = Vec::with_capacity(factors.len());
    let mut total_rows = 0;
    for factor in factors {
        row_offsets.push(total_rows);
        total_rows += factor.rows();
    }

    // Whiten every component once, blocks and right-hand side together.
    let mut whitened: Vec<(Vec<DMatrix<f64>>, DVector<f64>)> = Vec::with_capacity(factors.len());
    for factor in factors {
        let mut blocks = factor.jacobians().to_vec();
        let mut rhs = factor.rhs().clone();
        factor.noise_model().whiten_system(&mut blocks, &mut rhs)?;
        whitened.push((blocks, rhs));
    }

    let mut ab = DMatrix::zeros(total_rows, total_cols + 1);

    // Scatter each component's blocks into the destination columns.
    for (key, factor_slots) in slots.iter() {
        let col = col_offsets[&key];
        for (fi, slot) in factor_slots.iter().enumerate() {
            if let Some(s) = slot {
                let block = &whitened[fi].0[*s];
                ab.view_mut((row_offsets[fi], col), (block.nrows(), block.ncols()))
                    .copy_from(block);
            }
        }
    }
    for (fi, (_, rhs)) in whitened.iter().enumerate() {
        ab.view_mut((row_offsets[fi], total_cols), (rhs.len(), 1))
            .copy_from(rhs);
    }

    // Unconstrained rows are whitened to unit scale by now; hard rows of
    // constrained components keep their zero sigma in the combined model.
    let mut sigmas = DVector::repeat(total_rows, 1.0);
    let mut any_hard = false;
    for (fi, factor) in factors.iter().enumerate() {
        if let NoiseModel::Constrained(c) = factor.noise_model().as_ref() {
            for i in 0..c.dim() {
                if c.constrained(i) {
                    sigmas[row_offsets[fi] + i] = 0.0;
                    any_hard = true;
                }
            }
        }
    }
    let model = if any_hard {
        Constrained::mixed_sigmas(sigmas)?
    } else {
        NoiseModel::unit(total_rows)
    };

    Ok((ab, model))
}

/// Slice a row range of an assembled system back into a factor over the given
/// layout entries, whose columns start at `col_start`.
fn factor_from_rows(
    ab: &DMatrix<f64>,
    entries: &[SlotEntry],
    col_start: usize,
    row_start: usize,
    rows: usize,
    noise: SharedNoiseModel,
) -> SolverResult<GaussianFactor> {
    let mut keys = Vec::with_capacity(entries.len());
    let mut blocks = Vec::with_capacity(entries.len());
    let mut col = col_start;
    for entry in entries {
        keys.push(entry.key);
        blocks.push(ab.view((row_start, col), (rows, entry.dimension)).into_owned());
        col += entry.dimension;
    }
    let rhs = ab
        .column(ab.ncols() - 1)
        .rows(row_start, rows)
        .into_owned();
    GaussianFactor::new(keys, blocks, rhs, noise).map_err(SolverError::from)
}

/// Noise model of a row range of an elimination result
fn sub_model(model: &NoiseModel, start: usize, len: usize) -> Result<NoiseModel, LinAlgError> {
    if len == 0 {
        return Ok(NoiseModel::unit(0));
    }
    if model.is_unit() {
        return Ok(NoiseModel::unit(len));
    }
    let sigmas = model.sigmas()?.rows(start, len).into_owned();
    if sigmas.iter().any(|&s| s == 0.0) {
        Constrained::mixed_sigmas(sigmas)
    } else if sigmas.iter().all(|&s| s == 1.0) {
        Ok(NoiseModel::unit(len))
    } else {
        Diagonal::from_sigmas(sigmas, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Factor;
    use crate::linalg::noise_model::Isotropic;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    fn shared(model: NoiseModel) -> SharedNoiseModel {
        Arc::new(model)
    }

    #[test]
    fn test_combine_places_blocks_by_slots() {
        let f0 = GaussianFactor::new(
            vec![2],
            vec![dmatrix![2.0]],
            dvector![4.0],
            shared(NoiseModel::unit(1)),
        )
        .unwrap();
        let f1 = GaussianFactor::new(
            vec![0, 2],
            vec![dmatrix![1.0], dmatrix![3.0]],
            dvector![5.0],
            shared(NoiseModel::unit(1)),
        )
        .unwrap();

        let combined = combine(&[f0, f1]).unwrap();

        // Ascending key layout: columns [0 | 2], rows [f0; f1].
        assert_eq!(combined.keys(), &[0, 2]);
        assert_relative_eq!(combined.jacobian(0), &dmatrix![0.0; 1.0], epsilon = 1e-12);
        assert_relative_eq!(combined.jacobian(1), &dmatrix![2.0; 3.0], epsilon = 1e-12);
        assert_relative_eq!(combined.rhs(), &dvector![4.0, 5.0], epsilon = 1e-12);
        assert!(combined.noise_model().is_unit());
    }

    #[test]
    fn test_combine_whitens_components() {
        let f = GaussianFactor::new(
            vec![7],
            vec![dmatrix![1.0]],
            dvector![3.0],
            shared(Isotropic::from_sigma(1, 0.5, true).unwrap()),
        )
        .unwrap();

        let combined = combine(&[f]).unwrap();
        assert_relative_eq!(combined.jacobian(0), &dmatrix![2.0], epsilon = 1e-12);
        assert_relative_eq!(combined.rhs(), &dvector![6.0], epsilon = 1e-12);
        assert!(combined.noise_model().is_unit());
    }

    #[test]
    fn test_combine_keeps_hard_rows() {
        let soft = GaussianFactor::new(
            vec![1],
            vec![dmatrix![1.0]],
            dvector![2.0],
            shared(NoiseModel::unit(1)),
        )
        .unwrap();
        let hard = GaussianFactor::new(
            vec![1],
            vec![dmatrix![4.0]],
            dvector![8.0],
            shared(Constrained::all(1).unwrap()),
        )
        .unwrap();

        let combined = combine(&[soft, hard]).unwrap();

        // The hard row is not scaled and stays flagged in the combined model.
        assert_relative_eq!(combined.jacobian(0), &dmatrix![1.0; 4.0], epsilon = 1e-12);
        assert!(combined.noise_model().is_constrained());
        assert_eq!(
            combined.noise_model().sigmas().unwrap(),
            dvector![1.0, 0.0]
        );
    }

    #[test]
    fn test_eliminate_requires_known_front_key() {
        let f = GaussianFactor::new(
            vec![1],
            vec![dmatrix![1.0]],
            dvector![0.0],
            shared(NoiseModel::unit(1)),
        )
        .unwrap();

        assert!(eliminate(&[f.clone()], &[]).is_err());
        assert!(eliminate(&[f], &[9]).is_err());
    }
}
