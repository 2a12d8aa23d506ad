//! End-to-end elimination tests: layout, whitening and QR working together

use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::{dmatrix, dvector, DMatrix, DVector};
use trellis_solver::{
    combine, eliminate, Constrained, Diagonal, Factor, GaussianFactor, Isotropic, NoiseModel,
    Scatter, VariableSlots,
};

fn unit_factor(keys: &[usize], blocks: Vec<DMatrix<f64>>, rhs: DVector<f64>) -> GaussianFactor {
    let dim = rhs.len();
    GaussianFactor::new(keys.to_vec(), blocks, rhs, Arc::new(NoiseModel::unit(dim))).unwrap()
}

#[test]
fn three_factor_union_layout() {
    // Factors over {1,3}, {1,5}, {3,5}: the union layout interleaves blocks.
    let f0 = unit_factor(&[1, 3], vec![dmatrix![1.0], dmatrix![10.0]], dvector![1.0]);
    let f1 = unit_factor(&[1, 5], vec![dmatrix![2.0], dmatrix![20.0]], dvector![2.0]);
    let f2 = unit_factor(&[3, 5], vec![dmatrix![3.0], dmatrix![30.0]], dvector![3.0]);
    let factors = vec![f0, f1, f2];

    let slots = VariableSlots::from_factors(&factors);
    assert_eq!(slots.get(1).unwrap(), &[Some(0), Some(0), None]);
    assert_eq!(slots.get(3).unwrap(), &[Some(1), None, Some(0)]);
    assert_eq!(slots.get(5).unwrap(), &[None, Some(1), Some(1)]);

    let combined = combine(&factors).unwrap();
    assert_eq!(combined.keys(), &[1, 3, 5]);
    assert_relative_eq!(
        combined.jacobian(0),
        &dmatrix![1.0; 2.0; 0.0],
        epsilon = 1e-12
    );
    assert_relative_eq!(
        combined.jacobian(1),
        &dmatrix![10.0; 0.0; 3.0],
        epsilon = 1e-12
    );
    assert_relative_eq!(
        combined.jacobian(2),
        &dmatrix![0.0; 20.0; 30.0],
        epsilon = 1e-12
    );
    assert_relative_eq!(combined.rhs(), &dvector![1.0, 2.0, 3.0], epsilon = 1e-12);
    assert!(combined.noise_model().is_unit());
}

#[test]
fn eliminate_chain_matches_direct_solution() {
    // Prior pulling x0 to 2 with sigma 0.5, unit between factor x1 - x0 = 3.
    let prior = GaussianFactor::new(
        vec![0],
        vec![dmatrix![1.0]],
        dvector![2.0],
        Arc::new(Isotropic::from_sigma(1, 0.5, true).unwrap()),
    )
    .unwrap();
    let between = unit_factor(&[0, 1], vec![dmatrix![-1.0], dmatrix![1.0]], dvector![3.0]);

    let (conditional, reduced) = eliminate(&[prior, between], &[0]).unwrap();

    assert_eq!(conditional.frontal_keys(), &[0]);
    assert_eq!(conditional.separator_keys(), &[1]);
    assert_eq!(reduced.keys(), &[1]);
    assert_eq!(reduced.rows(), 1);
    assert!(reduced.noise_model().is_unit());

    // The reduced factor determines x1 alone; the conditional back-substitutes x0.
    let x1 = reduced.rhs()[0] / reduced.jacobian(0)[(0, 0)];
    assert_relative_eq!(x1, 5.0, epsilon = 1e-9);
    let x0 = conditional.solve(&dvector![x1]).unwrap();
    assert_relative_eq!(x0[0], 2.0, epsilon = 1e-9);
}

#[test]
fn eliminate_with_hard_constraint() {
    // Soft priors x0 = 2 and x1 = 4 with a hard constraint x1 - x0 = 3;
    // the optimum splits the disagreement evenly: x0 = 1.5, x1 = 4.5.
    let prior0 = unit_factor(&[0], vec![dmatrix![1.0]], dvector![2.0]);
    let prior1 = unit_factor(&[1], vec![dmatrix![1.0]], dvector![4.0]);
    let constraint = GaussianFactor::new(
        vec![0, 1],
        vec![dmatrix![-1.0], dmatrix![1.0]],
        dvector![3.0],
        Arc::new(Constrained::all(1).unwrap()),
    )
    .unwrap();

    let (conditional, reduced) = eliminate(&[prior0, prior1, constraint], &[0]).unwrap();

    // The constraint direction survives elimination as a hard row of the
    // conditional; the reduced factor on the separator is soft.
    assert!(conditional.noise_model().is_constrained());
    assert_eq!(conditional.noise_model().sigmas().unwrap()[0], 0.0);
    assert!(!reduced.noise_model().is_constrained());

    let x1 = reduced.rhs()[0] / reduced.jacobian(0)[(0, 0)];
    assert_relative_eq!(x1, 4.5, epsilon = 1e-9);
    let x0 = conditional.solve(&dvector![x1]).unwrap();
    assert_relative_eq!(x0[0], 1.5, epsilon = 1e-9);
}

#[test]
fn eliminate_multidimensional_blocks() {
    // A 2-dim variable 4 and a 1-dim variable 9.
    let prior = GaussianFactor::new(
        vec![4],
        vec![dmatrix![1.0, 0.0; 0.0, 1.0]],
        dvector![1.0, 2.0],
        Arc::new(Diagonal::from_sigmas(dvector![1.0, 2.0], false).unwrap()),
    )
    .unwrap();
    let link = unit_factor(
        &[9, 4],
        vec![dmatrix![1.0; 1.0], dmatrix![1.0, 0.0; 0.0, 1.0]],
        dvector![0.0, 0.0],
    );
    let factors = vec![prior, link];

    let scatter = Scatter::from_factors(&factors).unwrap();
    let layout: Vec<_> = scatter.iter().map(|e| (e.key, e.dimension)).collect();
    assert_eq!(layout, vec![(4, 2), (9, 1)]);

    // Reference: dense weighted least squares over [x4_0, x4_1, x9].
    let a_full = dmatrix![
        1.0, 0.0, 0.0;
        0.0, 0.5, 0.0;
        1.0, 0.0, 1.0;
        0.0, 1.0, 1.0
    ];
    let b_full = dvector![1.0, 1.0, 0.0, 0.0];
    let x_ref = (a_full.transpose() * &a_full)
        .cholesky()
        .unwrap()
        .solve(&(a_full.transpose() * &b_full));

    let (conditional, reduced) = eliminate(&factors, &[4]).unwrap();
    assert_eq!(conditional.rows(), 2);
    assert_eq!(reduced.keys(), &[9]);
    assert_eq!(reduced.rows(), 1);

    let x9 = reduced.rhs()[0] / reduced.jacobian(0)[(0, 0)];
    let x4 = conditional.solve(&dvector![x9]).unwrap();
    assert_relative_eq!(x9, x_ref[2], epsilon = 1e-9);
    assert_relative_eq!(x4[0], x_ref[0], epsilon = 1e-9);
    assert_relative_eq!(x4[1], x_ref[1], epsilon = 1e-9);
}

#[test]
fn eliminate_rank_deficient_system_is_not_an_error() {
    // One equation, two unknowns: the frontal variable absorbs the only row,
    // leaving an empty reduced factor on the separator.
    let f = unit_factor(&[0, 1], vec![dmatrix![1.0], dmatrix![1.0]], dvector![2.0]);

    let (conditional, reduced) = eliminate(&[f], &[0]).unwrap();
    assert_eq!(conditional.rows(), 1);
    assert_eq!(reduced.keys(), &[1]);
    assert_eq!(reduced.rows(), 0);
    assert_eq!(reduced.noise_model().dim(), 0);
}
