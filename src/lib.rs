//! # Trellis Solver
//!
//! The block-layout and elimination core of a sparse factor-graph least squares
//! solver, as used in SLAM and bundle-adjustment back ends.
//!
//! ## Features
//!
//! - **Combined-factor layout**: [`VariableSlots`] and [`Scatter`] compute the
//!   column-block structure of a factor assembled from several component factors
//!   that each touch a different subset of variables
//! - **Noise models**: a closed family ([`Gaussian`], [`Diagonal`], [`Constrained`],
//!   [`Isotropic`]) providing whitening/unwhitening of residuals and Jacobians
//! - **Constraint-aware elimination**: in-place QR reduction of an augmented
//!   system `[A | b]` to `[R | d]`, returning the noise model of the produced rows
//!   and handling hard (zero-sigma) constraints without infinite precisions
//!
//! Dense assembly and kernels are built on the nalgebra linear algebra library.
//! The nonlinear optimizer, variable-ordering heuristics, and sparse factorization
//! backends live outside this crate.

// Local modules
pub mod core;
pub mod error;
pub mod linalg;
pub mod logger;

// Re-export core types
pub use crate::core::graph::{Factor, FactorGraph, GaussianFactor, GraphError, Key};
pub use crate::core::variable_slots::VariableSlots;

// Re-export error types
pub use crate::error::{SolverError, SolverResult};

// Re-export linear algebra types
pub use crate::linalg::elimination::{combine, eliminate, GaussianConditional};
pub use crate::linalg::noise_model::{
    Constrained, Diagonal, Gaussian, Isotropic, NoiseModel, SharedNoiseModel,
};
pub use crate::linalg::scatter::{Scatter, SlotEntry};
pub use crate::linalg::LinAlgError;

// Re-export logger
pub use crate::logger::{init_logger, init_logger_with_level};
