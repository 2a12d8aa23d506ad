//! Linear algebra core: noise models, column layout, and elimination
//!
//! This module provides the whitening and elimination machinery of the solver:
//! - Noise models normalizing residuals and Jacobians by their uncertainty
//! - The [`Scatter`] column layout of a combined factor
//! - Constraint-aware QR elimination of stacked, whitened systems
//!
//! Dense matrix arithmetic and the Householder/Cholesky kernels come from
//! nalgebra; this module decides how and when they are invoked and how their
//! results are interpreted.

use thiserror::Error;

pub mod elimination;
pub mod noise_model;
pub mod scatter;

pub use elimination::{combine, eliminate, GaussianConditional};
pub use noise_model::{Constrained, Diagonal, Gaussian, Isotropic, NoiseModel, SharedNoiseModel};
pub use scatter::{Scatter, SlotEntry};

/// Errors raised by noise-model construction, whitening and elimination
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinAlgError {
    /// A model or system was given with zero dimension where a positive one is required
    #[error("dimension must be positive")]
    ZeroDimension,

    /// Vector length or matrix row count does not match the model dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A square matrix was required
    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    /// Zero sigma supplied to an unconstrained model; exact zeros belong to constrained models
    #[error("sigma must be strictly positive, got {value} at component {index} (use a constrained model for exact zeros)")]
    NonPositiveSigma { index: usize, value: f64 },

    /// Negative sigma supplied to a constrained model
    #[error("sigma must be non-negative, got {value} at component {index}")]
    NegativeSigma { index: usize, value: f64 },

    /// Cholesky factorization of an information or covariance matrix failed
    #[error("matrix is not positive definite")]
    NotPositiveDefinite,

    /// A triangular solve against a singular square-root information matrix
    #[error("square-root information matrix is singular")]
    Singular,

    /// An augmented system `[A | b]` needs at least the right-hand-side column
    #[error("augmented system must contain a right-hand-side column")]
    MissingRhsColumn,

    /// The same variable appears with two different block dimensions
    #[error("variable {key} has inconsistent dimensions: {first} vs {second}")]
    InconsistentDimension {
        key: usize,
        first: usize,
        second: usize,
    },
}
