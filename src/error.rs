//! Error types for the trellis-solver library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.

use crate::core::graph::GraphError;
use crate::linalg::LinAlgError;
use thiserror::Error;

/// Main result type used throughout the trellis-solver library
pub type SolverResult<T> = Result<T, SolverError>;

/// Main error type for the trellis-solver library
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// Linear algebra related errors (noise models, whitening, elimination)
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] LinAlgError),

    /// Factor graph structure errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_error_display() {
        let error = SolverError::InvalidInput("front keys must not be empty".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid input: front keys must not be empty"
        );
    }

    #[test]
    fn test_solver_error_from_linalg() {
        let linalg = LinAlgError::DimensionMismatch {
            expected: 3,
            actual: 2,
        };
        let error = SolverError::from(linalg);
        match error {
            SolverError::LinAlg(inner) => {
                assert!(inner.to_string().contains("expected 3"));
            }
            _ => panic!("Expected LinAlg error"),
        }
    }

    #[test]
    fn test_solver_error_from_graph() {
        let graph = GraphError::DuplicateKey(7);
        let error = SolverError::from(graph);
        assert!(error.to_string().contains("duplicate key 7"));
    }
}
