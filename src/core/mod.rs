//! Core factor-graph contracts
//!
//! This module provides the minimal factor and factor-graph surface the layout
//! and elimination core consumes, together with the combined-factor block
//! structure ([`VariableSlots`]).

pub mod graph;
pub mod variable_slots;

pub use graph::{Factor, FactorGraph, GaussianFactor, GraphError, Key};
pub use variable_slots::VariableSlots;
