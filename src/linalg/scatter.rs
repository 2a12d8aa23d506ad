//! Ordered key-to-dimension layout of a combined factor's columns

use std::ops::Deref;

use crate::core::graph::{Factor, FactorGraph, GaussianFactor, Key};
use crate::linalg::LinAlgError;

/// One slot of a combined factor's column layout: a variable key and the
/// width/height of that variable's block.
///
/// A dimension of 0 marks a placeholder that is pruned before the layout is
/// used. Entries order by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotEntry {
    pub key: Key,
    pub dimension: usize,
}

impl SlotEntry {
    pub fn new(key: Key, dimension: usize) -> Self {
        Self { key, dimension }
    }

    fn is_placeholder(&self) -> bool {
        self.dimension == 0
    }
}

/// The column layout (key to dimension) of a combined factor, sorted ascending
/// by key.
///
/// Built either from an explicit ordering of keys (dimensions looked up in the
/// factor graph) or from the sorted union of keys touched by the graph. The
/// structure is small, rebuilt per elimination step, and consumed immediately
/// to lay out a combined factor's Jacobian, so lookup is a linear scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scatter {
    entries: Vec<SlotEntry>,
}

impl Scatter {
    /// An empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout of the sorted union of all variables mentioned by the graph
    pub fn from_graph(graph: &FactorGraph<GaussianFactor>) -> Result<Self, LinAlgError> {
        Self::build(graph.factors(), &[])
    }

    /// Layout with an explicit (partial or complete) ordering prefix; keys
    /// found only in the graph are appended after the prefix, sorted by key
    pub fn from_graph_ordered(
        graph: &FactorGraph<GaussianFactor>,
        ordering: &[Key],
    ) -> Result<Self, LinAlgError> {
        Self::build(graph.factors(), ordering)
    }

    /// Same as [`Scatter::from_graph`], from an ordered slice of factors
    pub fn from_factors(factors: &[GaussianFactor]) -> Result<Self, LinAlgError> {
        Self::build(factors, &[])
    }

    /// Same as [`Scatter::from_graph_ordered`], from an ordered slice of factors
    pub fn from_factors_ordered(
        factors: &[GaussianFactor],
        ordering: &[Key],
    ) -> Result<Self, LinAlgError> {
        Self::build(factors, ordering)
    }

    fn build(factors: &[GaussianFactor], ordering: &[Key]) -> Result<Self, LinAlgError> {
        let mut scatter = Scatter::new();

        // Pre-fill slots for the requested ordering; dimensions are discovered
        // from the factors below.
        for &key in ordering {
            scatter.add(key, 0);
        }

        for factor in factors {
            for (slot, &key) in factor.keys().iter().enumerate() {
                let dim = factor.dim(slot);
                match scatter.find_mut(key) {
                    Some(entry) => {
                        if entry.is_placeholder() {
                            entry.dimension = dim;
                        } else if entry.dimension != dim {
                            return Err(LinAlgError::InconsistentDimension {
                                key,
                                first: entry.dimension,
                                second: dim,
                            });
                        }
                    }
                    None => scatter.add(key, dim),
                }
            }
        }

        // Keys beyond the ordered prefix stay sorted by key.
        let prefix = ordering.len().min(scatter.entries.len());
        scatter.entries[prefix..].sort();

        // Drop placeholders: ordering keys no factor mentions.
        scatter.entries.retain(|entry| !entry.is_placeholder());

        tracing::debug!(
            variables = scatter.entries.len(),
            total_dimension = scatter.total_dimension(),
            "scatter layout built"
        );
        Ok(scatter)
    }

    /// Append a key/dimension pair
    pub fn add(&mut self, key: Key, dimension: usize) {
        self.entries.push(SlotEntry::new(key, dimension));
    }

    /// Find the entry with the given key (linear time worst case)
    pub fn find(&self, key: Key) -> Option<&SlotEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    fn find_mut(&mut self, key: Key) -> Option<&mut SlotEntry> {
        self.entries.iter_mut().find(|entry| entry.key == key)
    }

    /// Sum of all block dimensions (column count of the combined Jacobian)
    pub fn total_dimension(&self) -> usize {
        self.entries.iter().map(|entry| entry.dimension).sum()
    }
}

impl Deref for Scatter {
    type Target = [SlotEntry];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}
