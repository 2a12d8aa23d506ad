//! Block structure of a combined factor
//!
//! A combined factor is assembled as one block of rows for each component
//! factor. In each row-block (factor), some of the column-blocks (variables)
//! may be empty, since factors involving different sets of variables are
//! interleaved. [`VariableSlots`] describes this 2D block structure.

use std::collections::BTreeMap;

use crate::core::graph::{Factor, FactorGraph, Key};

/// Maps each variable of a combined factor to the local column-block it comes
/// from in every component factor.
///
/// For each involved variable, the entry holds one slot per component factor,
/// in row-block (factor iteration) order: `Some(s)` means local column-block
/// `s` of that factor supplies the variable's data, `None` means the factor
/// does not involve the variable.
///
/// As an example, if the combination of three factors contains variables 1, 3
/// and 5, then `slots.get(3).unwrap()[2] == Some(0)` indicates that the
/// column-block of variable 3, in row-block 2, comes from column-block 0 of
/// component factor 2.
///
/// Built once from an immutable list of factors and never mutated afterwards.
/// Iteration is in ascending key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSlots {
    slots: BTreeMap<Key, Vec<Option<usize>>>,
    factor_count: usize,
}

impl VariableSlots {
    /// Compute the block structure of the combination of the graph's factors.
    ///
    /// For each factor in iteration order (index = row-block position) and each
    /// key it involves in the factor's own order (index = local column-block
    /// position), records which local column-block contributes to that
    /// variable's column of the combined factor. A factor with zero involved
    /// variables contributes nothing.
    pub fn new<F: Factor>(graph: &FactorGraph<F>) -> Self {
        Self::build(graph.iter(), graph.len())
    }

    /// Same as [`VariableSlots::new`], from an ordered slice of factors
    pub fn from_factors<F: Factor>(factors: &[F]) -> Self {
        Self::build(factors.iter(), factors.len())
    }

    fn build<'a, F: Factor + 'a>(
        factors: impl Iterator<Item = &'a F>,
        factor_count: usize,
    ) -> Self {
        let mut slots: BTreeMap<Key, Vec<Option<usize>>> = BTreeMap::new();

        for (row_block, factor) in factors.enumerate() {
            for (local_slot, &key) in factor.keys().iter().enumerate() {
                // First sighting of a key allocates a full-length slot vector
                // with every factor marked absent.
                let entry = slots.entry(key).or_insert_with(|| vec![None; factor_count]);
                entry[row_block] = Some(local_slot);
                tracing::trace!(
                    key,
                    row_block,
                    local_slot,
                    "variable column comes from factor slot"
                );
            }
        }

        Self {
            slots,
            factor_count,
        }
    }

    /// Per-factor slots of `key`, one entry per component factor
    pub fn get(&self, key: Key) -> Option<&[Option<usize>]> {
        self.slots.get(&key).map(|v| v.as_slice())
    }

    /// Iterate `(key, slots)` pairs in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (Key, &[Option<usize>])> {
        self.slots.iter().map(|(&k, v)| (k, v.as_slice()))
    }

    /// Keys of the combined factor, ascending
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.slots.keys().copied()
    }

    /// Number of variables involved in the combination
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if no factor involved any variable
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of component factors (length of every slot vector)
    pub fn factor_count(&self) -> usize {
        self.factor_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{Factor, FactorGraph, Key};

    struct KeysOnly(Vec<Key>);
    impl Factor for KeysOnly {
        fn keys(&self) -> &[Key] {
            &self.0
        }
    }

    fn graph_of(key_lists: &[&[Key]]) -> FactorGraph<KeysOnly> {
        let mut graph = FactorGraph::new();
        for keys in key_lists {
            graph.add(KeysOnly(keys.to_vec()));
        }
        graph
    }

    #[test]
    fn test_three_factor_combination() {
        // Factors over {1,3}, {1,5}, {3,5}, keys listed in local order.
        let graph = graph_of(&[&[1, 3], &[1, 5], &[3, 5]]);
        let slots = VariableSlots::new(&graph);

        assert_eq!(slots.len(), 3);
        assert_eq!(slots.factor_count(), 3);
        assert_eq!(slots.keys().collect::<Vec<_>>(), vec![1, 3, 5]);

        assert_eq!(slots.get(1).unwrap(), &[Some(0), Some(0), None]);
        assert_eq!(slots.get(3).unwrap(), &[Some(1), None, Some(0)]);
        assert_eq!(slots.get(5).unwrap(), &[None, Some(1), Some(1)]);
    }

    #[test]
    fn test_every_entry_has_factor_count_slots() {
        let graph = graph_of(&[&[9], &[2, 9, 4], &[4]]);
        let slots = VariableSlots::new(&graph);

        for (_, entry) in slots.iter() {
            assert_eq!(entry.len(), 3);
        }
    }

    #[test]
    fn test_empty_factor_contributes_nothing() {
        let graph = graph_of(&[&[7], &[], &[7]]);
        let slots = VariableSlots::new(&graph);

        assert_eq!(slots.len(), 1);
        assert_eq!(slots.get(7).unwrap(), &[Some(0), None, Some(0)]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = graph_of(&[]);
        let slots = VariableSlots::new(&graph);

        assert!(slots.is_empty());
        assert_eq!(slots.factor_count(), 0);
        assert_eq!(slots.get(0), None);
    }

    #[test]
    fn test_iteration_is_key_sorted() {
        let graph = graph_of(&[&[42, 3], &[17]]);
        let slots = VariableSlots::new(&graph);

        let keys: Vec<_> = slots.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![3, 17, 42]);
    }
}
