use std::collections::HashSet;

/// Ids that must never be recommended for the current request
///
/// Seeded with the current item and the profile's favorite/watched ids, then
/// grown with every accepted candidate. The set only ever grows, which is
/// what guarantees the final output is duplicate-free across stages.
#[derive(Debug, Default)]
pub struct ExclusionSet {
    ids: HashSet<i64>,
}

impl ExclusionSet {
    /// Adds an id; returns true when it was not excluded before
    pub fn insert(&mut self, id: i64) -> bool {
        self.ids.insert(id)
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.ids.extend(ids);
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Snapshot of the excluded ids, for query parameters
    pub fn to_vec(&self) -> Vec<i64> {
        self.ids.iter().copied().collect()
    }
}
