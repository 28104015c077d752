use std::collections::HashMap;

/// Frame-level label ids per utterance.
#[derive(Clone, Debug, Default)]
pub struct AlignmentTable {
    labels: HashMap<String, Vec<u32>>,
}

impl AlignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the key is already present.
    pub fn insert(&mut self, key: String, labels: Vec<u32>) -> Result<(), String> {
        if self.labels.contains_key(&key) {
            return Err(format!("duplicate alignment for '{key}'"));
        }
        self.labels.insert(key, labels);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&[u32]> {
        self.labels.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Largest label id, used to sanity check against `num_pdfs`.
    pub fn max_label(&self) -> Option<u32> {
        self.labels.values().flatten().copied().max()
    }

    pub fn total_frames(&self) -> usize {
        self.labels.values().map(Vec::len).sum()
    }
}

impl FromIterator<(String, Vec<u32>)> for AlignmentTable {
    /// Later duplicates replace earlier ones; use [`AlignmentTable::insert`]
    /// when duplicates must be rejected.
    fn from_iter<I: IntoIterator<Item = (String, Vec<u32>)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}
