use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::shared::error::{PipelineError, Result};
use crate::shared::text_table;

/// Where a record lives: container file and byte offset of its `\0B` marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    pub path: PathBuf,
    pub offset: u64,
}

impl Locator {
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    /// Parses `<container-path>:<offset>`. The offset is split at the last
    /// colon so container paths may contain colons.
    pub fn parse(text: &str) -> Option<Self> {
        let (path, offset) = text.rsplit_once(':')?;
        if path.is_empty() {
            return None;
        }
        let offset = offset.parse::<u64>().ok()?;
        Some(Self::new(path, offset))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.offset)
    }
}

/// Ordered utterance key → locator mapping, loaded fully and immutable after.
#[derive(Clone, Debug, Default)]
pub struct FeatureIndex {
    entries: Vec<(String, Locator)>,
    positions: HashMap<String, usize>,
}

impl FeatureIndex {
    pub fn from_entries(entries: Vec<(String, Locator)>) -> std::result::Result<Self, String> {
        let mut positions = HashMap::with_capacity(entries.len());
        for (i, (key, _)) in entries.iter().enumerate() {
            if positions.insert(key.clone(), i).is_some() {
                return Err(format!("duplicate key '{key}'"));
            }
        }
        Ok(Self { entries, positions })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pairs = text_table::read_pairs(path)?;
        let mut entries = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let locator = Locator::parse(&value).ok_or_else(|| {
                PipelineError::format(path, format!("bad locator '{value}' for key '{key}'"))
            })?;
            entries.push((key, locator));
        }
        let index = Self::from_entries(entries).map_err(|m| PipelineError::format(path, m))?;
        log::debug!("Loaded {} index entries from {}", index.len(), path.display());
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (key, locator) in &self.entries {
            out.push_str(&format!("{key} {locator}\n"));
        }
        let mut file = fs::File::create(path).map_err(|e| PipelineError::io(path, e))?;
        file.write_all(out.as_bytes())
            .map_err(|e| PipelineError::io(path, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, position: usize) -> Option<(&str, &Locator)> {
        self.entries.get(position).map(|(k, l)| (k.as_str(), l))
    }

    pub fn locator(&self, key: &str) -> Option<&Locator> {
        self.positions.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Same entries in an order fixed by `seed`.
    pub fn shuffled(&self, seed: u64) -> Self {
        let mut entries = self.entries.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        entries.shuffle(&mut rng);
        let positions = entries
            .iter()
            .enumerate()
            .map(|(i, (k, _))| (k.clone(), i))
            .collect();
        Self { entries, positions }
    }
}
