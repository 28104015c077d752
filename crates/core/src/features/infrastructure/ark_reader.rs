use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ndarray::Array2;

use super::ark_record;
use super::feature_index::{FeatureIndex, Locator};
use crate::shared::error::{PipelineError, Result};

/// Reads utterance matrices through a [`FeatureIndex`], sequentially or by key.
///
/// All records read through one reader must share the column count of the
/// first record; anything else is a format error.
pub struct ArkReader {
    index: FeatureIndex,
    containers: HashMap<PathBuf, BufReader<File>>,
    dim: Option<usize>,
}

impl ArkReader {
    pub fn new(index: FeatureIndex) -> Self {
        Self {
            index,
            containers: HashMap::new(),
            dim: None,
        }
    }

    pub fn open(index_path: &Path) -> Result<Self> {
        Ok(Self::new(FeatureIndex::load(index_path)?))
    }

    pub fn index(&self) -> &FeatureIndex {
        &self.index
    }

    /// Column count, known once the first record has been read.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Reads the record at `cursor` in index order.
    ///
    /// Returns `None` past the last record; otherwise the key, the matrix and
    /// the cursor of the following record.
    pub fn read_next(&mut self, cursor: usize) -> Result<Option<(String, Array2<f32>, usize)>> {
        let Some((key, locator)) = self.index.entry(cursor) else {
            return Ok(None);
        };
        let key = key.to_string();
        let locator = locator.clone();
        let matrix = self.read_located(&locator)?;
        Ok(Some((key, matrix, cursor + 1)))
    }

    pub fn read_utterance(&mut self, key: &str) -> Result<Array2<f32>> {
        let locator = self.locate(key)?;
        self.read_located(&locator)
    }

    /// Frame count of an utterance, read from its header only.
    pub fn frame_count(&mut self, key: &str) -> Result<usize> {
        let locator = self.locate(key)?;
        let container = self.seek_to(&locator)?;
        Ok(ark_record::read_header(container, &locator.path)?.rows)
    }

    /// Longest utterance in the index, in frames.
    pub fn max_length(&mut self) -> Result<usize> {
        let keys: Vec<String> = self.index.keys().map(str::to_string).collect();
        let mut longest = 0;
        for key in keys {
            longest = longest.max(self.frame_count(&key)?);
        }
        Ok(longest)
    }

    fn locate(&self, key: &str) -> Result<Locator> {
        self.index
            .locator(key)
            .cloned()
            .ok_or_else(|| PipelineError::Consistency(format!("utterance '{key}' is not in the feature index")))
    }

    fn read_located(&mut self, locator: &Locator) -> Result<Array2<f32>> {
        let container = self.seek_to(locator)?;
        let matrix = ark_record::read_matrix(container, &locator.path)?;

        match self.dim {
            None => self.dim = Some(matrix.ncols()),
            Some(dim) if dim != matrix.ncols() => {
                return Err(PipelineError::format(
                    &locator.path,
                    format!(
                        "record at offset {} has {} columns, expected {dim}",
                        locator.offset,
                        matrix.ncols()
                    ),
                ))
            }
            Some(_) => {}
        }
        Ok(matrix)
    }

    fn seek_to(&mut self, locator: &Locator) -> Result<&mut BufReader<File>> {
        if !self.containers.contains_key(&locator.path) {
            let file = File::open(&locator.path).map_err(|e| PipelineError::io(&locator.path, e))?;
            self.containers
                .insert(locator.path.clone(), BufReader::new(file));
        }
        let container = self
            .containers
            .get_mut(&locator.path)
            .ok_or_else(|| PipelineError::format(&locator.path, "container vanished"))?;
        container
            .seek(SeekFrom::Start(locator.offset))
            .map_err(|e| PipelineError::io(&locator.path, e))?;
        Ok(container)
    }
}
