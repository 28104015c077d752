use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::ArrayView2;

use super::ark_record;
use super::feature_index::Locator;
use crate::shared::error::{PipelineError, Result};

/// Appends matrices to an ark container and their locators to a text index.
///
/// Both files are opened in append mode. A key may be written at most once
/// per writer; there is no overwrite.
pub struct ArkWriter {
    index_path: PathBuf,
    ark_path: PathBuf,
    index: BufWriter<File>,
    ark: BufWriter<File>,
    position: u64,
    written: HashSet<String>,
}

impl ArkWriter {
    pub fn create(index_path: &Path, ark_path: &Path) -> Result<Self> {
        let ark = open_append(ark_path)?;
        let position = ark
            .metadata()
            .map_err(|e| PipelineError::io(ark_path, e))?
            .len();
        let index = open_append(index_path)?;
        Ok(Self {
            index_path: index_path.to_path_buf(),
            ark_path: ark_path.to_path_buf(),
            index: BufWriter::new(index),
            ark: BufWriter::new(ark),
            position,
            written: HashSet::new(),
        })
    }

    pub fn write(&mut self, key: &str, matrix: ArrayView2<'_, f32>) -> Result<Locator> {
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(PipelineError::format(
                &self.ark_path,
                format!("invalid utterance key '{key}'"),
            ));
        }
        if self.written.contains(key) {
            return Err(PipelineError::Consistency(format!(
                "utterance '{key}' written twice to {}",
                self.ark_path.display()
            )));
        }

        let mut record = Vec::with_capacity(key.len() + 1);
        record.extend_from_slice(key.as_bytes());
        record.push(b' ');
        let offset = self.position + record.len() as u64;
        ark_record::write_matrix(&mut record, matrix)
            .map_err(|e| PipelineError::io(&self.ark_path, e))?;
        let locator = Locator::new(&self.ark_path, offset);

        self.ark
            .write_all(&record)
            .map_err(|e| PipelineError::io(&self.ark_path, e))?;
        writeln!(self.index, "{key} {locator}").map_err(|e| PipelineError::io(&self.index_path, e))?;

        // Only a fully written record moves the cursor.
        self.position += record.len() as u64;
        self.written.insert(key.to_string());
        Ok(locator)
    }

    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    /// Flushes both files. Dropping the writer without calling this may lose data.
    pub fn finish(mut self) -> Result<()> {
        self.ark
            .flush()
            .map_err(|e| PipelineError::io(&self.ark_path, e))?;
        self.index
            .flush()
            .map_err(|e| PipelineError::io(&self.index_path, e))
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PipelineError::io(path, e))
}
