use crate::shared::error::{PipelineError, Result};

/// Maps a raw frame-level alignment to the label ids the network is trained on.
///
/// The dispenser only sees this trait, so other target representations can
/// be swapped in without touching batch assembly.
pub trait TargetCoder: Send {
    fn num_classes(&self) -> usize;

    /// Fails if any raw id cannot be encoded.
    fn encode(&self, raw: &[u32]) -> Result<Vec<u32>>;

    fn decode(&self, encoded: &[u32]) -> Result<Vec<u32>>;
}

/// Identity over pdf ids in `[0, num_classes)`.
#[derive(Clone, Copy, Debug)]
pub struct AlignmentCoder {
    num_classes: usize,
}

impl AlignmentCoder {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl TargetCoder for AlignmentCoder {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn encode(&self, raw: &[u32]) -> Result<Vec<u32>> {
        check_range(raw, self.num_classes)?;
        Ok(raw.to_vec())
    }

    fn decode(&self, encoded: &[u32]) -> Result<Vec<u32>> {
        check_range(encoded, self.num_classes)?;
        Ok(encoded.to_vec())
    }
}

/// Encodes through a lookup table, e.g. pdf id → phone class.
///
/// Decoding needs the table to be injective; otherwise it fails.
#[derive(Clone, Debug)]
pub struct MappedCoder {
    table: Vec<u32>,
    inverse: Option<Vec<u32>>,
    num_classes: usize,
}

impl MappedCoder {
    pub fn new(table: Vec<u32>, num_classes: usize) -> Result<Self> {
        check_range(&table, num_classes)?;
        let mut inverse = vec![u32::MAX; num_classes];
        let mut injective = true;
        for (raw, &class) in table.iter().enumerate() {
            let slot = &mut inverse[class as usize];
            if *slot != u32::MAX {
                injective = false;
                break;
            }
            *slot = raw as u32;
        }
        Ok(Self {
            table,
            inverse: injective.then_some(inverse),
            num_classes,
        })
    }

    pub fn is_invertible(&self) -> bool {
        self.inverse.is_some()
    }
}

impl TargetCoder for MappedCoder {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn encode(&self, raw: &[u32]) -> Result<Vec<u32>> {
        raw.iter()
            .map(|&id| {
                self.table.get(id as usize).copied().ok_or_else(|| {
                    PipelineError::Consistency(format!(
                        "label {id} has no mapping (table covers {} ids)",
                        self.table.len()
                    ))
                })
            })
            .collect()
    }

    fn decode(&self, encoded: &[u32]) -> Result<Vec<u32>> {
        let inverse = self.inverse.as_ref().ok_or_else(|| {
            PipelineError::Consistency("label mapping is not invertible".to_string())
        })?;
        check_range(encoded, self.num_classes)?;
        encoded
            .iter()
            .map(|&class| match inverse[class as usize] {
                u32::MAX => Err(PipelineError::Consistency(format!(
                    "class {class} is not the image of any label"
                ))),
                raw => Ok(raw),
            })
            .collect()
    }
}

fn check_range(ids: &[u32], num_classes: usize) -> Result<()> {
    match ids.iter().find(|&&id| id as usize >= num_classes) {
        Some(id) => Err(PipelineError::Consistency(format!(
            "label {id} outside [0, {num_classes})"
        ))),
        None => Ok(()),
    }
}
