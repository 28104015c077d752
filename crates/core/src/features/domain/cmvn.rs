use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::shared::constants::CMVN_VARIANCE_FLOOR;

/// Which moments cepstral normalization removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmvnMode {
    /// Subtract the speaker mean only.
    Mean,
    /// Subtract the mean and divide by the standard deviation.
    #[default]
    MeanAndVariance,
}

/// Per-speaker normalization derived from accumulated statistics.
///
/// Statistics use the `2 x (D+1)` accumulator layout: row 0 holds per-dim
/// sums with the frame count in the last column, row 1 the sums of squares.
#[derive(Clone, Debug)]
pub struct CmvnStats {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl CmvnStats {
    pub fn from_accumulators(stats: ArrayView2<'_, f32>) -> Result<Self, String> {
        let (rows, cols) = stats.dim();
        if rows != 2 || cols < 2 {
            return Err(format!("expected a 2 x (D+1) stats matrix, got {rows} x {cols}"));
        }
        let dim = cols - 1;
        let count = stats[[0, dim]] as f64;
        if count <= 0.0 {
            return Err(format!("stats have a non-positive frame count {count}"));
        }

        let mut mean = Array1::<f64>::zeros(dim);
        let mut std = Array1::<f64>::zeros(dim);
        for d in 0..dim {
            let m = stats[[0, d]] as f64 / count;
            let var = (stats[[1, d]] as f64 / count - m * m).max(CMVN_VARIANCE_FLOOR);
            mean[d] = m;
            std[d] = var.sqrt();
        }
        Ok(Self { mean, std })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }

    /// Normalizes `features` in place.
    pub fn apply(&self, features: &mut Array2<f32>, mode: CmvnMode) -> Result<(), String> {
        if features.ncols() != self.dim() {
            return Err(format!(
                "features have {} dims but CMVN stats have {}",
                features.ncols(),
                self.dim()
            ));
        }
        for mut row in features.axis_iter_mut(Axis(0)) {
            for (d, value) in row.iter_mut().enumerate() {
                let centered = *value as f64 - self.mean[d];
                *value = match mode {
                    CmvnMode::Mean => centered as f32,
                    CmvnMode::MeanAndVariance => (centered / self.std[d]) as f32,
                };
            }
        }
        Ok(())
    }
}

/// Accumulates CMVN statistics over one speaker's utterances.
#[derive(Clone, Debug)]
pub struct CmvnAccumulator {
    sums: Array1<f64>,
    squares: Array1<f64>,
    count: f64,
}

impl CmvnAccumulator {
    pub fn new(dim: usize) -> Self {
        Self {
            sums: Array1::zeros(dim),
            squares: Array1::zeros(dim),
            count: 0.0,
        }
    }

    pub fn add(&mut self, features: ArrayView2<'_, f32>) -> Result<(), String> {
        if features.ncols() != self.sums.len() {
            return Err(format!(
                "features have {} dims, accumulator has {}",
                features.ncols(),
                self.sums.len()
            ));
        }
        for row in features.axis_iter(Axis(0)) {
            for (d, &value) in row.iter().enumerate() {
                let v = value as f64;
                self.sums[d] += v;
                self.squares[d] += v * v;
            }
        }
        self.count += features.nrows() as f64;
        Ok(())
    }

    /// The `2 x (D+1)` statistics matrix.
    pub fn to_matrix(&self) -> Array2<f32> {
        let dim = self.sums.len();
        let mut stats = Array2::<f32>::zeros((2, dim + 1));
        for d in 0..dim {
            stats[[0, d]] = self.sums[d] as f32;
            stats[[1, d]] = self.squares[d] as f32;
        }
        stats[[0, dim]] = self.count as f32;
        stats
    }
}
