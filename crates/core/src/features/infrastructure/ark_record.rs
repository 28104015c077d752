//! Binary matrix records in the Kaldi `ark` layout.
//!
//! A record is `<key> \0B<type> \x04<rows:i32> \x04<cols:i32><values>` with
//! little-endian values in row-major order. Index offsets point at `\0B`.

use std::io::{self, Read, Write};
use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::shared::error::{PipelineError, Result};

const BINARY_MARKER: [u8; 2] = [0, b'B'];
const INT32_SIZE_BYTE: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    Float32,
    Float64,
}

impl ElementType {
    fn size(self) -> usize {
        match self {
            ElementType::Float32 => 4,
            ElementType::Float64 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub element: ElementType,
    pub rows: usize,
    pub cols: usize,
}

/// Writes the binary part of a record (everything after `<key> `).
/// Returns the number of bytes written.
pub fn write_matrix(out: &mut impl Write, matrix: ArrayView2<'_, f32>) -> io::Result<u64> {
    let (rows, cols) = matrix.dim();
    let rows = i32::try_from(rows)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many rows"))?;
    let cols = i32::try_from(cols)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many columns"))?;

    out.write_all(&BINARY_MARKER)?;
    out.write_all(b"FM ")?;
    out.write_all(&[INT32_SIZE_BYTE])?;
    out.write_all(&rows.to_le_bytes())?;
    out.write_all(&[INT32_SIZE_BYTE])?;
    out.write_all(&cols.to_le_bytes())?;

    let mut payload = Vec::with_capacity(matrix.len() * 4);
    for value in matrix.iter() {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    out.write_all(&payload)?;
    Ok(2 + 3 + 10 + payload.len() as u64)
}

/// Reads a record header, leaving the reader positioned at the first value.
pub fn read_header(input: &mut impl Read, origin: &Path) -> Result<RecordHeader> {
    let mut marker = [0u8; 2];
    read_exact(input, &mut marker, origin, "binary marker")?;
    if marker != BINARY_MARKER {
        return Err(PipelineError::format(
            origin,
            "record is not in binary form (missing \\0B marker)",
        ));
    }

    let mut token = [0u8; 3];
    read_exact(input, &mut token, origin, "type token")?;
    let element = match &token {
        b"FM " => ElementType::Float32,
        b"DM " => ElementType::Float64,
        b"CM " | b"CM2" | b"CM3" => {
            return Err(PipelineError::format(
                origin,
                "compressed matrices are not supported",
            ))
        }
        other => {
            return Err(PipelineError::format(
                origin,
                format!("unknown matrix type '{}'", String::from_utf8_lossy(other)),
            ))
        }
    };

    let rows = read_dimension(input, origin, "rows")?;
    let cols = read_dimension(input, origin, "cols")?;
    Ok(RecordHeader { element, rows, cols })
}

/// Reads a full record body and converts it to `f32`.
pub fn read_matrix(input: &mut impl Read, origin: &Path) -> Result<Array2<f32>> {
    let header = read_header(input, origin)?;
    let count = header.rows.checked_mul(header.cols).ok_or_else(|| {
        PipelineError::format(origin, "matrix dimensions overflow")
    })?;

    let length = count
        .checked_mul(header.element.size())
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| PipelineError::format(origin, "matrix dimensions overflow"))?;

    // Grows with the data actually present, never with the header's claim.
    let mut bytes = Vec::new();
    let read = input
        .by_ref()
        .take(length)
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::io(origin, e))?;
    if (read as u64) < length {
        return Err(PipelineError::format(
            origin,
            format!(
                "truncated record: expected {count} values for a {}x{} matrix",
                header.rows, header.cols
            ),
        ));
    }

    let values: Vec<f32> = match header.element {
        ElementType::Float32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        ElementType::Float64 => bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
    };

    Array2::from_shape_vec((header.rows, header.cols), values)
        .map_err(|e| PipelineError::format(origin, e.to_string()))
}

fn read_dimension(input: &mut impl Read, origin: &Path, what: &str) -> Result<usize> {
    let mut size = [0u8; 1];
    read_exact(input, &mut size, origin, what)?;
    if size[0] != INT32_SIZE_BYTE {
        return Err(PipelineError::format(
            origin,
            format!("expected 4-byte integer for {what}, size byte is {}", size[0]),
        ));
    }
    let mut raw = [0u8; 4];
    read_exact(input, &mut raw, origin, what)?;
    let value = i32::from_le_bytes(raw);
    usize::try_from(value)
        .map_err(|_| PipelineError::format(origin, format!("negative {what}: {value}")))
}

fn read_exact(input: &mut impl Read, buf: &mut [u8], origin: &Path, what: &str) -> Result<()> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            PipelineError::format(origin, format!("unexpected end of data reading {what}"))
        }
        _ => PipelineError::io(origin, e),
    })
}
