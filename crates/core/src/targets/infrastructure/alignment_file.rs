use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::shared::error::{PipelineError, Result};
use crate::shared::text_table::split_line;
use crate::targets::domain::alignment_table::AlignmentTable;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Loads `key id id ...` lines, gzip-compressed (possibly multi-member) or plain.
pub fn load_alignments(path: &Path) -> Result<AlignmentTable> {
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut magic = [0u8; 2];
    let read = read_prefix(&mut file, &mut magic).map_err(|e| PipelineError::io(path, e))?;
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;

    let table = if read == 2 && magic == GZIP_MAGIC {
        parse_alignments(BufReader::new(MultiGzDecoder::new(file)), path)?
    } else {
        parse_alignments(BufReader::new(file), path)?
    };
    log::info!(
        "Loaded alignments for {} utterances ({} frames) from {}",
        table.len(),
        table.total_frames(),
        path.display()
    );
    Ok(table)
}

pub fn parse_alignments(reader: impl BufRead, origin: &Path) -> Result<AlignmentTable> {
    let mut table = AlignmentTable::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                PipelineError::format(origin, format!("line {}: {e}", lineno + 1))
            }
            _ => PipelineError::io(origin, e),
        })?;
        let Some((key, rest)) = split_line(&line) else {
            continue;
        };
        let labels = rest
            .split_whitespace()
            .map(|token| {
                token.parse::<u32>().map_err(|_| {
                    PipelineError::format(
                        origin,
                        format!("line {}: bad label '{token}' for '{key}'", lineno + 1),
                    )
                })
            })
            .collect::<Result<Vec<u32>>>()?;
        table
            .insert(key.to_string(), labels)
            .map_err(|m| PipelineError::format(origin, m))?;
    }
    Ok(table)
}

/// Byte-concatenates per-job alignment files into `dest`, like `cat`.
///
/// Concatenated gzip members form a valid multi-member stream.
pub fn concatenate(parts: &[impl AsRef<Path>], dest: &Path) -> Result<()> {
    let mut out = File::create(dest).map_err(|e| PipelineError::io(dest, e))?;
    for part in parts {
        let part = part.as_ref();
        let mut input = File::open(part).map_err(|e| PipelineError::io(part, e))?;
        io::copy(&mut input, &mut out).map_err(|e| PipelineError::io(dest, e))?;
    }
    log::debug!("Concatenated {} alignment files into {}", parts.len(), dest.display());
    Ok(())
}

/// Checks that every file exists before any work starts.
pub fn require_all(parts: &[impl AsRef<Path>]) -> Result<()> {
    for part in parts {
        let part = part.as_ref();
        if !part.is_file() {
            return Err(PipelineError::io(
                part,
                io::Error::new(io::ErrorKind::NotFound, "alignment file missing"),
            ));
        }
    }
    Ok(())
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use std::io::{Cursor, Write};

    fn gzip(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_parse_lines() {
        let table = parse_alignments(Cursor::new("u1 0 0 1 2\nu2 5\n\n"), Path::new("mem")).unwrap();
        assert_eq!(table.get("u1"), Some(&[0, 0, 1, 2][..]));
        assert_eq!(table.get("u2"), Some(&[5][..]));
    }

    #[test]
    fn test_parse_rejects_bad_label() {
        let err = parse_alignments(Cursor::new("u1 0 x\n"), Path::new("mem")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[test]
    fn test_parse_rejects_duplicate_key() {
        let err = parse_alignments(Cursor::new("u1 0\nu1 1\n"), Path::new("mem")).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_load_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdf.1");
        fs::write(&path, "u1 3 4\n").unwrap();
        assert_eq!(load_alignments(&path).unwrap().get("u1"), Some(&[3, 4][..]));
    }

    #[test]
    fn test_concatenated_gzip_jobs_load_as_one_stream() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<_> = (1..=3)
            .map(|job| {
                let path = dir.path().join(format!("pdf.{job}.gz"));
                fs::write(&path, gzip(&format!("u{job} {job} {job}\n"))).unwrap();
                path
            })
            .collect();
        let all = dir.path().join("pdf.all");
        concatenate(&parts, &all).unwrap();

        let table = load_alignments(&all).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("u3"), Some(&[3, 3][..]));
    }

    #[test]
    fn test_require_all_reports_missing_part() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("pdf.1.gz");
        fs::write(&present, gzip("u1 1\n")).unwrap();
        let missing = dir.path().join("pdf.2.gz");
        let err = require_all(&[present, missing.clone()]).unwrap_err();
        assert!(err.to_string().contains(&missing.display().to_string()));
    }
}
