use std::collections::HashMap;
use std::fs;
use std::io::BufRead;
use std::path::Path;

use crate::shared::error::{PipelineError, Result};

/// Splits a `key value...` line into the key and the (trimmed) remainder.
///
/// Blank lines yield `None`. A key with no value yields an empty remainder.
pub fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.find(char::is_whitespace) {
        Some(pos) => Some((&line[..pos], line[pos..].trim_start())),
        None => Some((line, "")),
    }
}

/// Reads an ordered list of `key value` pairs from any reader.
///
/// `origin` only labels error messages.
pub fn read_pairs_from(reader: impl BufRead, origin: &Path) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PipelineError::io(origin, e))?;
        let Some((key, value)) = split_line(&line) else {
            continue;
        };
        if value.is_empty() {
            return Err(PipelineError::format(
                origin,
                format!("line {}: key '{key}' has no value", lineno + 1),
            ));
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

pub fn read_pairs(path: &Path) -> Result<Vec<(String, String)>> {
    let file = fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    read_pairs_from(std::io::BufReader::new(file), path)
}

/// Reads `key value` pairs into a map, rejecting duplicate keys.
pub fn read_map(path: &Path) -> Result<HashMap<String, String>> {
    let pairs = read_pairs(path)?;
    let mut map = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        if map.contains_key(&key) {
            return Err(PipelineError::format(path, format!("duplicate key '{key}'")));
        }
        map.insert(key, value);
    }
    Ok(map)
}

/// Reads a file holding a single non-negative integer (`maxlength`, `num_pdfs`).
pub fn read_single_integer(path: &Path) -> Result<usize> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    text.trim()
        .parse::<usize>()
        .map_err(|_| PipelineError::format(path, format!("expected an integer, got '{}'", text.trim())))
}

pub fn write_single_integer(path: &Path, value: usize) -> Result<()> {
    fs::write(path, format!("{value}\n")).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case::simple("utt1 spk1", Some(("utt1", "spk1")))]
    #[case::extra_spaces("  utt1\t  spk1  ", Some(("utt1", "spk1")))]
    #[case::multi_value("utt1 3 4 5", Some(("utt1", "3 4 5")))]
    #[case::key_only("utt1", Some(("utt1", "")))]
    #[case::blank("   ", None)]
    fn test_split_line(#[case] line: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(split_line(line), expected);
    }

    #[test]
    fn test_read_pairs_skips_blank_lines() {
        let input = "a 1\n\nb 2\n";
        let pairs = read_pairs_from(Cursor::new(input), Path::new("mem")).unwrap();
        assert_eq!(
            pairs,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_read_pairs_rejects_missing_value() {
        let err = read_pairs_from(Cursor::new("a 1\nb\n"), Path::new("mem")).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_read_map_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utt2spk");
        fs::write(&path, "u1 s1\nu1 s2\n").unwrap();
        assert!(matches!(read_map(&path), Err(PipelineError::Format { .. })));
    }

    #[test]
    fn test_single_integer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maxlength");
        write_single_integer(&path, 1234).unwrap();
        assert_eq!(read_single_integer(&path).unwrap(), 1234);
    }

    #[test]
    fn test_single_integer_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("num_pdfs");
        fs::write(&path, "many\n").unwrap();
        assert!(matches!(read_single_integer(&path), Err(PipelineError::Format { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_pairs(Path::new("/nonexistent/utt2spk")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
