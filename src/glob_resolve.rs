//! Glob resolver: expands a single segment path into the full ordered
//! segment set. Deterministic, naming-schema-aware enumeration that stops
//! at the first missing segment rather than returning whatever the
//! filesystem happens to contain. Whether a short enumeration represents
//! a genuinely complete image or a missing segment is not decidable from
//! file existence alone — that's settled one layer up, by checking
//! whether the last enumerated segment's own trailing section is `done`
//! or `next`.
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};
use crate::format::NamingSchema;

/// Enumerates `.E01`, `.E02`, … starting from `seed_path` by construction
/// rather than directory listing, stopping at the first missing segment.
/// The schema (case, `E`/`S` prefix) is inferred from `seed_path`'s own
/// extension.
pub fn enumerate_from_seed(seed_path: &Path) -> Result<Vec<PathBuf>> {
    let ext = seed_path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "segment path has no extension"))?;
    let schema = NamingSchema::from_extension(ext)
        .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, format!("unrecognized segment extension: {}", ext)))?;

    let mut paths = Vec::new();
    let mut segment_number: u16 = 1;
    loop {
        let candidate_ext = schema.extension(segment_number)?;
        let mut candidate = seed_path.to_path_buf();
        candidate.set_extension(candidate_ext);
        if !candidate.exists() {
            if segment_number == 1 {
                return Err(Error::not_found(1));
            }
            break;
        }
        paths.push(candidate);
        segment_number = segment_number.checked_add(1).ok_or_else(|| {
            Error::new(ErrorKind::OutOfBounds, "segment number exceeds the naming schema range")
        })?;
    }
    Ok(paths)
}

/// Secondary discovery path: widen the seed path's final two characters
/// into a glob pattern and collect whatever matches, sorted
/// lexicographically. Useful for diagnosing a set whose numbering isn't
/// perfectly contiguous; [`enumerate_from_seed`] is the one the Handle
/// façade actually opens with.
pub fn discover_siblings(seed_path: &Path) -> Result<Vec<PathBuf>> {
    let canonical = seed_path
        .canonicalize()
        .map_err(|e| Error::with_source(ErrorKind::NotFound, "seed segment path does not exist", e))?;
    let filename = canonical
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "seed path has no file name"))?;

    if filename.len() < 2 {
        return Err(Error::new(ErrorKind::InvalidArgument, "file name too short to widen into a glob pattern"));
    }
    let base = &filename[..filename.len() - 2];
    let parent = canonical
        .parent()
        .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "seed path has no parent directory"))?;

    let mut pattern_path = PathBuf::from(parent);
    pattern_path.push(format!("{}??", base));
    let pattern = pattern_path
        .to_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "seed path is not valid UTF-8"))?;

    let matches = glob::glob(pattern)
        .map_err(|e| Error::with_source(ErrorKind::InvalidArgument, "invalid glob pattern", e))?;
    let mut paths: Vec<PathBuf> = matches.filter_map(std::result::Result::ok).collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_contiguous_segments() {
        let dir = tempfile::tempdir().unwrap();
        for ext in ["E01", "E02", "E03"] {
            std::fs::write(dir.path().join(format!("img.{}", ext)), b"").unwrap();
        }
        let paths = enumerate_from_seed(&dir.path().join("img.E01")).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths[2].ends_with("img.E03"));
    }

    #[test]
    fn stops_at_first_missing_segment() {
        let dir = tempfile::tempdir().unwrap();
        for ext in ["E01", "E03"] {
            std::fs::write(dir.path().join(format!("img.{}", ext)), b"").unwrap();
        }
        let paths = enumerate_from_seed(&dir.path().join("img.E01")).unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn fails_if_seed_itself_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = enumerate_from_seed(&dir.path().join("img.E01"));
        assert!(result.is_err());
    }

    #[test]
    fn discovers_via_glob_pattern() {
        let dir = tempfile::tempdir().unwrap();
        for ext in ["E01", "E02"] {
            std::fs::write(dir.path().join(format!("img.{}", ext)), b"").unwrap();
        }
        let paths = discover_siblings(&dir.path().join("img.E01")).unwrap();
        assert_eq!(paths.len(), 2);
    }
}
