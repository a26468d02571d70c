// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::LibraryError;
use crate::metadata::TagRecord;
use crate::state::write_atomically;

/// Read a `.tag` file.
///
/// `ident` is the ident implied by the file name. When the `id` field inside
/// the file disagrees, a warning is logged and the file name wins.
pub fn read_tag_file(path: &Path, ident: &str) -> Result<TagRecord, LibraryError> {
    let content = std::fs::read_to_string(path).map_err(|e| LibraryError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut record =
        TagRecord::decode_str(&content).map_err(|e| LibraryError::InvalidTagFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    if record.ident != ident {
        warn!("Ident mismatch {} != {}", record.ident, ident);
        record.ident = ident.to_string();
    }

    Ok(record)
}

/// Write a `.tag` file atomically.
///
/// Returns `false` without touching the file when it already exists and
/// `overwrite` is not set.
pub fn write_tag_file(
    path: &Path,
    record: &TagRecord,
    overwrite: bool,
) -> Result<bool, LibraryError> {
    if !overwrite && path.exists() {
        debug!("Not overwriting {}", path.display());
        return Ok(false);
    }

    write_atomically(path, record.encode().as_bytes())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_record(ident: &str) -> TagRecord {
        TagRecord {
            ident: ident.to_string(),
            priority: "F0001".to_string(),
            duration_ms: 60_000,
            title: "Test Episode".to_string(),
            artist: "Test Show".to_string(),
            size: 1234,
            when: 1_700_000_000,
            quiet: vec![],
            emoji: None,
            feed_url: None,
            track_url: None,
        }
    }

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ep-1.tag");
        let record = make_record("ep-1");

        assert!(write_tag_file(&path, &record, false).unwrap());
        let read_back = read_tag_file(&path, "ep-1").unwrap();

        assert_eq!(read_back, record);
    }

    #[test]
    fn write_without_overwrite_keeps_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ep-1.tag");
        write_tag_file(&path, &make_record("ep-1"), false).unwrap();

        let mut changed = make_record("ep-1");
        changed.title = "Changed".to_string();

        assert!(!write_tag_file(&path, &changed, false).unwrap());
        assert_eq!(read_tag_file(&path, "ep-1").unwrap().title, "Test Episode");

        assert!(write_tag_file(&path, &changed, true).unwrap());
        assert_eq!(read_tag_file(&path, "ep-1").unwrap().title, "Changed");
    }

    #[test]
    fn file_name_wins_over_id_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("renamed.tag");
        write_tag_file(&path, &make_record("original"), false).unwrap();

        let record = read_tag_file(&path, "renamed").unwrap();
        assert_eq!(record.ident, "renamed");
    }

    #[test]
    fn read_nonexistent_returns_error() {
        let dir = tempdir().unwrap();
        let result = read_tag_file(&dir.path().join("missing.tag"), "missing");
        assert!(matches!(result, Err(LibraryError::ReadFailed { .. })));
    }

    #[test]
    fn read_incomplete_file_returns_tag_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.tag");
        std::fs::write(&path, "id\tbroken\ntitle\tNo priority\n").unwrap();

        let result = read_tag_file(&path, "broken");
        assert!(matches!(result, Err(LibraryError::InvalidTagFile { .. })));
    }
}
