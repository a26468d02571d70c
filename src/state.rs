// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::LibraryError;
use crate::metadata::{TagRecord, read_tag_file, write_tag_file};

/// Name of the snapshot file inside the library folder
pub const SNAPSHOT_FILE_NAME: &str = "_state.txt";

const TAG_EXTENSION: &str = "tag";
const AUDIO_EXTENSION: &str = "mp3";
const PARTIAL_SUFFIX: &str = ".partial";
const TEMP_SUFFIX: &str = ".tmp";

/// Stamp written into the snapshot so a downgrade can be noticed
pub const BUILD_STAMP: &str = env!("CARGO_PKG_VERSION");

/// The on-disk library folder: one `.tag` file and (once downloaded) one
/// `.mp3` file per episode, plus the `_state.txt` snapshot.
#[derive(Debug, Clone)]
pub struct Library {
    dir: PathBuf,
}

/// Result of scanning the library folder
#[derive(Debug, Clone, Default)]
pub struct LibraryScan {
    /// Idents with a tag file, sorted
    pub tag_idents: Vec<String>,
    /// Idents with an installed audio file
    pub audio_idents: HashSet<String>,
}

/// Selection and playback offsets persisted across restarts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub selected: Option<String>,
    pub build_stamp: String,
    /// `(ident, current_ms)` for every episode with a nonzero offset
    pub offsets: Vec<(String, u64)>,
}

impl Library {
    /// Open the library folder, creating it when it does not exist yet
    pub fn open(dir: &Path) -> Result<Self, LibraryError> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| LibraryError::CreateDirectoryFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tag_path(&self, ident: &str) -> PathBuf {
        self.dir.join(format!("{ident}.{TAG_EXTENSION}"))
    }

    pub fn audio_path(&self, ident: &str) -> PathBuf {
        self.dir.join(format!("{ident}.{AUDIO_EXTENSION}"))
    }

    /// Where an in-flight download is streamed before it is renamed into place
    pub fn partial_path(&self, ident: &str) -> PathBuf {
        self.dir
            .join(format!("{ident}.{AUDIO_EXTENSION}{PARTIAL_SUFFIX}"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    pub fn has_tags(&self, ident: &str) -> bool {
        self.tag_path(ident).exists()
    }

    pub fn has_audio(&self, ident: &str) -> bool {
        self.audio_path(ident).exists()
    }

    pub fn read_tags(&self, ident: &str) -> Result<TagRecord, LibraryError> {
        read_tag_file(&self.tag_path(ident), ident)
    }

    /// Write a tag file; returns whether anything was written
    pub fn write_tags(&self, record: &TagRecord, overwrite: bool) -> Result<bool, LibraryError> {
        write_tag_file(&self.tag_path(&record.ident), record, overwrite)
    }

    /// Move a completed download into its final place
    pub fn install_audio(&self, ident: &str) -> Result<(), LibraryError> {
        let from = self.partial_path(ident);
        let to = self.audio_path(ident);
        std::fs::rename(&from, &to).map_err(|e| LibraryError::RenameFailed {
            from: from.clone(),
            to: to.clone(),
            source: e,
        })?;
        debug!("Renamed {} to {}", from.display(), to.display());
        Ok(())
    }

    /// Delete the audio and tag files of an episode.
    ///
    /// Files that are already gone are not an error.
    pub fn delete_episode_files(&self, ident: &str) -> Result<(), LibraryError> {
        remove_if_exists(&self.audio_path(ident))?;
        remove_if_exists(&self.tag_path(ident))
    }

    /// Remove a partial download, if any
    pub fn discard_partial(&self, ident: &str) -> Result<(), LibraryError> {
        remove_if_exists(&self.partial_path(ident))
    }

    /// Scan the folder for tag and audio files
    pub fn scan(&self) -> Result<LibraryScan, LibraryError> {
        let mut scan = LibraryScan::default();

        for path in self.entries()? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(ident) = filename.strip_suffix(&format!(".{TAG_EXTENSION}")) {
                scan.tag_idents.push(ident.to_string());
            } else if let Some(ident) = filename.strip_suffix(&format!(".{AUDIO_EXTENSION}")) {
                scan.audio_idents.insert(ident.to_string());
            }
        }

        scan.tag_idents.sort();
        Ok(scan)
    }

    /// Remove partial downloads and temporary files left behind by an
    /// interrupted run. Only safe while no sync run is active.
    pub fn clean_partial_files(&self) -> Result<usize, LibraryError> {
        let mut cleaned = 0;
        for path in self.entries()? {
            let is_leftover = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX) || n.ends_with(TEMP_SUFFIX));
            if is_leftover && std::fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Delete audio files whose tag file is gone, e.g. a download that was
    /// installed after its episode had been deleted. Returns their idents.
    pub fn remove_orphan_audio(&self) -> Result<Vec<String>, LibraryError> {
        let scan = self.scan()?;
        let mut orphans: Vec<String> = scan
            .audio_idents
            .into_iter()
            .filter(|ident| !scan.tag_idents.contains(ident))
            .collect();
        orphans.sort();

        for ident in &orphans {
            warn!("Removing audio without tags: {}", ident);
            remove_if_exists(&self.audio_path(ident))?;
        }
        Ok(orphans)
    }

    fn entries(&self) -> Result<Vec<PathBuf>, LibraryError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| LibraryError::ReadDirectoryFailed {
            path: self.dir.clone(),
            source: e,
        })?;

        entries
            .map(|entry| {
                entry.map(|e| e.path()).map_err(|e| LibraryError::ReadDirectoryFailed {
                    path: self.dir.clone(),
                    source: e,
                })
            })
            .collect()
    }

    /// Read the snapshot; `None` when it has never been written
    pub fn read_snapshot(&self) -> Result<Option<Snapshot>, LibraryError> {
        let path = self.snapshot_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(Snapshot::decode(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LibraryError::ReadFailed { path, source: e }),
        }
    }

    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), LibraryError> {
        write_atomically(&self.snapshot_path(), snapshot.encode().as_bytes())
    }
}

impl Snapshot {
    /// Encode as `<selected>\t<stamp>` followed by `<ident>\t<ms>` lines
    pub fn encode(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}\t{}",
            self.selected.as_deref().unwrap_or(""),
            self.build_stamp
        );
        for (ident, current_ms) in &self.offsets {
            let _ = writeln!(out, "{ident}\t{current_ms}");
        }
        out
    }

    /// Decode a snapshot. Malformed offset lines are logged and skipped.
    pub fn decode(text: &str) -> Self {
        let mut lines = text.lines();

        let (selected, build_stamp) = match lines.next() {
            Some(first) => {
                let mut fields = first.split('\t');
                let selected = fields.next().filter(|s| !s.is_empty()).map(String::from);
                let stamp = fields.next().unwrap_or("").to_string();
                if fields.next().is_some() {
                    warn!("Extra fields in first line of state file: {}", first);
                }
                (selected, stamp)
            }
            None => (None, String::new()),
        };

        let mut offsets = Vec::new();
        for line in lines {
            let fields: Vec<&str> = line.split('\t').collect();
            let [ident, ms] = fields.as_slice() else {
                warn!("Wrong number of columns {} in |{}|", fields.len(), line);
                continue;
            };
            match ms.parse::<u64>() {
                Ok(ms) => offsets.push((ident.to_string(), ms)),
                Err(_) => warn!("Invalid offset in state file line |{}|", line),
            }
        }

        Self {
            selected,
            build_stamp,
            offsets,
        }
    }
}

/// Write `contents` to `path` via a temporary file and a rename, so readers
/// only ever see the old or the new complete file.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), LibraryError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(TEMP_SUFFIX);
    let tmp = PathBuf::from(tmp_name);

    std::fs::write(&tmp, contents).map_err(|e| LibraryError::WriteFailed {
        path: tmp.clone(),
        source: e,
    })?;

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        LibraryError::RenameFailed {
            from: tmp.clone(),
            to: path.to_path_buf(),
            source: e,
        }
    })
}

fn remove_if_exists(path: &Path) -> Result<(), LibraryError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LibraryError::DeleteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
