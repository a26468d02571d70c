// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when decoding a tag record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("Tag record has no '{field}' field")]
    MissingField { field: &'static str },

    #[error("Invalid number '{value}' in '{field}' field")]
    InvalidNumber { field: &'static str, value: String },
}

/// Errors that can occur when reading or writing the library folder
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tag file {path}: {source}")]
    InvalidTagFile {
        path: PathBuf,
        #[source]
        source: TagError,
    },
}

/// Errors reported by catalog operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("No such track: {ident}")]
    NoSuchEpisode { ident: String },

    #[error("Track is playing: {ident}")]
    EpisodePlaying { ident: String },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Catalog task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Errors that can occur while polling the origin for new episodes
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Poll request failed: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },

    #[error("Poll request returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Wrong content type: {}", content_type.as_deref().unwrap_or("(none)"))]
    WrongContentType { content_type: Option<String> },

    #[error("Poll response is not valid UTF-8")]
    NotUtf8,

    #[error("Poll response has no OK line")]
    MissingSentinel,

    #[error("Poll response has an empty tag block at line {line_number}")]
    EmptyBlock { line_number: usize },

    #[error("Poll response has extra output after OK: {line}")]
    TrailingData { line: String },

    #[error("Invalid cursor '{value}' in OK line")]
    InvalidCursor { value: String },

    #[error("Invalid tag record in poll response: {0}")]
    InvalidRecord(#[from] TagError),
}

impl PollError {
    /// True for failures that are expected to clear up on the next run
    /// (unresolvable host, refused connection, timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            _ => false,
        }
    }
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("No such track: {ident}")]
    NoSuchEpisode { ident: String },

    #[error("HTTP request failed for {ident}: {source}")]
    HttpFailed {
        ident: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {ident}")]
    HttpStatus { ident: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {ident}: {source}")]
    StreamFailed {
        ident: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Downloaded {received} bytes, expected {expected} for {ident}")]
    SizeMismatch {
        ident: String,
        expected: u64,
        received: u64,
    },

    #[error("Failed to install download: {0}")]
    Install(#[from] LibraryError),
}

impl DownloadError {
    /// True for failures that are expected to clear up on the next run
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpFailed { source, .. } | Self::StreamFailed { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_body()
            }
            _ => false,
        }
    }
}

/// Errors that can occur when acknowledging a download back to the origin
#[derive(Error, Debug)]
pub enum RemoveError {
    #[error("Remove request failed for {ident}: {source}")]
    Transport {
        ident: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} removing {ident}")]
    HttpStatus { ident: String, status: u16 },

    #[error("Origin did not acknowledge removal of {ident}")]
    NotAcknowledged { ident: String },
}

/// Top-level errors for sync runs
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Poll error: {0}")]
    Poll(#[from] PollError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Sync task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Errors raised by the remote control listener
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Failed to bind remote control socket {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote control I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Failed to read config {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
