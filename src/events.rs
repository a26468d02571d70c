// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::Episode;

/// Events published by the catalog, the sync engine, the player and the
/// remote control server
#[derive(Debug, Clone)]
pub enum Event {
    /// An episode was added or one of its fields changed
    EpisodeUpdated { episode: Episode },

    /// An episode left the catalog
    EpisodeDeleted { ident: String },

    /// The selection cursor moved
    EpisodeSelected { ident: String },

    /// Stale partial files were removed while loading the library
    PartialFilesCleanedUp { count: usize },

    /// A poll request is being sent to the origin
    PollStarted,

    /// A poll finished. `on_server` is `None` when the poll failed.
    PollFinished { on_server: Option<usize> },

    /// A download is starting
    DownloadStarting {
        ident: String,
        /// 1-based position of this episode in the batch
        index: usize,
        total: usize,
        artist: String,
        title: String,
    },

    /// Download progress update
    DownloadProgress {
        ident: String,
        bytes_downloaded: u64,
        total_bytes: u64,
    },

    /// A download ended, successfully iff `received == expected`
    DownloadFinished {
        ident: String,
        expected: u64,
        received: u64,
    },

    /// A user-visible but non-fatal message
    Notice { message: String },

    /// Playback started or continued
    Playing { ident: String, position_ms: u64 },

    Paused { ident: String, position_ms: u64 },

    Stopped,

    /// A remote control client connected (before authentication)
    ClientConnected { count: usize, addr: SocketAddr },

    ClientDisconnected {
        count: usize,
        addr: SocketAddr,
        authenticated: bool,
    },

    /// Free-form line requested by a remote control client
    Echo { fields: Vec<String> },
}

/// Trait for sinks of catalog and sync events.
///
/// Implementations must not block: events are reported while the catalog
/// lock is held.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: Event);
}

/// A shared reference to an event reporter
pub type SharedEventReporter = Arc<dyn EventReporter>;

/// A reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl EventReporter for NoopReporter {
    fn report(&self, _event: Event) {}
}

impl NoopReporter {
    pub fn shared() -> SharedEventReporter {
        Arc::new(Self)
    }
}

/// Forwards every event to each of its sinks in order
#[derive(Default, Clone)]
pub struct FanoutReporter {
    sinks: Vec<SharedEventReporter>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedEventReporter) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn shared(self) -> SharedEventReporter {
        Arc::new(self)
    }
}

impl EventReporter for FanoutReporter {
    fn report(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.report(event.clone());
            }
            last.report(event);
        }
    }
}

/// Writes events to the log; the sink used when no terminal is watching
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl LogReporter {
    pub fn shared() -> SharedEventReporter {
        Arc::new(Self)
    }
}

impl EventReporter for LogReporter {
    fn report(&self, event: Event) {
        match event {
            Event::PartialFilesCleanedUp { count } => {
                info!("Cleaned up {} partial files", count);
            }
            Event::PollFinished {
                on_server: Some(count),
            } => info!("Poll finished, {} tracks on server", count),
            Event::DownloadStarting {
                ident,
                index,
                total,
                ..
            } => info!("Downloading {} ({}/{})", ident, index, total),
            Event::DownloadFinished {
                ident,
                expected,
                received,
            } if expected != received => {
                warn!("Download of {} ended at {} of {} bytes", ident, received, expected);
            }
            Event::DownloadFinished { ident, .. } => info!("Downloaded {}", ident),
            Event::Notice { message } => warn!("{}", message),
            Event::EpisodeDeleted { ident } => debug!("Track {} deleted", ident),
            Event::ClientConnected { count, addr } => {
                debug!("Client at {} connecting, {} clients", addr, count);
            }
            _ => {}
        }
    }
}
