// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod http;
pub mod metadata;
pub mod origin;
pub mod player;
pub mod remote;
pub mod state;
pub mod sync;

// Re-export main types for convenience
pub use catalog::{Catalog, CatalogStore, Episode, UpdateOutcome};
pub use config::Config;
pub use error::{
    CatalogError, ConfigError, DownloadError, LibraryError, PollError, RemoteError, RemoveError,
    SyncError, TagError,
};
pub use events::{
    Event, EventReporter, FanoutReporter, LogReporter, NoopReporter, SharedEventReporter,
};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use metadata::TagRecord;
pub use origin::OriginClient;
pub use player::{NoopPlayer, Player, PlayerRequest, SharedPlayer};
pub use remote::{ClientHub, RemoteServer, RemoteSettings};
pub use state::Library;
pub use sync::{
    NetworkMonitor, SharedHttpClient, StaticNetwork, SyncEngine, SyncOptions, SyncPolicy,
    SyncResult,
};
