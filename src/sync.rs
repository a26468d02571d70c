// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::catalog::{CatalogStore, Episode, UpdateOutcome};
use crate::download::{DownloadContext, download_episode};
use crate::error::{CatalogError, DownloadError, SyncError};
use crate::events::{Event, SharedEventReporter};
use crate::http::HttpClient;
use crate::metadata::TagRecord;
use crate::origin::OriginClient;
use crate::player::{PlayerRequest, SharedPlayer};
use crate::state::Library;

/// Shared handle to the HTTP client the sync engine talks through
pub type SharedHttpClient = Arc<dyn HttpClient>;

/// Reports whether the primary network is usage-metered
pub trait NetworkMonitor: Send + Sync {
    fn is_metered(&self) -> bool;
}

/// A network whose meteredness is fixed by configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticNetwork {
    pub metered: bool,
}

impl NetworkMonitor for StaticNetwork {
    fn is_metered(&self) -> bool {
        self.metered
    }
}

/// Options for one sync run
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Run even when auto-download is off or the network is metered
    pub force: bool,
    /// Maximum number of episodes to download (None = configured default)
    pub limit: Option<usize>,
    /// Download only this episode, after the usual poll; the limit does not
    /// apply
    pub only_ident: Option<String>,
    /// Start playing the first episode downloaded
    pub then_start: bool,
}

/// Standing policy from configuration
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    pub auto_download: bool,
    pub max_downloads: Option<usize>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            auto_download: true,
            max_downloads: None,
        }
    }
}

/// Result of a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// The run was refused by policy before doing anything
    pub skipped: bool,
    /// Episodes offered by the origin, `None` if no poll succeeded
    pub on_server: Option<usize>,
    /// Tag files written for episodes not seen before
    pub new_episodes: usize,
    /// Idents downloaded in this run, in order
    pub downloaded: Vec<String>,
    /// Episodes the batch set out to download
    pub attempted: usize,
}

/// Polls the origin, downloads audio payloads and acknowledges them.
///
/// Only one run executes at a time; a second caller gets
/// [`SyncError::AlreadyRunning`].
pub struct SyncEngine {
    store: Arc<CatalogStore>,
    origin: OriginClient<SharedHttpClient>,
    player: SharedPlayer,
    network: Arc<dyn NetworkMonitor>,
    policy: SyncPolicy,
    running: AtomicBool,
    /// Newest origin timestamp from the last successful poll
    since: Mutex<i64>,
}

/// Clears the running flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<CatalogStore>,
        origin: OriginClient<SharedHttpClient>,
        player: SharedPlayer,
        network: Arc<dyn NetworkMonitor>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            store,
            origin,
            player,
            network,
            policy,
            running: AtomicBool::new(false),
            since: Mutex::new(-1),
        }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn since(&self) -> i64 {
        *self.since.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reporter(&self) -> &SharedEventReporter {
        self.store.reporter()
    }

    /// Downloading is discouraged on a metered network or when
    /// auto-download is off
    pub fn download_discouraged(&self) -> bool {
        if !self.policy.auto_download {
            info!("Auto-download is off");
            return true;
        }
        if self.network.is_metered() {
            info!("Network is metered, download discouraged");
            return true;
        }
        false
    }

    /// Run one sync: poll the origin for new episodes, then download
    /// eligible episodes in display order until the first failure.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncResult, SyncError> {
        let _guard = RunGuard::acquire(&self.running).ok_or(SyncError::AlreadyRunning)?;

        if !options.force && self.download_discouraged() {
            return Ok(SyncResult {
                skipped: true,
                ..Default::default()
            });
        }

        let mut result = SyncResult::default();
        self.poll(&mut result).await?;

        let candidates = match &options.only_ident {
            Some(ident) => {
                let episode = self.store.find_by_ident(ident).ok_or_else(|| {
                    DownloadError::NoSuchEpisode {
                        ident: ident.clone(),
                    }
                })?;
                if episode.downloaded {
                    info!("Track already downloaded: {}", ident);
                    Vec::new()
                } else {
                    vec![episode]
                }
            }
            None => {
                let limit = options.limit.or(self.policy.max_downloads);
                let mut candidates = self.store.downloadable();
                if let Some(limit) = limit {
                    candidates.truncate(limit);
                }
                candidates
            }
        };

        self.download_batch(candidates, options, &mut result).await;
        Ok(result)
    }

    /// Poll and record newly offered episodes. A failed poll is reported and
    /// logged but does not end the run: episodes already known can still be
    /// downloaded.
    async fn poll(&self, result: &mut SyncResult) -> Result<(), SyncError> {
        self.reporter().report(Event::PollStarted);

        let remaining = (!self.store.is_empty()).then(|| self.store.remaining_seconds());
        let since = self.since();

        let response = match self.origin.poll(remaining, since).await {
            Ok(response) => response,
            Err(e) => {
                self.reporter().report(Event::PollFinished { on_server: None });
                if e.is_transient() {
                    info!("Poll failed, will retry: {}", e);
                } else {
                    warn!("Poll failed: {}", e);
                    self.reporter().report(Event::Notice {
                        message: format!("Oops, {e}"),
                    });
                }
                return Ok(());
            }
        };

        let on_server = response.records.len();
        let records = response.records;
        result.new_episodes += self
            .store
            .blocking(move |store| write_new_records(store.library(), &records))
            .await?;

        *self.since.lock().unwrap_or_else(PoisonError::into_inner) = response.newest;
        result.on_server = Some(on_server);
        self.reporter().report(Event::PollFinished {
            on_server: result.on_server,
        });

        self.store
            .blocking(|store| store.refresh().map_err(SyncError::from))
            .await?;
        Ok(())
    }

    async fn download_batch(
        &self,
        candidates: Vec<Episode>,
        options: &SyncOptions,
        result: &mut SyncResult,
    ) {
        let total = candidates.len();
        result.attempted = total;
        let library = self.store.library();

        for (i, episode) in candidates.into_iter().enumerate() {
            if !options.force && self.download_discouraged() {
                break;
            }

            let context = DownloadContext {
                index: i + 1,
                total,
            };
            match download_episode(&self.origin, library, &episode, &context, self.reporter()).await
            {
                Ok(_) => {
                    if self.store.mark_downloaded(&episode.ident) == UpdateOutcome::NoSuchEpisode {
                        self.discard_deleted_download(&episode.ident).await;
                        continue;
                    }
                    if options.then_start && result.downloaded.is_empty() {
                        self.player.request(PlayerRequest::PlayEpisode {
                            ident: episode.ident.clone(),
                            start_ms: episode.resume_ms(),
                        });
                    }
                    if let Err(e) = self.origin.remove(&episode.ident).await {
                        warn!("Not removed from server: {}", e);
                    }
                    result.downloaded.push(episode.ident);
                }
                Err(e) if e.is_transient() => {
                    info!("Download interrupted, will retry: {}", e);
                    break;
                }
                Err(e) => {
                    warn!("Download failed: {}", e);
                    break;
                }
            }
        }

        if result.downloaded.len() < total {
            let message = format!("Downloaded {} of {} tracks", result.downloaded.len(), total);
            info!("{}", message);
            self.reporter().report(Event::Notice { message });
        }
    }

    /// The episode was deleted while its payload was streaming: drop the
    /// installed file, and leave the origin alone since the delete already
    /// told it
    async fn discard_deleted_download(&self, ident: &str) {
        info!("Track {} deleted during download", ident);
        let id = ident.to_string();
        let removed = self
            .store
            .blocking(move |store| {
                store
                    .library()
                    .delete_episode_files(&id)
                    .map_err(CatalogError::from)
            })
            .await;
        if let Err(e) = removed {
            warn!("Failed to remove audio of deleted track {}: {}", ident, e);
        }
    }

    /// Delete an episode. One that was never downloaded is also removed from
    /// the origin, so the next poll does not offer it again.
    pub async fn delete_episode(&self, ident: &str) -> Result<Episode, CatalogError> {
        let episode = self
            .store
            .find_by_ident(ident)
            .ok_or_else(|| CatalogError::NoSuchEpisode {
                ident: ident.to_string(),
            })?;
        let playing = self
            .player
            .is_playing()
            .then(|| self.player.playing_ident())
            .flatten();
        if playing.as_deref() == Some(ident) {
            return Err(CatalogError::EpisodePlaying {
                ident: ident.to_string(),
            });
        }

        if !episode.downloaded
            && let Err(e) = self.origin.remove(ident).await
        {
            warn!("Not removed from server: {}", e);
        }

        let id = ident.to_string();
        self.store
            .blocking(move |store| store.delete_episode(&id, playing.as_deref()))
            .await
    }
}

/// Write tag files for records the library does not have yet, returning how
/// many were new
fn write_new_records(library: &Library, records: &[TagRecord]) -> Result<usize, SyncError> {
    let mut added = 0;
    for record in records {
        if !is_safe_ident(&record.ident) {
            warn!("Rejecting unsafe ident |{}|", record.ident);
            continue;
        }
        if library.write_tags(record, false)? {
            info!("New track {}", record.ident);
            added += 1;
        }
    }
    Ok(added)
}

/// Idents become file names, so anything a file system would mangle is
/// refused
fn is_safe_ident(ident: &str) -> bool {
    !ident.is_empty() && !ident.starts_with('.') && sanitize_filename::sanitize(ident) == ident
}
