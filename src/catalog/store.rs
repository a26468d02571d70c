// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinError;

use tracing::{debug, info, warn};

use super::episode::Episode;
use super::list::{Catalog, UpdateOutcome};
use crate::error::{CatalogError, LibraryError};
use crate::events::{Event, SharedEventReporter};
use crate::state::{BUILD_STAMP, Library, Snapshot};

/// Changes applied by one directory reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

/// The shared catalog: the in-memory episode list behind one lock, backed by
/// the library folder, publishing an event for every change.
///
/// Every method takes the lock for its whole duration, so callers never
/// observe a half-applied mutation.
pub struct CatalogStore {
    catalog: Mutex<Catalog>,
    library: Library,
    reporter: SharedEventReporter,
}

impl CatalogStore {
    /// An empty store over `library`. Use [`CatalogStore::load`] to populate
    /// it from disk.
    pub fn new(library: Library, reporter: SharedEventReporter) -> Self {
        Self {
            catalog: Mutex::new(Catalog::new()),
            library,
            reporter,
        }
    }

    /// Populate a store from the library folder: clean up after an interrupted
    /// run, reconcile with the tag and audio files, then restore offsets and
    /// selection from the snapshot.
    pub fn load(library: Library, reporter: SharedEventReporter) -> Result<Self, LibraryError> {
        let cleaned = library.clean_partial_files()?;
        if cleaned > 0 {
            info!("Removed {} stale partial files", cleaned);
            reporter.report(Event::PartialFilesCleanedUp { count: cleaned });
        }
        library.remove_orphan_audio()?;

        let store = Self::new(library, reporter);
        let summary = store.refresh()?;

        match store.library.read_snapshot()? {
            Some(snapshot) => store.apply_snapshot(snapshot),
            None => debug!("No state file in {}", store.library.dir().display()),
        }

        info!("Loaded {} tracks", summary.added);
        Ok(store)
    }

    fn apply_snapshot(&self, snapshot: Snapshot) {
        if snapshot.build_stamp != BUILD_STAMP {
            warn!(
                "State file written by build {}, this is {}",
                snapshot.build_stamp, BUILD_STAMP
            );
        }

        let mut catalog = self.lock();
        for (ident, current_ms) in snapshot.offsets {
            match catalog.find_by_ident_mut(&ident) {
                Some(episode) => episode.current_ms = current_ms.min(episode.duration_ms),
                None => debug!("Offset for unknown track {}", ident),
            }
        }
        if let Some(ident) = snapshot.selected {
            catalog.select(&ident);
        }
    }

    /// Run `f` on the blocking thread pool. Mutations write tag files and
    /// the snapshot, so async callers go through here.
    pub async fn blocking<T, E, F>(self: &Arc<Self>, f: F) -> Result<T, E>
    where
        F: FnOnce(&CatalogStore) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<JoinError> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn reporter(&self) -> &SharedEventReporter {
        &self.reporter
    }

    /// Run `f` against the catalog while holding the lock
    pub fn with_catalog<R>(&self, f: impl FnOnce(&Catalog) -> R) -> R {
        f(&self.lock())
    }

    /// Copy of every episode in display order
    pub fn episodes(&self) -> Vec<Episode> {
        self.lock().episodes().to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn find_by_ident(&self, ident: &str) -> Option<Episode> {
        self.lock().find_by_ident(ident).cloned()
    }

    pub fn selected(&self) -> Option<Episode> {
        self.lock().selected().cloned()
    }

    pub fn pick_first_playable(&self) -> Option<Episode> {
        self.lock().pick_first_playable().cloned()
    }

    pub fn pick_next_playable(&self) -> Option<Episode> {
        self.lock().pick_next_playable().cloned()
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.lock().remaining_seconds()
    }

    pub fn downloadable(&self) -> Vec<Episode> {
        self.lock().downloadable()
    }

    pub fn priority_classes(&self) -> Vec<char> {
        self.lock().priority_classes()
    }

    /// Reconcile the catalog with the library folder.
    ///
    /// Episodes whose tag file appeared are added, episodes whose tag file
    /// vanished are dropped, and `downloaded` is set to match the presence
    /// of the audio file.
    pub fn refresh(&self) -> Result<RefreshSummary, LibraryError> {
        let mut catalog = self.lock();
        let scan = self.library.scan()?;
        let mut summary = RefreshSummary::default();

        let on_disk: HashSet<&str> = scan.tag_idents.iter().map(String::as_str).collect();
        let vanished: Vec<String> = catalog
            .episodes()
            .iter()
            .filter(|e| !on_disk.contains(e.ident.as_str()))
            .map(|e| e.ident.clone())
            .collect();
        for ident in vanished {
            debug!("Tag file of {} vanished", ident);
            self.remove_locked(&mut catalog, &ident);
            summary.removed += 1;
        }

        for ident in &scan.tag_idents {
            let downloaded = scan.audio_idents.contains(ident);

            if let Some(episode) = catalog.find_by_ident_mut(ident) {
                if episode.downloaded != downloaded {
                    episode.downloaded = downloaded;
                    let episode = episode.clone();
                    self.reporter.report(Event::EpisodeUpdated { episode });
                    summary.changed += 1;
                }
                continue;
            }

            let tags = match self.library.read_tags(ident) {
                Ok(tags) => tags,
                Err(e) => {
                    warn!("Skipping {}: {}", ident, e);
                    continue;
                }
            };
            let episode = Episode::from_tags(tags, downloaded);
            if catalog.insert(episode.clone()) {
                self.reporter.report(Event::EpisodeUpdated { episode });
                summary.added += 1;
            }
        }

        if summary != RefreshSummary::default() {
            debug!("Refresh: {:?}", summary);
        }
        Ok(summary)
    }

    /// Remove `ident` from the in-memory catalog, reporting the deletion and
    /// any resulting cursor move
    fn remove_locked(&self, catalog: &mut Catalog, ident: &str) -> Option<Episode> {
        let was_selected = catalog.selected_ident() == Some(ident);
        let removed = catalog.remove(ident)?;
        self.reporter.report(Event::EpisodeDeleted {
            ident: ident.to_string(),
        });
        if was_selected && let Some(next) = catalog.selected_ident() {
            self.reporter.report(Event::EpisodeSelected {
                ident: next.to_string(),
            });
        }
        Some(removed)
    }

    /// Move the cursor. Returns `false` if the ident is unknown or already
    /// selected.
    pub fn select(&self, ident: &str) -> Result<bool, LibraryError> {
        let mut catalog = self.lock();
        if !catalog.select(ident) {
            return Ok(false);
        }
        self.reporter.report(Event::EpisodeSelected {
            ident: ident.to_string(),
        });
        self.write_snapshot(&catalog)?;
        Ok(true)
    }

    /// Record that an episode's audio payload has been installed
    pub fn mark_downloaded(&self, ident: &str) -> UpdateOutcome {
        let mut catalog = self.lock();
        let Some(episode) = catalog.find_by_ident_mut(ident) else {
            return UpdateOutcome::NoSuchEpisode;
        };
        if episode.downloaded {
            return UpdateOutcome::Unchanged;
        }
        episode.downloaded = true;
        let episode = episode.clone();
        self.reporter.report(Event::EpisodeUpdated { episode });
        UpdateOutcome::Updated
    }

    pub fn set_priority(&self, ident: &str, priority: &str) -> Result<UpdateOutcome, CatalogError> {
        let mut catalog = self.lock();
        let outcome = catalog.reprioritize(ident, priority);
        if outcome == UpdateOutcome::Updated {
            self.persist_tags_locked(&catalog, ident)?;
        }
        Ok(outcome)
    }

    /// Set the display title; an empty title falls back to the ident
    pub fn set_title(&self, ident: &str, title: &str) -> Result<UpdateOutcome, CatalogError> {
        self.update_tags(ident, |episode| {
            let title = if title.is_empty() { ident } else { title };
            replace_if_different(&mut episode.title, title)
        })
    }

    pub fn set_artist(&self, ident: &str, artist: &str) -> Result<UpdateOutcome, CatalogError> {
        self.update_tags(ident, |episode| {
            replace_if_different(&mut episode.artist, artist)
        })
    }

    /// Set the emoji marker; an empty string clears it
    pub fn set_emoji(&self, ident: &str, emoji: &str) -> Result<UpdateOutcome, CatalogError> {
        self.update_tags(ident, |episode| {
            let emoji = (!emoji.is_empty()).then(|| emoji.to_string());
            if episode.emoji == emoji {
                return false;
            }
            episode.emoji = emoji;
            true
        })
    }

    /// Apply `apply` to one episode and persist its tag file if it reports a
    /// change
    fn update_tags<F>(&self, ident: &str, apply: F) -> Result<UpdateOutcome, CatalogError>
    where
        F: FnOnce(&mut Episode) -> bool,
    {
        let mut catalog = self.lock();
        let Some(episode) = catalog.find_by_ident_mut(ident) else {
            return Ok(UpdateOutcome::NoSuchEpisode);
        };
        if !apply(episode) {
            return Ok(UpdateOutcome::Unchanged);
        }
        self.persist_tags_locked(&catalog, ident)?;
        Ok(UpdateOutcome::Updated)
    }

    fn persist_tags_locked(&self, catalog: &Catalog, ident: &str) -> Result<(), CatalogError> {
        let Some(episode) = catalog.find_by_ident(ident) else {
            return Ok(());
        };
        self.library.write_tags(&episode.to_tags(), true)?;
        self.reporter.report(Event::EpisodeUpdated {
            episode: episode.clone(),
        });
        Ok(())
    }

    /// Move an episode into the pinned group; see [`Catalog::move_to_top`]
    pub fn move_to_top(&self, ident: &str) -> Result<UpdateOutcome, CatalogError> {
        let mut catalog = self.lock();
        let Some(changed) = catalog.move_to_top(ident) else {
            return Ok(UpdateOutcome::NoSuchEpisode);
        };
        if changed.is_empty() {
            return Ok(UpdateOutcome::Unchanged);
        }
        for changed_ident in &changed {
            self.persist_tags_locked(&catalog, changed_ident)?;
        }
        Ok(UpdateOutcome::Updated)
    }

    /// Set the playback offset of an episode that is not playing, clamped to
    /// its duration, and persist the snapshot
    pub fn seek(&self, ident: &str, position_ms: u64) -> Result<UpdateOutcome, CatalogError> {
        let mut catalog = self.lock();
        let outcome = self.set_position_locked(&mut catalog, ident, position_ms);
        if outcome == UpdateOutcome::Updated {
            self.write_snapshot(&catalog)?;
        }
        Ok(outcome)
    }

    /// Playback progress reported by the player. Only kept in memory until
    /// the next [`CatalogStore::save_snapshot`].
    pub fn record_position(&self, ident: &str, position_ms: u64) -> UpdateOutcome {
        let mut catalog = self.lock();
        self.set_position_locked(&mut catalog, ident, position_ms)
    }

    pub fn rewind(&self, ident: &str) -> Result<UpdateOutcome, CatalogError> {
        self.seek(ident, 0)
    }

    fn set_position_locked(
        &self,
        catalog: &mut Catalog,
        ident: &str,
        position_ms: u64,
    ) -> UpdateOutcome {
        let Some(episode) = catalog.find_by_ident_mut(ident) else {
            return UpdateOutcome::NoSuchEpisode;
        };
        let position_ms = position_ms.min(episode.duration_ms);
        if episode.current_ms == position_ms {
            return UpdateOutcome::Unchanged;
        }
        episode.current_ms = position_ms;
        let episode = episode.clone();
        self.reporter.report(Event::EpisodeUpdated { episode });
        UpdateOutcome::Updated
    }

    /// Delete one episode and both of its files.
    ///
    /// Refused for the episode the player is on.
    pub fn delete_episode(
        &self,
        ident: &str,
        playing: Option<&str>,
    ) -> Result<Episode, CatalogError> {
        if playing == Some(ident) {
            return Err(CatalogError::EpisodePlaying {
                ident: ident.to_string(),
            });
        }

        let mut catalog = self.lock();
        if catalog.find_by_ident(ident).is_none() {
            return Err(CatalogError::NoSuchEpisode {
                ident: ident.to_string(),
            });
        }

        self.library.delete_episode_files(ident)?;
        let removed = self
            .remove_locked(&mut catalog, ident)
            .ok_or_else(|| CatalogError::NoSuchEpisode {
                ident: ident.to_string(),
            })?;
        info!("Deleted {}", ident);
        self.write_snapshot(&catalog)?;
        Ok(removed)
    }

    /// Delete every finished episode not carrying the keep marker.
    ///
    /// Returns how many were removed. An episode whose files cannot be
    /// deleted stays in the catalog and is logged.
    pub fn delete_finished(&self) -> Result<usize, CatalogError> {
        let mut catalog = self.lock();
        let mut deleted = 0;

        for ident in catalog.finished_deletable() {
            if let Err(e) = self.library.delete_episode_files(&ident) {
                warn!("Failed to delete finished track {}: {}", ident, e);
                continue;
            }
            if self.remove_locked(&mut catalog, &ident).is_some() {
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!("Deleted {} finished tracks", deleted);
            self.write_snapshot(&catalog)?;
        }
        Ok(deleted)
    }

    /// Persist selection and offsets
    pub fn save_snapshot(&self) -> Result<(), LibraryError> {
        let catalog = self.lock();
        self.write_snapshot(&catalog)
    }

    fn write_snapshot(&self, catalog: &Catalog) -> Result<(), LibraryError> {
        self.library.write_snapshot(&Snapshot {
            selected: catalog.selected_ident().map(String::from),
            build_stamp: BUILD_STAMP.to_string(),
            offsets: catalog.offsets(),
        })
    }
}

fn replace_if_different(field: &mut String, value: &str) -> bool {
    if field == value {
        return false;
    }
    *field = value.to_string();
    true
}
