// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;

use tracing::{debug, info, warn};

use super::episode::{Episode, PINNED_CLASS};

/// Result of a catalog mutation addressed by ident
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    NoSuchEpisode,
    Unchanged,
    Updated,
}

/// The ordered episode list plus the selection cursor.
///
/// Episodes are kept sorted by `(priority, ident)`. The cursor is stored as
/// an ident so it follows its episode through every re-sort.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    episodes: Vec<Episode>,
    selected: Option<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn find_by_ident(&self, ident: &str) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.ident == ident)
    }

    pub(crate) fn find_by_ident_mut(&mut self, ident: &str) -> Option<&mut Episode> {
        self.episodes.iter_mut().find(|e| e.ident == ident)
    }

    pub fn position_of(&self, ident: &str) -> Option<usize> {
        self.episodes.iter().position(|e| e.ident == ident)
    }

    pub fn selected(&self) -> Option<&Episode> {
        self.selected
            .as_deref()
            .and_then(|ident| self.find_by_ident(ident))
    }

    pub fn selected_ident(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Move the cursor to `ident`. Returns whether the selection changed;
    /// an unknown ident leaves the cursor alone.
    pub fn select(&mut self, ident: &str) -> bool {
        if self.find_by_ident(ident).is_none() {
            warn!("select: no such track {}", ident);
            return false;
        }
        if self.selected.as_deref() == Some(ident) {
            return false;
        }
        info!(
            "select: {} -> {}",
            self.selected.as_deref().unwrap_or("(none)"),
            ident
        );
        self.selected = Some(ident.to_string());
        true
    }

    /// First episode in display order that is downloaded and unfinished
    pub fn pick_first_playable(&self) -> Option<&Episode> {
        let found = self.episodes.iter().find(|e| e.is_playable());
        if found.is_none() {
            debug!("pick_first_playable - none");
        }
        found
    }

    /// Scan forward from the cursor, wrapping around once, for an episode
    /// that is downloaded and unfinished. The cursor's own episode is the
    /// last candidate considered.
    pub fn pick_next_playable(&self) -> Option<&Episode> {
        let n = self.episodes.len();
        let start = self
            .selected
            .as_deref()
            .and_then(|ident| self.position_of(ident))
            .map_or(0, |i| i + 1);

        let found = (0..n)
            .map(|offset| &self.episodes[(start + offset) % n])
            .find(|e| e.is_playable());
        if found.is_none() {
            debug!("pick_next_playable - none");
        }
        found
    }

    /// Insert keeping display order. Returns `false` if the ident is
    /// already present.
    pub fn insert(&mut self, episode: Episode) -> bool {
        if self.find_by_ident(&episode.ident).is_some() {
            warn!("insert: duplicate track {}", episode.ident);
            return false;
        }

        let index = self
            .episodes
            .iter()
            .position(|e| episode.display_order(e) != Ordering::Greater)
            .unwrap_or(self.episodes.len());
        self.episodes.insert(index, episode);
        true
    }

    /// Remove an episode. If it was selected, the cursor moves to the episode
    /// that takes its place (or the new last one).
    pub fn remove(&mut self, ident: &str) -> Option<Episode> {
        let index = self.position_of(ident)?;
        let removed = self.episodes.remove(index);

        if self.selected.as_deref() == Some(ident) {
            self.selected = self
                .episodes
                .get(index)
                .or_else(|| self.episodes.last())
                .map(|e| e.ident.clone());
            info!(
                "Removed selected track {}, now {}",
                ident,
                self.selected.as_deref().unwrap_or("(none)")
            );
        }

        Some(removed)
    }

    /// Restore display order after priorities changed
    pub fn sort(&mut self) {
        self.episodes.sort_by(|a, b| a.display_order(b));
    }

    pub fn reprioritize(&mut self, ident: &str, priority: &str) -> UpdateOutcome {
        let Some(episode) = self.find_by_ident_mut(ident) else {
            return UpdateOutcome::NoSuchEpisode;
        };
        if episode.priority == priority {
            return UpdateOutcome::Unchanged;
        }

        info!(
            "reprioritize: {} -> {} for {}",
            episode.priority, priority, ident
        );
        episode.priority = priority.to_string();
        self.sort();
        UpdateOutcome::Updated
    }

    /// Move an episode to the pinned group at the top of the catalog.
    ///
    /// An episode already in the pinned group goes to the very top: the rest
    /// of the group is renumbered `=0001..` in its current order and the
    /// target becomes `=0000`. Any other episode joins the group with ordinal
    /// `1 + pinned count`.
    ///
    /// Returns the idents whose priority changed, or `None` for an unknown
    /// ident.
    pub fn move_to_top(&mut self, ident: &str) -> Option<Vec<String>> {
        let target_pinned = self.find_by_ident(ident)?.is_pinned();
        let mut changed = Vec::new();

        let place = if target_pinned {
            let others = self
                .episodes
                .iter_mut()
                .filter(|e| e.ident != ident && e.is_pinned());
            for (ordinal, episode) in (1..).zip(others) {
                let priority = pinned_priority(ordinal);
                if episode.priority != priority {
                    episode.priority = priority;
                    changed.push(episode.ident.clone());
                }
            }
            0
        } else {
            1 + self.episodes.iter().filter(|e| e.is_pinned()).count()
        };

        let priority = pinned_priority(place);
        if let Some(target) = self.find_by_ident_mut(ident)
            && target.priority != priority
        {
            info!("move_to_top: {} -> {} for {}", target.priority, priority, ident);
            target.priority = priority;
            changed.push(ident.to_string());
        }

        self.sort();
        Some(changed)
    }

    /// Idents of finished episodes eligible for automatic deletion
    pub fn finished_deletable(&self) -> Vec<String> {
        self.episodes
            .iter()
            .filter(|e| e.duration_ms != 0 && e.is_finished() && !e.is_kept())
            .map(|e| e.ident.clone())
            .collect()
    }

    /// Episodes without a local audio payload, in display order
    pub fn downloadable(&self) -> Vec<Episode> {
        self.episodes
            .iter()
            .filter(|e| !e.downloaded)
            .cloned()
            .collect()
    }

    /// Total unplayed time across the catalog, rounded to whole seconds
    pub fn remaining_seconds(&self) -> u64 {
        let remaining_ms: u64 = self.episodes.iter().map(Episode::remaining_ms).sum();
        (remaining_ms + 500) / 1000
    }

    /// Distinct priority classes in display order
    pub fn priority_classes(&self) -> Vec<char> {
        let mut classes = Vec::new();
        for class in self.episodes.iter().filter_map(Episode::priority_class) {
            if !classes.contains(&class) {
                classes.push(class);
            }
        }
        classes
    }

    /// `(ident, current_ms)` for every episode with a nonzero offset
    pub fn offsets(&self) -> Vec<(String, u64)> {
        self.episodes
            .iter()
            .filter(|e| e.current_ms != 0)
            .map(|e| (e.ident.clone(), e.current_ms))
            .collect()
    }
}

fn pinned_priority(ordinal: usize) -> String {
    format!("{PINNED_CLASS}{ordinal:04}")
}
