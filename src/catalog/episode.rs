// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;

use serde::Serialize;

use crate::metadata::{TagRecord, format_quiet};

/// Priority class of the group pinned to the top of the catalog
pub const PINNED_CLASS: char = '=';

/// Episodes whose emoji contains this marker are never deleted automatically
pub const KEEP_MARKER: &str = "\u{1F31F}";

/// How far skip-forward advances
pub const SKIP_FORWARD_MS: u64 = 30_000;

/// How far skip-back rewinds
pub const SKIP_BACKWARD_MS: u64 = 10_000;

/// Skip-forward never lands closer than this to the end of an episode
pub const END_BARRIER_MS: u64 = 1_000;

/// Resuming playback backs up this far so the listener regains context
pub const RESUME_OVERLAP_MS: u64 = 250;

/// One catalog entry: metadata plus the local playback state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Episode {
    pub ident: String,
    pub title: String,
    pub artist: String,
    pub priority: String,
    pub duration_ms: u64,
    pub current_ms: u64,
    pub size_bytes: u64,
    pub downloaded_at: i64,
    /// True iff the audio payload is present in the library
    pub downloaded: bool,
    pub quiet_markers: Vec<u64>,
    pub emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_url: Option<String>,
}

impl Episode {
    /// Build an episode from its tag record; playback starts at zero
    pub fn from_tags(tags: TagRecord, downloaded: bool) -> Self {
        Self {
            ident: tags.ident,
            title: tags.title,
            artist: tags.artist,
            priority: tags.priority,
            duration_ms: tags.duration_ms,
            current_ms: 0,
            size_bytes: tags.size,
            downloaded_at: tags.when,
            downloaded,
            quiet_markers: tags.quiet,
            emoji: tags.emoji,
            feed_url: tags.feed_url,
            track_url: tags.track_url,
        }
    }

    /// The tag record that persists this episode's metadata
    pub fn to_tags(&self) -> TagRecord {
        TagRecord {
            ident: self.ident.clone(),
            priority: self.priority.clone(),
            duration_ms: self.duration_ms,
            title: self.title.clone(),
            artist: self.artist.clone(),
            size: self.size_bytes,
            when: self.downloaded_at,
            quiet: self.quiet_markers.clone(),
            emoji: self.emoji.clone(),
            feed_url: self.feed_url.clone(),
            track_url: self.track_url.clone(),
        }
    }

    /// First character of the priority, if any
    pub fn priority_class(&self) -> Option<char> {
        self.priority.chars().next()
    }

    pub fn is_pinned(&self) -> bool {
        self.priority_class() == Some(PINNED_CLASS)
    }

    pub fn remaining_ms(&self) -> u64 {
        self.duration_ms.saturating_sub(self.current_ms)
    }

    pub fn is_finished(&self) -> bool {
        self.current_ms == self.duration_ms
    }

    /// Downloaded and not yet finished
    pub fn is_playable(&self) -> bool {
        self.downloaded && !self.is_finished()
    }

    pub fn is_kept(&self) -> bool {
        self.emoji
            .as_deref()
            .is_some_and(|emoji| emoji.contains(KEEP_MARKER))
    }

    /// Catalog order: priority first, ident as the tie-break
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.ident.cmp(&other.ident))
    }

    /// Where skip-forward from `from_ms` should land, or `None` when the
    /// position must not move.
    ///
    /// Never goes past the end barrier and stops at the first quiet marker it
    /// would otherwise jump over.
    pub fn skip_forward_target(&self, from_ms: u64) -> Option<u64> {
        let barrier_ms = self.duration_ms.checked_sub(END_BARRIER_MS)?;
        if barrier_ms == 0 || from_ms >= barrier_ms {
            return None;
        }

        let target = (from_ms + SKIP_FORWARD_MS).min(barrier_ms);
        let snapped = self
            .quiet_markers
            .iter()
            .copied()
            .find(|&quiet| from_ms < quiet && target >= quiet);

        Some(snapped.unwrap_or(target))
    }

    /// Where skip-back from `from_ms` should land
    pub fn skip_back_target(&self, from_ms: u64) -> u64 {
        from_ms.saturating_sub(SKIP_BACKWARD_MS)
    }

    /// Offset to resume from when this episode is started
    pub fn resume_ms(&self) -> u64 {
        if self.is_finished() {
            0
        } else {
            self.current_ms.saturating_sub(RESUME_OVERLAP_MS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_episode(ident: &str, priority: &str) -> Episode {
        Episode {
            ident: ident.to_string(),
            title: ident.to_string(),
            artist: String::new(),
            priority: priority.to_string(),
            duration_ms: 100_000,
            current_ms: 0,
            size_bytes: 0,
            downloaded_at: 0,
            downloaded: true,
            quiet_markers: vec![],
            emoji: None,
            feed_url: None,
            track_url: None,
        }
    }

    #[test]
    fn tags_roundtrip_through_episode() {
        let tags = TagRecord {
            ident: "ep".to_string(),
            priority: "C1".to_string(),
            duration_ms: 5000,
            title: "T".to_string(),
            artist: "X".to_string(),
            size: 100,
            when: 1000,
            quiet: vec![1000, 2000],
            emoji: Some("x".to_string()),
            feed_url: Some("f".to_string()),
            track_url: None,
        };

        let episode = Episode::from_tags(tags.clone(), false);

        assert!(!episode.downloaded);
        assert_eq!(episode.current_ms, 0);
        assert_eq!(episode.to_tags(), tags);
    }

    #[test]
    fn display_order_breaks_ties_by_ident() {
        let a = make_episode("a", "F1");
        let b = make_episode("b", "F1");
        let c = make_episode("a", "E9");

        assert_eq!(a.display_order(&b), Ordering::Less);
        assert_eq!(b.display_order(&a), Ordering::Greater);
        assert_eq!(c.display_order(&a), Ordering::Less);
        assert_eq!(a.display_order(&a), Ordering::Equal);
    }

    #[test]
    fn finished_means_offset_equals_duration() {
        let mut episode = make_episode("a", "F1");
        assert!(episode.is_playable());

        episode.current_ms = episode.duration_ms;
        assert!(episode.is_finished());
        assert!(!episode.is_playable());

        episode.current_ms = 0;
        episode.downloaded = false;
        assert!(!episode.is_playable());
    }

    #[test]
    fn keep_marker_is_found_inside_longer_emoji() {
        let mut episode = make_episode("a", "F1");
        assert!(!episode.is_kept());

        episode.emoji = Some(format!("\u{1F680}{KEEP_MARKER}"));
        assert!(episode.is_kept());
    }

    #[test]
    fn skip_forward_stops_at_barrier() {
        let episode = make_episode("a", "F1");

        assert_eq!(episode.skip_forward_target(0), Some(30_000));
        assert_eq!(episode.skip_forward_target(80_000), Some(99_000));
        assert_eq!(episode.skip_forward_target(99_000), None);
    }

    #[test]
    fn skip_forward_snaps_to_first_quiet_marker_crossed() {
        let mut episode = make_episode("a", "F1");
        episode.quiet_markers = vec![5_000, 12_000, 20_000];

        assert_eq!(episode.skip_forward_target(6_000), Some(12_000));
        assert_eq!(episode.skip_forward_target(20_000), Some(50_000));
    }

    #[test]
    fn skip_forward_refuses_very_short_episodes() {
        let mut episode = make_episode("a", "F1");
        episode.duration_ms = 800;
        assert_eq!(episode.skip_forward_target(0), None);
    }

    #[test]
    fn skip_back_floors_at_zero() {
        let episode = make_episode("a", "F1");
        assert_eq!(episode.skip_back_target(4_000), 0);
        assert_eq!(episode.skip_back_target(40_000), 30_000);
    }

    #[test]
    fn resume_backs_up_unless_finished() {
        let mut episode = make_episode("a", "F1");
        episode.current_ms = 10_000;
        assert_eq!(episode.resume_ms(), 9_750);

        episode.current_ms = 100;
        assert_eq!(episode.resume_ms(), 0);

        episode.current_ms = episode.duration_ms;
        assert_eq!(episode.resume_ms(), 0);
    }
}
