// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

/// Requests forwarded to the playback engine. They are fire-and-forget: the
/// engine reports the resulting state through `Playing`/`Paused`/`Stopped`
/// events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerRequest {
    Play,
    Pause,
    SkipForward,
    SkipBack,
    SkipToStart,
    SkipToEnd,
    /// Switch to an episode and start at `start_ms`
    PlayEpisode { ident: String, start_ms: u64 },
    /// Seek within the episode being played
    Seek { position_ms: u64 },
    /// Publish the current playback state
    GetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeChange {
    Up,
    Down,
    Same,
}

impl std::str::FromStr for VolumeChange {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "SAME" => Ok(Self::Same),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeLevel {
    pub current: u32,
    pub min: u32,
    pub max: u32,
}

/// The audio engine, seen from the catalog side
pub trait Player: Send + Sync {
    fn request(&self, request: PlayerRequest);

    fn is_playing(&self) -> bool;

    /// Ident of the episode loaded in the player, playing or paused
    fn playing_ident(&self) -> Option<String>;

    fn adjust_volume(&self, change: VolumeChange) -> VolumeLevel;
}

pub type SharedPlayer = Arc<dyn Player>;

/// Player for headless operation: logs requests, never plays, keeps a
/// volume level so volume commands get sensible answers.
#[derive(Debug)]
pub struct NoopPlayer {
    volume: AtomicU32,
}

impl NoopPlayer {
    pub const MIN_VOLUME: u32 = 0;
    pub const MAX_VOLUME: u32 = 15;

    pub fn new() -> Self {
        Self {
            volume: AtomicU32::new(Self::MAX_VOLUME / 2),
        }
    }

    pub fn shared() -> SharedPlayer {
        Arc::new(Self::new())
    }
}

impl Default for NoopPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Player for NoopPlayer {
    fn request(&self, request: PlayerRequest) {
        debug!("Player request ignored: {:?}", request);
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn playing_ident(&self) -> Option<String> {
        None
    }

    fn adjust_volume(&self, change: VolumeChange) -> VolumeLevel {
        let step = |v: u32| match change {
            VolumeChange::Up => Some((v + 1).min(Self::MAX_VOLUME)),
            VolumeChange::Down => Some(v.saturating_sub(1).max(Self::MIN_VOLUME)),
            VolumeChange::Same => None,
        };
        let previous = self
            .volume
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, step)
            .unwrap_or_else(|v| v);
        let current = step(previous).unwrap_or(previous);

        VolumeLevel {
            current,
            min: Self::MIN_VOLUME,
            max: Self::MAX_VOLUME,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records requests and plays whatever it is told to play
    #[derive(Default)]
    pub struct RecordingPlayer {
        requests: Mutex<Vec<PlayerRequest>>,
        playing: Mutex<Option<String>>,
    }

    impl RecordingPlayer {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn requests(&self) -> Vec<PlayerRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn set_playing(&self, ident: Option<&str>) {
            *self.playing.lock().unwrap() = ident.map(String::from);
        }
    }

    impl Player for RecordingPlayer {
        fn request(&self, request: PlayerRequest) {
            if let PlayerRequest::PlayEpisode { ident, .. } = &request {
                self.set_playing(Some(ident));
            }
            self.requests.lock().unwrap().push(request);
        }

        fn is_playing(&self) -> bool {
            self.playing.lock().unwrap().is_some()
        }

        fn playing_ident(&self) -> Option<String> {
            self.playing.lock().unwrap().clone()
        }

        fn adjust_volume(&self, _change: VolumeChange) -> VolumeLevel {
            VolumeLevel {
                current: 5,
                min: 0,
                max: 10,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_player_volume_is_clamped() {
        let player = NoopPlayer::new();
        let start = player.adjust_volume(VolumeChange::Same).current;

        assert_eq!(player.adjust_volume(VolumeChange::Up).current, start + 1);
        for _ in 0..40 {
            player.adjust_volume(VolumeChange::Up);
        }
        assert_eq!(
            player.adjust_volume(VolumeChange::Same).current,
            NoopPlayer::MAX_VOLUME
        );
        for _ in 0..40 {
            player.adjust_volume(VolumeChange::Down);
        }
        assert_eq!(player.adjust_volume(VolumeChange::Down).current, 0);
    }

    #[test]
    fn volume_change_parses_wire_names() {
        assert_eq!("UP".parse(), Ok(VolumeChange::Up));
        assert_eq!("SAME".parse(), Ok(VolumeChange::Same));
        assert!("LOUDER".parse::<VolumeChange>().is_err());
    }

    #[test]
    fn noop_player_never_plays() {
        let player = NoopPlayer::new();
        player.request(PlayerRequest::Play);
        assert!(!player.is_playing());
        assert_eq!(player.playing_ident(), None);
    }
}
