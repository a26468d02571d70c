// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Line formats of the remote control protocol. Lines are tab-delimited and
//! returned without the trailing newline.

use md5::{Digest, Md5};

use crate::catalog::{Episode, UpdateOutcome};
use crate::events::Event;
use crate::metadata::format_quiet;

/// Keyword of the authentication handshake, both directions
pub const GREETING: &str = "HELLO";

pub const NONCE_LEN: usize = 16;

pub fn make_line<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join("\t")
}

/// Server greeting carrying the hex-encoded nonce
pub fn greeting(nonce: &[u8]) -> String {
    make_line(&[GREETING, hex::encode(nonce).as_str()])
}

/// The reply a client must send: hex MD5 over the nonce bytes followed by the
/// secret's UTF-8 bytes
pub fn expected_response(nonce: &[u8], secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(nonce);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a client's handshake line against the nonce
pub fn verify_response(line: &str, nonce: &[u8], secret: &str) -> bool {
    let fields: Vec<&str> = line.split('\t').collect();
    match fields.as_slice() {
        [GREETING, digest] => *digest == expected_response(nonce, secret),
        _ => false,
    }
}

/// `priority, ident, currentMs, durationMs, title, when, downloaded, artist,
/// quiet, emoji`
pub fn episode_state(episode: &Episode) -> String {
    make_line(&[
        episode.priority.clone(),
        episode.ident.clone(),
        episode.current_ms.to_string(),
        episode.duration_ms.to_string(),
        episode.title.clone(),
        episode.downloaded_at.to_string(),
        episode.downloaded.to_string(),
        episode.artist.clone(),
        format_quiet(&episode.quiet_markers),
        episode.emoji.clone().unwrap_or_default(),
    ])
}

pub fn ok(fields: &[&str]) -> String {
    prefixed("OK", fields)
}

pub fn err(fields: &[&str]) -> String {
    prefixed("ERR", fields)
}

fn prefixed(kind: &str, fields: &[&str]) -> String {
    let mut line = kind.to_string();
    for field in fields {
        line.push('\t');
        line.push_str(field);
    }
    line
}

pub fn no_such_track(command: &str, ident: &str) -> String {
    err(&[command, "No such track", ident])
}

/// Response to a field update: `OK <cmd> updated|unchanged <ident> <value>`
pub fn update_outcome(command: &str, outcome: UpdateOutcome, ident: &str, value: &str) -> String {
    match outcome {
        UpdateOutcome::NoSuchEpisode => no_such_track(command, ident),
        UpdateOutcome::Unchanged => ok(&[command, "unchanged", ident, value]),
        UpdateOutcome::Updated => ok(&[command, "updated", ident, value]),
    }
}

/// The `NFY` line broadcast for an event, if clients care about it
pub fn notification(event: &Event) -> Option<String> {
    let line = match event {
        Event::EpisodeUpdated { episode } => {
            format!("NFY\tTRACK-UPDATED\t{}", episode_state(episode))
        }
        Event::EpisodeDeleted { ident } => format!("NFY\tTRACK-DELETED\t{ident}"),
        Event::EpisodeSelected { ident } => format!("NFY\tTRACK-SELECTED\t{ident}"),
        Event::PollStarted => "NFY\tPOLLING-FOR-TRACKS\tSTART".to_string(),
        Event::PollFinished { on_server } => {
            let count = on_server.map_or_else(|| "-1".to_string(), |n| n.to_string());
            format!("NFY\tPOLLING-FOR-TRACKS\tFINISH\t{count}")
        }
        Event::DownloadStarting {
            index,
            total,
            artist,
            title,
            ..
        } => format!("NFY\tDOWNLOADING-TRACK\tSTART\t{index}\t{total}\t{artist}\t{title}"),
        Event::DownloadFinished {
            expected, received, ..
        } => format!("NFY\tDOWNLOADING-TRACK\tFINISH\t{expected}\t{received}"),
        Event::Playing { ident, position_ms } => format!("NFY\tPLAYING\t{ident}\t{position_ms}"),
        Event::Paused { ident, position_ms } => format!("NFY\tPAUSED\t{ident}\t{position_ms}"),
        Event::Stopped => "NFY\tSTOPPED".to_string(),
        Event::ClientConnected { count, addr } => {
            format!("NFY\tCLIENT-CONNECT\tCONNECT\t{count}\t{}", addr.ip())
        }
        Event::ClientDisconnected {
            count,
            addr,
            authenticated,
        } => format!(
            "NFY\tCLIENT-CONNECT\tDISCONNECT\t{count}\t{}\t{authenticated}",
            addr.ip()
        ),
        Event::Echo { fields } => make_line(fields.as_slice()),
        Event::DownloadProgress { .. }
        | Event::PartialFilesCleanedUp { .. }
        | Event::Notice { .. } => return None,
    };
    Some(line)
}
