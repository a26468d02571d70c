// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Write;

use tracing::warn;

use crate::error::TagError;

/// One episode's metadata as carried in a `.tag` file or a poll response.
///
/// The textual form is a run of `name<TAB>value` lines. Required fields are
/// `id`, `priority`, `durms`, `title`, `artist`, `size` and `when`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub ident: String,
    pub priority: String,
    pub duration_ms: u64,
    pub title: String,
    pub artist: String,
    /// Expected audio payload size in bytes
    pub size: u64,
    /// Origin-reported creation time (POSIX seconds)
    pub when: i64,
    /// Millisecond offsets of quiet stretches, ascending. Empty when absent.
    pub quiet: Vec<u64>,
    pub emoji: Option<String>,
    pub feed_url: Option<String>,
    pub track_url: Option<String>,
}

impl TagRecord {
    /// Decode a tag record from its lines.
    ///
    /// Unknown names and lines without a TAB are logged and skipped. A missing
    /// required field or an unparsable number is an error.
    pub fn decode<'a, I>(lines: I) -> Result<Self, TagError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ident = None;
        let mut priority = None;
        let mut duration_ms = None;
        let mut title = None;
        let mut artist = None;
        let mut size = None;
        let mut when = None;
        let mut quiet = Vec::new();
        let mut emoji = None;
        let mut feed_url = None;
        let mut track_url = None;

        for line in lines {
            let Some((name, value)) = line.split_once('\t') else {
                warn!("No tab in tag line '{}'", line);
                continue;
            };

            match name {
                "id" => ident = Some(value.to_string()),
                "priority" | "prio" => priority = Some(value.to_string()),
                "durms" => duration_ms = Some(parse_number("durms", value)?),
                "title" => title = Some(value.to_string()),
                "artist" => artist = Some(value.to_string()),
                "size" => size = Some(parse_number("size", value)?),
                "when" => when = Some(parse_number("when", value)?),
                "quiet" => quiet = parse_quiet(value),
                "emoji" => emoji = Some(value.to_string()),
                "feed_url" => feed_url = Some(value.to_string()),
                "track_url" => track_url = Some(value.to_string()),
                _ => warn!("Unknown tag '{}' = '{}'", name, value),
            }
        }

        Ok(Self {
            ident: ident.ok_or(TagError::MissingField { field: "id" })?,
            priority: priority.ok_or(TagError::MissingField { field: "priority" })?,
            duration_ms: duration_ms.ok_or(TagError::MissingField { field: "durms" })?,
            title: title.ok_or(TagError::MissingField { field: "title" })?,
            artist: artist.ok_or(TagError::MissingField { field: "artist" })?,
            size: size.ok_or(TagError::MissingField { field: "size" })?,
            when: when.ok_or(TagError::MissingField { field: "when" })?,
            quiet,
            emoji,
            feed_url,
            track_url,
        })
    }

    /// Decode a tag record from a block of newline-separated text
    pub fn decode_str(text: &str) -> Result<Self, TagError> {
        Self::decode(text.lines().filter(|line| !line.is_empty()))
    }

    /// Encode this record as newline-terminated `name<TAB>value` lines
    pub fn encode(&self) -> String {
        let mut out = String::new();

        // Writing into a String cannot fail
        let _ = writeln!(out, "id\t{}", self.ident);
        let _ = writeln!(out, "priority\t{}", self.priority);
        let _ = writeln!(out, "durms\t{}", self.duration_ms);
        let _ = writeln!(out, "title\t{}", self.title);
        let _ = writeln!(out, "artist\t{}", self.artist);
        let _ = writeln!(out, "size\t{}", self.size);
        let _ = writeln!(out, "when\t{}", self.when);

        if !self.quiet.is_empty() {
            let _ = writeln!(out, "quiet\t{}", format_quiet(&self.quiet));
        }
        if let Some(emoji) = &self.emoji {
            let _ = writeln!(out, "emoji\t{}", emoji);
        }
        if let Some(feed_url) = &self.feed_url {
            let _ = writeln!(out, "feed_url\t{}", feed_url);
        }
        if let Some(track_url) = &self.track_url {
            let _ = writeln!(out, "track_url\t{}", track_url);
        }

        out
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, TagError> {
    value.trim().parse().map_err(|_| TagError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Parse space-separated millisecond offsets. Malformed input yields no markers.
pub fn parse_quiet(value: &str) -> Vec<u64> {
    let parsed: Result<Vec<u64>, _> = value.split_whitespace().map(str::parse).collect();
    parsed.unwrap_or_else(|_| {
        warn!("Invalid quiet offsets '{}'", value);
        Vec::new()
    })
}

/// Format millisecond offsets as a space-separated list
pub fn format_quiet(quiet: &[u64]) -> String {
    quiet
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
