// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tracing::warn;

use crate::error::PollError;
use crate::metadata::TagRecord;

const SENTINEL_PREFIX: &str = "OK\t";

/// A fully received poll response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    /// Tag records for every episode the origin currently offers
    pub records: Vec<TagRecord>,
    /// Newest creation timestamp on the origin, `-1` when it has none
    pub newest: i64,
}

/// Accept `text/plain` with or without parameters. Anything else usually
/// means a captive portal answered instead of the origin.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), PollError> {
    match content_type {
        Some(ct) if ct == "text/plain" || ct.starts_with("text/plain;") => Ok(()),
        other => Err(PollError::WrongContentType {
            content_type: other.map(String::from),
        }),
    }
}

/// Parse a poll body: tag-record blocks separated by blank lines, then the
/// `OK<TAB><newest>` sentinel as the very last line.
pub fn parse_poll_body(body: &[u8]) -> Result<PollResponse, PollError> {
    let text = std::str::from_utf8(body).map_err(|_| PollError::NotUtf8)?;

    let mut records = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    let mut lines = text.lines().enumerate();

    loop {
        let Some((index, line)) = lines.next() else {
            return Err(PollError::MissingSentinel);
        };

        if let Some(value) = line.strip_prefix(SENTINEL_PREFIX) {
            let newest = value.trim().parse().map_err(|_| PollError::InvalidCursor {
                value: value.to_string(),
            })?;
            if let Some((_, extra)) = lines.next() {
                warn!("Extra output |{}|", extra);
                return Err(PollError::TrailingData {
                    line: extra.to_string(),
                });
            }
            flush_block(&mut block, &mut records)?;
            return Ok(PollResponse { records, newest });
        }

        if line.is_empty() {
            // Exactly one blank line closes each block
            if block.is_empty() {
                return Err(PollError::EmptyBlock {
                    line_number: index + 1,
                });
            }
            flush_block(&mut block, &mut records)?;
        } else {
            block.push(line);
        }
    }
}

fn flush_block(block: &mut Vec<&str>, records: &mut Vec<TagRecord>) -> Result<(), PollError> {
    if !block.is_empty() {
        records.push(TagRecord::decode(block.drain(..))?);
    }
    Ok(())
}
