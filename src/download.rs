// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::catalog::Episode;
use crate::error::DownloadError;
use crate::events::{Event, SharedEventReporter};
use crate::http::HttpClient;
use crate::origin::OriginClient;
use crate::state::Library;

/// Position of one download within its batch
#[derive(Debug, Clone, Copy)]
pub struct DownloadContext {
    /// 1-based index of this episode in the batch
    pub index: usize,
    /// Number of episodes in the batch
    pub total: usize,
}

/// Download an episode's audio payload into the library.
///
/// The body is streamed to `<ident>.mp3.partial`, and only renamed into place
/// when exactly `size_bytes` arrived. On any failure the partial file is
/// removed. Returns the number of bytes received.
pub async fn download_episode<C: HttpClient>(
    origin: &OriginClient<C>,
    library: &Library,
    episode: &Episode,
    context: &DownloadContext,
    reporter: &SharedEventReporter,
) -> Result<u64, DownloadError> {
    let ident = episode.ident.as_str();
    let expected = episode.size_bytes;
    info!("Download {} ({} of {})", ident, context.index, context.total);

    reporter.report(Event::DownloadStarting {
        ident: ident.to_string(),
        index: context.index,
        total: context.total,
        artist: or_placeholder(&episode.artist, "(artist)"),
        title: or_placeholder(&episode.title, "(title)"),
    });

    let partial_path = library.partial_path(ident);
    let mut received = 0;
    let result = stream_to_file(origin, ident, &partial_path, expected, &mut received, reporter).await;

    reporter.report(Event::DownloadFinished {
        ident: ident.to_string(),
        expected,
        received,
    });

    if let Err(e) = result {
        discard_partial(library, ident);
        return Err(e);
    }

    if received != expected {
        error!(
            "Downloaded {} bytes, expected {} for {}",
            received, expected, ident
        );
        discard_partial(library, ident);
        return Err(DownloadError::SizeMismatch {
            ident: ident.to_string(),
            expected,
            received,
        });
    }

    if let Err(e) = library.install_audio(ident) {
        discard_partial(library, ident);
        return Err(e.into());
    }

    info!("Download successful: {}", ident);
    Ok(received)
}

async fn stream_to_file<C: HttpClient>(
    origin: &OriginClient<C>,
    ident: &str,
    path: &Path,
    expected: u64,
    received: &mut u64,
    reporter: &SharedEventReporter,
) -> Result<(), DownloadError> {
    let response = origin.fetch_audio(ident).await?;
    if let Some(length) = response.content_length
        && length != expected
    {
        warn!(
            "Content-Length {} differs from declared size {} for {}",
            length, expected, ident
        );
    }

    let mut file = File::create(path)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut stream = response.body;
    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            ident: ident.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        *received += chunk.len() as u64;
        reporter.report(Event::DownloadProgress {
            ident: ident.to_string(),
            bytes_downloaded: *received,
            total_bytes: expected,
        });
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

fn discard_partial(library: &Library, ident: &str) {
    if let Err(e) = library.discard_partial(ident) {
        warn!("Couldn't delete partial download: {}", e);
    }
}

fn or_placeholder(value: &str, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}
