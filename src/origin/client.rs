// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tracing::{debug, info, warn};
use url::Url;

use super::poll::{PollResponse, check_content_type, parse_poll_body};
use crate::error::{DownloadError, PollError, RemoveError};
use crate::http::{HttpClient, HttpResponse};

/// The origin server: one endpoint answering poll, download and remove
/// requests, each authorized by the shared secret in the `p` parameter.
pub struct OriginClient<C> {
    http: C,
    endpoint: Url,
    secret: String,
}

impl<C: HttpClient> OriginClient<C> {
    pub fn new(http: C, endpoint: Url, secret: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            secret: secret.into(),
        }
    }

    /// `?p=<secret>[&r=<remaining seconds>][&s=<since>]`; `since` is left
    /// out while it is still `-1`.
    pub fn poll_url(&self, remaining_seconds: Option<u64>, since: i64) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("p", &self.secret);
            if let Some(remaining) = remaining_seconds {
                query.append_pair("r", &remaining.to_string());
            }
            if since != -1 {
                query.append_pair("s", &since.to_string());
            }
        }
        url
    }

    pub fn download_url(&self, ident: &str) -> Url {
        self.ident_url("get", ident)
    }

    pub fn remove_url(&self, ident: &str) -> Url {
        self.ident_url("rm", ident)
    }

    fn ident_url(&self, action: &str, ident: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(action, ident)
            .append_pair("p", &self.secret);
        url
    }

    /// Ask the origin which episodes it offers
    pub async fn poll(
        &self,
        remaining_seconds: Option<u64>,
        since: i64,
    ) -> Result<PollResponse, PollError> {
        let url = self.poll_url(remaining_seconds, since);
        debug!("Polling {} (since {})", self.endpoint, since);

        let response = self
            .http
            .get_bytes(url.as_str())
            .await
            .map_err(|e| PollError::Transport { source: e })?;

        if response.status >= 400 {
            return Err(PollError::HttpStatus {
                status: response.status,
            });
        }
        check_content_type(response.content_type.as_deref())?;

        let parsed = parse_poll_body(&response.body)?;
        info!(
            "Poll: {} tracks on server, newest={}",
            parsed.records.len(),
            parsed.newest
        );
        Ok(parsed)
    }

    /// Start streaming an episode's audio payload
    pub async fn fetch_audio(&self, ident: &str) -> Result<HttpResponse, DownloadError> {
        let url = self.download_url(ident);
        let response = self
            .http
            .get_stream(url.as_str())
            .await
            .map_err(|e| DownloadError::HttpFailed {
                ident: ident.to_string(),
                source: e,
            })?;

        if response.status >= 400 {
            return Err(DownloadError::HttpStatus {
                ident: ident.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Tell the origin it may forget an episode. Succeeds iff the reply
    /// contains a line that is exactly `OK`.
    pub async fn remove(&self, ident: &str) -> Result<(), RemoveError> {
        let url = self.remove_url(ident);
        let response = self
            .http
            .get_bytes(url.as_str())
            .await
            .map_err(|e| RemoveError::Transport {
                ident: ident.to_string(),
                source: e,
            })?;

        if response.status >= 400 {
            return Err(RemoveError::HttpStatus {
                ident: ident.to_string(),
                status: response.status,
            });
        }

        let body = String::from_utf8_lossy(&response.body);
        let mut acknowledged = false;
        for line in body.lines() {
            if line == "OK" {
                acknowledged = true;
            } else {
                warn!("remove {}: unexpected line |{}|", ident, line);
            }
        }

        if !acknowledged {
            return Err(RemoveError::NotAcknowledged {
                ident: ident.to_string(),
            });
        }
        info!("Deleted from server: {}", ident);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::testing::{MockOrigin, plain_text, query_value};
    use crate::http::BufferedResponse;
    use bytes::Bytes;
    use futures::StreamExt;

    fn client(origin: &Arc<MockOrigin>) -> OriginClient<Arc<MockOrigin>> {
        OriginClient::new(
            origin.clone(),
            Url::parse("http://origin.test/podcasts.php").unwrap(),
            "s3cret&=",
        )
    }

    #[test]
    fn poll_url_omits_unknown_values() {
        let origin = MockOrigin::new();
        let url = client(&origin).poll_url(None, -1);

        assert_eq!(url.as_str(), "http://origin.test/podcasts.php?p=s3cret%26%3D");
    }

    #[test]
    fn poll_url_carries_remaining_and_since() {
        let origin = MockOrigin::new();
        let url = client(&origin).poll_url(Some(3600), 42);

        assert_eq!(query_value(url.as_str(), "p").as_deref(), Some("s3cret&="));
        assert_eq!(query_value(url.as_str(), "r").as_deref(), Some("3600"));
        assert_eq!(query_value(url.as_str(), "s").as_deref(), Some("42"));
    }

    #[test]
    fn ident_urls_encode_ident_and_secret() {
        let origin = MockOrigin::new();
        let client = client(&origin);

        let get = client.download_url("Here+Now-1");
        assert_eq!(query_value(get.as_str(), "get").as_deref(), Some("Here+Now-1"));
        assert_eq!(query_value(get.as_str(), "p").as_deref(), Some("s3cret&="));

        let rm = client.remove_url("a b");
        assert_eq!(query_value(rm.as_str(), "rm").as_deref(), Some("a b"));
    }

    #[tokio::test]
    async fn poll_parses_response() {
        let origin = MockOrigin::new();
        origin.set_poll_body(
            "id\tA\npriority\tF001\ndurms\t5000\ntitle\tT\nartist\tX\nsize\t100\nwhen\t1000\n\nOK\t42",
        );

        let response = client(&origin).poll(None, -1).await.unwrap();

        assert_eq!(response.newest, 42);
        assert_eq!(response.records[0].ident, "A");
    }

    #[tokio::test]
    async fn poll_rejects_captive_portal_html() {
        let origin = MockOrigin::new();
        origin.set_poll_response(BufferedResponse {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: Bytes::from_static(b"<html>login</html>"),
        });

        assert!(matches!(
            client(&origin).poll(None, -1).await,
            Err(PollError::WrongContentType { .. })
        ));
    }

    #[tokio::test]
    async fn poll_reports_http_errors() {
        let origin = MockOrigin::new();
        origin.set_poll_response(plain_text(503, "busy"));

        assert!(matches!(
            client(&origin).poll(None, -1).await,
            Err(PollError::HttpStatus { status: 503 })
        ));
    }

    #[tokio::test]
    async fn fetch_audio_streams_payload() {
        let origin = MockOrigin::new();
        origin.add_audio("A", b"0123456789");

        let response = client(&origin).fetch_audio("A").await.unwrap();
        let chunks: Vec<_> = response.body.collect().await;
        let data: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();

        assert_eq!(data, b"0123456789");
    }

    #[tokio::test]
    async fn fetch_audio_fails_on_missing_episode() {
        let origin = MockOrigin::new();

        assert!(matches!(
            client(&origin).fetch_audio("nope").await,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn remove_requires_ok_line() {
        let origin = MockOrigin::new();
        let client = client(&origin);

        origin.set_remove_reply("deleting\nOK\n");
        client.remove("A").await.unwrap();

        origin.set_remove_reply("OKAY\n");
        assert!(matches!(
            client.remove("A").await,
            Err(RemoveError::NotAcknowledged { .. })
        ));

        assert_eq!(origin.requested("rm"), vec!["A", "A"]);
    }
}
