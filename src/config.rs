// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration, read from `~/.config/podcatalog/config.toml`.
//!
//! Every field has a default, so an absent file or section is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::remote::RemoteSettings;
use crate::sync::SyncPolicy;

const APP_DIR: &str = "podcatalog";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub origin: OriginConfig,
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Folder holding tag files, audio files and the snapshot
    pub dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("library");
        Self { dir }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Base URL of the origin; syncing is impossible without it
    pub endpoint: Option<Url>,
    pub secret: String,
    pub poll_timeout_secs: u64,
    pub download_read_timeout_secs: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            secret: String::new(),
            poll_timeout_secs: 15,
            download_read_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub auto_download: bool,
    /// Treat the network as usage-metered, which holds back unforced syncs
    pub metered: bool,
    pub interval_secs: u64,
    pub max_downloads: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_download: true,
            metered: false,
            interval_secs: 900,
            max_downloads: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub bind_address: String,
    pub port: u16,
    /// Handshake secret; the origin secret is used when unset
    pub secret: Option<String>,
    pub handshake_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 4004,
            secret: None,
            handshake_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Default config file path
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::path().ok_or(ConfigError::NoConfigDir)?, false),
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::ReadFailed { path, source: e }),
        };

        Self::parse(&text).map_err(|e| ConfigError::ParseFailed { path, source: e })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.origin.poll_timeout_secs)
    }

    pub fn download_read_timeout(&self) -> Duration {
        Duration::from_secs(self.origin.download_read_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs.max(1))
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            auto_download: self.sync.auto_download,
            max_downloads: self.sync.max_downloads,
        }
    }

    pub fn remote_settings(&self) -> RemoteSettings {
        RemoteSettings {
            bind_address: self.remote.bind_address.clone(),
            port: self.remote.port,
            secret: self
                .remote
                .secret
                .clone()
                .unwrap_or_else(|| self.origin.secret.clone()),
            handshake_timeout: Duration::from_secs(self.remote.handshake_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();

        assert!(config.library.dir.ends_with("podcatalog/library"));
        assert_eq!(config.origin.endpoint, None);
        assert_eq!(config.origin.poll_timeout_secs, 15);
        assert!(config.sync.auto_download);
        assert!(!config.sync.metered);
        assert_eq!(config.sync_interval(), Duration::from_secs(900));
        assert_eq!(config.remote.port, 4004);
        assert_eq!(config.remote.bind_address, "0.0.0.0");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [origin]
            endpoint = "https://casts.example.com/feed"
            secret = "hunter2"

            [sync]
            max_downloads = 3

            [remote]
            port = 5005
            "#,
        )
        .unwrap();

        assert_eq!(
            config.origin.endpoint.as_ref().map(Url::as_str),
            Some("https://casts.example.com/feed")
        );
        assert_eq!(config.origin.download_read_timeout_secs, 30);
        assert_eq!(config.sync_policy().max_downloads, Some(3));
        assert!(config.sync_policy().auto_download);

        let remote = config.remote_settings();
        assert_eq!(remote.port, 5005);
        assert_eq!(remote.secret, "hunter2");
        assert_eq!(remote.handshake_timeout, Duration::from_secs(30));
    }

    #[test]
    fn remote_secret_overrides_origin_secret() {
        let config = Config::parse(
            r#"
            origin.secret = "a"
            remote.secret = "b"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote_settings().secret, "b");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::parse("[remote]\nport = \"many\"").is_err());
        assert!(Config::parse("[origin]\nendpoint = \"not a url\"").is_err());
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::ReadFailed { .. })
        ));

        let present = dir.path().join("config.toml");
        std::fs::write(&present, "[sync]\nmetered = true\n").unwrap();
        assert!(Config::load(Some(&present)).unwrap().sync.metered);
    }
}
