//! Server configuration.
//!
//! Covers the basic server identity (name, uuid, time zone, language) and
//! the transport endpoint configurations, persisted as one JSON document
//! rewritten atomically on every change. Changes go through validating
//! setters that persist before they report success.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const SETTINGS_FILE: &str = "settings.json";
const MAX_NAME_LENGTH: usize = 50;

/// Locales the server ships translations for.
pub const AVAILABLE_LANGUAGES: &[&str] = &["en_US", "de_DE", "fr_FR", "es_ES", "it_IT"];

/// Configuration errors. Variant names cross the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum ConfigError {
    #[error("invalid time zone")]
    InvalidTimeZone,

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("invalid language")]
    InvalidLanguage,

    #[error("invalid port")]
    InvalidPort,

    #[error("invalid host address")]
    InvalidHostAddress,

    #[error("could not persist configuration")]
    BackendError,
}

impl ConfigError {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigError::InvalidTimeZone => "InvalidTimeZone",
            ConfigError::InvalidStringLength => "InvalidStringLength",
            ConfigError::InvalidLanguage => "InvalidLanguage",
            ConfigError::InvalidPort => "InvalidPort",
            ConfigError::InvalidHostAddress => "InvalidHostAddress",
            ConfigError::BackendError => "BackendError",
        }
    }
}

/// One transport endpoint: where a TCP or WebSocket server listens and
/// whether it requires TLS and authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEndpoint {
    pub id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default = "default_true")]
    pub authentication_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ServerEndpoint {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() || self.id.len() > MAX_NAME_LENGTH {
            return Err(ConfigError::InvalidStringLength);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if IpAddr::from_str(&self.address).is_err() {
            return Err(ConfigError::InvalidHostAddress);
        }
        Ok(())
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    pub server_name: String,
    pub server_uuid: Uuid,
    pub time_zone: String,
    pub language: String,
    #[serde(default)]
    pub tcp_servers: Vec<ServerEndpoint>,
    #[serde(default)]
    pub web_socket_servers: Vec<ServerEndpoint>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            server_name: "otto".to_string(),
            server_uuid: Uuid::new_v4(),
            time_zone: "UTC".to_string(),
            language: "en_US".to_string(),
            tcp_servers: vec![ServerEndpoint {
                id: "default".to_string(),
                address: "0.0.0.0".to_string(),
                port: 2222,
                ssl_enabled: false,
                authentication_enabled: true,
            }],
            web_socket_servers: vec![ServerEndpoint {
                id: "default".to_string(),
                address: "0.0.0.0".to_string(),
                port: 4444,
                ssl_enabled: false,
                authentication_enabled: true,
            }],
        }
    }
}

/// Owns the settings document and its file.
pub struct ConfigManager {
    path: PathBuf,
    settings: ServerSettings,
}

impl ConfigManager {
    /// Load the settings from `dir`, creating defaults (with a fresh server
    /// uuid) when no file exists yet.
    pub async fn load(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = dir.as_ref().join(SETTINGS_FILE);
        let settings = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(error = %e, "Settings file is unreadable, starting from defaults");
                    ServerSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file yet, using defaults");
                ServerSettings::default()
            }
            Err(e) => return Err(e),
        };
        let manager = Self { path, settings };
        manager.persist().await.map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "cannot write settings")
        })?;
        Ok(manager)
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn server_name(&self) -> &str {
        &self.settings.server_name
    }

    pub fn server_uuid(&self) -> Uuid {
        self.settings.server_uuid
    }

    pub fn language(&self) -> &str {
        &self.settings.language
    }

    /// The configured zone, parsed. Falls back to UTC if the stored name
    /// went stale against the tz database.
    pub fn time_zone(&self) -> Tz {
        Tz::from_str(&self.settings.time_zone).unwrap_or(Tz::UTC)
    }

    /// All zone names accepted by [`ConfigManager::set_time_zone`].
    pub fn available_time_zones() -> Vec<String> {
        chrono_tz::TZ_VARIANTS
            .iter()
            .map(|tz| tz.name().to_string())
            .collect()
    }

    pub fn available_languages() -> Vec<String> {
        AVAILABLE_LANGUAGES.iter().map(|l| l.to_string()).collect()
    }

    pub async fn set_server_name(&mut self, name: &str) -> Result<(), ConfigError> {
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(ConfigError::InvalidStringLength);
        }
        self.update(|s| s.server_name = name.to_string()).await
    }

    pub async fn set_time_zone(&mut self, time_zone: &str) -> Result<(), ConfigError> {
        if Tz::from_str(time_zone).is_err() {
            return Err(ConfigError::InvalidTimeZone);
        }
        self.update(|s| s.time_zone = time_zone.to_string()).await
    }

    pub async fn set_language(&mut self, language: &str) -> Result<(), ConfigError> {
        if !AVAILABLE_LANGUAGES.contains(&language) {
            return Err(ConfigError::InvalidLanguage);
        }
        self.update(|s| s.language = language.to_string()).await
    }

    /// Add or replace a TCP endpoint, keyed by its id.
    pub async fn set_tcp_server(&mut self, endpoint: ServerEndpoint) -> Result<(), ConfigError> {
        endpoint.validate()?;
        self.update(|s| upsert(&mut s.tcp_servers, endpoint)).await
    }

    pub async fn delete_tcp_server(&mut self, id: &str) -> Result<(), ConfigError> {
        let id = id.to_string();
        self.update(|s| s.tcp_servers.retain(|e| e.id != id)).await
    }

    /// Add or replace a WebSocket endpoint, keyed by its id.
    pub async fn set_web_socket_server(
        &mut self,
        endpoint: ServerEndpoint,
    ) -> Result<(), ConfigError> {
        endpoint.validate()?;
        self.update(|s| upsert(&mut s.web_socket_servers, endpoint))
            .await
    }

    pub async fn delete_web_socket_server(&mut self, id: &str) -> Result<(), ConfigError> {
        let id = id.to_string();
        self.update(|s| s.web_socket_servers.retain(|e| e.id != id))
            .await
    }

    async fn update(&mut self, apply: impl FnOnce(&mut ServerSettings)) -> Result<(), ConfigError> {
        let previous = self.settings.clone();
        apply(&mut self.settings);
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Could not persist settings, rolling back");
            self.settings = previous;
            return Err(ConfigError::BackendError);
        }
        Ok(())
    }

    async fn persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn upsert(endpoints: &mut Vec<ServerEndpoint>, endpoint: ServerEndpoint) {
    match endpoints.iter_mut().find(|e| e.id == endpoint.id) {
        Some(existing) => *existing = endpoint,
        None => endpoints.push(endpoint),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn defaults_are_created_and_persisted() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::load(dir.path()).await.unwrap();
        assert_eq!(manager.server_name(), "otto");
        assert_eq!(manager.time_zone(), Tz::UTC);

        // uuid survives a reload
        let uuid = manager.server_uuid();
        let reloaded = ConfigManager::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.server_uuid(), uuid);
    }

    #[tokio::test]
    async fn time_zone_must_be_known() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::load(dir.path()).await.unwrap();

        assert_eq!(
            manager.set_time_zone("Atlantis/Underwater").await,
            Err(ConfigError::InvalidTimeZone)
        );
        manager.set_time_zone("Europe/Vienna").await.unwrap();
        assert_eq!(manager.time_zone(), chrono_tz::Europe::Vienna);
        assert!(ConfigManager::available_time_zones()
            .contains(&"Europe/Vienna".to_string()));
    }

    #[tokio::test]
    async fn language_must_be_available() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::load(dir.path()).await.unwrap();
        assert_eq!(
            manager.set_language("tlh_KX").await,
            Err(ConfigError::InvalidLanguage)
        );
        manager.set_language("de_DE").await.unwrap();
        assert_eq!(manager.language(), "de_DE");
    }

    #[tokio::test]
    async fn endpoints_are_validated_and_upserted() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::load(dir.path()).await.unwrap();

        let endpoint = ServerEndpoint {
            id: "lan".to_string(),
            address: "127.0.0.1".to_string(),
            port: 3333,
            ssl_enabled: false,
            authentication_enabled: false,
        };
        manager.set_tcp_server(endpoint.clone()).await.unwrap();
        assert_eq!(manager.settings().tcp_servers.len(), 2);

        let mut changed = endpoint.clone();
        changed.port = 3334;
        manager.set_tcp_server(changed).await.unwrap();
        assert_eq!(manager.settings().tcp_servers.len(), 2);
        assert_eq!(manager.settings().tcp_servers[1].port, 3334);

        let mut bad_port = endpoint.clone();
        bad_port.port = 0;
        assert_eq!(
            manager.set_tcp_server(bad_port).await,
            Err(ConfigError::InvalidPort)
        );
        let mut bad_address = endpoint;
        bad_address.address = "not-an-ip".to_string();
        assert_eq!(
            manager.set_tcp_server(bad_address).await,
            Err(ConfigError::InvalidHostAddress)
        );

        manager.delete_tcp_server("lan").await.unwrap();
        assert_eq!(manager.settings().tcp_servers.len(), 1);
    }

    #[tokio::test]
    async fn name_changes_survive_reload() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::load(dir.path()).await.unwrap();
        manager.set_server_name("living room hub").await.unwrap();

        let reloaded = ConfigManager::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.server_name(), "living room hub");

        assert_eq!(
            manager.set_server_name(&"x".repeat(51)).await,
            Err(ConfigError::InvalidStringLength)
        );
    }
}
