//! Station registry used to authenticate `HELO`.
//!
//! A station is known if its GUID is present in the registry. Lookups are
//! async because a real registry is backed by storage; they must be safe to
//! call concurrently from every session.
//!
//! Two implementations are provided:
//! - [`StaticStationRegistry`] - fixed in-memory set
//! - [`JsonFileStationRegistry`] - JSON station list read on every lookup, so
//!   new stations are picked up without a restart
//!
//! # Station file format
//!
//! ```json
//! { "stations": [ { "guid": "1f0c...", "name": "Rooftop" } ] }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::StationsConfig;
use crate::error::{IngestError, Result};
use crate::handler::BoxFuture;

/// Lookup of registered stations.
pub trait StationRegistry: Send + Sync + 'static {
    /// Whether `station_guid` belongs to a registered station.
    fn exists<'a>(&'a self, station_guid: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// In-memory set of station GUIDs.
#[derive(Debug, Clone, Default)]
pub struct StaticStationRegistry {
    guids: HashSet<String>,
}

impl StaticStationRegistry {
    pub fn new<I, S>(guids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            guids: guids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, guid: impl Into<String>) {
        self.guids.insert(guid.into());
    }

    pub fn len(&self) -> usize {
        self.guids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guids.is_empty()
    }
}

impl StationRegistry for StaticStationRegistry {
    fn exists<'a>(&'a self, station_guid: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.guids.contains(station_guid)) })
    }
}

/// One entry of the station file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEntry {
    pub guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Top-level document of the station file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationFile {
    #[serde(default)]
    pub stations: Vec<StationEntry>,
}

/// Station registry backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStationRegistry {
    path: PathBuf,
}

impl JsonFileStationRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the station file.
    pub async fn load(&self) -> Result<StationFile> {
        let content = tokio::fs::read(&self.path).await.map_err(|e| {
            IngestError::Registry(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(serde_json::from_slice(&content)?)
    }
}

impl StationRegistry for JsonFileStationRegistry {
    fn exists<'a>(&'a self, station_guid: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let file = self.load().await?;
            Ok(file.stations.iter().any(|s| s.guid == station_guid))
        })
    }
}

/// Build the registry described by the `stations` config section.
///
/// A registry file takes precedence over the inline GUID list.
pub fn from_config(config: &StationsConfig) -> Arc<dyn StationRegistry> {
    match &config.registry_file {
        Some(path) => {
            tracing::info!("Using station registry file {}", path.display());
            Arc::new(JsonFileStationRegistry::new(path.clone()))
        }
        None => {
            tracing::info!("Using {} statically configured station(s)", config.guids.len());
            Arc::new(StaticStationRegistry::new(config.guids.iter().cloned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_static_registry_lookup() {
        let registry = StaticStationRegistry::new(["station-a", "station-b"]);

        assert!(registry.exists("station-a").await.unwrap());
        assert!(registry.exists("station-b").await.unwrap());
        assert!(!registry.exists("station-c").await.unwrap());
        assert!(!registry.exists("").await.unwrap());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_static_registry_insert() {
        let mut registry = StaticStationRegistry::default();
        assert!(registry.is_empty());

        registry.insert("late-station");

        assert!(registry.exists("late-station").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_registry_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"stations":[{{"guid":"abc-123","name":"Rooftop"}},{{"guid":"def-456"}}]}}"#
        )
        .unwrap();

        let registry = JsonFileStationRegistry::new(file.path());

        assert!(registry.exists("abc-123").await.unwrap());
        assert!(registry.exists("def-456").await.unwrap());
        assert!(!registry.exists("ghi-789").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_registry_picks_up_changes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"stations":[]}"#).unwrap();
        let registry = JsonFileStationRegistry::new(file.path());

        assert!(!registry.exists("new-station").await.unwrap());

        std::fs::write(file.path(), r#"{"stations":[{"guid":"new-station"}]}"#).unwrap();

        assert!(registry.exists("new-station").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_registry_missing_file() {
        let registry = JsonFileStationRegistry::new("/nonexistent/stations.json");

        let result = registry.exists("abc").await;

        assert!(matches!(result, Err(IngestError::Registry(_))));
    }

    #[tokio::test]
    async fn test_file_registry_malformed_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not json").unwrap();
        let registry = JsonFileStationRegistry::new(file.path());

        assert!(matches!(
            registry.exists("abc").await,
            Err(IngestError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_static() {
        let config = StationsConfig {
            guids: vec!["one".into()],
            registry_file: None,
        };

        let registry = from_config(&config);

        assert!(registry.exists("one").await.unwrap());
        assert!(!registry.exists("two").await.unwrap());
    }
}
