//! Configuration store adapters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ports::{ConfigStore, ContractConfig};

#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: RwLock<HashMap<String, ContractConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_config(&self, key: &str) -> LedgerResult<Option<ContractConfig>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put_config(&self, key: &str, config: ContractConfig) -> LedgerResult<()> {
        self.entries.write().insert(key.to_string(), config);
        Ok(())
    }
}

/// JSON object on disk mapping keys to `{address, abiJson}`.
///
/// A missing file reads as an empty store.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> LedgerResult<HashMap<String, ContractConfig>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| LedgerError::ConfigStore {
                reason: format!("{}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(LedgerError::ConfigStore {
                reason: format!("{}: {e}", self.path.display()),
            }),
        }
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get_config(&self, key: &str) -> LedgerResult<Option<ContractConfig>> {
        Ok(self.load().await?.remove(key))
    }

    async fn put_config(&self, key: &str, config: ContractConfig) -> LedgerResult<()> {
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), config);

        let bytes = serde_json::to_vec_pretty(&entries).map_err(|e| LedgerError::ConfigStore {
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        let io_err = |e: std::io::Error| LedgerError::ConfigStore {
            reason: format!("{}: {e}", self.path.display()),
        };
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        debug!(key, path = %self.path.display(), "[config] Stored contract configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(address: &str) -> ContractConfig {
        ContractConfig {
            address: address.to_string(),
            abi_json: "[]".to_string(),
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = FileConfigStore::new(&path);
        assert!(store.get_config("CONTRACT_CONFIG").await.unwrap().is_none());
        store
            .put_config("CONTRACT_CONFIG", config("0xff"))
            .await
            .unwrap();

        let reopened = FileConfigStore::new(&path);
        assert_eq!(
            reopened.get_config("CONTRACT_CONFIG").await.unwrap(),
            Some(config("0xff"))
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("abiJson"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileConfigStore::new(&path);
        assert!(matches!(
            store.get_config("CONTRACT_CONFIG").await,
            Err(LedgerError::ConfigStore { .. })
        ));
    }

    #[tokio::test]
    async fn test_in_memory_overwrites() {
        let store = InMemoryConfigStore::new();
        store.put_config("k", config("0x01")).await.unwrap();
        store.put_config("k", config("0x02")).await.unwrap();
        assert_eq!(store.get_config("k").await.unwrap(), Some(config("0x02")));
    }
}
