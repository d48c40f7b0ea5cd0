//! Persisted device configuration record.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{ensure_parent, StoreError};
use crate::sync::DeviceConfig;

/// Load/save contract for the resolved device configuration.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<DeviceConfig>, StoreError>;

    fn save(&self, config: &DeviceConfig) -> Result<(), StoreError>;
}

/// Pretty-printed JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<Option<DeviceConfig>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let config = serde_json::from_str(&contents).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(config))
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), StoreError> {
        ensure_parent(&self.path)?;
        let json = serde_json::to_string_pretty(config).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        tracing::info!(path = %self.path.display(), "Device configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> DeviceConfig {
        let mut config = DeviceConfig {
            device_id: Some(42),
            sync_param_id: Some(1),
            indicator_param_id: Some(2),
            parameter_ids: vec![1, 2, 3],
            ..DeviceConfig::default()
        };
        config.parameter_names.insert(1, "Synchronization".into());
        config
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("owen_config.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("nested").join("owen_config.json"));
        store.save(&sample()).unwrap();

        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!store.temp_path().exists());

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"synchronization_param_id\": 1"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("owen_config.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonConfigStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}
