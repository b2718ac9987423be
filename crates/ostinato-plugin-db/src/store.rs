use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use crate::descriptor::{PluginDescriptor, PLUGIN_QUERY_API_VERSION};

const BUCKET_NAMESPACE: &str = "Plugins/";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read settings database: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse settings database: {0}")]
    Parse(#[from] serde_json::Error),
}

/// JSON-backed key-value settings store.
///
/// `set` only mutates the in-memory map; `sync` flushes the whole map to
/// disk. The scan worker syncs once per completed unit, so a crash loses at
/// most the bucket currently being written.
#[derive(Debug)]
pub struct SettingsDb {
    path: PathBuf,
    data: Mutex<BTreeMap<String, Value>>,
}

impl SettingsDb {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn default_path() -> Result<PathBuf, StoreError> {
        let mut config_dir = dirs::config_dir().ok_or_else(|| {
            StoreError::Read(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory",
            ))
        })?;
        config_dir.push("Ostinato");
        fs::create_dir_all(&config_dir)?;
        config_dir.push("plugins.json");
        Ok(config_dir)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        let value = self.get(key)?;
        let items = value.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        )
    }

    pub fn set(&self, key: &str, value: Value) {
        self.data.lock().insert(key.to_string(), value);
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        let data = self.data.lock();
        let json = serde_json::to_string_pretty(&*data)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Replaces the named descriptor bucket as a whole.
    pub fn set_bucket(&self, key: &str, descriptors: &[PluginDescriptor]) {
        let value = serde_json::to_value(descriptors).unwrap_or(Value::Null);
        self.set(&format!("{BUCKET_NAMESPACE}{key}"), value);
    }

    /// Reads a descriptor bucket. Returns `None` when the bucket is missing,
    /// unparseable, or stale (any descriptor tagged with a different parser
    /// version); stale buckets are rebuilt by the next scan of their unit.
    pub fn bucket(&self, key: &str) -> Option<Vec<PluginDescriptor>> {
        let value = self.get(&format!("{BUCKET_NAMESPACE}{key}"))?;
        let descriptors: Vec<PluginDescriptor> = match serde_json::from_value(value) {
            Ok(descriptors) => descriptors,
            Err(err) => {
                log::warn!("discarding unparseable plugin bucket {key}: {err}");
                return None;
            }
        };
        if descriptors
            .iter()
            .any(|descriptor| descriptor.api != PLUGIN_QUERY_API_VERSION)
        {
            log::warn!("discarding stale plugin bucket {key}");
            return None;
        }
        Some(descriptors)
    }

    pub fn bucket_keys(&self) -> Vec<String> {
        self.data
            .lock()
            .keys()
            .filter_map(|key| key.strip_prefix(BUCKET_NAMESPACE))
            .map(str::to_string)
            .collect()
    }
}
