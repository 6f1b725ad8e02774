//! Persisted "last used" export preferences.
//!
//! The exporter reads these to suggest a format, sub-format and file name for
//! the next export, and writes them back after every successful one. Values are
//! plain strings; interpretation (and validation against the current registry)
//! is up to the exporter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{ExportError, ExportResult};

/// Identifier of the last used format plugin.
pub const KEY_FORMAT: &str = "export.format";
/// Index of the last used sub-format.
pub const KEY_SUB_FORMAT: &str = "export.sub_format";
/// Directory of the last export.
pub const KEY_DIRECTORY: &str = "export.directory";
/// File stem of the last export.
pub const KEY_FILE_NAME: &str = "export.file_name";

/// Key/value store for export preferences.
pub trait PreferenceStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str) -> ExportResult<()>;
}

/// Preferences kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](PreferenceStore::set).
    pub fn with(self, key: &str, value: &str) -> Self {
        self.values.lock().insert(key.to_string(), value.to_string());
        self
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> ExportResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Preferences persisted as a flat TOML table, rewritten on every `set`.
#[derive(Debug)]
pub struct TomlPreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl TomlPreferences {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> ExportResult<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<BTreeMap<String, String>>(&content).map_err(|e| {
                ExportError::Preferences(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No export preferences file, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(ExportError::filesystem(path, e)),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> ExportResult<()> {
        let content =
            toml::to_string(values).map_err(|e| ExportError::Preferences(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ExportError::filesystem(parent, e))?;
        }
        std::fs::write(&self.path, content).map_err(|e| ExportError::filesystem(&self.path, e))
    }
}

impl PreferenceStore for TomlPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> ExportResult<()> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}
