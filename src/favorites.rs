use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use serde_json::Value;

use crate::{
    config::app_dir,
    error::{Error, MacroResult},
    global_event::{Recording, serializer},
};

const FAVORITES_FILE: &str = "favorites.json";

/// Named recordings kept next to the config. Entries stay in their persisted
/// form so one corrupt entry does not spoil the rest.
#[derive(Debug, Default)]
pub struct Favorites {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl Favorites {
    pub fn default_path() -> MacroResult<PathBuf> {
        Ok(app_dir()?.join(FAVORITES_FILE))
    }

    pub fn load() -> MacroResult<Self> {
        Self::load_from(Self::default_path()?)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> MacroResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }
        let data = fs::read(&path)?;
        let entries = serde_json::from_slice(&data)
            .map_err(|e| Error::MalformedInput(format!("{}: {e}", path.display())))?;
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores under the recording's own name, replacing any previous entry.
    pub fn insert(&mut self, recording: &Recording) -> MacroResult<()> {
        let value = serializer::to_value(recording)?;
        if self.entries.insert(recording.name().to_owned(), value).is_some() {
            warn!("Favorites: replaced {:?}", recording.name());
        }
        Ok(())
    }

    /// `Ok(None)` when absent. A damaged entry fails only its own lookup.
    pub fn get(&self, name: &str) -> MacroResult<Option<Recording>> {
        self.entries
            .get(name)
            .map(|value| serializer::from_value(value.clone()))
            .transpose()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> MacroResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| Error::MalformedInput(e.to_string()))?;
        fs::write(&self.path, data)?;
        info!(
            "Favorites: saved {} entries to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
