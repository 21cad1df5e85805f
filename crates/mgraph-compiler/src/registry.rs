//! Source Registry: the compilable sources, their state and the top-level
//! elements each one owns.
//!
//! Staging operations (`add`, `update`, `delete`) only record intent; the
//! graph is touched exclusively by `Repository::compile`.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Lifecycle state of a [`SourceUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceState {
    /// Staged and waiting for the next compile.
    New,
    /// Parsed during the compile in flight.
    Parsed,
    /// Part of the committed baseline.
    Compiled,
    /// The last compile failed; pending for the next attempt.
    Failed,
    /// Staged for removal.
    Deleted,
}

impl SourceState {
    /// Whether the next compile must process this source.
    pub fn is_pending(&self) -> bool {
        matches!(self, SourceState::New | SourceState::Failed | SourceState::Deleted)
    }
}

/// One compilable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub path: String,
    pub text: String,
    pub state: SourceState,
    /// Paths of the top-level elements currently in the graph for this
    /// source (the committed ones until the next successful compile).
    pub elements: IndexSet<String>,
    /// blake3 hash of the text the committed elements were built from.
    pub compiled_hash: Option<[u8; 32]>,
}

impl SourceUnit {
    fn new(path: String, text: String) -> Self {
        SourceUnit {
            path,
            text,
            state: SourceState::New,
            elements: IndexSet::new(),
            compiled_hash: None,
        }
    }

    pub fn text_hash(&self) -> [u8; 32] {
        *blake3::hash(self.text.as_bytes()).as_bytes()
    }
}

/// Registry of all sources, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    units: IndexMap<String, SourceUnit>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a new source. Re-adding a source staged for deletion revives
    /// it with the new text.
    pub fn add(&mut self, path: &str, text: &str) -> Result<(), RegistryError> {
        match self.units.get_mut(path) {
            Some(unit) if unit.state == SourceState::Deleted => {
                unit.text = text.to_string();
                unit.state = SourceState::New;
                Ok(())
            }
            Some(_) => Err(RegistryError::SourceExists {
                path: path.to_string(),
            }),
            None => {
                self.units.insert(
                    path.to_string(),
                    SourceUnit::new(path.to_string(), text.to_string()),
                );
                Ok(())
            }
        }
    }

    /// Stages new text for a source. Returns `false` when the update was
    /// skipped because the text matches what is compiled.
    pub fn update(&mut self, path: &str, text: &str, skip_unchanged: bool) -> Result<bool, RegistryError> {
        let unit = self
            .units
            .get_mut(path)
            .filter(|u| u.state != SourceState::Deleted)
            .ok_or_else(|| RegistryError::UnknownSource {
                path: path.to_string(),
            })?;
        let hash = *blake3::hash(text.as_bytes()).as_bytes();
        if skip_unchanged && unit.state == SourceState::Compiled && unit.compiled_hash == Some(hash) {
            return Ok(false);
        }
        unit.text = text.to_string();
        unit.state = SourceState::New;
        Ok(true)
    }

    /// Stages a source for deletion. A source that never reached the graph
    /// is dropped immediately.
    pub fn delete(&mut self, path: &str) -> Result<(), RegistryError> {
        let unit = self
            .units
            .get_mut(path)
            .filter(|u| u.state != SourceState::Deleted)
            .ok_or_else(|| RegistryError::UnknownSource {
                path: path.to_string(),
            })?;
        if unit.elements.is_empty() && unit.compiled_hash.is_none() {
            self.units.shift_remove(path);
        } else {
            unit.state = SourceState::Deleted;
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&SourceUnit> {
        self.units.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut SourceUnit> {
        self.units.get_mut(path)
    }

    pub fn state(&self, path: &str) -> Option<SourceState> {
        self.units.get(path).map(|u| u.state)
    }

    pub fn units(&self) -> impl Iterator<Item = &SourceUnit> {
        self.units.values()
    }

    /// Sources the next compile must process, in registry order.
    pub fn pending(&self) -> Vec<String> {
        self.units
            .values()
            .filter(|u| u.state.is_pending())
            .map(|u| u.path.clone())
            .collect()
    }

    /// The source owning a top-level element.
    pub fn element_source(&self, element_path: &str) -> Option<&str> {
        self.units
            .values()
            .find(|u| u.elements.contains(element_path))
            .map(|u| u.path.as_str())
    }

    /// Position of a source in registry order.
    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.units.get_index_of(path)
    }

    /// Drops a source whose deletion has been committed.
    pub fn remove(&mut self, path: &str) -> Option<SourceUnit> {
        self.units.shift_remove(path)
    }
}
