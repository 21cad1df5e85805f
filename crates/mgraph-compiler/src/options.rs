//! Compiler configuration.

use serde::{Deserialize, Serialize};

/// Options controlling the compilation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Upper bound on resolution fixed-point iterations.
    pub max_resolution_passes: usize,

    /// Treat an update whose text hashes identically to the compiled text
    /// as a no-op.
    pub skip_unchanged_updates: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            max_resolution_passes: 64,
            skip_unchanged_updates: true,
        }
    }
}

impl CompilerOptions {
    /// Loads options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
