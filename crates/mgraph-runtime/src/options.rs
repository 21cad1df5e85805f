//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Options controlling evaluation and construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Maximum nesting of function calls and constructions. Default: 256.
    pub max_eval_depth: usize,

    /// Evaluate class constraints when an instance is constructed.
    pub check_constraints: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            max_eval_depth: 256,
            check_constraints: true,
        }
    }
}

impl RuntimeOptions {
    /// Loads options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
