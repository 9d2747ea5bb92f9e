//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Configuration shared by every entity in a runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Samples kept per sliding window (default: 10)
    pub window_capacity: usize,

    /// Multiplier applied to speed delta / millisecond delta (default: 3600)
    pub acceleration_scale: f64,

    /// Maximum children a single registry or join lane accepts (default: 4096)
    pub max_children: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            window_capacity: 10,
            acceleration_scale: 3600.0,
            max_children: 4096,
        }
    }
}
