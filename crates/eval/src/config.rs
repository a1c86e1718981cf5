//! Engine configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When false every cache lookup misses and nothing is stored.
    pub cache_enabled: bool,
    /// Offset from UTC applied by `today` and `now`.
    pub timezone_offset_minutes: Option<i32>,
    /// Resolve layouts when a projection does not say otherwise.
    pub resolve_layout: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_enabled: true,
            timezone_offset_minutes: None,
            resolve_layout: true,
        }
    }
}

impl EngineConfig {
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_timezone_offset(mut self, minutes: i32) -> Self {
        self.timezone_offset_minutes = Some(minutes);
        self
    }

    pub fn with_layout(mut self, resolve: bool) -> Self {
        self.resolve_layout = resolve;
        self
    }
}
