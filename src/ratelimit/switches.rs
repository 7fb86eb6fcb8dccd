//! Process-wide policy switches.

use crate::config::RateLimitingConfig;

/// Decision-policy flags, read once at process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Switches {
    /// Reject over-limit requests; when off, violations are only logged
    pub enforce: bool,
    /// Refuse callers without a usable API key
    pub emergency_mode: bool,
}

impl Switches {
    pub fn enforcing() -> Self {
        Self {
            enforce: true,
            emergency_mode: false,
        }
    }
}

impl From<&RateLimitingConfig> for Switches {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            enforce: config.enforce,
            emergency_mode: config.emergency_mode,
        }
    }
}
