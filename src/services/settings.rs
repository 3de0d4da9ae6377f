use std::collections::HashMap;

use crate::config::Config;

/// Setting that turns streaming-gateway rewriting on.
pub const IS_APP_STREAM_ENABLED: &str = "isAppStreamEnabled";

/// Read-only access to boolean feature settings.
pub trait Settings: Send + Sync {
    /// Unknown keys read as `false`.
    fn get_boolean(&self, key: &str) -> bool;
}

/// Settings held in memory, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<String, bool>,
}

impl StaticSettings {
    pub fn new(values: HashMap<String, bool>) -> Self {
        Self { values }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut values = cfg.settings.clone();
        values.insert(IS_APP_STREAM_ENABLED.to_string(), cfg.appstream_enabled);
        Self { values }
    }

    pub fn with(mut self, key: impl Into<String>, value: bool) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

impl Settings for StaticSettings {
    fn get_boolean(&self, key: &str) -> bool {
        self.values.get(key).copied().unwrap_or(false)
    }
}
