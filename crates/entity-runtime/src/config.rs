//! Runtime tuning surface.

use std::time::Duration;

/// Construction-time tuning for a [`crate::Runtime`].
///
/// Every field has a documented default; use [`RuntimeConfig::builder`]
/// to override individual ones rather than constructing the struct
/// directly.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the per-entity pending-message buffer before a
    /// submission backs up. Entities with no in-flight batch cost
    /// nothing regardless of this value — it only bounds how much can
    /// queue up behind one active batch.
    pub channel_capacity: usize,
    /// How often the background cleanup sweep runs `Clean()` against the
    /// store. `None` disables the background sweep entirely, leaving
    /// cleanup to explicit `clean_entity_storage` calls.
    pub cleanup_sweep_interval: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { channel_capacity: 128, cleanup_sweep_interval: Some(Duration::from_secs(60)) }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn cleanup_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.cleanup_sweep_interval = interval;
        self
    }

    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}
