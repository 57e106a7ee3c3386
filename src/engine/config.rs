//! Engine configuration options.

use crate::config::ProtocolConfig;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Log every event through `tracing` at info level instead of debug.
    pub verbose: bool,
    /// Thresholds, reserves and fee curve.
    pub protocol: ProtocolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_protocol(protocol: ProtocolConfig) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }
}
