//! Engine configuration options.

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Symbol of the chain's native token, used by airdrops and the payer balance.
    pub native_symbol: String,
    /// Decimals of the native token.
    pub native_decimals: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            native_symbol: "SOL".to_string(),
            native_decimals: 9,
        }
    }
}
