use std::time::Duration;

/// Relay behavior knobs. Process configuration, not runtime-negotiable.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long a member may stay silent before the sweeper evicts it.
    pub inactivity_timeout: Duration,

    /// How often the sweeper scans the registry.
    pub sweep_interval: Duration,

    /// Whether sweeper evictions broadcast `player_left` to the room.
    /// Explicit disconnects always notify.
    pub notify_on_evict: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            notify_on_evict: false,
        }
    }
}
