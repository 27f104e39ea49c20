use serde::Deserialize;

/// Response codes whose records are destroyed as soon as the transfer finishes.
pub const AUTO_REMOVE_CODES: [u32; 2] = [200, 201];

/// Smallest capacity a body buffer grows from, before doubling.
pub const MIN_BUFFER_GROWTH: usize = 512;

/// Capacity of the per-request error text, matching libcurl's error buffer.
pub const ERROR_TEXT_CAPACITY: usize = 256;

/// Delay used when the transfer driver asks for an immediate wake-up.
pub const MIN_TIMER_DELAY_MS: u64 = 1;

/// Upper bound of encoded sub-options per multipart field, terminator included.
pub const MAX_FORM_OPTIONS: usize = 7;

/// Top-level configuration for the transfer engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Preferred reactor backend; unknown names fall back to the platform default.
    pub poll_method: String,
    /// Connect timeout applied to every transfer.
    pub connect_timeout_ms: u64,
    /// TCP keep-alive idle time before probes are sent.
    pub keepalive_idle_secs: u64,
    /// Interval between TCP keep-alive probes.
    pub keepalive_interval_secs: u64,
    /// Verify peer certificates and host names.
    pub verify_tls: bool,
    /// Follow `Location` redirects automatically.
    pub follow_redirects: bool,
    /// Cap on stored body bytes per request. Growth past it counts as an
    /// allocation failure, so the body is truncated but the transfer completes.
    pub max_body_bytes: Option<usize>,
    /// Maximum number of readiness events handled per reactor pass.
    pub events_capacity: usize,
    /// Proxy for every transfer. `None` honors the proxy environment
    /// variables, an empty string disables proxying altogether.
    pub proxy: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_method: "epoll".to_string(),
            connect_timeout_ms: 10 * 1000,
            keepalive_idle_secs: 60,
            keepalive_interval_secs: 10,
            verify_tls: false,
            follow_redirects: true,
            max_body_bytes: None,
            events_capacity: 1024,
            proxy: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
