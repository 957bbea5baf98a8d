use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [keepalive]
//                    interval_secs = 10
//
//   env var:         OPSDESK_KEEPALIVE__INTERVAL_SECS=10   (double underscore = nesting)
//
//   (single underscore stays within field names: OPSDESK_ENGINE__PAGE_SIZE)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub keepalive: KeepaliveFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub engine: EngineFileConfig,
}

/// Backend endpoints (lives under `[backend]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_url: default_api_url(),
        }
    }
}

/// Keepalive tunables (lives under `[keepalive]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeepaliveFileConfig {
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_keepalive_watchdog")]
    pub watchdog_secs: u64,
}

impl Default for KeepaliveFileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_keepalive_interval(),
            watchdog_secs: default_keepalive_watchdog(),
        }
    }
}

/// Reconnect tunables (lives under `[reconnect]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_reconnect_initial")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub max_delay_secs: u64,
    /// Fractional jitter applied to every delay, e.g. 0.25 = ±25%.
    #[serde(default = "default_reconnect_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_reconnect_initial(),
            max_delay_secs: default_reconnect_max(),
            jitter: default_reconnect_jitter(),
        }
    }
}

/// Engine tunables (lives under `[engine]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineFileConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_typing_ttl")]
    pub typing_ttl_secs: u64,
    #[serde(default = "default_search_debounce")]
    pub search_debounce_ms: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for EngineFileConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            typing_ttl_secs: default_typing_ttl(),
            search_debounce_ms: default_search_debounce(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8085/sync".to_string()
}
fn default_api_url() -> String {
    "http://127.0.0.1:8085/api".to_string()
}
fn default_keepalive_interval() -> u64 {
    10
}
fn default_keepalive_watchdog() -> u64 {
    2
}
fn default_reconnect_initial() -> u64 {
    3
}
fn default_reconnect_max() -> u64 {
    60
}
fn default_reconnect_jitter() -> f64 {
    0.25
}
fn default_page_size() -> u32 {
    30
}
fn default_typing_ttl() -> u64 {
    5
}
fn default_search_debounce() -> u64 {
    500
}
fn default_outbound_queue() -> usize {
    256
}

/// Build a figment that layers: defaults → config.toml → OPSDESK_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `OPSDESK_BACKEND__WS_URL=wss://...`  →  `backend.ws_url`
///   `OPSDESK_ENGINE__PAGE_SIZE=50`       →  `engine.page_size`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("OPSDESK_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the engine)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub ws_url: String,
    pub api_url: String,
    pub keepalive: KeepaliveConfig,
    pub reconnect: ReconnectConfig,
    pub engine: EngineConfig,
}

#[derive(Clone, Copy, Debug)]
pub struct KeepaliveConfig {
    /// Ping cadence while the connection is open.
    pub interval: Duration,
    /// How long a ping may go unanswered before the connection is forced
    /// closed.
    pub watchdog: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Messages per timeline page; "load more" grows the limit by this much.
    pub page_size: u32,
    /// Local expiry for received typing indicators.
    pub typing_ttl: Duration,
    /// Quiet period before a search query is sent to the backend.
    pub search_debounce: Duration,
    /// Capacity of the outbound queue retained across reconnects.
    pub outbound_queue: usize,
}

impl SyncConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            ws_url: fc.backend.ws_url.clone(),
            api_url: fc.backend.api_url.clone(),
            keepalive: KeepaliveConfig {
                interval: Duration::from_secs(fc.keepalive.interval_secs),
                watchdog: Duration::from_secs(fc.keepalive.watchdog_secs),
            },
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_secs(fc.reconnect.initial_delay_secs),
                max_delay: Duration::from_secs(fc.reconnect.max_delay_secs),
                jitter: fc.reconnect.jitter.clamp(0.0, 1.0),
            },
            engine: EngineConfig {
                page_size: fc.engine.page_size.max(1),
                typing_ttl: Duration::from_secs(fc.engine.typing_ttl_secs),
                search_debounce: Duration::from_millis(fc.engine.search_debounce_ms),
                outbound_queue: fc.engine.outbound_queue.max(1),
            },
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
