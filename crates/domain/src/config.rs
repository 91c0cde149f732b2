use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mud: MudConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub offline_queue: OfflineQueueConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Parse a TOML config string, then apply environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self, crate::error::Error> {
        let mut config: Config = toml::from_str(raw)
            .map_err(|e| crate::error::Error::Config(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment-variable overrides.
    ///
    /// `MUD_NAME`, `MUD_PORT`, `ADMIN_EMAIL` configure the mud identity;
    /// `I3_ROUTER_HOST`/`I3_ROUTER_PORT` override the primary router;
    /// `I3_API_KEYS` ("hash:mud:perm+perm,hash:mud:perm") appends API keys.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("MUD_NAME") {
            if !name.is_empty() {
                self.mud.name = name;
            }
        }
        if let Ok(port) = std::env::var("MUD_PORT") {
            if let Ok(port) = port.parse() {
                self.mud.player_port = port;
            }
        }
        if let Ok(email) = std::env::var("ADMIN_EMAIL") {
            if !email.is_empty() {
                self.mud.admin_email = email;
            }
        }
        if let Ok(host) = std::env::var("I3_ROUTER_HOST") {
            if !host.is_empty() {
                self.router.primary.host = host;
            }
        }
        if let Ok(port) = std::env::var("I3_ROUTER_PORT") {
            if let Ok(port) = port.parse() {
                self.router.primary.port = port;
            }
        }
        if let Ok(raw) = std::env::var("I3_API_KEYS") {
            for entry in raw.split(',') {
                let mut parts = entry.trim().splitn(3, ':');
                let (Some(hash), Some(mud)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let permissions = parts
                    .next()
                    .unwrap_or("*")
                    .split('+')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                self.api.keys.push(ApiKeyConfig {
                    key_hash: hash.trim().to_string(),
                    mud_name: mud.trim().to_string(),
                    permissions,
                    allow_ips: Vec::new(),
                    deny_ips: Vec::new(),
                });
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mud identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The identity this gateway announces in `startup-req-3`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MudConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_4000")]
    pub player_port: u16,
    /// OOB TCP port advertised to the router (0 = none).
    #[serde(default)]
    pub tcp_port: u16,
    /// OOB UDP port advertised to the router (0 = none).
    #[serde(default)]
    pub udp_port: u16,
    #[serde(default)]
    pub admin_email: String,
    #[serde(default = "d_mudlib")]
    pub mudlib: String,
    #[serde(default = "d_mudlib")]
    pub base_mudlib: String,
    #[serde(default = "d_driver")]
    pub driver: String,
    #[serde(default = "d_mud_type")]
    pub mud_type: String,
    #[serde(default = "d_open_status")]
    pub open_status: String,
    /// I3 services to announce (mapped to service → 1 on the wire).
    #[serde(default = "d_services")]
    pub services: Vec<String>,
}

impl Default for MudConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            player_port: 4000,
            tcp_port: 0,
            udp_port: 0,
            admin_email: String::new(),
            mudlib: d_mudlib(),
            base_mudlib: d_mudlib(),
            driver: d_driver(),
            mud_type: d_mud_type(),
            open_status: d_open_status(),
            services: d_services(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router link
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Address of an I3 router, with its canonical name (e.g. `"*i4"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterAddr {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RouterAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "d_primary")]
    pub primary: RouterAddr,
    /// Ordered fallback routers, tried after the primary fails.
    #[serde(default)]
    pub fallbacks: Vec<RouterAddr>,
    /// Connection attempts before giving up and surfacing `router_unreachable`.
    #[serde(default = "d_10")]
    pub max_attempts: u32,
    #[serde(default = "d_1000")]
    pub backoff_base_ms: u64,
    #[serde(default = "d_60000")]
    pub backoff_cap_ms: u64,
    #[serde(default = "d_30")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "d_60")]
    pub heartbeat_interval_secs: u64,
    /// Reconnect if no frame arrives for this long.
    #[serde(default = "d_180")]
    pub read_idle_timeout_secs: u64,
    /// Consecutive primary failures before rotating to fallbacks.
    #[serde(default = "d_3")]
    pub failover_threshold: u32,
    /// Maximum MudMode frame size in bytes.
    #[serde(default = "d_32k")]
    pub max_frame: usize,
    /// Bound of the outbound packet queue.
    #[serde(default = "d_256")]
    pub outbound_queue: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            primary: d_primary(),
            fallbacks: Vec::new(),
            max_attempts: 10,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            handshake_timeout_secs: 30,
            heartbeat_interval_secs: 60,
            read_idle_timeout_secs: 180,
            failover_threshold: 3,
            max_frame: 32 * 1024,
            outbound_queue: 256,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API transports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A configured API key. The raw key is never stored — only its SHA-256
/// hash (hex).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key_hash: String,
    pub mud_name: String,
    /// Method tags (e.g. `"tell"`, `"channel"`, `"admin"`) or `"*"`.
    #[serde(default = "d_star")]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub allow_ips: Vec<String>,
    #[serde(default)]
    pub deny_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "d_host")]
    pub host: String,
    /// WebSocket + health HTTP port.
    #[serde(default = "d_8080")]
    pub ws_port: u16,
    /// Line-delimited TCP port.
    #[serde(default = "d_8081")]
    pub tcp_port: u16,
    #[serde(default = "d_30")]
    pub ping_interval_secs: u64,
    #[serde(default = "d_10s")]
    pub ping_timeout_secs: u64,
    /// Maximum length of one TCP line in bytes.
    #[serde(default = "d_64k")]
    pub max_line: usize,
    /// Per-connection outbound queue bound; exceeding it closes the client.
    #[serde(default = "d_256")]
    pub max_queue: usize,
    /// Session inactivity TTL in seconds.
    #[serde(default = "d_3600")]
    pub session_ttl_secs: u64,
    #[serde(default)]
    pub keys: Vec<ApiKeyConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            ws_port: 8080,
            tcp_port: 8081,
            ping_interval_secs: 30,
            ping_timeout_secs: 10,
            max_line: 64 * 1024,
            max_queue: 256,
            session_ttl_secs: 3_600,
            keys: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limits & message bounds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests per minute across all methods.
    #[serde(default = "d_100")]
    pub global_per_min: u32,
    #[serde(default = "d_20")]
    pub global_burst: u32,
    #[serde(default = "d_30u")]
    pub tell_per_min: u32,
    #[serde(default = "d_50")]
    pub channel_per_min: u32,
    #[serde(default = "d_10u")]
    pub who_per_min: u32,
    #[serde(default = "d_5")]
    pub mudlist_per_min: u32,
    #[serde(default = "d_2048")]
    pub max_tell_len: usize,
    #[serde(default = "d_1024")]
    pub max_emote_len: usize,
    /// Entries kept per channel for `channel_history`.
    #[serde(default = "d_200")]
    pub channel_history: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global_per_min: 100,
            global_burst: 20,
            tell_per_min: 30,
            channel_per_min: 50,
            who_per_min: 10,
            mudlist_per_min: 5,
            max_tell_len: 2_048,
            max_emote_len: 1_024,
            channel_history: 200,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Caches & pending requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_300")]
    pub mudlist_ttl_secs: u64,
    #[serde(default = "d_60")]
    pub who_ttl_secs: u64,
    #[serde(default = "d_300")]
    pub finger_ttl_secs: u64,
    #[serde(default = "d_300")]
    pub chanlist_ttl_secs: u64,
    #[serde(default = "d_60")]
    pub locate_ttl_secs: u64,
    /// How long `locate` collects replies before answering.
    #[serde(default = "d_3000")]
    pub locate_window_ms: u64,
    /// Deadline for who/finger round-trips to remote muds.
    #[serde(default = "d_10s")]
    pub request_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mudlist_ttl_secs: 300,
            who_ttl_secs: 60,
            finger_ttl_secs: 300,
            chanlist_ttl_secs: 300,
            locate_ttl_secs: 60,
            locate_window_ms: 3_000,
            request_timeout_secs: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Offline event queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineQueueConfig {
    #[serde(default = "d_1000u")]
    pub capacity: usize,
    #[serde(default = "d_300")]
    pub ttl_secs: u64,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl_secs: 300,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory for `state.json` (router password, mudlist/chanlist ids)
    /// and the persisted session index.
    #[serde(default = "d_state_path")]
    pub path: std::path::PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: d_state_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shutdown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// In-flight work is given this long to finish.
    #[serde(default = "d_30")]
    pub drain_timeout_secs: u64,
    /// Hard deadline; unfinished tasks are aborted.
    #[serde(default = "d_60")]
    pub force_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
            force_timeout_secs: 60,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.mud.name.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "mud.name".into(),
                message: "mud name must not be empty (set MUD_NAME or mud.name)".into(),
            });
        }
        if self.mud.admin_email.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "mud.admin_email".into(),
                message: "admin email is empty — routers may reject the startup request".into(),
            });
        }

        if self.router.primary.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "router.primary.host".into(),
                message: "primary router host must not be empty".into(),
            });
        }
        if self.router.primary.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "router.primary.port".into(),
                message: "primary router port must be greater than 0".into(),
            });
        }
        for (i, fallback) in self.router.fallbacks.iter().enumerate() {
            if fallback.host.is_empty() || fallback.port == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("router.fallbacks[{i}]"),
                    message: "fallback router needs a host and a non-zero port".into(),
                });
            }
        }
        if self.router.max_frame < 1_024 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "router.max_frame".into(),
                message: "max_frame below 1 KiB cannot carry a startup packet".into(),
            });
        }

        if self.api.ws_port == 0 || self.api.tcp_port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "api".into(),
                message: "ws_port and tcp_port must be greater than 0".into(),
            });
        }
        if self.api.ws_port == self.api.tcp_port {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "api.tcp_port".into(),
                message: "ws_port and tcp_port must differ".into(),
            });
        }
        if self.api.keys.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "api.keys".into(),
                message: "no API keys configured — no client will be able to authenticate".into(),
            });
        }
        for (i, key) in self.api.keys.iter().enumerate() {
            if key.key_hash.len() != 64 || !key.key_hash.chars().all(|c| c.is_ascii_hexdigit()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("api.keys[{i}].key_hash"),
                    message: "key_hash must be a 64-char hex SHA-256 digest".into(),
                });
            }
            if key.mud_name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("api.keys[{i}].mud_name"),
                    message: "mud_name must not be empty".into(),
                });
            }
            if key.permissions.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("api.keys[{i}].permissions"),
                    message: "empty permissions — this key cannot call any method".into(),
                });
            }
        }

        if self.shutdown.force_timeout_secs < self.shutdown.drain_timeout_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "shutdown.force_timeout_secs".into(),
                message: "force timeout below drain timeout — drain will be cut short".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default value helpers (serde)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_primary() -> RouterAddr {
    RouterAddr {
        name: "*i4".into(),
        host: "204.209.44.3".into(),
        port: 8080,
    }
}
fn d_mudlib() -> String {
    "LuminariMUD".into()
}
fn d_driver() -> String {
    "CircleMUD".into()
}
fn d_mud_type() -> String {
    "MUD".into()
}
fn d_open_status() -> String {
    "open".into()
}
fn d_services() -> Vec<String> {
    vec![
        "tell".into(),
        "emoteto".into(),
        "channel".into(),
        "who".into(),
        "finger".into(),
        "locate".into(),
    ]
}
fn d_star() -> Vec<String> {
    vec!["*".into()]
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_state_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./data/state")
}
fn d_8080() -> u16 {
    8080
}
fn d_8081() -> u16 {
    8081
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_10() -> u32 {
    10
}
fn d_10u() -> u32 {
    10
}
fn d_20() -> u32 {
    20
}
fn d_30u() -> u32 {
    30
}
fn d_50() -> u32 {
    50
}
fn d_100() -> u32 {
    100
}
fn d_10s() -> u64 {
    10
}
fn d_30() -> u64 {
    30
}
fn d_60() -> u64 {
    60
}
fn d_180() -> u64 {
    180
}
fn d_300() -> u64 {
    300
}
fn d_1000() -> u64 {
    1_000
}
fn d_3000() -> u64 {
    3_000
}
fn d_3600() -> u64 {
    3_600
}
fn d_60000() -> u64 {
    60_000
}
fn d_4000() -> u16 {
    4_000
}
fn d_200() -> usize {
    200
}
fn d_256() -> usize {
    256
}
fn d_1024() -> usize {
    1_024
}
fn d_2048() -> usize {
    2_048
}
fn d_1000u() -> usize {
    1_000
}
fn d_32k() -> usize {
    32 * 1024
}
fn d_64k() -> usize {
    64 * 1024
}
