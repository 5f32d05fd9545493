//! Server configuration.
//!
//! Loaded from a TOML file. Sizes accept human-readable strings such as
//! `"64MB"` or `"1GB"` as well as plain byte counts.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use cache_slab::{Eviction, SlabConfig};
use serde::Deserialize;

/// Configuration load failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read config: {}", e),
            Self::Parse(e) => write!(f, "cannot parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub slab: SlabSection,
    pub buffer: BufferConfig,
    pub pools: PoolConfig,
    pub logging: LoggingConfig,
    /// Worker threads accepting connections concurrently.
    pub workers: WorkersConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

/// Protocol served on the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Memcached ASCII.
    #[default]
    Memcache,
    /// RESP-style array-of-bulks.
    Resp,
}

/// Listener configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ListenerConfig {
    pub protocol: Protocol,
    pub address: SocketAddr,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            address: "127.0.0.1:12321".parse().unwrap(),
        }
    }
}

/// Storage engine section, mirrored onto [`SlabConfig`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SlabSection {
    /// Bytes per slab (e.g. "1MB").
    #[serde(deserialize_with = "deserialize_size")]
    pub slab_size: usize,
    /// Cap on total slab memory (e.g. "64MB").
    #[serde(deserialize_with = "deserialize_size")]
    pub slab_maxbytes: usize,
    /// Carve one slab per class at setup.
    pub slab_prealloc: bool,
    /// Eviction policy: "none", "random", or "lru".
    pub slab_evict_opt: EvictionConfig,
    /// Serve allocations from per-class free queues.
    pub slab_use_freeq: bool,
    /// Reserve 8 bytes per item for a CAS value.
    pub slab_use_cas: bool,
    /// Smallest item chunk (e.g. "88").
    #[serde(deserialize_with = "deserialize_size")]
    pub slab_chunk_size: usize,
    /// Growth factor between adjacent classes.
    pub slab_item_growth: f64,
    /// Explicit class profile, overriding generated growth.
    pub slab_profile: Option<Vec<usize>>,
    /// Log2 of the hash table bucket count.
    pub slab_hash_power: u8,
}

impl Default for SlabSection {
    fn default() -> Self {
        let defaults = SlabConfig::default();
        Self {
            slab_size: defaults.slab_size,
            slab_maxbytes: defaults.maxbytes,
            slab_prealloc: defaults.prealloc,
            slab_evict_opt: EvictionConfig::Random,
            slab_use_freeq: defaults.use_freeq,
            slab_use_cas: defaults.use_cas,
            slab_chunk_size: defaults.chunk_size,
            slab_item_growth: defaults.factor,
            slab_profile: None,
            slab_hash_power: defaults.hash_power,
        }
    }
}

impl SlabSection {
    /// Convert to the engine's configuration type.
    pub fn to_slab_config(&self) -> SlabConfig {
        SlabConfig {
            slab_size: self.slab_size,
            maxbytes: self.slab_maxbytes,
            prealloc: self.slab_prealloc,
            evict_opt: self.slab_evict_opt.into(),
            use_freeq: self.slab_use_freeq,
            use_cas: self.slab_use_cas,
            chunk_size: self.slab_chunk_size,
            factor: self.slab_item_growth,
            profile: self.slab_profile.clone(),
            hash_power: self.slab_hash_power,
        }
    }
}

/// Eviction policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionConfig {
    None,
    #[default]
    Random,
    Lru,
}

impl From<EvictionConfig> for Eviction {
    fn from(value: EvictionConfig) -> Self {
        match value {
            EvictionConfig::None => Eviction::None,
            EvictionConfig::Random => Eviction::Random,
            EvictionConfig::Lru => Eviction::Lru,
        }
    }
}

/// Per-connection buffer sizing.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BufferConfig {
    /// Initial per-connection buffer size (e.g. "16KB").
    #[serde(deserialize_with = "deserialize_size")]
    pub buf_init_size: usize,
    /// Cap on buffer doubling: max = init << power.
    pub dbuf_max_power: u8,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buf_init_size: buffer::BUF_INIT_SIZE,
            dbuf_max_power: buffer::DBUF_DEFAULT_MAX_POWER,
        }
    }
}

/// Message carrier pool sizing.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoolConfig {
    pub request_poolsize: usize,
    pub buf_sock_poolsize: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            request_poolsize: 1024,
            buf_sock_poolsize: 1024,
        }
    }
}

/// Worker thread configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct WorkersConfig {
    /// Cap on concurrent connections; unset means unbounded.
    pub max_connections: Option<usize>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info" or "server=debug".
    pub level: String,
    pub format: LogFormat,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            timestamps: true,
        }
    }
}

/// Accept "64MB"-style size strings or plain integers.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid size: '{}' (expected e.g. \"64MB\")", s))
        }),
    }
}

fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let number: usize = s[..digits_end].parse().ok()?;
    let unit = s[digits_end..].trim().to_ascii_uppercase();
    let scale: usize = match unit.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1024,
        "MB" | "M" => 1024 * 1024,
        "GB" | "G" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listener.protocol, Protocol::Memcache);
        assert_eq!(config.slab.slab_size, 1024 * 1024);
        assert_eq!(config.pools.request_poolsize, 1024);
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("64MB"), Some(64 * 1024 * 1024));
        assert_eq!(parse_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("16kb"), Some(16 * 1024));
        assert_eq!(parse_size("x"), None);
    }

    #[test]
    fn test_toml_round_trip() {
        let raw = r#"
            [listener]
            protocol = "resp"
            address = "127.0.0.1:6380"

            [slab]
            slab_size = "64KB"
            slab_maxbytes = "4MB"
            slab_evict_opt = "lru"

            [buffer]
            buf_init_size = "8KB"
            dbuf_max_power = 4

            [logging]
            level = "debug"
            format = "json"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.listener.protocol, Protocol::Resp);
        assert_eq!(config.slab.slab_size, 64 * 1024);
        assert_eq!(config.slab.slab_evict_opt, EvictionConfig::Lru);
        assert_eq!(config.buffer.buf_init_size, 8 * 1024);
        assert_eq!(config.logging.format, LogFormat::Json);

        let slab = config.slab.to_slab_config();
        assert_eq!(slab.maxbytes, 4 * 1024 * 1024);
        assert_eq!(slab.evict_opt, Eviction::Lru);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let raw = r#"
            [slab]
            slab_sizes = "64KB"
        "#;
        assert!(toml::from_str::<Config>(raw).is_err());
    }
}
