//! Configuration types and loading for the rewrite proxy.

use crate::error::ProxyError;
use serde::Deserialize;
use std::fs;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;

/// Default config.yaml embedded at compile time
pub const DEFAULT_CONFIG_YAML: &str = include_str!("../../config.yaml");

/// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Local answers, applied in order
    #[serde(default)]
    pub records: Vec<RecordConfig>,
    /// Seconds between counter reports (0 = disabled)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dns: DnsConfig::default(),
            forwarding: ForwardingConfig::default(),
            matching: MatchingConfig::default(),
            records: Vec::new(),
            stats_interval_seconds: default_stats_interval(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============== DNS Config ==============

#[derive(Debug, Deserialize, Clone)]
pub struct DnsConfig {
    #[serde(default = "default_dns_listen")]
    pub listen: String,
    /// `auto`, `none`, or an IPv4 address with optional port
    #[serde(default = "default_dns_upstream")]
    pub upstream: Option<String>,
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: String,
    #[serde(default = "default_verify_upstream")]
    pub verify_upstream_source: bool,
}

impl DnsConfig {
    /// Listen address, which must be IPv4
    pub fn listen_addr(&self) -> Result<SocketAddrV4, ProxyError> {
        match self.listen.parse::<SocketAddr>() {
            Ok(SocketAddr::V4(addr)) => Ok(addr),
            Ok(SocketAddr::V6(_)) => Err(ProxyError::Config(format!(
                "listen address {} is IPv6; only IPv4 is supported",
                self.listen
            ))),
            Err(e) => Err(ProxyError::Config(format!(
                "invalid listen address {}: {}",
                self.listen, e
            ))),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            listen: default_dns_listen(),
            upstream: default_dns_upstream(),
            resolv_conf: default_resolv_conf(),
            verify_upstream_source: default_verify_upstream(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForwardingConfig {
    /// Pending forwards older than this are evicted
    #[serde(default = "default_forward_timeout_ms")]
    pub timeout_ms: u32,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Random ID draws before a forward is abandoned
    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,
}

fn default_forward_timeout_ms() -> u32 {
    5000
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_max_id_attempts() -> u32 {
    16
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        ForwardingConfig {
            timeout_ms: default_forward_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            max_id_attempts: default_max_id_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
}

fn default_case_insensitive() -> bool {
    true
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            case_insensitive: default_case_insensitive(),
        }
    }
}

/// One rewrite rule as written in the config file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RecordConfig {
    pub domain: String,
    pub ip: String,
}

impl RecordConfig {
    /// Parse the `DOMAIN=IP` form used on the command line
    pub fn parse_cli(arg: &str) -> Result<RecordConfig, ProxyError> {
        match arg.split_once('=') {
            Some((domain, ip)) if !domain.trim().is_empty() && !ip.trim().is_empty() => {
                Ok(RecordConfig {
                    domain: domain.trim().to_string(),
                    ip: ip.trim().to_string(),
                })
            }
            _ => Err(ProxyError::Config(format!(
                "record must look like DOMAIN=IP, got {:?}",
                arg
            ))),
        }
    }
}

// ============== Logging Config ==============

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Per-query debug lines and warnings
    #[serde(default = "default_log_queries")]
    pub log_queries: bool,
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file: Option<FileLoggingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileLoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
    /// Days to keep old log files (0 = keep forever)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// Compress rotated log files with gzip
    #[serde(default = "default_compress")]
    pub compress: bool,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_file_prefix() -> String {
    "dns-rewrite.log".to_string()
}

fn default_max_age_days() -> u64 {
    7
}

fn default_compress() -> bool {
    true
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        FileLoggingConfig {
            log_dir: default_log_dir(),
            file_prefix: default_log_file_prefix(),
            rotation: LogRotation::Daily,
            max_age_days: default_max_age_days(),
            compress: default_compress(),
        }
    }
}

fn default_log_queries() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_queries: default_log_queries(),
            level: default_log_level(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

// ============== Default Values ==============

pub fn default_dns_listen() -> String {
    "0.0.0.0:53".to_string()
}

pub fn default_dns_upstream() -> Option<String> {
    Some("auto".to_string())
}

pub fn default_resolv_conf() -> String {
    "/etc/resolv.conf".to_string()
}

fn default_verify_upstream() -> bool {
    true
}

fn default_stats_interval() -> u64 {
    60
}

// ============== Config Loading ==============

/// Get the directory containing the executable
fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

/// Parse a YAML document into a config
pub fn parse_config(yaml: &str) -> Result<Config, ProxyError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| ProxyError::Config(e.to_string()))
}

/// Load configuration from file.
///
/// An explicit path must exist. Without one, `./config.yaml` and then
/// `config.yaml` next to the executable are tried before the embedded
/// defaults.
pub fn load_config(path: Option<&str>) -> Result<Config, ProxyError> {
    if let Some(p) = path {
        let content = fs::read_to_string(p)
            .map_err(|e| ProxyError::Config(format!("cannot read {}: {}", p, e)))?;
        return parse_config(&content);
    }

    let mut config_paths = vec![PathBuf::from("config.yaml")];
    // Look next to the executable (portable installs)
    if let Some(dir) = exe_dir() {
        config_paths.push(dir.join("config.yaml"));
    }

    for config_path in config_paths {
        if config_path.exists() {
            println!("Loading config from: {}", config_path.display());
            let content = fs::read_to_string(&config_path)?;
            return parse_config(&content);
        }
    }

    parse_config(DEFAULT_CONFIG_YAML)
}

// ============== Unit Tests ==============
