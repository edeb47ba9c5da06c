use crate::core::discovery::SweepOptions;
use crate::core::portscan::ScanOptions;
use crate::core::status::StatusOptions;
use crate::core::traceroute::TracerouteOptions;
use crate::utils::error::{MonitorError, Result};
use crate::utils::logger::LogFormat;
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "NetworkMonitorApp";
pub const CONFIG_FILE_NAME: &str = "node-monitor.toml";

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub storage: StorageConfig,
    pub monitor: StatusConfig,
    pub discovery: DiscoveryConfig,
    pub portscan: PortScanConfig,
    pub traceroute: TracerouteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<String>,
    pub nodes_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub interval_seconds: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    /// "ping" 或 "tcp"
    pub probe: Option<String>,
    pub tcp_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub sweep_timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub max_hosts: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortScanConfig {
    pub connect_timeout_ms: Option<u64>,
    pub banner_timeout_ms: Option<u64>,
    pub banner_bytes: Option<usize>,
    pub concurrency: Option<usize>,
    pub default_ports: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerouteConfig {
    pub max_hops: Option<u8>,
    pub hop_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub monitor_resources: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeKind {
    #[default]
    Ping,
    Tcp,
}

impl FromStr for ProbeKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" | "icmp" => Ok(ProbeKind::Ping),
            "tcp" => Ok(ProbeKind::Tcp),
            other => Err(MonitorError::InvalidConfigValueError {
                field: "monitor.probe".to_string(),
                value: other.to_string(),
                reason: "Supported probes: ping, tcp".to_string(),
            }),
        }
    }
}

impl MonitorConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| MonitorError::ConfigError {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| MonitorError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 指定路徑優先，其次是資料目錄下的 node-monitor.toml，都沒有就用預設值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            tracing::debug!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        let candidate = default_data_dir().join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            tracing::debug!("Loading config from {}", candidate.display());
            return Self::from_file(candidate);
        }

        Ok(Self::default())
    }

    /// 替換環境變數 (例如 ${HOME})，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir)
    }

    pub fn nodes_file(&self) -> &str {
        self.storage
            .nodes_file
            .as_deref()
            .unwrap_or(crate::adapters::NODES_FILE)
    }

    pub fn probe_kind(&self) -> Result<ProbeKind> {
        self.monitor
            .probe
            .as_deref()
            .map(ProbeKind::from_str)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn tcp_probe_port(&self) -> u16 {
        self.monitor.tcp_port.unwrap_or(7)
    }

    pub fn log_format(&self) -> Result<LogFormat> {
        self.logging
            .format
            .as_deref()
            .map(LogFormat::from_str)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn monitor_resources(&self) -> bool {
        self.logging.monitor_resources.unwrap_or(false)
    }

    pub fn default_ports(&self) -> &str {
        self.portscan.default_ports.as_deref().unwrap_or("1-1024")
    }

    pub fn status_options(&self) -> StatusOptions {
        let defaults = StatusOptions::default();
        StatusOptions {
            interval: self
                .monitor
                .interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            probe_timeout: self
                .monitor
                .probe_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_timeout),
            concurrency: self.monitor.concurrency.unwrap_or(defaults.concurrency),
        }
    }

    pub fn sweep_options(&self) -> SweepOptions {
        let defaults = SweepOptions::default();
        SweepOptions {
            timeout: self
                .discovery
                .sweep_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            concurrency: self.discovery.concurrency.unwrap_or(defaults.concurrency),
            max_hosts: self.discovery.max_hosts.unwrap_or(defaults.max_hosts),
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        let defaults = ScanOptions::default();
        ScanOptions {
            connect_timeout: self
                .portscan
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            banner_timeout: self
                .portscan
                .banner_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.banner_timeout),
            banner_bytes: self.portscan.banner_bytes.unwrap_or(defaults.banner_bytes),
            concurrency: self.portscan.concurrency.unwrap_or(defaults.concurrency),
        }
    }

    pub fn traceroute_options(&self) -> TracerouteOptions {
        let defaults = TracerouteOptions::default();
        TracerouteOptions {
            max_hops: self.traceroute.max_hops.unwrap_or(defaults.max_hops),
            hop_wait: self
                .traceroute
                .hop_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.hop_wait),
        }
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if let Some(dir) = &self.storage.data_dir {
            validate_path("storage.data_dir", dir)?;
        }
        if let Some(file) = &self.storage.nodes_file {
            validate_non_empty_string("storage.nodes_file", file)?;
        }

        if let Some(interval) = self.monitor.interval_seconds {
            validate_positive_number("monitor.interval_seconds", interval, 1)?;
        }
        if let Some(timeout) = self.monitor.probe_timeout_ms {
            validate_range("monitor.probe_timeout_ms", timeout, 10, 60_000)?;
        }
        if let Some(concurrency) = self.monitor.concurrency {
            validate_positive_number("monitor.concurrency", concurrency as u64, 1)?;
        }
        self.probe_kind()?;

        if let Some(timeout) = self.discovery.sweep_timeout_ms {
            validate_range("discovery.sweep_timeout_ms", timeout, 10, 60_000)?;
        }
        if let Some(concurrency) = self.discovery.concurrency {
            validate_range("discovery.concurrency", concurrency, 1, 1024)?;
        }
        if let Some(max_hosts) = self.discovery.max_hosts {
            validate_positive_number("discovery.max_hosts", max_hosts, 1)?;
        }

        if let Some(timeout) = self.portscan.connect_timeout_ms {
            validate_range("portscan.connect_timeout_ms", timeout, 10, 60_000)?;
        }
        if let Some(timeout) = self.portscan.banner_timeout_ms {
            validate_range("portscan.banner_timeout_ms", timeout, 10, 60_000)?;
        }
        if let Some(bytes) = self.portscan.banner_bytes {
            validate_range("portscan.banner_bytes", bytes, 1, 4096)?;
        }
        if let Some(concurrency) = self.portscan.concurrency {
            validate_range("portscan.concurrency", concurrency, 1, 1024)?;
        }
        if let Some(ports) = &self.portscan.default_ports {
            if crate::core::portscan::parse_ports(ports).is_empty() {
                return Err(MonitorError::InvalidConfigValueError {
                    field: "portscan.default_ports".to_string(),
                    value: ports.clone(),
                    reason: "No valid ports in list".to_string(),
                });
            }
        }

        if let Some(hops) = self.traceroute.max_hops {
            validate_range("traceroute.max_hops", hops, 1, 64)?;
        }
        if let Some(wait) = self.traceroute.hop_wait_ms {
            validate_range("traceroute.hop_wait_ms", wait, 100, 30_000)?;
        }

        self.log_format()?;
        Ok(())
    }
}

impl Validate for MonitorConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

/// ~/NetworkMonitorApp，取不到家目錄時用目前目錄
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DATA_DIR)
}
