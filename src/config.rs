use crate::collectors::game::default_library_roots;
use crate::collectors::network::LatencyProbe;
use crate::collectors::probe::{HostPaths, ProbeTimeouts};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub probes: ProbesConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub game: GameConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_url")]
    pub url: String,
    #[serde(default = "default_collector_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_collector_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbesConfig {
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_process_timeout_ms")]
    pub process_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
    #[serde(default = "default_sys_root")]
    pub sys_root: PathBuf,
    #[serde(default = "default_fps_file")]
    pub fps_file: PathBuf,
    #[serde(default = "default_gamescope_stats")]
    pub gamescope_stats: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_latency_target")]
    pub latency_target: String,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GameConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub library_roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            listen: None,
            collector: CollectorConfig::default(),
            probes: ProbesConfig::default(),
            paths: PathsConfig::default(),
            network: NetworkConfig::default(),
            game: GameConfig::default(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: default_collector_url(),
            timeout_ms: default_collector_timeout_ms(),
            enabled: default_collector_enabled(),
        }
    }
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: default_tool_timeout_ms(),
            process_timeout_ms: default_process_timeout_ms(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            proc_root: default_proc_root(),
            sys_root: default_sys_root(),
            fps_file: default_fps_file(),
            gamescope_stats: default_gamescope_stats(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency_target: default_latency_target(),
            ping_timeout_secs: default_ping_timeout_secs(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            library_roots: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn is_missing_file(&self) -> bool {
        matches!(self, ConfigError::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        Self::from_yaml(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path_display,
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs должно быть >= 1".to_string(),
            ));
        }
        if let Some(listen) = &self.listen {
            if SocketAddr::from_str(listen).is_err() {
                return Err(ConfigError::Validation(
                    "поле listen должно быть корректным адресом host:port".to_string(),
                ));
            }
        }

        validate_collector(&self.collector)?;

        if self.probes.tool_timeout_ms == 0 || self.probes.process_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "probes.*_timeout_ms должны быть > 0".to_string(),
            ));
        }
        if self.network.latency_target.trim().is_empty() {
            return Err(ConfigError::Validation(
                "network.latency_target не должен быть пустым".to_string(),
            ));
        }
        if self.network.ping_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "network.ping_timeout_secs должно быть >= 1".to_string(),
            ));
        }
        if self.game.cache_ttl_secs < 1 {
            return Err(ConfigError::Validation(
                "game.cache_ttl_secs должно быть >= 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector.timeout_ms)
    }

    pub fn host_paths(&self) -> HostPaths {
        HostPaths {
            proc_root: self.paths.proc_root.clone(),
            sys_root: self.paths.sys_root.clone(),
        }
    }

    pub fn probe_timeouts(&self) -> ProbeTimeouts {
        ProbeTimeouts {
            tool: Duration::from_millis(self.probes.tool_timeout_ms),
            process: Duration::from_millis(self.probes.process_timeout_ms),
        }
    }

    pub fn latency_probe(&self) -> LatencyProbe {
        LatencyProbe {
            target: self.network.latency_target.clone(),
            timeout_secs: self.network.ping_timeout_secs,
        }
    }

    pub fn game_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.game.cache_ttl_secs)
    }

    pub fn library_roots(&self) -> Vec<PathBuf> {
        if self.game.library_roots.is_empty() {
            default_library_roots()
        } else {
            self.game.library_roots.clone()
        }
    }
}

fn validate_collector(cfg: &CollectorConfig) -> Result<(), ConfigError> {
    let url = cfg.url.trim();
    if url.is_empty() {
        return Err(ConfigError::Validation(
            "collector.url не должен быть пустым".to_string(),
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "collector.url '{url}' должен начинаться с http:// или https://"
        )));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "collector.timeout_ms должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

const fn default_interval_secs() -> u64 {
    1
}

fn default_collector_url() -> String {
    "http://10.0.0.225:5000/stats".to_string()
}

const fn default_collector_timeout_ms() -> u64 {
    1000
}

const fn default_collector_enabled() -> bool {
    true
}

const fn default_tool_timeout_ms() -> u64 {
    2000
}

const fn default_process_timeout_ms() -> u64 {
    1000
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_fps_file() -> PathBuf {
    PathBuf::from("/tmp/fps.txt")
}

fn default_gamescope_stats() -> PathBuf {
    PathBuf::from("/tmp/gamescope-stats")
}

fn default_latency_target() -> String {
    "8.8.8.8".to_string()
}

const fn default_ping_timeout_secs() -> u64 {
    1
}

const fn default_cache_ttl_secs() -> u64 {
    5
}
