use serde::Serialize;

/// Agent-side view kept for the local status endpoint.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub last_collect_timestamp_seconds: i64,
    pub ticks: u64,
    pub last_tick_duration_secs: f64,
    pub snapshot: Snapshot,
}

/// One tick worth of normalized host data. Field names on the wire follow
/// what the display side consumes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub cpu: CpuStats,
    pub gpu: GpuStats,
    #[serde(rename = "ram")]
    pub memory: MemStats,
    pub disks: Vec<DiskStats>,
    pub network: NetStats,
    pub fps: u32,
    #[serde(flatten)]
    pub game: GameInfo,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CpuStats {
    #[serde(rename = "usage")]
    pub usage_pct: f64,
    #[serde(rename = "temp")]
    pub temp_c: f64,
    #[serde(rename = "frequency")]
    pub freq_mhz: u32,
    #[serde(rename = "power")]
    pub power_w: f64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GpuStats {
    #[serde(rename = "usage")]
    pub usage_pct: u32,
    #[serde(rename = "temp")]
    pub temp_c: f64,
    #[serde(rename = "frequency")]
    pub freq_mhz: u32,
    #[serde(rename = "power")]
    pub power_w: f64,
    #[serde(rename = "vram_used")]
    pub vram_used_mb: u64,
    #[serde(rename = "vram_total")]
    pub vram_total_mb: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemStats {
    #[serde(rename = "used")]
    pub used_gb: f64,
    #[serde(rename = "total")]
    pub total_gb: f64,
    pub percent: f64,
    #[serde(rename = "type")]
    pub dimm_type: String,
    #[serde(rename = "speed")]
    pub dimm_speed: String,
}

impl Default for MemStats {
    fn default() -> Self {
        Self {
            used_gb: 0.0,
            total_gb: 0.0,
            percent: 0.0,
            dimm_type: UNKNOWN.to_string(),
            dimm_speed: UNKNOWN.to_string(),
        }
    }
}

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskStats {
    pub device: String,
    pub name: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum LinkType {
    WiFi,
    Ethernet,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NetStats {
    #[serde(rename = "download_speed")]
    pub download_mbs: f64,
    #[serde(rename = "upload_speed")]
    pub upload_mbs: f64,
    #[serde(rename = "total_download_gb")]
    pub total_down_gb: f64,
    #[serde(rename = "total_upload_gb")]
    pub total_up_gb: f64,
    pub latency_ms: Option<f64>,
    pub link_type: Option<LinkType>,
    pub link_speed_mbps: Option<f64>,
    #[serde(rename = "wifi_tx_speed")]
    pub wifi_tx_mbps: Option<f64>,
    #[serde(rename = "wifi_rx_speed")]
    pub wifi_rx_mbps: Option<f64>,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GameInfo {
    #[serde(rename = "game")]
    pub name: String,
    pub appid: Option<String>,
}

pub const DESKTOP: &str = "Desktop";

impl Default for GameInfo {
    fn default() -> Self {
        Self {
            name: DESKTOP.to_string(),
            appid: None,
        }
    }
}

impl GameInfo {
    pub fn new(name: impl Into<String>, appid: Option<String>) -> Self {
        Self {
            name: name.into(),
            appid,
        }
    }
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn update_collected(&mut self, snapshot: Snapshot, tick_duration_secs: f64) {
        self.last_collect_timestamp_seconds = snapshot.timestamp;
        self.ticks = self.ticks.saturating_add(1);
        self.last_tick_duration_secs = tick_duration_secs;
        self.snapshot = snapshot;
    }
}
