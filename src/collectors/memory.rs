use super::probe::{read_trimmed, round_to, run_checked, CommandRunner, HostPaths, ProbeError};
use crate::state::{MemStats, UNKNOWN};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemorySampler;

impl MemorySampler {
    pub fn new() -> Self {
        Self
    }

    pub async fn sample(
        &self,
        paths: &HostPaths,
        runner: &dyn CommandRunner,
        timeout: Duration,
    ) -> (MemStats, u64) {
        let mut stats = MemStats::default();
        let mut errors = 0_u64;

        match read_meminfo(paths) {
            Ok((total_kb, available_kb)) => {
                let total_gb = total_kb as f64 / 1024.0 / 1024.0;
                let used_gb = total_kb.saturating_sub(available_kb) as f64 / 1024.0 / 1024.0;
                stats.total_gb = round_to(total_gb, 1);
                stats.used_gb = round_to(used_gb, 1);
                stats.percent = if total_kb > 0 {
                    round_to(used_gb / total_gb * 100.0, 1)
                } else {
                    0.0
                };
            }
            Err(err) => {
                errors += 1;
                debug!(error = %err, "не удалось прочитать meminfo");
            }
        }

        // Usually needs root; absence is not an error.
        match run_checked(runner, "dmidecode", &["-t", "memory"], timeout).await {
            Ok(text) => {
                let (dimm_type, dimm_speed) = parse_dimm_info(&text);
                stats.dimm_type = dimm_type;
                stats.dimm_speed = dimm_speed;
            }
            Err(err) => debug!(error = %err, "dmidecode недоступен"),
        }

        (stats, errors)
    }
}

/// `(MemTotal, MemAvailable)` in kB.
fn read_meminfo(paths: &HostPaths) -> Result<(u64, u64), ProbeError> {
    let text = read_trimmed(&paths.proc("meminfo"))?;
    let field = |key: &str| -> Option<u64> {
        text.lines()
            .find(|line| line.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:").ok_or_else(|| ProbeError::parse("meminfo без MemTotal"))?;
    let available =
        field("MemAvailable:").ok_or_else(|| ProbeError::parse("meminfo без MemAvailable"))?;
    Ok((total, available))
}

/// First meaningful `Type:` and `Speed:` of the memory devices.
pub fn parse_dimm_info(text: &str) -> (String, String) {
    let mut dimm_type = UNKNOWN.to_string();
    let mut dimm_speed = UNKNOWN.to_string();

    for line in text.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("Type:") {
            let value = value.trim();
            if dimm_type == UNKNOWN && !matches!(value, "" | "Unknown" | "Other") {
                dimm_type = value.to_string();
            }
        }
        if let Some(value) = line.strip_prefix("Speed:") {
            let value = value.trim();
            if !value.is_empty() && !value.contains("Unknown") {
                dimm_speed = value.to_string();
                break;
            }
        }
    }

    (dimm_type, dimm_speed)
}
