use super::hwmon;
use super::probe::{
    parse_f64_loose, read_number, read_trimmed, round_to, run_checked, sorted_entries,
    CommandRunner, HostPaths, ProbeError, ProbeTimeouts,
};
use crate::state::GpuStats;
use std::path::{Path, PathBuf};
use tracing::debug;

const AMD_DRIVERS: &[&str] = &["amdgpu", "amdgpu-pci"];
const USAGE_ATTRS: &[&str] = &["gpu_busy_percent", "gpu_usage", "busy_percent"];
const VRAM_ATTRS: &[(&str, &str)] = &[
    ("mem_info_vram_used", "mem_info_vram_total"),
    ("mem_info_vis_vram_used", "mem_info_vis_vram_total"),
];
const NVIDIA_QUERY: &str =
    "--query-gpu=utilization.gpu,temperature.gpu,clocks.gr,power.draw,memory.used,memory.total";

/// Stateless; one vendor backend fills the reading per tick.
#[derive(Debug, Default)]
pub struct GpuSampler;

impl GpuSampler {
    pub fn new() -> Self {
        Self
    }

    /// Returns the stats without `name` and the failure count (0 or 1: only
    /// the absence of every backend counts).
    pub async fn sample(
        &self,
        paths: &HostPaths,
        runner: &dyn CommandRunner,
        timeouts: &ProbeTimeouts,
    ) -> (GpuStats, u64) {
        if let Ok((hwmon_dir, _)) = hwmon::find_driver(paths, AMD_DRIVERS) {
            return (read_amd(paths, &hwmon_dir), 0);
        }

        match read_nvidia(runner, timeouts).await {
            Ok(stats) => (stats, 0),
            Err(err) => {
                debug!(error = %err, "ни AMD, ни NVIDIA GPU не обнаружены");
                (GpuStats::default(), 1)
            }
        }
    }
}

fn amd_device_dir(paths: &HostPaths, hwmon_dir: &Path) -> PathBuf {
    let own = hwmon_dir.join("device");
    if USAGE_ATTRS.iter().any(|a| own.join(a).exists()) {
        return own;
    }
    sorted_entries(&paths.sys("class/drm"))
        .unwrap_or_default()
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("card") && !n.contains('-'))
                .unwrap_or(false)
        })
        .map(|p| p.join("device"))
        .find(|p| p.exists())
        .unwrap_or(own)
}

/// Missing sub-readings stay at zero.
fn read_amd(paths: &HostPaths, hwmon_dir: &Path) -> GpuStats {
    let card = amd_device_dir(paths, hwmon_dir);
    let mut stats = GpuStats::default();

    if let Some(attr) = USAGE_ATTRS.iter().map(|a| card.join(a)).find(|p| p.exists()) {
        stats.usage_pct = read_number(&attr).unwrap_or(0);
    }
    if let Ok(temp) = hwmon::millidegrees(&hwmon_dir.join("temp1_input")) {
        stats.temp_c = round_to(temp, 1);
    }
    if let Ok(listing) = read_trimmed(&card.join("pp_dpm_sclk")) {
        stats.freq_mhz = parse_active_clock(&listing).unwrap_or(0);
    }
    let power = read_number::<u64>(&hwmon_dir.join("power1_average"))
        .or_else(|_| read_number::<u64>(&hwmon_dir.join("power1_input")));
    if let Ok(micro_watts) = power {
        stats.power_w = round_to(micro_watts as f64 / 1_000_000.0, 1);
    }
    for (used, total) in VRAM_ATTRS {
        let (used, total) = (card.join(used), card.join(total));
        if used.exists() && total.exists() {
            stats.vram_used_mb = read_number::<u64>(&used).unwrap_or(0) / (1024 * 1024);
            stats.vram_total_mb = read_number::<u64>(&total).unwrap_or(0) / (1024 * 1024);
            break;
        }
    }

    stats
}

/// MHz of the starred (currently selected) DPM state, e.g. `1: 2482Mhz *`.
pub fn parse_active_clock(listing: &str) -> Option<u32> {
    let line = listing.lines().find(|line| line.contains('*'))?;
    let (_, value) = line.split_once(':')?;
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

async fn read_nvidia(
    runner: &dyn CommandRunner,
    timeouts: &ProbeTimeouts,
) -> Result<GpuStats, ProbeError> {
    let text = run_checked(
        runner,
        "nvidia-smi",
        &[NVIDIA_QUERY, "--format=csv,noheader,nounits"],
        timeouts.tool,
    )
    .await?;
    parse_nvidia_query(&text)
}

/// Positional `usage, temp, clock, power, vram_used, vram_total` of the first GPU.
pub fn parse_nvidia_query(text: &str) -> Result<GpuStats, ProbeError> {
    let line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ProbeError::parse("nvidia-smi: пустой вывод"))?;
    let fields: Vec<f64> = line
        .split(',')
        .map(|v| parse_f64_loose(v).unwrap_or(0.0))
        .collect();
    if fields.len() < 6 {
        return Err(ProbeError::parse(format!("nvidia-smi: '{line}'")));
    }

    Ok(GpuStats {
        usage_pct: fields[0].max(0.0) as u32,
        temp_c: fields[1],
        freq_mhz: fields[2].max(0.0) as u32,
        power_w: fields[3],
        vram_used_mb: fields[4].max(0.0) as u64,
        vram_total_mb: fields[5].max(0.0) as u64,
        name: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::probe::testing::{fixture_paths, write_file, ScriptedRunner};

    const SMI_LINE: &str = "nvidia-smi --query-gpu=utilization.gpu,temperature.gpu,clocks.gr,power.draw,memory.used,memory.total --format=csv,noheader,nounits";

    fn amd_fixture(root: &Path) {
        write_file(root, "sys/class/hwmon/hwmon2/name", "amdgpu\n");
        write_file(root, "sys/class/hwmon/hwmon2/temp1_input", "47000\n");
        write_file(root, "sys/class/hwmon/hwmon2/power1_average", "187000000\n");
        write_file(root, "sys/class/drm/card1/device/gpu_busy_percent", "87\n");
        write_file(
            root,
            "sys/class/drm/card1/device/pp_dpm_sclk",
            "0: 500Mhz\n1: 2482Mhz *\n2: 2600Mhz\n",
        );
        write_file(
            root,
            "sys/class/drm/card1/device/mem_info_vram_used",
            "4294967296\n",
        );
        write_file(
            root,
            "sys/class/drm/card1/device/mem_info_vram_total",
            "17163091968\n",
        );
    }

    #[tokio::test]
    async fn amd_branch_reads_sysfs() {
        let dir = tempfile::tempdir().expect("временный каталог");
        amd_fixture(dir.path());
        let runner = ScriptedRunner::new();

        let (stats, errors) = GpuSampler::new()
            .sample(&fixture_paths(dir.path()), &runner, &ProbeTimeouts::default())
            .await;

        assert_eq!(errors, 0);
        assert_eq!(stats.usage_pct, 87);
        assert_eq!(stats.temp_c, 47.0);
        assert_eq!(stats.freq_mhz, 2482);
        assert_eq!(stats.power_w, 187.0);
        assert_eq!(stats.vram_used_mb, 4096);
        assert_eq!(stats.vram_total_mb, 16368);
        assert!(runner.calls().is_empty(), "NVIDIA не должен опрашиваться");
    }

    #[tokio::test]
    async fn nvidia_branch_parses_query() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let runner = ScriptedRunner::new().with(SMI_LINE, "34, 55, 2520, 121.47, 3012, 12282\n");

        let (stats, errors) = GpuSampler::new()
            .sample(&fixture_paths(dir.path()), &runner, &ProbeTimeouts::default())
            .await;

        assert_eq!(errors, 0);
        assert_eq!(stats.usage_pct, 34);
        assert_eq!(stats.temp_c, 55.0);
        assert_eq!(stats.freq_mhz, 2520);
        assert_eq!(stats.power_w, 121.47);
        assert_eq!(stats.vram_used_mb, 3012);
        assert_eq!(stats.vram_total_mb, 12282);
    }

    #[tokio::test]
    async fn nvidia_nonzero_exit_yields_defaults() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let runner = ScriptedRunner::new().with_exit(SMI_LINE, 9, "34, 55, 2520, 121.47, 3012, 12282\n");

        let (stats, errors) = GpuSampler::new()
            .sample(&fixture_paths(dir.path()), &runner, &ProbeTimeouts::default())
            .await;

        assert_eq!(errors, 1);
        assert_eq!(stats, GpuStats::default());
    }

    #[test]
    fn nvidia_na_fields_become_zero() {
        let stats = parse_nvidia_query("12, 40, 1410, [N/A], 500, 4096").unwrap();
        assert_eq!(stats.power_w, 0.0);
        assert_eq!(stats.vram_total_mb, 4096);
        assert!(parse_nvidia_query("12, 40").is_err());
    }

    #[test]
    fn active_clock_needs_star() {
        assert_eq!(parse_active_clock("0: 300Mhz\n1: 1800Mhz\n"), None);
        assert_eq!(parse_active_clock("0: 300Mhz *\n1: 1800Mhz\n"), Some(300));
    }
}
