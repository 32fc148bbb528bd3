use super::hwmon;
use super::probe::{
    read_number, read_trimmed, round_to, run_checked, CommandRunner, HostPaths, ProbeError,
    ProbeTimeouts,
};
use crate::state::CpuStats;
use std::time::Instant;
use tracing::debug;

const CPU_TEMP_DRIVERS: &[&str] = &["k10temp", "zenpower", "coretemp"];
const ENERGY_LABELS: &[&str] = &["package", "socket", "epackage", "esocket"];
const MAX_PLAUSIBLE_WATTS: f64 = 500.0;

#[derive(Debug, Clone, Copy)]
struct EnergySample {
    micro_joules: u64,
    at: Instant,
}

/// Package power from a monotonically increasing energy accumulator.
#[derive(Debug, Default)]
pub struct EnergyMeter {
    last: Option<EnergySample>,
}

impl EnergyMeter {
    /// Stores the new sample unconditionally and returns the average power
    /// since the previous one. The first call, a non-advancing clock and
    /// implausible values (outside 0..500 W) all yield 0.
    pub fn observe(&mut self, micro_joules: u64, at: Instant) -> f64 {
        let previous = self.last.replace(EnergySample { micro_joules, at });
        let Some(previous) = previous else {
            return 0.0;
        };

        let dt = at.saturating_duration_since(previous.at).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        let watts = (micro_joules as f64 - previous.micro_joules as f64) / 1_000_000.0 / dt;
        if watts > 0.0 && watts < MAX_PLAUSIBLE_WATTS {
            round_to(watts, 1)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
pub struct CpuSampler {
    energy: EnergyMeter,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stats without `name` (filled by the assembler) and the
    /// number of probes that failed.
    pub async fn sample(
        &mut self,
        paths: &HostPaths,
        runner: &dyn CommandRunner,
        timeouts: &ProbeTimeouts,
    ) -> (CpuStats, u64) {
        let mut errors = 0_u64;
        let mut stats = CpuStats::default();

        match usage_percent(runner, timeouts).await {
            Ok(v) => stats.usage_pct = v,
            Err(err) => {
                errors += 1;
                debug!(probe = "cpu_usage", error = %err, "проба CPU не удалась");
            }
        }
        match temperature(paths) {
            Ok(v) => stats.temp_c = v,
            Err(err) => {
                errors += 1;
                debug!(probe = "cpu_temp", error = %err, "проба CPU не удалась");
            }
        }
        match frequency_mhz(paths) {
            Ok(v) => stats.freq_mhz = v,
            Err(err) => {
                errors += 1;
                debug!(probe = "cpu_freq", error = %err, "проба CPU не удалась");
            }
        }
        match self.power_watts(paths, Instant::now()) {
            Ok(v) => stats.power_w = v,
            Err(err) => {
                errors += 1;
                debug!(probe = "cpu_power", error = %err, "проба CPU не удалась");
            }
        }

        (stats, errors)
    }

    fn power_watts(&mut self, paths: &HostPaths, now: Instant) -> Result<f64, ProbeError> {
        if let Ok((dir, _)) = hwmon::find_driver(paths, &["zenergy"]) {
            let channel = hwmon::labeled_input(&dir, "energy", |label| {
                let label = label.to_lowercase();
                ENERGY_LABELS.iter().any(|m| label.contains(m))
            });
            if let Some(channel) = channel {
                let micro_joules: u64 = read_number(&channel)?;
                return Ok(self.energy.observe(micro_joules, now));
            }
        }

        let rapl = paths.sys("class/powercap/intel-rapl/intel-rapl:0/power_uw");
        let micro_watts: u64 = read_number(&rapl)?;
        Ok(round_to(micro_watts as f64 / 1_000_000.0, 1))
    }
}

async fn usage_percent(
    runner: &dyn CommandRunner,
    timeouts: &ProbeTimeouts,
) -> Result<f64, ProbeError> {
    let text = run_checked(runner, "top", &["-bn1"], timeouts.tool).await?;
    let idle = parse_top_idle(&text).ok_or_else(|| ProbeError::parse("top: нет строки Cpu(s)"))?;
    Ok(round_to((100.0 - idle).clamp(0.0, 100.0), 1))
}

/// Idle share from the `Cpu(s)` summary line of `top -bn1`.
pub fn parse_top_idle(text: &str) -> Option<f64> {
    let line = text.lines().find(|line| line.contains("Cpu(s)"))?;
    let field = line.split(',').nth(3)?;
    field.split_whitespace().next()?.parse().ok()
}

fn temperature(paths: &HostPaths) -> Result<f64, ProbeError> {
    let (dir, _) = hwmon::find_driver(paths, CPU_TEMP_DRIVERS)?;
    let input = hwmon::labeled_input(&dir, "temp", |label| label.contains("Package"))
        .unwrap_or_else(|| dir.join("temp1_input"));
    Ok(round_to(hwmon::millidegrees(&input)?, 1))
}

fn frequency_mhz(paths: &HostPaths) -> Result<u32, ProbeError> {
    for attr in ["cpuinfo_cur_freq", "scaling_cur_freq"] {
        let path = paths.sys(&format!("devices/system/cpu/cpu0/cpufreq/{attr}"));
        if let Ok(khz) = read_number::<u64>(&path) {
            return Ok((khz as f64 / 1000.0).round() as u32);
        }
    }

    let cpuinfo = read_trimmed(&paths.proc("cpuinfo"))?;
    cpuinfo
        .lines()
        .find(|line| line.starts_with("cpu MHz"))
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, value)| value.trim().parse::<f64>().ok())
        .map(|mhz| mhz.round() as u32)
        .ok_or_else(|| ProbeError::parse("cpuinfo без поля cpu MHz"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::probe::testing::{fixture_paths, write_file, ScriptedRunner};
    use std::time::Duration;

    const TOP_OUTPUT: &str = "top - 10:00:00 up 1 day,  2 users,  load average: 0.52, 0.58, 0.59\n\
Tasks: 301 total,   1 running, 300 sleeping,   0 stopped,   0 zombie\n\
%Cpu(s):  3.1 us,  1.2 sy,  0.0 ni, 95.3 id,  0.2 wa,  0.0 hi,  0.2 si,  0.0 st\n\
MiB Mem :  31945.3 total,  20110.2 free\n";

    #[test]
    fn first_energy_sample_yields_zero() {
        let mut meter = EnergyMeter::default();
        assert_eq!(meter.observe(1_000_000, Instant::now()), 0.0);
    }

    #[test]
    fn energy_delta_over_time_is_power() {
        let mut meter = EnergyMeter::default();
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(2);
        meter.observe(10_000_000, t1);
        // (130e6 - 10e6) uJ / 1e6 / 2 s = 60 W
        assert_eq!(meter.observe(130_000_000, t2), 60.0);
    }

    #[test]
    fn implausible_power_is_rejected_but_sample_is_kept() {
        let mut meter = EnergyMeter::default();
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(1);
        let t3 = t2 + Duration::from_secs(1);

        meter.observe(0, t1);
        assert_eq!(meter.observe(900_000_000, t2), 0.0);
        // delta is taken against the rejected sample, not the first one
        assert_eq!(meter.observe(945_000_000, t3), 45.0);
    }

    #[test]
    fn counter_wrap_yields_zero() {
        let mut meter = EnergyMeter::default();
        let t1 = Instant::now();
        meter.observe(500_000_000, t1);
        assert_eq!(meter.observe(1_000, t1 + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn top_idle_is_parsed() {
        assert_eq!(parse_top_idle(TOP_OUTPUT), Some(95.3));
        assert_eq!(parse_top_idle("no summary here"), None);
    }

    #[tokio::test]
    async fn sample_reads_all_sources() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let root = dir.path();
        write_file(root, "sys/class/hwmon/hwmon0/name", "k10temp\n");
        write_file(root, "sys/class/hwmon/hwmon0/temp1_input", "52125\n");
        write_file(root, "sys/class/hwmon/hwmon0/temp1_label", "Tctl\n");
        write_file(root, "sys/class/hwmon/hwmon1/name", "zenergy\n");
        write_file(root, "sys/class/hwmon/hwmon1/energy1_input", "123456789\n");
        write_file(root, "sys/class/hwmon/hwmon1/energy1_label", "Ecore000\n");
        write_file(root, "sys/class/hwmon/hwmon1/energy17_input", "987654321\n");
        write_file(root, "sys/class/hwmon/hwmon1/energy17_label", "Esocket0\n");
        write_file(
            root,
            "sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq",
            "4650321\n",
        );
        let paths = fixture_paths(root);
        let runner = ScriptedRunner::new().with("top -bn1", TOP_OUTPUT);

        let mut sampler = CpuSampler::new();
        let (stats, errors) = sampler
            .sample(&paths, &runner, &ProbeTimeouts::default())
            .await;

        assert_eq!(errors, 0);
        assert_eq!(stats.usage_pct, 4.7);
        assert_eq!(stats.temp_c, 52.1);
        assert_eq!(stats.freq_mhz, 4650);
        assert_eq!(stats.power_w, 0.0);
    }

    #[test]
    fn package_channel_is_preferred_over_first() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let root = dir.path();
        write_file(root, "sys/class/hwmon/hwmon3/name", "coretemp\n");
        write_file(root, "sys/class/hwmon/hwmon3/temp1_input", "30000\n");
        write_file(root, "sys/class/hwmon/hwmon3/temp1_label", "Core 0\n");
        write_file(root, "sys/class/hwmon/hwmon3/temp2_input", "61500\n");
        write_file(root, "sys/class/hwmon/hwmon3/temp2_label", "Package id 0\n");

        assert_eq!(temperature(&fixture_paths(root)).unwrap(), 61.5);
    }

    #[test]
    fn rapl_fallback_reports_instant_power() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let root = dir.path();
        write_file(
            root,
            "sys/class/powercap/intel-rapl/intel-rapl:0/power_uw",
            "35250000\n",
        );
        let mut sampler = CpuSampler::new();
        let watts = sampler
            .power_watts(&fixture_paths(root), Instant::now())
            .unwrap();
        assert_eq!(watts, 35.3);
    }

    #[test]
    fn frequency_falls_back_to_cpuinfo() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let root = dir.path();
        write_file(root, "proc/cpuinfo", "processor\t: 0\ncpu MHz\t\t: 3599.612\n");
        assert_eq!(frequency_mhz(&fixture_paths(root)).unwrap(), 3600);
    }
}
