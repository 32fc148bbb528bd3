use super::probe::{read_trimmed, run_checked, CommandRunner, HostPaths, ProbeError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::debug;

pub const UNKNOWN_CPU: &str = "Unknown CPU";
pub const UNKNOWN_GPU: &str = "Unknown GPU";

static TRADEMARKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(R\)|\(TM\)|\(tm\)").expect("valid regex"));
static CORE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+-Core\s+Processor|\d+-Core").expect("valid regex"));
static CLOCK_AND_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)with.*Graphics|CPU\s*@.*|Processor").expect("valid regex"));
static BRACKETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(rev \w+\)|\[.*?\]").expect("valid regex"));

/// Chip codename to marketing name. Variants come before their base chip so
/// the first substring hit is the most specific one.
const AMD_CHIPS: &[(&str, &str)] = &[
    // RDNA 4
    ("Navi 48 XT", "RX 9070 XT 16GB"),
    ("Navi 48 XL", "RX 9070 XT 12GB"),
    ("Navi 48", "RX 9070 XT"),
    ("Navi 44 XT", "RX 9060 XT 16GB"),
    ("Navi 44 XL", "RX 9060 XT 8GB"),
    ("Navi 44", "RX 9060 XT"),
    // RDNA 3
    ("Navi 31 XT", "RX 7900 XTX"),
    ("Navi 31 XL", "RX 7900 XT"),
    ("Navi 31", "RX 7900 XTX"),
    ("Navi 32 XT", "RX 7800 XT"),
    ("Navi 32", "RX 7800 XT"),
    ("Navi 33 XT", "RX 7600 XT"),
    ("Navi 33 XL", "RX 7600"),
    ("Navi 33", "RX 7600 XT"),
    // RDNA 2
    ("Navi 21 XT", "RX 6900 XT"),
    ("Navi 21 XL", "RX 6800 XT"),
    ("Navi 21", "RX 6900 XT / 6800 XT / 6800"),
    ("Navi 22 XT", "RX 6750 XT"),
    ("Navi 22 XL", "RX 6700 XT"),
    ("Navi 22", "RX 6700 XT"),
    ("Navi 23 XT", "RX 6600 XT"),
    ("Navi 23 XL", "RX 6600"),
    ("Navi 23", "RX 6600 XT / 6600"),
    // RDNA 1
    ("Navi 10", "RX 5700 XT / 5700"),
    ("Navi 12", "RX 5500 XT / 5500"),
    ("Navi 14", "RX 5500 / 5300"),
    // Vega
    ("Vega 10", "RX Vega 64 / 56"),
    ("Vega 12", "RX Vega M"),
    ("Vega 20", "VII"),
    // Polaris
    ("Polaris 10", "RX 580 / 480"),
    ("Polaris 20", "RX 590 / 580"),
    ("Polaris 11", "RX 560 / 460"),
    ("Polaris 12", "RX 550"),
    ("Ellesmere", "RX 480 / 580"),
    ("Baffin", "RX 460 / 560"),
    ("Lexa", "RX 550"),
];

/// CPU and GPU model strings. Each is resolved once per process, failures
/// included; hardware does not change under a running agent.
#[derive(Debug, Default)]
pub struct HardwareIdentity {
    cpu: Option<String>,
    gpu: Option<String>,
}

impl HardwareIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu_name(&mut self, paths: &HostPaths) -> String {
        if let Some(name) = &self.cpu {
            return name.clone();
        }
        let name = match read_cpu_model(paths) {
            Ok(name) => name,
            Err(err) => {
                debug!(error = %err, "не удалось определить модель CPU");
                UNKNOWN_CPU.to_string()
            }
        };
        self.cpu = Some(name.clone());
        name
    }

    pub async fn gpu_name(&mut self, runner: &dyn CommandRunner, timeout: Duration) -> String {
        if let Some(name) = &self.gpu {
            return name.clone();
        }
        let name = match read_gpu_model(runner, timeout).await {
            Ok(name) => name,
            Err(err) => {
                debug!(error = %err, "не удалось определить модель GPU");
                UNKNOWN_GPU.to_string()
            }
        };
        self.gpu = Some(name.clone());
        name
    }
}

fn read_cpu_model(paths: &HostPaths) -> Result<String, ProbeError> {
    let cpuinfo = read_trimmed(&paths.proc("cpuinfo"))?;
    let raw = cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| ProbeError::parse("cpuinfo без поля model name"))?;
    Ok(clean_cpu_name(raw))
}

pub fn clean_cpu_name(raw: &str) -> String {
    let name = TRADEMARKS.replace_all(raw, "");
    let name = CORE_COUNT.replace_all(&name, "");
    let name = CLOCK_AND_SUFFIX.replace_all(&name, "");
    let name = collapse_whitespace(&name);

    if name.contains("AMD") {
        format!("AMD {}", collapse_whitespace(&name.replace("AMD", "")))
    } else if name.contains("Intel") {
        let rest = name.replace("Intel", "").replace("Core ", "");
        format!("Intel {}", collapse_whitespace(&rest))
    } else {
        name
    }
}

async fn read_gpu_model(runner: &dyn CommandRunner, timeout: Duration) -> Result<String, ProbeError> {
    let listing = run_checked(runner, "lspci", &[], timeout).await?;
    let line = listing
        .lines()
        .find(|line| ["VGA", "Display", "3D"].iter().any(|m| line.contains(m)))
        .ok_or_else(|| ProbeError::Unavailable("lspci: нет видеоконтроллера".to_string()))?;
    let description = line
        .split_once(": ")
        .map(|(_, rest)| rest)
        .unwrap_or(line);
    Ok(clean_gpu_name(description))
}

pub fn clean_gpu_name(description: &str) -> String {
    let name = description
        .replace("Advanced Micro Devices, Inc.", "AMD")
        .replace("[AMD/ATI]", "")
        .replace("NVIDIA Corporation", "NVIDIA")
        .replace("Intel Corporation", "Intel");
    let name = collapse_whitespace(&BRACKETS.replace_all(&name, ""));

    AMD_CHIPS
        .iter()
        .find(|(chip, _)| name.contains(chip))
        .map(|(_, marketing)| format!("AMD {marketing}"))
        .unwrap_or(name)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::probe::testing::{fixture_paths, write_file, ScriptedRunner};

    #[test]
    fn cpu_names_are_normalized() {
        assert_eq!(
            clean_cpu_name("AMD Ryzen 7 7800X3D 8-Core Processor"),
            "AMD Ryzen 7 7800X3D"
        );
        assert_eq!(
            clean_cpu_name("Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz"),
            "Intel i7-9700K"
        );
        assert_eq!(
            clean_cpu_name("AMD Ryzen 5 5600G with Radeon Graphics"),
            "AMD Ryzen 5 5600G"
        );
        assert_eq!(clean_cpu_name("ARMv8   Processor rev 1"), "ARMv8 rev 1");
    }

    #[test]
    fn gpu_codenames_map_to_marketing_names() {
        assert_eq!(
            clean_gpu_name(
                "Advanced Micro Devices, Inc. [AMD/ATI] Navi 31 [Radeon RX 7900 XT/7900 XTX] (rev c8)"
            ),
            "AMD RX 7900 XTX"
        );
        assert_eq!(
            clean_gpu_name("Advanced Micro Devices, Inc. [AMD/ATI] Navi 48 XT"),
            "AMD RX 9070 XT 16GB"
        );
        assert_eq!(
            clean_gpu_name("NVIDIA Corporation AD104 [GeForce RTX 4070] (rev a1)"),
            "NVIDIA AD104"
        );
    }

    #[test]
    fn cpu_name_is_memoized() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let paths = fixture_paths(dir.path());
        write_file(
            dir.path(),
            "proc/cpuinfo",
            "processor\t: 0\nmodel name\t: AMD Ryzen 9 7950X 16-Core Processor\n",
        );

        let mut identity = HardwareIdentity::new();
        assert_eq!(identity.cpu_name(&paths), "AMD Ryzen 9 7950X");

        write_file(
            dir.path(),
            "proc/cpuinfo",
            "processor\t: 0\nmodel name\t: Intel(R) Core(TM) i5-8400 CPU @ 2.80GHz\n",
        );
        assert_eq!(identity.cpu_name(&paths), "AMD Ryzen 9 7950X");
    }

    #[test]
    fn unreadable_cpu_source_caches_unknown() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let paths = fixture_paths(dir.path());
        let mut identity = HardwareIdentity::new();
        assert_eq!(identity.cpu_name(&paths), UNKNOWN_CPU);

        write_file(dir.path(), "proc/cpuinfo", "model name\t: AMD Ryzen 5 3600\n");
        assert_eq!(identity.cpu_name(&paths), UNKNOWN_CPU);
    }

    #[tokio::test]
    async fn gpu_name_runs_lspci_once() {
        let runner = ScriptedRunner::new().with(
            "lspci",
            "00:00.0 Host bridge: Advanced Micro Devices, Inc. [AMD] Root Complex\n\
             03:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Navi 21 [Radeon RX 6800/6800 XT / 6900 XT] (rev c1)\n",
        );
        let mut identity = HardwareIdentity::new();
        let timeout = Duration::from_secs(2);

        assert_eq!(
            identity.gpu_name(&runner, timeout).await,
            "AMD RX 6900 XT / 6800 XT / 6800"
        );
        assert_eq!(
            identity.gpu_name(&runner, timeout).await,
            "AMD RX 6900 XT / 6800 XT / 6800"
        );
        assert_eq!(runner.count("lspci"), 1);
    }

    #[tokio::test]
    async fn missing_lspci_caches_unknown_gpu() {
        let runner = ScriptedRunner::new();
        let mut identity = HardwareIdentity::new();
        assert_eq!(
            identity.gpu_name(&runner, Duration::from_secs(2)).await,
            UNKNOWN_GPU
        );
        assert_eq!(
            identity.gpu_name(&runner, Duration::from_secs(2)).await,
            UNKNOWN_GPU
        );
        assert_eq!(runner.count("lspci"), 1);
    }
}
