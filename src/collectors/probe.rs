use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("источник недоступен: {0}")]
    Unavailable(String),
    #[error("неожиданный формат данных: {0}")]
    Parse(String),
    #[error("{tool}: превышено время ожидания ({timeout_ms} мс)")]
    Timeout { tool: String, timeout_ms: u64 },
    #[error("{tool}: завершился с кодом {code:?}")]
    Failed { tool: String, code: Option<i32> },
}

impl ProbeError {
    pub fn unavailable(path: &Path, err: std::io::Error) -> Self {
        Self::Unavailable(format!("{}: {err}", path.display()))
    }

    pub fn parse(what: impl Into<String>) -> Self {
        Self::Parse(what.into())
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
}

impl ToolOutput {
    pub fn into_success(self, tool: &str) -> Result<String, ProbeError> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(ProbeError::Failed {
                tool: tool.to_string(),
                code: self.code,
            })
        }
    }
}

/// Runs an external tool with a hard time bound. A timeout or a spawn
/// failure is a probe failure, never a panic.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ProbeError>;
}

pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, ProbeError> {
    runner
        .run(program, args, timeout)
        .await?
        .into_success(program)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ProbeError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(ToolOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            }),
            Ok(Err(err)) => Err(ProbeError::Unavailable(format!("{program}: {err}"))),
            Err(_elapsed) => Err(ProbeError::Timeout {
                tool: program.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeTimeouts {
    pub tool: Duration,
    pub process: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            tool: Duration::from_secs(2),
            process: Duration::from_secs(1),
        }
    }
}

/// Roots of the kernel text interfaces. Overridable so the samplers can run
/// against a fixture tree.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
        }
    }
}

impl HostPaths {
    pub fn proc(&self, rel: &str) -> PathBuf {
        self.proc_root.join(rel)
    }

    pub fn sys(&self, rel: &str) -> PathBuf {
        self.sys_root.join(rel)
    }
}

pub fn read_trimmed(path: &Path) -> Result<String, ProbeError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|err| ProbeError::unavailable(path, err))
}

pub fn read_number<T: FromStr>(path: &Path) -> Result<T, ProbeError> {
    let text = read_trimmed(path)?;
    text.parse::<T>()
        .map_err(|_| ProbeError::parse(format!("{}: '{text}'", path.display())))
}

/// Sorted directory listing; entries that cannot be read are skipped.
pub fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, ProbeError> {
    let entries = fs::read_dir(dir).map_err(|err| ProbeError::unavailable(dir, err))?;
    let mut out: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    out.sort();
    Ok(out)
}

pub fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

pub const MIB: f64 = 1024.0 * 1024.0;
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_parse_accepts_units_and_commas() {
        assert_eq!(parse_f64_loose(" 42.5 "), Some(42.5));
        assert_eq!(parse_f64_loose("12,5 W"), Some(12.5));
        assert_eq!(parse_f64_loose("[N/A]"), None);
    }

    #[test]
    fn round_to_keeps_requested_precision() {
        assert_eq!(round_to(41.26, 1), 41.3);
        assert_eq!(round_to(0.004, 2), 0.0);
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let err = SystemRunner
            .run("definitely-not-a-real-tool-rigstatd", &[], Duration::from_secs(1))
            .await
            .expect_err("инструмент не должен существовать");
        assert!(matches!(err, ProbeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let runner = testing::ScriptedRunner::new().with_exit("nvidia-smi", 9, "");
        let err = run_checked(&runner, "nvidia-smi", &[], Duration::from_secs(1))
            .await
            .expect_err("ненулевой код должен считаться ошибкой");
        assert!(matches!(err, ProbeError::Failed { code: Some(9), .. }));
    }
}
