use super::probe::{read_number, read_trimmed, sorted_entries, HostPaths, ProbeError};
use std::path::{Path, PathBuf};

/// First hwmon directory whose driver name is one of `drivers`.
pub fn find_driver(paths: &HostPaths, drivers: &[&str]) -> Result<(PathBuf, String), ProbeError> {
    let root = paths.sys("class/hwmon");
    for dir in sorted_entries(&root)? {
        let Ok(name) = read_trimmed(&dir.join("name")) else {
            continue;
        };
        if drivers.iter().any(|d| *d == name) {
            return Ok((dir, name));
        }
    }
    Err(ProbeError::Unavailable(format!(
        "hwmon драйвер {drivers:?} не найден"
    )))
}

/// Channel input files of one kind (`temp`, `energy`, `power`) in channel order.
pub fn channel_inputs(dir: &Path, kind: &str) -> Vec<PathBuf> {
    let Ok(entries) = sorted_entries(dir) else {
        return Vec::new();
    };
    let mut inputs: Vec<(u32, PathBuf)> = entries
        .into_iter()
        .filter_map(|path| {
            let file = path.file_name()?.to_str()?;
            let index = file.strip_prefix(kind)?.strip_suffix("_input")?;
            Some((index.parse().ok()?, path))
        })
        .collect();
    inputs.sort_by_key(|(index, _)| *index);
    inputs.into_iter().map(|(_, path)| path).collect()
}

pub fn label_for(input: &Path) -> Option<String> {
    let file = input.file_name()?.to_str()?;
    let label = file.replace("_input", "_label");
    read_trimmed(&input.with_file_name(label)).ok()
}

/// Input whose label satisfies `pred`.
pub fn labeled_input(dir: &Path, kind: &str, pred: impl Fn(&str) -> bool) -> Option<PathBuf> {
    channel_inputs(dir, kind)
        .into_iter()
        .find(|input| label_for(input).map(|l| pred(&l)).unwrap_or(false))
}

pub fn millidegrees(path: &Path) -> Result<f64, ProbeError> {
    let raw: i64 = read_number(path)?;
    Ok(raw as f64 / 1000.0)
}
