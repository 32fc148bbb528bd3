use super::probe::{round_to, run_checked, CommandRunner, ProbeError, ProbeTimeouts, GIB};
use crate::state::DiskStats;
use std::collections::HashSet;
use tracing::debug;

const TREE_GLYPHS: &[char] = &['└', '├', '─', '│', '`', '|', '-'];
const EXCLUDED_PREFIXES: &[&str] = &["zram", "swap"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,
    pub size_bytes: u64,
    pub kind: String,
    pub mountpoint: Option<String>,
}

/// Parses `lsblk -b -n -o NAME,SIZE,TYPE,MOUNTPOINT`. Tree glyphs in front of
/// partition names are dropped; the mount point is the rest of the line.
pub fn parse_lsblk(text: &str) -> Vec<BlockDevice> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start_matches(|c: char| TREE_GLYPHS.contains(&c) || c.is_whitespace());
            let mut rest = line;
            let mut fields = Vec::with_capacity(3);
            for _ in 0..3 {
                rest = rest.trim_start();
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                if end == 0 {
                    return None;
                }
                fields.push(&rest[..end]);
                rest = &rest[end..];
            }
            let mountpoint = rest.trim();
            Some(BlockDevice {
                name: fields[0].to_string(),
                size_bytes: fields[1].parse().ok()?,
                kind: fields[2].to_string(),
                mountpoint: (!mountpoint.is_empty()).then(|| mountpoint.to_string()),
            })
        })
        .collect()
}

#[derive(Debug)]
struct DiskAccumulator {
    name: String,
    total_bytes: u64,
    used_bytes: u64,
    partitions_seen: HashSet<String>,
}

/// Physical disks in first-seen order, with per-tick partition bookkeeping.
#[derive(Debug, Default)]
pub struct DiskTable {
    disks: Vec<DiskAccumulator>,
}

impl DiskTable {
    pub fn discover(devices: &[BlockDevice]) -> Self {
        let mut table = Self::default();
        for dev in devices {
            if EXCLUDED_PREFIXES.iter().any(|p| dev.name.starts_with(p)) {
                continue;
            }
            if dev.kind == "disk" && table.position(&dev.name).is_none() {
                table.disks.push(DiskAccumulator {
                    name: dev.name.clone(),
                    total_bytes: dev.size_bytes,
                    used_bytes: 0,
                    partitions_seen: HashSet::new(),
                });
            }
        }
        table
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.disks.iter().position(|d| d.name == name)
    }

    /// Longest disk name that prefixes the partition and is followed by a
    /// digit or `p` (`sda1` -> `sda`, `nvme0n1p2` -> `nvme0n1`).
    pub fn parent_of(&self, partition: &str) -> Option<&str> {
        self.disks
            .iter()
            .filter(|d| {
                partition
                    .strip_prefix(d.name.as_str())
                    .and_then(|rest| rest.chars().next())
                    .map(|c| c.is_ascii_digit() || c == 'p')
                    .unwrap_or(false)
            })
            .max_by_key(|d| d.name.len())
            .map(|d| d.name.as_str())
    }

    /// Marks the partition as counted. Returns false when it already was,
    /// i.e. this is another mount point of the same partition.
    pub fn claim(&mut self, disk: &str, partition: &str) -> bool {
        match self.position(disk) {
            Some(idx) => self.disks[idx].partitions_seen.insert(partition.to_string()),
            None => false,
        }
    }

    pub fn add_used(&mut self, disk: &str, bytes: u64) {
        if let Some(idx) = self.position(disk) {
            let acc = &mut self.disks[idx];
            acc.used_bytes = acc.used_bytes.saturating_add(bytes);
        }
    }

    pub fn finish(self) -> Vec<DiskStats> {
        self.disks
            .into_iter()
            .map(|d| {
                let percent = if d.total_bytes > 0 {
                    round_to(d.used_bytes as f64 / d.total_bytes as f64 * 100.0, 1)
                } else {
                    0.0
                };
                DiskStats {
                    device: format!("/dev/{}", d.name),
                    total_gb: round_to(d.total_bytes as f64 / GIB, 1),
                    used_gb: round_to(d.used_bytes as f64 / GIB, 1),
                    percent,
                    name: d.name,
                }
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct DiskAggregator;

impl DiskAggregator {
    pub fn new() -> Self {
        Self
    }

    pub async fn sample(
        &self,
        runner: &dyn CommandRunner,
        timeouts: &ProbeTimeouts,
    ) -> (Vec<DiskStats>, u64) {
        let listing = match run_checked(
            runner,
            "lsblk",
            &["-b", "-o", "NAME,SIZE,TYPE,MOUNTPOINT", "-n"],
            timeouts.tool,
        )
        .await
        {
            Ok(text) => text,
            Err(err) => {
                debug!(error = %err, "lsblk недоступен");
                return (Vec::new(), 1);
            }
        };

        let devices = parse_lsblk(&listing);
        let mut table = DiskTable::discover(&devices);
        let mut errors = 0_u64;

        for dev in &devices {
            let Some(mountpoint) = dev.mountpoint.as_deref() else {
                continue;
            };
            // lsblk reports swap as the pseudo-mountpoint `[SWAP]`.
            if dev.kind != "part" || !mountpoint.starts_with('/') {
                continue;
            }
            let Some(parent) = table.parent_of(&dev.name).map(str::to_string) else {
                debug!(partition = %dev.name, "родительский диск не найден");
                continue;
            };
            if !table.claim(&parent, &dev.name) {
                debug!(
                    partition = %dev.name,
                    mountpoint,
                    "повторное монтирование раздела пропущено"
                );
                continue;
            }

            match used_bytes(runner, mountpoint, timeouts).await {
                Ok(bytes) => table.add_used(&parent, bytes),
                Err(err) => {
                    errors += 1;
                    debug!(mountpoint, error = %err, "df не вернул занятое место");
                }
            }
        }

        (table.finish(), errors)
    }
}

async fn used_bytes(
    runner: &dyn CommandRunner,
    mountpoint: &str,
    timeouts: &ProbeTimeouts,
) -> Result<u64, ProbeError> {
    let text = run_checked(runner, "df", &["-B1", mountpoint], timeouts.process).await?;
    parse_df_used(&text).ok_or_else(|| ProbeError::parse(format!("df {mountpoint}")))
}

/// `Used` column of the first data row of `df -B1`.
pub fn parse_df_used(text: &str) -> Option<u64> {
    text.lines()
        .nth(1)?
        .split_whitespace()
        .nth(2)?
        .parse()
        .ok()
}
