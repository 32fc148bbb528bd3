use super::probe::{
    parse_f64_loose, read_number, read_trimmed, round_to, run_checked, CommandRunner, HostPaths,
    ProbeError, ProbeTimeouts, GIB, MIB,
};
use crate::state::{LinkType, NetStats};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub name: String,
    pub recv: u64,
    pub sent: u64,
}

/// Per-interface byte counters from `/proc/net/dev`, loopback excluded.
pub fn parse_net_dev(text: &str) -> Vec<InterfaceCounters> {
    text.lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let name = name.trim();
            if name == "lo" {
                return None;
            }
            let fields: Vec<&str> = rest.split_whitespace().collect();
            Some(InterfaceCounters {
                name: name.to_string(),
                recv: fields.first()?.parse().ok()?,
                sent: fields.get(8)?.parse().ok()?,
            })
        })
        .collect()
}

/// Interface with the largest recv+sent among those with any traffic.
/// Ties keep the first one listed.
pub fn most_active(counters: &[InterfaceCounters]) -> Option<&str> {
    let mut best: Option<&InterfaceCounters> = None;
    for iface in counters.iter().filter(|c| c.recv > 0 || c.sent > 0) {
        let total = iface.recv.saturating_add(iface.sent);
        if best.map_or(true, |b| total > b.recv.saturating_add(b.sent)) {
            best = Some(iface);
        }
    }
    best.map(|c| c.name.as_str())
}

#[derive(Debug, Clone, Copy)]
struct CounterSample {
    sent: u64,
    recv: u64,
    at: Instant,
}

/// MiB/s in each direction from two consecutive aggregate counter samples.
#[derive(Debug, Default)]
pub struct Throughput {
    last: Option<CounterSample>,
}

impl Throughput {
    /// Returns `(download, upload)`. The first call and a non-advancing
    /// clock yield zeros; counter resets are floored at zero.
    pub fn observe(&mut self, sent: u64, recv: u64, at: Instant) -> (f64, f64) {
        let previous = self.last.replace(CounterSample { sent, recv, at });
        let Some(previous) = previous else {
            return (0.0, 0.0);
        };
        let dt = at.saturating_duration_since(previous.at).as_secs_f64();
        if dt <= 0.0 {
            return (0.0, 0.0);
        }
        let rate = |now: u64, before: u64| ((now as f64 - before as f64) / dt / MIB).max(0.0);
        (rate(recv, previous.recv), rate(sent, previous.sent))
    }
}

#[derive(Debug, Clone)]
pub struct LatencyProbe {
    pub target: String,
    pub timeout_secs: u64,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        Self {
            target: "8.8.8.8".to_string(),
            timeout_secs: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct NetworkSampler {
    throughput: Throughput,
    latency: LatencyProbe,
}

impl NetworkSampler {
    pub fn new(latency: LatencyProbe) -> Self {
        Self {
            throughput: Throughput::default(),
            latency,
        }
    }

    pub async fn sample(
        &mut self,
        paths: &HostPaths,
        runner: &dyn CommandRunner,
        timeouts: &ProbeTimeouts,
    ) -> (NetStats, u64) {
        self.sample_at(paths, runner, timeouts, Instant::now()).await
    }

    async fn sample_at(
        &mut self,
        paths: &HostPaths,
        runner: &dyn CommandRunner,
        timeouts: &ProbeTimeouts,
        now: Instant,
    ) -> (NetStats, u64) {
        let mut stats = NetStats::default();
        let mut errors = 0_u64;

        match read_trimmed(&paths.proc("net/dev")) {
            Ok(text) => {
                let counters = parse_net_dev(&text);
                let recv: u64 = counters.iter().map(|c| c.recv).sum();
                let sent: u64 = counters.iter().map(|c| c.sent).sum();

                let (down, up) = self.throughput.observe(sent, recv, now);
                stats.download_mbs = down;
                stats.upload_mbs = up;
                stats.total_down_gb = round_to(recv as f64 / GIB, 2);
                stats.total_up_gb = round_to(sent as f64 / GIB, 2);

                if let Some(name) = most_active(&counters) {
                    self.fill_link(&mut stats, name, paths, runner, timeouts).await;
                    stats.interface = Some(name.to_string());
                }
            }
            Err(err) => {
                errors += 1;
                debug!(error = %err, "не удалось прочитать счётчики интерфейсов");
            }
        }

        match self.ping(runner, timeouts.tool).await {
            Ok(ms) => stats.latency_ms = Some(round_to(ms, 1)),
            Err(err) => debug!(host = %self.latency.target, error = %err, "ping без ответа"),
        }

        (stats, errors)
    }

    async fn fill_link(
        &self,
        stats: &mut NetStats,
        iface: &str,
        paths: &HostPaths,
        runner: &dyn CommandRunner,
        timeouts: &ProbeTimeouts,
    ) {
        if iface.starts_with("wl") {
            stats.link_type = Some(LinkType::WiFi);
            match run_checked(runner, "iw", &["dev", iface, "link"], timeouts.tool).await {
                Ok(text) => {
                    let (tx, rx) = parse_iw_bitrates(&text);
                    stats.wifi_tx_mbps = tx;
                    stats.wifi_rx_mbps = rx;
                    let best = tx.unwrap_or(0.0).max(rx.unwrap_or(0.0));
                    if best > 0.0 {
                        stats.link_speed_mbps = Some(best);
                    }
                }
                Err(err) => debug!(iface, error = %err, "iw не вернул параметры канала"),
            }
        } else {
            stats.link_type = Some(LinkType::Ethernet);
            let path = paths.sys(&format!("class/net/{iface}/speed"));
            match read_number::<i64>(&path) {
                Ok(speed) if speed > 0 => stats.link_speed_mbps = Some(speed as f64),
                Ok(_) => {}
                Err(err) => debug!(iface, error = %err, "скорость канала недоступна"),
            }
        }
    }

    async fn ping(&self, runner: &dyn CommandRunner, timeout: Duration) -> Result<f64, ProbeError> {
        let wait = self.latency.timeout_secs.max(1).to_string();
        let text = run_checked(
            runner,
            "ping",
            &["-c", "1", "-W", wait.as_str(), self.latency.target.as_str()],
            timeout,
        )
        .await?;
        parse_ping_time(&text).ok_or_else(|| ProbeError::parse("ping: нет поля time="))
    }
}

/// `(tx, rx)` in MBit/s from `iw dev <iface> link`.
pub fn parse_iw_bitrates(text: &str) -> (Option<f64>, Option<f64>) {
    let mut tx = None;
    let mut rx = None;
    for line in text.lines() {
        let lower = line.to_lowercase();
        let slot = if lower.contains("tx bitrate:") {
            &mut tx
        } else if lower.contains("rx bitrate:") {
            &mut rx
        } else {
            continue;
        };
        *slot = line
            .split_once(':')
            .and_then(|(_, value)| value.split_whitespace().next())
            .and_then(parse_f64_loose);
    }
    (tx, rx)
}

pub fn parse_ping_time(text: &str) -> Option<f64> {
    let (_, rest) = text.split_once("time=")?;
    rest.split_whitespace().next()?.parse().ok()
}
