use crate::state::State;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub agent_cpu_usage_percent: Gauge,
    pub agent_cpu_temperature_celsius: Gauge,
    pub agent_cpu_frequency_mhz: Gauge,
    pub agent_cpu_power_watts: Gauge,
    pub agent_gpu_usage_percent: Gauge,
    pub agent_gpu_temperature_celsius: Gauge,
    pub agent_gpu_power_watts: Gauge,
    pub agent_gpu_vram_used_megabytes: Gauge,
    pub agent_gpu_vram_total_megabytes: Gauge,
    pub agent_ram_used_gigabytes: Gauge,
    pub agent_ram_total_gigabytes: Gauge,
    pub agent_ram_usage_percent: Gauge,
    pub agent_disk_used_gigabytes: GaugeVec,
    pub agent_disk_usage_percent: GaugeVec,
    pub agent_net_download_megabytes_per_sec: Gauge,
    pub agent_net_upload_megabytes_per_sec: Gauge,
    pub agent_net_latency_ms: Gauge,
    pub agent_fps: Gauge,
    pub agent_uptime_seconds: Gauge,
    pub agent_tick_duration_seconds: Gauge,
    pub agent_ticks_total: Counter,
    pub agent_scrape_count_total: Counter,
    pub agent_collect_errors_total: CounterVec,
    pub agent_transmit_total: CounterVec,
    pub agent_last_collect_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_cpu_usage_percent = Gauge::with_opts(opts!(
            "agent_cpu_usage_percent",
            "CPU usage in percent (100 - idle)"
        ))?;
        let agent_cpu_temperature_celsius = Gauge::with_opts(opts!(
            "agent_cpu_temperature_celsius",
            "CPU package temperature in Celsius"
        ))?;
        let agent_cpu_frequency_mhz =
            Gauge::with_opts(opts!("agent_cpu_frequency_mhz", "CPU0 frequency in MHz"))?;
        let agent_cpu_power_watts = Gauge::with_opts(opts!(
            "agent_cpu_power_watts",
            "CPU package power in watts (0 when unknown)"
        ))?;
        let agent_gpu_usage_percent =
            Gauge::with_opts(opts!("agent_gpu_usage_percent", "GPU usage in percent"))?;
        let agent_gpu_temperature_celsius = Gauge::with_opts(opts!(
            "agent_gpu_temperature_celsius",
            "GPU temperature in Celsius"
        ))?;
        let agent_gpu_power_watts =
            Gauge::with_opts(opts!("agent_gpu_power_watts", "GPU power draw in watts"))?;
        let agent_gpu_vram_used_megabytes = Gauge::with_opts(opts!(
            "agent_gpu_vram_used_megabytes",
            "GPU memory used in MB"
        ))?;
        let agent_gpu_vram_total_megabytes = Gauge::with_opts(opts!(
            "agent_gpu_vram_total_megabytes",
            "GPU memory total in MB"
        ))?;
        let agent_ram_used_gigabytes = Gauge::with_opts(opts!(
            "agent_ram_used_gigabytes",
            "Used RAM in GB (total - available)"
        ))?;
        let agent_ram_total_gigabytes =
            Gauge::with_opts(opts!("agent_ram_total_gigabytes", "Total RAM in GB"))?;
        let agent_ram_usage_percent =
            Gauge::with_opts(opts!("agent_ram_usage_percent", "RAM usage in percent"))?;
        let agent_disk_used_gigabytes = GaugeVec::new(
            opts!(
                "agent_disk_used_gigabytes",
                "Used GB summed over mounted partitions by physical disk"
            ),
            &["disk"],
        )?;
        let agent_disk_usage_percent = GaugeVec::new(
            opts!(
                "agent_disk_usage_percent",
                "Disk usage in percent by physical disk"
            ),
            &["disk"],
        )?;
        let agent_net_download_megabytes_per_sec = Gauge::with_opts(opts!(
            "agent_net_download_megabytes_per_sec",
            "Receive rate across non-loopback interfaces in MiB/s"
        ))?;
        let agent_net_upload_megabytes_per_sec = Gauge::with_opts(opts!(
            "agent_net_upload_megabytes_per_sec",
            "Transmit rate across non-loopback interfaces in MiB/s"
        ))?;
        let agent_net_latency_ms = Gauge::with_opts(opts!(
            "agent_net_latency_ms",
            "ICMP round trip in ms (-1 when no reply)"
        ))?;
        let agent_fps = Gauge::with_opts(opts!("agent_fps", "Frame rate reported by overlay"))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Agent uptime in seconds"))?;
        let agent_tick_duration_seconds = Gauge::with_opts(opts!(
            "agent_tick_duration_seconds",
            "Duration of the last sampling tick in seconds"
        ))?;
        let agent_ticks_total =
            Counter::with_opts(opts!("agent_ticks_total", "Completed sampling ticks"))?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let agent_collect_errors_total = CounterVec::new(
            opts!(
                "agent_collect_errors_total",
                "Collector errors total by collector"
            ),
            &["collector"],
        )?;
        let agent_transmit_total = CounterVec::new(
            opts!(
                "agent_transmit_total",
                "Snapshot deliveries to the collector by result"
            ),
            &["result"],
        )?;
        let agent_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "agent_last_collect_timestamp_seconds",
            "Unix timestamp of the last collection"
        ))?;

        register(&registry, &agent_cpu_usage_percent)?;
        register(&registry, &agent_cpu_temperature_celsius)?;
        register(&registry, &agent_cpu_frequency_mhz)?;
        register(&registry, &agent_cpu_power_watts)?;
        register(&registry, &agent_gpu_usage_percent)?;
        register(&registry, &agent_gpu_temperature_celsius)?;
        register(&registry, &agent_gpu_power_watts)?;
        register(&registry, &agent_gpu_vram_used_megabytes)?;
        register(&registry, &agent_gpu_vram_total_megabytes)?;
        register(&registry, &agent_ram_used_gigabytes)?;
        register(&registry, &agent_ram_total_gigabytes)?;
        register(&registry, &agent_ram_usage_percent)?;
        register(&registry, &agent_disk_used_gigabytes)?;
        register(&registry, &agent_disk_usage_percent)?;
        register(&registry, &agent_net_download_megabytes_per_sec)?;
        register(&registry, &agent_net_upload_megabytes_per_sec)?;
        register(&registry, &agent_net_latency_ms)?;
        register(&registry, &agent_fps)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &agent_tick_duration_seconds)?;
        register(&registry, &agent_ticks_total)?;
        register(&registry, &agent_scrape_count_total)?;
        register(&registry, &agent_collect_errors_total)?;
        register(&registry, &agent_transmit_total)?;
        register(&registry, &agent_last_collect_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            agent_cpu_usage_percent,
            agent_cpu_temperature_celsius,
            agent_cpu_frequency_mhz,
            agent_cpu_power_watts,
            agent_gpu_usage_percent,
            agent_gpu_temperature_celsius,
            agent_gpu_power_watts,
            agent_gpu_vram_used_megabytes,
            agent_gpu_vram_total_megabytes,
            agent_ram_used_gigabytes,
            agent_ram_total_gigabytes,
            agent_ram_usage_percent,
            agent_disk_used_gigabytes,
            agent_disk_usage_percent,
            agent_net_download_megabytes_per_sec,
            agent_net_upload_megabytes_per_sec,
            agent_net_latency_ms,
            agent_fps,
            agent_uptime_seconds,
            agent_tick_duration_seconds,
            agent_ticks_total,
            agent_scrape_count_total,
            agent_collect_errors_total,
            agent_transmit_total,
            agent_last_collect_timestamp_seconds,
        }))
    }

    pub fn update_from_state(&self, state: &State) {
        let snap = &state.snapshot;

        self.agent_cpu_usage_percent.set(snap.cpu.usage_pct);
        self.agent_cpu_temperature_celsius.set(snap.cpu.temp_c);
        self.agent_cpu_frequency_mhz.set(snap.cpu.freq_mhz as f64);
        self.agent_cpu_power_watts.set(snap.cpu.power_w);

        self.agent_gpu_usage_percent.set(snap.gpu.usage_pct as f64);
        self.agent_gpu_temperature_celsius.set(snap.gpu.temp_c);
        self.agent_gpu_power_watts.set(snap.gpu.power_w);
        self.agent_gpu_vram_used_megabytes
            .set(snap.gpu.vram_used_mb as f64);
        self.agent_gpu_vram_total_megabytes
            .set(snap.gpu.vram_total_mb as f64);

        self.agent_ram_used_gigabytes.set(snap.memory.used_gb);
        self.agent_ram_total_gigabytes.set(snap.memory.total_gb);
        self.agent_ram_usage_percent.set(snap.memory.percent);

        self.agent_disk_used_gigabytes.reset();
        self.agent_disk_usage_percent.reset();
        for d in &snap.disks {
            self.agent_disk_used_gigabytes
                .with_label_values(&[&d.name])
                .set(d.used_gb);
            self.agent_disk_usage_percent
                .with_label_values(&[&d.name])
                .set(d.percent);
        }

        self.agent_net_download_megabytes_per_sec
            .set(snap.network.download_mbs);
        self.agent_net_upload_megabytes_per_sec
            .set(snap.network.upload_mbs);
        self.agent_net_latency_ms
            .set(snap.network.latency_ms.unwrap_or(-1.0));
        self.agent_fps.set(snap.fps as f64);

        self.agent_last_collect_timestamp_seconds
            .set(state.last_collect_timestamp_seconds as f64);
        self.agent_tick_duration_seconds
            .set(state.last_tick_duration_secs);

        let now = now_unix();
        let uptime = now.saturating_sub(state.started_at_unix) as f64;
        self.agent_uptime_seconds.set(uptime);
    }

    pub fn inc_tick(&self) {
        self.agent_ticks_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, collector: &str) {
        self.agent_collect_errors_total
            .with_label_values(&[collector])
            .inc();
    }

    pub fn inc_transmit(&self, result: &str) {
        self.agent_transmit_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
