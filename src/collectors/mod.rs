pub mod cpu;
pub mod disk;
pub mod fps;
pub mod game;
pub mod gpu;
pub mod hwmon;
pub mod identity;
pub mod memory;
pub mod network;
pub mod probe;

use crate::config::Config;
use crate::state::Snapshot;
use cpu::CpuSampler;
use disk::DiskAggregator;
use fps::FpsSampler;
use game::{GameDetector, ProcessSource, ProcessTable};
use gpu::GpuSampler;
use identity::HardwareIdentity;
use memory::MemorySampler;
use network::NetworkSampler;
use probe::{CommandRunner, HostPaths, ProbeTimeouts};
use std::sync::Arc;
use std::time::Instant;

/// Failure counts of one tick, keyed by the `collector` metric label.
pub type CollectErrors = Vec<(&'static str, u64)>;

/// Owns every sampler and its cross-tick state. Samplers run one after
/// another; each one substitutes defaults for what it could not read.
pub struct SnapshotAssembler {
    runner: Arc<dyn CommandRunner>,
    paths: HostPaths,
    timeouts: ProbeTimeouts,
    identity: HardwareIdentity,
    cpu: CpuSampler,
    gpu: GpuSampler,
    memory: MemorySampler,
    disks: DiskAggregator,
    network: NetworkSampler,
    game: GameDetector,
    fps: FpsSampler,
    processes: Box<dyn ProcessSource>,
}

impl SnapshotAssembler {
    pub fn new(cfg: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let timeouts = cfg.probe_timeouts();
        Self {
            runner,
            paths: cfg.host_paths(),
            timeouts,
            identity: HardwareIdentity::new(),
            cpu: CpuSampler::new(),
            gpu: GpuSampler::new(),
            memory: MemorySampler::new(),
            disks: DiskAggregator::new(),
            network: NetworkSampler::new(cfg.latency_probe()),
            game: GameDetector::new(cfg.game_cache_ttl(), cfg.library_roots(), timeouts.process),
            fps: FpsSampler::new(cfg.paths.fps_file.clone(), cfg.paths.gamescope_stats.clone()),
            processes: Box::new(ProcessTable::new()),
        }
    }

    #[cfg(test)]
    pub fn with_processes(mut self, source: impl ProcessSource + 'static) -> Self {
        self.processes = Box::new(source);
        self
    }

    pub fn cpu_name(&mut self) -> String {
        self.identity.cpu_name(&self.paths)
    }

    pub async fn gpu_name(&mut self) -> String {
        self.identity
            .gpu_name(self.runner.as_ref(), self.timeouts.tool)
            .await
    }

    pub async fn collect(&mut self, now_unix: i64) -> (Snapshot, CollectErrors) {
        let runner = self.runner.clone();
        let runner = runner.as_ref();
        let timeouts = self.timeouts;

        let procs = self.processes.snapshot();
        let game = self.game.detect(&procs, runner, Instant::now()).await;

        let (mut cpu, cpu_errors) = self.cpu.sample(&self.paths, runner, &timeouts).await;
        cpu.name = self.identity.cpu_name(&self.paths);

        let (mut gpu, gpu_errors) = self.gpu.sample(&self.paths, runner, &timeouts).await;
        gpu.name = self.identity.gpu_name(runner, timeouts.tool).await;

        let (memory, memory_errors) = self.memory.sample(&self.paths, runner, timeouts.tool).await;
        let (disks, disk_errors) = self.disks.sample(runner, &timeouts).await;
        let (network, network_errors) = self.network.sample(&self.paths, runner, &timeouts).await;
        let fps = self.fps.sample();

        let snapshot = Snapshot {
            cpu,
            gpu,
            memory,
            disks,
            network,
            fps,
            game,
            timestamp: now_unix,
        };
        let errors = vec![
            ("cpu", cpu_errors),
            ("gpu", gpu_errors),
            ("memory", memory_errors),
            ("disk", disk_errors),
            ("network", network_errors),
        ];
        (snapshot, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::game::ProcessInfo;
    use crate::collectors::probe::testing::{write_file, ScriptedRunner};
    use crate::state::LinkType;
    use std::path::Path;

    const GB: u64 = 1024 * 1024 * 1024;

    fn config_for(root: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.paths.proc_root = root.join("proc");
        cfg.paths.sys_root = root.join("sys");
        cfg.paths.fps_file = root.join("fps.txt");
        cfg.paths.gamescope_stats = root.join("gamescope-stats");
        cfg.game.library_roots = vec![root.join("steamapps")];
        cfg
    }

    fn host_fixture(root: &Path) {
        write_file(
            root,
            "proc/cpuinfo",
            "processor\t: 0\nmodel name\t: AMD Ryzen 7 5800X3D 8-Core Processor\ncpu MHz\t\t: 3400.000\n",
        );
        write_file(
            root,
            "proc/meminfo",
            "MemTotal:       16777216 kB\nMemAvailable:    8388608 kB\n",
        );
        write_file(
            root,
            "proc/net/dev",
            "Inter-|   Receive\n face |bytes\n    lo: 10 1 0 0 0 0 0 0 10 1 0 0 0 0 0 0\n  eno1: 4096 3 0 0 0 0 0 0 2048 3 0 0 0 0 0 0\n",
        );
        write_file(root, "sys/class/hwmon/hwmon0/name", "k10temp\n");
        write_file(root, "sys/class/hwmon/hwmon0/temp1_input", "61000\n");
        write_file(root, "fps.txt", "90\n");
        write_file(
            root,
            "steamapps/appmanifest_620.acf",
            "\"AppState\"\n{\n\t\"name\"\t\t\"Portal 2\"\n}\n",
        );
    }

    fn scripted_tools() -> ScriptedRunner {
        ScriptedRunner::new()
            .with(
                "top -bn1",
                "%Cpu(s):  9.0 us,  1.0 sy,  0.0 ni, 90.0 id,  0.0 wa\n",
            )
            .with(
                "lspci",
                "01:00.0 VGA compatible controller: NVIDIA Corporation GA104 [GeForce RTX 3070] (rev a1)\n",
            )
            .with(
                "nvidia-smi --query-gpu=utilization.gpu,temperature.gpu,clocks.gr,power.draw,memory.used,memory.total --format=csv,noheader,nounits",
                "55, 66, 1905, 180.5, 6000, 8192\n",
            )
            .with(
                "lsblk -b -o NAME,SIZE,TYPE,MOUNTPOINT -n",
                &format!("sda {} disk \n└─sda1 {} part /\n", 100 * GB, 100 * GB),
            )
            .with(
                "df -B1 /",
                &format!("Filesystem 1B-blocks Used Available Use% Mounted on\n/dev/sda1 {} {} 0 25% /\n", 100 * GB, 25 * GB),
            )
    }

    #[tokio::test]
    async fn tick_assembles_every_section() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let root = dir.path();
        host_fixture(root);
        let runner = Arc::new(scripted_tools());
        let procs = vec![ProcessInfo::new("portal2_linux", "./portal2_linux -game portal2 steam_app_620")];

        let mut assembler =
            SnapshotAssembler::new(&config_for(root), runner.clone()).with_processes(procs);
        let (snapshot, errors) = assembler.collect(1_700_000_000).await;

        assert_eq!(snapshot.timestamp, 1_700_000_000);
        assert_eq!(snapshot.game.name, "Portal 2");
        assert_eq!(snapshot.game.appid.as_deref(), Some("620"));
        assert_eq!(snapshot.cpu.name, "AMD Ryzen 7 5800X3D");
        assert_eq!(snapshot.cpu.usage_pct, 10.0);
        assert_eq!(snapshot.cpu.temp_c, 61.0);
        assert_eq!(snapshot.cpu.freq_mhz, 3400);
        assert_eq!(snapshot.gpu.name, "NVIDIA GA104");
        assert_eq!(snapshot.gpu.usage_pct, 55);
        assert_eq!(snapshot.gpu.vram_total_mb, 8192);
        assert_eq!(snapshot.memory.percent, 50.0);
        assert_eq!(snapshot.disks.len(), 1);
        assert_eq!(snapshot.disks[0].used_gb, 25.0);
        assert_eq!(snapshot.network.interface.as_deref(), Some("eno1"));
        assert_eq!(snapshot.network.link_type, Some(LinkType::Ethernet));
        assert_eq!(snapshot.fps, 90);

        // CPU power has no source in the fixture; everything else was readable.
        let failed: Vec<(&str, u64)> = errors.into_iter().filter(|(_, n)| *n > 0).collect();
        assert_eq!(failed, vec![("cpu", 1)]);
    }

    #[tokio::test]
    async fn empty_host_still_produces_a_snapshot() {
        let dir = tempfile::tempdir().expect("временный каталог");
        let runner = Arc::new(ScriptedRunner::new());

        let mut assembler = SnapshotAssembler::new(&config_for(dir.path()), runner)
            .with_processes(Vec::<ProcessInfo>::new());
        let (snapshot, errors) = assembler.collect(5).await;

        assert_eq!(snapshot.game.name, "Desktop");
        assert_eq!(snapshot.cpu.name, "Unknown CPU");
        assert_eq!(snapshot.gpu.name, "Unknown GPU");
        assert!(snapshot.disks.is_empty());
        assert_eq!(snapshot.fps, 0);
        assert!(errors.iter().all(|(_, n)| *n > 0));
    }

    #[tokio::test]
    async fn identity_is_resolved_once_across_ticks() {
        let dir = tempfile::tempdir().expect("временный каталог");
        host_fixture(dir.path());
        let runner = Arc::new(scripted_tools());

        let mut assembler = SnapshotAssembler::new(&config_for(dir.path()), runner.clone())
            .with_processes(Vec::<ProcessInfo>::new());
        assert_eq!(assembler.gpu_name().await, "NVIDIA GA104");
        assembler.collect(1).await;
        assembler.collect(2).await;

        assert_eq!(runner.count("lspci"), 1);
        assert_eq!(runner.count("top"), 2);
    }
}
