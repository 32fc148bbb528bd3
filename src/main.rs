mod collectors;
mod config;
mod http;
mod metrics;
mod state;
mod transport;

use axum::serve;
use clap::Parser;
use collectors::probe::SystemRunner;
use collectors::SnapshotAssembler;
use config::Config;
use metrics::{now_unix, Metrics};
use state::{Snapshot, State};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::{Delivery, Transport};

#[derive(Parser, Debug)]
#[command(name = "rigstatd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Collect one snapshot, print it as JSON and exit.
    #[arg(long)]
    once: bool,
    /// Do not POST snapshots to the collector.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) if err.is_missing_file() => {
            warn!(path = %cli.config, "файл конфигурации не найден, используются значения по умолчанию");
            Config::default()
        }
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if cli.dry_run {
        cfg.collector.enabled = false;
    }

    let mut assembler = SnapshotAssembler::new(&cfg, Arc::new(SystemRunner));

    if cli.once {
        let (snapshot, _) = assembler.collect(now_unix()).await;
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "не удалось сериализовать снимок");
                std::process::exit(1);
            }
        }
        return;
    }

    let cpu_name = assembler.cpu_name();
    let gpu_name = assembler.gpu_name().await;
    info!(
        target_url = %cfg.collector.url,
        enabled = cfg.collector.enabled,
        interval = %humantime::format_duration(cfg.interval()),
        game_cache_ttl = %humantime::format_duration(cfg.game_cache_ttl()),
        cpu = %cpu_name,
        gpu = %gpu_name,
        "запуск rigstatd"
    );

    let transport = if cfg.collector.enabled {
        match Transport::new(cfg.collector.url.clone(), cfg.collector_timeout()) {
            Ok(t) => Some(Arc::new(t)),
            Err(err) => {
                error!(error = %err, "не удалось создать HTTP-клиент");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = cfg.listen.clone().map(|listen| {
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };
            info!(%addr, "локальный HTTP-сервер запущен");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    });

    let deliver = transport.map(|transport| {
        let metrics = metrics.clone();
        move |snapshot: Snapshot| spawn_delivery(transport.clone(), metrics.clone(), snapshot)
    });
    let collector_task = tokio::spawn(run_collector(
        assembler,
        cfg.interval(),
        shared_state.clone(),
        metrics.clone(),
        deliver,
        shutdown_rx.clone(),
    ));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");
    let _ = shutdown_tx.send(true);
    let _ = collector_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

/// Runs ticks until shutdown. A shutdown that lands mid-tick drops the
/// partial snapshot unsent.
async fn run_collector<F>(
    mut assembler: SnapshotAssembler,
    interval: Duration,
    shared_state: Arc<RwLock<State>>,
    metrics: Arc<Metrics>,
    mut deliver: Option<F>,
    mut shutdown: watch::Receiver<bool>,
) where
    F: FnMut(Snapshot) + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("получен сигнал остановки цикла сбора");
                break;
            }
            _ = ticker.tick() => {
                let started = Instant::now();
                let (snapshot, errors) = tokio::select! {
                    _ = shutdown.changed() => {
                        info!("тик прерван остановкой");
                        break;
                    }
                    collected = assembler.collect(now_unix()) => collected,
                };

                for (collector, count) in errors {
                    for _ in 0..count {
                        metrics.inc_collect_error(collector);
                    }
                }

                let state_copy = {
                    let mut guard = shared_state.write().await;
                    guard.update_collected(snapshot.clone(), started.elapsed().as_secs_f64());
                    guard.clone()
                };
                metrics.update_from_state(&state_copy);
                metrics.inc_tick();
                log_summary(&state_copy);

                if let Some(deliver) = deliver.as_mut() {
                    deliver(snapshot);
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_summary(state: &State) {
    let snapshot = &state.snapshot;
    info!(
        tick = state.ticks,
        game = %snapshot.game.name,
        cpu_usage = snapshot.cpu.usage_pct,
        cpu_temp = snapshot.cpu.temp_c,
        gpu_usage = snapshot.gpu.usage_pct,
        gpu_temp = snapshot.gpu.temp_c,
        ram = snapshot.memory.percent,
        fps = snapshot.fps,
        "снимок собран"
    );
}

/// Detached so a slow collector never delays the next tick.
fn spawn_delivery(transport: Arc<Transport>, metrics: Arc<Metrics>, snapshot: Snapshot) {
    tokio::spawn(async move {
        let result = transport.send(&snapshot).await;
        match (transport.record(&result), result) {
            (Delivery::Sent, _) => metrics.inc_transmit("ok"),
            (Delivery::Failed { consecutive, report }, Err(err)) => {
                metrics.inc_transmit("error");
                if report {
                    warn!(
                        url = transport.url(),
                        consecutive,
                        error = %err,
                        "не удалось отправить снимок"
                    );
                }
            }
            (Delivery::Failed { .. }, Ok(())) => {}
        }
    });
}
