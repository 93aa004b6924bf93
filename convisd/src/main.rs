//! Headless driver: runs the frame scheduler on a tokio timer and optionally
//! publishes a JSON snapshot of the diagram after every frame.

use std::env;
use std::path::PathBuf;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use convis::dataset::{self, Dataset};
use convis::model::TinyConvNet;
use convis::observer::DiagramAdapter;
use convis::{AppConfig, FrameScheduler, LayoutBuilder, Scene};

mod paths;

use paths::AppPaths;

#[derive(Debug, Clone)]
struct DaemonConfig {
    data_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    mnist_dir: Option<PathBuf>,
    interval_ms: Option<u64>,
    /// Stop after this many frames; `None` runs until Ctrl-C.
    max_ticks: Option<u64>,
    snapshot: bool,
    calibrate: bool,
}

impl DaemonConfig {
    fn from_env_and_args() -> Self {
        let mut data_dir: Option<PathBuf> = env::var("CONVIS_DATA_DIR").ok().map(PathBuf::from);
        let mut config_path: Option<PathBuf> = env::var("CONVIS_CONFIG").ok().map(PathBuf::from);
        let mut mnist_dir: Option<PathBuf> = env::var("CONVIS_MNIST_DIR").ok().map(PathBuf::from);
        let mut interval_ms: Option<u64> = env::var("CONVIS_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok());
        let mut max_ticks: Option<u64> = env::var("CONVIS_TICKS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&n| n > 0);
        let mut snapshot = env::var("CONVIS_SNAPSHOT").is_ok_and(|v| v != "0");
        let mut calibrate = env::var("CONVIS_CALIBRATE").is_ok_and(|v| v != "0");

        let mut args = env::args().skip(1);
        while let Some(a) = args.next() {
            match a.as_str() {
                "--data-dir" => {
                    if let Some(v) = args.next() {
                        data_dir = Some(PathBuf::from(v));
                    }
                }
                "--config" => {
                    if let Some(v) = args.next() {
                        config_path = Some(PathBuf::from(v));
                    }
                }
                "--mnist" => {
                    if let Some(v) = args.next() {
                        mnist_dir = Some(PathBuf::from(v));
                    }
                }
                "--interval-ms" => {
                    if let Some(v) = args.next() {
                        interval_ms = v.parse::<u64>().ok();
                    }
                }
                "--ticks" => {
                    if let Some(v) = args.next() {
                        max_ticks = v.parse::<u64>().ok().filter(|&n| n > 0);
                    }
                }
                "--snapshot" => snapshot = true,
                "--calibrate" => calibrate = true,
                other => warn!("ignoring unknown argument {:?}", other),
            }
        }

        Self {
            data_dir,
            config_path,
            mnist_dir,
            interval_ms,
            max_ticks,
            snapshot,
            calibrate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let daemon = DaemonConfig::from_env_and_args();

    // Setup application paths
    let paths = match &daemon.data_dir {
        Some(dir) => AppPaths::at(dir.clone())?,
        None => AppPaths::new()?,
    };
    info!("Data directory: {:?}", paths.data_dir());

    let config_path = daemon.config_path.clone().unwrap_or_else(|| paths.config_file());
    let mut config = AppConfig::load_or_default(&config_path)?;
    if let Some(ms) = daemon.interval_ms {
        config.scheduler.interval_ms = ms;
    }
    info!("Config: {:?} (interval {} ms)", config_path, config.scheduler.interval_ms);

    let mnist_dir = daemon.mnist_dir.clone().unwrap_or_else(|| paths.mnist_dir());
    let data = dataset::load_or_synthesize(Some(&mnist_dir), config.sample_limit, config.seed);

    let [_, h, w] = config.render.input_dims;
    let mut model = TinyConvNet::new(h, w, config.seed);
    if daemon.calibrate {
        model.calibrate(&data, data.len());
    }

    let mut scene = Scene::new();
    let diagram = LayoutBuilder::new(config.render.clone()).build(&mut scene)?;

    // Ctrl-C stops re-arming the timer; the current frame always completes.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C: stopping after the current frame");
                token.cancel();
            }
        });
    }

    let epoch = Instant::now();
    let mut scheduler = FrameScheduler::new(&config.scheduler);
    scheduler.start(epoch.elapsed());
    let mut correct = 0u64;

    while let Some(deadline) = scheduler.next_deadline() {
        let Some(wake) = epoch.checked_add(deadline) else {
            warn!("Deadline {:?} is beyond the clock range, stopping", deadline);
            scheduler.stop();
            break;
        };
        tokio::select! {
            _ = token.cancelled() => {
                scheduler.stop();
                break;
            }
            _ = sleep_until(wake) => {}
        }

        let Some(report) = scheduler.poll(epoch.elapsed(), &model, &data, &diagram, &mut scene) else {
            continue;
        };
        if report.frame.correct() == Some(true) {
            correct += 1;
        }
        info!("frame {} sample {}: {}", report.tick, report.index, report.frame);

        if daemon.snapshot {
            let snap = DiagramAdapter::new(&diagram, &scene).snapshot();
            match serde_json::to_vec_pretty(&snap) {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(paths.snapshot_file(), bytes).await {
                        error!("Snapshot write failed: {}", e);
                    }
                }
                Err(e) => error!("Snapshot encode failed: {}", e),
            }
        }

        if daemon.max_ticks.is_some_and(|max| scheduler.ticks() >= max) {
            scheduler.stop();
        }
    }

    info!(
        "Stopped after {} frame(s) over {} sample(s), {} correct",
        scheduler.ticks(),
        data.len(),
        correct
    );
    Ok(())
}
