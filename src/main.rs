// SPDX-License-Identifier: GPL-3.0-only

use camera_bridge::backends::camera::get_backend;
use camera_bridge::constants::{FRAME_LOG_INTERVAL, SHUTDOWN_POLL_INTERVAL, exit_code};
use camera_bridge::gpu::GpuFrame;
use camera_bridge::{Config, LifecycleCoordinator, WgpuStack};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser)]
#[command(name = "camera-bridge")]
#[command(about = "Stream camera frames into GPU memory")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: ~/.config/camera-bridge/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(short, long)]
    duration: Option<u64>,
}

fn main() -> ExitCode {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_bridge=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(exit_code::SETUP_FAILED)
        }
    }
}

fn run(cli: Cli) -> Result<u8, Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.as_deref())?;

    let uploaded = Arc::new(AtomicU64::new(0));
    let uploaded_clone = uploaded.clone();
    let gpu = WgpuStack::new().with_frame_handler(Arc::new(move |frame: &GpuFrame| {
        let count = uploaded_clone.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(FRAME_LOG_INTERVAL) {
            info!(
                frames = count,
                width = frame.width,
                height = frame.height,
                bytes = frame.len,
                "GPU frames received"
            );
        }
    }));

    // Installed before setup so a Ctrl+C during start is not lost
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let mut coordinator =
        LifecycleCoordinator::new(get_backend(&config), Box::new(gpu), config.capture_settings());

    let active = match coordinator.start() {
        Ok(active) => active,
        Err(e) => {
            eprintln!("Error: {}", e.error);
            for warning in &e.warnings {
                eprintln!("Warning: {}", warning);
            }
            return Ok(exit_code::SETUP_FAILED);
        }
    };

    println!("Camera resolution: {}", active.resolution);
    println!("Streaming... (press Ctrl+C to stop)");

    wait_for_stop(&stop_flag, cli.duration.map(Duration::from_secs));

    let report = coordinator.shutdown();
    println!(
        "Frames delivered: {}, dropped: {}, on GPU: {}",
        active.endpoint().delivered_frames(),
        active.endpoint().dropped_frames(),
        uploaded.load(Ordering::Relaxed)
    );

    if report.is_clean() {
        Ok(exit_code::CLEAN)
    } else {
        for warning in &report.warnings {
            eprintln!("Warning: {}", warning);
        }
        Ok(exit_code::DEGRADED_SHUTDOWN)
    }
}

/// Block until `stop_flag` is raised or `limit` has elapsed
fn wait_for_stop(stop_flag: &AtomicBool, limit: Option<Duration>) {
    let start = Instant::now();
    while !stop_flag.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }
        std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }
}
