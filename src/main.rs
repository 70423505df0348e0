//! Trigger-capture binary: record frames on serial command, list cameras, or
//! preview a camera.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use trigger_capture::config::default_config_path;
use trigger_capture::controller::{CaptureController, DEFAULT_FPS};
use trigger_capture::{list_cameras, SystemDevices};

#[derive(Debug, Parser)]
#[command(
    name = "trigger-capture",
    version,
    about = "Save camera frames to a video file when a serial line says so"
)]
struct Cli {
    /// List available cameras
    #[arg(short, long)]
    list: bool,

    /// Test run - shows camera input, not save to file
    #[arg(short, long)]
    test: bool,

    /// Camera <id>
    #[arg(short, long, value_name = "id")]
    camera: Option<u32>,

    /// Output file name
    #[arg(short, long, value_name = "name", default_value = "movie.avi")]
    file: PathBuf,

    /// Frame rate written to the file
    #[arg(long, value_name = "fps", default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// Serial configuration file (defaults to comConfig.xml beside the binary)
    #[arg(long, value_name = "path")]
    config: Option<PathBuf>,

    /// Device warm-up delay after opening the camera, in milliseconds
    #[arg(long, value_name = "ms", default_value_t = 1)]
    warmup_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let warmup = Duration::from_millis(cli.warmup_ms);

    match (cli.test, cli.list) {
        (false, false) => record(&cli, warmup).await,
        (false, true) => {
            print_cameras();
            Ok(())
        }
        (true, false) => preview(&cli, warmup).await,
        (true, true) => {
            warn!("--list and --test together select no mode; nothing to do");
            Ok(())
        }
    }
}

async fn record(cli: &Cli, warmup: Duration) -> Result<()> {
    let Some(camera_id) = cli.camera else {
        bail!("missing parameter: --camera <id>");
    };
    info!(camera_id, file = %cli.file.display(), fps = cli.fps, "recording");

    let mut controller = CaptureController::new(SystemDevices).with_warmup(warmup);
    let config = cli.config.clone().unwrap_or_else(default_config_path);
    controller.load_serial_config(&config);
    controller
        .initialize(camera_id, cli.fps, &cli.file)
        .context("initialization failed")?;

    let summary = controller
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await;
    info!(frames = summary.frames_saved, "saved to {}", cli.file.display());
    Ok(())
}

async fn preview(cli: &Cli, warmup: Duration) -> Result<()> {
    let Some(camera_id) = cli.camera else {
        bail!("missing parameter: --camera <id>");
    };
    info!(camera_id, "-- TEST RUN --");

    let mut controller = CaptureController::new(SystemDevices).with_warmup(warmup);
    controller
        .initialize_camera_only(camera_id)
        .context("initialization failed")?;
    controller.run(std::future::pending()).await;
    Ok(())
}

fn print_cameras() {
    println!("Available cameras:");
    for camera in list_cameras() {
        match camera.capabilities {
            Some(caps) => println!(
                "{} - {} ({}, driver {}, {})",
                camera.index,
                camera.name,
                camera.path.display(),
                caps.driver,
                caps.bus_info
            ),
            None => println!("{} - {} ({})", camera.index, camera.name, camera.path.display()),
        }
    }
}
