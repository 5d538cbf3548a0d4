use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use webcam_classify::capture::{WebcamCapture, WebcamConfig};
use webcam_classify::classifier::{ModelDescriptor, OnnxLoader, TensorLayout};
use webcam_classify::pipeline::{Lifecycle, PipelineConfig};
use webcam_classify::render::{run_renderer, TerminalSurface};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    Nhwc,
    Nchw,
}

impl From<Layout> for TensorLayout {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Nhwc => TensorLayout::Nhwc,
            Layout::Nchw => TensorLayout::Nchw,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Capture resolution width
    #[arg(long, default_value_t = 640)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 480)]
    capture_height: u32,

    /// Camera frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Directory holding model.onnx and metadata.json
    #[arg(short, long, default_value = "./my_model/")]
    model_dir: String,

    /// Input tensor layout of the model
    #[arg(long, value_enum, default_value_t = Layout::Nhwc)]
    layout: Layout,

    /// ONNX Runtime intra-op threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Display refresh rate the loop is paced to
    #[arg(long, default_value_t = 60)]
    refresh_hz: u32,

    /// Do not mirror the camera image
    #[arg(long)]
    no_mirror: bool,

    /// Seconds to wait for the first camera frame
    #[arg(long, default_value_t = 10)]
    ready_timeout: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

enum Command {
    Restart,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim() {
        "r" | "restart" => Some(Command::Restart),
        "q" | "quit" => Some(Command::Quit),
        _ => None,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::info!("webcam-classify starting");
    tracing::info!("Capture: {}x{}@{}", args.capture_width, args.capture_height, args.fps);
    tracing::info!("Model: {}", args.model_dir);
    tracing::info!("Refresh: {}Hz", args.refresh_hz);

    let capture = WebcamCapture::new(WebcamConfig {
        device_index: args.input_device,
        width: args.capture_width,
        height: args.capture_height,
        fps: args.fps,
    });
    let loader = OnnxLoader {
        layout: args.layout.into(),
        intra_threads: args.threads,
    };
    let config = PipelineConfig {
        model: ModelDescriptor::from_dir(&args.model_dir),
        refresh_hz: args.refresh_hz,
        mirror: !args.no_mirror,
        ready_timeout: Duration::from_secs(args.ready_timeout),
    };

    let mut lifecycle = Lifecycle::new(config, Arc::new(capture), Arc::new(loader));

    let cancel = CancellationToken::new();
    let renderer = tokio::spawn(run_renderer(
        TerminalSurface::stdout(),
        lifecycle.sink().subscribe(),
        lifecycle.error_watch(),
        cancel.clone(),
    ));

    let mut commands = BufReader::new(tokio::io::stdin()).lines();

    // A fatal start error is shown by the renderer; restart stays available
    tokio::select! {
        _ = lifecycle.start() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted during startup");
            lifecycle.shutdown().await;
            cancel.cancel();
            return Ok(());
        }
    }

    tracing::info!("Type 'r' to restart, 'q' to quit, or press Ctrl+C");

    loop {
        tokio::select! {
            line = commands.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => match parse_command(&line) {
                        Some(Command::Restart) => {
                            tokio::select! {
                                _ = lifecycle.restart() => {}
                                _ = tokio::signal::ctrl_c() => {
                                    tracing::info!("Interrupted during restart");
                                    break;
                                }
                            }
                        }
                        Some(Command::Quit) => break,
                        None => {}
                    },
                    None => {
                        // stdin closed; keep running until Ctrl+C
                        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl+C")?;
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    if tokio::time::timeout(Duration::from_secs(5), lifecycle.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Inference still outstanding at exit");
    }
    cancel.cancel();
    let _ = renderer.await;

    Ok(())
}
