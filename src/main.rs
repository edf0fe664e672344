//! fullshot CLI
//!
//! Captures a page with a headless Chromium and optionally serves the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fullshot_web::browser::{BrowserConfig, BrowserController};
use fullshot_web::capture::{CaptureConfig, CaptureDriver};
use fullshot_web::handoff::HandoffStore;
use fullshot_web::page::Settle;
use fullshot_web::viewer::Viewer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Full-page screenshots for Chromium
#[derive(Parser, Debug)]
#[command(name = "fullshot")]
#[command(version)]
#[command(about = "Capture full-page screenshots with a headless Chromium")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture a page
    Capture(CaptureArgs),
    /// Serve the last capture from a store directory
    View(ViewArgs),
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// URL to capture
    url: String,

    /// Capture only the visible viewport
    #[arg(long)]
    visible: bool,

    /// Write the PNG to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mirror the handoff slot to this directory
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Serve the capture after it completes
    #[arg(long)]
    view: bool,

    /// Viewer port
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Viewer host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Viewport width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Viewport height
    #[arg(long, default_value = "800")]
    height: u32,

    /// Path to Chrome/Chromium executable
    #[arg(long)]
    chrome_path: Option<String>,

    /// Show the browser window
    #[arg(long)]
    no_headless: bool,

    /// Disable the Chromium sandbox
    #[arg(long)]
    no_sandbox: bool,

    /// Hide nav and header elements while capturing
    #[arg(long)]
    hide_navigation: bool,

    /// Poll for stable layout instead of a fixed delay after each scroll
    #[arg(long)]
    poll_settle: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct ViewArgs {
    /// Directory holding the handoff slot
    #[arg(long, default_value = ".")]
    store_dir: PathBuf,

    /// Viewer port
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Viewer host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn viewer_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid viewer address {}:{}", host, port))
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Capture(args) => capture(args).await,
        Command::View(args) => view(args).await,
    }
}

async fn capture(args: CaptureArgs) -> Result<()> {
    init_tracing(args.verbose);

    let store = match &args.store_dir {
        Some(dir) => HandoffStore::at_dir(dir)
            .with_context(|| format!("Cannot open store directory {}", dir.display()))?,
        None => HandoffStore::in_memory(),
    };
    let store = Arc::new(store);

    let mut browser_config = BrowserConfig::builder()
        .headless(!args.no_headless)
        .viewport(args.width, args.height)
        .sandbox(!args.no_sandbox);
    if let Some(path) = &args.chrome_path {
        browser_config = browser_config.chrome_path(path);
    }

    let mut capture_config = CaptureConfig::builder().hide_navigation(args.hide_navigation);
    if args.poll_settle {
        capture_config = capture_config.settle(Settle::poll());
    }

    let (progress_tx, mut progress_rx) = watch::channel(0u8);
    let driver =
        CaptureDriver::new(capture_config.build(), Arc::clone(&store)).with_progress(progress_tx);
    let progress = tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let percent = *progress_rx.borrow_and_update();
            info!("Capture progress: {}%", percent);
        }
    });

    let controller = BrowserController::with_config(browser_config.build())
        .await
        .context("Failed to launch browser")?;

    let outcome = match controller.open(&args.url).await {
        Ok(surface) if args.visible => driver.capture_visible(&surface).await,
        Ok(surface) => driver.run_full_page_capture(&surface).await,
        Err(e) => Err(e),
    };

    if let Err(e) = controller.close().await {
        warn!("Browser did not close cleanly: {}", e);
    }
    drop(driver);
    let _ = progress.await;

    let composite = outcome.with_context(|| format!("Failed to capture {}", args.url))?;
    println!(
        "Captured {} ({}x{})",
        args.url,
        composite.width(),
        composite.height()
    );

    if let Some(path) = &args.output {
        std::fs::write(path, composite.to_png()?)
            .with_context(|| format!("Cannot write {}", path.display()))?;
        println!("Saved {}", path.display());
    }

    if args.view {
        let viewer = Viewer::load(&store)?;
        let addr = viewer_addr(&args.host, args.port)?;
        println!("Viewer at http://{}", addr);
        viewer.serve(addr).await?;
    }

    Ok(())
}

async fn view(args: ViewArgs) -> Result<()> {
    init_tracing(args.verbose);

    let store = HandoffStore::at_dir(&args.store_dir)
        .with_context(|| format!("Cannot open store directory {}", args.store_dir.display()))?;
    let viewer = Viewer::load(&store)?;
    if !viewer.has_image() {
        warn!("No screenshot in {}", args.store_dir.display());
    }

    let addr = viewer_addr(&args.host, args.port)?;
    println!("Viewer at http://{}", addr);
    viewer.serve(addr).await?;
    Ok(())
}
