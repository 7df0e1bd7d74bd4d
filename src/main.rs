//! Binary entrypoint for the bird slideshow.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use bird_slideshow::cache::disk::DiskCache;
use bird_slideshow::config::{self, Configuration};
use bird_slideshow::events::{Command, Frame};
use bird_slideshow::navigation::NavigationController;
use bird_slideshow::playlist::Playlist;
use bird_slideshow::sources::ImageSource;
use bird_slideshow::tasks::preloader::{PreloadOptions, Preloader};
use bird_slideshow::tasks::{input, slideshow, viewer};

#[derive(Debug, Parser)]
#[command(name = "bird-slideshow", version, about = "Slideshow over local, web and remote image sources")]
struct Cli {
    /// Path to YAML config file (searched for when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the per-image delay (ms)
    #[arg(long, value_name = "MILLIS")]
    wait_ms: Option<u64>,

    /// Start in fullscreen mode
    #[arg(long)]
    fullscreen: bool,

    /// Print the playlist without starting the show
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("bird_slideshow={level}").parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper_util=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(run(cli));
    // stdin reads block a runtime thread until the next line; don't wait for it
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config::find_config_file().ok_or_else(|| {
            anyhow!(
                "no configuration found; pass --config or create ~/.config/{}",
                config::CONFIG_FILE_NAME
            )
        })?,
    };
    let mut cfg = Configuration::from_yaml_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    if let Some(ms) = cli.wait_ms {
        cfg.wait_time = Duration::from_millis(ms);
    }
    if cli.fullscreen {
        cfg.start_full = true;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    info!("Loaded configuration from {}:\n{:#?}", config_path.display(), cfg);

    let sources = cfg
        .sources
        .iter()
        .map(|spec| ImageSource::from_spec(spec, &cfg.fetch))
        .collect::<Result<Vec<_>>>()?;
    let playlist = Playlist::build(sources, cfg.playlist_order, cfg.shuffle_seed).await;
    info!(count = playlist.len(), "playlist built");

    if cli.dry_run {
        print_playlist(&playlist);
        return Ok(());
    }

    let disk = DiskCache::open(&cfg.cache_dir, cfg.disk_cache.max_bytes, cfg.disk_cache.max_age)?;

    let preloader = Preloader::new(Arc::new(playlist), Arc::new(disk), PreloadOptions::from(&cfg));
    let controller = NavigationController::new(preloader.clone(), cfg.start_full)?;

    let cancel = CancellationToken::new();
    let mut workers = preloader.spawn_workers(cancel.clone());

    // Channels (small/bounded)
    let (command_tx, command_rx) = mpsc::channel::<Command>(16); // Input -> Slideshow
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>(2); // Slideshow -> Viewer

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();
    tasks.spawn({
        let cancel = cancel.clone();
        async move { viewer::run(frame_rx, cancel).await.context("viewer task failed") }
    });
    tasks.spawn({
        let cancel = cancel.clone();
        async move { input::run(command_tx, cancel).await.context("input task failed") }
    });

    let outcome = slideshow::run(controller, cfg.wait_time, command_rx, frame_tx, cancel.clone()).await;
    cancel.cancel();

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }
    while workers.join_next().await.is_some() {}

    let stats = preloader.stats();
    info!(
        memory_hits = stats.memory_hits,
        disk_hits = stats.disk_hits,
        source_fetches = stats.source_fetches,
        decodes = stats.decodes,
        failures = stats.failures,
        "slideshow stopped"
    );
    outcome
}

fn print_playlist(playlist: &Playlist) {
    println!("# playlist dry run\n# items: {}\n", playlist.len());
    if playlist.is_empty() {
        println!("(playlist empty)");
        return;
    }
    for (idx, item) in playlist.items().iter().enumerate() {
        let source = playlist.source(item);
        println!("  {:>4}: [{}] {}", idx + 1, source.kind(), item);
    }
}
