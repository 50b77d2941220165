use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use frame_playback::config::{AppConfig, DEFAULT_CONFIG_PATH};
use frame_playback::navigation::Navigator;
use frame_playback::supervisor::ScriptSupervisor;
use frame_playback::web::{self, AppState};
use frame_playback::{logging, playlist, scheduler};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "frame-playback",
    version,
    about = "Slideshow playback engine and control API for the photo frame"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the playlist RNG seed.
    #[arg(long = "playlist-seed", value_name = "SEED")]
    playlist_seed: Option<u64>,

    /// Print the primary folder's playlist and exit without touching any state.
    #[arg(long = "playlist-dry-run")]
    playlist_dry_run: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    if let Err(err) = try_main().await {
        error!(error = ?err, "frame-playback exited with error");
        eprintln!("frame-playback: {err:?}");
        std::process::exit(1);
    }
}

async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = AppConfig::load(&cli.config)?;
    if let Some(seed) = cli.playlist_seed {
        cfg.playlist.seed = Some(seed);
    }
    info!(
        config = %cli.config.display(),
        root = %cfg.root_dir.display(),
        primary = %cfg.primary_folder,
        "starting frame-playback"
    );

    let navigator = Arc::new(Navigator::from_config(&cfg));
    if cli.playlist_dry_run {
        return print_playlist(&cfg, &navigator);
    }

    navigator
        .library()
        .create_folder(&cfg.primary_folder)
        .context("failed to prepare primary folder")?;
    navigator.bootstrap();

    let scripts = Arc::new(ScriptSupervisor::new(cfg.scripts.clone()));
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let mut tasks = JoinSet::new();

    tasks.spawn({
        let navigator = navigator.clone();
        let cancel = cancel.clone();
        let tick = cfg.scheduler.tick;
        async move {
            scheduler::run(navigator, tick, cancel)
                .await
                .context("scheduler task failed")
        }
    });

    tasks.spawn({
        let state = AppState {
            navigator: navigator.clone(),
            scripts: scripts.clone(),
        };
        let cancel = cancel.clone();
        let addr = cfg.bind_addr();
        async move {
            web::serve(addr, state, cancel)
                .await
                .context("http task failed")
        }
    });

    // Either task ending means the service is no longer whole.
    if let Some(res) = tasks.join_next().await {
        log_task_exit(res);
    }
    cancel.cancel();
    while let Some(res) = tasks.join_next().await {
        log_task_exit(res);
    }
    scripts.stop().await;
    info!("frame-playback stopped");
    Ok(())
}

fn log_task_exit(res: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = ?err, "task error"),
        Err(err) => error!(error = %err, "join error"),
    }
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "ctrl-c handler failed");
                std::future::pending::<()>().await;
            }
        };
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(err) => {
                    warn!(error = %err, "failed to register SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT; shutting down"),
            _ = terminate => info!("received SIGTERM; shutting down"),
        }
        cancel.cancel();
    });
}

fn print_playlist(cfg: &AppConfig, navigator: &Navigator) -> Result<()> {
    let entries = navigator
        .library()
        .list_images(&cfg.primary_folder)
        .context("failed to list primary folder")?;
    let weighted = navigator.settings().load().weighted_shuffle;
    let mut rng = playlist::rng_for(&cfg.playlist);
    let order = playlist::build_order(&entries, weighted, &cfg.playlist, SystemTime::now(), &mut rng);
    println!(
        "# playlist dry run\n# folder: {}\n# photos: {}\n# weighted: {}\n# seed: {}",
        cfg.primary_folder,
        order.len(),
        weighted,
        cfg.playlist
            .seed
            .map(|s| s.to_string())
            .unwrap_or_else(|| "random".to_string())
    );
    for (i, name) in order.iter().enumerate() {
        println!("{i:>4} {name}");
    }
    Ok(())
}
