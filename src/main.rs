use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rust_parallax_viewer::config::{Configuration, DisplayMode, SceneSource};
use rust_parallax_viewer::events::{HostEvent, LoadRequest, SceneLoaded, ViewerCommand};
use rust_parallax_viewer::tasks;
use rust_parallax_viewer::tasks::host::ScenePlaylist;
use rust_parallax_viewer::tasks::viewer::ViewerLinks;

#[derive(Debug, Parser)]
#[command(
    name = "parallax-viewer",
    version,
    about = "depth-map parallax viewer with stereo and immersive output"
)]
struct Args {
    /// Colour image to display
    #[arg(value_name = "IMAGE", requires = "depth_map")]
    image: Option<PathBuf>,
    /// Greyscale depth map matching IMAGE (bright = near)
    #[arg(value_name = "DEPTH_MAP")]
    depth_map: Option<PathBuf>,
    /// Path to YAML config
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Override the configured display mode (full, hsbs, fsbs, anaglyph)
    #[arg(long = "display-mode", value_name = "MODE")]
    display_mode: Option<DisplayMode>,
    /// Use a keyboard-driven simulated headset for immersive mode
    #[arg(long = "simulate-immersive")]
    simulate_immersive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info with GPU stack at warn)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,wgpu_core=warn,wgpu_hal=warn,naga=warn,winit=warn")
        }))
        .with_target(false)
        .compact()
        .init();

    let Args {
        image,
        depth_map,
        config,
        display_mode,
        simulate_immersive,
    } = Args::parse();

    let mut cfg = match config.as_ref() {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };
    if let Some(mode) = display_mode {
        cfg.display_mode = mode;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::debug!("effective configuration:\n{:#?}", cfg);

    let initial_scene = match (image, depth_map) {
        (Some(image), Some(depth_map)) => Some(SceneSource { image, depth_map }),
        _ => cfg.scenes.first().cloned(),
    };
    if initial_scene.is_none() {
        tracing::info!("no scene given; waiting for a `load IMAGE DEPTH_MAP` command");
    }

    // Channels (small/bounded)
    let (load_tx, load_rx) = mpsc::channel::<LoadRequest>(4); // Viewer -> Loader
    let (loaded_tx, loaded_rx) = mpsc::channel::<SceneLoaded>(2); // Loader -> Viewer
    let (host_tx, host_rx) = mpsc::channel::<HostEvent>(32); // Viewer/Loader/Control -> Host
    let (control_tx, control_rx) = mpsc::channel::<ViewerCommand>(16); // Control/Host -> Viewer

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Control lines on stdin; Ctrl-D closes an interactive session
    tasks.spawn({
        let to_viewer = control_tx.clone();
        let to_host = host_tx.clone();
        let cancel = cancel.clone();
        let interactive = io::stdin().is_terminal();
        async move {
            tasks::control::run(
                tasks::control::spawn_stdin_reader(),
                to_viewer,
                to_host,
                cancel,
                interactive,
            )
            .await
            .context("control task failed")
        }
    });

    // SceneLoader
    tasks.spawn({
        let to_viewer = loaded_tx;
        let to_host = host_tx.clone();
        let cancel = cancel.clone();
        async move {
            tasks::loader::run(load_rx, to_viewer, to_host, cancel)
                .await
                .context("loader task failed")
        }
    });

    // Host: example navigation and notifications
    tasks.spawn({
        let to_viewer = control_tx.clone();
        let cancel = cancel.clone();
        let playlist = ScenePlaylist::new(cfg.scenes.clone(), initial_scene.as_ref());
        async move {
            tasks::host::run(host_rx, to_viewer, playlist, cancel)
                .await
                .context("host task failed")
        }
    });

    // Run the windowed viewer on the main thread (blocking) after spawning other tasks
    let links = ViewerLinks {
        from_loader: loaded_rx,
        to_loader: load_tx,
        to_host: host_tx,
        control: control_rx,
    };
    if let Err(e) = tasks::viewer::run_windowed(
        cfg,
        links,
        initial_scene,
        simulate_immersive,
        cancel.clone(),
    )
    .context("viewer failed")
    {
        tracing::error!("{e:?}");
    }
    // Ensure other tasks are asked to stop
    cancel.cancel();

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}
