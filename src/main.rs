//! Binary entrypoint for the frame daemon.
//!
//! Delegates all logic to the library crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use slide_frame::config::{Configuration, PanelConfig};
use slide_frame::connectivity::nm::NmcliStack;
use slide_frame::events::SessionOutcome;
use slide_frame::logging;
use slide_frame::render::panel::{Framebuffer, Panel, RawPanel};
use slide_frame::settings::{FileSettings, MemorySettings, NAMESPACE, SettingsStore};
use slide_frame::storage::{DirStorage, Storage};
use slide_frame::tasks::session::Session;
use slide_frame::web;

#[derive(Debug, Parser)]
#[command(name = "slide-frame", version, about = "JPEG slideshow frame daemon")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "/etc/slide-frame/config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Scan storage, present the first image and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = try_main().await {
        error!(error = ?err, "slide-frame exited with error");
        std::process::exit(1);
    }
}

async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = Configuration::from_yaml_file(&cli.config)?
        .validated()
        .context("validating configuration")?;
    info!(config = %cli.config.display(), "starting slide-frame");

    let stack = Arc::new(NmcliStack::new(config.connectivity.interface.clone()));

    if cli.once {
        let session = Session::new(
            config.clone(),
            stack,
            open_panel(&config.panel)?,
            open_settings(&config),
        );
        match session.present_first().await? {
            Some(identifier) => info!(%identifier, "presented"),
            None => info!("no images on storage"),
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    loop {
        let session = Session::new(
            config.clone(),
            Arc::clone(&stack),
            open_panel(&config.panel)?,
            open_settings(&config),
        );
        let session_cancel = cancel.child_token();

        let storage = DirStorage::mount(&config.storage_root)
            .map(|s| Arc::new(s) as Arc<dyn Storage>)
            .ok();
        let router = web::router(
            session.handle(),
            Arc::clone(&stack),
            storage,
            config.management.index_path.clone(),
        );
        let management = {
            let management_config = config.management.clone();
            let token = session_cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = web::serve(&management_config, router, token).await {
                    error!(error = ?err, "management surface failed");
                }
            })
        };

        let outcome = session.run(session_cancel.clone()).await;
        session_cancel.cancel();
        if let Err(err) = management.await {
            warn!(error = ?err, "management task panicked");
        }

        match outcome? {
            SessionOutcome::Shutdown => {
                info!("shutdown complete");
                return Ok(());
            }
            SessionOutcome::Restart => {
                info!(
                    uptime = %humantime::format_duration(logging::uptime()),
                    "reinitializing"
                );
            }
        }
    }
}

fn open_panel(config: &PanelConfig) -> Result<Box<dyn Panel>> {
    match &config.device {
        Some(device) => Ok(Box::new(RawPanel::open(
            device,
            config.width,
            config.height,
            config.backlight.clone(),
        )?)),
        None => {
            info!(width = config.width, height = config.height, "no panel device; running headless");
            Ok(Box::new(Framebuffer::new(config.width, config.height)))
        }
    }
}

fn open_settings(config: &Configuration) -> Box<dyn SettingsStore> {
    let Some(path) = &config.settings_path else {
        warn!("no settings-path configured; settings will not survive a restart");
        return Box::new(MemorySettings::default());
    };
    match FileSettings::open(path, NAMESPACE) {
        Ok(store) => Box::new(store),
        Err(err) => {
            error!(path = %path.display(), error = %err, "settings unreadable; using defaults");
            Box::new(MemorySettings::default())
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => info!("received SIGINT; shutting down"),
        () = terminate => info!("received SIGTERM; shutting down"),
    }
    cancel.cancel();
}
