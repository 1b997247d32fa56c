//! One boot of the frame: mount, connect, then run the main loop until
//! shutdown or a restart is required.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::config::Configuration;
use crate::connectivity::{ConnectivityState, NetworkStack, Supervisor, SupervisorAction};
use crate::error::ControlError;
use crate::events::{
    COMMAND_QUEUE_DEPTH, ControlEnvelope, ControlOutcome, FrameHandle, FrameStatus,
    SessionOutcome,
};
use crate::processing::decode::Compositor;
use crate::render::panel::Panel;
use crate::render::presenter::Presenter;
use crate::render::screens::{Screen, render};
use crate::settings::{PersistedSettings, SettingsStore, redact_ssid};
use crate::storage::{DirStorage, Storage};
use crate::tasks::control::Controller;
use crate::tasks::slideshow::{Slideshow, TickOutcome};

pub struct Session<N: NetworkStack, P: Panel> {
    config: Configuration,
    stack: Arc<N>,
    presenter: Presenter<P>,
    settings: Box<dyn SettingsStore>,
    commands: mpsc::Receiver<ControlEnvelope>,
    status: watch::Sender<FrameStatus>,
    handle: FrameHandle,
}

impl<N: NetworkStack, P: Panel> Session<N, P> {
    pub fn new(
        config: Configuration,
        stack: Arc<N>,
        panel: P,
        settings: Box<dyn SettingsStore>,
    ) -> Self {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status, status_rx) = watch::channel(FrameStatus::default());
        Self {
            config,
            stack,
            presenter: Presenter::new(panel),
            settings,
            commands,
            status,
            handle: FrameHandle::new(commands_tx, status_rx),
        }
    }

    /// Command/status endpoint for the management surface.
    #[must_use]
    pub fn handle(&self) -> FrameHandle {
        self.handle.clone()
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<SessionOutcome> {
        let Self {
            config,
            stack,
            mut presenter,
            settings,
            mut commands,
            status,
            handle,
        } = self;
        // Only external clones keep the queue open.
        drop(handle);

        let persisted = PersistedSettings::load(settings.as_ref());
        info!(
            brightness = persisted.brightness,
            sequence = %persisted.sequence,
            "settings loaded"
        );
        if let Err(err) = presenter.set_brightness(persisted.brightness) {
            warn!(error = ?err, "failed to apply stored brightness");
        }
        let mut controller = Controller::new(settings, &persisted);

        let storage = match DirStorage::mount(&config.storage_root) {
            Ok(storage) => storage,
            Err(err) => {
                error!(error = %err, "storage mount failed; halting");
                let mut frame_screen = ScreenState::default();
                frame_screen.show(
                    &mut presenter,
                    Screen::MountError {
                        detail: err.to_string(),
                    },
                );
                status.send_modify(|s| {
                    s.halted = true;
                    s.brightness = persisted.brightness;
                });
                return halt(&mut commands, &cancel).await;
            }
        };

        let mut frame = Frame {
            catalog: Catalog::new(persisted.sequence, config.shuffle_seed),
            compositor: Compositor::new(max_pixels(&config)),
            slideshow: Slideshow::new(config.slideshow_interval),
            screen: ScreenState::default(),
            storage,
            presenter,
        };
        if let Err(err) = frame.catalog.rescan(&frame.storage) {
            warn!(error = %err, "initial scan failed; starting with an empty catalog");
        }

        let credentials = controller.credentials().clone();
        let mut supervisor = Supervisor::new(stack, config.connectivity.clone(), credentials);
        if !controller.credentials().is_empty() {
            frame.screen.show(
                &mut frame.presenter,
                Screen::Connecting {
                    ssid: controller.credentials().ssid.clone(),
                },
            );
        }
        let state = supervisor.start().await;
        info!(?state, address = ?supervisor.address(), "connectivity settled");

        let mut ticker = time::interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The fallback screen gets one interval on the panel before photos resume.
        let mut fallback_announced = false;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("session cancelled");
                    return Ok(SessionOutcome::Shutdown);
                }
                _ = ticker.tick() => {}
            }

            let mut restart = false;
            while let Ok(envelope) = commands.try_recv() {
                let reply = controller.apply(
                    envelope.request,
                    &mut frame.catalog,
                    &frame.storage,
                    &mut frame.presenter,
                );
                match reply {
                    Ok(ControlOutcome::Rescanned { .. }) => frame.slideshow.restart(),
                    Ok(ControlOutcome::RestartScheduled) => restart = true,
                    _ => {}
                }
                // A caller that gave up waiting is not an error.
                let _ = envelope.reply.send(reply);
            }
            if restart {
                info!(
                    ssid = %redact_ssid(&controller.credentials().ssid),
                    "credentials changed; restarting"
                );
                return Ok(SessionOutcome::Restart);
            }

            if supervisor.poll().await == SupervisorAction::Restart {
                return Ok(SessionOutcome::Restart);
            }

            if supervisor.state() == ConnectivityState::HostingFallback {
                let ap = supervisor.access_point();
                let screen = Screen::Fallback {
                    ssid: ap.ssid.clone(),
                    password: ap.password.clone(),
                    address: ap.address.to_string(),
                };
                if frame.catalog.len() < 2 {
                    fallback_announced = true;
                    frame.screen.show(&mut frame.presenter, screen);
                } else {
                    if !fallback_announced {
                        fallback_announced = true;
                        frame.screen.show(&mut frame.presenter, screen.clone());
                        frame.slideshow.hold();
                    }
                    frame.step(screen).await;
                }
            } else {
                fallback_announced = false;
                let address = supervisor.address().map(|a| a.to_string());
                frame.step(Screen::NoImages { address }).await;
            }

            let next = snapshot(&frame, &controller, &supervisor);
            status.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
    }

    /// Scan and present the first catalog entry, then return. Skips
    /// connectivity entirely.
    pub async fn present_first(self) -> Result<Option<String>> {
        let Self {
            config,
            mut presenter,
            settings,
            ..
        } = self;
        let persisted = PersistedSettings::load(settings.as_ref());
        presenter.set_brightness(persisted.brightness)?;

        let storage = DirStorage::mount(&config.storage_root)?;
        let mut frame = Frame {
            catalog: Catalog::new(persisted.sequence, config.shuffle_seed),
            compositor: Compositor::new(max_pixels(&config)),
            slideshow: Slideshow::new(config.slideshow_interval),
            screen: ScreenState::default(),
            storage,
            presenter,
        };
        frame
            .catalog
            .rescan(&frame.storage)
            .context("failed to scan storage")?;
        match frame.step(Screen::NoImages { address: None }).await {
            TickOutcome::Presented(identifier) => Ok(Some(identifier)),
            TickOutcome::Skipped(identifier) => bail!("could not present {identifier}"),
            TickOutcome::Idle | TickOutcome::Waiting => Ok(None),
        }
    }
}

/// Fatal halt: keep the error on screen and refuse commands until shutdown.
async fn halt(
    commands: &mut mpsc::Receiver<ControlEnvelope>,
    cancel: &CancellationToken,
) -> Result<SessionOutcome> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(SessionOutcome::Shutdown),
            Some(envelope) = commands.recv() => {
                let _ = envelope.reply.send(Err(ControlError::Unavailable));
            }
        }
    }
}

fn max_pixels(config: &Configuration) -> usize {
    usize::try_from(config.max_image_pixels).unwrap_or(usize::MAX)
}

/// Tracks the informational screen on the panel so it is painted once.
#[derive(Debug, Default)]
struct ScreenState {
    shown: Option<Screen>,
}

impl ScreenState {
    fn show<P: Panel>(&mut self, presenter: &mut Presenter<P>, screen: Screen) {
        if self.shown.as_ref() == Some(&screen) {
            return;
        }
        let (width, height) = presenter.screen_size();
        if let Err(err) = presenter.show(&render(&screen, width, height)) {
            warn!(error = ?err, ?screen, "failed to paint screen");
        }
        self.shown = Some(screen);
    }

    fn clear(&mut self) {
        self.shown = None;
    }
}

struct Frame<P: Panel> {
    storage: DirStorage,
    catalog: Catalog,
    compositor: Compositor,
    presenter: Presenter<P>,
    slideshow: Slideshow,
    screen: ScreenState,
}

impl<P: Panel> Frame<P> {
    /// One slideshow tick; `idle` is shown instead when the catalog is empty.
    async fn step(&mut self, idle: Screen) -> TickOutcome {
        if self.catalog.is_empty() {
            self.screen.show(&mut self.presenter, idle);
        }
        let outcome = self
            .slideshow
            .tick(
                &mut self.catalog,
                &mut self.compositor,
                &self.storage,
                &mut self.presenter,
            )
            .await;
        if matches!(outcome, TickOutcome::Presented(_)) {
            self.screen.clear();
        }
        outcome
    }
}

fn snapshot<N: NetworkStack, P: Panel>(
    frame: &Frame<P>,
    controller: &Controller,
    supervisor: &Supervisor<N>,
) -> FrameStatus {
    let mode = frame.catalog.mode();
    FrameStatus {
        images: frame.catalog.entries().to_vec(),
        current: frame.catalog.current().map(str::to_owned),
        brightness: controller.brightness(),
        sequence_mode: mode,
        sequence_code: mode.code(),
        connectivity: supervisor.state(),
        network: supervisor.joined_ssid().map(str::to_owned),
        address: supervisor.address().map(|a| a.to_string()),
        storage: frame.storage.capacity().ok(),
        halted: false,
    }
}
