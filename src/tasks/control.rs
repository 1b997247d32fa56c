//! Applies management commands to the frame's state.
//!
//! Only the main loop calls into the controller, so every mutation lands
//! between two ticks and never in the middle of advance/decode/present.

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::ControlError;
use crate::events::{ControlCommand, ControlOutcome, ControlReply, ControlRequest};
use crate::render::panel::Panel;
use crate::render::presenter::Presenter;
use crate::settings::{Credentials, PersistedSettings, SettingsStore, redact_ssid};
use crate::storage::Storage;

pub struct Controller {
    settings: Box<dyn SettingsStore>,
    brightness: u8,
    credentials: Credentials,
}

impl Controller {
    pub fn new(settings: Box<dyn SettingsStore>, persisted: &PersistedSettings) -> Self {
        Self {
            settings,
            brightness: persisted.brightness,
            credentials: persisted.credentials.clone(),
        }
    }

    #[must_use]
    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Validate, then apply. A rejected request leaves every piece of state
    /// untouched.
    pub fn apply<P: Panel>(
        &mut self,
        request: ControlRequest,
        catalog: &mut Catalog,
        storage: &dyn Storage,
        presenter: &mut Presenter<P>,
    ) -> ControlReply {
        let command = ControlCommand::try_from(request).inspect_err(|err| {
            warn!(error = %err, "rejected control request");
        })?;

        match command {
            ControlCommand::Rescan => {
                let count = catalog.rescan(storage).map_err(|err| {
                    warn!(error = ?err, "rescan failed");
                    ControlError::Unavailable
                })?;
                Ok(ControlOutcome::Rescanned { count })
            }
            ControlCommand::SetSequenceMode(mode) => {
                catalog.apply_sequence(mode);
                info!(%mode, "sequence mode changed");
                if let Err(err) = PersistedSettings::store_sequence(self.settings.as_mut(), mode) {
                    warn!(error = ?err, "failed to persist sequence mode");
                }
                Ok(ControlOutcome::Applied)
            }
            ControlCommand::SetBrightness(level) => {
                if let Err(err) = presenter.set_brightness(level) {
                    warn!(error = ?err, level, "panel rejected brightness");
                }
                self.brightness = level;
                info!(level, "brightness changed");
                if let Err(err) = PersistedSettings::store_brightness(self.settings.as_mut(), level)
                {
                    warn!(error = ?err, "failed to persist brightness");
                }
                Ok(ControlOutcome::Applied)
            }
            ControlCommand::SetCredentials(credentials) => {
                // Persist first: the restart reloads credentials from the store.
                PersistedSettings::store_credentials(self.settings.as_mut(), &credentials)
                    .map_err(|err| {
                        warn!(error = ?err, "failed to persist credentials");
                        ControlError::Unavailable
                    })?;
                info!(ssid = %redact_ssid(&credentials.ssid), "credentials stored; restart scheduled");
                self.credentials = credentials;
                Ok(ControlOutcome::RestartScheduled)
            }
        }
    }
}
