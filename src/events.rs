//! Messages between the management surface and the main loop.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::catalog::SequenceMode;
use crate::connectivity::ConnectivityState;
use crate::error::ControlError;
use crate::settings::Credentials;
use crate::storage::Capacity;

/// Commands queued per session before senders start waiting.
pub const COMMAND_QUEUE_DEPTH: usize = 16;

/// A management command exactly as received; nothing is validated yet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ControlRequest {
    Rescan,
    SetSequenceMode { mode: i64 },
    SetBrightness { level: i64 },
    SetCredentials { ssid: String, secret: String },
}

/// A validated command, safe to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Rescan,
    SetSequenceMode(SequenceMode),
    SetBrightness(u8),
    SetCredentials(Credentials),
}

impl TryFrom<ControlRequest> for ControlCommand {
    type Error = ControlError;

    fn try_from(request: ControlRequest) -> Result<Self, Self::Error> {
        match request {
            ControlRequest::Rescan => Ok(Self::Rescan),
            ControlRequest::SetSequenceMode { mode } => u8::try_from(mode)
                .ok()
                .and_then(SequenceMode::from_code)
                .map(Self::SetSequenceMode)
                .ok_or(ControlError::InvalidSequenceMode(mode)),
            ControlRequest::SetBrightness { level } => u8::try_from(level)
                .map(Self::SetBrightness)
                .map_err(|_| ControlError::InvalidBrightness(level)),
            ControlRequest::SetCredentials { ssid, secret } => {
                let ssid = ssid.trim().to_string();
                if !(1..=32).contains(&ssid.len()) {
                    return Err(ControlError::EmptySsid);
                }
                if !secret.is_empty() && !(8..=63).contains(&secret.chars().count()) {
                    return Err(ControlError::InvalidSecret);
                }
                Ok(Self::SetCredentials(Credentials { ssid, secret }))
            }
        }
    }
}

/// What an accepted command did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum ControlOutcome {
    Rescanned { count: usize },
    Applied,
    /// Credentials stored; the session ends with [`SessionOutcome::Restart`].
    RestartScheduled,
}

pub type ControlReply = Result<ControlOutcome, ControlError>;

/// A request plus the channel its reply goes back on.
#[derive(Debug)]
pub struct ControlEnvelope {
    pub request: ControlRequest,
    pub reply: oneshot::Sender<ControlReply>,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Shutdown,
    /// Re-run initialization from scratch.
    Restart,
}

/// Read-only snapshot published by the main loop after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameStatus {
    pub images: Vec<String>,
    pub current: Option<String>,
    pub brightness: u8,
    pub sequence_mode: SequenceMode,
    pub sequence_code: u8,
    pub connectivity: ConnectivityState,
    pub network: Option<String>,
    pub address: Option<String>,
    pub storage: Option<Capacity>,
    pub halted: bool,
}

impl Default for FrameStatus {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            current: None,
            brightness: 0,
            sequence_mode: SequenceMode::default(),
            sequence_code: SequenceMode::default().code(),
            connectivity: ConnectivityState::Joining,
            network: None,
            address: None,
            storage: None,
            halted: false,
        }
    }
}

/// The management surface's side of a session.
#[derive(Debug, Clone)]
pub struct FrameHandle {
    commands: mpsc::Sender<ControlEnvelope>,
    status: watch::Receiver<FrameStatus>,
}

impl FrameHandle {
    pub fn new(
        commands: mpsc::Sender<ControlEnvelope>,
        status: watch::Receiver<FrameStatus>,
    ) -> Self {
        Self { commands, status }
    }

    /// Queue `request` for the main loop and wait for its verdict.
    pub async fn send(&self, request: ControlRequest) -> ControlReply {
        let (reply, verdict) = oneshot::channel();
        debug!(?request, "queueing control request");
        self.commands
            .send(ControlEnvelope { request, reply })
            .await
            .map_err(|_| ControlError::Unavailable)?;
        verdict.await.map_err(|_| ControlError::Unavailable)?
    }

    #[must_use]
    pub fn status(&self) -> FrameStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FrameStatus> {
        self.status.clone()
    }
}
