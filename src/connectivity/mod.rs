//! Join the configured network, or host a fallback access point and retry
//! joining from there.

pub mod nm;

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::config::ConnectivityConfig;
use crate::settings::{Credentials, redact_ssid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectivityState {
    Joining,
    Joined,
    HostingFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Pending,
    Connected,
    Failed,
}

/// Self-hosted access point: name, fixed credential and fixed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub password: String,
    pub address: Ipv4Addr,
}

/// One result of a nearby-network scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub ssid: String,
    /// Signal strength, 0..=100.
    pub signal: u8,
    pub secured: bool,
}

/// Network stack collaborator. Joining is split into "begin" and a status
/// poll so the supervisor owns the retry cadence.
pub trait NetworkStack: Send + Sync + 'static {
    fn begin_join(&self, credentials: &Credentials) -> impl Future<Output = Result<()>> + Send;

    fn link_status(&self) -> impl Future<Output = Result<LinkStatus>> + Send;

    fn start_access_point(
        &self,
        settings: &AccessPointSettings,
    ) -> impl Future<Output = Result<()>> + Send;

    fn scan(&self) -> impl Future<Output = Result<Vec<NetworkInfo>>> + Send;

    /// Stable hardware identifier (typically the interface MAC).
    fn hardware_id(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn address(&self) -> impl Future<Output = Result<Option<Ipv4Addr>>> + Send;
}

/// `<prefix>-XXXXXX` from the last three bytes of the hardware id.
#[must_use]
pub fn fallback_ssid(prefix: &str, hardware_id: &[u8]) -> String {
    let tail = &hardware_id[hardware_id.len().saturating_sub(3)..];
    let hex: String = tail.iter().map(|b| format!("{b:02X}")).collect();
    format!("{prefix}-{hex}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Continue,
    /// A fallback retry joined the network; re-run initialization.
    Restart,
}

pub struct Supervisor<N: NetworkStack> {
    stack: Arc<N>,
    config: ConnectivityConfig,
    credentials: Credentials,
    state: ConnectivityState,
    access_point: AccessPointSettings,
    fallback_since: Option<Instant>,
    address: Option<Ipv4Addr>,
}

impl<N: NetworkStack> Supervisor<N> {
    pub fn new(stack: Arc<N>, config: ConnectivityConfig, credentials: Credentials) -> Self {
        let access_point = AccessPointSettings {
            ssid: fallback_ssid(&config.fallback_ssid_prefix, &[]),
            password: config.fallback_password.clone(),
            address: config.fallback_address,
        };
        Self {
            stack,
            config,
            credentials,
            state: ConnectivityState::Joining,
            access_point,
            fallback_since: None,
            address: None,
        }
    }

    /// Run the startup transitions: Joining (only with credentials), then
    /// Joined or HostingFallback.
    pub async fn start(&mut self) -> ConnectivityState {
        match self.stack.hardware_id().await {
            Ok(id) => {
                self.access_point.ssid = fallback_ssid(&self.config.fallback_ssid_prefix, &id);
            }
            Err(err) => warn!(error = ?err, "hardware id unavailable; fallback name is generic"),
        }

        if self.credentials.is_empty() {
            info!("no stored credentials; hosting fallback network");
            self.enter_fallback().await;
            return self.state;
        }

        self.state = ConnectivityState::Joining;
        info!(ssid = %redact_ssid(&self.credentials.ssid), "state transition: -> JOINING");
        if self.join().await {
            self.enter_joined().await;
        } else {
            self.enter_fallback().await;
        }
        self.state
    }

    /// Called once per main-loop tick. Blocks for one join attempt when the
    /// fallback dwell has elapsed.
    pub async fn poll(&mut self) -> SupervisorAction {
        if self.state != ConnectivityState::HostingFallback || self.credentials.is_empty() {
            return SupervisorAction::Continue;
        }
        let Some(since) = self.fallback_since else {
            return SupervisorAction::Continue;
        };
        if since.elapsed() < self.config.fallback_timeout {
            return SupervisorAction::Continue;
        }

        info!("fallback timeout elapsed; retrying join");
        if self.join().await {
            info!("state transition: HOSTING_FALLBACK -> restart");
            return SupervisorAction::Restart;
        }
        warn!("fallback retry failed; staying in fallback");
        self.enter_fallback().await;
        SupervisorAction::Continue
    }

    async fn join(&mut self) -> bool {
        if let Err(err) = self.stack.begin_join(&self.credentials).await {
            warn!(error = ?err, "join request rejected by network stack");
            return false;
        }
        for attempt in 1..=self.config.join_attempts {
            match self.stack.link_status().await {
                Ok(LinkStatus::Connected) => {
                    debug!(attempt, "link up");
                    return true;
                }
                Ok(LinkStatus::Failed) => {
                    warn!(attempt, "join failed");
                    return false;
                }
                Ok(LinkStatus::Pending) => debug!(attempt, "link pending"),
                Err(err) => warn!(attempt, error = ?err, "link status query failed"),
            }
            if attempt < self.config.join_attempts {
                sleep(self.config.join_poll_interval).await;
            }
        }
        warn!(
            attempts = self.config.join_attempts,
            "join attempts exhausted"
        );
        false
    }

    async fn enter_joined(&mut self) {
        self.state = ConnectivityState::Joined;
        self.fallback_since = None;
        self.address = match self.stack.address().await {
            Ok(address) => address,
            Err(err) => {
                warn!(error = ?err, "failed to read joined address");
                None
            }
        };
        info!(address = ?self.address, "state transition: JOINING -> JOINED");
    }

    async fn enter_fallback(&mut self) {
        if self.state != ConnectivityState::HostingFallback {
            info!(ssid = %self.access_point.ssid, "state transition: -> HOSTING_FALLBACK");
        }
        self.state = ConnectivityState::HostingFallback;
        self.address = Some(self.access_point.address);
        if let Err(err) = self.stack.start_access_point(&self.access_point).await {
            error!(error = ?err, "failed to start fallback access point");
        }
        self.fallback_since = Some(Instant::now());
    }

    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    #[must_use]
    pub fn access_point(&self) -> &AccessPointSettings {
        &self.access_point
    }

    /// Name of the joined network; `None` unless Joined.
    #[must_use]
    pub fn joined_ssid(&self) -> Option<&str> {
        (self.state == ConnectivityState::Joined).then_some(self.credentials.ssid.as_str())
    }

    /// Where the management surface is reachable.
    #[must_use]
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    #[must_use]
    pub fn stack(&self) -> &Arc<N> {
        &self.stack
    }
}
