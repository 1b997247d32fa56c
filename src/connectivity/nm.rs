//! NetworkManager (`nmcli`) backed network stack.

use std::net::Ipv4Addr;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;
use tracing::{debug, info};

use super::{AccessPointSettings, LinkStatus, NetworkInfo, NetworkStack};
use crate::settings::{Credentials, redact_ssid};

const CLIENT_CONNECTION: &str = "frame-wifi";
const HOTSPOT_CONNECTION: &str = "frame-hotspot";

#[derive(Debug, Clone)]
pub struct NmcliStack {
    interface: String,
}

impl NmcliStack {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn upsert(&self, id: &str, create: &[&str], properties: &[&str]) -> Result<()> {
        if connection_exists(id).await? {
            debug!(id, "updating connection profile");
        } else {
            info!(id, "creating connection profile");
            let mut args = vec![
                "connection",
                "add",
                "type",
                "wifi",
                "ifname",
                self.interface.as_str(),
                "con-name",
                id,
            ];
            args.extend_from_slice(create);
            nmcli(&args).await?;
        }
        let mut args = vec!["connection", "modify", id];
        args.extend_from_slice(properties);
        nmcli(&args).await?;
        Ok(())
    }
}

impl NetworkStack for NmcliStack {
    async fn begin_join(&self, credentials: &Credentials) -> Result<()> {
        let ssid = credentials.ssid.as_str();
        if !credentials.secret.is_empty() {
            ensure_psk_rules(&credentials.secret)?;
        }
        // Recreated on every join: an open network must not inherit a stale
        // wifi-sec block.
        if connection_exists(CLIENT_CONNECTION).await? {
            nmcli(&["connection", "delete", CLIENT_CONNECTION]).await?;
        }
        let mut args = vec![
            "connection",
            "add",
            "type",
            "wifi",
            "ifname",
            self.interface.as_str(),
            "con-name",
            CLIENT_CONNECTION,
            "ssid",
            ssid,
            "connection.autoconnect",
            "no",
        ];
        if !credentials.secret.is_empty() {
            args.extend_from_slice(&[
                "wifi-sec.key-mgmt",
                "wpa-psk",
                "wifi-sec.psk",
                credentials.secret.as_str(),
            ]);
        }
        nmcli(&args).await?;
        info!(ssid = %redact_ssid(ssid), "activating client connection");
        nmcli(&["--wait", "0", "connection", "up", CLIENT_CONNECTION]).await?;
        Ok(())
    }

    async fn link_status(&self) -> Result<LinkStatus> {
        let output = nmcli(&["-t", "-f", "DEVICE,STATE", "device", "status"]).await?;
        Ok(parse_link_status(&output, &self.interface))
    }

    async fn start_access_point(&self, settings: &AccessPointSettings) -> Result<()> {
        ensure_psk_rules(&settings.password)?;
        let address = format!("{}/24", settings.address);
        self.upsert(
            HOTSPOT_CONNECTION,
            &["ssid", settings.ssid.as_str()],
            &[
                "802-11-wireless.ssid",
                settings.ssid.as_str(),
                "802-11-wireless.mode",
                "ap",
                "802-11-wireless.band",
                "bg",
                "connection.autoconnect",
                "no",
                "ipv4.method",
                "shared",
                "ipv4.addresses",
                address.as_str(),
                "ipv6.method",
                "ignore",
                "wifi-sec.key-mgmt",
                "wpa-psk",
                "wifi-sec.psk",
                settings.password.as_str(),
            ],
        )
        .await?;
        nmcli(&["connection", "up", HOTSPOT_CONNECTION]).await?;
        info!(ssid = %settings.ssid, %address, "access point up");
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<NetworkInfo>> {
        let output = nmcli(&[
            "-t",
            "-f",
            "SSID,SIGNAL,SECURITY",
            "device",
            "wifi",
            "list",
            "ifname",
            self.interface.as_str(),
            "--rescan",
            "auto",
        ])
        .await?;
        Ok(parse_scan(&output))
    }

    async fn hardware_id(&self) -> Result<Vec<u8>> {
        let path = format!("/sys/class/net/{}/address", self.interface);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        parse_mac(&raw)
    }

    async fn address(&self) -> Result<Option<Ipv4Addr>> {
        let output = nmcli(&[
            "-t",
            "-f",
            "IP4.ADDRESS",
            "device",
            "show",
            self.interface.as_str(),
        ])
        .await?;
        Ok(parse_address(&output))
    }
}

async fn connection_exists(id: &str) -> Result<bool> {
    let output = nmcli(&["-t", "-f", "NAME", "connection", "show"]).await?;
    Ok(output.lines().any(|line| line.trim() == id))
}

fn parse_link_status(output: &str, interface: &str) -> LinkStatus {
    for line in output.lines() {
        let fields = split_terse(line);
        let (Some(dev), Some(state)) = (fields.first(), fields.get(1)) else {
            continue;
        };
        if dev.as_str() != interface {
            continue;
        }
        return match state.as_str() {
            s if s.starts_with("connected") => LinkStatus::Connected,
            "unavailable" | "unmanaged" => LinkStatus::Failed,
            _ => LinkStatus::Pending,
        };
    }
    LinkStatus::Failed
}

fn parse_scan(output: &str) -> Vec<NetworkInfo> {
    let mut networks: Vec<NetworkInfo> = Vec::new();
    for line in output.lines() {
        let fields = split_terse(line);
        let [ssid, signal, security] = fields.as_slice() else {
            continue;
        };
        if ssid.is_empty() {
            continue;
        }
        let info = NetworkInfo {
            ssid: ssid.clone(),
            signal: signal.parse::<u8>().unwrap_or(0).min(100),
            secured: !security.is_empty() && security.as_str() != "--",
        };
        match networks.iter_mut().find(|n| n.ssid == info.ssid) {
            Some(existing) if existing.signal < info.signal => *existing = info,
            Some(_) => {}
            None => networks.push(info),
        }
    }
    networks.sort_by(|a, b| b.signal.cmp(&a.signal));
    networks
}

fn parse_address(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| key.starts_with("IP4.ADDRESS"))
        .find_map(|(_, value)| value.split('/').next()?.trim().parse().ok())
}

fn parse_mac(raw: &str) -> Result<Vec<u8>> {
    let bytes = raw
        .trim()
        .split(':')
        .map(|part| u8::from_str_radix(part, 16))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("malformed hardware address '{}'", raw.trim()))?;
    if bytes.is_empty() {
        bail!("empty hardware address");
    }
    Ok(bytes)
}

/// Split one line of `nmcli -t` output, honoring `\:` and `\\` escapes.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let (Some(next), Some(field)) = (chars.next(), fields.last_mut()) {
                    field.push(next);
                }
            }
            ':' => fields.push(String::new()),
            _ => {
                if let Some(field) = fields.last_mut() {
                    field.push(c);
                }
            }
        }
    }
    fields
}

fn ensure_psk_rules(psk: &str) -> Result<()> {
    let len = psk.chars().count();
    if (8..=63).contains(&len) {
        Ok(())
    } else {
        Err(anyhow!("password must be between 8 and 63 characters"))
    }
}

async fn nmcli(args: &[&str]) -> Result<String> {
    debug!(command = %display_args(args), "running nmcli");
    let output = Command::new("nmcli")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to execute nmcli")?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow!(
            "nmcli {} failed: {}",
            display_args(args),
            stderr.trim()
        ))
    }
}

fn display_args(args: &[&str]) -> String {
    let mut masked = Vec::with_capacity(args.len());
    let mut redact_next = false;
    for arg in args {
        if redact_next {
            masked.push("<redacted>");
            redact_next = false;
        } else {
            redact_next = matches!(*arg, "wifi-sec.psk" | "psk");
            masked.push(*arg);
        }
    }
    masked.join(" ")
}
