use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Largest frame the decoder will allocate for by default (4K UHD).
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 3840 * 2160;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Mounted removable storage holding the JPEG files.
    pub storage_root: PathBuf,
    /// YAML file holding persisted settings. Absent keeps settings in memory.
    pub settings_path: Option<PathBuf>,
    /// Time an image stays on screen before the slideshow advances.
    #[serde(with = "humantime_serde")]
    pub slideshow_interval: Duration,
    /// Main loop cadence; commands are drained once per tick.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Optional deterministic seed for random sequencing.
    pub shuffle_seed: Option<u64>,
    /// Decode allocation ceiling in pixels.
    pub max_image_pixels: u64,
    pub panel: PanelConfig,
    pub connectivity: ConnectivityConfig,
    pub management: ManagementConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PanelConfig {
    pub width: u32,
    pub height: u32,
    /// Device node receiving RGB565 words. Absent runs headless.
    pub device: Option<PathBuf>,
    /// Backlight sysfs directory (`brightness`, `max_brightness`).
    pub backlight: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ConnectivityConfig {
    /// Wireless interface handed to the network stack.
    pub interface: String,
    /// Link polls per join before giving up.
    pub join_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub join_poll_interval: Duration,
    /// Dwell in fallback before one more join attempt.
    #[serde(with = "humantime_serde")]
    pub fallback_timeout: Duration,
    pub fallback_ssid_prefix: String,
    pub fallback_password: String,
    pub fallback_address: Ipv4Addr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ManagementConfig {
    pub bind_address: String,
    pub port: u16,
    /// Static page served verbatim at `/`.
    pub index_path: Option<PathBuf>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.storage_root.as_os_str().is_empty(),
            "storage-root must be set"
        );
        ensure!(
            !self.slideshow_interval.is_zero(),
            "slideshow-interval must be greater than zero"
        );
        ensure!(
            !self.tick_interval.is_zero(),
            "tick-interval must be greater than zero"
        );
        ensure!(
            self.max_image_pixels > 0,
            "max-image-pixels must be greater than zero"
        );
        ensure!(
            self.panel.width > 0 && self.panel.height > 0,
            "panel.width and panel.height must be greater than zero"
        );
        self.connectivity.validate()?;
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/media/frame"),
            settings_path: None,
            slideshow_interval: Duration::from_secs(30),
            tick_interval: Duration::from_millis(250),
            shuffle_seed: None,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
            panel: PanelConfig::default(),
            connectivity: ConnectivityConfig::default(),
            management: ManagementConfig::default(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            device: None,
            backlight: None,
        }
    }
}

impl ConnectivityConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.join_attempts > 0,
            "connectivity.join-attempts must be greater than zero"
        );
        ensure!(
            !self.join_poll_interval.is_zero(),
            "connectivity.join-poll-interval must be greater than zero"
        );
        ensure!(
            !self.fallback_timeout.is_zero(),
            "connectivity.fallback-timeout must be greater than zero"
        );
        ensure!(
            !self.fallback_ssid_prefix.is_empty(),
            "connectivity.fallback-ssid-prefix must not be empty"
        );
        ensure!(
            (8..=63).contains(&self.fallback_password.len()),
            "connectivity.fallback-password must be 8-63 characters"
        );
        Ok(())
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            join_attempts: 20,
            join_poll_interval: Duration::from_millis(500),
            fallback_timeout: Duration::from_secs(300),
            fallback_ssid_prefix: "PhotoFrame".to_string(),
            fallback_password: "photoframe".to_string(),
            fallback_address: Ipv4Addr::new(192, 168, 4, 1),
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 80,
            index_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Configuration = serde_yaml::from_str("{}").expect("parse config");
        let cfg = cfg.validated().expect("defaults validate");
        assert_eq!(cfg.slideshow_interval, Duration::from_secs(30));
        assert_eq!(cfg.tick_interval, Duration::from_millis(250));
        assert_eq!(cfg.connectivity.fallback_address, Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(cfg.connectivity.fallback_password, "photoframe");
        assert!(cfg.panel.device.is_none());
    }

    #[test]
    fn parses_durations_and_nested_sections() {
        let cfg: Configuration = serde_yaml::from_str(
            r#"
storage-root: /mnt/sd
slideshow-interval: 1m 30s
shuffle-seed: 7
panel:
  width: 480
  height: 320
  device: /dev/fb1
connectivity:
  join-attempts: 5
  fallback-timeout: 2m
management:
  port: 8080
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.storage_root, PathBuf::from("/mnt/sd"));
        assert_eq!(cfg.slideshow_interval, Duration::from_secs(90));
        assert_eq!(cfg.shuffle_seed, Some(7));
        assert_eq!(cfg.panel.width, 480);
        assert_eq!(cfg.panel.device, Some(PathBuf::from("/dev/fb1")));
        assert_eq!(cfg.connectivity.join_attempts, 5);
        assert_eq!(cfg.connectivity.fallback_timeout, Duration::from_secs(120));
        assert_eq!(cfg.connectivity.interface, "wlan0");
        assert_eq!(cfg.management.port, 8080);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_yaml::from_str::<Configuration>("photo-library-path: /x\n").unwrap_err();
        assert!(err.to_string().contains("photo-library-path"));
    }

    #[test]
    fn short_fallback_password_fails_validation() {
        let cfg: Configuration =
            serde_yaml::from_str("connectivity:\n  fallback-password: short\n").unwrap();
        let err = cfg.validated().unwrap_err();
        assert!(err.to_string().contains("fallback-password"));
    }
}
