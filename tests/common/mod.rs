#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use image::{Rgb, RgbImage};
use slide_frame::connectivity::{AccessPointSettings, LinkStatus, NetworkInfo, NetworkStack};
use slide_frame::settings::Credentials;

pub const HARDWARE_ID: [u8; 6] = [0x00, 0x11, 0x22, 0xa1, 0xb2, 0xc3];
pub const JOINED_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

/// Scripted network stack. The link comes up on the `succeed_on_join`-th
/// join request (1-based); `None` never connects.
#[derive(Debug, Default)]
pub struct FakeStack {
    succeed_on_join: Option<u32>,
    joins: AtomicU32,
    polls: AtomicU32,
    joined_with: Mutex<Vec<Credentials>>,
    access_points: Mutex<Vec<AccessPointSettings>>,
    networks: Vec<NetworkInfo>,
}

impl FakeStack {
    pub fn never_connects() -> Self {
        Self::default()
    }

    pub fn connects_on_join(join: u32) -> Self {
        Self {
            succeed_on_join: Some(join),
            ..Self::default()
        }
    }

    pub fn with_networks(mut self, networks: Vec<NetworkInfo>) -> Self {
        self.networks = networks;
        self
    }

    pub fn joins(&self) -> u32 {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn joined_with(&self) -> Vec<Credentials> {
        self.joined_with.lock().unwrap().clone()
    }

    pub fn access_points(&self) -> Vec<AccessPointSettings> {
        self.access_points.lock().unwrap().clone()
    }
}

impl NetworkStack for FakeStack {
    async fn begin_join(&self, credentials: &Credentials) -> Result<()> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        self.joined_with.lock().unwrap().push(credentials.clone());
        Ok(())
    }

    async fn link_status(&self) -> Result<LinkStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let up = self
            .succeed_on_join
            .is_some_and(|n| self.joins.load(Ordering::SeqCst) >= n);
        Ok(if up {
            LinkStatus::Connected
        } else {
            LinkStatus::Pending
        })
    }

    async fn start_access_point(&self, settings: &AccessPointSettings) -> Result<()> {
        self.access_points.lock().unwrap().push(settings.clone());
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<NetworkInfo>> {
        Ok(self.networks.clone())
    }

    async fn hardware_id(&self) -> Result<Vec<u8>> {
        Ok(HARDWARE_ID.to_vec())
    }

    async fn address(&self) -> Result<Option<Ipv4Addr>> {
        Ok(Some(JOINED_ADDRESS))
    }
}

/// Write a solid-color baseline JPEG.
pub fn write_jpeg(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
    RgbImage::from_pixel(width, height, Rgb(rgb))
        .save(path)
        .unwrap();
}
