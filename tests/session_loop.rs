mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use slide_frame::config::Configuration;
use slide_frame::connectivity::ConnectivityState;
use slide_frame::error::ControlError;
use slide_frame::events::{ControlOutcome, ControlRequest, FrameStatus, SessionOutcome};
use slide_frame::render::panel::{Framebuffer, PaintOp, Panel};
use slide_frame::settings::{
    KEY_BRIGHTNESS, KEY_SECRET, KEY_SSID, MemorySettings, SettingsStore,
};
use slide_frame::tasks::session::Session;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{FakeStack, write_jpeg};

/// Panel shared with the test so paint calls stay observable after the
/// session takes ownership.
#[derive(Clone)]
struct SharedPanel(Arc<Mutex<Framebuffer>>);

impl SharedPanel {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Framebuffer::new(32, 24))))
    }

    fn brightness(&self) -> u8 {
        self.0.lock().unwrap().brightness()
    }

    fn painted(&self) -> bool {
        !self.0.lock().unwrap().ops().is_empty()
    }

    /// Blits smaller than the panel; informational screens cover all of it.
    fn photo_blits(&self) -> usize {
        let panel = self.0.lock().unwrap();
        let (width, height) = panel.size();
        panel
            .ops()
            .iter()
            .filter(|op| match op {
                PaintOp::Blit {
                    width: w,
                    height: h,
                    ..
                } => (*w, *h) != (width, height),
                PaintOp::Fill { .. } => false,
            })
            .count()
    }

    fn screen_blits(&self) -> usize {
        let panel = self.0.lock().unwrap();
        let size = panel.size();
        panel
            .ops()
            .iter()
            .filter(|op| matches!(op, PaintOp::Blit { width, height, .. } if (*width, *height) == size))
            .count()
    }
}

impl Panel for SharedPanel {
    fn size(&self) -> (u32, u32) {
        self.0.lock().unwrap().size()
    }

    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: u16) -> Result<()> {
        self.0.lock().unwrap().fill_rect(x, y, width, height, color)
    }

    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) -> Result<()> {
        self.0.lock().unwrap().blit(x, y, width, height, pixels)
    }

    fn set_brightness(&mut self, level: u8) -> Result<()> {
        self.0.lock().unwrap().set_brightness(level)
    }
}

fn media_with_images() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    write_jpeg(&tmp.path().join("a.jpg"), 16, 12, [200, 0, 0]);
    write_jpeg(&tmp.path().join("b.jpg"), 16, 12, [0, 0, 200]);
    tmp
}

fn config(storage_root: &std::path::Path) -> Configuration {
    Configuration {
        storage_root: storage_root.to_path_buf(),
        slideshow_interval: Duration::from_secs(2),
        tick_interval: Duration::from_millis(100),
        ..Configuration::default()
    }
}

async fn wait_for(
    rx: &mut tokio::sync::watch::Receiver<FrameStatus>,
    mut ready: impl FnMut(&FrameStatus) -> bool,
) -> FrameStatus {
    rx.wait_for(|s| ready(s)).await.unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn joined_session_serves_commands_until_credentials_change() {
    let media = media_with_images();
    let mut settings = MemorySettings::default();
    settings.put_string(KEY_SSID, "Home").unwrap();
    settings.put_string(KEY_SECRET, "password1").unwrap();
    settings.put_u8(KEY_BRIGHTNESS, 50).unwrap();

    let stack = Arc::new(FakeStack::connects_on_join(1));
    let panel = SharedPanel::new();
    let session = Session::new(
        config(media.path()),
        Arc::clone(&stack),
        panel.clone(),
        Box::new(settings),
    );
    let handle = session.handle();
    let mut status = handle.subscribe();
    let cancel = CancellationToken::new();

    let driver = async {
        let joined = wait_for(&mut status, |s| {
            s.connectivity == ConnectivityState::Joined && s.current.is_some()
        })
        .await;
        assert_eq!(joined.images, vec!["/a.jpg", "/b.jpg"]);
        assert_eq!(joined.current.as_deref(), Some("/a.jpg"));
        assert_eq!(joined.network.as_deref(), Some("Home"));
        assert_eq!(joined.address.as_deref(), Some("192.168.1.50"));
        assert_eq!(joined.brightness, 50);
        assert!(joined.storage.is_some());
        assert_eq!(panel.brightness(), 50);
        assert!(panel.painted());

        let advanced = wait_for(&mut status, |s| s.current.as_deref() == Some("/b.jpg")).await;
        assert_eq!(advanced.images.len(), 2);

        assert_eq!(
            handle.send(ControlRequest::SetBrightness { level: 300 }).await,
            Err(ControlError::InvalidBrightness(300))
        );
        assert_eq!(
            handle.send(ControlRequest::SetBrightness { level: 9 }).await,
            Ok(ControlOutcome::Applied)
        );
        assert_eq!(panel.brightness(), 9);
        wait_for(&mut status, |s| s.brightness == 9).await;

        assert_eq!(
            handle
                .send(ControlRequest::SetCredentials {
                    ssid: "Office".into(),
                    secret: "password2".into(),
                })
                .await,
            Ok(ControlOutcome::RestartScheduled)
        );
    };

    let (outcome, ()) = tokio::join!(session.run(cancel), driver);
    assert_eq!(outcome.unwrap(), SessionOutcome::Restart);
    assert_eq!(stack.joins(), 1);
    assert!(stack.access_points().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_storage_halts_and_refuses_commands() {
    let tmp = tempfile::tempdir().unwrap();
    let panel = SharedPanel::new();
    let stack = Arc::new(FakeStack::never_connects());
    let session = Session::new(
        config(&tmp.path().join("absent")),
        Arc::clone(&stack),
        panel.clone(),
        Box::new(MemorySettings::default()),
    );
    let handle = session.handle();
    let mut status = handle.subscribe();
    let cancel = CancellationToken::new();

    let driver = async {
        let halted = wait_for(&mut status, |s| s.halted).await;
        assert!(halted.images.is_empty());
        assert!(panel.painted());
        assert_eq!(
            handle.send(ControlRequest::Rescan).await,
            Err(ControlError::Unavailable)
        );
        cancel.cancel();
    };

    let (outcome, ()) = tokio::join!(session.run(cancel.clone()), driver);
    assert_eq!(outcome.unwrap(), SessionOutcome::Shutdown);
    assert_eq!(stack.joins(), 0);
}

#[tokio::test(start_paused = true)]
async fn unconfigured_frame_hosts_fallback_and_keeps_showing_photos() {
    let media = media_with_images();
    let stack = Arc::new(FakeStack::never_connects());
    let panel = SharedPanel::new();
    let session = Session::new(
        config(media.path()),
        Arc::clone(&stack),
        panel.clone(),
        Box::new(MemorySettings::default()),
    );
    let handle = session.handle();
    let mut status = handle.subscribe();
    let cancel = CancellationToken::new();

    let driver = async {
        let fallback = wait_for(&mut status, |s| {
            s.connectivity == ConnectivityState::HostingFallback
        })
        .await;
        assert_eq!(fallback.address.as_deref(), Some("192.168.4.1"));
        assert_eq!(fallback.network, None);
        assert_eq!(fallback.images.len(), 2);
        assert_eq!(panel.screen_blits(), 1);
        assert_eq!(panel.photo_blits(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(panel.photo_blits(), 0, "fallback screen held for an interval");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(panel.photo_blits() >= 4);
        assert_eq!(panel.screen_blits(), 1);

        assert_eq!(
            handle.send(ControlRequest::Rescan).await,
            Ok(ControlOutcome::Rescanned { count: 2 })
        );

        tokio::time::sleep(Duration::from_secs(400)).await;
        cancel.cancel();
    };

    let (outcome, ()) = tokio::join!(session.run(cancel.clone()), driver);
    assert_eq!(outcome.unwrap(), SessionOutcome::Shutdown);
    assert_eq!(stack.joins(), 0);
    let hosted = stack.access_points();
    assert_eq!(hosted.len(), 1);
    assert_eq!(hosted[0].ssid, "PhotoFrame-A1B2C3");
}

#[tokio::test(start_paused = true)]
async fn single_image_in_fallback_keeps_the_fallback_screen() {
    let media = tempfile::tempdir().unwrap();
    write_jpeg(&media.path().join("only.jpg"), 16, 12, [0, 200, 0]);
    let panel = SharedPanel::new();
    let session = Session::new(
        config(media.path()),
        Arc::new(FakeStack::never_connects()),
        panel.clone(),
        Box::new(MemorySettings::default()),
    );
    let mut status = session.handle().subscribe();
    let cancel = CancellationToken::new();

    let driver = async {
        wait_for(&mut status, |s| {
            s.connectivity == ConnectivityState::HostingFallback
        })
        .await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(panel.photo_blits(), 0);
        assert_eq!(panel.screen_blits(), 1);
        cancel.cancel();
    };

    let (outcome, ()) = tokio::join!(session.run(cancel.clone()), driver);
    assert_eq!(outcome.unwrap(), SessionOutcome::Shutdown);
}
