//! Centered, flicker-free presentation of the decoded frame.

use anyhow::Result;
use tracing::debug;

use crate::processing::color::{BLACK, to_panel};
use crate::processing::decode::DecodedImage;
use crate::render::panel::Panel;
use crate::render::screens::Canvas;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Where an image lands on screen and which border strips need clearing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub origin: (u32, u32),
    pub borders: Vec<Rect>,
}

/// Center `image` on `screen`. Images larger than the screen on an axis are
/// anchored at zero on that axis and overflow.
#[must_use]
pub fn place(screen: (u32, u32), image: (u32, u32)) -> Placement {
    let (sw, sh) = screen;
    let (iw, ih) = image;
    let x = sw.saturating_sub(iw) / 2;
    let y = sh.saturating_sub(ih) / 2;
    let right = x.saturating_add(iw).min(sw);
    let bottom = y.saturating_add(ih).min(sh);
    let band = bottom - y;

    let mut borders = Vec::with_capacity(4);
    if y > 0 {
        borders.push(Rect {
            x: 0,
            y: 0,
            width: sw,
            height: y,
        });
    }
    if bottom < sh {
        borders.push(Rect {
            x: 0,
            y: bottom,
            width: sw,
            height: sh - bottom,
        });
    }
    if x > 0 && band > 0 {
        borders.push(Rect {
            x: 0,
            y,
            width: x,
            height: band,
        });
    }
    if right < sw && band > 0 {
        borders.push(Rect {
            x: right,
            y,
            width: sw - right,
            height: band,
        });
    }
    Placement {
        origin: (x, y),
        borders,
    }
}

/// Owns the panel. Borrows a frame only for the duration of one call.
pub struct Presenter<P: Panel> {
    panel: P,
    background: u16,
}

impl<P: Panel> Presenter<P> {
    pub fn new(panel: P) -> Self {
        Self {
            panel,
            background: to_panel(BLACK),
        }
    }

    /// Clear only the uncovered borders, then paint the frame in one call.
    pub fn present(&mut self, image: &DecodedImage) -> Result<()> {
        if image.is_empty() {
            return Ok(());
        }
        let placement = place(self.panel.size(), (image.width(), image.height()));
        for strip in &placement.borders {
            self.panel
                .fill_rect(strip.x, strip.y, strip.width, strip.height, self.background)?;
        }
        let (x, y) = placement.origin;
        self.panel
            .blit(x, y, image.width(), image.height(), image.pixels())?;
        debug!(
            width = image.width(),
            height = image.height(),
            x,
            y,
            "presented frame"
        );
        Ok(())
    }

    /// Paint a full-screen informational canvas.
    pub fn show(&mut self, canvas: &Canvas) -> Result<()> {
        let (width, height) = canvas.dimensions();
        self.panel.blit(0, 0, width, height, canvas.words())
    }

    pub fn set_brightness(&mut self, level: u8) -> Result<()> {
        self.panel.set_brightness(level)
    }

    #[must_use]
    pub fn screen_size(&self) -> (u32, u32) {
        self.panel.size()
    }

    #[must_use]
    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }
}
