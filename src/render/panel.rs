//! Display collaborator: "paint a rectangle of pixels".
//!
//! All colors handed to a [`Panel`] are already in panel byte order.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

pub trait Panel: Send {
    /// Native `(width, height)` in pixels.
    fn size(&self) -> (u32, u32);

    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: u16) -> Result<()>;

    /// Paint `pixels` (row-major, `width` per row) with its top-left at
    /// `(x, y)`. Anything past the panel edge is clipped.
    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) -> Result<()>;

    fn set_brightness(&mut self, level: u8) -> Result<()>;
}

impl<P: Panel + ?Sized> Panel for Box<P> {
    fn size(&self) -> (u32, u32) {
        (**self).size()
    }

    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: u16) -> Result<()> {
        (**self).fill_rect(x, y, width, height, color)
    }

    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) -> Result<()> {
        (**self).blit(x, y, width, height, pixels)
    }

    fn set_brightness(&mut self, level: u8) -> Result<()> {
        (**self).set_brightness(level)
    }
}

/// Clip a rectangle against a `bounds` sized surface; `None` when nothing is
/// visible.
fn clip(bounds: (u32, u32), x: u32, y: u32, width: u32, height: u32) -> Option<(usize, usize)> {
    if x >= bounds.0 || y >= bounds.1 || width == 0 || height == 0 {
        return None;
    }
    Some((
        width.min(bounds.0 - x) as usize,
        height.min(bounds.1 - y) as usize,
    ))
}

/// Recorded paint call, kept by [`Framebuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOp {
    Fill {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        color: u16,
    },
    Blit {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// In-memory panel used headless and under test.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
    brightness: u8,
    ops: Vec<PaintOp>,
}

impl Framebuffer {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            brightness: u8::MAX,
            ops: Vec::new(),
        }
    }

    #[must_use]
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> u16 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    #[must_use]
    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    #[must_use]
    pub fn ops(&self) -> &[PaintOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<PaintOp> {
        std::mem::take(&mut self.ops)
    }
}

impl Panel for Framebuffer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: u16) -> Result<()> {
        self.ops.push(PaintOp::Fill {
            x,
            y,
            width,
            height,
            color,
        });
        if let Some((w, h)) = clip(self.size(), x, y, width, height) {
            let stride = self.width as usize;
            for row in y as usize..y as usize + h {
                let start = row * stride + x as usize;
                self.pixels[start..start + w].fill(color);
            }
        }
        Ok(())
    }

    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) -> Result<()> {
        anyhow::ensure!(
            pixels.len() >= width as usize * height as usize,
            "blit of {width}x{height} given {} pixels",
            pixels.len()
        );
        self.ops.push(PaintOp::Blit {
            x,
            y,
            width,
            height,
        });
        if let Some((w, h)) = clip(self.size(), x, y, width, height) {
            let stride = self.width as usize;
            for row in 0..h {
                let src = &pixels[row * width as usize..][..w];
                let start = (y as usize + row) * stride + x as usize;
                self.pixels[start..start + w].copy_from_slice(src);
            }
        }
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) -> Result<()> {
        self.brightness = level;
        Ok(())
    }
}

/// Panel memory exposed as a device node: `width * height` host-endian
/// words, written in panel byte order. Brightness goes to an optional
/// backlight sysfs directory.
#[derive(Debug)]
pub struct RawPanel {
    device: File,
    path: PathBuf,
    width: u32,
    height: u32,
    backlight: Option<PathBuf>,
}

impl RawPanel {
    pub fn open(
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        backlight: Option<PathBuf>,
    ) -> Result<Self> {
        let path = path.into();
        let device = OpenOptions::new()
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open panel device {}", path.display()))?;
        info!(device = %path.display(), width, height, "panel opened");
        Ok(Self {
            device,
            path,
            width,
            height,
            backlight,
        })
    }

    fn write_row(&mut self, x: u32, y: u32, words: &[u16]) -> Result<()> {
        let offset = (u64::from(y) * u64::from(self.width) + u64::from(x)) * 2;
        self.device.seek(SeekFrom::Start(offset))?;
        self.device
            .write_all(bytemuck::cast_slice(words))
            .with_context(|| format!("failed to write panel row to {}", self.path.display()))
    }
}

impl Panel for RawPanel {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: u16) -> Result<()> {
        let Some((w, h)) = clip(self.size(), x, y, width, height) else {
            return Ok(());
        };
        let row = vec![color; w];
        for r in 0..h as u32 {
            self.write_row(x, y + r, &row)?;
        }
        Ok(())
    }

    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) -> Result<()> {
        anyhow::ensure!(
            pixels.len() >= width as usize * height as usize,
            "blit of {width}x{height} given {} pixels",
            pixels.len()
        );
        let Some((w, h)) = clip(self.size(), x, y, width, height) else {
            return Ok(());
        };
        for r in 0..h {
            let src = &pixels[r * width as usize..][..w];
            self.write_row(x, y + r as u32, src)?;
        }
        self.device.flush()?;
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) -> Result<()> {
        let Some(dir) = &self.backlight else {
            debug!(level, "no backlight configured; brightness ignored");
            return Ok(());
        };
        let max = read_max_brightness(dir).unwrap_or(u32::from(u8::MAX));
        let value = u32::from(level) * max / u32::from(u8::MAX);
        let path = dir.join("brightness");
        fs::write(&path, value.to_string())
            .with_context(|| format!("failed to write '{}' to {}", value, path.display()))
    }
}

fn read_max_brightness(dir: &Path) -> Option<u32> {
    fs::read_to_string(dir.join("max_brightness"))
        .ok()?
        .trim()
        .parse()
        .ok()
}
