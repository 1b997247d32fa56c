//! JPEG acquisition: stored file -> block stream -> panel-order pixel buffer.
//!
//! A [`BlockSource`] yields minimum coded blocks; the [`Compositor`] places
//! each block into the single [`DecodedImage`] it owns, clipping blocks that
//! hang over the right/bottom edge and byte-swapping every pixel for the
//! panel.

use std::collections::TryReserveError;
use std::io::{BufReader, Read};

use jpeg_decoder::PixelFormat;
use tracing::{debug, trace};

use crate::error::DecodeError;
use crate::processing::color::{rgb565, to_panel};
use crate::storage::Storage;

/// Block edge emitted by [`JpegBlocks`] (4:2:0 MCU size).
pub const MCU_SIZE: u32 = 16;

/// Yield to the runtime whenever a block row divisible by this is reached.
pub const YIELD_EVERY_BLOCK_ROWS: u32 = 8;

/// One minimum coded block. `pixels` is host RGB565, row-major,
/// `width * height` long, and may extend past the image edge.
#[derive(Debug)]
pub struct Block<'a> {
    pub grid_x: u32,
    pub grid_y: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u16],
}

/// Streaming producer of minimum coded blocks.
pub trait BlockSource {
    /// Final image dimensions, known before the first block.
    fn dimensions(&self) -> (u32, u32);

    fn next_block(&mut self) -> Option<Result<Block<'_>, DecodeError>>;
}

/// Block source over a baseline/progressive JPEG stream.
///
/// The whole scan is decoded up front and re-emitted in MCU order.
pub struct JpegBlocks {
    width: u32,
    height: u32,
    samples: Vec<u8>,
    format: PixelFormat,
    next: u32,
    scratch: Vec<u16>,
}

impl JpegBlocks {
    /// Read the frame header, refuse frames above `max_pixels`, then decode
    /// the scan. Blocking; callers on the runtime go through
    /// [`Compositor::decode`].
    pub fn new(reader: impl Read, max_pixels: usize) -> Result<Self, DecodeError> {
        let mut decoder = jpeg_decoder::Decoder::new(BufReader::new(reader));
        decoder
            .read_info()
            .map_err(|err| DecodeError::Rejected(err.to_string()))?;
        let info = decoder
            .info()
            .ok_or_else(|| DecodeError::Rejected("missing frame header".into()))?;
        match info.pixel_format {
            PixelFormat::L8 | PixelFormat::RGB24 | PixelFormat::CMYK32 => {}
            other => return Err(DecodeError::Unsupported(format!("{other:?}"))),
        }
        if info.width == 0 || info.height == 0 {
            return Err(DecodeError::Rejected("zero-sized frame".into()));
        }
        let (width, height) = (u32::from(info.width), u32::from(info.height));
        if width as usize * height as usize > max_pixels {
            return Err(DecodeError::Allocation { width, height });
        }
        let samples = decoder
            .decode()
            .map_err(|err| DecodeError::Rejected(err.to_string()))?;
        Ok(Self {
            width,
            height,
            samples,
            format: info.pixel_format,
            next: 0,
            scratch: vec![0; (MCU_SIZE * MCU_SIZE) as usize],
        })
    }

    fn columns(&self) -> u32 {
        self.width.div_ceil(MCU_SIZE)
    }

    fn rows(&self) -> u32 {
        self.height.div_ceil(MCU_SIZE)
    }

    fn sample(&self, x: u32, y: u32) -> u16 {
        // Padding repeats the last column/row, as an encoder pads MCUs.
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let idx = y * self.width as usize + x;
        match self.format {
            PixelFormat::L8 => {
                let l = self.samples[idx];
                rgb565(l, l, l)
            }
            PixelFormat::CMYK32 => {
                let [r, g, b] = cmyk_to_rgb(&self.samples[idx * 4..idx * 4 + 4]);
                rgb565(r, g, b)
            }
            _ => {
                let p = &self.samples[idx * 3..idx * 3 + 3];
                rgb565(p[0], p[1], p[2])
            }
        }
    }
}

fn cmyk_to_rgb(cmyk: &[u8]) -> [u8; 3] {
    let k = f32::from(cmyk[3]) / 255.0;
    let channel = |v: u8| {
        let v = f32::from(v) / 255.0 * (1.0 - k) + k;
        ((1.0 - v) * 255.0).round().clamp(0.0, 255.0) as u8
    };
    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
}

impl BlockSource for JpegBlocks {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_block(&mut self) -> Option<Result<Block<'_>, DecodeError>> {
        let columns = self.columns();
        if self.next >= columns * self.rows() {
            return None;
        }
        let grid_x = self.next % columns;
        let grid_y = self.next / columns;
        self.next += 1;

        let mut scratch = std::mem::take(&mut self.scratch);
        for ly in 0..MCU_SIZE {
            for lx in 0..MCU_SIZE {
                scratch[(ly * MCU_SIZE + lx) as usize] =
                    self.sample(grid_x * MCU_SIZE + lx, grid_y * MCU_SIZE + ly);
            }
        }
        self.scratch = scratch;
        Some(Ok(Block {
            grid_x,
            grid_y,
            width: MCU_SIZE,
            height: MCU_SIZE,
            pixels: &self.scratch,
        }))
    }
}

/// The single decoded frame: panel-order RGB565, row-major.
///
/// `pixels.len()` is always exactly `width * height`.
#[derive(Debug, Default)]
pub struct DecodedImage {
    pixels: Box<[u16]>,
    width: u32,
    height: u32,
    generation: u64,
}

impl DecodedImage {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    /// Allocated pixel slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pixels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Bumped on every reallocation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Make room for a `width` x `height` frame. Matching dimensions keep the
    /// current allocation; otherwise a new one replaces it in one step, and a
    /// failed allocation leaves the current frame untouched.
    fn prepare(&mut self, width: u32, height: u32, max_pixels: usize) -> Result<bool, DecodeError> {
        if width == self.width && height == self.height && !self.pixels.is_empty() {
            return Ok(false);
        }
        let count = (width as usize)
            .checked_mul(height as usize)
            .filter(|count| *count <= max_pixels)
            .ok_or(DecodeError::Allocation { width, height })?;
        let fresh = allocate(count).map_err(|_| DecodeError::Allocation { width, height })?;
        self.pixels = fresh;
        self.width = width;
        self.height = height;
        self.generation += 1;
        Ok(true)
    }
}

fn allocate(count: usize) -> Result<Box<[u16]>, TryReserveError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(count)?;
    buf.resize(count, 0);
    Ok(buf.into_boxed_slice())
}

/// Bookkeeping from the most recent successful decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub blocks: u32,
    pub yields: u32,
    pub reallocated: bool,
}

/// Owns the decode buffer and fills it block by block.
#[derive(Debug)]
pub struct Compositor {
    image: DecodedImage,
    max_pixels: usize,
    last_stats: DecodeStats,
}

impl Compositor {
    #[must_use]
    pub fn new(max_pixels: usize) -> Self {
        Self {
            image: DecodedImage::default(),
            max_pixels,
            last_stats: DecodeStats::default(),
        }
    }

    /// Open `identifier` on storage and decode it into the owned buffer.
    ///
    /// Entropy decoding runs on the blocking pool; only block placement
    /// happens on the calling task.
    pub async fn decode(
        &mut self,
        storage: &dyn Storage,
        identifier: &str,
    ) -> Result<&DecodedImage, DecodeError> {
        let reader = storage
            .open_read(identifier)
            .map_err(|source| DecodeError::Open {
                identifier: identifier.to_string(),
                source,
            })?;
        let max_pixels = self.max_pixels;
        let blocks = tokio::task::spawn_blocking(move || JpegBlocks::new(reader, max_pixels))
            .await
            .map_err(|err| DecodeError::Rejected(format!("decode task failed: {err}")))??;
        self.compose(blocks).await
    }

    /// Drain `source` into the owned buffer.
    pub async fn compose<S: BlockSource>(
        &mut self,
        mut source: S,
    ) -> Result<&DecodedImage, DecodeError> {
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::Rejected("zero-sized frame".into()));
        }
        let reallocated = self.image.prepare(width, height, self.max_pixels)?;
        let mut stats = DecodeStats {
            reallocated,
            ..DecodeStats::default()
        };
        let mut current_row = 0;

        loop {
            let grid_y = {
                let Some(block) = source.next_block() else {
                    break;
                };
                let block = block?;
                place_block(&mut self.image, &block);
                block.grid_y
            };
            stats.blocks += 1;
            if grid_y != current_row {
                current_row = grid_y;
                if grid_y % YIELD_EVERY_BLOCK_ROWS == 0 {
                    trace!(row = grid_y, "decode yielding");
                    stats.yields += 1;
                    tokio::task::yield_now().await;
                }
            }
        }

        debug!(
            width,
            height,
            blocks = stats.blocks,
            reallocated,
            "decoded frame"
        );
        self.last_stats = stats;
        Ok(&self.image)
    }

    #[must_use]
    pub fn image(&self) -> &DecodedImage {
        &self.image
    }

    #[must_use]
    pub fn last_stats(&self) -> DecodeStats {
        self.last_stats
    }
}

fn place_block(image: &mut DecodedImage, block: &Block<'_>) {
    let origin_x = block.grid_x * block.width;
    let origin_y = block.grid_y * block.height;
    if origin_x >= image.width || origin_y >= image.height {
        return;
    }
    let visible_w = block.width.min(image.width - origin_x) as usize;
    let visible_h = block.height.min(image.height - origin_y) as usize;
    let stride = image.width as usize;

    for ly in 0..visible_h {
        let src = &block.pixels[ly * block.width as usize..][..visible_w];
        let dst_start = (origin_y as usize + ly) * stride + origin_x as usize;
        let dst = &mut image.pixels[dst_start..dst_start + visible_w];
        for (d, s) in dst.iter_mut().zip(src) {
            *d = to_panel(*s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Solid {
        width: u32,
        height: u32,
        block: u32,
        next: u32,
        payload: Vec<u16>,
    }

    impl Solid {
        fn new(width: u32, height: u32, block: u32, value: u16) -> Self {
            Self {
                width,
                height,
                block,
                next: 0,
                payload: vec![value; (block * block) as usize],
            }
        }
    }

    impl BlockSource for Solid {
        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn next_block(&mut self) -> Option<Result<Block<'_>, DecodeError>> {
            let cols = self.width.div_ceil(self.block);
            let rows = self.height.div_ceil(self.block);
            if self.next >= cols * rows {
                return None;
            }
            let n = self.next;
            self.next += 1;
            Some(Ok(Block {
                grid_x: n % cols,
                grid_y: n / cols,
                width: self.block,
                height: self.block,
                pixels: &self.payload,
            }))
        }
    }

    #[tokio::test]
    async fn yields_every_eighth_block_row() {
        let mut compositor = Compositor::new(usize::MAX);
        compositor.compose(Solid::new(16, 17 * 16, 16, 1)).await.unwrap();
        let stats = compositor.last_stats();
        assert_eq!(stats.blocks, 17);
        assert_eq!(stats.yields, 2);
    }

    #[tokio::test]
    async fn oversized_frame_keeps_previous_buffer() {
        let mut compositor = Compositor::new(64);
        compositor.compose(Solid::new(8, 8, 8, 0x0102)).await.unwrap();
        let generation = compositor.image().generation();

        let err = compositor.compose(Solid::new(16, 16, 8, 7)).await.unwrap_err();
        assert!(matches!(err, DecodeError::Allocation { width: 16, height: 16 }));
        let image = compositor.image();
        assert_eq!(image.generation(), generation);
        assert_eq!((image.width(), image.height()), (8, 8));
        assert!(image.pixels().iter().all(|p| *p == 0x0201));
    }

    #[tokio::test]
    async fn zero_sized_source_is_rejected() {
        let mut compositor = Compositor::new(usize::MAX);
        let err = compositor.compose(Solid::new(0, 4, 8, 1)).await.unwrap_err();
        assert!(matches!(err, DecodeError::Rejected(_)));
        assert!(compositor.image().is_empty());
    }

    #[test]
    fn cmyk_black_plate_wins() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0]), [255, 255, 255]);
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 255]), [0, 0, 0]);
        assert_eq!(cmyk_to_rgb(&[255, 0, 0, 0]), [0, 255, 255]);
    }

    #[test]
    fn garbage_stream_is_rejected() {
        let err = JpegBlocks::new(&b"definitely not a jpeg"[..], usize::MAX)
            .err()
            .expect("garbage must not decode");
        assert!(matches!(err, DecodeError::Rejected(_)));
    }
}
