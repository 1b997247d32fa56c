//! 16-bit packed color helpers.
//!
//! Pixels are RGB565. The panel is wired with its two data bytes reversed
//! relative to the host, so every word is byte-swapped on its way to the
//! panel.

/// Pack an 8-bit-per-channel color into RGB565.
#[inline]
#[must_use]
pub const fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

/// Host RGB565 to the panel's byte order.
#[inline]
#[must_use]
pub const fn to_panel(pixel: u16) -> u16 {
    pixel.swap_bytes()
}

/// Panel byte order back to host RGB565.
#[inline]
#[must_use]
pub const fn from_panel(word: u16) -> u16 {
    word.swap_bytes()
}

pub const BLACK: u16 = 0;
