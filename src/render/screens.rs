//! Static informational screens (no images, fallback network, storage error).

use std::convert::Infallible;

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_10X20};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::pixelcolor::raw::{RawData, RawU16};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle};
use embedded_graphics::text::{Alignment, Text};

use crate::processing::color::to_panel;

const BACKGROUND: Rgb565 = Rgb565::BLACK;
const TITLE: Rgb565 = Rgb565::WHITE;
const BODY: Rgb565 = Rgb565::new(24, 48, 24);
const ACCENT: Rgb565 = Rgb565::new(0, 40, 31);
const ALERT: Rgb565 = Rgb565::new(31, 8, 4);

/// What the panel shows when it is not showing a photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Connecting {
        ssid: String,
    },
    NoImages {
        address: Option<String>,
    },
    Fallback {
        ssid: String,
        password: String,
        address: String,
    },
    MountError {
        detail: String,
    },
}

/// Full-screen drawing surface in panel byte order.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    words: Vec<u16>,
}

impl Canvas {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            words: vec![to_panel(RawU16::from(BACKGROUND).into_inner()); width as usize * height as usize],
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn words(&self) -> &[u16] {
        &self.words
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x >= self.width || y >= self.height {
                continue;
            }
            self.words[y as usize * self.width as usize + x as usize] = to_panel(RawU16::from(color).into_inner());
        }
        Ok(())
    }
}

fn draw_lines(canvas: &mut Canvas, title: &str, title_color: Rgb565, lines: &[String]) {
    let cx = canvas.width as i32 / 2;
    let block = 28 + 16 * lines.len() as i32;
    let mut y = (canvas.height as i32 - block) / 2 + 16;

    let title_style = MonoTextStyle::new(&FONT_10X20, title_color);
    Text::with_alignment(title, Point::new(cx, y), title_style, Alignment::Center)
        .draw(canvas)
        .ok();
    y += 8;
    Line::new(Point::new(cx - 100, y), Point::new(cx + 100, y))
        .into_styled(PrimitiveStyle::with_stroke(ACCENT, 1))
        .draw(canvas)
        .ok();
    y += 20;

    let body_style = MonoTextStyle::new(&FONT_6X10, BODY);
    for line in lines {
        Text::with_alignment(line, Point::new(cx, y), body_style, Alignment::Center)
            .draw(canvas)
            .ok();
        y += 16;
    }
}

/// Rasterize `screen` for a `width` x `height` panel.
#[must_use]
pub fn render(screen: &Screen, width: u32, height: u32) -> Canvas {
    let mut canvas = Canvas::new(width, height);
    match screen {
        Screen::Connecting { ssid } => {
            draw_lines(
                &mut canvas,
                "Connecting",
                TITLE,
                &[format!("Joining network {ssid}")],
            );
        }
        Screen::NoImages { address } => {
            let mut lines = vec!["Add .jpg files to the storage card".to_string()];
            if let Some(address) = address {
                lines.push(format!("or upload them at http://{address}/"));
            }
            draw_lines(&mut canvas, "No photos", TITLE, &lines);
        }
        Screen::Fallback {
            ssid,
            password,
            address,
        } => {
            draw_lines(
                &mut canvas,
                "Wi-Fi setup",
                TITLE,
                &[
                    format!("Join network: {ssid}"),
                    format!("Password: {password}"),
                    format!("Then open http://{address}/"),
                ],
            );
        }
        Screen::MountError { detail } => {
            draw_lines(
                &mut canvas,
                "Storage error",
                ALERT,
                &[
                    "The storage card could not be read.".to_string(),
                    "Reseat the card and power cycle the frame.".to_string(),
                    detail.clone(),
                ],
            );
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screens_draw_text_over_background() {
        let background = to_panel(RawU16::from(BACKGROUND).into_inner());
        for screen in [
            Screen::NoImages {
                address: Some("192.168.4.1".into()),
            },
            Screen::Fallback {
                ssid: "PhotoFrame-A1B2C3".into(),
                password: "photoframe".into(),
                address: "192.168.4.1".into(),
            },
            Screen::MountError {
                detail: "root missing".into(),
            },
        ] {
            let canvas = render(&screen, 320, 240);
            assert_eq!(canvas.dimensions(), (320, 240));
            assert_eq!(canvas.words().len(), 320 * 240);
            assert!(
                canvas.words().iter().any(|w| *w != background),
                "{screen:?} drew nothing"
            );
        }
    }

    #[test]
    fn last_pixel_lands_in_last_word() {
        let mut canvas = Canvas::new(7, 3);
        Pixel(Point::new(6, 2), Rgb565::WHITE).draw(&mut canvas).unwrap();
        let words = canvas.words();
        assert_eq!(words.len(), 21);
        assert_eq!(words[20], to_panel(RawU16::from(Rgb565::WHITE).into_inner()));
        assert!(words[..20].iter().all(|w| *w != words[20]));
    }

    #[test]
    fn off_canvas_pixels_are_ignored() {
        let mut canvas = Canvas::new(2, 2);
        canvas
            .draw_iter([
                Pixel(Point::new(-1, 0), Rgb565::WHITE),
                Pixel(Point::new(5, 1), Rgb565::WHITE),
                Pixel(Point::new(1, 1), Rgb565::WHITE),
            ])
            .unwrap();
        assert_eq!(canvas.words()[3], 0xFFFF);
        assert_eq!(canvas.words()[0], 0);
    }
}
