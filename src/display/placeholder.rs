//! "No Photos Found" screen shown while the index is empty.

use std::convert::Infallible;

use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Alignment, Text};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

const CANVAS_WIDTH: u32 = 400;    // Drawing width before upscaling, keeps the bitmap font legible
const BORDER: u32 = 8;

const COL_BACKGROUND: Rgb888 = Rgb888::WHITE;
const COL_TITLE: Rgb888 = Rgb888::BLACK;
const COL_HINT: Rgb888 = Rgb888::new(0x40, 0x40, 0x40);
const COL_FRAME: Rgb888 = Rgb888::new(0x00, 0x00, 0xC0);

struct Canvas<'a> {
    image: &'a mut RgbImage,
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I: IntoIterator<Item = Pixel<Rgb888>>>(&mut self, pixels: I) -> Result<(), Infallible> {
        for Pixel(p, c) in pixels {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < self.image.width() && (p.y as u32) < self.image.height() {
                self.image.put_pixel(p.x as u32, p.y as u32, Rgb([c.r(), c.g(), c.b()]));
            }
        }
        Ok(())
    }
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

/// Renders the placeholder at `width` x `height`. `hint` goes under the title,
/// typically the folder to drop photos into.
pub fn render(width: u32, height: u32, hint: &str) -> RgbImage {
    let scale = (width / CANVAS_WIDTH).max(1);
    let (w, h) = ((width / scale).max(1), (height / scale).max(1));

    let mut small = RgbImage::from_pixel(w, h, Rgb([COL_BACKGROUND.r(), COL_BACKGROUND.g(), COL_BACKGROUND.b()]));
    let mut canvas = Canvas { image: &mut small };

    // Infallible target, drawing cannot fail
    let _ = draw(&mut canvas, w, h, hint);

    if scale == 1 && (w, h) == (width, height) {
        return small;
    }
    imageops::resize(&small, width, height, FilterType::Nearest)
}

fn draw(canvas: &mut Canvas, w: u32, h: u32, hint: &str) -> Result<(), Infallible> {
    if w > BORDER * 2 && h > BORDER * 2 {
        Rectangle::new(Point::new(BORDER as i32, BORDER as i32), Size::new(w - BORDER * 2, h - BORDER * 2))
            .into_styled(PrimitiveStyle::with_stroke(COL_FRAME, 2))
            .draw(canvas)?;
    }

    let center_x = (w / 2) as i32;
    let center_y = (h / 2) as i32;

    let title_style = MonoTextStyle::new(&FONT_10X20, COL_TITLE);
    Text::with_alignment("No Photos Found", Point::new(center_x, center_y - 6), title_style, Alignment::Center)
        .draw(canvas)?;

    let hint_style = MonoTextStyle::new(&FONT_6X10, COL_HINT);
    // 6px per char in FONT_6X10
    let max_chars = (w.saturating_sub(BORDER * 4) / 6) as usize;
    let hint = shorten(hint, max_chars);
    Text::with_alignment(&hint, Point::new(center_x, center_y + 20), hint_style, Alignment::Center)
        .draw(canvas)?;

    Ok(())
}

/// Keeps the tail of long hints, paths are most telling at the end.
fn shorten(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars || max_chars < 4 {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - (max_chars - 3)).collect();
    format!("...{}", tail)
}
