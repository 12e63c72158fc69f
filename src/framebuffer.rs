use embedded_graphics::{
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Size},
    pixelcolor::PixelColor,
    prelude::*,
    primitives::{PointsIter, Rectangle},
    Pixel,
};

/// Native panel resolution (4.2" tri-colour, landscape).
pub const PANEL_WIDTH: u32 = 400;
pub const PANEL_HEIGHT: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpdColor {
    #[default]
    White,
    Black,
    Red,
}

impl PixelColor for EpdColor {
    type Raw = ();
}

/// One-bit-per-pixel planes in the controller's RAM order, MSB first.
///
/// `black` holds 1 for white and 0 for ink; `red` holds 1 where red ink
/// overrides the black plane.
#[derive(Clone)]
pub struct Framebuffer {
    black: Vec<u8>,
    red: Vec<u8>,
    width: u32,
    height: u32,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let plane = Self::row_bytes_for(width) * height as usize;
        Self {
            black: vec![0xFF; plane],
            red: vec![0x00; plane],
            width,
            height,
        }
    }

    fn row_bytes_for(width: u32) -> usize {
        width.div_ceil(8) as usize
    }

    pub fn row_bytes(&self) -> usize {
        Self::row_bytes_for(self.width)
    }

    pub fn black_plane(&self) -> &[u8] {
        &self.black
    }

    pub fn red_plane(&self) -> &[u8] {
        &self.red
    }

    pub fn clear_color(&mut self, color: EpdColor) {
        let (black, red) = match color {
            EpdColor::White => (0xFF, 0x00),
            EpdColor::Black => (0x00, 0x00),
            EpdColor::Red => (0xFF, 0xFF),
        };
        self.black.fill(black);
        self.red.fill(red);
    }

    fn locate(&self, x: i32, y: i32) -> Option<(usize, u8)> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        let idx = y as usize * self.row_bytes() + x as usize / 8;
        Some((idx, 0x80 >> (x as u32 % 8)))
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: EpdColor) {
        let Some((idx, mask)) = self.locate(x, y) else {
            return;
        };
        match color {
            EpdColor::White => {
                self.black[idx] |= mask;
                self.red[idx] &= !mask;
            }
            EpdColor::Black => {
                self.black[idx] &= !mask;
                self.red[idx] &= !mask;
            }
            EpdColor::Red => {
                self.black[idx] |= mask;
                self.red[idx] |= mask;
            }
        }
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<EpdColor> {
        let (idx, mask) = self.locate(x, y)?;
        Some(if self.red[idx] & mask != 0 {
            EpdColor::Red
        } else if self.black[idx] & mask == 0 {
            EpdColor::Black
        } else {
            EpdColor::White
        })
    }

    /// Pixels of `color` inside `area`.
    pub fn count_in(&self, area: &Rectangle, color: EpdColor) -> usize {
        area.points()
            .filter(|p| self.pixel(p.x, p.y) == Some(color))
            .count()
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Framebuffer {
    type Color = EpdColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.set_pixel(point.x, point.y, color);
        }
        Ok(())
    }
}
