use anyhow::Result;
use embedded_graphics::{
    mono_font::{MonoFont, MonoTextStyle},
    prelude::*,
    primitives::{PrimitiveStyleBuilder, Rectangle},
    text::Text,
};
use log::info;
use profont::{PROFONT_14_POINT, PROFONT_18_POINT, PROFONT_24_POINT};

use crate::framebuffer::{EpdColor, Framebuffer, PANEL_HEIGHT, PANEL_WIDTH};
use crate::render::{Display, Emphasis, Line, LINE_COUNT};

// ── Geometry (400x300 landscape) ────────────────────────────────────

pub const MARGIN_X: i32 = 8;
pub const FIELD_GAP: i32 = 10;

/// Text baseline per layout line.
pub const LINE_BASELINES: [i32; LINE_COUNT] = [26, 80, 115, 168, 212, 264];

/// Rules drawn under the date line and under the derived metrics.
pub const SEPARATOR_YS: [i32; 2] = [38, 132];

pub fn font_for(line: usize) -> &'static MonoFont<'static> {
    match line {
        0 => &PROFONT_18_POINT,
        1 => &PROFONT_24_POINT,
        _ => &PROFONT_14_POINT,
    }
}

pub fn color_for(emphasis: Emphasis) -> EpdColor {
    match emphasis {
        Emphasis::Primary => EpdColor::Black,
        Emphasis::Accent => EpdColor::Red,
    }
}

/// Vertical band a line's glyphs can occupy.
pub fn line_band(index: usize) -> Rectangle {
    let font = font_for(index);
    let height = font.character_size.height;
    let top = LINE_BASELINES[index] - font.baseline as i32;
    Rectangle::new(Point::new(0, top), Size::new(PANEL_WIDTH, height))
}

pub fn draw_hline(fb: &mut Framebuffer, y: i32, color: EpdColor) {
    let style = PrimitiveStyleBuilder::new().fill_color(color).build();
    Rectangle::new(Point::new(MARGIN_X, y), Size::new(fb.size().width - 2 * MARGIN_X as u32, 1))
        .into_styled(style)
        .draw(fb)
        .ok();
}

/// Pushes a finished framebuffer to the physical panel.
pub trait PanelSink {
    fn refresh(&mut self, fb: &Framebuffer) -> Result<()>;
}

/// [`Display`] that lays lines out on a tri-colour framebuffer and hands
/// the page to a [`PanelSink`].
pub struct FramebufferDisplay<P> {
    fb: Framebuffer,
    sink: P,
}

impl<P: PanelSink> FramebufferDisplay<P> {
    pub fn new(sink: P) -> Self {
        Self {
            fb: Framebuffer::new(PANEL_WIDTH, PANEL_HEIGHT),
            sink,
        }
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }
}

impl<P: PanelSink> Display for FramebufferDisplay<P> {
    fn begin_page(&mut self) -> Result<()> {
        self.fb.clear_color(EpdColor::White);
        for y in SEPARATOR_YS {
            draw_hline(&mut self.fb, y, EpdColor::Black);
        }
        Ok(())
    }

    fn draw_line(&mut self, index: usize, line: &Line) -> Result<()> {
        let Some(&baseline) = LINE_BASELINES.get(index) else {
            return Ok(());
        };
        let font = font_for(index);
        let mut cursor = Point::new(MARGIN_X, baseline);
        for field in &line.fields {
            let style = MonoTextStyle::new(font, color_for(field.emphasis));
            let end = Text::new(&field.text, cursor, style)
                .draw(&mut self.fb)
                .unwrap_or(cursor);
            cursor = Point::new(end.x + FIELD_GAP, baseline);
        }
        Ok(())
    }

    fn end_page(&mut self) -> Result<()> {
        info!("Display: refreshing panel");
        self.sink.refresh(&self.fb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{paint, Field, Screen};

    #[derive(Default)]
    struct CountingSink {
        refreshes: usize,
    }

    impl PanelSink for CountingSink {
        fn refresh(&mut self, _fb: &Framebuffer) -> Result<()> {
            self.refreshes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_lines_do_not_overlap() {
        for i in 1..LINE_COUNT {
            let above = line_band(i - 1);
            let below = line_band(i);
            assert!(above.top_left.y + above.size.height as i32 <= below.top_left.y, "line {i}");
        }
        assert!(line_band(LINE_COUNT - 1).top_left.y + 20 <= PANEL_HEIGHT as i32);
    }

    #[test]
    fn test_emphasis_maps_to_ink_colour() {
        let mut screen = Screen::default();
        screen.lines[1].fields.push(Field::accent("-3 C"));
        screen.lines[3].fields.push(Field::primary("12:00"));

        let mut display = FramebufferDisplay::new(CountingSink::default());
        paint(&mut display, &screen).unwrap();
        let fb = display.framebuffer();

        assert!(fb.count_in(&line_band(1), EpdColor::Red) > 0);
        assert_eq!(fb.count_in(&line_band(1), EpdColor::Black), 0);
        assert!(fb.count_in(&line_band(3), EpdColor::Black) > 0);
        assert_eq!(fb.count_in(&line_band(3), EpdColor::Red), 0);
        assert_eq!(fb.count_in(&line_band(5), EpdColor::Black), 0);
        assert_eq!(display.sink().refreshes, 1);
    }

    #[test]
    fn test_begin_page_wipes_previous_content() {
        let mut display = FramebufferDisplay::new(CountingSink::default());
        let mut screen = Screen::default();
        screen.lines[4].fields.push(Field::accent("Tomorrow"));
        paint(&mut display, &screen).unwrap();
        paint(&mut display, &Screen::default()).unwrap();
        assert_eq!(display.framebuffer().count_in(&line_band(4), EpdColor::Red), 0);
        assert_eq!(display.sink().refreshes, 2);
    }
}
