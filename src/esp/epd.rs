use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use esp_idf_hal::gpio::{AnyIOPin, Input, Output, PinDriver};
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver};
use log::info;

use crate::framebuffer::{Framebuffer, PANEL_HEIGHT, PANEL_WIDTH};
use crate::layout::PanelSink;

// ── SSD1683 commands ────────────────────────────────────────────────

const CMD_DRIVER_OUTPUT: u8 = 0x01;
const CMD_DEEP_SLEEP: u8 = 0x10;
const CMD_DATA_ENTRY: u8 = 0x11;
const CMD_SW_RESET: u8 = 0x12;
const CMD_TEMP_SENSOR: u8 = 0x18;
const CMD_MASTER_ACTIVATE: u8 = 0x20;
const CMD_UPDATE_CTRL2: u8 = 0x22;
const CMD_WRITE_BLACK: u8 = 0x24;
const CMD_WRITE_RED: u8 = 0x26;
const CMD_BORDER: u8 = 0x3C;
const CMD_RAM_X: u8 = 0x44;
const CMD_RAM_Y: u8 = 0x45;
const CMD_RAM_X_COUNTER: u8 = 0x4E;
const CMD_RAM_Y_COUNTER: u8 = 0x4F;

/// A full tri-colour refresh takes ~15 s; anything past this is a fault.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub type PanelSpi = SpiDeviceDriver<'static, SpiDriver<'static>>;

/// 4.2" 400x300 black/white/red panel on an SSD1683 controller.
pub struct Ssd1683Panel {
    spi: PanelSpi,
    dc: PinDriver<'static, AnyIOPin, Output>,
    rst: PinDriver<'static, AnyIOPin, Output>,
    busy: PinDriver<'static, AnyIOPin, Input>,
}

impl Ssd1683Panel {
    pub fn new(
        spi: PanelSpi,
        dc: PinDriver<'static, AnyIOPin, Output>,
        rst: PinDriver<'static, AnyIOPin, Output>,
        busy: PinDriver<'static, AnyIOPin, Input>,
    ) -> Self {
        Self { spi, dc, rst, busy }
    }

    fn command(&mut self, cmd: u8) -> Result<()> {
        self.dc.set_low()?;
        self.spi.write(&[cmd])?;
        Ok(())
    }

    fn data(&mut self, data: &[u8]) -> Result<()> {
        self.dc.set_high()?;
        // The SPI driver limits single transfers; stream large planes in chunks.
        for chunk in data.chunks(4000) {
            self.spi.write(chunk)?;
        }
        Ok(())
    }

    fn send(&mut self, cmd: u8, data: &[u8]) -> Result<()> {
        self.command(cmd)?;
        if !data.is_empty() {
            self.data(data)?;
        }
        Ok(())
    }

    fn wait_idle(&mut self, what: &str) -> Result<()> {
        let start = Instant::now();
        while self.busy.is_high() {
            if start.elapsed() > BUSY_TIMEOUT {
                bail!("EPD busy for more than {:?} during {}", BUSY_TIMEOUT, what);
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    fn init(&mut self) -> Result<()> {
        self.rst.set_low()?;
        thread::sleep(Duration::from_millis(10));
        self.rst.set_high()?;
        thread::sleep(Duration::from_millis(10));
        self.wait_idle("reset")?;

        self.send(CMD_SW_RESET, &[])?;
        self.wait_idle("sw reset")?;

        let last_row = (PANEL_HEIGHT - 1) as u16;
        let last_col_byte = (PANEL_WIDTH / 8 - 1) as u8;
        self.send(CMD_DRIVER_OUTPUT, &[(last_row & 0xFF) as u8, (last_row >> 8) as u8, 0x00])?;
        self.send(CMD_DATA_ENTRY, &[0x03])?;
        self.send(CMD_RAM_X, &[0x00, last_col_byte])?;
        self.send(CMD_RAM_Y, &[0x00, 0x00, (last_row & 0xFF) as u8, (last_row >> 8) as u8])?;
        self.send(CMD_BORDER, &[0x05])?;
        self.send(CMD_TEMP_SENSOR, &[0x80])?;
        Ok(())
    }

    fn reset_counters(&mut self) -> Result<()> {
        self.send(CMD_RAM_X_COUNTER, &[0x00])?;
        self.send(CMD_RAM_Y_COUNTER, &[0x00, 0x00])
    }
}

impl PanelSink for Ssd1683Panel {
    fn refresh(&mut self, fb: &Framebuffer) -> Result<()> {
        let start = Instant::now();
        self.init()?;

        self.reset_counters()?;
        self.send(CMD_WRITE_BLACK, fb.black_plane())?;
        self.reset_counters()?;
        self.send(CMD_WRITE_RED, fb.red_plane())?;

        self.send(CMD_UPDATE_CTRL2, &[0xF7])?;
        self.send(CMD_MASTER_ACTIVATE, &[])?;
        self.wait_idle("refresh")?;

        // Deep sleep until the next page; `init` starts with a hardware reset.
        self.send(CMD_DEEP_SLEEP, &[0x01])?;
        info!("EPD refresh done in {}ms", start.elapsed().as_millis());
        Ok(())
    }
}
