//! ESP-IDF implementations of the capability traits, and board wiring.

mod epd;
mod http;
mod nvs;
mod portal;
mod sntp;
mod wifi;

use anyhow::Result;
use esp_idf_hal::gpio::{AnyIOPin, PinDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::spi::config::{Config as SpiConfig, DriverConfig};
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use log::{info, warn};

use crate::app::{Parts, Platform, Station};
use crate::layout::FramebufferDisplay;
use crate::render::{paint, Field, Screen};
use crate::retry::ThreadSleeper;
use crate::settings::{MemoryStorage, RecordStorage};

pub use epd::Ssd1683Panel;
pub use http::{EspHeap, EspHttpTransport};
pub use nvs::NvsRecordStorage;
pub use portal::EspPortal;
pub use sntp::{EspClock, EspSntpSource};
pub use wifi::EspWifiDriver;

const EPD_SPI_HZ: u32 = 4_000_000;

pub struct EspPlatform;

impl Platform for EspPlatform {
    type Storage = Box<dyn RecordStorage>;
    type Wifi = EspWifiDriver;
    type Portal = EspPortal;
    type Transport = EspHttpTransport;
    type Heap = EspHeap;
    type Time = EspSntpSource;
    type Clock = EspClock;
    type Display = FramebufferDisplay<Ssd1683Panel>;
    type Sleeper = ThreadSleeper;
}

/// Waveshare e-Paper ESP32 driver board wiring:
/// SCK 13, DIN 14, CS 15, BUSY 25, RST 26, DC 27.
fn init_panel(peripherals: Peripherals) -> Result<(FramebufferDisplay<Ssd1683Panel>, esp_idf_hal::modem::Modem)> {
    let pins = peripherals.pins;
    let driver = SpiDriver::new(
        peripherals.spi2,
        pins.gpio13,
        pins.gpio14,
        Option::<AnyIOPin>::None,
        &DriverConfig::new(),
    )?;
    let spi = SpiDeviceDriver::new(
        driver,
        Some(pins.gpio15),
        &SpiConfig::new().baudrate(Hertz(EPD_SPI_HZ)),
    )?;
    let dc = PinDriver::output(pins.gpio27.downgrade())?;
    let rst = PinDriver::output(pins.gpio26.downgrade())?;
    let busy = PinDriver::input(pins.gpio25.downgrade())?;
    info!("EPD: SPI up at {} Hz", EPD_SPI_HZ);

    let display = FramebufferDisplay::new(Ssd1683Panel::new(spi, dc, rst, busy));
    Ok((display, peripherals.modem))
}

pub fn run() -> Result<()> {
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let (mut display, modem) = init_panel(peripherals)?;
    let mut splash = Screen::default();
    splash.lines[0].fields.push(Field::accent("Starting..."));
    if let Err(e) = paint(&mut display, &splash) {
        warn!("EPD: splash failed: {:#}", e);
    }

    let storage: Box<dyn RecordStorage> = match NvsRecordStorage::new(nvs_partition.clone()) {
        Ok(nvs) => Box::new(nvs),
        Err(e) => {
            warn!("NVS unavailable ({}); settings will not survive a reboot", e);
            Box::new(MemoryStorage::default())
        }
    };

    let wifi = EspWifi::new(modem, sysloop, Some(nvs_partition))?;

    let parts: Parts<EspPlatform> = Parts {
        storage,
        wifi: EspWifiDriver::new(wifi),
        portal: EspPortal::default(),
        transport: EspHttpTransport,
        heap: EspHeap,
        time: EspSntpSource::default(),
        clock: EspClock,
        display,
        sleeper: ThreadSleeper,
    };
    Station::new(parts).run_forever()
}
