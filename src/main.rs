#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!(
        "BOOT: epaper-weather v{} ({} hourly / {} daily slots)",
        env!("CARGO_PKG_VERSION"),
        epaper_weather::config::HOURLY_SLOTS,
        epaper_weather::config::DAILY_SLOTS
    );

    epaper_weather::esp::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("epaper-weather only runs on ESP-IDF targets; use `cargo test` on the host.");
}
