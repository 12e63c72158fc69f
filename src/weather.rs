//! OpenWeatherMap request building and response decoding.

use log::info;
use serde::Deserialize;
use url::Url;

use crate::config;
use crate::error::AttemptError;
use crate::settings::DeviceSettings;

// ── Data types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub description: String,
    pub city: String,
    pub temperature: f32,
    pub feels_like: f32,
    pub wind_speed: f32,
    pub pressure_hpa: Option<i32>,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSample {
    pub timestamp: i64,
    pub temperature: f32,
}

// ── OWM JSON structures ─────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct OwmCurrentRoot {
    main: Option<OwmMain>,
    weather: Option<Vec<OwmWeather>>,
    wind: Option<OwmWind>,
    name: Option<String>,
    sys: Option<OwmSys>,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: Option<f64>,
    feels_like: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Deserialize)]
struct OwmWeather {
    description: Option<String>,
}

#[derive(Deserialize)]
struct OwmWind {
    speed: Option<f64>,
}

#[derive(Deserialize)]
struct OwmSys {
    sunrise: Option<i64>,
    sunset: Option<i64>,
}

#[derive(Deserialize)]
pub(crate) struct OwmForecastRoot {
    list: Option<Vec<OwmForecastEntry>>,
}

#[derive(Deserialize)]
struct OwmForecastEntry {
    dt: Option<i64>,
    main: Option<OwmMain>,
}

// ── Parsing ─────────────────────────────────────────────────────────

impl OwmCurrentRoot {
    pub(crate) fn into_snapshot(self) -> Result<WeatherSnapshot, AttemptError> {
        let main = self
            .main
            .ok_or_else(|| AttemptError::PayloadDecode("missing \"main\"".into()))?;
        let temperature = main
            .temp
            .ok_or_else(|| AttemptError::PayloadDecode("missing \"main.temp\"".into()))?
            as f32;
        let feels_like = main
            .feels_like
            .ok_or_else(|| AttemptError::PayloadDecode("missing \"main.feels_like\"".into()))?
            as f32;
        let wind_speed = self
            .wind
            .and_then(|w| w.speed)
            .ok_or_else(|| AttemptError::PayloadDecode("missing \"wind.speed\"".into()))?
            as f32;
        let description = self
            .weather
            .and_then(|arr| arr.into_iter().next())
            .and_then(|w| w.description)
            .unwrap_or_default();
        let (sunrise, sunset) = self
            .sys
            .map(|s| (s.sunrise, s.sunset))
            .unwrap_or((None, None));

        Ok(WeatherSnapshot {
            description,
            city: self.name.unwrap_or_default(),
            temperature,
            feels_like,
            wind_speed,
            pressure_hpa: main.pressure.map(|p| p.round() as i32),
            sunrise,
            sunset,
        })
    }
}

impl OwmForecastRoot {
    /// Samples in provider order; entries without a timestamp or temperature
    /// are skipped.
    pub(crate) fn into_samples(self) -> Result<Vec<ForecastSample>, AttemptError> {
        let list = self
            .list
            .ok_or_else(|| AttemptError::PayloadDecode("missing \"list\"".into()))?;
        let samples: Vec<ForecastSample> = list
            .into_iter()
            .filter_map(|entry| {
                let temp = entry.main?.temp?;
                Some(ForecastSample {
                    timestamp: entry.dt?,
                    temperature: temp as f32,
                })
            })
            .collect();
        info!("forecast: {} samples", samples.len());
        Ok(samples)
    }
}

// ── Requests ────────────────────────────────────────────────────────

fn provider_url(
    base: &str,
    path: &str,
    settings: &DeviceSettings,
    extra: &[(&str, String)],
) -> Result<String, AttemptError> {
    let mut params: Vec<(&str, String)> = vec![
        ("q", settings.location_query.clone()),
        ("units", config::PROVIDER_UNITS.to_string()),
        ("lang", config::PROVIDER_LANG.to_string()),
    ];
    params.extend(extra.iter().cloned());
    params.push(("appid", settings.provider_api_key.clone()));
    Url::parse_with_params(&format!("{}{}", base, path), &params)
        .map(String::from)
        .map_err(|e| AttemptError::TransportInit(format!("bad provider URL: {}", e)))
}

pub fn current_url(base: &str, settings: &DeviceSettings) -> Result<String, AttemptError> {
    provider_url(base, "/data/2.5/weather", settings, &[])
}

pub fn forecast_url(base: &str, settings: &DeviceSettings) -> Result<String, AttemptError> {
    provider_url(
        base,
        "/data/2.5/forecast",
        settings,
        &[("cnt", config::FORECAST_SAMPLE_COUNT.to_string())],
    )
}
