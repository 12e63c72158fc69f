//! Turns the application state into the fixed six-line panel layout.
//!
//! Composition is pure: it produces text and emphasis per field, and the
//! [`Display`] implementation decides how that becomes pixels.

use anyhow::Result;

use crate::app::AppContext;
use crate::config;
use crate::error::{ConnectError, FetchError};
use crate::forecast::{PanelForecast, EMPTY_SLOT_LABEL};
use crate::time_sync::LocalTime;
use crate::weather::WeatherSnapshot;

pub const LINE_COUNT: usize = 6;

pub const LINE_DATE: usize = 0;
pub const LINE_CURRENT: usize = 1;
pub const LINE_METRICS: usize = 2;
pub const LINE_HOURLY: usize = 3;
pub const LINE_TOMORROW: usize = 4;
pub const LINE_LAST: usize = 5;

pub const NOT_SYNCED_MARKER: &str = "Time not synchronized";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    /// Black on the tri-colour panel.
    Primary,
    /// Red.
    Accent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub text: String,
    pub emphasis: Emphasis,
}

impl Field {
    pub fn primary(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emphasis: Emphasis::Primary,
        }
    }

    pub fn accent(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emphasis: Emphasis::Accent,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub fields: Vec<Field>,
}

impl Line {
    fn push(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn text(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_accent(&self, text: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.emphasis == Emphasis::Accent && f.text.contains(text))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screen {
    pub lines: [Line; LINE_COUNT],
}

/// What the bottom line shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutVariant {
    DailyStrip,
    SunAndPressure,
}

impl Default for LayoutVariant {
    fn default() -> Self {
        if cfg!(feature = "astro-line") {
            LayoutVariant::SunAndPressure
        } else {
            LayoutVariant::DailyStrip
        }
    }
}

/// Page framing plus per-line output.
pub trait Display {
    fn begin_page(&mut self) -> Result<()>;
    fn draw_line(&mut self, index: usize, line: &Line) -> Result<()>;
    /// Pushes the finished page to the panel.
    fn end_page(&mut self) -> Result<()>;
}

impl<D: Display + ?Sized> Display for &mut D {
    fn begin_page(&mut self) -> Result<()> {
        (**self).begin_page()
    }
    fn draw_line(&mut self, index: usize, line: &Line) -> Result<()> {
        (**self).draw_line(index, line)
    }
    fn end_page(&mut self) -> Result<()> {
        (**self).end_page()
    }
}

pub fn paint<D: Display + ?Sized>(display: &mut D, screen: &Screen) -> Result<()> {
    display.begin_page()?;
    for (index, line) in screen.lines.iter().enumerate() {
        display.draw_line(index, line)?;
    }
    display.end_page()
}

#[derive(Debug, Clone, Copy)]
pub struct RenderCoordinator {
    local: LocalTime,
    variant: LayoutVariant,
}

impl Default for RenderCoordinator {
    fn default() -> Self {
        Self::new(LocalTime::configured(), LayoutVariant::default())
    }
}

impl RenderCoordinator {
    pub const fn new(local: LocalTime, variant: LayoutVariant) -> Self {
        Self { local, variant }
    }

    pub fn compose(&self, ctx: &AppContext, now: i64) -> Screen {
        let mut screen = Screen::default();
        let [date, current, metrics, hourly, tomorrow, last] = &mut screen.lines;

        if self.local.is_synchronized(now) {
            date.push(Field::primary(self.local.date(now)))
                .push(Field::accent(self.local.weekday_short(now)));
        } else {
            date.push(Field::accent(NOT_SYNCED_MARKER))
                .push(Field::primary(""));
        }
        if let Some(s) = &ctx.weather.snapshot {
            date.push(Field::primary(s.city.as_str()));
        }

        match &ctx.weather.snapshot {
            Some(s) => {
                current
                    .push(Field::accent(celsius(s.temperature)))
                    .push(Field::primary(s.description.as_str()));
                metrics
                    .push(Field::primary(format!("Feels {}", celsius(s.feels_like))))
                    .push(Field::primary(format!("Wind {} m/s", round(s.wind_speed))));
            }
            None if ctx.weather.error.is_none() => {
                current.push(Field::primary("Waiting for data"));
            }
            None => {}
        }
        if let Some(e) = &ctx.weather.error {
            current.push(Field::accent(banner("Weather", e)));
        }

        if let Some(summary) = &ctx.forecast.summary {
            compose_hourly(hourly, summary);
            let range = match summary.tomorrow {
                Some(r) => format!("{}..{} C", r.min, r.max),
                None => "--".into(),
            };
            tomorrow
                .push(Field::primary("Tomorrow"))
                .push(Field::accent(range));
        }
        if let Some(e) = &ctx.forecast.error {
            hourly.push(Field::accent(banner("Forecast", e)));
        }

        match self.variant {
            LayoutVariant::DailyStrip => {
                if let Some(summary) = &ctx.forecast.summary {
                    for day in &summary.daily {
                        last.push(Field::primary(day.weekday))
                            .push(Field::accent(day.mean.to_string()));
                    }
                }
            }
            LayoutVariant::SunAndPressure => {
                if let Some(s) = &ctx.weather.snapshot {
                    self.compose_astro(last, s);
                }
            }
        }
        screen
    }

    /// Dedicated screen for a cycle that never got online.
    pub fn compose_connect_error(&self, err: &ConnectError, network_name: &str) -> Screen {
        let mut screen = Screen::default();
        screen.lines[LINE_DATE].push(Field::accent("No WiFi connection"));
        screen.lines[LINE_CURRENT].push(Field::primary(err.to_string()));
        screen.lines[LINE_METRICS]
            .push(Field::primary("Network"))
            .push(Field::accent(network_name));
        screen.lines[LINE_HOURLY]
            .push(Field::primary("Setup AP"))
            .push(Field::accent(config::PROVISIONING_AP_SSID));
        screen.lines[LINE_TOMORROW].push(Field::primary(format!(
            "Retrying in {} min",
            config::FAILED_CYCLE_RETRY.as_secs() / 60
        )));
        screen
    }

    fn compose_astro(&self, line: &mut Line, s: &WeatherSnapshot) {
        let hhmm = |ts: Option<i64>| match ts {
            Some(ts) => self.local.hhmm(ts).to_string(),
            None => EMPTY_SLOT_LABEL.to_string(),
        };
        line.push(Field::primary("Rise"))
            .push(Field::accent(hhmm(s.sunrise)))
            .push(Field::primary("Set"))
            .push(Field::accent(hhmm(s.sunset)));
        match s.pressure_hpa {
            Some(p) => line.push(Field::primary(format!("{} hPa", p))),
            None => line.push(Field::primary("-- hPa")),
        };
    }
}

fn compose_hourly(line: &mut Line, summary: &PanelForecast) {
    for slot in &summary.hourly {
        let temp = match slot.temperature {
            Some(t) => t.to_string(),
            None => "--".into(),
        };
        line.push(Field::primary(slot.label.as_str()))
            .push(Field::accent(temp));
    }
}

fn banner(what: &str, err: &FetchError) -> String {
    match err {
        FetchError::RetryBudgetExhausted { attempts, .. } => {
            format!("{} failed ({} tries)", what, attempts)
        }
        FetchError::Cancelled { .. } => format!("{} cancelled", what),
    }
}

fn round(v: f32) -> i32 {
    v.round() as i32
}

fn celsius(v: f32) -> String {
    format!("{} C", round(v))
}
