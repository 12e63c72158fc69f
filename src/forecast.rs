//! Reduce the provider's 3-hourly forecast list into the fixed-size
//! summaries shown on the panel.
//!
//! Capacities are const generics so every buffer is sized at compile time.
//! Days beyond the daily capacity are dropped, never merged.

use log::{info, warn};

use crate::config;
use crate::time_sync::LocalTime;
use crate::weather::ForecastSample;

pub const EMPTY_SLOT_LABEL: &str = "--:--";
const DAY: i64 = 24 * 3600;

/// Which samples feed the per-day means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyWindow {
    /// Everything from tomorrow on. Tomorrow is then shown twice: as the
    /// min/max range and as the first daily mean.
    FromTomorrow,
    /// Everything from the day after tomorrow on.
    AfterTomorrow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourlySlot {
    pub label: heapless::String<5>,
    pub temperature: Option<i32>,
}

impl HourlySlot {
    pub fn empty() -> Self {
        let mut label = heapless::String::new();
        label.push_str(EMPTY_SLOT_LABEL).ok();
        Self {
            label,
            temperature: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.temperature.is_some()
    }

    pub fn temperature_or_zero(&self) -> i32 {
        self.temperature.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TempRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBucket {
    pub day_start: i64,
    pub sum: f64,
    pub count: u32,
}

impl DailyBucket {
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub fn rounded_mean(&self) -> i32 {
        self.mean().round() as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySummary {
    pub day_start: i64,
    pub weekday: &'static str,
    pub mean: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastSummary<const HOURLY: usize, const DAILY: usize> {
    pub hourly: [HourlySlot; HOURLY],
    pub tomorrow: Option<TempRange>,
    pub daily: heapless::Vec<DailySummary, DAILY>,
}

impl<const HOURLY: usize, const DAILY: usize> ForecastSummary<HOURLY, DAILY> {
    /// Tomorrow's range with "no samples" collapsed to `(0, 0)`.
    pub fn tomorrow_or_zero(&self) -> TempRange {
        self.tomorrow.unwrap_or_default()
    }
}

pub type PanelAggregator = ForecastAggregator<{ config::HOURLY_SLOTS }, { config::DAILY_SLOTS }>;
pub type PanelForecast = ForecastSummary<{ config::HOURLY_SLOTS }, { config::DAILY_SLOTS }>;

#[derive(Debug, Clone, Copy)]
pub struct ForecastAggregator<const HOURLY: usize, const DAILY: usize> {
    local: LocalTime,
    window: DailyWindow,
}

impl<const HOURLY: usize, const DAILY: usize> ForecastAggregator<HOURLY, DAILY> {
    pub const fn new(local: LocalTime, window: DailyWindow) -> Self {
        Self { local, window }
    }

    /// Samples whose timestamp has no calendar date are dropped first.
    pub fn aggregate(&self, samples: &[ForecastSample], now: i64) -> ForecastSummary<HOURLY, DAILY> {
        let usable: Vec<ForecastSample> = samples
            .iter()
            .copied()
            .filter(|s| self.local.is_representable(s.timestamp))
            .collect();
        if usable.len() < samples.len() {
            warn!("forecast: dropped {} samples with out-of-range timestamps", samples.len() - usable.len());
        }
        let samples = usable.as_slice();
        let hourly = self.hourly(samples, now);
        let tomorrow = self.tomorrow_range(samples, now);
        let daily = self
            .daily_buckets(samples, now)
            .iter()
            .map(|b| DailySummary {
                day_start: b.day_start,
                weekday: self.local.weekday_short(b.day_start),
                mean: b.rounded_mean(),
            })
            .collect();
        let summary = ForecastSummary {
            hourly,
            tomorrow,
            daily,
        };
        info!(
            "forecast: {}/{} hourly slots, tomorrow {:?}, {} days",
            summary.hourly.iter().filter(|s| s.is_filled()).count(),
            HOURLY,
            summary.tomorrow,
            summary.daily.len()
        );
        summary
    }

    /// The first `HOURLY` samples strictly after `now`, in provider order.
    pub fn hourly(&self, samples: &[ForecastSample], now: i64) -> [HourlySlot; HOURLY] {
        let mut slots: [HourlySlot; HOURLY] = core::array::from_fn(|_| HourlySlot::empty());
        let upcoming = samples.iter().filter(|s| s.timestamp > now);
        for (slot, sample) in slots.iter_mut().zip(upcoming) {
            *slot = HourlySlot {
                label: self.local.hhmm(sample.timestamp),
                temperature: Some(sample.temperature.round() as i32),
            };
        }
        slots
    }

    pub fn tomorrow_range(&self, samples: &[ForecastSample], now: i64) -> Option<TempRange> {
        let tomorrow_start = self.local.day_start(now).saturating_add(DAY);
        let day_after_start = tomorrow_start.saturating_add(DAY);

        let mut range: Option<(f32, f32)> = None;
        for s in samples
            .iter()
            .filter(|s| (tomorrow_start..day_after_start).contains(&s.timestamp))
        {
            range = Some(match range {
                None => (s.temperature, s.temperature),
                Some((lo, hi)) => (lo.min(s.temperature), hi.max(s.temperature)),
            });
        }
        range.map(|(lo, hi)| TempRange {
            min: lo.round() as i32,
            max: hi.round() as i32,
        })
    }

    pub fn daily_buckets(&self, samples: &[ForecastSample], now: i64) -> heapless::Vec<DailyBucket, DAILY> {
        let today_start = self.local.day_start(now);
        let window_start = match self.window {
            DailyWindow::FromTomorrow => today_start.saturating_add(DAY),
            DailyWindow::AfterTomorrow => today_start.saturating_add(2 * DAY),
        };

        let mut buckets: heapless::Vec<DailyBucket, DAILY> = heapless::Vec::new();
        for s in samples.iter().filter(|s| s.timestamp >= window_start) {
            let day_start = self.local.day_start(s.timestamp);
            match buckets.iter_mut().find(|b| b.day_start == day_start) {
                Some(bucket) => {
                    bucket.sum += s.temperature as f64;
                    bucket.count += 1;
                }
                None => {
                    // Full: this day is dropped.
                    buckets
                        .push(DailyBucket {
                            day_start,
                            sum: s.temperature as f64,
                            count: 1,
                        })
                        .ok();
                }
            }
        }
        buckets
    }
}

impl Default for PanelAggregator {
    fn default() -> Self {
        Self::new(LocalTime::configured(), config::DAILY_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOCAL: LocalTime = LocalTime::new(5 * 3600);
    // 2024-03-15 10:00 local (05:00 UTC), a Friday.
    const NOW: i64 = 1_710_478_800;
    const HOUR: i64 = 3600;

    fn today_start() -> i64 {
        LOCAL.day_start(NOW)
    }

    fn sample(timestamp: i64, temperature: f32) -> ForecastSample {
        ForecastSample {
            timestamp,
            temperature,
        }
    }

    fn agg<const H: usize, const D: usize>(window: DailyWindow) -> ForecastAggregator<H, D> {
        ForecastAggregator::new(LOCAL, window)
    }

    #[test]
    fn test_hourly_takes_first_future_samples_in_order() {
        // 10 samples, 3h apart, starting 1h before now.
        let samples: Vec<_> = (0..10)
            .map(|i| sample(NOW - HOUR + i * 3 * HOUR, i as f32))
            .collect();
        let slots = agg::<3, 3>(DailyWindow::AfterTomorrow).hourly(&samples, NOW);

        let labels: Vec<&str> = slots.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["12:00", "15:00", "18:00"]);
        let temps: Vec<Option<i32>> = slots.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, [Some(1), Some(2), Some(3)]);
        assert!(slots.iter().all(HourlySlot::is_filled));
    }

    #[test]
    fn test_hourly_excludes_now_and_pads_with_sentinels() {
        let samples = [sample(NOW - HOUR, 5.0), sample(NOW, 6.0), sample(NOW + HOUR, 7.4)];
        let slots = agg::<4, 3>(DailyWindow::AfterTomorrow).hourly(&samples, NOW);
        assert_eq!(slots[0].temperature, Some(7));
        for slot in &slots[1..] {
            assert_eq!(slot.label.as_str(), EMPTY_SLOT_LABEL);
            assert_eq!(slot.temperature_or_zero(), 0);
            assert!(!slot.is_filled());
        }
    }

    #[test]
    fn test_hourly_preserves_provider_order_without_sorting() {
        let samples = [sample(NOW + 6 * HOUR, 1.0), sample(NOW + 3 * HOUR, 2.0)];
        let slots = agg::<2, 1>(DailyWindow::AfterTomorrow).hourly(&samples, NOW);
        assert_eq!(slots[0].label.as_str(), "16:00");
        assert_eq!(slots[1].label.as_str(), "13:00");
    }

    #[test]
    fn test_tomorrow_range_empty_is_zero_pair() {
        let summary = agg::<2, 2>(DailyWindow::AfterTomorrow).aggregate(&[sample(NOW + HOUR, 3.0)], NOW);
        assert_eq!(summary.tomorrow, None);
        assert_eq!(summary.tomorrow_or_zero(), TempRange { min: 0, max: 0 });
    }

    #[test]
    fn test_tomorrow_range_single_sample() {
        let t = today_start() + DAY + 12 * HOUR;
        let range = agg::<1, 1>(DailyWindow::AfterTomorrow).tomorrow_range(&[sample(t, -2.5)], NOW);
        // Half away from zero.
        assert_eq!(range, Some(TempRange { min: -3, max: -3 }));
    }

    #[test]
    fn test_tomorrow_range_rounds_extremes_only_at_the_end() {
        let base = today_start() + DAY;
        let samples = [
            sample(base - 1, -20.0),
            sample(base, 1.4),
            sample(base + 9 * HOUR, 7.5),
            sample(base + 15 * HOUR, 3.0),
            sample(base + DAY, 30.0),
        ];
        let range = agg::<1, 1>(DailyWindow::AfterTomorrow).tomorrow_range(&samples, NOW);
        assert_eq!(range, Some(TempRange { min: 1, max: 8 }));
    }

    #[test]
    fn test_daily_means_per_local_day() {
        let d2 = today_start() + 2 * DAY;
        let d3 = today_start() + 3 * DAY;
        let samples = [
            sample(today_start() + DAY + HOUR, 100.0),
            sample(d2 + HOUR, 1.0),
            sample(d2 + 10 * HOUR, 2.0),
            sample(d2 + 23 * HOUR, 4.0),
            sample(d3, -1.5),
        ];
        let buckets = agg::<1, 3>(DailyWindow::AfterTomorrow).daily_buckets(&samples, NOW);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].day_start, d2);
        assert_eq!(buckets[0].count, 3);
        assert!((buckets[0].mean() - 7.0 / 3.0).abs() < 1e-9);
        assert_eq!(buckets[0].rounded_mean(), 2);
        assert_eq!(buckets[1].rounded_mean(), -2);

        let summary = agg::<1, 3>(DailyWindow::AfterTomorrow).aggregate(&samples, NOW);
        let days: Vec<(&str, i32)> = summary.daily.iter().map(|d| (d.weekday, d.mean)).collect();
        assert_eq!(days, [("Sun", 2), ("Mon", -2)]);
    }

    #[test]
    fn test_from_tomorrow_window_keeps_overlap() {
        let tomorrow = today_start() + DAY;
        let samples = [sample(tomorrow + HOUR, 4.0), sample(tomorrow + 2 * DAY, 8.0)];
        let overlapping = agg::<1, 3>(DailyWindow::FromTomorrow).daily_buckets(&samples, NOW);
        assert_eq!(overlapping.len(), 2);
        assert_eq!(overlapping[0].day_start, tomorrow);

        let disjoint = agg::<1, 3>(DailyWindow::AfterTomorrow).daily_buckets(&samples, NOW);
        assert_eq!(disjoint.len(), 1);
        assert_eq!(disjoint[0].day_start, tomorrow + 2 * DAY);
    }

    #[test]
    fn test_days_beyond_capacity_are_dropped_not_merged() {
        let first = today_start() + 2 * DAY;
        let samples: Vec<_> = (0..5)
            .flat_map(|day| [sample(first + day * DAY + HOUR, day as f32), sample(first + day * DAY + 2 * HOUR, day as f32)])
            .collect();
        let buckets = agg::<1, 2>(DailyWindow::AfterTomorrow).daily_buckets(&samples, NOW);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[1].count, 2);
        assert_eq!(buckets[1].rounded_mean(), 1);
    }

    #[test]
    fn test_panel_aggregator_uses_configured_capacities() {
        let summary = PanelAggregator::default().aggregate(&[], NOW);
        assert_eq!(summary.hourly.len(), config::HOURLY_SLOTS);
        assert!(summary.daily.is_empty());
        assert_eq!(summary.tomorrow, None);
    }

    #[test]
    fn test_out_of_range_timestamps_are_dropped() {
        let samples = [
            sample(i64::MAX, 1.0),
            sample(NOW + 3 * HOUR, 4.0),
            sample(i64::MIN, 2.0),
        ];
        let summary = agg::<2, 3>(DailyWindow::FromTomorrow).aggregate(&samples, NOW);
        assert_eq!(summary.hourly[0].label.as_str(), "13:00");
        assert_eq!(summary.hourly[0].temperature, Some(4));
        assert!(!summary.hourly[1].is_filled());
        assert!(summary.daily.is_empty());
        assert_eq!(summary.tomorrow, None);
    }
}
