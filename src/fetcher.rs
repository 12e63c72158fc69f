//! Network fetches for one refresh cycle: time sync, current conditions
//! and the multi-day forecast. Each one runs through the retry engine with
//! its own endpoints, policy and heap threshold.

use std::time::Duration;

use log::info;

use crate::config;
use crate::error::FetchError;
use crate::http_client::{get_json, HeapMonitor, HttpTransport};
use crate::retry::{fetch_with_retry, CancelFlag, RetryPolicy, Sleeper};
use crate::settings::DeviceSettings;
use crate::time_sync::TimeSource;
use crate::weather::{
    current_url, forecast_url, ForecastSample, OwmCurrentRoot, OwmForecastRoot, WeatherSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub endpoints: &'static [&'static str],
    pub policy: RetryPolicy,
    /// Free heap required before a response body is decoded.
    pub min_free_heap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlans {
    pub time: FetchPlan,
    pub current: FetchPlan,
    pub forecast: FetchPlan,
}

impl Default for FetchPlans {
    fn default() -> Self {
        Self {
            time: FetchPlan {
                endpoints: &config::NTP_SERVERS,
                policy: config::NTP_POLICY,
                min_free_heap: 0,
            },
            current: FetchPlan {
                endpoints: &config::PROVIDER_BASE_URLS,
                policy: config::WEATHER_POLICY,
                min_free_heap: config::CURRENT_MIN_FREE_HEAP,
            },
            forecast: FetchPlan {
                endpoints: &config::PROVIDER_BASE_URLS,
                policy: config::WEATHER_POLICY,
                min_free_heap: config::FORECAST_MIN_FREE_HEAP,
            },
        }
    }
}

impl FetchPlans {
    /// Same endpoints and thresholds with every backoff replaced.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        for plan in [&mut self.time, &mut self.current, &mut self.forecast] {
            plan.policy.backoff = backoff;
        }
        self
    }
}

pub struct NetworkFetcher<T, H, S> {
    transport: T,
    heap: H,
    sleeper: S,
    cancel: CancelFlag,
    plans: FetchPlans,
}

impl<T, H, S> NetworkFetcher<T, H, S>
where
    T: HttpTransport,
    H: HeapMonitor,
    S: Sleeper,
{
    pub fn new(transport: T, heap: H, sleeper: S) -> Self {
        Self::with_plans(transport, heap, sleeper, FetchPlans::default())
    }

    pub fn with_plans(transport: T, heap: H, sleeper: S, plans: FetchPlans) -> Self {
        Self {
            transport,
            heap,
            sleeper,
            cancel: CancelFlag::new(),
            plans,
        }
    }

    /// Shared handle; raising it stops the remaining retries.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn sync_time<N: TimeSource + ?Sized>(&mut self, source: &mut N) -> Result<(), FetchError> {
        let plan = self.plans.time;
        info!("time: syncing against {} servers", plan.endpoints.len());
        fetch_with_retry(
            "time",
            plan.endpoints,
            &plan.policy,
            &mut self.sleeper,
            &self.cancel,
            |server, timeout| source.sync(server, timeout),
        )
    }

    pub fn fetch_current(&mut self, settings: &DeviceSettings) -> Result<WeatherSnapshot, FetchError> {
        let plan = self.plans.current;
        let Self {
            transport,
            heap,
            sleeper,
            cancel,
            ..
        } = self;
        fetch_with_retry("current", plan.endpoints, &plan.policy, sleeper, cancel, |base, timeout| {
            let url = current_url(base, settings)?;
            let root: OwmCurrentRoot = get_json(&mut *transport, &*heap, &url, timeout, plan.min_free_heap)?;
            root.into_snapshot()
        })
    }

    pub fn fetch_forecast(&mut self, settings: &DeviceSettings) -> Result<Vec<ForecastSample>, FetchError> {
        let plan = self.plans.forecast;
        let Self {
            transport,
            heap,
            sleeper,
            cancel,
            ..
        } = self;
        fetch_with_retry("forecast", plan.endpoints, &plan.policy, sleeper, cancel, |base, timeout| {
            let url = forecast_url(base, settings)?;
            let root: OwmForecastRoot = get_json(&mut *transport, &*heap, &url, timeout, plan.min_free_heap)?;
            root.into_samples()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttemptError;
    use crate::http_client::HttpResponse;
    use crate::retry::tests::RecordingSleeper;
    use std::collections::VecDeque;

    const CURRENT: &str = r#"{"weather":[{"description":"clear sky"}],"main":{"temp":21.6,"feels_like":20.0,"pressure":1009},"wind":{"speed":3.0},"name":"Tashkent"}"#;
    const TLS_ONLY: &[&str] = &["https://api.openweathermap.org"];
    const FORECAST: &str = r#"{"list":[{"dt":100,"main":{"temp":1.0}},{"dt":200,"main":{"temp":2.0}}]}"#;

    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<Result<HttpResponse, AttemptError>>,
        urls: Vec<String>,
    }

    impl ScriptedTransport {
        fn reply(mut self, status: u16, body: &str) -> Self {
            self.replies.push_back(Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }));
            self
        }

        fn fail(mut self) -> Self {
            self.replies
                .push_back(Err(AttemptError::TransportInit("tls handshake".into())));
            self
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn get(&mut self, url: &str, _timeout: Duration) -> Result<HttpResponse, AttemptError> {
            self.urls.push(url.to_string());
            self.replies
                .pop_front()
                .unwrap_or(Err(AttemptError::TransportInit("no reply scripted".into())))
        }
    }

    struct Heap(usize);

    impl HeapMonitor for Heap {
        fn free_heap(&self) -> usize {
            self.0
        }
    }

    struct FlakyClock {
        failures_left: u32,
        servers: Vec<String>,
    }

    impl TimeSource for FlakyClock {
        fn sync(&mut self, server: &str, _timeout: Duration) -> Result<(), AttemptError> {
            self.servers.push(server.to_string());
            if self.failures_left == 0 {
                Ok(())
            } else {
                self.failures_left -= 1;
                Err(AttemptError::TransportInit("no reply".into()))
            }
        }
    }

    fn fetcher(transport: ScriptedTransport, free: usize) -> NetworkFetcher<ScriptedTransport, Heap, RecordingSleeper> {
        NetworkFetcher::new(transport, Heap(free), RecordingSleeper::default())
    }

    #[test]
    fn test_current_falls_back_to_plain_http() {
        let mut f = fetcher(ScriptedTransport::default().fail().reply(200, CURRENT), 100_000);
        let snapshot = f.fetch_current(&DeviceSettings::defaults()).unwrap();
        assert_eq!(snapshot.city, "Tashkent");
        assert_eq!(snapshot.pressure_hpa, Some(1009));
        assert!(f.transport.urls[0].starts_with("https://"));
        assert!(f.transport.urls[1].starts_with("http://"));
        assert!(f.sleeper.sleeps.is_empty());
    }

    #[test]
    fn test_forecast_respects_heap_threshold() {
        // Enough for current conditions, not for the forecast.
        let transport = ScriptedTransport::default().reply(200, CURRENT).reply(200, FORECAST);
        let mut f = fetcher(transport, 16 * 1024);
        f.plans = FetchPlans {
            forecast: FetchPlan {
                policy: RetryPolicy::new(1, Duration::from_secs(1), Duration::ZERO),
                endpoints: TLS_ONLY,
                ..f.plans.forecast
            },
            ..f.plans
        };
        assert!(f.fetch_current(&DeviceSettings::defaults()).is_ok());
        let err = f.fetch_forecast(&DeviceSettings::defaults()).unwrap_err();
        assert_eq!(
            err.last_attempt_error(),
            Some(&AttemptError::MemoryPressure {
                free: 16 * 1024,
                required: config::FORECAST_MIN_FREE_HEAP
            })
        );
    }

    #[test]
    fn test_forecast_request_asks_for_forty_samples() {
        let mut f = fetcher(ScriptedTransport::default().reply(200, FORECAST), 100_000);
        let samples = f.fetch_forecast(&DeviceSettings::defaults()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(f.transport.urls[0].contains("cnt=40"));
    }

    #[test]
    fn test_exhausted_weather_fetch_reports_all_attempts() {
        let mut f = fetcher(ScriptedTransport::default(), 100_000);
        let err = f.fetch_current(&DeviceSettings::defaults()).unwrap_err();
        assert_eq!(err.attempts(), 10);
        assert_eq!(f.sleeper.sleeps, vec![config::WEATHER_POLICY.backoff; 4]);
    }

    #[test]
    fn test_time_sync_walks_server_list() {
        let mut f = fetcher(ScriptedTransport::default(), 0);
        let mut clock = FlakyClock {
            failures_left: 5,
            servers: Vec::new(),
        };
        f.sync_time(&mut clock).unwrap();
        assert_eq!(clock.servers.len(), 6);
        assert_eq!(clock.servers[4], config::NTP_SERVERS[0]);
        assert_eq!(clock.servers[5], config::NTP_SERVERS[1]);
        assert_eq!(f.sleeper.sleeps, vec![config::NTP_POLICY.backoff]);
    }

    #[test]
    fn test_cancelled_fetch_stops_immediately() {
        let mut f = fetcher(ScriptedTransport::default().reply(200, CURRENT), 100_000);
        f.cancel_flag().cancel();
        let err = f.fetch_current(&DeviceSettings::defaults()).unwrap_err();
        assert!(matches!(err, FetchError::Cancelled { attempts: 0, .. }));
        assert!(f.transport.urls.is_empty());
    }
}
