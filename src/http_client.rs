use std::time::Duration;

use log::info;
use serde::de::DeserializeOwned;

use crate::error::AttemptError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Blocking HTTP(S) GET. Implementations enforce `timeout` per request and
/// cap the body size.
pub trait HttpTransport {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, AttemptError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &mut T {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, AttemptError> {
        (**self).get(url, timeout)
    }
}

pub trait HeapMonitor {
    fn free_heap(&self) -> usize;
}

/// GET `url` and decode the JSON body into `T`.
///
/// Succeeds only on HTTP 200, with at least `min_free_heap` bytes free at
/// decode time, and a body that matches `T`.
pub fn get_json<T, H>(
    transport: &mut dyn HttpTransport,
    heap: &H,
    url: &str,
    timeout: Duration,
    min_free_heap: usize,
) -> Result<T, AttemptError>
where
    T: DeserializeOwned,
    H: HeapMonitor + ?Sized,
{
    let response = transport.get(url, timeout)?;
    info!(
        "HTTP GET {} -> status {} ({} bytes)",
        redact(url).chars().take(80).collect::<String>(),
        response.status,
        response.body.len()
    );
    if response.status != 200 {
        return Err(AttemptError::TransportStatus(response.status));
    }

    let free = heap.free_heap();
    if free < min_free_heap {
        return Err(AttemptError::MemoryPressure {
            free,
            required: min_free_heap,
        });
    }

    serde_json::from_slice(&response.body).map_err(|e| AttemptError::PayloadDecode(e.to_string()))
}

/// Hide the API key when logging request URLs.
fn redact(url: &str) -> String {
    match url.find("appid=") {
        Some(at) => {
            let rest = &url[at + "appid=".len()..];
            let tail = rest.find('&').map(|i| &rest[i..]).unwrap_or("");
            format!("{}appid=***{}", &url[..at], tail)
        }
        None => url.to_string(),
    }
}
