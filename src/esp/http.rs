use std::time::Duration;

use embedded_svc::http::client::Client;
use embedded_svc::http::Method;
use embedded_svc::io::Read;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

use crate::config;
use crate::error::AttemptError;
use crate::http_client::{HeapMonitor, HttpResponse, HttpTransport};

/// One fresh connection per request, so a failed TLS handshake never
/// leaves state behind for the next endpoint.
#[derive(Debug, Default)]
pub struct EspHttpTransport;

impl HttpTransport for EspHttpTransport {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, AttemptError> {
        let config = Configuration {
            timeout: Some(timeout),
            use_global_ca_store: true,
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        };

        let connection = EspHttpConnection::new(&config)
            .map_err(|e| AttemptError::TransportInit(format!("connection: {}", e)))?;
        let mut client = Client::wrap(connection);

        let request = client
            .request(Method::Get, url, &[("Accept", "application/json")])
            .map_err(|e| AttemptError::TransportInit(format!("request: {:?}", e)))?;
        let mut response = request
            .submit()
            .map_err(|e| AttemptError::TransportInit(format!("submit: {:?}", e)))?;
        let status = response.status();

        let mut body: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = response
                .read(&mut buf)
                .map_err(|e| AttemptError::TransportInit(format!("read: {:?}", e)))?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
            if body.len() > config::MAX_RESPONSE_BYTES {
                return Err(AttemptError::TransportInit(format!(
                    "response larger than {} bytes",
                    config::MAX_RESPONSE_BYTES
                )));
            }
        }

        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EspHeap;

impl HeapMonitor for EspHeap {
    fn free_heap(&self) -> usize {
        unsafe { esp_idf_sys::esp_get_free_heap_size() as usize }
    }
}
