use std::sync::{Arc, Mutex};

use anyhow::Result;
use embedded_svc::http::server::{Connection, Request};
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use log::{info, warn};

use crate::provisioning::{
    self, PortalRequest, PortalResponse, PortalServer, ProvisioningForm, CAPTIVE_PROBE_PATHS,
    MAX_FORM_BODY,
};
use crate::settings::DeviceSettings;

struct Shared {
    form: ProvisioningForm,
    submission: Mutex<Option<DeviceSettings>>,
}

/// Provisioning form served by the ESP-IDF HTTP server. Handlers run on the
/// server task; the control thread only sees the submission slot.
#[derive(Default)]
pub struct EspPortal {
    server: Option<EspHttpServer<'static>>,
    shared: Option<Arc<Shared>>,
}

fn send<C: Connection>(req: Request<C>, response: &PortalResponse) -> Result<(), C::Error> {
    let headers = [
        ("Content-Type", response.content_type),
        ("Cache-Control", "no-store"),
    ];
    let mut resp = req.into_response(response.status, None, &headers)?;
    resp.write_all(response.body.as_bytes())
}

impl PortalServer for EspPortal {
    fn start(&mut self, form: ProvisioningForm) -> Result<()> {
        self.stop();
        let shared = Arc::new(Shared {
            form,
            submission: Mutex::new(None),
        });

        let mut server = EspHttpServer::new(&Configuration {
            stack_size: 10240,
            ..Default::default()
        })?;

        for path in std::iter::once("/").chain(CAPTIVE_PROBE_PATHS) {
            let st = shared.clone();
            server.fn_handler(path, Method::Get, move |req| {
                let uri = req.uri().to_string();
                let (response, _) = st.form.handle(&PortalRequest {
                    method: provisioning::Method::Get,
                    path: &uri,
                    body: &[],
                });
                send(req, &response)
            })?;
        }

        let st = shared.clone();
        server.fn_handler("/save", Method::Post, move |mut req| {
            let mut body = Vec::new();
            let mut buf = [0u8; 256];
            loop {
                let n = req.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
                if body.len() > MAX_FORM_BODY {
                    break;
                }
            }
            let (response, accepted) = st.form.handle(&PortalRequest {
                method: provisioning::Method::Post,
                path: "/save",
                body: &body,
            });
            if let Some(settings) = accepted {
                match st.submission.lock() {
                    Ok(mut slot) => *slot = Some(settings),
                    Err(poisoned) => *poisoned.into_inner() = Some(settings),
                }
            }
            send(req, &response)
        })?;

        info!("Portal: HTTP server listening");
        self.server = Some(server);
        self.shared = Some(shared);
        Ok(())
    }

    fn take_submission(&mut self) -> Option<DeviceSettings> {
        let shared = self.shared.as_ref()?;
        match shared.submission.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => {
                warn!("Portal: submission lock poisoned");
                poisoned.into_inner().take()
            }
        }
    }

    fn stop(&mut self) {
        if self.server.take().is_some() {
            info!("Portal: HTTP server stopped");
        }
        self.shared = None;
    }
}
