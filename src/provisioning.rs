//! Provisioning portal: the HTML form served from the setup access point
//! and validation of what comes back.
//!
//! The request handling is transport-agnostic. `PortalServer`
//! implementations route raw requests into [`ProvisioningForm::handle`] and
//! hand accepted settings back to the control thread.

use std::borrow::Cow;
use std::fmt::Write as _;

use anyhow::Result;
use log::{info, warn};
use url::form_urlencoded;

use crate::config;
use crate::error::SubmissionError;
use crate::settings::{
    DeviceSettings, API_KEY_MAX, LOCATION_MAX, NETWORK_NAME_MAX, NETWORK_SECRET_MAX,
};

/// Larger bodies are rejected without parsing.
pub const MAX_FORM_BODY: usize = 1024;

/// Connectivity-check URLs phones and laptops probe after joining an AP.
/// Answering them with the form makes the OS pop the setup page up.
pub const CAPTIVE_PROBE_PATHS: [&str; 6] = [
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl PortalResponse {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            body: "Not found".into(),
        }
    }
}

/// HTTP side of provisioning. Serves a [`ProvisioningForm`] until the
/// control thread collects a valid submission.
pub trait PortalServer {
    fn start(&mut self, form: ProvisioningForm) -> Result<()>;
    /// Non-blocking: the accepted submission, if one arrived since the last call.
    fn take_submission(&mut self) -> Option<DeviceSettings>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningForm {
    current: DeviceSettings,
}

impl ProvisioningForm {
    pub fn new(current: &DeviceSettings) -> Self {
        Self {
            current: current.clone(),
        }
    }

    /// Route one request. The second element is set only for an accepted
    /// `POST /save`.
    pub fn handle(&self, req: &PortalRequest<'_>) -> (PortalResponse, Option<DeviceSettings>) {
        let path = req.path.split('?').next().unwrap_or("");
        match (req.method, path) {
            (Method::Get, "/") => (PortalResponse::html(200, self.render_form(None)), None),
            (Method::Get, p) if CAPTIVE_PROBE_PATHS.contains(&p) => {
                (PortalResponse::html(200, self.render_form(None)), None)
            }
            (Method::Post, "/save") => match self.parse_submission(req.body) {
                Ok(settings) => {
                    info!(
                        "portal: accepted network_name={:?} location={:?}",
                        settings.network_name, settings.location_query
                    );
                    (PortalResponse::html(200, confirmation_page()), Some(settings))
                }
                Err(e) => {
                    warn!("portal: rejected submission: {}", e);
                    (PortalResponse::html(400, self.render_form(Some(&e))), None)
                }
            },
            _ => (PortalResponse::not_found(), None),
        }
    }

    /// The setup page. Only the network name and location are pre-filled;
    /// secrets never leave the device, and blank secret inputs keep the
    /// stored values.
    pub fn render_form(&self, error: Option<&SubmissionError>) -> String {
        let mut page = String::with_capacity(1536);
        page.push_str(PAGE_HEAD);
        page.push_str("<h1>Weather panel setup</h1>");
        if let Some(e) = error {
            write!(page, "<p class=\"err\">{}</p>", escape_html(&e.to_string())).ok();
        }
        page.push_str("<form method=\"post\" action=\"/save\">");
        input(&mut page, "WiFi network", "ssid", "text", &self.current.network_name, NETWORK_NAME_MAX);
        input(&mut page, "WiFi password (empty keeps the saved one)", "password", "password", "", NETWORK_SECRET_MAX);
        page.push_str("<label><input type=\"checkbox\" name=\"open\" value=\"1\">Open network, no password</label>");
        input(&mut page, "OpenWeatherMap API key (empty keeps the saved one)", "apikey", "text", "", API_KEY_MAX);
        input(&mut page, "City, e.g. Moscow,ru", "city", "text", &self.current.location_query, LOCATION_MAX);
        page.push_str("<button type=\"submit\">Save</button></form></body></html>");
        page
    }

    /// Values are stored exactly as typed. A blank password or API key keeps
    /// the current one; the `open` checkbox clears the password.
    pub fn parse_submission(&self, body: &[u8]) -> Result<DeviceSettings, SubmissionError> {
        if body.len() > MAX_FORM_BODY {
            return Err(SubmissionError::Malformed);
        }

        let mut ssid: Option<Cow<'_, str>> = None;
        let mut password: Option<Cow<'_, str>> = None;
        let mut apikey: Option<Cow<'_, str>> = None;
        let mut city: Option<Cow<'_, str>> = None;
        let mut open_network = false;
        for (key, value) in form_urlencoded::parse(body) {
            match key.as_ref() {
                "ssid" => ssid = Some(value),
                "password" => password = Some(value),
                "apikey" => apikey = Some(value),
                "city" => city = Some(value),
                "open" => open_network = !value.is_empty(),
                _ => {}
            }
        }

        let ssid = required("ssid", ssid, NETWORK_NAME_MAX)?;
        let city = required("city", city, LOCATION_MAX)?;
        let password = optional("password", password, NETWORK_SECRET_MAX)?;
        let apikey = optional("apikey", apikey, API_KEY_MAX)?;

        let network_secret = match (open_network, password.is_empty()) {
            (true, _) => String::new(),
            (false, true) => self.current.network_secret.clone(),
            (false, false) => password,
        };
        let provider_api_key = if apikey.is_empty() {
            self.current.provider_api_key.clone()
        } else {
            apikey
        };

        Ok(DeviceSettings {
            network_name: ssid,
            network_secret,
            provider_api_key,
            location_query: city,
        })
    }
}

fn required(field: &'static str, value: Option<Cow<'_, str>>, max: usize) -> Result<String, SubmissionError> {
    let value = optional(field, value, max)?;
    if value.trim().is_empty() {
        return Err(SubmissionError::MissingField(field));
    }
    Ok(value)
}

fn optional(field: &'static str, value: Option<Cow<'_, str>>, max: usize) -> Result<String, SubmissionError> {
    let value = value.as_deref().unwrap_or("");
    if value.len() > max {
        return Err(SubmissionError::TooLong { field, max });
    }
    Ok(value.to_string())
}

fn input(page: &mut String, label: &str, name: &str, kind: &str, value: &str, max: usize) {
    write!(
        page,
        "<label>{}<input type=\"{}\" name=\"{}\" value=\"{}\" maxlength=\"{}\"></label>",
        label,
        kind,
        name,
        escape_html(value),
        max
    )
    .ok();
}

fn confirmation_page() -> String {
    format!(
        "{}<h1>Saved</h1><p>The panel is connecting now. You can close this page; \
         the setup network <b>{}</b> will disappear.</p></body></html>",
        PAGE_HEAD,
        config::PROVISIONING_AP_SSID
    )
}

pub fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

const PAGE_HEAD: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
<title>Weather panel</title><style>body{font-family:sans-serif;margin:1em}\
label{display:block;margin:.6em 0}input{display:block;width:100%}.err{color:#c00}</style>\
</head><body>";
