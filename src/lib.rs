//! Firmware core for a tri-colour e-paper weather panel.
//!
//! Everything above `esp` is platform-independent and talks to hardware
//! through small capability traits, so the whole refresh cycle runs under
//! `cargo test` on the host.

pub mod app;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod forecast;
pub mod framebuffer;
pub mod http_client;
pub mod layout;
pub mod provisioning;
pub mod render;
pub mod retry;
pub mod settings;
pub mod time_sync;
pub mod weather;
pub mod wifi;

#[cfg(target_os = "espidf")]
pub mod esp;
