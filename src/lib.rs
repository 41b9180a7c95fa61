//! Appgate — a multi-tenant reverse proxy and process supervisor that
//! fronts a set of interactive web-app backends, starting them on demand,
//! pairing client WebSockets with their backend counterparts, and tearing
//! everything down again once nobody's connected.

pub mod admin;
pub mod cleanup;
pub mod config;
pub mod constants;
pub mod port_allocator;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod state;
pub mod supervisor;
pub mod support;
pub mod templates;
pub mod validation;
pub mod ws_bridge;

pub use config::Config;
pub use server::{init_tracing, ServerHandle, ServerOptions};
