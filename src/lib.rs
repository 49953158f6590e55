//! demo-service: TLS service skeleton with live certificate rotation
//!
//! - `certs` - certificate store, rotation watcher, dev certificate generation
//! - `server` - TLS listener, health endpoints, metrics, graceful shutdown
//! - `app` - supervised background workers and the "App" health probe
//! - `config` - file and environment configuration

pub mod app;
pub mod certs;
pub mod config;
pub mod fault;
pub mod server;

#[cfg(test)]
pub mod testutil;
