//! Tidecache server.
//!
//! A twemcache-style cache daemon: the slab engine from `cache-slab`
//! served over the memcached ASCII protocol or the RESP-style protocol.
//! The storage engine and codecs never block; this crate supplies the
//! pieces around them: configuration, logging, metrics, request
//! execution, per-connection sessions, and the TCP listener.

pub mod config;
pub mod execute;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod session;

pub use config::{Config, Protocol};
pub use listener::Server;
