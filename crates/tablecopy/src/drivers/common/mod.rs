//! Utilities shared by the built-in drivers.

pub mod tls;

pub use tls::{SslMode, TlsBuilder};
