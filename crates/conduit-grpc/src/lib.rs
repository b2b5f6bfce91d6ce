//! # Conduit gRPC
//!
//! A tonic server whose lifecycle is driven by a cancellation token and which
//! can trace every request it serves, and a client channel that propagates trace
//! context on every call.

pub mod client;
pub mod component;
pub mod error;
pub mod options;
pub mod propagation;
pub mod trace;

pub use client::{TracedChannel, dial, dial_with};
pub use component::{Builder, Component};
pub use error::{ComponentError, ConfigError};
pub use options::{ServerConfig, ServerOption};
pub use trace::{TraceLayer, TracedService};
