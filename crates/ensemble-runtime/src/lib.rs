//! Runtime for synthesized kinds.
//!
//! The [`controller::DynamicController`] registers and unregisters watches
//! on kinds discovered at runtime, multiplexing events into per-kind work
//! queues drained by worker pools. The [`instance::InstanceHandler`] drives
//! one instance through its execution plan, fetched from the
//! [`registry::Registry`]. [`install`] wires a built graph into the running
//! system.
//!
//! The platform itself is an injected [`platform::PlatformClient`]; an
//! in-memory implementation lives in [`platform::mem`] for tests.

pub mod config;
pub mod controller;
pub mod handler;
pub mod install;
pub mod instance;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod relay;

pub use config::Config;
pub use controller::DynamicController;
pub use handler::{ReconcileError, ReconcileHandler};
pub use instance::InstanceHandler;
pub use platform::{PlatformClient, PlatformError, WatchEvent};
pub use registry::Registry;
