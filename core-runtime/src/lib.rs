//! # Core Runtime
//!
//! Process-level infrastructure shared by the rest of the workspace:
//!
//! - [`logging`]: `tracing` subscriber setup with env-filter support
//! - [`settings`]: durable, typed, observable key/value preferences

pub mod error;
pub mod logging;
pub mod settings;

pub use error::{Result, RuntimeError};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use settings::{keys, SettingsStore};
