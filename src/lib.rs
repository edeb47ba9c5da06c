pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub mod app;

#[cfg(feature = "cli")]
pub use app::App;
#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{LocalStorage, NodeRepository};
pub use config::MonitorConfig;
pub use core::registry::NodeRegistry;
pub use utils::error::{MonitorError, Result};
