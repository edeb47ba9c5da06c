pub mod toml_config;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command, DiscoverCommand, NodesCommand, ScanArgs, TraceArgs, WatchArgs};
pub use toml_config::{default_data_dir, MonitorConfig, ProbeKind};
