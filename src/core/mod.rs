pub mod discovery;
pub mod filter;
pub mod interfaces;
pub mod portscan;
pub mod registry;
pub mod status;
pub mod subnet;
pub mod traceroute;

pub use crate::domain::model::{DiscoveredNode, NetworkNode, NodeRecord};
pub use crate::domain::ports::{CommandRunner, Prober, Resolver, Storage};
pub use crate::utils::error::Result;
