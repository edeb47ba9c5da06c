use crate::adapters::ExportFormat;
use crate::config::MonitorConfig;
use crate::core::filter::{NodeFilter, StatusFilter};
use crate::core::portscan::parse_ports;
use crate::core::subnet::Ipv4Subnet;
use crate::domain::model::{ConnectionType, DeviceType, NetworkLocation, NodeDraft, NodeUpdate};
use crate::utils::error::{MonitorError, Result};
use crate::utils::logger::LogFormat;
use crate::utils::validation::{validate_path, validate_positive_number, validate_range, Validate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "node-monitor")]
#[command(about = "Inventory, discover and monitor the nodes of a local network")]
#[command(version)]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding nodes.json (default ~/NetworkMonitorApp)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// compact or json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[arg(long, global = true, help = "Log process CPU and memory usage")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Manage the node inventory
    Nodes {
        #[command(subcommand)]
        action: NodesCommand,
    },
    /// Find devices on the local network
    Discover {
        #[command(subcommand)]
        action: DiscoverCommand,
    },
    /// TCP connect scan of a host
    Scan(ScanArgs),
    /// Trace the route to a host
    Trace(TraceArgs),
    /// Poll the status of every link until interrupted
    Watch(WatchArgs),
    /// Show local interfaces and the default gateway
    HostInfo,
    /// Compute the network address of ip/prefix
    Subnet { ip: String, prefix: u8 },
}

#[derive(Debug, Clone, Subcommand)]
pub enum NodesCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    Add(AddArgs),
    Update(UpdateArgs),
    /// Remove a node by id or display name
    Remove { node: String },
    /// Show the path from a node to the gateway
    Route { node: String },
    Links,
    Subnets,
    Filter(FilterArgs),
    /// Write the inventory as CSV or JSON
    Export {
        output: String,
        #[arg(long)]
        format: Option<ExportFormat>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct AddArgs {
    /// IPv4 address or hostname
    pub address: String,
    pub name: String,
    #[arg(long = "type", default_value = "computer")]
    pub device_type: DeviceType,
    #[arg(long, default_value = "local")]
    pub location: NetworkLocation,
    #[arg(long, default_value = "ethernet")]
    pub connection: ConnectionType,
    /// Display name of the switch this node hangs off
    #[arg(long)]
    pub route_switch: Option<String>,
    /// Display name of the machine hosting this VM
    #[arg(long)]
    pub host_node: Option<String>,
    #[arg(long)]
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct UpdateArgs {
    /// Node id or display name
    pub node: String,
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long = "type")]
    pub device_type: Option<DeviceType>,
    #[arg(long)]
    pub location: Option<NetworkLocation>,
    #[arg(long)]
    pub connection: Option<ConnectionType>,
    /// Empty string clears the route
    #[arg(long)]
    pub route_switch: Option<String>,
    /// Empty string clears the host
    #[arg(long)]
    pub host_node: Option<String>,
    #[arg(long)]
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    #[arg(long)]
    pub subnet: Option<Ipv4Subnet>,
    #[arg(long = "type")]
    pub device_type: Option<DeviceType>,
    #[arg(long)]
    pub connection: Option<ConnectionType>,
    /// connected or disconnected
    #[arg(long)]
    pub status: Option<StatusFilter>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum DiscoverCommand {
    /// Read the ARP cache
    Arp {
        /// Add discovered devices to the inventory
        #[arg(long)]
        add: bool,
    },
    /// Ping every host of a subnet
    Sweep {
        /// Defaults to the primary interface's subnet
        #[arg(long)]
        subnet: Option<Ipv4Subnet>,
        /// Write results as CSV or JSON
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        add: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    pub target: String,
    /// e.g. "22,80,443" or "1-1024"
    #[arg(long)]
    pub ports: Option<String>,
    #[arg(long)]
    pub banner: bool,
}

#[derive(Debug, Clone, Args)]
pub struct TraceArgs {
    pub target: String,
    #[arg(long)]
    pub max_hops: Option<u8>,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Stop after this many rounds
    #[arg(long)]
    pub rounds: Option<u64>,
    /// Print each round as a JSON line
    #[arg(long)]
    pub json: bool,
    /// Seconds between rounds
    #[arg(long)]
    pub interval: Option<u64>,
}

impl From<AddArgs> for NodeDraft {
    fn from(args: AddArgs) -> Self {
        let mut draft = NodeDraft::new(args.address, args.name, args.device_type);
        draft.network_location = args.location;
        draft.connection_type = args.connection;
        draft.route_switch = args.route_switch;
        draft.host_node = args.host_node;
        draft.mac_address = args.mac;
        draft
    }
}

impl From<UpdateArgs> for NodeUpdate {
    fn from(args: UpdateArgs) -> Self {
        NodeUpdate {
            ip_or_hostname: args.address,
            display_name: args.name,
            device_type: args.device_type,
            network_location: args.location,
            connection_type: args.connection,
            route_switch: args.route_switch,
            host_node: args.host_node,
            mac_address: args.mac,
        }
    }
}

impl From<FilterArgs> for NodeFilter {
    fn from(args: FilterArgs) -> Self {
        NodeFilter {
            subnet: args.subnet,
            device_type: args.device_type,
            connection_type: args.connection,
            status: args.status,
        }
    }
}

impl CliConfig {
    /// 命令列參數覆蓋設定檔
    pub fn apply_overrides(&self, config: &mut MonitorConfig) {
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = Some(dir.to_string_lossy().into_owned());
        }
        if let Some(format) = self.log_format {
            config.logging.format = Some(
                match format {
                    LogFormat::Compact => "compact",
                    LogFormat::Json => "json",
                }
                .to_string(),
            );
        }
        if self.monitor {
            config.logging.monitor_resources = Some(true);
        }
        match &self.command {
            Command::Trace(args) => {
                if let Some(hops) = args.max_hops {
                    config.traceroute.max_hops = Some(hops);
                }
            }
            Command::Watch(args) => {
                if let Some(interval) = args.interval {
                    config.monitor.interval_seconds = Some(interval);
                }
            }
            _ => {}
        }
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.data_dir {
            validate_path("data_dir", &dir.to_string_lossy())?;
        }

        match &self.command {
            Command::Scan(args) => {
                if let Some(ports) = &args.ports {
                    if parse_ports(ports).is_empty() {
                        return Err(MonitorError::InvalidConfigValueError {
                            field: "ports".to_string(),
                            value: ports.clone(),
                            reason: "No valid ports in list".to_string(),
                        });
                    }
                }
            }
            Command::Trace(args) => {
                if let Some(hops) = args.max_hops {
                    validate_range("max_hops", hops, 1, 64)?;
                }
            }
            Command::Watch(args) => {
                if let Some(rounds) = args.rounds {
                    validate_positive_number("rounds", rounds, 1)?;
                }
                if let Some(interval) = args.interval {
                    validate_positive_number("interval", interval, 1)?;
                }
            }
            Command::Subnet { prefix, .. } => {
                validate_range("prefix", *prefix, 0, 32)?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nodes_add() {
        let cli = CliConfig::parse_from([
            "node-monitor",
            "nodes",
            "add",
            "192.168.1.50",
            "Office Printer",
            "--type",
            "laptop",
            "--route-switch",
            "Core Switch",
        ]);
        assert!(cli.validate().is_ok());

        let Command::Nodes {
            action: NodesCommand::Add(args),
        } = cli.command
        else {
            panic!("expected nodes add");
        };
        let draft = NodeDraft::from(args);
        assert_eq!(draft.device_type, DeviceType::Laptop);
        assert_eq!(draft.network_location, NetworkLocation::Local);
        assert_eq!(draft.route_switch.as_deref(), Some("Core Switch"));
    }

    #[test]
    fn test_global_flags_override_config() {
        let cli = CliConfig::parse_from([
            "node-monitor",
            "trace",
            "8.8.8.8",
            "--max-hops",
            "30",
            "--data-dir",
            "/tmp/nm",
            "--log-format",
            "json",
            "--monitor",
        ]);
        let mut config = MonitorConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.data_dir(), PathBuf::from("/tmp/nm"));
        assert_eq!(config.traceroute_options().max_hops, 30);
        assert_eq!(config.log_format().unwrap(), LogFormat::Json);
        assert!(config.monitor_resources());
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let cli = CliConfig::parse_from(["node-monitor", "scan", "10.0.0.1", "--ports", "x-y"]);
        assert!(cli.validate().is_err());

        let cli = CliConfig::parse_from(["node-monitor", "subnet", "10.0.0.1", "33"]);
        assert!(cli.validate().is_err());

        assert!(CliConfig::try_parse_from(["node-monitor", "nodes", "filter", "--type", "toaster"])
            .is_err());
    }

    #[test]
    fn test_filter_args() {
        let cli = CliConfig::parse_from([
            "node-monitor",
            "nodes",
            "filter",
            "--subnet",
            "192.168.1.0/24",
            "--status",
            "down",
        ]);
        let Command::Nodes {
            action: NodesCommand::Filter(args),
        } = cli.command
        else {
            panic!("expected nodes filter");
        };
        let filter = NodeFilter::from(args);
        assert_eq!(filter.status, Some(StatusFilter::Disconnected));
        assert!(filter.subnet.is_some());
    }
}
