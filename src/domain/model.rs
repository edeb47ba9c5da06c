use crate::utils::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Computer,
    UnmanagedSwitch,
    ManagedSwitch,
    Laptop,
    Server,
    Router,
    Gateway,
    Phone,
    Tv,
    SecurityCamera,
    VirtualMachine,
    WirelessAccessPoint,
}

impl DeviceType {
    pub const ALL: [DeviceType; 12] = [
        DeviceType::Computer,
        DeviceType::UnmanagedSwitch,
        DeviceType::ManagedSwitch,
        DeviceType::Laptop,
        DeviceType::Server,
        DeviceType::Router,
        DeviceType::Gateway,
        DeviceType::Phone,
        DeviceType::Tv,
        DeviceType::SecurityCamera,
        DeviceType::VirtualMachine,
        DeviceType::WirelessAccessPoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Computer => "COMPUTER",
            DeviceType::UnmanagedSwitch => "UNMANAGED_SWITCH",
            DeviceType::ManagedSwitch => "MANAGED_SWITCH",
            DeviceType::Laptop => "LAPTOP",
            DeviceType::Server => "SERVER",
            DeviceType::Router => "ROUTER",
            DeviceType::Gateway => "GATEWAY",
            DeviceType::Phone => "PHONE",
            DeviceType::Tv => "TV",
            DeviceType::SecurityCamera => "SECURITY_CAMERA",
            DeviceType::VirtualMachine => "VIRTUAL_MACHINE",
            DeviceType::WirelessAccessPoint => "WIRELESS_ACCESS_POINT",
        }
    }

    pub fn is_switch(&self) -> bool {
        matches!(self, DeviceType::UnmanagedSwitch | DeviceType::ManagedSwitch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkLocation {
    #[default]
    Local,
    Public,
    RemotePrivate,
}

impl NetworkLocation {
    pub const ALL: [NetworkLocation; 3] = [
        NetworkLocation::Local,
        NetworkLocation::Public,
        NetworkLocation::RemotePrivate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkLocation::Local => "LOCAL",
            NetworkLocation::Public => "PUBLIC",
            NetworkLocation::RemotePrivate => "REMOTE_PRIVATE",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NetworkLocation::Local => "Local Network",
            NetworkLocation::Public => "Public Network",
            NetworkLocation::RemotePrivate => "Remote Private Network",
        }
    }

    pub fn is_directly_accessible(&self) -> bool {
        *self != NetworkLocation::RemotePrivate
    }

    /// 只有本地網路保證能 ping 到
    pub fn is_pingable(&self) -> bool {
        *self == NetworkLocation::Local
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    #[default]
    Ethernet,
    Wireless,
    Virtual,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 3] = [
        ConnectionType::Ethernet,
        ConnectionType::Wireless,
        ConnectionType::Virtual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Ethernet => "ETHERNET",
            ConnectionType::Wireless => "WIRELESS",
            ConnectionType::Virtual => "VIRTUAL",
        }
    }
}

fn normalize_variant(s: &str) -> String {
    s.trim().replace('-', "_").to_ascii_uppercase()
}

fn parse_variant<T: Copy>(
    field: &str,
    input: &str,
    all: &[T],
    name: impl Fn(&T) -> &'static str,
) -> Result<T, MonitorError> {
    let wanted = normalize_variant(input);
    all.iter()
        .copied()
        .find(|v| name(v) == wanted)
        .ok_or_else(|| MonitorError::InvalidConfigValueError {
            field: field.to_string(),
            value: input.to_string(),
            reason: format!(
                "Expected one of: {}",
                all.iter().map(|v| name(v)).collect::<Vec<_>>().join(", ")
            ),
        })
}

impl FromStr for DeviceType {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("device_type", s, &DeviceType::ALL, DeviceType::as_str)
    }
}

impl FromStr for NetworkLocation {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("network_location", s, &NetworkLocation::ALL, NetworkLocation::as_str)
    }
}

impl FromStr for ConnectionType {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant("connection_type", s, &ConnectionType::ALL, ConnectionType::as_str)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Display for NetworkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 拓撲圖上的一個節點
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkNode {
    pub node_id: u64,
    pub ip_or_hostname: String,
    pub display_name: String,
    pub device_type: DeviceType,
    pub network_location: NetworkLocation,
    pub main_node: bool,
    pub connection_type: ConnectionType,
    pub route_switch_id: Option<u64>,
    pub route_switch: String,
    pub host_node_id: Option<u64>,
    pub host_node: String,
    pub mac_address: Option<String>,
    pub resolved_ip: Option<Ipv4Addr>,
    pub connected: bool,
}

impl NetworkNode {
    pub fn new(
        node_id: u64,
        ip_or_hostname: impl Into<String>,
        display_name: impl Into<String>,
        device_type: DeviceType,
        network_location: NetworkLocation,
    ) -> Self {
        let ip_or_hostname = ip_or_hostname.into();
        // IPv4 字面值不需要 DNS 解析
        let resolved_ip = ip_or_hostname.parse::<Ipv4Addr>().ok();
        Self {
            node_id,
            ip_or_hostname,
            display_name: display_name.into(),
            device_type,
            network_location,
            main_node: false,
            connection_type: ConnectionType::default(),
            route_switch_id: None,
            route_switch: String::new(),
            host_node_id: None,
            host_node: String::new(),
            mac_address: None,
            resolved_ip,
            connected: false,
        }
    }

    pub fn is_ip_literal(&self) -> bool {
        self.ip_or_hostname.parse::<Ipv4Addr>().is_ok()
    }

    /// 優先使用解析後的 IP
    pub fn effective_address(&self) -> String {
        self.resolved_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| self.ip_or_hostname.clone())
    }

    pub fn effective_ipv4(&self) -> Option<Ipv4Addr> {
        self.resolved_ip
            .or_else(|| self.ip_or_hostname.parse::<Ipv4Addr>().ok())
    }
}

/// 新增節點時的輸入
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub ip_or_hostname: String,
    pub display_name: String,
    pub device_type: DeviceType,
    pub network_location: NetworkLocation,
    pub connection_type: ConnectionType,
    pub route_switch: Option<String>,
    pub host_node: Option<String>,
    pub mac_address: Option<String>,
}

impl NodeDraft {
    pub fn new(
        ip_or_hostname: impl Into<String>,
        display_name: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            ip_or_hostname: ip_or_hostname.into(),
            display_name: display_name.into(),
            device_type,
            network_location: NetworkLocation::Local,
            connection_type: ConnectionType::Ethernet,
            route_switch: None,
            host_node: None,
            mac_address: None,
        }
    }
}

/// 更新節點時的輸入，None 代表不變
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub ip_or_hostname: Option<String>,
    pub display_name: Option<String>,
    pub device_type: Option<DeviceType>,
    pub network_location: Option<NetworkLocation>,
    pub connection_type: Option<ConnectionType>,
    /// Some("") 代表清除
    pub route_switch: Option<String>,
    pub host_node: Option<String>,
    pub mac_address: Option<String>,
}

/// nodes.json 中的一筆記錄，欄位名稱與舊版存檔相容 (camelCase，null 欄位省略)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
    pub ip_or_hostname: String,
    pub display_name: String,
    pub device_type: DeviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_location: Option<NetworkLocation>,
    #[serde(default)]
    pub main_node: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<ConnectionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_switch_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_switch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_node_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

impl From<&NetworkNode> for NodeRecord {
    fn from(node: &NetworkNode) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            node_id: Some(node.node_id),
            ip_or_hostname: node.ip_or_hostname.clone(),
            display_name: node.display_name.clone(),
            device_type: node.device_type,
            network_location: Some(node.network_location),
            main_node: node.main_node,
            connection_type: Some(node.connection_type),
            route_switch_id: node.route_switch_id,
            route_switch: non_empty(&node.route_switch),
            host_node_id: node.host_node_id,
            host_node: non_empty(&node.host_node),
            mac_address: node.mac_address.clone(),
        }
    }
}

impl NodeRecord {
    pub fn into_node(self, node_id: u64) -> NetworkNode {
        let mut node = NetworkNode::new(
            node_id,
            self.ip_or_hostname,
            self.display_name,
            self.device_type,
            self.network_location.unwrap_or_default(),
        );
        node.main_node = self.main_node;
        node.connection_type = self.connection_type.unwrap_or_default();
        node.route_switch_id = self.route_switch_id;
        node.route_switch = self.route_switch.unwrap_or_default();
        node.host_node_id = self.host_node_id;
        node.host_node = self.host_node.unwrap_or_default();
        node.mac_address = self.mac_address;
        node
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredNode {
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    pub interface: String,
}
