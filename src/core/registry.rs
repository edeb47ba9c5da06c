use crate::core::subnet::{slash24_of, Ipv4Subnet};
use crate::domain::model::{
    ConnectionType, DeviceType, DiscoveredNode, NetworkLocation, NetworkNode, NodeDraft,
    NodeRecord, NodeUpdate,
};
use crate::domain::ports::Resolver;
use crate::utils::error::{MonitorError, Result};
use crate::utils::validation::{validate_host, validate_non_empty_string};
use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;

pub const HOST_NODE_NAME: &str = "Host";
pub const GATEWAY_NODE_NAME: &str = "Gateway";
pub const FALLBACK_GATEWAY: &str = "192.168.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Uplink,
    UnmanagedSwitch,
    VirtualHost,
    MainPeer,
}

/// 上游 -> 下游，監控時探測的是 `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    pub from: u64,
    pub to: u64,
    pub kind: LinkKind,
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<NetworkNode>,
    next_id: u64,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            next_id: 1,
        }
    }

    /// 首次啟動：Host 與 Gateway 兩個主節點
    pub fn with_default_main_nodes(gateway: Option<String>) -> Self {
        let mut registry = Self::new();

        let host_id = 1;
        let mut host = NetworkNode::new(
            host_id,
            "127.0.0.1",
            HOST_NODE_NAME,
            DeviceType::Computer,
            NetworkLocation::Local,
        );
        host.main_node = true;
        registry.nodes.push(host);

        let gateway = gateway.unwrap_or_else(|| FALLBACK_GATEWAY.to_string());
        let gateway_id = 2;
        let mut gateway_node = NetworkNode::new(
            gateway_id,
            gateway,
            GATEWAY_NODE_NAME,
            DeviceType::Gateway,
            NetworkLocation::Public,
        );
        gateway_node.main_node = true;
        registry.nodes.push(gateway_node);
        registry.next_id = 3;

        registry
    }

    pub fn from_records(records: Vec<NodeRecord>) -> Result<Self> {
        let mut registry = Self::new();
        let mut seen = HashSet::new();

        // 先保留存檔中的 id，讓計數器從最大值之後開始；u64::MAX 之後沒有空間，重新配發
        let max_id = records
            .iter()
            .filter_map(|r| r.node_id)
            .filter(|id| *id != u64::MAX)
            .max()
            .unwrap_or(0);
        registry.next_id = max_id + 1;

        for record in records {
            let id = match record.node_id {
                Some(u64::MAX) => {
                    let fresh = registry.allocate_id()?;
                    tracing::warn!(
                        "⚠️ Node id {} for '{}' is out of range, reassigned to {}",
                        u64::MAX,
                        record.display_name,
                        fresh
                    );
                    seen.insert(fresh);
                    fresh
                }
                Some(id) if seen.insert(id) => id,
                Some(id) => {
                    let fresh = registry.allocate_id()?;
                    tracing::warn!(
                        "⚠️ Duplicate node id {} for '{}', reassigned to {}",
                        id,
                        record.display_name,
                        fresh
                    );
                    seen.insert(fresh);
                    fresh
                }
                None => {
                    let fresh = registry.allocate_id()?;
                    seen.insert(fresh);
                    fresh
                }
            };
            registry.nodes.push(record.into_node(id));
        }

        registry.clear_dangling_references();
        Ok(registry)
    }

    pub fn to_records(&self) -> Vec<NodeRecord> {
        self.nodes.iter().map(NodeRecord::from).collect()
    }

    fn allocate_id(&mut self) -> Result<u64> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or_else(|| MonitorError::NodeRejected {
            message: format!("node id {} leaves no room for further nodes", id),
        })?;
        Ok(id)
    }

    fn clear_dangling_references(&mut self) {
        let ids: HashSet<u64> = self.nodes.iter().map(|n| n.node_id).collect();
        for node in &mut self.nodes {
            if let Some(id) = node.route_switch_id {
                if !ids.contains(&id) || id == node.node_id {
                    tracing::warn!(
                        "⚠️ '{}' routes through missing node {}, route cleared",
                        node.display_name,
                        id
                    );
                    node.route_switch_id = None;
                    node.route_switch.clear();
                }
            }
            if let Some(id) = node.host_node_id {
                if !ids.contains(&id) || id == node.node_id {
                    tracing::warn!(
                        "⚠️ '{}' references missing host node {}, host cleared",
                        node.display_name,
                        id
                    );
                    node.host_node_id = None;
                    node.host_node.clear();
                }
            }
        }
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&NetworkNode> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut NetworkNode> {
        self.nodes.iter_mut().find(|n| n.node_id == id)
    }

    pub fn require(&self, id: u64) -> Result<&NetworkNode> {
        self.get(id).ok_or_else(|| MonitorError::NodeNotFound {
            reference: format!("id {}", id),
        })
    }

    pub fn find_by_display_name(&self, name: &str) -> Option<&NetworkNode> {
        self.nodes.iter().find(|n| n.display_name == name)
    }

    pub fn main_node_by_display_name(&self, name: &str) -> Option<&NetworkNode> {
        self.nodes
            .iter()
            .find(|n| n.main_node && n.display_name.eq_ignore_ascii_case(name))
    }

    pub fn main_node_by_device_type(&self, device_type: DeviceType) -> Option<&NetworkNode> {
        self.nodes
            .iter()
            .find(|n| n.main_node && n.device_type == device_type)
    }

    pub fn any_main_node(&self) -> Option<&NetworkNode> {
        self.nodes.iter().find(|n| n.main_node)
    }

    pub fn first_node_in(&self, location: NetworkLocation) -> Option<&NetworkNode> {
        self.nodes.iter().find(|n| n.network_location == location)
    }

    /// 依 id 或顯示名稱找節點 (CLI 參數用)
    pub fn lookup(&self, reference: &str) -> Result<&NetworkNode> {
        let by_id = reference
            .parse::<u64>()
            .ok()
            .and_then(|id| self.get(id));
        by_id
            .or_else(|| self.find_by_display_name(reference))
            .ok_or_else(|| MonitorError::NodeNotFound {
                reference: reference.to_string(),
            })
    }

    fn name_taken(&self, name: &str, except: Option<u64>) -> bool {
        self.nodes
            .iter()
            .any(|n| Some(n.node_id) != except && n.display_name.eq_ignore_ascii_case(name))
    }

    fn resolve_reference(&self, field: &str, name: &str) -> Result<u64> {
        self.find_by_display_name(name)
            .map(|n| n.node_id)
            .ok_or_else(|| MonitorError::NodeNotFound {
                reference: format!("{} '{}'", field, name),
            })
    }

    pub fn add(&mut self, draft: NodeDraft) -> Result<u64> {
        validate_host("ip_or_hostname", &draft.ip_or_hostname)?;
        validate_non_empty_string("display_name", &draft.display_name)?;

        if self.name_taken(&draft.display_name, None) {
            return Err(MonitorError::NodeRejected {
                message: format!("a node named '{}' already exists", draft.display_name),
            });
        }

        let route_switch_id = match draft.route_switch.as_deref() {
            Some(name) if !name.is_empty() => Some(self.resolve_reference("route switch", name)?),
            _ => None,
        };
        let host_node_id = match draft.host_node.as_deref() {
            Some(name) if !name.is_empty() => Some(self.resolve_reference("host node", name)?),
            _ => None,
        };

        let id = self.allocate_id()?;
        let mut node = NetworkNode::new(
            id,
            draft.ip_or_hostname.trim(),
            draft.display_name.trim(),
            draft.device_type,
            draft.network_location,
        );
        node.connection_type = draft.connection_type;
        node.route_switch_id = route_switch_id;
        node.route_switch = draft.route_switch.unwrap_or_default();
        node.host_node_id = host_node_id;
        node.host_node = draft.host_node.unwrap_or_default();
        node.mac_address = draft.mac_address;

        tracing::debug!("Added node {} '{}'", id, node.display_name);
        self.nodes.push(node);
        Ok(id)
    }

    /// 探索結果加入清單：名稱用 hostname，沒有就用 IP
    pub fn adopt_discovered(&mut self, discovered: &DiscoveredNode) -> Result<u64> {
        if self.known_addresses().contains(&discovered.ip) {
            return Err(MonitorError::NodeRejected {
                message: format!("{} is already in the inventory", discovered.ip),
            });
        }

        let mut name = if discovered.hostname.is_empty() {
            discovered.ip.clone()
        } else {
            discovered.hostname.clone()
        };
        if self.name_taken(&name, None) {
            name = format!("{} ({})", name, discovered.ip);
        }

        let location = match discovered.ip.parse::<Ipv4Addr>() {
            Ok(ip) if ip.is_private() => NetworkLocation::Local,
            _ => NetworkLocation::Public,
        };

        let mut draft = NodeDraft::new(discovered.ip.clone(), name, DeviceType::Computer);
        draft.network_location = location;
        draft.connection_type = ConnectionType::Ethernet;
        if discovered.mac != "?" && !discovered.mac.is_empty() {
            draft.mac_address = Some(discovered.mac.clone());
        }
        self.add(draft)
    }

    pub fn update(&mut self, id: u64, update: NodeUpdate) -> Result<()> {
        let is_main = self.require(id)?.main_node;

        if let Some(address) = &update.ip_or_hostname {
            validate_host("ip_or_hostname", address)?;
        }
        if let Some(name) = &update.display_name {
            validate_non_empty_string("display_name", name)?;
            if self.name_taken(name, Some(id)) {
                return Err(MonitorError::NodeRejected {
                    message: format!("a node named '{}' already exists", name),
                });
            }
        }

        // Some(None) = 清除，Some(Some(..)) = 指定新的上游
        let route_switch = match update.route_switch.as_deref() {
            Some("") => Some(None),
            Some(name) => Some(Some((
                self.checked_parent(id, "route switch", name)?,
                name.to_string(),
            ))),
            None => None,
        };
        let host_node = match update.host_node.as_deref() {
            Some("") => Some(None),
            Some(name) => Some(Some((
                self.checked_parent(id, "host node", name)?,
                name.to_string(),
            ))),
            None => None,
        };

        let node = self.get_mut(id).ok_or_else(|| MonitorError::NodeNotFound {
            reference: format!("id {}", id),
        })?;

        if let Some(address) = update.ip_or_hostname {
            node.resolved_ip = address.parse::<Ipv4Addr>().ok();
            node.ip_or_hostname = address;
        }
        if let Some(device_type) = update.device_type {
            node.device_type = device_type;
        }
        if let Some(location) = update.network_location {
            node.network_location = location;
        }
        if let Some(connection_type) = update.connection_type {
            // 主節點的連線類型固定
            if is_main {
                tracing::debug!("Ignoring connection type change on main node {}", id);
            } else {
                node.connection_type = connection_type;
            }
        }
        if let Some(route) = route_switch {
            match route {
                Some((parent, name)) => {
                    node.route_switch_id = Some(parent);
                    node.route_switch = name;
                }
                None => {
                    node.route_switch_id = None;
                    node.route_switch.clear();
                }
            }
        }
        if let Some(host) = host_node {
            match host {
                Some((parent, name)) => {
                    node.host_node_id = Some(parent);
                    node.host_node = name;
                }
                None => {
                    node.host_node_id = None;
                    node.host_node.clear();
                }
            }
        }
        if let Some(mac) = update.mac_address {
            node.mac_address = (!mac.is_empty()).then_some(mac);
        }

        if let Some(name) = update.display_name {
            node.display_name = name.clone();
            // id 才是依據，顯示用的名稱快取跟著改
            for other in &mut self.nodes {
                if other.route_switch_id == Some(id) {
                    other.route_switch = name.clone();
                }
                if other.host_node_id == Some(id) {
                    other.host_node = name.clone();
                }
            }
        }

        Ok(())
    }

    /// 指定上游節點，不可指向自己或自己的下游 (會形成迴圈)
    fn checked_parent(&self, id: u64, field: &str, name: &str) -> Result<u64> {
        let parent = self.resolve_reference(field, name)?;
        if parent == id || self.dependents_of(id).contains(&parent) {
            return Err(MonitorError::NodeRejected {
                message: format!("{} '{}' would create a routing loop", field, name),
            });
        }
        Ok(parent)
    }

    pub fn remove(&mut self, id: u64) -> Result<NetworkNode> {
        let node = self.require(id)?;
        if node.main_node {
            return Err(MonitorError::NodeRejected {
                message: format!("main node '{}' cannot be removed", node.display_name),
            });
        }

        let index = self
            .nodes
            .iter()
            .position(|n| n.node_id == id)
            .ok_or_else(|| MonitorError::NodeNotFound {
                reference: format!("id {}", id),
            })?;
        let removed = self.nodes.remove(index);

        for other in &mut self.nodes {
            if other.route_switch_id == Some(id) {
                other.route_switch_id = None;
                other.route_switch.clear();
            }
            if other.host_node_id == Some(id) {
                other.host_node_id = None;
                other.host_node.clear();
            }
        }

        Ok(removed)
    }

    pub fn set_connected(&mut self, id: u64, connected: bool) {
        if let Some(node) = self.get_mut(id) {
            node.connected = connected;
        }
    }

    pub fn upstream_of(&self, node: &NetworkNode) -> Option<&NetworkNode> {
        if let Some(switch_id) = node.route_switch_id {
            self.get(switch_id)
        } else if node.device_type == DeviceType::VirtualMachine && node.host_node_id.is_some() {
            node.host_node_id.and_then(|host| self.get(host))
        } else if !node.main_node {
            if node.connection_type == ConnectionType::Virtual {
                self.main_node_by_display_name(HOST_NODE_NAME)
            } else {
                self.main_node_by_display_name(GATEWAY_NODE_NAME)
            }
        } else {
            None
        }
    }

    pub fn links(&self) -> Vec<Link> {
        let mut links = Vec::new();

        for node in &self.nodes {
            let Some(upstream) = self.upstream_of(node) else {
                continue;
            };
            let kind = if node.route_switch_id.is_some() {
                if upstream.device_type == DeviceType::UnmanagedSwitch {
                    LinkKind::UnmanagedSwitch
                } else {
                    LinkKind::Uplink
                }
            } else if node.device_type == DeviceType::VirtualMachine
                && (node.host_node_id.is_some() || node.connection_type == ConnectionType::Virtual)
            {
                LinkKind::VirtualHost
            } else {
                LinkKind::Uplink
            };
            links.push(Link {
                from: upstream.node_id,
                to: node.node_id,
                kind,
            });
        }

        // 沒有經過交換器的主節點彼此相連
        let unrouted: Vec<u64> = self
            .nodes
            .iter()
            .filter(|n| n.main_node && n.route_switch_id.is_none())
            .map(|n| n.node_id)
            .collect();
        for (i, from) in unrouted.iter().enumerate() {
            for to in &unrouted[i + 1..] {
                links.push(Link {
                    from: *from,
                    to: *to,
                    kind: LinkKind::MainPeer,
                });
            }
        }

        links
    }

    /// 所有經由此節點連線的節點 (遞迴)
    pub fn dependents_of(&self, id: u64) -> Vec<u64> {
        let mut result = Vec::new();
        let mut visited = HashSet::from([id]);
        self.collect_dependents(id, &mut visited, &mut result);
        result
    }

    fn collect_dependents(&self, id: u64, visited: &mut HashSet<u64>, result: &mut Vec<u64>) {
        for child in &self.nodes {
            if child.route_switch_id == Some(id) || child.host_node_id == Some(id) {
                if visited.insert(child.node_id) {
                    result.push(child.node_id);
                    self.collect_dependents(child.node_id, visited, result);
                }
            }
        }
    }

    /// 從節點一路往 Gateway 的路徑，第一個元素是節點本身
    pub fn route_to(&self, id: u64) -> Result<Vec<u64>> {
        let mut route = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(self.require(id)?);

        while let Some(node) = current {
            if !visited.insert(node.node_id) {
                break;
            }
            route.push(node.node_id);

            current = if let Some(switch_id) = node.route_switch_id {
                self.get(switch_id)
            } else if node.device_type == DeviceType::VirtualMachine && node.host_node_id.is_some()
            {
                node.host_node_id.and_then(|host| self.get(host))
            } else if node.main_node {
                None
            } else {
                match node.network_location {
                    NetworkLocation::Public => self.main_node_by_device_type(DeviceType::Gateway),
                    NetworkLocation::RemotePrivate => self
                        .first_node_in(NetworkLocation::Public)
                        .or_else(|| self.any_main_node()),
                    NetworkLocation::Local => self
                        .main_node_by_device_type(DeviceType::Gateway)
                        .or_else(|| self.any_main_node()),
                }
            };
        }

        tracing::debug!("Route from {}: {:?}", id, route);
        Ok(route)
    }

    /// 已在清單中的位址 (含解析後的 IP)，探索時排除用
    pub fn known_addresses(&self) -> HashSet<String> {
        let mut known = HashSet::new();
        for node in &self.nodes {
            known.insert(node.ip_or_hostname.clone());
            if let Some(ip) = node.resolved_ip {
                known.insert(ip.to_string());
            }
        }
        known
    }

    pub fn subnets(&self) -> BTreeSet<Ipv4Subnet> {
        self.nodes
            .iter()
            .filter_map(|n| n.effective_ipv4())
            .filter(|ip| *ip != Ipv4Addr::LOCALHOST)
            .map(slash24_of)
            .collect()
    }

    /// 解析非 IP 的主機名稱，失敗只記錄警告
    pub async fn resolve_addresses(&mut self, resolver: &dyn Resolver) {
        for node in &mut self.nodes {
            if node.is_ip_literal() || node.resolved_ip.is_some() {
                continue;
            }
            match resolver.resolve(&node.ip_or_hostname).await {
                Ok(ip) => {
                    tracing::debug!("Resolved {} -> {}", node.ip_or_hostname, ip);
                    node.resolved_ip = Some(ip);
                }
                Err(e) => {
                    tracing::warn!("⚠️ {}", e);
                }
            }
        }
    }
}
