use crate::core::registry::NodeRegistry;
use crate::core::subnet::Ipv4Subnet;
use crate::domain::model::{ConnectionType, DeviceType, NetworkNode};
use crate::utils::error::MonitorError;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Connected,
    Disconnected,
}

impl FromStr for StatusFilter {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connected" | "up" => Ok(StatusFilter::Connected),
            "disconnected" | "down" => Ok(StatusFilter::Disconnected),
            other => Err(MonitorError::InvalidConfigValueError {
                field: "status".to_string(),
                value: other.to_string(),
                reason: "Expected connected or disconnected".to_string(),
            }),
        }
    }
}

/// 沒設定的條件視為「任何」
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub subnet: Option<Ipv4Subnet>,
    pub device_type: Option<DeviceType>,
    pub connection_type: Option<ConnectionType>,
    pub status: Option<StatusFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Matched,
    OnRoute,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkVisibility {
    pub from: u64,
    pub to: u64,
    pub visible: bool,
    pub emphasized: bool,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// 沒有任何節點符合時，回到全部顯示
    pub reset: bool,
    pub nodes: HashMap<u64, Visibility>,
    pub links: Vec<LinkVisibility>,
}

impl FilterOutcome {
    pub fn visibility(&self, id: u64) -> Visibility {
        self.nodes.get(&id).copied().unwrap_or(Visibility::Hidden)
    }

    pub fn matched(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .nodes
            .iter()
            .filter(|(_, v)| **v == Visibility::Matched)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl NodeFilter {
    pub fn is_empty(&self) -> bool {
        self.subnet.is_none()
            && self.device_type.is_none()
            && self.connection_type.is_none()
            && self.status.is_none()
    }

    /// 主節點永遠不算符合，它們只會以路徑節點出現
    pub fn matches(&self, node: &NetworkNode) -> bool {
        if node.main_node {
            return false;
        }
        if let Some(subnet) = &self.subnet {
            match node.effective_ipv4() {
                Some(ip) if subnet.contains(ip) => {}
                _ => return false,
            }
        }
        if let Some(device_type) = self.device_type {
            if node.device_type != device_type {
                return false;
            }
        }
        if let Some(connection_type) = self.connection_type {
            if node.connection_type != connection_type {
                return false;
            }
        }
        match self.status {
            Some(StatusFilter::Connected) => node.connected,
            Some(StatusFilter::Disconnected) => !node.connected,
            None => true,
        }
    }

    pub fn apply(&self, registry: &NodeRegistry) -> FilterOutcome {
        let matching: HashSet<u64> = registry
            .nodes()
            .iter()
            .filter(|n| self.matches(n))
            .map(|n| n.node_id)
            .collect();

        if matching.is_empty() {
            tracing::debug!("No nodes match filter, showing everything");
            return FilterOutcome {
                reset: true,
                nodes: registry
                    .nodes()
                    .iter()
                    .map(|n| (n.node_id, Visibility::Matched))
                    .collect(),
                links: registry
                    .links()
                    .iter()
                    .map(|l| LinkVisibility {
                        from: l.from,
                        to: l.to,
                        visible: true,
                        emphasized: true,
                    })
                    .collect(),
            };
        }

        let mut on_route = HashSet::new();
        for id in &matching {
            if let Ok(route) = registry.route_to(*id) {
                on_route.extend(route);
            }
        }
        // Gateway 一律顯示
        if let Some(gateway) = registry.main_node_by_device_type(DeviceType::Gateway) {
            on_route.insert(gateway.node_id);
        }

        let nodes: HashMap<u64, Visibility> = registry
            .nodes()
            .iter()
            .map(|n| {
                let visibility = if matching.contains(&n.node_id) {
                    Visibility::Matched
                } else if on_route.contains(&n.node_id) {
                    Visibility::OnRoute
                } else {
                    Visibility::Hidden
                };
                (n.node_id, visibility)
            })
            .collect();

        let is_visible = |id: &u64| nodes.get(id).is_some_and(|v| *v != Visibility::Hidden);
        let links = registry
            .links()
            .iter()
            .map(|l| {
                let visible = is_visible(&l.from) && is_visible(&l.to);
                LinkVisibility {
                    from: l.from,
                    to: l.to,
                    visible,
                    emphasized: visible
                        && (matching.contains(&l.from) || matching.contains(&l.to)),
                }
            })
            .collect();

        tracing::debug!(
            "Filter matched {} nodes, {} on route",
            matching.len(),
            on_route.len()
        );

        FilterOutcome {
            reset: false,
            nodes,
            links,
        }
    }
}
