use crate::adapters::{ExportFormat, Exporter, LocalStorage};
use crate::app::App;
use crate::config::NodesCommand;
use crate::core::filter::{FilterOutcome, NodeFilter, Visibility};
use crate::core::interfaces::list_ipv4_interfaces;
use crate::core::registry::{LinkKind, NodeRegistry};
use crate::core::status::StatusMonitor;
use crate::domain::model::NodeDraft;
use crate::utils::error::Result;

impl App {
    pub(crate) async fn nodes(&self, action: NodesCommand) -> Result<()> {
        let mut registry = self.load_registry().await?;

        match action {
            NodesCommand::List { json } => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&registry.to_records())?);
                } else {
                    print!("{}", render_node_table(&registry));
                }
            }
            NodesCommand::Add(args) => {
                let draft = NodeDraft::from(args);
                let name = draft.display_name.trim().to_string();
                let id = registry.add(draft)?;
                self.save_registry(&registry).await?;
                tracing::info!("✅ Added node {} '{}'", id, name);
                println!("✅ Added node {} '{}'", id, name);
            }
            NodesCommand::Update(args) => {
                let id = registry.lookup(&args.node)?.node_id;
                registry.update(id, args.into())?;
                self.save_registry(&registry).await?;
                println!("✅ Updated node {}", id);
            }
            NodesCommand::Remove { node } => {
                let id = registry.lookup(&node)?.node_id;
                let orphans = registry.dependents_of(id).len();
                let removed = registry.remove(id)?;
                self.save_registry(&registry).await?;
                println!("🗑️ Removed '{}'", removed.display_name);
                if orphans > 0 {
                    println!("   {} dependent node(s) now route through the default gateway", orphans);
                }
            }
            NodesCommand::Route { node } => {
                let id = registry.lookup(&node)?.node_id;
                let route = registry.route_to(id)?;
                println!("{}", render_route(&registry, &route));
            }
            NodesCommand::Links => {
                print!("{}", render_links(&registry));
            }
            NodesCommand::Subnets => {
                for subnet in registry.subnets() {
                    println!("{}", subnet);
                }
            }
            NodesCommand::Filter(args) => {
                let filter = NodeFilter::from(args);
                // 狀態條件需要先探測一次
                if filter.status.is_some() {
                    registry.resolve_addresses(self.resolver.as_ref()).await;
                    let mut monitor = StatusMonitor::new(
                        self.prober.clone(),
                        list_ipv4_interfaces(),
                        self.config.status_options(),
                    );
                    let links = monitor.check_once(&registry).await;
                    monitor.apply(&mut registry, links);
                }
                let outcome = filter.apply(&registry);
                print!("{}", render_filter(&registry, &outcome));
            }
            NodesCommand::Export { output, format } => {
                let format = format.unwrap_or_else(|| ExportFormat::from_path(&output));
                let exporter = Exporter::new(LocalStorage::new("."));
                let count = exporter.export_nodes(&registry, &output, format).await?;
                tracing::info!("📁 Exported {} nodes to {}", count, output);
                println!("📁 Exported {} nodes to {}", count, output);
            }
        }

        Ok(())
    }
}

fn upstream_name(registry: &NodeRegistry, id: u64) -> String {
    registry
        .get(id)
        .and_then(|n| registry.upstream_of(n))
        .map(|n| n.display_name.clone())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_node_table(registry: &NodeRegistry) -> String {
    let mut out = format!(
        "{:<4} {:<24} {:<20} {:<22} {:<15} {:<9} {}\n",
        "ID", "NAME", "ADDRESS", "TYPE", "LOCATION", "LINK", "UPSTREAM"
    );
    for node in registry.nodes() {
        let name = if node.main_node {
            format!("{} *", node.display_name)
        } else {
            node.display_name.clone()
        };
        out.push_str(&format!(
            "{:<4} {:<24} {:<20} {:<22} {:<15} {:<9} {}\n",
            node.node_id,
            name,
            node.ip_or_hostname,
            node.device_type,
            node.network_location,
            node.connection_type,
            upstream_name(registry, node.node_id)
        ));
    }
    out
}

pub fn render_route(registry: &NodeRegistry, route: &[u64]) -> String {
    route
        .iter()
        .filter_map(|id| registry.get(*id))
        .map(|n| n.display_name.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub fn render_links(registry: &NodeRegistry) -> String {
    let name = |id: u64| {
        registry
            .get(id)
            .map(|n| n.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    };
    let mut out = String::new();
    for link in registry.links() {
        let kind = match link.kind {
            LinkKind::Uplink => "uplink",
            LinkKind::UnmanagedSwitch => "unmanaged switch",
            LinkKind::VirtualHost => "virtual host",
            LinkKind::MainPeer => "main peer",
        };
        out.push_str(&format!("{} -> {} ({})\n", name(link.from), name(link.to), kind));
    }
    out
}

pub fn render_filter(registry: &NodeRegistry, outcome: &FilterOutcome) -> String {
    let mut out = String::new();
    if outcome.reset {
        out.push_str("No nodes match the filter, showing all nodes\n");
    }
    for node in registry.nodes() {
        let marker = match outcome.visibility(node.node_id) {
            Visibility::Matched => "●",
            Visibility::OnRoute => "○",
            Visibility::Hidden => continue,
        };
        out.push_str(&format!(
            "{} {} ({})\n",
            marker, node.display_name, node.ip_or_hostname
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::DeviceType;

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::with_default_main_nodes(Some("192.168.1.1".to_string()));
        registry
            .add(NodeDraft::new("192.168.1.2", "Core Switch", DeviceType::ManagedSwitch))
            .unwrap();
        let mut nas = NodeDraft::new("192.168.1.20", "NAS", DeviceType::Server);
        nas.route_switch = Some("Core Switch".to_string());
        registry.add(nas).unwrap();
        registry
    }

    #[test]
    fn test_render_route_and_links() {
        let registry = registry();
        let nas = registry.find_by_display_name("NAS").unwrap().node_id;
        let route = registry.route_to(nas).unwrap();
        assert_eq!(render_route(&registry, &route), "NAS -> Core Switch -> Gateway");

        let links = render_links(&registry);
        assert!(links.contains("Core Switch -> NAS (uplink)"));
        assert!(links.contains("Host -> Gateway (main peer)"));
    }

    #[test]
    fn test_render_node_table() {
        let table = render_node_table(&registry());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("Host *"));
        assert!(lines[3].contains("SERVER") && lines[3].ends_with("Core Switch"));
    }

    #[test]
    fn test_render_filter_hides_unrelated() {
        let registry = registry();
        let filter = NodeFilter {
            device_type: Some(DeviceType::Server),
            ..Default::default()
        };
        let rendered = render_filter(&registry, &filter.apply(&registry));
        assert!(rendered.contains("● NAS (192.168.1.20)"));
        assert!(rendered.contains("○ Core Switch"));
        assert!(!rendered.contains("Host"));
    }
}
