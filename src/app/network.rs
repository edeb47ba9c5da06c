use crate::adapters::{ExportFormat, Exporter, LocalStorage};
use crate::app::App;
use crate::config::{DiscoverCommand, ScanArgs, TraceArgs, WatchArgs};
use crate::core::discovery::{ArpDiscovery, DiscoveryEvent, DiscoveryReport, PingSweep};
use crate::core::interfaces::{
    default_gateway, interface_for, list_ipv4_interfaces, primary_interface,
};
use crate::core::portscan::{parse_ports, PortScanner, ScanProgress};
use crate::core::registry::NodeRegistry;
use crate::core::status::{StatusMonitor, StatusReport};
use crate::core::subnet::subnet_cidr;
use crate::core::traceroute::{TraceEvent, TracerouteTask};
use crate::utils::error::{MonitorError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

impl App {
    pub(crate) async fn discover(&self, action: DiscoverCommand) -> Result<()> {
        let mut registry = self.load_registry().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(log_discovery_events(rx));

        let (report, add, output) = match action {
            DiscoverCommand::Arp { add } => {
                let discovery = ArpDiscovery::new(self.runner.clone(), self.resolver.clone());
                let known = registry.known_addresses();
                let report = discovery.run(&known, Some(&tx), &self.cancel).await;
                (report, add, None)
            }
            DiscoverCommand::Sweep {
                subnet,
                output,
                add,
            } => {
                let interfaces = list_ipv4_interfaces();
                let (subnet, interface) = match subnet {
                    Some(subnet) => {
                        let name = interface_for(subnet.network(), &interfaces)
                            .map(|i| i.name.clone())
                            .unwrap_or_else(|| "manual".to_string());
                        (subnet, name)
                    }
                    None => {
                        let primary = primary_interface(&interfaces)?;
                        let subnet = primary.subnet().ok_or_else(|| MonitorError::InterfaceError {
                            message: format!("Interface {} has no usable subnet", primary.name),
                        })?;
                        (subnet, primary.name)
                    }
                };

                let sweep = PingSweep::new(
                    self.prober.clone(),
                    self.runner.clone(),
                    self.resolver.clone(),
                    self.config.sweep_options(),
                );
                let known = registry.known_addresses();
                let report = sweep
                    .run(subnet, &interface, &known, Some(&tx), &self.cancel)
                    .await;
                self.resources.log_stats("Ping sweep");
                (report, add, output)
            }
        };

        drop(tx);
        let _ = listener.await;
        let report = report?;

        print!("{}", render_discovery(&report));

        if let Some(output) = output {
            let exporter = Exporter::new(LocalStorage::new("."));
            let count = exporter
                .export_discovered(report.nodes(), &output, ExportFormat::from_path(&output))
                .await?;
            println!("📁 Wrote {} discovered nodes to {}", count, output);
        }

        if add {
            let added = adopt_all(&mut registry, &report);
            self.save_registry(&registry).await?;
            println!("✅ Added {} nodes to the inventory", added);
        }

        Ok(())
    }

    pub(crate) async fn scan(&self, args: ScanArgs) -> Result<()> {
        let ip = self.resolver.resolve(&args.target).await?;
        let ports = parse_ports(args.ports.as_deref().unwrap_or(self.config.default_ports()));
        if ports.is_empty() {
            return Err(MonitorError::InvalidConfigValueError {
                field: "ports".to_string(),
                value: args.ports.unwrap_or_default(),
                reason: "No valid ports in list".to_string(),
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ScanProgress>();
        let listener = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if is_progress_step(progress.scanned, progress.total) {
                    tracing::info!("⏳ Scanned {}/{} ports", progress.scanned, progress.total);
                }
            }
        });

        let scanner = PortScanner::new(self.config.scan_options());
        let report = scanner
            .scan(IpAddr::V4(ip), &ports, args.banner, Some(&tx), &self.cancel)
            .await;
        drop(tx);
        let _ = listener.await;
        let report = report?;
        self.resources.log_stats("Port scan");

        if report.open.is_empty() {
            println!("No open ports found on {} ({} scanned)", args.target, report.scanned);
        } else {
            print!("{}", report.render());
        }
        if report.cancelled {
            println!("⚠️ Scan cancelled after {} of {} ports", report.scanned, ports.len());
        }
        Ok(())
    }

    pub(crate) async fn trace(&self, args: TraceArgs) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<TraceEvent>();
        let printer = tokio::spawn(async move {
            while let Some(TraceEvent::Hop { index, hop }) = rx.recv().await {
                println!("{:>2}  {}", index, hop);
            }
        });

        let task = TracerouteTask::new(self.resolver.clone(), self.config.traceroute_options());
        let hops = task.run(&args.target, Some(&tx), &self.cancel).await;
        drop(tx);
        let _ = printer.await;

        let hops = hops?;
        tracing::info!("✅ {} hops to {}", hops.len(), args.target);
        Ok(())
    }

    pub(crate) async fn watch(&self, args: WatchArgs) -> Result<()> {
        let mut registry = self.load_registry().await?;
        registry.resolve_addresses(self.resolver.as_ref()).await;

        let names: HashMap<u64, String> = registry
            .nodes()
            .iter()
            .map(|n| (n.node_id, n.display_name.clone()))
            .collect();
        let registry = Arc::new(RwLock::new(registry));

        let (tx, mut rx) = mpsc::unbounded_channel::<StatusReport>();
        let json = args.json;
        let printer = tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                if json {
                    match serde_json::to_string(&report) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!("⚠️ Could not encode status report: {}", e),
                    }
                } else {
                    print!("{}", render_status_report(&report, &names));
                }
            }
        });

        let mut monitor = StatusMonitor::new(
            self.prober.clone(),
            list_ipv4_interfaces(),
            self.config.status_options(),
        );
        let rounds = monitor
            .run(registry, tx, args.rounds, self.cancel.clone())
            .await;
        let _ = printer.await;

        let rounds = rounds?;
        self.resources.log_stats("Status monitor");
        tracing::info!("👋 Status monitor stopped after {} rounds", rounds);
        Ok(())
    }

    pub(crate) async fn host_info(&self) -> Result<()> {
        let interfaces = list_ipv4_interfaces();
        println!("Interfaces:");
        for interface in &interfaces {
            let subnet = interface
                .subnet()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<16} {:<15} {:<18} {}",
                interface.name,
                interface.addr,
                subnet,
                interface.mac.as_deref().unwrap_or("-")
            );
        }

        match primary_interface(&interfaces) {
            Ok(primary) => println!("Primary interface: {} ({})", primary.name, primary.addr),
            Err(e) => println!("Primary interface: {}", e),
        }
        match default_gateway(self.runner.as_ref()).await {
            Some(gateway) => println!("Default gateway: {}", gateway),
            None => println!("Default gateway: unknown"),
        }
        Ok(())
    }

    pub(crate) fn subnet(&self, ip: &str, prefix: u8) -> Result<()> {
        println!("{}", subnet_cidr(ip, prefix)?);
        Ok(())
    }
}

async fn log_discovery_events(mut rx: mpsc::UnboundedReceiver<DiscoveryEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            DiscoveryEvent::InterfaceCount(count) => {
                tracing::debug!("{} interfaces to scan", count);
            }
            DiscoveryEvent::NewInterface(name) => {
                tracing::info!("🌐 Scanning interface {}", name);
            }
            DiscoveryEvent::NodeDiscovered(node) => {
                tracing::info!("📡 Found {} ({}) on {}", node.ip, node.mac, node.interface);
            }
            DiscoveryEvent::Progress { done, total } => {
                if is_progress_step(done, total) {
                    tracing::info!("⏳ Probed {}/{} hosts", done, total);
                }
            }
        }
    }
}

/// 每 10% 回報一次
fn is_progress_step(done: usize, total: usize) -> bool {
    let step = (total / 10).max(1);
    done == total || done % step == 0
}

fn adopt_all(registry: &mut NodeRegistry, report: &DiscoveryReport) -> usize {
    let mut added = 0;
    for node in report.nodes() {
        match registry.adopt_discovered(node) {
            Ok(_) => added += 1,
            Err(e) => tracing::warn!("⚠️ Skipped {}: {}", node.ip, e),
        }
    }
    added
}

pub fn render_discovery(report: &DiscoveryReport) -> String {
    let mut out = String::new();
    for (interface, nodes) in &report.interfaces {
        out.push_str(&format!("Interface {} ({} new)\n", interface, nodes.len()));
        for node in nodes {
            let hostname = if node.hostname.is_empty() {
                "-"
            } else {
                node.hostname.as_str()
            };
            out.push_str(&format!("  {:<15} {:<17} {}\n", node.ip, node.mac, hostname));
        }
    }
    if report.cancelled {
        out.push_str("⚠️ Discovery cancelled, results are partial\n");
    }
    out
}

pub fn render_status_report(report: &StatusReport, names: &HashMap<u64, String>) -> String {
    let name = |id: u64| names.get(&id).cloned().unwrap_or_else(|| id.to_string());
    let now = Utc::now();
    let mut out = format!(
        "── round {} ({}/{} links up) ──\n",
        report.round,
        report.connected_count(),
        report.links.len()
    );
    for link in &report.links {
        let state = if link.connected { "UP  " } else { "DOWN" };
        let mut line = format!("{} {} -> {}", state, name(link.from), name(link.to));
        if let Some(latency) = link.latency_ms {
            line.push_str(&format!(" {} ms", latency));
        }
        if let Some(interface) = &link.interface {
            line.push_str(&format!(" via {}", interface));
        }
        if let Some(uptime) = report.uptime(link.to, now) {
            line.push_str(&format!(" up {}s", uptime.num_seconds()));
        }
        if let Some(error) = &link.error {
            line.push_str(&format!(" ({})", error));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::LinkStatus;
    use crate::domain::model::DiscoveredNode;
    use std::collections::BTreeMap;

    #[test]
    fn test_progress_steps() {
        assert!(is_progress_step(25, 254));
        assert!(!is_progress_step(26, 254));
        assert!(is_progress_step(254, 254));
        assert!(is_progress_step(1, 3));
    }

    #[test]
    fn test_render_discovery() {
        let mut interfaces = BTreeMap::new();
        interfaces.insert(
            "eth0".to_string(),
            vec![DiscoveredNode {
                ip: "192.168.1.40".to_string(),
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                hostname: String::new(),
                interface: "eth0".to_string(),
            }],
        );
        let report = DiscoveryReport {
            interfaces,
            cancelled: true,
        };
        let rendered = render_discovery(&report);
        assert!(rendered.starts_with("Interface eth0 (1 new)\n"));
        assert!(rendered.contains("192.168.1.40"));
        assert!(rendered.contains("partial"));
    }

    #[test]
    fn test_render_status_report() {
        let now = Utc::now();
        let report = StatusReport {
            round: 3,
            links: vec![
                LinkStatus {
                    from: 2,
                    to: 3,
                    connected: true,
                    latency_ms: Some(4),
                    interface: Some("eth0".to_string()),
                    error: None,
                    checked_at: now,
                },
                LinkStatus {
                    from: 2,
                    to: 4,
                    connected: false,
                    latency_ms: None,
                    interface: None,
                    error: Some("Could not resolve nas.lan".to_string()),
                    checked_at: now,
                },
            ],
            up_since: BTreeMap::from([(3, now)]),
        };
        let names = HashMap::from([(2, "Gateway".to_string()), (3, "NAS".to_string())]);

        let rendered = render_status_report(&report, &names);
        assert!(rendered.contains("round 3 (1/2 links up)"));
        assert!(rendered.contains("UP   Gateway -> NAS 4 ms via eth0 up 0s"));
        assert!(rendered.contains("DOWN Gateway -> 4 (Could not resolve nas.lan)"));
    }
}
