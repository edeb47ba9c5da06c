use async_trait::async_trait;
use node_monitor::core::discovery::{ArpDiscovery, DiscoveryEvent, PingSweep, SweepOptions};
use node_monitor::core::subnet::Ipv4Subnet;
use node_monitor::domain::ports::{CommandRunner, ProbeOutcome, Prober, Resolver};
use node_monitor::{MonitorError, NodeRegistry, Result};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ARP_TABLE: &str = "\
? (192.168.1.1) at a0:b1:c2:d3:e4:f5 [ether] on eth0
? (192.168.1.40) at 10:20:30:40:50:60 [ether] on eth0
? (192.168.1.41) at 10:20:30:40:50:61 [ether] on eth0
? (192.168.1.77) at <incomplete> on eth0
? (10.8.0.9) at 00:15:5d:01:02:03 [ether] on wg0
";

/// `arp -a` 回傳整張表，`arp -a <ip>` 只回傳該筆
struct FakeArp {
    macs: HashMap<String, String>,
}

impl FakeArp {
    fn new() -> Self {
        let macs = HashMap::from([("192.168.50.2".to_string(), "00:11:22:33:44:55".to_string())]);
        Self { macs }
    }
}

#[async_trait]
impl CommandRunner for FakeArp {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        assert_eq!(program, "arp");
        match args.get(1) {
            None => Ok(ARP_TABLE.to_string()),
            Some(ip) => match self.macs.get(ip) {
                Some(mac) => Ok(format!("? ({}) at {} [ether] on eth1\n", ip, mac)),
                None => Err(MonitorError::CommandError {
                    command: "arp".to_string(),
                    message: format!("{} -- no entry", ip),
                }),
            },
        }
    }
}

struct FakeResolver;

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr> {
        Err(MonitorError::ResolutionError {
            host: host.to_string(),
            message: "not used".to_string(),
        })
    }

    async fn reverse(&self, addr: Ipv4Addr) -> Option<String> {
        match addr.octets() {
            [192, 168, 1, 40] => Some("nas.lan".to_string()),
            // 反查只得到 IP 本身時視為沒有名稱
            [192, 168, 1, 41] => Some(addr.to_string()),
            [192, 168, 50, 5] => Some("camera.lan".to_string()),
            _ => None,
        }
    }
}

struct SubnetProber {
    up: HashSet<Ipv4Addr>,
}

#[async_trait]
impl Prober for SubnetProber {
    async fn probe(&self, addr: Ipv4Addr, _timeout: Duration) -> Result<ProbeOutcome> {
        Ok(ProbeOutcome {
            reachable: self.up.contains(&addr),
            latency: Duration::from_millis(1),
        })
    }
}

fn sweep(options: SweepOptions) -> PingSweep {
    let prober = SubnetProber {
        up: HashSet::from([Ipv4Addr::new(192, 168, 50, 2), Ipv4Addr::new(192, 168, 50, 5)]),
    };
    PingSweep::new(
        Arc::new(prober),
        Arc::new(FakeArp::new()),
        Arc::new(FakeResolver),
        options,
    )
}

#[tokio::test]
async fn test_arp_discovery_skips_known_nodes() {
    let registry = NodeRegistry::with_default_main_nodes(Some("192.168.1.1".to_string()));
    let discovery = ArpDiscovery::new(Arc::new(FakeArp::new()), Arc::new(FakeResolver));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = discovery
        .run(&registry.known_addresses(), Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);

    assert!(!report.cancelled);
    assert_eq!(report.node_count(), 3);

    let eth0 = report.nodes_for_interface("eth0");
    let ips: Vec<&str> = eth0.iter().map(|n| n.ip.as_str()).collect();
    assert_eq!(ips, vec!["192.168.1.40", "192.168.1.41"]);
    assert_eq!(eth0[0].hostname, "nas.lan");
    assert_eq!(eth0[0].mac, "10:20:30:40:50:60");
    assert!(eth0[1].hostname.is_empty());

    let wg0 = report.nodes_for_interface("wg0");
    assert_eq!(wg0.len(), 1);
    assert_eq!(wg0[0].interface, "wg0");

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events[0], DiscoveryEvent::InterfaceCount(2));
    assert!(events.contains(&DiscoveryEvent::NewInterface("wg0".to_string())));
    let discovered = events
        .iter()
        .filter(|e| matches!(e, DiscoveryEvent::NodeDiscovered(_)))
        .count();
    assert_eq!(discovered, 3);
}

#[tokio::test]
async fn test_adopting_discovered_nodes() {
    let mut registry = NodeRegistry::with_default_main_nodes(Some("192.168.1.1".to_string()));
    let discovery = ArpDiscovery::new(Arc::new(FakeArp::new()), Arc::new(FakeResolver));
    let report = discovery
        .run(&registry.known_addresses(), None, &CancellationToken::new())
        .await
        .unwrap();

    for node in report.nodes() {
        registry.adopt_discovered(node).unwrap();
    }
    assert_eq!(registry.len(), 5);
    assert!(registry.find_by_display_name("nas.lan").is_some());
    assert!(registry.find_by_display_name("192.168.1.41").is_some());

    // 第二次探索不會再回報已加入的節點
    let again = discovery
        .run(&registry.known_addresses(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.node_count(), 0);
}

#[tokio::test]
async fn test_ping_sweep_small_subnet() {
    let subnet: Ipv4Subnet = "192.168.50.0/29".parse().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = sweep(SweepOptions::default())
        .run(subnet, "eth1", &HashSet::new(), Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);

    let found = report.nodes_for_interface("eth1");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].ip, "192.168.50.2");
    assert_eq!(found[0].mac, "00:11:22:33:44:55");
    assert!(found[0].hostname.is_empty());
    assert_eq!(found[1].ip, "192.168.50.5");
    assert_eq!(found[1].mac, "?");
    assert_eq!(found[1].hostname, "camera.lan");

    let mut last_progress = None;
    while let Some(event) = rx.recv().await {
        if let DiscoveryEvent::Progress { done, total } = event {
            last_progress = Some((done, total));
        }
    }
    assert_eq!(last_progress, Some((6, 6)));
}

#[tokio::test]
async fn test_ping_sweep_skips_known_nodes() {
    let mut registry = NodeRegistry::with_default_main_nodes(Some("192.168.50.2".to_string()));
    let subnet: Ipv4Subnet = "192.168.50.0/29".parse().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = sweep(SweepOptions::default())
        .run(subnet, "eth1", &registry.known_addresses(), Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);

    // Gateway 已在清單中，只回報新的裝置
    let ips: Vec<&str> = report.nodes().map(|n| n.ip.as_str()).collect();
    assert_eq!(ips, vec!["192.168.50.5"]);

    let mut last_progress = None;
    while let Some(event) = rx.recv().await {
        if let DiscoveryEvent::Progress { done, total } = event {
            last_progress = Some((done, total));
        }
    }
    assert_eq!(last_progress, Some((6, 6)));

    for node in report.nodes() {
        registry.adopt_discovered(node).unwrap();
    }
    assert_eq!(registry.len(), 3);
    let gateways = registry
        .nodes()
        .iter()
        .filter(|n| n.ip_or_hostname == "192.168.50.2")
        .count();
    assert_eq!(gateways, 1);
}

#[tokio::test]
async fn test_ping_sweep_refuses_large_subnets() {
    let subnet: Ipv4Subnet = "10.0.0.0/16".parse().unwrap();
    let result = sweep(SweepOptions::default())
        .run(subnet, "eth1", &HashSet::new(), None, &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(MonitorError::InvalidConfigValueError { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_sweep_returns_partial_report() {
    let subnet: Ipv4Subnet = "192.168.50.0/29".parse().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = sweep(SweepOptions {
        concurrency: 1,
        ..Default::default()
    })
    .run(subnet, "eth1", &HashSet::new(), None, &cancel)
    .await
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.node_count(), 0);
}
