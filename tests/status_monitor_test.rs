use async_trait::async_trait;
use node_monitor::core::interfaces::LocalInterface;
use node_monitor::core::status::{StatusMonitor, StatusOptions};
use node_monitor::domain::model::{DeviceType, NodeDraft};
use node_monitor::domain::ports::{ProbeOutcome, Prober};
use node_monitor::{NodeRegistry, Result};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// 可以在回合之間切換上下線的探測器
#[derive(Clone, Default)]
struct SwitchableProber {
    up: Arc<Mutex<HashSet<Ipv4Addr>>>,
    probes: Arc<Mutex<Vec<Ipv4Addr>>>,
}

impl SwitchableProber {
    fn set_up(&self, addr: Ipv4Addr, up: bool) {
        let mut set = self.up.lock().unwrap();
        if up {
            set.insert(addr);
        } else {
            set.remove(&addr);
        }
    }

    fn probe_count(&self, addr: Ipv4Addr) -> usize {
        self.probes.lock().unwrap().iter().filter(|a| **a == addr).count()
    }
}

#[async_trait]
impl Prober for SwitchableProber {
    async fn probe(&self, addr: Ipv4Addr, _timeout: Duration) -> Result<ProbeOutcome> {
        self.probes.lock().unwrap().push(addr);
        let reachable = self.up.lock().unwrap().contains(&addr);
        Ok(ProbeOutcome {
            reachable,
            latency: Duration::from_millis(if reachable { 5 } else { 0 }),
        })
    }
}

const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const NAS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_default_main_nodes(Some(GATEWAY.to_string()));
    registry
        .add(NodeDraft::new("192.168.1.2", "Core Switch", DeviceType::ManagedSwitch))
        .unwrap();
    let mut nas = NodeDraft::new(NAS.to_string(), "NAS", DeviceType::Server);
    nas.route_switch = Some("Core Switch".to_string());
    registry.add(nas).unwrap();
    registry
        .add(NodeDraft::new("nas.invalid", "Ghost", DeviceType::Server))
        .unwrap();
    registry
}

fn monitor(prober: &SwitchableProber) -> StatusMonitor {
    let interfaces = vec![LocalInterface {
        name: "eth0".to_string(),
        addr: Ipv4Addr::new(192, 168, 1, 23),
        prefix: 24,
        mac: None,
    }];
    StatusMonitor::new(
        Arc::new(prober.clone()),
        interfaces,
        StatusOptions {
            interval: Duration::from_millis(10),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_node_state_follows_probes() {
    let prober = SwitchableProber::default();
    prober.set_up(GATEWAY, true);
    prober.set_up(NAS, true);

    let mut registry = registry();
    let mut monitor = monitor(&prober);
    let nas_id = registry.find_by_display_name("NAS").unwrap().node_id;
    let ghost_id = registry.find_by_display_name("Ghost").unwrap().node_id;

    let links = monitor.check_once(&registry).await;
    let ghost = links.iter().find(|l| l.to == ghost_id).unwrap();
    assert!(!ghost.connected);
    assert_eq!(ghost.error.as_deref(), Some("Could not resolve nas.invalid"));

    let first = monitor.apply(&mut registry, links);
    assert!(registry.get(nas_id).unwrap().connected);
    let first_up = first.up_since[&nas_id];

    // 下線後上線時間被清掉
    prober.set_up(NAS, false);
    let links = monitor.check_once(&registry).await;
    let second = monitor.apply(&mut registry, links);
    assert!(!registry.get(nas_id).unwrap().connected);
    assert!(!second.up_since.contains_key(&nas_id));
    assert_eq!(second.round, 2);

    // 重新上線從新的時間開始算
    tokio::time::sleep(Duration::from_millis(5)).await;
    prober.set_up(NAS, true);
    let links = monitor.check_once(&registry).await;
    let third = monitor.apply(&mut registry, links);
    assert!(third.up_since[&nas_id] > first_up);
    assert!(third.uptime(nas_id, chrono::Utc::now()).is_some());
}

#[tokio::test]
async fn test_each_target_probed_once_per_round() {
    let prober = SwitchableProber::default();
    prober.set_up(GATEWAY, true);

    let registry = registry();
    let monitor = monitor(&prober);
    let links = monitor.check_once(&registry).await;

    // 交換器不探測，Gateway 同時是 Host 與交換器的上游
    assert_eq!(prober.probe_count(Ipv4Addr::new(192, 168, 1, 2)), 0);
    assert_eq!(prober.probe_count(GATEWAY), 1);

    let gateway_id = registry.find_by_display_name("Gateway").unwrap().node_id;
    let switch_id = registry.find_by_display_name("Core Switch").unwrap().node_id;
    let switch_link = links.iter().find(|l| l.to == switch_id).unwrap();
    assert!(switch_link.connected);
    assert_eq!(switch_link.latency_ms, None);
    assert!(links.iter().any(|l| l.to == gateway_id && l.connected));
}

#[tokio::test]
async fn test_run_until_cancelled() {
    let prober = SwitchableProber::default();
    prober.set_up(GATEWAY, true);

    let registry = Arc::new(RwLock::new(registry()));
    let mut monitor = monitor(&prober);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = {
        let registry = registry.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(registry, tx, None, cancel).await })
    };

    let first = rx.recv().await.unwrap();
    assert_eq!(first.round, 1);
    cancel.cancel();

    let rounds = handle.await.unwrap().unwrap();
    assert!(rounds >= 1);

    let registry = registry.read().await;
    let gateway = registry.find_by_display_name("Gateway").unwrap();
    assert!(gateway.connected);
}
