use crate::core::interfaces::{interface_for, LocalInterface};
use crate::core::registry::NodeRegistry;
use crate::domain::ports::Prober;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub concurrency: usize,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(2000),
            concurrency: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub from: u64,
    pub to: u64,
    pub connected: bool,
    /// 交換器不量延遲
    pub latency_ms: Option<u64>,
    pub interface: Option<String>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub round: u64,
    pub links: Vec<LinkStatus>,
    /// 節點 -> 最近一次上線時間
    pub up_since: BTreeMap<u64, DateTime<Utc>>,
}

impl StatusReport {
    pub fn uptime(&self, node_id: u64, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.up_since.get(&node_id).map(|since| now - *since)
    }

    pub fn connected_count(&self) -> usize {
        self.links.iter().filter(|l| l.connected).count()
    }
}

/// 單一節點的探測結果，多條連線指向同一節點時共用
#[derive(Debug, Clone)]
struct NodeCheck {
    connected: bool,
    latency_ms: Option<u64>,
    interface: Option<String>,
    error: Option<String>,
}

enum CheckTarget {
    Switch,
    Address(Ipv4Addr),
    Unresolved(String),
}

pub struct StatusMonitor {
    prober: Arc<dyn Prober>,
    interfaces: Arc<Vec<LocalInterface>>,
    options: StatusOptions,
    up_since: BTreeMap<u64, DateTime<Utc>>,
    round: u64,
}

impl StatusMonitor {
    pub fn new(
        prober: Arc<dyn Prober>,
        interfaces: Vec<LocalInterface>,
        options: StatusOptions,
    ) -> Self {
        Self {
            prober,
            interfaces: Arc::new(interfaces),
            options,
            up_since: BTreeMap::new(),
            round: 0,
        }
    }

    /// 探測所有連線一次，回傳依連線順序排列的結果
    pub async fn check_once(&self, registry: &NodeRegistry) -> Vec<LinkStatus> {
        let links = registry.links();

        let mut targets = HashMap::new();
        for link in &links {
            if targets.contains_key(&link.to) {
                continue;
            }
            let Some(node) = registry.get(link.to) else {
                continue;
            };
            let target = if node.device_type.is_switch() {
                CheckTarget::Switch
            } else if let Some(ip) = node.effective_ipv4() {
                CheckTarget::Address(ip)
            } else {
                CheckTarget::Unresolved(node.ip_or_hostname.clone())
            };
            targets.insert(link.to, target);
        }

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (node_id, target) in targets {
            let prober = self.prober.clone();
            let interfaces = self.interfaces.clone();
            let semaphore = semaphore.clone();
            let timeout = self.options.probe_timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let check = check_target(prober.as_ref(), &interfaces, target, timeout).await;
                (node_id, check)
            });
        }

        let mut checks = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((node_id, check)) => {
                    checks.insert(node_id, check);
                }
                Err(e) => tracing::warn!("⚠️ Status check task failed: {}", e),
            }
        }

        let checked_at = Utc::now();
        links
            .iter()
            .filter_map(|link| {
                let check = checks.get(&link.to)?;
                Some(LinkStatus {
                    from: link.from,
                    to: link.to,
                    connected: check.connected,
                    latency_ms: check.latency_ms,
                    interface: check.interface.clone(),
                    error: check.error.clone(),
                    checked_at,
                })
            })
            .collect()
    }

    /// 寫回 connected 並更新上線時間
    pub fn apply(&mut self, registry: &mut NodeRegistry, links: Vec<LinkStatus>) -> StatusReport {
        self.round += 1;

        let mut node_state: HashMap<u64, (bool, DateTime<Utc>)> = HashMap::new();
        for link in &links {
            let entry = node_state.entry(link.to).or_insert((false, link.checked_at));
            entry.0 |= link.connected;
        }

        for (node_id, (connected, checked_at)) in node_state {
            registry.set_connected(node_id, connected);
            if connected {
                self.up_since.entry(node_id).or_insert(checked_at);
            } else if self.up_since.remove(&node_id).is_some() {
                tracing::warn!("🔴 Node {} went down", node_id);
            }
        }
        self.up_since.retain(|id, _| registry.get(*id).is_some());

        StatusReport {
            round: self.round,
            links,
            up_since: self.up_since.clone(),
        }
    }

    /// 依 interval 週期檢查，`rounds` 為 None 時直到取消為止
    pub async fn run(
        &mut self,
        registry: Arc<RwLock<NodeRegistry>>,
        reports: mpsc::UnboundedSender<StatusReport>,
        rounds: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        tracing::info!(
            "👀 Starting status monitor (interval: {:?})",
            self.options.interval
        );
        let mut ticker = interval(self.options.interval);
        // 一輪超過間隔時不補跑錯過的 tick
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = registry.read().await.clone();
                    let links = tokio::select! {
                        links = self.check_once(&snapshot) => links,
                        _ = cancel.cancelled() => break,
                    };

                    let report = {
                        let mut guard = registry.write().await;
                        self.apply(&mut guard, links)
                    };
                    tracing::debug!(
                        "Status round {}: {}/{} links up",
                        report.round,
                        report.connected_count(),
                        report.links.len()
                    );
                    if reports.send(report).is_err() {
                        tracing::debug!("Status receiver dropped, stopping monitor");
                        break;
                    }

                    completed += 1;
                    if rounds.is_some_and(|limit| completed >= limit) {
                        break;
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("🛑 Status monitor cancelled");
                    break;
                }
            }
        }

        Ok(completed)
    }
}

async fn check_target(
    prober: &dyn Prober,
    interfaces: &[LocalInterface],
    target: CheckTarget,
    timeout: Duration,
) -> NodeCheck {
    match target {
        CheckTarget::Switch => NodeCheck {
            connected: true,
            latency_ms: None,
            interface: None,
            error: None,
        },
        CheckTarget::Unresolved(host) => NodeCheck {
            connected: false,
            latency_ms: None,
            interface: None,
            error: Some(format!("Could not resolve {}", host)),
        },
        CheckTarget::Address(ip) => {
            let interface = interface_for(ip, interfaces).map(|i| i.name.clone());
            match prober.probe(ip, timeout).await {
                Ok(outcome) if outcome.reachable => NodeCheck {
                    connected: true,
                    latency_ms: Some(outcome.latency_ms()),
                    interface,
                    error: None,
                },
                Ok(_) => NodeCheck {
                    connected: false,
                    latency_ms: None,
                    interface,
                    error: None,
                },
                Err(e) => NodeCheck {
                    connected: false,
                    latency_ms: None,
                    interface,
                    error: Some(e.to_string()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{DeviceType, NodeDraft};
    use crate::domain::ports::ProbeOutcome;
    use crate::utils::error::MonitorError;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FakeProber {
        up: HashSet<Ipv4Addr>,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, addr: Ipv4Addr, _timeout: Duration) -> Result<ProbeOutcome> {
            if addr == Ipv4Addr::new(192, 168, 1, 99) {
                return Err(MonitorError::CommandError {
                    command: "ping".to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(ProbeOutcome {
                reachable: self.up.contains(&addr),
                latency: Duration::from_millis(3),
            })
        }
    }

    fn setup() -> (NodeRegistry, StatusMonitor) {
        let mut registry = NodeRegistry::with_default_main_nodes(Some("192.168.1.1".to_string()));
        registry
            .add(NodeDraft::new("192.168.1.2", "Switch", DeviceType::UnmanagedSwitch))
            .unwrap();
        let mut nas = NodeDraft::new("192.168.1.20", "NAS", DeviceType::Server);
        nas.route_switch = Some("Switch".to_string());
        registry.add(nas).unwrap();
        registry
            .add(NodeDraft::new("192.168.1.99", "Broken", DeviceType::Phone))
            .unwrap();

        let prober = FakeProber {
            up: HashSet::from([Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 20)]),
        };
        let interfaces = vec![LocalInterface {
            name: "eth0".to_string(),
            addr: Ipv4Addr::new(192, 168, 1, 23),
            prefix: 24,
            mac: None,
        }];
        let monitor = StatusMonitor::new(Arc::new(prober), interfaces, StatusOptions::default());
        (registry, monitor)
    }

    #[tokio::test]
    async fn test_check_once() {
        let (registry, monitor) = setup();
        let links = monitor.check_once(&registry).await;
        let by_target = |name: &str| {
            let id = registry.find_by_display_name(name).unwrap().node_id;
            links.iter().find(|l| l.to == id).unwrap().clone()
        };

        let switch = by_target("Switch");
        assert!(switch.connected);
        assert_eq!(switch.latency_ms, None);

        let nas = by_target("NAS");
        assert!(nas.connected);
        assert_eq!(nas.latency_ms, Some(3));
        assert_eq!(nas.interface.as_deref(), Some("eth0"));

        let broken = by_target("Broken");
        assert!(!broken.connected);
        assert!(broken.error.is_some());
    }

    #[tokio::test]
    async fn test_apply_tracks_uptime() {
        let (mut registry, mut monitor) = setup();
        let links = monitor.check_once(&registry).await;
        let report = monitor.apply(&mut registry, links);

        let nas = registry.find_by_display_name("NAS").unwrap();
        let broken = registry.find_by_display_name("Broken").unwrap();
        assert!(nas.connected);
        assert!(!broken.connected);
        assert_eq!(report.round, 1);
        assert!(report.up_since.contains_key(&nas.node_id));
        assert!(report.uptime(broken.node_id, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_run_stops_after_rounds() {
        let (registry, mut monitor) = setup();
        monitor.options.interval = Duration::from_millis(10);
        let registry = Arc::new(RwLock::new(registry));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let rounds = monitor
            .run(registry.clone(), tx, Some(2), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rounds, 2);
        assert_eq!(rx.recv().await.unwrap().round, 1);
        assert_eq!(rx.recv().await.unwrap().round, 2);
    }

    /// 第一輪很慢，之後立即回應，並記錄每次探測的時間
    struct SlowFirstRound {
        calls: std::sync::Mutex<Vec<std::time::Instant>>,
    }

    #[async_trait]
    impl Prober for SlowFirstRound {
        async fn probe(&self, _addr: Ipv4Addr, _timeout: Duration) -> Result<ProbeOutcome> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(std::time::Instant::now());
                calls.len() == 1
            };
            if first {
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            Ok(ProbeOutcome {
                reachable: true,
                latency: Duration::from_millis(1),
            })
        }
    }

    #[tokio::test]
    async fn test_slow_round_does_not_burst() {
        let registry = NodeRegistry::with_default_main_nodes(Some("192.168.1.1".to_string()));
        let prober = Arc::new(SlowFirstRound {
            calls: std::sync::Mutex::new(Vec::new()),
        });
        let options = StatusOptions {
            interval: Duration::from_millis(50),
            ..Default::default()
        };
        let mut monitor = StatusMonitor::new(prober.clone(), Vec::new(), options);
        let (tx, _rx) = mpsc::unbounded_channel();

        let rounds = monitor
            .run(Arc::new(RwLock::new(registry)), tx, Some(3), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rounds, 3);

        // 慢的一輪之後恢復正常間隔，不會連續補跑
        let calls = prober.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].duration_since(calls[1]) >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let (registry, mut monitor) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::unbounded_channel();

        let rounds = monitor
            .run(Arc::new(RwLock::new(registry)), tx, None, cancel)
            .await
            .unwrap();
        assert!(rounds <= 1);
    }
}
