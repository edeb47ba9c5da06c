use crate::core::subnet::Ipv4Subnet;
use crate::domain::model::DiscoveredNode;
use crate::domain::ports::{CommandRunner, Prober, Resolver};
use crate::utils::error::{MonitorError, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").expect("valid regex")
});
static UNIX_ARP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\S+\s+\((\d{1,3}(?:\.\d{1,3}){3})\)\s+at\s+(\S+)(.*?)\s+on\s+(\S+)")
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub interface: String,
    pub ip: String,
    pub mac: String,
    pub kind: String,
}

impl ArpEntry {
    /// 只收動態項目，排除廣播與群播位址
    pub fn is_discoverable(&self) -> bool {
        self.kind.eq_ignore_ascii_case("dynamic")
            && self.mac != "---"
            && !self.ip.ends_with(".255")
            && !self.ip.starts_with("224.")
            && !self.ip.starts_with("239.")
            && MAC_PATTERN.is_match(&self.mac)
    }
}

/// macOS 會省略前導零 (a:b:c:...)，補成兩位數
fn normalize_unix_mac(mac: &str) -> String {
    if !mac.contains(':') {
        return mac.to_string();
    }
    mac.split(':')
        .map(|octet| {
            if octet.len() == 1 {
                format!("0{}", octet)
            } else {
                octet.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArpTable {
    /// 依出現順序，包含沒有任何項目的介面
    pub interfaces: Vec<String>,
    pub entries: Vec<ArpEntry>,
}

impl ArpTable {
    fn note_interface(&mut self, name: &str) {
        if !self.interfaces.iter().any(|i| i == name) {
            self.interfaces.push(name.to_string());
        }
    }
}

pub fn parse_arp_table(output: &str) -> Vec<ArpEntry> {
    parse_arp_output(output).entries
}

/// 同時支援 Windows (`Interface: ... ---`) 與 Unix (`? (ip) at mac on iface`) 兩種 `arp -a` 格式
pub fn parse_arp_output(output: &str) -> ArpTable {
    let mut table = ArpTable::default();
    let mut current_interface: Option<String> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("Interface:") {
            let name = rest.split("---").next().unwrap_or("").trim().to_string();
            table.note_interface(&name);
            current_interface = Some(name);
            continue;
        }

        if let Some(caps) = UNIX_ARP_LINE.captures(line) {
            let flags = caps[3].to_ascii_lowercase();
            let kind = if flags.contains("perm") || flags.contains("permanent") {
                "static"
            } else {
                "dynamic"
            };
            table.note_interface(&caps[4]);
            table.entries.push(ArpEntry {
                interface: caps[4].to_string(),
                ip: caps[1].to_string(),
                mac: normalize_unix_mac(&caps[2]),
                kind: kind.to_string(),
            });
            continue;
        }

        // Windows 表頭
        if line.contains("Internet Address") {
            continue;
        }

        let Some(interface) = &current_interface else {
            continue;
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 3 && parts[0].parse::<Ipv4Addr>().is_ok() {
            table.entries.push(ArpEntry {
                interface: interface.clone(),
                ip: parts[0].to_string(),
                mac: parts[1].to_string(),
                kind: parts[2].to_string(),
            });
        }
    }

    table
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    InterfaceCount(usize),
    NewInterface(String),
    NodeDiscovered(DiscoveredNode),
    Progress { done: usize, total: usize },
}

fn emit(events: Option<&mpsc::UnboundedSender<DiscoveryEvent>>, event: DiscoveryEvent) {
    if let Some(tx) = events {
        // 接收端已關閉就不再通知
        let _ = tx.send(event);
    }
}

async fn reverse_hostname(resolver: &dyn Resolver, ip: Ipv4Addr) -> String {
    match resolver.reverse(ip).await {
        Some(name) if name != ip.to_string() => name,
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub interfaces: BTreeMap<String, Vec<DiscoveredNode>>,
    pub cancelled: bool,
}

impl DiscoveryReport {
    pub fn nodes(&self) -> impl Iterator<Item = &DiscoveredNode> {
        self.interfaces.values().flatten()
    }

    pub fn nodes_for_interface(&self, name: &str) -> &[DiscoveredNode] {
        self.interfaces.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.interfaces.values().map(Vec::len).sum()
    }
}

/// 從 ARP 快取找出尚未加入清單的裝置
pub struct ArpDiscovery {
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn Resolver>,
}

impl ArpDiscovery {
    pub fn new(runner: Arc<dyn CommandRunner>, resolver: Arc<dyn Resolver>) -> Self {
        Self { runner, resolver }
    }

    pub async fn run(
        &self,
        known_addresses: &HashSet<String>,
        events: Option<&mpsc::UnboundedSender<DiscoveryEvent>>,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport> {
        let output = self.runner.run("arp", &["-a".to_string()]).await?;
        tracing::debug!("Raw ARP output:\n{}", output);

        let table = parse_arp_output(&output);
        emit(events, DiscoveryEvent::InterfaceCount(table.interfaces.len()));
        tracing::info!("🔎 Found {} interfaces in ARP table", table.interfaces.len());

        let mut report = DiscoveryReport::default();
        'interfaces: for interface in &table.interfaces {
            report.interfaces.insert(interface.clone(), Vec::new());
            emit(events, DiscoveryEvent::NewInterface(interface.clone()));

            for entry in table.entries.iter().filter(|e| &e.interface == interface) {
                if cancel.is_cancelled() {
                    tracing::warn!("⚠️ ARP discovery cancelled");
                    report.cancelled = true;
                    break 'interfaces;
                }

                if known_addresses.contains(&entry.ip) {
                    tracing::debug!("Skipped {}: already in inventory", entry.ip);
                    continue;
                }
                if !entry.is_discoverable() {
                    tracing::debug!("Skipped {}: not a dynamic unicast entry", entry.ip);
                    continue;
                }

                let hostname = match entry.ip.parse::<Ipv4Addr>() {
                    Ok(ip) => reverse_hostname(self.resolver.as_ref(), ip).await,
                    Err(_) => String::new(),
                };
                let node = DiscoveredNode {
                    ip: entry.ip.clone(),
                    mac: entry.mac.clone(),
                    hostname,
                    interface: interface.clone(),
                };
                tracing::debug!("Discovered {} on {}", node.ip, node.interface);
                emit(events, DiscoveryEvent::NodeDiscovered(node.clone()));
                report
                    .interfaces
                    .entry(interface.clone())
                    .or_default()
                    .push(node);
            }
        }

        Ok(report)
    }
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub timeout: Duration,
    pub concurrency: usize,
    pub max_hosts: u64,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(200),
            concurrency: 50,
            max_hosts: 4096,
        }
    }
}

/// 查單一 IP 的 MAC，查不到回傳 "?"
pub async fn lookup_mac(runner: &dyn CommandRunner, ip: Ipv4Addr) -> String {
    let args = vec!["-a".to_string(), ip.to_string()];
    match runner.run("arp", &args).await {
        Ok(output) => parse_arp_table(&output)
            .into_iter()
            .find(|e| e.ip == ip.to_string() && MAC_PATTERN.is_match(&e.mac))
            .map(|e| e.mac)
            .unwrap_or_else(|| "?".to_string()),
        Err(e) => {
            tracing::debug!("MAC lookup for {} failed: {}", ip, e);
            "?".to_string()
        }
    }
}

/// 對整個子網路做 ping 掃描
pub struct PingSweep {
    prober: Arc<dyn Prober>,
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn Resolver>,
    options: SweepOptions,
}

impl PingSweep {
    pub fn new(
        prober: Arc<dyn Prober>,
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn Resolver>,
        options: SweepOptions,
    ) -> Self {
        Self {
            prober,
            runner,
            resolver,
            options,
        }
    }

    pub async fn run(
        &self,
        subnet: Ipv4Subnet,
        interface: &str,
        known_addresses: &HashSet<String>,
        events: Option<&mpsc::UnboundedSender<DiscoveryEvent>>,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport> {
        let total = subnet.host_count();
        if total > self.options.max_hosts {
            return Err(MonitorError::InvalidConfigValueError {
                field: "subnet".to_string(),
                value: subnet.to_string(),
                reason: format!(
                    "{} hosts exceeds discovery.max_hosts ({})",
                    total, self.options.max_hosts
                ),
            });
        }
        let total = total as usize;

        tracing::info!(
            "🔎 Sweeping {} ({} hosts) via {} with concurrency {}",
            subnet,
            total,
            interface,
            self.options.concurrency
        );
        emit(events, DiscoveryEvent::InterfaceCount(1));
        emit(events, DiscoveryEvent::NewInterface(interface.to_string()));

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for host in subnet.hosts() {
            let semaphore = semaphore.clone();
            let prober = self.prober.clone();
            let runner = self.runner.clone();
            let resolver = self.resolver.clone();
            let cancel = cancel.clone();
            let timeout = self.options.timeout;
            let interface = interface.to_string();
            let known = known_addresses.contains(&host.to_string());

            tasks.spawn(async move {
                if known {
                    tracing::debug!("Skipped {}: already in inventory", host);
                    return None;
                }
                let _permit = semaphore.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }

                match prober.probe(host, timeout).await {
                    Ok(outcome) if outcome.reachable => {}
                    Ok(_) => return None,
                    Err(e) => {
                        tracing::debug!("Probe of {} failed: {}", host, e);
                        return None;
                    }
                }

                let mac = lookup_mac(runner.as_ref(), host).await;
                let hostname = reverse_hostname(resolver.as_ref(), host).await;
                Some(DiscoveredNode {
                    ip: host.to_string(),
                    mac,
                    hostname,
                    interface,
                })
            });
        }

        let mut found = Vec::new();
        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok(Some(node)) => {
                    emit(events, DiscoveryEvent::NodeDiscovered(node.clone()));
                    found.push(node);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("⚠️ Sweep task failed: {}", e),
            }
            emit(events, DiscoveryEvent::Progress { done, total });
        }

        found.sort_by_key(|n| n.ip.parse::<Ipv4Addr>().ok());

        let cancelled = cancel.is_cancelled();
        if cancelled {
            tracing::warn!("⚠️ Sweep cancelled, returning {} partial results", found.len());
        }

        let mut report = DiscoveryReport {
            cancelled,
            ..Default::default()
        };
        report.interfaces.insert(interface.to_string(), found);
        Ok(report)
    }
}
