use crate::domain::ports::{CommandRunner, Resolver};
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// 正向查詢走 tokio 的解析器，反查透過系統指令
pub struct SystemResolver {
    runner: Arc<dyn CommandRunner>,
}

impl SystemResolver {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

fn reverse_command(addr: Ipv4Addr) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("nslookup", vec![addr.to_string()])
    } else {
        ("getent", vec!["hosts".to_string(), addr.to_string()])
    }
}

/// `getent hosts` 的第二欄，或 nslookup 的 `Name:` 行
pub fn parse_reverse_output(output: &str) -> Option<String> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("Name:") {
            let name = name.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
            continue;
        }
        let mut columns = line.split_whitespace();
        if let (Some(first), Some(name)) = (columns.next(), columns.next()) {
            if first.parse::<IpAddr>().is_ok() {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr> {
        let host = host.trim();
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(ip);
        }

        let resolution_error = |message: String| MonitorError::ResolutionError {
            host: host.to_string(),
            message,
        };

        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| resolution_error(e.to_string()))?;
        addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| resolution_error("no IPv4 address".to_string()))
    }

    async fn reverse(&self, addr: Ipv4Addr) -> Option<String> {
        let (program, args) = reverse_command(addr);
        match self.runner.run(program, &args).await {
            Ok(output) => parse_reverse_output(&output),
            Err(e) => {
                tracing::trace!("Reverse lookup for {} failed: {}", addr, e);
                None
            }
        }
    }
}
