use crate::utils::error::Result;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// 執行外部指令 (arp, route, traceroute ...) 並取回 stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub latency: Duration,
}

impl ProbeOutcome {
    pub fn unreachable(latency: Duration) -> Self {
        Self {
            reachable: false,
            latency,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis() as u64
    }
}

/// 可達性探測
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> Result<ProbeOutcome>;
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr>;
    /// 反查不到時回傳 None
    async fn reverse(&self, addr: Ipv4Addr) -> Option<String>;
}
