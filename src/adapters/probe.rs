use crate::domain::ports::{ProbeOutcome, Prober};
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;

/// 使用系統 ping (一次 ICMP echo)
#[derive(Debug, Clone, Default)]
pub struct SystemPingProber;

pub fn ping_arguments(addr: Ipv4Addr, timeout: Duration) -> Vec<String> {
    let target = addr.to_string();
    if cfg!(windows) {
        vec![
            "-n".to_string(),
            "1".to_string(),
            "-w".to_string(),
            timeout.as_millis().to_string(),
            target,
        ]
    } else if cfg!(target_os = "macos") {
        // macOS 的 -W 單位是毫秒
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            timeout.as_millis().to_string(),
            target,
        ]
    } else {
        let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            secs.to_string(),
            target,
        ]
    }
}

#[async_trait]
impl Prober for SystemPingProber {
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> Result<ProbeOutcome> {
        let args = ping_arguments(addr, timeout);
        let start = Instant::now();

        let child = Command::new("ping")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        // ping 自己也有逾時，這裡多留一秒避免卡住
        let output = match tokio::time::timeout(timeout + Duration::from_secs(1), child).await {
            Ok(result) => result.map_err(|e| MonitorError::CommandError {
                command: "ping".to_string(),
                message: e.to_string(),
            })?,
            Err(_) => return Ok(ProbeOutcome::unreachable(start.elapsed())),
        };
        let latency = start.elapsed();

        // Windows 對「目的地無法連線」也回傳 0，需要看有沒有 TTL
        let reachable = output.status.success()
            && (!cfg!(windows) || String::from_utf8_lossy(&output.stdout).contains("TTL="));

        tracing::trace!("ping {} -> {} in {:?}", addr, reachable, latency);
        Ok(ProbeOutcome { reachable, latency })
    }
}

/// 不需要特權的 TCP 探測：連線成功或被拒絕都代表主機在線
#[derive(Debug, Clone)]
pub struct TcpProber {
    port: u16,
}

impl Default for TcpProber {
    fn default() -> Self {
        Self { port: 7 }
    }
}

impl TcpProber {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: Ipv4Addr, timeout: Duration) -> Result<ProbeOutcome> {
        let start = Instant::now();
        let socket = SocketAddr::from((addr, self.port));

        let reachable = match tokio::time::timeout(timeout, TcpStream::connect(socket)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => e.kind() == ErrorKind::ConnectionRefused,
            Err(_) => false,
        };

        Ok(ProbeOutcome {
            reachable,
            latency: start.elapsed(),
        })
    }
}
