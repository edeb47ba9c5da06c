use crate::utils::error::Result;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// 解析 "22,80,443" 或 "1-1024"，無效的片段直接略過
pub fn parse_ports(input: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |port: u32| {
        if (1..=u32::from(u16::MAX)).contains(&port) && seen.insert(port) {
            ports.push(port as u16);
        }
    };

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
            else {
                continue;
            };
            // 超出範圍的部分會在 push 裡被丟掉
            for port in start..=end.min(u32::from(u16::MAX)) {
                push(port);
            }
        } else if let Ok(port) = part.parse::<u32>() {
            push(port);
        }
    }

    ports
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub connect_timeout: Duration,
    pub banner_timeout: Duration,
    pub banner_bytes: usize,
    pub concurrency: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(200),
            banner_timeout: Duration::from_millis(200),
            banner_bytes: 128,
            concurrency: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProgress {
    pub port: u16,
    pub scanned: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub target: String,
    pub scanned: usize,
    pub open: Vec<OpenPort>,
    pub cancelled: bool,
}

impl ScanReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for open in &self.open {
            out.push_str(&format!("Port {} is OPEN", open.port));
            if let Some(banner) = &open.banner {
                out.push_str(&format!(" (Banner: {})", banner));
            }
            out.push('\n');
        }
        out
    }
}

pub struct PortScanner {
    options: ScanOptions,
}

impl PortScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub async fn scan(
        &self,
        target: IpAddr,
        ports: &[u16],
        banner_detection: bool,
        progress: Option<&mpsc::UnboundedSender<ScanProgress>>,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let total = ports.len();
        tracing::info!(
            "🔍 Scanning {} ports on {} (banner detection: {})",
            total,
            target,
            banner_detection
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for &port in ports {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let options = self.options.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                if cancel.is_cancelled() {
                    return (port, None, false);
                }
                let open = probe_port(SocketAddr::new(target, port), banner_detection, &options).await;
                (port, open, true)
            });
        }

        let mut report = ScanReport {
            target: target.to_string(),
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next().await {
            let (port, open, attempted) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("⚠️ Port scan task failed: {}", e);
                    continue;
                }
            };
            if !attempted {
                continue;
            }
            report.scanned += 1;
            if let Some(open) = open {
                tracing::debug!("Port {} is open", open.port);
                report.open.push(open);
            }
            if let Some(tx) = progress {
                let _ = tx.send(ScanProgress {
                    port,
                    scanned: report.scanned,
                    total,
                });
            }
        }

        report.open.sort_by_key(|o| o.port);
        report.cancelled = cancel.is_cancelled();
        tracing::info!(
            "✅ Port scan complete: {} open of {} scanned",
            report.open.len(),
            report.scanned
        );
        Ok(report)
    }
}

async fn probe_port(addr: SocketAddr, banner_detection: bool, options: &ScanOptions) -> Option<OpenPort> {
    let mut stream = match timeout(options.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        _ => return None,
    };

    let banner = if banner_detection {
        read_banner(&mut stream, options).await
    } else {
        None
    };

    Some(OpenPort {
        port: addr.port(),
        banner,
    })
}

/// 讀取服務主動送出的歡迎訊息，逾時或空白都當作沒有
async fn read_banner(stream: &mut TcpStream, options: &ScanOptions) -> Option<String> {
    let mut buffer = vec![0u8; options.banner_bytes];
    match timeout(options.banner_timeout, stream.read(&mut buffer)).await {
        Ok(Ok(n)) if n > 0 => {
            let banner = String::from_utf8_lossy(&buffer[..n]).trim().to_string();
            (!banner.is_empty()).then_some(banner)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports("22,80,443"), vec![22, 80, 443]);
        assert_eq!(parse_ports(" 20 - 23 , 80"), vec![20, 21, 22, 23, 80]);
        assert_eq!(parse_ports("80,abc,443,1-x"), vec![80, 443]);
        assert_eq!(parse_ports(""), Vec::<u16>::new());
        assert_eq!(parse_ports("10-5"), Vec::<u16>::new());
    }

    #[test]
    fn test_parse_ports_bounds_and_duplicates() {
        assert_eq!(parse_ports("0,65535,65536,70000"), vec![65535]);
        assert_eq!(parse_ports("22,21-23,22"), vec![22, 21, 23]);
        assert_eq!(parse_ports("65530-70000").len(), 6);
    }

    #[test]
    fn test_render_report() {
        let report = ScanReport {
            target: "10.0.0.1".to_string(),
            scanned: 3,
            open: vec![
                OpenPort {
                    port: 22,
                    banner: Some("SSH-2.0-OpenSSH_9.6".to_string()),
                },
                OpenPort {
                    port: 80,
                    banner: None,
                },
            ],
            cancelled: false,
        };
        assert_eq!(
            report.render(),
            "Port 22 is OPEN (Banner: SSH-2.0-OpenSSH_9.6)\nPort 80 is OPEN\n"
        );
    }
}
