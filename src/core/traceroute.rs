use crate::domain::ports::Resolver;
use crate::utils::error::{MonitorError, Result};
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static IPV4_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("valid regex"));
static HOP_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)").expect("valid regex"));
static TIMEOUT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Request timed out|\*\s+\*\s+\*").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hop {
    Address(Ipv4Addr),
    Timeout,
    /// 無法解析的目標，原樣保留
    Unresolved(String),
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hop::Address(ip) => write!(f, "{}", ip),
            Hop::Timeout => write!(f, "Timeout"),
            Hop::Unresolved(target) => write!(f, "{}", target),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracerouteOptions {
    pub max_hops: u8,
    pub hop_wait: Duration,
}

impl Default for TracerouteOptions {
    fn default() -> Self {
        Self {
            max_hops: 15,
            hop_wait: Duration::from_millis(1000),
        }
    }
}

/// (program, args)，只用數字位址不做反查
pub fn traceroute_command(target: &str, options: &TracerouteOptions) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        (
            "tracert",
            vec![
                "-d".to_string(),
                "-w".to_string(),
                options.hop_wait.as_millis().to_string(),
                "-h".to_string(),
                options.max_hops.to_string(),
                target.to_string(),
            ],
        )
    } else {
        (
            "traceroute",
            vec![
                "-n".to_string(),
                "-w".to_string(),
                options.hop_wait.as_secs().max(1).to_string(),
                "-m".to_string(),
                options.max_hops.to_string(),
                target.to_string(),
            ],
        )
    }
}

/// 逐行解析 tracert / traceroute 的輸出
#[derive(Debug, Clone)]
pub struct TracerouteParser {
    target: String,
    resolved_target: Option<Ipv4Addr>,
    max_hops: usize,
    hops: Vec<Hop>,
    target_found: bool,
    finished: bool,
}

impl TracerouteParser {
    pub fn new(target: &str, resolved_target: Option<Ipv4Addr>, max_hops: u8) -> Self {
        Self {
            target: target.trim().to_string(),
            resolved_target: resolved_target.or_else(|| target.trim().parse().ok()),
            max_hops: usize::from(max_hops.max(1)),
            hops: Vec::new(),
            target_found: false,
            finished: false,
        }
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn target_found(&self) -> bool {
        self.target_found
    }

    /// 到達目標或跳數上限後不再接受輸入
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_target(&self, ip: Ipv4Addr) -> bool {
        self.resolved_target == Some(ip) || ip.to_string() == self.target
    }

    pub fn feed(&mut self, line: &str) -> Option<Hop> {
        if self.finished {
            return None;
        }
        if line.trim().is_empty()
            || line.contains("Tracing route")
            || line.contains("over a maximum")
        {
            return None;
        }
        if !HOP_NUMBER.is_match(line) {
            return None;
        }

        let hop = if TIMEOUT_PATTERN.is_match(line) {
            Hop::Timeout
        } else {
            // 第一欄是跳數，取後面的第一個位址
            let rest = HOP_NUMBER.replace(line, "");
            let ip = IPV4_PATTERN
                .find(&rest)
                .and_then(|m| m.as_str().parse::<Ipv4Addr>().ok())?;
            if self.is_target(ip) {
                self.target_found = true;
                self.finished = true;
            }
            Hop::Address(ip)
        };

        self.hops.push(hop.clone());
        if self.hops.len() >= self.max_hops {
            self.finished = true;
        }
        Some(hop)
    }

    /// 沒走到目標時把目標補在最後
    pub fn finish(mut self) -> Vec<Hop> {
        let already_listed = self
            .hops
            .iter()
            .any(|h| matches!(h, Hop::Address(ip) if self.is_target(*ip)));

        if !self.target_found && !already_listed && self.hops.len() < self.max_hops {
            let last = match self.resolved_target {
                Some(ip) => Hop::Address(ip),
                None => Hop::Unresolved(self.target.clone()),
            };
            self.hops.push(last);
            self.target_found = true;
        }
        self.hops
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Hop { index: usize, hop: Hop },
}

pub struct TracerouteTask {
    resolver: Arc<dyn Resolver>,
    options: TracerouteOptions,
}

impl TracerouteTask {
    pub fn new(resolver: Arc<dyn Resolver>, options: TracerouteOptions) -> Self {
        Self { resolver, options }
    }

    /// 執行系統 traceroute，每解析到一跳就送出事件；取消時結束子程序並回傳目前結果
    pub async fn run(
        &self,
        target: &str,
        events: Option<&mpsc::UnboundedSender<TraceEvent>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Hop>> {
        let resolved = self.resolver.resolve(target).await.ok();
        let mut parser = TracerouteParser::new(target, resolved, self.options.max_hops);
        let (program, args) = traceroute_command(target, &self.options);

        tracing::info!("🛰️ Tracing route to {} (max {} hops)", target, self.options.max_hops);

        let mut child = Command::new(program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MonitorError::CommandError {
                command: program.to_string(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| MonitorError::CommandError {
            command: program.to_string(),
            message: "stdout not captured".to_string(),
        })?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("🛑 Traceroute to {} cancelled", target);
                    let _ = child.kill().await;
                    return Ok(parser.hops().to_vec());
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if let Some(hop) = parser.feed(&line) {
                        tracing::debug!("Hop {}: {}", parser.hops().len(), hop);
                        if let Some(tx) = events {
                            let _ = tx.send(TraceEvent::Hop { index: parser.hops().len(), hop });
                        }
                    }
                    if parser.is_finished() {
                        let _ = child.kill().await;
                        break;
                    }
                }
            }
        }

        let _ = child.wait().await;

        let recorded = parser.hops().len();
        let hops = parser.finish();
        if hops.len() > recorded {
            if let (Some(tx), Some(last)) = (events, hops.last()) {
                let _ = tx.send(TraceEvent::Hop {
                    index: hops.len(),
                    hop: last.clone(),
                });
            }
        }

        tracing::info!("✅ Traceroute to {} finished with {} hops", target, hops.len());
        Ok(hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOWS_OUTPUT: &str = r#"
Tracing route to 8.8.8.8 over a maximum of 15 hops

  1    <1 ms    <1 ms    <1 ms  192.168.1.1
  2     *        *        *     Request timed out.
  3    12 ms    11 ms    12 ms  100.64.0.1
  4    14 ms    13 ms    13 ms  8.8.8.8

Trace complete.
"#;

    #[test]
    fn test_parse_windows_output() {
        let target = Ipv4Addr::new(8, 8, 8, 8);
        let mut parser = TracerouteParser::new("8.8.8.8", Some(target), 15);
        for line in WINDOWS_OUTPUT.lines() {
            parser.feed(line);
        }
        assert!(parser.target_found());
        assert!(parser.is_finished());
        assert_eq!(
            parser.finish(),
            vec![
                Hop::Address(Ipv4Addr::new(192, 168, 1, 1)),
                Hop::Timeout,
                Hop::Address(Ipv4Addr::new(100, 64, 0, 1)),
                Hop::Address(target),
            ]
        );
    }

    #[test]
    fn test_unreached_target_is_appended() {
        let output = "traceroute to example.org (93.184.215.14), 15 hops max, 60 byte packets\n 1  10.0.0.1  0.512 ms  0.480 ms  0.470 ms\n 2  * * *\n";
        let target = Ipv4Addr::new(93, 184, 215, 14);
        let mut parser = TracerouteParser::new("example.org", Some(target), 15);
        for line in output.lines() {
            parser.feed(line);
        }
        assert!(!parser.target_found());

        let hops = parser.finish();
        assert_eq!(hops.len(), 3);
        assert_eq!(hops[1], Hop::Timeout);
        assert_eq!(hops[2], Hop::Address(target));
        assert_eq!(hops[2].to_string(), "93.184.215.14");
    }

    #[test]
    fn test_max_hops_stops_parsing() {
        let mut parser = TracerouteParser::new("unknown.invalid", None, 2);
        assert!(parser.feed(" 1  10.0.0.1  1.0 ms").is_some());
        assert!(parser.feed(" 2  * * *").is_some());
        assert!(parser.is_finished());
        assert!(parser.feed(" 3  10.0.0.3  1.0 ms").is_none());
        // 已達上限，不再補目標
        assert_eq!(parser.finish().len(), 2);
    }

    #[test]
    fn test_unresolved_target_kept_as_text() {
        let parser = TracerouteParser::new("nas.lan", None, 15);
        assert_eq!(parser.finish(), vec![Hop::Unresolved("nas.lan".to_string())]);
    }

    #[test]
    fn test_command_arguments() {
        let (program, args) = traceroute_command("1.1.1.1", &TracerouteOptions::default());
        assert_eq!(args.last().map(String::as_str), Some("1.1.1.1"));
        if cfg!(windows) {
            assert_eq!(program, "tracert");
            assert!(args.contains(&"1000".to_string()));
        } else {
            assert_eq!(program, "traceroute");
            assert_eq!(&args[..3], &["-n", "-w", "1"]);
        }
    }
}
