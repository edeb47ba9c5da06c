use crate::core::subnet::Ipv4Subnet;
use crate::domain::ports::CommandRunner;
use crate::utils::error::{MonitorError, Result};
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;
use sysinfo::Networks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub addr: Ipv4Addr,
    pub prefix: u8,
    pub mac: Option<String>,
}

impl LocalInterface {
    pub fn subnet(&self) -> Option<Ipv4Subnet> {
        Ipv4Subnet::new(self.addr, self.prefix).ok()
    }

    pub fn is_loopback(&self) -> bool {
        self.addr.is_loopback()
    }
}

/// 列出所有 IPv4 介面，依名稱排序
pub fn list_ipv4_interfaces() -> Vec<LocalInterface> {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces = Vec::new();

    for (name, data) in &networks {
        let mac = data.mac_address();
        let mac = (!mac.is_unspecified()).then(|| mac.to_string());
        for network in data.ip_networks() {
            if let IpAddr::V4(addr) = network.addr {
                interfaces.push(LocalInterface {
                    name: name.clone(),
                    addr,
                    prefix: network.prefix,
                    mac: mac.clone(),
                });
            }
        }
    }

    interfaces.sort_by(|a, b| a.name.cmp(&b.name).then(a.addr.cmp(&b.addr)));
    interfaces
}

/// 第一個非 loopback 的 IPv4 介面
pub fn primary_interface(interfaces: &[LocalInterface]) -> Result<LocalInterface> {
    interfaces
        .iter()
        .find(|i| !i.is_loopback() && !i.addr.is_link_local() && i.prefix < 32)
        .cloned()
        .ok_or_else(|| MonitorError::InterfaceError {
            message: "No suitable interface with IPv4 address".to_string(),
        })
}

/// 目的位址落在哪個本機介面的子網路
pub fn interface_for(dest: Ipv4Addr, interfaces: &[LocalInterface]) -> Option<&LocalInterface> {
    interfaces
        .iter()
        .find(|i| i.subnet().is_some_and(|s| s.contains(dest)))
}

static LINUX_DEFAULT_ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^default\s+via\s+(\d{1,3}(?:\.\d{1,3}){3})").expect("valid regex")
});
static MAC_GATEWAY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^gateway:\s*(\d{1,3}(?:\.\d{1,3}){3})").expect("valid regex")
});

/// 解析 `route PRINT 0.0.0.0` / `ip route show default` / `route -n get default` 的輸出
pub fn parse_default_gateway(output: &str) -> Option<Ipv4Addr> {
    for line in output.lines() {
        let line = line.trim();

        // Windows: Network Destination | Netmask | Gateway | Interface | Metric
        if line.starts_with("0.0.0.0") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                if let Ok(ip) = parts[2].parse::<Ipv4Addr>() {
                    return Some(ip);
                }
            }
            continue;
        }

        if let Some(caps) = LINUX_DEFAULT_ROUTE.captures(line) {
            if let Ok(ip) = caps[1].parse::<Ipv4Addr>() {
                return Some(ip);
            }
        }

        if let Some(caps) = MAC_GATEWAY_LINE.captures(line) {
            if let Ok(ip) = caps[1].parse::<Ipv4Addr>() {
                return Some(ip);
            }
        }
    }
    None
}

fn default_gateway_command() -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("route", vec!["PRINT".to_string(), "0.0.0.0".to_string()])
    } else if cfg!(target_os = "macos") {
        (
            "route",
            vec!["-n".to_string(), "get".to_string(), "default".to_string()],
        )
    } else {
        (
            "ip",
            vec!["route".to_string(), "show".to_string(), "default".to_string()],
        )
    }
}

pub async fn default_gateway(runner: &dyn CommandRunner) -> Option<Ipv4Addr> {
    let (program, args) = default_gateway_command();
    match runner.run(program, &args).await {
        Ok(output) => {
            let gateway = parse_default_gateway(&output);
            if gateway.is_none() {
                tracing::warn!("⚠️ Could not find a default route in '{}' output", program);
            }
            gateway
        }
        Err(e) => {
            tracing::warn!("⚠️ Default gateway lookup failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, addr: [u8; 4], prefix: u8) -> LocalInterface {
        LocalInterface {
            name: name.to_string(),
            addr: Ipv4Addr::from(addr),
            prefix,
            mac: None,
        }
    }

    #[test]
    fn test_parse_windows_route_print() {
        let output = r#"
===========================================================================
IPv4 Route Table
===========================================================================
Active Routes:
Network Destination        Netmask          Gateway       Interface  Metric
          0.0.0.0          0.0.0.0      192.168.1.1    192.168.1.23     25
===========================================================================
"#;
        assert_eq!(
            parse_default_gateway(output),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
    }

    #[test]
    fn test_parse_linux_and_macos_routes() {
        let linux = "default via 10.0.0.1 dev wlan0 proto dhcp metric 600\n";
        assert_eq!(parse_default_gateway(linux), Some(Ipv4Addr::new(10, 0, 0, 1)));

        let macos = "   route to: default\ndestination: default\n    gateway: 172.20.10.1\n  interface: en0\n";
        assert_eq!(
            parse_default_gateway(macos),
            Some(Ipv4Addr::new(172, 20, 10, 1))
        );

        assert_eq!(parse_default_gateway("nothing useful"), None);
    }

    #[test]
    fn test_interface_for_destination() {
        let interfaces = vec![
            iface("lo", [127, 0, 0, 1], 8),
            iface("eth0", [192, 168, 1, 23], 24),
            iface("wg0", [10, 8, 0, 2], 24),
        ];
        assert_eq!(
            interface_for(Ipv4Addr::new(10, 8, 0, 9), &interfaces).map(|i| i.name.as_str()),
            Some("wg0")
        );
        assert!(interface_for(Ipv4Addr::new(8, 8, 8, 8), &interfaces).is_none());
        assert_eq!(primary_interface(&interfaces).unwrap().name, "eth0");
        assert!(primary_interface(&interfaces[..1]).is_err());
    }
}
