use crate::utils::error::{MonitorError, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

fn mask_for(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn check_prefix(prefix: u8) -> Result<()> {
    if prefix > 32 {
        return Err(MonitorError::InvalidConfigValueError {
            field: "prefix".to_string(),
            value: prefix.to_string(),
            reason: "Prefix length must be between 0 and 32".to_string(),
        });
    }
    Ok(())
}

pub fn network_address(ip: Ipv4Addr, prefix: u8) -> Result<Ipv4Addr> {
    check_prefix(prefix)?;
    Ok(Ipv4Addr::from(u32::from(ip) & mask_for(prefix)))
}

/// "192.168.1.42", 24 -> "192.168.1.0/24"
pub fn subnet_cidr(ip: &str, prefix: u8) -> Result<String> {
    let addr = ip
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|e| MonitorError::InvalidConfigValueError {
            field: "ip".to_string(),
            value: ip.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Ipv4Subnet::new(addr, prefix)?.to_string())
}

pub fn slash24_of(ip: Ipv4Addr) -> Ipv4Subnet {
    Ipv4Subnet {
        network: Ipv4Addr::from(u32::from(ip) & mask_for(24)),
        prefix: 24,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Subnet {
    /// 主機位元會被清掉
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        Ok(Self {
            network: network_address(addr, prefix)?,
            prefix,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & mask_for(self.prefix) == u32::from(self.network)
    }

    /// 不含網路位址與廣播位址
    pub fn host_count(&self) -> u64 {
        let host_bits = 32 - u32::from(self.prefix);
        let total = 1u64 << host_bits;
        total.saturating_sub(2)
    }

    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let base = u32::from(self.network);
        let host_bits = 32 - u32::from(self.prefix);
        let max_hosts = (1u64 << host_bits) - 1;
        (1..max_hosts).map(move |host| Ipv4Addr::from(base | host as u32))
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Ipv4Subnet {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| MonitorError::InvalidConfigValueError {
            field: "subnet".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("Expected CIDR notation such as 192.168.1.0/24"))?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| invalid("Malformed IPv4 address"))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|_| invalid("Malformed prefix length"))?;
        Ipv4Subnet::new(addr, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_cidr() {
        assert_eq!(subnet_cidr("192.168.1.42", 24).unwrap(), "192.168.1.0/24");
        assert_eq!(subnet_cidr("10.20.30.40", 8).unwrap(), "10.0.0.0/8");
        assert_eq!(subnet_cidr("10.20.30.40", 0).unwrap(), "0.0.0.0/0");
        assert_eq!(subnet_cidr("10.20.30.40", 32).unwrap(), "10.20.30.40/32");
        assert!(subnet_cidr("10.20.30.40", 33).is_err());
        assert!(subnet_cidr("not-an-ip", 24).is_err());
    }

    #[test]
    fn test_contains() {
        let subnet: Ipv4Subnet = "192.168.1.77/24".parse().unwrap();
        assert_eq!(subnet.to_string(), "192.168.1.0/24");
        assert!(subnet.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!subnet.contains(Ipv4Addr::new(192, 168, 2, 1)));

        let everything: Ipv4Subnet = "0.0.0.0/0".parse().unwrap();
        assert!(everything.contains(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_hosts_skip_network_and_broadcast() {
        let subnet: Ipv4Subnet = "192.168.1.0/30".parse().unwrap();
        let hosts: Vec<_> = subnet.hosts().collect();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
        assert_eq!(subnet.host_count(), 2);

        let tiny: Ipv4Subnet = "192.168.1.0/31".parse().unwrap();
        assert_eq!(tiny.hosts().count(), 0);
        assert_eq!(tiny.host_count(), 0);

        let single: Ipv4Subnet = "192.168.1.9/32".parse().unwrap();
        assert_eq!(single.hosts().count(), 0);

        let lan: Ipv4Subnet = "10.0.0.0/24".parse().unwrap();
        assert_eq!(lan.hosts().count(), 254);
    }

    #[test]
    fn test_parse_errors() {
        assert!("192.168.1.0".parse::<Ipv4Subnet>().is_err());
        assert!("192.168.1.0/40".parse::<Ipv4Subnet>().is_err());
        assert!("192.168.1/24".parse::<Ipv4Subnet>().is_err());
    }

    #[test]
    fn test_prefix_is_checked_on_every_constructor() {
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        assert!(Ipv4Subnet::new(addr, 33).is_err());
        assert!(subnet_cidr("10.0.0.1", 40).is_err());

        let single = Ipv4Subnet::new(addr, 32).unwrap();
        assert_eq!(single.prefix(), 32);
        assert!(single.contains(addr));
    }

    #[test]
    fn test_slash24() {
        assert_eq!(
            slash24_of(Ipv4Addr::new(172, 16, 5, 9)).to_string(),
            "172.16.5.0/24"
        );
    }
}
