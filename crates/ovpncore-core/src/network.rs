//! Network value types shared by the protocol core and its embedder.
//!
//! Address assignment policy (pools, leases) is server territory and lives
//! outside this workspace; these are just the value types the core needs to
//! describe a tun/route/DNS configuration to the application.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// VPN IP address assigned to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VpnAddress {
    /// IPv4 address (if assigned)
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 address (if assigned)
    pub ipv6: Option<Ipv6Addr>,
}

impl VpnAddress {
    /// Create with only IPv4
    pub fn v4(addr: Ipv4Addr) -> Self {
        Self {
            ipv4: Some(addr),
            ipv6: None,
        }
    }

    /// Create with only IPv6
    pub fn v6(addr: Ipv6Addr) -> Self {
        Self {
            ipv4: None,
            ipv6: Some(addr),
        }
    }

    /// Create with both IPv4 and IPv6
    pub fn dual(ipv4: Ipv4Addr, ipv6: Ipv6Addr) -> Self {
        Self {
            ipv4: Some(ipv4),
            ipv6: Some(ipv6),
        }
    }

    /// Get primary address (prefers IPv4)
    pub fn primary(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }
}

/// Route to be pushed to the client's tun setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Network/prefix to route
    pub network: IpNet,
    /// Gateway (None = use VPN gateway)
    pub gateway: Option<IpAddr>,
    /// Metric/priority
    pub metric: u32,
}

impl Route {
    /// Create a new route
    pub fn new(network: IpNet) -> Self {
        Self {
            network,
            gateway: None,
            metric: 0,
        }
    }

    /// Create default route (0.0.0.0/0)
    pub fn default_v4() -> Self {
        Self {
            network: "0.0.0.0/0".parse().unwrap(),
            gateway: None,
            metric: 0,
        }
    }

    /// Create default IPv6 route (::/0)
    pub fn default_v6() -> Self {
        Self {
            network: "::/0".parse().unwrap(),
            gateway: None,
            metric: 0,
        }
    }

    /// Set gateway
    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set metric
    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = metric;
        self
    }
}

/// DNS configuration pushed to the client's tun setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS servers
    pub servers: Vec<IpAddr>,
    /// Search domains
    pub search_domains: Vec<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            servers: vec![],
            search_domains: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route() {
        let route = Route::new("192.168.1.0/24".parse().unwrap())
            .with_gateway("10.8.0.1".parse().unwrap())
            .with_metric(100);

        assert_eq!(route.metric, 100);
        assert_eq!(route.gateway, Some("10.8.0.1".parse().unwrap()));
    }

    #[test]
    fn test_vpn_address_primary() {
        let addr = VpnAddress::dual("10.8.0.2".parse().unwrap(), "fd00::2".parse().unwrap());
        assert_eq!(addr.primary(), Some("10.8.0.2".parse().unwrap()));
    }
}
