//! Tun/route/DNS configuration the core hands off to the platform-specific
//! tun builder. The builder itself is out of scope for this workspace; this
//! is just the capture struct it consumes.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::network::Route;

/// Tun device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layer {
    /// IP-only (TUN).
    L3,
    /// Ethernet framing (TAP). Not supported by this core; see
    /// `TAP_NOT_SUPPORTED` in the error taxonomy.
    L2,
}

/// IPv4 tun address assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnIpv4 {
    /// Assigned address.
    pub address: Ipv4Addr,
    /// Prefix length.
    pub prefix: u8,
    /// Gateway address.
    pub gateway: Ipv4Addr,
    /// Whether the legacy net30 point-to-point topology is in use.
    pub net30: bool,
}

/// IPv6 tun address assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnIpv6 {
    /// Assigned address.
    pub address: Ipv6Addr,
    /// Prefix length.
    pub prefix: u8,
    /// Gateway address.
    pub gateway: Ipv6Addr,
}

/// `redirect-gateway`-style full-tunnel reroute instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerouteGateway {
    /// Reroute the IPv4 default route.
    pub ipv4: bool,
    /// Reroute the IPv6 default route.
    pub ipv6: bool,
    /// Raw flag bits as received (`def1`, `bypass-dhcp`, etc. are policy on
    /// top of this and not interpreted here).
    pub flags: u32,
}

/// Everything the core knows about how to configure the platform tun device,
/// assembled from the negotiated options and `PUSH_REPLY`. Fields not
/// applicable to a given session are left at their defaults/`None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunBuilderCapture {
    /// Tun device layer.
    pub layer: Option<Layer>,
    /// The remote endpoint's address, excluded from any full-tunnel reroute.
    pub remote_address: Option<IpAddr>,
    /// IPv4 tun assignment.
    pub vpn_ipv4: Option<VpnIpv4>,
    /// IPv6 tun assignment.
    pub vpn_ipv6: Option<VpnIpv6>,
    /// Tunnel MTU.
    pub mtu: Option<u32>,
    /// Routes to add.
    pub add_routes: Vec<Route>,
    /// Routes to exclude from a full-tunnel reroute.
    pub exclude_routes: Vec<Route>,
    /// Full-tunnel reroute instruction.
    pub reroute_gw: Option<RerouteGateway>,
    /// Block all IPv4 traffic outside the tunnel.
    pub block_ipv4: bool,
    /// Block all IPv6 traffic outside the tunnel.
    pub block_ipv6: bool,
    /// DNS servers to configure.
    pub dns_servers: Vec<IpAddr>,
    /// DNS search domains.
    pub search_domains: Vec<String>,
    /// WINS servers (legacy Windows option).
    pub wins_servers: Vec<IpAddr>,
    /// Adapter-level DNS suffix (Windows).
    pub adapter_domain_suffix: Option<String>,
    /// Proxy auto-config URL to configure.
    pub proxy_auto_config_url: Option<String>,
    /// Default metric for routes that don't specify one.
    pub route_metric_default: Option<u32>,
}
