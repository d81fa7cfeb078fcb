use local_ip_address::list_afinet_netifas;
use std::net::{IpAddr, Ipv4Addr};
use systemstat::{Platform, System};
use tracing::{debug, warn};

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Iterates over all network interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses. When `systemstat` cannot list
/// the networks, the interface table from `local-ip-address` is used instead.
///
/// ## Returns
///
/// * `Some(IpAddr)`: The first routable network interface.
/// * `None`: The host exposes no usable IPv4 address.
pub fn select_host_address() -> Option<IpAddr> {
    let system = System::new();
    match system.networks() {
        Ok(networks) => {
            for net in networks.values() {
                for n in &net.addrs {
                    if let systemstat::IpAddr::V4(v) = n.addr {
                        if is_routable(&v) {
                            return Some(IpAddr::V4(v));
                        }
                    }
                }
            }
        }
        Err(e) => warn!("Failed to query networks: {}", e),
    }

    first_interface_address()
}

fn first_interface_address() -> Option<IpAddr> {
    let network_interfaces = match list_afinet_netifas() {
        Ok(n) => n,
        Err(e) => {
            warn!("Failed to list network interfaces: {}", e);
            return None;
        }
    };

    for (name, ip) in network_interfaces {
        debug!("iface: {} / {:?}", name, ip);
        if let IpAddr::V4(ip4) = ip {
            if is_routable(&ip4) {
                return Some(ip);
            }
        }
    }

    None
}

fn is_routable(v: &Ipv4Addr) -> bool {
    !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() && !v.is_unspecified()
}
