//! Local address discovery for the advertiser

use if_addrs::IfAddr;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Advertised in place of an address when none can be found
pub const COULD_NOT_DETERMINE: &str = "could not determine IP address";

/// An IPv4 address of this machine together with its subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInterface {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl LocalInterface {
    pub fn new(ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { ip, netmask }
    }

    /// Directed broadcast address of this interface's subnet
    pub fn broadcast(&self) -> Ipv4Addr {
        broadcast_address(self.ip, self.netmask)
    }
}

/// Finds the interface readers should use to reach this machine
///
/// Called once per advertisement tick from a blocking context.
pub trait LocalAddressResolver: Send + Sync {
    fn local_interface(&self) -> Option<LocalInterface>;
}

/// Reads the host's interfaces, preferring the one that carries outbound traffic
#[derive(Debug, Default)]
pub struct HostAddressResolver {
    /// Address chosen on the previous call, so changes are logged once
    last: Mutex<Option<Ipv4Addr>>,
}

impl HostAddressResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-loopback IPv4 interfaces, sorted by address
    fn interfaces() -> Vec<LocalInterface> {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("Could not list network interfaces: {}", e);
                return Vec::new();
            }
        };

        let mut found: Vec<LocalInterface> = interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .filter_map(|iface| match iface.addr {
                IfAddr::V4(v4) if !v4.ip.is_unspecified() => {
                    Some(LocalInterface::new(v4.ip, v4.netmask))
                }
                _ => None,
            })
            .collect();
        found.sort_by_key(|iface| iface.ip);
        found.dedup_by_key(|iface| iface.ip);
        found
    }

    /// Source address the OS would pick for outbound traffic
    ///
    /// Connecting a UDP socket sends nothing; it only selects a route.
    fn routed_address() -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(("8.8.8.8", 65530)).ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
            _ => None,
        }
    }

    fn note_choice(&self, chosen: Option<LocalInterface>, candidates: &[LocalInterface]) {
        let ip = chosen.map(|iface| iface.ip);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if *last == ip {
            return;
        }
        *last = ip;

        match chosen {
            Some(iface) if candidates.len() > 1 => warn!(
                "Found {} IPv4 interfaces ({:?}), advertising {}/{}",
                candidates.len(),
                candidates.iter().map(|c| c.ip).collect::<Vec<_>>(),
                iface.ip,
                iface.netmask
            ),
            Some(iface) => info!("Advertising from {}/{}", iface.ip, iface.netmask),
            None => warn!("No usable IPv4 interface found"),
        }
    }
}

impl LocalAddressResolver for HostAddressResolver {
    fn local_interface(&self) -> Option<LocalInterface> {
        let candidates = Self::interfaces();
        let chosen = select_interface(&candidates, Self::routed_address());
        self.note_choice(chosen, &candidates);
        chosen
    }
}

/// Pick one interface out of the candidates
///
/// The interface owning the routed address wins when there is one. Otherwise
/// the lowest address is used.
pub fn select_interface(
    candidates: &[LocalInterface],
    routed: Option<Ipv4Addr>,
) -> Option<LocalInterface> {
    routed
        .and_then(|ip| candidates.iter().find(|iface| iface.ip == ip))
        .or_else(|| candidates.first())
        .copied()
}

/// Directed broadcast address for `ip` within the subnet `mask`
pub fn broadcast_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_address() {
        let ip = Ipv4Addr::new(192, 168, 1, 37);
        assert_eq!(
            broadcast_address(ip, Ipv4Addr::new(255, 255, 255, 0)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            broadcast_address(Ipv4Addr::new(10, 4, 3, 2), Ipv4Addr::new(255, 255, 240, 0)),
            Ipv4Addr::new(10, 4, 15, 255)
        );
        assert_eq!(
            broadcast_address(ip, Ipv4Addr::new(255, 255, 255, 255)),
            ip
        );
    }

    #[test]
    fn test_select_prefers_routed() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let a = LocalInterface::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 0, 0, 0));
        let b = LocalInterface::new(Ipv4Addr::new(192, 168, 0, 9), mask);

        assert_eq!(select_interface(&[a, b], Some(b.ip)), Some(b));
        assert_eq!(select_interface(&[a, b], None), Some(a));
        assert_eq!(
            select_interface(&[a, b], Some(Ipv4Addr::new(172, 16, 0, 1))),
            Some(a)
        );
        assert_eq!(select_interface(&[], Some(b.ip)), None);
        assert_eq!(b.broadcast(), Ipv4Addr::new(192, 168, 0, 255));
    }

    #[test]
    fn test_choice_is_remembered() {
        let resolver = HostAddressResolver::new();
        let iface = LocalInterface::new(Ipv4Addr::new(192, 168, 0, 9), Ipv4Addr::new(255, 255, 255, 0));

        resolver.note_choice(Some(iface), &[iface]);
        resolver.note_choice(Some(iface), &[iface]);
        assert_eq!(*resolver.last.lock().unwrap(), Some(iface.ip));

        resolver.note_choice(None, &[]);
        assert_eq!(*resolver.last.lock().unwrap(), None);
    }
}
