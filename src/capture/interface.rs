// Picks the interface the game traffic flows through by walking down from the
// OS routing choice to live TCP traffic, adapter names, and finally the first
// listed interface.

use std::fmt;
use std::io;
use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use super::pcap_engine::{self, CaptureError};

/// Public address used to make the OS pick a route; nothing is sent to it.
pub const ROUTE_PROBE_TARGET: &str = "8.8.8.8:80";

const VIRTUAL_PATTERNS: [&str; 4] = ["wan miniport", "bluetooth", "virtual", "tunnel"];
const PHYSICAL_PATTERNS: [&str; 4] = ["intel", "realtek", "wifi", "ethernet"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectError {
    #[error("No capture interface found")]
    NoInterfaceFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<IpAddr>,
}

impl InterfaceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            addresses: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_address(mut self, addr: IpAddr) -> Self {
        self.addresses.push(addr);
        self
    }

    fn matches_any(&self, patterns: &[&str]) -> bool {
        let haystack = format!(
            "{} {}",
            self.name,
            self.description.as_deref().unwrap_or_default()
        )
        .to_lowercase();
        patterns.iter().any(|pattern| haystack.contains(pattern))
    }

    pub fn looks_virtual(&self) -> bool {
        self.matches_any(&VIRTUAL_PATTERNS)
    }

    pub fn looks_physical(&self) -> bool {
        self.matches_any(&PHYSICAL_PATTERNS)
    }

    pub fn owns(&self, addr: IpAddr) -> bool {
        self.addresses.contains(&addr)
    }
}

impl From<pcap::Device> for InterfaceDescriptor {
    fn from(device: pcap::Device) -> Self {
        Self {
            name: device.name,
            description: device.desc,
            addresses: device.addresses.into_iter().map(|a| a.addr).collect(),
        }
    }
}

impl fmt::Display for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(description) = &self.description {
            write!(f, " ({})", description)?;
        }
        if !self.addresses.is_empty() {
            let addrs: Vec<String> = self.addresses.iter().map(|a| a.to_string()).collect();
            write!(f, " [{}]", addrs.join(", "))?;
        }
        Ok(())
    }
}

/// Platform operations the selector relies on.
pub trait NetworkProbe {
    /// Local address the OS would use for outbound traffic.
    fn outbound_ip(&self) -> io::Result<IpAddr>;

    fn interfaces(&self) -> Result<Vec<InterfaceDescriptor>, CaptureError>;

    /// Whether a TCP segment with payload shows up on `interface` within `timeout`.
    fn has_tcp_traffic(&self, interface: &InterfaceDescriptor, timeout: Duration) -> bool;
}

/// [`NetworkProbe`] backed by the OS socket layer and libpcap.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcapProbe;

impl NetworkProbe for PcapProbe {
    fn outbound_ip(&self) -> io::Result<IpAddr> {
        // connect() on UDP only binds a route, no datagram leaves the host
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(ROUTE_PROBE_TARGET)?;
        Ok(socket.local_addr()?.ip())
    }

    fn interfaces(&self) -> Result<Vec<InterfaceDescriptor>, CaptureError> {
        Ok(pcap_engine::list_devices()?
            .into_iter()
            .map(InterfaceDescriptor::from)
            .collect())
    }

    fn has_tcp_traffic(&self, interface: &InterfaceDescriptor, timeout: Duration) -> bool {
        match pcap_engine::probe_for_traffic(&interface.name, timeout) {
            Ok(seen) => seen,
            Err(e) => {
                debug!("Skipping {} during traffic probe: {}", interface.name, e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    OutboundRoute,
    ActiveTraffic,
    NameHeuristic,
    FirstListed,
}

impl fmt::Display for SelectionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionTier::OutboundRoute => write!(f, "outbound route"),
            SelectionTier::ActiveTraffic => write!(f, "active traffic"),
            SelectionTier::NameHeuristic => write!(f, "adapter name"),
            SelectionTier::FirstListed => write!(f, "first listed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub interface: InterfaceDescriptor,
    pub tier: SelectionTier,
}

pub struct InterfaceSelector<P> {
    probe: P,
    probe_timeout: Duration,
}

impl<P: NetworkProbe> InterfaceSelector<P> {
    pub fn new(probe: P, probe_timeout: Duration) -> Self {
        Self {
            probe,
            probe_timeout,
        }
    }

    pub fn select(&self) -> Result<Selection, SelectError> {
        let tiers: [(SelectionTier, fn(&Self) -> Option<InterfaceDescriptor>); 4] = [
            (SelectionTier::OutboundRoute, Self::by_outbound_route),
            (SelectionTier::ActiveTraffic, Self::by_active_traffic),
            (SelectionTier::NameHeuristic, Self::by_adapter_name),
            (SelectionTier::FirstListed, Self::first_listed),
        ];

        for (tier, pick) in tiers {
            if let Some(interface) = pick(self) {
                info!("Selected interface {} by {}", interface, tier);
                return Ok(Selection { interface, tier });
            }
            debug!("No interface found by {}", tier);
        }
        Err(SelectError::NoInterfaceFound)
    }

    fn list(&self) -> Vec<InterfaceDescriptor> {
        self.probe.interfaces().unwrap_or_else(|e| {
            warn!("Could not enumerate interfaces: {}", e);
            Vec::new()
        })
    }

    fn by_outbound_route(&self) -> Option<InterfaceDescriptor> {
        let ip = match self.probe.outbound_ip() {
            Ok(ip) if !ip.is_unspecified() => ip,
            Ok(_) => return None,
            Err(e) => {
                warn!("Outbound route probe failed: {}", e);
                return None;
            }
        };
        debug!("Outbound traffic leaves through {}", ip);
        self.list().into_iter().find(|iface| iface.owns(ip))
    }

    fn by_active_traffic(&self) -> Option<InterfaceDescriptor> {
        self.list()
            .into_iter()
            .filter(|iface| {
                let skip = iface.looks_virtual();
                if skip {
                    debug!("Not probing virtual adapter {}", iface.name);
                }
                !skip
            })
            .find(|iface| {
                debug!("Probing {} for TCP traffic", iface.name);
                self.probe.has_tcp_traffic(iface, self.probe_timeout)
            })
    }

    fn by_adapter_name(&self) -> Option<InterfaceDescriptor> {
        self.list().into_iter().find(InterfaceDescriptor::looks_physical)
    }

    fn first_listed(&self) -> Option<InterfaceDescriptor> {
        self.list().into_iter().next()
    }
}

/// Runs the full selection ladder against the live system.
pub fn select_interface(probe_timeout: Duration) -> Result<String, SelectError> {
    InterfaceSelector::new(PcapProbe, probe_timeout)
        .select()
        .map(|selection| selection.interface.name)
}
