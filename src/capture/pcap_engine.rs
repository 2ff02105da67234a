use std::time::{Duration, Instant};

use log::{debug, info, warn};
use pcap::{Active, Capture, Device};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;
use thiserror::Error;

use crate::config::CaptureConfig;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Insufficient privileges to open '{0}'. Try: sudo setcap cap_net_raw,cap_net_admin=eip ./megaphone-relay")]
    InsufficientPrivileges(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Failed to open capture on '{interface}': {reason}")]
    Open { interface: String, reason: String },

    #[error("Capture filter '{filter}' rejected: {reason}")]
    Filter { filter: String, reason: String },

    #[error("Packet capture failed: {0}")]
    Read(String),
}

// libpcap data link types seen on the platforms we run on
const DLT_NULL: i32 = 0;
const DLT_EN10MB: i32 = 1;
const DLT_RAW: i32 = 12;
const DLT_RAW_OPENBSD: i32 = 14;
const LINKTYPE_RAW: i32 = 101;
const DLT_LOOP: i32 = 108;
const DLT_LINUX_SLL: i32 = 113;
const DLT_IPV4: i32 = 228;
const DLT_IPV6: i32 = 229;

const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;

const PROBE_SNAPLEN: i32 = 1600;
const PROBE_READ_TIMEOUT_MS: i32 = 100;

/// Transport payload of one captured TCP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub bytes_captured: u64,
    pub non_tcp_frames: u64,
}

/// Copies the TCP payload out of a link-layer frame.
///
/// Returns `None` for frames that are not TCP over IPv4/IPv6 or whose link
/// type is not handled.
pub fn tcp_payload(linktype: i32, frame: &[u8]) -> Option<Vec<u8>> {
    match linktype {
        DLT_EN10MB => {
            let ethernet = EthernetPacket::new(frame)?;
            ethertype_payload(ethernet.get_ethertype(), ethernet.payload())
        }
        DLT_LINUX_SLL => {
            let header = frame.get(..SLL_HEADER_LEN)?;
            let ethertype = EtherType(u16::from_be_bytes([header[14], header[15]]));
            ethertype_payload(ethertype, &frame[SLL_HEADER_LEN..])
        }
        DLT_RAW | DLT_RAW_OPENBSD | LINKTYPE_RAW | DLT_IPV4 | DLT_IPV6 => ip_payload(frame),
        DLT_NULL | DLT_LOOP => ip_payload(frame.get(NULL_HEADER_LEN..)?),
        _ => None,
    }
}

fn ethertype_payload(ethertype: EtherType, data: &[u8]) -> Option<Vec<u8>> {
    match ethertype {
        EtherTypes::Ipv4 => ipv4_tcp_payload(data),
        EtherTypes::Ipv6 => ipv6_tcp_payload(data),
        _ => None,
    }
}

fn ip_payload(data: &[u8]) -> Option<Vec<u8>> {
    match data.first()? >> 4 {
        4 => ipv4_tcp_payload(data),
        6 => ipv6_tcp_payload(data),
        _ => None,
    }
}

fn ipv4_tcp_payload(data: &[u8]) -> Option<Vec<u8>> {
    let ipv4 = Ipv4Packet::new(data)?;
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let tcp = TcpPacket::new(ipv4.payload())?;
    Some(tcp.payload().to_vec())
}

fn ipv6_tcp_payload(data: &[u8]) -> Option<Vec<u8>> {
    let ipv6 = Ipv6Packet::new(data)?;
    if ipv6.get_next_header() != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let tcp = TcpPacket::new(ipv6.payload())?;
    Some(tcp.payload().to_vec())
}

/// Live capture handle on the game port.
pub struct LiveCapture {
    capture: Capture<Active>,
    linktype: i32,
    interface: String,
    stats: CaptureStats,
}

impl LiveCapture {
    /// Opens `interface` with no read timeout and installs the port filter.
    pub fn open(interface: &str, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let filter = config.filter();
        info!("Opening capture on interface: {}", interface);

        let inactive = Capture::from_device(Device::from(interface))
            .map_err(|e| CaptureError::Device(format!("{}: {}", interface, e)))?;

        let mut capture = inactive
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .immediate_mode(true)
            .open()
            .map_err(|e| open_error(interface, e))?;

        capture.filter(&filter, true).map_err(|e| CaptureError::Filter {
            filter: filter.clone(),
            reason: e.to_string(),
        })?;

        let linktype = capture.get_datalink().0;
        info!("Started capture with filter: {} (link type {})", filter, linktype);

        Ok(Self {
            capture,
            linktype,
            interface: interface.to_string(),
            stats: CaptureStats::default(),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Frames received and dropped as reported by libpcap.
    pub fn kernel_stats(&mut self) -> Option<(u32, u32)> {
        self.capture.stats().ok().map(|s| (s.received, s.dropped))
    }

    /// Blocks until the next TCP segment arrives.
    ///
    /// Frames that do not carry TCP are counted and skipped. `Ok(None)` means the
    /// handle has no more packets.
    pub fn next_segment(&mut self) -> Result<Option<CapturedPacket>, CaptureError> {
        loop {
            match self.capture.next_packet() {
                Ok(packet) => {
                    self.stats.frames_captured += 1;
                    self.stats.bytes_captured += packet.data.len() as u64;
                    match tcp_payload(self.linktype, packet.data) {
                        Some(payload) => return Ok(Some(CapturedPacket { payload })),
                        None => self.stats.non_tcp_frames += 1,
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return Ok(None),
                Err(e) => return Err(CaptureError::Read(e.to_string())),
            }
        }
    }
}

fn open_error(interface: &str, e: pcap::Error) -> CaptureError {
    let reason = e.to_string();
    let lowered = reason.to_lowercase();
    if lowered.contains("permission") || lowered.contains("operation not permitted") {
        CaptureError::InsufficientPrivileges(interface.to_string())
    } else {
        CaptureError::Open {
            interface: interface.to_string(),
            reason,
        }
    }
}

pub fn list_devices() -> Result<Vec<Device>, CaptureError> {
    Device::list().map_err(|e| CaptureError::Device(format!("Failed to list devices: {}", e)))
}

/// Listens on `interface` for up to `timeout`, returning whether any TCP
/// segment with a non-empty payload went by. The probe handle is closed before
/// returning.
pub fn probe_for_traffic(interface: &str, timeout: Duration) -> Result<bool, CaptureError> {
    let mut capture = Capture::from_device(Device::from(interface))
        .map_err(|e| CaptureError::Device(format!("{}: {}", interface, e)))?
        .promisc(true)
        .snaplen(PROBE_SNAPLEN)
        .timeout(PROBE_READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()
        .map_err(|e| open_error(interface, e))?;

    // only tcp, to cut the noise; a rejected filter just means more frames to skip
    if let Err(e) = capture.filter("tcp", true) {
        debug!("Probe filter rejected on {}: {}", interface, e);
    }
    let linktype = capture.get_datalink().0;

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match capture.next_packet() {
            Ok(packet) => {
                if tcp_payload(linktype, packet.data).is_some_and(|p| !p.is_empty()) {
                    return Ok(true);
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                warn!("Probe capture on {} ended early: {}", interface, e);
                return Ok(false);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds an Ethernet/IPv4/TCP frame around `payload`.
    fn ethernet_tcp_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend(ipv4_tcp_packet(payload));
        frame
    }

    fn ipv4_tcp_packet(payload: &[u8]) -> Vec<u8> {
        let total_len = (20 + 20 + payload.len()) as u16;
        let mut packet = vec![0x45, 0x00];
        packet.extend_from_slice(&total_len.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0x40, 0, 64, 6, 0, 0]);
        packet.extend_from_slice(&[192, 168, 1, 20]);
        packet.extend_from_slice(&[203, 0, 113, 7]);
        packet.extend(tcp_segment(payload));
        packet
    }

    fn tcp_segment(payload: &[u8]) -> Vec<u8> {
        let mut segment = Vec::new();
        segment.extend_from_slice(&32800u16.to_be_bytes());
        segment.extend_from_slice(&51000u16.to_be_bytes());
        segment.extend_from_slice(&1u32.to_be_bytes());
        segment.extend_from_slice(&0u32.to_be_bytes());
        segment.extend_from_slice(&[0x50, 0x18, 0xff, 0xff, 0, 0, 0, 0]);
        segment.extend_from_slice(payload);
        segment
    }

    #[test]
    fn test_ethernet_frame_payload() {
        let frame = ethernet_tcp_frame(b"MegaphoneDataText hi");
        assert_eq!(tcp_payload(DLT_EN10MB, &frame), Some(b"MegaphoneDataText hi".to_vec()));
    }

    #[test]
    fn test_empty_tcp_payload() {
        let frame = ethernet_tcp_frame(b"");
        assert_eq!(tcp_payload(DLT_EN10MB, &frame), Some(Vec::new()));
    }

    #[test]
    fn test_raw_ip_and_loopback_frames() {
        let packet = ipv4_tcp_packet(b"abc");
        assert_eq!(tcp_payload(DLT_RAW, &packet), Some(b"abc".to_vec()));

        let mut looped = 2u32.to_ne_bytes().to_vec();
        looped.extend_from_slice(&packet);
        assert_eq!(tcp_payload(DLT_NULL, &looped), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_linux_cooked_frame() {
        let mut frame = vec![0u8; 14];
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend(ipv4_tcp_packet(b"xyz"));
        assert_eq!(tcp_payload(DLT_LINUX_SLL, &frame), Some(b"xyz".to_vec()));
    }

    #[test]
    fn test_non_tcp_is_skipped() {
        let mut packet = ipv4_tcp_packet(b"abc");
        packet[9] = 17; // udp
        assert_eq!(tcp_payload(DLT_RAW, &packet), None);
        assert_eq!(tcp_payload(DLT_EN10MB, &[0u8; 6]), None);
        assert_eq!(tcp_payload(9999, &packet), None);
    }
}
