//! DhcpHunter: rogue DHCPv4 server detection.
//!
//! Any server-to-client DHCP frame (UDP 67 -> 68) from a source that is on
//! neither the trusted-MAC set nor a trusted CIDR is someone handing out
//! leases who should not be. The allow-list is normalised once at
//! construction; the hot path does an O(1) set probe and only falls back
//! to the linear CIDR scan when that misses.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use ipnetwork::Ipv4Network;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::DhcpHunterConfig;
use crate::mac_class::{format_mac, parse_mac};
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_UDP: u8 = 17;
const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;

/// One alert per window; rogue servers beacon constantly.
const ALERT_COOLDOWN: Duration = Duration::from_secs(10);

pub struct DhcpHunter {
    iface: String,
    notify: Arc<Notifier>,
    trusted_macs: HashSet<[u8; 6]>,
    trusted_nets: Vec<Ipv4Network>,
    last_alert: Mutex<Option<Instant>>,
}

impl DhcpHunter {
    pub fn new(cfg: &DhcpHunterConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let mut trusted_macs = HashSet::new();
        for raw in cfg.effective_macs(&ctx.name) {
            let clean = raw.trim().to_lowercase();
            match parse_mac(&clean) {
                Some(mac) => {
                    trusted_macs.insert(mac);
                }
                None => warn!("[DhcpHunter:{}] invalid trusted MAC ignored: '{raw}'", ctx.name),
            }
        }

        let mut trusted_nets = Vec::new();
        for raw in cfg.effective_cidrs(&ctx.name) {
            match raw.trim().parse::<Ipv4Network>() {
                Ok(net) => trusted_nets.push(net),
                Err(_) => warn!("[DhcpHunter:{}] invalid trusted CIDR ignored: '{raw}'", ctx.name),
            }
        }

        info!(
            "[DhcpHunter:{}] active, allow-list: {} MACs, {} subnets",
            ctx.name,
            trusted_macs.len(),
            trusted_nets.len()
        );

        Self {
            iface: ctx.name.clone(),
            notify,
            trusted_macs,
            trusted_nets,
            last_alert: Mutex::new(None),
        }
    }
}

impl Detector for DhcpHunter {
    fn name(&self) -> &'static str {
        "DhcpHunter"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, _shutdown: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];

        let (ip_offset, et_off) = if vlan_id != 0 { (18, 16) } else { (14, 12) };
        if data.len() < ip_offset + 20 {
            return;
        }
        if u16::from_be_bytes([data[et_off], data[et_off + 1]]) != ETHERTYPE_IPV4 {
            return;
        }

        // IHL is the low nibble of the first IP byte, in 32-bit words
        let ihl = ((data[ip_offset] & 0x0f) as usize) * 4;
        if ihl < 20 {
            return;
        }
        if data[ip_offset + 9] != IP_PROTO_UDP {
            return;
        }

        let src_ip = Ipv4Addr::new(
            data[ip_offset + 12],
            data[ip_offset + 13],
            data[ip_offset + 14],
            data[ip_offset + 15],
        );

        let udp_offset = ip_offset + ihl;
        if data.len() < udp_offset + 8 {
            return;
        }
        let src_port = u16::from_be_bytes([data[udp_offset], data[udp_offset + 1]]);
        let dst_port = u16::from_be_bytes([data[udp_offset + 2], data[udp_offset + 3]]);

        if (src_port, dst_port) != (DHCP_SERVER_PORT, DHCP_CLIENT_PORT) {
            return;
        }

        let mut src_mac = [0u8; 6];
        src_mac.copy_from_slice(&data[6..12]);

        let trusted = self.trusted_macs.contains(&src_mac)
            || self.trusted_nets.iter().any(|net| net.contains(src_ip));
        if trusted {
            return;
        }

        let now = Instant::now();
        {
            let mut last = self.last_alert.lock();
            if !cooldown_over(*last, ALERT_COOLDOWN, now) {
                return;
            }
            *last = Some(now);
        }

        telemetry::engine_hit(&self.iface, "DhcpHunter", "RogueServer");
        let vlan = if vlan_id != 0 {
            vlan_id.to_string()
        } else {
            "Native".to_string()
        };
        self.notify.alert(format!(
            "[DhcpHunter] ROGUE DHCP SERVER DETECTED!\n    VLAN:      {}\n    ROGUE MAC: {}\n    ROGUE IP:  {}\n    ACTION:    Investigate immediately, possible man-in-the-middle.",
            vlan,
            format_mac(&src_mac),
            src_ip
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DampeningConfig, DhcpHunterOverride};
    use tokio::sync::mpsc;

    fn hunter(macs: &[&str], cidrs: &[&str]) -> (DhcpHunter, mpsc::Receiver<String>) {
        let cfg = DhcpHunterConfig {
            enabled: true,
            trusted_macs: macs.iter().map(|s| s.to_string()).collect(),
            trusted_cidrs: cidrs.iter().map(|s| s.to_string()).collect(),
            overrides: Default::default(),
        };
        let (notify, rx) = Notifier::new("test", &DampeningConfig::default());
        let ctx = IfaceContext {
            name: "eno1".to_string(),
            hw_addr: [0x02, 0, 0, 0, 0, 1],
            snaplen: 2048,
        };
        (DhcpHunter::new(&cfg, notify, &ctx), rx)
    }

    /// Untagged IPv4/UDP frame with a 20-byte IP header.
    fn udp_frame(src_mac: [u8; 6], src_ip: Ipv4Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 64];
        frame[0..6].copy_from_slice(&[0xff; 6]);
        frame[6..12].copy_from_slice(&src_mac);
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame[14] = 0x45; // version 4, IHL 5
        frame[23] = IP_PROTO_UDP;
        frame[26..30].copy_from_slice(&src_ip.octets());
        frame[34..36].copy_from_slice(&src_port.to_be_bytes());
        frame[36..38].copy_from_slice(&dst_port.to_be_bytes());
        frame
    }

    #[test]
    fn test_rogue_server_detected() {
        // S6: untrusted server-to-client frame names MAC and IP
        let (dh, mut rx) = hunter(&["00:11:22:33:44:55"], &["192.168.1.0/24"]);
        let frame = udp_frame(
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01],
            Ipv4Addr::new(10, 9, 9, 9),
            67,
            68,
        );

        dh.on_frame(&frame, frame.len(), 0);

        let alert = rx.try_recv().unwrap();
        assert!(alert.contains("ROGUE DHCP SERVER"));
        assert!(alert.contains("de:ad:be:ef:00:01"));
        assert!(alert.contains("10.9.9.9"));
    }

    #[test]
    fn test_trusted_mac_ignored() {
        let (dh, mut rx) = hunter(&["00:11:22:33:44:55"], &[]);
        let frame = udp_frame(
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            Ipv4Addr::new(10, 9, 9, 9),
            67,
            68,
        );

        dh.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_trusted_cidr_ignored() {
        let (dh, mut rx) = hunter(&[], &["192.168.1.0/24"]);
        let frame = udp_frame(
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x02],
            Ipv4Addr::new(192, 168, 1, 50),
            67,
            68,
        );

        dh.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_client_to_server_ignored() {
        let (dh, mut rx) = hunter(&[], &[]);
        let frame = udp_frame(
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x03],
            Ipv4Addr::new(0, 0, 0, 0),
            68,
            67,
        );

        dh.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cooldown_gates_repeat_alerts() {
        let (dh, mut rx) = hunter(&[], &[]);
        let frame = udp_frame(
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x04],
            Ipv4Addr::new(10, 0, 0, 1),
            67,
            68,
        );

        dh.on_frame(&frame, frame.len(), 0);
        dh.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        *dh.last_alert.lock() = Some(Instant::now() - Duration::from_secs(11));
        dh.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_vlan_tagged_frame_parsed() {
        let (dh, mut rx) = hunter(&[], &[]);
        let untagged = udp_frame(
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x05],
            Ipv4Addr::new(10, 0, 0, 2),
            67,
            68,
        );
        let mut tagged = Vec::with_capacity(untagged.len() + 4);
        tagged.extend_from_slice(&untagged[0..12]);
        tagged.extend_from_slice(&[0x81, 0x00, 0x00, 0x14]); // VLAN 20
        tagged.extend_from_slice(&untagged[12..]);

        dh.on_frame(&tagged, tagged.len(), 20);

        let alert = rx.try_recv().unwrap();
        assert!(alert.contains("VLAN:      20"));
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let (dh, _rx) = hunter(
            &["00:11:22:33:44:55", "not-a-mac", "  AA:BB:CC:DD:EE:FF  "],
            &["192.168.1.0/24", "not/a/cidr", "300.0.0.0/8"],
        );
        assert_eq!(dh.trusted_macs.len(), 2);
        assert_eq!(dh.trusted_nets.len(), 1);
    }

    #[test]
    fn test_override_macs_append() {
        let mut cfg = DhcpHunterConfig {
            enabled: true,
            trusted_macs: vec!["00:11:22:33:44:55".to_string()],
            trusted_cidrs: vec![],
            overrides: Default::default(),
        };
        cfg.overrides.insert(
            "eno1".to_string(),
            DhcpHunterOverride {
                trusted_macs: vec!["aa:bb:cc:dd:ee:ff".to_string()],
                trusted_cidrs: vec![],
            },
        );
        let (notify, _rx) = Notifier::new("test", &DampeningConfig::default());
        let ctx = IfaceContext {
            name: "eno1".to_string(),
            hw_addr: [0x02, 0, 0, 0, 0, 1],
            snaplen: 2048,
        };
        let dh = DhcpHunter::new(&cfg, notify, &ctx);
        assert_eq!(dh.trusted_macs.len(), 2);
    }

    #[test]
    fn test_short_and_malformed_frames_dropped() {
        let (dh, mut rx) = hunter(&[], &[]);

        // Too short for an IP header
        dh.on_frame(&[0u8; 20], 20, 0);
        // IPv4 but invalid IHL
        let mut bad_ihl = udp_frame([0x02; 6], Ipv4Addr::new(10, 0, 0, 1), 67, 68);
        bad_ihl[14] = 0x41; // IHL 1 word
        dh.on_frame(&bad_ihl, bad_ihl.len(), 0);
        // Not UDP
        let mut not_udp = udp_frame([0x02; 6], Ipv4Addr::new(10, 0, 0, 1), 67, 68);
        not_udp[23] = 6; // TCP
        dh.on_frame(&not_udp, not_udp.len(), 0);

        assert!(rx.try_recv().is_err());
    }
}
