//! RaGuard: rogue IPv6 Router Advertisement detection.
//!
//! An RA (ICMPv6 type 134) from a MAC that is not on the trusted-router
//! list rewrites every client's default route. The parse assumes the fixed
//! 40-byte IPv6 header and checks Next Header directly; extension-header
//! chains are deliberately not walked, real RAs do not carry them.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::RaGuardConfig;
use crate::mac_class::{format_mac, parse_mac};
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

const ETHERTYPE_IPV6: u16 = 0x86DD;
const PROTO_ICMPV6: u8 = 58;
const ICMPV6_TYPE_RA: u8 = 134;

const ALERT_COOLDOWN: Duration = Duration::from_secs(30);

pub struct RaGuard {
    iface: String,
    notify: Arc<Notifier>,
    trusted_macs: HashSet<[u8; 6]>,
    last_alert: Mutex<Option<Instant>>,
}

impl RaGuard {
    pub fn new(cfg: &RaGuardConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let mut trusted_macs = HashSet::new();
        for raw in cfg.effective_macs(&ctx.name) {
            let clean = raw.trim().to_lowercase();
            match parse_mac(&clean) {
                Some(mac) => {
                    trusted_macs.insert(mac);
                }
                None => warn!("[RaGuard:{}] invalid trusted MAC ignored: '{raw}'", ctx.name),
            }
        }

        info!(
            "[RaGuard:{}] active, trusted routers: {}",
            ctx.name,
            trusted_macs.len()
        );

        Self {
            iface: ctx.name.clone(),
            notify,
            trusted_macs,
            last_alert: Mutex::new(None),
        }
    }
}

impl Detector for RaGuard {
    fn name(&self) -> &'static str {
        "RaGuard"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, _shutdown: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];

        let (ip_offset, et_off) = if vlan_id != 0 { (18, 16) } else { (14, 12) };
        // Fixed IPv6 header plus the ICMPv6 type byte
        if data.len() < ip_offset + 40 + 1 {
            return;
        }
        if u16::from_be_bytes([data[et_off], data[et_off + 1]]) != ETHERTYPE_IPV6 {
            return;
        }
        if data[ip_offset + 6] != PROTO_ICMPV6 {
            return;
        }
        if data[ip_offset + 40] != ICMPV6_TYPE_RA {
            return;
        }

        let mut src_mac = [0u8; 6];
        src_mac.copy_from_slice(&data[6..12]);
        if self.trusted_macs.contains(&src_mac) {
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

        let mut ip_bytes = [0u8; 16];
        ip_bytes.copy_from_slice(&data[ip_offset + 8..ip_offset + 24]);
        let src_ip = Ipv6Addr::from(ip_bytes);

        telemetry::engine_hit(&self.iface, "RaGuard", "RogueRA");
        let vlan = if vlan_id != 0 {
            vlan_id.to_string()
        } else {
            "Native".to_string()
        };
        self.notify.alert(format!(
            "[RaGuard] ROGUE IPv6 ROUTER ADVERTISEMENT!\n    VLAN:      {}\n    ROGUE MAC: {}\n    ROGUE IP:  {}\n    IMPACT:    Clients will lose connectivity, possible man-in-the-middle.",
            vlan,
            format_mac(&src_mac),
            src_ip
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DampeningConfig;
    use tokio::sync::mpsc;

    fn ra_guard(trusted: &[&str]) -> (RaGuard, mpsc::Receiver<String>) {
        let cfg = RaGuardConfig {
            enabled: true,
            trusted_macs: trusted.iter().map(|s| s.to_string()).collect(),
            overrides: Default::default(),
        };
        let (notify, rx) = Notifier::new("test", &DampeningConfig::default());
        let ctx = IfaceContext {
            name: "eno1".to_string(),
            hw_addr: [0x02, 0, 0, 0, 0, 1],
            snaplen: 2048,
        };
        (RaGuard::new(&cfg, notify, &ctx), rx)
    }

    /// Untagged IPv6 frame carrying an ICMPv6 message of the given type.
    fn icmpv6_frame(src_mac: [u8; 6], src_ip: Ipv6Addr, icmp_type: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 14 + 40 + 8];
        frame[0..6].copy_from_slice(&[0x33, 0x33, 0x00, 0x00, 0x00, 0x01]);
        frame[6..12].copy_from_slice(&src_mac);
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
        frame[14] = 0x60; // version 6
        frame[20] = PROTO_ICMPV6; // next header
        frame[22..38].copy_from_slice(&src_ip.octets());
        frame[54] = icmp_type;
        frame
    }

    #[test]
    fn test_rogue_ra_detected() {
        let (rg, mut rx) = ra_guard(&["00:11:22:33:44:55"]);
        let src_ip: Ipv6Addr = "fe80::bad:1".parse().unwrap();
        let frame = icmpv6_frame([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01], src_ip, ICMPV6_TYPE_RA);

        rg.on_frame(&frame, frame.len(), 0);

        let alert = rx.try_recv().unwrap();
        assert!(alert.contains("ROGUE IPv6 ROUTER ADVERTISEMENT"));
        assert!(alert.contains("de:ad:be:ef:00:01"));
        assert!(alert.contains("fe80::bad:1"));
    }

    #[test]
    fn test_trusted_router_ignored() {
        let (rg, mut rx) = ra_guard(&["00:11:22:33:44:55"]);
        let src_ip: Ipv6Addr = "fe80::1".parse().unwrap();
        let frame = icmpv6_frame([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], src_ip, ICMPV6_TYPE_RA);

        rg.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_router_solicitation_ignored() {
        // Type 133 (RS) must not trigger
        let (rg, mut rx) = ra_guard(&[]);
        let src_ip: Ipv6Addr = "fe80::2".parse().unwrap();
        let frame = icmpv6_frame([0xde, 0xad, 0xbe, 0xef, 0x00, 0x02], src_ip, 133);

        rg.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
        assert!(rg.last_alert.lock().is_none());
    }

    #[test]
    fn test_non_icmpv6_ignored() {
        let (rg, mut rx) = ra_guard(&[]);
        let src_ip: Ipv6Addr = "fe80::3".parse().unwrap();
        let mut frame = icmpv6_frame([0xde, 0xad, 0xbe, 0xef, 0x00, 0x03], src_ip, ICMPV6_TYPE_RA);
        frame[20] = 17; // UDP next header

        rg.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cooldown_gates_repeat_alerts() {
        let (rg, mut rx) = ra_guard(&[]);
        let src_ip: Ipv6Addr = "fe80::4".parse().unwrap();
        let frame = icmpv6_frame([0xde, 0xad, 0xbe, 0xef, 0x00, 0x04], src_ip, ICMPV6_TYPE_RA);

        rg.on_frame(&frame, frame.len(), 0);
        rg.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        *rg.last_alert.lock() = Some(Instant::now() - Duration::from_secs(31));
        rg.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_short_frame_dropped() {
        let (rg, mut rx) = ra_guard(&[]);
        rg.on_frame(&[0u8; 40], 40, 0);
        assert!(rx.try_recv().is_err());
    }
}
