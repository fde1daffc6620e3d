//! ActiveProbe: identity-tagged frame injection and loop confirmation.
//!
//! Passively counting duplicates proves repetition; injecting a frame and
//! seeing it come back proves a physical path. The payload embeds the
//! emitting interface name so a returning probe distinguishes "my own
//! frame came back" (hard self-loop) from "a probe from another segment
//! arrived here" (cross-domain bridge). The optional domain tag keeps two
//! sensors that legitimately share a broadcast domain from flagging each
//! other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::ActiveProbeConfig;
use crate::mac_class::{classify_mac, parse_mac};
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

const BROADCAST: [u8; 6] = [0xff; 6];

pub struct ActiveProbe {
    iface: String,
    notify: Arc<Notifier>,
    my_mac: [u8; 6],
    ethertype: u16,
    interval: Duration,
    /// `"<magic>|"` as bytes; payloads must start with this
    magic_prefix: Vec<u8>,
    domain: String,
    cooldown: Duration,
    probe_frame: Vec<u8>,
    last_alert: Mutex<Option<Instant>>,
}

impl ActiveProbe {
    pub fn new(cfg: &ActiveProbeConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let eff = cfg.effective(&ctx.name);

        let dest = if eff.target_mac.is_empty() {
            BROADCAST
        } else {
            parse_mac(&eff.target_mac).unwrap_or_else(|| {
                warn!(
                    "[{}] invalid active_probe.target_mac '{}', using broadcast",
                    ctx.name, eff.target_mac
                );
                BROADCAST
            })
        };

        // Payload carries our identity: MAGIC|iface or MAGIC|iface|domain
        let mut payload = format!("{}|{}", eff.magic_payload, ctx.name);
        if !eff.domain.is_empty() {
            payload.push('|');
            payload.push_str(&eff.domain);
        }

        let mut frame = Vec::with_capacity(14 + payload.len());
        frame.extend_from_slice(&dest);
        frame.extend_from_slice(&ctx.hw_addr);
        frame.extend_from_slice(&eff.ethertype.to_be_bytes());
        frame.extend_from_slice(payload.as_bytes());

        Self {
            iface: ctx.name.clone(),
            notify,
            my_mac: ctx.hw_addr,
            ethertype: eff.ethertype,
            interval: eff.interval,
            magic_prefix: format!("{}|", eff.magic_payload).into_bytes(),
            domain: eff.domain,
            cooldown: eff.cooldown,
            probe_frame: frame,
            last_alert: Mutex::new(None),
        }
    }
}

impl Detector for ActiveProbe {
    fn name(&self) -> &'static str {
        "ActiveProbe"
    }

    fn start(self: Arc<Self>, link: &Arc<FrameSock>, shutdown: &CancellationToken) -> Result<()> {
        info!(
            "[{}] probe initialized: ethertype {:#06x}, every {:?}",
            self.iface, self.ethertype, self.interval
        );

        let link = link.clone();
        let shutdown = shutdown.clone();
        let me = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(me.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = link.send(&me.probe_frame) {
                            debug!("[{}] probe send failed: {e}", me.iface);
                        }
                    }
                }
            }
        });

        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];

        let (header, et_off) = if vlan_id != 0 { (18, 16) } else { (14, 12) };
        if data.len() < header + self.magic_prefix.len() {
            return;
        }

        // Fast reject: everything that is not our probe EtherType
        if u16::from_be_bytes([data[et_off], data[et_off + 1]]) != self.ethertype {
            return;
        }

        // Strip the zero padding the link layer appends to short frames
        let payload = &data[header..];
        let end = payload.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        let payload = &payload[..end];

        if !payload.starts_with(&self.magic_prefix) {
            return;
        }

        let mut parts = payload[self.magic_prefix.len()..].split(|&b| b == b'|');
        let remote_iface = String::from_utf8_lossy(parts.next().unwrap_or(&[])).into_owned();
        let remote_domain = String::from_utf8_lossy(parts.next().unwrap_or(&[])).into_owned();

        let mut src = [0u8; 6];
        src.copy_from_slice(&data[6..12]);
        let is_self = src == self.my_mac;

        // A peer sensor intentionally sharing our broadcast domain is not a
        // topology error.
        if !is_self && remote_domain == self.domain {
            return;
        }

        let now = Instant::now();
        {
            let mut last = self.last_alert.lock();
            if !cooldown_over(*last, self.cooldown, now) {
                return;
            }
            *last = Some(now);
        }

        let (alert_type, body) = if is_self {
            (
                "HardLoop",
                format!(
                    "[{iface}] LOOP CONFIRMED (self-loop)!\n    STATUS: a cable connects interface {iface} back to itself through the switch.\n    ACTION: disconnect immediately.",
                    iface = self.iface
                ),
            )
        } else {
            let remote = if remote_domain.is_empty() {
                remote_iface.clone()
            } else {
                format!("{remote_iface}, domain {remote_domain}")
            };
            (
                "CrossDomainLoop",
                format!(
                    "[{iface}] CRITICAL TOPOLOGY ERROR (cross-domain bridge)!\n    DETECTED: physical bridge between two separate networks.\n    PATH:     [remote: {remote}] ===> [local: {iface}]\n    ACTION:   check cabling between these segments immediately.",
                    iface = self.iface
                ),
            )
        };

        telemetry::engine_hit(&self.iface, "ActiveProbe", alert_type);

        let mut dst = [0u8; 6];
        dst.copy_from_slice(&data[0..6]);
        let ret = classify_mac(&dst);

        self.notify
            .alert(format!("{body}\n    RETURN PATH: {}", ret.description));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DampeningConfig;
    use tokio::sync::mpsc;

    const MY_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0a];

    fn probe(iface: &str, domain: &str) -> (ActiveProbe, mpsc::Receiver<String>) {
        let cfg = ActiveProbeConfig {
            enabled: true,
            interval_ms: 1000,
            ethertype: 0xFFFF,
            magic_payload: "LW_PROBE".to_string(),
            target_mac: String::new(),
            domain: domain.to_string(),
            alert_cooldown: "10s".to_string(),
            overrides: Default::default(),
        };
        let (notify, rx) = Notifier::new("test", &DampeningConfig::default());
        let ctx = IfaceContext {
            name: iface.to_string(),
            hw_addr: MY_MAC,
            snaplen: 2048,
        };
        (ActiveProbe::new(&cfg, notify, &ctx), rx)
    }

    fn probe_frame(src: [u8; 6], payload: &str, pad_to: usize) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&BROADCAST);
        frame.extend_from_slice(&src);
        frame.extend_from_slice(&0xFFFFu16.to_be_bytes());
        frame.extend_from_slice(payload.as_bytes());
        while frame.len() < pad_to {
            frame.push(0);
        }
        frame
    }

    #[test]
    fn test_probe_wire_format() {
        let (ap, _rx) = probe("eno1", "");
        let frame = &ap.probe_frame;
        assert_eq!(&frame[0..6], &BROADCAST);
        assert_eq!(&frame[6..12], &MY_MAC);
        assert_eq!(&frame[12..14], &[0xff, 0xff]);
        assert_eq!(&frame[14..], b"LW_PROBE|eno1");

        let (ap, _rx) = probe("eno2", "VLAN10");
        assert_eq!(&ap.probe_frame[14..], b"LW_PROBE|eno2|VLAN10");
    }

    #[test]
    fn test_self_loop_confirmed() {
        // S1: our own probe returns on the emitting interface
        let (ap, mut rx) = probe("eno1", "");
        let frame = probe_frame(MY_MAC, "LW_PROBE|eno1", 0);

        ap.on_frame(&frame, frame.len(), 0);

        let alert = rx.try_recv().unwrap();
        assert!(alert.contains("LOOP CONFIRMED"));
        assert!(alert.contains("eno1"));

        // Identical frames within the cooldown stay silent
        ap.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cross_domain_bridge() {
        // S2: a probe from another sensor, tagged with a different domain
        let (ap, mut rx) = probe("eno2", "VLAN10");
        let other_mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0b];
        let frame = probe_frame(other_mac, "LW_PROBE|eno1|VLAN20", 0);

        ap.on_frame(&frame, frame.len(), 0);

        let alert = rx.try_recv().unwrap();
        assert!(alert.contains("CRITICAL TOPOLOGY ERROR"));
        assert!(alert.contains("eno1"));
        assert!(alert.contains("VLAN20"));
    }

    #[test]
    fn test_same_domain_peer_suppressed() {
        let (ap, mut rx) = probe("eno2", "VLAN10");
        let other_mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0b];
        let frame = probe_frame(other_mac, "LW_PROBE|eno1|VLAN10", 0);

        ap.on_frame(&frame, frame.len(), 0);

        assert!(rx.try_recv().is_err(), "peer sensor must be suppressed");
        assert!(ap.last_alert.lock().is_none());
    }

    #[test]
    fn test_zero_padding_tolerated() {
        // Link layer pads short frames to 60 bytes; recognition must strip it
        let (ap, mut rx) = probe("eno1", "");
        let frame = probe_frame(MY_MAC, "LW_PROBE|eno1", 60);

        ap.on_frame(&frame, frame.len(), 0);

        let alert = rx.try_recv().unwrap();
        assert!(alert.contains("LOOP CONFIRMED"));
    }

    #[test]
    fn test_foreign_ethertype_ignored() {
        let (ap, mut rx) = probe("eno1", "");
        let mut frame = probe_frame(MY_MAC, "LW_PROBE|eno1", 0);
        frame[12] = 0x08;
        frame[13] = 0x00; // IPv4, not our probe type

        ap.on_frame(&frame, frame.len(), 0);

        assert!(rx.try_recv().is_err());
        assert!(ap.last_alert.lock().is_none());
    }

    #[test]
    fn test_missing_magic_ignored() {
        let (ap, mut rx) = probe("eno1", "");
        let frame = probe_frame(MY_MAC, "NOT_THE_MAGIC|eno1", 0);

        ap.on_frame(&frame, frame.len(), 0);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cooldown_expiry_realerts() {
        let (ap, mut rx) = probe("eno1", "");
        let frame = probe_frame(MY_MAC, "LW_PROBE|eno1", 0);

        ap.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_ok());

        *ap.last_alert.lock() = Some(Instant::now() - Duration::from_secs(11));
        ap.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_untagged_peer_without_domains_suppressed() {
        // Neither sensor carries a domain tag: both sides compare "" == ""
        // and treat each other as same-domain peers.
        let (ap, mut rx) = probe("eno1", "");
        let other_mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x0c];
        let frame = probe_frame(other_mac, "LW_PROBE|eno9", 0);

        ap.on_frame(&frame, frame.len(), 0);

        assert!(rx.try_recv().is_err());
    }
}
