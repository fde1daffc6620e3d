//! ArpWatchdog: adaptive ARP-request storm and sweep classification.
//!
//! One source hammering ARP can be three different problems: a subnet
//! sweep (many distinct targets, low rate is already suspicious), a single
//! hammered target (loop or attack) or plain high-volume noise. Per-source
//! counters accumulate for one second, then an analysis tick classifies
//! each source against the pattern-appropriate threshold and swaps the map
//! fresh. Target sets are capped so a /16 sweep cannot balloon memory.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::ArpWatchConfig;
use crate::mac_class::format_mac;
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

const ETHERTYPE_ARP: u16 = 0x0806;
const OPCODE_REQUEST: u16 = 1;

/// Hard cap on concurrently tracked sources (fail open past it).
const MAX_TRACKED_ARP_SOURCES: usize = 5000;

/// Distinct target IPs remembered per source.
const MAX_TARGETS_PER_SOURCE: usize = 255;

struct ArpStats {
    pps: u64,
    min_ip: u32,
    max_ip: u32,
    targets: HashSet<u32>,
}

struct WatchState {
    sources: HashMap<[u8; 6], ArpStats>,
    /// Last alert per source; bounded and GC'd at twice the cooldown
    alert_registry: HashMap<[u8; 6], Instant>,
}

pub struct ArpWatchdog {
    iface: String,
    notify: Arc<Notifier>,
    max_pps: u64,
    scan_ip_threshold: usize,
    scan_mode_pps: u64,
    cooldown: Duration,
    state: Mutex<WatchState>,
}

impl ArpWatchdog {
    pub fn new(cfg: &ArpWatchConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let eff = cfg.effective(&ctx.name);
        Self {
            iface: ctx.name.clone(),
            notify,
            max_pps: eff.max_pps,
            scan_ip_threshold: eff.scan_ip_threshold,
            scan_mode_pps: eff.scan_mode_pps,
            cooldown: eff.cooldown,
            state: Mutex::new(WatchState {
                sources: HashMap::with_capacity(100),
                alert_registry: HashMap::new(),
            }),
        }
    }

    /// 1-second tick: classify every source, alert where due, then swap
    /// the counters fresh. Alerts are posted after the lock is released.
    fn analyze_and_reset(&self) {
        let now = Instant::now();
        let mut pending: Vec<(String, &'static str)> = Vec::new();

        {
            let mut st = self.state.lock();
            let WatchState {
                sources,
                alert_registry,
            } = &mut *st;

            for (mac, stats) in sources.iter() {
                let unique_targets = stats.targets.len();
                let is_scanning = unique_targets > self.scan_ip_threshold;

                // A scanning source is held to the much stricter limit
                let threshold = if is_scanning {
                    self.scan_mode_pps
                } else {
                    self.max_pps
                };

                if stats.pps <= threshold {
                    continue;
                }
                if !cooldown_over(alert_registry.get(mac).copied(), self.cooldown, now) {
                    continue;
                }
                alert_registry.insert(*mac, now);

                let (pattern, threat_type, details) = if is_scanning {
                    (
                        "SUBNET SCANNING (SWEEP)",
                        "NetworkScan",
                        format!(
                            "Scanning Range: {} -> {} ({} IPs)",
                            Ipv4Addr::from(stats.min_ip),
                            Ipv4Addr::from(stats.max_ip),
                            unique_targets
                        ),
                    )
                } else if unique_targets == 1 {
                    (
                        "SINGLE TARGET ATTACK / LOOP",
                        "SingleTargetLoop",
                        format!("Hammering Target: {}", Ipv4Addr::from(stats.min_ip)),
                    )
                } else {
                    (
                        "HIGH VOLUME ARP ANOMALY",
                        "ArpNoise",
                        format!("Multiple Targets ({unique_targets} IPs)"),
                    )
                };

                pending.push((
                    format!(
                        "[ArpWatchdog] DISCOVERY STORM DETECTED!\n    INTERFACE:  {}\n    RATE:       {} req/s (threshold: {})\n    SOURCE:     {}\n    PATTERN:    {}\n    DETAILS:    {}",
                        self.iface,
                        stats.pps,
                        threshold,
                        format_mac(mac),
                        pattern,
                        details
                    ),
                    threat_type,
                ));
            }

            if alert_registry.len() > MAX_TRACKED_ARP_SOURCES {
                let ttl = self.cooldown * 2;
                alert_registry.retain(|_, t| now.duration_since(*t) <= ttl);
            }

            // Counters are a cache: swap instead of clearing in place
            *sources = HashMap::with_capacity(100);
        }

        for (msg, threat_type) in pending {
            telemetry::engine_hit(&self.iface, "ArpWatchdog", threat_type);
            self.notify.alert(msg);
        }
    }
}

impl Detector for ArpWatchdog {
    fn name(&self) -> &'static str {
        "ArpWatchdog"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, shutdown: &CancellationToken) -> Result<()> {
        let shutdown = shutdown.clone();
        let me = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => me.analyze_and_reset(),
                }
            }
        });
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];

        let (arp_base, et_off) = if vlan_id != 0 { (18, 16) } else { (14, 12) };
        if data.len() < arp_base + 28 {
            return;
        }
        if u16::from_be_bytes([data[et_off], data[et_off + 1]]) != ETHERTYPE_ARP {
            return;
        }
        if u16::from_be_bytes([data[arp_base + 6], data[arp_base + 7]]) != OPCODE_REQUEST {
            return;
        }

        // Sender hardware address and target protocol address, straight
        // from the ARP body; keys are plain arrays, nothing borrowed.
        let mut sender = [0u8; 6];
        sender.copy_from_slice(&data[arp_base + 8..arp_base + 14]);
        let target_ip = u32::from_be_bytes([
            data[arp_base + 24],
            data[arp_base + 25],
            data[arp_base + 26],
            data[arp_base + 27],
        ]);

        let mut st = self.state.lock();

        let Some(stats) = st.sources.get_mut(&sender) else {
            // Fail open at the source cap
            if st.sources.len() >= MAX_TRACKED_ARP_SOURCES {
                return;
            }
            let mut targets = HashSet::with_capacity(8);
            targets.insert(target_ip);
            st.sources.insert(
                sender,
                ArpStats {
                    pps: 1,
                    min_ip: target_ip,
                    max_ip: target_ip,
                    targets,
                },
            );
            return;
        };

        stats.pps += 1;
        if target_ip < stats.min_ip {
            stats.min_ip = target_ip;
        }
        if target_ip > stats.max_ip {
            stats.max_ip = target_ip;
        }
        if stats.targets.len() < MAX_TARGETS_PER_SOURCE {
            stats.targets.insert(target_ip);
        }
    }
}
