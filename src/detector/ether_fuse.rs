//! EtherFuse: duplicate-frame loop detection plus a global PPS storm gauge.
//!
//! A forwarding loop replays the same frame verbatim, so a bounded history
//! of frame hashes with per-hash repetition counts is strong loop evidence.
//! The history is a fixed ring: inserting a new hash evicts whatever sits
//! at the write cursor, which bounds memory no matter what the wire does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::EtherFuseConfig;
use crate::mac_class::{classify_mac, format_mac};
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

/// The 1-second storm window is checked once per this many frames so the
/// hot path does not read the clock on every packet.
const STORM_CHECK_GRANULARITY: u64 = 1024;

struct FuseState {
    /// Fixed-capacity hash history; slot 0 is "empty"
    ring: Vec<u64>,
    cursor: usize,
    /// Repetition count per live hash
    counts: HashMap<u64, u32>,
    packets_sec: u64,
    frames_since_check: u64,
    window_start: Instant,
    last_dup_alert: Option<Instant>,
    last_storm_alert: Option<Instant>,
}

pub struct EtherFuse {
    iface: String,
    notify: Arc<Notifier>,
    alert_threshold: u32,
    storm_pps_limit: u64,
    cooldown: Duration,
    state: Mutex<FuseState>,
}

impl EtherFuse {
    pub fn new(cfg: &EtherFuseConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let eff = cfg.effective(&ctx.name);
        Self {
            iface: ctx.name.clone(),
            notify,
            alert_threshold: eff.alert_threshold,
            storm_pps_limit: eff.storm_pps_limit,
            cooldown: eff.cooldown,
            state: Mutex::new(FuseState {
                ring: vec![0; eff.history_size],
                cursor: 0,
                counts: HashMap::with_capacity(eff.history_size),
                packets_sec: 0,
                frames_since_check: 0,
                window_start: Instant::now(),
                last_dup_alert: None,
                last_storm_alert: None,
            }),
        }
    }
}

/// 64-bit FNV-1a over the full frame. No allocation.
fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Detector for EtherFuse {
    fn name(&self) -> &'static str {
        "EtherFuse"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, _shutdown: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];
        let hash = fnv1a64(data);
        let now = Instant::now();

        let mut storm_rate: Option<u64> = None;
        let mut dup_hit: Option<(u32, [u8; 6], [u8; 6])> = None;

        {
            let mut st = self.state.lock();

            // Storm side-channel
            st.packets_sec += 1;
            st.frames_since_check += 1;
            if st.frames_since_check >= STORM_CHECK_GRANULARITY {
                st.frames_since_check = 0;
                if now.duration_since(st.window_start) >= Duration::from_secs(1) {
                    if st.packets_sec > self.storm_pps_limit
                        && cooldown_over(st.last_storm_alert, self.cooldown, now)
                    {
                        st.last_storm_alert = Some(now);
                        storm_rate = Some(st.packets_sec);
                    }
                    st.packets_sec = 0;
                    st.window_start = now;
                }
            }

            // Duplicate detection
            let dup_cooldown_over = cooldown_over(st.last_dup_alert, self.cooldown, now);
            if let Some(count) = st.counts.get_mut(&hash) {
                *count += 1;
                if *count > self.alert_threshold && dup_cooldown_over {
                    let repetitions = *count;
                    *count = 0; // squelch: one alert per burst
                    st.last_dup_alert = Some(now);

                    let mut dst = [0u8; 6];
                    let mut src = [0u8; 6];
                    if data.len() >= 12 {
                        dst.copy_from_slice(&data[0..6]);
                        src.copy_from_slice(&data[6..12]);
                    }
                    dup_hit = Some((repetitions, src, dst));
                }
            } else {
                let evicted = st.ring[st.cursor];
                if evicted != 0 {
                    st.counts.remove(&evicted);
                }
                let cursor = st.cursor;
                st.ring[cursor] = hash;
                st.counts.insert(hash, 1);
                st.cursor = (cursor + 1) % st.ring.len();
            }
        }

        // Lock released: now do the cold-path work
        if let Some(rate) = storm_rate {
            telemetry::engine_hit(&self.iface, "EtherFuse", "BroadcastStorm");
            self.notify.alert(format!(
                "[EtherFuse] BROADCAST STORM on {}: {} pps (limit {}) - throttling for {:?}",
                self.iface, rate, self.storm_pps_limit, self.cooldown
            ));
        }

        if let Some((repetitions, src, dst)) = dup_hit {
            telemetry::engine_hit(&self.iface, "EtherFuse", "LoopDetected");
            let location = if vlan_id != 0 {
                format!("VLAN {vlan_id}")
            } else {
                "Native VLAN".to_string()
            };
            let dst_class = classify_mac(&dst);
            self.notify.alert(format!(
                "[EtherFuse] LOOP DETECTED on {location}!\n    FRAME HASH: {:#010x} (repeated {} times)\n    SOURCE:     {}\n    DEST:       {} ({})",
                hash as u32,
                repetitions,
                format_mac(&src),
                dst_class.name,
                dst_class.description
            ));
        }
    }
}
