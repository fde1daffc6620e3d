//! MacStorm: per-source volumetric ceiling.
//!
//! Counts frames per source MAC over one-second windows. The counter map
//! is swapped for a fresh pre-sized one every second instead of being
//! cleared in place; the allocator reclaims the old map off the hot path.
//! Alert state persists across windows and is TTL-swept so a long-running
//! sensor cannot leak.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::MacStormConfig;
use crate::mac_class::{classify_mac, format_mac};
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

/// Pre-sized slots for the fresh counter map each second.
const COUNTER_PREALLOC: usize = 1024;

struct StormState {
    /// Frame counts for the current second; replaced wholesale on tick
    counters: HashMap<[u8; 6], u64>,
    /// Last alert per MAC; persists across windows, TTL-swept
    last_alert: HashMap<[u8; 6], Instant>,
}

pub struct MacStorm {
    iface: String,
    notify: Arc<Notifier>,
    max_pps: u64,
    max_tracked: usize,
    cooldown: Duration,
    state: Mutex<StormState>,
}

impl MacStorm {
    pub fn new(cfg: &MacStormConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let eff = cfg.effective(&ctx.name);
        Self {
            iface: ctx.name.clone(),
            notify,
            max_pps: eff.max_pps_per_mac,
            max_tracked: eff.max_tracked_macs,
            cooldown: eff.cooldown,
            state: Mutex::new(StormState {
                counters: HashMap::with_capacity(COUNTER_PREALLOC),
                last_alert: HashMap::new(),
            }),
        }
    }

    /// 1-second tick: swap in a fresh counter map.
    fn reset_counters(&self) {
        let mut st = self.state.lock();
        st.counters = HashMap::with_capacity(COUNTER_PREALLOC);
    }

    /// 60-second tick: forget alert state older than twice the cooldown.
    fn sweep_alert_state(&self) {
        let now = Instant::now();
        let ttl = self.cooldown * 2;
        let mut st = self.state.lock();
        st.last_alert.retain(|_, t| now.duration_since(*t) <= ttl);
    }
}

impl Detector for MacStorm {
    fn name(&self) -> &'static str {
        "MacStorm"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, shutdown: &CancellationToken) -> Result<()> {
        let shutdown = shutdown.clone();
        let me = self;
        tokio::spawn(async move {
            let mut rate_tick = tokio::time::interval(Duration::from_secs(1));
            let mut sweep_tick = tokio::time::interval(Duration::from_secs(60));
            rate_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = rate_tick.tick() => me.reset_counters(),
                    _ = sweep_tick.tick() => me.sweep_alert_state(),
                }
            }
        });
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];
        if data.len() < 14 {
            return;
        }

        let mut src = [0u8; 6];
        src.copy_from_slice(&data[6..12]);

        let now = Instant::now();
        let mut fire: Option<(u64, [u8; 6])> = None;

        {
            let mut st = self.state.lock();

            // Fail open: once the per-second map is full, new sources are
            // not tracked but known ones keep counting.
            if !st.counters.contains_key(&src) && st.counters.len() >= self.max_tracked {
                return;
            }

            let count = st.counters.entry(src).or_insert(0);
            *count += 1;
            let count = *count;

            if count > self.max_pps
                && cooldown_over(st.last_alert.get(&src).copied(), self.cooldown, now)
            {
                st.last_alert.insert(src, now);
                let mut dst = [0u8; 6];
                dst.copy_from_slice(&data[0..6]);
                fire = Some((count, dst));
            }
        }

        if let Some((rate, dst)) = fire {
            telemetry::engine_hit(&self.iface, "MacStorm", "VelocityFlood");
            let location = if vlan_id != 0 {
                format!("VLAN {vlan_id}")
            } else {
                "Native VLAN".to_string()
            };
            let dst_class = classify_mac(&dst);
            self.notify.alert(format!(
                "[MacStorm] MAC VELOCITY ALERT on {location}! {} sent > {} pps ({} detected)\n    DEST TYPE: {} ({})\n    Silencing this source for {:?}.",
                format_mac(&src),
                self.max_pps,
                rate,
                dst_class.name,
                dst_class.description,
                self.cooldown
            ));
        }
    }
}
