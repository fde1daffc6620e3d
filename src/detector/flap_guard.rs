//! FlapGuard: one MAC rapidly hopping between VLAN ids.
//!
//! A station legitimately moves VLANs occasionally; a MAC seen on two
//! different VLANs several times inside one second means a miswired trunk,
//! a bridging loop or a spoofed address. Entries are compact and the table
//! is hard-capped; a background sweeper evicts idle hosts, aggressively so
//! when the table runs over the cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::FlapGuardConfig;
use crate::mac_class::{classify_mac, format_mac};
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

/// Hard cap on tracked MACs; past it, new insertions are refused.
const MAX_FLAP_ENTRIES: usize = 50_000;

/// Sweep cadence and idle expiries (normal / over cap).
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_EXPIRY: Duration = Duration::from_secs(60);
const PRESSED_EXPIRY: Duration = Duration::from_secs(10);

struct FlapEntry {
    last_seen: Instant,
    last_alert: Option<Instant>,
    last_vlan: u16,
    flap_count: u16,
}

pub struct FlapGuard {
    iface: String,
    notify: Arc<Notifier>,
    threshold: u16,
    window: Duration,
    cooldown: Duration,
    state: Mutex<HashMap<[u8; 6], FlapEntry>>,
}

impl FlapGuard {
    pub fn new(cfg: &FlapGuardConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let eff = cfg.effective(&ctx.name);
        Self {
            iface: ctx.name.clone(),
            notify,
            threshold: eff.threshold,
            window: eff.window,
            cooldown: eff.cooldown,
            state: Mutex::new(HashMap::with_capacity(1000)),
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        let mut registry = self.state.lock();
        let expiry = if registry.len() > MAX_FLAP_ENTRIES {
            PRESSED_EXPIRY
        } else {
            IDLE_EXPIRY
        };
        registry.retain(|_, e| now.duration_since(e.last_seen) <= expiry);
    }
}

impl Detector for FlapGuard {
    fn name(&self) -> &'static str {
        "FlapGuard"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, shutdown: &CancellationToken) -> Result<()> {
        let shutdown = shutdown.clone();
        let me = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => me.sweep(),
                }
            }
        });
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];
        if data.len() < 12 {
            return;
        }

        let mut src = [0u8; 6];
        src.copy_from_slice(&data[6..12]);
        let now = Instant::now();

        let mut fire: Option<u16> = None;

        {
            let mut registry = self.state.lock();

            let Some(entry) = registry.get_mut(&src) else {
                // Refuse new insertions once over the cap (fail open)
                if registry.len() >= MAX_FLAP_ENTRIES {
                    return;
                }
                registry.insert(
                    src,
                    FlapEntry {
                        last_seen: now,
                        last_alert: None,
                        last_vlan: vlan_id,
                        flap_count: 0,
                    },
                );
                return;
            };

            if entry.last_vlan != vlan_id {
                if now.duration_since(entry.last_seen) < self.window {
                    entry.flap_count = entry.flap_count.saturating_add(1);
                } else {
                    // Slow move: legitimate roaming, start over
                    entry.flap_count = 1;
                }
                entry.last_vlan = vlan_id;
                entry.last_seen = now;

                if entry.flap_count >= self.threshold
                    && cooldown_over(entry.last_alert, self.cooldown, now)
                {
                    entry.last_alert = Some(now);
                    fire = Some(entry.flap_count);
                }
            } else if now.duration_since(entry.last_seen) > Duration::from_secs(1) {
                // Keep-alive for stable heavy talkers, throttled to one
                // write per second
                entry.last_seen = now;
            }
        }

        if let Some(count) = fire {
            telemetry::engine_hit(&self.iface, "FlapGuard", "MacFlapping");
            let class = classify_mac(&src);
            let severity = if class.is_critical { "CRITICAL" } else { "WARNING" };
            self.notify.alert(format!(
                "[FlapGuard] MAC FLAPPING DETECTED! {} jumped VLANs {} times (last: VLAN {})\n    HOST TYPE: {} ({})\n    SEVERITY:  {}\n    Silencing this source for {:?}.",
                format_mac(&src),
                count,
                vlan_id,
                class.name,
                class.description,
                severity,
                self.cooldown
            ));
        }
    }
}
