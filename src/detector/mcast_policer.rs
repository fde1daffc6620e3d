//! McastPolicer: multicast storm rate limiter.
//!
//! Counts frames whose destination sits in the IPv4 (01:00:5E) or IPv6
//! (33:33) multicast ranges and alerts when the one-second rate exceeds
//! the ceiling. Broadcast is excluded, EtherFuse already polices it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::McastPolicerConfig;
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

const ALERT_COOLDOWN: Duration = Duration::from_secs(10);

struct PolicerState {
    packet_count: u64,
    window_start: Instant,
    last_alert: Option<Instant>,
}

pub struct McastPolicer {
    iface: String,
    notify: Arc<Notifier>,
    max_pps: u64,
    state: Mutex<PolicerState>,
}

impl McastPolicer {
    pub fn new(cfg: &McastPolicerConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        Self {
            iface: ctx.name.clone(),
            notify,
            max_pps: cfg.effective_max_pps(&ctx.name),
            state: Mutex::new(PolicerState {
                packet_count: 0,
                window_start: Instant::now(),
                last_alert: None,
            }),
        }
    }
}

fn is_ip_multicast(dst: &[u8]) -> bool {
    (dst[0] == 0x01 && dst[1] == 0x00 && dst[2] == 0x5e) || (dst[0] == 0x33 && dst[1] == 0x33)
}

impl Detector for McastPolicer {
    fn name(&self) -> &'static str {
        "McastPolicer"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, _shutdown: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];
        if data.len() < 6 || !is_ip_multicast(&data[0..6]) {
            return;
        }

        let now = Instant::now();
        let mut fire: Option<u64> = None;

        {
            let mut st = self.state.lock();
            st.packet_count += 1;

            if now.duration_since(st.window_start) >= Duration::from_secs(1) {
                if st.packet_count > self.max_pps
                    && cooldown_over(st.last_alert, ALERT_COOLDOWN, now)
                {
                    st.last_alert = Some(now);
                    fire = Some(st.packet_count);
                }
                st.packet_count = 0;
                st.window_start = now;
            }
        }

        if let Some(rate) = fire {
            telemetry::engine_hit(&self.iface, "McastPolicer", "MulticastStorm");
            let vlan = if vlan_id != 0 {
                vlan_id.to_string()
            } else {
                "Native".to_string()
            };
            self.notify.alert(format!(
                "[McastPolicer] MULTICAST STORM DETECTED!\n    INTERFACE: {}\n    VLAN:      {}\n    RATE:      {} pps (limit: {})\n    CAUSE:     Likely disk-cloning multicast or a streaming source gone wrong.",
                self.iface, vlan, rate, self.max_pps
            ));
        }
    }
}
