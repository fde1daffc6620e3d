//! FlowPanic: 802.3x PAUSE-frame flood detection.
//!
//! MAC-control PAUSE frames (EtherType 0x8808, opcode 0x0001) tell the
//! peer port to stop transmitting. A flood of them freezes a segment as
//! effectively as a cable cut; the usual culprits are a dying NIC or a
//! loop reflecting a single pause forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{cooldown_over, Detector, IfaceContext};
use crate::config::FlowPanicConfig;
use crate::mac_class::format_mac;
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;
use crate::telemetry;

const ETHERTYPE_MAC_CONTROL: u16 = 0x8808;
const OPCODE_PAUSE: u16 = 0x0001;

const ALERT_COOLDOWN: Duration = Duration::from_secs(5);

struct PanicState {
    packet_count: u64,
    window_start: Instant,
    last_alert: Option<Instant>,
}

pub struct FlowPanic {
    iface: String,
    notify: Arc<Notifier>,
    max_pause_pps: u64,
    state: Mutex<PanicState>,
}

impl FlowPanic {
    pub fn new(cfg: &FlowPanicConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        Self {
            iface: ctx.name.clone(),
            notify,
            max_pause_pps: cfg.effective_max_pps(&ctx.name),
            state: Mutex::new(PanicState {
                packet_count: 0,
                window_start: Instant::now(),
                last_alert: None,
            }),
        }
    }
}

impl Detector for FlowPanic {
    fn name(&self) -> &'static str {
        "FlowPanic"
    }

    fn start(self: Arc<Self>, _link: &Arc<FrameSock>, _shutdown: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16) {
        let data = &data[..len.min(data.len())];

        let (payload_offset, et_off) = if vlan_id != 0 { (18, 16) } else { (14, 12) };
        if data.len() < payload_offset + 2 {
            return;
        }
        if u16::from_be_bytes([data[et_off], data[et_off + 1]]) != ETHERTYPE_MAC_CONTROL {
            return;
        }
        if u16::from_be_bytes([data[payload_offset], data[payload_offset + 1]]) != OPCODE_PAUSE {
            return;
        }

        let now = Instant::now();
        let mut fire: Option<(u64, [u8; 6])> = None;

        {
            let mut st = self.state.lock();
            st.packet_count += 1;

            if now.duration_since(st.window_start) >= Duration::from_secs(1) {
                if st.packet_count > self.max_pause_pps
                    && cooldown_over(st.last_alert, ALERT_COOLDOWN, now)
                {
                    st.last_alert = Some(now);
                    let mut src = [0u8; 6];
                    src.copy_from_slice(&data[6..12]);
                    fire = Some((st.packet_count, src));
                }
                st.packet_count = 0;
                st.window_start = now;
            }
        }

        if let Some((rate, src)) = fire {
            telemetry::engine_hit(&self.iface, "FlowPanic", "PauseFlood");
            self.notify.alert(format!(
                "[FlowPanic] PAUSE FRAME FLOOD (DoS)!\n    SOURCE: {}\n    RATE:   {} frames/sec (limit: {})\n    IMPACT: Network stuck, NIC hardware failure or loop.",
                format_mac(&src),
                rate,
                self.max_pause_pps
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DampeningConfig;
    use tokio::sync::mpsc;

    fn panic_detector(max_pps: u64) -> (FlowPanic, mpsc::Receiver<String>) {
        let cfg = FlowPanicConfig {
            enabled: true,
            max_pause_pps: max_pps,
            overrides: Default::default(),
        };
        let (notify, rx) = Notifier::new("test", &DampeningConfig::default());
        let ctx = IfaceContext {
            name: "eno1".to_string(),
            hw_addr: [0x02, 0, 0, 0, 0, 1],
            snaplen: 2048,
        };
        (FlowPanic::new(&cfg, notify, &ctx), rx)
    }

    fn pause_frame(src: [u8; 6]) -> Vec<u8> {
        let mut frame = vec![0u8; 60];
        frame[0..6].copy_from_slice(&[0x01, 0x80, 0xc2, 0x00, 0x00, 0x01]);
        frame[6..12].copy_from_slice(&src);
        frame[12..14].copy_from_slice(&ETHERTYPE_MAC_CONTROL.to_be_bytes());
        frame[14..16].copy_from_slice(&OPCODE_PAUSE.to_be_bytes());
        frame
    }

    #[test]
    fn test_pause_flood_alerts_on_window_close() {
        let (fp, mut rx) = panic_detector(10);
        let src = [0xba, 0xad, 0x00, 0x00, 0x00, 0x01];
        let frame = pause_frame(src);

        for _ in 0..20 {
            fp.on_frame(&frame, frame.len(), 0);
        }
        // Window has not elapsed yet
        assert!(rx.try_recv().is_err());

        fp.state.lock().window_start = Instant::now() - Duration::from_secs(2);
        fp.on_frame(&frame, frame.len(), 0);

        let alert = rx.try_recv().unwrap();
        assert!(alert.contains("PAUSE FRAME FLOOD"));
        assert!(alert.contains("ba:ad:00:00:00:01"));

        // Window reset
        assert_eq!(fp.state.lock().packet_count, 0);
    }

    #[test]
    fn test_below_limit_stays_silent() {
        let (fp, mut rx) = panic_detector(100);
        let frame = pause_frame([0x02; 6]);

        for _ in 0..5 {
            fp.on_frame(&frame, frame.len(), 0);
        }
        fp.state.lock().window_start = Instant::now() - Duration::from_secs(2);
        fp.on_frame(&frame, frame.len(), 0);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_non_pause_opcode_ignored() {
        let (fp, _rx) = panic_detector(10);
        let mut frame = pause_frame([0x02; 6]);
        frame[14..16].copy_from_slice(&0x0002u16.to_be_bytes());

        fp.on_frame(&frame, frame.len(), 0);
        assert_eq!(fp.state.lock().packet_count, 0);
    }

    #[test]
    fn test_foreign_ethertype_leaves_state_unchanged() {
        let (fp, _rx) = panic_detector(10);
        let mut frame = pause_frame([0x02; 6]);
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());

        fp.on_frame(&frame, frame.len(), 0);
        assert_eq!(fp.state.lock().packet_count, 0);
    }

    #[test]
    fn test_cooldown_gates_consecutive_windows() {
        let (fp, mut rx) = panic_detector(5);
        let frame = pause_frame([0x02; 6]);

        for _ in 0..10 {
            fp.on_frame(&frame, frame.len(), 0);
        }
        fp.state.lock().window_start = Instant::now() - Duration::from_secs(2);
        fp.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_ok());

        // Next window floods again inside the cooldown
        for _ in 0..10 {
            fp.on_frame(&frame, frame.len(), 0);
        }
        fp.state.lock().window_start = Instant::now() - Duration::from_secs(2);
        fp.on_frame(&frame, frame.len(), 0);
        assert!(rx.try_recv().is_err());
    }
}
