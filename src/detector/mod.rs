//! Detection engine: the ordered set of per-interface detectors and the
//! dispatcher that fans each captured frame to all of them.
//!
//! Detectors own private state behind their own lock and post alerts
//! through the shared sink; dispatch is synchronous on the ingress thread,
//! so a detector must never block on I/O from `on_frame`.

pub mod active_probe;
pub mod arp_watch;
pub mod dhcp_hunter;
pub mod ether_fuse;
pub mod flap_guard;
pub mod flow_panic;
pub mod mac_storm;
pub mod mcast_policer;
pub mod ra_guard;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AlgorithmsConfig;
use crate::notifier::Notifier;
use crate::sniffer::FrameSock;

use active_probe::ActiveProbe;
use arp_watch::ArpWatchdog;
use dhcp_hunter::DhcpHunter;
use ether_fuse::EtherFuse;
use flap_guard::FlapGuard;
use flow_panic::FlowPanic;
use mac_storm::MacStorm;
use mcast_policer::McastPolicer;
use ra_guard::RaGuard;

/// Immutable per-interface facts, injected into every detector.
#[derive(Debug, Clone)]
pub struct IfaceContext {
    pub name: String,
    pub hw_addr: [u8; 6],
    pub snaplen: usize,
}

/// One detection algorithm. `on_frame` borrows the ingress buffer for the
/// duration of the call only; anything a detector keeps must be copied.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start background work: probe tickers, analysis ticks, sweepers.
    /// All spawned tasks must exit on the shutdown token.
    fn start(self: Arc<Self>, link: &Arc<FrameSock>, shutdown: &CancellationToken) -> Result<()>;

    /// Called synchronously on the ingress thread for every admitted frame.
    fn on_frame(&self, data: &[u8], len: usize, vlan_id: u16);
}

/// Ordered detector set for one interface.
///
/// The list is written only during construction; dispatch takes the read
/// lock and delivers in registration order.
pub struct Engine {
    detectors: RwLock<Vec<Arc<dyn Detector>>>,
    notify: Arc<Notifier>,
}

impl Engine {
    pub fn new(cfg: &AlgorithmsConfig, notify: Arc<Notifier>, ctx: &IfaceContext) -> Self {
        let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();

        if cfg.ether_fuse.enabled {
            detectors.push(Arc::new(EtherFuse::new(&cfg.ether_fuse, notify.clone(), ctx)));
        }
        if cfg.active_probe.enabled {
            detectors.push(Arc::new(ActiveProbe::new(&cfg.active_probe, notify.clone(), ctx)));
        }
        if cfg.mac_storm.enabled {
            detectors.push(Arc::new(MacStorm::new(&cfg.mac_storm, notify.clone(), ctx)));
        }
        if cfg.flap_guard.enabled {
            detectors.push(Arc::new(FlapGuard::new(&cfg.flap_guard, notify.clone(), ctx)));
        }
        if cfg.arp_watch.enabled {
            detectors.push(Arc::new(ArpWatchdog::new(&cfg.arp_watch, notify.clone(), ctx)));
        }
        if cfg.dhcp_hunter.enabled {
            detectors.push(Arc::new(DhcpHunter::new(&cfg.dhcp_hunter, notify.clone(), ctx)));
        }
        if cfg.flow_panic.enabled {
            detectors.push(Arc::new(FlowPanic::new(&cfg.flow_panic, notify.clone(), ctx)));
        }
        if cfg.ra_guard.enabled {
            detectors.push(Arc::new(RaGuard::new(&cfg.ra_guard, notify.clone(), ctx)));
        }
        if cfg.mcast_policer.enabled {
            detectors.push(Arc::new(McastPolicer::new(&cfg.mcast_policer, notify.clone(), ctx)));
        }

        for d in &detectors {
            info!("[engine:{}] loaded: {}", ctx.name, d.name());
        }

        Self {
            detectors: RwLock::new(detectors),
            notify,
        }
    }

    /// Start every detector; one failing does not stop the others.
    pub fn start_all(&self, link: &Arc<FrameSock>, shutdown: &CancellationToken) {
        for d in self.detectors.read().iter() {
            if let Err(e) = Arc::clone(d).start(link, shutdown) {
                error!("failed to start detector {}: {e:#}", d.name());
                self.notify
                    .alert(format!("Detector {} failed to start: {e:#}", d.name()));
            }
        }
    }

    /// Deliver one frame to every detector, in registration order.
    pub fn dispatch(&self, data: &[u8], len: usize, vlan_id: u16) {
        let detectors = self.detectors.read();
        for d in detectors.iter() {
            d.on_frame(data, len, vlan_id);
        }
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.read().iter().map(|d| d.name()).collect()
    }
}

/// True when no alert has fired for this key yet, or the last one is older
/// than the cooldown. Monotonic time only.
pub(crate) fn cooldown_over(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.map_or(true, |t| now.duration_since(t) > cooldown)
}
