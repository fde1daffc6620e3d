//! Configuration loading and per-interface effective settings.
//!
//! The file is TOML with one section per concern (`system`, `network`,
//! `algorithms.<detector>`, `alerts`, `telemetry`). Every `algorithms.*`
//! section optionally carries an `overrides.<iface>` table; a scalar
//! override replaces the global value only when non-zero / non-empty,
//! list overrides append.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub system: SystemConfig,
    pub network: NetworkConfig,
    pub algorithms: AlgorithmsConfig,
    pub alerts: AlertsConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Log destination: empty = stderr, "/dev/null" discards everything
    pub log_file: String,

    /// Name prepended to every alert
    pub sensor_name: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_file: String::new(),
            sensor_name: "LoopWarden".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interfaces to monitor; empty list is a fatal startup error
    pub interfaces: Vec<String>,

    /// Per-frame capture length in bytes
    pub snaplen: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            snaplen: 2048,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmsConfig {
    #[serde(rename = "etherfuse")]
    pub ether_fuse: EtherFuseConfig,
    pub active_probe: ActiveProbeConfig,
    pub mac_storm: MacStormConfig,
    pub flap_guard: FlapGuardConfig,
    pub arp_watch: ArpWatchConfig,
    pub dhcp_hunter: DhcpHunterConfig,
    pub flow_panic: FlowPanicConfig,
    pub ra_guard: RaGuardConfig,
    pub mcast_policer: McastPolicerConfig,
}

// ---------------------------------------------------------------------------
// EtherFuse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtherFuseConfig {
    pub enabled: bool,
    /// Hash ring capacity; sized once at construction, global only
    pub history_size: usize,
    pub alert_threshold: u32,
    pub storm_pps_limit: u64,
    pub alert_cooldown: String,
    pub overrides: HashMap<String, EtherFuseOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtherFuseOverride {
    pub alert_threshold: u32,
    pub storm_pps_limit: u64,
    pub alert_cooldown: String,
}

impl Default for EtherFuseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_size: 1024,
            alert_threshold: 5,
            storm_pps_limit: 5000,
            alert_cooldown: "5s".to_string(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EtherFuseEffective {
    pub history_size: usize,
    pub alert_threshold: u32,
    pub storm_pps_limit: u64,
    pub cooldown: Duration,
}

impl EtherFuseConfig {
    pub fn effective(&self, iface: &str) -> EtherFuseEffective {
        let mut eff = EtherFuseEffective {
            history_size: self.history_size,
            alert_threshold: self.alert_threshold,
            storm_pps_limit: self.storm_pps_limit,
            cooldown: duration_or(&self.alert_cooldown, Duration::from_secs(5), "etherfuse.alert_cooldown"),
        };
        if let Some(o) = self.overrides.get(iface) {
            if o.alert_threshold > 0 {
                eff.alert_threshold = o.alert_threshold;
            }
            if o.storm_pps_limit > 0 {
                eff.storm_pps_limit = o.storm_pps_limit;
            }
            if !o.alert_cooldown.is_empty() {
                eff.cooldown = duration_or(&o.alert_cooldown, eff.cooldown, "etherfuse.alert_cooldown");
            }
        }
        // Zero-value usability: never construct a detector that cannot fire
        if eff.history_size == 0 {
            eff.history_size = 1024;
        }
        if eff.alert_threshold == 0 {
            eff.alert_threshold = 5;
        }
        if eff.storm_pps_limit == 0 {
            eff.storm_pps_limit = 5000;
        }
        eff
    }
}

// ---------------------------------------------------------------------------
// ActiveProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveProbeConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub ethertype: u16,
    pub magic_payload: String,
    /// Destination for probe frames; empty = broadcast
    pub target_mac: String,
    /// Broadcast-domain tag embedded in the probe payload
    pub domain: String,
    pub alert_cooldown: String,
    pub overrides: HashMap<String, ActiveProbeOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveProbeOverride {
    pub interval_ms: u64,
    pub domain: String,
}

impl Default for ActiveProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            ethertype: 0xFFFF,
            magic_payload: "LW_PROBE".to_string(),
            target_mac: String::new(),
            domain: String::new(),
            alert_cooldown: "10s".to_string(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActiveProbeEffective {
    pub interval: Duration,
    pub ethertype: u16,
    pub magic_payload: String,
    pub target_mac: String,
    pub domain: String,
    pub cooldown: Duration,
}

impl ActiveProbeConfig {
    pub fn effective(&self, iface: &str) -> ActiveProbeEffective {
        let mut interval_ms = self.interval_ms;
        let mut domain = self.domain.clone();
        if let Some(o) = self.overrides.get(iface) {
            if o.interval_ms > 0 {
                interval_ms = o.interval_ms;
            }
            if !o.domain.is_empty() {
                domain = o.domain.clone();
            }
        }
        if interval_ms == 0 {
            interval_ms = 1000;
        }
        let mut ethertype = self.ethertype;
        if ethertype == 0 {
            ethertype = 0xFFFF;
        }
        let mut magic = self.magic_payload.clone();
        if magic.is_empty() {
            magic = "LW_PROBE".to_string();
        }
        ActiveProbeEffective {
            interval: Duration::from_millis(interval_ms),
            ethertype,
            magic_payload: magic,
            target_mac: self.target_mac.clone(),
            domain,
            cooldown: duration_or(&self.alert_cooldown, Duration::from_secs(10), "active_probe.alert_cooldown"),
        }
    }
}

// ---------------------------------------------------------------------------
// MacStorm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacStormConfig {
    pub enabled: bool,
    pub max_pps_per_mac: u64,
    pub max_tracked_macs: usize,
    pub alert_cooldown: String,
    pub overrides: HashMap<String, MacStormOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MacStormOverride {
    pub max_pps_per_mac: u64,
}

impl Default for MacStormConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pps_per_mac: 1000,
            max_tracked_macs: 10_000,
            alert_cooldown: "30s".to_string(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MacStormEffective {
    pub max_pps_per_mac: u64,
    pub max_tracked_macs: usize,
    pub cooldown: Duration,
}

impl MacStormConfig {
    pub fn effective(&self, iface: &str) -> MacStormEffective {
        let mut max_pps = self.max_pps_per_mac;
        if let Some(o) = self.overrides.get(iface) {
            if o.max_pps_per_mac > 0 {
                max_pps = o.max_pps_per_mac;
            }
        }
        if max_pps == 0 {
            max_pps = 1000;
        }
        let mut max_tracked = self.max_tracked_macs;
        if max_tracked == 0 {
            max_tracked = 10_000;
        }
        MacStormEffective {
            max_pps_per_mac: max_pps,
            max_tracked_macs: max_tracked,
            cooldown: duration_or(&self.alert_cooldown, Duration::from_secs(30), "mac_storm.alert_cooldown"),
        }
    }
}

// ---------------------------------------------------------------------------
// FlapGuard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlapGuardConfig {
    pub enabled: bool,
    pub threshold: u16,
    pub window: String,
    pub alert_cooldown: String,
    pub overrides: HashMap<String, FlapGuardOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlapGuardOverride {
    pub threshold: u16,
    pub window: String,
    pub alert_cooldown: String,
}

impl Default for FlapGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3,
            window: "1s".to_string(),
            alert_cooldown: "30s".to_string(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlapGuardEffective {
    pub threshold: u16,
    pub window: Duration,
    pub cooldown: Duration,
}

impl FlapGuardConfig {
    pub fn effective(&self, iface: &str) -> FlapGuardEffective {
        let mut eff = FlapGuardEffective {
            threshold: self.threshold,
            window: duration_or(&self.window, Duration::from_secs(1), "flap_guard.window"),
            cooldown: duration_or(&self.alert_cooldown, Duration::from_secs(30), "flap_guard.alert_cooldown"),
        };
        if let Some(o) = self.overrides.get(iface) {
            if o.threshold > 0 {
                eff.threshold = o.threshold;
            }
            if !o.window.is_empty() {
                eff.window = duration_or(&o.window, eff.window, "flap_guard.window");
            }
            if !o.alert_cooldown.is_empty() {
                eff.cooldown = duration_or(&o.alert_cooldown, eff.cooldown, "flap_guard.alert_cooldown");
            }
        }
        if eff.threshold == 0 {
            eff.threshold = 3;
        }
        eff
    }
}

// ---------------------------------------------------------------------------
// ArpWatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArpWatchConfig {
    pub enabled: bool,
    pub max_pps: u64,
    pub scan_ip_threshold: usize,
    pub scan_mode_pps: u64,
    pub alert_cooldown: String,
    pub overrides: HashMap<String, ArpWatchOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArpWatchOverride {
    pub max_pps: u64,
    pub scan_ip_threshold: usize,
    pub scan_mode_pps: u64,
}

impl Default for ArpWatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pps: 500,
            scan_ip_threshold: 10,
            scan_mode_pps: 20,
            alert_cooldown: "30s".to_string(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArpWatchEffective {
    pub max_pps: u64,
    pub scan_ip_threshold: usize,
    pub scan_mode_pps: u64,
    pub cooldown: Duration,
}

impl ArpWatchConfig {
    pub fn effective(&self, iface: &str) -> ArpWatchEffective {
        let mut eff = ArpWatchEffective {
            max_pps: self.max_pps,
            scan_ip_threshold: self.scan_ip_threshold,
            scan_mode_pps: self.scan_mode_pps,
            cooldown: duration_or(&self.alert_cooldown, Duration::from_secs(30), "arp_watch.alert_cooldown"),
        };
        if let Some(o) = self.overrides.get(iface) {
            if o.max_pps > 0 {
                eff.max_pps = o.max_pps;
            }
            if o.scan_ip_threshold > 0 {
                eff.scan_ip_threshold = o.scan_ip_threshold;
            }
            if o.scan_mode_pps > 0 {
                eff.scan_mode_pps = o.scan_mode_pps;
            }
        }
        if eff.max_pps == 0 {
            eff.max_pps = 500;
        }
        if eff.scan_ip_threshold == 0 {
            eff.scan_ip_threshold = 10;
        }
        if eff.scan_mode_pps == 0 {
            eff.scan_mode_pps = 20;
        }
        eff
    }
}

// ---------------------------------------------------------------------------
// DhcpHunter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DhcpHunterConfig {
    pub enabled: bool,
    pub trusted_macs: Vec<String>,
    pub trusted_cidrs: Vec<String>,
    pub overrides: HashMap<String, DhcpHunterOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DhcpHunterOverride {
    pub trusted_macs: Vec<String>,
    pub trusted_cidrs: Vec<String>,
}

impl DhcpHunterConfig {
    /// List overrides append to the globals
    pub fn effective_macs(&self, iface: &str) -> Vec<String> {
        let mut macs = self.trusted_macs.clone();
        if let Some(o) = self.overrides.get(iface) {
            macs.extend(o.trusted_macs.iter().cloned());
        }
        macs
    }

    pub fn effective_cidrs(&self, iface: &str) -> Vec<String> {
        let mut cidrs = self.trusted_cidrs.clone();
        if let Some(o) = self.overrides.get(iface) {
            cidrs.extend(o.trusted_cidrs.iter().cloned());
        }
        cidrs
    }
}

// ---------------------------------------------------------------------------
// FlowPanic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowPanicConfig {
    pub enabled: bool,
    pub max_pause_pps: u64,
    pub overrides: HashMap<String, FlowPanicOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowPanicOverride {
    pub max_pause_pps: u64,
}

impl Default for FlowPanicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pause_pps: 10,
            overrides: HashMap::new(),
        }
    }
}

impl FlowPanicConfig {
    pub fn effective_max_pps(&self, iface: &str) -> u64 {
        let mut max = self.max_pause_pps;
        if let Some(o) = self.overrides.get(iface) {
            if o.max_pause_pps > 0 {
                max = o.max_pause_pps;
            }
        }
        if max == 0 {
            max = 10;
        }
        max
    }
}

// ---------------------------------------------------------------------------
// RaGuard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaGuardConfig {
    pub enabled: bool,
    pub trusted_macs: Vec<String>,
    pub overrides: HashMap<String, RaGuardOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaGuardOverride {
    pub trusted_macs: Vec<String>,
}

impl RaGuardConfig {
    pub fn effective_macs(&self, iface: &str) -> Vec<String> {
        let mut macs = self.trusted_macs.clone();
        if let Some(o) = self.overrides.get(iface) {
            macs.extend(o.trusted_macs.iter().cloned());
        }
        macs
    }
}

// ---------------------------------------------------------------------------
// McastPolicer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McastPolicerConfig {
    pub enabled: bool,
    pub max_pps: u64,
    pub overrides: HashMap<String, McastPolicerOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McastPolicerOverride {
    pub max_pps: u64,
}

impl Default for McastPolicerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pps: 5000,
            overrides: HashMap::new(),
        }
    }
}

impl McastPolicerConfig {
    pub fn effective_max_pps(&self, iface: &str) -> u64 {
        let mut max = self.max_pps;
        if let Some(o) = self.overrides.get(iface) {
            if o.max_pps > 0 {
                max = o.max_pps;
            }
        }
        if max == 0 {
            max = 5000;
        }
        max
    }
}

// ---------------------------------------------------------------------------
// Alerts / telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// UDP syslog target "host:port"; empty disables
    pub syslog_server: String,
    pub dampening: DampeningConfig,
    pub webhook: WebhookConfig,
    pub smtp: SmtpConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DampeningConfig {
    pub max_alerts_per_minute: u32,
    pub mute_duration: String,
}

impl Default for DampeningConfig {
    fn default() -> Self {
        Self {
            max_alerts_per_minute: 20,
            mute_duration: "60s".to_string(),
        }
    }
}

impl DampeningConfig {
    pub fn mute_duration(&self) -> Duration {
        duration_or(&self.mute_duration, Duration::from_secs(60), "alerts.dampening.mute_duration")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub to: String,
    pub from: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: ":9090".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Duration strings
// ---------------------------------------------------------------------------

/// Parse a duration string like "500ms", "5s", "2m", "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (value, unit) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1u64)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else {
        return None;
    };
    let value: f64 = value.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_millis((value * unit as f64) as u64))
}

/// Parse a duration option, falling back to the documented default with a
/// warning on malformed input. Never fatal.
pub fn duration_or(s: &str, default: Duration, what: &str) -> Duration {
    if s.is_empty() {
        return default;
    }
    match parse_duration(s) {
        Some(d) if d > Duration::ZERO => d,
        _ => {
            warn!("invalid {} '{}', using default {:?}", what, s, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("nope"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_duration_or_falls_back() {
        let d = duration_or("garbage", Duration::from_secs(5), "test");
        assert_eq!(d, Duration::from_secs(5));
        let d = duration_or("", Duration::from_secs(7), "test");
        assert_eq!(d, Duration::from_secs(7));
        let d = duration_or("3s", Duration::from_secs(5), "test");
        assert_eq!(d, Duration::from_secs(3));
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.system.sensor_name, "LoopWarden");
        assert_eq!(cfg.network.snaplen, 2048);
        assert!(cfg.network.interfaces.is_empty());
        assert_eq!(cfg.algorithms.ether_fuse.history_size, 1024);
        assert_eq!(cfg.algorithms.arp_watch.max_pps, 500);
        assert_eq!(cfg.alerts.dampening.max_alerts_per_minute, 20);
        assert!(!cfg.telemetry.enabled);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [system]
            sensor_name = "edge-01"

            [network]
            interfaces = ["eno1", "eno2"]
            snaplen = 4096

            [algorithms.etherfuse]
            history_size = 2048
            alert_threshold = 8

            [algorithms.etherfuse.overrides.eno2]
            alert_threshold = 20

            [algorithms.arp_watch]
            max_pps = 200

            [algorithms.dhcp_hunter]
            enabled = true
            trusted_macs = ["00:11:22:33:44:55"]
            trusted_cidrs = ["192.168.1.0/24"]

            [algorithms.dhcp_hunter.overrides.eno2]
            trusted_macs = ["aa:bb:cc:dd:ee:ff"]

            [telemetry]
            enabled = true
            listen_address = "127.0.0.1:9095"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.network.interfaces, vec!["eno1", "eno2"]);
        assert_eq!(cfg.system.sensor_name, "edge-01");
        assert_eq!(cfg.algorithms.ether_fuse.history_size, 2048);
        assert!(cfg.telemetry.enabled);

        // Scalar override replaces only on the named interface
        let eff = cfg.algorithms.ether_fuse.effective("eno1");
        assert_eq!(eff.alert_threshold, 8);
        let eff = cfg.algorithms.ether_fuse.effective("eno2");
        assert_eq!(eff.alert_threshold, 20);
        assert_eq!(eff.history_size, 2048);

        // List overrides append
        let macs = cfg.algorithms.dhcp_hunter.effective_macs("eno2");
        assert_eq!(macs, vec!["00:11:22:33:44:55", "aa:bb:cc:dd:ee:ff"]);
        let macs = cfg.algorithms.dhcp_hunter.effective_macs("eno1");
        assert_eq!(macs, vec!["00:11:22:33:44:55"]);
    }

    #[test]
    fn test_zero_override_keeps_global() {
        let mut cfg = ArpWatchConfig::default();
        cfg.overrides.insert(
            "eno1".to_string(),
            ArpWatchOverride {
                max_pps: 0,
                scan_ip_threshold: 50,
                scan_mode_pps: 0,
            },
        );
        let eff = cfg.effective("eno1");
        assert_eq!(eff.max_pps, 500);
        assert_eq!(eff.scan_ip_threshold, 50);
        assert_eq!(eff.scan_mode_pps, 20);
    }

    #[test]
    fn test_invalid_cooldown_uses_default() {
        let mut cfg = EtherFuseConfig::default();
        cfg.alert_cooldown = "not-a-duration".to_string();
        let eff = cfg.effective("eno1");
        assert_eq!(eff.cooldown, Duration::from_secs(5));
    }
}
