//! Prometheus telemetry registry.
//!
//! Metric names are defined centrally and registered through
//! `describe_all()`. The recorder from `metrics-exporter-prometheus` serves
//! `GET /metrics` on the configured listen address. Hot-path accounting
//! (`track_frame`) reads raw bytes directly and keeps label cardinality
//! bounded: EtherTypes collapse into a fixed set of groups so a fuzzing
//! source cannot explode the registry.

use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tracing::{info, warn};

/// Total frames processed, by EtherType group and cast type.
pub const RX_PACKETS_TOTAL: &str = "loopwarden_rx_packets_total";

/// Total bytes processed, by EtherType group.
pub const RX_BYTES_TOTAL: &str = "loopwarden_rx_bytes_total";

/// Alerts triggered by detection engines.
pub const ENGINE_HITS_TOTAL: &str = "loopwarden_engine_hits_total";

/// Per-frame processing latency in nanoseconds (histogram, 1 µs – 1 ms).
pub const PROCESSING_NS: &str = "loopwarden_processing_ns";

/// Frames dropped by the kernel because the socket buffer overflowed.
pub const SOCKET_DROPS_TOTAL: &str = "loopwarden_socket_drops_total";

/// Frame size distribution (standard Ethernet buckets).
pub const PACKET_SIZE_BYTES: &str = "loopwarden_packet_size_bytes";

/// ARP operation breakdown (request / reply / other).
pub const ARP_OPS_TOTAL: &str = "loopwarden_arp_ops_total";

/// Latency buckets in nanoseconds, 1 µs to 1 ms.
pub const PROCESSING_BUCKETS: [f64; 7] = [
    1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0, 500_000.0, 1_000_000.0,
];

/// Frame size buckets covering runt to jumbo.
pub const SIZE_BUCKETS: [f64; 8] = [60.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 1518.0, 9000.0];

/// Install the global recorder and start the scrape listener.
///
/// Call once per process, before the interface stacks start.
pub fn install(listen_address: &str) -> Result<()> {
    let addr: SocketAddr = expand_listen_addr(listen_address)
        .parse()
        .map_err(|e| anyhow!("invalid telemetry listen address '{listen_address}': {e}"))?;

    if addr.ip().is_unspecified() {
        warn!(listen_addr = %addr, "metrics endpoint exposed on all interfaces");
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(PROCESSING_NS.to_string()), &PROCESSING_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(PACKET_SIZE_BYTES.to_string()), &SIZE_BUCKETS)?
        .install()
        .map_err(|e| anyhow!("failed to install metrics recorder: {e}"))?;

    describe_all();
    info!(listen_addr = %addr, "metrics endpoint active");
    Ok(())
}

/// Register HELP text for every metric.
pub fn describe_all() {
    describe_counter!(
        RX_PACKETS_TOTAL,
        "Total packets processed by protocol and cast type"
    );
    describe_counter!(RX_BYTES_TOTAL, "Total bytes processed by protocol");
    describe_counter!(
        ENGINE_HITS_TOTAL,
        "Alerts triggered by detection engines"
    );
    describe_histogram!(
        PROCESSING_NS,
        "Time taken to process a packet in nanoseconds"
    );
    describe_counter!(
        SOCKET_DROPS_TOTAL,
        "Packets dropped by the kernel interface driver due to buffer overflow"
    );
    describe_histogram!(PACKET_SIZE_BYTES, "Distribution of packet sizes in bytes");
    describe_counter!(ARP_OPS_TOTAL, "ARP operations breakdown (request/reply)");
}

/// Account a raw frame: size, cast type, EtherType group and ARP opcode.
/// Zero-alloc aside from the label strings the recorder interns.
pub fn track_frame(data: &[u8]) {
    let length = data.len();
    if length < 14 {
        return;
    }

    histogram!(PACKET_SIZE_BYTES).record(length as f64);

    // The kernel filter already rejected unicast, so anything that is not
    // the all-ones address is multicast.
    let cast = if data[0] & data[1] & data[2] & data[3] & data[4] & data[5] == 0xff {
        "broadcast"
    } else {
        "multicast"
    };

    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    let group = ethertype_group(ethertype);

    counter!(RX_PACKETS_TOTAL, "ethertype" => group, "cast" => cast).increment(1);
    counter!(RX_BYTES_TOTAL, "ethertype" => group).increment(length as u64);

    // ARP opcode detail: Ethernet header (14) + opcode offset (6) = byte 20
    if ethertype == 0x0806 && length >= 22 {
        let op = match u16::from_be_bytes([data[20], data[21]]) {
            1 => "request",
            2 => "reply",
            _ => "other",
        };
        counter!(ARP_OPS_TOTAL, "operation" => op).increment(1);
    }
}

// ":9090" shorthand binds every interface
fn expand_listen_addr(listen_address: &str) -> String {
    if let Some(port) = listen_address.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        listen_address.to_string()
    }
}

fn ethertype_group(ethertype: u16) -> &'static str {
    match ethertype {
        0x0800 => "IPv4",
        0x0806 => "ARP",
        0x86DD => "IPv6",
        0x8100 | 0x88A8 => "VLAN_Tagged",
        0x8808 => "FlowControl",
        0x88CC => "LLDP",
        // Group the long tail so a fuzzed EtherType cannot blow up cardinality
        v if v < 1500 => "Non-IP",
        _ => "Other_Eth2",
    }
}

/// Record a detector alert.
pub fn engine_hit(iface: &str, engine: &'static str, threat_type: &'static str) {
    counter!(
        ENGINE_HITS_TOTAL,
        "iface" => iface.to_string(),
        "engine" => engine,
        "threat_type" => threat_type
    )
    .increment(1);
}

/// Record per-frame processing latency.
pub fn observe_processing(iface: &str, nanos: u64) {
    histogram!(PROCESSING_NS, "iface" => iface.to_string()).record(nanos as f64);
}

/// Add kernel-reported drops for an interface.
pub fn add_socket_drops(iface: &str, delta: u64) {
    counter!(SOCKET_DROPS_TOTAL, "iface" => iface.to_string()).increment(delta);
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        RX_PACKETS_TOTAL,
        RX_BYTES_TOTAL,
        ENGINE_HITS_TOTAL,
        PROCESSING_NS,
        SOCKET_DROPS_TOTAL,
        PACKET_SIZE_BYTES,
        ARP_OPS_TOTAL,
    ];

    #[test]
    fn all_metrics_use_loopwarden_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("loopwarden_"),
                "metric '{}' missing prefix",
                name
            );
        }
    }

    #[test]
    fn buckets_are_sorted() {
        for w in PROCESSING_BUCKETS.windows(2) {
            assert!(w[1] > w[0]);
        }
        for w in SIZE_BUCKETS.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // Safe without an installed recorder
        describe_all();
    }

    #[test]
    fn ethertype_grouping_is_bounded() {
        assert_eq!(ethertype_group(0x0800), "IPv4");
        assert_eq!(ethertype_group(0x0806), "ARP");
        assert_eq!(ethertype_group(0x86DD), "IPv6");
        assert_eq!(ethertype_group(0x8100), "VLAN_Tagged");
        assert_eq!(ethertype_group(0x8808), "FlowControl");
        assert_eq!(ethertype_group(0x88CC), "LLDP");
        assert_eq!(ethertype_group(0x0042), "Non-IP");
        assert_eq!(ethertype_group(0xBEEF), "Other_Eth2");
    }

    #[test]
    fn listen_addr_shorthand_expands() {
        assert_eq!(expand_listen_addr(":9090"), "0.0.0.0:9090");
        assert_eq!(expand_listen_addr("127.0.0.1:9095"), "127.0.0.1:9095");
    }

    #[test]
    fn track_frame_handles_short_frames() {
        // Must not panic or index out of bounds
        track_frame(&[]);
        track_frame(&[0xff; 13]);
        track_frame(&[0xff; 14]);
    }
}
