//! MAC address classification for alert enrichment.
//!
//! Identifies the protocol behind well-known link-local multicast and
//! virtual-router addresses so alert text can say what a destination (or a
//! flapping source) actually is. Cold path only: invoked while formatting
//! alerts, never per frame.

/// Classification of a MAC address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacClass {
    pub name: &'static str,
    pub description: String,
    /// True when the address belongs to switching/routing infrastructure
    /// (STP, LACP, gateways); losing or flapping these is critical.
    pub is_critical: bool,
}

impl MacClass {
    fn fixed(name: &'static str, description: &str, is_critical: bool) -> Self {
        Self {
            name,
            description: description.to_string(),
            is_critical,
        }
    }
}

/// Identify the purpose of a MAC address.
pub fn classify_mac(mac: &[u8; 6]) -> MacClass {
    // 1. Exact matches
    if let Some(class) = exact_match(mac) {
        return class;
    }

    // 2. Prefix / range rules
    if let Some(class) = prefix_match(mac) {
        return class;
    }

    // 3. Fallback on the individual/group bit
    if is_unicast(mac) {
        MacClass::fixed("Unicast", "Standard Station Traffic", false)
    } else {
        MacClass::fixed("Unknown Multicast", "Proprietary or unregistered multicast", false)
    }
}

fn exact_match(mac: &[u8; 6]) -> Option<MacClass> {
    let class = match mac {
        [0xff, 0xff, 0xff, 0xff, 0xff, 0xff] => {
            MacClass::fixed("Broadcast", "General Broadcast (ARP, DHCP, flooding)", false)
        }

        // IEEE 802.1 control plane
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x00] => {
            MacClass::fixed("STP", "Spanning Tree Protocol (BPDU)", true)
        }
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x01] => {
            MacClass::fixed("Pause", "Ethernet Flow Control (Pause Frames)", true)
        }
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x02] => {
            MacClass::fixed("LACP/OAM", "Link Aggregation / Slow Protocols", true)
        }
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x03] => {
            MacClass::fixed("LACP/802.1x", "Port Authentication / LACP", true)
        }
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e] => {
            MacClass::fixed("LLDP", "Link Layer Discovery Protocol", true)
        }
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x20] => {
            MacClass::fixed("GMRP", "GARP Multicast Registration Protocol", true)
        }
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x21] => {
            MacClass::fixed("GVRP", "GARP VLAN Registration Protocol", true)
        }

        // Cisco proprietary
        [0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcc] => {
            MacClass::fixed("Cisco Discovery", "CDP / VTP / DTP / PAgP / UDLD", true)
        }
        [0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcd] => {
            MacClass::fixed("Cisco SSTP", "Shared Spanning Tree Protocol", true)
        }
        [0x01, 0x00, 0x0c, 0xdd, 0xdd, 0xdd] => {
            MacClass::fixed("Cisco CGMP", "Cisco Group Management Protocol", false)
        }

        // Well-known IPv4 multicast groups
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0x01] => {
            MacClass::fixed("IPv4 All-Hosts", "All Systems on this Subnet", false)
        }
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0x02] => {
            MacClass::fixed("IPv4 All-Routers", "All Routers on this Subnet", true)
        }
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0x05] => {
            MacClass::fixed("OSPF", "Open Shortest Path First (All OSPF Routers)", true)
        }
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0x06] => {
            MacClass::fixed("OSPF DR", "OSPF Designated Routers", true)
        }
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0x12] => {
            MacClass::fixed("VRRP", "Virtual Router Redundancy Protocol (IPv4)", true)
        }
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb] => {
            MacClass::fixed("mDNS", "Multicast DNS (Bonjour/Apple)", false)
        }
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0xfc] => {
            MacClass::fixed("LLMNR", "Link-Local Multicast Name Resolution", false)
        }
        [0x01, 0x00, 0x5e, 0x7f, 0xff, 0xfa] => {
            MacClass::fixed("SSDP", "UPnP / Simple Service Discovery", false)
        }

        _ => return None,
    };
    Some(class)
}

fn prefix_match(mac: &[u8; 6]) -> Option<MacClass> {
    // IPv4 multicast range 01:00:5E:xx:xx:xx
    if mac[0] == 0x01 && mac[1] == 0x00 && mac[2] == 0x5e {
        return Some(MacClass::fixed(
            "IPv4 Multicast",
            "IP Multicast Group Traffic",
            false,
        ));
    }

    // IPv6 multicast range 33:33:xx:xx:xx:xx
    if mac[0] == 0x33 && mac[1] == 0x33 {
        if mac[2] == 0x00 && mac[3] == 0x00 && mac[4] == 0x00 {
            if mac[5] == 0x01 {
                return Some(MacClass::fixed(
                    "IPv6 All-Nodes",
                    "Neighbor Discovery / All Nodes",
                    false,
                ));
            }
            if mac[5] == 0x02 {
                return Some(MacClass::fixed(
                    "IPv6 All-Routers",
                    "IPv6 Router Advertisement",
                    true,
                ));
            }
        }
        return Some(MacClass::fixed(
            "IPv6 Multicast",
            "IPv6 Neighbor Discovery / Services",
            false,
        ));
    }

    // HSRP (Cisco) v1: 00:00:0C:07:AC:xx
    if mac[0] == 0x00 && mac[1] == 0x00 && mac[2] == 0x0c && mac[3] == 0x07 && mac[4] == 0xac {
        return Some(MacClass {
            name: "HSRP-v1",
            description: format!("Cisco Standby Router (Group {})", mac[5]),
            is_critical: true,
        });
    }

    // HSRP (Cisco) v2: 00:00:0C:9F:F0:xx
    if mac[0] == 0x00 && mac[1] == 0x00 && mac[2] == 0x0c && mac[3] == 0x9f && mac[4] == 0xf0 {
        return Some(MacClass {
            name: "HSRP-v2",
            description: format!("Cisco Standby Router v2 (Group {})", mac[5]),
            is_critical: true,
        });
    }

    // VRRP virtual MAC ranges 00:00:5E:00:01:xx (v4) / 00:00:5E:00:02:xx (v6)
    if mac[0] == 0x00
        && mac[1] == 0x00
        && mac[2] == 0x5e
        && mac[3] == 0x00
        && (mac[4] == 0x01 || mac[4] == 0x02)
    {
        return Some(MacClass {
            name: "VRRP",
            description: format!("Virtual Gateway (VRID {})", mac[5]),
            is_critical: true,
        });
    }

    None
}

/// The group bit is the least-significant bit of the first byte.
pub fn is_unicast(mac: &[u8; 6]) -> bool {
    mac[0] & 0x01 == 0
}

pub fn is_broadcast(mac: &[u8; 6]) -> bool {
    mac.iter().all(|&b| b == 0xff)
}

/// IPv6 solicited-node multicast prefix used by Neighbor Discovery.
pub fn is_ipv6_neighbor_discovery(mac: &[u8; 6]) -> bool {
    mac[0] == 0x33 && mac[1] == 0x33 && mac[2] == 0xff
}

/// Lower-case colon-separated form used in alert text and allow-lists.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Parse "aa:bb:cc:dd:ee:ff" (case-insensitive, also accepts '-').
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.trim().split(|c| c == ':' || c == '-');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}
