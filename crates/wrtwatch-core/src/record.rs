//! Raw sighting and snapshot types
//!
//! A [`DiscoveredRecord`] is one sighting of one MAC by one collector within
//! a polling cycle. The aggregator folds all of a cycle's records into
//! per-device [`DeviceSnapshot`]s keyed by resolved primary MAC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::mac::Mac;

/// Which collector produced a sighting.
///
/// The variant order pins the scalar-merge precedence: static DHCP host
/// entries are the most trustworthy source of hostnames/IPs, dynamic leases
/// next, live neighbor/association sightings last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// `uci show dhcp` static host entry
    DhcpStatic,
    /// dnsmasq v4 lease
    DhcpLeaseV4,
    /// odhcpd v6 lease
    DhcpLeaseV6,
    /// `ip neigh` / ARP table entry
    ArpNeighbor,
    /// wireless association list entry
    WifiStation,
}

impl SourceKind {
    /// Merge priority; lower wins for scalar fields.
    pub fn precedence(self) -> u8 {
        match self {
            Self::DhcpStatic => 0,
            Self::DhcpLeaseV4 => 1,
            Self::DhcpLeaseV6 => 2,
            Self::ArpNeighbor => 3,
            Self::WifiStation => 4,
        }
    }
}

/// How a device is attached to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wired,
    Wireless,
    Unknown,
}

impl Default for ConnectionType {
    fn default() -> Self {
        Self::Unknown
    }
}

/// One raw sighting of a MAC within a polling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredRecord {
    /// Canonical MAC address of the sighting
    pub mac: Mac,
    /// Interface the sighting was seen on (e.g. `br-lan`, `wlan0`)
    pub interface: Option<String>,
    /// Radio/band identifier for wireless sightings
    pub radio: Option<String>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Sanitized hostname; never the DHCP placeholder `*`
    pub hostname: Option<String>,
    /// Source-defined state string (e.g. `REACHABLE`, `STALE`)
    pub state: Option<String>,
    pub signal_dbm: Option<i32>,
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
    /// Whether this source considers the device currently connected
    pub online: bool,
    pub connection_type: Option<ConnectionType>,
    pub source_kind: SourceKind,
    pub timestamp: DateTime<Utc>,
}

impl DiscoveredRecord {
    /// A record with only the mandatory fields set.
    pub fn new(mac: Mac, source_kind: SourceKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            mac,
            interface: None,
            radio: None,
            ipv4: None,
            ipv6: None,
            hostname: None,
            state: None,
            signal_dbm: None,
            rx_bytes: None,
            tx_bytes: None,
            online: false,
            connection_type: None,
            source_kind,
            timestamp,
        }
    }
}

/// One interface/IP/state tuple contributing to a snapshot, kept for
/// diagnostics. Deduplicated by full field equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDetail {
    pub interface: Option<String>,
    pub ip: Option<IpAddr>,
    pub state: Option<String>,
}

/// Per-device view of one polling cycle, keyed by primary MAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub primary_mac: Mac,
    /// All MACs known to belong to this device; always contains the primary
    pub member_macs: BTreeSet<Mac>,
    pub interfaces: BTreeSet<String>,
    pub radios: BTreeSet<String>,
    pub ipv4_addresses: BTreeSet<Ipv4Addr>,
    pub ipv6_addresses: BTreeSet<Ipv6Addr>,
    pub resolved_hostname: Option<String>,
    pub connection_type: ConnectionType,
    pub state: Option<String>,
    pub signal_dbm: Option<i32>,
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub connections: Vec<ConnectionDetail>,
}

impl DeviceSnapshot {
    /// An empty snapshot for a device with no sightings yet.
    pub fn new(primary_mac: Mac) -> Self {
        let mut member_macs = BTreeSet::new();
        member_macs.insert(primary_mac.clone());
        Self {
            primary_mac,
            member_macs,
            interfaces: BTreeSet::new(),
            radios: BTreeSet::new(),
            ipv4_addresses: BTreeSet::new(),
            ipv6_addresses: BTreeSet::new(),
            resolved_hostname: None,
            connection_type: ConnectionType::Unknown,
            state: None,
            signal_dbm: None,
            rx_bytes: None,
            tx_bytes: None,
            online: false,
            last_seen: None,
            connections: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(SourceKind::DhcpStatic.precedence() < SourceKind::DhcpLeaseV4.precedence());
        assert!(SourceKind::DhcpLeaseV4.precedence() < SourceKind::DhcpLeaseV6.precedence());
        assert!(SourceKind::DhcpLeaseV6.precedence() < SourceKind::ArpNeighbor.precedence());
        assert!(SourceKind::ArpNeighbor.precedence() < SourceKind::WifiStation.precedence());
    }

    #[test]
    fn test_source_kind_serde() {
        let json = serde_json::to_string(&SourceKind::DhcpLeaseV4).unwrap();
        assert_eq!(json, "\"dhcp-lease-v4\"");
        let back: SourceKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SourceKind::DhcpLeaseV4);
    }

    #[test]
    fn test_snapshot_contains_primary() {
        let mac = Mac::parse("aa:bb:cc:dd:ee:ff").unwrap();
        let snapshot = DeviceSnapshot::new(mac.clone());
        assert!(snapshot.member_macs.contains(&mac));
    }
}
