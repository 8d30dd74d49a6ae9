//! Per-router collection
//!
//! A [`RouterSource`] owns one transport to one router and turns a polling
//! request into the cycle's [`DiscoveredRecord`]s. A failing sub-command
//! contributes nothing (with a warning); an unreachable transport fails the
//! whole source so the caller can decide whether the cycle still stands.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, warn};

use wrtwatch_core::{ConnectionType, DiscoveredRecord, Mac, SourceKind};

use crate::parse::{
    parse_assoclist, parse_dhcp_leases, parse_iw_dev_interfaces, parse_iwinfo_interfaces,
    parse_neighbors, parse_odhcpd_leases, parse_static_hosts,
};
use crate::runner::{SshError, SshRunner};
use crate::ubus::{UbusClient, UbusError};

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("source {name} unreachable over ssh: {source}")]
    Ssh {
        name: String,
        #[source]
        source: SshError,
    },
    #[error("source {name} unreachable over ubus: {source}")]
    Ubus {
        name: String,
        #[source]
        source: UbusError,
    },
}

/// How a source is reached.
pub enum SourceTransport {
    Ssh(SshRunner),
    Ubus(UbusClient),
}

/// One configured router to poll.
pub struct RouterSource {
    pub name: String,
    transport: SourceTransport,
}

impl RouterSource {
    pub fn new(name: impl Into<String>, transport: SourceTransport) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    /// Collect one cycle's records from this source.
    pub async fn collect(&self) -> Result<Vec<DiscoveredRecord>, CollectError> {
        let records = match &self.transport {
            SourceTransport::Ssh(runner) => {
                self.collect_ssh(runner)
                    .await
                    .map_err(|source| CollectError::Ssh {
                        name: self.name.clone(),
                        source,
                    })?
            }
            SourceTransport::Ubus(client) => {
                self.collect_ubus(client)
                    .await
                    .map_err(|source| CollectError::Ubus {
                        name: self.name.clone(),
                        source,
                    })?
            }
        };

        debug!(source = %self.name, records = records.len(), "Source collection complete");
        Ok(records)
    }

    async fn collect_ssh(&self, runner: &SshRunner) -> Result<Vec<DiscoveredRecord>, SshError> {
        let now = Utc::now();

        // Every command ends in `|| true`, so a non-zero exit means the
        // transport itself failed. The first command doubles as the
        // reachability probe.
        let static_out = runner.run("uci show dhcp 2>/dev/null || true").await?;

        let (leases_out, odhcpd_out, neigh_out, iwinfo_out) = tokio::join!(
            runner.run("cat /tmp/dhcp.leases 2>/dev/null || true"),
            runner.run("cat /tmp/odhcpd.leases 2>/dev/null || true"),
            runner.run("ip neigh show 2>/dev/null || cat /proc/net/arp 2>/dev/null || true"),
            runner.run("iwinfo 2>/dev/null || true"),
        );

        let mut records = Vec::new();

        for entry in parse_static_hosts(&static_out) {
            let mut record = DiscoveredRecord::new(entry.mac, SourceKind::DhcpStatic, now);
            record.ipv4 = entry.ip;
            record.hostname = entry.hostname;
            records.push(record);
        }

        for entry in parse_dhcp_leases(&self.sub_output("dhcp.leases", leases_out)) {
            let mut record = DiscoveredRecord::new(entry.mac, SourceKind::DhcpLeaseV4, now);
            record.ipv4 = entry.ip;
            record.hostname = entry.hostname;
            records.push(record);
        }

        for entry in parse_odhcpd_leases(&self.sub_output("odhcpd.leases", odhcpd_out)) {
            let mut record = DiscoveredRecord::new(entry.mac, SourceKind::DhcpLeaseV6, now);
            record.ipv6 = entry.ipv6;
            record.hostname = entry.hostname;
            records.push(record);
        }

        for entry in parse_neighbors(&self.sub_output("neighbors", neigh_out)) {
            records.push(neighbor_record(
                entry.mac,
                entry.ip,
                entry.interface,
                entry.state,
                now,
            ));
        }

        let mut wifi_interfaces =
            parse_iwinfo_interfaces(&self.sub_output("iwinfo", iwinfo_out));
        if wifi_interfaces.is_empty() {
            let iw_out = self.sub_output("iw dev", runner.run("iw dev 2>/dev/null || true").await);
            wifi_interfaces = parse_iw_dev_interfaces(&iw_out);
        }

        let assoc = join_all(wifi_interfaces.iter().map(|interface| async move {
            let command = format!("iwinfo {interface} assoclist 2>/dev/null || true");
            (interface.clone(), runner.run(&command).await)
        }))
        .await;

        for (interface, result) in assoc {
            for station in parse_assoclist(&self.sub_output("assoclist", result)) {
                records.push(wifi_record(station.mac, &interface, station.signal_dbm, now));
            }
        }

        Ok(records)
    }

    async fn collect_ubus(&self, client: &UbusClient) -> Result<Vec<DiscoveredRecord>, UbusError> {
        // Login doubles as the reachability probe; later call failures only
        // cost their own contribution.
        let session = client.login().await?;
        let now = Utc::now();

        let (leases, hints, interfaces) = tokio::join!(
            client.dhcp_leases(&session),
            client.host_hints(&session),
            client.hostapd_interfaces(&session),
        );

        let mut records = Vec::new();

        if let Some((v4, v6)) = self.sub_result("getDHCPLeases", leases) {
            for lease in v4 {
                let Some(mac) = Mac::parse(&lease.macaddr) else {
                    debug!(source = %self.name, raw = %lease.macaddr, "Dropping lease with unparseable MAC");
                    continue;
                };
                let mut record = DiscoveredRecord::new(mac, SourceKind::DhcpLeaseV4, now);
                record.ipv4 = lease.ipaddr.as_deref().and_then(|ip| ip.parse().ok());
                record.hostname = lease.hostname.filter(|h| h != "*");
                records.push(record);
            }
            for lease in v6 {
                let Some(mac) = lease.macaddr.as_deref().and_then(Mac::parse) else {
                    continue;
                };
                let mut record = DiscoveredRecord::new(mac, SourceKind::DhcpLeaseV6, now);
                record.ipv6 = lease
                    .ip6addrs
                    .iter()
                    .find_map(|ip| ip.split('/').next().and_then(|a| a.parse().ok()));
                record.hostname = lease.hostname.filter(|h| h != "*");
                records.push(record);
            }
        }

        if let Some(hints) = self.sub_result("getHostHints", hints) {
            for (raw_mac, hint) in hints {
                let Some(mac) = Mac::parse(&raw_mac) else {
                    debug!(source = %self.name, raw = %raw_mac, "Dropping host hint with unparseable MAC");
                    continue;
                };
                // Host hints aggregate the router's static config and DNS
                // knowledge, so they rank with static entries.
                let mut record = DiscoveredRecord::new(mac, SourceKind::DhcpStatic, now);
                record.ipv4 = hint.ipaddrs.iter().find_map(|ip| ip.parse().ok());
                record.ipv6 = hint.ip6addrs.iter().find_map(|ip| ip.parse().ok());
                record.hostname = hint.name.filter(|h| !h.is_empty() && h != "*");
                records.push(record);
            }
        }

        let interfaces = self
            .sub_result("hostapd list", interfaces)
            .unwrap_or_default();
        let clients = join_all(interfaces.iter().map(|interface| {
            let session = session.clone();
            async move {
                (
                    interface.clone(),
                    client.wifi_clients(&session, interface).await,
                )
            }
        }))
        .await;

        for (interface, result) in clients {
            let Some(stations) = self.sub_result("get_clients", result) else {
                continue;
            };
            for (raw_mac, station) in stations {
                let Some(mac) = Mac::parse(&raw_mac) else {
                    continue;
                };
                records.push(wifi_record(mac, &interface, station.signal, now));
            }
        }

        Ok(records)
    }

    /// Unwrap a sub-command result, degrading to empty output on failure.
    fn sub_output(&self, what: &str, result: Result<String, SshError>) -> String {
        match result {
            Ok(output) => output,
            Err(err) => {
                warn!(source = %self.name, what, error = %err, "Sub-command failed, contributing nothing");
                String::new()
            }
        }
    }

    /// Unwrap a sub-call result, degrading to no contribution on failure.
    fn sub_result<T>(&self, what: &str, result: Result<T, UbusError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(source = %self.name, what, error = %err, "ubus call failed, contributing nothing");
                None
            }
        }
    }
}

fn neighbor_record(
    mac: Mac,
    ip: IpAddr,
    interface: Option<String>,
    state: Option<String>,
    now: DateTime<Utc>,
) -> DiscoveredRecord {
    let mut record = DiscoveredRecord::new(mac, SourceKind::ArpNeighbor, now);
    record.connection_type = Some(match &interface {
        Some(name) if name.starts_with("wl") => ConnectionType::Wireless,
        Some(_) => ConnectionType::Wired,
        None => ConnectionType::Unknown,
    });
    match ip {
        IpAddr::V4(ipv4) => record.ipv4 = Some(ipv4),
        IpAddr::V6(ipv6) => record.ipv6 = Some(ipv6),
    }
    record.interface = interface;
    record.state = state;
    record.online = true;
    record
}

fn wifi_record(
    mac: Mac,
    interface: &str,
    signal_dbm: Option<i32>,
    now: DateTime<Utc>,
) -> DiscoveredRecord {
    let mut record = DiscoveredRecord::new(mac, SourceKind::WifiStation, now);
    record.interface = Some(interface.to_string());
    record.radio = Some(interface.to_string());
    record.signal_dbm = signal_dbm;
    record.connection_type = Some(ConnectionType::Wireless);
    record.online = true;
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbor_record_wired_vs_wireless() {
        let mac = Mac::parse("aa:bb:cc:dd:ee:ff").unwrap();
        let now = Utc::now();

        let wired = neighbor_record(
            mac.clone(),
            "192.168.1.10".parse().unwrap(),
            Some("br-lan".to_string()),
            Some("REACHABLE".to_string()),
            now,
        );
        assert_eq!(wired.connection_type, Some(ConnectionType::Wired));
        assert!(wired.online);
        assert_eq!(wired.ipv4, "192.168.1.10".parse().ok());

        let wireless = neighbor_record(
            mac,
            "fe80::1".parse().unwrap(),
            Some("wlan0".to_string()),
            None,
            now,
        );
        assert_eq!(wireless.connection_type, Some(ConnectionType::Wireless));
        assert_eq!(wireless.ipv6, "fe80::1".parse().ok());
    }

    #[test]
    fn test_wifi_record_fields() {
        let mac = Mac::parse("aa:bb:cc:dd:ee:ff").unwrap();
        let record = wifi_record(mac, "wlan0", Some(-47), Utc::now());
        assert_eq!(record.source_kind, SourceKind::WifiStation);
        assert_eq!(record.interface.as_deref(), Some("wlan0"));
        assert_eq!(record.signal_dbm, Some(-47));
        assert!(record.online);
    }
}
