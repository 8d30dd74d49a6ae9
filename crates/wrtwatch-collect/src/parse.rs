//! Parsers for OpenWrt command output
//!
//! Pure `&str -> entries` functions, one per command. Every MAC is
//! canonicalized through [`Mac::parse`] on the way in; lines without a
//! usable MAC are skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use wrtwatch_core::Mac;

/// Static host entry from `uci show dhcp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHostEntry {
    pub mac: Mac,
    pub ip: Option<Ipv4Addr>,
    pub hostname: Option<String>,
}

/// dnsmasq lease from `/tmp/dhcp.leases`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLeaseEntry {
    pub mac: Mac,
    pub ip: Option<Ipv4Addr>,
    pub hostname: Option<String>,
}

/// odhcpd v6 lease from `/tmp/odhcpd.leases`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdhcpdLeaseEntry {
    pub mac: Mac,
    pub ipv6: Option<Ipv6Addr>,
    pub hostname: Option<String>,
}

/// Neighbor table entry from `ip neigh show` or `/proc/net/arp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub mac: Mac,
    pub ip: IpAddr,
    pub interface: Option<String>,
    pub state: Option<String>,
}

/// Associated station from `iwinfo <iface> assoclist`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiStationEntry {
    pub mac: Mac,
    pub signal_dbm: Option<i32>,
}

/// The dnsmasq placeholder for "no hostname".
fn sanitize_hostname(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "*" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse `uci show dhcp` output into static host entries.
///
/// Relevant lines look like:
/// `dhcp.@host[0].name='printer'`
/// `dhcp.@host[0].mac='AA:BB:CC:DD:EE:FF'`
/// `dhcp.@host[0].ip='192.168.1.5'`
pub fn parse_static_hosts(output: &str) -> Vec<StaticHostEntry> {
    let mut hosts: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

    for line in output.lines() {
        if !line.starts_with("dhcp.@host") {
            continue;
        }
        let Some((path, value)) = line.split_once('=') else {
            continue;
        };
        // Path tail: `@host[<idx>].<field>`
        let Some(rest) = path.strip_prefix("dhcp.@host[") else {
            continue;
        };
        let Some((idx, field)) = rest.split_once("].") else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
        hosts
            .entry(idx.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    hosts
        .into_values()
        .filter_map(|fields| {
            let mac = Mac::parse(fields.get("mac")?)?;
            Some(StaticHostEntry {
                mac,
                ip: fields.get("ip").and_then(|v| v.parse().ok()),
                hostname: fields.get("name").and_then(|v| sanitize_hostname(v)),
            })
        })
        .collect()
}

/// Parse `/tmp/dhcp.leases` output.
///
/// Format: `<expiry> <mac> <ip> <hostname> <client-id>`
pub fn parse_dhcp_leases(output: &str) -> Vec<DhcpLeaseEntry> {
    let mut leases = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let Some(mac) = Mac::parse(parts[1]) else {
            continue;
        };
        leases.push(DhcpLeaseEntry {
            mac,
            ip: parts[2].parse().ok(),
            hostname: sanitize_hostname(parts[3]),
        });
    }

    leases
}

/// Parse `/tmp/odhcpd.leases` output.
///
/// odhcpd lease lines vary across releases; take any token that is a MAC,
/// any token that parses as an IPv6 address, and the first remaining
/// non-numeric token as the hostname.
pub fn parse_odhcpd_leases(output: &str) -> Vec<OdhcpdLeaseEntry> {
    let mut leases = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let mut mac = None;
        let mut ipv6 = None;
        let mut hostname = None;
        for part in &parts {
            if mac.is_none() && part.len() == 17 {
                if let Some(parsed) = Mac::parse(part) {
                    mac = Some(parsed);
                    continue;
                }
            }
            if ipv6.is_none() {
                // Accept a trailing prefix length as odhcpd prints it
                let addr = part.split_once('/').map(|(a, _)| a).unwrap_or(part);
                if let Ok(parsed) = Ipv6Addr::from_str(addr) {
                    ipv6 = Some(parsed);
                    continue;
                }
            }
            if hostname.is_none()
                && !part.contains(':')
                && !part.chars().all(|c| c.is_ascii_hexdigit())
            {
                hostname = sanitize_hostname(part);
            }
        }

        if let Some(mac) = mac {
            leases.push(OdhcpdLeaseEntry { mac, ipv6, hostname });
        }
    }

    leases
}

/// Parse neighbor output, accepting both `ip neigh show` lines and the
/// `/proc/net/arp` fallback table.
pub fn parse_neighbors(output: &str) -> Vec<NeighborEntry> {
    let mut neighbors = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() || line.starts_with("IP address") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let entry = if parts.contains(&"lladdr") || parts.contains(&"dev") {
            parse_ip_neigh_parts(&parts)
        } else {
            parse_proc_arp_parts(&parts)
        };
        if let Some(entry) = entry {
            neighbors.push(entry);
        }
    }

    neighbors
}

/// One line of `ip neigh show`:
/// `192.168.1.10 dev br-lan lladdr aa:bb:cc:dd:ee:ff REACHABLE`
fn parse_ip_neigh_parts(parts: &[&str]) -> Option<NeighborEntry> {
    let ip = IpAddr::from_str(parts.first()?).ok()?;
    let lladdr_idx = parts.iter().position(|&p| p == "lladdr")?;
    let mac = Mac::parse(parts.get(lladdr_idx + 1)?)?;
    let interface = parts
        .iter()
        .position(|&p| p == "dev")
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string());
    // State is the trailing keyword; FAILED/INCOMPLETE lines carry no lladdr
    // and were already rejected above
    let state = parts
        .last()
        .filter(|s| s.chars().all(|c| c.is_ascii_uppercase()))
        .map(|s| s.to_string());

    Some(NeighborEntry { mac, ip, interface, state })
}

/// One line of `/proc/net/arp`:
/// `192.168.1.10  0x1  0x2  aa:bb:cc:dd:ee:ff  *  br-lan`
fn parse_proc_arp_parts(parts: &[&str]) -> Option<NeighborEntry> {
    if parts.len() < 6 {
        return None;
    }
    let ip = IpAddr::from_str(parts[0]).ok()?;
    let mac = Mac::parse(parts[3])?;

    Some(NeighborEntry {
        mac,
        ip,
        interface: Some(parts[5].to_string()),
        state: None,
    })
}

/// Wireless interface names from `iwinfo` overview output. Interface lines
/// are unindented (`wlan0  ESSID: "home"`); detail lines are indented and
/// skipped.
pub fn parse_iwinfo_interfaces(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter(|line| !line.starts_with(|c: char| c.is_whitespace()))
        .filter_map(|line| line.split_whitespace().next())
        .map(|s| s.to_string())
        .collect()
}

/// Wireless interface names from `iw dev` output (`\tInterface wlan0`).
pub fn parse_iw_dev_interfaces(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next()? != "Interface" {
                return None;
            }
            parts.next()
        })
        .map(|s| s.to_string())
        .collect()
}

/// Associated stations from `iwinfo <iface> assoclist`. Station lines carry
/// the MAC and a signal reading:
/// `AA:BB:CC:DD:EE:FF  -52 dBm / -95 dBm (SNR 43)  90 ms ago`
pub fn parse_assoclist(output: &str) -> Vec<WifiStationEntry> {
    let mut stations = Vec::new();

    for line in output.lines() {
        let Some(mac) = Mac::parse(line) else {
            continue;
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let signal_dbm = parts
            .iter()
            .position(|&p| p == "dBm")
            .and_then(|idx| idx.checked_sub(1))
            .and_then(|idx| parts.get(idx))
            .and_then(|s| s.parse().ok());
        stations.push(WifiStationEntry { mac, signal_dbm });
    }

    stations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> Mac {
        Mac::parse(s).unwrap()
    }

    #[test]
    fn test_parse_static_hosts() {
        let output = "\
dhcp.@host[0]=host
dhcp.@host[0].name='printer'
dhcp.@host[0].mac='aa:bb:cc:dd:ee:ff'
dhcp.@host[0].ip='192.168.1.5'
dhcp.@host[1]=host
dhcp.@host[1].mac='11:22:33:44:55:66'
dhcp.lan=dhcp
dhcp.lan.interface='lan'";
        let hosts = parse_static_hosts(output);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].mac, mac("aa:bb:cc:dd:ee:ff"));
        assert_eq!(hosts[0].hostname.as_deref(), Some("printer"));
        assert_eq!(hosts[0].ip, "192.168.1.5".parse().ok());
        assert_eq!(hosts[1].hostname, None);
        assert_eq!(hosts[1].ip, None);
    }

    #[test]
    fn test_parse_static_hosts_skips_macless_section() {
        let output = "dhcp.@host[0].name='ghost'";
        assert!(parse_static_hosts(output).is_empty());
    }

    #[test]
    fn test_parse_dhcp_leases() {
        let output = "\
1700000300 aa:bb:cc:dd:ee:ff 192.168.1.10 laptop 01:aa:bb:cc:dd:ee:ff
1700000400 11:22:33:44:55:66 192.168.1.11 * *";
        let leases = parse_dhcp_leases(output);
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[0].hostname.as_deref(), Some("laptop"));
        assert_eq!(leases[0].ip, "192.168.1.10".parse().ok());
        // `*` means no hostname
        assert_eq!(leases[1].hostname, None);
    }

    #[test]
    fn test_parse_dhcp_leases_skips_short_and_malformed() {
        let output = "\
1700000300 aa:bb:cc:dd:ee
1700000300 not-a-mac 192.168.1.10 laptop x";
        assert!(parse_dhcp_leases(output).is_empty());
    }

    #[test]
    fn test_parse_odhcpd_leases() {
        let output =
            "# odhcpd lease file\n00000297 aa:bb:cc:dd:ee:ff fd00::a1b2 laptop6 128";
        let leases = parse_odhcpd_leases(output);
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].mac, mac("aa:bb:cc:dd:ee:ff"));
        assert_eq!(leases[0].ipv6, "fd00::a1b2".parse().ok());
        assert_eq!(leases[0].hostname.as_deref(), Some("laptop6"));
    }

    #[test]
    fn test_parse_neighbors_ip_neigh() {
        let output = "\
192.168.1.10 dev br-lan lladdr aa:bb:cc:dd:ee:ff REACHABLE
192.168.1.77 dev br-lan  FAILED
fe80::1 dev wlan0 lladdr 11:22:33:44:55:66 router STALE";
        let neighbors = parse_neighbors(output);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].ip, "192.168.1.10".parse::<IpAddr>().unwrap());
        assert_eq!(neighbors[0].interface.as_deref(), Some("br-lan"));
        assert_eq!(neighbors[0].state.as_deref(), Some("REACHABLE"));
        assert_eq!(neighbors[1].interface.as_deref(), Some("wlan0"));
        assert_eq!(neighbors[1].state.as_deref(), Some("STALE"));
    }

    #[test]
    fn test_parse_neighbors_proc_arp_fallback() {
        let output = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.10     0x1         0x2         aa:bb:cc:dd:ee:ff     *        br-lan";
        let neighbors = parse_neighbors(output);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].mac, mac("aa:bb:cc:dd:ee:ff"));
        assert_eq!(neighbors[0].interface.as_deref(), Some("br-lan"));
        assert_eq!(neighbors[0].state, None);
    }

    #[test]
    fn test_parse_iwinfo_interfaces() {
        let output = "\
wlan0     ESSID: \"home\"
          Access Point: AA:BB:CC:DD:EE:FF
          Mode: Master  Channel: 36 (5.180 GHz)
wlan1     ESSID: \"home\"
          Mode: Master  Channel: 6 (2.437 GHz)";
        let interfaces = parse_iwinfo_interfaces(output);
        assert_eq!(
            interfaces.into_iter().collect::<Vec<_>>(),
            vec!["wlan0".to_string(), "wlan1".to_string()]
        );
    }

    #[test]
    fn test_parse_iw_dev_interfaces() {
        let output = "\
phy#0
\tInterface wlan0
\t\tifindex 10
\t\ttype AP
phy#1
\tInterface wlan1";
        let interfaces = parse_iw_dev_interfaces(output);
        assert!(interfaces.contains("wlan0"));
        assert!(interfaces.contains("wlan1"));
        assert_eq!(interfaces.len(), 2);
    }

    #[test]
    fn test_parse_assoclist() {
        let output = "\
AA:BB:CC:DD:EE:FF  -52 dBm / -95 dBm (SNR 43)  90 ms ago
\tRX: 866.7 MBit/s  80MHz, VHT-MCS 9, VHT-NSS 2
\tTX: 866.7 MBit/s  80MHz, VHT-MCS 9, VHT-NSS 2";
        let stations = parse_assoclist(output);
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].mac, mac("aa:bb:cc:dd:ee:ff"));
        assert_eq!(stations[0].signal_dbm, Some(-52));
    }

    #[test]
    fn test_parse_assoclist_no_stations() {
        assert!(parse_assoclist("No station connected\n").is_empty());
    }
}
