//! Durable identity mapping
//!
//! The [`IdentityStore`] maps every observed MAC address to exactly one
//! primary MAC (the stable identifier for a physical device) and keeps the
//! hostname/IPv4 hints the resolver's identity heuristic works from, plus
//! the pending set used by curated mode. It is persisted as a versioned
//! JSON document and survives restarts.
//!
//! Invariant maintained by every mutation: the MAC -> primary mapping is a
//! function. A MAC is removed from its old record's member set before it is
//! inserted into a new one, and a record emptied that way is deleted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::mac::Mac;

pub const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Soft hints used only by the automatic identity heuristic; last-seen
/// overwrite, never cleared back to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMetadata {
    /// Lowercased, trimmed hostname
    pub hostname: Option<String>,
    pub ipv4: Option<Ipv4Addr>,
}

/// The persistent unit mapping one primary MAC to its member MACs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Immutable once created; never renamed
    pub primary: Mac,
    /// Ordered member set, primary first
    pub macs: Vec<Mac>,
    pub metadata: IdentityMetadata,
}

impl IdentityRecord {
    fn new(primary: Mac) -> Self {
        Self {
            macs: vec![primary.clone()],
            primary,
            metadata: IdentityMetadata::default(),
        }
    }

    pub fn contains(&self, mac: &Mac) -> bool {
        self.macs.iter().any(|m| m == mac)
    }
}

/// On-disk document shape: `{version, devices: {primary: {macs, metadata}},
/// pending: [...]}`. MACs are stored as plain strings and re-normalized on
/// load so a hand-edited or stale document degrades gracefully.
#[derive(Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    devices: BTreeMap<String, DeviceEntry>,
    #[serde(default)]
    pending: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct DeviceEntry {
    #[serde(default)]
    macs: Vec<String>,
    #[serde(default)]
    metadata: MetadataEntry,
}

#[derive(Serialize, Deserialize, Default)]
struct MetadataEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ipv4: Option<String>,
}

/// Durable mapping of primary MAC -> member MAC set + metadata hints.
#[derive(Debug, Default)]
pub struct IdentityStore {
    devices: Vec<IdentityRecord>,
    pending: Vec<Mac>,
    dirty: bool,
}

impl IdentityStore {
    /// An empty, unpersisted store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`, tolerating a missing file (empty store). Every
    /// stored MAC is normalized; malformed entries are dropped, as is any
    /// MAC that would violate the one-primary-per-MAC invariant.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "Identity store not found, starting empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let doc: StoreDocument = serde_json::from_str(&content)?;

        let mut store = Self::new();
        for (primary_raw, entry) in doc.devices {
            let Some(primary) = Mac::parse(&primary_raw) else {
                warn!(mac = %primary_raw, "Dropping identity record with malformed primary MAC");
                continue;
            };
            if store.primary_for(&primary).is_some() {
                warn!(mac = %primary, "Dropping duplicate identity record");
                continue;
            }
            let mut record = IdentityRecord::new(primary);
            for raw in entry.macs {
                let Some(mac) = Mac::parse(&raw) else {
                    warn!(mac = %raw, "Dropping malformed member MAC");
                    continue;
                };
                if record.contains(&mac) || store.primary_for(&mac).is_some() {
                    continue;
                }
                record.macs.push(mac);
            }
            record.metadata.hostname = normalize_hostname(entry.metadata.hostname.as_deref());
            record.metadata.ipv4 = entry.metadata.ipv4.and_then(|ip| ip.parse().ok());
            store.devices.push(record);
        }
        for raw in doc.pending {
            let Some(mac) = Mac::parse(&raw) else {
                warn!(mac = %raw, "Dropping malformed pending MAC");
                continue;
            };
            if store.primary_for(&mac).is_none() && !store.pending.contains(&mac) {
                store.pending.push(mac);
            }
        }
        debug!(
            devices = store.devices.len(),
            pending = store.pending.len(),
            path = %path.display(),
            "Loaded identity store"
        );
        Ok(store)
    }

    /// Persist to `path`. Writes to a temporary sibling and renames it into
    /// place, so a failed save never leaves a torn document behind.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut devices = BTreeMap::new();
        for record in &self.devices {
            devices.insert(
                record.primary.as_str().to_string(),
                DeviceEntry {
                    macs: record.macs.iter().map(|m| m.as_str().to_string()).collect(),
                    metadata: MetadataEntry {
                        hostname: record.metadata.hostname.clone(),
                        ipv4: record.metadata.ipv4.map(|ip| ip.to_string()),
                    },
                },
            );
        }
        let doc = StoreDocument {
            version: STORE_VERSION,
            devices,
            pending: self.pending.iter().map(|m| m.as_str().to_string()).collect(),
        };
        let content = serde_json::to_string_pretty(&doc)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// True when no device and no pending MAC is known (bootstrap state).
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.pending.is_empty()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.devices
    }

    pub fn get(&self, primary: &Mac) -> Option<&IdentityRecord> {
        self.devices.iter().find(|r| &r.primary == primary)
    }

    pub fn pending(&self) -> &[Mac] {
        &self.pending
    }

    /// The primary MAC `mac` currently belongs to, if any.
    pub fn primary_for(&self, mac: &Mac) -> Option<Mac> {
        self.devices
            .iter()
            .find(|r| r.contains(mac))
            .map(|r| r.primary.clone())
    }

    /// Return `mac`'s primary, creating a fresh identity (primary = `mac`)
    /// when it is unknown. Hints are refreshed either way.
    pub fn ensure(&mut self, mac: &Mac, hostname: Option<&str>, ipv4: Option<Ipv4Addr>) -> Mac {
        if let Some(primary) = self.primary_for(mac) {
            self.update_hints(&primary, hostname, ipv4);
            return primary;
        }
        let mut record = IdentityRecord::new(mac.clone());
        record.metadata.hostname = normalize_hostname(hostname);
        record.metadata.ipv4 = ipv4;
        self.devices.push(record);
        self.clear_pending(mac);
        self.dirty = true;
        mac.clone()
    }

    /// Move `other` into `primary`'s member set, removing it from any prior
    /// owner and deleting that owner if emptied. Creates `primary`'s record
    /// if it does not exist yet. Idempotent.
    pub fn absorb(&mut self, primary: &Mac, other: &Mac) {
        if self.get(primary).is_none() {
            self.devices.push(IdentityRecord::new(primary.clone()));
            self.clear_pending(primary);
            self.dirty = true;
        }
        if let Some(current) = self.primary_for(other) {
            if &current == primary {
                return;
            }
            // Detach from the old owner first so the mapping stays a function.
            if let Some(pos) = self.devices.iter().position(|r| r.primary == current) {
                self.devices[pos].macs.retain(|m| m != other);
                if self.devices[pos].macs.is_empty() {
                    debug!(primary = %current, "Pruning emptied identity record");
                    self.devices.remove(pos);
                }
            }
        }
        if let Some(record) = self.devices.iter_mut().find(|r| &r.primary == primary) {
            record.macs.push(other.clone());
        }
        self.clear_pending(other);
        self.dirty = true;
    }

    /// Identity-matching heuristic over stored hints.
    ///
    /// With a hostname hint, a record matches when its stored hostname is
    /// equal (case-insensitive, trimmed), or when the record carries no
    /// hints at all; a record that was established by bare IP (hostname
    /// null, IPv4 set) is never claimed by a named sighting, even on the
    /// same IP. If an IPv4 hint is also given, the stored IPv4 must be
    /// absent or equal. With only an IPv4 hint, a record matches only when
    /// it has no stored hostname and its stored IPv4 is exactly equal; a
    /// hostname-bearing record is never claimed by a bare-IP sighting. No
    /// hints, no match. First match in store order wins.
    pub fn find_by_identity(&self, hostname: Option<&str>, ipv4: Option<Ipv4Addr>) -> Option<Mac> {
        let target = normalize_hostname(hostname);
        if target.is_none() && ipv4.is_none() {
            return None;
        }
        for record in &self.devices {
            let stored_hostname = record.metadata.hostname.as_deref();
            let stored_ipv4 = record.metadata.ipv4;
            if let Some(ref hostname) = target {
                match stored_hostname {
                    Some(stored) => {
                        if stored != hostname {
                            continue;
                        }
                    }
                    // A hostless record with an IPv4 hint was established
                    // by bare IP; the device behind it never reported a
                    // name, so a named sighting is a different device.
                    None if stored_ipv4.is_some() => continue,
                    None => {}
                }
                if let (Some(ip), Some(stored)) = (ipv4, stored_ipv4) {
                    if stored != ip {
                        continue;
                    }
                }
                return Some(record.primary.clone());
            }
            if let Some(ip) = ipv4 {
                if stored_hostname.is_some() {
                    continue;
                }
                if stored_ipv4 == Some(ip) {
                    return Some(record.primary.clone());
                }
            }
        }
        None
    }

    /// Refresh metadata hints on a record; hints overwrite but are never
    /// cleared back to `None`.
    pub fn update_hints(&mut self, primary: &Mac, hostname: Option<&str>, ipv4: Option<Ipv4Addr>) {
        let Some(record) = self.devices.iter_mut().find(|r| &r.primary == primary) else {
            return;
        };
        if let Some(hostname) = normalize_hostname(hostname) {
            if record.metadata.hostname.as_deref() != Some(hostname.as_str()) {
                record.metadata.hostname = Some(hostname);
                self.dirty = true;
            }
        }
        if let Some(ip) = ipv4 {
            if record.metadata.ipv4 != Some(ip) {
                record.metadata.ipv4 = Some(ip);
                self.dirty = true;
            }
        }
    }

    /// Record a MAC awaiting operator confirmation. Returns true if newly
    /// added.
    pub fn mark_pending(&mut self, mac: &Mac) -> bool {
        if self.primary_for(mac).is_some() || self.pending.contains(mac) {
            return false;
        }
        self.pending.push(mac.clone());
        self.dirty = true;
        true
    }

    /// Drop a MAC from the pending set. Returns true if it was present.
    pub fn clear_pending(&mut self, mac: &Mac) -> bool {
        let before = self.pending.len();
        self.pending.retain(|m| m != mac);
        if self.pending.len() != before {
            self.dirty = true;
            true
        } else {
            false
        }
    }

    /// Operator-driven merge: make `candidate` a member of `primary`'s
    /// identity, self-registering `primary` if unknown and clearing both
    /// from the pending set. Idempotent.
    pub fn associate(&mut self, primary: &Mac, candidate: &Mac) {
        self.ensure(primary, None, None);
        self.absorb(primary, candidate);
        self.clear_pending(primary);
        self.clear_pending(candidate);
    }

    /// True when a mutation happened since the last [`Self::take_dirty`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Consume the dirty flag; callers persist only when it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// Lowercase and trim a hostname hint; empty becomes `None`.
pub fn normalize_hostname(hostname: Option<&str>) -> Option<String> {
    let trimmed = hostname?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> Mac {
        Mac::parse(s).unwrap()
    }

    #[test]
    fn test_ensure_creates_and_reuses() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let primary = store.ensure(&aa, Some("Printer "), "10.0.0.5".parse().ok());
        assert_eq!(primary, aa);
        let record = store.get(&aa).unwrap();
        assert_eq!(record.metadata.hostname.as_deref(), Some("printer"));

        // Second ensure refreshes hints instead of creating a new record
        let again = store.ensure(&aa, Some("printer-2"), None);
        assert_eq!(again, aa);
        assert_eq!(store.records().len(), 1);
        assert_eq!(
            store.get(&aa).unwrap().metadata.hostname.as_deref(),
            Some("printer-2")
        );
    }

    #[test]
    fn test_hints_never_cleared() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        store.ensure(&aa, Some("printer"), "10.0.0.5".parse().ok());
        store.update_hints(&aa, None, None);
        let metadata = &store.get(&aa).unwrap().metadata;
        assert_eq!(metadata.hostname.as_deref(), Some("printer"));
        assert_eq!(metadata.ipv4, "10.0.0.5".parse().ok());
    }

    #[test]
    fn test_absorb_moves_and_prunes() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");
        store.ensure(&aa, None, None);
        store.ensure(&bb, None, None);
        assert_eq!(store.records().len(), 2);

        store.absorb(&aa, &bb);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.primary_for(&bb), Some(aa.clone()));
        assert_eq!(store.get(&aa).unwrap().macs, vec![aa.clone(), bb.clone()]);
    }

    #[test]
    fn test_absorb_idempotent() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");
        store.ensure(&aa, None, None);
        store.absorb(&aa, &bb);
        let snapshot = store.get(&aa).unwrap().clone();
        store.absorb(&aa, &bb);
        assert_eq!(store.get(&aa).unwrap(), &snapshot);
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_mac_never_under_two_primaries() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");
        let cc = mac("cc:cc:cc:cc:cc:cc");
        store.ensure(&aa, None, None);
        store.ensure(&bb, None, None);
        store.absorb(&aa, &cc);
        store.absorb(&bb, &cc);
        assert_eq!(store.primary_for(&cc), Some(bb.clone()));
        assert!(!store.get(&aa).unwrap().contains(&cc));
    }

    #[test]
    fn test_find_by_identity_hostname_and_ip() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        store.ensure(&aa, Some("printer"), "10.0.0.5".parse().ok());

        // hostname + matching ip
        assert_eq!(
            store.find_by_identity(Some("PRINTER"), "10.0.0.5".parse().ok()),
            Some(aa.clone())
        );
        // hostname alone
        assert_eq!(store.find_by_identity(Some("printer"), None), Some(aa.clone()));
        // hostname mismatch
        assert_eq!(store.find_by_identity(Some("laptop"), "10.0.0.5".parse().ok()), None);
        // ip mismatch
        assert_eq!(store.find_by_identity(Some("printer"), "10.0.0.9".parse().ok()), None);
    }

    #[test]
    fn test_bare_ip_never_claims_hostname_record() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        store.ensure(&aa, Some("printer"), "10.0.0.5".parse().ok());
        assert_eq!(store.find_by_identity(None, "10.0.0.5".parse().ok()), None);
    }

    #[test]
    fn test_named_sighting_never_claims_ip_established_record() {
        let mut store = IdentityStore::new();
        let cc = mac("cc:cc:cc:cc:cc:cc");
        // CC was established by bare IP, no hostname
        store.ensure(&cc, None, "10.0.0.9".parse().ok());

        // A named sighting on the same IP belongs to a different device
        assert_eq!(
            store.find_by_identity(Some("phone"), "10.0.0.9".parse().ok()),
            None
        );
        // A record with no hints at all is still claimable by name
        let dd = mac("dd:dd:dd:dd:dd:dd");
        store.ensure(&dd, None, None);
        assert_eq!(
            store.find_by_identity(Some("phone"), "10.0.0.9".parse().ok()),
            Some(dd)
        );
    }

    #[test]
    fn test_bare_ip_matches_hostless_record() {
        let mut store = IdentityStore::new();
        let cc = mac("cc:cc:cc:cc:cc:cc");
        store.ensure(&cc, None, "10.0.0.9".parse().ok());
        assert_eq!(
            store.find_by_identity(None, "10.0.0.9".parse().ok()),
            Some(cc)
        );
    }

    #[test]
    fn test_no_hints_no_match() {
        let mut store = IdentityStore::new();
        store.ensure(&mac("aa:aa:aa:aa:aa:aa"), None, None);
        assert_eq!(store.find_by_identity(None, None), None);
    }

    #[test]
    fn test_associate_idempotent_and_clears_pending() {
        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");
        store.mark_pending(&bb);
        store.associate(&aa, &bb);
        assert!(store.pending().is_empty());
        assert_eq!(store.primary_for(&bb), Some(aa.clone()));

        store.take_dirty();
        store.associate(&aa, &bb);
        // Second call changes nothing beyond re-running idempotent steps
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.get(&aa).unwrap().macs, vec![aa, bb]);
    }

    #[test]
    fn test_mark_pending_dedupes() {
        let mut store = IdentityStore::new();
        let bb = mac("bb:bb:bb:bb:bb:bb");
        assert!(store.mark_pending(&bb));
        assert!(!store.mark_pending(&bb));
        assert_eq!(store.pending().len(), 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("devices.json");

        let mut store = IdentityStore::new();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");
        store.ensure(&aa, Some("printer"), "10.0.0.5".parse().ok());
        store.absorb(&aa, &bb);
        store.mark_pending(&mac("cc:cc:cc:cc:cc:cc"));
        store.save(&path).unwrap();

        let loaded = IdentityStore::load(&path).unwrap();
        assert_eq!(loaded.records().len(), 1);
        let record = loaded.get(&aa).unwrap();
        assert_eq!(record.macs, vec![aa.clone(), bb]);
        assert_eq!(record.metadata.hostname.as_deref(), Some("printer"));
        assert_eq!(record.metadata.ipv4, "10.0.0.5".parse().ok());
        assert_eq!(loaded.pending().len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = IdentityStore::load(&dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_drops_malformed_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(
            &path,
            r#"{
                "version": 1,
                "devices": {
                    "AA:AA:AA:AA:AA:AA": {"macs": ["AA:AA:AA:AA:AA:AA", "garbage"], "metadata": {}},
                    "not-a-mac": {"macs": ["not-a-mac"], "metadata": {}}
                },
                "pending": ["bb:bb:bb:bb:bb:bb", "junk", "AA:AA:AA:AA:AA:AA"]
            }"#,
        )
        .unwrap();

        let store = IdentityStore::load(&path).unwrap();
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].macs.len(), 1);
        // "junk" dropped, AA dropped because it is already owned
        assert_eq!(store.pending(), &[mac("bb:bb:bb:bb:bb:bb")]);
    }
}
