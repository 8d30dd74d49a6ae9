//! Per-cycle aggregation
//!
//! [`Aggregator::run_cycle`] folds one polling cycle's worth of
//! [`DiscoveredRecord`]s into per-device [`DeviceSnapshot`]s keyed by
//! resolved primary MAC.
//!
//! Merge rules:
//! - records are stably sorted by [`SourceKind::precedence`] first, so for
//!   scalar fields the first non-null value wins in pinned source order and
//!   a later record never overwrites an already-set scalar;
//! - `last_seen` always advances to the most recent timestamp and `online`
//!   is true if any contributing record says so;
//! - set-valued fields union; connection details deduplicate by full
//!   equality;
//! - scalars still unset after the fold are filled from the previous
//!   cycle's snapshot, and devices with zero sightings are re-emitted with
//!   `online = false` so a known device is never silently dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

use crate::mac::Mac;
use crate::record::{ConnectionDetail, ConnectionType, DeviceSnapshot, DiscoveredRecord};
use crate::resolver::{Resolution, ResolutionMode, ResolutionPolicy, Sighting};
use crate::store::IdentityStore;

/// "New identity observed" notification payload, emitted exactly once per
/// newly created or newly absorbed identity per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentity {
    pub primary_mac: Mac,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub hostname: Option<String>,
    pub connection_type: Option<ConnectionType>,
}

/// Result of one aggregation cycle.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub snapshots: BTreeMap<Mac, DeviceSnapshot>,
    pub new_identities: Vec<NewIdentity>,
    /// Whether the identity store carries unpersisted mutations. The flag
    /// stays set until the caller saves and calls
    /// [`IdentityStore::take_dirty`], so a failed save is retried on the
    /// next cycle.
    pub store_changed: bool,
}

/// Folds a cycle's raw sightings into per-device snapshots, resolving each
/// MAC through the configured [`ResolutionPolicy`].
pub struct Aggregator {
    policy: Box<dyn ResolutionPolicy + Send + Sync>,
}

impl Aggregator {
    pub fn new(mode: ResolutionMode) -> Self {
        Self { policy: mode.policy() }
    }

    /// Run one aggregation cycle over the joined record set.
    ///
    /// `previous` is the snapshot map of the prior cycle; it backfills
    /// scalars the current cycle did not observe and supplies the carried
    /// forward state of devices with zero sightings.
    pub fn run_cycle(
        &mut self,
        store: &mut IdentityStore,
        records: &[DiscoveredRecord],
        previous: &BTreeMap<Mac, DeviceSnapshot>,
    ) -> CycleOutcome {
        self.policy.begin_cycle(store);

        let mut ordered: Vec<&DiscoveredRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.source_kind.precedence());

        let mut snapshots: BTreeMap<Mac, DeviceSnapshot> = BTreeMap::new();
        let mut new_identities = Vec::new();

        for record in ordered {
            let sighting = Sighting {
                mac: &record.mac,
                hostname: record.hostname.as_deref(),
                ipv4: record.ipv4,
            };
            let (primary, is_new) = match self.policy.resolve(store, &sighting) {
                Resolution::Resolved { primary, is_new } => (primary, is_new),
                Resolution::Pending(mac) => {
                    debug!(mac = %mac, "Sighting excluded from cycle, awaiting association");
                    continue;
                }
            };

            if is_new {
                new_identities.push(NewIdentity {
                    primary_mac: primary.clone(),
                    ipv4: record.ipv4,
                    ipv6: record.ipv6,
                    hostname: record.hostname.clone(),
                    connection_type: record.connection_type,
                });
            }

            let snapshot = snapshots
                .entry(primary.clone())
                .or_insert_with(|| DeviceSnapshot::new(primary));
            merge_record(snapshot, record);
        }

        for (primary, snapshot) in &mut snapshots {
            if let Some(prev) = previous.get(primary) {
                fill_missing(snapshot, prev);
            }
            // Member sets are authoritative in the store at build time.
            if let Some(record) = store.get(primary) {
                snapshot.member_macs = record.macs.iter().cloned().collect();
            }
        }

        // Known devices without a single sighting this cycle stay visible.
        for record in store.records() {
            if snapshots.contains_key(&record.primary) {
                continue;
            }
            let mut snapshot = previous
                .get(&record.primary)
                .cloned()
                .unwrap_or_else(|| DeviceSnapshot::new(record.primary.clone()));
            snapshot.online = false;
            snapshot.member_macs = record.macs.iter().cloned().collect();
            snapshots.insert(record.primary.clone(), snapshot);
        }

        CycleOutcome {
            snapshots,
            new_identities,
            store_changed: store.is_dirty(),
        }
    }
}

/// Fold one record into a snapshot. Records arrive pre-sorted by source
/// precedence, so plain first-non-null assignment implements the priority
/// rule.
fn merge_record(snapshot: &mut DeviceSnapshot, record: &DiscoveredRecord) {
    snapshot.member_macs.insert(record.mac.clone());
    if let Some(interface) = &record.interface {
        snapshot.interfaces.insert(interface.clone());
    }
    if let Some(radio) = &record.radio {
        snapshot.radios.insert(radio.clone());
    }
    if let Some(ipv4) = record.ipv4 {
        snapshot.ipv4_addresses.insert(ipv4);
    }
    if let Some(ipv6) = record.ipv6 {
        snapshot.ipv6_addresses.insert(ipv6);
    }

    if snapshot.resolved_hostname.is_none() {
        snapshot.resolved_hostname = record.hostname.clone();
    }
    if snapshot.connection_type == ConnectionType::Unknown {
        if let Some(connection_type) = record.connection_type {
            snapshot.connection_type = connection_type;
        }
    }
    if snapshot.state.is_none() {
        snapshot.state = record.state.clone();
    }
    if snapshot.signal_dbm.is_none() {
        snapshot.signal_dbm = record.signal_dbm;
    }
    if snapshot.rx_bytes.is_none() {
        snapshot.rx_bytes = record.rx_bytes;
    }
    if snapshot.tx_bytes.is_none() {
        snapshot.tx_bytes = record.tx_bytes;
    }

    snapshot.online = snapshot.online || record.online;
    snapshot.last_seen = match snapshot.last_seen {
        Some(seen) => Some(seen.max(record.timestamp)),
        None => Some(record.timestamp),
    };

    let detail = ConnectionDetail {
        interface: record.interface.clone(),
        ip: record
            .ipv4
            .map(IpAddr::V4)
            .or_else(|| record.ipv6.map(IpAddr::V6)),
        state: record.state.clone(),
    };
    if !snapshot.connections.contains(&detail) {
        snapshot.connections.push(detail);
    }
}

/// Backfill scalars the current cycle did not observe from the previous
/// cycle's snapshot.
fn fill_missing(snapshot: &mut DeviceSnapshot, previous: &DeviceSnapshot) {
    if snapshot.resolved_hostname.is_none() {
        snapshot.resolved_hostname = previous.resolved_hostname.clone();
    }
    if snapshot.connection_type == ConnectionType::Unknown {
        snapshot.connection_type = previous.connection_type;
    }
    if snapshot.state.is_none() {
        snapshot.state = previous.state.clone();
    }
    if snapshot.signal_dbm.is_none() {
        snapshot.signal_dbm = previous.signal_dbm;
    }
    if snapshot.rx_bytes.is_none() {
        snapshot.rx_bytes = previous.rx_bytes;
    }
    if snapshot.tx_bytes.is_none() {
        snapshot.tx_bytes = previous.tx_bytes;
    }
    if snapshot.last_seen.is_none() {
        snapshot.last_seen = previous.last_seen;
    }
}
