//! Sighting-to-identity resolution
//!
//! A [`ResolutionPolicy`] decides which primary identity a raw sighting
//! belongs to. Two strategies exist:
//!
//! - [`OpportunisticPolicy`]: unknown MACs are matched against stored
//!   hostname/IPv4 hints and merged into an existing identity when the
//!   heuristic agrees, otherwise they self-register. Suited to
//!   single-router deployments where automatic inference is acceptable.
//! - [`CuratedPolicy`]: once the store is seeded, unknown MACs are parked
//!   in the pending set and only join via an explicit associate call.
//!   Suited to multi-source deployments with an operator-curated device
//!   list.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::debug;

use crate::mac::Mac;
use crate::store::IdentityStore;

/// The identity-relevant extract of one sighting.
#[derive(Debug, Clone)]
pub struct Sighting<'a> {
    pub mac: &'a Mac,
    pub hostname: Option<&'a str>,
    pub ipv4: Option<Ipv4Addr>,
}

/// Outcome of resolving one sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The sighting belongs to `primary`. `is_new` is true exactly when the
    /// MAC was newly absorbed into or newly created as an identity this
    /// call, never on a pure metadata refresh.
    Resolved { primary: Mac, is_new: bool },
    /// The MAC could not be resolved and was parked in the pending set.
    Pending(Mac),
}

/// Policy selection, as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    Opportunistic,
    Curated,
}

impl Default for ResolutionMode {
    fn default() -> Self {
        Self::Opportunistic
    }
}

impl ResolutionMode {
    pub fn policy(self) -> Box<dyn ResolutionPolicy + Send + Sync> {
        match self {
            Self::Opportunistic => Box::new(OpportunisticPolicy),
            Self::Curated => Box::new(CuratedPolicy::default()),
        }
    }
}

/// Strategy for mapping an unresolved sighting to a primary identity.
pub trait ResolutionPolicy {
    /// Called once at the start of every aggregation cycle, before any
    /// `resolve` call for that cycle.
    fn begin_cycle(&mut self, _store: &IdentityStore) {}

    fn resolve(&self, store: &mut IdentityStore, sighting: &Sighting<'_>) -> Resolution;
}

/// Hostname/IPv4 heuristic matching with automatic self-registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpportunisticPolicy;

impl ResolutionPolicy for OpportunisticPolicy {
    fn resolve(&self, store: &mut IdentityStore, sighting: &Sighting<'_>) -> Resolution {
        if let Some(primary) = store.primary_for(sighting.mac) {
            store.update_hints(&primary, sighting.hostname, sighting.ipv4);
            return Resolution::Resolved { primary, is_new: false };
        }

        if let Some(primary) = store.find_by_identity(sighting.hostname, sighting.ipv4) {
            debug!(
                mac = %sighting.mac,
                primary = %primary,
                hostname = ?sighting.hostname,
                "Absorbing MAC into existing identity by hostname/IP match"
            );
            store.absorb(&primary, sighting.mac);
            store.update_hints(&primary, sighting.hostname, sighting.ipv4);
            return Resolution::Resolved { primary, is_new: true };
        }

        let primary = store.ensure(sighting.mac, sighting.hostname, sighting.ipv4);
        Resolution::Resolved { primary, is_new: true }
    }
}

/// Pending-list consolidation: self-register only while bootstrapping an
/// empty store; afterwards unknown MACs wait for operator confirmation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CuratedPolicy {
    /// Sampled once per cycle so every MAC of the seeding cycle
    /// self-registers, not just the first one.
    bootstrap: bool,
}

impl ResolutionPolicy for CuratedPolicy {
    fn begin_cycle(&mut self, store: &IdentityStore) {
        self.bootstrap = store.is_empty();
    }

    fn resolve(&self, store: &mut IdentityStore, sighting: &Sighting<'_>) -> Resolution {
        if let Some(primary) = store.primary_for(sighting.mac) {
            store.update_hints(&primary, sighting.hostname, sighting.ipv4);
            return Resolution::Resolved { primary, is_new: false };
        }

        if self.bootstrap {
            let primary = store.ensure(sighting.mac, sighting.hostname, sighting.ipv4);
            return Resolution::Resolved { primary, is_new: true };
        }

        if store.mark_pending(sighting.mac) {
            debug!(mac = %sighting.mac, "Unknown MAC parked in pending set");
        }
        Resolution::Pending(sighting.mac.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> Mac {
        Mac::parse(s).unwrap()
    }

    fn sighting<'a>(mac: &'a Mac, hostname: Option<&'a str>, ipv4: &str) -> Sighting<'a> {
        Sighting {
            mac,
            hostname,
            ipv4: ipv4.parse().ok(),
        }
    }

    #[test]
    fn test_opportunistic_merges_by_hostname_and_ip() {
        let mut store = IdentityStore::new();
        let policy = OpportunisticPolicy;
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");

        let first = policy.resolve(&mut store, &sighting(&aa, Some("printer"), "10.0.0.5"));
        assert_eq!(first, Resolution::Resolved { primary: aa.clone(), is_new: true });

        let second = policy.resolve(&mut store, &sighting(&bb, Some("printer"), "10.0.0.5"));
        assert_eq!(second, Resolution::Resolved { primary: aa.clone(), is_new: true });
        assert_eq!(store.get(&aa).unwrap().macs, vec![aa, bb]);
    }

    #[test]
    fn test_opportunistic_known_mac_is_not_new() {
        let mut store = IdentityStore::new();
        let policy = OpportunisticPolicy;
        let aa = mac("aa:aa:aa:aa:aa:aa");

        policy.resolve(&mut store, &sighting(&aa, Some("printer"), "10.0.0.5"));
        let again = policy.resolve(&mut store, &sighting(&aa, Some("printer"), "10.0.0.6"));
        assert_eq!(again, Resolution::Resolved { primary: aa.clone(), is_new: false });
        // Hint refreshed on the repeat sighting
        assert_eq!(store.get(&aa).unwrap().metadata.ipv4, "10.0.0.6".parse().ok());
    }

    #[test]
    fn test_opportunistic_bare_ip_never_claims_hostname_identity() {
        let mut store = IdentityStore::new();
        let policy = OpportunisticPolicy;
        let cc = mac("cc:cc:cc:cc:cc:cc");
        let dd = mac("dd:dd:dd:dd:dd:dd");

        // CC established with bare IP, no hostname
        policy.resolve(&mut store, &sighting(&cc, None, "10.0.0.9"));
        // DD arrives with a hostname on the same IP: must not merge into CC
        let result = policy.resolve(&mut store, &sighting(&dd, Some("phone"), "10.0.0.9"));
        assert_eq!(result, Resolution::Resolved { primary: dd.clone(), is_new: true });
        assert_eq!(store.records().len(), 2);
    }

    #[test]
    fn test_opportunistic_hostname_claims_hostless_record() {
        // The inverse direction is allowed: a hostname-bearing sighting may
        // claim a record whose stored hostname is still null, per the
        // null-or-equal rule.
        let mut store = IdentityStore::new();
        let policy = OpportunisticPolicy;
        let cc = mac("cc:cc:cc:cc:cc:cc");
        let dd = mac("dd:dd:dd:dd:dd:dd");

        store.ensure(&cc, None, None);
        let result = policy.resolve(&mut store, &sighting(&dd, Some("phone"), "10.0.0.9"));
        assert_eq!(result, Resolution::Resolved { primary: cc, is_new: true });
    }

    #[test]
    fn test_curated_bootstrap_seeds_every_mac() {
        let mut store = IdentityStore::new();
        let mut policy = CuratedPolicy::default();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");

        policy.begin_cycle(&store);
        let first = policy.resolve(&mut store, &sighting(&aa, None, "10.0.0.1"));
        // Store is no longer empty, but the bootstrap flag holds for the cycle
        let second = policy.resolve(&mut store, &sighting(&bb, None, "10.0.0.2"));
        assert_eq!(first, Resolution::Resolved { primary: aa, is_new: true });
        assert_eq!(second, Resolution::Resolved { primary: bb, is_new: true });
        assert!(store.pending().is_empty());
    }

    #[test]
    fn test_curated_unknown_mac_goes_pending_after_bootstrap() {
        let mut store = IdentityStore::new();
        let mut policy = CuratedPolicy::default();
        let aa = mac("aa:aa:aa:aa:aa:aa");
        let bb = mac("bb:bb:bb:bb:bb:bb");

        store.ensure(&aa, None, None);
        policy.begin_cycle(&store);
        let result = policy.resolve(&mut store, &sighting(&bb, Some("phone"), "10.0.0.2"));
        assert_eq!(result, Resolution::Pending(bb.clone()));
        assert_eq!(store.pending(), &[bb]);
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_curated_known_mac_resolves() {
        let mut store = IdentityStore::new();
        let mut policy = CuratedPolicy::default();
        let aa = mac("aa:aa:aa:aa:aa:aa");

        store.ensure(&aa, None, None);
        policy.begin_cycle(&store);
        let result = policy.resolve(&mut store, &sighting(&aa, None, "10.0.0.1"));
        assert_eq!(result, Resolution::Resolved { primary: aa, is_new: false });
    }
}
