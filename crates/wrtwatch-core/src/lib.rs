//! wrtwatch Core - Identity resolution and aggregation engine
//!
//! This crate provides the foundational types for the wrtwatch system:
//! - MAC address normalization to a single canonical form
//! - Persistent identity store mapping member MACs to primary identities
//! - Resolution policies that decide which identity a sighting belongs to
//! - Per-cycle aggregation of raw sightings into device snapshots

pub mod aggregate;
pub mod mac;
pub mod record;
pub mod resolver;
pub mod store;

pub use aggregate::{Aggregator, CycleOutcome, NewIdentity};
pub use mac::{Mac, MacParseError};
pub use record::{ConnectionDetail, ConnectionType, DeviceSnapshot, DiscoveredRecord, SourceKind};
pub use resolver::{Resolution, ResolutionMode, ResolutionPolicy, Sighting};
pub use store::{IdentityMetadata, IdentityRecord, IdentityStore, StoreError};
