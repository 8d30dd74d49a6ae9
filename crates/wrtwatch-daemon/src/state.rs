//! Application state management

use anyhow::{bail, Context, Result};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

use wrtwatch_collect::RouterSource;
use wrtwatch_core::{Aggregator, DeviceSnapshot, DiscoveredRecord, IdentityStore, Mac};

use crate::config::Config;

/// Events published to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TrackerEvent {
    DeviceDiscovered(DeviceSnapshot),
    DeviceUpdated(DeviceSnapshot),
    DeviceOffline { mac: Mac },
    DeviceAssociated { primary_mac: Mac, mac: Mac },
    MacPending { mac: Mac },
    CycleCompleted { devices: usize, records: usize },
}

/// Summary of one completed polling cycle, also the `/api/poll` response.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub devices: usize,
    pub records: usize,
    pub new_identities: usize,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// The resolution engine and its view of the last cycle. Held behind one
/// lock so polling and association never interleave mid-mutation.
struct Engine {
    store: IdentityStore,
    aggregator: Aggregator,
    snapshots: BTreeMap<Mac, DeviceSnapshot>,
}

/// Shared application state
pub struct AppState {
    engine: Mutex<Engine>,
    /// Configured routers to poll
    sources: Vec<RouterSource>,
    store_path: PathBuf,
    /// Configuration
    pub config: Config,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<TrackerEvent>,
    /// Poked to trigger an immediate re-poll (after association)
    poke: Notify,
}

impl AppState {
    /// Create new application state, loading the identity store from disk.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let store_path = config.store.path.clone();
        let store = IdentityStore::load(&store_path)
            .with_context(|| format!("failed to load identity store from {}", store_path.display()))?;
        info!(
            devices = store.records().len(),
            pending = store.pending().len(),
            mode = ?config.tracker.mode,
            "Identity store ready"
        );

        let sources: Vec<RouterSource> = config.sources.iter().map(|s| s.to_source()).collect();
        let aggregator = Aggregator::new(config.tracker.mode);
        let (events, _) = broadcast::channel(100);

        Ok(Arc::new(Self {
            engine: Mutex::new(Engine {
                store,
                aggregator,
                snapshots: BTreeMap::new(),
            }),
            sources,
            store_path,
            config,
            events,
            poke: Notify::new(),
        }))
    }

    /// Collect from every source, run one aggregation cycle, persist the
    /// store if it changed, and publish the resulting events.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let records = self.collect_all().await?;

        let mut engine = self.engine.lock().await;
        let pending_before: BTreeSet<Mac> = engine.store.pending().iter().cloned().collect();
        let previous = std::mem::take(&mut engine.snapshots);

        let outcome = {
            let Engine {
                store, aggregator, ..
            } = &mut *engine;
            aggregator.run_cycle(store, &records, &previous)
        };

        if outcome.store_changed {
            if let Err(err) = engine.store.save(&self.store_path) {
                // Keep the freshly built snapshots so nothing is re-announced
                // next cycle; the dirty flag stays set and the save is
                // retried then.
                engine.snapshots = outcome.snapshots;
                return Err(anyhow::Error::new(err).context(format!(
                    "failed to save identity store to {}",
                    self.store_path.display()
                )));
            }
            engine.store.take_dirty();
            debug!(path = %self.store_path.display(), "Persisted identity store");
        }

        let new_primaries: BTreeSet<&Mac> =
            outcome.new_identities.iter().map(|n| &n.primary_mac).collect();
        let mut events = Vec::new();
        for (primary, snapshot) in &outcome.snapshots {
            if new_primaries.contains(primary) || !previous.contains_key(primary) {
                events.push(TrackerEvent::DeviceDiscovered(snapshot.clone()));
            } else if snapshot.online {
                events.push(TrackerEvent::DeviceUpdated(snapshot.clone()));
            } else if previous.get(primary).map(|p| p.online) == Some(true) {
                events.push(TrackerEvent::DeviceOffline {
                    mac: primary.clone(),
                });
            }
        }
        for mac in engine.store.pending() {
            if !pending_before.contains(mac) {
                events.push(TrackerEvent::MacPending { mac: mac.clone() });
            }
        }

        let summary = CycleSummary {
            devices: outcome.snapshots.len(),
            records: records.len(),
            new_identities: outcome.new_identities.len(),
            completed_at: chrono::Utc::now(),
        };
        engine.snapshots = outcome.snapshots;
        drop(engine);

        events.push(TrackerEvent::CycleCompleted {
            devices: summary.devices,
            records: summary.records,
        });
        for event in events {
            let _ = self.events.send(event);
        }

        info!(
            devices = summary.devices,
            records = summary.records,
            new = summary.new_identities,
            "Polling cycle complete"
        );
        Ok(summary)
    }

    /// Fan out to all sources concurrently. A cycle where every source
    /// failed is aborted so the store and snapshots stay untouched.
    async fn collect_all(&self) -> Result<Vec<DiscoveredRecord>> {
        if self.sources.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(self.sources.iter().map(|s| s.collect())).await;

        let mut records = Vec::new();
        let mut failures = 0;
        for result in results {
            match result {
                Ok(mut batch) => records.append(&mut batch),
                Err(err) => {
                    warn!(error = %err, "Source collection failed");
                    failures += 1;
                }
            }
        }
        if failures == self.sources.len() {
            bail!("all {} sources failed, aborting cycle", failures);
        }
        Ok(records)
    }

    /// Operator merge: make `candidate` a member of `primary`'s identity.
    /// Idempotent; triggers an immediate re-poll so snapshots catch up.
    pub async fn associate(&self, primary: &Mac, candidate: &Mac) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.store.associate(primary, candidate);
        if engine.store.is_dirty() {
            // On failure the dirty flag survives, so the save is retried by
            // the next cycle (or a repeated associate call).
            engine
                .store
                .save(&self.store_path)
                .with_context(|| format!("failed to save identity store to {}", self.store_path.display()))?;
            engine.store.take_dirty();
        }
        // The candidate may have been a primary itself; its snapshot key is
        // gone after the merge.
        engine.snapshots.remove(candidate);
        drop(engine);

        info!(primary = %primary, mac = %candidate, "Associated MAC with identity");
        let _ = self.events.send(TrackerEvent::DeviceAssociated {
            primary_mac: primary.clone(),
            mac: candidate.clone(),
        });
        self.poke.notify_one();
        Ok(())
    }

    /// All device snapshots from the last cycle.
    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        self.engine.lock().await.snapshots.values().cloned().collect()
    }

    /// Snapshot lookup by any member MAC.
    pub async fn get_device(&self, mac: &Mac) -> Option<DeviceSnapshot> {
        let engine = self.engine.lock().await;
        let primary = engine.store.primary_for(mac).unwrap_or_else(|| mac.clone());
        engine.snapshots.get(&primary).cloned()
    }

    /// MACs awaiting operator confirmation.
    pub async fn pending(&self) -> Vec<Mac> {
        self.engine.lock().await.store.pending().to_vec()
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Periodic polling loop. Cycles never overlap; an association wakes
    /// the loop early via the notify handle.
    pub async fn poll_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.daemon.poll_interval_secs.max(1));
        loop {
            if let Err(err) = self.run_cycle().await {
                warn!(error = %err, "Polling cycle failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.poke.notified() => {
                    debug!("Re-poll requested");
                }
            }
        }
    }
}
