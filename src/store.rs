//! Process-wide latest-value store shared by every link.
//!
//! One instance per process, created at startup and handed to each link as
//! an `Arc<Store>`. All access goes through whole-map mutual exclusion;
//! critical sections are bounded in-memory mutations, never I/O. Values are
//! created on first write, updated in place, and only removed by a full
//! [`Store::clear`].

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::safeguard;
use crate::topology::{Partition, Topology, RAMP_RATE};

/// A single stored value: numeric or string, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Text(_) => None,
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_owned())
    }
}

impl core::fmt::Display for Scalar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

/// Keyed mapping exchanged over a link: one JSON object per cycle.
pub type Snapshot = HashMap<String, Scalar>;

/// Shared key/value store with transmission partitioning, ramping of
/// surface-origin actuator writes, and a read-time current safeguard.
#[derive(Debug)]
pub struct Store {
    topology: Topology,
    data: Mutex<HashMap<Partition, Snapshot>>,
}

impl Store {
    pub fn new(topology: Topology) -> Self {
        let data = topology
            .partitions()
            .map(|partition| (partition, Snapshot::new()))
            .collect();
        Self {
            topology,
            data: Mutex::new(data),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// All keys of `partition`'s transmission set that currently hold
    /// values. Keys outside the set never appear in the result.
    pub fn snapshot(&self, partition: Partition) -> Snapshot {
        let data = self.data.lock();
        self.collect(&data, partition, None)
    }

    /// Like [`Store::snapshot`], restricted to the intersection with `keys`.
    pub fn select(&self, partition: Partition, keys: &[&str]) -> Snapshot {
        let data = self.data.lock();
        self.collect(&data, partition, Some(keys))
    }

    /// Snapshot destined for the network: the transmission set filtered as
    /// in [`Store::snapshot`], then run through the current safeguard. The
    /// transform modifies the returned copy only; the store is never
    /// rewritten.
    pub fn transmit_snapshot(&self, partition: Partition) -> Snapshot {
        let mut snapshot = self.snapshot(partition);
        safeguard::apply(&mut snapshot);
        snapshot
    }

    /// Keyed variant of [`Store::transmit_snapshot`].
    pub fn transmit_select(&self, partition: Partition, keys: &[&str]) -> Snapshot {
        let mut snapshot = self.select(partition, keys);
        safeguard::apply(&mut snapshot);
        snapshot
    }

    /// Unfiltered copy of a partition's slot, for in-process consumers
    /// (GUI, vision) that read keys outside any transmission set.
    pub fn all(&self, partition: Partition) -> Snapshot {
        self.data.lock().get(&partition).cloned().unwrap_or_default()
    }

    /// Latest value of one key in a partition's slot, unfiltered.
    pub fn get(&self, partition: Partition, key: &str) -> Option<Scalar> {
        self.data.lock().get(&partition)?.get(key).cloned()
    }

    pub fn set(&self, origin: Partition, key: &str, value: Scalar) {
        let mut data = self.data.lock();
        self.apply(&mut data, origin, key, value);
    }

    /// Apply a whole inbound frame under a single lock acquisition.
    pub fn set_bulk(&self, origin: Partition, entries: Snapshot) {
        let mut data = self.data.lock();
        for (key, value) in entries {
            self.apply(&mut data, origin, &key, value);
        }
    }

    /// Fail-safe: restore every actuator key to its idle constant, written
    /// directly into the owning slot (no ramping).
    pub fn set_defaults(&self) {
        let mut data = self.data.lock();
        for (key, value) in self.topology.defaults() {
            if let Some(target) = self.topology.route(key) {
                data.entry(target)
                    .or_default()
                    .insert(key.to_owned(), Scalar::Int(value));
            }
        }
    }

    /// Wipe every partition. Used once at startup; entries reappear on
    /// first write.
    pub fn clear(&self) {
        for slot in self.data.lock().values_mut() {
            slot.clear();
        }
    }

    fn collect(
        &self,
        data: &HashMap<Partition, Snapshot>,
        partition: Partition,
        keys: Option<&[&str]>,
    ) -> Snapshot {
        let (Some(set), Some(slot)) = (self.topology.transmission_set(partition), data.get(&partition))
        else {
            return Snapshot::new();
        };
        match keys {
            Some(keys) => keys
                .iter()
                .filter(|key| set.contains(**key))
                .filter_map(|key| slot.get(*key).map(|v| ((*key).to_owned(), v.clone())))
                .collect(),
            None => set
                .iter()
                .filter_map(|key| slot.get(*key).map(|v| ((*key).to_owned(), v.clone())))
                .collect(),
        }
    }

    fn apply(
        &self,
        data: &mut HashMap<Partition, Snapshot>,
        origin: Partition,
        key: &str,
        value: Scalar,
    ) {
        match origin {
            Partition::Surface => {
                let Some(target) = self.topology.route(key) else {
                    debug!(key, "dropping write with no destination");
                    return;
                };
                let slot = data.entry(target).or_default();
                match slot.get(key) {
                    Some(current) if self.topology.is_ramped(key) => {
                        let next = step_toward(current, &value);
                        slot.insert(key.to_owned(), next);
                    }
                    // First write for a key is accepted at full magnitude.
                    _ => {
                        slot.insert(key.to_owned(), value);
                    }
                }
            }
            Partition::Peripheral(_) => {
                // Peripheral reports are authoritative: stored verbatim and
                // mirrored verbatim into the surface slot for relay.
                data.entry(origin)
                    .or_default()
                    .insert(key.to_owned(), value.clone());
                data.entry(Partition::Surface)
                    .or_default()
                    .insert(key.to_owned(), value);
            }
        }
    }
}

/// Move `current` toward `target` by at most [`RAMP_RATE`] units. The final
/// step is clamped so repeated calls land exactly on the target without
/// overshooting. Non-numeric values are replaced outright.
fn step_toward(current: &Scalar, target: &Scalar) -> Scalar {
    let (Some(from), Some(to)) = (current.as_f64(), target.as_f64()) else {
        return target.clone();
    };
    let delta = to - from;
    let next = if delta.abs() <= RAMP_RATE as f64 {
        to
    } else {
        from + (RAMP_RATE as f64).copysign(delta)
    };
    match (current, target) {
        (Scalar::Int(_), Scalar::Int(_)) => Scalar::Int(next.round() as i64),
        _ => Scalar::Float(next),
    }
}
