//! Partition layout: which endpoint owns which keys, and which keys travel
//! over which link.
//!
//! The tables here are fixed at startup and never mutated at runtime. Both
//! processes share the same [`Topology`] type; [`Topology::vehicle`] carries
//! the per-peripheral routing used by the dispatch server, while
//! [`Topology::surface`] is the flat single-partition layout used by the
//! control station.

use core::fmt;
use std::collections::{HashMap, HashSet};

/// Neutral pulse-width written to every actuator on fail-safe reset.
pub const ACTUATOR_IDLE: i64 = 1500;

/// Maximum per-call step applied to surface-origin actuator writes.
pub const RAMP_RATE: i64 = 2;

/// Wire field carrying the peripheral identifier in inbound frames.
pub const DEVICE_ID_FIELD: &str = "deviceID";

/// Actuator keys subject to ramping, fail-safe reset and the current
/// safeguard.
pub const ACTUATOR_KEYS: [&str; 12] = [
    "Thr_FP", "Thr_FS", "Thr_AP", "Thr_AS", "Thr_TFP", "Thr_TFS", "Thr_TAP",
    "Thr_TAS", "Thr_M", "Mot_R", "Mot_G", "Mot_F",
];

const THRUSTER_KEYS: [&str; 11] = [
    "Thr_FP", "Thr_FS", "Thr_AP", "Thr_AS", "Thr_TFP", "Thr_TFS", "Thr_TAP",
    "Thr_TAS", "Mot_R", "Mot_G", "Mot_F",
];

const MICRO_KEYS: [&str; 1] = ["Thr_M"];

const INSTRUMENT_KEYS: [&str; 2] = ["Sen_Sonar_Start", "Sen_Sonar_Len"];

const SURFACE_TELEMETRY_KEYS: [&str; 18] = [
    "status_T", "status_M", "status_I", "Sen_IMU_X", "Sen_IMU_Y", "Sen_IMU_Z",
    "Sen_IMU_Temp", "Sen_IMU_AccX", "Sen_IMU_AccY", "Sen_IMU_AccZ",
    "Sen_Dep_Pres", "Sen_Dep_Temp", "Sen_Dep_Dep", "Sen_Temp", "Sen_PH",
    "Sen_Sonar_Dist", "Sen_Sonar_Conf", "Sen_Metal",
];

const UPLINK_KEYS: [&str; 14] = [
    "Thr_FP", "Thr_FS", "Thr_AP", "Thr_AS", "Thr_TFP", "Thr_TFS", "Thr_TAP",
    "Thr_TAS", "Thr_M", "Mot_R", "Mot_G", "Mot_F", "Sen_Sonar_Start",
    "Sen_Sonar_Len",
];

/// One peripheral controller on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeripheralId {
    /// Main thruster and motor bank.
    Thrusters,
    /// Micro-ROV deployment unit.
    Micro,
    /// Sonar and sampling instruments.
    Instruments,
}

impl PeripheralId {
    pub const ALL: [PeripheralId; 3] = [
        PeripheralId::Thrusters,
        PeripheralId::Micro,
        PeripheralId::Instruments,
    ];

    /// Identifier carried in the `deviceID` field of inbound frames.
    pub fn wire_id(self) -> &'static str {
        match self {
            PeripheralId::Thrusters => "PCU_T",
            PeripheralId::Micro => "PCU_M",
            PeripheralId::Instruments => "PCU_I",
        }
    }

    pub fn from_wire(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.wire_id() == id)
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_id())
    }
}

/// Logical owner of a key subset: the surface station or one peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Surface,
    Peripheral(PeripheralId),
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Surface => f.write_str("surface"),
            Partition::Peripheral(id) => write!(f, "{id}"),
        }
    }
}

/// Static key layout shared by every link in one process.
#[derive(Debug)]
pub struct Topology {
    transmission: HashMap<Partition, HashSet<&'static str>>,
    routes: HashMap<&'static str, Partition>,
    default_route: Option<Partition>,
    ramped: HashSet<&'static str>,
}

impl Topology {
    /// Layout used by the vehicle-side dispatch server: one partition per
    /// peripheral plus the surface mirror, with surface-origin actuator
    /// writes routed to the owning peripheral and ramped.
    pub fn vehicle() -> Self {
        let mut transmission: HashMap<Partition, HashSet<&'static str>> = HashMap::new();
        transmission.insert(Partition::Surface, SURFACE_TELEMETRY_KEYS.into());
        transmission.insert(
            Partition::Peripheral(PeripheralId::Thrusters),
            THRUSTER_KEYS.into(),
        );
        transmission.insert(Partition::Peripheral(PeripheralId::Micro), MICRO_KEYS.into());
        transmission.insert(
            Partition::Peripheral(PeripheralId::Instruments),
            INSTRUMENT_KEYS.into(),
        );

        // Every key a peripheral may receive routes to that peripheral's
        // authoritative slot.
        let mut routes = HashMap::new();
        for (partition, keys) in &transmission {
            if let Partition::Peripheral(_) = partition {
                for key in keys {
                    routes.insert(*key, *partition);
                }
            }
        }

        Self {
            transmission,
            routes,
            default_route: None,
            ramped: ACTUATOR_KEYS.into(),
        }
    }

    /// Flat layout used by the surface station: a single partition holding
    /// everything, transmitting only the uplink keys. No ramping here; the
    /// vehicle applies it on receipt.
    pub fn surface() -> Self {
        let mut transmission: HashMap<Partition, HashSet<&'static str>> = HashMap::new();
        transmission.insert(Partition::Surface, UPLINK_KEYS.into());

        Self {
            transmission,
            routes: HashMap::new(),
            default_route: Some(Partition::Surface),
            ramped: HashSet::new(),
        }
    }

    pub fn partitions(&self) -> impl Iterator<Item = Partition> + '_ {
        self.transmission.keys().copied()
    }

    pub fn transmission_set(&self, partition: Partition) -> Option<&HashSet<&'static str>> {
        self.transmission.get(&partition)
    }

    /// Partition whose authoritative slot holds `key`, or `None` when the
    /// key has no destination in this layout (dropped by the store).
    pub fn route(&self, key: &str) -> Option<Partition> {
        self.routes.get(key).copied().or(self.default_route)
    }

    /// Whether surface-origin writes to `key` converge in bounded steps.
    pub fn is_ramped(&self, key: &str) -> bool {
        self.ramped.contains(key)
    }

    /// Fail-safe values applied on control-station disconnect.
    pub fn defaults(&self) -> impl Iterator<Item = (&'static str, i64)> {
        ACTUATOR_KEYS.into_iter().map(|key| (key, ACTUATOR_IDLE))
    }
}
