//! Endpoint configuration with the deployment defaults baked in.
//!
//! There is no config-file surface; both binaries take these defaults and
//! override individual fields from the command line.

use crate::topology::PeripheralId;

/// Default control-link port on the vehicle.
pub const CONTROL_PORT: u16 = 50000;

/// First video stream port; cameras count upward from here.
pub const VIDEO_PORT_BASE: u16 = 50010;

/// Sonar sweep window seeded into the surface store at startup.
pub const SONAR_DEFAULTS: [(&str, i64); 2] = [("Sen_Sonar_Start", 5), ("Sen_Sonar_Len", 30)];

/// One serial line and the peripheral expected on it. The peripheral may
/// still re-identify itself at runtime through its frames.
#[derive(Debug, Clone)]
pub struct SerialEndpoint {
    pub path: String,
    pub device: PeripheralId,
}

#[derive(Debug, Clone)]
pub struct VehicleConfig {
    /// Address the control listener binds to.
    pub bind_addr: String,
    pub serial: Vec<SerialEndpoint>,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{CONTROL_PORT}"),
            serial: vec![
                SerialEndpoint {
                    path: "/dev/ttyACM0".into(),
                    device: PeripheralId::Instruments,
                },
                SerialEndpoint {
                    path: "/dev/ttyACM1".into(),
                    device: PeripheralId::Thrusters,
                },
                SerialEndpoint {
                    path: "/dev/ttyACM2".into(),
                    device: PeripheralId::Micro,
                },
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// Vehicle's control-link address.
    pub vehicle_addr: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            vehicle_addr: format!("127.0.0.1:{CONTROL_PORT}"),
        }
    }
}
