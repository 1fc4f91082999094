//! Current-draw safeguard applied to outbound actuator snapshots.
//!
//! Each safeguarded actuator's draw is modeled by a calibrated quadratic in
//! its raw command value. When the summed draw of a snapshot would exceed
//! [`AMP_LIMIT`], every non-idle command is pulled proportionally back
//! toward idle by re-solving the model for the scaled-down draw. The
//! transform is stateless and read-time only: it rewrites the snapshot it
//! is given, never the store behind it.

use tracing::debug;

use crate::store::{Scalar, Snapshot};
use crate::topology::{ACTUATOR_IDLE, ACTUATOR_KEYS};

/// Total modeled draw allowed on the tether, in amps. Calibrated slightly
/// below the supply's rated limit.
pub const AMP_LIMIT: f64 = 99.0;

// Calibrated coefficients of the draw model `I(v) = A*v^2 + B*v + C`.
const QUAD_A: f64 = 0.000_095_379_64;
const QUAD_B: f64 = -0.286_487_2;
const QUAD_C: f64 = 214.951_3;

/// Estimated current draw of one actuator at raw command value `v`.
pub fn modeled_current(v: f64) -> f64 {
    QUAD_A * v * v + QUAD_B * v + QUAD_C
}

/// Command value whose modeled draw equals `amps`, nearest to `original`.
///
/// Solves the quadratic for both roots and keeps the one closer to the
/// original command, so scaling never flips an actuator across idle. A
/// non-positive discriminant means `amps` is below the model's minimum;
/// the vertex is the nearest achievable point, so clamp there.
fn nearest_root(original: f64, amps: f64) -> f64 {
    let discriminant = QUAD_B * QUAD_B - 4.0 * QUAD_A * (QUAD_C - amps);
    if discriminant <= 0.0 {
        return -QUAD_B / (2.0 * QUAD_A);
    }
    let sqrt = discriminant.sqrt();
    let high = (-QUAD_B + sqrt) / (2.0 * QUAD_A);
    let low = (-QUAD_B - sqrt) / (2.0 * QUAD_A);
    if (original - high).abs() <= (original - low).abs() {
        high
    } else {
        low
    }
}

/// Scale the safeguarded values in `snapshot` so their summed modeled draw
/// stays under [`AMP_LIMIT`]. Idle commands are left untouched; snapshots
/// already under the limit come back unchanged.
pub fn apply(snapshot: &mut Snapshot) {
    let guarded: Vec<(String, f64)> = ACTUATOR_KEYS
        .iter()
        .filter_map(|key| {
            let value = snapshot.get(*key)?.as_f64()?;
            Some(((*key).to_owned(), value))
        })
        .collect();

    let total: f64 = guarded
        .iter()
        .map(|(_, value)| modeled_current(*value))
        .sum();
    if total <= AMP_LIMIT {
        return;
    }

    let ratio = AMP_LIMIT / total;
    debug!(total, ratio, "scaling actuator commands toward idle");
    for (key, value) in guarded {
        if value == ACTUATOR_IDLE as f64 {
            continue;
        }
        let scaled = nearest_root(value, modeled_current(value) * ratio);
        snapshot.insert(key, Scalar::Float(scaled));
    }
}
