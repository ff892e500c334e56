// dead_reckoning.rs: step-counting pedestrian dead reckoning
//
// Takes over from satellite fixes while the user is indoors. Each registered
// footstep advances the position by a fixed stride along the smoothed compass
// heading. Fixed stride is fine for short indoor walks and drifts on long ones.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::smoothing::{normalize_angle, HeadingSmoother};
use crate::types::{AccelData, MagData, Position, StepEvent};

pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

// Below this |E × A| the field is parallel to gravity or the device is in free fall
const MIN_HORIZONTAL_FIELD: f64 = 0.1;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReckonerConfig {
    /// Acceleration magnitude a step must rise through (m/s²)
    pub step_threshold: f64,
    /// Minimum time between two registered steps (seconds)
    pub step_debounce_secs: f64,
    pub stride_length_m: f64,
    /// Retention factor of the heading smoother
    pub heading_smoothing: f64,
    pub earth_radius_m: f64,
}

impl Default for ReckonerConfig {
    fn default() -> Self {
        Self {
            step_threshold: 10.5,
            step_debounce_secs: 0.35,
            stride_length_m: 0.5,
            heading_smoothing: 0.97,
            earth_radius_m: EARTH_RADIUS_M,
        }
    }
}

/// Output of a registered step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PdrUpdate {
    pub step: StepEvent,
    pub position: Position,
}

// ─── Estimator ───────────────────────────────────────────────────────────────

pub struct StepDeadReckoner {
    config: ReckonerConfig,
    active: bool,
    position: Option<Position>,
    heading: HeadingSmoother,

    // Latest raw vectors, replaced wholesale on every sample
    gravity: Option<Vector3<f64>>,
    geomagnetic: Option<Vector3<f64>>,

    prev_magnitude: Option<f64>,
    last_step_ts: Option<f64>,
    session_steps: u64,
}

impl StepDeadReckoner {
    pub fn new(config: ReckonerConfig) -> Self {
        let heading = HeadingSmoother::new(config.heading_smoothing);
        Self {
            config,
            active: false,
            position: None,
            heading,
            gravity: None,
            geomagnetic: None,
            prev_magnitude: None,
            last_step_ts: None,
            session_steps: 0,
        }
    }

    /// Begin integrating from `seed`. The smoothed heading carries over from any
    /// previous session.
    pub fn start(&mut self, seed: Position) {
        self.active = true;
        self.position = Some(seed);
        self.gravity = None;
        self.geomagnetic = None;
        self.prev_magnitude = None;
        self.last_step_ts = None;
        self.session_steps = 0;
        log::debug!(
            "[pdr] started at ({:.6}, {:.6}), heading {:.1}°",
            seed.latitude,
            seed.longitude,
            self.heading.heading().to_degrees()
        );
    }

    pub fn stop(&mut self) {
        if self.active {
            log::debug!("[pdr] stopped after {} steps", self.session_steps);
        }
        self.active = false;
        self.position = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn heading(&self) -> f64 {
        self.heading.heading()
    }

    pub fn session_steps(&self) -> u64 {
        self.session_steps
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    /// Feed an accelerometer sample. Returns the new position when the sample
    /// completes a step.
    pub fn feed_accel(&mut self, accel: &AccelData) -> Option<PdrUpdate> {
        if !self.active {
            return None;
        }

        self.gravity = Some(Vector3::new(accel.x, accel.y, accel.z));
        self.refresh_heading();

        let magnitude = accel.magnitude();
        let rising = self
            .prev_magnitude
            .map(|prev| prev <= self.config.step_threshold && magnitude > self.config.step_threshold)
            .unwrap_or(false);
        self.prev_magnitude = Some(magnitude);

        if !rising {
            return None;
        }

        if let Some(last) = self.last_step_ts {
            // Tolerance keeps an exact debounce-length gap from being rejected by rounding
            if accel.timestamp - last + 1e-9 < self.config.step_debounce_secs {
                return None;
            }
        }

        self.register_step(accel.timestamp)
    }

    /// Feed a magnetometer sample. Only refreshes the heading; returns the new
    /// smoothed heading when one could be derived.
    pub fn feed_mag(&mut self, mag: &MagData) -> Option<f64> {
        if !self.active {
            return None;
        }
        self.geomagnetic = Some(Vector3::new(mag.x, mag.y, mag.z));
        self.refresh_heading()
    }

    fn refresh_heading(&mut self) -> Option<f64> {
        let (gravity, geomagnetic) = (self.gravity?, self.geomagnetic?);
        let raw = heading_from_vectors(&gravity, &geomagnetic)?;
        Some(self.heading.apply(raw))
    }

    fn register_step(&mut self, timestamp: f64) -> Option<PdrUpdate> {
        let current = self.position?;
        let heading = self.heading.heading();
        let stride = self.config.stride_length_m;

        let east = stride * heading.sin();
        let north = stride * heading.cos();
        let next = offset_position(current, east, north, self.config.earth_radius_m);

        self.position = Some(next);
        self.last_step_ts = Some(timestamp);
        self.session_steps += 1;

        log::debug!(
            "[pdr] step {} at t={:.3}, heading {:.1}°, now ({:.7}, {:.7})",
            self.session_steps,
            timestamp,
            heading.to_degrees(),
            next.latitude,
            next.longitude
        );

        Some(PdrUpdate {
            step: StepEvent { timestamp, smoothed_heading_rad: heading },
            position: next,
        })
    }
}

impl Default for StepDeadReckoner {
    fn default() -> Self {
        Self::new(ReckonerConfig::default())
    }
}

// ─── Geometry ────────────────────────────────────────────────────────────────

/// Azimuth of the device's y axis from gravity and geomagnetic vectors.
///
/// Rotation-matrix decomposition: H = E × A (east), M = A × H (north),
/// azimuth = atan2(H.y, M.y). 0 = magnetic north, east positive, range (-π, π].
/// Returns `None` when the vectors do not define a horizontal plane.
pub fn heading_from_vectors(gravity: &Vector3<f64>, geomagnetic: &Vector3<f64>) -> Option<f64> {
    let gravity_norm = gravity.norm();
    if !gravity_norm.is_finite() || gravity_norm <= f64::EPSILON {
        return None;
    }

    let east = geomagnetic.cross(gravity);
    let east_norm = east.norm();
    if !east_norm.is_finite() || east_norm < MIN_HORIZONTAL_FIELD {
        return None;
    }

    let h = east / east_norm;
    let a = gravity / gravity_norm;
    let m = a.cross(&h);

    Some(normalize_angle(h.y.atan2(m.y)))
}

/// Shift a position by local east/north metres (flat-earth, small-area).
pub fn offset_position(origin: Position, east_m: f64, north_m: f64, earth_radius_m: f64) -> Position {
    let d_lat = (north_m / earth_radius_m).to_degrees();
    let cos_lat = origin.latitude.to_radians().cos();
    let d_lon = if cos_lat.abs() < 1e-12 {
        0.0
    } else {
        (east_m / (earth_radius_m * cos_lat)).to_degrees()
    };
    Position::new(origin.latitude + d_lat, origin.longitude + d_lon)
}
