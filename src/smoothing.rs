use std::f64::consts::PI;

/// Exponential smoothing for a compass heading in radians.
///
/// `heading = alpha * heading_prev + (1 - alpha) * heading_raw`, applied along the
/// shortest arc so a raw heading crossing the ±π seam does not swing the estimate
/// through zero. Output stays in (-π, π].
#[derive(Clone, Debug)]
pub struct HeadingSmoother {
    alpha: f64,
    heading: f64,
    updates: u64,
}

impl HeadingSmoother {
    /// Create a smoother with retention factor `alpha` (typically 0.97)
    pub fn new(alpha: f64) -> Self {
        Self::with_initial(alpha, 0.0)
    }

    pub fn with_initial(alpha: f64, heading: f64) -> Self {
        HeadingSmoother { alpha, heading: normalize_angle(heading), updates: 0 }
    }

    /// Blend a raw heading into the estimate and return the smoothed value
    pub fn apply(&mut self, raw: f64) -> f64 {
        let delta = normalize_angle(raw - self.heading);
        self.heading = normalize_angle(self.heading + (1.0 - self.alpha) * delta);
        self.updates += 1;
        self.heading
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    /// Number of raw headings blended so far
    pub fn len(&self) -> u64 {
        self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.updates == 0
    }
}

/// Wrap an angle into (-π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}
