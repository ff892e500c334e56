use geo::Point;
use serde::{Deserialize, Serialize};

/// WGS84 position in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// geo uses (x, y) = (lon, lat).
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    pub fn from_point(point: Point<f64>) -> Self {
        Self { latitude: point.y(), longitude: point.x() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccelData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelData {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MagData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One absolute satellite fix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: f64,
}

impl GpsFix {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatelliteInfo {
    pub snr: f64,
    pub used_in_fix: bool,
}

/// Satellite visibility snapshot, one per status update.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SatelliteSample {
    #[serde(default)]
    pub timestamp: f64,
    pub satellites: Vec<SatelliteInfo>,
}

impl SatelliteSample {
    pub fn satellite_count(&self) -> usize {
        self.satellites.len()
    }

    pub fn used(&self) -> impl Iterator<Item = &SatelliteInfo> {
        self.satellites.iter().filter(|s| s.used_in_fix)
    }
}

/// A registered footstep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub timestamp: f64,
    pub smoothed_heading_rad: f64,
}
