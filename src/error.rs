use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hardware streams the engine subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    SatelliteStatus,
    SatelliteFix,
    Accelerometer,
    Magnetometer,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SensorKind::SatelliteStatus => "satellite status",
            SensorKind::SatelliteFix => "satellite fix",
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Magnetometer => "magnetometer",
        };
        f.write_str(name)
    }
}

/// Locator error types
///
/// None of these stop a running engine: sensor errors degrade the session and
/// catalog errors exclude a single entry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocatorError {
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(SensorKind),

    #[error("Permission denied: {0}")]
    PermissionDenied(SensorKind),

    #[error("Malformed catalog entry {id}: {reason}")]
    MalformedCatalogEntry { id: String, reason: String },

    #[error("Catalog parse error: {0}")]
    CatalogParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Engine stopped")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, LocatorError>;
