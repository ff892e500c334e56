pub mod dead_reckoning;
pub mod engine;
pub mod error;
pub mod geo_match;
pub mod live_status;
pub mod sensor_fusion;
pub mod sensors;
pub mod signal_quality;
pub mod smoothing;
pub mod types;

pub use engine::{EngineHandle, LocationEngine, Subscription, Topic};
pub use error::{LocatorError, Result, SensorKind};
pub use geo_match::{Catalog, Category, GeoMatcher, LocationRecord};
pub use sensor_fusion::{FusionConfig, FusionEvent, LocationFusionController, TrackingMode, TrackingState};
pub use sensors::{ManualSensors, SensorMessage, SensorProvider, SensorSink};
pub use types::{AccelData, GpsFix, MagData, Position, SatelliteInfo, SatelliteSample};
