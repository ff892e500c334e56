use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::sensor_fusion::{TrackingMode, TrackingState};

/// Point-in-time summary of a running (or finished) engine
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: f64,
    // Tracking
    pub mode: TrackingMode,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub active_location_id: Option<String>,
    pub step_count: u64,
    pub heading_deg: f64,
    pub pdr_available: bool,
    // Input counters
    pub satellite_samples: u64,
    pub gps_fixes: u64,
    pub accel_samples: u64,
    pub mag_samples: u64,
    pub closed_streams: Vec<String>,
    // Output counters
    pub events_emitted: u64,
    pub subscribers: usize,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0.0,
            mode: TrackingMode::Outdoor,
            latitude: None,
            longitude: None,
            active_location_id: None,
            step_count: 0,
            heading_deg: 0.0,
            pdr_available: true,
            satellite_samples: 0,
            gps_fixes: 0,
            accel_samples: 0,
            mag_samples: 0,
            closed_streams: Vec::new(),
            events_emitted: 0,
            subscribers: 0,
        }
    }

    /// Copy the tracking fields from the controller state
    pub fn apply_state(&mut self, state: &TrackingState) {
        self.mode = state.mode;
        self.latitude = state.last_known_position.map(|p| p.latitude);
        self.longitude = state.last_known_position.map(|p| p.longitude);
        self.active_location_id = state.active_location_id.clone();
        self.step_count = state.step_count;
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
