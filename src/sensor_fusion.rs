// sensor_fusion.rs: location fusion controller
//
// Pure state machine. Nothing here knows about tokio, sensor acquisition or
// subscribers; the engine loop in engine.rs owns all of that.
//
// Samples go in through feed_*, events come out as Vec<FusionEvent>. Every call
// is applied completely before it returns, so callers never see half a transition.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::dead_reckoning::{ReckonerConfig, StepDeadReckoner, EARTH_RADIUS_M};
use crate::error::{LocatorError, Result, SensorKind};
use crate::geo_match::{Catalog, Category, GeoMatcher};
use crate::signal_quality::SignalQualityClassifier;
use crate::types::{AccelData, GpsFix, MagData, Position, SatelliteSample, StepEvent};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── Signal quality ──
    pub min_used_satellites: usize,
    pub min_mean_snr: f64,

    // ── Dead reckoning ──
    pub step_threshold: f64,
    pub step_debounce_secs: f64,
    pub stride_length_m: f64,
    pub heading_smoothing: f64,
    pub earth_radius_m: f64,

    // ── Feature flags ──
    pub enable_pdr: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_used_satellites: 4,
            min_mean_snr: 25.0,
            step_threshold: 10.5,
            step_debounce_secs: 0.35,
            stride_length_m: 0.5,
            heading_smoothing: 0.97,
            earth_radius_m: EARTH_RADIUS_M,
            enable_pdr: true,
        }
    }
}

impl FusionConfig {
    /// Parse JSON; absent fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FusionConfig =
            serde_json::from_str(json).map_err(|e| LocatorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| LocatorError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("step_threshold", self.step_threshold),
            ("stride_length_m", self.stride_length_m),
            ("earth_radius_m", self.earth_radius_m),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(LocatorError::Config(format!("{} must be positive, got {}", name, value)));
            }
        }
        if !self.step_debounce_secs.is_finite() || self.step_debounce_secs < 0.0 {
            return Err(LocatorError::Config(format!(
                "step_debounce_secs must be >= 0, got {}",
                self.step_debounce_secs
            )));
        }
        if !(0.0..1.0).contains(&self.heading_smoothing) {
            return Err(LocatorError::Config(format!(
                "heading_smoothing must be in [0, 1), got {}",
                self.heading_smoothing
            )));
        }
        if !self.min_mean_snr.is_finite() {
            return Err(LocatorError::Config("min_mean_snr must be finite".to_string()));
        }
        Ok(())
    }

    pub fn reckoner_config(&self) -> ReckonerConfig {
        ReckonerConfig {
            step_threshold: self.step_threshold,
            step_debounce_secs: self.step_debounce_secs,
            stride_length_m: self.stride_length_m,
            heading_smoothing: self.heading_smoothing,
            earth_radius_m: self.earth_radius_m,
        }
    }
}

// ─── Tracking state ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    Outdoor,
    Indoor,
    /// Classified indoor but no seed position yet
    SeekingIndoorFix,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    Outdoor,
    Indoor,
}

impl PositionSource {
    fn category(self) -> Category {
        match self {
            PositionSource::Outdoor => Category::Outdoor,
            PositionSource::Indoor => Category::Indoor,
        }
    }
}

/// `active_location_id` is never set while `mode` is `SeekingIndoorFix`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub mode: TrackingMode,
    pub last_known_position: Option<Position>,
    pub active_location_id: Option<String>,
    pub step_count: u64,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Outdoor,
            last_known_position: None,
            active_location_id: None,
            step_count: 0,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FusionEvent {
    PositionUpdated { position: Position, source: PositionSource },
    LocationEntered { id: String },
    LocationExited { id: String },
    ModeChanged { from: TrackingMode, to: TrackingMode },
    StepDetected { step: StepEvent },
    FixRequested,
    SensorUnavailable { sensor: SensorKind },
}

impl FusionEvent {
    pub fn is_position(&self) -> bool {
        matches!(self, FusionEvent::PositionUpdated { .. })
    }

    pub fn is_presence(&self) -> bool {
        matches!(self, FusionEvent::LocationEntered { .. } | FusionEvent::LocationExited { .. })
    }
}

// ─── The controller ──────────────────────────────────────────────────────────

pub struct LocationFusionController {
    config: FusionConfig,
    classifier: SignalQualityClassifier,
    reckoner: StepDeadReckoner,
    matcher: GeoMatcher,
    state: TrackingState,
    pdr_available: bool,
}

impl LocationFusionController {
    pub fn new(config: FusionConfig, catalog: Arc<Catalog>) -> Self {
        Self {
            classifier: SignalQualityClassifier::new(config.min_used_satellites, config.min_mean_snr),
            reckoner: StepDeadReckoner::new(config.reckoner_config()),
            matcher: GeoMatcher::new(catalog),
            state: TrackingState::default(),
            pdr_available: config.enable_pdr,
            config,
        }
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    pub fn mode(&self) -> TrackingMode {
        self.state.mode
    }

    pub fn pdr_available(&self) -> bool {
        self.pdr_available
    }

    pub fn heading(&self) -> f64 {
        self.reckoner.heading()
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Permanently disable dead reckoning for this session. The controller falls
    /// back to outdoor-only operation.
    pub fn disable_pdr(&mut self, sensor: SensorKind) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if !self.pdr_available {
            return events;
        }
        log::warn!("[fusion] {} unavailable, dead reckoning disabled", sensor);
        self.pdr_available = false;
        events.push(FusionEvent::SensorUnavailable { sensor });

        if self.state.mode != TrackingMode::Outdoor {
            self.reckoner.stop();
            self.transition(TrackingMode::Outdoor, &mut events);
        }
        events
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    /// Feed a satellite visibility sample (drives the indoor/outdoor handoff).
    pub fn feed_satellites(&mut self, sample: &SatelliteSample) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        let indoor = self.classifier.update(sample);

        match (self.state.mode, indoor) {
            (TrackingMode::Outdoor, true) => {
                if !self.pdr_available {
                    log::debug!("[fusion] indoor signal ignored, no dead reckoning");
                    return events;
                }
                match self.state.last_known_position {
                    Some(seed) => {
                        self.reckoner.start(seed);
                        self.transition(TrackingMode::Indoor, &mut events);
                    }
                    None => {
                        self.transition(TrackingMode::SeekingIndoorFix, &mut events);
                        events.push(FusionEvent::FixRequested);
                    }
                }
            }
            (TrackingMode::Indoor | TrackingMode::SeekingIndoorFix, false) => {
                self.reckoner.stop();
                self.transition(TrackingMode::Outdoor, &mut events);
            }
            _ => {}
        }

        events
    }

    /// Feed an absolute satellite fix.
    pub fn feed_fix(&mut self, fix: &GpsFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        let position = fix.position();
        if !position.is_valid() {
            log::warn!("[fusion] discarding invalid fix ({}, {})", fix.latitude, fix.longitude);
            return events;
        }

        match self.state.mode {
            TrackingMode::Outdoor => {
                self.state.last_known_position = Some(position);
                events.push(FusionEvent::PositionUpdated { position, source: PositionSource::Outdoor });
                self.update_match(position, PositionSource::Outdoor, &mut events);
            }
            TrackingMode::SeekingIndoorFix => {
                self.state.last_known_position = Some(position);
                self.reckoner.start(position);
                self.transition(TrackingMode::Indoor, &mut events);
                events.push(FusionEvent::PositionUpdated { position, source: PositionSource::Indoor });
            }
            TrackingMode::Indoor => {
                // No mid-session re-seed: indoor fixes are not trusted
                log::debug!("[fusion] ignoring fix while indoor (accuracy {:.1} m)", fix.accuracy);
            }
        }

        events
    }

    /// Feed an accelerometer sample; may complete a step while indoor.
    pub fn feed_accel(&mut self, accel: &AccelData) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if self.state.mode != TrackingMode::Indoor {
            return events;
        }

        if let Some(update) = self.reckoner.feed_accel(accel) {
            self.state.step_count += 1;
            self.state.last_known_position = Some(update.position);
            events.push(FusionEvent::StepDetected { step: update.step });
            events.push(FusionEvent::PositionUpdated {
                position: update.position,
                source: PositionSource::Indoor,
            });
            self.update_match(update.position, PositionSource::Indoor, &mut events);
        }

        events
    }

    /// Feed a magnetometer sample; only refreshes the heading.
    pub fn feed_mag(&mut self, mag: &MagData) -> Vec<FusionEvent> {
        if self.state.mode == TrackingMode::Indoor {
            self.reckoner.feed_mag(mag);
        }
        Vec::new()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn transition(&mut self, to: TrackingMode, events: &mut Vec<FusionEvent>) {
        let from = self.state.mode;
        if from == to {
            return;
        }
        log::info!("[fusion] mode {:?} -> {:?}", from, to);
        self.state.mode = to;
        debug_assert!(
            to != TrackingMode::SeekingIndoorFix || self.state.active_location_id.is_none(),
            "active location while seeking a fix"
        );
        events.push(FusionEvent::ModeChanged { from, to });
    }

    fn update_match(&mut self, position: Position, source: PositionSource, events: &mut Vec<FusionEvent>) {
        let matched = self
            .matcher
            .resolve(position, source.category())
            .map(|entry| entry.id().to_string());

        if matched == self.state.active_location_id {
            return;
        }

        match &matched {
            Some(id) => {
                log::info!("[fusion] entered {}", id);
                events.push(FusionEvent::LocationEntered { id: id.clone() });
            }
            None => {
                if let Some(previous) = &self.state.active_location_id {
                    log::info!("[fusion] exited {}", previous);
                    events.push(FusionEvent::LocationExited { id: previous.clone() });
                }
            }
        }
        self.state.active_location_id = matched;
    }
}
