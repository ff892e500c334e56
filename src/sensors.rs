use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::engine::Command;
use crate::error::{LocatorError, Result, SensorKind};
use crate::types::{AccelData, GpsFix, MagData, SatelliteSample};

/// One sample from any of the input streams
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorMessage {
    Satellites(SatelliteSample),
    Fix(GpsFix),
    Accel(AccelData),
    Mag(MagData),
    /// The stream ended (hardware error, permission revoked)
    StreamClosed { sensor: SensorKind },
}

impl SensorMessage {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorMessage::Satellites(_) => SensorKind::SatelliteStatus,
            SensorMessage::Fix(_) => SensorKind::SatelliteFix,
            SensorMessage::Accel(_) => SensorKind::Accelerometer,
            SensorMessage::Mag(_) => SensorKind::Magnetometer,
            SensorMessage::StreamClosed { sensor } => *sensor,
        }
    }
}

/// Entry point a provider pushes samples into. Pushing only enqueues, it never
/// waits on the engine.
#[derive(Clone, Debug)]
pub struct SensorSink {
    tx: UnboundedSender<Command>,
}

impl SensorSink {
    pub(crate) fn new(tx: UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    /// Returns false once the engine has shut down
    pub fn push(&self, message: SensorMessage) -> bool {
        self.tx.send(Command::Sensor(message)).is_ok()
    }

    pub fn close(&self, sensor: SensorKind) -> bool {
        self.push(SensorMessage::StreamClosed { sensor })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Hardware/platform side of the engine.
///
/// `acquire` starts a subscription that delivers into `sink`; `release` must
/// stop it. Permission and hardware checks are the provider's business: an
/// `Err` from `acquire` only affects that one stream.
pub trait SensorProvider: Send + 'static {
    fn acquire(&mut self, sensor: SensorKind, sink: SensorSink) -> Result<()>;

    fn release(&mut self, sensor: SensorKind);

    /// Ask for a fresh satellite fix as soon as one is available
    fn request_fix(&mut self) {}
}

/// Provider for callers that feed every sample by hand through the engine
/// handle. Always grants, never produces.
#[derive(Clone, Debug, Default)]
pub struct ManualSensors {
    unavailable: Vec<SensorKind>,
}

impl ManualSensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `sensor` as missing at acquire time
    pub fn without(mut self, sensor: SensorKind) -> Self {
        self.unavailable.push(sensor);
        self
    }
}

impl SensorProvider for ManualSensors {
    fn acquire(&mut self, sensor: SensorKind, _sink: SensorSink) -> Result<()> {
        if self.unavailable.contains(&sensor) {
            return Err(match sensor {
                SensorKind::SatelliteStatus | SensorKind::SatelliteFix => {
                    LocatorError::PermissionDenied(sensor)
                }
                _ => LocatorError::SensorUnavailable(sensor),
            });
        }
        Ok(())
    }

    fn release(&mut self, _sensor: SensorKind) {}
}

/// Scoped ownership of acquired subscriptions. Everything still held is
/// released on drop, whichever way the engine loop exits.
pub struct SensorLease<P: SensorProvider> {
    provider: P,
    held: Vec<SensorKind>,
}

impl<P: SensorProvider> SensorLease<P> {
    pub fn new(provider: P) -> Self {
        Self { provider, held: Vec::new() }
    }

    pub fn acquire(&mut self, sensor: SensorKind, sink: SensorSink) -> Result<()> {
        if self.held.contains(&sensor) {
            return Ok(());
        }
        self.provider.acquire(sensor, sink)?;
        log::debug!("[sensors] acquired {}", sensor);
        self.held.push(sensor);
        Ok(())
    }

    pub fn release(&mut self, sensor: SensorKind) {
        if let Some(idx) = self.held.iter().position(|s| *s == sensor) {
            self.held.remove(idx);
            self.provider.release(sensor);
            log::debug!("[sensors] released {}", sensor);
        }
    }

    pub fn held(&self) -> &[SensorKind] {
        &self.held
    }

    pub fn request_fix(&mut self) {
        if self.held.contains(&SensorKind::SatelliteFix) {
            self.provider.request_fix();
        }
    }
}

impl<P: SensorProvider> Drop for SensorLease<P> {
    fn drop(&mut self) {
        while let Some(sensor) = self.held.pop() {
            self.provider.release(sensor);
            log::debug!("[sensors] released {}", sensor);
        }
    }
}
