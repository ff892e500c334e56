// engine.rs: async shell around LocationFusionController
//
// Every input (sensor samples, subscription changes, status queries, stop) is
// a Command on one unbounded queue drained by a single task. That task is the
// only writer of TrackingState, so a classification flip can never race a fix
// or a step. Feeding only enqueues and never waits on the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{LocatorError, Result, SensorKind};
use crate::geo_match::Catalog;
use crate::live_status::{current_timestamp, LiveStatus};
use crate::sensor_fusion::{FusionConfig, FusionEvent, LocationFusionController};
use crate::sensors::{SensorLease, SensorMessage, SensorProvider, SensorSink};
use crate::types::{AccelData, GpsFix, MagData, SatelliteSample};

// ─── Messages ────────────────────────────────────────────────────────────────

pub(crate) enum Command {
    Sensor(SensorMessage),
    Subscribe { id: u64, topic: Topic, tx: UnboundedSender<FusionEvent> },
    Unsubscribe(u64),
    Status(oneshot::Sender<LiveStatus>),
    Stop,
}

/// Which events a subscriber wants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topic {
    /// `PositionUpdated` only
    Positions,
    /// `LocationEntered` / `LocationExited` only
    Presence,
    All,
}

impl Topic {
    pub fn accepts(self, event: &FusionEvent) -> bool {
        match self {
            Topic::Positions => event.is_position(),
            Topic::Presence => event.is_presence(),
            Topic::All => true,
        }
    }
}

/// Live event feed. Dropping it is enough to unsubscribe; the engine prunes
/// closed receivers on the next publish.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub rx: UnboundedReceiver<FusionEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<FusionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FusionEvent> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    id: u64,
    topic: Topic,
    tx: UnboundedSender<FusionEvent>,
}

// ─── The loop ────────────────────────────────────────────────────────────────

pub struct LocationEngine<P: SensorProvider> {
    controller: LocationFusionController,
    lease: SensorLease<P>,
    subscribers: Vec<Subscriber>,
    status: LiveStatus,
    started: Instant,
}

impl<P: SensorProvider> LocationEngine<P> {
    /// Validate the config, acquire sensors and spawn the update loop.
    ///
    /// Must be called from inside a tokio runtime. Sensor acquisition failures
    /// are not fatal: they are logged, kept in `EngineHandle::startup_errors`,
    /// and the session continues degraded.
    pub fn start(config: FusionConfig, catalog: Arc<Catalog>, provider: P) -> Result<EngineHandle> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let enable_pdr = config.enable_pdr;
        let mut controller = LocationFusionController::new(config, catalog);
        let mut lease = SensorLease::new(provider);
        let mut startup_errors = Vec::new();

        for sensor in [SensorKind::SatelliteStatus, SensorKind::SatelliteFix] {
            if let Err(e) = lease.acquire(sensor, SensorSink::new(tx.clone())) {
                log::warn!("[engine] {}: {}, holding last known state", sensor, e);
                startup_errors.push(e);
            }
        }

        if enable_pdr {
            for sensor in [SensorKind::Accelerometer, SensorKind::Magnetometer] {
                if let Err(e) = lease.acquire(sensor, SensorSink::new(tx.clone())) {
                    log::warn!("[engine] {}: {}", sensor, e);
                    startup_errors.push(e);
                    controller.disable_pdr(sensor);
                }
            }
            // One motion stream alone is useless
            if !controller.pdr_available() {
                lease.release(SensorKind::Accelerometer);
                lease.release(SensorKind::Magnetometer);
            }
        }

        let mut status = LiveStatus::new();
        status.pdr_available = controller.pdr_available();

        let engine = LocationEngine {
            controller,
            lease,
            subscribers: Vec::new(),
            status,
            started: Instant::now(),
        };
        log::info!("[engine] started, sensors held: {:?}", engine.lease.held());
        let task = tokio::spawn(engine.run(rx));

        Ok(EngineHandle {
            tx,
            next_id: AtomicU64::new(1),
            task: Some(task),
            startup_errors,
        })
    }

    async fn run(mut self, mut rx: UnboundedReceiver<Command>) -> LiveStatus {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Sensor(message) => {
                    let events = self.handle_sensor(message);
                    self.publish(events);
                }
                Command::Subscribe { id, topic, tx } => {
                    log::debug!("[engine] subscriber {} ({:?})", id, topic);
                    self.subscribers.push(Subscriber { id, topic, tx });
                }
                Command::Unsubscribe(id) => {
                    self.subscribers.retain(|s| s.id != id);
                }
                Command::Status(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Stop => break,
            }
        }

        let status = self.snapshot();
        log::info!(
            "[engine] stopped after {} events, {} steps",
            status.events_emitted,
            status.step_count
        );
        // Dropping self drops the lease, which releases every held sensor
        status
    }

    fn handle_sensor(&mut self, message: SensorMessage) -> Vec<FusionEvent> {
        let events = match message {
            SensorMessage::Satellites(sample) => {
                self.status.satellite_samples += 1;
                self.controller.feed_satellites(&sample)
            }
            SensorMessage::Fix(fix) => {
                self.status.gps_fixes += 1;
                self.controller.feed_fix(&fix)
            }
            SensorMessage::Accel(accel) => {
                self.status.accel_samples += 1;
                self.controller.feed_accel(&accel)
            }
            SensorMessage::Mag(mag) => {
                self.status.mag_samples += 1;
                self.controller.feed_mag(&mag)
            }
            SensorMessage::StreamClosed { sensor } => self.close_stream(sensor),
        };

        if events.contains(&FusionEvent::FixRequested) {
            self.lease.request_fix();
        }
        events
    }

    fn close_stream(&mut self, sensor: SensorKind) -> Vec<FusionEvent> {
        let name = sensor.to_string();
        if !self.status.closed_streams.contains(&name) {
            self.status.closed_streams.push(name);
        }
        self.lease.release(sensor);

        match sensor {
            SensorKind::Accelerometer | SensorKind::Magnetometer => {
                self.lease.release(SensorKind::Accelerometer);
                self.lease.release(SensorKind::Magnetometer);
                self.controller.disable_pdr(sensor)
            }
            SensorKind::SatelliteStatus | SensorKind::SatelliteFix => {
                log::warn!("[engine] {} stream closed, holding last known state", sensor);
                Vec::new()
            }
        }
    }

    fn publish(&mut self, events: Vec<FusionEvent>) {
        for event in &events {
            self.status.events_emitted += 1;
            self.subscribers.retain(|sub| {
                if sub.tx.is_closed() {
                    return false;
                }
                !sub.topic.accepts(event) || sub.tx.send(event.clone()).is_ok()
            });
        }
    }

    fn snapshot(&mut self) -> LiveStatus {
        self.subscribers.retain(|sub| !sub.tx.is_closed());

        let mut status = self.status.clone();
        status.apply_state(self.controller.state());
        status.timestamp = current_timestamp();
        status.uptime_seconds = self.started.elapsed().as_secs_f64();
        status.heading_deg = self.controller.heading().to_degrees();
        status.pdr_available = self.controller.pdr_available();
        status.subscribers = self.subscribers.len();
        status
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Caller side of a running engine. Dropping the handle stops the engine.
pub struct EngineHandle {
    tx: UnboundedSender<Command>,
    next_id: AtomicU64,
    task: Option<JoinHandle<LiveStatus>>,
    startup_errors: Vec<LocatorError>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| LocatorError::EngineStopped)
    }

    /// Sensor acquisition failures seen during `start`
    pub fn startup_errors(&self) -> &[LocatorError] {
        &self.startup_errors
    }

    pub fn feed_satellites(&self, sample: SatelliteSample) -> Result<()> {
        self.send(Command::Sensor(SensorMessage::Satellites(sample)))
    }

    pub fn feed_fix(&self, fix: GpsFix) -> Result<()> {
        self.send(Command::Sensor(SensorMessage::Fix(fix)))
    }

    pub fn feed_accel(&self, accel: AccelData) -> Result<()> {
        self.send(Command::Sensor(SensorMessage::Accel(accel)))
    }

    pub fn feed_mag(&self, mag: MagData) -> Result<()> {
        self.send(Command::Sensor(SensorMessage::Mag(mag)))
    }

    pub fn feed(&self, message: SensorMessage) -> Result<()> {
        self.send(Command::Sensor(message))
    }

    /// A pushable entry point for code that produces samples elsewhere
    pub fn sink(&self) -> SensorSink {
        SensorSink::new(self.tx.clone())
    }

    /// Events produced by commands queued after this call are delivered;
    /// earlier ones are not replayed.
    pub fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe { id, topic, tx })?;
        Ok(Subscription { id, rx })
    }

    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        self.send(Command::Unsubscribe(id))
    }

    /// Snapshot taken after every command queued before this call
    pub async fn status(&self) -> Result<LiveStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status(reply))?;
        rx.await.map_err(|_| LocatorError::EngineStopped)
    }

    /// Drain queued commands, release sensors and return the final status
    pub async fn stop(mut self) -> Result<LiveStatus> {
        let _ = self.tx.send(Command::Stop);
        let task = self.task.take().ok_or(LocatorError::EngineStopped)?;
        task.await.map_err(|e| {
            log::error!("[engine] update loop failed: {}", e);
            LocatorError::EngineStopped
        })
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.tx.send(Command::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_reckoning::{offset_position, EARTH_RADIUS_M};
    use crate::geo_match::{Category, LocationRecord};
    use crate::sensor_fusion::{PositionSource, TrackingMode};
    use crate::types::{Position, SatelliteInfo};
    use std::sync::Mutex;
    use std::time::Duration;

    const QUAD: Position = Position { latitude: 10.7626, longitude: 106.6822 };

    #[derive(Clone, Default)]
    struct Probe {
        log: Arc<Mutex<Vec<String>>>,
        sinks: Arc<Mutex<Vec<(SensorKind, SensorSink)>>>,
        missing: Vec<SensorKind>,
    }

    impl Probe {
        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn sink(&self, sensor: SensorKind) -> SensorSink {
            self.sinks
                .lock()
                .unwrap()
                .iter()
                .find(|(kind, _)| *kind == sensor)
                .map(|(_, sink)| sink.clone())
                .unwrap()
        }
    }

    impl SensorProvider for Probe {
        fn acquire(&mut self, sensor: SensorKind, sink: SensorSink) -> Result<()> {
            if self.missing.contains(&sensor) {
                return Err(LocatorError::SensorUnavailable(sensor));
            }
            self.log.lock().unwrap().push(format!("+{}", sensor));
            self.sinks.lock().unwrap().push((sensor, sink));
            Ok(())
        }

        fn release(&mut self, sensor: SensorKind) {
            self.log.lock().unwrap().push(format!("-{}", sensor));
        }

        fn request_fix(&mut self) {
            self.log.lock().unwrap().push("fix?".to_string());
        }
    }

    fn campus() -> Arc<Catalog> {
        Arc::new(Catalog::from_records(vec![LocationRecord::circle(
            "quad",
            "Quad",
            Category::Outdoor,
            QUAD,
            20.0,
        )]))
    }

    fn fix(position: Position) -> GpsFix {
        GpsFix { timestamp: 0.0, latitude: position.latitude, longitude: position.longitude, accuracy: 4.0 }
    }

    fn blocked() -> SatelliteSample {
        SatelliteSample::default()
    }

    fn strong() -> SatelliteSample {
        SatelliteSample {
            timestamp: 0.0,
            satellites: vec![SatelliteInfo { snr: 38.0, used_in_fix: true }; 8],
        }
    }

    #[tokio::test]
    async fn test_stop_releases_all_sensors() {
        let probe = Probe::default();
        let handle = LocationEngine::start(FusionConfig::default(), campus(), probe.clone()).unwrap();
        assert!(handle.startup_errors().is_empty());

        let status = handle.stop().await.unwrap();
        assert_eq!(status.mode, TrackingMode::Outdoor);
        assert_eq!(
            probe.entries(),
            vec![
                "+satellite status",
                "+satellite fix",
                "+accelerometer",
                "+magnetometer",
                "-magnetometer",
                "-accelerometer",
                "-satellite fix",
                "-satellite status",
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_handle_releases_sensors() {
        let probe = Probe::default();
        let handle = LocationEngine::start(FusionConfig::default(), campus(), probe.clone()).unwrap();
        drop(handle);

        for _ in 0..100 {
            if probe.entries().len() == 8 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(probe.entries().iter().filter(|e| e.starts_with('-')).count(), 4);
    }

    #[tokio::test]
    async fn test_events_reach_subscriber_in_order() {
        let handle = LocationEngine::start(FusionConfig::default(), campus(), Probe::default()).unwrap();
        let mut sub = handle.subscribe(Topic::All).unwrap();
        handle.feed_fix(fix(QUAD)).unwrap();

        assert_eq!(
            sub.recv().await,
            Some(FusionEvent::PositionUpdated { position: QUAD, source: PositionSource::Outdoor })
        );
        assert_eq!(sub.recv().await, Some(FusionEvent::LocationEntered { id: "quad".into() }));
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_topic_filter_and_unsubscribe() {
        let handle = LocationEngine::start(FusionConfig::default(), campus(), Probe::default()).unwrap();
        let mut presence = handle.subscribe(Topic::Presence).unwrap();
        let mut positions = handle.subscribe(Topic::Positions).unwrap();

        handle.feed_fix(fix(QUAD)).unwrap();
        handle.feed_fix(fix(offset_position(QUAD, 5.0, 0.0, EARTH_RADIUS_M))).unwrap();
        handle.feed_fix(fix(offset_position(QUAD, 300.0, 0.0, EARTH_RADIUS_M))).unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.gps_fixes, 3);
        assert_eq!(status.subscribers, 2);

        let mut seen = Vec::new();
        while let Some(event) = presence.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                FusionEvent::LocationEntered { id: "quad".into() },
                FusionEvent::LocationExited { id: "quad".into() },
            ]
        );

        let mut count = 0;
        while let Some(event) = positions.try_recv() {
            assert!(event.is_position());
            count += 1;
        }
        assert_eq!(count, 3);

        handle.unsubscribe(positions.id).unwrap();
        drop(presence);
        assert_eq!(handle.status().await.unwrap().subscribers, 0);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_magnetometer_disables_pdr() {
        let probe = Probe { missing: vec![SensorKind::Magnetometer], ..Probe::default() };
        let handle = LocationEngine::start(FusionConfig::default(), campus(), probe.clone()).unwrap();
        assert_eq!(handle.startup_errors(), &[LocatorError::SensorUnavailable(SensorKind::Magnetometer)]);

        handle.feed_fix(fix(QUAD)).unwrap();
        handle.feed_satellites(blocked()).unwrap();
        let status = handle.status().await.unwrap();
        assert!(!status.pdr_available);
        assert_eq!(status.mode, TrackingMode::Outdoor);

        // The lone accelerometer was handed back right away
        assert!(probe.entries().contains(&"-accelerometer".to_string()));
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_fix_request_forwarded_to_provider() {
        let probe = Probe::default();
        let handle = LocationEngine::start(FusionConfig::default(), campus(), probe.clone()).unwrap();
        handle.feed_satellites(blocked()).unwrap();
        assert_eq!(handle.status().await.unwrap().mode, TrackingMode::SeekingIndoorFix);
        assert!(probe.entries().contains(&"fix?".to_string()));

        handle.feed_fix(fix(QUAD)).unwrap();
        assert_eq!(handle.status().await.unwrap().mode, TrackingMode::Indoor);
        handle.feed_satellites(strong()).unwrap();
        assert_eq!(handle.status().await.unwrap().mode, TrackingMode::Outdoor);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_motion_stream_falls_back_outdoor() {
        let probe = Probe::default();
        let handle = LocationEngine::start(FusionConfig::default(), campus(), probe.clone()).unwrap();
        let mut sub = handle.subscribe(Topic::All).unwrap();
        handle.feed_fix(fix(QUAD)).unwrap();
        handle.feed_satellites(blocked()).unwrap();

        // Pushed by the provider, not the caller
        assert!(probe.sink(SensorKind::Accelerometer).close(SensorKind::Accelerometer));
        let status = handle.status().await.unwrap();
        assert_eq!(status.mode, TrackingMode::Outdoor);
        assert!(!status.pdr_available);
        assert_eq!(status.closed_streams, vec!["accelerometer".to_string()]);

        let mut events = Vec::new();
        while let Some(event) = sub.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&FusionEvent::SensorUnavailable { sensor: SensorKind::Accelerometer }));

        handle.stop().await.unwrap();
        let released = probe.entries().iter().filter(|e| e.as_str() == "-accelerometer").count();
        assert_eq!(released, 1);
    }

    #[tokio::test]
    async fn test_sink_rejects_after_stop() {
        let probe = Probe::default();
        let handle = LocationEngine::start(FusionConfig::default(), campus(), probe.clone()).unwrap();
        let sink = handle.sink();
        handle.stop().await.unwrap();
        assert!(!sink.push(SensorMessage::Fix(fix(QUAD))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = FusionConfig { stride_length_m: -1.0, ..FusionConfig::default() };
        let err = LocationEngine::start(config, campus(), Probe::default()).err();
        assert!(matches!(err, Some(LocatorError::Config(_))));
    }
}
