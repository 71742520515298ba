//! # Capture Scheduler
//!
//! Single-task loop driven by three wake sources: the capture timer, the
//! motion detector and the radio link.
//!
//! Wakes are queued as [`WakeReason`]s and folded into pending flags. Each
//! pass services at most one capture (timer first, otherwise motion) and then
//! drains the ring log if the link woke us. A motion wake that loses to a
//! timer wake stays pending for the next pass. The loop blocks only when no
//! flag is pending.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use super::retry::retry;
use super::sensors::SensorSource;
use crate::error::{Result, StorageError};
use crate::record::{EnvironmentReading, OverflowPolicy, PositionFix, TelemetryRecord};
use crate::storage::{FlashDevice, RingLog};
use crate::transport::link::FrameLink;
use crate::wire::pack;

/// Why the scheduler woke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    Motion,
    LinkReady,
}

/// Cloneable handle for raising wakes from timers, interrupts and callbacks
#[derive(Debug, Clone)]
pub struct WakeSource {
    tx: mpsc::Sender<WakeReason>,
}

impl WakeSource {
    /// Raise a wake without blocking
    ///
    /// A full queue means the scheduler already has wakes pending; the raise
    /// is dropped.
    pub fn raise(&self, reason: WakeReason) {
        match self.tx.try_send(reason) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Wake queue full, {:?} coalesced", reason),
            Err(TrySendError::Closed(_)) => debug!("Scheduler gone, {:?} ignored", reason),
        }
    }

    /// The scheduler has stopped listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a wake queue
pub fn wake_channel(capacity: usize) -> (WakeSource, mpsc::Receiver<WakeReason>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (WakeSource { tx }, rx)
}

/// Raise a timer wake every `period`, starting immediately
pub async fn run_timer(period: Duration, wake: WakeSource) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        if wake.is_closed() {
            break;
        }
        wake.raise(WakeReason::Timer);
    }
}

/// Wake flags not yet serviced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingWakes {
    pub timer: bool,
    pub motion: bool,
    pub link: bool,
}

/// Work selected for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    /// Capture to run, if any
    pub capture: Option<WakeReason>,
    /// Whether the link woke the scheduler
    pub drain: bool,
}

impl PendingWakes {
    pub fn raise(&mut self, reason: WakeReason) {
        match reason {
            WakeReason::Timer => self.timer = true,
            WakeReason::Motion => self.motion = true,
            WakeReason::LinkReady => self.link = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.timer || self.motion || self.link)
    }

    /// Select and clear the work for the next pass
    ///
    /// Timer and motion are mutually exclusive within a pass; the link flag
    /// is always consumed.
    pub fn next_pass(&mut self) -> Pass {
        let capture = if self.timer {
            self.timer = false;
            Some(WakeReason::Timer)
        } else if self.motion {
            self.motion = false;
            Some(WakeReason::Motion)
        } else {
            None
        };
        let drain = std::mem::take(&mut self.link);
        Pass { capture, drain }
    }
}

/// Capture behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Device ID stamped on records until the gateway assigns another
    pub device_id: u8,
    /// Attempts per sensor and GNSS read
    pub sensor_retries: u32,
    /// Narrowing rule for fixed-point fields
    pub overflow: OverflowPolicy,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device_id: 1,
            sensor_retries: 5,
            overflow: OverflowPolicy::Wrap,
        }
    }
}

/// Tracker-side loop owning the ring log, the sensors and the link
pub struct CaptureScheduler<F: FlashDevice, S: SensorSource, L: FrameLink> {
    log: RingLog<F>,
    sensors: S,
    link: L,
    wakes: mpsc::Receiver<WakeReason>,
    pending: PendingWakes,
    settings: CaptureSettings,
}

impl<F: FlashDevice, S: SensorSource, L: FrameLink> CaptureScheduler<F, S, L> {
    pub fn new(
        log: RingLog<F>,
        sensors: S,
        link: L,
        wakes: mpsc::Receiver<WakeReason>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            log,
            sensors,
            link,
            wakes,
            pending: PendingWakes::default(),
            settings,
        }
    }

    pub fn log(&self) -> &RingLog<F> {
        &self.log
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn device_id(&self) -> u8 {
        self.settings.device_id
    }

    /// Service wakes until every [`WakeSource`] is dropped
    ///
    /// # Errors
    ///
    /// Pass failures are logged, not returned; this only returns `Ok`.
    pub async fn run(&mut self) -> Result<()> {
        info!("Capture scheduler running (device {})", self.settings.device_id);
        loop {
            if self.pending.is_empty() {
                match self.wakes.recv().await {
                    Some(reason) => self.pending.raise(reason),
                    None => break,
                }
            }
            while let Ok(reason) = self.wakes.try_recv() {
                self.pending.raise(reason);
            }

            let pass = self.pending.next_pass();
            self.run_pass(pass).await;
        }

        let meta = self.log.metadata();
        info!(
            "Capture scheduler stopped: size={} read_size={} wrap_around={}",
            meta.size, meta.read_size, meta.wrap_around
        );
        Ok(())
    }

    /// Run one pass. Records captured while a collector is subscribed are
    /// drained in the same pass.
    pub async fn run_pass(&mut self, pass: Pass) {
        let mut captured = false;
        if let Some(reason) = pass.capture {
            match self.capture(reason) {
                Ok(()) => captured = true,
                Err(e) => error!("Capture on {:?} wake failed: {}", reason, e),
            }
        }

        if pass.drain || (captured && self.link.is_connected()) {
            match self.drain_to_link().await {
                Ok(sent) => debug!("Drain sent {} frames", sent),
                Err(e) => error!("Drain failed: {}", e),
            }
        }
    }

    /// Write path: acquire readings and append one record
    ///
    /// Sensor failures fall back to zero readings and an unknown position
    /// once retries are exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if the append fails
    pub fn capture(&mut self, reason: WakeReason) -> std::result::Result<(), StorageError> {
        if let Some(device_id) = self.link.take_device_id() {
            info!("Device ID reassigned {} -> {}", self.settings.device_id, device_id);
            self.settings.device_id = device_id;
        }

        let attempts = self.settings.sensor_retries;
        let sensors = &mut self.sensors;

        let environment = retry(attempts, || sensors.fetch_all_readings()).unwrap_or_else(|e| {
            warn!("Sensor read failed after {} attempts: {}", attempts, e);
            EnvironmentReading::default()
        });
        let position = retry(attempts, || sensors.fetch_position()).unwrap_or_else(|e| {
            warn!("GNSS read failed after {} attempts: {}", attempts, e);
            PositionFix::unknown()
        });

        let record = TelemetryRecord::from_readings(
            &position,
            &environment,
            self.settings.device_id,
            self.settings.overflow,
        );
        self.log.append(&record)?;
        debug!("{:?} capture stored (unread={})", reason, self.log.unread());
        Ok(())
    }

    /// Read path: send undelivered records while the link stays up
    ///
    /// A record whose notification fails is left unread and the drain stops.
    ///
    /// # Returns
    ///
    /// Number of frames sent
    ///
    /// # Errors
    ///
    /// Returns error if reading the log or persisting the cursor fails
    pub async fn drain_to_link(&mut self) -> std::result::Result<u32, StorageError> {
        let policy = self.settings.overflow;
        let link = &mut self.link;
        let mut drain = self.log.drain();
        let mut sent = 0;

        while link.is_connected() {
            let record = match drain.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    drain.finish()?;
                    return Err(e);
                }
                None => break,
            };

            if let Err(e) = link.notify(&pack(&record, policy)).await {
                warn!("Notify failed, record kept for next link: {}", e);
                drain.requeue_last();
                break;
            }
            sent += 1;
        }

        drain.finish()?;
        if sent > 0 {
            info!("Sent {} records", sent);
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sensors::{MockSensorSource, SimulatedSensors};
    use crate::error::{RadioError, SensorReadError, TrackerError};
    use crate::record::types::UNKNOWN_HEMISPHERE;
    use crate::storage::RamFlash;
    use crate::wire::{unpack_record, WireFrame};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Link stand-in recording every frame
    #[derive(Clone, Default)]
    struct FakeLink {
        connected: Arc<Mutex<bool>>,
        sent: Arc<Mutex<Vec<WireFrame>>>,
        fail_after: Arc<Mutex<Option<usize>>>,
        device_id: Arc<Mutex<Option<u8>>>,
    }

    impl FakeLink {
        fn connected() -> Self {
            let link = Self::default();
            *link.connected.lock().unwrap() = true;
            link
        }

        fn sent_times(&self) -> Vec<u32> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|f| unpack_record(f.as_bytes()).unwrap().time)
                .collect()
        }
    }

    #[async_trait]
    impl FrameLink for FakeLink {
        fn is_connected(&self) -> bool {
            *self.connected.lock().unwrap()
        }

        async fn notify(&mut self, frame: &WireFrame) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if let Some(limit) = *self.fail_after.lock().unwrap() {
                if sent.len() >= limit {
                    *self.connected.lock().unwrap() = false;
                    return Err(TrackerError::Radio(RadioError::NotConnected));
                }
            }
            sent.push(*frame);
            Ok(())
        }

        fn take_device_id(&mut self) -> Option<u8> {
            self.device_id.lock().unwrap().take()
        }
    }

    fn log() -> RingLog<RamFlash> {
        RingLog::open(RamFlash::new(16 * 4096, 4096, 4)).unwrap()
    }

    /// Sensors whose GNSS time counts 1, 2, 3, ... per capture
    fn counting_sensors() -> MockSensorSource {
        let mut sensors = MockSensorSource::new();
        sensors
            .expect_fetch_all_readings()
            .returning(|| Ok(SimulatedSensors::new(0).fetch_all_readings().unwrap()));
        let mut seq = 0;
        sensors.expect_fetch_position().returning(move || {
            seq += 1;
            let mut fix = PositionFix::unknown();
            fix.time = seq;
            fix.satellites = 5;
            fix.ns = b'N';
            fix.ew = b'W';
            Ok(fix)
        });
        sensors
    }

    fn scheduler<S: SensorSource>(
        sensors: S,
        link: FakeLink,
    ) -> (CaptureScheduler<RamFlash, S, FakeLink>, WakeSource) {
        let (source, wakes) = wake_channel(8);
        (
            CaptureScheduler::new(log(), sensors, link, wakes, CaptureSettings::default()),
            source,
        )
    }

    #[test]
    fn test_timer_and_motion_are_exclusive_per_pass() {
        let mut pending = PendingWakes::default();
        pending.raise(WakeReason::Motion);
        pending.raise(WakeReason::Timer);
        pending.raise(WakeReason::LinkReady);

        assert_eq!(
            pending.next_pass(),
            Pass {
                capture: Some(WakeReason::Timer),
                drain: true
            }
        );
        assert_eq!(
            pending.next_pass(),
            Pass {
                capture: Some(WakeReason::Motion),
                drain: false
            }
        );
        assert!(pending.is_empty());
        assert_eq!(
            pending.next_pass(),
            Pass {
                capture: None,
                drain: false
            }
        );
    }

    #[test]
    fn test_link_only_pass() {
        let mut pending = PendingWakes::default();
        pending.raise(WakeReason::LinkReady);
        assert_eq!(
            pending.next_pass(),
            Pass {
                capture: None,
                drain: true
            }
        );
    }

    #[test]
    fn test_capture_appends_record() {
        let (mut scheduler, _source) = scheduler(counting_sensors(), FakeLink::default());
        scheduler.capture(WakeReason::Timer).unwrap();

        assert_eq!(scheduler.log().metadata().size, 1);
        assert_eq!(scheduler.log().unread(), 1);
    }

    #[test]
    fn test_exhausted_sensors_fall_back_to_defaults() {
        let mut sensors = MockSensorSource::new();
        sensors
            .expect_fetch_all_readings()
            .times(5)
            .returning(|| Err(SensorReadError::Io("bus".to_string())));
        sensors
            .expect_fetch_position()
            .times(5)
            .returning(|| Err(SensorReadError::NoFix));

        let link = FakeLink::connected();
        let (mut scheduler, _source) = scheduler(sensors, link.clone());
        scheduler.capture(WakeReason::Motion).unwrap();
        assert_eq!(scheduler.log().metadata().size, 1);

        let sent = futures_sent(&mut scheduler);
        assert_eq!(sent, 1);
        let frames = link.sent.lock().unwrap();
        let record = unpack_record(frames[0].as_bytes()).unwrap();
        assert_eq!(record.time, 0);
        assert_eq!(record.ns, UNKNOWN_HEMISPHERE);
        assert_eq!(record.temperature, 0);
        assert_eq!(record.accel_z, 0);
    }

    fn futures_sent<S: SensorSource>(scheduler: &mut CaptureScheduler<RamFlash, S, FakeLink>) -> u32 {
        tokio_test::block_on(scheduler.drain_to_link()).unwrap()
    }

    #[tokio::test]
    async fn test_drain_sends_all_unread_in_order() {
        let link = FakeLink::connected();
        let (mut scheduler, _source) = scheduler(counting_sensors(), link.clone());
        for _ in 0..3 {
            scheduler.capture(WakeReason::Timer).unwrap();
        }

        assert_eq!(scheduler.drain_to_link().await.unwrap(), 3);
        assert_eq!(link.sent_times(), vec![1, 2, 3]);
        assert_eq!(scheduler.log().metadata().read_size, 3);
        assert_eq!(scheduler.drain_to_link().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_link_sends_nothing() {
        let link = FakeLink::default();
        let (mut scheduler, _source) = scheduler(counting_sensors(), link.clone());
        scheduler.capture(WakeReason::Timer).unwrap();

        assert_eq!(scheduler.drain_to_link().await.unwrap(), 0);
        assert_eq!(scheduler.log().metadata().read_size, 0);
    }

    #[tokio::test]
    async fn test_failed_notify_keeps_record_for_next_link() {
        let link = FakeLink::connected();
        *link.fail_after.lock().unwrap() = Some(1);
        let (mut scheduler, _source) = scheduler(counting_sensors(), link.clone());
        for _ in 0..3 {
            scheduler.capture(WakeReason::Timer).unwrap();
        }

        assert_eq!(scheduler.drain_to_link().await.unwrap(), 1);
        assert_eq!(scheduler.log().metadata().read_size, 1);

        *link.fail_after.lock().unwrap() = None;
        *link.connected.lock().unwrap() = true;
        assert_eq!(scheduler.drain_to_link().await.unwrap(), 2);
        assert_eq!(link.sent_times(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_device_id_reassignment_applies_to_next_record() {
        let link = FakeLink::connected();
        let (mut scheduler, _source) = scheduler(counting_sensors(), link.clone());

        scheduler.capture(WakeReason::Timer).unwrap();
        *link.device_id.lock().unwrap() = Some(42);
        scheduler.capture(WakeReason::Timer).unwrap();
        scheduler.drain_to_link().await.unwrap();

        let ids: Vec<u8> = link
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| unpack_record(f.as_bytes()).unwrap().device_id)
            .collect();
        assert_eq!(ids, vec![1, 42]);
        assert_eq!(scheduler.device_id(), 42);
    }

    #[tokio::test]
    async fn test_run_services_wakes_until_sources_drop() {
        let link = FakeLink::default();
        let (mut scheduler, source) = scheduler(counting_sensors(), link.clone());

        source.raise(WakeReason::Timer);
        source.raise(WakeReason::Motion);
        drop(source);
        scheduler.run().await.unwrap();

        // Timer and motion in one batch still yield two captures
        assert_eq!(scheduler.log().metadata().size, 2);
        assert!(link.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_link_wake_drains_backlog() {
        let link = FakeLink::connected();
        let (mut scheduler, source) = scheduler(counting_sensors(), link.clone());
        scheduler.capture(WakeReason::Timer).unwrap();
        scheduler.capture(WakeReason::Timer).unwrap();

        source.raise(WakeReason::LinkReady);
        drop(source);
        scheduler.run().await.unwrap();

        assert_eq!(link.sent_times(), vec![1, 2]);
        assert_eq!(scheduler.log().unread(), 0);
    }

    #[tokio::test]
    async fn test_capture_while_connected_is_sent_immediately() {
        let link = FakeLink::connected();
        let (mut scheduler, _source) = scheduler(counting_sensors(), link.clone());

        scheduler
            .run_pass(Pass {
                capture: Some(WakeReason::Timer),
                drain: false,
            })
            .await;

        assert_eq!(link.sent_times(), vec![1]);
    }
}
