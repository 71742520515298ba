//! In-process radio connecting simulated trackers to a [`Collector`]
//!
//! Each tracker added to a [`LoopbackAir`] advertises the tracker service and
//! exposes the telemetry characteristic at fixed handles. The collector drives
//! it through [`LoopbackCentral`] and receives its callbacks on the event
//! stream returned by [`LoopbackAir::new`]. The tracker side is a
//! [`LoopbackLink`] handed to the capture scheduler.
//!
//! [`Collector`]: super::collector::Collector

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::advertising::{build_advertising_data, AdvertisingKind};
use super::collector::{RadioCentral, RadioEvent};
use super::link::FrameLink;
use super::slots::{LinkHandle, PeerAddress};
use crate::capture::scheduler::{WakeReason, WakeSource};
use crate::error::{RadioError, Result, TrackerError};
use crate::wire::protocol::{CCC_DESCRIPTOR_UUID16, CCC_NOTIFY, CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::wire::WireFrame;

/// Attribute handle of the telemetry characteristic value
pub const VALUE_HANDLE: u16 = 0x0012;

/// Attribute handle of its CCC descriptor
pub const CCC_HANDLE: u16 = 0x0013;

/// Disconnect reason: remote user terminated connection
const REASON_REMOTE_TERMINATED: u8 = 0x13;

/// Disconnect reason: local host terminated connection
const REASON_LOCAL_TERMINATED: u8 = 0x16;

/// Disconnect reason: supervision timeout
const REASON_TIMEOUT: u8 = 0x08;

const SIMULATED_RSSI: i8 = -60;

#[derive(Debug)]
struct TrackerRadio {
    peer: PeerAddress,
    advertising: Vec<u8>,
    link: Option<LinkHandle>,
    subscribed: bool,
    assigned_id: Option<u8>,
    wake: WakeSource,
}

#[derive(Debug, Default)]
struct AirState {
    trackers: Vec<TrackerRadio>,
    scanning: bool,
    next_link: u16,
}

impl AirState {
    fn by_link(&mut self, link: LinkHandle) -> std::result::Result<&mut TrackerRadio, RadioError> {
        self.trackers
            .iter_mut()
            .find(|t| t.link == Some(link))
            .ok_or(RadioError::NotConnected)
    }

    fn report(tracker: &TrackerRadio) -> RadioEvent {
        RadioEvent::AdvertisementReport {
            peer: tracker.peer,
            kind: AdvertisingKind::ConnectableUndirected,
            rssi: SIMULATED_RSSI,
            data: tracker.advertising.clone(),
        }
    }
}

fn lock(state: &Mutex<AirState>) -> MutexGuard<'_, AirState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared radio medium
#[derive(Debug, Clone)]
pub struct LoopbackAir {
    state: Arc<Mutex<AirState>>,
    events: mpsc::UnboundedSender<RadioEvent>,
}

impl LoopbackAir {
    /// Create the medium and the collector's event stream
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RadioEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(AirState::default())),
                events,
            },
            rx,
        )
    }

    /// Add an advertising tracker; `wake` receives its link wakes
    pub fn add_tracker(&self, peer: PeerAddress, name: &str, wake: WakeSource) -> LoopbackLink {
        let tracker = TrackerRadio {
            peer,
            advertising: build_advertising_data(&[SERVICE_UUID], Some(name)),
            link: None,
            subscribed: false,
            assigned_id: None,
            wake,
        };

        let mut state = lock(&self.state);
        if state.scanning {
            let _ = self.events.send(AirState::report(&tracker));
        }
        state.trackers.push(tracker);
        debug!("Tracker {} advertising as {:?}", peer, name);

        LoopbackLink {
            peer,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }

    /// Radio handle for the collector
    pub fn central(&self) -> LoopbackCentral {
        LoopbackCentral {
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }
}

/// Central-role requests against the loopback medium
#[derive(Debug)]
pub struct LoopbackCentral {
    state: Arc<Mutex<AirState>>,
    events: mpsc::UnboundedSender<RadioEvent>,
}

impl LoopbackCentral {
    fn emit(&self, event: RadioEvent) {
        if self.events.send(event).is_err() {
            debug!("Collector event stream closed");
        }
    }
}

impl RadioCentral for LoopbackCentral {
    fn start_scan(&mut self) -> std::result::Result<(), RadioError> {
        let mut state = lock(&self.state);
        state.scanning = true;
        let reports: Vec<RadioEvent> = state
            .trackers
            .iter()
            .filter(|t| t.link.is_none())
            .map(AirState::report)
            .collect();
        drop(state);

        for report in reports {
            self.emit(report);
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> std::result::Result<(), RadioError> {
        lock(&self.state).scanning = false;
        Ok(())
    }

    fn connect(&mut self, peer: PeerAddress) -> std::result::Result<LinkHandle, RadioError> {
        let mut state = lock(&self.state);
        state.next_link = state.next_link.wrapping_add(1);
        let link = LinkHandle(state.next_link);

        let tracker = state
            .trackers
            .iter_mut()
            .find(|t| t.peer == peer)
            .ok_or_else(|| RadioError::Request(format!("no tracker at {}", peer)))?;
        if tracker.link.is_some() {
            return Err(RadioError::Request(format!("{} already connected", peer)));
        }
        tracker.link = Some(link);
        drop(state);

        self.emit(RadioEvent::Connected { link });
        Ok(link)
    }

    fn exchange_mtu(&mut self, link: LinkHandle) -> std::result::Result<(), RadioError> {
        lock(&self.state).by_link(link).map(|_| ())
    }

    fn discover_characteristic(
        &mut self,
        link: LinkHandle,
        uuid: Uuid,
    ) -> std::result::Result<(), RadioError> {
        lock(&self.state).by_link(link)?;
        let value_handle = (uuid == CHARACTERISTIC_UUID).then_some(VALUE_HANDLE);
        self.emit(RadioEvent::CharacteristicDiscovered { link, value_handle });
        Ok(())
    }

    fn discover_descriptor(
        &mut self,
        link: LinkHandle,
        start_handle: u16,
        uuid16: u16,
    ) -> std::result::Result<(), RadioError> {
        lock(&self.state).by_link(link)?;
        let handle = (uuid16 == CCC_DESCRIPTOR_UUID16 && start_handle <= CCC_HANDLE)
            .then_some(CCC_HANDLE);
        self.emit(RadioEvent::DescriptorDiscovered { link, handle });
        Ok(())
    }

    fn subscribe(
        &mut self,
        link: LinkHandle,
        value_handle: u16,
        ccc_handle: u16,
        value: u16,
    ) -> std::result::Result<(), RadioError> {
        if value_handle != VALUE_HANDLE || ccc_handle != CCC_HANDLE {
            return Err(RadioError::Request(format!(
                "no CCC at 0x{:04X} for 0x{:04X}",
                ccc_handle, value_handle
            )));
        }

        let mut state = lock(&self.state);
        let tracker = state.by_link(link)?;
        tracker.subscribed = value & CCC_NOTIFY != 0;
        if tracker.subscribed {
            tracker.wake.raise(WakeReason::LinkReady);
        }
        Ok(())
    }

    fn write(
        &mut self,
        link: LinkHandle,
        handle: u16,
        data: &[u8],
    ) -> std::result::Result<(), RadioError> {
        let mut state = lock(&self.state);
        let tracker = state.by_link(link)?;
        match (handle, data) {
            (VALUE_HANDLE, [device_id]) => {
                tracker.assigned_id = Some(*device_id);
                Ok(())
            }
            _ => Err(RadioError::Request(format!(
                "write of {} bytes to 0x{:04X} rejected",
                data.len(),
                handle
            ))),
        }
    }

    fn disconnect(&mut self, link: LinkHandle) -> std::result::Result<(), RadioError> {
        let mut state = lock(&self.state);
        let tracker = state.by_link(link)?;
        tracker.link = None;
        tracker.subscribed = false;
        drop(state);

        self.emit(RadioEvent::Disconnected {
            link,
            reason: REASON_LOCAL_TERMINATED,
        });
        Ok(())
    }
}

/// Peripheral-role view of one tracker
#[derive(Debug, Clone)]
pub struct LoopbackLink {
    peer: PeerAddress,
    state: Arc<Mutex<AirState>>,
    events: mpsc::UnboundedSender<RadioEvent>,
}

impl LoopbackLink {
    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    /// Drop the link from the tracker's side and advertise again
    ///
    /// `timeout` selects a supervision timeout over a clean termination.
    pub fn drop_link(&self, timeout: bool) {
        let mut state = lock(&self.state);
        let scanning = state.scanning;
        let Some(tracker) = state.trackers.iter_mut().find(|t| t.peer == self.peer) else {
            return;
        };
        let Some(link) = tracker.link.take() else {
            return;
        };
        tracker.subscribed = false;
        let report = scanning.then(|| AirState::report(tracker));
        drop(state);

        let reason = if timeout {
            REASON_TIMEOUT
        } else {
            REASON_REMOTE_TERMINATED
        };
        let _ = self.events.send(RadioEvent::Disconnected { link, reason });
        if let Some(report) = report {
            let _ = self.events.send(report);
        }
    }

    fn with_tracker<T>(&self, f: impl FnOnce(&mut TrackerRadio) -> T) -> Option<T> {
        let mut state = lock(&self.state);
        state.trackers.iter_mut().find(|t| t.peer == self.peer).map(f)
    }
}

#[async_trait]
impl FrameLink for LoopbackLink {
    fn is_connected(&self) -> bool {
        self.with_tracker(|t| t.subscribed).unwrap_or(false)
    }

    async fn notify(&mut self, frame: &WireFrame) -> Result<()> {
        let link = self
            .with_tracker(|t| if t.subscribed { t.link } else { None })
            .flatten()
            .ok_or(TrackerError::Radio(RadioError::NotConnected))?;

        self.events
            .send(RadioEvent::Notification {
                link,
                data: frame.as_bytes().to_vec(),
            })
            .map_err(|_| TrackerError::Radio(RadioError::NotConnected))
    }

    fn take_device_id(&mut self) -> Option<u8> {
        self.with_tracker(|t| t.assigned_id.take()).flatten()
    }
}
