//! # Collector
//!
//! Gateway-side connection manager. Scans for trackers advertising the
//! service UUID, holds up to `max_connections` links in a [`SlotTable`], walks
//! each new link through MTU exchange, characteristic discovery, descriptor
//! discovery and subscription, and hands notifications to the bounded queue.
//!
//! Radio callbacks arrive as [`RadioEvent`]s and are handled one at a time by
//! a single task, so slot mutation needs no further locking.
//!
//! Any failed setup step force-disconnects the link; the slot returns to
//! `Idle` once the disconnect completes.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::advertising::{advertises_service, AdvertisingKind};
use super::handoff::{FrameConsumer, FrameProducer};
use super::link::RecordSink;
use super::slots::{LinkHandle, PeerAddress, SlotId, SlotState, SlotTable};
use crate::error::{RadioError, Result, TrackerError};
use crate::wire::protocol::{CCC_DESCRIPTOR_UUID16, CCC_NOTIFY, CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::wire::unpack;

/// Requests the collector issues to the radio stack
///
/// Discovery results arrive later as [`RadioEvent`]s.
#[cfg_attr(test, mockall::automock)]
pub trait RadioCentral: Send {
    fn start_scan(&mut self) -> std::result::Result<(), RadioError>;

    fn stop_scan(&mut self) -> std::result::Result<(), RadioError>;

    /// Begin connecting; completion is reported by `Connected`/`ConnectFailed`
    fn connect(&mut self, peer: PeerAddress) -> std::result::Result<LinkHandle, RadioError>;

    fn exchange_mtu(&mut self, link: LinkHandle) -> std::result::Result<(), RadioError>;

    /// Search the full handle range for a characteristic
    fn discover_characteristic(
        &mut self,
        link: LinkHandle,
        uuid: Uuid,
    ) -> std::result::Result<(), RadioError>;

    /// Search for a descriptor starting at `start_handle`
    fn discover_descriptor(
        &mut self,
        link: LinkHandle,
        start_handle: u16,
        uuid16: u16,
    ) -> std::result::Result<(), RadioError>;

    /// Write the CCC descriptor to enable notifications
    fn subscribe(
        &mut self,
        link: LinkHandle,
        value_handle: u16,
        ccc_handle: u16,
        value: u16,
    ) -> std::result::Result<(), RadioError>;

    fn write(
        &mut self,
        link: LinkHandle,
        handle: u16,
        data: &[u8],
    ) -> std::result::Result<(), RadioError>;

    fn disconnect(&mut self, link: LinkHandle) -> std::result::Result<(), RadioError>;
}

/// Radio callbacks delivered to the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    AdvertisementReport {
        peer: PeerAddress,
        kind: AdvertisingKind,
        rssi: i8,
        data: Vec<u8>,
    },
    Connected {
        link: LinkHandle,
    },
    ConnectFailed {
        link: LinkHandle,
        reason: u8,
    },
    CharacteristicDiscovered {
        link: LinkHandle,
        value_handle: Option<u16>,
    },
    DescriptorDiscovered {
        link: LinkHandle,
        handle: Option<u16>,
    },
    Disconnected {
        link: LinkHandle,
        reason: u8,
    },
    Notification {
        link: LinkHandle,
        data: Vec<u8>,
    },
}

/// Gateway connection manager
pub struct Collector<R: RadioCentral> {
    radio: R,
    slots: SlotTable,
    producer: FrameProducer,
    pending_writes: HashMap<PeerAddress, Vec<u8>>,
    scanning: bool,
}

impl<R: RadioCentral> Collector<R> {
    /// Create a collector holding at most `max_connections` links
    pub fn new(radio: R, max_connections: usize, producer: FrameProducer) -> Self {
        Self {
            radio,
            slots: SlotTable::new(max_connections),
            producer,
            pending_writes: HashMap::new(),
            scanning: false,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Queue a device-ID reassignment, written once `peer` subscribes
    pub fn queue_device_id(&mut self, peer: PeerAddress, device_id: u8) {
        self.pending_writes.insert(peer, vec![device_id]);
    }

    /// Start scanning
    ///
    /// # Errors
    ///
    /// Returns error if the radio refuses to scan
    pub fn start(&mut self) -> Result<()> {
        self.radio.start_scan()?;
        self.scanning = true;
        info!("Scanning for trackers (up to {} links)", self.slots.capacity());
        Ok(())
    }

    /// Handle radio events until the event stream closes
    ///
    /// # Errors
    ///
    /// Returns error if scanning cannot be started
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<RadioEvent>) -> Result<()> {
        self.start()?;
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Radio event stream closed");
        Ok(())
    }

    /// Handle one radio callback
    pub fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::AdvertisementReport {
                peer, kind, data, ..
            } => self.on_advertisement(peer, kind, &data),
            RadioEvent::Connected { link } => self.on_connected(link),
            RadioEvent::ConnectFailed { link, reason } => self.on_connect_failed(link, reason),
            RadioEvent::CharacteristicDiscovered { link, value_handle } => {
                self.on_characteristic(link, value_handle)
            }
            RadioEvent::DescriptorDiscovered { link, handle } => self.on_descriptor(link, handle),
            RadioEvent::Disconnected { link, reason } => self.on_disconnected(link, reason),
            RadioEvent::Notification { link, data } => self.on_notification(link, &data),
        }
    }

    fn on_advertisement(&mut self, peer: PeerAddress, kind: AdvertisingKind, data: &[u8]) {
        if !self.scanning || !kind.is_connectable() || !advertises_service(data, &SERVICE_UUID) {
            return;
        }
        if self.slots.holds_peer(&peer) {
            debug!("Already linked to {}", peer);
            return;
        }
        if !self.slots.has_free() {
            debug!("No free slot for {}", peer);
            return;
        }

        if let Err(e) = self.radio.stop_scan() {
            warn!("Failed to stop scanning: {}", e);
            return;
        }
        self.scanning = false;

        match self.radio.connect(peer) {
            Ok(link) => self.track_link(peer, link),
            Err(e) => {
                warn!("Failed to create connection to {}: {}", peer, e);
                self.resume_scan();
            }
        }
    }

    /// Put a new link in a free slot, or drop it when none is left
    fn track_link(&mut self, peer: PeerAddress, link: LinkHandle) {
        match self.slots.claim(peer, link) {
            Some(id) => info!("Connecting to {} in slot {}", peer, id),
            None => {
                warn!("No slot left for {} on {:?}; disconnecting", peer, link);
                if let Err(e) = self.radio.disconnect(link) {
                    warn!("Disconnect of untracked link {:?} failed: {}", link, e);
                }
                self.resume_scan();
            }
        }
    }

    fn on_connected(&mut self, link: LinkHandle) {
        let Some(id) = self.slots.find_link(link) else {
            warn!("Connected event for unknown link {:?}", link);
            return;
        };
        self.set_state(id, SlotState::Connected);
        info!("Slot {} connected", id);

        if let Err(e) = self.radio.exchange_mtu(link) {
            warn!("MTU exchange failed on slot {}: {}", id, e);
        }

        self.set_state(id, SlotState::DiscoveringCharacteristic);
        if let Err(e) = self.radio.discover_characteristic(link, CHARACTERISTIC_UUID) {
            self.abort_setup(id, link, e);
        }
    }

    fn on_connect_failed(&mut self, link: LinkHandle, reason: u8) {
        if let Some(id) = self.slots.find_link(link) {
            warn!("Connection in slot {} failed (reason 0x{:02X})", id, reason);
            self.slots.release(id);
        }
        self.resume_scan();
    }

    fn on_characteristic(&mut self, link: LinkHandle, value_handle: Option<u16>) {
        let Some(id) = self.expect_state(link, SlotState::DiscoveringCharacteristic) else {
            return;
        };
        let Some(value_handle) = value_handle else {
            self.abort_setup(id, link, RadioError::Discovery("characteristic not found".into()));
            return;
        };

        if let Some(slot) = self.slots.get_mut(id) {
            slot.value_handle = Some(value_handle);
            slot.state = SlotState::DiscoveringDescriptor;
        }
        debug!("Slot {} characteristic value handle 0x{:04X}", id, value_handle);

        if let Err(e) = self
            .radio
            .discover_descriptor(link, value_handle, CCC_DESCRIPTOR_UUID16)
        {
            self.abort_setup(id, link, e);
        }
    }

    fn on_descriptor(&mut self, link: LinkHandle, handle: Option<u16>) {
        let Some(id) = self.expect_state(link, SlotState::DiscoveringDescriptor) else {
            return;
        };
        let (Some(ccc_handle), Some(slot)) = (handle, self.slots.get(id).copied()) else {
            self.abort_setup(id, link, RadioError::Discovery("CCC descriptor not found".into()));
            return;
        };
        let Some(value_handle) = slot.value_handle else {
            self.abort_setup(id, link, RadioError::Discovery("value handle lost".into()));
            return;
        };

        if let Err(e) = self
            .radio
            .subscribe(link, value_handle, ccc_handle, CCC_NOTIFY)
        {
            self.abort_setup(id, link, e);
            return;
        }
        if let Some(slot) = self.slots.get_mut(id) {
            slot.ccc_handle = Some(ccc_handle);
            slot.state = SlotState::Subscribed;
        }
        info!("Slot {} subscribed", id);

        if let Some(peer) = slot.peer {
            if let Some(data) = self.pending_writes.remove(&peer) {
                match self.radio.write(link, value_handle, &data) {
                    Ok(()) => info!("Wrote device ID {:?} to {}", data, peer),
                    Err(e) => {
                        warn!("Device ID write to {} failed: {}", peer, e);
                        self.pending_writes.insert(peer, data);
                    }
                }
            }
        }

        self.resume_scan();
    }

    fn on_disconnected(&mut self, link: LinkHandle, reason: u8) {
        if let Some(id) = self.slots.find_link(link) {
            self.slots.release(id);
            info!("Slot {} disconnected (reason 0x{:02X})", id, reason);
        }
        self.resume_scan();
    }

    fn on_notification(&mut self, link: LinkHandle, data: &[u8]) {
        let Some(id) = self.slots.find_link(link) else {
            debug!("Notification on unknown link {:?}", link);
            return;
        };
        match self.producer.offer(id, data) {
            Ok(()) => {}
            Err(TrackerError::QueueFull) => {}
            Err(e) => warn!("Dropped notification on slot {}: {}", id, e),
        }
    }

    fn expect_state(&self, link: LinkHandle, expected: SlotState) -> Option<SlotId> {
        let id = self.slots.find_link(link)?;
        let state = self.slots.get(id)?.state;
        if state != expected {
            debug!("Ignoring discovery result for slot {} in state {:?}", id, state);
            return None;
        }
        Some(id)
    }

    fn set_state(&mut self, id: SlotId, state: SlotState) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.state = state;
        }
    }

    fn abort_setup(&mut self, id: SlotId, link: LinkHandle, error: RadioError) {
        warn!("Setup of slot {} failed: {}; disconnecting", id, error);
        self.set_state(id, SlotState::Disconnecting);
        if let Err(e) = self.radio.disconnect(link) {
            warn!("Disconnect of slot {} failed: {}; releasing", id, e);
            self.slots.release(id);
        }
        self.resume_scan();
    }

    fn resume_scan(&mut self) {
        if self.scanning || !self.slots.has_free() {
            return;
        }
        // Only one link is set up at a time
        let connecting = self.slots.iter().any(|(_, s)| {
            matches!(
                s.state,
                SlotState::Connecting
                    | SlotState::Connected
                    | SlotState::DiscoveringCharacteristic
                    | SlotState::DiscoveringDescriptor
            )
        });
        if connecting {
            return;
        }

        match self.radio.start_scan() {
            Ok(()) => {
                self.scanning = true;
                debug!("Scanning resumed");
            }
            Err(e) => warn!("Failed to resume scanning: {}", e),
        }
    }
}

/// Decode queued frames and hand them to `sink` until the queue closes
///
/// Malformed frames are logged and dropped; sink failures are logged.
///
/// # Errors
///
/// Currently never fails; the signature leaves room for fatal sink errors.
pub async fn run_processor<S: RecordSink>(mut consumer: FrameConsumer, mut sink: S) -> Result<()> {
    while let Some(frame) = consumer.recv().await {
        match unpack(&frame.bytes) {
            Ok(payload) => {
                debug!(
                    "Frame from slot {} (device {}, digest {})",
                    frame.slot,
                    payload.device_id,
                    payload.digest_hex()
                );
                if let Err(e) = sink.deliver(frame.slot, &payload).await {
                    warn!("Failed to deliver record from slot {}: {}", frame.slot, e);
                }
            }
            Err(e) => warn!("Dropping malformed frame from slot {}: {}", frame.slot, e),
        }
    }

    let stats = consumer.stats();
    info!(
        "Frame queue closed: {} accepted, {} dropped, {} rejected",
        stats.accepted, stats.dropped, stats.rejected
    );
    Ok(())
}
