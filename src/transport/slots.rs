//! # Connection Slots
//!
//! Fixed-size arena tracking one peer link per slot. A slot is free when it
//! holds no link handle; the first free slot is found by linear scan.

use std::fmt;

/// Stable index of a slot in the table
pub type SlotId = usize;

/// Radio-stack handle of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(pub u16);

/// Peer device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

/// Setup progress of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    Connecting,
    Connected,
    DiscoveringCharacteristic,
    DiscoveringDescriptor,
    Subscribed,
    /// Setup failed; waiting for the forced disconnect to complete
    Disconnecting,
}

/// Per-peer link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionSlot {
    pub link: Option<LinkHandle>,
    pub peer: Option<PeerAddress>,
    pub value_handle: Option<u16>,
    pub ccc_handle: Option<u16>,
    pub state: SlotState,
}

impl ConnectionSlot {
    /// Slot holds no link
    pub fn is_free(&self) -> bool {
        self.link.is_none()
    }
}

/// The collector's slot arena
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: Vec<ConnectionSlot>,
}

impl SlotTable {
    /// Create `capacity` idle slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![ConnectionSlot::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently holding a link
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn has_free(&self) -> bool {
        self.slots.iter().any(ConnectionSlot::is_free)
    }

    /// Whether a link to `peer` is already held
    pub fn holds_peer(&self, peer: &PeerAddress) -> bool {
        self.slots
            .iter()
            .any(|s| !s.is_free() && s.peer.as_ref() == Some(peer))
    }

    /// Claim the first free slot for a link that is being established
    pub fn claim(&mut self, peer: PeerAddress, link: LinkHandle) -> Option<SlotId> {
        let id = self.slots.iter().position(ConnectionSlot::is_free)?;
        self.slots[id] = ConnectionSlot {
            link: Some(link),
            peer: Some(peer),
            value_handle: None,
            ccc_handle: None,
            state: SlotState::Connecting,
        };
        Some(id)
    }

    /// Slot holding `link`
    pub fn find_link(&self, link: LinkHandle) -> Option<SlotId> {
        self.slots.iter().position(|s| s.link == Some(link))
    }

    pub fn get(&self, id: SlotId) -> Option<&ConnectionSlot> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut ConnectionSlot> {
        self.slots.get_mut(id)
    }

    /// Return a slot to `Idle`, clearing every cached handle
    pub fn release(&mut self, id: SlotId) -> Option<ConnectionSlot> {
        self.slots
            .get_mut(id)
            .map(std::mem::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &ConnectionSlot)> {
        self.slots.iter().enumerate()
    }
}
