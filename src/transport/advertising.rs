//! # Advertisement Parsing
//!
//! Walks advertising-data TLV structures (`[len][type][data; len - 1]`) to
//! find a 128-bit service UUID.

use uuid::Uuid;

/// AD type: incomplete list of 128-bit service UUIDs
pub const AD_TYPE_UUID128_SOME: u8 = 0x06;

/// AD type: complete list of 128-bit service UUIDs
pub const AD_TYPE_UUID128_ALL: u8 = 0x07;

/// AD type: flags
pub const AD_TYPE_FLAGS: u8 = 0x01;

/// AD type: complete local name
pub const AD_TYPE_NAME_COMPLETE: u8 = 0x09;

/// LE general discoverable, BR/EDR not supported
const AD_FLAGS_GENERAL: u8 = 0x06;

/// Advertising PDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingKind {
    /// ADV_IND
    ConnectableUndirected,
    /// ADV_DIRECT_IND
    ConnectableDirected,
    /// ADV_SCAN_IND
    Scannable,
    /// ADV_NONCONN_IND
    NonConnectable,
    /// SCAN_RSP
    ScanResponse,
}

impl AdvertisingKind {
    /// Whether a connection may be initiated in response
    pub fn is_connectable(self) -> bool {
        matches!(
            self,
            AdvertisingKind::ConnectableUndirected | AdvertisingKind::ConnectableDirected
        )
    }
}

/// Over-the-air (little-endian) byte order of a UUID
pub fn uuid_to_le_bytes(uuid: &Uuid) -> [u8; 16] {
    let mut bytes = *uuid.as_bytes();
    bytes.reverse();
    bytes
}

/// Whether the advertising data lists `service` among its 128-bit UUIDs
///
/// Parsing stops at a zero-length structure (padding) or one that runs past
/// the end of the buffer.
pub fn advertises_service(data: &[u8], service: &Uuid) -> bool {
    let wanted = uuid_to_le_bytes(service);
    let mut rest = data;

    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || len > tail.len() {
            return false;
        }

        let (structure, next) = tail.split_at(len);
        let ad_type = structure[0];
        let value = &structure[1..];

        if (ad_type == AD_TYPE_UUID128_SOME || ad_type == AD_TYPE_UUID128_ALL)
            && value.chunks_exact(16).any(|uuid| uuid == wanted)
        {
            return true;
        }
        rest = next;
    }

    false
}

/// Build advertising data: flags, complete 128-bit service list, and an
/// optional complete local name
pub fn build_advertising_data(services: &[Uuid], name: Option<&str>) -> Vec<u8> {
    let mut data = vec![2, AD_TYPE_FLAGS, AD_FLAGS_GENERAL];

    if !services.is_empty() {
        data.push((1 + 16 * services.len()) as u8);
        data.push(AD_TYPE_UUID128_ALL);
        for service in services {
            data.extend_from_slice(&uuid_to_le_bytes(service));
        }
    }

    if let Some(name) = name {
        data.push((1 + name.len()) as u8);
        data.push(AD_TYPE_NAME_COMPLETE);
        data.extend_from_slice(name.as_bytes());
    }

    data
}
