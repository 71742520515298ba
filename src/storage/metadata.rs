//! # Ring Log Metadata
//!
//! Cursor state of the ring log, journaled in the metadata pages at the
//! start of the storage region. Every save appends a new entry; the entry
//! with the highest sequence number wins.
//!
//! ## Entry layout (little-endian)
//!
//! ```text
//! [0:4)   magic        "TLOG"
//! [4:6)   version      METADATA_VERSION
//! [6:8)   stride       record size the region was formatted with
//! [8:12)  size
//! [12:16) read_size
//! [16:20) head
//! [20:24) tail
//! [24:28) wrap_around
//! [28:32) sequence
//! [32:34) CRC-16/CCITT-FALSE over [0:32)
//! [34:40) zero padding
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::StorageError;

/// Marks a written journal entry
pub const METADATA_MAGIC: u32 = 0x474F_4C54;

/// Bumped whenever the stored record layout or this block changes
pub const METADATA_VERSION: u16 = 2;

/// Encoded size in bytes
pub const METADATA_LEN: usize = 40;

/// Bytes covered by the checksum
const CHECKED_LEN: usize = 32;

/// CRC-16/CCITT-FALSE polynomial
const CRC16_POLY: u16 = 0x1021;

/// Precomputed CRC16 lookup table
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// CRC-16/CCITT-FALSE (init `0xFFFF`, no reflection)
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        let index = ((crc >> 8) as u8 ^ byte) as usize;
        crc = (crc << 8) ^ CRC16_TABLE[index];
    }

    crc
}

/// Ring log cursors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLogMetadata {
    /// Records currently held, counted from `tail`
    pub size: u32,

    /// Records already delivered to a consumer (`read_size <= size`)
    pub read_size: u32,

    /// Next write address
    pub head: u32,

    /// Address of the oldest readable record
    pub tail: u32,

    /// Times the log has wrapped past the end of its region
    pub wrap_around: u32,
}

impl RingLogMetadata {
    /// Cursors of an empty log whose records start at `region_start`
    pub fn fresh(region_start: u32) -> Self {
        Self {
            size: 0,
            read_size: 0,
            head: region_start,
            tail: region_start,
            wrap_around: 0,
        }
    }

    /// Records appended but not yet delivered
    pub fn unread(&self) -> u32 {
        self.size.saturating_sub(self.read_size)
    }

    /// Encode as journal entry `sequence` with the layout tag of `stride`
    pub fn encode(&self, stride: u16, sequence: u32) -> [u8; METADATA_LEN] {
        let mut buf = BytesMut::with_capacity(METADATA_LEN);
        buf.put_u32_le(METADATA_MAGIC);
        buf.put_u16_le(METADATA_VERSION);
        buf.put_u16_le(stride);
        buf.put_u32_le(self.size);
        buf.put_u32_le(self.read_size);
        buf.put_u32_le(self.head);
        buf.put_u32_le(self.tail);
        buf.put_u32_le(self.wrap_around);
        buf.put_u32_le(sequence);
        let crc = crc16_ccitt(&buf[..CHECKED_LEN]);
        buf.put_u16_le(crc);
        buf.resize(METADATA_LEN, 0);

        let mut out = [0u8; METADATA_LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode a journal entry
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the entry is blank or was never completed, otherwise
    /// the cursors and the entry's sequence number
    ///
    /// # Errors
    ///
    /// Returns `LayoutMismatch` when the entry was written for a different
    /// record stride or metadata version, and `CorruptMetadata` when its
    /// checksum does not match.
    pub fn decode(
        bytes: &[u8; METADATA_LEN],
        stride: u16,
    ) -> Result<Option<(Self, u32)>, StorageError> {
        let mut buf = &bytes[..];
        if buf.get_u32_le() != METADATA_MAGIC {
            return Ok(None);
        }

        let found_version = buf.get_u16_le();
        let found_stride = buf.get_u16_le();
        if found_version != METADATA_VERSION || found_stride != stride {
            return Err(StorageError::LayoutMismatch {
                found_version,
                found_stride,
                expected_version: METADATA_VERSION,
                expected_stride: stride,
            });
        }

        let meta = Self {
            size: buf.get_u32_le(),
            read_size: buf.get_u32_le(),
            head: buf.get_u32_le(),
            tail: buf.get_u32_le(),
            wrap_around: buf.get_u32_le(),
        };
        let sequence = buf.get_u32_le();

        let stored = buf.get_u16_le();
        let computed = crc16_ccitt(&bytes[..CHECKED_LEN]);
        if stored != computed {
            return Err(StorageError::CorruptMetadata(format!(
                "entry {} checksum 0x{:04X}, expected 0x{:04X}",
                sequence, stored, computed
            )));
        }

        Ok(Some((meta, sequence)))
    }
}
