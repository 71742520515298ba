//! # Ring Log Store
//!
//! Append-only, wraparound, page-erase-aligned record queue on top of a
//! [`FlashDevice`].
//!
//! The first two pages of the device journal [`RingLogMetadata`]; records
//! occupy `[2 * page_size, capacity)` at a fixed stride of [`RECORD_SIZE`]
//! bytes. Once the log has wrapped, every page boundary the head crosses
//! erases the oldest page and evicts its records.
//!
//! Each metadata save appends a sequence-numbered entry to the active journal
//! page. Only when that page is full is the other one erased and written, so
//! the newest complete entry always survives a power cut.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::flash::{FlashDevice, ERASED};
use super::metadata::{RingLogMetadata, METADATA_LEN};
use crate::error::StorageError;
use crate::record::{codec, TelemetryRecord, RECORD_SIZE};

/// Pages reserved for the metadata journal
pub const METADATA_PAGES: u32 = 2;

/// Where the next metadata entry goes
#[derive(Debug, Clone, Copy)]
struct JournalCursor {
    page: u32,
    next_slot: u32,
    sequence: u32,
}

/// Persistent circular record log
pub struct RingLog<F: FlashDevice> {
    flash: F,
    meta: RingLogMetadata,
    journal: JournalCursor,
    page_size: u32,
    write_block_size: usize,
    entry_len: usize,
    entries_per_page: u32,
    region_start: u32,
    region_end: u32,
    booted: Instant,
}

impl<F: FlashDevice> RingLog<F> {
    /// Open the log stored on `flash`, initialising it if the metadata pages
    /// are blank.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The device geometry cannot hold the log
    /// - The journal was written for another record layout
    /// - No journal entry is intact, or the newest one points outside the
    ///   record region
    /// - The device fails to read or write
    pub fn open(flash: F) -> Result<Self, StorageError> {
        let mut log = Self::with_geometry(flash)?;

        match log.scan_journal()? {
            Some((meta, journal)) => {
                log.check_cursors(&meta)?;
                log.meta = meta;
                log.journal = journal;
                info!(
                    "Opened ring log: size={} read_size={} head=0x{:08X} tail=0x{:08X} wrap_around={}",
                    meta.size, meta.read_size, meta.head, meta.tail, meta.wrap_around
                );
            }
            None => {
                info!("Ring log metadata blank, initialising");
                let meta = log.meta;
                log.persist(&meta)?;
            }
        }

        Ok(log)
    }

    /// Discard whatever the device holds and start an empty log
    ///
    /// # Errors
    ///
    /// Returns error if the geometry is unusable or the metadata write fails
    pub fn format(flash: F) -> Result<Self, StorageError> {
        let mut log = Self::with_geometry(flash)?;
        info!("Formatting ring log");
        for page in (0..METADATA_PAGES).rev() {
            log.flash.erase_page(page * log.page_size)?;
        }
        let meta = log.meta;
        log.persist(&meta)?;
        Ok(log)
    }

    fn with_geometry(flash: F) -> Result<Self, StorageError> {
        let page_size = flash.page_size();
        let write_block_size = flash.write_block_size();
        let capacity = flash.capacity();

        if page_size == 0 || page_size % RECORD_SIZE != 0 {
            return Err(StorageError::Geometry(format!(
                "page size {} is not a multiple of the {}-byte record",
                page_size, RECORD_SIZE
            )));
        }
        if write_block_size == 0
            || page_size % write_block_size != 0
            || RECORD_SIZE % write_block_size != 0
        {
            return Err(StorageError::Geometry(format!(
                "write block {} does not divide the page and record sizes",
                write_block_size
            )));
        }
        let pages = METADATA_PAGES as usize + 2;
        if capacity % page_size != 0 || capacity < pages * page_size {
            return Err(StorageError::Geometry(format!(
                "capacity {} must be a page multiple holding two metadata pages plus two record pages",
                capacity
            )));
        }
        let region_end = u32::try_from(capacity)
            .map_err(|_| StorageError::Geometry(format!("capacity {} exceeds 32-bit addressing", capacity)))?;

        // Rounded up to whole write blocks, never more than one record
        let entry_len = METADATA_LEN.div_ceil(write_block_size) * write_block_size;
        let entries_per_page = (page_size / entry_len) as u32;

        let region_start = METADATA_PAGES * page_size as u32;
        Ok(Self {
            flash,
            meta: RingLogMetadata::fresh(region_start),
            // First save erases and starts page 0
            journal: JournalCursor {
                page: METADATA_PAGES - 1,
                next_slot: entries_per_page,
                sequence: 0,
            },
            page_size: page_size as u32,
            write_block_size,
            entry_len,
            entries_per_page,
            region_start,
            region_end,
            booted: Instant::now(),
        })
    }

    fn entry_address(&self, page: u32, slot: u32) -> u32 {
        page * self.page_size + slot * self.entry_len as u32
    }

    /// Find the newest intact journal entry and where the next one goes
    fn scan_journal(&mut self) -> Result<Option<(RingLogMetadata, JournalCursor)>, StorageError> {
        let stride = RECORD_SIZE as u16;
        let mut newest: Option<(RingLogMetadata, u32, u32, u32)> = None;
        let mut last_used = [None::<u32>; METADATA_PAGES as usize];
        let mut damaged = 0;
        let mut slot_bytes = vec![0u8; self.entry_len];

        for page in 0..METADATA_PAGES {
            for slot in 0..self.entries_per_page {
                let address = self.entry_address(page, slot);
                self.flash.read(address, &mut slot_bytes)?;
                if slot_bytes.iter().all(|&b| b == ERASED) {
                    continue;
                }
                last_used[page as usize] = Some(slot);

                let mut entry = [0u8; METADATA_LEN];
                entry.copy_from_slice(&slot_bytes[..METADATA_LEN]);
                match RingLogMetadata::decode(&entry, stride) {
                    Ok(Some((meta, sequence))) => {
                        if newest.map_or(true, |(_, newest_seq, _, _)| sequence > newest_seq) {
                            newest = Some((meta, sequence, page, slot));
                        }
                    }
                    Ok(None) => debug!("Incomplete metadata entry at 0x{:08X}", address),
                    Err(StorageError::CorruptMetadata(reason)) => {
                        warn!("Skipping metadata entry at 0x{:08X}: {}", address, reason);
                        damaged += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        match newest {
            Some((meta, sequence, page, _)) => {
                let next_slot = last_used[page as usize].map_or(0, |slot| slot + 1);
                debug!(
                    "Metadata entry {} found in page {}, next slot {}",
                    sequence, page, next_slot
                );
                Ok(Some((
                    meta,
                    JournalCursor {
                        page,
                        next_slot,
                        sequence,
                    },
                )))
            }
            None if damaged > 0 => Err(StorageError::CorruptMetadata(format!(
                "none of {} metadata entries is intact",
                damaged
            ))),
            None => Ok(None),
        }
    }

    fn check_cursors(&self, meta: &RingLogMetadata) -> Result<(), StorageError> {
        let stride = RECORD_SIZE as u32;
        let in_region = |address: u32, allow_end: bool| {
            address >= self.region_start
                && (address < self.region_end || (allow_end && address == self.region_end))
                && (address - self.region_start) % stride == 0
        };

        if !in_region(meta.head, true) || !in_region(meta.tail, false) {
            return Err(StorageError::CorruptMetadata(format!(
                "head 0x{:08X} or tail 0x{:08X} outside record region",
                meta.head, meta.tail
            )));
        }
        if meta.read_size > meta.size || meta.size > self.record_capacity() {
            return Err(StorageError::CorruptMetadata(format!(
                "read_size {} / size {} exceed capacity {}",
                meta.read_size,
                meta.size,
                self.record_capacity()
            )));
        }
        Ok(())
    }

    /// Records the region can hold
    pub fn record_capacity(&self) -> u32 {
        (self.region_end - self.region_start) / RECORD_SIZE as u32
    }

    /// Records evicted per page
    pub fn eviction_quantum(&self) -> u32 {
        self.page_size / RECORD_SIZE as u32
    }

    /// Snapshot of the cursors
    pub fn metadata(&self) -> RingLogMetadata {
        self.meta
    }

    /// Records appended but not yet delivered
    pub fn unread(&self) -> u32 {
        self.meta.unread()
    }

    /// Release the underlying device
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Append one record, evicting the oldest page when the log is full.
    ///
    /// The record's `uptime` is overwritten with the seconds elapsed since the
    /// log was opened.
    ///
    /// A record left in flash by an append whose metadata save never landed
    /// is kept and counted before the new one is written.
    ///
    /// # Errors
    ///
    /// Returns error if an erase or write fails. Cursors are only committed
    /// once the record and metadata are written.
    pub fn append(&mut self, record: &TelemetryRecord) -> Result<(), StorageError> {
        let stride = RECORD_SIZE as u32;
        let mut meta = self.meta;
        let address = self.claim_slot(&mut meta)?;

        let mut stamped = *record;
        stamped.uptime = self.uptime_secs();
        let bytes = codec::encode(&stamped);
        for (i, chunk) in bytes.chunks(self.write_block_size).enumerate() {
            self.flash
                .write(address + (i * self.write_block_size) as u32, chunk)?;
        }

        meta.head = address + stride;
        meta.size += 1;
        self.persist(&meta)?;
        self.meta = meta;
        debug!(
            "Appended record at 0x{:08X} (size={}, unread={})",
            address,
            meta.size,
            meta.unread()
        );
        Ok(())
    }

    /// Pick the address for the next record, erasing and evicting as needed
    fn claim_slot(&mut self, meta: &mut RingLogMetadata) -> Result<u32, StorageError> {
        let stride = RECORD_SIZE as u32;
        loop {
            let address = meta.head;

            if address + stride > self.region_end {
                let address = self.region_start;
                self.flash.erase_page(address)?;
                meta.wrap_around += 1;
                self.evict_page(meta);
                meta.tail = self.next_page(address);
                info!(
                    "Ring log wrapped (wrap_around={}), oldest page evicted",
                    meta.wrap_around
                );
                return Ok(address);
            }

            if (address - self.region_start) % self.page_size == 0 {
                self.flash.erase_page(address)?;
                if meta.wrap_around > 0 {
                    self.evict_page(meta);
                    meta.tail = self.next_page(address);
                }
                return Ok(address);
            }

            if self.slot_is_blank(address)? {
                return Ok(address);
            }

            warn!(
                "Keeping record at 0x{:08X} left by an interrupted append",
                address
            );
            meta.head = address + stride;
            meta.size += 1;
        }
    }

    fn slot_is_blank(&mut self, address: u32) -> Result<bool, StorageError> {
        let mut buf = [0u8; RECORD_SIZE];
        self.flash.read(address, &mut buf)?;
        Ok(buf.iter().all(|&b| b == ERASED))
    }

    /// Lazily read every record in `[read_size, size)` in insertion order.
    ///
    /// Dropping or finishing the returned [`Drain`] persists `read_size` for
    /// everything it handed out, minus a record passed back with
    /// [`Drain::requeue_last`].
    pub fn drain(&mut self) -> Drain<'_, F> {
        let cursor = self.meta.read_size;
        let end = self.meta.size;
        Drain {
            log: self,
            cursor,
            end,
            last: None,
            committed: false,
        }
    }

    fn evict_page(&self, meta: &mut RingLogMetadata) {
        let quantum = self.eviction_quantum();
        let lost = quantum.min(meta.size) - quantum.min(meta.read_size);
        if lost > 0 {
            warn!("Evicting {} undelivered records", lost);
        }
        meta.size = meta.size.saturating_sub(quantum);
        meta.read_size = meta.read_size.saturating_sub(quantum);
    }

    fn next_page(&self, address: u32) -> u32 {
        let next = address + self.page_size;
        if next >= self.region_end {
            self.region_start
        } else {
            next
        }
    }

    fn record_address(&self, index: u32) -> u32 {
        let span = u64::from(self.region_end - self.region_start);
        let offset = u64::from(self.meta.tail - self.region_start)
            + u64::from(index) * RECORD_SIZE as u64;
        self.region_start + (offset % span) as u32
    }

    fn uptime_secs(&self) -> u32 {
        u32::try_from(self.booted.elapsed().as_secs()).unwrap_or(u32::MAX)
    }

    /// Append `meta` to the journal, moving to the other page when full.
    ///
    /// An entry's write blocks go out last to first, so the magic only
    /// appears once the rest of the entry is in place.
    fn persist(&mut self, meta: &RingLogMetadata) -> Result<(), StorageError> {
        let mut journal = self.journal;
        if journal.next_slot >= self.entries_per_page {
            let page = (journal.page + 1) % METADATA_PAGES;
            self.flash.erase_page(page * self.page_size)?;
            debug!("Metadata journal moved to page {}", page);
            journal.page = page;
            journal.next_slot = 0;
        }

        journal.sequence = journal.sequence.wrapping_add(1);
        let address = self.entry_address(journal.page, journal.next_slot);
        let mut entry = vec![0u8; self.entry_len];
        entry[..METADATA_LEN].copy_from_slice(&meta.encode(RECORD_SIZE as u16, journal.sequence));

        // The slot is spent even if the write fails part way
        journal.next_slot += 1;
        self.journal = journal;

        for (i, chunk) in entry.chunks(self.write_block_size).enumerate().rev() {
            self.flash
                .write(address + (i * self.write_block_size) as u32, chunk)?;
        }
        Ok(())
    }
}

/// One-shot reader over the undelivered records of a [`RingLog`]
pub struct Drain<'a, F: FlashDevice> {
    log: &'a mut RingLog<F>,
    cursor: u32,
    end: u32,
    last: Option<u32>,
    committed: bool,
}

impl<F: FlashDevice> Drain<'_, F> {
    /// Records left in this drain
    pub fn remaining(&self) -> u32 {
        self.end.saturating_sub(self.cursor)
    }

    /// Give the most recently yielded record back; it stays unread
    pub fn requeue_last(&mut self) {
        if let Some(index) = self.last.take() {
            self.cursor = index;
        }
    }

    /// Persist the delivery cursor
    ///
    /// # Errors
    ///
    /// Returns error if the metadata write fails
    pub fn finish(mut self) -> Result<(), StorageError> {
        self.commit()
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;
        if self.cursor == self.log.meta.read_size {
            return Ok(());
        }
        let mut meta = self.log.meta;
        meta.read_size = self.cursor;
        self.log.persist(&meta)?;
        self.log.meta = meta;
        debug!("Drain committed read_size={}", self.cursor);
        Ok(())
    }
}

impl<F: FlashDevice> Iterator for Drain<'_, F> {
    type Item = Result<TelemetryRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.end {
            let index = self.cursor;
            let address = self.log.record_address(index);
            let mut buf = [0u8; RECORD_SIZE];
            if let Err(e) = self.log.flash.read(address, &mut buf) {
                self.end = self.cursor;
                return Some(Err(e));
            }

            self.cursor += 1;
            match codec::decode(&buf) {
                Ok(record) => {
                    self.last = Some(index);
                    return Some(Ok(record));
                }
                Err(e) => warn!("Skipping record {} at 0x{:08X}: {}", index, address, e),
            }
        }
        None
    }
}

impl<F: FlashDevice> Drop for Drain<'_, F> {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            warn!("Failed to persist drain cursor: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::flash::{MockFlashDevice, RamFlash};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const SMALL_PAGE: usize = 256;

    fn record(seq: u32) -> TelemetryRecord {
        TelemetryRecord {
            time: seq,
            uptime: 0,
            latitude: 37.77,
            longitude: -122.42,
            altitude: 12.3,
            ns: b'N',
            ew: b'W',
            temperature: 2350,
            humidity: 4567,
            pressure: 10132,
            gas: 5230,
            accel_x: -900,
            accel_y: 200,
            accel_z: 985,
            device_id: 1,
        }
    }

    const SMALL_REGION_START: u32 = 2 * SMALL_PAGE as u32;

    /// Two metadata pages plus three pages of four records each
    fn small_log() -> RingLog<RamFlash> {
        RingLog::open(RamFlash::new(5 * SMALL_PAGE, SMALL_PAGE, 4)).unwrap()
    }

    fn drained_times<F: FlashDevice>(log: &mut RingLog<F>) -> Vec<u32> {
        log.drain().map(|r| r.unwrap().time).collect()
    }

    #[test]
    fn test_open_initialises_blank_device() {
        let log = RingLog::open(RamFlash::new(0x80000, 4096, 4)).unwrap();
        let meta = log.metadata();

        assert_eq!(meta, RingLogMetadata::fresh(2 * 4096));
        assert_eq!(log.eviction_quantum(), 64);
        assert_eq!(log.record_capacity(), (0x80000 - 2 * 4096) / 64);
    }

    #[test]
    fn test_append_three_then_drain() {
        let mut log = RingLog::open(RamFlash::new(0x80000, 4096, 4)).unwrap();
        for seq in 0..3 {
            log.append(&record(seq)).unwrap();
        }

        let records: Vec<_> = log.drain().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        for r in &records {
            assert!((r.temperature_c() - 23.50).abs() <= 0.01);
        }

        let meta = log.metadata();
        assert_eq!(meta.read_size, 3);
        assert_eq!(meta.size, 3);
    }

    #[test]
    fn test_drain_preserves_insertion_order_across_pages() {
        let mut log = RingLog::open(RamFlash::new(0x80000, 4096, 4)).unwrap();
        for seq in 0..150 {
            log.append(&record(seq)).unwrap();
        }

        assert_eq!(drained_times(&mut log), (0..150).collect::<Vec<_>>());
        assert_eq!(log.metadata().read_size, 150);
        assert_eq!(log.metadata().wrap_around, 0);
    }

    #[test]
    fn test_second_drain_only_yields_new_records() {
        let mut log = small_log();
        log.append(&record(1)).unwrap();
        assert_eq!(drained_times(&mut log), vec![1]);

        log.append(&record(2)).unwrap();
        log.append(&record(3)).unwrap();
        assert_eq!(drained_times(&mut log), vec![2, 3]);
        assert!(drained_times(&mut log).is_empty());
    }

    #[test]
    fn test_partial_drain_persists_progress() {
        let mut log = small_log();
        for seq in 0..5 {
            log.append(&record(seq)).unwrap();
        }

        {
            let mut drain = log.drain();
            assert_eq!(drain.next().unwrap().unwrap().time, 0);
            assert_eq!(drain.next().unwrap().unwrap().time, 1);
        }

        assert_eq!(log.metadata().read_size, 2);
        assert_eq!(drained_times(&mut log), vec![2, 3, 4]);
    }

    #[test]
    fn test_requeue_last_leaves_record_unread() {
        let mut log = small_log();
        for seq in 0..3 {
            log.append(&record(seq)).unwrap();
        }

        let mut drain = log.drain();
        drain.next().unwrap().unwrap();
        drain.next().unwrap().unwrap();
        drain.requeue_last();
        assert_eq!(drain.remaining(), 2);
        drain.finish().unwrap();

        assert_eq!(log.metadata().read_size, 1);
        assert_eq!(drained_times(&mut log), vec![1, 2]);
    }

    #[test]
    fn test_wraparound_evicts_oldest_page() {
        let mut log = small_log();
        assert_eq!(log.record_capacity(), 12);
        assert_eq!(log.eviction_quantum(), 4);

        for seq in 0..12 {
            log.append(&record(seq)).unwrap();
        }
        assert_eq!(log.metadata().wrap_around, 0);
        assert_eq!(log.metadata().size, 12);

        log.append(&record(12)).unwrap();
        let meta = log.metadata();
        assert_eq!(meta.wrap_around, 1);
        assert_eq!(meta.size, 9);
        assert_eq!(meta.tail, SMALL_REGION_START + SMALL_PAGE as u32);
        assert_eq!(meta.head, SMALL_REGION_START + 64);

        assert_eq!(drained_times(&mut log), (4..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_wrap_counter_increments_once_per_traversal() {
        let mut log = small_log();
        for seq in 0..24 {
            log.append(&record(seq)).unwrap();
        }
        assert_eq!(log.metadata().wrap_around, 1);
        assert_eq!(log.metadata().size, 12);

        log.append(&record(24)).unwrap();
        assert_eq!(log.metadata().wrap_around, 2);
        assert_eq!(drained_times(&mut log), (16..=24).collect::<Vec<_>>());
    }

    #[test]
    fn test_eviction_rebases_read_cursor() {
        let mut log = small_log();
        for seq in 0..12 {
            log.append(&record(seq)).unwrap();
        }
        assert_eq!(drained_times(&mut log).len(), 12);

        log.append(&record(12)).unwrap();
        let meta = log.metadata();
        assert_eq!(meta.read_size, 8);
        assert_eq!(meta.size, 9);
        assert_eq!(drained_times(&mut log), vec![12]);
    }

    #[test]
    fn test_eviction_floors_small_cursors_at_zero() {
        let mut log = small_log();
        for seq in 0..12 {
            log.append(&record(seq)).unwrap();
        }
        {
            let mut drain = log.drain();
            drain.next().unwrap().unwrap();
            drain.next().unwrap().unwrap();
        }
        assert_eq!(log.metadata().read_size, 2);

        log.append(&record(12)).unwrap();
        assert_eq!(log.metadata().read_size, 0);
        assert_eq!(drained_times(&mut log), (4..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_state_survives_reopen() {
        let mut log = small_log();
        for seq in 0..5 {
            log.append(&record(seq)).unwrap();
        }
        {
            let mut drain = log.drain();
            drain.next().unwrap().unwrap();
            drain.next().unwrap().unwrap();
            drain.finish().unwrap();
        }
        let before = log.metadata();

        let mut reopened = RingLog::open(log.into_inner()).unwrap();
        assert_eq!(reopened.metadata(), before);
        assert_eq!(drained_times(&mut reopened), vec![2, 3, 4]);
    }

    #[test]
    fn test_uptime_is_stamped_on_append() {
        let mut log = small_log();
        let mut r = record(1);
        r.uptime = 999_999;
        log.append(&r).unwrap();

        let stored = log.drain().next().unwrap().unwrap();
        assert!(stored.uptime < 60);
    }

    #[test]
    fn test_layout_mismatch_is_reported() {
        let mut flash = RamFlash::new(5 * SMALL_PAGE, SMALL_PAGE, 4);
        let foreign = RingLogMetadata::fresh(SMALL_REGION_START).encode(48, 1);
        flash.write(0, &foreign).unwrap();

        assert!(matches!(
            RingLog::open(flash),
            Err(StorageError::LayoutMismatch { found_stride: 48, .. })
        ));
    }

    #[test]
    fn test_format_discards_previous_log() {
        let mut log = small_log();
        log.append(&record(1)).unwrap();

        let mut log = RingLog::format(log.into_inner()).unwrap();
        assert_eq!(log.metadata(), RingLogMetadata::fresh(SMALL_REGION_START));
        assert!(drained_times(&mut log).is_empty());
    }

    #[test]
    fn test_corrupt_cursors_are_rejected() {
        let mut flash = RamFlash::new(5 * SMALL_PAGE, SMALL_PAGE, 4);
        let mut meta = RingLogMetadata::fresh(SMALL_REGION_START);
        meta.size = 3;
        meta.read_size = 5;
        flash.write(0, &meta.encode(RECORD_SIZE as u16, 1)).unwrap();

        assert!(matches!(
            RingLog::open(flash),
            Err(StorageError::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_rejects_unusable_geometry() {
        let result = RingLog::open(RamFlash::new(3 * SMALL_PAGE, SMALL_PAGE, 4));
        assert!(matches!(result, Err(StorageError::Geometry(_))));

        let result = RingLog::open(RamFlash::new(5 * SMALL_PAGE, SMALL_PAGE, 128));
        assert!(matches!(result, Err(StorageError::Geometry(_))));

        let result = RingLog::open(RamFlash::new(4 * 100, 100, 4));
        assert!(matches!(result, Err(StorageError::Geometry(_))));
    }

    fn mock_device() -> MockFlashDevice {
        let mut mock = MockFlashDevice::new();
        mock.expect_page_size().return_const(SMALL_PAGE);
        mock.expect_write_block_size().return_const(4usize);
        mock.expect_capacity().return_const(5 * SMALL_PAGE);
        mock
    }

    #[test]
    fn test_read_failure_at_open_is_surfaced() {
        let mut mock = mock_device();
        mock.expect_read()
            .returning(|_, _| Err(StorageError::DeviceNotReady("offline".to_string())));

        assert!(matches!(
            RingLog::open(mock),
            Err(StorageError::DeviceNotReady(_))
        ));
    }

    #[test]
    fn test_write_failure_leaves_cursors_untouched() {
        let mut mock = mock_device();
        mock.expect_read().returning(|_, buf| {
            buf.fill(0xFF);
            Ok(())
        });
        mock.expect_erase_page().returning(|_| Ok(()));
        mock.expect_write().returning(|address, _| {
            if address < SMALL_REGION_START {
                Ok(())
            } else {
                Err(StorageError::WriteWithoutErase { address })
            }
        });

        let mut log = RingLog::open(mock).unwrap();
        let before = log.metadata();

        assert!(log.append(&record(1)).is_err());
        assert_eq!(log.metadata(), before);
    }

    /// RamFlash whose metadata writes can fail, and which can lose power
    /// right after a given number of metadata page erases
    struct FaultyFlash {
        inner: RamFlash,
        fail_metadata: Arc<AtomicBool>,
        power_cut_after: Option<usize>,
        metadata_erases: usize,
        powered: bool,
    }

    impl FaultyFlash {
        fn new(fail_metadata: Arc<AtomicBool>, power_cut_after: Option<usize>) -> Self {
            Self {
                inner: RamFlash::new(5 * SMALL_PAGE, SMALL_PAGE, 4),
                fail_metadata,
                power_cut_after,
                metadata_erases: 0,
                powered: true,
            }
        }

        fn power_lost() -> StorageError {
            StorageError::DeviceNotReady("power lost".to_string())
        }
    }

    impl FlashDevice for FaultyFlash {
        fn page_size(&self) -> usize {
            self.inner.page_size()
        }

        fn write_block_size(&self) -> usize {
            self.inner.write_block_size()
        }

        fn capacity(&self) -> usize {
            self.inner.capacity()
        }

        fn erase_page(&mut self, address: u32) -> Result<(), StorageError> {
            if !self.powered {
                return Err(Self::power_lost());
            }
            self.inner.erase_page(address)?;
            if address < SMALL_REGION_START {
                self.metadata_erases += 1;
                if self.power_cut_after == Some(self.metadata_erases) {
                    self.powered = false;
                }
            }
            Ok(())
        }

        fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), StorageError> {
            if !self.powered {
                return Err(Self::power_lost());
            }
            if address < SMALL_REGION_START && self.fail_metadata.load(Ordering::SeqCst) {
                return Err(StorageError::DeviceNotReady("metadata write failed".to_string()));
            }
            self.inner.write(address, bytes)
        }

        fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StorageError> {
            self.inner.read(address, buf)
        }
    }

    #[test]
    fn test_metadata_write_failure_leaves_cursors_untouched() {
        let fail_metadata = Arc::new(AtomicBool::new(false));
        let mut log = RingLog::open(FaultyFlash::new(fail_metadata.clone(), None)).unwrap();
        log.append(&record(0)).unwrap();
        let before = log.metadata();
        assert_eq!(before.size, 1);
        assert_eq!(before.head, SMALL_REGION_START + 64);

        fail_metadata.store(true, Ordering::SeqCst);
        assert!(log.append(&record(1)).is_err());
        assert_eq!(log.metadata(), before);

        // Record 1 reached flash before its metadata failed and is kept
        fail_metadata.store(false, Ordering::SeqCst);
        log.append(&record(2)).unwrap();
        assert_eq!(log.metadata().size, 3);
        assert_eq!(drained_times(&mut log), vec![0, 1, 2]);
    }

    #[test]
    fn test_drain_commit_failure_keeps_read_cursor() {
        let fail_metadata = Arc::new(AtomicBool::new(false));
        let mut log = RingLog::open(FaultyFlash::new(fail_metadata.clone(), None)).unwrap();
        for seq in 0..3 {
            log.append(&record(seq)).unwrap();
        }

        fail_metadata.store(true, Ordering::SeqCst);
        let mut drain = log.drain();
        drain.next().unwrap().unwrap();
        drain.next().unwrap().unwrap();
        assert!(drain.finish().is_err());
        assert_eq!(log.metadata().read_size, 0);

        fail_metadata.store(false, Ordering::SeqCst);
        assert_eq!(drained_times(&mut log), vec![0, 1, 2]);
    }

    #[test]
    fn test_metadata_pages_erase_only_when_full() {
        // 256-byte page of 40-byte entries: six saves per page
        let mut log = RingLog::open(FaultyFlash::new(Arc::new(AtomicBool::new(false)), None)).unwrap();
        for seq in 0..5 {
            log.append(&record(seq)).unwrap();
        }
        let flash = log.into_inner();
        assert_eq!(flash.metadata_erases, 1);

        let mut log = RingLog::open(flash).unwrap();
        log.append(&record(5)).unwrap();
        assert_eq!(log.into_inner().metadata_erases, 2);
    }

    #[test]
    fn test_power_cut_during_journal_rollover_keeps_records() {
        // Cut right after erasing page 1, then right after re-erasing page 0
        for cut_after in [2, 3] {
            let flash = FaultyFlash::new(Arc::new(AtomicBool::new(false)), Some(cut_after));
            let mut log = RingLog::open(flash).unwrap();
            let mut stored = 0;
            while log.append(&record(stored)).is_ok() {
                stored += 1;
            }
            assert!(stored >= 5, "only {} records before the cut", stored);

            let mut rebooted = RingLog::open(log.into_inner().inner).unwrap();
            assert_eq!(rebooted.metadata().size, stored);
            assert_eq!(drained_times(&mut rebooted), (0..stored).collect::<Vec<_>>());

            // The record written during the cut is picked up by the next append
            rebooted.append(&record(100)).unwrap();
            assert_eq!(drained_times(&mut rebooted), vec![stored, 100]);
        }
    }

    #[test]
    fn test_open_uses_newest_intact_entry() {
        let mut flash = RamFlash::new(5 * SMALL_PAGE, SMALL_PAGE, 4);
        let entry = |size: u32| {
            let mut meta = RingLogMetadata::fresh(SMALL_REGION_START);
            meta.size = size;
            meta.head = SMALL_REGION_START + size * RECORD_SIZE as u32;
            meta
        };
        let mut damaged = entry(3).encode(RECORD_SIZE as u16, 6);
        damaged[8] ^= 0xFF;

        flash.write(0, &entry(1).encode(RECORD_SIZE as u16, 4)).unwrap();
        flash.write(SMALL_PAGE as u32, &entry(2).encode(RECORD_SIZE as u16, 5)).unwrap();
        flash.write(SMALL_PAGE as u32 + METADATA_LEN as u32, &damaged).unwrap();

        let log = RingLog::open(flash).unwrap();
        assert_eq!(log.metadata(), entry(2));
    }

    #[test]
    fn test_only_damaged_entries_are_rejected() {
        let mut flash = RamFlash::new(5 * SMALL_PAGE, SMALL_PAGE, 4);
        let mut damaged = RingLogMetadata::fresh(SMALL_REGION_START).encode(RECORD_SIZE as u16, 1);
        damaged[16] ^= 0x01;
        flash.write(0, &damaged).unwrap();

        assert!(matches!(
            RingLog::open(flash),
            Err(StorageError::CorruptMetadata(_))
        ));
    }
}
