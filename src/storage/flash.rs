//! Trait abstraction for page-erasable flash to enable testing
//!
//! The ring log only ever talks to a [`FlashDevice`]. Two implementations are
//! provided: [`RamFlash`] keeps the image in memory, [`FileFlash`] persists it
//! to a file so the host harness survives restarts the way the tracker's
//! storage partition survives power cycles.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::StorageError;

/// Value of erased flash
pub const ERASED: u8 = 0xFF;

/// Page-erasable, block-writable storage
#[cfg_attr(test, mockall::automock)]
pub trait FlashDevice: Send {
    /// Erase granularity in bytes
    fn page_size(&self) -> usize;

    /// Write granularity in bytes
    fn write_block_size(&self) -> usize;

    /// Total addressable bytes
    fn capacity(&self) -> usize;

    /// Erase the page starting at `address` back to `0xFF`
    fn erase_page(&mut self, address: u32) -> Result<(), StorageError>;

    /// Program `bytes` at `address`; the target must be erased
    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), StorageError>;

    /// Read `buf.len()` bytes starting at `address`
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StorageError>;
}

fn check_bounds(capacity: usize, address: u32, len: usize) -> Result<(), StorageError> {
    let end = address as usize + len;
    if end > capacity {
        return Err(StorageError::OutOfBounds { address, len });
    }
    Ok(())
}

fn check_aligned(address: u32, len: usize, granularity: usize) -> Result<(), StorageError> {
    if granularity == 0 || address as usize % granularity != 0 || len % granularity != 0 {
        return Err(StorageError::Misaligned {
            address,
            len,
            granularity,
        });
    }
    Ok(())
}

fn check_erased(address: u32, current: &[u8]) -> Result<(), StorageError> {
    match current.iter().position(|&b| b != ERASED) {
        Some(offset) => Err(StorageError::WriteWithoutErase {
            address: address + offset as u32,
        }),
        None => Ok(()),
    }
}

/// In-memory flash image
#[derive(Debug, Clone)]
pub struct RamFlash {
    data: Vec<u8>,
    page_size: usize,
    write_block_size: usize,
}

impl RamFlash {
    /// Create a fully erased image
    pub fn new(capacity: usize, page_size: usize, write_block_size: usize) -> Self {
        Self {
            data: vec![ERASED; capacity],
            page_size,
            write_block_size,
        }
    }

    /// Raw view of the image
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl FlashDevice for RamFlash {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn write_block_size(&self) -> usize {
        self.write_block_size
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn erase_page(&mut self, address: u32) -> Result<(), StorageError> {
        check_aligned(address, self.page_size, self.page_size)?;
        check_bounds(self.data.len(), address, self.page_size)?;
        let start = address as usize;
        self.data[start..start + self.page_size].fill(ERASED);
        Ok(())
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), StorageError> {
        check_aligned(address, bytes.len(), self.write_block_size)?;
        check_bounds(self.data.len(), address, bytes.len())?;
        let start = address as usize;
        let target = &mut self.data[start..start + bytes.len()];
        check_erased(address, target)?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(self.data.len(), address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}

/// File-backed flash image
#[derive(Debug)]
pub struct FileFlash {
    file: File,
    capacity: usize,
    page_size: usize,
    write_block_size: usize,
}

impl FileFlash {
    /// Open an image file, creating an erased one if it does not exist
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The file cannot be opened or created
    /// - An existing image has a different size than `capacity`
    pub fn open<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        page_size: usize,
        write_block_size: usize,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                StorageError::DeviceNotReady(format!("{}: {}", path.display(), e))
            })?;

        let len = file.metadata()?.len() as usize;
        if len == 0 {
            info!("Creating erased flash image at {} ({} bytes)", path.display(), capacity);
            file.write_all(&vec![ERASED; capacity])?;
            file.flush()?;
        } else if len != capacity {
            return Err(StorageError::DeviceNotReady(format!(
                "{}: image is {} bytes, expected {}",
                path.display(),
                len,
                capacity
            )));
        } else {
            debug!("Opened flash image at {}", path.display());
        }

        Ok(Self {
            file,
            capacity,
            page_size,
            write_block_size,
        })
    }

    fn read_at(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(u64::from(address)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, address: u32, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(u64::from(address)))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }
}

impl FlashDevice for FileFlash {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn write_block_size(&self) -> usize {
        self.write_block_size
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn erase_page(&mut self, address: u32) -> Result<(), StorageError> {
        check_aligned(address, self.page_size, self.page_size)?;
        check_bounds(self.capacity, address, self.page_size)?;
        let blank = vec![ERASED; self.page_size];
        self.write_at(address, &blank)
    }

    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), StorageError> {
        check_aligned(address, bytes.len(), self.write_block_size)?;
        check_bounds(self.capacity, address, bytes.len())?;
        let mut current = vec![0u8; bytes.len()];
        self.read_at(address, &mut current)?;
        check_erased(address, &current)?;
        self.write_at(address, bytes)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(self.capacity, address, buf.len())?;
        self.read_at(address, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: usize = 4096;

    #[test]
    fn test_ram_flash_starts_erased() {
        let flash = RamFlash::new(2 * PAGE, PAGE, 4);
        assert!(flash.as_bytes().iter().all(|&b| b == ERASED));
        assert_eq!(flash.capacity(), 2 * PAGE);
    }

    #[test]
    fn test_ram_flash_write_read() {
        let mut flash = RamFlash::new(2 * PAGE, PAGE, 4);
        flash.write(8, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        flash.read(8, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_ram_flash_rejects_write_without_erase() {
        let mut flash = RamFlash::new(2 * PAGE, PAGE, 4);
        flash.write(0, &[0, 0, 0, 0]).unwrap();

        match flash.write(0, &[1, 1, 1, 1]) {
            Err(StorageError::WriteWithoutErase { address }) => assert_eq!(address, 0),
            other => panic!("Expected WriteWithoutErase, got: {:?}", other),
        }

        flash.erase_page(0).unwrap();
        assert!(flash.write(0, &[1, 1, 1, 1]).is_ok());
    }

    #[test]
    fn test_ram_flash_rejects_misaligned_write() {
        let mut flash = RamFlash::new(2 * PAGE, PAGE, 4);
        assert!(matches!(
            flash.write(2, &[0; 4]),
            Err(StorageError::Misaligned { .. })
        ));
        assert!(matches!(
            flash.write(0, &[0; 3]),
            Err(StorageError::Misaligned { .. })
        ));
        assert!(matches!(
            flash.erase_page(100),
            Err(StorageError::Misaligned { .. })
        ));
    }

    #[test]
    fn test_ram_flash_rejects_out_of_bounds() {
        let mut flash = RamFlash::new(PAGE, PAGE, 4);
        assert!(matches!(
            flash.write(PAGE as u32, &[0; 4]),
            Err(StorageError::OutOfBounds { .. })
        ));

        let mut buf = [0u8; 8];
        assert!(matches!(
            flash.read(PAGE as u32 - 4, &mut buf),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_file_flash_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        {
            let mut flash = FileFlash::open(&path, 2 * PAGE, PAGE, 4).unwrap();
            flash.write(PAGE as u32, &[9, 8, 7, 6]).unwrap();
        }

        let mut flash = FileFlash::open(&path, 2 * PAGE, PAGE, 4).unwrap();
        let mut buf = [0u8; 4];
        flash.read(PAGE as u32, &mut buf).unwrap();
        assert_eq!(buf, [9, 8, 7, 6]);

        assert!(matches!(
            flash.write(PAGE as u32, &[0; 4]),
            Err(StorageError::WriteWithoutErase { .. })
        ));
    }

    #[test]
    fn test_file_flash_rejects_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        FileFlash::open(&path, 2 * PAGE, PAGE, 4).unwrap();
        let result = FileFlash::open(&path, 4 * PAGE, PAGE, 4);
        assert!(matches!(result, Err(StorageError::DeviceNotReady(_))));
    }
}
