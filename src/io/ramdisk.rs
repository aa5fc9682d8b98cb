//! RAM Disk Device
//!
//! An in-memory block device for testing and temporary storage. The
//! backing store is a heap buffer guarded by a spinlock so the device can
//! be shared by reference; data does not survive the instance.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use super::block::{BlockDevice, SECTOR_SIZE};

/// A `Vec`-backed block device.
pub struct RamDisk {
    uuid: u64,
    sector_count: u64,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    /// Create a zero-filled RAM disk of `sector_count` sectors.
    pub fn new(uuid: u64, sector_count: u64) -> Self {
        Self {
            uuid,
            sector_count,
            data: Mutex::new(vec![0u8; sector_count as usize * SECTOR_SIZE]),
        }
    }

    /// Number of sectors in the device.
    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn range(&self, lba: u64, count: u32, len: usize) -> Option<(usize, usize)> {
        let end_sector = lba.saturating_add(count as u64);
        if end_sector > self.sector_count {
            return None;
        }
        let byte_count = count as usize * SECTOR_SIZE;
        if len < byte_count {
            return None;
        }
        Some((lba as usize * SECTOR_SIZE, byte_count))
    }
}

impl BlockDevice for RamDisk {
    fn uuid(&self) -> u64 {
        self.uuid
    }

    fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> bool {
        let (offset, byte_count) = match self.range(lba, count, buf.len()) {
            Some(r) => r,
            None => return false,
        };
        let data = self.data.lock();
        buf[..byte_count].copy_from_slice(&data[offset..offset + byte_count]);
        true
    }

    fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> bool {
        let (offset, byte_count) = match self.range(lba, count, buf.len()) {
            Some(r) => r,
            None => return false,
        };
        let mut data = self.data.lock();
        data[offset..offset + byte_count].copy_from_slice(&buf[..byte_count]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let disk = RamDisk::new(1, 16);

        let write_data = [0xABu8; SECTOR_SIZE];
        assert!(disk.write_sectors(3, 1, &write_data));

        let mut read_data = [0u8; SECTOR_SIZE];
        assert!(disk.read_sectors(3, 1, &mut read_data));
        assert_eq!(write_data, read_data);
    }

    #[test]
    fn test_multi_sector_transfer() {
        let disk = RamDisk::new(1, 16);

        let mut write_data = [0u8; 2 * SECTOR_SIZE];
        write_data[0] = 0x11;
        write_data[SECTOR_SIZE] = 0x22;
        assert!(disk.write_sectors(4, 2, &write_data));

        let mut one = [0u8; SECTOR_SIZE];
        assert!(disk.read_sectors(5, 1, &mut one));
        assert_eq!(one[0], 0x22);
    }

    #[test]
    fn test_out_of_range_refused() {
        let disk = RamDisk::new(1, 8);
        let mut buf = [0u8; SECTOR_SIZE];

        assert!(!disk.read_sectors(8, 1, &mut buf));
        assert!(!disk.write_sectors(7, 2, &buf));
    }

    #[test]
    fn test_short_buffer_refused() {
        let disk = RamDisk::new(1, 8);
        let mut buf = [0u8; SECTOR_SIZE - 1];
        assert!(!disk.read_sectors(0, 1, &mut buf));
    }
}
