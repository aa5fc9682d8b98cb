//! Block I/O layer
//!
//! The driver never talks to hardware directly; it issues 512-byte sector
//! reads and writes against the [`block::BlockDevice`] trait. A RAM-backed
//! implementation lives in [`ramdisk`] for tests and temporary storage.

pub mod block;
pub mod ramdisk;

pub use block::{BlockDevice, PartitionDescriptor, SECTOR_SIZE};
pub use ramdisk::RamDisk;
