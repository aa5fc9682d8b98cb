//! FAT32 File System Driver
//!
//! A read/write FAT32 driver for kernel-side use. The driver speaks to any
//! sector-addressable block device through the [`BlockDevice`] trait and
//! exposes path-oriented operations on a mounted volume:
//! - Volume mounting with boot-sector and FSInfo validation
//! - Directory listing with Long File Name (LFN) support
//! - File reading along cluster chains
//! - Directory and empty-file creation
//! - Free-space reporting backed by the FSInfo sector
//!
//! # Structure
//! - `io` - block device abstraction and RAM-backed test device
//! - `fat32` - on-disk structures, FAT access, directory engine, volume
//!
//! The crate is `no_std` and allocates only operation-scoped sector
//! buffers plus the two cached metadata sectors per mounted volume.

#![no_std]

extern crate alloc;

pub mod fat32;
pub mod io;

pub use fat32::volume::{Fat32Volume, FileRecord};
pub use io::block::{BlockDevice, PartitionDescriptor, SECTOR_SIZE};
pub use io::ramdisk::RamDisk;

/// Driver failure kinds.
///
/// The path-oriented operations collapse these at the public surface
/// (empty results for reads, `false` for writes); `mount` reports them
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fat32Error {
    /// A sector read or write was refused by the block device.
    Io,
    /// Boot sector or FSInfo sector is missing or fails validation.
    InvalidFormat,
    /// A path segment or file name does not exist in its parent.
    NotFound,
    /// The target name is already present in the parent directory.
    AlreadyExists,
    /// No free cluster is available, or a directory cannot grow.
    NoSpace,
    /// The supplied name is empty or longer than a long file name allows.
    InvalidName,
}
