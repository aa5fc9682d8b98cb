//! FAT32 filesystem
//!
//! On-disk format marshaling and the operations built on it:
//! - `bpb` - boot sector, BIOS Parameter Block and FSInfo sector
//! - `dir` - directory entry structures, LFN codec, 8.3 alias handling
//! - `fat` - File Allocation Table access and cluster chains
//! - `volume` - mount handle, directory engine, high-level operations

pub mod bpb;
pub mod dir;
pub mod fat;
pub mod volume;

pub use bpb::{fat_entry, BiosParameterBlock, Fat32BootSector, Fat32ExtendedBpb, FsInfoSector};
pub use dir::{lfn_checksum, DirEntry, FileAttributes, LfnEntry, DIR_ENTRY_SIZE, MAX_LFN_LENGTH};
pub use fat::FatTable;
pub use volume::{Fat32Volume, FileRecord};
