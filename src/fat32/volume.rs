//! FAT32 Volume Operations
//!
//! [`Fat32Volume`] is the mount handle: it caches the boot sector and the
//! FSInfo sector for one `(device, partition)` pair and exposes the
//! path-oriented operations on top of the FAT and directory layers.
//!
//! Paths are slices of name segments; the empty slice is the root
//! directory. Read operations collapse failures to empty results, write
//! operations to `false`; partial disk changes of a failed write are not
//! rolled back.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, warn};
use spin::Mutex;

use super::bpb::{fat_entry, Fat32BootSector, FsInfoSector};
use super::dir::{
    entry_marker, entry_run_length, lfn_checksum, lfn_entries, make_short_alias, DirEntry,
    FileAttributes, LfnEntry, DIR_ENTRY_SIZE, LFN_CHARS_PER_ENTRY, MAX_LFN_LENGTH,
};
use super::fat::FatTable;
use crate::io::block::{BlockDevice, PartitionDescriptor, SECTOR_SIZE};
use crate::Fat32Error;

/// A file or directory as reported by directory listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Decoded name: the long name when the entry carries one, otherwise
    /// the short name truncated at its first space.
    pub name: String,
    pub hidden: bool,
    pub system: bool,
    pub directory: bool,
    /// File size in bytes; directories report one cluster.
    pub size: u64,
    /// First cluster of the entry's chain.
    pub location: u32,
}

/// Result of one directory traversal: the decoded records plus the raw
/// 11-byte short names, which alias generation checks against.
struct DirScan {
    records: Vec<FileRecord>,
    aliases: Vec<[u8; 11]>,
}

/// A mounted FAT32 volume.
///
/// The handle owns the two cached metadata sectors. Mutating operations
/// serialize on the FSInfo lock for their whole duration, so a shared
/// handle stays consistent without an external lock.
pub struct Fat32Volume<D: BlockDevice> {
    device: D,
    partition: PartitionDescriptor,
    boot_sector: Fat32BootSector,
    /// Absolute LBA of the first FAT sector
    fat_begin: u64,
    /// Absolute LBA of the first data sector
    cluster_begin: u64,
    /// Absolute LBA of the FSInfo sector
    fs_info_lba: u64,
    root_cluster: u32,
    sectors_per_cluster: u32,
    bytes_per_cluster: usize,
    total_clusters: u32,
    state: Mutex<FsInfoSector>,
}

impl<D: BlockDevice> Fat32Volume<D> {
    /// Mount a FAT32 volume.
    ///
    /// Reads and validates the boot sector at the partition start and the
    /// FSInfo sector it points at. An unknown free-cluster counter is
    /// resolved with one FAT scan so free-space accounting stays exact.
    pub fn mount(device: D, partition: PartitionDescriptor) -> Result<Self, Fat32Error> {
        let mut sector = [0u8; SECTOR_SIZE];
        if !device.read_sectors(partition.start, 1, &mut sector) {
            return Err(Fat32Error::Io);
        }

        let boot_sector = Fat32BootSector::read_from(&sector);
        if !boot_sector.is_valid() {
            warn!(
                "invalid FAT32 boot sector on disk {:#x} partition {:#x}",
                device.uuid(),
                partition.uuid
            );
            return Err(Fat32Error::InvalidFormat);
        }

        let fs_info_lba = partition.start + boot_sector.ext_bpb.fs_information_sector() as u64;
        if !device.read_sectors(fs_info_lba, 1, &mut sector) {
            return Err(Fat32Error::Io);
        }

        let fs_info = FsInfoSector::read_from(&sector);
        if !fs_info.is_valid() {
            warn!(
                "invalid FSInfo sector on disk {:#x} partition {:#x}",
                device.uuid(),
                partition.uuid
            );
            return Err(Fat32Error::InvalidFormat);
        }

        let volume = Self {
            fat_begin: partition.start + boot_sector.fat_begin(),
            cluster_begin: partition.start + boot_sector.cluster_begin(),
            fs_info_lba,
            root_cluster: boot_sector.ext_bpb.root_directory_cluster_start(),
            sectors_per_cluster: boot_sector.bpb.sectors_per_cluster as u32,
            bytes_per_cluster: boot_sector.bytes_per_cluster() as usize,
            total_clusters: boot_sector.total_clusters(),
            state: Mutex::new(fs_info),
            device,
            partition,
            boot_sector,
        };

        if volume.state.lock().free_clusters() == FsInfoSector::UNKNOWN {
            let free = volume.fat().count_free_clusters()?;
            volume.state.lock().set_free_clusters(free);
        }

        debug!(
            "mounted FAT32 volume on disk {:#x} partition {:#x} ({} clusters, label '{}')",
            volume.device.uuid(),
            volume.partition.uuid,
            volume.total_clusters,
            volume.boot_sector.ext_bpb.volume_label_str()
        );

        Ok(volume)
    }

    /// The partition this volume was mounted on.
    pub fn partition(&self) -> &PartitionDescriptor {
        &self.partition
    }

    /// First cluster of the root directory.
    pub fn root_cluster(&self) -> u32 {
        self.root_cluster
    }

    /// Free space in bytes, from the FSInfo free-cluster counter.
    /// Returns 0 when the counter is unknown.
    pub fn free_size(&self) -> u64 {
        let free = self.state.lock().free_clusters();
        if free == FsInfoSector::UNKNOWN {
            return 0;
        }
        free as u64 * self.bytes_per_cluster as u64
    }

    /// List the directory at `path`. Empty on any failure.
    pub fn ls(&self, path: &[&str]) -> Vec<FileRecord> {
        self.list_path(path).unwrap_or_default()
    }

    /// List the directory starting at `cluster`.
    pub fn list_dir(&self, cluster: u32) -> Result<Vec<FileRecord>, Fat32Error> {
        Ok(self.scan_dir(cluster)?.records)
    }

    /// Read the file `name` inside the directory at `path`.
    ///
    /// Empty on any failure before the first data cluster; a mid-chain
    /// I/O failure or chain inconsistency yields the bytes read so far.
    pub fn read_file(&self, path: &[&str], name: &str) -> Vec<u8> {
        self.read_file_inner(path, name).unwrap_or_default()
    }

    /// Create the directory `name` inside the directory at `path`.
    pub fn mkdir(&self, path: &[&str], name: &str) -> bool {
        match self.create_entry(path, name, true) {
            Ok(()) => true,
            Err(err) => {
                warn!("mkdir '{}' failed: {:?}", name, err);
                false
            }
        }
    }

    /// Create the empty file `name` inside the directory at `path`.
    pub fn touch(&self, path: &[&str], name: &str) -> bool {
        match self.create_entry(path, name, false) {
            Ok(()) => true,
            Err(err) => {
                warn!("touch '{}' failed: {:?}", name, err);
                false
            }
        }
    }

    // ========================================================================
    // Cluster I/O
    // ========================================================================

    fn fat(&self) -> FatTable<'_, D> {
        FatTable::new(
            &self.device,
            self.fat_begin,
            self.boot_sector.fat_size(),
            self.boot_sector.bpb.number_of_fat,
            self.total_clusters,
        )
    }

    fn cluster_lba(&self, cluster: u32) -> u64 {
        self.cluster_begin + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }

    fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>, Fat32Error> {
        let mut buf = vec![0u8; self.bytes_per_cluster];
        if !self
            .device
            .read_sectors(self.cluster_lba(cluster), self.sectors_per_cluster, &mut buf)
        {
            return Err(Fat32Error::Io);
        }
        Ok(buf)
    }

    fn write_cluster(&self, cluster: u32, buf: &[u8]) -> Result<(), Fat32Error> {
        if !self
            .device
            .write_sectors(self.cluster_lba(cluster), self.sectors_per_cluster, buf)
        {
            return Err(Fat32Error::Io);
        }
        Ok(())
    }

    fn write_fs_info(&self, state: &FsInfoSector) -> Result<(), Fat32Error> {
        if !self.device.write_sectors(self.fs_info_lba, 1, state.as_bytes()) {
            return Err(Fat32Error::Io);
        }
        Ok(())
    }

    /// Account for one newly used cluster and persist the FSInfo sector.
    fn consume_cluster(&self, state: &mut FsInfoSector) -> Result<(), Fat32Error> {
        let free = state.free_clusters();
        if free != FsInfoSector::UNKNOWN && free > 0 {
            state.set_free_clusters(free - 1);
        }
        self.write_fs_info(state)
    }

    // ========================================================================
    // Directory Engine
    // ========================================================================

    /// Walk a directory cluster chain and decode its entries.
    ///
    /// Long-name entries accumulate into a name buffer indexed by their
    /// sequence number; the short entry that follows emits the record.
    /// Traversal stops at the end-of-directory marker, the end of the
    /// chain, or a bad-cluster sentinel.
    fn scan_dir(&self, start_cluster: u32) -> Result<DirScan, Fat32Error> {
        let mut records = Vec::new();
        let mut aliases = Vec::new();

        let mut lfn_buf = [0u8; MAX_LFN_LENGTH];
        let mut lfn_len = 0usize;
        let mut lfn_active = false;

        let mut cluster = start_cluster;
        'chain: loop {
            let buf = self.read_cluster(cluster)?;

            for slot in buf.chunks_exact(DIR_ENTRY_SIZE) {
                let entry = DirEntry::read_from(slot);

                if entry.is_end_of_directory() {
                    break 'chain;
                }
                if entry.is_unused() {
                    lfn_active = false;
                    lfn_len = 0;
                    continue;
                }
                if entry.is_long_name() {
                    let lfn = LfnEntry::read_from(slot);
                    let sequence = lfn.sequence_number();
                    if sequence == 0 {
                        continue;
                    }
                    let mut pos = (sequence as usize - 1) * LFN_CHARS_PER_ENTRY;
                    for unit in lfn.units() {
                        if unit == 0 || unit == 0xFFFF {
                            break;
                        }
                        if pos < MAX_LFN_LENGTH {
                            lfn_buf[pos] = unit as u8;
                            pos += 1;
                        }
                    }
                    lfn_len = lfn_len.max(pos);
                    lfn_active = true;
                    continue;
                }

                aliases.push(entry.name);

                let name = if lfn_active {
                    String::from_utf8_lossy(&lfn_buf[..lfn_len]).into_owned()
                } else {
                    String::from_utf8_lossy(entry.short_name()).into_owned()
                };
                lfn_active = false;
                lfn_len = 0;

                let attributes = entry.attributes();
                let directory = attributes.contains(FileAttributes::DIRECTORY);
                records.push(FileRecord {
                    name,
                    hidden: attributes.contains(FileAttributes::HIDDEN),
                    system: attributes.contains(FileAttributes::SYSTEM),
                    directory,
                    size: if directory {
                        self.bytes_per_cluster as u64
                    } else {
                        entry.file_size() as u64
                    },
                    location: entry.first_cluster(),
                });
            }

            match self.fat().next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => break,
            }
        }

        Ok(DirScan { records, aliases })
    }

    /// Resolve a path to the cluster of its final segment.
    ///
    /// Every non-tail segment must name a directory; the tail may name
    /// either kind. The empty path resolves to the root cluster.
    fn find_cluster(&self, path: &[&str]) -> Result<u32, Fat32Error> {
        let mut cluster = self.root_cluster;

        for (index, segment) in path.iter().enumerate() {
            let tail = index + 1 == path.len();
            let records = self.scan_dir(cluster)?.records;
            let hit = records
                .iter()
                .find(|record| (tail || record.directory) && record.name == *segment)
                .ok_or(Fat32Error::NotFound)?;
            cluster = hit.location;
        }

        Ok(cluster)
    }

    fn list_path(&self, path: &[&str]) -> Result<Vec<FileRecord>, Fat32Error> {
        let cluster = self.find_cluster(path)?;
        self.list_dir(cluster)
    }

    fn read_file_inner(&self, path: &[&str], name: &str) -> Result<Vec<u8>, Fat32Error> {
        let parent = self.find_cluster(path)?;
        let record = self
            .scan_dir(parent)?
            .records
            .into_iter()
            .find(|record| record.name == name)
            .ok_or(Fat32Error::NotFound)?;

        if record.size == 0 {
            return Ok(Vec::new());
        }

        let mut content = Vec::with_capacity(record.size as usize);
        let mut remaining = record.size as usize;
        let mut cluster = record.location;

        while remaining > 0 {
            if !fat_entry::is_valid_data(cluster) {
                break;
            }
            let buf = match self.read_cluster(cluster) {
                Ok(buf) => buf,
                // A torn read mid-file is a partial success.
                Err(_) => break,
            };

            let take = remaining.min(self.bytes_per_cluster);
            content.extend_from_slice(&buf[..take]);
            remaining -= take;
            if remaining == 0 {
                break;
            }

            cluster = match self.fat().next_cluster(cluster) {
                Ok(Some(next)) => next,
                // End of chain, bad cluster, or a FAT read failure:
                // the file size and the chain disagree, keep what we have.
                _ => break,
            };
        }

        Ok(content)
    }

    /// Find `run` consecutive open slots in the directory rooted at
    /// `parent`, growing the chain by one formatted cluster when every
    /// existing cluster is full.
    ///
    /// Returns the cluster holding the run, its buffer, and the slot
    /// index of the run start.
    fn reserve_dir_slots(
        &self,
        parent: u32,
        run: usize,
        state: &mut FsInfoSector,
    ) -> Result<(u32, Vec<u8>, usize), Fat32Error> {
        let mut cluster = parent;
        loop {
            let mut buf = self.read_cluster(cluster)?;
            if let Some(slot) = find_free_run(&mut buf, run) {
                return Ok((cluster, buf, slot));
            }

            match self.fat().next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => {
                    // Any end-of-directory marker in the full cluster would
                    // stop scans before they reach the new tail.
                    let slots = self.bytes_per_cluster / DIR_ENTRY_SIZE;
                    let mut cleared = false;
                    for index in 0..slots {
                        if buf[index * DIR_ENTRY_SIZE] == entry_marker::END_OF_DIRECTORY {
                            buf[index * DIR_ENTRY_SIZE] = entry_marker::UNUSED;
                            cleared = true;
                        }
                    }
                    if cleared {
                        self.write_cluster(cluster, &buf)?;
                    }

                    let tail_cluster = self.fat().find_free_cluster()?;

                    // Format the tail before linking it so the chain never
                    // points at stale entries.
                    let mut tail = vec![0u8; self.bytes_per_cluster];
                    for index in 0..slots - 1 {
                        tail[index * DIR_ENTRY_SIZE] = entry_marker::UNUSED;
                    }
                    self.write_cluster(tail_cluster, &tail)?;
                    self.fat().write_entry(tail_cluster, fat_entry::END_OF_CHAIN)?;
                    self.fat().write_entry(cluster, tail_cluster)?;
                    self.consume_cluster(state)?;

                    debug!(
                        "grew directory at cluster {} with cluster {}",
                        parent, tail_cluster
                    );
                    cluster = tail_cluster;
                }
            }
        }
    }

    /// Shared body of `mkdir` and `touch`.
    fn create_entry(&self, path: &[&str], name: &str, directory: bool) -> Result<(), Fat32Error> {
        if name.is_empty() || name.len() > MAX_LFN_LENGTH {
            return Err(Fat32Error::InvalidName);
        }

        // Mutations hold the FSInfo lock for their whole duration.
        let mut state = self.state.lock();

        let parent = self.find_cluster(path)?;
        let scan = self.scan_dir(parent)?;
        if scan.records.iter().any(|record| record.name == name) {
            return Err(Fat32Error::AlreadyExists);
        }

        // Reserve the directory slots before picking the data cluster, so
        // a chain-growth allocation cannot hand out the same cluster.
        let run = entry_run_length(name.len());
        let (dir_cluster, mut dir_buf, slot) = self.reserve_dir_slots(parent, run, &mut state)?;

        let new_cluster = self.fat().find_free_cluster()?;

        let alias = make_short_alias(name, &scan.aliases);
        let checksum = lfn_checksum(&alias);
        let lfns = lfn_entries(name.as_bytes(), checksum);

        for (index, lfn) in lfns.iter().enumerate() {
            lfn.write_to(&mut dir_buf[(slot + index) * DIR_ENTRY_SIZE..]);
        }
        let entry = if directory {
            DirEntry::new_directory(&alias, new_cluster)
        } else {
            DirEntry::new_file(&alias, new_cluster)
        };
        entry.write_to(&mut dir_buf[(slot + lfns.len()) * DIR_ENTRY_SIZE..]);

        // Reserved slots past the written set must not read as live
        // entries or as the end of the directory.
        for extra in lfns.len() + 1..run {
            dir_buf[(slot + extra) * DIR_ENTRY_SIZE] = entry_marker::UNUSED;
        }

        // Parent entries first, then the FAT terminator, then the
        // free-cluster counter; a crash between steps leaves no dangling
        // reference from the parent to an unterminated chain.
        self.write_cluster(dir_cluster, &dir_buf)?;
        self.fat().write_entry(new_cluster, fat_entry::END_OF_CHAIN)?;
        self.consume_cluster(&mut state)?;

        if directory {
            let mut child = vec![0u8; self.bytes_per_cluster];
            DirEntry::new_directory(b".          ", new_cluster).write_to(&mut child[..]);
            DirEntry::new_directory(b"..         ", parent).write_to(&mut child[DIR_ENTRY_SIZE..]);

            let slots = self.bytes_per_cluster / DIR_ENTRY_SIZE;
            for index in 2..slots - 1 {
                child[index * DIR_ENTRY_SIZE] = entry_marker::UNUSED;
            }
            // The final slot keeps the end-of-directory marker.
            self.write_cluster(new_cluster, &child)?;
        }

        debug!(
            "created {} '{}' at cluster {} in directory cluster {}",
            if directory { "directory" } else { "file" },
            name,
            new_cluster,
            parent
        );
        Ok(())
    }
}

/// Locate `run` consecutive open slots (unused or end-of-directory) in a
/// directory cluster buffer.
///
/// When the run covers the end-of-directory marker, the marker moves to
/// the next open slot past the run; with no such slot the cluster is
/// treated as full and `None` is returned. A cluster without any end
/// marker (a grown directory tail that filled up) is searched for a run
/// of unused slots only.
fn find_free_run(buf: &mut [u8], run: usize) -> Option<usize> {
    let slots = buf.len() / DIR_ENTRY_SIZE;

    fn is_open(buf: &[u8], index: usize) -> bool {
        let first = buf[index * DIR_ENTRY_SIZE];
        first == entry_marker::END_OF_DIRECTORY || first == entry_marker::UNUSED
    }

    let end = (0..slots).find(|&i| buf[i * DIR_ENTRY_SIZE] == entry_marker::END_OF_DIRECTORY);

    let mut length = 0;
    let mut start = None;
    for index in 0..slots {
        if is_open(buf, index) {
            length += 1;
            if length == run {
                start = Some(index + 1 - run);
                break;
            }
        } else {
            length = 0;
        }
    }
    let start = start?;
    let run_end = start + run - 1;

    if let Some(end) = end {
        if end <= run_end {
            let new_end = (run_end + 1..slots).find(|&i| is_open(buf, i))?;
            buf[end * DIR_ENTRY_SIZE] = entry_marker::UNUSED;
            buf[new_end * DIR_ENTRY_SIZE] = entry_marker::END_OF_DIRECTORY;
        }
    }

    Some(start)
}
