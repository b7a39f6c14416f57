use log::debug;

use crate::cache::{SectorCache, CACHE_STATUS_MIRROR_FAT};
use crate::device::BlockDevice;
use crate::entry::Timestamp;
use crate::error::FatError;
use crate::{SECTOR_MASK, SECTOR_SHIFT, SECTOR_SIZE};

/// FAT variant, derived from the volume's cluster count at mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl core::fmt::Display for FatType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bits = match self {
            FatType::Fat12 => 12,
            FatType::Fat16 => 16,
            FatType::Fat32 => 32,
        };
        write!(f, "FAT{bits}")
    }
}

/// Decoded FAT table entry for one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    /// Cluster is unallocated.
    Free,
    /// Chain continues at the given cluster.
    Next(u32),
    /// No further cluster follows.
    EndOfChain,
}

/// Per-instance source of directory-entry timestamps.
pub type DateTimeSource = fn() -> Timestamp;

// MBR partition types carrying a FAT filesystem.
const MBR_FAT_TYPES: [u8; 5] = [0x04, 0x06, 0x0B, 0x0C, 0x0E];

/// A mounted FAT12/16/32 volume: boot-sector geometry, the FAT table
/// allocator, and the single sector cache everything funnels through.
pub struct FatVolume<D: BlockDevice> {
    device: D,
    pub(crate) cache: SectorCache,
    fat_type: FatType,
    sectors_per_cluster: u8,
    sectors_per_cluster_shift: u8,
    cluster_sector_mask: u8,
    fat_count: u8,
    sectors_per_fat: u32,
    fat_start_sector: u32,
    data_start_sector: u32,
    root_dir_entry_count: u16,
    // Start sector of the fixed root on FAT12/16; root cluster on FAT32.
    root_dir_start: u32,
    pub(crate) last_cluster: u32,
    pub(crate) alloc_search_start: u32,
    pub(crate) free_clusters: Option<u32>,
    date_time: Option<DateTimeSource>,
}

impl<D: BlockDevice> FatVolume<D> {
    /// Mount a volume. `partition` 1-4 selects an MBR partition;
    /// 0 treats the device as a superfloppy with its boot sector at
    /// `start_sector`.
    pub fn mount(
        mut device: D,
        partition: u8,
        start_sector: u32,
    ) -> Result<Self, FatError<D::Error>> {
        let volume_start = match partition {
            0 => start_sector,
            1..=4 => Self::partition_start(&mut device, partition)?,
            _ => return Err(FatError::NoFatPartition),
        };

        let mut boot = [0u8; SECTOR_SIZE];
        device
            .read_sector(volume_start, &mut boot)
            .map_err(FatError::Device)?;
        if boot[510] != 0x55 || boot[511] != 0xAA {
            return Err(FatError::InvalidBootSector);
        }

        let bytes_per_sector = u16::from_le_bytes([boot[11], boot[12]]);
        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(FatError::UnsupportedSectorSize(bytes_per_sector));
        }
        let sectors_per_cluster = boot[13];
        if !sectors_per_cluster.is_power_of_two() {
            return Err(FatError::UnsupportedSectorsPerCluster(sectors_per_cluster));
        }
        let sectors_per_cluster_shift = sectors_per_cluster.trailing_zeros() as u8;

        let reserved_sectors = u16::from_le_bytes([boot[14], boot[15]]) as u32;
        let fat_count = boot[16];
        if reserved_sectors == 0 || !(1..=2).contains(&fat_count) {
            return Err(FatError::InvalidBootSector);
        }
        let root_dir_entry_count = u16::from_le_bytes([boot[17], boot[18]]);

        let total_16 = u16::from_le_bytes([boot[19], boot[20]]) as u32;
        let total_32 = u32::from_le_bytes([boot[32], boot[33], boot[34], boot[35]]);
        let total_sectors = if total_16 != 0 { total_16 } else { total_32 };

        let fat_size_16 = u16::from_le_bytes([boot[22], boot[23]]) as u32;
        let fat_size_32 = u32::from_le_bytes([boot[36], boot[37], boot[38], boot[39]]);
        let sectors_per_fat = if fat_size_16 != 0 {
            fat_size_16
        } else {
            fat_size_32
        };
        if total_sectors == 0 || sectors_per_fat == 0 {
            return Err(FatError::InvalidBootSector);
        }

        let fat_start_sector = volume_start + reserved_sectors;
        let root_dir_sectors =
            (32 * root_dir_entry_count as u32 + SECTOR_MASK) >> SECTOR_SHIFT;
        let root_dir_start_sector = fat_start_sector + fat_count as u32 * sectors_per_fat;
        let data_start_sector = root_dir_start_sector + root_dir_sectors;

        let overhead = data_start_sector - volume_start;
        if total_sectors <= overhead {
            return Err(FatError::InvalidBootSector);
        }
        let mut cluster_count = (total_sectors - overhead) >> sectors_per_cluster_shift;

        let fat_type = if cluster_count < 4085 {
            FatType::Fat12
        } else if cluster_count < 65_525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        };

        // The FAT region must describe every data cluster; an oversized
        // count would send chain writes past the FAT into the root
        // directory. Trust the smaller figure.
        let fat_entries = match fat_type {
            FatType::Fat12 => sectors_per_fat as u64 * SECTOR_SIZE as u64 * 2 / 3,
            FatType::Fat16 => sectors_per_fat as u64 * (SECTOR_SIZE as u64 / 2),
            FatType::Fat32 => sectors_per_fat as u64 * (SECTOR_SIZE as u64 / 4),
        };
        if fat_entries < 3 {
            return Err(FatError::InvalidBootSector);
        }
        let max_clusters = (fat_entries - 2).min(u32::MAX as u64 - 1) as u32;
        if cluster_count > max_clusters {
            cluster_count = max_clusters;
        }
        let last_cluster = cluster_count + 1;

        let root_dir_start = match fat_type {
            FatType::Fat12 | FatType::Fat16 => {
                if root_dir_entry_count == 0 {
                    return Err(FatError::InvalidBootSector);
                }
                root_dir_start_sector
            }
            FatType::Fat32 => {
                let root_cluster = u32::from_le_bytes([boot[44], boot[45], boot[46], boot[47]]);
                if root_cluster < 2 || root_cluster > last_cluster {
                    return Err(FatError::InvalidBootSector);
                }
                root_cluster
            }
        };

        let mut cache = SectorCache::new();
        if fat_count == 2 {
            cache.set_mirror_offset(sectors_per_fat);
        }

        debug!(
            "mounted {fat_type} volume: {cluster_count} clusters, \
             {sectors_per_cluster} sectors/cluster, {fat_count} FATs"
        );

        Ok(Self {
            device,
            cache,
            fat_type,
            sectors_per_cluster,
            sectors_per_cluster_shift,
            cluster_sector_mask: sectors_per_cluster - 1,
            fat_count,
            sectors_per_fat,
            fat_start_sector,
            data_start_sector,
            root_dir_entry_count,
            root_dir_start,
            last_cluster,
            alloc_search_start: 1,
            free_clusters: None,
            date_time: None,
        })
    }

    fn partition_start(device: &mut D, partition: u8) -> Result<u32, FatError<D::Error>> {
        let mut mbr = [0u8; SECTOR_SIZE];
        device.read_sector(0, &mut mbr).map_err(FatError::Device)?;
        if mbr[510] != 0x55 || mbr[511] != 0xAA {
            return Err(FatError::NoFatPartition);
        }
        let base = 446 + 16 * (partition as usize - 1);
        let part_type = mbr[base + 4];
        if !MBR_FAT_TYPES.contains(&part_type) {
            return Err(FatError::NoFatPartition);
        }
        let start = u32::from_le_bytes([mbr[base + 8], mbr[base + 9], mbr[base + 10], mbr[base + 11]]);
        if start == 0 {
            return Err(FatError::NoFatPartition);
        }
        Ok(start)
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    pub(crate) fn sectors_per_cluster_shift(&self) -> u8 {
        self.sectors_per_cluster_shift
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        (SECTOR_SIZE as u32) << self.sectors_per_cluster_shift
    }

    pub fn cluster_count(&self) -> u32 {
        self.last_cluster - 1
    }

    pub fn fat_count(&self) -> u8 {
        self.fat_count
    }

    pub fn sectors_per_fat(&self) -> u32 {
        self.sectors_per_fat
    }

    pub(crate) fn fat_start_sector(&self) -> u32 {
        self.fat_start_sector
    }

    pub fn data_start_sector(&self) -> u32 {
        self.data_start_sector
    }

    /// Entry capacity of the fixed FAT12/16 root directory.
    pub fn root_dir_entry_count(&self) -> u16 {
        self.root_dir_entry_count
    }

    /// Fixed-root start sector (FAT12/16) or root cluster (FAT32).
    pub(crate) fn root_dir_start(&self) -> u32 {
        self.root_dir_start
    }

    /// First sector of a data cluster. Clusters below 2 are reserved.
    pub(crate) fn cluster_start_sector(&self, cluster: u32) -> u32 {
        self.data_start_sector + ((cluster - 2) << self.sectors_per_cluster_shift)
    }

    /// Sector index within a cluster for a byte position.
    pub(crate) fn sector_of_cluster(&self, position: u32) -> u8 {
        ((position >> SECTOR_SHIFT) as u8) & self.cluster_sector_mask
    }

    /// End-of-chain test. Deliberately lenient: any value above the
    /// last valid cluster counts as EOC, which covers every FAT12/16/32
    /// EOC marker as well as out-of-range garbage.
    pub(crate) fn is_eoc(&self, cluster: u32) -> bool {
        cluster > self.last_cluster
    }

    pub fn is_busy(&mut self) -> bool {
        self.device.is_busy()
    }

    /// Install or clear the timestamp source for directory entries.
    pub fn set_date_time(&mut self, source: Option<DateTimeSource>) {
        self.date_time = source;
    }

    pub(crate) fn date_time(&self) -> Option<DateTimeSource> {
        self.date_time
    }

    /// Give the device back, discarding unsynced cache contents.
    pub fn release(self) -> D {
        self.device
    }

    // ---- cache plumbing -------------------------------------------------

    pub(crate) fn cache_prepare(
        &mut self,
        sector: u32,
        options: u8,
    ) -> Result<&mut [u8; SECTOR_SIZE], FatError<D::Error>> {
        let Self { device, cache, .. } = self;
        cache.prepare(device, sector, options).map_err(FatError::Device)
    }

    /// Prepare a FAT sector; on two-FAT volumes the flush also updates
    /// the second copy.
    pub(crate) fn fat_cache_prepare(
        &mut self,
        sector: u32,
        options: u8,
    ) -> Result<&mut [u8; SECTOR_SIZE], FatError<D::Error>> {
        let options = if self.fat_count == 2 {
            options | CACHE_STATUS_MIRROR_FAT
        } else {
            options
        };
        self.cache_prepare(sector, options)
    }

    /// Flush the cache and ask the device to persist.
    pub fn cache_sync(&mut self) -> Result<(), FatError<D::Error>> {
        let Self { device, cache, .. } = self;
        cache.flush(device).map_err(FatError::Device)?;
        device.sync_device().map_err(FatError::Device)
    }

    /// Flush the cache without a device sync.
    pub(crate) fn cache_sync_data(&mut self) -> Result<(), FatError<D::Error>> {
        let Self { device, cache, .. } = self;
        cache.flush(device).map_err(FatError::Device)
    }

    pub(crate) fn cache_sector(&self) -> u32 {
        self.cache.sector()
    }

    // ---- direct device I/O (multi-sector bypass paths) ------------------

    /// Read whole sectors around the cache, flushing the resident
    /// sector first when it falls inside the range.
    pub(crate) fn read_sectors_checked(
        &mut self,
        sector: u32,
        dst: &mut [u8],
    ) -> Result<(), FatError<D::Error>> {
        let count = (dst.len() >> SECTOR_SHIFT) as u32;
        if self.cache.contains(sector, count) {
            self.cache_sync_data()?;
        }
        self.device
            .read_sectors(sector, dst)
            .map_err(FatError::Device)
    }

    /// Write whole sectors around the cache, dropping a resident copy
    /// the write supersedes.
    pub(crate) fn write_sectors_checked(
        &mut self,
        sector: u32,
        src: &[u8],
    ) -> Result<(), FatError<D::Error>> {
        let count = (src.len() >> SECTOR_SHIFT) as u32;
        if self.cache.contains(sector, count) {
            self.cache.invalidate();
        }
        self.device
            .write_sectors(sector, src)
            .map_err(FatError::Device)
    }

    pub(crate) fn write_sector_direct(
        &mut self,
        sector: u32,
        src: &[u8; SECTOR_SIZE],
    ) -> Result<(), FatError<D::Error>> {
        self.device
            .write_sector(sector, src)
            .map_err(FatError::Device)
    }
}
