//! FAT table access and cluster allocation.
//!
//! FAT12 entries are 12-bit values packed two-per-three-bytes; an entry
//! may straddle a sector boundary, so both bytes go through the cache
//! one sector at a time. FAT32 entries are 28-bit with the top four
//! bits reserved, preserved across writes.

use log::trace;

use crate::cache::{CACHE_FOR_READ, CACHE_FOR_WRITE};
use crate::device::BlockDevice;
use crate::error::FatError;
use crate::volume::{FatEntry, FatType, FatVolume};
use crate::{SECTOR_MASK, SECTOR_SHIFT};

const FAT12_MASK: u32 = 0xFFF;
const FAT32_MASK: u32 = 0x0FFF_FFFF;

/// Canonical end-of-chain marker; truncated to the entry width on write.
pub(crate) const FAT_EOC: u32 = 0x0FFF_FFFF;

impl<D: BlockDevice> FatVolume<D> {
    /// Read and classify the FAT entry for `cluster`.
    pub fn fat_get(&mut self, cluster: u32) -> Result<FatEntry, FatError<D::Error>> {
        let raw = self.fat_get_raw(cluster)?;
        Ok(if raw == 0 {
            FatEntry::Free
        } else if self.is_eoc(raw) {
            FatEntry::EndOfChain
        } else {
            FatEntry::Next(raw)
        })
    }

    fn fat_get_raw(&mut self, cluster: u32) -> Result<u32, FatError<D::Error>> {
        if cluster < 2 || cluster > self.last_cluster {
            return Err(FatError::BadCluster(cluster));
        }
        match self.fat_type() {
            FatType::Fat12 => {
                let offset = cluster + (cluster >> 1);
                let sector = self.fat_start_sector() + (offset >> SECTOR_SHIFT);
                let index = (offset & SECTOR_MASK) as usize;
                let b0 = self.fat_cache_prepare(sector, CACHE_FOR_READ)?[index];
                let b1 = if index == SECTOR_MASK as usize {
                    self.fat_cache_prepare(sector + 1, CACHE_FOR_READ)?[0]
                } else {
                    self.fat_cache_prepare(sector, CACHE_FOR_READ)?[index + 1]
                };
                let packed = u16::from_le_bytes([b0, b1]) as u32;
                if cluster & 1 != 0 {
                    Ok(packed >> 4)
                } else {
                    Ok(packed & FAT12_MASK)
                }
            }
            FatType::Fat16 => {
                let sector = self.fat_start_sector() + (cluster >> 8);
                let index = ((cluster & 0xFF) << 1) as usize;
                let buf = self.fat_cache_prepare(sector, CACHE_FOR_READ)?;
                Ok(u16::from_le_bytes([buf[index], buf[index + 1]]) as u32)
            }
            FatType::Fat32 => {
                let sector = self.fat_start_sector() + (cluster >> 7);
                let index = ((cluster & 0x7F) << 2) as usize;
                let buf = self.fat_cache_prepare(sector, CACHE_FOR_READ)?;
                let raw = u32::from_le_bytes([
                    buf[index],
                    buf[index + 1],
                    buf[index + 2],
                    buf[index + 3],
                ]);
                Ok(raw & FAT32_MASK)
            }
        }
    }

    /// Store `value` in the FAT entry for `cluster`.
    pub(crate) fn fat_put(&mut self, cluster: u32, value: u32) -> Result<(), FatError<D::Error>> {
        if cluster < 2 || cluster > self.last_cluster {
            return Err(FatError::BadCluster(cluster));
        }
        match self.fat_type() {
            FatType::Fat12 => {
                let offset = cluster + (cluster >> 1);
                let sector = self.fat_start_sector() + (offset >> SECTOR_SHIFT);
                let index = (offset & SECTOR_MASK) as usize;
                let odd = cluster & 1 != 0;
                {
                    let buf = self.fat_cache_prepare(sector, CACHE_FOR_WRITE)?;
                    if odd {
                        buf[index] = (buf[index] & 0x0F) | ((value << 4) as u8);
                    } else {
                        buf[index] = value as u8;
                    }
                }
                let (next_sector, next_index) = if index == SECTOR_MASK as usize {
                    (sector + 1, 0)
                } else {
                    (sector, index + 1)
                };
                let buf = self.fat_cache_prepare(next_sector, CACHE_FOR_WRITE)?;
                if odd {
                    buf[next_index] = (value >> 4) as u8;
                } else {
                    buf[next_index] = (buf[next_index] & 0xF0) | ((value >> 8) & 0x0F) as u8;
                }
            }
            FatType::Fat16 => {
                let sector = self.fat_start_sector() + (cluster >> 8);
                let index = ((cluster & 0xFF) << 1) as usize;
                let buf = self.fat_cache_prepare(sector, CACHE_FOR_WRITE)?;
                buf[index..index + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            FatType::Fat32 => {
                let sector = self.fat_start_sector() + (cluster >> 7);
                let index = ((cluster & 0x7F) << 2) as usize;
                let buf = self.fat_cache_prepare(sector, CACHE_FOR_WRITE)?;
                let old = u32::from_le_bytes([
                    buf[index],
                    buf[index + 1],
                    buf[index + 2],
                    buf[index + 3],
                ]);
                let new = (old & !FAT32_MASK) | (value & FAT32_MASK);
                buf[index..index + 4].copy_from_slice(&new.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Find a free cluster, mark it end-of-chain, and link it after
    /// `current` (pass 0 to start a new chain). The search begins past
    /// the last allocation and wraps once.
    pub(crate) fn allocate_cluster(&mut self, current: u32) -> Result<u32, FatError<D::Error>> {
        let mut find = if current >= 2 {
            current
        } else {
            self.alloc_search_start
        };
        for _ in 0..self.cluster_count() {
            find += 1;
            if find > self.last_cluster {
                trace!("cluster search wrapped to start of FAT");
                find = 2;
            }
            if self.fat_get(find)? == FatEntry::Free {
                self.fat_put(find, FAT_EOC)?;
                if current >= 2 {
                    self.fat_put(current, find)?;
                }
                self.alloc_search_start = find;
                if let Some(n) = self.free_clusters {
                    self.free_clusters = Some(n.saturating_sub(1));
                }
                return Ok(find);
            }
        }
        Err(FatError::NoFreeCluster)
    }

    /// Allocate `count` consecutive clusters linked into one chain,
    /// returning the first. Like [`allocate_cluster`](Self::allocate_cluster)
    /// the search starts past the last allocation and wraps once; a run
    /// never spans the wrap.
    pub(crate) fn alloc_contiguous(&mut self, count: u32) -> Result<u32, FatError<D::Error>> {
        let mut first = 0;
        let mut run = 0u32;
        let mut cluster = self.alloc_search_start;
        // extra steps so a run straddling the start point is still seen
        for _ in 0..self.cluster_count() as u64 + count as u64 {
            cluster += 1;
            if cluster > self.last_cluster {
                trace!("cluster search wrapped to start of FAT");
                cluster = 2;
                run = 0;
            }
            if self.fat_get(cluster)? == FatEntry::Free {
                if run == 0 {
                    first = cluster;
                }
                run += 1;
                if run == count {
                    for c in first..first + count - 1 {
                        self.fat_put(c, c + 1)?;
                    }
                    self.fat_put(first + count - 1, FAT_EOC)?;
                    self.alloc_search_start = first + count - 1;
                    if let Some(n) = self.free_clusters {
                        self.free_clusters = Some(n.saturating_sub(count));
                    }
                    return Ok(first);
                }
            } else {
                run = 0;
            }
        }
        Err(FatError::NoFreeCluster)
    }

    /// Release every cluster of the chain starting at `first`. Chains
    /// rooted below cluster 2 are empty and succeed trivially.
    pub(crate) fn free_chain(&mut self, first: u32) -> Result<(), FatError<D::Error>> {
        if first < 2 {
            return Ok(());
        }
        let mut cluster = first;
        let mut visited = 0u32;
        loop {
            visited += 1;
            if visited > self.cluster_count() {
                return Err(FatError::ClusterChainTooLong);
            }
            let next = self.fat_get(cluster)?;
            self.fat_put(cluster, 0)?;
            if let Some(n) = self.free_clusters {
                self.free_clusters = Some(n.saturating_add(1));
            }
            match next {
                FatEntry::Next(n) => cluster = n,
                FatEntry::EndOfChain | FatEntry::Free => return Ok(()),
            }
        }
    }

    /// Number of free clusters. The first call scans the whole FAT;
    /// the result is kept current by the allocator afterwards.
    pub fn free_cluster_count(&mut self) -> Result<u32, FatError<D::Error>> {
        if let Some(n) = self.free_clusters {
            return Ok(n);
        }
        let mut free = 0;
        for cluster in 2..=self.last_cluster {
            if self.fat_get(cluster)? == FatEntry::Free {
                free += 1;
            }
        }
        self.free_clusters = Some(free);
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use crate::testdev::RamDisk;
    use crate::volume::{FatEntry, FatType, FatVolume};
    use crate::SECTOR_SIZE;

    // 2048-sector FAT12 image: 1 reserved sector, two 6-sector FATs,
    // 512 root entries, 2003 clusters.
    fn fat12_volume() -> FatVolume<RamDisk> {
        let mut disk = RamDisk::new(2048);
        let boot = &mut disk.data[..SECTOR_SIZE];
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = 1;
        boot[14..16].copy_from_slice(&1u16.to_le_bytes());
        boot[16] = 2;
        boot[17..19].copy_from_slice(&512u16.to_le_bytes());
        boot[19..21].copy_from_slice(&2048u16.to_le_bytes());
        boot[22..24].copy_from_slice(&6u16.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;
        let vol = FatVolume::mount(disk, 0, 0).unwrap();
        assert_eq!(vol.fat_type(), FatType::Fat12);
        assert_eq!(vol.cluster_count(), 2003);
        vol
    }

    #[test]
    fn fat12_adjacent_entries_share_a_byte() {
        let mut vol = fat12_volume();
        vol.fat_put(2, 0x123).unwrap();
        vol.fat_put(3, 0x456).unwrap();
        vol.cache_sync().unwrap();

        assert_eq!(vol.fat_get(2).unwrap(), FatEntry::Next(0x123));
        assert_eq!(vol.fat_get(3).unwrap(), FatEntry::Next(0x456));

        let disk = vol.release();
        let fat = &disk.data[SECTOR_SIZE..2 * SECTOR_SIZE];
        assert_eq!(fat[3], 0x23);
        assert_eq!(fat[4], 0x61);
        assert_eq!(fat[5], 0x45);
    }

    #[test]
    fn fat12_entry_spanning_fat_sectors() {
        let mut vol = fat12_volume();
        // Cluster 341 packs at byte offset 511, split across sectors.
        vol.fat_put(341, 0x5AB).unwrap();
        vol.cache_sync().unwrap();
        assert_eq!(vol.fat_get(341).unwrap(), FatEntry::Next(0x5AB));

        let disk = vol.release();
        assert_eq!(disk.data[SECTOR_SIZE + 511], 0xB0);
        assert_eq!(disk.data[2 * SECTOR_SIZE], 0x5A);
    }

    #[test]
    fn allocation_links_chain_and_tracks_free_count() {
        let mut vol = fat12_volume();
        assert_eq!(vol.free_cluster_count().unwrap(), 2003);

        let first = vol.allocate_cluster(0).unwrap();
        assert_eq!(first, 2);
        assert_eq!(vol.fat_get(2).unwrap(), FatEntry::EndOfChain);

        let second = vol.allocate_cluster(first).unwrap();
        assert_eq!(second, 3);
        assert_eq!(vol.fat_get(2).unwrap(), FatEntry::Next(3));
        assert_eq!(vol.fat_get(3).unwrap(), FatEntry::EndOfChain);
        assert_eq!(vol.free_cluster_count().unwrap(), 2001);

        vol.free_chain(first).unwrap();
        assert_eq!(vol.fat_get(2).unwrap(), FatEntry::Free);
        assert_eq!(vol.fat_get(3).unwrap(), FatEntry::Free);
        assert_eq!(vol.free_cluster_count().unwrap(), 2003);
    }

    #[test]
    fn contiguous_allocation_skips_broken_runs() {
        let mut vol = fat12_volume();
        // Occupy cluster 3 so the run 2..=4 is broken.
        vol.fat_put(3, crate::alloc::FAT_EOC).unwrap();

        let first = vol.alloc_contiguous(3).unwrap();
        assert_eq!(first, 4);
        assert_eq!(vol.fat_get(4).unwrap(), FatEntry::Next(5));
        assert_eq!(vol.fat_get(5).unwrap(), FatEntry::Next(6));
        assert_eq!(vol.fat_get(6).unwrap(), FatEntry::EndOfChain);
    }

    #[test]
    fn contiguous_allocation_resumes_at_cursor() {
        let mut vol = fat12_volume();
        assert_eq!(vol.allocate_cluster(0).unwrap(), 2);
        // the run search picks up after the cursor
        assert_eq!(vol.alloc_contiguous(2).unwrap(), 3);

        // park the cursor at the end of the FAT to force a wrap
        vol.alloc_search_start = vol.last_cluster;
        assert_eq!(vol.alloc_contiguous(2).unwrap(), 5);
        assert_eq!(vol.fat_get(5).unwrap(), FatEntry::Next(6));
        assert_eq!(vol.fat_get(6).unwrap(), FatEntry::EndOfChain);
    }

    #[test]
    fn fat_mirror_updated_on_sync() {
        let mut vol = fat12_volume();
        vol.fat_put(2, 0x123).unwrap();
        vol.cache_sync().unwrap();

        let disk = vol.release();
        let fat0 = &disk.data[SECTOR_SIZE..2 * SECTOR_SIZE];
        let fat1 = &disk.data[7 * SECTOR_SIZE..8 * SECTOR_SIZE];
        assert_eq!(fat0[..8], fat1[..8]);
    }
}
