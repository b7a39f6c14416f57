//! File data transfer. Sub-sector pieces go through the volume cache;
//! runs of whole sectors bypass it and hit the device directly, limited
//! to one cluster per pass so the FAT walk stays incremental.

use crate::cache::{CACHE_FOR_READ, CACHE_FOR_WRITE, CACHE_RESERVE_FOR_WRITE};
use crate::device::BlockDevice;
use crate::error::FatError;
use crate::file::{FatFile, O_APPEND, O_SYNC};
use crate::volume::{FatEntry, FatVolume};
use crate::{SECTOR_MASK, SECTOR_SHIFT, SECTOR_SIZE};

impl FatFile {
    /// Read up to `dst.len()` bytes at the current position. Returns
    /// the number of bytes read, 0 at end-of-file. Directory handles
    /// read their raw 32-byte entries.
    pub fn read<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        dst: &mut [u8],
    ) -> Result<usize, FatError<D::Error>> {
        if !self.is_readable() {
            return Err(FatError::ReadProhibited);
        }
        // Cluster-chain directories are read to end-of-chain, not to
        // the size snapshot: another handle may have grown the chain.
        let want = if self.is_dir() && !self.is_root_fixed() {
            dst.len()
        } else {
            let remaining = self.file_size.saturating_sub(self.cur_position) as usize;
            dst.len().min(remaining)
        };
        let cluster_mask = vol.bytes_per_cluster() - 1;

        let mut done = 0usize;
        while done < want {
            let offset = (self.cur_position & SECTOR_MASK) as usize;
            let sector = if self.is_root_fixed() {
                vol.root_dir_start() + (self.cur_position >> SECTOR_SHIFT)
            } else {
                if self.cur_position & cluster_mask == 0 {
                    if self.cur_position == 0 {
                        self.cur_cluster = self.first_cluster;
                    } else {
                        match vol.fat_get(self.cur_cluster)? {
                            FatEntry::Next(next) => self.cur_cluster = next,
                            FatEntry::EndOfChain if self.is_dir() => break,
                            _ => return Err(FatError::CorruptChain),
                        }
                    }
                }
                vol.cluster_start_sector(self.cur_cluster)
                    + vol.sector_of_cluster(self.cur_position) as u32
            };

            let chunk = want - done;
            let n;
            if offset != 0 || chunk < SECTOR_SIZE || sector == vol.cache_sector() {
                n = chunk.min(SECTOR_SIZE - offset);
                let buf = vol.cache_prepare(sector, CACHE_FOR_READ)?;
                dst[done..done + n].copy_from_slice(&buf[offset..offset + n]);
            } else {
                let mut ns = (chunk >> SECTOR_SHIFT) as u32;
                if !self.is_root_fixed() {
                    let left_in_cluster =
                        vol.sectors_per_cluster() as u32 - vol.sector_of_cluster(self.cur_position) as u32;
                    ns = ns.min(left_in_cluster);
                }
                n = (ns as usize) << SECTOR_SHIFT;
                vol.read_sectors_checked(sector, &mut dst[done..done + n])?;
            }
            self.cur_position += n as u32;
            done += n;
        }
        if self.is_dir() && self.cur_position > self.file_size {
            self.file_size = self.cur_position;
        }
        Ok(done)
    }

    /// Write `src` at the current position, growing the cluster chain
    /// as needed. Returns `src.len()` on success; any failure sets the
    /// sticky write-error flag.
    pub fn write<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        src: &[u8],
    ) -> Result<usize, FatError<D::Error>> {
        match self.write_data(vol, src) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.write_error = true;
                Err(e)
            }
        }
    }

    fn write_data<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        src: &[u8],
    ) -> Result<usize, FatError<D::Error>> {
        if !self.is_file() || !self.is_writable() {
            return Err(FatError::WriteProhibited);
        }
        if self.flags & O_APPEND != 0 {
            self.seek_end(vol, 0)?;
        }
        if self.cur_position as u64 + src.len() as u64 > u32::MAX as u64 {
            return Err(FatError::FileTooLarge);
        }
        let cluster_mask = vol.bytes_per_cluster() - 1;

        let mut done = 0usize;
        while done < src.len() {
            if self.cur_position & cluster_mask == 0 {
                // Cluster boundary: advance, or extend the chain.
                if self.cur_position == 0 {
                    if self.first_cluster == 0 {
                        self.add_cluster(vol)?;
                    } else {
                        self.cur_cluster = self.first_cluster;
                    }
                } else {
                    match vol.fat_get(self.cur_cluster)? {
                        FatEntry::Next(next) => self.cur_cluster = next,
                        FatEntry::EndOfChain => self.add_cluster(vol)?,
                        FatEntry::Free => return Err(FatError::CorruptChain),
                    }
                }
            }
            let offset = (self.cur_position & SECTOR_MASK) as usize;
            let sector = vol.cluster_start_sector(self.cur_cluster)
                + vol.sector_of_cluster(self.cur_position) as u32;

            let chunk = src.len() - done;
            let n;
            if offset != 0 || chunk < SECTOR_SIZE || sector == vol.cache_sector() {
                n = chunk.min(SECTOR_SIZE - offset);
                // A fresh sector past end-of-file never needs a
                // read-modify-write load.
                let option = if offset == 0 && self.cur_position >= self.file_size {
                    CACHE_RESERVE_FOR_WRITE
                } else {
                    CACHE_FOR_WRITE
                };
                let buf = vol.cache_prepare(sector, option)?;
                buf[offset..offset + n].copy_from_slice(&src[done..done + n]);
                if offset + n == SECTOR_SIZE {
                    vol.cache_sync_data()?;
                }
            } else {
                let left_in_cluster =
                    vol.sectors_per_cluster() as u32 - vol.sector_of_cluster(self.cur_position) as u32;
                let ns = ((chunk >> SECTOR_SHIFT) as u32).min(left_in_cluster);
                n = (ns as usize) << SECTOR_SHIFT;
                vol.write_sectors_checked(sector, &src[done..done + n])?;
            }
            self.cur_position += n as u32;
            done += n;
            if self.cur_position > self.file_size {
                self.file_size = self.cur_position;
                self.dir_entry_dirty = true;
            }
        }
        if self.flags & O_SYNC != 0 {
            self.sync(vol)?;
        }
        Ok(done)
    }
}
