use crate::device::BlockDevice;
use crate::SECTOR_SIZE;

pub(crate) const CACHE_STATUS_DIRTY: u8 = 0x01;
pub(crate) const CACHE_STATUS_MIRROR_FAT: u8 = 0x02;
const CACHE_OPTION_NO_READ: u8 = 0x04;

/// Prepare for reading only.
pub(crate) const CACHE_FOR_READ: u8 = 0;
/// Prepare for read-modify-write; the sector is loaded first.
pub(crate) const CACHE_FOR_WRITE: u8 = CACHE_STATUS_DIRTY;
/// Prepare for a full overwrite; the stale device contents are not
/// loaded and the buffer contents are unspecified until written.
pub(crate) const CACHE_RESERVE_FOR_WRITE: u8 = CACHE_STATUS_DIRTY | CACHE_OPTION_NO_READ;

const INVALID_SECTOR: u32 = u32::MAX;

/// Single-sector write-back cache.
///
/// One buffer per volume: every sub-sector read and every sector
/// mutation in the engine funnels through it. Requesting a different
/// sector flushes the resident one first when dirty. A FAT sector
/// flagged for mirroring is written to both FAT copies on flush.
pub(crate) struct SectorCache {
    buffer: [u8; SECTOR_SIZE],
    sector: u32,
    status: u8,
    mirror_offset: u32,
}

impl SectorCache {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; SECTOR_SIZE],
            sector: INVALID_SECTOR,
            status: 0,
            mirror_offset: 0,
        }
    }

    /// Sector distance between the first and second FAT copy, or 0 for
    /// single-FAT volumes.
    pub(crate) fn set_mirror_offset(&mut self, offset: u32) {
        self.mirror_offset = offset;
    }

    /// Resident sector number, or `u32::MAX` when empty.
    pub(crate) fn sector(&self) -> u32 {
        self.sector
    }

    /// Whether `count` sectors starting at `sector` overlap the
    /// resident one.
    pub(crate) fn contains(&self, sector: u32, count: u32) -> bool {
        self.sector != INVALID_SECTOR && sector <= self.sector && self.sector < sector + count
    }

    pub(crate) fn prepare<D: BlockDevice>(
        &mut self,
        device: &mut D,
        sector: u32,
        options: u8,
    ) -> Result<&mut [u8; SECTOR_SIZE], D::Error> {
        if self.sector != sector {
            self.flush(device)?;
            if options & CACHE_OPTION_NO_READ == 0 {
                device.read_sector(sector, &mut self.buffer)?;
            }
            self.sector = sector;
        }
        self.status |= options & (CACHE_STATUS_DIRTY | CACHE_STATUS_MIRROR_FAT);
        Ok(&mut self.buffer)
    }

    /// Write the resident sector back if dirty, including the second
    /// FAT copy when flagged.
    pub(crate) fn flush<D: BlockDevice>(&mut self, device: &mut D) -> Result<(), D::Error> {
        if self.status & CACHE_STATUS_DIRTY != 0 {
            device.write_sector(self.sector, &self.buffer)?;
            if self.status & CACHE_STATUS_MIRROR_FAT != 0 && self.mirror_offset != 0 {
                device.write_sector(self.sector + self.mirror_offset, &self.buffer)?;
            }
            self.status = 0;
        }
        Ok(())
    }

    /// Drop the resident sector without writing it back. Only valid
    /// when the caller has just overwritten the same sector range via
    /// direct multi-sector I/O.
    pub(crate) fn invalidate(&mut self) {
        self.sector = INVALID_SECTOR;
        self.status = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdev::RamDisk;

    #[test]
    fn dirty_sector_flushes_on_eviction() {
        let mut disk = RamDisk::new(8);
        let mut cache = SectorCache::new();

        let buf = cache.prepare(&mut disk, 3, CACHE_FOR_WRITE).unwrap();
        buf[0] = 0xAB;
        // Evict by asking for a different sector.
        cache.prepare(&mut disk, 5, CACHE_FOR_READ).unwrap();
        assert_eq!(disk.data[3 * SECTOR_SIZE], 0xAB);
    }

    #[test]
    fn mirror_flag_writes_both_fat_copies() {
        let mut disk = RamDisk::new(16);
        let mut cache = SectorCache::new();
        cache.set_mirror_offset(4);

        let buf = cache
            .prepare(&mut disk, 2, CACHE_FOR_WRITE | CACHE_STATUS_MIRROR_FAT)
            .unwrap();
        buf[10] = 0x5A;
        cache.flush(&mut disk).unwrap();
        assert_eq!(disk.data[2 * SECTOR_SIZE + 10], 0x5A);
        assert_eq!(disk.data[6 * SECTOR_SIZE + 10], 0x5A);
    }

    #[test]
    fn invalidate_discards_without_writing() {
        let mut disk = RamDisk::new(8);
        let mut cache = SectorCache::new();

        let buf = cache.prepare(&mut disk, 1, CACHE_FOR_WRITE).unwrap();
        buf[0] = 0xCC;
        cache.invalidate();
        cache.flush(&mut disk).unwrap();
        assert_eq!(disk.data[SECTOR_SIZE], 0x00);
    }

    #[test]
    fn reserve_for_write_skips_read() {
        let mut disk = RamDisk::new(8);
        disk.data[0] = 0xEE;
        let mut cache = SectorCache::new();

        // Pre-load a different sector so the reserve path has to evict.
        cache.prepare(&mut disk, 2, CACHE_FOR_READ).unwrap();
        let buf = cache.prepare(&mut disk, 0, CACHE_RESERVE_FOR_WRITE).unwrap();
        buf.fill(0x11);
        cache.flush(&mut disk).unwrap();
        assert_eq!(disk.data[0], 0x11);
    }
}
