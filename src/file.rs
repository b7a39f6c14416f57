use crate::alloc::FAT_EOC;
use crate::cache::{CACHE_FOR_READ, CACHE_FOR_WRITE, CACHE_RESERVE_FOR_WRITE};
use crate::device::BlockDevice;
use crate::entry::{
    fat_date, fat_time, DirEntry, ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_FILE_COPY, DIR_ENTRY_SIZE,
    T_ACCESS, T_CREATE, T_WRITE,
};
use crate::error::FatError;
use crate::volume::{FatEntry, FatType, FatVolume};
use crate::{MAX_DIR_ENTRIES, SECTOR_SIZE};

pub const O_READ: u8 = 0x01;
pub const O_WRITE: u8 = 0x02;
pub const O_RDWR: u8 = O_READ | O_WRITE;
/// Every write appends; the position moves to end-of-file first.
pub const O_APPEND: u8 = 0x04;
/// Sync file state to the device after each write.
pub const O_SYNC: u8 = 0x08;
pub const O_CREAT: u8 = 0x10;
/// With `O_CREAT`: fail if the file already exists.
pub const O_EXCL: u8 = 0x20;
pub const O_TRUNC: u8 = 0x40;
/// Position at end-of-file after opening.
pub const O_AT_END: u8 = 0x80;

// Flag bits that persist on the open file.
const FLAGS_KEEP: u8 = O_READ | O_WRITE | O_APPEND | O_SYNC;

// attr bits beyond the on-disk copy: open-file kind markers.
pub(crate) const FILE_ATTR_FILE: u8 = 0x08;
const FILE_ATTR_ROOT_FIXED: u8 = 0x40;
const FILE_ATTR_ROOT32: u8 = 0x80;
const FILE_ATTR_ROOT: u8 = FILE_ATTR_ROOT_FIXED | FILE_ATTR_ROOT32;
const FILE_ATTR_DIR: u8 = ATTR_DIRECTORY | FILE_ATTR_ROOT;

// Directory chains longer than this are treated as corrupt.
const MAX_DIR_SECTORS: u32 = 4096;

/// Saved read/write position, restorable in O(1) via [`FatFile::set_pos`].
#[derive(Debug, Clone, Copy)]
pub struct FilePos {
    pub(crate) position: u32,
    pub(crate) cluster: u32,
}

/// An open file or directory: a cursor over one cluster chain.
///
/// A `FatFile` holds no reference to its volume; every operation takes
/// the [`FatVolume`] explicitly, so handles are plain `Copy` data and
/// cannot outlive or alias the cache they depend on.
#[derive(Debug, Clone, Copy)]
pub struct FatFile {
    pub(crate) attr: u8,
    pub(crate) flags: u8,
    pub(crate) cur_cluster: u32,
    pub(crate) cur_position: u32,
    pub(crate) first_cluster: u32,
    pub(crate) file_size: u32,
    pub(crate) dir_sector: u32,
    pub(crate) dir_index: u8,
    pub(crate) dir_entry_dirty: bool,
    pub(crate) write_error: bool,
}

impl Default for FatFile {
    fn default() -> Self {
        Self::closed()
    }
}

impl FatFile {
    pub const fn closed() -> Self {
        Self {
            attr: 0,
            flags: 0,
            cur_cluster: 0,
            cur_position: 0,
            first_cluster: 0,
            file_size: 0,
            dir_sector: 0,
            dir_index: 0,
            dir_entry_dirty: false,
            write_error: false,
        }
    }

    /// Open the volume's root directory.
    pub fn open_root<D: BlockDevice>(
        vol: &mut FatVolume<D>,
    ) -> Result<Self, FatError<D::Error>> {
        let mut file = Self::closed();
        file.flags = O_READ;
        match vol.fat_type() {
            FatType::Fat12 | FatType::Fat16 => {
                file.attr = FILE_ATTR_ROOT_FIXED;
                file.file_size = DIR_ENTRY_SIZE as u32 * vol.root_dir_entry_count() as u32;
            }
            FatType::Fat32 => {
                file.attr = FILE_ATTR_ROOT32;
                file.first_cluster = vol.root_dir_start();
                file.file_size = dir_chain_size(vol, file.first_cluster)?;
            }
        }
        Ok(file)
    }

    /// Open from a directory entry cached at `sector`/`index`.
    pub(crate) fn open_from_entry<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        sector: u32,
        index: u8,
        entry: &DirEntry,
        oflag: u8,
    ) -> Result<Self, FatError<D::Error>> {
        if !entry.is_file_or_subdir() {
            return Err(FatError::NotFound);
        }
        let attr = entry.attributes() & ATTR_FILE_COPY;
        let first_cluster = entry.first_cluster();

        if attr & ATTR_DIRECTORY != 0 {
            if oflag & O_WRITE != 0 {
                return Err(FatError::WriteProhibited);
            }
            // A `..` entry whose cluster is 0 names the fixed root.
            if first_cluster == 0 {
                return Self::open_root(vol);
            }
        } else if entry.is_read_only() && oflag & O_WRITE != 0 {
            return Err(FatError::WriteProhibited);
        }

        let mut file = Self::closed();
        file.attr = if attr & ATTR_DIRECTORY != 0 {
            attr
        } else {
            attr | FILE_ATTR_FILE
        };
        file.flags = oflag & FLAGS_KEEP;
        file.first_cluster = first_cluster;
        file.dir_sector = sector;
        file.dir_index = index;
        file.file_size = if file.is_dir() {
            dir_chain_size(vol, first_cluster)?
        } else {
            entry.file_size()
        };

        if oflag & O_TRUNC != 0 {
            if oflag & O_WRITE == 0 {
                return Err(FatError::WriteProhibited);
            }
            file.truncate(vol, 0)?;
        }
        if oflag & O_AT_END != 0 {
            file.seek_end(vol, 0)?;
        }
        Ok(file)
    }

    pub fn is_open(&self) -> bool {
        self.attr != 0
    }

    pub fn is_dir(&self) -> bool {
        self.attr & FILE_ATTR_DIR != 0
    }

    pub fn is_file(&self) -> bool {
        self.attr & FILE_ATTR_FILE != 0
    }

    pub fn is_root(&self) -> bool {
        self.attr & FILE_ATTR_ROOT != 0
    }

    pub(crate) fn is_root_fixed(&self) -> bool {
        self.attr & FILE_ATTR_ROOT_FIXED != 0
    }

    pub fn is_readable(&self) -> bool {
        self.is_open() && self.flags & O_READ != 0
    }

    pub fn is_writable(&self) -> bool {
        self.is_open() && self.flags & O_WRITE != 0
    }

    /// On-disk attribute bits (read-only, hidden, system, directory).
    pub fn attributes(&self) -> u8 {
        self.attr & ATTR_FILE_COPY
    }

    pub fn size(&self) -> u32 {
        self.file_size
    }

    pub fn position(&self) -> u32 {
        self.cur_position
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// Sticky write-failure flag; cleared explicitly.
    pub fn has_write_error(&self) -> bool {
        self.write_error
    }

    pub fn clear_write_error(&mut self) {
        self.write_error = false;
    }

    /// Set the position. Seeking a file past its size fails; cluster
    /// walking restarts from the first cluster only when moving
    /// backwards.
    pub fn seek_set<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        pos: u32,
    ) -> Result<(), FatError<D::Error>> {
        if !self.is_open() {
            return Err(FatError::NotOpen);
        }
        if pos > self.file_size {
            return Err(FatError::SeekPastEnd);
        }
        if pos == 0 {
            self.cur_cluster = 0;
            self.cur_position = 0;
            return Ok(());
        }
        if self.is_root_fixed() {
            self.cur_position = pos;
            return Ok(());
        }
        let shift = vol.sectors_per_cluster_shift() + 9;
        let n_new = (pos - 1) >> shift;
        let steps = if self.cur_position == 0 || n_new < (self.cur_position - 1) >> shift {
            self.cur_cluster = self.first_cluster;
            n_new
        } else {
            n_new - ((self.cur_position - 1) >> shift)
        };
        for _ in 0..steps {
            match vol.fat_get(self.cur_cluster)? {
                FatEntry::Next(next) => self.cur_cluster = next,
                _ => return Err(FatError::CorruptChain),
            }
        }
        self.cur_position = pos;
        Ok(())
    }

    pub fn seek_cur<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        offset: i32,
    ) -> Result<(), FatError<D::Error>> {
        let target = self.cur_position as i64 + offset as i64;
        if !(0..=u32::MAX as i64).contains(&target) {
            return Err(FatError::InvalidPosition);
        }
        self.seek_set(vol, target as u32)
    }

    pub fn seek_end<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        offset: i32,
    ) -> Result<(), FatError<D::Error>> {
        let target = self.file_size as i64 + offset as i64;
        if !(0..=u32::MAX as i64).contains(&target) {
            return Err(FatError::InvalidPosition);
        }
        self.seek_set(vol, target as u32)
    }

    pub fn rewind(&mut self) {
        self.cur_cluster = 0;
        self.cur_position = 0;
    }

    /// Snapshot the cursor for O(1) restore with [`set_pos`](Self::set_pos).
    pub fn get_pos(&self) -> FilePos {
        FilePos {
            position: self.cur_position,
            cluster: self.cur_cluster,
        }
    }

    pub fn set_pos(&mut self, pos: &FilePos) {
        self.cur_position = pos.position;
        self.cur_cluster = pos.cluster;
    }

    /// Shrink the file to `length` bytes, freeing the cluster tail.
    /// The position moves back to `length` if it was beyond it.
    pub fn truncate<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        length: u32,
    ) -> Result<(), FatError<D::Error>> {
        if !self.is_file() || !self.is_writable() {
            return Err(FatError::WriteProhibited);
        }
        if length > self.file_size {
            return Err(FatError::InvalidLength);
        }
        let new_pos = self.cur_position.min(length);
        if length == 0 {
            vol.free_chain(self.first_cluster)?;
            self.first_cluster = 0;
            self.cur_cluster = 0;
            self.cur_position = 0;
        } else {
            self.seek_set(vol, length)?;
            match vol.fat_get(self.cur_cluster)? {
                FatEntry::Next(next) => {
                    vol.free_chain(next)?;
                    vol.fat_put(self.cur_cluster, FAT_EOC)?;
                }
                FatEntry::EndOfChain => {}
                FatEntry::Free => return Err(FatError::CorruptChain),
            }
        }
        self.file_size = length;
        self.dir_entry_dirty = true;
        self.seek_set(vol, new_pos)
    }

    /// Write pending file state into the directory entry and flush the
    /// cache to the device.
    pub fn sync<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<(), FatError<D::Error>> {
        if !self.is_open() {
            return Err(FatError::NotOpen);
        }
        if self.dir_entry_dirty {
            if self.is_root() {
                self.dir_entry_dirty = false;
            } else {
                let ts = vol.date_time().map(|now| now());
                let result: Result<(), FatError<D::Error>> = (|| {
                    let buf = vol.cache_prepare(self.dir_sector, CACHE_FOR_WRITE)?;
                    let off = self.dir_index as usize * DIR_ENTRY_SIZE;
                    let mut entry = DirEntry::from_bytes(&buf[off..off + DIR_ENTRY_SIZE]);
                    if entry.is_free() || entry.is_deleted() {
                        return Err(FatError::EntryDeleted);
                    }
                    if !self.is_dir() {
                        entry.set_file_size(self.file_size);
                        entry.set_attributes(entry.attributes() | ATTR_ARCHIVE);
                    }
                    entry.set_first_cluster(self.first_cluster);
                    if let Some(ts) = ts {
                        entry.set_last_access_date(ts.date);
                        entry.set_last_write_date(ts.date);
                        entry.set_last_write_time(ts.time);
                    }
                    buf[off..off + DIR_ENTRY_SIZE].copy_from_slice(entry.bytes());
                    Ok(())
                })();
                if let Err(e) = result {
                    self.write_error = true;
                    return Err(e);
                }
                self.dir_entry_dirty = false;
            }
        }
        vol.cache_sync().inspect_err(|_| self.write_error = true)
    }

    /// Sync and mark the handle closed.
    pub fn close<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<(), FatError<D::Error>> {
        let result = self.sync(vol);
        self.attr = 0;
        self.flags = 0;
        result
    }

    /// Append one cluster to the chain, making it current.
    pub(crate) fn add_cluster<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<(), FatError<D::Error>> {
        self.cur_cluster = vol.allocate_cluster(self.cur_cluster)?;
        if self.first_cluster == 0 {
            self.first_cluster = self.cur_cluster;
            self.dir_entry_dirty = true;
        }
        Ok(())
    }

    /// Append a zero-filled cluster to a directory chain.
    pub(crate) fn add_dir_cluster<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<(), FatError<D::Error>> {
        if self.cur_position >= DIR_ENTRY_SIZE as u32 * MAX_DIR_ENTRIES {
            return Err(FatError::DirFull);
        }
        self.add_cluster(vol)?;
        let start = vol.cluster_start_sector(self.cur_cluster);
        {
            let buf = vol.cache_prepare(start, CACHE_RESERVE_FOR_WRITE)?;
            buf.fill(0);
        }
        let zero = [0u8; SECTOR_SIZE];
        for i in 1..vol.sectors_per_cluster() as u32 {
            vol.write_sector_direct(start + i, &zero)?;
        }
        self.file_size += vol.bytes_per_cluster();
        self.cur_position = self.file_size;
        Ok(())
    }

    /// Read back this file's directory entry, syncing pending state
    /// first.
    pub fn dir_entry<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<DirEntry, FatError<D::Error>> {
        if !self.is_open() || self.is_root() {
            return Err(FatError::NotOpen);
        }
        self.sync(vol)?;
        let buf = vol.cache_prepare(self.dir_sector, CACHE_FOR_READ)?;
        let off = self.dir_index as usize * DIR_ENTRY_SIZE;
        Ok(DirEntry::from_bytes(&buf[off..off + DIR_ENTRY_SIZE]))
    }

    /// Overwrite the timestamps selected by `which` (`T_ACCESS`,
    /// `T_CREATE`, `T_WRITE`).
    #[allow(clippy::too_many_arguments)]
    pub fn set_timestamp<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        which: u8,
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<(), FatError<D::Error>> {
        if !(1980..=2107).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return Err(FatError::InvalidTimestamp);
        }
        if !self.is_open() || self.is_root() {
            return Err(FatError::NotOpen);
        }
        let date = fat_date(year, month, day);
        let time = fat_time(hour, minute, second);
        {
            let buf = vol.cache_prepare(self.dir_sector, CACHE_FOR_WRITE)?;
            let off = self.dir_index as usize * DIR_ENTRY_SIZE;
            let mut entry = DirEntry::from_bytes(&buf[off..off + DIR_ENTRY_SIZE]);
            if which & T_ACCESS != 0 {
                entry.set_last_access_date(date);
            }
            if which & T_CREATE != 0 {
                entry.set_creation_date(date);
                entry.set_creation_time(time);
                entry.set_creation_time_tenths(0);
            }
            if which & T_WRITE != 0 {
                entry.set_last_write_date(date);
                entry.set_last_write_time(time);
            }
            buf[off..off + DIR_ENTRY_SIZE].copy_from_slice(entry.bytes());
        }
        vol.cache_sync()
    }

    /// First and last sector of the file when its clusters are
    /// consecutive on the device, for direct DMA-style access.
    pub fn contiguous_range<D: BlockDevice>(
        &self,
        vol: &mut FatVolume<D>,
    ) -> Result<(u32, u32), FatError<D::Error>> {
        if self.first_cluster < 2 {
            return Err(FatError::NotContiguous);
        }
        let mut cluster = self.first_cluster;
        loop {
            match vol.fat_get(cluster)? {
                FatEntry::Next(next) if next == cluster + 1 => cluster = next,
                FatEntry::Next(_) => return Err(FatError::NotContiguous),
                FatEntry::EndOfChain => break,
                FatEntry::Free => return Err(FatError::CorruptChain),
            }
        }
        let first = vol.cluster_start_sector(self.first_cluster);
        let last = vol.cluster_start_sector(cluster) + vol.sectors_per_cluster() as u32 - 1;
        Ok((first, last))
    }
}

/// Byte size of a directory chain, derived by walking the FAT.
fn dir_chain_size<D: BlockDevice>(
    vol: &mut FatVolume<D>,
    first: u32,
) -> Result<u32, FatError<D::Error>> {
    let spc = vol.sectors_per_cluster() as u32;
    let mut sectors = 0u32;
    let mut cluster = first;
    loop {
        sectors += spc;
        if sectors > MAX_DIR_SECTORS {
            return Err(FatError::ClusterChainTooLong);
        }
        match vol.fat_get(cluster)? {
            FatEntry::Next(next) => cluster = next,
            FatEntry::EndOfChain => return Ok(sectors << 9),
            FatEntry::Free => return Err(FatError::CorruptChain),
        }
    }
}
