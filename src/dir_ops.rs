//! Directory operations: lookup, creation, deletion, and rename.
//!
//! Directories are scanned through the normal read path, so the cursor
//! and cluster advance logic is shared with file I/O. Slot writes go
//! straight through the volume cache.

use crate::cache::{CACHE_FOR_READ, CACHE_FOR_WRITE};
use crate::device::BlockDevice;
use crate::entry::{
    DirEntry, Timestamp, ATTR_DIRECTORY, ATTR_READ_ONLY, DIR_ENTRY_SIZE, DIR_NAME_DELETED,
    FAT_DEFAULT_DATE, FAT_DEFAULT_TIME,
};
use crate::error::FatError;
use crate::file::{FatFile, O_CREAT, O_EXCL, O_RDWR, O_READ, O_WRITE};
use crate::name::{make_short_name, trim_separators};
use crate::volume::FatVolume;
use crate::SECTOR_SHIFT;

/// Location of one 32-byte slot: its sector and index within it.
#[derive(Clone, Copy)]
struct SlotRef {
    sector: u32,
    index: u8,
}

/// Read the entry at the directory cursor and identify its slot.
/// Returns `None` at the end of the directory.
fn next_dir_slot<D: BlockDevice>(
    dir: &mut FatFile,
    vol: &mut FatVolume<D>,
) -> Result<Option<(DirEntry, SlotRef)>, FatError<D::Error>> {
    let pos = dir.cur_position;
    let mut raw = [0u8; DIR_ENTRY_SIZE];
    let n = dir.read(vol, &mut raw)?;
    if n != DIR_ENTRY_SIZE {
        return Ok(None);
    }
    let sector = if dir.is_root_fixed() {
        vol.root_dir_start() + (pos >> SECTOR_SHIFT)
    } else {
        vol.cluster_start_sector(dir.cur_cluster) + vol.sector_of_cluster(pos) as u32
    };
    let slot = SlotRef {
        sector,
        index: ((pos >> 5) & 0x0F) as u8,
    };
    Ok(Some((DirEntry::from_bytes(&raw), slot)))
}

fn write_slot<D: BlockDevice>(
    vol: &mut FatVolume<D>,
    slot: SlotRef,
    entry: &DirEntry,
) -> Result<(), FatError<D::Error>> {
    let buf = vol.cache_prepare(slot.sector, CACHE_FOR_WRITE)?;
    let off = slot.index as usize * DIR_ENTRY_SIZE;
    buf[off..off + DIR_ENTRY_SIZE].copy_from_slice(entry.bytes());
    Ok(())
}

fn default_timestamp<D: BlockDevice>(vol: &FatVolume<D>) -> Timestamp {
    vol.date_time().map(|now| now()).unwrap_or(Timestamp {
        date: FAT_DEFAULT_DATE,
        time: FAT_DEFAULT_TIME,
    })
}

impl FatFile {
    /// Open a file or directory by path. A leading `/` resolves from
    /// the root; otherwise resolution starts at `base`. `.` and `..`
    /// components follow the reserved directory entries.
    pub fn open<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        base: &FatFile,
        path: &str,
        oflag: u8,
    ) -> Result<Self, FatError<D::Error>> {
        let mut dir = if path.starts_with('/') {
            Self::open_root(vol)?
        } else {
            *base
        };
        if !dir.is_dir() {
            return Err(FatError::NotDirectory);
        }
        let mut path = trim_separators(path);
        if path.is_empty() {
            return Ok(dir);
        }
        loop {
            let (name, rest) = make_short_name(path).ok_or(FatError::InvalidShortName)?;
            let rest = trim_separators(rest);
            if rest.is_empty() {
                return Self::open_in_dir(vol, &mut dir, &name, oflag);
            }
            dir = Self::open_in_dir(vol, &mut dir, &name, O_READ)?;
            if !dir.is_dir() {
                return Err(FatError::NotDirectory);
            }
            path = rest;
        }
    }

    /// Open one 8.3 name inside `dir`, creating it when `O_CREAT` is
    /// set and the name is absent.
    pub(crate) fn open_in_dir<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        dir: &mut FatFile,
        name: &[u8; 11],
        oflag: u8,
    ) -> Result<Self, FatError<D::Error>> {
        if !dir.is_dir() {
            return Err(FatError::NotDirectory);
        }
        dir.rewind();
        let mut reuse: Option<SlotRef> = None;
        loop {
            match next_dir_slot(dir, vol)? {
                None => break,
                Some((entry, slot)) => {
                    if entry.is_free() || entry.is_deleted() {
                        if reuse.is_none() {
                            reuse = Some(slot);
                        }
                        if entry.is_free() {
                            // nothing valid follows a free slot
                            break;
                        }
                    } else if entry.is_file_or_subdir() && entry.name() == *name {
                        if oflag & O_CREAT != 0 && oflag & O_EXCL != 0 {
                            return Err(FatError::AlreadyExists);
                        }
                        return Self::open_from_entry(vol, slot.sector, slot.index, &entry, oflag);
                    }
                }
            }
        }

        if oflag & O_CREAT == 0 {
            return Err(FatError::NotFound);
        }
        if name[0] == b'.' {
            return Err(FatError::InvalidShortName);
        }
        let slot = match reuse {
            Some(slot) => slot,
            None => {
                // no reusable slot: grow the directory
                if dir.is_root_fixed() {
                    return Err(FatError::DirFull);
                }
                dir.add_dir_cluster(vol)?;
                SlotRef {
                    sector: vol.cluster_start_sector(dir.cur_cluster),
                    index: 0,
                }
            }
        };
        let entry = DirEntry::init_created(name, default_timestamp(vol));
        write_slot(vol, slot, &entry)?;
        Self::open_from_entry(vol, slot.sector, slot.index, &entry, oflag)
    }

    /// Open the entry at `index` 32-byte slots into `dir`.
    pub fn open_by_index<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        dir: &mut FatFile,
        index: u16,
        oflag: u8,
    ) -> Result<Self, FatError<D::Error>> {
        if !dir.is_dir() {
            return Err(FatError::NotDirectory);
        }
        dir.seek_set(vol, index as u32 * DIR_ENTRY_SIZE as u32)?;
        match next_dir_slot(dir, vol)? {
            None => Err(FatError::NotFound),
            Some((entry, slot)) => {
                if !entry.is_file_or_subdir() || entry.is_dot() {
                    return Err(FatError::NotFound);
                }
                Self::open_from_entry(vol, slot.sector, slot.index, &entry, oflag)
            }
        }
    }

    /// Open the next file or subdirectory after the cursor of `dir`,
    /// skipping dot, deleted, and long-name slots. `None` at the end.
    pub fn open_next<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        dir: &mut FatFile,
        oflag: u8,
    ) -> Result<Option<Self>, FatError<D::Error>> {
        if !dir.is_dir() {
            return Err(FatError::NotDirectory);
        }
        loop {
            match next_dir_slot(dir, vol)? {
                None => return Ok(None),
                Some((entry, slot)) => {
                    if entry.is_free() {
                        return Ok(None);
                    }
                    if entry.is_deleted() || entry.is_dot() || !entry.is_file_or_subdir() {
                        continue;
                    }
                    return Self::open_from_entry(vol, slot.sector, slot.index, &entry, oflag)
                        .map(Some);
                }
            }
        }
    }

    /// Return the next file or subdirectory entry, or `None` at the
    /// end of the directory.
    pub fn read_dir<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<Option<DirEntry>, FatError<D::Error>> {
        if !self.is_dir() {
            return Err(FatError::NotDirectory);
        }
        loop {
            let mut raw = [0u8; DIR_ENTRY_SIZE];
            if self.read(vol, &mut raw)? != DIR_ENTRY_SIZE {
                return Ok(None);
            }
            let entry = DirEntry::from_bytes(&raw);
            if entry.is_free() {
                return Ok(None);
            }
            if entry.is_deleted() || entry.is_dot() || !entry.is_file_or_subdir() {
                continue;
            }
            return Ok(Some(entry));
        }
    }

    /// Create a directory. With `make_parents`, missing intermediate
    /// components are created as well.
    pub fn mkdir<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        base: &FatFile,
        path: &str,
        make_parents: bool,
    ) -> Result<Self, FatError<D::Error>> {
        let mut dir = if path.starts_with('/') {
            Self::open_root(vol)?
        } else {
            *base
        };
        if !dir.is_dir() {
            return Err(FatError::NotDirectory);
        }
        let mut path = trim_separators(path);
        if path.is_empty() {
            return Err(FatError::AlreadyExists);
        }
        loop {
            let (name, rest) = make_short_name(path).ok_or(FatError::InvalidShortName)?;
            let rest = trim_separators(rest);
            if rest.is_empty() {
                return Self::mkdir_in_dir(vol, &mut dir, &name);
            }
            dir = match Self::open_in_dir(vol, &mut dir, &name, O_READ) {
                Ok(sub) if sub.is_dir() => sub,
                Ok(_) => return Err(FatError::NotDirectory),
                Err(FatError::NotFound) if make_parents => {
                    Self::mkdir_in_dir(vol, &mut dir, &name)?
                }
                Err(e) => return Err(e),
            };
            path = rest;
        }
    }

    fn mkdir_in_dir<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        parent: &mut FatFile,
        name: &[u8; 11],
    ) -> Result<Self, FatError<D::Error>> {
        if name[0] == b'.' {
            return Err(FatError::InvalidShortName);
        }
        let parent_cluster = if parent.is_root() {
            0
        } else {
            parent.first_cluster
        };
        let mut sub = Self::open_in_dir(vol, parent, name, O_CREAT | O_EXCL | O_RDWR)?;
        sub.add_dir_cluster(vol)?;

        // convert the fresh file entry into a directory entry
        let ts = default_timestamp(vol);
        {
            let buf = vol.cache_prepare(sub.dir_sector, CACHE_FOR_WRITE)?;
            let off = sub.dir_index as usize * DIR_ENTRY_SIZE;
            let mut entry = DirEntry::from_bytes(&buf[off..off + DIR_ENTRY_SIZE]);
            entry.set_attributes(ATTR_DIRECTORY);
            entry.set_first_cluster(sub.first_cluster);
            buf[off..off + DIR_ENTRY_SIZE].copy_from_slice(entry.bytes());
        }
        sub.attr = ATTR_DIRECTORY;
        sub.flags = O_READ;
        sub.dir_entry_dirty = false;

        // write the reserved `.` and `..` entries
        let sector = vol.cluster_start_sector(sub.first_cluster);
        {
            let buf = vol.cache_prepare(sector, CACHE_FOR_WRITE)?;
            let mut dot = DirEntry::init_created(b".          ", ts);
            dot.set_attributes(ATTR_DIRECTORY);
            dot.set_first_cluster(sub.first_cluster);
            buf[..DIR_ENTRY_SIZE].copy_from_slice(dot.bytes());
            dot.set_name(b"..         ");
            dot.set_first_cluster(parent_cluster);
            buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(dot.bytes());
        }
        vol.cache_sync()?;
        sub.rewind();
        Ok(sub)
    }

    /// Delete the file: free its clusters and mark the directory entry
    /// deleted. The handle is closed afterwards.
    pub fn remove<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<(), FatError<D::Error>> {
        if !self.is_file() || !self.is_writable() {
            return Err(FatError::WriteProhibited);
        }
        vol.free_chain(self.first_cluster)?;
        {
            let buf = vol.cache_prepare(self.dir_sector, CACHE_FOR_WRITE)?;
            let off = self.dir_index as usize * DIR_ENTRY_SIZE;
            if buf[off] == 0 || buf[off] == DIR_NAME_DELETED {
                return Err(FatError::EntryDeleted);
            }
            buf[off] = DIR_NAME_DELETED;
        }
        self.attr = 0;
        self.flags = 0;
        vol.cache_sync()
    }

    /// Remove an empty directory.
    pub fn rmdir<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<(), FatError<D::Error>> {
        if !self.is_dir() {
            return Err(FatError::NotDirectory);
        }
        if self.is_root() {
            return Err(FatError::WriteProhibited);
        }
        self.rewind();
        loop {
            let mut raw = [0u8; DIR_ENTRY_SIZE];
            if self.read(vol, &mut raw)? != DIR_ENTRY_SIZE {
                break;
            }
            let entry = DirEntry::from_bytes(&raw);
            if entry.is_free() {
                break;
            }
            if entry.is_deleted() || entry.is_dot() {
                continue;
            }
            if entry.is_file_or_subdir() {
                return Err(FatError::NotEmpty);
            }
        }
        // convert to a plain file so the chain and entry can go,
        // bypassing the read-only attribute
        self.attr = crate::file::FILE_ATTR_FILE;
        self.flags |= O_WRITE;
        self.remove(vol)
    }

    /// Recursively delete the directory's contents, then the directory
    /// itself unless it is the root.
    pub fn rm_rf_star<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
    ) -> Result<(), FatError<D::Error>> {
        if !self.is_dir() {
            return Err(FatError::NotDirectory);
        }
        self.rewind();
        loop {
            let index = self.cur_position >> 5;
            let Some((entry, slot)) = next_dir_slot(self, vol)? else {
                break;
            };
            if entry.is_free() {
                break;
            }
            if entry.is_deleted() || entry.is_dot() || !entry.is_file_or_subdir() {
                continue;
            }
            let mut victim = Self::open_from_entry(vol, slot.sector, slot.index, &entry, O_READ)?;
            if victim.is_dir() {
                victim.rm_rf_star(vol)?;
            } else {
                // force write access so read-only files go too
                victim.flags |= O_WRITE;
                victim.remove(vol)?;
            }
            // deletions may have moved the cursor
            if self.cur_position != DIR_ENTRY_SIZE as u32 * (index + 1) {
                self.seek_set(vol, DIR_ENTRY_SIZE as u32 * (index + 1))?;
            }
        }
        if !self.is_root() {
            self.rmdir(vol)?;
        }
        Ok(())
    }

    /// Move or rename to `new_path` resolved against `new_base`. On a
    /// directory move the `..` entry is rewritten for the new parent.
    pub fn rename<D: BlockDevice>(
        &mut self,
        vol: &mut FatVolume<D>,
        new_base: &FatFile,
        new_path: &str,
    ) -> Result<(), FatError<D::Error>> {
        if self.is_root() || !(self.is_file() || self.is_dir()) {
            return Err(FatError::WriteProhibited);
        }
        if self.attr & ATTR_READ_ONLY != 0 {
            return Err(FatError::WriteProhibited);
        }
        self.sync(vol)?;

        let old_slot = SlotRef {
            sector: self.dir_sector,
            index: self.dir_index,
        };
        let old_entry = {
            let buf = vol.cache_prepare(old_slot.sector, CACHE_FOR_READ)?;
            let off = old_slot.index as usize * DIR_ENTRY_SIZE;
            DirEntry::from_bytes(&buf[off..off + DIR_ENTRY_SIZE])
        };
        if old_entry.is_free() || old_entry.is_deleted() {
            return Err(FatError::EntryDeleted);
        }

        // Mark the old entry deleted first so a same-directory rename
        // can reuse the slot.
        {
            let buf = vol.cache_prepare(old_slot.sector, CACHE_FOR_WRITE)?;
            buf[old_slot.index as usize * DIR_ENTRY_SIZE] = DIR_NAME_DELETED;
        }

        let created = if self.is_file() {
            Self::open(vol, new_base, new_path, O_CREAT | O_EXCL | O_WRITE)
        } else {
            Self::mkdir(vol, new_base, new_path, false)
        };
        let dest = match created {
            Ok(dest) => dest,
            Err(e) => {
                // restore the old entry's name byte, best effort
                if let Ok(buf) = vol.cache_prepare(old_slot.sector, CACHE_FOR_WRITE) {
                    buf[old_slot.index as usize * DIR_ENTRY_SIZE] = old_entry.first_byte();
                }
                let _ = vol.cache_sync();
                return Err(e);
            }
        };
        let scratch_cluster = if self.is_dir() { dest.first_cluster } else { 0 };

        self.dir_sector = dest.dir_sector;
        self.dir_index = dest.dir_index;

        // carry everything but the name over to the new entry
        {
            let buf = vol.cache_prepare(self.dir_sector, CACHE_FOR_WRITE)?;
            let off = self.dir_index as usize * DIR_ENTRY_SIZE;
            buf[off + 11..off + DIR_ENTRY_SIZE].copy_from_slice(&old_entry.bytes()[11..]);
        }

        if scratch_cluster != 0 {
            // mkdir built a scratch cluster whose `..` names the new
            // parent; move that entry into the real chain and free the
            // scratch.
            let scratch_sector = vol.cluster_start_sector(scratch_cluster);
            let mut dotdot = [0u8; DIR_ENTRY_SIZE];
            {
                let buf = vol.cache_prepare(scratch_sector, CACHE_FOR_READ)?;
                dotdot.copy_from_slice(&buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);
            }
            vol.free_chain(scratch_cluster)?;
            let own_sector = vol.cluster_start_sector(self.first_cluster);
            let buf = vol.cache_prepare(own_sector, CACHE_FOR_WRITE)?;
            buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot);
        }

        self.dir_entry_dirty = true;
        self.sync(vol)
    }

    /// Create a file backed by `size` bytes of consecutive clusters,
    /// suitable for [`contiguous_range`](Self::contiguous_range) access.
    pub fn create_contiguous<D: BlockDevice>(
        vol: &mut FatVolume<D>,
        base: &FatFile,
        path: &str,
        size: u32,
    ) -> Result<Self, FatError<D::Error>> {
        if size == 0 {
            return Err(FatError::InvalidLength);
        }
        let mut file = Self::open(vol, base, path, O_CREAT | O_EXCL | O_RDWR)?;
        let count = size.div_ceil(vol.bytes_per_cluster());
        match vol.alloc_contiguous(count) {
            Ok(first) => {
                file.first_cluster = first;
                file.file_size = size;
                file.dir_entry_dirty = true;
                file.sync(vol)?;
                Ok(file)
            }
            Err(e) => {
                let _ = file.remove(vol);
                Err(e)
            }
        }
    }
}
