//! Volume facade: a mounted volume plus a working directory, with
//! path-based convenience operations and directory listing.

use core::fmt::Write;

use crate::device::BlockDevice;
use crate::entry::{fat_day, fat_hour, fat_minute, fat_month, fat_second, fat_year, DirEntry};
use crate::error::FatError;
use crate::file::{FatFile, O_READ, O_WRITE};
use crate::name::format_short_name;
use crate::volume::{DateTimeSource, FatVolume};

/// Print modification date and time in [`FatFileSystem::ls`].
pub const LS_DATE: u8 = 0x01;
/// Print file sizes.
pub const LS_SIZE: u8 = 0x02;
/// Recurse into subdirectories.
pub const LS_R: u8 = 0x04;

/// A mounted volume with a current working directory. Relative paths
/// resolve against the working directory; absolute paths against the
/// root.
pub struct FatFileSystem<D: BlockDevice> {
    vol: FatVolume<D>,
    vwd: FatFile,
}

impl<D: BlockDevice> FatFileSystem<D> {
    pub fn mount(
        device: D,
        partition: u8,
        start_sector: u32,
    ) -> Result<Self, FatError<D::Error>> {
        let mut vol = FatVolume::mount(device, partition, start_sector)?;
        let vwd = FatFile::open_root(&mut vol)?;
        Ok(Self { vol, vwd })
    }

    pub fn volume(&mut self) -> &mut FatVolume<D> {
        &mut self.vol
    }

    pub fn vwd(&self) -> FatFile {
        self.vwd
    }

    pub fn open(&mut self, path: &str, oflag: u8) -> Result<FatFile, FatError<D::Error>> {
        FatFile::open(&mut self.vol, &self.vwd, path, oflag)
    }

    /// Change the working directory.
    pub fn chdir(&mut self, path: &str) -> Result<(), FatError<D::Error>> {
        let dir = FatFile::open(&mut self.vol, &self.vwd, path, O_READ)?;
        if !dir.is_dir() {
            return Err(FatError::NotDirectory);
        }
        self.vwd = dir;
        Ok(())
    }

    pub fn exists(&mut self, path: &str) -> bool {
        FatFile::open(&mut self.vol, &self.vwd, path, O_READ).is_ok()
    }

    pub fn mkdir(&mut self, path: &str, make_parents: bool) -> Result<FatFile, FatError<D::Error>> {
        FatFile::mkdir(&mut self.vol, &self.vwd, path, make_parents)
    }

    pub fn remove(&mut self, path: &str) -> Result<(), FatError<D::Error>> {
        let mut file = self.open(path, O_WRITE)?;
        file.remove(&mut self.vol)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), FatError<D::Error>> {
        let mut dir = self.open(path, O_READ)?;
        dir.rmdir(&mut self.vol)
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), FatError<D::Error>> {
        let mut file = self.open(old_path, O_READ)?;
        let vwd = self.vwd;
        file.rename(&mut self.vol, &vwd, new_path)
    }

    /// Flush cached state to the device.
    pub fn sync(&mut self) -> Result<(), FatError<D::Error>> {
        self.vol.cache_sync()
    }

    pub fn set_date_time(&mut self, source: Option<DateTimeSource>) {
        self.vol.set_date_time(source);
    }

    /// Give the device back, discarding unsynced cache contents.
    pub fn release(self) -> D {
        self.vol.release()
    }

    /// List the directory at `path` into `out`. Formatting failures in
    /// `out` are ignored; device errors are not.
    pub fn ls<W: Write>(
        &mut self,
        out: &mut W,
        path: &str,
        flags: u8,
    ) -> Result<(), FatError<D::Error>> {
        let mut dir = self.open(path, O_READ)?;
        if !dir.is_dir() {
            return Err(FatError::NotDirectory);
        }
        Self::ls_dir(&mut self.vol, out, &mut dir, flags, 0)
    }

    fn ls_dir<W: Write>(
        vol: &mut FatVolume<D>,
        out: &mut W,
        dir: &mut FatFile,
        flags: u8,
        depth: usize,
    ) -> Result<(), FatError<D::Error>> {
        dir.rewind();
        while let Some(entry) = dir.read_dir(vol)? {
            let index = (dir.cur_position / 32 - 1) as u16;
            for _ in 0..depth {
                let _ = out.write_str("  ");
            }
            if flags & LS_DATE != 0 {
                Self::write_date_time(out, &entry);
            }
            if flags & LS_SIZE != 0 {
                if entry.is_dir() {
                    let _ = out.write_str("           ");
                } else {
                    let _ = write!(out, "{:>10} ", entry.file_size());
                }
            }
            let _ = out.write_str(format_short_name(&entry.name()).as_str());
            if entry.is_dir() {
                let _ = out.write_char('/');
            }
            let _ = out.write_char('\n');
            if flags & LS_R != 0 && entry.is_dir() {
                let mut sub = FatFile::open_by_index(vol, dir, index, O_READ)?;
                Self::ls_dir(vol, out, &mut sub, flags, depth + 1)?;
            }
        }
        Ok(())
    }

    fn write_date_time<W: Write>(out: &mut W, entry: &DirEntry) {
        let date = entry.last_write_date();
        let time = entry.last_write_time();
        let _ = write!(
            out,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02} ",
            fat_year(date),
            fat_month(date),
            fat_day(date),
            fat_hour(time),
            fat_minute(time),
            fat_second(time),
        );
    }
}
