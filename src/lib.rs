#![cfg_attr(not(test), no_std)]

mod alloc;
mod cache;
mod device;
mod dir_ops;
mod entry;
mod error;
mod file;
mod fs;
mod name;
mod read_write;
mod volume;

pub use device::{BlockDevice, StorageDevice, StorageDeviceError};
pub use entry::{
    fat_date, fat_time, DirEntry, Timestamp, ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_HIDDEN,
    ATTR_READ_ONLY, ATTR_SYSTEM, FAT_DEFAULT_DATE, FAT_DEFAULT_TIME, T_ACCESS, T_CREATE, T_WRITE,
};
pub use error::FatError;
pub use file::{
    FatFile, FilePos, O_APPEND, O_AT_END, O_CREAT, O_EXCL, O_RDWR, O_READ, O_SYNC, O_TRUNC,
    O_WRITE,
};
pub use fs::{FatFileSystem, LS_DATE, LS_R, LS_SIZE};
pub use name::format_short_name;
pub use volume::{DateTimeSource, FatEntry, FatType, FatVolume};

/// Logical sector size in bytes. All supported media use 512-byte sectors.
pub const SECTOR_SIZE: usize = 512;

pub(crate) const SECTOR_SHIFT: u8 = 9;
pub(crate) const SECTOR_MASK: u32 = (SECTOR_SIZE as u32) - 1;

/// Maximum number of 32-byte entries in one directory file.
pub const MAX_DIR_ENTRIES: u32 = 0xFFFF;
