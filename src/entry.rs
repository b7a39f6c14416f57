//! Byte-offset codec for on-disk FAT structures: 32-byte directory
//! entries and packed date/time fields. No bit-layout punning; every
//! field goes through an explicit offset so the format round-trips
//! identically on any host.

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub(crate) const ATTR_LONG_NAME: u8 = 0x0F;

/// Attribute bits that carry over into an open file object.
pub(crate) const ATTR_FILE_COPY: u8 =
    ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_DIRECTORY;

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const DIR_NAME_FREE: u8 = 0x00;
pub(crate) const DIR_NAME_DELETED: u8 = 0xE5;

/// Timestamp selector bits for [`FatFile::set_timestamp`](crate::FatFile::set_timestamp).
pub const T_ACCESS: u8 = 0x01;
pub const T_CREATE: u8 = 0x02;
pub const T_WRITE: u8 = 0x04;

/// Default stamps used when no date-time source is installed: 2000-01-01 00:00:00.
pub const FAT_DEFAULT_DATE: u16 = fat_date(2000, 1, 1);
pub const FAT_DEFAULT_TIME: u16 = 0;

/// A packed FAT date/time pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub date: u16,
    pub time: u16,
}

/// Pack a calendar date. Years 1980..=2107.
pub const fn fat_date(year: u16, month: u8, day: u8) -> u16 {
    ((year - 1980) << 9) | ((month as u16) << 5) | day as u16
}

/// Pack a time of day; seconds are stored at two-second resolution.
pub const fn fat_time(hour: u8, minute: u8, second: u8) -> u16 {
    ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 >> 1)
}

pub(crate) fn fat_year(date: u16) -> u16 {
    1980 + (date >> 9)
}

pub(crate) fn fat_month(date: u16) -> u8 {
    ((date >> 5) & 0x0F) as u8
}

pub(crate) fn fat_day(date: u16) -> u8 {
    (date & 0x1F) as u8
}

pub(crate) fn fat_hour(time: u16) -> u8 {
    (time >> 11) as u8
}

pub(crate) fn fat_minute(time: u16) -> u8 {
    ((time >> 5) & 0x3F) as u8
}

pub(crate) fn fat_second(time: u16) -> u8 {
    (2 * (time & 0x1F)) as u8
}

/// One 32-byte directory entry, decoded and re-encoded by explicit
/// byte offsets per the FAT specification.
#[derive(Clone, Copy)]
pub struct DirEntry {
    raw: [u8; DIR_ENTRY_SIZE],
}

impl DirEntry {
    /// Copy an entry out of a sector buffer. `src` must hold at least
    /// 32 bytes.
    pub(crate) fn from_bytes(src: &[u8]) -> Self {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw.copy_from_slice(&src[..DIR_ENTRY_SIZE]);
        Self { raw }
    }

    pub(crate) fn zeroed() -> Self {
        Self {
            raw: [0u8; DIR_ENTRY_SIZE],
        }
    }

    pub(crate) fn bytes(&self) -> &[u8; DIR_ENTRY_SIZE] {
        &self.raw
    }

    pub fn name(&self) -> [u8; 11] {
        let mut name = [0u8; 11];
        name.copy_from_slice(&self.raw[0..11]);
        name
    }

    pub(crate) fn set_name(&mut self, name: &[u8; 11]) {
        self.raw[0..11].copy_from_slice(name);
    }

    pub(crate) fn first_byte(&self) -> u8 {
        self.raw[0]
    }

    pub(crate) fn set_first_byte(&mut self, value: u8) {
        self.raw[0] = value;
    }

    pub fn attributes(&self) -> u8 {
        self.raw[11]
    }

    pub(crate) fn set_attributes(&mut self, attr: u8) {
        self.raw[11] = attr;
    }

    pub fn is_free(&self) -> bool {
        self.first_byte() == DIR_NAME_FREE
    }

    pub fn is_deleted(&self) -> bool {
        self.first_byte() == DIR_NAME_DELETED
    }

    pub fn is_dot(&self) -> bool {
        self.first_byte() == b'.'
    }

    pub fn is_dir(&self) -> bool {
        self.attributes() & ATTR_DIRECTORY != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes() & ATTR_READ_ONLY != 0
    }

    /// True for a plain file or subdirectory entry; false for free,
    /// deleted, long-name, and volume-label slots.
    pub fn is_file_or_subdir(&self) -> bool {
        !self.is_free()
            && !self.is_deleted()
            && self.attributes() != ATTR_LONG_NAME
            && self.attributes() & ATTR_VOLUME_ID == 0
    }

    pub fn first_cluster(&self) -> u32 {
        let low = u16::from_le_bytes([self.raw[26], self.raw[27]]) as u32;
        let high = u16::from_le_bytes([self.raw[20], self.raw[21]]) as u32;
        (high << 16) | low
    }

    pub(crate) fn set_first_cluster(&mut self, cluster: u32) {
        self.raw[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        self.raw[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    }

    pub fn file_size(&self) -> u32 {
        u32::from_le_bytes([self.raw[28], self.raw[29], self.raw[30], self.raw[31]])
    }

    pub(crate) fn set_file_size(&mut self, size: u32) {
        self.raw[28..32].copy_from_slice(&size.to_le_bytes());
    }

    pub fn creation_time_tenths(&self) -> u8 {
        self.raw[13]
    }

    pub(crate) fn set_creation_time_tenths(&mut self, tenths: u8) {
        self.raw[13] = tenths;
    }

    pub fn creation_time(&self) -> u16 {
        u16::from_le_bytes([self.raw[14], self.raw[15]])
    }

    pub(crate) fn set_creation_time(&mut self, time: u16) {
        self.raw[14..16].copy_from_slice(&time.to_le_bytes());
    }

    pub fn creation_date(&self) -> u16 {
        u16::from_le_bytes([self.raw[16], self.raw[17]])
    }

    pub(crate) fn set_creation_date(&mut self, date: u16) {
        self.raw[16..18].copy_from_slice(&date.to_le_bytes());
    }

    pub fn last_access_date(&self) -> u16 {
        u16::from_le_bytes([self.raw[18], self.raw[19]])
    }

    pub(crate) fn set_last_access_date(&mut self, date: u16) {
        self.raw[18..20].copy_from_slice(&date.to_le_bytes());
    }

    pub fn last_write_time(&self) -> u16 {
        u16::from_le_bytes([self.raw[22], self.raw[23]])
    }

    pub(crate) fn set_last_write_time(&mut self, time: u16) {
        self.raw[22..24].copy_from_slice(&time.to_le_bytes());
    }

    pub fn last_write_date(&self) -> u16 {
        u16::from_le_bytes([self.raw[24], self.raw[25]])
    }

    pub(crate) fn set_last_write_date(&mut self, date: u16) {
        self.raw[24..26].copy_from_slice(&date.to_le_bytes());
    }

    /// Initialize a brand-new entry: zeroed fields, the given name, and
    /// creation/access/write stamps from `ts`.
    pub(crate) fn init_created(name: &[u8; 11], ts: Timestamp) -> Self {
        let mut entry = Self::zeroed();
        entry.set_name(name);
        entry.set_creation_date(ts.date);
        entry.set_creation_time(ts.time);
        entry.set_last_access_date(ts.date);
        entry.set_last_write_date(ts.date);
        entry.set_last_write_time(ts.time);
        entry
    }
}
