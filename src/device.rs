use embedded_storage::{ReadStorage, Storage};

use crate::SECTOR_SIZE;

/// Sector-addressed storage consumed by the FAT engine.
///
/// Implementations wrap an SD/SDHC transport or any other medium that
/// can move whole 512-byte sectors. The engine treats every error as
/// fatal to the current operation; retry and timeout policy belong to
/// the implementation.
pub trait BlockDevice {
    type Error: core::fmt::Debug;

    fn read_sector(&mut self, sector: u32, dst: &mut [u8; SECTOR_SIZE])
        -> Result<(), Self::Error>;

    fn write_sector(&mut self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error>;

    /// Read consecutive sectors. `dst` length must be a multiple of
    /// [`SECTOR_SIZE`]. Backends with a native multi-sector command
    /// should override the default loop.
    fn read_sectors(&mut self, sector: u32, dst: &mut [u8]) -> Result<(), Self::Error> {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, chunk) in dst.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.read_sector(sector + i as u32, &mut buf)?;
            chunk.copy_from_slice(&buf);
        }
        Ok(())
    }

    /// Write consecutive sectors. `src` length must be a multiple of
    /// [`SECTOR_SIZE`].
    fn write_sectors(&mut self, sector: u32, src: &[u8]) -> Result<(), Self::Error> {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, chunk) in src.chunks_exact(SECTOR_SIZE).enumerate() {
            buf.copy_from_slice(chunk);
            self.write_sector(sector + i as u32, &buf)?;
        }
        Ok(())
    }

    /// Persist any data the device itself buffers.
    fn sync_device(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn is_busy(&mut self) -> bool {
        false
    }
}

/// Failure modes of [`StorageDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDeviceError<E> {
    /// Sector number maps past the 32-bit byte address space of
    /// [`Storage`].
    OutOfRange,
    Storage(E),
}

/// Adapter exposing any byte-addressed [`Storage`] backend as a
/// [`BlockDevice`], sector `n` mapping to byte offset `n * 512`.
pub struct StorageDevice<S> {
    inner: S,
}

impl<S> StorageDevice<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn release(self) -> S {
        self.inner
    }
}

fn byte_offset<E>(sector: u32) -> Result<u32, StorageDeviceError<E>> {
    u32::try_from(sector as u64 * SECTOR_SIZE as u64).map_err(|_| StorageDeviceError::OutOfRange)
}

impl<S: Storage> BlockDevice for StorageDevice<S>
where
    <S as ReadStorage>::Error: core::fmt::Debug,
{
    type Error = StorageDeviceError<<S as ReadStorage>::Error>;

    fn read_sector(
        &mut self,
        sector: u32,
        dst: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), Self::Error> {
        self.inner
            .read(byte_offset(sector)?, dst)
            .map_err(StorageDeviceError::Storage)
    }

    fn write_sector(&mut self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        self.inner
            .write(byte_offset(sector)?, src)
            .map_err(StorageDeviceError::Storage)
    }

    fn read_sectors(&mut self, sector: u32, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.inner
            .read(byte_offset(sector)?, dst)
            .map_err(StorageDeviceError::Storage)
    }

    fn write_sectors(&mut self, sector: u32, src: &[u8]) -> Result<(), Self::Error> {
        self.inner
            .write(byte_offset(sector)?, src)
            .map_err(StorageDeviceError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStore;

    impl ReadStorage for NullStore {
        type Error = ();

        fn read(&mut self, _offset: u32, _bytes: &mut [u8]) -> Result<(), ()> {
            Ok(())
        }

        fn capacity(&self) -> usize {
            usize::MAX
        }
    }

    impl Storage for NullStore {
        fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), ()> {
            Ok(())
        }
    }

    #[test]
    fn sector_past_address_space_is_rejected() {
        let mut dev = StorageDevice::new(NullStore);
        let mut buf = [0u8; SECTOR_SIZE];
        // sector 2^23 starts at byte 2^32, past the Storage offset range
        assert_eq!(
            dev.read_sector(1 << 23, &mut buf),
            Err(StorageDeviceError::OutOfRange)
        );
        assert_eq!(
            dev.write_sector(1 << 23, &buf),
            Err(StorageDeviceError::OutOfRange)
        );
        assert!(dev.read_sector((1 << 23) - 1, &mut buf).is_ok());
    }
}
