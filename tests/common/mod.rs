//! In-memory devices preformatted with small FAT12/16/32 layouts.
#![allow(dead_code)]

use sdfat::{BlockDevice, SECTOR_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange;

pub struct RamDisk {
    pub data: Vec<u8>,
}

impl RamDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            data: vec![0u8; sectors as usize * SECTOR_SIZE],
        }
    }
}

impl BlockDevice for RamDisk {
    type Error = OutOfRange;

    fn read_sector(&mut self, sector: u32, dst: &mut [u8; SECTOR_SIZE]) -> Result<(), OutOfRange> {
        let start = sector as usize * SECTOR_SIZE;
        let src = self.data.get(start..start + SECTOR_SIZE).ok_or(OutOfRange)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn write_sector(&mut self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<(), OutOfRange> {
        let start = sector as usize * SECTOR_SIZE;
        let dst = self
            .data
            .get_mut(start..start + SECTOR_SIZE)
            .ok_or(OutOfRange)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

fn write_boot_common(boot: &mut [u8], spc: u8, reserved: u16, root_entries: u16) {
    boot[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
    boot[13] = spc;
    boot[14..16].copy_from_slice(&reserved.to_le_bytes());
    boot[16] = 2;
    boot[17..19].copy_from_slice(&root_entries.to_le_bytes());
    boot[510] = 0x55;
    boot[511] = 0xAA;
}

/// 2048 sectors, 1 sector/cluster, two 6-sector FATs, 512 root
/// entries: 2003 clusters, FAT12.
pub fn fat12_image() -> RamDisk {
    let mut disk = RamDisk::new(2048);
    {
        let boot = &mut disk.data[..SECTOR_SIZE];
        write_boot_common(boot, 1, 1, 512);
        boot[19..21].copy_from_slice(&2048u16.to_le_bytes());
        boot[22..24].copy_from_slice(&6u16.to_le_bytes());
    }
    // reserved FAT entries 0 and 1, both copies
    for fat_start in [1usize, 7] {
        disk.data[fat_start * SECTOR_SIZE..fat_start * SECTOR_SIZE + 3]
            .copy_from_slice(&[0xF8, 0xFF, 0xFF]);
    }
    disk
}

/// 8192 sectors, 1 sector/cluster, two 32-sector FATs, 512 root
/// entries: 8095 clusters, FAT16. Data area starts at sector 97.
pub fn fat16_image() -> RamDisk {
    let mut disk = RamDisk::new(8192);
    {
        let boot = &mut disk.data[..SECTOR_SIZE];
        write_boot_common(boot, 1, 1, 512);
        boot[19..21].copy_from_slice(&8192u16.to_le_bytes());
        boot[22..24].copy_from_slice(&32u16.to_le_bytes());
    }
    for fat_start in [1usize, 33] {
        disk.data[fat_start * SECTOR_SIZE..fat_start * SECTOR_SIZE + 4]
            .copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
    }
    disk
}

/// 70000 sectors, 1 sector/cluster, two 544-sector FATs, root at
/// cluster 2: 68880 clusters, FAT32.
pub fn fat32_image() -> RamDisk {
    let mut disk = RamDisk::new(70000);
    {
        let boot = &mut disk.data[..SECTOR_SIZE];
        write_boot_common(boot, 1, 32, 0);
        boot[32..36].copy_from_slice(&70000u32.to_le_bytes());
        boot[36..40].copy_from_slice(&544u32.to_le_bytes());
        boot[44..48].copy_from_slice(&2u32.to_le_bytes());
    }
    for fat_start in [32usize, 576] {
        let fat = &mut disk.data[fat_start * SECTOR_SIZE..];
        fat[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
        fat[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        // root directory cluster
        fat[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
    }
    disk
}

/// 8192 sectors whose boot sector claims far more clusters than its
/// single-sector FATs (256 entries) can describe. Data area starts at
/// sector 35.
pub fn fat16_overclaimed_image() -> RamDisk {
    let mut disk = RamDisk::new(8192);
    {
        let boot = &mut disk.data[..SECTOR_SIZE];
        write_boot_common(boot, 1, 1, 512);
        boot[19..21].copy_from_slice(&8192u16.to_le_bytes());
        boot[22..24].copy_from_slice(&1u16.to_le_bytes());
    }
    for fat_start in [1usize, 2] {
        disk.data[fat_start * SECTOR_SIZE..fat_start * SECTOR_SIZE + 4]
            .copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
    }
    disk
}

/// MBR disk with one FAT16 partition starting at LBA 2048.
pub fn mbr_fat16_image() -> RamDisk {
    let mut disk = RamDisk::new(2048 + 8192);
    {
        let mbr = &mut disk.data[..SECTOR_SIZE];
        mbr[446 + 4] = 0x06;
        mbr[446 + 8..446 + 12].copy_from_slice(&2048u32.to_le_bytes());
        mbr[510] = 0x55;
        mbr[511] = 0xAA;
    }
    let base = 2048 * SECTOR_SIZE;
    {
        let boot = &mut disk.data[base..base + SECTOR_SIZE];
        write_boot_common(boot, 1, 1, 512);
        boot[19..21].copy_from_slice(&8192u16.to_le_bytes());
        boot[22..24].copy_from_slice(&32u16.to_le_bytes());
    }
    for fat_start in [2048 + 1, 2048 + 33] {
        disk.data[fat_start * SECTOR_SIZE..fat_start * SECTOR_SIZE + 4]
            .copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
    }
    disk
}

/// Deterministic byte pattern for data integrity checks.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
