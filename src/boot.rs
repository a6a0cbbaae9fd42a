use packing::{Packed, PackedSize};

use crate::config::SECTOR_SIZE;
use crate::Config;

/// Boot sector signature stored in the final two bytes
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Encodable FAT32 Boot Block object
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
#[packed(little_endian, lsb0)]
pub struct FatBootBlock {
    #[pkd(7, 0, 0, 2)]
    pub jump_instruction: [u8; 3],

    #[pkd(7, 0, 3, 10)]
    pub oem_info: [u8; 8],

    #[pkd(7, 0, 11, 12)]
    pub bytes_per_sector: u16,

    #[pkd(7, 0, 13, 13)]
    pub sectors_per_cluster: u8,

    #[pkd(7, 0, 14, 15)]
    pub reserved_sectors: u16,

    #[pkd(7, 0, 16, 16)]
    pub fat_copies: u8,

    #[pkd(7, 0, 17, 18)]
    pub root_directory_entries: u16,

    #[pkd(7, 0, 19, 20)]
    pub total_sectors16: u16,

    #[pkd(7, 0, 21, 21)]
    pub media_descriptor: u8,

    #[pkd(7, 0, 22, 23)]
    pub sectors_per_fat16: u16,

    #[pkd(7, 0, 24, 25)]
    pub sectors_per_track: u16,

    #[pkd(7, 0, 26, 27)]
    pub heads: u16,

    #[pkd(7, 0, 28, 31)]
    pub hidden_sectors: u32,

    #[pkd(7, 0, 32, 35)]
    pub total_sectors32: u32,

    #[pkd(7, 0, 36, 39)]
    pub sectors_per_fat32: u32,

    #[pkd(7, 0, 40, 41)]
    pub ext_flags: u16,

    #[pkd(7, 0, 42, 43)]
    pub fs_version: u16,

    #[pkd(7, 0, 44, 47)]
    pub root_cluster: u32,

    #[pkd(7, 0, 48, 49)]
    pub fs_info_sector: u16,

    #[pkd(7, 0, 50, 51)]
    pub backup_boot_sector: u16,

    #[pkd(7, 0, 52, 55)]
    _reserved0: u32,

    #[pkd(7, 0, 56, 59)]
    _reserved1: u32,

    #[pkd(7, 0, 60, 63)]
    _reserved2: u32,

    #[pkd(7, 0, 64, 64)]
    pub physical_drive_num: u8,

    #[pkd(7, 0, 65, 65)]
    _reserved3: u8,

    #[pkd(7, 0, 66, 66)]
    pub extended_boot_sig: u8,

    #[pkd(7, 0, 67, 70)]
    pub volume_serial_number: u32,

    #[pkd(7, 0, 71, 81)]
    pub volume_label: [u8; 11],

    #[pkd(7, 0, 82, 89)]
    pub filesystem_identifier: [u8; 8],
}

impl FatBootBlock {

    /// Create a new FAT32 BootBlock with the provided config
    pub fn new(config: &Config) -> FatBootBlock {

        let mut fat = FatBootBlock {
            jump_instruction: [0xEB, 0x58, 0x90],
            oem_info: [0x20; 8],
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster: config.sectors_per_cluster as u8,
            reserved_sectors: config.reserved_sectors as u16,
            fat_copies: 1,
            root_directory_entries: 0,
            total_sectors16: 0,
            media_descriptor: 0xF8,
            sectors_per_fat16: 0,
            sectors_per_track: 63,
            heads: 255,
            hidden_sectors: 0,
            total_sectors32: config.num_blocks,
            sectors_per_fat32: config.sectors_per_fat(),
            ext_flags: 0,
            fs_version: 0,
            root_cluster: config.root_cluster(),
            fs_info_sector: config.fs_info_sector() as u16,
            backup_boot_sector: config.backup_boot_sector as u16,
            _reserved0: 0,
            _reserved1: 0,
            _reserved2: 0,
            physical_drive_num: 0x80,
            _reserved3: 0,
            extended_boot_sig: 0x29,
            volume_serial_number: config.volume_serial,
            volume_label: [0x20; 11],
            filesystem_identifier: [0x20; 8],
        };

        let len = usize::min(fat.oem_info.len(), config.oem_info.as_bytes().len());
        fat.oem_info[..len].copy_from_slice(&config.oem_info.as_bytes()[..len]);

        let len = usize::min(fat.volume_label.len(), config.volume_label.as_bytes().len());
        fat.volume_label[..len].copy_from_slice(&config.volume_label.as_bytes()[..len]);

        let len = usize::min(fat.filesystem_identifier.len(), config.filesystem_identifier.as_bytes().len());
        fat.filesystem_identifier[..len].copy_from_slice(&config.filesystem_identifier.as_bytes()[..len]);

        crate::debug!("BootBlock: {:?}", fat);

        fat
    }

    /// Encode the boot block and signature into a full sector
    pub fn encode(&self, sector: &mut [u8]) -> Result<(), packing::Error> {
        sector.fill(0);
        self.pack(&mut sector[..Self::BYTES])?;
        sector[SECTOR_SIZE - 2..SECTOR_SIZE].copy_from_slice(&BOOT_SIGNATURE);
        Ok(())
    }
}

/// FAT32 FSINFO sector contents
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub struct FsInfo {
    /// Free cluster hint, zero advertises a full volume
    pub free_clusters: u32,
    /// Next free cluster hint, all-ones when unknown
    pub next_free: u32,
}

impl FsInfo {
    pub const LEAD_SIGNATURE: u32 = 0x4161_5252;
    pub const STRUCT_SIGNATURE: u32 = 0x6141_7272;
    pub const TRAIL_SIGNATURE: u32 = 0xAA55_0000;

    const STRUCT_OFFSET: usize = 484;

    pub fn new() -> Self {
        Self { free_clusters: 0, next_free: 0xFFFF_FFFF }
    }

    /// Encode into a full sector
    pub fn encode(&self, sector: &mut [u8]) {
        sector.fill(0);
        sector[0..4].copy_from_slice(&Self::LEAD_SIGNATURE.to_le_bytes());

        let s = &mut sector[Self::STRUCT_OFFSET..SECTOR_SIZE];
        s[0..4].copy_from_slice(&Self::STRUCT_SIGNATURE.to_le_bytes());
        s[4..8].copy_from_slice(&self.free_clusters.to_le_bytes());
        s[8..12].copy_from_slice(&self.next_free.to_le_bytes());
        s[24..28].copy_from_slice(&Self::TRAIL_SIGNATURE.to_le_bytes());
    }
}

impl Default for FsInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_block_fields() {
        let c = Config::default();
        let mut sector = [0u8; SECTOR_SIZE];
        FatBootBlock::new(&c).encode(&mut sector).unwrap();

        assert_eq!(&sector[3..11], b"RADIOFAT");
        assert_eq!(u16::from_le_bytes([sector[11], sector[12]]), 512);
        assert_eq!(sector[13], 64);
        assert_eq!(u16::from_le_bytes([sector[14], sector[15]]), 32);
        assert_eq!(sector[16], 1);
        assert_eq!(u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]), c.num_blocks);
        assert_eq!(u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]), 768);
        assert_eq!(u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]), 2);
        assert_eq!(&sector[71..82], b"RADIO      ");
        assert_eq!(&sector[82..90], b"FAT32   ");
        assert_eq!(&sector[510..], &BOOT_SIGNATURE);
    }

    #[test]
    fn fs_info_signatures() {
        let mut sector = [0xAAu8; SECTOR_SIZE];
        FsInfo::new().encode(&mut sector);

        assert_eq!(&sector[0..4], b"RRaA");
        assert_eq!(&sector[484..488], b"rrAa");
        assert_eq!(&sector[492..496], &[0xFF; 4]);
        assert_eq!(&sector[508..512], &[0x00, 0x00, 0x55, 0xAA]);
        assert!(sector[4..484].iter().all(|b| *b == 0));
    }
}
