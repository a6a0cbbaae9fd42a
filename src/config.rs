
use crate::error::ConfigError;

/// Bytes per sector, also the size of one captured audio block
pub const SECTOR_SIZE: usize = 512;

/// Bytes per FAT32 allocation table entry
pub const FAT_ENTRY_BYTES: usize = 4;

/// Bytes per directory entry
pub const DIR_ENTRY_BYTES: usize = 32;

/// Characters carried by one long file name fragment
pub const LFN_CHARS_PER_ENTRY: usize = 13;

/// Longest long file name FAT allows
pub const LFN_MAX_CHARS: usize = 255;

/// Clusters reserved per secondary station file, one alias link plus EOC
pub const SECONDARY_FILE_CLUSTERS: u32 = 2;

/// Largest cluster the boot record's 8 bit field can describe
pub const MAX_SECTORS_PER_CLUSTER: u32 = 128;

/// Fewest clusters hosts classify as FAT32
pub const MIN_FAT32_CLUSTERS: u32 = 65_525;

/// Length of the longest station file name, `"108_0_MHz.wav"`
pub const MIN_FILE_NAME_LEN: usize = 13;

/// Virtual volume configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Number of sectors in the volume, defaults to 3 GiB worth
    pub num_blocks: u32,
    /// Reserved sectors ahead of the FAT
    pub reserved_sectors: u32,
    /// Sectors per allocation cluster
    pub sectors_per_cluster: u32,
    /// Sector holding the backup boot record
    pub backup_boot_sector: u32,

    /// Number of station files listed in the root directory
    pub root_files: usize,
    /// Length of each station file's long name, including the ".wav" suffix
    pub file_name_len: usize,
    /// Declared size of the stream file every station file aliases, defaults to 2 GiB
    pub stream_file_bytes: u32,

    /// OEM info, defaults to "RADIOFAT"
    pub oem_info: &'static str,

    /// Volume label, defaults to "RADIO"
    pub volume_label: &'static str,

    /// FileSystem Identifier, defaults to "FAT32"
    pub filesystem_identifier: &'static str,

    /// Volume serial number written to the boot block
    pub volume_serial: u32,

    /// Force use of Default::default() for construction
    _reserved: (),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_blocks: 6 * 1024 * 1024,
            reserved_sectors: 32,
            sectors_per_cluster: 64,
            backup_boot_sector: 6,
            root_files: 32,
            file_name_len: 64,
            stream_file_bytes: 0x8000_0000,
            oem_info: "RADIOFAT",
            volume_label: "RADIO",
            filesystem_identifier: "FAT32",
            volume_serial: 0x0042_0042,
            _reserved: (),
        }
    }
}

impl Config {

    /// Fetch the block/sector size
    pub const fn sector_size(&self) -> u32 {
        SECTOR_SIZE as u32
    }

    /// Bytes per allocation cluster
    pub const fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster * SECTOR_SIZE as u32
    }

    /// Calculate number of sectors per FAT (single FAT copy)
    pub const fn sectors_per_fat(&self) -> u32 {
        let usable = self.num_blocks - self.reserved_sectors;
        let per_fat = (256 * self.sectors_per_cluster + 1) / 2;
        (usable + per_fat - 1) / per_fat
    }

    /// FAT entries held by one FAT sector
    pub const fn fat_entries_per_sector(&self) -> u32 {
        (SECTOR_SIZE / FAT_ENTRY_BYTES) as u32
    }

    /// Sector holding the FSINFO structure
    pub const fn fs_info_sector(&self) -> u32 {
        1
    }

    /// Calculate FAT start
    pub const fn start_fat0(&self) -> u32 {
        self.reserved_sectors
    }

    /// Calculate ROOTDIR start, the first sector of cluster 2
    pub const fn start_rootdir(&self) -> u32 {
        self.start_fat0() + self.sectors_per_fat()
    }

    /// Calculate start of file data, the first sector of cluster 3
    pub const fn start_clusters(&self) -> u32 {
        self.start_rootdir() + self.sectors_per_cluster
    }

    /// Sectors following the root directory cluster
    pub const fn data_sectors(&self) -> u32 {
        self.num_blocks - self.start_clusters()
    }

    /// Number of addressable clusters in the volume
    pub const fn cluster_count(&self) -> u32 {
        (self.num_blocks - self.start_rootdir()) / self.sectors_per_cluster
    }

    /// Cluster holding the root directory
    pub const fn root_cluster(&self) -> u32 {
        2
    }

    /// First cluster of file data, where the stream file starts
    pub const fn first_file_cluster(&self) -> u32 {
        self.root_cluster() + 1
    }

    /// Clusters occupied by the stream file
    pub const fn stream_clusters(&self) -> u32 {
        let cluster_bytes = self.cluster_bytes() as u64;
        ((self.stream_file_bytes as u64 + cluster_bytes - 1) / cluster_bytes) as u32
    }

    /// Last cluster of the stream file
    pub const fn last_stream_cluster(&self) -> u32 {
        self.first_file_cluster() + self.stream_clusters() - 1
    }

    /// Cluster every secondary file links to: the stream file's second cluster
    pub const fn alias_cluster(&self) -> u32 {
        self.first_file_cluster() + 1
    }

    /// First cluster of secondary file `index` (index >= 1)
    pub const fn secondary_file_cluster(&self, index: u32) -> u32 {
        self.last_stream_cluster() + 1 + (index - 1) * SECONDARY_FILE_CLUSTERS
    }

    /// Long name fragments needed for one station file
    pub const fn lfn_entries_per_file(&self) -> usize {
        (self.file_name_len + LFN_CHARS_PER_ENTRY - 1) / LFN_CHARS_PER_ENTRY
    }

    /// Bytes of root directory used by the volume label and every station file
    pub const fn root_dir_bytes(&self) -> usize {
        (1 + self.root_files * (self.lfn_entries_per_file() + 1)) * DIR_ENTRY_BYTES
    }

    /// Check the geometry describes a volume the synthesizer can serve
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sectors_per_cluster.is_power_of_two() || self.sectors_per_cluster > MAX_SECTORS_PER_CLUSTER {
            return Err(ConfigError::ClusterSize);
        }

        // Both are 16 bit boot record fields
        if self.reserved_sectors > u16::MAX as u32
            || self.reserved_sectors <= self.backup_boot_sector + 1
            || self.backup_boot_sector <= self.fs_info_sector()
        {
            return Err(ConfigError::ReservedSectors);
        }

        if self.num_blocks <= self.reserved_sectors + self.sectors_per_cluster * 2 {
            return Err(ConfigError::VolumeTooSmall);
        }

        if self.cluster_count() < MIN_FAT32_CLUSTERS {
            return Err(ConfigError::NotFat32 { clusters: self.cluster_count(), min: MIN_FAT32_CLUSTERS });
        }

        if self.root_files == 0 || self.root_files > 100 {
            return Err(ConfigError::FileCount);
        }

        if self.file_name_len < MIN_FILE_NAME_LEN || self.file_name_len > LFN_MAX_CHARS {
            return Err(ConfigError::FileNameLength);
        }

        if self.root_dir_bytes() > self.cluster_bytes() as usize {
            return Err(ConfigError::RootDirectoryOverflow);
        }

        // Secondary files link to the stream file's second cluster
        if self.stream_clusters() < 2 {
            return Err(ConfigError::StreamTooSmall);
        }

        let last_cluster = self.secondary_file_cluster(self.root_files as u32) + SECONDARY_FILE_CLUSTERS;
        if last_cluster > self.root_cluster() + self.cluster_count() {
            return Err(ConfigError::VolumeTooSmall);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry() {
        let c = Config::default();
        c.validate().unwrap();

        assert_eq!(c.sectors_per_fat(), 768);
        assert_eq!(c.start_rootdir(), 800);
        assert_eq!(c.start_clusters(), 864);
        assert_eq!(c.stream_clusters(), 65536);
        assert_eq!(c.last_stream_cluster(), 65538);
        assert_eq!(c.alias_cluster(), 4);
        assert_eq!(c.secondary_file_cluster(1), 65539);
        assert_eq!(c.secondary_file_cluster(2), 65541);

        // Enough clusters for hosts to treat the volume as FAT32
        assert!(c.cluster_count() >= 65525);

        // FAT covers every cluster
        assert!(c.sectors_per_fat() * c.fat_entries_per_sector() >= c.cluster_count() + 2);
    }

    #[test]
    fn rejects_bad_geometry() {
        let c = Config { sectors_per_cluster: 48, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ClusterSize));

        let c = Config { root_files: 0, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::FileCount));

        let c = Config { stream_file_bytes: 512, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::StreamTooSmall));

        let c = Config { file_name_len: 255, root_files: 100, sectors_per_cluster: 8, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::RootDirectoryOverflow));
    }

    #[test]
    fn boot_record_field_widths() {
        // 256 would wrap to 0 in the 8 bit field
        let c = Config { sectors_per_cluster: 256, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ClusterSize));

        let c = Config { sectors_per_cluster: 128, num_blocks: 16 * 1024 * 1024, ..Default::default() };
        assert_eq!(c.validate(), Ok(()));

        let c = Config { reserved_sectors: 0x1_0020, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ReservedSectors));

        let c = Config { backup_boot_sector: 0x1_0006, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ReservedSectors));
    }

    #[test]
    fn rejects_fat16_sized_volume() {
        let c = Config { sectors_per_cluster: 128, num_blocks: 4_400_000, ..Default::default() };
        assert_eq!(c.cluster_count(), 34_372);
        assert_eq!(c.validate(), Err(ConfigError::NotFat32 { clusters: 34_372, min: MIN_FAT32_CLUSTERS }));
    }

    #[test]
    fn file_names_fit_every_station() {
        let c = Config { file_name_len: 12, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::FileNameLength));

        let c = Config { file_name_len: MIN_FILE_NAME_LEN, ..Default::default() };
        assert_eq!(c.validate(), Ok(()));
    }
}
