//! Synthesized FAT32 allocation table
//!
//! Nothing here is stored. File 0 is one long sequential chain; every other
//! station file owns a two entry chain whose first link jumps into file 0's
//! second cluster, so all files read back the same stream.

use crate::config::{FAT_ENTRY_BYTES, SECONDARY_FILE_CLUSTERS};
use crate::Config;

/// Entry 0, media descriptor in the low byte
pub const MEDIA_ENTRY: u32 = 0xFFFF_FFF8;

/// Entry 1, clean-shutdown and no-error bits set
pub const RESERVED_ENTRY: u32 = 0xFFFF_FFFF;

/// End of chain marker
pub const EOC: u32 = 0x0FFF_FFFF;

/// Unallocated cluster
pub const FREE: u32 = 0;

#[derive(Clone, Debug, PartialEq)]
pub struct FatTable {
    root_cluster: u32,
    first_cluster: u32,
    last_stream_cluster: u32,
    alias_cluster: u32,
    secondary_files: u32,
    entries_per_sector: u32,
}

impl FatTable {
    pub fn new(config: &Config) -> Self {
        Self {
            root_cluster: config.root_cluster(),
            first_cluster: config.first_file_cluster(),
            last_stream_cluster: config.last_stream_cluster(),
            alias_cluster: config.alias_cluster(),
            secondary_files: config.root_files.saturating_sub(1) as u32,
            entries_per_sector: config.fat_entries_per_sector(),
        }
    }

    /// Compute the table entry for a cluster
    pub fn entry(&self, cluster: u32) -> u32 {
        match cluster {
            0 => MEDIA_ENTRY,
            1 => RESERVED_ENTRY,
            c if c == self.root_cluster => EOC,
            c if c < self.first_cluster => FREE,
            c if c < self.last_stream_cluster => c + 1,
            c if c == self.last_stream_cluster => EOC,
            c => {
                let offset = c - self.last_stream_cluster - 1;
                if offset / SECONDARY_FILE_CLUSTERS >= self.secondary_files {
                    FREE
                } else if offset % SECONDARY_FILE_CLUSTERS == 0 {
                    self.alias_cluster
                } else {
                    EOC
                }
            }
        }
    }

    /// Fill one FAT sector
    pub fn read_sector(&self, fat_sector: u32, sector: &mut [u8]) {
        let base = fat_sector * self.entries_per_sector;

        for (i, e) in sector.chunks_exact_mut(FAT_ENTRY_BYTES).enumerate() {
            e.copy_from_slice(&self.entry(base + i as u32).to_le_bytes());
        }
    }

    /// FAT sector holding the stream file's final link
    #[cfg(test)]
    fn boundary_sector(&self) -> u32 {
        self.last_stream_cluster / self.entries_per_sector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SECTOR_SIZE;

    fn entry_at(sector: &[u8], i: usize) -> u32 {
        u32::from_le_bytes([sector[i * 4], sector[i * 4 + 1], sector[i * 4 + 2], sector[i * 4 + 3]])
    }

    #[test]
    fn reserved_entries() {
        let f = FatTable::new(&Config::default());
        let mut s = [0u8; SECTOR_SIZE];
        f.read_sector(0, &mut s);

        assert_eq!(entry_at(&s, 0), MEDIA_ENTRY);
        assert_eq!(entry_at(&s, 1), RESERVED_ENTRY);
        assert_eq!(entry_at(&s, 2), EOC);
        assert_eq!(entry_at(&s, 3), 4);
        assert_eq!(entry_at(&s, 127), 128);
    }

    #[test]
    fn boundary_sector_links() {
        let c = Config::default();
        let f = FatTable::new(&c);
        assert_eq!(f.boundary_sector(), 512);

        let mut s = [0u8; SECTOR_SIZE];
        f.read_sector(512, &mut s);

        // Stream file ends two entries into the sector
        assert_eq!(entry_at(&s, 0), 65537);
        assert_eq!(entry_at(&s, 1), 65538);
        assert_eq!(entry_at(&s, 2), EOC);

        // 31 secondary files, each an alias link and EOC
        for file in 0..31 {
            assert_eq!(entry_at(&s, 3 + file * 2), c.alias_cluster());
            assert_eq!(entry_at(&s, 4 + file * 2), EOC);
        }
        assert_eq!(entry_at(&s, 65), FREE);

        f.read_sector(513, &mut s);
        assert!(s.iter().all(|b| *b == 0));
    }
}
