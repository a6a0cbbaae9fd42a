//! Volume section table
//!
//! The virtual volume is split into ordered sections that exactly tile
//! `[0, sector_count)`. Each section kind names where its bytes come from.

use alloc::vec::Vec;

use crate::error::LayoutError;
use crate::Config;

/// Named region of the volume
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum SectionKind {
    /// Boot sector (volume boot record)
    Vbr,
    /// FSINFO sector and the rest of the primary reserved sectors
    FsInfo,
    /// Backup boot record and the remaining reserved sectors
    VbrBackup,
    /// File allocation table
    Fat,
    /// Root directory cluster
    RootDir,
    /// File data clusters
    Data,
}

/// Where a section's bytes come from
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum Content {
    /// Copied from the volume template, zero past its extent
    Template,
    /// Allocation table computed per sector
    Fat,
    /// Stream payload computed per sector
    Data,
}

impl SectionKind {
    pub const fn content(&self) -> Content {
        match self {
            SectionKind::Fat => Content::Fat,
            SectionKind::Data => Content::Data,
            _ => Content::Template,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub struct VolumeSection {
    pub kind: SectionKind,
    pub start_sector: u32,
    pub sector_count: u32,
}

impl VolumeSection {
    pub const fn new(kind: SectionKind, start_sector: u32, sector_count: u32) -> Self {
        Self { kind, start_sector, sector_count }
    }

    /// First sector past the section
    pub const fn end_sector(&self) -> u32 {
        self.start_sector + self.sector_count
    }

    pub const fn contains(&self, lba: u32) -> bool {
        lba >= self.start_sector && lba < self.end_sector()
    }

    pub const fn content(&self) -> Content {
        self.kind.content()
    }
}

/// Ordered set of sections covering the whole volume
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeLayout {
    sections: Vec<VolumeSection>,
    sector_count: u32,
}

impl VolumeLayout {
    /// Build a layout, checking sections tile `[0, sector_count)` with no gaps or overlaps
    pub fn new(sections: Vec<VolumeSection>, sector_count: u32) -> Result<Self, LayoutError> {
        let mut next = 0;

        for s in sections.iter() {
            if s.sector_count == 0 {
                return Err(LayoutError::EmptySection(s.kind));
            }
            if s.start_sector != next {
                return Err(LayoutError::NotContiguous { kind: s.kind, expected: next, found: s.start_sector });
            }
            next = s.end_sector();
        }

        if next != sector_count {
            return Err(LayoutError::SizeMismatch { declared: sector_count, covered: next });
        }

        for kind in [SectionKind::Vbr, SectionKind::Fat, SectionKind::RootDir, SectionKind::Data] {
            if !sections.iter().any(|s| s.kind == kind) {
                return Err(LayoutError::MissingSection(kind));
            }
        }

        Ok(Self { sections, sector_count })
    }

    /// Derive the FAT32 layout described by a configuration
    pub fn from_config(config: &Config) -> Result<Self, LayoutError> {
        let fs_info = config.fs_info_sector();
        let backup = config.backup_boot_sector;

        let sections = alloc::vec![
            VolumeSection::new(SectionKind::Vbr, 0, fs_info),
            VolumeSection::new(SectionKind::FsInfo, fs_info, backup - fs_info),
            VolumeSection::new(SectionKind::VbrBackup, backup, config.reserved_sectors - backup),
            VolumeSection::new(SectionKind::Fat, config.start_fat0(), config.sectors_per_fat()),
            VolumeSection::new(SectionKind::RootDir, config.start_rootdir(), config.sectors_per_cluster),
            VolumeSection::new(SectionKind::Data, config.start_clusters(), config.data_sectors()),
        ];

        Self::new(sections, config.num_blocks)
    }

    /// Find the section containing `lba`
    pub fn locate(&self, lba: u32) -> Option<&VolumeSection> {
        self.sections.iter().find(|s| s.contains(lba))
    }

    /// Fetch the first section of a kind
    pub fn section(&self, kind: SectionKind) -> Option<&VolumeSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn sections(&self) -> &[VolumeSection] {
        &self.sections
    }

    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn config_layout_tiles_volume() {
        let c = Config::default();
        let l = VolumeLayout::from_config(&c).unwrap();

        let total: u32 = l.sections().iter().map(|s| s.sector_count).sum();
        assert_eq!(total, c.num_blocks);

        assert_eq!(l.locate(0).unwrap().kind, SectionKind::Vbr);
        assert_eq!(l.locate(1).unwrap().kind, SectionKind::FsInfo);
        assert_eq!(l.locate(6).unwrap().kind, SectionKind::VbrBackup);
        assert_eq!(l.locate(32).unwrap().kind, SectionKind::Fat);
        assert_eq!(l.locate(800).unwrap().kind, SectionKind::RootDir);
        assert_eq!(l.locate(864).unwrap().kind, SectionKind::Data);
        assert_eq!(l.locate(c.num_blocks - 1).unwrap().kind, SectionKind::Data);
        assert!(l.locate(c.num_blocks).is_none());
    }

    #[test]
    fn rejects_gaps_and_overlaps() {
        let gap = vec![
            VolumeSection::new(SectionKind::Vbr, 0, 1),
            VolumeSection::new(SectionKind::Fat, 2, 4),
        ];
        assert_eq!(
            VolumeLayout::new(gap, 6),
            Err(LayoutError::NotContiguous { kind: SectionKind::Fat, expected: 1, found: 2 })
        );

        let overlap = vec![
            VolumeSection::new(SectionKind::Vbr, 0, 2),
            VolumeSection::new(SectionKind::Fat, 1, 4),
        ];
        assert!(matches!(VolumeLayout::new(overlap, 5), Err(LayoutError::NotContiguous { .. })));

        let short = vec![
            VolumeSection::new(SectionKind::Vbr, 0, 1),
            VolumeSection::new(SectionKind::Fat, 1, 1),
            VolumeSection::new(SectionKind::RootDir, 2, 1),
            VolumeSection::new(SectionKind::Data, 3, 1),
        ];
        assert_eq!(VolumeLayout::new(short, 8), Err(LayoutError::SizeMismatch { declared: 8, covered: 4 }));
    }
}
