//! Read-only volume template
//!
//! Holds the bytes of the captured reference image: boot record, FSINFO,
//! backup boot record and the root directory. Sectors past a section's
//! captured extent read back as zeros.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use packing::{Packed, PackedSize};

use crate::boot::{FatBootBlock, FsInfo};
use crate::config::{DIR_ENTRY_BYTES, SECTOR_SIZE};
use crate::dir::{encode_lfn, lfn_checksum, Attrs, DirectoryEntry};
use crate::layout::SectionKind;
use crate::Config;

/// 1980-01-01, the FAT date epoch
const FAT_EPOCH_DATE: u16 = (1 << 5) | 1;

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeTemplate {
    vbr: Vec<u8>,
    fs_info: Vec<u8>,
    vbr_backup: Vec<u8>,
    root_dir: Vec<u8>,
}

impl VolumeTemplate {
    /// Wrap externally captured section bytes
    pub fn new(vbr: Vec<u8>, fs_info: Vec<u8>, vbr_backup: Vec<u8>, root_dir: Vec<u8>) -> Self {
        Self { vbr, fs_info, vbr_backup, root_dir }
    }

    /// Build the reference image for a configuration
    ///
    /// Lists a volume label followed by `root_files` files. File 0 is the stream
    /// file starting at the first file cluster; every later file owns two
    /// clusters past the end of the stream file.
    pub fn generate(config: &Config) -> Result<Self, packing::Error> {
        let mut boot = vec![0u8; SECTOR_SIZE];
        FatBootBlock::new(config).encode(&mut boot)?;

        let mut fs_info = vec![0u8; SECTOR_SIZE];
        FsInfo::new().encode(&mut fs_info);

        let mut vbr_backup = boot.clone();
        vbr_backup.extend_from_slice(&fs_info);

        let root_dir = Self::generate_root_dir(config)?;

        Ok(Self { vbr: boot, fs_info, vbr_backup, root_dir })
    }

    fn generate_root_dir(config: &Config) -> Result<Vec<u8>, packing::Error> {
        let sectors = (config.root_dir_bytes() + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let mut dir = vec![0u8; sectors * SECTOR_SIZE];
        let mut entries = dir.chunks_exact_mut(DIR_ENTRY_BYTES);

        let mut label = DirectoryEntry::default();
        label.name = [0x20; 11];
        let len = usize::min(label.name.len(), config.volume_label.len());
        label.name[..len].copy_from_slice(&config.volume_label.as_bytes()[..len]);
        label.attrs = Attrs::VOLUME_LABEL.bits();
        if let Some(e) = entries.next() {
            label.pack(&mut e[..DirectoryEntry::BYTES])?;
        }

        for index in 0..config.root_files {
            let name = Self::long_name(config, index);
            let short = Self::short_name(index);
            let checksum = lfn_checksum(&short);

            // Fragments are stored last first
            let fragments = config.lfn_entries_per_file();
            for order in (1..=fragments).rev() {
                if let Some(e) = entries.next() {
                    encode_lfn(e, &name, order, order == fragments, checksum);
                }
            }

            let mut file = DirectoryEntry::default();
            file.name = short;
            file.attrs = Attrs::ARCHIVE.bits();
            file.create_date = FAT_EPOCH_DATE;
            file.update_date = FAT_EPOCH_DATE;
            file.last_access_date = FAT_EPOCH_DATE;

            if index == 0 {
                file.set_cluster(config.first_file_cluster());
                file.size = config.stream_file_bytes;
            } else {
                file.set_cluster(config.secondary_file_cluster(index as u32));
                file.size = SECTOR_SIZE as u32;
            }

            if let Some(e) = entries.next() {
                file.pack(&mut e[..DirectoryEntry::BYTES])?;
            }
        }

        Ok(dir)
    }

    /// "file" followed by the repeated two digit index, padded to length with ".wav"
    fn long_name(config: &Config, index: usize) -> Vec<u16> {
        let digits = format!("{:02}", index);
        let fill = config.file_name_len - "file".len() - ".wav".len();

        "file".encode_utf16()
            .chain(digits.encode_utf16().cycle().take(fill))
            .chain(".wav".encode_utf16())
            .collect()
    }

    fn short_name(index: usize) -> [u8; 11] {
        let mut name = [0x20u8; 11];
        let s = format!("FILE{:02}~1WAV", index);
        name.copy_from_slice(&s.as_bytes()[..11]);
        name
    }

    /// Captured bytes of a template section, empty for synthesized sections
    pub fn section(&self, kind: SectionKind) -> &[u8] {
        match kind {
            SectionKind::Vbr => &self.vbr,
            SectionKind::FsInfo => &self.fs_info,
            SectionKind::VbrBackup => &self.vbr_backup,
            SectionKind::RootDir => &self.root_dir,
            SectionKind::Fat | SectionKind::Data => &[],
        }
    }

    /// Copy sector `index` of a section, zero-filling past the captured extent
    pub fn read_sector(&self, kind: SectionKind, index: u32, sector: &mut [u8]) {
        let data = self.section(kind);
        let start = index as usize * SECTOR_SIZE;

        sector.fill(0);
        if start < data.len() {
            let len = usize::min(SECTOR_SIZE, data.len() - start);
            sector[..len].copy_from_slice(&data[start..start + len]);
        }
    }

    pub fn root_dir(&self) -> &[u8] {
        &self.root_dir
    }

    /// Root directory bytes, mutated only by the directory rewrite pass
    pub fn root_dir_mut(&mut self) -> &mut [u8] {
        &mut self.root_dir
    }
}
