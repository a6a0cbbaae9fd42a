//! Root directory rename pass
//!
//! Renames each station file after the station it plays, gives every file
//! the stream file's size and records where each file's data begins so the
//! synthesizer can recognise a host opening a station.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use packing::{Packed, PackedSize};

use crate::config::{DIR_ENTRY_BYTES, LFN_CHARS_PER_ENTRY, LFN_MAX_CHARS};
use crate::dir::{
    lfn_chars, set_lfn_chars, Attrs, DirectoryEntry, ATTR_OFFSET, DELETED_ENTRY, END_OF_DIRECTORY,
    LFN_LAST_FRAGMENT, LFN_ORDER_MASK, LFN_PAD,
};
use crate::station::StationInfo;
use crate::Config;

/// Longest fragment order that still fits a maximum length name
const LFN_MAX_ORDER: usize = (LFN_MAX_CHARS + LFN_CHARS_PER_ENTRY - 1) / LFN_CHARS_PER_ENTRY;

/// Where a station file's data begins and what it tunes to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub struct StartSector {
    /// Sector offset from the start of the data section
    pub start_sector: u32,
    /// Station frequency, 0 when the file has no station
    pub frequency_khz: u32,
}

/// What a data sector holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum Placement {
    /// First sector of a station file
    Start { file: usize, frequency_khz: u32 },
    /// Inside a secondary file's first cluster, read as file 0 at `position`
    Alias { file: usize, position: u32 },
    /// Stream payload `position` sectors into file 0
    Stream { position: u32 },
}

/// File index to start sector table, bounded by the root file count
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartSectorMap {
    entries: Vec<StartSector>,
    capacity: usize,
}

impl StartSectorMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    /// Append the next file, returns false once the map is full
    pub fn push(&mut self, entry: StartSector) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn get(&self, file: usize) -> Option<&StartSector> {
        self.entries.get(file)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &StartSector> {
        self.entries.iter()
    }

    /// Classify a data-relative sector
    pub fn placement(&self, sector: u32, sectors_per_cluster: u32) -> Placement {
        if let Some((file, e)) = self.entries.iter().enumerate().find(|(_, e)| e.start_sector == sector) {
            return Placement::Start { file, frequency_khz: e.frequency_khz };
        }

        let base = self.entries.first().map(|e| e.start_sector).unwrap_or(0);

        // Secondary files only own their first cluster, the rest of the chain is file 0's
        for (file, e) in self.entries.iter().enumerate().skip(1) {
            if sector > e.start_sector && sector - e.start_sector < sectors_per_cluster {
                return Placement::Alias { file, position: sector - e.start_sector };
            }
        }

        Placement::Stream { position: sector.saturating_sub(base) }
    }
}

/// Long name for the station at a file index, exactly `len` characters
///
/// `"<MHz>_<tenth>_MHz"` padded with underscores up to a ".wav" suffix, or a
/// bare "-" stem for files past the end of the station list.
pub fn station_file_name(station: Option<&StationInfo>, len: usize) -> Vec<u16> {
    const SUFFIX: &str = ".wav";

    let mut name = vec![b'_' as u16; len];
    let stem_len = len.saturating_sub(SUFFIX.len());

    for (c, s) in name[stem_len..].iter_mut().zip(SUFFIX.encode_utf16().skip(SUFFIX.len().saturating_sub(len))) {
        *c = s;
    }

    let stem = match station {
        Some(s) => {
            let (mhz, tenth) = s.mhz();
            format!("{}_{}_MHz", mhz, tenth)
        }
        None => String::from("-"),
    };

    for (c, s) in name[..stem_len].iter_mut().zip(stem.encode_utf16()) {
        *c = s;
    }

    name
}

/// One-shot rename of the template root directory
pub struct DirectoryRewriter<'a> {
    stations: &'a [StationInfo],
    first_file_cluster: u32,
    sectors_per_cluster: u32,
    max_files: usize,
}

impl<'a> DirectoryRewriter<'a> {
    pub fn new(config: &Config, stations: &'a [StationInfo]) -> Self {
        Self {
            stations,
            first_file_cluster: config.first_file_cluster(),
            sectors_per_cluster: config.sectors_per_cluster,
            max_files: config.root_files,
        }
    }

    /// Rewrite directory entries in place and collect each file's start sector
    pub fn rewrite(&self, dir: &mut [u8]) -> StartSectorMap {
        let mut starts = StartSectorMap::with_capacity(self.max_files);
        let mut name: Vec<u16> = Vec::new();
        let mut stream_size = None;

        for (index, entry) in dir.chunks_exact_mut(DIR_ENTRY_BYTES).enumerate() {
            if starts.is_full() {
                break;
            }

            match entry[0] {
                END_OF_DIRECTORY => break,
                DELETED_ENTRY => continue,
                _ => (),
            }

            let attrs = entry[ATTR_OFFSET];

            if attrs & Attrs::LONG_NAME.bits() == Attrs::LONG_NAME.bits() {
                self.rewrite_fragment(index, entry, starts.len(), &mut name);
                continue;
            }

            if attrs & Attrs::VOLUME_LABEL.bits() != 0 {
                crate::trace!("Skipping volume label entry {}", index);
                continue;
            }

            let mut file = match DirectoryEntry::unpack(&entry[..DirectoryEntry::BYTES]) {
                Ok(f) => f,
                Err(_) => {
                    crate::error!("Failed to decode directory entry {}", index);
                    continue;
                }
            };
            name.clear();

            let cluster = file.cluster();
            if cluster < self.first_file_cluster {
                crate::error!("Entry {} starts at cluster {}, before file data", index, cluster);
                continue;
            }

            // The first file is the stream, every other file claims its size
            match stream_size {
                None => stream_size = Some(file.size),
                Some(size) => {
                    file.size = size;
                    if file.pack(&mut entry[..DirectoryEntry::BYTES]).is_err() {
                        crate::error!("Failed to encode directory entry {}", index);
                    }
                }
            }

            let start = StartSector {
                start_sector: (cluster - self.first_file_cluster) * self.sectors_per_cluster,
                frequency_khz: self.stations.get(starts.len()).map(|s| s.frequency_khz).unwrap_or(0),
            };

            crate::debug!("File {} at cluster {}: start sector {} ({} kHz)",
                starts.len(), cluster, start.start_sector, start.frequency_khz);

            starts.push(start);
        }

        starts
    }

    fn rewrite_fragment(&self, index: usize, entry: &mut [u8], file: usize, name: &mut Vec<u16>) {
        let seq = entry[0];
        let order = (seq & LFN_ORDER_MASK) as usize;

        if order == 0 {
            crate::error!("Long name fragment {} has order 0", index);
            return;
        }
        if order > LFN_MAX_ORDER {
            crate::error!("Long name fragment {} overflows name (order {})", index, order);
            return;
        }

        let base = (order - 1) * LFN_CHARS_PER_ENTRY;
        let mut chars = lfn_chars(entry);

        // Final fragment comes first and fixes the name length
        if seq & LFN_LAST_FRAGMENT != 0 {
            let used = chars.iter().take_while(|c| **c != 0 && **c != LFN_PAD).count();
            *name = station_file_name(self.stations.get(file), base + used);
        }

        if name.is_empty() {
            crate::warn!("Long name fragment {} without a final fragment", index);
            return;
        }

        for (i, c) in chars.iter_mut().enumerate() {
            if *c != LFN_PAD {
                *c = name.get(base + i).copied().unwrap_or(0);
            }
        }
        set_lfn_chars(entry, &chars);
    }
}
