use packing::Packed;

use crate::config::LFN_CHARS_PER_ENTRY;

/// Offset of the attribute byte in any directory entry
pub const ATTR_OFFSET: usize = 11;

/// First name byte marking a deleted entry
pub const DELETED_ENTRY: u8 = 0xE5;

/// First name byte marking the end of the directory
pub const END_OF_DIRECTORY: u8 = 0x00;

/// Sequence byte flag on the final (first stored) long name fragment
pub const LFN_LAST_FRAGMENT: u8 = 0x40;

/// Sequence byte bits holding the fragment order
pub const LFN_ORDER_MASK: u8 = 0x1F;

/// Offset of the short name checksum in a long name fragment
pub const LFN_CHECKSUM_OFFSET: usize = 13;

/// Byte offsets of the 13 UTF-16 characters in a long name fragment
pub const LFN_CHAR_OFFSETS: [usize; LFN_CHARS_PER_ENTRY] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

/// Padding character following a long name's terminator
pub const LFN_PAD: u16 = 0xFFFF;

bitflags::bitflags! {
    pub struct Attrs: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_LABEL=0x08;
        const SUBDIR = 0x10;
        const ARCHIVE = 0x20;
        const DEVICE = 0x40;
        const LONG_NAME = Self::READ_ONLY.bits | Self::HIDDEN.bits | Self::SYSTEM.bits | Self::VOLUME_LABEL.bits;
    }
}

/// Short (8.3) directory entry
#[derive(Clone, Copy, Default, Debug, PartialEq, Packed)]
#[packed(little_endian, lsb0)]
pub struct DirectoryEntry {
    #[pkd(7, 0, 0, 10)]
    pub name: [u8; 11],

    #[pkd(7, 0, 11, 11)]
    pub attrs: u8,

    #[pkd(7, 0, 12, 12)]
    _reserved: u8,

    #[pkd(7, 0, 13, 13)]
    pub create_time_fine: u8,

    #[pkd(7, 0, 14, 15)]
    pub create_time: u16,

    #[pkd(7, 0, 16, 17)]
    pub create_date: u16,

    #[pkd(7, 0, 18, 19)]
    pub last_access_date: u16,

    #[pkd(7, 0, 20, 21)]
    pub high_start_cluster: u16,

    #[pkd(7, 0, 22, 23)]
    pub update_time: u16,

    #[pkd(7, 0, 24, 25)]
    pub update_date: u16,

    #[pkd(7, 0, 26, 27)]
    pub start_cluster: u16,

    #[pkd(7, 0, 28, 31)]
    pub size: u32,
}

impl DirectoryEntry {
    /// Full 32-bit starting cluster
    pub fn cluster(&self) -> u32 {
        (self.high_start_cluster as u32) << 16 | self.start_cluster as u32
    }

    pub fn set_cluster(&mut self, cluster: u32) {
        self.high_start_cluster = (cluster >> 16) as u16;
        self.start_cluster = cluster as u16;
    }
}

/// Checksum of an 8.3 name carried by each of its long name fragments
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name.iter().fold(0u8, |sum, c| {
        ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(*c)
    })
}

/// Read the 13 characters of a long name fragment
pub fn lfn_chars(entry: &[u8]) -> [u16; LFN_CHARS_PER_ENTRY] {
    let mut chars = [0u16; LFN_CHARS_PER_ENTRY];
    for (c, o) in chars.iter_mut().zip(LFN_CHAR_OFFSETS.iter()) {
        *c = u16::from_le_bytes([entry[*o], entry[*o + 1]]);
    }
    chars
}

/// Overwrite the 13 characters of a long name fragment
pub fn set_lfn_chars(entry: &mut [u8], chars: &[u16; LFN_CHARS_PER_ENTRY]) {
    for (c, o) in chars.iter().zip(LFN_CHAR_OFFSETS.iter()) {
        entry[*o..*o + 2].copy_from_slice(&c.to_le_bytes());
    }
}

/// Encode one long name fragment for `name`, `order` counting from 1
pub fn encode_lfn(entry: &mut [u8], name: &[u16], order: usize, last: bool, checksum: u8) {
    entry.fill(0);

    entry[0] = order as u8 | if last { LFN_LAST_FRAGMENT } else { 0 };
    entry[ATTR_OFFSET] = Attrs::LONG_NAME.bits();
    entry[LFN_CHECKSUM_OFFSET] = checksum;

    // Name characters, then a terminator, then padding
    let base = (order - 1) * LFN_CHARS_PER_ENTRY;
    let mut chars = [LFN_PAD; LFN_CHARS_PER_ENTRY];
    for (i, c) in chars.iter_mut().enumerate() {
        let p = base + i;
        if p < name.len() {
            *c = name[p];
        } else if p == name.len() {
            *c = 0;
        }
    }
    set_lfn_chars(entry, &chars);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use packing::PackedSize;

    #[test]
    fn cluster_split() {
        let mut d = DirectoryEntry::default();
        d.set_cluster(0x0001_0003);
        assert_eq!(d.high_start_cluster, 1);
        assert_eq!(d.start_cluster, 3);
        assert_eq!(d.cluster(), 0x0001_0003);

        let mut b = [0u8; DirectoryEntry::BYTES];
        d.pack(&mut b).unwrap();
        assert_eq!(&b[20..22], &[1, 0]);
        assert_eq!(&b[26..28], &[3, 0]);
    }

    #[test]
    fn checksum_matches_reference() {
        // Rotate right then add, over the 11 name bytes
        let mut sum = 0u8;
        for c in b"FILE00~1WAV" {
            sum = (if sum & 1 != 0 { 0x80u8 } else { 0 }).wrapping_add(sum >> 1).wrapping_add(*c);
        }
        assert_eq!(lfn_checksum(b"FILE00~1WAV"), sum);
    }

    #[test]
    fn fragment_padding() {
        let name: Vec<u16> = "abc.wav".encode_utf16().collect();
        let mut e = [0u8; 32];
        encode_lfn(&mut e, &name, 1, true, 0x12);

        assert_eq!(e[0], 0x41);
        assert_eq!(e[ATTR_OFFSET], 0x0F);
        assert_eq!(e[LFN_CHECKSUM_OFFSET], 0x12);

        let chars = lfn_chars(&e);
        assert_eq!(&chars[..7], name.as_slice());
        assert_eq!(chars[7], 0);
        assert!(chars[8..].iter().all(|c| *c == LFN_PAD));
    }
}
