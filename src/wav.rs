//! Streaming WAV header and the fallback clip
//!
//! Every station file opens with a canonical 44 byte PCM header declaring an
//! oversized data chunk, so players treat the file as an endless stream.

use packing::{Packed, PackedSize};

/// Declared data chunk length, effectively unbounded
pub const STREAMING_DATA_LEN: u32 = 0x8000_0000;

/// Size of the canonical PCM header
pub const WAV_HEADER_SIZE: usize = 44;

/// PCM sample layout advertised by a header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavFormat {
    /// Captured radio audio: 16 bit stereo at 44.1 kHz
    pub const LIVE: WavFormat = WavFormat { channels: 2, sample_rate: 44_100, bits_per_sample: 16 };

    /// Built-in fallback clip: 8 bit unsigned mono
    pub const FALLBACK: WavFormat = WavFormat { channels: 1, sample_rate: 22_257, bits_per_sample: 8 };

    pub const fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub const fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// Canonical RIFF/WAVE PCM header
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
#[packed(little_endian, lsb0)]
pub struct WavHeader {
    #[pkd(7, 0, 0, 3)]
    riff_tag: u32,

    #[pkd(7, 0, 4, 7)]
    pub riff_len: u32,

    #[pkd(7, 0, 8, 11)]
    wave_tag: u32,

    #[pkd(7, 0, 12, 15)]
    fmt_tag: u32,

    #[pkd(7, 0, 16, 19)]
    fmt_len: u32,

    #[pkd(7, 0, 20, 21)]
    pub format_tag: u16,

    #[pkd(7, 0, 22, 23)]
    pub channels: u16,

    #[pkd(7, 0, 24, 27)]
    pub sample_rate: u32,

    #[pkd(7, 0, 28, 31)]
    pub byte_rate: u32,

    #[pkd(7, 0, 32, 33)]
    pub block_align: u16,

    #[pkd(7, 0, 34, 35)]
    pub bits_per_sample: u16,

    #[pkd(7, 0, 36, 39)]
    data_tag: u32,

    #[pkd(7, 0, 40, 43)]
    pub data_len: u32,
}

impl WavHeader {
    const PCM: u16 = 1;

    /// Header for an endless stream in the given format
    pub fn streaming(format: WavFormat) -> Self {
        Self {
            riff_tag: u32::from_le_bytes(*b"RIFF"),
            riff_len: STREAMING_DATA_LEN + 36,
            wave_tag: u32::from_le_bytes(*b"WAVE"),
            fmt_tag: u32::from_le_bytes(*b"fmt "),
            fmt_len: 16,
            format_tag: Self::PCM,
            channels: format.channels,
            sample_rate: format.sample_rate,
            byte_rate: format.byte_rate(),
            block_align: format.block_align(),
            bits_per_sample: format.bits_per_sample,
            data_tag: u32::from_le_bytes(*b"data"),
            data_len: STREAMING_DATA_LEN,
        }
    }

    /// Encode to the 44 byte wire form
    pub fn to_bytes(&self) -> Result<[u8; WAV_HEADER_SIZE], packing::Error> {
        let mut b = [0u8; WAV_HEADER_SIZE];
        self.pack(&mut b[..Self::BYTES])?;
        Ok(b)
    }
}

const FALLBACK_TONE_LEN: usize = 11_128;

/// Samples per triangle period, about 445 Hz at the fallback rate
const TONE_PERIOD: usize = 50;

/// Samples per beep and per gap
const TONE_BEEP: usize = 2_782;

/// Half second of beeping 8 bit unsigned mono audio, looped when no capture runs
pub static FALLBACK_TONE: [u8; FALLBACK_TONE_LEN] = fallback_tone();

const fn fallback_tone() -> [u8; FALLBACK_TONE_LEN] {
    let mut clip = [0x80u8; FALLBACK_TONE_LEN];
    let mut i = 0;

    while i < FALLBACK_TONE_LEN {
        if (i / TONE_BEEP) % 2 == 0 {
            let phase = i % TONE_PERIOD;
            let level = if phase < TONE_PERIOD / 2 { phase * 4 } else { (TONE_PERIOD - phase) * 4 };
            clip[i] = (0x80 - 50 + level) as u8;
        }
        i += 1;
    }

    clip
}
