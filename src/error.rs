use crate::layout::SectionKind;

/// Errors surfaced at the block storage boundary
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum DiskError {
    /// Requested sectors fall outside the volume
    #[error("sectors {lba}+{count} outside volume")]
    OutOfRange { lba: u32, count: u32 },
    /// Caller buffer cannot hold the requested sectors
    #[error("buffer of {len} bytes, {needed} needed")]
    BufferTooSmall { needed: usize, len: usize },
    /// The volume is read-only
    #[error("volume is read-only")]
    ReadOnly,
}

/// Volume geometry rejected by [`Config::validate`](crate::Config::validate)
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("sectors per cluster must be a power of two up to 128")]
    ClusterSize,
    #[error("reserved region cannot hold boot, fsinfo and backup sectors")]
    ReservedSectors,
    #[error("volume too small for the configured files")]
    VolumeTooSmall,
    /// Too few clusters for hosts to treat the volume as FAT32
    #[error("{clusters} clusters, FAT32 needs at least {min}")]
    NotFat32 { clusters: u32, min: u32 },
    #[error("station file count must be 1..=100")]
    FileCount,
    #[error("file name length must fit a station name and at most 255 characters")]
    FileNameLength,
    #[error("root directory exceeds one cluster")]
    RootDirectoryOverflow,
    #[error("stream file must span at least two clusters")]
    StreamTooSmall,
}

/// Section tables that do not tile the volume
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum LayoutError {
    /// A section does not start where the previous one ended
    #[error("section {kind:?} starts at {found}, expected {expected}")]
    NotContiguous { kind: SectionKind, expected: u32, found: u32 },
    /// A section covers no sectors
    #[error("section {0:?} is empty")]
    EmptySection(SectionKind),
    /// Sections cover a different number of sectors than declared
    #[error("sections cover {covered} of {declared} sectors")]
    SizeMismatch { declared: u32, covered: u32 },
    /// A required section is absent
    #[error("section {0:?} missing")]
    MissingSection(SectionKind),
    /// A start sector entry points outside the data section
    #[error("file {file} start sector {start_sector} outside data section")]
    StartOutsideData { file: usize, start_sector: u32 },
}

/// Failures from the audio hardware collaborator
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum HardwareError {
    /// No block arrived within the receive timeout
    #[error("receive timeout")]
    Timeout,
    /// The interface is not ready or not present
    #[error("interface not ready")]
    NotReady,
    /// The interface rejected the requested configuration
    #[error("configuration rejected")]
    Config,
    /// Transfer failed with a driver specific code
    #[error("transfer failed ({0})")]
    Io(i32),
}

/// Capture start failures
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum CaptureError {
    /// Requested master clock exceeds the oscillator
    #[error("mclk {mclk_hz} Hz exceeds oscillator {oscillator_hz} Hz")]
    BadClock { mclk_hz: u32, oscillator_hz: u32 },
    /// Hardware failed during configuration or start
    #[error("capture hardware: {0}")]
    Hardware(#[from] HardwareError),
    /// No capture hardware is attached
    #[error("no capture hardware")]
    Unavailable,
    /// The capture worker could not be spawned
    #[error("failed to spawn capture worker")]
    Spawn,
}

/// Tuner collaborator failures
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum TunerError {
    /// No chip answered the probe
    #[error("tuner not found")]
    NotFound,
    /// Bus transfer failed
    #[error("tuner bus error")]
    Io,
    /// The chip does not support the request
    #[error("not supported by tuner")]
    Unsupported,
    /// Polling for a state change exceeded its timeout
    #[error("tuner timed out")]
    Timeout,
}

/// Failures assembling the virtual volume
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum MountError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid layout: {0}")]
    Layout(#[from] LayoutError),
    /// A template structure failed to encode
    #[error("template encoding failed")]
    Encoding,
    /// The directory has already been rewritten for this device
    #[error("volume already mounted")]
    AlreadyMounted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn messages_carry_context() {
        assert_eq!(DiskError::OutOfRange { lba: 10, count: 2 }.to_string(), "sectors 10+2 outside volume");
        assert_eq!(
            MountError::from(ConfigError::NotFat32 { clusters: 34_372, min: 65_525 }).to_string(),
            "invalid config: 34372 clusters, FAT32 needs at least 65525"
        );
        assert_eq!(CaptureError::from(HardwareError::Io(-5)), CaptureError::Hardware(HardwareError::Io(-5)));
    }
}
