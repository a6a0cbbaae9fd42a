//! Stations, tuner collaborator and the tune trigger
//!
//! Tuner register protocols live outside this crate; the synthesizer only
//! needs to ask for a frequency, and the control context owns the chip.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::TunerError;

/// Longest RDS programme service name
pub const RDS_SHORT_LEN: usize = 8;

/// Longest RDS radio text
pub const RDS_LONG_LEN: usize = 64;

/// A discovered station
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StationInfo {
    pub frequency_khz: u32,
    pub channel: u8,
    pub rssi: u8,
    /// RDS programme service name
    pub short_name: String,
    /// RDS radio text
    pub long_text: String,
}

impl StationInfo {
    pub fn new(frequency_khz: u32) -> Self {
        Self { frequency_khz, ..Default::default() }
    }

    /// Whole megahertz and the tenths digit, 101300 kHz is (101, 3)
    pub fn mhz(&self) -> (u32, u32) {
        (self.frequency_khz / 1000, (self.frequency_khz % 1000) / 100)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum Band {
    Sw,
    Mw,
    Am,
    Fm,
}

/// Signal level a seek must reach to stop on a station
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum SeekThreshold {
    All,
    Most,
    Better,
    Best,
    Default,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub struct BandInfo {
    pub min_khz: u32,
    pub max_khz: u32,
    pub khz_per_channel: u32,
}

impl BandInfo {
    pub fn channels(&self) -> u32 {
        match self.khz_per_channel {
            0 => 0,
            step => self.max_khz.saturating_sub(self.min_khz) / step + 1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub struct SignalQuality {
    pub rssi: u8,
    pub stereo: bool,
    pub afc_railed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RdsText {
    /// Set when either string changed since the last poll
    pub changed: bool,
    pub short_name: String,
    pub long_text: String,
}

/// Receiver chip driver
pub trait Tuner {
    /// Probe and initialise the chip
    fn init(&mut self, threshold: SeekThreshold) -> Result<(), TunerError>;

    fn band_info(&mut self, band: Band) -> Result<BandInfo, TunerError>;

    fn set_volume(&mut self, percent: u32) -> Result<(), TunerError>;

    /// Tune directly to a frequency
    fn tune_to(&mut self, freq_khz: u32) -> Result<(), TunerError>;

    /// Currently tuned frequency
    fn tuned(&mut self) -> Result<u32, TunerError>;

    /// Step one channel
    fn tune(&mut self, up: bool, wrap: bool) -> Result<(), TunerError>;

    /// Seek to the next station above the threshold
    fn seek(&mut self, up: bool, wrap: bool) -> Result<(), TunerError>;

    fn rssi(&mut self) -> Result<SignalQuality, TunerError>;

    fn rds(&mut self) -> Result<RdsText, TunerError>;
}

/// Fire-and-forget request to retune, callable from the storage path
pub trait TuneRequest {
    fn request_tune_to(&self, freq_khz: u32);
}

impl<T: TuneRequest + ?Sized> TuneRequest for &T {
    fn request_tune_to(&self, freq_khz: u32) {
        (**self).request_tune_to(freq_khz)
    }
}

impl<T: TuneRequest + ?Sized> TuneRequest for Arc<T> {
    fn request_tune_to(&self, freq_khz: u32) {
        (**self).request_tune_to(freq_khz)
    }
}

/// Single slot mailbox holding the most recent tune request
///
/// Later requests overwrite earlier ones; the control context drains it with
/// [`TuneLatch::take`].
#[derive(Debug, Default)]
pub struct TuneLatch {
    pending: AtomicU32,
}

impl TuneLatch {
    pub const fn new() -> Self {
        Self { pending: AtomicU32::new(0) }
    }

    /// Fetch and clear the pending frequency
    pub fn take(&self) -> Option<u32> {
        match self.pending.swap(0, Ordering::AcqRel) {
            0 => None,
            f => Some(f),
        }
    }

    pub fn pending(&self) -> Option<u32> {
        match self.pending.load(Ordering::Acquire) {
            0 => None,
            f => Some(f),
        }
    }
}

impl TuneRequest for TuneLatch {
    fn request_tune_to(&self, freq_khz: u32) {
        if freq_khz == 0 {
            return;
        }
        crate::debug!("Tune request {} kHz", freq_khz);
        self.pending.store(freq_khz, Ordering::Release);
    }
}
