//! RadioFAT virtual FAT32 volume for FM radio USB mass storage devices
//!
//! The host sees a read-only FAT32 volume of station files. Every sector is
//! synthesized on request; reading a station file streams captured radio audio
//! as an endless WAV file and asks the tuner to switch to that station.
//!
//! The synthesis core is `no_std` with `alloc`. The `std` feature adds the
//! threaded capture pipeline and the [`RadioDevice`] context tying capture,
//! tuner and volume together.

#![cfg_attr(not(feature="std"), no_std)]

extern crate alloc;

#[cfg(feature = "defmt")]
use defmt::{debug, info, trace, warn, error};

#[cfg(not(feature = "defmt"))]
use log::{debug, info, trace, warn, error};

mod config;
pub use config::{Config, SECTOR_SIZE};

pub mod error;
pub use error::{CaptureError, ConfigError, DiskError, HardwareError, LayoutError, MountError, TunerError};

mod boot;
pub use boot::{FatBootBlock, FsInfo};

pub mod dir;

pub mod layout;
pub use layout::{SectionKind, VolumeLayout, VolumeSection};

mod template;
pub use template::VolumeTemplate;

pub mod fat;

pub mod wav;
pub use wav::{WavFormat, WavHeader, FALLBACK_TONE};

pub mod station;
pub use station::{StationInfo, TuneLatch, TuneRequest, Tuner};

mod source;
pub use source::{AudioSource, NoCapture};

pub mod rewrite;
pub use rewrite::{DirectoryRewriter, Placement, StartSector, StartSectorMap};

mod disk;
pub use disk::{VirtualDisk, SAMPLE_WAIT};

#[cfg(feature = "std")]
pub mod capture;
#[cfg(feature = "std")]
pub use capture::{AudioCapture, CaptureConfig, CaptureHardware};

#[cfg(feature = "std")]
mod device;
#[cfg(feature = "std")]
pub use device::{RadioDevice, RadioDisk};
