//! Radio device context
//!
//! Owns the capture session, the probed tuner and the tune latch the
//! storage path writes into. Construct one per process; the volume can be
//! mounted once per device.

use std::sync::Arc;

use crate::capture::{AudioCapture, CaptureHardware};
use crate::disk::VirtualDisk;
use crate::error::{MountError, TunerError};
use crate::rewrite::DirectoryRewriter;
use crate::station::{Band, BandInfo, SeekThreshold, StationInfo, TuneLatch, Tuner};
use crate::template::VolumeTemplate;
use crate::Config;

/// Volume served by a [`RadioDevice`]
pub type RadioDisk<H> = VirtualDisk<Arc<AudioCapture<H>>, Arc<TuneLatch>>;

pub struct RadioDevice<H: CaptureHardware> {
    config: Config,
    capture: Arc<AudioCapture<H>>,
    tuner: Option<Box<dyn Tuner + Send>>,
    band: Option<BandInfo>,
    latch: Arc<TuneLatch>,
    mounted: bool,
}

impl<H: CaptureHardware> RadioDevice<H> {
    /// Probe tuner candidates in order, keeping the first that initialises
    pub fn new(config: Config, capture: AudioCapture<H>, candidates: Vec<Box<dyn Tuner + Send>>) -> Self {
        let mut tuner = None;

        for (i, mut t) in candidates.into_iter().enumerate() {
            match t.init(SeekThreshold::Default) {
                Ok(()) => {
                    crate::info!("Tuner candidate {} initialised", i);
                    tuner = Some(t);
                    break;
                }
                Err(e) => crate::debug!("Tuner candidate {} failed: {:?}", i, e),
            }
        }

        let band = match tuner.as_mut() {
            Some(t) => match t.band_info(Band::Fm) {
                Ok(b) => {
                    crate::info!("FM band {}..{} kHz, {} channels", b.min_khz, b.max_khz, b.channels());
                    Some(b)
                }
                Err(e) => {
                    crate::warn!("Tuner band query failed: {:?}", e);
                    None
                }
            },
            None => {
                crate::warn!("No tuner found, serving fallback audio");
                None
            }
        };

        Self {
            config,
            capture: Arc::new(capture),
            tuner,
            band,
            latch: Arc::new(TuneLatch::new()),
            mounted: false,
        }
    }

    pub fn has_tuner(&self) -> bool {
        self.tuner.is_some()
    }

    pub fn tuner_mut(&mut self) -> Option<&mut (dyn Tuner + Send + 'static)> {
        self.tuner.as_deref_mut()
    }

    /// FM band reported by the tuner
    pub fn band(&self) -> Option<&BandInfo> {
        self.band.as_ref()
    }

    pub fn capture(&self) -> &Arc<AudioCapture<H>> {
        &self.capture
    }

    pub fn latch(&self) -> &Arc<TuneLatch> {
        &self.latch
    }

    /// Build the volume from a generated template
    pub fn mount(&mut self, stations: &[StationInfo]) -> Result<RadioDisk<H>, MountError> {
        let template = VolumeTemplate::generate(&self.config).map_err(|_| MountError::Encoding)?;
        self.mount_template(template, stations)
    }

    /// Rename the template's files after `stations` and build the volume
    ///
    /// The directory is rewritten before the disk exists, so no read can see
    /// a partial rename.
    pub fn mount_template(
        &mut self,
        mut template: VolumeTemplate,
        stations: &[StationInfo],
    ) -> Result<RadioDisk<H>, MountError> {
        if self.mounted {
            return Err(MountError::AlreadyMounted);
        }

        self.config.validate()?;

        let starts = DirectoryRewriter::new(&self.config, stations).rewrite(template.root_dir_mut());
        let tuner = self.tuner.as_ref().map(|_| self.latch.clone());

        let disk = VirtualDisk::new(self.config.clone(), template, starts, self.capture.clone(), tuner)?;
        self.mounted = true;

        crate::info!("Mounted {} stations", stations.len());

        Ok(disk)
    }

    /// Forward a pending tune request to the tuner
    pub fn service(&mut self) -> Result<Option<u32>, TunerError> {
        let freq = match self.latch.take() {
            Some(f) => f,
            None => return Ok(None),
        };

        match self.tuner.as_mut() {
            Some(t) => {
                t.tune_to(freq)?;
                crate::info!("Tuned to {} kHz", freq);
                Ok(Some(freq))
            }
            None => {
                crate::warn!("Dropping tune request for {} kHz, no tuner", freq);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use crate::capture::{CaptureConfig, ClockSetting, StreamFormat};
    use crate::config::SECTOR_SIZE;
    use crate::error::HardwareError;
    use crate::station::{RdsText, SignalQuality, TuneRequest};
    use crate::wav::{WavFormat, WavHeader, WAV_HEADER_SIZE};

    struct IdleHardware;

    impl CaptureHardware for IdleHardware {
        fn configure(&mut self, _format: &StreamFormat) -> Result<(), HardwareError> {
            Ok(())
        }

        fn set_clock(&mut self, _clock: ClockSetting) -> Result<(), HardwareError> {
            Ok(())
        }

        fn start(&mut self) -> Result<(), HardwareError> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn receive_block(&mut self, _timeout: Duration, _frames: &mut [[i32; 2]]) -> Result<usize, HardwareError> {
            thread::sleep(Duration::from_millis(1));
            Ok(0)
        }
    }

    struct MockTuner {
        present: bool,
        tuned: Arc<Mutex<Vec<u32>>>,
    }

    impl Tuner for MockTuner {
        fn init(&mut self, _threshold: SeekThreshold) -> Result<(), TunerError> {
            if self.present { Ok(()) } else { Err(TunerError::NotFound) }
        }

        fn band_info(&mut self, _band: Band) -> Result<BandInfo, TunerError> {
            Ok(BandInfo { min_khz: 87_500, max_khz: 108_000, khz_per_channel: 100 })
        }

        fn set_volume(&mut self, _percent: u32) -> Result<(), TunerError> {
            Ok(())
        }

        fn tune_to(&mut self, freq_khz: u32) -> Result<(), TunerError> {
            self.tuned.lock().unwrap().push(freq_khz);
            Ok(())
        }

        fn tuned(&mut self) -> Result<u32, TunerError> {
            self.tuned.lock().unwrap().last().copied().ok_or(TunerError::Unsupported)
        }

        fn tune(&mut self, _up: bool, _wrap: bool) -> Result<(), TunerError> {
            Err(TunerError::Unsupported)
        }

        fn seek(&mut self, _up: bool, _wrap: bool) -> Result<(), TunerError> {
            Err(TunerError::Unsupported)
        }

        fn rssi(&mut self) -> Result<SignalQuality, TunerError> {
            Ok(SignalQuality { rssi: 40, stereo: true, afc_railed: false })
        }

        fn rds(&mut self) -> Result<RdsText, TunerError> {
            Ok(RdsText::default())
        }
    }

    fn tuner(present: bool) -> (Box<dyn Tuner + Send>, Arc<Mutex<Vec<u32>>>) {
        let tuned = Arc::new(Mutex::new(Vec::new()));
        (Box::new(MockTuner { present, tuned: tuned.clone() }), tuned)
    }

    fn device(candidates: Vec<Box<dyn Tuner + Send>>) -> RadioDevice<IdleHardware> {
        let capture = AudioCapture::new(IdleHardware, CaptureConfig::default());
        RadioDevice::new(Config::default(), capture, candidates)
    }

    fn stations() -> Vec<StationInfo> {
        vec![StationInfo::new(101_300), StationInfo::new(88_100)]
    }

    #[test]
    fn probes_first_working_tuner() {
        let (missing, missing_log) = tuner(false);
        let (first, first_log) = tuner(true);
        let (second, second_log) = tuner(true);

        let mut d = device(vec![missing, first, second]);
        assert!(d.has_tuner());
        assert_eq!(d.band().map(|b| b.channels()), Some(206));

        d.latch().request_tune_to(95_000);
        assert_eq!(d.service(), Ok(Some(95_000)));

        assert!(missing_log.lock().unwrap().is_empty());
        assert_eq!(first_log.lock().unwrap().as_slice(), &[95_000]);
        assert!(second_log.lock().unwrap().is_empty());
    }

    #[test]
    fn station_read_retunes() {
        let (t, tuned) = tuner(true);
        let mut d = device(vec![t]);
        let disk = d.mount(&stations()).unwrap();

        let start = disk.start_sectors().get(1).unwrap().start_sector;
        let lba = Config::default().start_clusters() + start;

        let mut sector = [0u8; SECTOR_SIZE];
        disk.read_sectors(lba, 1, &mut sector).unwrap();

        let live = WavHeader::streaming(WavFormat::LIVE).to_bytes().unwrap();
        assert_eq!(&sector[..WAV_HEADER_SIZE], &live[..]);
        assert!(d.capture().is_active());

        assert_eq!(d.service(), Ok(Some(88_100)));
        assert_eq!(d.service(), Ok(None));
        assert_eq!(tuned.lock().unwrap().as_slice(), &[88_100]);

        d.capture().stop();
    }

    #[test]
    fn without_tuner_serves_fallback() {
        let (t, _tuned) = tuner(false);
        let mut d = device(vec![t]);
        assert!(!d.has_tuner());
        assert_eq!(d.band(), None);

        let disk = d.mount(&stations()).unwrap();
        let mut sector = [0u8; SECTOR_SIZE];
        disk.read_sectors(Config::default().start_clusters(), 1, &mut sector).unwrap();

        let fallback = WavHeader::streaming(WavFormat::FALLBACK).to_bytes().unwrap();
        assert_eq!(&sector[..WAV_HEADER_SIZE], &fallback[..]);
        assert_eq!(d.latch().pending(), None);
        assert_eq!(d.service(), Ok(None));

        d.capture().stop();
    }

    #[test]
    fn mounts_once() {
        let mut d = device(vec![]);
        assert!(d.mount(&[]).is_ok());
        assert!(matches!(d.mount(&[]), Err(MountError::AlreadyMounted)));
    }
}
