//! Virtual FAT32 block device
//!
//! Every sector is computed on request from the template, the synthesized
//! allocation table and the audio source. Nothing the host reads is stored.

use core::time::Duration;

use usbd_scsi::{BlockDevice, BlockDeviceError};

use crate::config::SECTOR_SIZE;
use crate::error::{DiskError, LayoutError, MountError};
use crate::fat::FatTable;
use crate::layout::{Content, VolumeLayout, VolumeSection};
use crate::rewrite::{Placement, StartSectorMap};
use crate::source::AudioSource;
use crate::station::TuneRequest;
use crate::template::VolumeTemplate;
use crate::wav::{WavFormat, WavHeader, FALLBACK_TONE, WAV_HEADER_SIZE};
use crate::Config;

/// Default wait for a captured block before serving silence
pub const SAMPLE_WAIT: Duration = Duration::from_millis(1500);

/// Read-only FAT32 volume of station files
pub struct VirtualDisk<S, T> {
    config: Config,
    layout: VolumeLayout,
    template: VolumeTemplate,
    fat: FatTable,
    starts: StartSectorMap,
    audio: S,
    tuner: Option<T>,
    live_header: [u8; WAV_HEADER_SIZE],
    fallback_header: [u8; WAV_HEADER_SIZE],
    fallback: &'static [u8],
    sample_wait: Duration,
}

impl<S: AudioSource, T: TuneRequest> VirtualDisk<S, T> {
    /// Assemble a volume from a rewritten template and its start sectors
    ///
    /// `tuner` is `None` when no tuner was found, station files then carry
    /// the fallback clip's format.
    pub fn new(
        config: Config,
        template: VolumeTemplate,
        starts: StartSectorMap,
        audio: S,
        tuner: Option<T>,
    ) -> Result<Self, MountError> {
        config.validate()?;

        let layout = VolumeLayout::from_config(&config)?;
        let data = config.data_sectors();

        for (file, s) in starts.iter().enumerate() {
            if s.start_sector >= data {
                return Err(LayoutError::StartOutsideData { file, start_sector: s.start_sector }.into());
            }
        }

        let live_header = WavHeader::streaming(WavFormat::LIVE).to_bytes().map_err(|_| MountError::Encoding)?;
        let fallback_header = WavHeader::streaming(WavFormat::FALLBACK).to_bytes().map_err(|_| MountError::Encoding)?;

        crate::info!("Virtual disk: {} sectors, {} station files, tuner: {}",
            config.num_blocks, starts.len(), tuner.is_some());

        Ok(Self {
            fat: FatTable::new(&config),
            config,
            layout,
            template,
            starts,
            audio,
            tuner,
            live_header,
            fallback_header,
            fallback: &FALLBACK_TONE,
            sample_wait: SAMPLE_WAIT,
        })
    }

    /// Replace the 8 bit mono clip served while capture is inactive
    pub fn with_fallback_clip(mut self, clip: &'static [u8]) -> Self {
        self.fallback = clip;
        self
    }

    /// Set the wait for a captured block before an underrun
    pub fn with_sample_wait(mut self, wait: Duration) -> Self {
        self.sample_wait = wait;
        self
    }

    pub fn sector_count(&self) -> u32 {
        self.layout.sector_count()
    }

    pub fn sector_size(&self) -> u32 {
        self.config.sector_size()
    }

    pub fn layout(&self) -> &VolumeLayout {
        &self.layout
    }

    pub fn start_sectors(&self) -> &StartSectorMap {
        &self.starts
    }

    pub fn audio(&self) -> &S {
        &self.audio
    }

    /// Read `count` sectors from `lba` into `buf`
    ///
    /// Requests running past the end of the first section are filled up to the
    /// boundary and zeroed after it.
    pub fn read_sectors(&self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        let end = match lba.checked_add(count) {
            Some(end) if end <= self.sector_count() => end,
            _ => return Err(DiskError::OutOfRange { lba, count }),
        };

        let needed = count as usize * SECTOR_SIZE;
        if buf.len() < needed {
            return Err(DiskError::BufferTooSmall { needed, len: buf.len() });
        }

        if count == 0 {
            return Ok(());
        }

        let section = match self.layout.locate(lba) {
            Some(s) => *s,
            None => return Err(DiskError::OutOfRange { lba, count }),
        };

        crate::trace!("Reading {} sectors at lba {} ({:?})", count, lba, section.kind);

        let within = u32::min(end, section.end_sector()) - lba;
        let filled = within as usize * SECTOR_SIZE;

        for (i, sector) in buf[..filled].chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.read_sector(&section, lba - section.start_sector + i as u32, sector);
        }

        if within < count {
            crate::error!("Read of {} sectors at lba {} crosses the end of {:?}, zero filling {}",
                count, lba, section.kind, count - within);
            buf[filled..needed].fill(0);
        }

        Ok(())
    }

    /// Writes are refused, the volume is read-only
    pub fn write_sectors(&mut self, lba: u32, count: u32, _buf: &[u8]) -> Result<(), DiskError> {
        crate::warn!("Refusing write of {} sectors at lba {}", count, lba);
        Err(DiskError::ReadOnly)
    }

    /// Nothing is buffered
    pub fn sync(&mut self) -> Result<(), DiskError> {
        Ok(())
    }

    fn read_sector(&self, section: &VolumeSection, index: u32, sector: &mut [u8]) {
        match section.content() {
            Content::Template => self.template.read_sector(section.kind, index, sector),
            Content::Fat => self.fat.read_sector(index, sector),
            Content::Data => self.read_data(index, sector),
        }
    }

    fn read_data(&self, index: u32, sector: &mut [u8]) {
        match self.starts.placement(index, self.config.sectors_per_cluster) {
            Placement::Start { file, frequency_khz } => self.read_start(file, frequency_khz, sector),
            Placement::Alias { file, position } => {
                crate::trace!("Sector {} of file {} aliases stream sector {}", index, file, position);
                self.read_payload(position, sector)
            }
            Placement::Stream { position } => self.read_payload(position, sector),
        }
    }

    /// Host opened a station file, tune and prepend the WAV header
    fn read_start(&self, file: usize, frequency_khz: u32, sector: &mut [u8]) {
        crate::info!("Read starts station file {} ({} kHz)", file, frequency_khz);

        let header = match &self.tuner {
            Some(tuner) => {
                if frequency_khz != 0 {
                    tuner.request_tune_to(frequency_khz);
                }
                &self.live_header
            }
            None => &self.fallback_header,
        };

        if !self.audio.is_active() {
            if let Err(e) = self.audio.start() {
                crate::debug!("Capture not started: {:?}", e);
            }
        }

        sector[..WAV_HEADER_SIZE].copy_from_slice(header);

        let rest = &mut sector[WAV_HEADER_SIZE..];
        if self.audio.is_active() {
            rest.fill(0);
        } else {
            self.fill_fallback(0, rest);
        }
    }

    fn read_payload(&self, position: u32, sector: &mut [u8]) {
        if self.audio.is_active() {
            if !self.audio.read_block(self.sample_wait, sector) {
                crate::warn!("Audio underrun at stream sector {}", position);
                sector.fill(0);
            }
        } else {
            self.fill_fallback(self.fallback_offset(position), sector);
        }
    }

    /// Clip offset continuing seamlessly after the header in the first sector
    fn fallback_offset(&self, position: u32) -> usize {
        let len = self.fallback.len() as u64;
        if len == 0 {
            return 0;
        }

        let byte = position as u64 * SECTOR_SIZE as u64;
        ((byte % len + len - WAV_HEADER_SIZE as u64 % len) % len) as usize
    }

    fn fill_fallback(&self, offset: usize, out: &mut [u8]) {
        if self.fallback.is_empty() {
            // 8 bit unsigned silence
            out.fill(0x80);
            return;
        }

        let mut src = offset % self.fallback.len();
        for b in out.iter_mut() {
            *b = self.fallback[src];
            src += 1;
            if src == self.fallback.len() {
                src = 0;
            }
        }
    }
}

/// [`BlockDevice`] implementation for use with [`usbd_scsi`]
impl<S: AudioSource, T: TuneRequest> BlockDevice for VirtualDisk<S, T> {
    const BLOCK_BYTES: usize = SECTOR_SIZE;

    fn read_block(&self, lba: u32, block: &mut [u8]) -> Result<(), BlockDeviceError> {
        self.read_sectors(lba, 1, block).map_err(|e| match e {
            DiskError::OutOfRange { .. } => BlockDeviceError::InvalidAddress,
            _ => BlockDeviceError::HardwareError,
        })
    }

    fn write_block(&mut self, lba: u32, block: &[u8]) -> Result<(), BlockDeviceError> {
        self.write_sectors(lba, 1, block).map_err(|_| BlockDeviceError::WriteError)
    }

    fn max_lba(&self) -> u32 {
        self.sector_count() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};
    use pretty_assertions::assert_eq;

    use crate::error::CaptureError;
    use crate::fat::EOC;
    use crate::layout::SectionKind;
    use crate::rewrite::DirectoryRewriter;
    use crate::source::NoCapture;
    use crate::station::{StationInfo, TuneLatch};

    #[derive(Default)]
    struct RecordingTuner {
        calls: RefCell<Vec<u32>>,
    }

    impl TuneRequest for RecordingTuner {
        fn request_tune_to(&self, freq_khz: u32) {
            self.calls.borrow_mut().push(freq_khz);
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        active: Cell<bool>,
        starts: Cell<usize>,
        blocks: RefCell<Vec<[u8; SECTOR_SIZE]>>,
    }

    impl AudioSource for ScriptedSource {
        fn is_active(&self) -> bool {
            self.active.get()
        }

        fn start(&self) -> Result<(), CaptureError> {
            self.starts.set(self.starts.get() + 1);
            self.active.set(true);
            Ok(())
        }

        fn read_block(&self, _timeout: Duration, out: &mut [u8]) -> bool {
            let mut blocks = self.blocks.borrow_mut();
            if blocks.is_empty() {
                return false;
            }
            out.copy_from_slice(&blocks.remove(0));
            true
        }
    }

    fn disk<S: AudioSource, T: TuneRequest>(audio: S, tuner: Option<T>) -> VirtualDisk<S, T> {
        let config = Config::default();
        let mut template = VolumeTemplate::generate(&config).unwrap();
        let stations = [StationInfo::new(101_300), StationInfo::new(88_100)];
        let starts = DirectoryRewriter::new(&config, &stations).rewrite(template.root_dir_mut());

        VirtualDisk::new(config, template, starts, audio, tuner).unwrap()
    }

    fn read(d: &VirtualDisk<impl AudioSource, impl TuneRequest>, lba: u32) -> Vec<u8> {
        let mut b = vec![0u8; SECTOR_SIZE];
        d.read_sectors(lba, 1, &mut b).unwrap();
        b
    }

    const DATA: u32 = 864;

    #[test]
    fn template_sectors() {
        let d = disk(NoCapture, None::<TuneLatch>);
        let t = VolumeTemplate::generate(&Config::default()).unwrap();

        assert_eq!(read(&d, 0), t.section(SectionKind::Vbr));
        assert_eq!(read(&d, 0), read(&d, 0));
        assert_eq!(&read(&d, 6)[..], &t.section(SectionKind::Vbr)[..]);
        assert!(read(&d, 20).iter().all(|b| *b == 0));
    }

    #[test]
    fn fat_sectors() {
        let d = disk(NoCapture, None::<TuneLatch>);

        let s = read(&d, 32);
        assert_eq!(&s[8..12], &EOC.to_le_bytes());
        assert_eq!(&s[12..16], &4u32.to_le_bytes());
        assert_eq!(read(&d, 32 + 512), read(&d, 32 + 512));
    }

    #[test]
    fn start_sector_tunes_once() {
        let d = disk(NoCapture, Some(RecordingTuner::default()));
        let start = d.start_sectors().get(1).unwrap().start_sector;

        let s = read(&d, DATA + start);
        let live = WavHeader::streaming(WavFormat::LIVE).to_bytes().unwrap();
        assert_eq!(&s[..WAV_HEADER_SIZE], &live[..]);
        assert_eq!(&s[WAV_HEADER_SIZE..], &FALLBACK_TONE[..SECTOR_SIZE - WAV_HEADER_SIZE]);

        assert_eq!(d.tuner.as_ref().unwrap().calls.borrow().as_slice(), &[88_100]);

        // Files without a station never tune
        let start = d.start_sectors().get(5).unwrap().start_sector;
        read(&d, DATA + start);
        assert_eq!(d.tuner.as_ref().unwrap().calls.borrow().len(), 1);
    }

    #[test]
    fn fallback_header_without_tuner() {
        let d = disk(NoCapture, None::<TuneLatch>);
        let s = read(&d, DATA);

        let fallback = WavHeader::streaming(WavFormat::FALLBACK).to_bytes().unwrap();
        assert_eq!(&s[..WAV_HEADER_SIZE], &fallback[..]);
    }

    #[test]
    fn fallback_continues_after_header() {
        let d = disk(NoCapture, None::<TuneLatch>);
        let mut b = vec![0u8; 2 * SECTOR_SIZE];
        d.read_sectors(DATA, 2, &mut b).unwrap();

        let clip_len = 2 * SECTOR_SIZE - WAV_HEADER_SIZE;
        assert_eq!(&b[WAV_HEADER_SIZE..], &FALLBACK_TONE[..clip_len]);

        // Clip wraps around its end
        let position = (FALLBACK_TONE.len() / SECTOR_SIZE) as u32;
        let s = read(&d, DATA + position);
        let offset = d.fallback_offset(position);
        assert_eq!(s[0], FALLBACK_TONE[offset]);
        assert_eq!(s[SECTOR_SIZE - 1], FALLBACK_TONE[(offset + SECTOR_SIZE - 1) % FALLBACK_TONE.len()]);
    }

    #[test]
    fn secondary_file_aliases_stream() {
        let d = disk(NoCapture, Some(TuneLatch::new()));
        let start = d.start_sectors().get(3).unwrap().start_sector;

        for offset in [1, 17, 63] {
            assert_eq!(read(&d, DATA + start + offset), read(&d, DATA + offset));
        }
    }

    #[test]
    fn live_capture_payload() {
        let d = disk(ScriptedSource::default(), Some(TuneLatch::new()));
        d.audio().blocks.borrow_mut().push([0x11; SECTOR_SIZE]);

        let s = read(&d, DATA);
        assert_eq!(d.audio().starts.get(), 1);
        assert!(s[WAV_HEADER_SIZE..].iter().all(|b| *b == 0));

        assert!(read(&d, DATA + 1).iter().all(|b| *b == 0x11));

        // Nothing queued, silence
        let d = d.with_sample_wait(Duration::from_millis(1));
        assert!(read(&d, DATA + 2).iter().all(|b| *b == 0));

        // Already active, not restarted
        read(&d, DATA);
        assert_eq!(d.audio().starts.get(), 1);
    }

    #[test]
    fn bounds() {
        let d = disk(NoCapture, None::<TuneLatch>);
        let n = d.sector_count();
        let mut b = vec![0u8; 2 * SECTOR_SIZE];

        assert_eq!(d.read_sectors(n - 1, 2, &mut b), Err(DiskError::OutOfRange { lba: n - 1, count: 2 }));
        assert_eq!(d.read_sectors(u32::MAX, 2, &mut b), Err(DiskError::OutOfRange { lba: u32::MAX, count: 2 }));
        assert_eq!(d.read_sectors(0, 3, &mut b), Err(DiskError::BufferTooSmall { needed: 1536, len: 1024 }));
        assert_eq!(d.read_sectors(n - 2, 2, &mut b), Ok(()));
        assert_eq!(d.max_lba(), n - 1);
    }

    #[test]
    fn cross_section_zero_fills() {
        let d = disk(NoCapture, None::<TuneLatch>);
        let mut b = vec![0xAAu8; 3 * SECTOR_SIZE];

        // Last root directory sector then two data sectors
        d.read_sectors(DATA - 1, 3, &mut b).unwrap();
        assert!(b.iter().all(|v| *v == 0));
    }

    #[test]
    fn read_only() {
        let mut d = disk(NoCapture, None::<TuneLatch>);
        let b = [0u8; SECTOR_SIZE];

        assert_eq!(d.write_sectors(0, 1, &b), Err(DiskError::ReadOnly));
        assert!(matches!(d.write_block(0, &b), Err(BlockDeviceError::WriteError)));
        assert!(matches!(d.read_block(d.sector_count(), &mut [0u8; SECTOR_SIZE]), Err(BlockDeviceError::InvalidAddress)));
        assert_eq!(d.sync(), Ok(()));
    }
}
