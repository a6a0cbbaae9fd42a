//! Audio capture pipeline
//!
//! A worker thread pulls raw 24 bit stereo frames from the capture hardware,
//! narrows them to 16 bits, optionally decimates to absorb a fast source clock
//! and publishes sector sized blocks into a small ring. The storage path
//! drains the ring one block per sector.
//!
//! Blocks move between the accumulator, ring slots and the reader's spare
//! block by swapping, the ring lock is only held for those swaps.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SECTOR_SIZE;
use crate::error::{CaptureError, HardwareError};
use crate::source::AudioSource;

/// 16 bit stereo frames per output block, one sector
pub const FRAMES_PER_BLOCK: usize = SECTOR_SIZE / 4;

/// Output ring slots
pub const RING_CAPACITY: usize = 6;

/// Audio reference oscillator
pub const OSCILLATOR_HZ: u32 = 32_000_000;

/// Codec master clock per sample
pub const MCLK_RATIO: u32 = 256;

/// One whole sample in 16.16 fixed point
const DROP_ONE: u32 = 1 << 16;

/// Reader silence before a ring overflow is worth reporting
const OVERFLOW_IDLE: Duration = Duration::from_secs(1);

const OVERFLOW_WARN_INTERVAL: Duration = Duration::from_secs(2);

/// Master clock divider register values for a 32 MHz source
const CLOCK_DIVIDERS: [(u8, u32); 12] = [
    (1, 0x0000_0000),
    (2, 0x8000_0000),
    (3, 0x5000_0000),
    (4, 0x4000_0000),
    (5, 0x3000_0000),
    (6, 0x2800_0000),
    (8, 0x2000_0000),
    (10, 0x1800_0000),
    (11, 0x1600_0000),
    (15, 0x1100_0000),
    (16, 0x1000_0000),
    (21, 0x0C00_0000),
];

/// Raw sample layout requested from the hardware
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self { sample_rate: 44_100, channels: 2, bits_per_sample: 24 }
    }
}

/// Capture configuration
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    /// Format requested from the hardware
    pub format: StreamFormat,
    /// Fraction of samples discarded, 16.16 fixed point in `[0, 65536)`
    pub drop_rate: u32,
    /// Stop capturing after this long
    pub duration: Option<Duration>,
    /// Wait for one raw block before the hardware is considered faulty
    pub receive_timeout: Duration,
    /// Reference oscillator the master clock is divided from
    pub oscillator_hz: u32,

    /// Force use of Default::default() for construction
    _reserved: (),
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::default(),
            drop_rate: 0,
            duration: None,
            receive_timeout: Duration::from_secs(1),
            oscillator_hz: OSCILLATOR_HZ,
            _reserved: (),
        }
    }
}

/// Drop rate absorbing a source clock running faster than nominal
pub fn drop_rate_for(source_hz: u32, nominal_hz: u32) -> u32 {
    if source_hz <= nominal_hz {
        return 0;
    }

    let rate = (source_hz - nominal_hz) as u64 * DROP_ONE as u64 / source_hz as u64;
    u32::min(rate as u32, DROP_ONE - 1)
}

/// Master clock source applied to the capture interface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature="defmt", derive(defmt::Format))]
pub enum ClockSetting {
    /// Oscillator drives the codec directly
    Bypass,
    /// Oscillator divided down, `register` is the divider configuration
    Divided { divisor: u8, register: u32 },
}

impl ClockSetting {
    /// Resulting master clock
    pub fn frequency(&self, oscillator_hz: u32) -> u32 {
        match self {
            ClockSetting::Bypass => oscillator_hz,
            ClockSetting::Divided { divisor, .. } => oscillator_hz / *divisor as u32,
        }
    }
}

/// Pick the divider giving a master clock closest to 256 times `sample_rate`
pub fn select_clock(sample_rate: u32, oscillator_hz: u32) -> Result<ClockSetting, CaptureError> {
    let desired = sample_rate as u64 * MCLK_RATIO as u64;

    if desired > oscillator_hz as u64 {
        return Err(CaptureError::BadClock {
            mclk_hz: u32::try_from(desired).unwrap_or(u32::MAX),
            oscillator_hz,
        });
    }

    let mut best = ClockSetting::Bypass;
    let mut best_diff = oscillator_hz as u64 - desired;

    for (divisor, register) in CLOCK_DIVIDERS.iter().skip(1) {
        let actual = (oscillator_hz / *divisor as u32) as u64;
        let diff = if actual > desired { actual - desired } else { desired - actual };

        if diff < best_diff {
            best_diff = diff;
            best = ClockSetting::Divided { divisor: *divisor, register: *register };
        }
    }

    crate::info!("Clock for {} Hz: {:?} ({} Hz)", sample_rate, best, best.frequency(oscillator_hz));

    Ok(best)
}

/// Narrow a pair of sign extended 24 bit samples to one 16 bit stereo word
///
/// Left lands in the high half, right in the low half.
pub fn narrow(left: i32, right: i32) -> u32 {
    ((left << 8) as u32 & 0xFFFF_0000) | ((right >> 8) as u32 & 0x0000_FFFF)
}

/// Sector sized block of 16 bit stereo frames
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBlock {
    frames: Box<[u32; FRAMES_PER_BLOCK]>,
    len: usize,
}

impl AudioBlock {
    pub fn new() -> Self {
        Self { frames: Box::new([0; FRAMES_PER_BLOCK]), len: 0 }
    }

    /// Append a frame, returns true once the block is full
    pub fn push(&mut self, frame: u32) -> bool {
        if self.len < FRAMES_PER_BLOCK {
            self.frames[self.len] = frame;
            self.len += 1;
        }
        self.is_full()
    }

    /// Forget the most recent frame
    pub fn rollback(&mut self) {
        self.len = self.len.saturating_sub(1);
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == FRAMES_PER_BLOCK
    }

    pub fn frames(&self) -> &[u32] {
        &self.frames[..self.len]
    }

    /// Serialise as WAV sample data, left then right, little endian
    pub fn write_to(&self, out: &mut [u8]) {
        for (b, f) in out.chunks_exact_mut(4).zip(self.frames.iter()) {
            b[..2].copy_from_slice(&((*f >> 16) as u16).to_le_bytes());
            b[2..].copy_from_slice(&(*f as u16).to_le_bytes());
        }
    }
}

impl Default for AudioBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed capacity ring of published blocks
#[derive(Debug)]
pub struct OutputRing {
    slots: Vec<AudioBlock>,
    head: usize,
    tail: usize,
    count: usize,
}

impl OutputRing {
    pub fn new() -> Self {
        Self {
            slots: (0..RING_CAPACITY).map(|_| AudioBlock::new()).collect(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == RING_CAPACITY
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Swap `block` into the head slot, handing back a cleared block
    ///
    /// Returns false and leaves `block` untouched when full.
    pub fn publish(&mut self, block: &mut AudioBlock) -> bool {
        if self.is_full() {
            return false;
        }

        mem::swap(&mut self.slots[self.head], block);
        block.clear();

        self.head = (self.head + 1) % RING_CAPACITY;
        self.count += 1;
        true
    }

    /// Swap the oldest block out into `spare`
    pub fn take(&mut self, spare: &mut AudioBlock) -> bool {
        if self.is_empty() {
            return false;
        }

        mem::swap(&mut self.slots[self.tail], spare);

        self.tail = (self.tail + 1) % RING_CAPACITY;
        self.count -= 1;
        true
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

impl Default for OutputRing {
    fn default() -> Self {
        Self::new()
    }
}

/// 16.16 fixed point fractional sample dropper
#[derive(Clone, Debug, PartialEq)]
pub struct Decimator {
    drop_rate: u32,
    fraction: u32,
}

impl Decimator {
    pub fn new(drop_rate: u32) -> Self {
        Self { drop_rate: u32::min(drop_rate, DROP_ONE - 1), fraction: 0 }
    }

    /// Advance one sample, false when it should be discarded
    pub fn keep(&mut self) -> bool {
        self.fraction += self.drop_rate;
        if self.fraction < DROP_ONE {
            true
        } else {
            self.fraction -= DROP_ONE;
            false
        }
    }

    pub fn reset(&mut self) {
        self.fraction = 0;
    }
}

/// Rate limit for ring overflow warnings
#[derive(Debug, Default)]
struct OverflowLimiter {
    last_warning: Option<Instant>,
}

impl OverflowLimiter {
    fn should_warn(&mut self, now: Instant, last_read: Instant) -> bool {
        // Reader is keeping up, the drop is a transient
        if now.saturating_duration_since(last_read) <= OVERFLOW_IDLE {
            return false;
        }

        if let Some(w) = self.last_warning {
            if now.saturating_duration_since(w) < OVERFLOW_WARN_INTERVAL {
                return false;
            }
        }

        self.last_warning = Some(now);
        true
    }
}

/// Snapshot of capture counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub blocks_received: u64,
    pub blocks_published: u64,
    pub overflow_drops: u64,
    pub samples_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    blocks_received: AtomicU64,
    blocks_published: AtomicU64,
    overflow_drops: AtomicU64,
    samples_dropped: AtomicU64,
}

#[derive(Debug)]
struct RingState {
    ring: OutputRing,
    last_read: Instant,
}

/// State shared between the capture worker and readers
#[derive(Debug)]
struct Shared {
    state: Mutex<RingState>,
    ready: Condvar,
    active: AtomicBool,
    counters: Counters,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(RingState { ring: OutputRing::new(), last_read: Instant::now() }),
            ready: Condvar::new(),
            active: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    fn reset(&self) {
        let mut s = lock(&self.state);
        s.ring.clear();
        s.last_read = Instant::now();
    }

    /// Publish a completed block or drop it when the ring is full
    fn publish(&self, block: &mut AudioBlock, limiter: &mut OverflowLimiter) -> bool {
        let mut s = lock(&self.state);

        if s.ring.publish(block) {
            drop(s);
            self.counters.blocks_published.fetch_add(1, Ordering::Relaxed);
            self.ready.notify_one();
            return true;
        }

        let last_read = s.last_read;
        drop(s);

        // Next sample completes the block again
        block.rollback();
        let drops = self.counters.overflow_drops.fetch_add(1, Ordering::Relaxed) + 1;

        if limiter.should_warn(Instant::now(), last_read) {
            crate::warn!("Audio ring overflow, {} blocks dropped", drops);
        }

        false
    }

    fn take(&self, spare: &mut AudioBlock) -> bool {
        let mut s = lock(&self.state);
        if s.ring.take(spare) {
            s.last_read = Instant::now();
            true
        } else {
            false
        }
    }

    fn wait_take(&self, spare: &mut AudioBlock, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut s = lock(&self.state);

        loop {
            if s.ring.take(spare) {
                s.last_read = Instant::now();
                return true;
            }

            if !self.active.load(Ordering::Acquire) {
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            s = match self.ready.wait_timeout(s, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }

    fn stats(&self) -> CaptureStats {
        let c = &self.counters;
        CaptureStats {
            blocks_received: c.blocks_received.load(Ordering::Relaxed),
            blocks_published: c.blocks_published.load(Ordering::Relaxed),
            overflow_drops: c.overflow_drops.load(Ordering::Relaxed),
            samples_dropped: c.samples_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Capture interface driver
pub trait CaptureHardware: Send + 'static {
    fn configure(&mut self, format: &StreamFormat) -> Result<(), HardwareError>;

    fn set_clock(&mut self, clock: ClockSetting) -> Result<(), HardwareError>;

    fn start(&mut self) -> Result<(), HardwareError>;

    fn stop(&mut self);

    /// Receive raw frames, sign extended left and right samples, returning the count
    fn receive_block(&mut self, timeout: Duration, frames: &mut [[i32; 2]]) -> Result<usize, HardwareError>;
}

/// Capture session owner
///
/// Hardware is parked here while idle and moved into the worker thread while
/// capturing; the worker hands it back when it exits.
pub struct AudioCapture<H: CaptureHardware> {
    config: CaptureConfig,
    shared: Arc<Shared>,
    hardware: Mutex<Option<H>>,
    worker: Mutex<Option<JoinHandle<H>>>,
    spare: Mutex<AudioBlock>,
}

impl<H: CaptureHardware> AudioCapture<H> {
    pub fn new(hardware: H, config: CaptureConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new()),
            hardware: Mutex::new(Some(hardware)),
            worker: Mutex::new(None),
            spare: Mutex::new(AudioBlock::new()),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Reset the ring, configure and start the hardware, then spawn the worker
    ///
    /// A no-op while capturing.
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut worker = lock(&self.worker);

        if self.is_active() {
            return Ok(());
        }

        // Reclaim hardware from the previous session
        if let Some(handle) = worker.take() {
            match handle.join() {
                Ok(hw) => *lock(&self.hardware) = Some(hw),
                Err(_) => crate::error!("Capture worker panicked, hardware lost"),
            }
        }

        let mut hw = lock(&self.hardware).take().ok_or(CaptureError::Unavailable)?;

        if let Err(e) = Self::prepare(&mut hw, &self.config) {
            crate::error!("Capture start failed: {:?}", e);
            *lock(&self.hardware) = Some(hw);
            return Err(e);
        }

        self.shared.reset();
        self.shared.active.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let config = self.config.clone();

        match thread::Builder::new().name("audio-capture".into()).spawn(move || run(hw, shared, config)) {
            Ok(h) => {
                *worker = Some(h);
                Ok(())
            }
            Err(_) => {
                crate::error!("Failed to spawn capture worker");
                self.shared.active.store(false, Ordering::Release);
                Err(CaptureError::Spawn)
            }
        }
    }

    fn prepare(hw: &mut H, config: &CaptureConfig) -> Result<(), CaptureError> {
        hw.configure(&config.format)?;

        let clock = select_clock(config.format.sample_rate, config.oscillator_hz)?;
        hw.set_clock(clock)?;

        hw.start()?;
        Ok(())
    }

    /// Ask the worker to stop, observed once per received block
    pub fn stop(&self) {
        self.shared.active.store(false, Ordering::Release);
        self.shared.ready.notify_all();
    }

    /// Take the oldest block without waiting
    pub fn try_get_block(&self, spare: &mut AudioBlock) -> bool {
        self.shared.take(spare)
    }

    /// Take the oldest block, waiting up to `timeout` while capturing
    pub fn wait_block(&self, spare: &mut AudioBlock, timeout: Duration) -> bool {
        self.shared.wait_take(spare, timeout)
    }

    pub fn stats(&self) -> CaptureStats {
        self.shared.stats()
    }
}

impl<H: CaptureHardware> AudioSource for AudioCapture<H> {
    fn is_active(&self) -> bool {
        AudioCapture::is_active(self)
    }

    fn start(&self) -> Result<(), CaptureError> {
        AudioCapture::start(self)
    }

    fn read_block(&self, timeout: Duration, out: &mut [u8]) -> bool {
        let mut spare = lock(&self.spare);
        if !self.wait_block(&mut spare, timeout) {
            return false;
        }

        spare.write_to(out);
        true
    }
}

impl<H: CaptureHardware> Drop for AudioCapture<H> {
    fn drop(&mut self) {
        self.stop();

        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}

/// Capture worker loop, returns the hardware when capture ends
fn run<H: CaptureHardware>(mut hw: H, shared: Arc<Shared>, config: CaptureConfig) -> H {
    let mut block = AudioBlock::new();
    let mut decimator = Decimator::new(config.drop_rate);
    let mut limiter = OverflowLimiter::default();
    let mut raw = vec![[0i32; 2]; FRAMES_PER_BLOCK];
    let started = Instant::now();

    crate::info!("Capture started, drop rate {}", config.drop_rate);

    while shared.active.load(Ordering::Acquire) {
        if let Some(limit) = config.duration {
            if started.elapsed() >= limit {
                crate::info!("Capture duration reached");
                break;
            }
        }

        let n = match hw.receive_block(config.receive_timeout, &mut raw) {
            Ok(n) => usize::min(n, raw.len()),
            Err(e) => {
                let received = shared.counters.blocks_received.load(Ordering::Relaxed);
                crate::error!("Capture receive failed at block {}: {:?}", received, e);
                break;
            }
        };

        if n > 0 {
            shared.counters.blocks_received.fetch_add(1, Ordering::Relaxed);
        }

        for [left, right] in raw[..n].iter() {
            if !decimator.keep() {
                shared.counters.samples_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if block.push(narrow(*left, *right)) {
                shared.publish(&mut block, &mut limiter);
            }
        }
    }

    hw.stop();

    shared.active.store(false, Ordering::Release);
    shared.ready.notify_all();

    crate::info!("Capture stopped");

    hw
}
