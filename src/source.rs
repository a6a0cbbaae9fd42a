use alloc::sync::Arc;
use core::time::Duration;

use crate::error::CaptureError;

/// Synthesizer view of the audio capture pipeline
pub trait AudioSource {
    /// Whether blocks are being produced
    fn is_active(&self) -> bool;

    /// Begin capturing, a no-op when already active
    fn start(&self) -> Result<(), CaptureError>;

    /// Copy the oldest captured block into the sector `out`, waiting up to `timeout`
    ///
    /// Returns false when no block arrived in time.
    fn read_block(&self, timeout: Duration, out: &mut [u8]) -> bool;
}

/// Source for builds without capture hardware, the volume serves the fallback clip
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoCapture;

impl AudioSource for NoCapture {
    fn is_active(&self) -> bool {
        false
    }

    fn start(&self) -> Result<(), CaptureError> {
        Err(CaptureError::Unavailable)
    }

    fn read_block(&self, _timeout: Duration, _out: &mut [u8]) -> bool {
        false
    }
}

impl<S: AudioSource + ?Sized> AudioSource for &S {
    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn start(&self) -> Result<(), CaptureError> {
        (**self).start()
    }

    fn read_block(&self, timeout: Duration, out: &mut [u8]) -> bool {
        (**self).read_block(timeout, out)
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Arc<S> {
    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn start(&self) -> Result<(), CaptureError> {
        (**self).start()
    }

    fn read_block(&self, timeout: Duration, out: &mut [u8]) -> bool {
        (**self).read_block(timeout, out)
    }
}
