//! Pure Rust HEVC/H.265 picture reconstruction
//!
//! This crate decodes HEVC slice segment data into reconstructed sample
//! planes plus the per-block metadata that later pictures and in-loop
//! filters depend on. It covers the Main, Main 10 and range extension
//! coding tools. Tiles and wavefront rows decode in parallel.
//!
//! Bitstream parsing above the slice data level (NAL units, parameter set
//! and slice header syntax, reference list construction) is the caller's
//! job: hand in the parsed [`Sps`], [`Pps`], [`SliceHeader`] and
//! [`RefPicList`]s.
//!
//! # Example
//!
//! ```ignore
//! use hevc_decoder::{DecoderConfig, PictureDecoder};
//!
//! let decoder = PictureDecoder::new(DecoderConfig::new().with_threads(4));
//! let mut frame = decoder.begin_picture(&sps, &pps, 0)?;
//! frame.decode_slice_segment(&header, &ref_lists, slice_data)?;
//! let picture = frame.finish();
//! println!("POC {} is {:?}", picture.poc(), picture.integrity());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

mod error;
pub mod hevc;

pub use error::{DecodeError, HevcError, Result};
pub use hevc::{
    FrameDecode, Integrity, PictureDecoder, Picture, PictureLayout, Pps, RefPicEntry, RefPicList,
    SliceHeader, SliceType, Sps,
};

use alloc::sync::Arc;
use core::fmt;

/// Resource limits checked before a picture is allocated
///
/// All limits are optional; `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum picture width in luma samples
    pub max_width: Option<u32>,
    /// Maximum picture height in luma samples
    pub max_height: Option<u32>,
    /// Maximum luma samples per picture (width * height)
    pub max_pixels: Option<u64>,
}

impl Default for Limits {
    /// 16384 x 16384, at most 100 megapixels
    fn default() -> Self {
        Self {
            max_width: Some(16384),
            max_height: Some(16384),
            max_pixels: Some(100_000_000),
        }
    }
}

impl Limits {
    /// No restrictions. Only for trusted inputs.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_width: None,
            max_height: None,
            max_pixels: None,
        }
    }

    /// Set the maximum dimensions
    #[must_use]
    pub fn max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    /// Set the maximum pixel count
    #[must_use]
    pub fn max_pixels(mut self, pixels: u64) -> Self {
        self.max_pixels = Some(pixels);
        self
    }

    /// Check picture dimensions against these limits
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::LimitExceeded`] naming the first limit hit.
    pub fn check(&self, width: u32, height: u32) -> core::result::Result<(), DecodeError> {
        if self.max_width.is_some_and(|max| width > max) {
            return Err(DecodeError::LimitExceeded("picture width"));
        }
        if self.max_height.is_some_and(|max| height > max) {
            return Err(DecodeError::LimitExceeded("picture height"));
        }
        if self
            .max_pixels
            .is_some_and(|max| u64::from(width) * u64::from(height) > max)
        {
            return Err(DecodeError::LimitExceeded("picture pixel count"));
        }
        Ok(())
    }
}

/// Decoder configuration
#[derive(Clone, Default)]
pub struct DecoderConfig {
    /// Worker threads for tiles and wavefront rows; 0 picks the rayon default
    pub threads: usize,
    /// Decode every substream on the calling thread
    pub force_sequential: bool,
    /// Resource limits
    pub limits: Limits,
    /// Cooperative cancellation, checked before every CTU
    pub stop: Option<Arc<dyn enough::Stop + Send + Sync>>,
}

impl fmt::Debug for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderConfig")
            .field("threads", &self.threads)
            .field("force_sequential", &self.force_sequential)
            .field("limits", &self.limits)
            .field("stop", &self.stop.is_some())
            .finish()
    }
}

impl DecoderConfig {
    /// Default configuration: parallel decoding, default limits
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads (0 = rayon default, 1 = sequential)
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Decode on the calling thread only
    #[must_use]
    pub fn with_force_sequential(mut self, force: bool) -> Self {
        self.force_sequential = force;
        self
    }

    /// Set resource limits
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Attach a stop token; decoding returns `Cancelled` once it fires
    #[must_use]
    pub fn with_stop(mut self, stop: Arc<dyn enough::Stop + Send + Sync>) -> Self {
        self.stop = Some(stop);
        self
    }
}
