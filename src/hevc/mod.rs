//! HEVC/H.265 picture reconstruction
//!
//! This module turns already-parsed parameter sets, slice headers and
//! reference lists plus the raw slice segment data into reconstructed
//! sample planes with per-block metadata. NAL parsing, reference list
//! construction and in-loop filtering happen outside this module.
//!
//! Decoding a picture:
//!
//! 1. [`PictureDecoder::begin_picture`] validates the parameter sets and
//!    takes a [`Picture`] from the pool.
//! 2. [`FrameDecode::decode_slice_segment`] runs every slice segment.
//!    Tiles and wavefront rows inside a segment decode concurrently.
//! 3. [`FrameDecode::finish`] settles the picture's [`Integrity`] and
//!    releases anyone waiting on its progress.

mod availability;
mod bitstream;
mod cabac;
mod ctu;
pub mod grid;
mod inter;
mod intra;
mod motion;
pub mod params;
pub mod picture;
pub mod progress;
mod residual;
pub mod slice;
mod substream;
mod tables;
mod transform;

pub use grid::{MetaGrid, SamplePlane};
pub use params::{Capabilities, PcmParams, PictureLayout, Pps, ScalingList, Sps, TileInfo};
pub use picture::{
    CtuInfo, CuInfo, Integrity, MotionVector, PbInfo, PbMotion, Picture, PicturePool, SaoParams,
    SaoType, TuInfo,
};
pub use progress::{CtuProgress, Poisoned};
pub use slice::{
    IntraPredMode, MergeExtension, MergeExtensionSource, PartMode, PredMode, PredWeightTable,
    RefPicEntry, RefPicList, SliceHeader, SliceType, WeightEntry,
};
pub use substream::{FrameDecode, PictureDecoder, SubstreamEnd};
