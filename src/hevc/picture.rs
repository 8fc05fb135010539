//! Decoded picture: sample planes, block metadata and reconstruction state

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use super::grid::{CellValue, MetaGrid, SamplePlane};
use super::params::Sps;
use super::progress::{CtuProgress, PROGRESS_RECONSTRUCTED};
use super::slice::{IntraPredMode, PartMode, PredMode};

/// CTU slice address of a CTU that has not been decoded
pub const SLICE_ADDR_NONE: u32 = u32::MAX;

/// Log2 of the PB and TU metadata cell size in luma samples
pub const LOG2_PB_UNIT: u8 = 2;

/// Motion vector in quarter-sample units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MotionVector {
    /// Horizontal component
    pub x: i16,
    /// Vertical component
    pub y: i16,
}

impl MotionVector {
    /// Zero motion
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Construct from components
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// Predictor plus difference, wrapping to 16 bits
    pub fn wrapping_add(self, other: Self) -> Self {
        Self {
            x: self.x.wrapping_add(other.x),
            y: self.y.wrapping_add(other.y),
        }
    }
}

/// Motion of a prediction block: prediction flags, reference indices and vectors per list
#[derive(Clone, Copy, Debug)]
pub struct PbMotion {
    /// predFlagL0 / predFlagL1
    pub pred_flag: [bool; 2],
    /// refIdxL0 / refIdxL1 (-1 when the list is unused)
    pub ref_idx: [i8; 2],
    /// mvL0 / mvL1
    pub mv: [MotionVector; 2],
}

impl Default for PbMotion {
    fn default() -> Self {
        Self {
            pred_flag: [false; 2],
            ref_idx: [-1; 2],
            mv: [MotionVector::ZERO; 2],
        }
    }
}

impl PbMotion {
    /// Uni-prediction from one list
    pub fn uni(list: usize, ref_idx: i8, mv: MotionVector) -> Self {
        let mut m = Self::default();
        m.pred_flag[list] = true;
        m.ref_idx[list] = ref_idx;
        m.mv[list] = mv;
        m
    }

    /// Bi-prediction
    pub fn bi(ref_idx: [i8; 2], mv: [MotionVector; 2]) -> Self {
        Self {
            pred_flag: [true; 2],
            ref_idx,
            mv,
        }
    }

    /// Uses both lists
    pub fn is_bi(&self) -> bool {
        self.pred_flag[0] && self.pred_flag[1]
    }
}

/// Equal when the same lists are used with the same references and vectors.
/// Indices and vectors of an unused list are ignored.
impl PartialEq for PbMotion {
    fn eq(&self, other: &Self) -> bool {
        self.pred_flag == other.pred_flag
            && (0..2).all(|l| {
                !self.pred_flag[l]
                    || (self.ref_idx[l] == other.ref_idx[l] && self.mv[l] == other.mv[l])
            })
    }
}

impl Eq for PbMotion {}

/// PB flag: motion comes from sub-block partitioning
pub const PB_FLAG_SUB_BLOCK: u8 = 1;
/// PB flag: view synthesis prediction
pub const PB_FLAG_VIEW_SYNTHESIS: u8 = 2;
/// PB flag: inter-view motion
pub const PB_FLAG_INTER_VIEW: u8 = 4;

/// Prediction block metadata (per 4x4 luma unit)
#[derive(Clone, Copy, Debug, Default)]
pub struct PbInfo {
    /// Motion data
    pub motion: PbMotion,
    /// `PB_FLAG_*` bits
    pub flags: u8,
}

/// Compares motion content only; flags do not take part
impl PartialEq for PbInfo {
    fn eq(&self, other: &Self) -> bool {
        self.motion == other.motion
    }
}

impl CellValue for PbInfo {
    fn pack(self) -> u128 {
        let m = self.motion;
        (m.pred_flag[0] as u128)
            | (m.pred_flag[1] as u128) << 1
            | (m.ref_idx[0] as u8 as u128) << 2
            | (m.ref_idx[1] as u8 as u128) << 10
            | (m.mv[0].x as u16 as u128) << 18
            | (m.mv[0].y as u16 as u128) << 34
            | (m.mv[1].x as u16 as u128) << 50
            | (m.mv[1].y as u16 as u128) << 66
            | (self.flags as u128) << 82
    }

    fn unpack(bits: u128) -> Self {
        let i16_at = |shift: u32| (bits >> shift) as u16 as i16;
        Self {
            motion: PbMotion {
                pred_flag: [bits & 1 != 0, bits & 2 != 0],
                ref_idx: [(bits >> 2) as u8 as i8, (bits >> 10) as u8 as i8],
                mv: [
                    MotionVector::new(i16_at(18), i16_at(34)),
                    MotionVector::new(i16_at(50), i16_at(66)),
                ],
            },
            flags: (bits >> 82) as u8,
        }
    }
}

/// Coding unit metadata (per minimum coding block)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CuInfo {
    /// CuPredMode
    pub pred_mode: PredMode,
    /// PartMode
    pub part_mode: PartMode,
    /// CtDepth
    pub ct_depth: u8,
    /// log2CbSize
    pub log2_cb_size: u8,
    /// QpY
    pub qp_y: i8,
    /// pcm_flag
    pub pcm: bool,
    /// cu_transquant_bypass_flag
    pub bypass: bool,
    /// cu_skip_flag
    pub skip: bool,
}

impl CellValue for CuInfo {
    fn pack(self) -> u128 {
        (self.pred_mode as u128)
            | (self.part_mode as u128) << 2
            | (self.ct_depth as u128) << 5
            | (self.log2_cb_size as u128) << 8
            | (self.qp_y as u8 as u128) << 12
            | (self.pcm as u128) << 20
            | (self.bypass as u128) << 21
            | (self.skip as u128) << 22
    }

    fn unpack(bits: u128) -> Self {
        Self {
            pred_mode: PredMode::from_bits((bits & 3) as u32),
            part_mode: PartMode::from_bits((bits >> 2 & 7) as u32),
            ct_depth: (bits >> 5 & 7) as u8,
            log2_cb_size: (bits >> 8 & 15) as u8,
            qp_y: (bits >> 12) as u8 as i8,
            pcm: bits >> 20 & 1 != 0,
            bypass: bits >> 21 & 1 != 0,
            skip: bits >> 22 & 1 != 0,
        }
    }
}

/// TU flag: luma block has coefficients
pub const CBF_LUMA: u8 = 1;
/// TU flag: Cb block has coefficients
pub const CBF_CB: u8 = 2;
/// TU flag: Cr block has coefficients
pub const CBF_CR: u8 = 4;

/// Transform unit metadata (per 4x4 luma unit)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TuInfo {
    /// Transform tree depth
    pub depth: u8,
    /// log2TrafoSize of the luma block
    pub log2_size: u8,
    /// `CBF_*` bits
    pub cbf: u8,
    /// Luma intra prediction mode (DC for inter blocks)
    pub intra_mode: IntraPredMode,
}

impl CellValue for TuInfo {
    fn pack(self) -> u128 {
        (self.depth as u128)
            | (self.log2_size as u128) << 8
            | (self.cbf as u128) << 16
            | (self.intra_mode.as_u8() as u128) << 24
    }

    fn unpack(bits: u128) -> Self {
        Self {
            depth: bits as u8,
            log2_size: (bits >> 8) as u8,
            cbf: (bits >> 16) as u8,
            intra_mode: IntraPredMode::from_u8((bits >> 24) as u8).unwrap_or(IntraPredMode::DC),
        }
    }
}

/// Coding tree unit metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtuInfo {
    /// SliceAddrRs of the slice containing the CTU ([`SLICE_ADDR_NONE`] if not decoded)
    pub slice_addr: u32,
    /// Index into the picture's slice table
    pub slice_index: u16,
    /// TileId
    pub tile_id: u16,
    /// Reconstruction finished
    pub decoded: bool,
}

impl Default for CtuInfo {
    fn default() -> Self {
        Self {
            slice_addr: SLICE_ADDR_NONE,
            slice_index: 0,
            tile_id: 0,
            decoded: false,
        }
    }
}

impl CellValue for CtuInfo {
    fn pack(self) -> u128 {
        (self.slice_addr as u128)
            | (self.slice_index as u128) << 32
            | (self.tile_id as u128) << 48
            | (self.decoded as u128) << 64
    }

    fn unpack(bits: u128) -> Self {
        Self {
            slice_addr: bits as u32,
            slice_index: (bits >> 32) as u16,
            tile_id: (bits >> 48) as u16,
            decoded: bits >> 64 & 1 != 0,
        }
    }
}

/// SAO type of one component
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaoType {
    /// Not applied
    #[default]
    NotApplied,
    /// Band offset
    Band,
    /// Edge offset
    Edge,
}

/// Parsed SAO parameters of one CTU (Y, Cb, Cr)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaoParams {
    /// SaoTypeIdx per component
    pub type_idx: [SaoType; 3],
    /// SaoOffsetVal[1..=4], already scaled by log2_sao_offset_scale
    pub offsets: [[i16; 4]; 3],
    /// sao_band_position
    pub band_position: [u8; 3],
    /// SaoEoClass
    pub eo_class: [u8; 3],
}

/// Stored integrity value before `finish_decoding` ran
const INTEGRITY_PENDING: u8 = u8::MAX;

/// Picture-level integrity, ordered from best to worst
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Integrity {
    /// Fully decoded without errors
    Correct = 0,
    /// Decoded, but predicted from a missing or faulty reference
    DerivedFromFaultyReference = 1,
    /// Some slice segments failed to decode
    DecodingErrors = 2,
    /// No CTU was reconstructed
    NotDecoded = 3,
}

impl Integrity {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Integrity::Correct,
            1 => Integrity::DerivedFromFaultyReference,
            2 => Integrity::DecodingErrors,
            _ => Integrity::NotDecoded,
        }
    }
}

/// Reference POCs of one slice, kept so that later pictures can use this
/// picture as their collocated picture
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceRefInfo {
    /// POC of every reference, per list
    pub ref_poc: [Vec<i32>; 2],
    /// Long-term marking of every reference, per list
    pub long_term: [Vec<bool>; 2],
}

/// Geometry of a picture, used to match pool entries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Geometry {
    width: u32,
    height: u32,
    chroma_format: u8,
    bit_depth: [u8; 2],
    log2_ctb_size: u8,
    log2_min_cb_size: u8,
}

impl Geometry {
    fn of(sps: &Sps) -> Self {
        Self {
            width: sps.pic_width_in_luma_samples,
            height: sps.pic_height_in_luma_samples,
            chroma_format: sps.chroma_array_type(),
            bit_depth: [sps.bit_depth_y(), sps.bit_depth_c()],
            log2_ctb_size: sps.log2_ctb_size(),
            log2_min_cb_size: sps.log2_min_cb_size(),
        }
    }
}

/// A picture under reconstruction or finished
#[derive(Debug)]
pub struct Picture {
    geometry: Geometry,
    poc: i32,
    planes: [SamplePlane; 3],
    cu: MetaGrid<CuInfo>,
    pb: MetaGrid<PbInfo>,
    tu: MetaGrid<TuInfo>,
    ctu: MetaGrid<CtuInfo>,
    sao: Vec<OnceLock<SaoParams>>,
    progress: CtuProgress,
    slices: Mutex<Vec<Arc<SliceRefInfo>>>,
    damage: AtomicU8,
    integrity: AtomicU8,
}

impl Picture {
    /// Allocate a picture for `sps`, planes filled with mid-gray
    pub fn new(sps: &Sps, poc: i32) -> Self {
        let g = Geometry::of(sps);
        let (sub_w, sub_h) = sps.chroma_subsampling();
        let (cw, ch) = if g.chroma_format == 0 {
            (0, 0)
        } else {
            (g.width.div_ceil(sub_w), g.height.div_ceil(sub_h))
        };
        let ctus = sps.pic_width_in_ctbs() * sps.pic_height_in_ctbs();
        Self {
            geometry: g,
            poc,
            planes: [
                SamplePlane::new(g.width, g.height, 1 << (g.bit_depth[0] - 1)),
                SamplePlane::new(cw, ch, 1 << (g.bit_depth[1] - 1)),
                SamplePlane::new(cw, ch, 1 << (g.bit_depth[1] - 1)),
            ],
            cu: MetaGrid::new(g.width, g.height, g.log2_min_cb_size),
            pb: MetaGrid::new(g.width, g.height, LOG2_PB_UNIT),
            tu: MetaGrid::new(g.width, g.height, LOG2_PB_UNIT),
            ctu: MetaGrid::new(g.width, g.height, g.log2_ctb_size),
            sao: (0..ctus).map(|_| OnceLock::new()).collect(),
            progress: CtuProgress::new(ctus),
            slices: Mutex::new(Vec::new()),
            damage: AtomicU8::new(Integrity::Correct as u8),
            integrity: AtomicU8::new(INTEGRITY_PENDING),
        }
    }

    fn reset(&mut self, poc: i32) {
        self.poc = poc;
        for (c, plane) in self.planes.iter().enumerate() {
            plane.fill(1 << (self.geometry.bit_depth[c.min(1)] - 1));
        }
        self.cu.reset();
        self.pb.reset();
        self.tu.reset();
        self.ctu.reset();
        for sao in &mut self.sao {
            sao.take();
        }
        self.progress.reset();
        self.slices.get_mut().unwrap_or_else(PoisonError::into_inner).clear();
        *self.damage.get_mut() = Integrity::Correct as u8;
        *self.integrity.get_mut() = INTEGRITY_PENDING;
    }

    /// Picture order count
    pub fn poc(&self) -> i32 {
        self.poc
    }

    /// Luma width
    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    /// Luma height
    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    /// ChromaArrayType
    pub fn chroma_format(&self) -> u8 {
        self.geometry.chroma_format
    }

    /// Bit depth of component `c_idx`
    pub fn bit_depth(&self, c_idx: usize) -> u8 {
        self.geometry.bit_depth[c_idx.min(1)]
    }

    /// Log2 CTB size
    pub fn log2_ctb_size(&self) -> u8 {
        self.geometry.log2_ctb_size
    }

    /// Width in CTBs
    pub fn width_in_ctbs(&self) -> u32 {
        self.ctu.width()
    }

    /// Sample plane of component `c_idx` (0 = Y, 1 = Cb, 2 = Cr)
    pub fn plane(&self, c_idx: usize) -> &SamplePlane {
        &self.planes[c_idx]
    }

    /// CU metadata grid
    pub fn cu_grid(&self) -> &MetaGrid<CuInfo> {
        &self.cu
    }

    /// PB metadata grid
    pub fn pb_grid(&self) -> &MetaGrid<PbInfo> {
        &self.pb
    }

    /// TU metadata grid
    pub fn tu_grid(&self) -> &MetaGrid<TuInfo> {
        &self.tu
    }

    /// CU covering luma sample (x, y)
    pub fn cu_info(&self, x: u32, y: u32) -> CuInfo {
        self.cu.get(x, y)
    }

    /// PB covering luma sample (x, y)
    pub fn pb_info(&self, x: u32, y: u32) -> PbInfo {
        self.pb.get(x, y)
    }

    /// TU covering luma sample (x, y)
    pub fn tu_info(&self, x: u32, y: u32) -> TuInfo {
        self.tu.get(x, y)
    }

    /// CTU metadata by raster address
    pub fn ctu_info(&self, ctb_rs: u32) -> CtuInfo {
        let w = self.ctu.width();
        self.ctu.get_cell(ctb_rs % w, ctb_rs / w)
    }

    /// CTU metadata of the CTU containing luma sample (x, y)
    pub fn ctu_info_at(&self, x: u32, y: u32) -> CtuInfo {
        self.ctu.get(x, y)
    }

    pub(crate) fn set_ctu_info(&self, ctb_rs: u32, info: CtuInfo) {
        let w = self.ctu.width();
        let size = 1 << self.geometry.log2_ctb_size;
        self.ctu
            .set_rect((ctb_rs % w) * size, (ctb_rs / w) * size, size, size, info);
    }

    /// SAO parameters parsed for a CTU
    pub fn sao(&self, ctb_rs: u32) -> Option<&SaoParams> {
        self.sao.get(ctb_rs as usize)?.get()
    }

    pub(crate) fn set_sao(&self, ctb_rs: u32, params: SaoParams) {
        if let Some(slot) = self.sao.get(ctb_rs as usize) {
            // a CTU is parsed once per picture; a second write means the
            // caller fed overlapping segments and is ignored
            let _ = slot.set(params);
        }
    }

    /// Progress counters of this picture's CTUs
    pub fn progress(&self) -> &CtuProgress {
        &self.progress
    }

    /// Register the reference POCs of a slice, returning its index
    pub(crate) fn add_slice(&self, info: SliceRefInfo) -> u16 {
        let mut slices = self.slices.lock().unwrap_or_else(PoisonError::into_inner);
        slices.push(Arc::new(info));
        (slices.len() - 1) as u16
    }

    /// Reference information of a registered slice
    pub fn slice_ref_info(&self, index: u16) -> Option<Arc<SliceRefInfo>> {
        let slices = self.slices.lock().unwrap_or_else(PoisonError::into_inner);
        slices.get(index as usize).cloned()
    }

    /// Record a degradation observed while decoding
    pub(crate) fn degrade(&self, level: Integrity) {
        let prev = self.damage.fetch_max(level as u8, Ordering::AcqRel);
        if prev < level as u8 {
            log::warn!("picture POC {} integrity degraded to {:?}", self.poc, level);
        }
    }

    /// Compute the final integrity and release every CTU waiter
    pub(crate) fn finish_decoding(&self) -> Integrity {
        let total = self.progress.len() as u32;
        let decoded = (0..total).filter(|&rs| self.ctu_info(rs).decoded).count() as u32;
        let integrity = if decoded == 0 {
            Integrity::NotDecoded
        } else if decoded < total {
            Integrity::DecodingErrors
        } else {
            Integrity::from_u8(self.damage.load(Ordering::Acquire))
        };
        self.integrity.store(integrity as u8, Ordering::Release);
        self.progress.signal_all(PROGRESS_RECONSTRUCTED);
        integrity
    }

    /// Integrity after decoding finished ([`Integrity::NotDecoded`] before)
    pub fn integrity(&self) -> Integrity {
        Integrity::from_u8(self.integrity.load(Ordering::Acquire))
    }

    /// Integrity seen by a picture predicting from this one
    ///
    /// A picture still being decoded is faulty only once damage was recorded.
    pub fn is_faulty(&self) -> bool {
        let done = self.integrity.load(Ordering::Acquire);
        (done != INTEGRITY_PENDING && done != Integrity::Correct as u8)
            || self.damage.load(Ordering::Acquire) != Integrity::Correct as u8
    }
}

/// Free list of pictures that can be reused without reallocating
#[derive(Debug, Default)]
pub struct PicturePool {
    free: Mutex<Vec<Picture>>,
    capacity: usize,
}

impl PicturePool {
    /// Pool keeping at most `capacity` idle pictures
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// A cleared picture matching `sps`, reused when possible
    pub fn acquire(&self, sps: &Sps, poc: i32) -> Arc<Picture> {
        let wanted = Geometry::of(sps);
        let reused = {
            let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.iter()
                .position(|p| p.geometry == wanted)
                .map(|i| free.swap_remove(i))
        };
        match reused {
            Some(mut pic) => {
                pic.reset(poc);
                log::trace!("reusing pooled picture for POC {poc}");
                Arc::new(pic)
            }
            None => Arc::new(Picture::new(sps, poc)),
        }
    }

    /// Return a picture; kept only if this was the last handle and there is room
    pub fn recycle(&self, picture: Arc<Picture>) -> bool {
        let Ok(pic) = Arc::try_unwrap(picture) else {
            return false;
        };
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() >= self.capacity {
            return false;
        }
        free.push(pic);
        true
    }

    /// Number of idle pictures
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
