//! Coding tree unit decoding (H.265 7.3.8)
//!
//! A [`CtuDecoder`] owns the arithmetic decoder of one substream and walks
//! the coding quadtree of each CTU handed to it: SAO syntax, coding units,
//! prediction units, the transform tree, QP derivation and reconstruction
//! of every transform block. Prediction and residuals are written straight
//! into the [`Picture`] planes; syntax the neighbours depend on goes into
//! the picture's metadata grids.

use alloc::vec::Vec;

use super::availability::{PbLocation, zscan_available};
use super::bitstream::BitstreamReader;
use super::cabac::{self, CabacDecoder, ContextTable, context};
use super::inter::InterPredictor;
use super::intra::{self, IntraParams};
use super::motion::{MAX_MERGE_CANDIDATES, MotionPredictor};
use super::params::{PictureLayout, Pps, ScalingFactors, Sps};
use super::picture::{
    CBF_CB, CBF_CR, CBF_LUMA, CuInfo, MotionVector, PB_FLAG_INTER_VIEW, PbInfo, PbMotion,
    Picture, SaoParams, SaoType, TuInfo,
};
use super::residual::{self, CoeffBuffer, RdpcmDir, ResidualDecoder, ResidualParams};
use super::slice::{
    IntraPredMode, MergeExtension, MergeExtensionSource, PartMode, PredMode, RefPicList,
    SliceHeader, SliceType,
};
use super::tables::Tables;
use super::transform::{self, MAX_COEFF, TransformParams};
use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// Extension merge candidates considered per prediction block
const MAX_EXTENSION_CANDIDATES: usize = 2;

/// QpC as a function of qPi for ChromaArrayType 1 (Table 8-10), qPi 30..=43
const CHROMA_QP_TABLE: [i32; 14] = [29, 30, 31, 32, 33, 33, 34, 34, 35, 35, 36, 36, 37, 37];

fn chroma_qp_mapping(qpi: i32) -> i32 {
    match qpi {
        i32::MIN..30 => qpi,
        30..=43 => CHROMA_QP_TABLE[(qpi - 30) as usize],
        _ => qpi - 6,
    }
}

/// Everything about a slice segment that stays fixed while its CTUs decode
pub struct SliceContext<'a> {
    /// Active SPS
    pub sps: &'a Sps,
    /// Active PPS
    pub pps: &'a Pps,
    /// CTB addressing for the SPS/PPS pair
    pub layout: &'a PictureLayout,
    /// Slice segment header
    pub header: &'a SliceHeader,
    /// RefPicList0 / RefPicList1
    pub ref_lists: &'a [RefPicList; 2],
    /// Picture under reconstruction
    pub pic: &'a Picture,
    /// Shared scan and context lookup tables
    pub tables: &'a Tables,
    /// Scaling factors, `Some` when scaling lists are enabled
    pub scaling: Option<&'a ScalingFactors>,
    /// Source of inter-view / texture merge candidates
    pub extensions: Option<&'a dyn MergeExtensionSource>,
    /// Index of the slice's reference information in the picture
    pub slice_index: u16,
}

impl SliceContext<'_> {
    fn qp_bd_offset_y(&self) -> i32 {
        6 * i32::from(self.sps.bit_depth_luma_minus8)
    }

    fn qp_bd_offset_c(&self) -> i32 {
        6 * i32::from(self.sps.bit_depth_chroma_minus8)
    }

    fn subsampling(&self, c_idx: usize) -> (u32, u32) {
        if c_idx == 0 {
            (1, 1)
        } else {
            self.sps.chroma_subsampling()
        }
    }
}

/// Entropy coding state carried across substream and segment boundaries
///
/// Saved after the second CTU of a row for wavefront synchronization and
/// at the end of a segment for a following dependent segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntropyState {
    /// Context variables
    pub ctx: ContextTable,
    /// StatCoeff for persistent Rice adaptation
    pub stat_coeff: [u8; 4],
    /// QpY of the last coding unit decoded
    pub qp_y: i32,
}

impl EntropyState {
    /// Initial state for a slice segment (9.3.2.2)
    pub fn new(header: &SliceHeader) -> Self {
        Self {
            ctx: ContextTable::new(
                cabac::init_type(header.slice_type, header.cabac_init_flag),
                header.slice_qp_y,
            ),
            stat_coeff: [0; 4],
            qp_y: header.slice_qp_y,
        }
    }
}

/// Per coding unit syntax needed while its transform tree is decoded
#[derive(Clone, Copy, Debug, Default)]
struct CodingUnit {
    x0: u32,
    y0: u32,
    log2_size: u8,
    pred_mode: PredMode,
    part_mode: PartMode,
    bypass: bool,
    max_trafo_depth: u8,
    intra_split: bool,
    /// IntraPredModeC per partition (one entry unless 4:4:4 NxN)
    chroma_modes: [IntraPredMode; 4],
    /// intra_chroma_pred_mode == 4 per partition
    chroma_derived: [bool; 4],
}

impl CodingUnit {
    fn is_intra(&self) -> bool {
        self.pred_mode == PredMode::Intra
    }

    fn size(&self) -> u32 {
        1 << self.log2_size
    }

    /// Partition index of luma location (x, y) for 4:4:4 NxN chroma modes
    fn partition_of(&self, x: u32, y: u32) -> usize {
        if self.part_mode != PartMode::PartNxN {
            return 0;
        }
        let half = self.size() / 2;
        usize::from(x - self.x0 >= half) + 2 * usize::from(y - self.y0 >= half)
    }
}

/// Transform tree node (7.3.8.8)
#[derive(Clone, Copy, Debug)]
struct TreeNode {
    x0: u32,
    y0: u32,
    x_base: u32,
    y_base: u32,
    log2_size: u8,
    depth: u8,
    blk_idx: u8,
    /// cbf_cb of the parent (two flags for 4:2:2)
    parent_cbf_cb: [bool; 2],
    /// cbf_cr of the parent
    parent_cbf_cr: [bool; 2],
}

/// Decoder for the CTUs of one substream
pub struct CtuDecoder<'a> {
    s: &'a SliceContext<'a>,
    cabac: CabacDecoder<'a>,
    ctx: ContextTable,
    stat_coeff: [u8; 4],
    motion: MotionPredictor<'a>,
    inter: InterPredictor<'a>,

    // quantization state
    first_qg: bool,
    last_qp_y: i32,
    qp_y_pred: i32,
    qp_y: i32,
    is_cu_qp_delta_coded: bool,
    cu_qp_delta_val: i32,
    is_cu_chroma_qp_offset_coded: bool,
    cu_qp_offset: [i32; 2],

    cu: CodingUnit,
    coeffs: CoeffBuffer,
    residual: [i32; MAX_COEFF],
    luma_residual: [i32; MAX_COEFF],
    pred: [u16; MAX_COEFF],
}

impl<'a> CtuDecoder<'a> {
    /// Start decoding a substream from `data` with entropy state `state`
    pub fn new(s: &'a SliceContext<'a>, data: &'a [u8], state: EntropyState) -> Self {
        let weights = match s.header.slice_type {
            SliceType::P if s.pps.weighted_pred_flag => s.header.pred_weights.as_ref(),
            SliceType::B if s.pps.weighted_bipred_flag => s.header.pred_weights.as_ref(),
            _ => None,
        };
        Self {
            s,
            cabac: CabacDecoder::new(data),
            ctx: state.ctx,
            stat_coeff: state.stat_coeff,
            motion: MotionPredictor::new(
                s.pic,
                s.layout,
                s.header,
                s.ref_lists,
                s.pps.log2_parallel_merge_level(),
            ),
            inter: InterPredictor::new(
                s.pic,
                s.ref_lists,
                weights,
                s.sps.range_extension.high_precision_offsets_enabled_flag,
            ),
            first_qg: true,
            last_qp_y: state.qp_y,
            qp_y_pred: state.qp_y,
            qp_y: state.qp_y,
            is_cu_qp_delta_coded: false,
            cu_qp_delta_val: 0,
            is_cu_chroma_qp_offset_coded: false,
            cu_qp_offset: [0; 2],
            cu: CodingUnit::default(),
            coeffs: CoeffBuffer::default(),
            residual: [0; MAX_COEFF],
            luma_residual: [0; MAX_COEFF],
            pred: [0; MAX_COEFF],
        }
    }

    /// Snapshot of the entropy state after the last decoded CTU
    pub fn entropy_state(&self) -> EntropyState {
        EntropyState {
            ctx: self.ctx.clone(),
            stat_coeff: self.stat_coeff,
            qp_y: self.last_qp_y,
        }
    }

    /// Continue QP prediction from a previous segment of the same slice
    pub fn continue_qp_prediction(&mut self) {
        self.first_qg = false;
    }

    /// Bytes requested past the end of the substream
    pub fn overrun(&self) -> usize {
        self.cabac.overrun()
    }

    /// end_of_slice_segment_flag
    pub fn end_of_slice_segment(&mut self) -> bool {
        self.cabac.decode_terminate()
    }

    /// end_of_subset_one_bit, which must be 1
    pub fn end_of_subset(&mut self) -> Result<()> {
        if self.cabac.decode_terminate() {
            Ok(())
        } else {
            Err(HevcError::MissingTerminator)
        }
    }

    #[inline]
    fn bin(&mut self, ctx_idx: usize) -> bool {
        self.cabac.decode_bin(&mut self.ctx[ctx_idx])
    }

    #[inline]
    fn bypass(&mut self) -> bool {
        self.cabac.decode_bypass()
    }

    /// Decode coding_tree_unit() of the CTB at raster address `ctb_rs`
    pub fn decode_ctu(&mut self, ctb_rs: u32) -> Result<()> {
        let s = self.s;
        let log2_ctb = s.sps.log2_ctb_size();
        let x_ctb = (ctb_rs % s.layout.width_in_ctbs) << log2_ctb;
        let y_ctb = (ctb_rs / s.layout.width_in_ctbs) << log2_ctb;

        if s.header.sao_luma || s.header.sao_chroma {
            self.decode_sao(ctb_rs)?;
        }
        self.coding_quadtree(x_ctb, y_ctb, log2_ctb, 0)
    }

    // ---------------------------------------------------------------
    // SAO (7.3.8.3)
    // ---------------------------------------------------------------

    fn decode_sao(&mut self, ctb_rs: u32) -> Result<()> {
        let s = self.s;
        let layout = s.layout;
        let w = layout.width_in_ctbs;
        let (rx, ry) = (ctb_rs % w, ctb_rs / w);
        let slice_addr = s.header.slice_address;
        let tile = layout.tile_id_rs(ctb_rs);

        if rx > 0 && ctb_rs > slice_addr && layout.tile_id_rs(ctb_rs - 1) == tile {
            let merge_left = self.bin(context::SAO_MERGE_FLAG);
            if merge_left {
                let params = s.pic.sao(ctb_rs - 1).copied().unwrap_or_default();
                s.pic.set_sao(ctb_rs, params);
                return Ok(());
            }
        }
        if ry > 0 && ctb_rs - w >= slice_addr && layout.tile_id_rs(ctb_rs - w) == tile {
            let merge_up = self.bin(context::SAO_MERGE_FLAG);
            if merge_up {
                let params = s.pic.sao(ctb_rs - w).copied().unwrap_or_default();
                s.pic.set_sao(ctb_rs, params);
                return Ok(());
            }
        }

        let mut params = SaoParams::default();
        let components = if s.sps.chroma_array_type() != 0 { 3 } else { 1 };
        for c in 0..components {
            let enabled = if c == 0 { s.header.sao_luma } else { s.header.sao_chroma };
            if !enabled {
                continue;
            }
            params.type_idx[c] = match c {
                0 | 1 => self.decode_sao_type(),
                _ => params.type_idx[1],
            };
            if params.type_idx[c] == SaoType::NotApplied {
                continue;
            }

            let bit_depth = if c == 0 { s.sps.bit_depth_y() } else { s.sps.bit_depth_c() };
            let c_max = (1u32 << (bit_depth.min(10) - 5)) - 1;
            let mut abs = [0i32; 4];
            for v in abs.iter_mut() {
                *v = self.cabac.decode_bypass_unary(c_max) as i32;
            }

            let scale = if c == 0 {
                s.pps.range_extension.log2_sao_offset_scale_luma
            } else {
                s.pps.range_extension.log2_sao_offset_scale_chroma
            };

            if params.type_idx[c] == SaoType::Band {
                for v in abs.iter_mut() {
                    if *v != 0 && self.bypass() {
                        *v = -*v;
                    }
                }
                params.band_position[c] = self.cabac.decode_bypass_bits(5) as u8;
            } else {
                abs[2] = -abs[2];
                abs[3] = -abs[3];
                params.eo_class[c] = match c {
                    0 | 1 => self.cabac.decode_bypass_bits(2) as u8,
                    _ => params.eo_class[1],
                };
            }
            for (dst, v) in params.offsets[c].iter_mut().zip(abs) {
                *dst = (v << scale) as i16;
            }
        }
        s.pic.set_sao(ctb_rs, params);
        Ok(())
    }

    fn decode_sao_type(&mut self) -> SaoType {
        if !self.bin(context::SAO_TYPE_IDX) {
            SaoType::NotApplied
        } else if self.bypass() {
            SaoType::Edge
        } else {
            SaoType::Band
        }
    }

    // ---------------------------------------------------------------
    // Coding quadtree (7.3.8.4)
    // ---------------------------------------------------------------

    fn coding_quadtree(&mut self, x0: u32, y0: u32, log2_size: u8, depth: u8) -> Result<()> {
        let s = self.s;
        let size = 1u32 << log2_size;
        let min_cb = s.sps.log2_min_cb_size();
        let width = s.pic.width();
        let height = s.pic.height();

        let split = if x0 + size <= width && y0 + size <= height && log2_size > min_cb {
            self.decode_split_cu_flag(x0, y0, depth)
        } else {
            log2_size > min_cb
        };

        let log2_ctb = s.sps.log2_ctb_size();
        let qg_log2 = log2_ctb - s.pps.diff_cu_qp_delta_depth.min(log2_ctb);
        if log2_size >= qg_log2 {
            self.is_cu_qp_delta_coded = false;
            self.cu_qp_delta_val = 0;
            self.start_quantization_group(x0, y0);
        }
        let chroma_qg_log2 =
            log2_ctb - s.pps.range_extension.diff_cu_chroma_qp_offset_depth.min(log2_ctb);
        if s.header.cu_chroma_qp_offset_enabled && log2_size >= chroma_qg_log2 {
            self.is_cu_chroma_qp_offset_coded = false;
        }

        if split {
            let half = size / 2;
            let (x1, y1) = (x0 + half, y0 + half);
            self.coding_quadtree(x0, y0, log2_size - 1, depth + 1)?;
            if x1 < width {
                self.coding_quadtree(x1, y0, log2_size - 1, depth + 1)?;
            }
            if y1 < height {
                self.coding_quadtree(x0, y1, log2_size - 1, depth + 1)?;
            }
            if x1 < width && y1 < height {
                self.coding_quadtree(x1, y1, log2_size - 1, depth + 1)?;
            }
            Ok(())
        } else {
            self.coding_unit(x0, y0, log2_size, depth)
        }
    }

    fn decode_split_cu_flag(&mut self, x0: u32, y0: u32, depth: u8) -> bool {
        let s = self.s;
        let mut inc = 0;
        if zscan_available(s.pic, s.layout, x0, y0, x0 as i32 - 1, y0 as i32)
            && s.pic.cu_info(x0 - 1, y0).ct_depth > depth
        {
            inc += 1;
        }
        if zscan_available(s.pic, s.layout, x0, y0, x0 as i32, y0 as i32 - 1)
            && s.pic.cu_info(x0, y0 - 1).ct_depth > depth
        {
            inc += 1;
        }
        self.bin(context::SPLIT_CU_FLAG + inc)
    }

    // ---------------------------------------------------------------
    // Quantization parameters (8.6.1)
    // ---------------------------------------------------------------

    fn start_quantization_group(&mut self, x_qg: u32, y_qg: u32) {
        let s = self.s;
        let prev = if self.first_qg {
            self.first_qg = false;
            s.header.slice_qp_y
        } else {
            self.last_qp_y
        };
        let mask = s.sps.ctb_size() - 1;
        let qp_a = if x_qg & mask != 0 {
            i32::from(s.pic.cu_info(x_qg - 1, y_qg).qp_y)
        } else {
            prev
        };
        let qp_b = if y_qg & mask != 0 {
            i32::from(s.pic.cu_info(x_qg, y_qg - 1).qp_y)
        } else {
            prev
        };
        self.qp_y_pred = (qp_a + qp_b + 1) >> 1;
        self.update_qp_y();
    }

    fn update_qp_y(&mut self) {
        let off = self.s.qp_bd_offset_y();
        self.qp_y = ((self.qp_y_pred + self.cu_qp_delta_val + 52 + 2 * off) % (52 + off)) - off;
    }

    /// Qp'Y, Qp'Cb or Qp'Cr of the current coding unit
    fn qp_prime(&self, c_idx: usize) -> i32 {
        let s = self.s;
        if c_idx == 0 {
            return self.qp_y + s.qp_bd_offset_y();
        }
        let off_c = s.qp_bd_offset_c();
        let offset = if c_idx == 1 {
            i32::from(s.pps.pps_cb_qp_offset) + i32::from(s.header.cb_qp_offset)
        } else {
            i32::from(s.pps.pps_cr_qp_offset) + i32::from(s.header.cr_qp_offset)
        } + self.cu_qp_offset[c_idx - 1];
        let qpi = (self.qp_y + offset).clamp(-off_c, 57);
        let qpc = if s.sps.chroma_array_type() == 1 {
            chroma_qp_mapping(qpi)
        } else {
            qpi.min(51)
        };
        qpc + off_c
    }

    fn decode_cu_qp_delta(&mut self) -> Result<()> {
        let mut prefix = 0u32;
        while prefix < 5 {
            let inc = usize::from(prefix > 0);
            if !self.bin(context::CU_QP_DELTA_ABS + inc) {
                break;
            }
            prefix += 1;
        }
        let abs = if prefix == 5 {
            prefix + self.cabac.decode_eg(0)?
        } else {
            prefix
        };
        let mut delta = abs as i32;
        if abs > 0 && self.bypass() {
            delta = -delta;
        }

        let off = self.s.qp_bd_offset_y();
        if delta < -(26 + off / 2) || delta > 25 + off / 2 {
            return Err(HevcError::SyntaxOutOfRange {
                element: "cu_qp_delta",
                value: i64::from(delta),
            });
        }
        self.is_cu_qp_delta_coded = true;
        self.cu_qp_delta_val = delta;
        self.update_qp_y();
        Ok(())
    }

    fn decode_cu_chroma_qp_offset(&mut self) {
        let ext = &self.s.pps.range_extension;
        let flag = self.bin(context::CU_CHROMA_QP_OFFSET_FLAG);
        self.cu_qp_offset = if flag {
            let c_max = ext.cb_qp_offset_list.len().saturating_sub(1);
            let mut idx = 0;
            while idx < c_max && self.bin(context::CU_CHROMA_QP_OFFSET_IDX) {
                idx += 1;
            }
            [
                ext.cb_qp_offset_list.get(idx).copied().map_or(0, i32::from),
                ext.cr_qp_offset_list.get(idx).copied().map_or(0, i32::from),
            ]
        } else {
            [0; 2]
        };
        self.is_cu_chroma_qp_offset_coded = true;
    }

    // ---------------------------------------------------------------
    // Coding unit (7.3.8.5)
    // ---------------------------------------------------------------

    fn coding_unit(&mut self, x0: u32, y0: u32, log2_size: u8, depth: u8) -> Result<()> {
        let s = self.s;
        let size = 1u32 << log2_size;
        let slice_type = s.header.slice_type;

        let bypass = s.pps.transquant_bypass_enabled_flag
            && self.bin(context::CU_TRANSQUANT_BYPASS_FLAG);
        let skip = slice_type.is_inter() && self.decode_cu_skip_flag(x0, y0);

        let pred_mode = if skip {
            PredMode::Skip
        } else if slice_type.is_inter() {
            if self.bin(context::PRED_MODE_FLAG) {
                PredMode::Intra
            } else {
                PredMode::Inter
            }
        } else {
            PredMode::Intra
        };

        if !skip
            && pred_mode == PredMode::Intra
            && s.sps.palette_mode_enabled_flag
            && log2_size <= s.sps.log2_max_tb_size()
            && self.bin(context::PALETTE_MODE_FLAG)
        {
            if !s.sps.capabilities.screen_content {
                return Err(HevcError::CapabilityMismatch("palette mode"));
            }
            return Err(HevcError::Unsupported("palette mode coding units"));
        }

        let part_mode = if skip {
            PartMode::Part2Nx2N
        } else if pred_mode != PredMode::Intra || log2_size == s.sps.log2_min_cb_size() {
            self.decode_part_mode(pred_mode, log2_size)
        } else {
            PartMode::Part2Nx2N
        };

        self.update_qp_y();
        self.cu = CodingUnit {
            x0,
            y0,
            log2_size,
            pred_mode,
            part_mode,
            bypass,
            ..CodingUnit::default()
        };
        s.pic.cu_grid().set_rect(
            x0,
            y0,
            size,
            size,
            CuInfo {
                pred_mode,
                part_mode,
                ct_depth: depth,
                log2_cb_size: log2_size,
                qp_y: self.qp_y as i8,
                pcm: false,
                bypass,
                skip,
            },
        );
        s.pic.tu_grid().set_rect(
            x0,
            y0,
            size,
            size,
            TuInfo {
                depth: 0,
                log2_size,
                cbf: 0,
                intra_mode: IntraPredMode::DC,
            },
        );

        if skip {
            let pb = PbLocation::whole_cb(x0, y0, size);
            self.prediction_unit(&pb, true)?;
        } else if pred_mode == PredMode::Intra {
            let pcm = part_mode == PartMode::Part2Nx2N
                && s.sps.pcm_params.as_ref().is_some_and(|p| {
                    log2_size >= p.log2_min_size() && log2_size <= p.log2_max_size()
                })
                && self.cabac.decode_terminate();
            if pcm {
                s.pic.cu_grid().update_rect(x0, y0, size, size, |c| c.pcm = true);
                self.pcm_sample(x0, y0, log2_size)?;
            } else {
                self.decode_intra_modes(x0, y0, log2_size, part_mode);
                self.cu.intra_split = part_mode == PartMode::PartNxN;
                self.cu.max_trafo_depth =
                    s.sps.max_transform_hierarchy_depth_intra + u8::from(self.cu.intra_split);
                self.transform_tree_root()?;
            }
        } else {
            let mut merge_2nx2n = false;
            for (part_idx, (bx, by, bw, bh)) in part_mode.blocks(size).into_iter().enumerate() {
                let pb = PbLocation {
                    x_cb: x0,
                    y_cb: y0,
                    cb_size: size,
                    x_pb: x0 + bx,
                    y_pb: y0 + by,
                    width: bw,
                    height: bh,
                    part_idx: part_idx as u8,
                };
                let merge = self.prediction_unit(&pb, false)?;
                merge_2nx2n = merge && part_mode == PartMode::Part2Nx2N;
            }
            let rqt_root_cbf = merge_2nx2n || self.bin(context::RQT_ROOT_CBF);
            if rqt_root_cbf {
                self.cu.max_trafo_depth = s.sps.max_transform_hierarchy_depth_inter;
                self.transform_tree_root()?;
            }
        }

        let qp_y = self.qp_y as i8;
        s.pic.cu_grid().update_rect(x0, y0, size, size, |c| c.qp_y = qp_y);
        self.last_qp_y = self.qp_y;
        Ok(())
    }

    fn decode_cu_skip_flag(&mut self, x0: u32, y0: u32) -> bool {
        let s = self.s;
        let mut inc = 0;
        if zscan_available(s.pic, s.layout, x0, y0, x0 as i32 - 1, y0 as i32)
            && s.pic.cu_info(x0 - 1, y0).skip
        {
            inc += 1;
        }
        if zscan_available(s.pic, s.layout, x0, y0, x0 as i32, y0 as i32 - 1)
            && s.pic.cu_info(x0, y0 - 1).skip
        {
            inc += 1;
        }
        self.bin(context::CU_SKIP_FLAG + inc)
    }

    fn decode_part_mode(&mut self, pred_mode: PredMode, log2_size: u8) -> PartMode {
        let s = self.s;
        if self.bin(context::PART_MODE) {
            return PartMode::Part2Nx2N;
        }
        if pred_mode == PredMode::Intra {
            return PartMode::PartNxN;
        }

        let min_cb = s.sps.log2_min_cb_size();
        if log2_size == min_cb {
            if self.bin(context::PART_MODE + 1) {
                return PartMode::Part2NxN;
            }
            if log2_size == 3 || self.bin(context::PART_MODE + 2) {
                return PartMode::PartNx2N;
            }
            return PartMode::PartNxN;
        }

        let horizontal = self.bin(context::PART_MODE + 1);
        if !s.sps.amp_enabled_flag {
            return if horizontal {
                PartMode::Part2NxN
            } else {
                PartMode::PartNx2N
            };
        }
        let symmetric = self.bin(context::PART_MODE + 3);
        match (horizontal, symmetric) {
            (true, true) => PartMode::Part2NxN,
            (false, true) => PartMode::PartNx2N,
            (true, false) => {
                if self.bypass() {
                    PartMode::Part2NxnD
                } else {
                    PartMode::Part2NxnU
                }
            }
            (false, false) => {
                if self.bypass() {
                    PartMode::PartnRx2N
                } else {
                    PartMode::PartnLx2N
                }
            }
        }
    }

    fn pcm_sample(&mut self, x0: u32, y0: u32, log2_size: u8) -> Result<()> {
        let s = self.s;
        let pcm = s
            .sps
            .pcm_params
            .as_ref()
            .ok_or(HevcError::InvalidBitstream("pcm_flag without PCM parameters"))?;
        let size = 1u32 << log2_size;
        let mut reader = BitstreamReader::new(self.cabac.remaining_data());

        let components = if s.sps.chroma_array_type() != 0 { 3 } else { 1 };
        for c in 0..components {
            let (sub_w, sub_h) = s.subsampling(c);
            let (pcm_depth, depth) = if c == 0 {
                (pcm.bit_depth_y(), s.sps.bit_depth_y())
            } else {
                (pcm.bit_depth_c(), s.sps.bit_depth_c())
            };
            let plane = s.pic.plane(c);
            let (xc, yc) = (x0 / sub_w, y0 / sub_h);
            for y in 0..size / sub_h {
                for x in 0..size / sub_w {
                    let v = reader.read_bits(pcm_depth)? << (depth - pcm_depth);
                    plane.set(xc + x, yc + y, v as u16);
                }
            }
        }
        self.cabac.skip_and_reinit(reader.bytes_consumed());
        Ok(())
    }

    // ---------------------------------------------------------------
    // Intra prediction modes (8.4.2, 8.4.3)
    // ---------------------------------------------------------------

    fn decode_intra_modes(&mut self, x0: u32, y0: u32, log2_size: u8, part_mode: PartMode) {
        let s = self.s;
        let size = 1u32 << log2_size;
        let (parts, pb_size) = if part_mode == PartMode::PartNxN {
            (4usize, size / 2)
        } else {
            (1usize, size)
        };

        let mut prev_flags = [false; 4];
        for flag in prev_flags.iter_mut().take(parts) {
            *flag = self.bin(context::PREV_INTRA_LUMA_PRED_FLAG);
        }

        let mut luma_modes = [IntraPredMode::DC; 4];
        for j in 0..parts {
            let x_pb = x0 + (j as u32 % 2) * pb_size;
            let y_pb = y0 + (j as u32 / 2) * pb_size;
            let (mpm_idx, rem) = if prev_flags[j] {
                (Some(self.cabac.decode_bypass_unary(2) as u8), 0)
            } else {
                (None, self.cabac.decode_bypass_bits(5) as u8)
            };
            let cand_a = self.neighbour_intra_mode(x_pb, y_pb, x_pb as i32 - 1, y_pb as i32);
            let cand_b = self.neighbour_intra_mode(x_pb, y_pb, x_pb as i32, y_pb as i32 - 1);
            let mode = intra::luma_mode(intra::mpm_candidates(cand_a, cand_b), mpm_idx, rem);
            luma_modes[j] = mode;
            s.pic
                .tu_grid()
                .update_rect(x_pb, y_pb, pb_size, pb_size, |t| t.intra_mode = mode);
        }

        let chroma_422 = s.sps.chroma_array_type() == 2;
        let chroma_parts = match s.sps.chroma_array_type() {
            0 => 0,
            3 => parts,
            _ => 1,
        };
        for j in 0..chroma_parts {
            let raw = if self.bin(context::INTRA_CHROMA_PRED_MODE) {
                self.cabac.decode_bypass_bits(2) as u8
            } else {
                4
            };
            self.cu.chroma_modes[j] = intra::chroma_mode(raw, luma_modes[j], chroma_422);
            self.cu.chroma_derived[j] = raw == 4;
        }
    }

    /// candIntraPredModeX for the neighbour at (xn, yn) of the PB at (x_pb, y_pb)
    fn neighbour_intra_mode(&self, x_pb: u32, y_pb: u32, xn: i32, yn: i32) -> IntraPredMode {
        let s = self.s;
        if !zscan_available(s.pic, s.layout, x_pb, y_pb, xn, yn) {
            return IntraPredMode::DC;
        }
        let (xn, yn) = (xn as u32, yn as u32);
        let cu = s.pic.cu_info(xn, yn);
        if cu.pred_mode != PredMode::Intra || cu.pcm {
            return IntraPredMode::DC;
        }
        // the above neighbour must lie in the current CTB row
        let log2_ctb = s.sps.log2_ctb_size();
        if yn < y_pb && yn < ((y_pb >> log2_ctb) << log2_ctb) {
            return IntraPredMode::DC;
        }
        s.pic.tu_info(xn, yn).intra_mode
    }

    fn predict_intra_block(&mut self, c_idx: usize, x: u32, y: u32, log2_size: u8, mode: IntraPredMode) {
        let s = self.s;
        let (sub_w, sub_h) = s.subsampling(c_idx);
        let (x_cur, y_cur) = (x * sub_w, y * sub_h);
        let constrained = s.pps.constrained_intra_pred_flag;
        let available = |xn: i32, yn: i32| {
            let (lx, ly) = (xn * sub_w as i32, yn * sub_h as i32);
            zscan_available(s.pic, s.layout, x_cur, y_cur, lx, ly)
                && (!constrained || s.pic.cu_info(lx as u32, ly as u32).pred_mode == PredMode::Intra)
        };
        let ext = &s.sps.range_extension;
        let params = IntraParams {
            c_idx,
            bit_depth: s.pic.bit_depth(c_idx),
            chroma_444: s.sps.chroma_array_type() == 3,
            strong_smoothing: s.sps.strong_intra_smoothing_enabled_flag,
            smoothing_disabled: ext.intra_smoothing_disabled_flag,
            boundary_filter_disabled: ext.implicit_rdpcm_enabled_flag && self.cu.bypass,
        };

        let n = 1usize << log2_size;
        let plane = s.pic.plane(c_idx);
        let out = &mut self.pred[..n * n];
        intra::predict_intra(plane, x, y, log2_size, mode, &params, available, out);
        for (j, row) in out.chunks_exact(n).enumerate() {
            for (i, &v) in row.iter().enumerate() {
                plane.set(x + i as u32, y + j as u32, v);
            }
        }
    }

    // ---------------------------------------------------------------
    // Prediction units (7.3.8.6, 7.3.8.9)
    // ---------------------------------------------------------------

    /// Decode one prediction unit, derive its motion and predict it;
    /// returns merge_flag
    fn prediction_unit(&mut self, pb: &PbLocation, skip: bool) -> Result<bool> {
        let s = self.s;
        let header = s.header;

        let extensions = self.extension_candidates(pb)?;
        let motions: Vec<PbMotion> = extensions.iter().map(MergeExtension::motion).collect();
        let base = usize::from(header.max_num_merge_cand).min(MAX_MERGE_CANDIDATES);
        let ext_count = motions.len().min(MAX_MERGE_CANDIDATES - base);
        let capacity = base + ext_count;

        let merge = skip || self.bin(context::MERGE_FLAG);
        let mut flags = 0u8;
        let motion = if merge {
            let merge_idx = self.decode_merge_idx(capacity);
            if usize::from(merge_idx) < ext_count
                && matches!(extensions[usize::from(merge_idx)], MergeExtension::InterView(_))
            {
                flags |= PB_FLAG_INTER_VIEW;
            }
            self.motion.merge(pb, self.cu.part_mode, merge_idx, &motions)?
        } else {
            self.decode_amvp_motion(pb)?
        };

        s.pic
            .pb_grid()
            .set_rect(pb.x_pb, pb.y_pb, pb.width, pb.height, PbInfo { motion, flags });
        self.inter
            .predict(pb.x_pb, pb.y_pb, pb.width, pb.height, &motion)?;
        Ok(merge)
    }

    fn extension_candidates(&self, pb: &PbLocation) -> Result<Vec<MergeExtension>> {
        let s = self.s;
        let Some(source) = s.extensions else {
            return Ok(Vec::new());
        };
        let mut cands = source.candidates(pb.x_pb, pb.y_pb, pb.width, pb.height);
        cands.truncate(MAX_EXTENSION_CANDIDATES);
        let caps = s.sps.capabilities;
        for cand in &cands {
            match cand {
                MergeExtension::InterView(_) if !caps.multilayer => {
                    return Err(HevcError::CapabilityMismatch("inter-view merge candidate"));
                }
                MergeExtension::Texture(_) if !caps.depth_3d => {
                    return Err(HevcError::CapabilityMismatch("texture merge candidate"));
                }
                _ => {}
            }
        }
        Ok(cands)
    }

    fn decode_merge_idx(&mut self, capacity: usize) -> u8 {
        let c_max = capacity.saturating_sub(1) as u8;
        if c_max == 0 || !self.bin(context::MERGE_IDX) {
            return 0;
        }
        let mut idx = 1;
        while idx < c_max && self.bypass() {
            idx += 1;
        }
        idx
    }

    fn decode_amvp_motion(&mut self, pb: &PbLocation) -> Result<PbMotion> {
        let s = self.s;
        let header = s.header;

        // 0 = PRED_L0, 1 = PRED_L1, 2 = PRED_BI
        let inter_pred_idc = if header.slice_type == SliceType::B {
            self.decode_inter_pred_idc(pb)
        } else {
            0
        };

        let mut motion = PbMotion::default();
        for list in 0..2 {
            let used = inter_pred_idc == 2 || inter_pred_idc == list;
            if !used {
                continue;
            }
            let ref_idx = self.decode_ref_idx(header.num_ref_idx_active[list]);
            let mvd = if list == 1 && header.mvd_l1_zero && inter_pred_idc == 2 {
                MotionVector::ZERO
            } else {
                self.decode_mvd()?
            };
            let mvp_flag = self.bin(context::MVP_LX_FLAG);

            // AMVP of list 1 sees the list 0 decision only through neighbours
            let mvp = self.motion.mvp(pb, list, ref_idx, mvp_flag)?;
            motion.pred_flag[list] = true;
            motion.ref_idx[list] = ref_idx;
            motion.mv[list] = mvp.wrapping_add(mvd);
        }
        Ok(motion)
    }

    fn decode_inter_pred_idc(&mut self, pb: &PbLocation) -> usize {
        if pb.width + pb.height != 12 {
            let depth = self.s.pic.cu_info(pb.x_cb, pb.y_cb).ct_depth;
            if self.bin(context::INTER_PRED_IDC + usize::from(depth)) {
                return 2;
            }
        }
        usize::from(self.bin(context::INTER_PRED_IDC + 4))
    }

    fn decode_ref_idx(&mut self, num_active: u8) -> i8 {
        let c_max = num_active.saturating_sub(1);
        let mut idx = 0u8;
        while idx < c_max {
            let bit = if idx < 2 {
                self.bin(context::REF_IDX + usize::from(idx))
            } else {
                self.bypass()
            };
            if !bit {
                break;
            }
            idx += 1;
        }
        idx as i8
    }

    /// mvd_coding() (7.3.8.9)
    fn decode_mvd(&mut self) -> Result<MotionVector> {
        let gr0 = [
            self.bin(context::ABS_MVD_GREATER0_FLAG),
            self.bin(context::ABS_MVD_GREATER0_FLAG),
        ];
        let mut gr1 = [false; 2];
        for (g1, &g0) in gr1.iter_mut().zip(&gr0) {
            if g0 {
                *g1 = self.bin(context::ABS_MVD_GREATER1_FLAG);
            }
        }
        let mut mvd = [0i32; 2];
        for c in 0..2 {
            if !gr0[c] {
                continue;
            }
            let abs = if gr1[c] {
                i64::from(self.cabac.decode_eg(1)?) + 2
            } else {
                1
            };
            let value = if self.bypass() { -abs } else { abs };
            if !(-(1 << 15)..(1 << 15)).contains(&value) {
                return Err(HevcError::SyntaxOutOfRange {
                    element: "mvd",
                    value,
                });
            }
            mvd[c] = value as i32;
        }
        Ok(MotionVector::new(mvd[0] as i16, mvd[1] as i16))
    }

    // ---------------------------------------------------------------
    // Transform tree (7.3.8.8, 7.3.8.10)
    // ---------------------------------------------------------------

    fn transform_tree_root(&mut self) -> Result<()> {
        let cu = self.cu;
        self.transform_tree(TreeNode {
            x0: cu.x0,
            y0: cu.y0,
            x_base: cu.x0,
            y_base: cu.y0,
            log2_size: cu.log2_size,
            depth: 0,
            blk_idx: 0,
            parent_cbf_cb: [false; 2],
            parent_cbf_cr: [false; 2],
        })
    }

    fn transform_tree(&mut self, node: TreeNode) -> Result<()> {
        let s = self.s;
        let cu = self.cu;
        let log2 = node.log2_size;
        let chroma_type = s.sps.chroma_array_type();

        let split = if log2 <= s.sps.log2_max_tb_size()
            && log2 > s.sps.log2_min_tb_size()
            && node.depth < cu.max_trafo_depth
            && !(cu.intra_split && node.depth == 0)
        {
            self.bin(context::SPLIT_TRANSFORM_FLAG + 5 - usize::from(log2))
        } else {
            let inter_split = s.sps.max_transform_hierarchy_depth_inter == 0
                && cu.pred_mode == PredMode::Inter
                && cu.part_mode != PartMode::Part2Nx2N
                && node.depth == 0;
            log2 > s.sps.log2_max_tb_size() || (cu.intra_split && node.depth == 0) || inter_split
        };

        let mut cbf_cb = [false; 2];
        let mut cbf_cr = [false; 2];
        if (log2 > 2 && chroma_type != 0) || chroma_type == 3 {
            let second = chroma_type == 2 && (!split || log2 == 3);
            let ctx = context::CBF_CHROMA + usize::from(node.depth);
            if node.depth == 0 || node.parent_cbf_cb[0] || node.parent_cbf_cb[1] {
                cbf_cb[0] = self.bin(ctx);
                if second {
                    cbf_cb[1] = self.bin(ctx);
                }
            }
            if node.depth == 0 || node.parent_cbf_cr[0] || node.parent_cbf_cr[1] {
                cbf_cr[0] = self.bin(ctx);
                if second {
                    cbf_cr[1] = self.bin(ctx);
                }
            }
        } else if chroma_type != 0 {
            // 4x4 luma in 4:2:0 / 4:2:2: chroma belongs to the parent
            cbf_cb = node.parent_cbf_cb;
            cbf_cr = node.parent_cbf_cr;
        }

        if split {
            let half = 1u32 << (log2 - 1);
            for blk in 0..4u8 {
                let x = node.x0 + u32::from(blk & 1) * half;
                let y = node.y0 + u32::from(blk >> 1) * half;
                self.transform_tree(TreeNode {
                    x0: x,
                    y0: y,
                    x_base: node.x0,
                    y_base: node.y0,
                    log2_size: log2 - 1,
                    depth: node.depth + 1,
                    blk_idx: blk,
                    parent_cbf_cb: cbf_cb,
                    parent_cbf_cr: cbf_cr,
                })?;
            }
            return Ok(());
        }

        let any_chroma = cbf_cb[0] || cbf_cb[1] || cbf_cr[0] || cbf_cr[1];
        let cbf_luma = if cu.is_intra() || node.depth != 0 || any_chroma {
            self.bin(context::CBF_LUMA + usize::from(node.depth == 0))
        } else {
            true
        };

        let size = 1u32 << log2;
        let mut cbf_bits = 0;
        if cbf_luma {
            cbf_bits |= CBF_LUMA;
        }
        if cbf_cb[0] || cbf_cb[1] {
            cbf_bits |= CBF_CB;
        }
        if cbf_cr[0] || cbf_cr[1] {
            cbf_bits |= CBF_CR;
        }
        s.pic.tu_grid().update_rect(node.x0, node.y0, size, size, |t| {
            t.depth = node.depth;
            t.log2_size = log2;
            t.cbf = cbf_bits;
        });

        self.transform_unit(&node, cbf_luma, cbf_cb, cbf_cr)
    }

    fn transform_unit(
        &mut self,
        node: &TreeNode,
        cbf_luma: bool,
        cbf_cb: [bool; 2],
        cbf_cr: [bool; 2],
    ) -> Result<()> {
        let s = self.s;
        let cu = self.cu;
        let log2 = node.log2_size;
        let chroma_type = s.sps.chroma_array_type();
        let cbf_chroma = cbf_cb[0] || cbf_cb[1] || cbf_cr[0] || cbf_cr[1];

        if cbf_luma || cbf_chroma {
            if s.pps.cu_qp_delta_enabled_flag && !self.is_cu_qp_delta_coded {
                self.decode_cu_qp_delta()?;
            }
            if s.header.cu_chroma_qp_offset_enabled
                && cbf_chroma
                && !cu.bypass
                && !self.is_cu_chroma_qp_offset_coded
            {
                self.decode_cu_chroma_qp_offset();
            }
        }

        // luma
        let luma_mode = s.pic.tu_info(node.x0, node.y0).intra_mode;
        if cu.is_intra() {
            self.predict_intra_block(0, node.x0, node.y0, log2, luma_mode);
        }
        if cbf_luma {
            self.reconstruct_block(0, node.x0, node.y0, log2, luma_mode, 0)?;
        }

        if chroma_type == 0 {
            return Ok(());
        }
        let (sub_w, sub_h) = s.sps.chroma_subsampling();
        let blocks = if chroma_type == 2 { 2 } else { 1 };

        if log2 > 2 || chroma_type == 3 {
            let log2_c = if chroma_type == 3 { log2 } else { log2 - 1 };
            let part = cu.partition_of(node.x0, node.y0);
            let chroma_mode = cu.chroma_modes[part];
            let ccp_allowed = s.pps.range_extension.cross_component_prediction_enabled_flag
                && cbf_luma
                && (!cu.is_intra() || cu.chroma_derived[part]);
            let (xc, yc) = (node.x0 / sub_w, node.y0 / sub_h);

            for (c, cbf) in [(1usize, cbf_cb), (2, cbf_cr)] {
                let res_scale = if ccp_allowed {
                    self.decode_cross_comp_pred(c - 1)
                } else {
                    0
                };
                for t in 0..blocks {
                    let y = yc + (t << log2_c);
                    if cu.is_intra() {
                        self.predict_intra_block(c, xc, y, log2_c, chroma_mode);
                    }
                    if cbf[t as usize] || res_scale != 0 {
                        self.reconstruct_chroma(c, xc, y, log2_c, chroma_mode, cbf[t as usize], res_scale)?;
                    }
                }
            }
        } else if node.blk_idx == 3 {
            let chroma_mode = cu.chroma_modes[0];
            let (xc, yc) = (node.x_base / sub_w, node.y_base / sub_h);
            for (c, cbf) in [(1usize, cbf_cb), (2, cbf_cr)] {
                for t in 0..blocks {
                    let y = yc + (t << 2);
                    if cu.is_intra() {
                        self.predict_intra_block(c, xc, y, 2, chroma_mode);
                    }
                    if cbf[t as usize] {
                        self.reconstruct_block(c, xc, y, 2, chroma_mode, 0)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// cross_comp_pred(): ResScaleVal for chroma component `c` (0 = Cb)
    fn decode_cross_comp_pred(&mut self, c: usize) -> i32 {
        let mut log2_abs_plus1 = 0;
        while log2_abs_plus1 < 4
            && self.bin(context::LOG2_RES_SCALE_ABS_PLUS1 + 4 * c + log2_abs_plus1)
        {
            log2_abs_plus1 += 1;
        }
        if log2_abs_plus1 == 0 {
            return 0;
        }
        let sign = self.bin(context::RES_SCALE_SIGN_FLAG + c);
        let magnitude = 1 << (log2_abs_plus1 - 1);
        if sign { -magnitude } else { magnitude }
    }

    fn reconstruct_chroma(
        &mut self,
        c_idx: usize,
        x: u32,
        y: u32,
        log2_size: u8,
        mode: IntraPredMode,
        coded: bool,
        res_scale: i32,
    ) -> Result<()> {
        if coded {
            return self.reconstruct_block(c_idx, x, y, log2_size, mode, res_scale);
        }
        let n = 1usize << log2_size;
        self.residual[..n * n].fill(0);
        self.apply_cross_component(n, res_scale);
        self.add_residual(c_idx, x, y, n);
        Ok(())
    }

    fn apply_cross_component(&mut self, n: usize, res_scale: i32) {
        if res_scale == 0 {
            return;
        }
        let s = self.s;
        transform::cross_component_predict(
            &mut self.residual[..n * n],
            &self.luma_residual[..n * n],
            res_scale,
            s.sps.bit_depth_y(),
            s.sps.bit_depth_c(),
        );
    }

    /// Decode residual_coding() for a block at component position (x, y)
    /// and add the reconstructed residual to the prediction in the plane
    fn reconstruct_block(
        &mut self,
        c_idx: usize,
        x: u32,
        y: u32,
        log2_size: u8,
        mode: IntraPredMode,
        res_scale: i32,
    ) -> Result<()> {
        let s = self.s;
        let cu = self.cu;
        let intra_mode = cu.is_intra().then_some(mode);
        let ext = &s.sps.range_extension;
        let chroma_444 = s.sps.chroma_array_type() == 3;

        let params = ResidualParams {
            log2_size,
            c_idx,
            scan_idx: residual::scan_idx(log2_size, c_idx, chroma_444, intra_mode),
            intra_mode,
            bypass: cu.bypass,
            transform_skip_allowed: s.pps.transform_skip_enabled_flag
                && !cu.bypass
                && log2_size <= s.pps.log2_max_transform_skip_size(),
            sign_hiding: s.pps.sign_data_hiding_enabled_flag,
            explicit_rdpcm: ext.explicit_rdpcm_enabled_flag,
            implicit_rdpcm: ext.implicit_rdpcm_enabled_flag,
            transform_skip_context: ext.transform_skip_context_enabled_flag,
            persistent_rice: ext.persistent_rice_adaptation_enabled_flag,
        };
        ResidualDecoder {
            cabac: &mut self.cabac,
            ctx: &mut self.ctx,
            stat_coeff: &mut self.stat_coeff,
            tables: s.tables,
        }
        .decode(&params, &mut self.coeffs)?;

        let lossless_or_skip = cu.bypass || self.coeffs.transform_skip;
        let rdpcm = match intra_mode {
            Some(m) if ext.implicit_rdpcm_enabled_flag && lossless_or_skip => {
                match m {
                    IntraPredMode::HORIZONTAL => Some(RdpcmDir::Horizontal),
                    IntraPredMode::VERTICAL => Some(RdpcmDir::Vertical),
                    _ => None,
                }
            }
            Some(_) => None,
            None => self.coeffs.explicit_rdpcm,
        };

        let tp = TransformParams {
            c_idx,
            bit_depth: s.pic.bit_depth(c_idx),
            qp: self.qp_prime(c_idx),
            intra: cu.is_intra(),
            bypass: cu.bypass,
            rotation: ext.transform_skip_rotation_enabled_flag,
            rdpcm,
            scaling: s.scaling,
        };
        let n = 1usize << log2_size;
        transform::reconstruct_residual(&self.coeffs, &tp, &mut self.residual[..n * n]);

        if c_idx == 0 {
            if s.pps.range_extension.cross_component_prediction_enabled_flag {
                self.luma_residual[..n * n].copy_from_slice(&self.residual[..n * n]);
            }
        } else {
            self.apply_cross_component(n, res_scale);
        }
        self.add_residual(c_idx, x, y, n);
        Ok(())
    }

    fn add_residual(&self, c_idx: usize, x: u32, y: u32, n: usize) {
        let plane = self.s.pic.plane(c_idx);
        let max = (1i32 << self.s.pic.bit_depth(c_idx)) - 1;
        for (j, row) in self.residual[..n * n].chunks_exact(n).enumerate() {
            for (i, &r) in row.iter().enumerate() {
                let (px, py) = (x + i as u32, y + j as u32);
                let v = i32::from(plane.get(px, py)) + r;
                plane.set(px, py, v.clamp(0, max) as u16);
            }
        }
    }
}
