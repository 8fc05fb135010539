//! CABAC (Context-Adaptive Binary Arithmetic Coding) decoder
//!
//! The arithmetic decoding engine keeps a scaled 16-bit value window and
//! reads one byte at a time. Context models are stored in a flat
//! [`ContextTable`] that can be snapshotted for wavefront hand-off and
//! dependent slice segments.

use core::ops::{Index, IndexMut};

use super::slice::SliceType;
use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// CABAC LPS range table (ITU-T H.265, rangeTabLps)
static LPS_TABLE: [[u8; 4]; 64] = [
    [128, 176, 208, 240],
    [128, 167, 197, 227],
    [128, 158, 187, 216],
    [123, 150, 178, 205],
    [116, 142, 169, 195],
    [111, 135, 160, 185],
    [105, 128, 152, 175],
    [100, 122, 144, 166],
    [95, 116, 137, 158],
    [90, 110, 130, 150],
    [85, 104, 123, 142],
    [81, 99, 117, 135],
    [77, 94, 111, 128],
    [73, 89, 105, 122],
    [69, 85, 100, 116],
    [66, 80, 95, 110],
    [62, 76, 90, 104],
    [59, 72, 86, 99],
    [56, 69, 81, 94],
    [53, 65, 77, 89],
    [51, 62, 73, 85],
    [48, 59, 69, 80],
    [46, 56, 66, 76],
    [43, 53, 63, 72],
    [41, 50, 59, 69],
    [39, 48, 56, 65],
    [37, 45, 54, 62],
    [35, 43, 51, 59],
    [33, 41, 48, 56],
    [32, 39, 46, 53],
    [30, 37, 43, 50],
    [29, 35, 41, 48],
    [27, 33, 39, 45],
    [26, 31, 37, 43],
    [24, 30, 35, 41],
    [23, 28, 33, 39],
    [22, 27, 32, 37],
    [21, 26, 30, 35],
    [20, 24, 29, 33],
    [19, 23, 27, 31],
    [18, 22, 26, 30],
    [17, 21, 25, 28],
    [16, 20, 23, 27],
    [15, 19, 22, 25],
    [14, 18, 21, 24],
    [14, 17, 20, 23],
    [13, 16, 19, 22],
    [12, 15, 18, 21],
    [12, 14, 17, 20],
    [11, 14, 16, 19],
    [11, 13, 15, 18],
    [10, 12, 15, 17],
    [10, 12, 14, 16],
    [9, 11, 13, 15],
    [9, 11, 12, 14],
    [8, 10, 12, 14],
    [8, 9, 11, 13],
    [7, 9, 11, 12],
    [7, 9, 10, 12],
    [7, 8, 10, 11],
    [6, 8, 9, 11],
    [6, 7, 9, 10],
    [6, 7, 8, 9],
    [2, 2, 2, 2],
];

/// Renormalization table
static RENORM_TABLE: [u8; 32] = [
    6, 5, 4, 4, 3, 3, 3, 3, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

/// State transition for MPS
static STATE_TRANS_MPS: [u8; 64] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50,
    51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

/// State transition for LPS
static STATE_TRANS_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12, 13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21,
    21, 22, 22, 23, 24, 24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33, 33, 33, 34,
    34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// Adaptive probability state of one context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextModel {
    /// State index (0-62)
    state: u8,
    /// Most probable symbol (0 or 1)
    mps: u8,
}

impl ContextModel {
    /// Initialize a context from its seed value and the slice QP
    pub fn new(init_value: u8, slice_qp: i32) -> Self {
        let slope = (init_value >> 4) as i32 * 5 - 45;
        let offset = ((init_value & 15) << 3) as i32 - 16;
        let init_state = (((slope * slice_qp.clamp(0, 51)) >> 4) + offset).clamp(1, 126);

        if init_state >= 64 {
            Self {
                state: (init_state - 64) as u8,
                mps: 1,
            }
        } else {
            Self {
                state: (63 - init_state) as u8,
                mps: 0,
            }
        }
    }

    /// Current (state, mps) pair
    pub fn state(&self) -> (u8, u8) {
        (self.state, self.mps)
    }
}

/// Context initialization type (I = 0, P = 1, B = 2)
pub fn init_type(slice_type: SliceType, cabac_init_flag: bool) -> usize {
    match (slice_type, cabac_init_flag) {
        (SliceType::I, _) => 0,
        (SliceType::P, false) | (SliceType::B, true) => 1,
        (SliceType::P, true) | (SliceType::B, false) => 2,
    }
}

/// Full set of context models for one slice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextTable {
    models: [ContextModel; context::NUM_CONTEXTS],
}

impl ContextTable {
    /// Initialize every context for the given init type and slice QP
    pub fn new(init_type: usize, slice_qp: i32) -> Self {
        let seeds = &INIT_VALUES[init_type.min(2)];
        let mut models = [ContextModel::default(); context::NUM_CONTEXTS];
        for (model, &seed) in models.iter_mut().zip(seeds.iter()) {
            *model = ContextModel::new(seed, slice_qp);
        }
        Self { models }
    }

    /// All context models in index order
    pub fn models(&self) -> &[ContextModel] {
        &self.models
    }
}

impl Index<usize> for ContextTable {
    type Output = ContextModel;

    fn index(&self, idx: usize) -> &ContextModel {
        &self.models[idx]
    }
}

impl IndexMut<usize> for ContextTable {
    fn index_mut(&mut self, idx: usize) -> &mut ContextModel {
        &mut self.models[idx]
    }
}

/// CABAC arithmetic decoding engine
///
/// `value` holds the offset scaled by 7 bits, `bits_needed` counts up to
/// zero before the next byte is shifted in. Reads past the end of the
/// substream yield zero bytes and are counted in `overrun`.
pub struct CabacDecoder<'a> {
    data: &'a [u8],
    byte_pos: usize,
    range: u32,
    value: u32,
    bits_needed: i32,
    overrun: usize,
}

impl<'a> CabacDecoder<'a> {
    /// Create a decoder positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            byte_pos: 0,
            range: 510,
            value: 0,
            bits_needed: -8,
            overrun: 0,
        };
        decoder.init_engine();
        decoder
    }

    /// (Re)initialize the arithmetic engine at the current byte position
    pub fn init_engine(&mut self) {
        self.range = 510;
        self.bits_needed = -8;
        self.value = u32::from(self.read_byte()) << 8;
        self.value |= u32::from(self.read_byte());
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        match self.data.get(self.byte_pos) {
            Some(&b) => {
                self.byte_pos += 1;
                b
            }
            None => {
                self.overrun += 1;
                0
            }
        }
    }

    /// Number of bytes consumed so far (including the look-ahead window)
    pub fn byte_position(&self) -> usize {
        self.byte_pos
    }

    /// Bytes requested beyond the end of the input
    pub fn overrun(&self) -> usize {
        self.overrun
    }

    /// Remaining input after the bytes the engine has consumed
    pub fn remaining_data(&self) -> &'a [u8] {
        self.data.get(self.byte_pos..).unwrap_or(&[])
    }

    /// Skip `n` raw bytes and restart the engine after them (PCM payloads)
    pub fn skip_and_reinit(&mut self, n: usize) {
        self.byte_pos = (self.byte_pos + n).min(self.data.len());
        self.init_engine();
    }

    /// (range, value, bits_needed) for tracing
    pub fn engine_state(&self) -> (u32, u32, i32) {
        (self.range, self.value, self.bits_needed)
    }

    /// Decode a single bin using a context model
    pub fn decode_bin(&mut self, ctx: &mut ContextModel) -> bool {
        let lps = u32::from(LPS_TABLE[ctx.state as usize][((self.range >> 6) - 4) as usize & 3]);
        self.range -= lps;
        let scaled_range = self.range << 7;

        if self.value < scaled_range {
            let bin = ctx.mps != 0;
            ctx.state = STATE_TRANS_MPS[ctx.state as usize];
            if scaled_range < (256 << 7) {
                self.range = scaled_range >> 6;
                self.value <<= 1;
                self.bits_needed += 1;
                if self.bits_needed == 0 {
                    self.bits_needed = -8;
                    self.value |= u32::from(self.read_byte());
                }
            }
            bin
        } else {
            let num_bits = RENORM_TABLE[(lps >> 3) as usize] as i32;
            self.value = (self.value - scaled_range) << num_bits;
            self.range = lps << num_bits;
            let bin = ctx.mps == 0;
            if ctx.state == 0 {
                ctx.mps = 1 - ctx.mps;
            }
            ctx.state = STATE_TRANS_LPS[ctx.state as usize];
            self.bits_needed += num_bits;
            if self.bits_needed >= 0 {
                self.value |= u32::from(self.read_byte()) << self.bits_needed;
                self.bits_needed -= 8;
            }
            bin
        }
    }

    /// Decode an equiprobable bin
    pub fn decode_bypass(&mut self) -> bool {
        self.value <<= 1;
        self.bits_needed += 1;
        if self.bits_needed >= 0 {
            self.bits_needed = -8;
            self.value |= u32::from(self.read_byte());
        }

        let scaled_range = self.range << 7;
        if self.value >= scaled_range {
            self.value -= scaled_range;
            true
        } else {
            false
        }
    }

    /// Decode `n` bypass bins, most significant first
    pub fn decode_bypass_bits(&mut self, n: u32) -> u32 {
        let mut result = 0u32;
        for _ in 0..n {
            result = (result << 1) | u32::from(self.decode_bypass());
        }
        result
    }

    /// Decode a terminating bin (end of slice segment, end of substream, pcm_flag)
    pub fn decode_terminate(&mut self) -> bool {
        self.range -= 2;
        let scaled_range = self.range << 7;
        if self.value >= scaled_range {
            true
        } else {
            if scaled_range < (256 << 7) {
                self.range = scaled_range >> 6;
                self.value <<= 1;
                self.bits_needed += 1;
                if self.bits_needed == 0 {
                    self.bits_needed = -8;
                    self.value |= u32::from(self.read_byte());
                }
            }
            false
        }
    }

    /// Truncated unary with bypass bins
    pub fn decode_bypass_unary(&mut self, c_max: u32) -> u32 {
        let mut value = 0;
        while value < c_max && self.decode_bypass() {
            value += 1;
        }
        value
    }

    /// Decode a k-th order Exp-Golomb code using bypass bins
    pub fn decode_eg(&mut self, k: u32) -> Result<u32> {
        let mut n = 0u32;
        while self.decode_bypass() {
            n += 1;
            if n + k > 31 {
                return Err(HevcError::CabacError("exp-golomb prefix overflow"));
            }
        }
        let suffix = self.decode_bypass_bits(n + k);
        Ok((((1u32 << n) - 1) << k) + suffix)
    }
}

/// Context indices for the syntax elements
pub mod context {
    /// SAO merge left/up flag
    pub const SAO_MERGE_FLAG: usize = 0;
    /// SAO type index (first bin)
    pub const SAO_TYPE_IDX: usize = 1;
    /// Split CU flag (3, by neighbor depth)
    pub const SPLIT_CU_FLAG: usize = 2;
    /// CU transquant bypass flag
    pub const CU_TRANSQUANT_BYPASS_FLAG: usize = 5;
    /// CU skip flag (3, by neighbor skip state)
    pub const CU_SKIP_FLAG: usize = 6;
    /// Palette mode flag
    pub const PALETTE_MODE_FLAG: usize = 9;
    /// Pred mode flag
    pub const PRED_MODE_FLAG: usize = 10;
    /// Part mode (4)
    pub const PART_MODE: usize = 11;
    /// Prev intra luma pred flag
    pub const PREV_INTRA_LUMA_PRED_FLAG: usize = 15;
    /// Intra chroma pred mode
    pub const INTRA_CHROMA_PRED_MODE: usize = 16;
    /// RQT root cbf
    pub const RQT_ROOT_CBF: usize = 17;
    /// Merge flag
    pub const MERGE_FLAG: usize = 18;
    /// Merge index (first bin)
    pub const MERGE_IDX: usize = 19;
    /// Inter pred idc (5)
    pub const INTER_PRED_IDC: usize = 20;
    /// Reference index (2)
    pub const REF_IDX: usize = 25;
    /// MVP L0/L1 flag
    pub const MVP_LX_FLAG: usize = 27;
    /// Split transform flag (3, by 5 - log2 size)
    pub const SPLIT_TRANSFORM_FLAG: usize = 28;
    /// CBF luma (2)
    pub const CBF_LUMA: usize = 31;
    /// CBF cb/cr (5, by transform depth)
    pub const CBF_CHROMA: usize = 33;
    /// abs_mvd_greater0_flag
    pub const ABS_MVD_GREATER0_FLAG: usize = 38;
    /// abs_mvd_greater1_flag
    pub const ABS_MVD_GREATER1_FLAG: usize = 39;
    /// cu_qp_delta_abs (2)
    pub const CU_QP_DELTA_ABS: usize = 40;
    /// Transform skip flag (luma, chroma)
    pub const TRANSFORM_SKIP_FLAG: usize = 42;
    /// Last significant coefficient X prefix (18)
    pub const LAST_SIG_COEFF_X_PREFIX: usize = 44;
    /// Last significant coefficient Y prefix (18)
    pub const LAST_SIG_COEFF_Y_PREFIX: usize = 62;
    /// Coded sub-block flag (4)
    pub const CODED_SUB_BLOCK_FLAG: usize = 80;
    /// Significant coefficient flag (42 + 2 transform-skip contexts)
    pub const SIG_COEFF_FLAG: usize = 84;
    /// coeff_abs_level_greater1_flag (24)
    pub const COEFF_ABS_LEVEL_GREATER1_FLAG: usize = 128;
    /// coeff_abs_level_greater2_flag (6)
    pub const COEFF_ABS_LEVEL_GREATER2_FLAG: usize = 152;
    /// explicit_rdpcm_flag (luma, chroma)
    pub const EXPLICIT_RDPCM_FLAG: usize = 158;
    /// explicit_rdpcm_dir_flag (luma, chroma)
    pub const EXPLICIT_RDPCM_DIR_FLAG: usize = 160;
    /// log2_res_scale_abs_plus1 (8)
    pub const LOG2_RES_SCALE_ABS_PLUS1: usize = 162;
    /// res_scale_sign_flag (2)
    pub const RES_SCALE_SIGN_FLAG: usize = 170;
    /// cu_chroma_qp_offset_flag
    pub const CU_CHROMA_QP_OFFSET_FLAG: usize = 172;
    /// cu_chroma_qp_offset_idx
    pub const CU_CHROMA_QP_OFFSET_IDX: usize = 173;
    /// Total number of contexts
    pub const NUM_CONTEXTS: usize = 174;
}

/// Seed values of one syntax element for the I, P and B init types
struct InitSegment {
    offset: usize,
    seeds: [&'static [u8]; 3],
}

const fn same(v: &'static [u8]) -> [&'static [u8]; 3] {
    [v, v, v]
}

const INIT_SEGMENTS: &[InitSegment] = &[
    InitSegment { offset: context::SAO_MERGE_FLAG, seeds: same(&[153]) },
    InitSegment { offset: context::SAO_TYPE_IDX, seeds: [&[200], &[185], &[160]] },
    InitSegment {
        offset: context::SPLIT_CU_FLAG,
        seeds: [&[139, 141, 157], &[107, 139, 126], &[107, 139, 126]],
    },
    InitSegment { offset: context::CU_TRANSQUANT_BYPASS_FLAG, seeds: same(&[154]) },
    InitSegment {
        offset: context::CU_SKIP_FLAG,
        seeds: [&[154, 154, 154], &[197, 185, 201], &[197, 185, 201]],
    },
    InitSegment { offset: context::PALETTE_MODE_FLAG, seeds: same(&[154]) },
    InitSegment { offset: context::PRED_MODE_FLAG, seeds: [&[154], &[149], &[134]] },
    InitSegment {
        offset: context::PART_MODE,
        seeds: [&[184, 154, 154, 154], &[154, 139, 154, 154], &[154, 139, 154, 154]],
    },
    InitSegment { offset: context::PREV_INTRA_LUMA_PRED_FLAG, seeds: [&[184], &[154], &[183]] },
    InitSegment { offset: context::INTRA_CHROMA_PRED_MODE, seeds: [&[63], &[152], &[152]] },
    InitSegment { offset: context::RQT_ROOT_CBF, seeds: [&[154], &[79], &[79]] },
    InitSegment { offset: context::MERGE_FLAG, seeds: [&[154], &[110], &[154]] },
    InitSegment { offset: context::MERGE_IDX, seeds: [&[154], &[122], &[137]] },
    InitSegment { offset: context::INTER_PRED_IDC, seeds: same(&[95, 79, 63, 31, 31]) },
    InitSegment { offset: context::REF_IDX, seeds: same(&[153, 153]) },
    InitSegment { offset: context::MVP_LX_FLAG, seeds: same(&[168]) },
    InitSegment {
        offset: context::SPLIT_TRANSFORM_FLAG,
        seeds: [&[153, 138, 138], &[124, 138, 94], &[224, 167, 122]],
    },
    InitSegment {
        offset: context::CBF_LUMA,
        seeds: [&[111, 141], &[153, 111], &[153, 111]],
    },
    InitSegment {
        offset: context::CBF_CHROMA,
        seeds: [
            &[94, 138, 182, 154, 154],
            &[149, 107, 167, 154, 154],
            &[149, 92, 167, 154, 154],
        ],
    },
    InitSegment { offset: context::ABS_MVD_GREATER0_FLAG, seeds: [&[154], &[140], &[169]] },
    InitSegment { offset: context::ABS_MVD_GREATER1_FLAG, seeds: [&[154], &[198], &[198]] },
    InitSegment { offset: context::CU_QP_DELTA_ABS, seeds: same(&[154, 154]) },
    InitSegment { offset: context::TRANSFORM_SKIP_FLAG, seeds: same(&[139, 139]) },
    InitSegment { offset: context::LAST_SIG_COEFF_X_PREFIX, seeds: LAST_PREFIX_SEEDS },
    InitSegment { offset: context::LAST_SIG_COEFF_Y_PREFIX, seeds: LAST_PREFIX_SEEDS },
    InitSegment {
        offset: context::CODED_SUB_BLOCK_FLAG,
        seeds: [&[91, 171, 134, 141], &[121, 140, 61, 154], &[121, 140, 61, 154]],
    },
    InitSegment {
        offset: context::SIG_COEFF_FLAG,
        seeds: [
            &[
                111, 111, 125, 110, 110, 94, 124, 108, 124, 107, 125, 141, 179, 153, 125, 107, 125,
                141, 179, 153, 125, 107, 125, 141, 179, 153, 125, 140, 139, 182, 182, 152, 136, 152,
                136, 153, 136, 139, 111, 136, 139, 111, 141, 111,
            ],
            &[
                155, 154, 139, 153, 139, 123, 123, 63, 153, 166, 183, 140, 136, 153, 154, 166, 183,
                140, 136, 153, 154, 166, 183, 140, 136, 153, 154, 170, 153, 123, 123, 107, 121, 107,
                121, 167, 151, 183, 140, 151, 183, 140, 140, 140,
            ],
            &[
                170, 154, 139, 153, 139, 123, 123, 63, 124, 166, 183, 140, 136, 153, 154, 166, 183,
                140, 136, 153, 154, 166, 183, 140, 136, 153, 154, 170, 153, 138, 138, 122, 121, 122,
                121, 167, 151, 183, 140, 151, 183, 140, 140, 140,
            ],
        ],
    },
    InitSegment {
        offset: context::COEFF_ABS_LEVEL_GREATER1_FLAG,
        seeds: [
            &[
                140, 92, 137, 138, 140, 152, 138, 139, 153, 74, 149, 92, 139, 107, 122, 152, 140,
                179, 166, 182, 140, 227, 122, 197,
            ],
            &[
                154, 196, 196, 167, 154, 152, 167, 182, 182, 134, 149, 136, 153, 121, 136, 137, 169,
                194, 166, 167, 154, 167, 137, 182,
            ],
            &[
                154, 196, 167, 167, 154, 152, 167, 182, 182, 134, 149, 136, 153, 121, 136, 122, 169,
                208, 166, 167, 154, 152, 167, 182,
            ],
        ],
    },
    InitSegment {
        offset: context::COEFF_ABS_LEVEL_GREATER2_FLAG,
        seeds: [
            &[138, 153, 136, 167, 152, 152],
            &[107, 167, 91, 122, 107, 167],
            &[107, 167, 91, 107, 107, 167],
        ],
    },
    InitSegment { offset: context::EXPLICIT_RDPCM_FLAG, seeds: same(&[139, 139]) },
    InitSegment { offset: context::EXPLICIT_RDPCM_DIR_FLAG, seeds: same(&[139, 139]) },
    InitSegment { offset: context::LOG2_RES_SCALE_ABS_PLUS1, seeds: same(&[154; 8]) },
    InitSegment { offset: context::RES_SCALE_SIGN_FLAG, seeds: same(&[154, 154]) },
    InitSegment { offset: context::CU_CHROMA_QP_OFFSET_FLAG, seeds: same(&[154]) },
    InitSegment { offset: context::CU_CHROMA_QP_OFFSET_IDX, seeds: same(&[154]) },
];

const LAST_PREFIX_SEEDS: [&[u8]; 3] = [
    &[
        110, 110, 124, 125, 140, 153, 125, 127, 140, 109, 111, 143, 127, 111, 79, 108, 123, 63,
    ],
    &[
        125, 110, 94, 110, 95, 79, 125, 111, 110, 78, 110, 111, 111, 95, 94, 108, 123, 108,
    ],
    &[
        125, 110, 124, 110, 95, 94, 125, 111, 111, 79, 125, 126, 111, 111, 79, 108, 123, 93,
    ],
];

/// Seed value per context and init type; unlisted contexts use 154
static INIT_VALUES: [[u8; context::NUM_CONTEXTS]; 3] = build_init_values();

const fn build_init_values() -> [[u8; context::NUM_CONTEXTS]; 3] {
    let mut out = [[154u8; context::NUM_CONTEXTS]; 3];
    let mut s = 0;
    while s < INIT_SEGMENTS.len() {
        let seg = &INIT_SEGMENTS[s];
        let mut t = 0;
        while t < 3 {
            let seeds = seg.seeds[t];
            let mut i = 0;
            while i < seeds.len() {
                out[t][seg.offset + i] = seeds[i];
                i += 1;
            }
            t += 1;
        }
        s += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_init_formula() {
        // 154 is the neutral seed: equiprobable regardless of QP
        for qp in [0, 22, 37, 51] {
            assert_eq!(ContextModel::new(154, qp).state(), (0, 1));
        }
        // slope = -5, offset = 72 at QP 26: (-130 >> 4) + 72 = 63
        assert_eq!(ContextModel::new(139, 26).state(), (0, 0));
        // slope = 15, offset = 48 at QP 32: (480 >> 4) + 48 = 78
        assert_eq!(ContextModel::new(200, 32).state(), (14, 1));
        // QP is clipped to 51 before use
        assert_eq!(ContextModel::new(200, 80), ContextModel::new(200, 51));
    }

    #[test]
    fn test_init_type_swaps_with_cabac_init_flag() {
        assert_eq!(init_type(SliceType::I, true), 0);
        assert_eq!(init_type(SliceType::P, false), 1);
        assert_eq!(init_type(SliceType::P, true), 2);
        assert_eq!(init_type(SliceType::B, false), 2);
        assert_eq!(init_type(SliceType::B, true), 1);
    }

    #[test]
    fn test_context_table_is_deterministic() {
        let a = ContextTable::new(1, 30);
        let b = ContextTable::new(1, 30);
        assert_eq!(a, b);
        assert_ne!(a, ContextTable::new(2, 30));
        assert_eq!(
            a[context::SPLIT_CU_FLAG].state(),
            ContextModel::new(107, 30).state()
        );
    }

    #[test]
    fn test_seed_table_layout() {
        assert_eq!(INIT_VALUES[0][context::SIG_COEFF_FLAG + 42], 141);
        assert_eq!(INIT_VALUES[2][context::SIG_COEFF_FLAG + 43], 140);
        assert_eq!(INIT_VALUES[0][context::LAST_SIG_COEFF_Y_PREFIX + 17], 63);
        assert_eq!(INIT_VALUES[1][context::MERGE_IDX], 122);
        assert_eq!(INIT_VALUES[2][context::CU_CHROMA_QP_OFFSET_IDX], 154);
    }

    #[test]
    fn test_terminate_on_saturated_window() {
        let ones = [0xFFu8; 4];
        assert!(CabacDecoder::new(&ones).decode_terminate());
        let zeros = [0u8; 4];
        let mut dec = CabacDecoder::new(&zeros);
        assert!(!dec.decode_terminate());
        assert_eq!(dec.overrun(), 0);
    }

    #[test]
    fn test_reads_past_end_are_counted() {
        let mut dec = CabacDecoder::new(&[0x00]);
        assert_eq!(dec.overrun(), 1);
        let _ = dec.decode_bypass_bits(16);
        assert!(dec.overrun() >= 2);
    }

    #[test]
    fn test_regular_bins_keep_range_normalized() {
        let data = [0x5Au8, 0xC3, 0x17, 0x99, 0x42, 0x00, 0xFE, 0x81];
        let mut dec = CabacDecoder::new(&data);
        let mut model = ContextModel::new(140, 32);
        for _ in 0..40 {
            dec.decode_bin(&mut model);
            let (range, _, bits_needed) = dec.engine_state();
            assert!((256..=510).contains(&range));
            assert!((-8..0).contains(&bits_needed));
            assert!(model.state().0 <= 62);
        }
    }
}
