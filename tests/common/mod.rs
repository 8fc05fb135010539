//! Test-only HEVC slice data writer
//!
//! A minimal CABAC encoder in the style of the HM reference encoder plus
//! builders for the parameter sets used by the integration tests. Only the
//! syntax elements the tests emit have context seeds here.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use hevc_decoder::hevc::PcmParams;
use hevc_decoder::{
    DecoderConfig, Picture, PictureDecoder, PictureLayout, Pps, RefPicEntry, RefPicList, SliceHeader,
    SliceType, Sps,
};

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

static RENORM_TABLE: [u8; 32] = [
    6, 5, 4, 4, 3, 3, 3, 3, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

static NEXT_STATE_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12, 13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21,
    21, 22, 22, 23, 24, 24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33, 33, 33, 34,
    34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// Syntax elements with context-coded bins emitted by the tests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Element {
    SplitCuFlag,
    CuTransquantBypassFlag,
    CuSkipFlag,
    PredModeFlag,
    PartMode,
    PrevIntraLumaPredFlag,
    IntraChromaPredMode,
    RqtRootCbf,
    MergeFlag,
    MergeIdx,
    InterPredIdc,
    RefIdx,
    MvpFlag,
    SplitTransformFlag,
    CbfLuma,
    CbfChroma,
    AbsMvdGreater0,
    AbsMvdGreater1,
    CuQpDeltaAbs,
    TransformSkipFlag,
    LastSigCoeffXPrefix,
    LastSigCoeffYPrefix,
    SigCoeffFlag,
    Greater1Flag,
    Greater2Flag,
}

const fn same(v: &'static [u8]) -> [&'static [u8]; 3] {
    [v, v, v]
}

impl Element {
    /// Seeds for init type 0 (I), 1 and 2
    fn seeds(self, init_type: usize) -> &'static [u8] {
        let per_type: [&'static [u8]; 3] = match self {
            Self::SplitCuFlag => [&[139, 141, 157], &[107, 139, 126], &[107, 139, 126]],
            Self::CuTransquantBypassFlag => same(&[154]),
            Self::CuSkipFlag => [&[154, 154, 154], &[197, 185, 201], &[197, 185, 201]],
            Self::PredModeFlag => [&[154], &[149], &[134]],
            Self::PartMode => [&[184, 154, 154, 154], &[154, 139, 154, 154], &[154, 139, 154, 154]],
            Self::PrevIntraLumaPredFlag => [&[184], &[154], &[183]],
            Self::IntraChromaPredMode => [&[63], &[152], &[152]],
            Self::RqtRootCbf => [&[154], &[79], &[79]],
            Self::MergeFlag => [&[154], &[110], &[154]],
            Self::MergeIdx => [&[154], &[122], &[137]],
            Self::InterPredIdc => same(&[95, 79, 63, 31, 31]),
            Self::RefIdx => same(&[153, 153]),
            Self::MvpFlag => same(&[168]),
            Self::SplitTransformFlag => [&[153, 138, 138], &[124, 138, 94], &[224, 167, 122]],
            Self::CbfLuma => [&[111, 141], &[153, 111], &[153, 111]],
            Self::CbfChroma => [
                &[94, 138, 182, 154, 154],
                &[149, 107, 167, 154, 154],
                &[149, 92, 167, 154, 154],
            ],
            Self::AbsMvdGreater0 => [&[154], &[140], &[169]],
            Self::AbsMvdGreater1 => [&[154], &[198], &[198]],
            Self::CuQpDeltaAbs => same(&[154, 154]),
            Self::TransformSkipFlag => same(&[139, 139]),
            Self::LastSigCoeffXPrefix | Self::LastSigCoeffYPrefix => [
                &[
                    110, 110, 124, 125, 140, 153, 125, 127, 140, 109, 111, 143, 127, 111, 79, 108,
                    123, 63,
                ],
                &[
                    125, 110, 94, 110, 95, 79, 125, 111, 110, 78, 110, 111, 111, 95, 94, 108, 123,
                    108,
                ],
                &[
                    125, 110, 124, 110, 95, 94, 125, 111, 111, 79, 125, 126, 111, 111, 79, 108,
                    123, 93,
                ],
            ],
            Self::SigCoeffFlag => [
                &[
                    111, 111, 125, 110, 110, 94, 124, 108, 124, 107, 125, 141, 179, 153, 125, 107,
                    125, 141, 179, 153, 125, 107, 125, 141, 179, 153, 125, 140, 139, 182, 182, 152,
                    136, 152, 136, 153, 136, 139, 111, 136, 139, 111, 141, 111,
                ],
                &[
                    155, 154, 139, 153, 139, 123, 123, 63, 153, 166, 183, 140, 136, 153, 154, 166,
                    183, 140, 136, 153, 154, 166, 183, 140, 136, 153, 154, 170, 153, 123, 123, 107,
                    121, 107, 121, 167, 151, 183, 140, 151, 183, 140, 140, 140,
                ],
                &[
                    170, 154, 139, 153, 139, 123, 123, 63, 124, 166, 183, 140, 136, 153, 154, 166,
                    183, 140, 136, 153, 154, 166, 183, 140, 136, 153, 154, 170, 153, 138, 138, 122,
                    121, 122, 121, 167, 151, 183, 140, 151, 183, 140, 140, 140,
                ],
            ],
            Self::Greater1Flag => [
                &[
                    140, 92, 137, 138, 140, 152, 138, 139, 153, 74, 149, 92, 139, 107, 122, 152,
                    140, 179, 166, 182, 140, 227, 122, 197,
                ],
                &[
                    154, 196, 196, 167, 154, 152, 167, 182, 182, 134, 149, 136, 153, 121, 136, 137,
                    169, 194, 166, 167, 154, 167, 137, 182,
                ],
                &[
                    154, 196, 167, 167, 154, 152, 167, 182, 182, 134, 149, 136, 153, 121, 136, 122,
                    169, 208, 166, 167, 154, 152, 167, 182,
                ],
            ],
            Self::Greater2Flag => [
                &[138, 153, 136, 167, 152, 152],
                &[107, 167, 91, 122, 107, 167],
                &[107, 167, 91, 107, 107, 167],
            ],
        };
        per_type[init_type]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Model {
    state: u8,
    mps: u8,
}

impl Model {
    fn new(seed: u8, qp: i32) -> Self {
        let slope = i32::from(seed >> 4) * 5 - 45;
        let offset = (i32::from(seed & 15) << 3) - 16;
        let s = (((slope * qp.clamp(0, 51)) >> 4) + offset).clamp(1, 126);
        if s >= 64 {
            Self { state: (s - 64) as u8, mps: 1 }
        } else {
            Self { state: (63 - s) as u8, mps: 0 }
        }
    }
}

/// Context models of one slice, initialized on first use
#[derive(Clone, Debug)]
pub struct Contexts {
    qp: i32,
    init_type: usize,
    models: HashMap<(Element, usize), Model>,
}

impl Contexts {
    /// Models of an I slice
    pub fn new(slice_qp: i32) -> Self {
        Self::for_init_type(slice_qp, 0)
    }

    /// Models for init type 1 (P without cabac_init_flag) or 2 (B)
    pub fn for_init_type(slice_qp: i32, init_type: usize) -> Self {
        Self { qp: slice_qp, init_type, models: HashMap::new() }
    }

    fn model(&mut self, element: Element, inc: usize) -> &mut Model {
        let (qp, init_type) = (self.qp, self.init_type);
        self.models
            .entry((element, inc))
            .or_insert_with(|| Model::new(element.seeds(init_type)[inc], qp))
    }
}

/// MSB-first bit writer
#[derive(Default, Debug)]
pub struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    bits: u32,
}

impl BitWriter {
    pub fn write(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.acc = (self.acc << 1) | u64::from((value >> i) & 1);
            self.bits += 1;
            if self.bits == 8 {
                self.bytes.push(self.acc as u8);
                self.acc = 0;
                self.bits = 0;
            }
        }
    }

    pub fn align_zero(&mut self) {
        while self.bits != 0 {
            self.write(0, 1);
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        assert!(self.is_aligned());
        self.bytes
    }
}

/// Arithmetic encoder matching the decoder's engine bit for bit
#[derive(Debug)]
pub struct CabacWriter {
    pub out: BitWriter,
    low: u64,
    range: u32,
    bits_left: i32,
    buffered_byte: u32,
    num_buffered: u32,
}

impl Default for CabacWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CabacWriter {
    pub fn new() -> Self {
        Self {
            out: BitWriter::default(),
            low: 0,
            range: 510,
            bits_left: 23,
            buffered_byte: 0xff,
            num_buffered: 0,
        }
    }

    /// Restart the engine (after PCM samples)
    pub fn restart(&mut self) {
        self.low = 0;
        self.range = 510;
        self.bits_left = 23;
        self.buffered_byte = 0xff;
        self.num_buffered = 0;
    }

    pub fn bin(&mut self, ctx: &mut Contexts, element: Element, inc: usize, bin: bool) {
        let m = ctx.model(element, inc);
        let lps = u32::from(LPS_TABLE[m.state as usize][((self.range >> 6) & 3) as usize]);
        self.range -= lps;
        if u8::from(bin) != m.mps {
            let num_bits = RENORM_TABLE[(lps >> 3) as usize] as i32;
            self.low = (self.low + u64::from(self.range)) << num_bits;
            self.range = lps << num_bits;
            if m.state == 0 {
                m.mps = 1 - m.mps;
            }
            m.state = NEXT_STATE_LPS[m.state as usize];
            self.bits_left -= num_bits;
        } else {
            m.state = (m.state + 1).min(62);
            if self.range >= 256 {
                return;
            }
            self.low <<= 1;
            self.range <<= 1;
            self.bits_left -= 1;
        }
        self.test_and_write_out();
    }

    pub fn bypass(&mut self, bin: bool) {
        self.low <<= 1;
        if bin {
            self.low += u64::from(self.range);
        }
        self.bits_left -= 1;
        self.test_and_write_out();
    }

    pub fn bypass_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.bypass((value >> i) & 1 != 0);
        }
    }

    /// k-th order Exp-Golomb bypass bins
    pub fn exp_golomb(&mut self, mut value: u32, mut k: u32) {
        while value >= 1 << k {
            self.bypass(true);
            value -= 1 << k;
            k += 1;
        }
        self.bypass(false);
        self.bypass_bits(value, k);
    }

    pub fn terminate(&mut self, bin: bool) {
        self.range -= 2;
        if bin {
            self.low += u64::from(self.range);
            self.low <<= 7;
            self.range = 2 << 7;
            self.bits_left -= 7;
        } else if self.range >= 256 {
            return;
        } else {
            self.low <<= 1;
            self.range <<= 1;
            self.bits_left -= 1;
        }
        self.test_and_write_out();
    }

    fn test_and_write_out(&mut self) {
        if self.bits_left < 12 {
            self.write_out();
        }
    }

    fn write_out(&mut self) {
        let lead_byte = (self.low >> (24 - self.bits_left)) as u32;
        self.bits_left += 8;
        self.low &= 0xffff_ffff_u64 >> self.bits_left;
        if lead_byte == 0xff {
            self.num_buffered += 1;
        } else if self.num_buffered > 0 {
            let carry = lead_byte >> 8;
            let byte = self.buffered_byte + carry;
            self.buffered_byte = lead_byte & 0xff;
            self.out.write(byte, 8);
            let fill = (0xff + carry) & 0xff;
            while self.num_buffered > 1 {
                self.out.write(fill, 8);
                self.num_buffered -= 1;
            }
        } else {
            self.num_buffered = 1;
            self.buffered_byte = lead_byte;
        }
    }

    fn finish(&mut self) {
        if (self.low >> (32 - self.bits_left)) != 0 {
            self.out.write(self.buffered_byte + 1, 8);
            while self.num_buffered > 1 {
                self.out.write(0x00, 8);
                self.num_buffered -= 1;
            }
            self.low -= 1 << (32 - self.bits_left);
        } else {
            if self.num_buffered > 0 {
                self.out.write(self.buffered_byte, 8);
            }
            while self.num_buffered > 1 {
                self.out.write(0xff, 8);
                self.num_buffered -= 1;
            }
        }
        self.out.write((self.low >> 8) as u32, (24 - self.bits_left) as u32);
    }

    /// Flush after a terminating bin of 1, then a stop bit and zero alignment
    pub fn flush_aligned(&mut self) {
        self.finish();
        self.out.write(1, 1);
        self.out.align_zero();
    }

    /// Raw bytes while the engine is flushed (PCM samples)
    pub fn raw_bytes(&mut self, bytes: &[u8]) {
        assert!(self.out.is_aligned());
        for &b in bytes {
            self.out.write(u32::from(b), 8);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out.into_bytes()
    }
}

/// Up-right diagonal scan of a 4x4 block as (x, y)
const DIAG_4X4: [(usize, usize); 16] = [
    (0, 0), (0, 1), (1, 0), (0, 2), (1, 1), (2, 0), (0, 3), (1, 2),
    (2, 1), (3, 0), (1, 3), (2, 2), (3, 1), (2, 3), (3, 2), (3, 3),
];

/// sigCtx of a 4x4 block by raster position
const CTX_IDX_MAP: [usize; 16] = [0, 1, 4, 5, 2, 3, 4, 5, 6, 6, 8, 8, 7, 7, 8, 8];

/// coeff_abs_level_remaining with Rice parameter `rice`
fn write_abs_level_remaining(enc: &mut CabacWriter, value: u32, rice: u32) {
    let prefix = value >> rice;
    if prefix < 4 {
        for _ in 0..prefix {
            enc.bypass(true);
        }
        enc.bypass(false);
        enc.bypass_bits(value & ((1 << rice) - 1), rice);
        return;
    }
    let mut p = 4;
    while value >= ((1 << (p - 2)) + 2) << rice {
        p += 1;
    }
    for _ in 0..p {
        enc.bypass(true);
    }
    enc.bypass(false);
    enc.bypass_bits(value - (((1 << (p - 3)) + 2) << rice), p - 3 + rice);
}

/// residual_coding() of one 4x4 luma block in diagonal scan
///
/// `levels` is in raster order and must hold a nonzero level. When
/// `transform_skip` is `Some`, transform_skip_flag is written first.
pub fn write_residual_4x4(
    enc: &mut CabacWriter,
    ctx: &mut Contexts,
    levels: &[i32; 16],
    transform_skip: Option<bool>,
    sign_hiding: bool,
) {
    if let Some(ts) = transform_skip {
        enc.bin(ctx, Element::TransformSkipFlag, 0, ts);
    }
    let level_at = |n: usize| {
        let (x, y) = DIAG_4X4[n];
        levels[y * 4 + x]
    };
    let last = (0..16).rev().find(|&n| level_at(n) != 0).expect("empty block");

    let (last_x, last_y) = DIAG_4X4[last];
    for (element, v) in [(Element::LastSigCoeffXPrefix, last_x), (Element::LastSigCoeffYPrefix, last_y)] {
        for i in 0..v {
            enc.bin(ctx, element, i, true);
        }
        if v < 3 {
            enc.bin(ctx, element, v, false);
        }
    }
    for n in (0..last).rev() {
        let (x, y) = DIAG_4X4[n];
        enc.bin(ctx, Element::SigCoeffFlag, CTX_IDX_MAP[y * 4 + x], level_at(n) != 0);
    }

    let sig: Vec<usize> = (0..=last).rev().filter(|&n| level_at(n) != 0).collect();
    let mut c1 = 1;
    let mut first_g1 = None;
    for &n in sig.iter().take(8) {
        let g1 = level_at(n).abs() > 1;
        enc.bin(ctx, Element::Greater1Flag, c1, g1);
        if g1 {
            c1 = 0;
            first_g1.get_or_insert(n);
        } else if c1 > 0 && c1 < 3 {
            c1 += 1;
        }
    }
    if let Some(n) = first_g1 {
        enc.bin(ctx, Element::Greater2Flag, 0, level_at(n).abs() > 2);
    }

    let first_sig = *sig.last().expect("nonzero block");
    let hidden = sign_hiding && last - first_sig > 3;
    if hidden {
        let sum: i32 = sig.iter().map(|&n| level_at(n).abs()).sum();
        assert_eq!(sum % 2 == 1, level_at(first_sig) < 0, "hidden sign must match parity");
    }
    for &n in &sig {
        if !(hidden && n == first_sig) {
            enc.bypass(level_at(n) < 0);
        }
    }

    let mut rice = 0;
    for (k, &n) in sig.iter().enumerate() {
        let abs = level_at(n).unsigned_abs();
        let (base, threshold) = if k < 8 {
            let g1 = u32::from(abs > 1);
            let g2 = u32::from(Some(n) == first_g1 && abs > 2);
            (1 + g1 + g2, if Some(n) == first_g1 { 3 } else { 2 })
        } else {
            (1, 1)
        };
        if base == threshold {
            write_abs_level_remaining(enc, abs - base, rice);
            if abs > 3 << rice {
                rice = (rice + 1).min(4);
            }
        }
    }
}

/// 8-bit 4:2:0 SPS with 16x16 CTBs, 8x8 minimum CBs and 4..16 transforms
pub fn sps_16(width: u32, height: u32) -> Sps {
    Sps {
        pic_width_in_luma_samples: width,
        pic_height_in_luma_samples: height,
        log2_diff_max_min_luma_coding_block_size: 1,
        log2_diff_max_min_luma_transform_block_size: 2,
        max_transform_hierarchy_depth_intra: 1,
        ..Sps::default()
    }
}

/// `sps_16` with 8-bit PCM allowed for 8x8 and 16x16 CBs
pub fn sps_16_pcm(width: u32, height: u32) -> Sps {
    Sps {
        pcm_params: Some(PcmParams {
            pcm_sample_bit_depth_luma_minus1: 7,
            pcm_sample_bit_depth_chroma_minus1: 7,
            log2_min_pcm_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_pcm_luma_coding_block_size: 1,
            pcm_loop_filter_disabled_flag: false,
        }),
        ..sps_16(width, height)
    }
}

/// Deterministic sample pattern for PCM pictures
pub fn pattern(c: usize, x: u32, y: u32) -> u8 {
    let v = (x * 7 + y * 13 + c as u32 * 61) ^ (x * y);
    (v % 251) as u8
}

/// Coded slice segment: data plus entry point sizes
pub struct CodedSegment {
    pub data: Vec<u8>,
    pub entry_point_sizes: Vec<u32>,
}

/// Encoder-side entropy state of one picture of the PCM test pattern
///
/// All segments written through one `PcmPicture` belong to one slice.
pub struct PcmPicture<'a> {
    pub layout: &'a PictureLayout,
    pub pps: &'a Pps,
    pub slice_qp: i32,
    width: u32,
    height: u32,
    slice_start_ts: u32,
    contexts: Contexts,
    saved: HashMap<u32, Contexts>,
}

impl<'a> PcmPicture<'a> {
    pub fn new(layout: &'a PictureLayout, pps: &'a Pps, slice_qp: i32) -> Self {
        Self {
            layout,
            pps,
            slice_qp,
            width: layout.width_in_ctbs * 16,
            height: layout.height_in_ctbs * 16,
            slice_start_ts: 0,
            contexts: Contexts::new(slice_qp),
            saved: HashMap::new(),
        }
    }

    /// Picture size when it is not a multiple of the CTB size
    pub fn with_picture_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn is_partial(&self, rs: u32) -> bool {
        let w = self.layout.width_in_ctbs;
        (rs % w + 1) * 16 > self.width || (rs / w + 1) * 16 > self.height
    }

    /// ctxInc of split_cu_flag: partial CTBs hold depth-1 CUs
    fn split_cu_ctx_inc(&self, rs: u32) -> usize {
        let layout = self.layout;
        let w = layout.width_in_ctbs;
        let (x, y) = (rs % w, rs / w);
        let deeper = |n: u32| {
            layout.rs_to_ts(n) >= self.slice_start_ts
                && layout.tile_id_rs(n) == layout.tile_id_rs(rs)
                && self.is_partial(n)
        };
        usize::from(x > 0 && deeper(rs - 1)) + usize::from(y > 0 && deeper(rs - w))
    }

    /// One PCM CU at (x0, y0) of `size` luma samples
    fn pcm_cu(&mut self, enc: &mut CabacWriter, x0: u32, y0: u32, size: u32) {
        if size == 8 {
            // part_mode 2Nx2N at the minimum CB size
            enc.bin(&mut self.contexts, Element::PartMode, 0, true);
        }
        // pcm_flag
        enc.terminate(true);
        enc.flush_aligned();
        let mut samples = Vec::with_capacity((size * size * 3 / 2) as usize);
        for yy in 0..size {
            for xx in 0..size {
                samples.push(pattern(0, x0 + xx, y0 + yy));
            }
        }
        for c in 1..3 {
            for yy in 0..size / 2 {
                for xx in 0..size / 2 {
                    samples.push(pattern(c, x0 / 2 + xx, y0 / 2 + yy));
                }
            }
        }
        enc.raw_bytes(&samples);
        enc.restart();
    }

    fn is_substream_start(&self, rs: u32) -> bool {
        let x = rs % self.layout.width_in_ctbs;
        (self.pps.tiles_enabled_flag && self.layout.is_tile_start(rs))
            || (self.pps.entropy_coding_sync_enabled_flag && self.layout.col_bd.contains(&x))
    }

    /// Context state the decoder starts CTB `rs` from
    fn start_ctb(&mut self, rs: u32, first_of_segment: bool, dependent: bool) {
        let layout = self.layout;
        let w = layout.width_in_ctbs;
        let (x, y) = (rs % w, rs / w);
        let (col0, row0, col1, _) = layout.tile_bounds(x, y);
        let fresh = Contexts::new(self.slice_qp);

        if layout.is_tile_start(rs) {
            self.contexts = fresh;
        } else if self.pps.entropy_coding_sync_enabled_flag && x == col0 {
            let tr = (y - 1) * w + x + 1;
            match self.saved.get(&tr).filter(|_| y > row0 && x + 1 < col1) {
                Some(saved) => self.contexts = saved.clone(),
                None => self.contexts = fresh,
            }
        } else if first_of_segment && !dependent {
            self.contexts = fresh;
        }
    }

    /// Encode CTBs `[first_ts, end_ts)` as one slice segment: one 16x16 PCM
    /// CU per CTB, 8x8 PCM CUs where the CTB crosses the picture edge
    pub fn encode_segment(&mut self, first_ts: u32, end_ts: u32, dependent: bool) -> CodedSegment {
        let layout = self.layout;
        let w = layout.width_in_ctbs;
        let wpp = self.pps.entropy_coding_sync_enabled_flag;

        let mut substreams: Vec<Vec<u8>> = Vec::new();
        let mut enc = CabacWriter::new();
        if !dependent {
            self.slice_start_ts = first_ts;
        }

        for ts in first_ts..end_ts {
            let rs = layout.ts_to_rs(ts);
            let (x, y) = (rs % w, rs / w);
            let (col0, _, _, _) = layout.tile_bounds(x, y);
            self.start_ctb(rs, ts == first_ts, dependent);

            let (x0, y0) = (x * 16, y * 16);
            if self.is_partial(rs) {
                // split inferred; quadrants outside the picture are absent
                for (dx, dy) in [(0, 0), (8, 0), (0, 8), (8, 8)] {
                    if x0 + dx < self.width && y0 + dy < self.height {
                        self.pcm_cu(&mut enc, x0 + dx, y0 + dy, 8);
                    }
                }
            } else {
                let inc = self.split_cu_ctx_inc(rs);
                enc.bin(&mut self.contexts, Element::SplitCuFlag, inc, false);
                self.pcm_cu(&mut enc, x0, y0, 16);
            }

            if wpp && x == col0 + 1 {
                self.saved.insert(rs, self.contexts.clone());
            }

            let last = ts + 1 == end_ts;
            enc.terminate(last);
            if last {
                enc.flush_aligned();
                break;
            }
            if self.is_substream_start(layout.ts_to_rs(ts + 1)) {
                // end_of_subset_one_bit
                enc.terminate(true);
                enc.flush_aligned();
                substreams.push(std::mem::take(&mut enc).into_bytes());
            }
        }
        substreams.push(enc.into_bytes());

        let entry_point_sizes = substreams[..substreams.len() - 1]
            .iter()
            .map(|s| s.len() as u32)
            .collect();
        CodedSegment {
            data: substreams.concat(),
            entry_point_sizes,
        }
    }
}

/// Expected luma/chroma sample of the PCM test pattern
pub fn expected_sample(c: usize, x: u32, y: u32) -> u16 {
    u16::from(pattern(c, x, y))
}

/// Header of an I slice segment
pub fn intra_header(segment_address: u32, dependent: bool, entry_point_sizes: Vec<u32>) -> SliceHeader {
    SliceHeader {
        dependent_slice_segment_flag: dependent,
        segment_address,
        slice_address: 0,
        entry_point_sizes,
        ..SliceHeader::default()
    }
}

/// Header of a P or B slice covering the whole picture, without temporal
/// motion vector prediction
pub fn inter_header(slice_type: SliceType, num_ref_idx_active: [u8; 2]) -> SliceHeader {
    SliceHeader {
        slice_type,
        num_ref_idx_active,
        max_num_merge_cand: 5,
        ..intra_header(0, false, Vec::new())
    }
}

/// Decode the PCM test pattern as a finished reference picture
pub fn pcm_reference(sps: &Sps, poc: i32) -> Arc<Picture> {
    let pps = Pps::default();
    let layout = PictureLayout::new(sps, &pps).expect("layout");
    let coded = PcmPicture::new(&layout, &pps, 26).encode_segment(0, layout.num_ctbs(), false);
    let decoder = PictureDecoder::new(DecoderConfig::new().with_force_sequential(true));
    let mut frame = decoder.begin_picture(sps, &pps, poc).expect("begin reference");
    let refs: [RefPicList; 2] = [Vec::new(), Vec::new()];
    frame
        .decode_slice_segment(&intra_header(0, false, coded.entry_point_sizes), &refs, &coded.data)
        .expect("decode reference");
    frame.finish()
}

/// Short-term list entry for `picture`
pub fn ref_entry(picture: &Arc<Picture>) -> RefPicEntry {
    RefPicEntry {
        picture: Some(Arc::clone(picture)),
        poc: picture.poc(),
        long_term: false,
        view_idx: 0,
    }
}
