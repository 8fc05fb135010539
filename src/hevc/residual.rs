//! Residual (transform coefficient) decoding
//!
//! Parses `residual_coding()` for one transform block: transform skip and
//! explicit RDPCM flags, the last significant position, coded sub-block
//! flags, the significance map, greater-1/greater-2 flags, remaining
//! absolute levels with the adaptive Rice parameter and the signs,
//! including sign data hiding.

use super::cabac::{context, CabacDecoder, ContextTable};
use super::slice::IntraPredMode;
use super::tables::{Tables, SCAN_VERT};
use super::transform::MAX_COEFF;
use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// Residual DPCM direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdpcmDir {
    /// Accumulate along rows
    Horizontal,
    /// Accumulate along columns
    Vertical,
}

/// Scan index for a transform block
///
/// Mode-dependent scans apply to intra 4x4 blocks and to 8x8 luma blocks
/// (8x8 chroma too with 4:4:4).
pub fn scan_idx(log2_size: u8, c_idx: usize, chroma_444: bool, intra_mode: Option<IntraPredMode>) -> usize {
    let Some(mode) = intra_mode else {
        return 0;
    };
    if log2_size == 2 || (log2_size == 3 && (c_idx == 0 || chroma_444)) {
        match mode.as_u8() {
            6..=14 => 2,
            22..=30 => 1,
            _ => 0,
        }
    } else {
        0
    }
}

/// Coefficient buffer for a transform block
#[derive(Clone)]
pub struct CoeffBuffer {
    /// Coefficient levels in raster order, `1 << log2_size` per row
    pub coeffs: [i16; MAX_COEFF],
    /// Transform size (log2)
    pub log2_size: u8,
    /// transform_skip_flag
    pub transform_skip: bool,
    /// explicit_rdpcm_flag with its direction
    pub explicit_rdpcm: Option<RdpcmDir>,
}

impl Default for CoeffBuffer {
    fn default() -> Self {
        Self::new(2)
    }
}

impl CoeffBuffer {
    /// Create a zeroed buffer
    pub fn new(log2_size: u8) -> Self {
        Self {
            coeffs: [0; MAX_COEFF],
            log2_size,
            transform_skip: false,
            explicit_rdpcm: None,
        }
    }

    /// Clear for a new block of `log2_size`
    pub fn reset(&mut self, log2_size: u8) {
        let n = 1usize << (2 * log2_size);
        self.coeffs[..n.max(1 << (2 * self.log2_size))].fill(0);
        self.log2_size = log2_size;
        self.transform_skip = false;
        self.explicit_rdpcm = None;
    }

    /// Get the transform size
    pub fn size(&self) -> usize {
        1 << self.log2_size
    }

    /// Get coefficient at position
    pub fn get(&self, x: usize, y: usize) -> i16 {
        self.coeffs[y * self.size() + x]
    }

    /// Set coefficient at position
    pub fn set(&mut self, x: usize, y: usize, value: i16) {
        let stride = self.size();
        self.coeffs[y * stride + x] = value;
    }

    /// Check if all coefficients are zero
    #[cfg(test)]
    pub fn is_zero(&self) -> bool {
        let n = self.size() * self.size();
        self.coeffs[..n].iter().all(|&c| c == 0)
    }
}

/// Per-block inputs of `residual_coding()`
#[derive(Debug, Clone, Copy)]
pub struct ResidualParams {
    /// log2TrafoSize of this component's block
    pub log2_size: u8,
    /// Component (0 = Y, 1 = Cb, 2 = Cr)
    pub c_idx: usize,
    /// scanIdx
    pub scan_idx: usize,
    /// Intra prediction mode of the block (`None` for inter CUs)
    pub intra_mode: Option<IntraPredMode>,
    /// cu_transquant_bypass_flag
    pub bypass: bool,
    /// transform_skip_flag is present
    pub transform_skip_allowed: bool,
    /// sign_data_hiding_enabled_flag
    pub sign_hiding: bool,
    /// explicit_rdpcm_enabled_flag
    pub explicit_rdpcm: bool,
    /// implicit_rdpcm_enabled_flag
    pub implicit_rdpcm: bool,
    /// transform_skip_context_enabled_flag
    pub transform_skip_context: bool,
    /// persistent_rice_adaptation_enabled_flag
    pub persistent_rice: bool,
}

/// Entropy state shared by consecutive `residual_coding()` calls
pub struct ResidualDecoder<'a, 'b> {
    /// Arithmetic decoder
    pub cabac: &'a mut CabacDecoder<'b>,
    /// Context models
    pub ctx: &'a mut ContextTable,
    /// StatCoeff for persistent Rice adaptation
    pub stat_coeff: &'a mut [u8; 4],
    /// Scan and context tables
    pub tables: &'a Tables,
}

impl ResidualDecoder<'_, '_> {
    /// Decode one transform block's coefficients into `out`
    pub fn decode(&mut self, p: &ResidualParams, out: &mut CoeffBuffer) -> Result<()> {
        out.reset(p.log2_size);
        let chroma = p.c_idx > 0;
        let log2 = p.log2_size;

        if p.transform_skip_allowed {
            let ctx = context::TRANSFORM_SKIP_FLAG + usize::from(chroma);
            out.transform_skip = self.cabac.decode_bin(&mut self.ctx[ctx]);
        }

        if p.intra_mode.is_none() && p.explicit_rdpcm && (out.transform_skip || p.bypass) {
            let c = usize::from(chroma);
            if self.cabac.decode_bin(&mut self.ctx[context::EXPLICIT_RDPCM_FLAG + c]) {
                let vertical = self.cabac.decode_bin(&mut self.ctx[context::EXPLICIT_RDPCM_DIR_FLAG + c]);
                out.explicit_rdpcm = Some(if vertical {
                    RdpcmDir::Vertical
                } else {
                    RdpcmDir::Horizontal
                });
            }
        }

        let (mut last_x, mut last_y) = self.last_sig_coeff_pos(log2, chroma)?;
        if p.scan_idx == SCAN_VERT {
            core::mem::swap(&mut last_x, &mut last_y);
        }
        let size = 1u32 << log2;
        if last_x >= size || last_y >= size {
            return Err(HevcError::InvalidBitstream("last significant position outside block"));
        }

        let tables = self.tables;
        let sub_scan = tables.scan(log2 - 2, p.scan_idx);
        let pos_scan = tables.scan(2, p.scan_idx);

        let last_sub_block = sub_scan
            .iter()
            .rposition(|&(xs, ys)| u32::from(xs) == last_x >> 2 && u32::from(ys) == last_y >> 2)
            .ok_or(HevcError::InvalidBitstream("last sub-block not in scan"))?;
        let last_scan_pos = pos_scan
            .iter()
            .position(|&(xp, yp)| u32::from(xp) == last_x & 3 && u32::from(yp) == last_y & 3)
            .ok_or(HevcError::InvalidBitstream("last position not in scan"))?;

        let sb_width = 1usize << (log2 - 2);
        let mut coded_sb = [false; 64];

        let ts_or_bypass = out.transform_skip || p.bypass;
        let sign_hiding_off = p.bypass
            || out.explicit_rdpcm.is_some()
            || (p.implicit_rdpcm
                && out.transform_skip
                && matches!(p.intra_mode, Some(m) if m == IntraPredMode::HORIZONTAL || m == IntraPredMode::VERTICAL));
        let sb_type = 2 * usize::from(!chroma) + usize::from(ts_or_bypass);

        // greater1 context carried between sub-blocks
        let mut prev_c1: Option<u8> = None;

        for i in (0..=last_sub_block).rev() {
            let (xs, ys) = sub_scan[i];
            let (xs, ys) = (xs as usize, ys as usize);

            let right = xs + 1 < sb_width && coded_sb[ys * sb_width + xs + 1];
            let below = ys + 1 < sb_width && coded_sb[(ys + 1) * sb_width + xs];

            let mut infer_dc = false;
            let coded = if i < last_sub_block && i > 0 {
                let ctx = context::CODED_SUB_BLOCK_FLAG
                    + usize::from(right || below)
                    + if chroma { 2 } else { 0 };
                let flag = self.cabac.decode_bin(&mut self.ctx[ctx]);
                infer_dc = flag;
                flag
            } else {
                true
            };
            coded_sb[ys * sb_width + xs] = coded;

            let prev_csbf = u8::from(right) | u8::from(below) << 1;
            let mut sig = [false; 16];
            let mut num_sig = 0usize;

            let start = if i == last_sub_block {
                sig[last_scan_pos] = true;
                num_sig = 1;
                last_scan_pos as isize - 1
            } else {
                15
            };

            if coded {
                for n in (0..=start).rev() {
                    let n = n as usize;
                    let (xp, yp) = pos_scan[n];
                    if n == 0 && infer_dc {
                        sig[0] = true;
                        num_sig += 1;
                        break;
                    }
                    let inc = if p.transform_skip_context && ts_or_bypass {
                        if chroma { 43 } else { 42 }
                    } else {
                        tables.sig_ctx_inc(log2, chroma, p.scan_idx, prev_csbf, i == 0, xp, yp)
                    };
                    if self.cabac.decode_bin(&mut self.ctx[context::SIG_COEFF_FLAG + inc as usize]) {
                        sig[n] = true;
                        num_sig += 1;
                        infer_dc = false;
                    }
                }
            }

            if num_sig == 0 {
                continue;
            }

            let mut ctx_set = if i == 0 || chroma { 0 } else { 2 };
            if prev_c1 == Some(0) {
                ctx_set += 1;
            }
            let mut c1 = 1u8;

            let mut abs = [0i32; 16];
            let mut first_g1: Option<usize> = None;
            let mut g1_decoded = 0;
            for n in (0..16).rev().filter(|&n| sig[n]) {
                abs[n] = 1;
                if g1_decoded == 8 {
                    continue;
                }
                let ctx = context::COEFF_ABS_LEVEL_GREATER1_FLAG
                    + ctx_set * 4
                    + c1 as usize
                    + if chroma { 16 } else { 0 };
                let g1 = self.cabac.decode_bin(&mut self.ctx[ctx]);
                g1_decoded += 1;
                if g1 {
                    abs[n] = 2;
                    c1 = 0;
                    first_g1.get_or_insert(n);
                } else if c1 > 0 && c1 < 3 {
                    c1 += 1;
                }
            }
            prev_c1 = Some(c1);

            if let Some(n) = first_g1 {
                let ctx = context::COEFF_ABS_LEVEL_GREATER2_FLAG + ctx_set + if chroma { 4 } else { 0 };
                if self.cabac.decode_bin(&mut self.ctx[ctx]) {
                    abs[n] = 3;
                }
            }

            let first_sig = (0..16).find(|&n| sig[n]).unwrap_or(0);
            let last_sig = (0..16).rev().find(|&n| sig[n]).unwrap_or(0);
            let sign_hidden = p.sign_hiding && !sign_hiding_off && last_sig - first_sig > 3;

            let mut negative = [false; 16];
            for n in (0..16).rev().filter(|&n| sig[n]) {
                if !(sign_hidden && n == first_sig) {
                    negative[n] = self.cabac.decode_bypass();
                }
            }

            // remaining levels
            let mut rice = if p.persistent_rice {
                u32::from(self.stat_coeff[sb_type] / 4)
            } else {
                0
            };
            let mut first_remaining = true;
            let mut seen = 0usize;
            let mut sum_abs = 0i64;
            for n in (0..16).rev().filter(|&n| sig[n]) {
                let base = abs[n];
                let threshold = if seen < 8 {
                    if Some(n) == first_g1 { 3 } else { 2 }
                } else {
                    1
                };
                if base == threshold {
                    let rem = self.coeff_abs_level_remaining(rice)?;
                    if p.persistent_rice && first_remaining {
                        let stat = &mut self.stat_coeff[sb_type];
                        if rem >= (3 << (*stat / 4)) {
                            *stat += 1;
                        } else if 2 * rem < (1 << (*stat / 4)) && *stat > 0 {
                            *stat -= 1;
                        }
                    }
                    first_remaining = false;
                    abs[n] = base.saturating_add(rem.min(i32::MAX as u32) as i32);
                    if abs[n] > 3 * (1 << rice) {
                        rice = (rice + 1).min(4);
                    }
                }
                seen += 1;
                sum_abs += i64::from(abs[n]);
            }

            for n in (0..16).filter(|&n| sig[n]) {
                let mut level = abs[n];
                if negative[n] || (sign_hidden && n == first_sig && sum_abs % 2 == 1) {
                    level = -level;
                }
                let (xp, yp) = pos_scan[n];
                out.set(
                    (xs << 2) + xp as usize,
                    (ys << 2) + yp as usize,
                    level.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                );
            }
        }
        Ok(())
    }

    fn last_sig_coeff_pos(&mut self, log2_size: u8, chroma: bool) -> Result<(u32, u32)> {
        let x_prefix = self.last_sig_coeff_prefix(context::LAST_SIG_COEFF_X_PREFIX, log2_size, chroma);
        let y_prefix = self.last_sig_coeff_prefix(context::LAST_SIG_COEFF_Y_PREFIX, log2_size, chroma);
        let x = self.last_sig_coeff_suffix(x_prefix);
        let y = self.last_sig_coeff_suffix(y_prefix);
        Ok((x, y))
    }

    fn last_sig_coeff_prefix(&mut self, base: usize, log2_size: u8, chroma: bool) -> u32 {
        let (offset, shift) = if chroma {
            (15, log2_size - 2)
        } else {
            (3 * (log2_size as usize - 2) + ((log2_size as usize - 1) >> 2), (log2_size + 1) >> 2)
        };
        let c_max = (u32::from(log2_size) << 1) - 1;
        let mut prefix = 0u32;
        while prefix < c_max {
            let ctx = base + offset + (prefix as usize >> shift);
            if !self.cabac.decode_bin(&mut self.ctx[ctx]) {
                break;
            }
            prefix += 1;
        }
        prefix
    }

    fn last_sig_coeff_suffix(&mut self, prefix: u32) -> u32 {
        if prefix > 3 {
            let n_bits = (prefix >> 1) - 1;
            let suffix = self.cabac.decode_bypass_bits(n_bits);
            ((2 + (prefix & 1)) << n_bits) + suffix
        } else {
            prefix
        }
    }

    /// coeff_abs_level_remaining: Rice prefix of at most four, then Exp-Golomb
    fn coeff_abs_level_remaining(&mut self, rice: u32) -> Result<u32> {
        let mut prefix = 0u32;
        while self.cabac.decode_bypass() {
            prefix += 1;
            if prefix > 32 {
                return Err(HevcError::CabacError("coeff_abs_level_remaining prefix overflow"));
            }
        }
        if prefix <= 3 {
            Ok((prefix << rice) + self.cabac.decode_bypass_bits(rice))
        } else {
            let suffix_bits = prefix - 3 + rice;
            if suffix_bits > 31 {
                return Err(HevcError::SyntaxOutOfRange {
                    element: "coeff_abs_level_remaining",
                    value: i64::from(prefix),
                });
            }
            let suffix = self.cabac.decode_bypass_bits(suffix_bits);
            Ok((((1u32 << (prefix - 3)) + 2) << rice).wrapping_add(suffix))
        }
    }
}
