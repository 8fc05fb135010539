//! Inverse quantization and inverse transforms
//!
//! Scaling (flat or scaling-list), the 4x4 inverse DST, inverse DCTs of
//! 4 to 32 points built by even/odd butterfly recursion over the 32-point
//! basis, transform skip with rotation, transquant bypass, residual DPCM
//! and cross-component prediction.

use super::params::ScalingFactors;
use super::residual::{CoeffBuffer, RdpcmDir};

/// Maximum number of coefficients (32x32 transform)
pub const MAX_COEFF: usize = 32 * 32;

/// Scaling factors from Table 8-8
const LEVEL_SCALE: [i32; 6] = [40, 45, 51, 57, 64, 72];

const COEFF_MIN: i32 = -32768;
const COEFF_MAX: i32 = 32767;

/// DST-VII basis functions for 4x4 (scaled by 64)
static DST4_MATRIX: [[i32; 4]; 4] = [
    [29, 55, 74, 84],
    [74, 74, 0, -74],
    [84, -29, -74, 55],
    [55, -84, 74, -29],
];

/// Full DCT-II basis matrix for 32x32 (H.265 Table 8-5)
/// Stored as i8 since all coefficients fit in [-90, 90]
#[rustfmt::skip]
static DCT32_MATRIX: [[i8; 32]; 32] = [
    [ 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64,  64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64],
    [ 90, 90, 88, 85, 82, 78, 73, 67, 61, 54, 46, 38, 31, 22, 13,  4,  -4,-13,-22,-31,-38,-46,-54,-61,-67,-73,-78,-82,-85,-88,-90,-90],
    [ 90, 87, 80, 70, 57, 43, 25,  9, -9,-25,-43,-57,-70,-80,-87,-90, -90,-87,-80,-70,-57,-43,-25, -9,  9, 25, 43, 57, 70, 80, 87, 90],
    [ 90, 82, 67, 46, 22, -4,-31,-54,-73,-85,-90,-88,-78,-61,-38,-13,  13, 38, 61, 78, 88, 90, 85, 73, 54, 31,  4,-22,-46,-67,-82,-90],
    [ 89, 75, 50, 18,-18,-50,-75,-89,-89,-75,-50,-18, 18, 50, 75, 89,  89, 75, 50, 18,-18,-50,-75,-89,-89,-75,-50,-18, 18, 50, 75, 89],
    [ 88, 67, 31,-13,-54,-82,-90,-78,-46, -4, 38, 73, 90, 85, 61, 22, -22,-61,-85,-90,-73,-38,  4, 46, 78, 90, 82, 54, 13,-31,-67,-88],
    [ 87, 57,  9,-43,-80,-90,-70,-25, 25, 70, 90, 80, 43, -9,-57,-87, -87,-57, -9, 43, 80, 90, 70, 25,-25,-70,-90,-80,-43,  9, 57, 87],
    [ 85, 46,-13,-67,-90,-73,-22, 38, 82, 88, 54, -4,-61,-90,-78,-31,  31, 78, 90, 61,  4,-54,-88,-82,-38, 22, 73, 90, 67, 13,-46,-85],
    [ 83, 36,-36,-83,-83,-36, 36, 83, 83, 36,-36,-83,-83,-36, 36, 83,  83, 36,-36,-83,-83,-36, 36, 83, 83, 36,-36,-83,-83,-36, 36, 83],
    [ 82, 22,-54,-90,-61, 13, 78, 85, 31,-46,-90,-67,  4, 73, 88, 38, -38,-88,-73, -4, 67, 90, 46,-31,-85,-78,-13, 61, 90, 54,-22,-82],
    [ 80,  9,-70,-87,-25, 57, 90, 43,-43,-90,-57, 25, 87, 70, -9,-80, -80, -9, 70, 87, 25,-57,-90,-43, 43, 90, 57,-25,-87,-70,  9, 80],
    [ 78, -4,-82,-73, 13, 85, 67,-22,-88,-61, 31, 90, 54,-38,-90,-46,  46, 90, 38,-54,-90,-31, 61, 88, 22,-67,-85,-13, 73, 82,  4,-78],
    [ 75,-18,-89,-50, 50, 89, 18,-75,-75, 18, 89, 50,-50,-89,-18, 75,  75,-18,-89,-50, 50, 89, 18,-75,-75, 18, 89, 50,-50,-89,-18, 75],
    [ 73,-31,-90,-22, 78, 67,-38,-90,-13, 82, 61,-46,-88, -4, 85, 54, -54,-85,  4, 88, 46,-61,-82, 13, 90, 38,-67,-78, 22, 90, 31,-73],
    [ 70,-43,-87,  9, 90, 25,-80,-57, 57, 80,-25,-90, -9, 87, 43,-70, -70, 43, 87, -9,-90,-25, 80, 57,-57,-80, 25, 90,  9,-87,-43, 70],
    [ 67,-54,-78, 38, 85,-22,-90,  4, 90, 13,-88,-31, 82, 46,-73,-61,  61, 73,-46,-82, 31, 88,-13,-90, -4, 90, 22,-85,-38, 78, 54,-67],
    [ 64,-64,-64, 64, 64,-64,-64, 64, 64,-64,-64, 64, 64,-64,-64, 64,  64,-64,-64, 64, 64,-64,-64, 64, 64,-64,-64, 64, 64,-64,-64, 64],
    [ 61,-73,-46, 82, 31,-88,-13, 90, -4,-90, 22, 85,-38,-78, 54, 67, -67,-54, 78, 38,-85,-22, 90,  4,-90, 13, 88,-31,-82, 46, 73,-61],
    [ 57,-80,-25, 90, -9,-87, 43, 70,-70,-43, 87,  9,-90, 25, 80,-57, -57, 80, 25,-90,  9, 87,-43,-70, 70, 43,-87, -9, 90,-25,-80, 57],
    [ 54,-85, -4, 88,-46,-61, 82, 13,-90, 38, 67,-78,-22, 90,-31,-73,  73, 31,-90, 22, 78,-67,-38, 90,-13,-82, 61, 46,-88,  4, 85,-54],
    [ 50,-89, 18, 75,-75,-18, 89,-50,-50, 89,-18,-75, 75, 18,-89, 50,  50,-89, 18, 75,-75,-18, 89,-50,-50, 89,-18,-75, 75, 18,-89, 50],
    [ 46,-90, 38, 54,-90, 31, 61,-88, 22, 67,-85, 13, 73,-82,  4, 78, -78, -4, 82,-73,-13, 85,-67,-22, 88,-61,-31, 90,-54,-38, 90,-46],
    [ 43,-90, 57, 25,-87, 70,  9,-80, 80, -9,-70, 87,-25,-57, 90,-43, -43, 90,-57,-25, 87,-70, -9, 80,-80,  9, 70,-87, 25, 57,-90, 43],
    [ 38,-88, 73, -4,-67, 90,-46,-31, 85,-78, 13, 61,-90, 54, 22,-82,  82,-22,-54, 90,-61,-13, 78,-85, 31, 46,-90, 67,  4,-73, 88,-38],
    [ 36,-83, 83,-36,-36, 83,-83, 36, 36,-83, 83,-36,-36, 83,-83, 36,  36,-83, 83,-36,-36, 83,-83, 36, 36,-83, 83,-36,-36, 83,-83, 36],
    [ 31,-78, 90,-61,  4, 54,-88, 82,-38,-22, 73,-90, 67,-13,-46, 85, -85, 46, 13,-67, 90,-73, 22, 38,-82, 88,-54, -4, 61,-90, 78,-31],
    [ 25,-70, 90,-80, 43,  9,-57, 87,-87, 57, -9,-43, 80,-90, 70,-25, -25, 70,-90, 80,-43, -9, 57,-87, 87,-57,  9, 43,-80, 90,-70, 25],
    [ 22,-61, 85,-90, 73,-38, -4, 46,-78, 90,-82, 54,-13,-31, 67,-88,  88,-67, 31, 13,-54, 82,-90, 78,-46,  4, 38,-73, 90,-85, 61,-22],
    [ 18,-50, 75,-89, 89,-75, 50,-18,-18, 50,-75, 89,-89, 75,-50, 18,  18,-50, 75,-89, 89,-75, 50,-18,-18, 50,-75, 89,-89, 75,-50, 18],
    [ 13,-38, 61,-78, 88,-90, 85,-73, 54,-31,  4, 22,-46, 67,-82, 90, -90, 82,-67, 46,-22, -4, 31,-54, 73,-85, 90,-88, 78,-61, 38,-13],
    [  9,-25, 43,-57, 70,-80, 87,-90, 90,-87, 80,-70, 57,-43, 25, -9,  -9, 25,-43, 57,-70, 80,-87, 90,-90, 87,-80, 70,-57, 43,-25,  9],
    [  4,-13, 22,-31, 38,-46, 54,-61, 67,-73, 78,-82, 85,-88, 90,-90,  90,-90, 88,-85, 82,-78, 73,-67, 61,-54, 46,-38, 31,-22, 13, -4],
];

/// Basis value of row `k` at column `n` for an `size`-point DCT
#[inline]
fn dct_coef(size: usize, k: usize, n: usize) -> i32 {
    i32::from(DCT32_MATRIX[k * (32 / size)][n])
}

/// One-dimensional inverse DCT by even/odd decomposition
///
/// `src` holds `size` coefficients spaced `step` apart. Even-indexed inputs
/// form the half-size inverse DCT, odd-indexed inputs the antisymmetric part.
fn idct_1d(src: &[i32], step: usize, size: usize, out: &mut [i32]) {
    if size == 1 {
        out[0] = 64 * src[0];
        return;
    }
    let half = size / 2;
    let mut even = [0i32; 16];
    idct_1d(src, step * 2, half, &mut even[..half]);
    for k in 0..half {
        let mut odd = 0i32;
        for j in (1..size).step_by(2) {
            let c = src[j * step];
            if c != 0 {
                odd += c * dct_coef(size, j, k);
            }
        }
        out[k] = even[k] + odd;
        out[size - 1 - k] = even[k] - odd;
    }
}

fn idst4_1d(src: &[i32], step: usize, out: &mut [i32]) {
    for (k, o) in out.iter_mut().enumerate().take(4) {
        *o = (0..4).map(|j| src[j * step] * DST4_MATRIX[j][k]).sum();
    }
}

/// Two-stage inverse transform of `coeffs` (raster, `1 << log2_size` wide)
///
/// The first (vertical) stage is rounded by 7 bits and clipped to the
/// coefficient range; the second (horizontal) stage by `20 - bit_depth`.
pub fn inverse_transform(coeffs: &[i32], residual: &mut [i32], log2_size: u8, bit_depth: u8, dst: bool) {
    let n = 1usize << log2_size;
    let shift2 = 20 - i32::from(bit_depth);
    let mut tmp = [0i32; MAX_COEFF];
    let mut col = [0i32; 32];

    for x in 0..n {
        if (0..n).all(|y| coeffs[y * n + x] == 0) {
            continue;
        }
        if dst {
            idst4_1d(&coeffs[x..], n, &mut col);
        } else {
            idct_1d(&coeffs[x..], n, n, &mut col);
        }
        for y in 0..n {
            tmp[y * n + x] = ((col[y] + 64) >> 7).clamp(COEFF_MIN, COEFF_MAX);
        }
    }

    let add = 1 << (shift2 - 1);
    for y in 0..n {
        let row = &tmp[y * n..y * n + n];
        let out = &mut residual[y * n..y * n + n];
        if row.iter().all(|&v| v == 0) {
            out.fill(0);
            continue;
        }
        if dst {
            idst4_1d(row, 1, &mut col);
        } else {
            idct_1d(row, 1, n, &mut col);
        }
        for (o, &v) in out.iter_mut().zip(col.iter()) {
            *o = (v + add) >> shift2;
        }
    }
}

/// Inputs of the scaling and transformation process for one block
#[derive(Debug, Clone, Copy)]
pub struct TransformParams<'a> {
    /// Component (0 = Y, 1 = Cb, 2 = Cr)
    pub c_idx: usize,
    /// Bit depth of the component
    pub bit_depth: u8,
    /// qP for this component
    pub qp: i32,
    /// CU is intra coded
    pub intra: bool,
    /// cu_transquant_bypass_flag
    pub bypass: bool,
    /// transform_skip_rotation_enabled_flag
    pub rotation: bool,
    /// Residual DPCM applied after reconstruction of the residual
    pub rdpcm: Option<RdpcmDir>,
    /// Scaling matrices, `None` when scaling lists are disabled
    pub scaling: Option<&'a ScalingFactors>,
}

/// Scaling process for transform coefficients
pub fn dequantize(block: &CoeffBuffer, p: &TransformParams<'_>, out: &mut [i32]) {
    let log2 = block.log2_size;
    let n = 1usize << (2 * log2);
    let qp = p.qp.max(0);
    let scale = LEVEL_SCALE[(qp % 6) as usize] << (qp / 6);
    let bd_shift = i32::from(p.bit_depth) + i32::from(log2) - 5;
    let add = 1i64 << (bd_shift - 1);
    let flat = p.scaling.is_none() || (block.transform_skip && log2 > 2);
    let matrix = p
        .scaling
        .filter(|_| !flat)
        .map(|f| f.matrix(log2, !p.intra, p.c_idx));

    for i in 0..n {
        let level = i64::from(block.coeffs[i]);
        if level == 0 {
            out[i] = 0;
            continue;
        }
        let m = matrix.map_or(16, |m| i64::from(m[i]));
        let v = (level * m * i64::from(scale) + add) >> bd_shift;
        out[i] = v.clamp(i64::from(COEFF_MIN), i64::from(COEFF_MAX)) as i32;
    }
}

/// Residual of one transform block from its coefficient levels
///
/// Covers transquant bypass, transform skip (with optional 180 degree
/// rotation for 4x4 intra blocks), the inverse DST for 4x4 intra luma and
/// the inverse DCT otherwise, followed by residual DPCM when requested.
pub fn reconstruct_residual(block: &CoeffBuffer, p: &TransformParams<'_>, residual: &mut [i32]) {
    let log2 = block.log2_size;
    let size = 1usize << log2;
    let n = size * size;
    let rotate = p.rotation && log2 == 2 && p.intra && (p.bypass || block.transform_skip);

    if p.bypass {
        for i in 0..n {
            let src = if rotate { n - 1 - i } else { i };
            residual[i] = i32::from(block.coeffs[src]);
        }
    } else {
        let mut d = [0i32; MAX_COEFF];
        dequantize(block, p, &mut d);
        if block.transform_skip {
            let ts_shift = 5 + i32::from(log2);
            let bd_shift = 20 - i32::from(p.bit_depth);
            for i in 0..n {
                let src = if rotate { n - 1 - i } else { i };
                residual[i] = ((d[src] << ts_shift) + (1 << (bd_shift - 1))) >> bd_shift;
            }
        } else {
            let dst = p.intra && p.c_idx == 0 && log2 == 2;
            inverse_transform(&d[..n], residual, log2, p.bit_depth, dst);
        }
    }

    if let Some(dir) = p.rdpcm {
        apply_rdpcm(residual, size, dir);
    }
}

/// Accumulate residuals along rows or columns
pub fn apply_rdpcm(residual: &mut [i32], size: usize, dir: RdpcmDir) {
    match dir {
        RdpcmDir::Horizontal => {
            for y in 0..size {
                for x in 1..size {
                    residual[y * size + x] += residual[y * size + x - 1];
                }
            }
        }
        RdpcmDir::Vertical => {
            for y in 1..size {
                for x in 0..size {
                    residual[y * size + x] += residual[(y - 1) * size + x];
                }
            }
        }
    }
}

/// Cross-component prediction of a chroma residual from the luma residual
pub fn cross_component_predict(
    chroma: &mut [i32],
    luma: &[i32],
    res_scale: i32,
    bit_depth_y: u8,
    bit_depth_c: u8,
) {
    for (c, &y) in chroma.iter_mut().zip(luma) {
        *c += (res_scale * ((y << bit_depth_c) >> bit_depth_y)) >> 3;
    }
}
