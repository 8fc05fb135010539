//! Intra prediction
//!
//! Implements the 35 intra prediction modes:
//! - Mode 0: Planar (smooth bilinear interpolation)
//! - Mode 1: DC (average of reference samples)
//! - Modes 2-34: Angular (directional prediction)
//!
//! plus reference sample substitution and filtering, and the luma/chroma
//! mode derivation from the most probable mode list.

use super::grid::SamplePlane;
use super::slice::IntraPredMode;

/// Maximum block size for intra prediction (HEVC max intra TU = 32)
const MAX_INTRA_PRED_BLOCK_SIZE: usize = 32;

const BORDER_LEN: usize = 4 * MAX_INTRA_PRED_BLOCK_SIZE + 1;
const CENTER: usize = 2 * MAX_INTRA_PRED_BLOCK_SIZE;

/// Intra prediction angle table (Table 8-4)
/// Index 0-1 are placeholders, modes 2-34 have actual angles
pub static INTRA_PRED_ANGLE: [i16; 35] = [
    0, 0, // modes 0, 1 (planar, DC)
    32, 26, 21, 17, 13, 9, 5, 2, // modes 2-9
    0, // mode 10 (horizontal)
    -2, -5, -9, -13, -17, -21, -26, // modes 11-17
    -32, // mode 18
    -26, -21, -17, -13, -9, -5, -2, // modes 19-25
    0,  // mode 26 (vertical)
    2, 5, 9, 13, 17, 21, 26, // modes 27-33
    32, // mode 34
];

/// Inverse angle table for negative angles (modes 11-25)
static INV_ANGLE: [i32; 15] = [
    -4096, -1638, -910, -630, -482, -390, -315, // modes 11-17
    -256, // mode 18
    -315, -390, -482, -630, -910, -1638, -4096, // modes 19-25
];

/// Chroma mode remapping for 4:2:2 (Table 8-3)
static MODE_422: [u8; 35] = [
    0, 1, 2, 2, 2, 2, 3, 5, 7, 8, 10, 11, 13, 15, 16, 18, 19, 20, 21, 22, 23, 23, 24, 24, 25, 25,
    26, 27, 27, 28, 28, 29, 29, 30, 31,
];

fn inv_angle(mode: u8) -> i32 {
    if (11..=25).contains(&mode) {
        INV_ANGLE[(mode - 11) as usize]
    } else {
        0
    }
}

/// Tool switches for one intra prediction call
#[derive(Debug, Clone, Copy)]
pub struct IntraParams {
    /// Component (0 = Y, 1 = Cb, 2 = Cr)
    pub c_idx: usize,
    /// Bit depth of the component
    pub bit_depth: u8,
    /// ChromaArrayType == 3 (chroma reference samples are filtered)
    pub chroma_444: bool,
    /// strong_intra_smoothing_enabled_flag
    pub strong_smoothing: bool,
    /// intra_smoothing_disabled_flag
    pub smoothing_disabled: bool,
    /// disableIntraBoundaryFilter (implicit RDPCM with transquant bypass)
    pub boundary_filter_disabled: bool,
}

/// Predict a `1 << log2_size` block at component position (x, y) into `out`
///
/// `available(xn, yn)` reports whether the reconstructed sample at
/// component position (xn, yn) may be used as a reference.
pub fn predict_intra(
    plane: &SamplePlane,
    x: u32,
    y: u32,
    log2_size: u8,
    mode: IntraPredMode,
    p: &IntraParams,
    available: impl Fn(i32, i32) -> bool,
    out: &mut [u16],
) {
    let size = 1usize << log2_size;
    let mut border = [0i32; BORDER_LEN];
    fill_border_samples(plane, x, y, size, p.bit_depth, &available, &mut border);

    if (p.c_idx == 0 || p.chroma_444) && !p.smoothing_disabled {
        filter_reference_samples(&mut border, size, p, mode.as_u8());
    }

    let max_val = (1i32 << p.bit_depth) - 1;
    let edge_filters = p.c_idx == 0 && size < 32 && !p.boundary_filter_disabled;
    match mode {
        IntraPredMode::PLANAR => predict_planar(&border, size, log2_size, out),
        IntraPredMode::DC => predict_dc(&border, size, log2_size, edge_filters, out),
        _ => predict_angular(&border, size, mode.as_u8(), edge_filters, max_val, out),
    }
}

/// Gather p[-1][-1..2N-1] and p[0..2N-1][-1] with substitution of unavailable samples
///
/// Layout (indexed from CENTER): left column bottom to top at
/// `CENTER - 2N .. CENTER - 1`, corner at `CENTER`, top row left to right at
/// `CENTER + 1 .. CENTER + 2N`.
fn fill_border_samples(
    plane: &SamplePlane,
    x: u32,
    y: u32,
    size: usize,
    bit_depth: u8,
    available: &impl Fn(i32, i32) -> bool,
    border: &mut [i32; BORDER_LEN],
) {
    let mut avail = [false; BORDER_LEN];
    let mut avail_count = 0usize;
    let (x, y) = (x as i32, y as i32);

    let mut read = |idx: usize, xn: i32, yn: i32| {
        if available(xn, yn) {
            border[idx] = i32::from(plane.get(xn as u32, yn as u32));
            avail[idx] = true;
            avail_count += 1;
        }
    };

    read(CENTER, x - 1, y - 1);
    for i in 0..2 * size {
        read(CENTER + 1 + i, x + i as i32, y - 1);
        read(CENTER - 1 - i, x - 1, y + i as i32);
    }

    if avail_count == 4 * size + 1 {
        return;
    }
    if avail_count == 0 {
        let mid = 1i32 << (bit_depth - 1);
        border[CENTER - 2 * size..=CENTER + 2 * size].fill(mid);
        return;
    }

    // scan from p[-1][2N-1] up to the corner, then along the top row;
    // each unavailable sample copies its predecessor in scan order
    let start = CENTER - 2 * size;
    let end = CENTER + 2 * size;
    if !avail[start] {
        if let Some(first) = (start..=end).find(|&i| avail[i]) {
            border[start] = border[first];
        }
    }
    for i in start + 1..=end {
        if !avail[i] {
            border[i] = border[i - 1];
        }
    }
}

/// Reference sample filtering: [1 2 1] smoothing or strong bilinear smoothing
fn filter_reference_samples(border: &mut [i32; BORDER_LEN], n_t: usize, p: &IntraParams, mode: u8) {
    let filter = if mode == 1 || n_t == 4 {
        false
    } else {
        let min_dist = (i32::from(mode) - 26).abs().min((i32::from(mode) - 10).abs());
        match n_t {
            8 => min_dist > 7,
            16 => min_dist > 1,
            32 => min_dist > 0,
            _ => false,
        }
    };
    if !filter {
        return;
    }

    let threshold = 1 << (p.bit_depth - 5);
    let strong = p.strong_smoothing
        && p.c_idx == 0
        && n_t == 32
        && (border[CENTER] + border[CENTER + 64] - 2 * border[CENTER + 32]).abs() < threshold
        && (border[CENTER] + border[CENTER - 64] - 2 * border[CENTER - 32]).abs() < threshold;

    let mut pf = [0i32; BORDER_LEN];
    pf[CENTER - 2 * n_t] = border[CENTER - 2 * n_t];
    pf[CENTER + 2 * n_t] = border[CENTER + 2 * n_t];
    pf[CENTER] = border[CENTER];

    if strong {
        let p0 = border[CENTER];
        let bottom = border[CENTER - 64];
        let right = border[CENTER + 64];
        for i in 1..64i32 {
            pf[CENTER - i as usize] = p0 + ((i * (bottom - p0) + 32) >> 6);
            pf[CENTER + i as usize] = p0 + ((i * (right - p0) + 32) >> 6);
        }
    } else {
        for i in CENTER + 1 - 2 * n_t..CENTER + 2 * n_t {
            pf[i] = (border[i + 1] + 2 * border[i] + border[i - 1] + 2) >> 2;
        }
    }

    border[CENTER - 2 * n_t..=CENTER + 2 * n_t]
        .copy_from_slice(&pf[CENTER - 2 * n_t..=CENTER + 2 * n_t]);
}

fn predict_planar(border: &[i32; BORDER_LEN], n: usize, log2_size: u8, out: &mut [u16]) {
    let n_i = n as i32;
    let top_right = border[CENTER + 1 + n];
    let bottom_left = border[CENTER - 1 - n];
    for py in 0..n {
        let left = border[CENTER - 1 - py];
        let py_i = py as i32;
        for px in 0..n {
            let px_i = px as i32;
            let top = border[CENTER + 1 + px];
            let pred = ((n_i - 1 - px_i) * left
                + (px_i + 1) * top_right
                + (n_i - 1 - py_i) * top
                + (py_i + 1) * bottom_left
                + n_i)
                >> (log2_size + 1);
            out[py * n + px] = pred as u16;
        }
    }
}

fn predict_dc(border: &[i32; BORDER_LEN], n: usize, log2_size: u8, edge_filters: bool, out: &mut [u16]) {
    let sum: i32 = (0..n)
        .map(|i| border[CENTER + 1 + i] + border[CENTER - 1 - i])
        .sum();
    let dc = (sum + n as i32) >> (log2_size + 1);
    out[..n * n].fill(dc as u16);

    if edge_filters {
        out[0] = ((border[CENTER - 1] + 2 * dc + border[CENTER + 1] + 2) >> 2) as u16;
        for i in 1..n {
            out[i] = ((border[CENTER + 1 + i] + 3 * dc + 2) >> 2) as u16;
            out[i * n] = ((border[CENTER - 1 - i] + 3 * dc + 2) >> 2) as u16;
        }
    }
}

fn predict_angular(
    border: &[i32; BORDER_LEN],
    n: usize,
    mode: u8,
    edge_filters: bool,
    max_val: i32,
    out: &mut [u16],
) {
    let n_i = n as i32;
    let angle = i32::from(INTRA_PRED_ANGLE[mode as usize]);
    let mut ref_arr = [0i32; BORDER_LEN];
    let vertical = mode >= 18;

    // main reference: top row for vertical modes, left column otherwise
    let main = |i: i32| -> i32 {
        if vertical {
            border[(CENTER as i32 + i) as usize]
        } else {
            border[(CENTER as i32 - i) as usize]
        }
    };
    let side = |i: i32| -> i32 {
        if vertical {
            border[(CENTER as i32 - i) as usize]
        } else {
            border[(CENTER as i32 + i) as usize]
        }
    };

    for i in 0..=n_i {
        ref_arr[(CENTER as i32 + i) as usize] = main(i);
    }
    if angle < 0 {
        let inv = inv_angle(mode);
        let ext = (n_i * angle) >> 5;
        if ext < -1 {
            for xx in ext..=-1 {
                let idx = (xx * inv + 128) >> 8;
                ref_arr[(CENTER as i32 + xx) as usize] = side(idx);
            }
        }
    } else {
        for i in n_i + 1..=2 * n_i {
            ref_arr[(CENTER as i32 + i) as usize] = main(i);
        }
    }

    for j in 0..n_i {
        let pos = (j + 1) * angle;
        let i_idx = pos >> 5;
        let i_fact = pos & 31;
        for i in 0..n_i {
            let idx = (CENTER as i32 + i + i_idx + 1) as usize;
            let pred = if i_fact != 0 {
                ((32 - i_fact) * ref_arr[idx] + i_fact * ref_arr[idx + 1] + 16) >> 5
            } else {
                ref_arr[idx]
            };
            // vertical modes run along rows, horizontal modes along columns
            let (px, py) = if vertical { (i, j) } else { (j, i) };
            out[py as usize * n + px as usize] = pred as u16;
        }
    }

    if edge_filters && angle == 0 {
        let corner = border[CENTER];
        for k in 0..n {
            let pred = if vertical {
                border[CENTER + 1] + ((border[CENTER - 1 - k] - corner) >> 1)
            } else {
                border[CENTER - 1] + ((border[CENTER + 1 + k] - corner) >> 1)
            };
            let pos = if vertical { k * n } else { k };
            out[pos] = pred.clamp(0, max_val) as u16;
        }
    }
}

/// Most probable mode list from the left (A) and above (B) candidates
pub fn mpm_candidates(cand_a: IntraPredMode, cand_b: IntraPredMode) -> [IntraPredMode; 3] {
    if cand_a == cand_b {
        if !cand_a.is_angular() {
            [IntraPredMode::PLANAR, IntraPredMode::DC, IntraPredMode::VERTICAL]
        } else {
            let mode = cand_a.as_u8();
            let left = 2 + ((mode + 29) % 32);
            let right = 2 + ((mode - 2 + 1) % 32);
            [
                cand_a,
                IntraPredMode::from_u8(left).unwrap_or(IntraPredMode::DC),
                IntraPredMode::from_u8(right).unwrap_or(IntraPredMode::DC),
            ]
        }
    } else {
        let third = if cand_a != IntraPredMode::PLANAR && cand_b != IntraPredMode::PLANAR {
            IntraPredMode::PLANAR
        } else if cand_a != IntraPredMode::DC && cand_b != IntraPredMode::DC {
            IntraPredMode::DC
        } else {
            IntraPredMode::VERTICAL
        };
        [cand_a, cand_b, third]
    }
}

/// IntraPredModeY from `mpm_idx` or `rem_intra_luma_pred_mode`
pub fn luma_mode(candidates: [IntraPredMode; 3], mpm_idx: Option<u8>, rem: u8) -> IntraPredMode {
    if let Some(idx) = mpm_idx {
        return candidates[idx.min(2) as usize];
    }
    let mut sorted = candidates.map(|c| c.as_u8());
    sorted.sort_unstable();
    let mut mode = rem;
    for c in sorted {
        if mode >= c {
            mode += 1;
        }
    }
    IntraPredMode::from_u8(mode).unwrap_or(IntraPredMode::DC)
}

/// IntraPredModeC from `intra_chroma_pred_mode` and the luma mode
pub fn chroma_mode(intra_chroma_pred_mode: u8, luma: IntraPredMode, chroma_422: bool) -> IntraPredMode {
    let explicit = match intra_chroma_pred_mode {
        0 => Some(IntraPredMode::PLANAR),
        1 => Some(IntraPredMode::VERTICAL),
        2 => Some(IntraPredMode::HORIZONTAL),
        3 => Some(IntraPredMode::DC),
        _ => None,
    };
    let mode = match explicit {
        Some(m) if m == luma => IntraPredMode::ANGULAR_34,
        Some(m) => m,
        None => luma,
    };
    if chroma_422 {
        IntraPredMode::from_u8(MODE_422[mode.as_u8() as usize]).unwrap_or(mode)
    } else {
        mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> IntraParams {
        IntraParams {
            c_idx: 0,
            bit_depth: 8,
            chroma_444: false,
            strong_smoothing: false,
            smoothing_disabled: false,
            boundary_filter_disabled: false,
        }
    }

    #[test]
    fn test_mpm_candidates_same_dc() {
        let mpm = mpm_candidates(IntraPredMode::DC, IntraPredMode::DC);
        assert_eq!(mpm, [IntraPredMode::PLANAR, IntraPredMode::DC, IntraPredMode::VERTICAL]);
    }

    #[test]
    fn test_mpm_candidates_angular_neighbours() {
        let m = |v| IntraPredMode::from_u8(v).unwrap();
        assert_eq!(mpm_candidates(m(2), m(2)), [m(2), m(33), m(3)]);
        assert_eq!(mpm_candidates(m(34), m(34)), [m(34), m(33), m(3)]);
        assert_eq!(
            mpm_candidates(IntraPredMode::DC, IntraPredMode::PLANAR),
            [IntraPredMode::DC, IntraPredMode::PLANAR, IntraPredMode::VERTICAL]
        );
    }

    #[test]
    fn test_rem_mode_skips_candidates() {
        let cands = [IntraPredMode::PLANAR, IntraPredMode::DC, IntraPredMode::VERTICAL];
        assert_eq!(luma_mode(cands, None, 0).as_u8(), 2);
        assert_eq!(luma_mode(cands, None, 24).as_u8(), 27);
        assert_eq!(luma_mode(cands, Some(2), 0), IntraPredMode::VERTICAL);
    }

    #[test]
    fn test_chroma_mode_derivation() {
        assert_eq!(chroma_mode(4, IntraPredMode::HORIZONTAL, false), IntraPredMode::HORIZONTAL);
        assert_eq!(chroma_mode(1, IntraPredMode::VERTICAL, false), IntraPredMode::ANGULAR_34);
        assert_eq!(chroma_mode(0, IntraPredMode::DC, true), IntraPredMode::PLANAR);
        assert_eq!(chroma_mode(4, IntraPredMode::ANGULAR_34, true).as_u8(), 31);
    }

    #[test]
    fn test_no_neighbours_predict_mid_gray() {
        let plane = SamplePlane::new(16, 16, 0);
        let mut out = [0u16; 64];
        for mode in [0u8, 1, 10, 18, 26, 34] {
            let mode = IntraPredMode::from_u8(mode).unwrap();
            predict_intra(&plane, 0, 0, 3, mode, &params(), |_, _| false, &mut out);
            assert!(out.iter().all(|&s| s == 128), "mode {mode:?}");
        }
    }

    #[test]
    fn test_vertical_copies_top_row() {
        let plane = SamplePlane::new(16, 16, 0);
        for x in 0..16 {
            plane.set(x, 3, 10 * x as u16);
        }
        let avail = |xn: i32, yn: i32| yn == 3 && (0..16).contains(&xn);
        let mut out = [0u16; 16];
        let mut p = params();
        p.boundary_filter_disabled = true;
        predict_intra(&plane, 4, 4, 2, IntraPredMode::VERTICAL, &p, avail, &mut out);
        for row in out.chunks(4) {
            assert_eq!(row, &[40, 50, 60, 70]);
        }
    }

    #[test]
    fn test_dc_edge_filter() {
        let plane = SamplePlane::new(8, 8, 0);
        for i in 0..8 {
            plane.set(i, 0, 100);
            plane.set(0, i, 100);
        }
        let avail = |xn: i32, yn: i32| (xn == 0 || yn == 0) && (0..8).contains(&xn) && (0..8).contains(&yn);
        let mut out = [0u16; 16];
        // block at (1, 1): all neighbours 100, so DC and filtered edges stay 100
        predict_intra(&plane, 1, 1, 2, IntraPredMode::DC, &params(), avail, &mut out);
        assert!(out.iter().all(|&s| s == 100));
    }
}
