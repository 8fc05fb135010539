//! Motion compensation (H.265 8.5.3.3)
//!
//! Fractional sample interpolation (8-tap luma, 4-tap chroma) into 14-bit
//! intermediates, followed by default or explicit weighted sample
//! prediction. Predicted samples are written straight into the current
//! picture; the residual is added on top by the coding-tree decoder.
//!
//! A missing reference, or one with different geometry, predicts mid-gray
//! and marks the picture as derived from a faulty reference.

use super::grid::SamplePlane;
use super::picture::{Integrity, MotionVector, PbMotion, Picture};
use super::progress::PROGRESS_RECONSTRUCTED;
use super::slice::{PredWeightTable, RefPicList, WeightEntry};
use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// Largest prediction block side
const MAX_PB_SIZE: usize = 64;

/// Luma interpolation filter taps per quarter-sample phase
static LUMA_FILTER: [[i32; 8]; 4] = [
    [0, 0, 0, 64, 0, 0, 0, 0],
    [-1, 4, -10, 58, 17, -5, 1, 0],
    [-1, 4, -11, 40, 40, -11, 4, -1],
    [0, 1, -5, 17, 58, -10, 4, -1],
];

/// Chroma interpolation filter taps per eighth-sample phase
static CHROMA_FILTER: [[i32; 4]; 8] = [
    [0, 64, 0, 0],
    [-2, 58, 10, -2],
    [-4, 54, 16, -2],
    [-6, 46, 28, -4],
    [-4, 36, 36, -4],
    [-4, 28, 46, -6],
    [-2, 16, 54, -4],
    [-2, 10, 58, -2],
];

/// Separable interpolation of one block into 14-bit intermediates
///
/// `taps[frac]` holds the filter for each phase; the filter for integer
/// position `x` covers `x - (N/2 - 1) ..= x + N/2`.
#[allow(clippy::too_many_arguments)]
fn interpolate<const N: usize>(
    plane: &SamplePlane,
    x_int: i32,
    y_int: i32,
    x_frac: usize,
    y_frac: usize,
    w: usize,
    h: usize,
    bit_depth: u8,
    taps: &[[i32; N]],
    out: &mut [i16],
) {
    let shift1 = (i32::from(bit_depth) - 8).min(4);
    let shift3 = (14 - i32::from(bit_depth)).max(2);
    let half = N as i32 / 2 - 1;
    let sample = |x: i32, y: i32| i32::from(plane.get_clamped(x, y));

    match (x_frac, y_frac) {
        (0, 0) => {
            for y in 0..h {
                for x in 0..w {
                    out[y * w + x] = (sample(x_int + x as i32, y_int + y as i32) << shift3) as i16;
                }
            }
        }
        (xf, 0) => {
            let f = &taps[xf];
            for y in 0..h {
                for x in 0..w {
                    let sum: i32 = (0..N)
                        .map(|i| f[i] * sample(x_int + x as i32 + i as i32 - half, y_int + y as i32))
                        .sum();
                    out[y * w + x] = (sum >> shift1) as i16;
                }
            }
        }
        (0, yf) => {
            let f = &taps[yf];
            for y in 0..h {
                for x in 0..w {
                    let sum: i32 = (0..N)
                        .map(|i| f[i] * sample(x_int + x as i32, y_int + y as i32 + i as i32 - half))
                        .sum();
                    out[y * w + x] = (sum >> shift1) as i16;
                }
            }
        }
        (xf, yf) => {
            let fx = &taps[xf];
            let fy = &taps[yf];
            let rows = h + N - 1;
            let mut tmp = [0i32; MAX_PB_SIZE * (MAX_PB_SIZE + 7)];
            for r in 0..rows {
                let sy = y_int + r as i32 - half;
                for x in 0..w {
                    let sum: i32 = (0..N)
                        .map(|i| fx[i] * sample(x_int + x as i32 + i as i32 - half, sy))
                        .sum();
                    tmp[r * w + x] = sum >> shift1;
                }
            }
            for y in 0..h {
                for x in 0..w {
                    let sum: i32 = (0..N).map(|i| fy[i] * tmp[(y + i) * w + x]).sum();
                    out[y * w + x] = (sum >> 6) as i16;
                }
            }
        }
    }
}

/// Motion-compensated prediction for the prediction blocks of one slice
pub struct InterPredictor<'a> {
    pic: &'a Picture,
    ref_lists: &'a [RefPicList; 2],
    weights: Option<&'a PredWeightTable>,
    high_precision_offsets: bool,
}

impl<'a> InterPredictor<'a> {
    /// Predictor writing into `pic`; `weights` is `Some` when explicit
    /// weighted prediction applies to the slice
    pub fn new(
        pic: &'a Picture,
        ref_lists: &'a [RefPicList; 2],
        weights: Option<&'a PredWeightTable>,
        high_precision_offsets: bool,
    ) -> Self {
        Self {
            pic,
            ref_lists,
            weights,
            high_precision_offsets,
        }
    }

    /// Reference picture for `list`/`ref_idx`, after waiting until the
    /// CTUs covering the referenced area are reconstructed
    fn reference(&self, list: usize, ref_idx: i8, area: (i32, i32, i32, i32)) -> Result<Option<&'a Picture>> {
        let entry = usize::try_from(ref_idx)
            .ok()
            .and_then(|i| self.ref_lists[list].get(i));
        let Some(pic) = entry.and_then(|e| e.picture.as_deref()) else {
            self.pic.degrade(Integrity::DerivedFromFaultyReference);
            return Ok(None);
        };
        if pic.width() != self.pic.width()
            || pic.height() != self.pic.height()
            || pic.chroma_format() != self.pic.chroma_format()
            || pic.bit_depth(0) != self.pic.bit_depth(0)
            || pic.bit_depth(1) != self.pic.bit_depth(1)
        {
            self.pic.degrade(Integrity::DerivedFromFaultyReference);
            return Ok(None);
        }
        if core::ptr::eq(pic, self.pic) {
            return Err(HevcError::InvalidBitstream("picture references itself"));
        }

        let log2 = pic.log2_ctb_size();
        let max_x = pic.width() as i32 - 1;
        let max_y = pic.height() as i32 - 1;
        let (x0, y0, x1, y1) = area;
        let cx0 = (x0.clamp(0, max_x) >> log2) as u32;
        let cx1 = (x1.clamp(0, max_x) >> log2) as u32;
        let cy0 = (y0.clamp(0, max_y) >> log2) as u32;
        let cy1 = (y1.clamp(0, max_y) >> log2) as u32;
        let w = pic.width_in_ctbs();
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                pic.progress().wait_for(cy * w + cx, PROGRESS_RECONSTRUCTED)?;
            }
        }
        if pic.is_faulty() {
            self.pic.degrade(Integrity::DerivedFromFaultyReference);
        }
        Ok(Some(pic))
    }

    /// Predict the luma block (x, y, w, h) and its chroma blocks from `motion`
    pub fn predict(&self, x: u32, y: u32, w: u32, h: u32, motion: &PbMotion) -> Result<()> {
        let chroma = self.pic.chroma_format();
        let (sub_w, sub_h) = match chroma {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        };
        let components = if chroma == 0 { 1 } else { 3 };

        let mut pred = [[0i16; MAX_PB_SIZE * MAX_PB_SIZE]; 2];
        for c in 0..components {
            let (cx, cy, cw, ch) = if c == 0 {
                (x, y, w as usize, h as usize)
            } else {
                (x / sub_w, y / sub_h, (w / sub_w) as usize, (h / sub_h) as usize)
            };
            let bit_depth = self.pic.bit_depth(c);

            for l in 0..2 {
                if !motion.pred_flag[l] {
                    continue;
                }
                let mv = motion.mv[l];
                let (x_int, y_int, x_frac, y_frac) = if c == 0 {
                    (
                        x as i32 + (i32::from(mv.x) >> 2),
                        y as i32 + (i32::from(mv.y) >> 2),
                        (mv.x & 3) as usize,
                        (mv.y & 3) as usize,
                    )
                } else {
                    let (mvx, mvy) = chroma_mv(mv, sub_w, sub_h);
                    (
                        cx as i32 + (mvx >> 3),
                        cy as i32 + (mvy >> 3),
                        (mvx & 7) as usize,
                        (mvy & 7) as usize,
                    )
                };
                let area = (
                    (x as i32 + (i32::from(mv.x) >> 2)) - 4,
                    (y as i32 + (i32::from(mv.y) >> 2)) - 4,
                    (x + w) as i32 + (i32::from(mv.x) >> 2) + 4,
                    (y + h) as i32 + (i32::from(mv.y) >> 2) + 4,
                );
                match self.reference(l, motion.ref_idx[l], area)? {
                    Some(r) if c == 0 => interpolate(
                        r.plane(0), x_int, y_int, x_frac, y_frac, cw, ch, bit_depth, &LUMA_FILTER,
                        &mut pred[l],
                    ),
                    Some(r) => interpolate(
                        r.plane(c), x_int, y_int, x_frac, y_frac, cw, ch, bit_depth, &CHROMA_FILTER,
                        &mut pred[l],
                    ),
                    None => {
                        let shift3 = (14 - i32::from(bit_depth)).max(2);
                        let mid = ((1i32 << (bit_depth - 1)) << shift3) as i16;
                        pred[l][..cw * ch].fill(mid);
                    }
                }
            }

            self.weighted_store(c, cx, cy, cw, ch, motion, &pred);
        }
        Ok(())
    }

    /// Weighted sample prediction and store into the picture (8.5.3.3.4)
    #[allow(clippy::too_many_arguments)]
    fn weighted_store(
        &self,
        c: usize,
        x: u32,
        y: u32,
        w: usize,
        h: usize,
        motion: &PbMotion,
        pred: &[[i16; MAX_PB_SIZE * MAX_PB_SIZE]; 2],
    ) {
        let plane = self.pic.plane(c);
        let bit_depth = i32::from(self.pic.bit_depth(c));
        let max_val = (1i32 << bit_depth) - 1;
        let shift1 = 14 - bit_depth;
        let store = |i: usize, v: i32| {
            plane.set(x + (i % w) as u32, y + (i / w) as u32, v.clamp(0, max_val) as u16);
        };

        let explicit = self.weights.map(|t| {
            let denom = if c == 0 { t.luma_log2_denom } else { t.chroma_log2_denom };
            let entry = |l: usize| -> WeightEntry {
                let idx = usize::try_from(motion.ref_idx[l]).unwrap_or(0);
                let fallback = WeightEntry {
                    weight: 1 << denom,
                    offset: 0,
                };
                if c == 0 {
                    t.luma[l].get(idx).copied().unwrap_or(fallback)
                } else {
                    t.chroma[l].get(idx).map_or(fallback, |e| e[c - 1])
                }
            };
            (i32::from(denom), [entry(0), entry(1)])
        });

        let n = w * h;
        match (motion.pred_flag, explicit) {
            ([true, true], None) => {
                let shift2 = 15 - bit_depth;
                let offset2 = 1 << (shift2 - 1);
                for i in 0..n {
                    store(i, (i32::from(pred[0][i]) + i32::from(pred[1][i]) + offset2) >> shift2);
                }
            }
            ([true, true], Some((denom, e))) => {
                let log2_wd = denom + shift1;
                let o0 = self.scale_offset(e[0].offset, bit_depth);
                let o1 = self.scale_offset(e[1].offset, bit_depth);
                for i in 0..n {
                    let v = (i32::from(pred[0][i]) * e[0].weight
                        + i32::from(pred[1][i]) * e[1].weight
                        + ((o0 + o1 + 1) << log2_wd))
                        >> (log2_wd + 1);
                    store(i, v);
                }
            }
            (flags, None) => {
                let l = usize::from(!flags[0]);
                let offset1 = if shift1 > 0 { 1 << (shift1 - 1) } else { 0 };
                for i in 0..n {
                    store(i, (i32::from(pred[l][i]) + offset1) >> shift1);
                }
            }
            (flags, Some((denom, e))) => {
                let l = usize::from(!flags[0]);
                let log2_wd = denom + shift1;
                let o = self.scale_offset(e[l].offset, bit_depth);
                for i in 0..n {
                    let p = i32::from(pred[l][i]) * e[l].weight;
                    let v = if log2_wd >= 1 {
                        ((p + (1 << (log2_wd - 1))) >> log2_wd) + o
                    } else {
                        p + o
                    };
                    store(i, v);
                }
            }
        }
    }

    fn scale_offset(&self, offset: i32, bit_depth: i32) -> i32 {
        if self.high_precision_offsets {
            offset
        } else {
            offset << (bit_depth - 8)
        }
    }
}

/// Chroma motion vector in eighth-sample units of the chroma plane
fn chroma_mv(mv: MotionVector, sub_w: u32, sub_h: u32) -> (i32, i32) {
    (
        i32::from(mv.x) * 2 / sub_w as i32,
        i32::from(mv.y) * 2 / sub_h as i32,
    )
}
