//! Motion vector prediction (H.265 8.5.3.2)
//!
//! Merge candidate lists (spatial, temporal, combined bi-predictive, zero),
//! AMVP predictors, collocated motion and POC-distance MV scaling.
//!
//! ```text
//!     B2 |    B1 | B0
//!     ---+-------+
//!        |       |
//!        |  PB   |
//!     A1 |       |
//!     ---+-------+
//!     A0
//! ```

use alloc::vec::Vec;

use super::availability::{PbLocation, pb_available};
use super::params::PictureLayout;
use super::picture::{MotionVector, PbMotion, Picture};
use super::progress::PROGRESS_RECONSTRUCTED;
use super::slice::{PartMode, RefPicList, SliceHeader, SliceType};
use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// Number of merge candidates including the extension slots
pub const MAX_MERGE_CANDIDATES: usize = 6;

/// Candidate pairs for combined bi-predictive merge candidates (Table 8-6)
const COMBINED_L0: [usize; 12] = [0, 1, 0, 2, 1, 2, 0, 3, 1, 3, 2, 3];
const COMBINED_L1: [usize; 12] = [1, 0, 2, 0, 2, 1, 3, 0, 3, 1, 3, 2];

/// Scale a motion vector by the ratio of two POC distances
///
/// `td` is the distance spanned by `mv`, `tb` the target distance.
pub fn scale_mv(mv: MotionVector, td: i32, tb: i32) -> MotionVector {
    let td = td.clamp(-128, 127);
    let tb = tb.clamp(-128, 127);
    if td == 0 {
        return mv;
    }
    let tx = (16384 + (td.abs() >> 1)) / td;
    let dsf = ((tb * tx + 32) >> 6).clamp(-4096, 4095);
    let scale = |v: i16| -> i16 {
        let p = dsf * i32::from(v);
        let mag = (p.abs() + 127) >> 8;
        (p.signum() * mag).clamp(-32768, 32767) as i16
    };
    MotionVector::new(scale(mv.x), scale(mv.y))
}

/// Motion prediction for the prediction blocks of one slice segment
pub struct MotionPredictor<'a> {
    pic: &'a Picture,
    layout: &'a PictureLayout,
    header: &'a SliceHeader,
    ref_lists: &'a [RefPicList; 2],
    log2_par_mrg_level: u8,
    no_backward_pred: bool,
}

impl<'a> MotionPredictor<'a> {
    /// Predictor for `pic` decoded with `header` and its reference lists
    pub fn new(
        pic: &'a Picture,
        layout: &'a PictureLayout,
        header: &'a SliceHeader,
        ref_lists: &'a [RefPicList; 2],
        log2_par_mrg_level: u8,
    ) -> Self {
        let poc = pic.poc();
        let no_backward_pred = ref_lists
            .iter()
            .enumerate()
            .flat_map(|(l, list)| list.iter().take(header.num_ref_idx_active[l] as usize))
            .all(|r| r.poc <= poc);
        Self {
            pic,
            layout,
            header,
            ref_lists,
            log2_par_mrg_level,
            no_backward_pred,
        }
    }

    fn ref_poc(&self, list: usize, ref_idx: i8) -> Option<i32> {
        usize::try_from(ref_idx)
            .ok()
            .and_then(|i| self.ref_lists[list].get(i))
            .map(|r| r.poc)
    }

    fn is_long_term(&self, list: usize, ref_idx: i8) -> bool {
        usize::try_from(ref_idx)
            .ok()
            .and_then(|i| self.ref_lists[list].get(i))
            .is_some_and(|r| r.long_term)
    }

    fn neighbour(&self, pb: &PbLocation, xn: i32, yn: i32) -> Option<PbMotion> {
        pb_available(self.pic, self.layout, pb, xn, yn)
            .then(|| self.pic.pb_info(xn as u32, yn as u32).motion)
    }

    /// Merge candidate list (8.5.3.2.2), extension candidates first
    ///
    /// The list holds `max_num_merge_cand` entries plus one per extension
    /// candidate, capped at [`MAX_MERGE_CANDIDATES`].
    pub fn merge_candidates(
        &self,
        pb: &PbLocation,
        part_mode: PartMode,
        extensions: &[PbMotion],
    ) -> Result<Vec<PbMotion>> {
        let base = usize::from(self.header.max_num_merge_cand);
        let ext = extensions.len().min(MAX_MERGE_CANDIDATES - base.min(MAX_MERGE_CANDIDATES));
        let capacity = (base + ext).min(MAX_MERGE_CANDIDATES);

        // with a parallel merge level above 4x4, 8x8 CUs share one list
        let (pb, part_mode) = if self.log2_par_mrg_level > 2 && pb.cb_size == 8 {
            (PbLocation::whole_cb(pb.x_cb, pb.y_cb, pb.cb_size), PartMode::Part2Nx2N)
        } else {
            (*pb, part_mode)
        };

        let mut list: Vec<PbMotion> = Vec::with_capacity(MAX_MERGE_CANDIDATES);
        list.extend_from_slice(&extensions[..ext]);

        let spatial = self.spatial_merge_candidates(&pb, part_mode);
        list.extend(spatial.iter().flatten().copied());
        list.truncate(capacity);

        if list.len() < capacity && self.header.temporal_mvp_enabled {
            let mut col = PbMotion::default();
            if let Some(mv) = self.temporal_mv(&pb, 0, 0)? {
                col.pred_flag[0] = true;
                col.ref_idx[0] = 0;
                col.mv[0] = mv;
            }
            if self.header.slice_type == SliceType::B {
                if let Some(mv) = self.temporal_mv(&pb, 1, 0)? {
                    col.pred_flag[1] = true;
                    col.ref_idx[1] = 0;
                    col.mv[1] = mv;
                }
            }
            if col.pred_flag[0] || col.pred_flag[1] {
                list.push(col);
            }
        }

        if self.header.slice_type == SliceType::B {
            self.add_combined_candidates(&mut list, capacity);
        }
        self.add_zero_candidates(&mut list, capacity);
        Ok(list)
    }

    /// Motion of the merge candidate `merge_idx`, with 8x4 / 4x8
    /// bi-prediction restricted to list 0
    pub fn merge(
        &self,
        pb: &PbLocation,
        part_mode: PartMode,
        merge_idx: u8,
        extensions: &[PbMotion],
    ) -> Result<PbMotion> {
        let list = self.merge_candidates(pb, part_mode, extensions)?;
        let mut m = list
            .get(usize::from(merge_idx))
            .or(list.last())
            .copied()
            .unwrap_or_default();
        if m.is_bi() && pb.width + pb.height == 12 {
            m.pred_flag[1] = false;
            m.ref_idx[1] = -1;
            m.mv[1] = MotionVector::ZERO;
        }
        Ok(m)
    }

    /// A1, B1, B0, A0, B2 with the pairwise pruning of 8.5.3.2.3
    fn spatial_merge_candidates(&self, pb: &PbLocation, part_mode: PartMode) -> [Option<PbMotion>; 5] {
        let (x, y) = (pb.x_pb as i32, pb.y_pb as i32);
        let (w, h) = (pb.width as i32, pb.height as i32);
        let shift = u32::from(self.log2_par_mrg_level);
        let same_region = |xn: i32, yn: i32| x >> shift == xn >> shift && y >> shift == yn >> shift;
        let probe = |xn: i32, yn: i32| {
            if same_region(xn, yn) {
                None
            } else {
                self.neighbour(pb, xn, yn)
            }
        };

        let vertical_second = pb.part_idx == 1
            && matches!(
                part_mode,
                PartMode::PartNx2N | PartMode::PartnLx2N | PartMode::PartnRx2N
            );
        let horizontal_second = pb.part_idx == 1
            && matches!(
                part_mode,
                PartMode::Part2NxN | PartMode::Part2NxnU | PartMode::Part2NxnD
            );

        // pruning compares against the raw neighbour motion, pruned or not
        let a1 = if vertical_second { None } else { probe(x - 1, y + h - 1) };
        let b1_raw = if horizontal_second { None } else { probe(x + w - 1, y - 1) };
        let b1 = b1_raw.filter(|m| a1 != Some(*m));
        let b0 = probe(x + w, y - 1).filter(|m| b1_raw != Some(*m));
        let a0 = probe(x - 1, y + h).filter(|m| a1 != Some(*m));
        let count = [a0, a1, b0, b1].iter().filter(|c| c.is_some()).count();
        let b2 = if count == 4 {
            None
        } else {
            probe(x - 1, y - 1).filter(|m| a1 != Some(*m) && b1_raw != Some(*m))
        };
        [a1, b1, b0, a0, b2]
    }

    fn add_combined_candidates(&self, list: &mut Vec<PbMotion>, capacity: usize) {
        let num_orig = list.len();
        if num_orig <= 1 || num_orig >= capacity {
            return;
        }
        for comb_idx in 0..num_orig * (num_orig - 1) {
            if list.len() >= capacity || comb_idx >= COMBINED_L0.len() {
                break;
            }
            let l0 = list[COMBINED_L0[comb_idx]];
            let l1 = list[COMBINED_L1[comb_idx]];
            if !l0.pred_flag[0] || !l1.pred_flag[1] {
                continue;
            }
            let same_pic = self.ref_poc(0, l0.ref_idx[0]) == self.ref_poc(1, l1.ref_idx[1]);
            if !same_pic || l0.mv[0] != l1.mv[1] {
                list.push(PbMotion::bi([l0.ref_idx[0], l1.ref_idx[1]], [l0.mv[0], l1.mv[1]]));
            }
        }
    }

    fn add_zero_candidates(&self, list: &mut Vec<PbMotion>, capacity: usize) {
        let active = self.header.num_ref_idx_active;
        let num_ref = if self.header.slice_type == SliceType::P {
            active[0]
        } else {
            active[0].min(active[1])
        };
        let mut zero_idx = 0u8;
        while list.len() < capacity {
            let r = if zero_idx < num_ref { zero_idx as i8 } else { 0 };
            list.push(if self.header.slice_type == SliceType::P {
                PbMotion::uni(0, r, MotionVector::ZERO)
            } else {
                PbMotion::bi([r, r], [MotionVector::ZERO; 2])
            });
            zero_idx = zero_idx.saturating_add(1);
        }
    }

    /// Motion vector predictor `mvp_flag` for list `list` and `ref_idx` (8.5.3.2.6)
    pub fn mvp(&self, pb: &PbLocation, list: usize, ref_idx: i8, mvp_flag: bool) -> Result<MotionVector> {
        let (x, y) = (pb.x_pb as i32, pb.y_pb as i32);
        let (w, h) = (pb.width as i32, pb.height as i32);
        let target_poc = self.ref_poc(list, ref_idx);
        let target_lt = self.is_long_term(list, ref_idx);
        let cur_poc = self.pic.poc();
        let other = 1 - list;

        // same reference picture in either list, unscaled
        let direct = |m: &PbMotion| -> Option<MotionVector> {
            [list, other]
                .into_iter()
                .find(|&l| m.pred_flag[l] && self.ref_poc(l, m.ref_idx[l]) == target_poc)
                .map(|l| m.mv[l])
        };
        // any reference of the same long-term class, scaled when short-term
        let scaled = |m: &PbMotion| -> Option<MotionVector> {
            let l = [list, other]
                .into_iter()
                .find(|&l| m.pred_flag[l] && self.is_long_term(l, m.ref_idx[l]) == target_lt)?;
            let mv = m.mv[l];
            match (self.ref_poc(l, m.ref_idx[l]), target_poc) {
                (Some(nb_poc), Some(t_poc)) if !target_lt && nb_poc != t_poc => {
                    Some(scale_mv(mv, cur_poc - nb_poc, cur_poc - t_poc))
                }
                _ => Some(mv),
            }
        };

        let a = [
            self.neighbour(pb, x - 1, y + h),
            self.neighbour(pb, x - 1, y + h - 1),
        ];
        let is_scaled = a.iter().any(Option::is_some);
        let mut mv_a = a.iter().flatten().find_map(direct);
        if mv_a.is_none() {
            mv_a = a.iter().flatten().find_map(scaled);
        }

        let b = [
            self.neighbour(pb, x + w, y - 1),
            self.neighbour(pb, x + w - 1, y - 1),
            self.neighbour(pb, x - 1, y - 1),
        ];
        let mut mv_b = b.iter().flatten().find_map(direct);
        if !is_scaled {
            if mv_a.is_none() {
                mv_a = mv_b;
            }
            mv_b = b.iter().flatten().find_map(scaled);
        }

        let mut cands: Vec<MotionVector> = Vec::with_capacity(3);
        cands.extend(mv_a);
        if let Some(b) = mv_b {
            if mv_a != Some(b) {
                cands.push(b);
            }
        }
        if cands.len() < 2 && self.header.temporal_mvp_enabled {
            cands.extend(self.temporal_mv(pb, list, ref_idx)?);
        }
        cands.resize(2, MotionVector::ZERO);
        Ok(cands[usize::from(mvp_flag)])
    }

    /// Temporal luma motion vector prediction (8.5.3.2.8)
    fn temporal_mv(&self, pb: &PbLocation, list: usize, ref_idx: i8) -> Result<Option<MotionVector>> {
        let col_list = self.header.collocated_list();
        let Some(col_pic) = self.ref_lists[col_list]
            .get(usize::from(self.header.collocated_ref_idx))
            .and_then(|r| r.picture.as_deref())
        else {
            return Ok(None);
        };
        if col_pic.width() != self.pic.width()
            || col_pic.height() != self.pic.height()
            || col_pic.log2_ctb_size() != self.pic.log2_ctb_size()
        {
            return Ok(None);
        }
        if core::ptr::eq(col_pic, self.pic) {
            return Err(HevcError::InvalidBitstream("collocated picture is the current picture"));
        }

        let x_br = pb.x_pb + pb.width;
        let y_br = pb.y_pb + pb.height;
        let log2_ctb = self.pic.log2_ctb_size();
        if pb.y_pb >> log2_ctb == y_br >> log2_ctb
            && y_br < self.pic.height()
            && x_br < self.pic.width()
        {
            let found = self.collocated_mv(col_pic, (x_br >> 4) << 4, (y_br >> 4) << 4, list, ref_idx)?;
            if found.is_some() {
                return Ok(found);
            }
        }
        let x_ctr = pb.x_pb + (pb.width >> 1);
        let y_ctr = pb.y_pb + (pb.height >> 1);
        self.collocated_mv(col_pic, (x_ctr >> 4) << 4, (y_ctr >> 4) << 4, list, ref_idx)
    }

    /// Collocated motion vectors (8.5.3.2.9), once the collocated CTU is reconstructed
    fn collocated_mv(
        &self,
        col_pic: &Picture,
        x: u32,
        y: u32,
        list: usize,
        ref_idx: i8,
    ) -> Result<Option<MotionVector>> {
        let log2_ctb = col_pic.log2_ctb_size();
        let ctb_rs = (y >> log2_ctb) * col_pic.width_in_ctbs() + (x >> log2_ctb);
        col_pic.progress().wait_for(ctb_rs, PROGRESS_RECONSTRUCTED)?;
        Ok(self.collocated_motion(col_pic, x, y, list, ref_idx))
    }

    fn collocated_motion(
        &self,
        col_pic: &Picture,
        x: u32,
        y: u32,
        list: usize,
        ref_idx: i8,
    ) -> Option<MotionVector> {
        let ctu = col_pic.ctu_info_at(x, y);
        if !ctu.decoded {
            return None;
        }
        let col = col_pic.pb_info(x, y).motion;
        let list_col = match col.pred_flag {
            [false, false] => return None,
            [false, true] => 1,
            [true, false] => 0,
            [true, true] => {
                if self.no_backward_pred {
                    list
                } else {
                    usize::from(self.header.collocated_from_l0)
                }
            }
        };

        let refs = col_pic.slice_ref_info(ctu.slice_index)?;
        let col_ref = usize::try_from(col.ref_idx[list_col]).ok()?;
        let col_ref_poc = *refs.ref_poc[list_col].get(col_ref)?;
        let col_lt = refs.long_term[list_col].get(col_ref).copied().unwrap_or(false);
        let cur_lt = self.is_long_term(list, ref_idx);
        if col_lt != cur_lt {
            return None;
        }

        let mv = col.mv[list_col];
        let col_diff = col_pic.poc() - col_ref_poc;
        let cur_diff = self.pic.poc() - self.ref_poc(list, ref_idx)?;
        if cur_lt || col_diff == cur_diff {
            Some(mv)
        } else {
            Some(scale_mv(mv, col_diff, cur_diff))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hevc::params::{Pps, Sps};
    use crate::hevc::picture::{CtuInfo, CuInfo, PbInfo, SliceRefInfo};
    use crate::hevc::slice::{PredMode, RefPicEntry};
    use alloc::sync::Arc;

    fn entry(poc: i32) -> RefPicEntry {
        RefPicEntry {
            picture: None,
            poc,
            long_term: false,
            view_idx: 0,
        }
    }

    struct Fixture {
        pic: Picture,
        layout: PictureLayout,
        header: SliceHeader,
        lists: [RefPicList; 2],
    }

    fn fixture(slice_type: SliceType) -> Fixture {
        let sps = Sps::default();
        let layout = PictureLayout::new(&sps, &Pps::default()).unwrap();
        let pic = Picture::new(&sps, 8);
        pic.set_ctu_info(0, CtuInfo { slice_addr: 0, ..CtuInfo::default() });
        let header = SliceHeader {
            slice_type,
            num_ref_idx_active: [2, 2],
            max_num_merge_cand: 5,
            ..SliceHeader::default()
        };
        Fixture {
            pic,
            layout,
            header,
            lists: [vec![entry(4), entry(0)], vec![entry(12), entry(16)]],
        }
    }

    fn put_inter(pic: &Picture, x: u32, y: u32, w: u32, h: u32, motion: PbMotion) {
        let cu = CuInfo {
            pred_mode: PredMode::Inter,
            ..CuInfo::default()
        };
        pic.cu_grid().set_rect(x, y, w, h, cu);
        pic.pb_grid().set_rect(x, y, w, h, PbInfo { motion, flags: 0 });
    }

    #[test]
    fn test_scale_mv() {
        let mv = MotionVector::new(64, -32);
        assert_eq!(scale_mv(mv, 4, 4), mv);
        assert_eq!(scale_mv(mv, 4, 8), MotionVector::new(128, -64));
        assert_eq!(scale_mv(mv, 4, -4), MotionVector::new(-64, 32));
        assert_eq!(scale_mv(MotionVector::new(64, 1), 8, 4), MotionVector::new(32, 0));
    }

    #[test]
    fn test_zero_candidates_only() {
        let f = fixture(SliceType::P);
        let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
        let pb = PbLocation::whole_cb(0, 0, 16);
        let list = mp.merge_candidates(&pb, PartMode::Part2Nx2N, &[]).unwrap();
        assert_eq!(list.len(), 5);
        assert_eq!(list[0], PbMotion::uni(0, 0, MotionVector::ZERO));
        assert_eq!(list[1], PbMotion::uni(0, 1, MotionVector::ZERO));
        assert_eq!(list[4], PbMotion::uni(0, 0, MotionVector::ZERO));
    }

    #[test]
    fn test_spatial_pruning_and_determinism() {
        let f = fixture(SliceType::P);
        let left = PbMotion::uni(0, 0, MotionVector::new(4, 4));
        let above = PbMotion::uni(0, 1, MotionVector::new(-8, 0));
        put_inter(&f.pic, 0, 16, 16, 16, left);
        put_inter(&f.pic, 16, 0, 32, 16, above);
        put_inter(&f.pic, 0, 0, 16, 16, left);
        let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
        let pb = PbLocation::whole_cb(16, 16, 16);
        let list = mp.merge_candidates(&pb, PartMode::Part2Nx2N, &[]).unwrap();
        // A1 = left, B1 = above, B0 = above (pruned vs B1), A0 unavailable,
        // B2 = left (pruned vs A1)
        assert_eq!(list[0], left);
        assert_eq!(list[1], above);
        assert_eq!(list[2], PbMotion::uni(0, 0, MotionVector::ZERO));
        assert_eq!(list, mp.merge_candidates(&pb, PartMode::Part2Nx2N, &[]).unwrap());
    }

    #[test]
    fn test_extension_candidates_come_first() {
        let f = fixture(SliceType::P);
        let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
        let ext = PbMotion::uni(0, 1, MotionVector::new(3, 3));
        let pb = PbLocation::whole_cb(0, 0, 16);
        let list = mp.merge_candidates(&pb, PartMode::Part2Nx2N, &[ext, ext, ext]).unwrap();
        assert_eq!(list.len(), MAX_MERGE_CANDIDATES);
        assert_eq!(list[0], ext);
        assert_eq!(list[1], PbMotion::uni(0, 0, MotionVector::ZERO));
    }

    #[test]
    fn test_combined_bi_candidates() {
        let f = fixture(SliceType::B);
        let a = PbMotion::uni(0, 0, MotionVector::new(4, 0));
        let b = PbMotion::uni(1, 0, MotionVector::new(0, 4));
        put_inter(&f.pic, 0, 16, 16, 16, a);
        put_inter(&f.pic, 16, 0, 16, 16, b);
        let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
        let pb = PbLocation::whole_cb(16, 16, 16);
        let list = mp.merge_candidates(&pb, PartMode::Part2Nx2N, &[]).unwrap();
        assert_eq!(list[0], a);
        assert_eq!(list[1], b);
        assert_eq!(list[2], PbMotion::bi([0, 0], [MotionVector::new(4, 0), MotionVector::new(0, 4)]));
    }

    #[test]
    fn test_small_pb_bi_is_restricted() {
        let f = fixture(SliceType::B);
        let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
        let pb = PbLocation {
            x_cb: 0,
            y_cb: 0,
            cb_size: 8,
            x_pb: 0,
            y_pb: 0,
            width: 8,
            height: 4,
            part_idx: 0,
        };
        let m = mp.merge(&pb, PartMode::Part2NxN, 0, &[]).unwrap();
        assert!(m.pred_flag[0]);
        assert!(!m.pred_flag[1]);
    }

    #[test]
    fn test_amvp_scales_left_neighbour() {
        let f = fixture(SliceType::P);
        // neighbour points 4 pictures back (ref 0, POC 4), target is ref 1 (POC 0)
        put_inter(&f.pic, 0, 0, 16, 32, PbMotion::uni(0, 0, MotionVector::new(8, -4)));
        let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
        let pb = PbLocation::whole_cb(16, 0, 16);
        assert_eq!(mp.mvp(&pb, 0, 1, false).unwrap(), MotionVector::new(16, -8));
        assert_eq!(mp.mvp(&pb, 0, 0, false).unwrap(), MotionVector::new(8, -4));
        assert_eq!(mp.mvp(&pb, 0, 0, true).unwrap(), MotionVector::ZERO);
    }

    /// Collocated picture (POC 4) whose only motion is uni L0 towards POC 0
    fn collocated(sps: &Sps) -> Arc<Picture> {
        let col = Arc::new(Picture::new(sps, 4));
        let slice_index = col.add_slice(SliceRefInfo {
            ref_poc: [vec![0], Vec::new()],
            long_term: [vec![false], Vec::new()],
        });
        for rs in 0..col.progress().len() as u32 {
            col.set_ctu_info(
                rs,
                CtuInfo {
                    slice_addr: 0,
                    slice_index,
                    decoded: true,
                    ..CtuInfo::default()
                },
            );
        }
        put_inter(&col, 16, 16, 16, 16, PbMotion::uni(0, 0, MotionVector::new(12, 6)));
        col
    }

    #[test]
    fn test_temporal_candidate_waits_for_collocated_ctu() {
        let mut f = fixture(SliceType::P);
        let col = collocated(&Sps::default());
        f.lists[0][0].picture = Some(col.clone());
        f.header.temporal_mvp_enabled = true;
        let pb = PbLocation::whole_cb(0, 0, 16);

        std::thread::scope(|s| {
            let lookup = s.spawn(|| {
                let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
                mp.mvp(&pb, 0, 0, false)
            });
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(!lookup.is_finished());
            col.progress().signal_all(PROGRESS_RECONSTRUCTED);
            assert_eq!(lookup.join().unwrap().unwrap(), MotionVector::new(12, 6));
        });
    }

    #[test]
    fn test_abandoned_collocated_picture_fails_prediction() {
        let mut f = fixture(SliceType::P);
        let col = collocated(&Sps::default());
        col.progress().poison();
        f.lists[0][0].picture = Some(col);
        f.header.temporal_mvp_enabled = true;
        let mp = MotionPredictor::new(&f.pic, &f.layout, &f.header, &f.lists, 2);
        let pb = PbLocation::whole_cb(0, 0, 16);
        assert!(matches!(mp.mvp(&pb, 0, 0, false), Err(HevcError::Poisoned)));
        assert!(matches!(
            mp.merge(&pb, PartMode::Part2Nx2N, 0, &[]),
            Err(HevcError::Poisoned)
        ));
    }
}
