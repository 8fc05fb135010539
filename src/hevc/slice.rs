//! Slice segment header, reference lists and shared coding enums
//!
//! Headers arrive fully parsed from the caller; this module only holds the
//! values the reconstruction core consumes.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::picture::{PbMotion, Picture};
use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// Slice type, numbered as in the slice header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceType {
    /// Bi-predictive
    B = 0,
    /// Predictive
    P = 1,
    /// Intra only
    I = 2,
}

impl SliceType {
    /// Whether inter prediction syntax is present
    pub fn is_inter(self) -> bool {
        self != SliceType::I
    }
}

/// Coding unit prediction mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PredMode {
    /// Intra prediction
    #[default]
    Intra = 0,
    /// Inter prediction
    Inter = 1,
    /// Inter prediction, merge without residual
    Skip = 2,
}

impl PredMode {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits {
            1 => PredMode::Inter,
            2 => PredMode::Skip,
            _ => PredMode::Intra,
        }
    }

    /// Inter or skip
    pub fn is_inter(self) -> bool {
        self != PredMode::Intra
    }
}

/// Coding unit partitioning into prediction blocks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartMode {
    /// One block
    #[default]
    Part2Nx2N = 0,
    /// Two horizontal halves
    Part2NxN = 1,
    /// Two vertical halves
    PartNx2N = 2,
    /// Four quarters
    PartNxN = 3,
    /// Top quarter / bottom three quarters
    Part2NxnU = 4,
    /// Top three quarters / bottom quarter
    Part2NxnD = 5,
    /// Left quarter / right three quarters
    PartnLx2N = 6,
    /// Left three quarters / right quarter
    PartnRx2N = 7,
}

impl PartMode {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits {
            1 => PartMode::Part2NxN,
            2 => PartMode::PartNx2N,
            3 => PartMode::PartNxN,
            4 => PartMode::Part2NxnU,
            5 => PartMode::Part2NxnD,
            6 => PartMode::PartnLx2N,
            7 => PartMode::PartnRx2N,
            _ => PartMode::Part2Nx2N,
        }
    }

    /// Prediction blocks (x, y, width, height) relative to a CB of `size`
    pub fn blocks(self, size: u32) -> Vec<(u32, u32, u32, u32)> {
        let h = size / 2;
        let q = size / 4;
        match self {
            PartMode::Part2Nx2N => vec![(0, 0, size, size)],
            PartMode::Part2NxN => vec![(0, 0, size, h), (0, h, size, h)],
            PartMode::PartNx2N => vec![(0, 0, h, size), (h, 0, h, size)],
            PartMode::PartNxN => vec![(0, 0, h, h), (h, 0, h, h), (0, h, h, h), (h, h, h, h)],
            PartMode::Part2NxnU => vec![(0, 0, size, q), (0, q, size, size - q)],
            PartMode::Part2NxnD => vec![(0, 0, size, size - q), (0, size - q, size, q)],
            PartMode::PartnLx2N => vec![(0, 0, q, size), (q, 0, size - q, size)],
            PartMode::PartnRx2N => vec![(0, 0, size - q, size), (size - q, 0, q, size)],
        }
    }
}

/// Intra prediction mode (0 = planar, 1 = DC, 2..=34 angular)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct IntraPredMode(u8);

impl IntraPredMode {
    /// Planar
    pub const PLANAR: Self = Self(0);
    /// DC
    pub const DC: Self = Self(1);
    /// Pure horizontal (angular 10)
    pub const HORIZONTAL: Self = Self(10);
    /// Pure vertical (angular 26)
    pub const VERTICAL: Self = Self(26);
    /// Diagonal substitute used when a chroma mode collides with luma
    pub const ANGULAR_34: Self = Self(34);

    /// Mode from its numeric value
    pub fn from_u8(v: u8) -> Option<Self> {
        (v <= 34).then_some(Self(v))
    }

    /// Numeric value
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Angular mode (2..=34)
    pub fn is_angular(self) -> bool {
        self.0 >= 2
    }
}

/// Explicit weighted prediction entry for one reference and component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeightEntry {
    /// Multiplicative weight (already including `1 << log2_denom`)
    pub weight: i32,
    /// Additive offset in 8-bit units (scaled by the bit depth unless high precision)
    pub offset: i32,
}

/// Derived `pred_weight_table()` values
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    /// luma_log2_weight_denom
    pub luma_log2_denom: u8,
    /// ChromaLog2WeightDenom
    pub chroma_log2_denom: u8,
    /// Luma weights per reference, list 0 and list 1
    pub luma: [Vec<WeightEntry>; 2],
    /// Cb/Cr weights per reference, list 0 and list 1
    pub chroma: [Vec<[WeightEntry; 2]>; 2],
}

/// One reference picture list entry
#[derive(Clone, Debug)]
pub struct RefPicEntry {
    /// Decoded picture, `None` when the reference is missing
    pub picture: Option<Arc<Picture>>,
    /// Picture order count
    pub poc: i32,
    /// Marked as used for long-term reference
    pub long_term: bool,
    /// Layer/view index for multi-layer streams
    pub view_idx: u8,
}

/// Ordered reference picture list
pub type RefPicList = Vec<RefPicEntry>;

/// Extension merge candidate supplied by a multi-layer or 3D layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeExtension {
    /// Inter-view motion candidate (requires the multilayer capability)
    InterView(PbMotion),
    /// Motion inherited from the co-located texture block (requires depth_3d)
    Texture(PbMotion),
}

impl MergeExtension {
    /// Candidate motion
    pub fn motion(&self) -> PbMotion {
        match *self {
            MergeExtension::InterView(m) | MergeExtension::Texture(m) => m,
        }
    }
}

/// Source of extension merge candidates for a prediction block
pub trait MergeExtensionSource: Send + Sync {
    /// Candidates for the luma block at (x, y) of size w x h, best first
    fn candidates(&self, x: u32, y: u32, w: u32, h: u32) -> Vec<MergeExtension>;
}

/// Slice segment header values used during reconstruction
#[derive(Clone, Debug)]
pub struct SliceHeader {
    /// dependent_slice_segment_flag
    pub dependent_slice_segment_flag: bool,
    /// slice_segment_address (raster scan CTB address)
    pub segment_address: u32,
    /// SliceAddrRs: address of the independent segment that starts the slice
    pub slice_address: u32,
    /// slice_type
    pub slice_type: SliceType,
    /// slice_sao_luma_flag
    pub sao_luma: bool,
    /// slice_sao_chroma_flag
    pub sao_chroma: bool,
    /// slice_temporal_mvp_enabled_flag
    pub temporal_mvp_enabled: bool,
    /// num_ref_idx_l0/l1_active_minus1 + 1
    pub num_ref_idx_active: [u8; 2],
    /// mvd_l1_zero_flag
    pub mvd_l1_zero: bool,
    /// cabac_init_flag
    pub cabac_init_flag: bool,
    /// collocated_from_l0_flag
    pub collocated_from_l0: bool,
    /// collocated_ref_idx
    pub collocated_ref_idx: u8,
    /// MaxNumMergeCand (1..=5)
    pub max_num_merge_cand: u8,
    /// SliceQpY
    pub slice_qp_y: i32,
    /// slice_cb_qp_offset
    pub cb_qp_offset: i8,
    /// slice_cr_qp_offset
    pub cr_qp_offset: i8,
    /// cu_chroma_qp_offset_enabled_flag
    pub cu_chroma_qp_offset_enabled: bool,
    /// slice_deblocking_filter_disabled_flag (passed through)
    pub deblocking_filter_disabled: bool,
    /// slice_beta_offset_div2 (passed through)
    pub beta_offset_div2: i8,
    /// slice_tc_offset_div2 (passed through)
    pub tc_offset_div2: i8,
    /// slice_loop_filter_across_slices_enabled_flag (passed through)
    pub loop_filter_across_slices: bool,
    /// Byte sizes of every substream except the last
    /// (entry_point_offset_minus1 + 1, emulation prevention removed)
    pub entry_point_sizes: Vec<u32>,
    /// Explicit weighted prediction tables
    pub pred_weights: Option<PredWeightTable>,
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self {
            dependent_slice_segment_flag: false,
            segment_address: 0,
            slice_address: 0,
            slice_type: SliceType::I,
            sao_luma: false,
            sao_chroma: false,
            temporal_mvp_enabled: false,
            num_ref_idx_active: [0, 0],
            mvd_l1_zero: false,
            cabac_init_flag: false,
            collocated_from_l0: true,
            collocated_ref_idx: 0,
            max_num_merge_cand: 5,
            slice_qp_y: 26,
            cb_qp_offset: 0,
            cr_qp_offset: 0,
            cu_chroma_qp_offset_enabled: false,
            deblocking_filter_disabled: false,
            beta_offset_div2: 0,
            tc_offset_div2: 0,
            loop_filter_across_slices: false,
            entry_point_sizes: Vec::new(),
            pred_weights: None,
        }
    }
}

impl SliceHeader {
    /// Check header values against the reference lists handed in with it
    pub fn validate(&self, ref_lists: &[RefPicList; 2]) -> Result<()> {
        if !(1..=5).contains(&self.max_num_merge_cand) && self.slice_type.is_inter() {
            return Err(invalid(alloc::format!(
                "MaxNumMergeCand {} not in 1..=5",
                self.max_num_merge_cand
            )));
        }
        if !(-64..=51).contains(&self.slice_qp_y) {
            return Err(invalid(alloc::format!("SliceQpY {} out of range", self.slice_qp_y)));
        }
        if self.dependent_slice_segment_flag {
            if self.segment_address <= self.slice_address {
                return Err(invalid("dependent segment does not follow its slice start".into()));
            }
        } else if self.segment_address != self.slice_address {
            return Err(invalid("independent segment must start its slice".into()));
        }
        let lists = match self.slice_type {
            SliceType::I => 0,
            SliceType::P => 1,
            SliceType::B => 2,
        };
        for (l, list) in ref_lists.iter().enumerate().take(lists) {
            let active = self.num_ref_idx_active[l] as usize;
            if active == 0 || active > 16 || list.len() < active {
                return Err(invalid(alloc::format!(
                    "list {l} has {} entries for {active} active references",
                    list.len()
                )));
            }
        }
        if self.temporal_mvp_enabled && self.slice_type.is_inter() {
            let col_list = if self.slice_type == SliceType::B && !self.collocated_from_l0 {
                1
            } else {
                0
            };
            if self.collocated_ref_idx >= self.num_ref_idx_active[col_list] {
                return Err(invalid("collocated_ref_idx beyond the active list".into()));
            }
        }
        if let Some(w) = &self.pred_weights {
            if w.luma_log2_denom > 7 || w.chroma_log2_denom > 7 {
                return Err(invalid("weight denominator above 7".into()));
            }
        }
        Ok(())
    }

    /// Reference list holding the collocated picture
    pub fn collocated_list(&self) -> usize {
        if self.slice_type == SliceType::B && !self.collocated_from_l0 {
            1
        } else {
            0
        }
    }
}

fn invalid(msg: alloc::string::String) -> HevcError {
    HevcError::InvalidParameter {
        kind: "slice header",
        msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(poc: i32) -> RefPicEntry {
        RefPicEntry {
            picture: None,
            poc,
            long_term: false,
            view_idx: 0,
        }
    }

    #[test]
    fn test_part_mode_blocks_cover_cb() {
        for bits in 0..8 {
            let mode = PartMode::from_bits(bits);
            let area: u32 = mode.blocks(32).iter().map(|&(_, _, w, h)| w * h).sum();
            assert_eq!(area, 32 * 32, "{mode:?}");
        }
        assert_eq!(PartMode::Part2NxnU.blocks(16)[1], (0, 4, 16, 12));
        assert_eq!(PartMode::PartnRx2N.blocks(16)[1], (12, 0, 4, 16));
    }

    #[test]
    fn test_validate_rejects_short_lists() {
        let header = SliceHeader {
            slice_type: SliceType::P,
            num_ref_idx_active: [2, 0],
            ..SliceHeader::default()
        };
        let lists = [vec![entry(4)], Vec::new()];
        assert!(header.validate(&lists).is_err());
        let lists = [vec![entry(4), entry(2)], Vec::new()];
        assert!(header.validate(&lists).is_ok());
    }

    #[test]
    fn test_collocated_list_selection() {
        let mut header = SliceHeader {
            slice_type: SliceType::B,
            collocated_from_l0: false,
            ..SliceHeader::default()
        };
        assert_eq!(header.collocated_list(), 1);
        header.slice_type = SliceType::P;
        assert_eq!(header.collocated_list(), 0);
    }

    #[test]
    fn test_intra_mode_range() {
        assert_eq!(IntraPredMode::from_u8(34), Some(IntraPredMode::ANGULAR_34));
        assert_eq!(IntraPredMode::from_u8(35), None);
        assert!(!IntraPredMode::DC.is_angular());
        assert!(IntraPredMode::HORIZONTAL.is_angular());
    }
}
