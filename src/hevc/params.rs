//! Sequence and picture configuration (SPS/PPS) and derived picture layout
//!
//! Parameter sets are parsed by the caller; here they are plain structs
//! with helpers for derived values, validation, and the tile / z-scan
//! address tables every slice decode consults.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::tables::up_right_diagonal;
use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// Optional coding tool families a stream may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Multi-layer / multi-view extensions (inter-view merge candidates)
    pub multilayer: bool,
    /// 3D extensions (depth coding, texture merge candidates)
    pub depth_3d: bool,
    /// Screen content coding extensions (palette mode)
    pub screen_content: bool,
}

/// Sequence Parameter Set
#[derive(Debug, Clone)]
pub struct Sps {
    /// Chroma format IDC (0=monochrome, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u8,
    /// Separate color plane flag
    pub separate_colour_plane_flag: bool,
    /// Picture width in luma samples
    pub pic_width_in_luma_samples: u32,
    /// Picture height in luma samples
    pub pic_height_in_luma_samples: u32,
    /// Bit depth luma minus 8
    pub bit_depth_luma_minus8: u8,
    /// Bit depth chroma minus 8
    pub bit_depth_chroma_minus8: u8,
    /// Log2 min luma coding block size minus 3
    pub log2_min_luma_coding_block_size_minus3: u8,
    /// Log2 diff max min luma coding block size
    pub log2_diff_max_min_luma_coding_block_size: u8,
    /// Log2 min luma transform block size minus 2
    pub log2_min_luma_transform_block_size_minus2: u8,
    /// Log2 diff max min luma transform block size
    pub log2_diff_max_min_luma_transform_block_size: u8,
    /// Max transform hierarchy depth inter
    pub max_transform_hierarchy_depth_inter: u8,
    /// Max transform hierarchy depth intra
    pub max_transform_hierarchy_depth_intra: u8,
    /// Scaling list enabled flag
    pub scaling_list_enabled_flag: bool,
    /// Explicit SPS scaling lists (`None` selects the default lists)
    pub scaling_list: Option<ScalingList>,
    /// AMP enabled flag
    pub amp_enabled_flag: bool,
    /// SAO enabled flag
    pub sample_adaptive_offset_enabled_flag: bool,
    /// PCM parameters (if enabled)
    pub pcm_params: Option<PcmParams>,
    /// Temporal MVP enabled flag
    pub sps_temporal_mvp_enabled_flag: bool,
    /// Strong intra smoothing enabled flag
    pub strong_intra_smoothing_enabled_flag: bool,
    /// Range extension flags
    pub range_extension: SpsRangeExtension,
    /// palette_mode_enabled_flag (screen content extension)
    pub palette_mode_enabled_flag: bool,
    /// Extension families the stream was negotiated with
    pub capabilities: Capabilities,
}

/// SPS range extension flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpsRangeExtension {
    /// transform_skip_rotation_enabled_flag
    pub transform_skip_rotation_enabled_flag: bool,
    /// transform_skip_context_enabled_flag
    pub transform_skip_context_enabled_flag: bool,
    /// implicit_rdpcm_enabled_flag
    pub implicit_rdpcm_enabled_flag: bool,
    /// explicit_rdpcm_enabled_flag
    pub explicit_rdpcm_enabled_flag: bool,
    /// extended_precision_processing_flag
    pub extended_precision_processing_flag: bool,
    /// intra_smoothing_disabled_flag
    pub intra_smoothing_disabled_flag: bool,
    /// high_precision_offsets_enabled_flag
    pub high_precision_offsets_enabled_flag: bool,
    /// persistent_rice_adaptation_enabled_flag
    pub persistent_rice_adaptation_enabled_flag: bool,
    /// cabac_bypass_alignment_enabled_flag
    pub cabac_bypass_alignment_enabled_flag: bool,
}

impl Default for Sps {
    /// 64x64 8-bit 4:2:0, 64x64 CTBs, 8x8 minimum CBs, 4..32 transforms
    fn default() -> Self {
        Self {
            chroma_format_idc: 1,
            separate_colour_plane_flag: false,
            pic_width_in_luma_samples: 64,
            pic_height_in_luma_samples: 64,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 3,
            log2_min_luma_transform_block_size_minus2: 0,
            log2_diff_max_min_luma_transform_block_size: 3,
            max_transform_hierarchy_depth_inter: 1,
            max_transform_hierarchy_depth_intra: 1,
            scaling_list_enabled_flag: false,
            scaling_list: None,
            amp_enabled_flag: true,
            sample_adaptive_offset_enabled_flag: false,
            pcm_params: None,
            sps_temporal_mvp_enabled_flag: true,
            strong_intra_smoothing_enabled_flag: false,
            range_extension: SpsRangeExtension::default(),
            palette_mode_enabled_flag: false,
            capabilities: Capabilities::default(),
        }
    }
}

impl Sps {
    /// Get ChromaArrayType
    pub fn chroma_array_type(&self) -> u8 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    /// Chroma subsampling (SubWidthC, SubHeightC)
    pub fn chroma_subsampling(&self) -> (u32, u32) {
        match self.chroma_array_type() {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        }
    }

    /// Get bit depth for luma
    pub fn bit_depth_y(&self) -> u8 {
        8 + self.bit_depth_luma_minus8
    }

    /// Get bit depth for chroma
    pub fn bit_depth_c(&self) -> u8 {
        8 + self.bit_depth_chroma_minus8
    }

    /// Get log2 of min coding block size
    pub fn log2_min_cb_size(&self) -> u8 {
        self.log2_min_luma_coding_block_size_minus3 + 3
    }

    /// Get log2 of max coding block size (CTB size)
    pub fn log2_ctb_size(&self) -> u8 {
        self.log2_min_cb_size() + self.log2_diff_max_min_luma_coding_block_size
    }

    /// Get CTB size in samples
    pub fn ctb_size(&self) -> u32 {
        1 << self.log2_ctb_size()
    }

    /// Get picture width in CTBs
    pub fn pic_width_in_ctbs(&self) -> u32 {
        self.pic_width_in_luma_samples.div_ceil(self.ctb_size())
    }

    /// Get picture height in CTBs
    pub fn pic_height_in_ctbs(&self) -> u32 {
        self.pic_height_in_luma_samples.div_ceil(self.ctb_size())
    }

    /// Get log2 of min transform block size
    pub fn log2_min_tb_size(&self) -> u8 {
        self.log2_min_luma_transform_block_size_minus2 + 2
    }

    /// Get log2 of max transform block size
    pub fn log2_max_tb_size(&self) -> u8 {
        self.log2_min_tb_size() + self.log2_diff_max_min_luma_transform_block_size
    }

    /// Check that the configuration is decodable
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(HevcError::InvalidParameter { kind: "SPS", msg });

        if self.chroma_format_idc > 3 {
            return fail(format!("chroma_format_idc {}", self.chroma_format_idc));
        }
        if self.bit_depth_y() > 16 || self.bit_depth_c() > 16 {
            return fail(format!(
                "bit depth {}/{} above 16",
                self.bit_depth_y(),
                self.bit_depth_c()
            ));
        }
        if !(4..=6).contains(&self.log2_ctb_size()) {
            return fail(format!("CTB size 2^{} not in 16..64", self.log2_ctb_size()));
        }
        if self.log2_min_tb_size() >= self.log2_min_cb_size()
            || self.log2_max_tb_size() > self.log2_ctb_size().min(5)
        {
            return fail(format!(
                "transform sizes 2^{}..2^{} do not fit CB sizes 2^{}..2^{}",
                self.log2_min_tb_size(),
                self.log2_max_tb_size(),
                self.log2_min_cb_size(),
                self.log2_ctb_size()
            ));
        }
        let min_cb = 1u32 << self.log2_min_cb_size();
        if self.pic_width_in_luma_samples == 0
            || self.pic_height_in_luma_samples == 0
            || self.pic_width_in_luma_samples % min_cb != 0
            || self.pic_height_in_luma_samples % min_cb != 0
        {
            return fail(format!(
                "picture {}x{} is not a multiple of the minimum CB size {min_cb}",
                self.pic_width_in_luma_samples, self.pic_height_in_luma_samples
            ));
        }
        if let Some(pcm) = &self.pcm_params {
            if pcm.bit_depth_y() > self.bit_depth_y() || pcm.bit_depth_c() > self.bit_depth_c() {
                return fail("PCM bit depth exceeds the sample bit depth".into());
            }
            if pcm.log2_max_size() > self.log2_ctb_size().min(5) || pcm.log2_min_size() < 3 {
                return fail("PCM block sizes out of range".into());
            }
        }
        if self.range_extension.cabac_bypass_alignment_enabled_flag {
            return Err(HevcError::Unsupported("cabac_bypass_alignment_enabled_flag"));
        }
        if self.range_extension.extended_precision_processing_flag {
            return Err(HevcError::Unsupported("extended_precision_processing_flag"));
        }
        if self.palette_mode_enabled_flag && !self.capabilities.screen_content {
            return Err(HevcError::CapabilityMismatch("palette mode"));
        }
        Ok(())
    }
}

/// PCM parameters
#[derive(Debug, Clone)]
pub struct PcmParams {
    /// PCM sample bit depth luma minus 1
    pub pcm_sample_bit_depth_luma_minus1: u8,
    /// PCM sample bit depth chroma minus 1
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    /// Log2 min PCM luma coding block size minus 3
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    /// Log2 diff max min PCM luma coding block size
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    /// PCM loop filter disabled flag
    pub pcm_loop_filter_disabled_flag: bool,
}

impl PcmParams {
    /// PcmBitDepthY
    pub fn bit_depth_y(&self) -> u8 {
        self.pcm_sample_bit_depth_luma_minus1 + 1
    }

    /// PcmBitDepthC
    pub fn bit_depth_c(&self) -> u8 {
        self.pcm_sample_bit_depth_chroma_minus1 + 1
    }

    /// Log2MinIpcmCbSizeY
    pub fn log2_min_size(&self) -> u8 {
        self.log2_min_pcm_luma_coding_block_size_minus3 + 3
    }

    /// Log2MaxIpcmCbSizeY
    pub fn log2_max_size(&self) -> u8 {
        self.log2_min_size() + self.log2_diff_max_min_pcm_luma_coding_block_size
    }
}

/// Picture Parameter Set
#[derive(Debug, Clone)]
pub struct Pps {
    /// Dependent slice segments enabled flag
    pub dependent_slice_segments_enabled_flag: bool,
    /// Sign data hiding enabled flag
    pub sign_data_hiding_enabled_flag: bool,
    /// Cabac init present flag
    pub cabac_init_present_flag: bool,
    /// Init QP minus 26
    pub init_qp_minus26: i8,
    /// Constrained intra pred flag
    pub constrained_intra_pred_flag: bool,
    /// Transform skip enabled flag
    pub transform_skip_enabled_flag: bool,
    /// CU QP delta enabled flag
    pub cu_qp_delta_enabled_flag: bool,
    /// Diff CU QP delta depth
    pub diff_cu_qp_delta_depth: u8,
    /// Cb QP offset
    pub pps_cb_qp_offset: i8,
    /// Cr QP offset
    pub pps_cr_qp_offset: i8,
    /// Weighted pred flag
    pub weighted_pred_flag: bool,
    /// Weighted bipred flag
    pub weighted_bipred_flag: bool,
    /// Transquant bypass enabled flag
    pub transquant_bypass_enabled_flag: bool,
    /// Tiles enabled flag
    pub tiles_enabled_flag: bool,
    /// Entropy coding sync enabled flag
    pub entropy_coding_sync_enabled_flag: bool,
    /// Tile info (if tiles enabled)
    pub tile_info: Option<TileInfo>,
    /// Loop filter across slices enabled flag
    pub pps_loop_filter_across_slices_enabled_flag: bool,
    /// Explicit PPS scaling lists overriding the SPS ones
    pub scaling_list: Option<ScalingList>,
    /// Log2 parallel merge level minus 2
    pub log2_parallel_merge_level_minus2: u8,
    /// Range extension fields
    pub range_extension: PpsRangeExtension,
}

/// PPS range extension fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PpsRangeExtension {
    /// log2_max_transform_skip_block_size_minus2
    pub log2_max_transform_skip_block_size_minus2: u8,
    /// cross_component_prediction_enabled_flag
    pub cross_component_prediction_enabled_flag: bool,
    /// chroma_qp_offset_list_enabled_flag
    pub chroma_qp_offset_list_enabled_flag: bool,
    /// diff_cu_chroma_qp_offset_depth
    pub diff_cu_chroma_qp_offset_depth: u8,
    /// cb_qp_offset_list
    pub cb_qp_offset_list: Vec<i8>,
    /// cr_qp_offset_list
    pub cr_qp_offset_list: Vec<i8>,
    /// log2_sao_offset_scale_luma
    pub log2_sao_offset_scale_luma: u8,
    /// log2_sao_offset_scale_chroma
    pub log2_sao_offset_scale_chroma: u8,
}

impl Default for Pps {
    fn default() -> Self {
        Self {
            dependent_slice_segments_enabled_flag: false,
            sign_data_hiding_enabled_flag: false,
            cabac_init_present_flag: false,
            init_qp_minus26: 0,
            constrained_intra_pred_flag: false,
            transform_skip_enabled_flag: false,
            cu_qp_delta_enabled_flag: false,
            diff_cu_qp_delta_depth: 0,
            pps_cb_qp_offset: 0,
            pps_cr_qp_offset: 0,
            weighted_pred_flag: false,
            weighted_bipred_flag: false,
            transquant_bypass_enabled_flag: false,
            tiles_enabled_flag: false,
            entropy_coding_sync_enabled_flag: false,
            tile_info: None,
            pps_loop_filter_across_slices_enabled_flag: false,
            scaling_list: None,
            log2_parallel_merge_level_minus2: 0,
            range_extension: PpsRangeExtension::default(),
        }
    }
}

impl Pps {
    /// Log2ParMrgLevel
    pub fn log2_parallel_merge_level(&self) -> u8 {
        self.log2_parallel_merge_level_minus2 + 2
    }

    /// Log2MaxTransformSkipSize
    pub fn log2_max_transform_skip_size(&self) -> u8 {
        self.range_extension.log2_max_transform_skip_block_size_minus2 + 2
    }

    /// Check PPS values against the SPS they are used with
    pub fn validate(&self, sps: &Sps) -> Result<()> {
        let fail = |msg: String| Err(HevcError::InvalidParameter { kind: "PPS", msg });

        if self.diff_cu_qp_delta_depth > sps.log2_diff_max_min_luma_coding_block_size {
            return fail(format!("diff_cu_qp_delta_depth {}", self.diff_cu_qp_delta_depth));
        }
        if !(-12..=12).contains(&self.pps_cb_qp_offset) || !(-12..=12).contains(&self.pps_cr_qp_offset)
        {
            return fail("chroma QP offsets out of -12..=12".into());
        }
        if self.log2_parallel_merge_level() > sps.log2_ctb_size() {
            return fail("parallel merge level above CTB size".into());
        }
        let ext = &self.range_extension;
        if ext.cross_component_prediction_enabled_flag && sps.chroma_array_type() != 3 {
            return fail("cross-component prediction requires 4:4:4".into());
        }
        if ext.chroma_qp_offset_list_enabled_flag
            && (ext.cb_qp_offset_list.is_empty()
                || ext.cb_qp_offset_list.len() > 6
                || ext.cb_qp_offset_list.len() != ext.cr_qp_offset_list.len())
        {
            return fail("chroma QP offset lists must hold 1..=6 matching entries".into());
        }
        if self.tiles_enabled_flag {
            let Some(tiles) = &self.tile_info else {
                return fail("tiles enabled without tile info".into());
            };
            let cols = tiles.column_boundaries(sps.pic_width_in_ctbs());
            let rows = tiles.row_boundaries(sps.pic_height_in_ctbs());
            let bad = |bd: &[u32], total: u32| {
                bd.windows(2).any(|w| w[1] <= w[0]) || bd.last() != Some(&total)
            };
            if bad(&cols, sps.pic_width_in_ctbs()) || bad(&rows, sps.pic_height_in_ctbs()) {
                return fail("tile grid does not partition the picture".into());
            }
        }
        Ok(())
    }
}

/// Tile configuration
#[derive(Debug, Clone)]
pub struct TileInfo {
    /// Number of tile columns minus 1
    pub num_tile_columns_minus1: u16,
    /// Number of tile rows minus 1
    pub num_tile_rows_minus1: u16,
    /// Uniform spacing flag
    pub uniform_spacing_flag: bool,
    /// Column widths in CTBs for all but the last column (if not uniform)
    pub column_widths: Vec<u16>,
    /// Row heights in CTBs for all but the last row (if not uniform)
    pub row_heights: Vec<u16>,
    /// Loop filter across tiles enabled flag
    pub loop_filter_across_tiles_enabled_flag: bool,
}

impl TileInfo {
    /// Uniformly spaced grid
    pub fn uniform(columns: u16, rows: u16) -> Self {
        Self {
            num_tile_columns_minus1: columns.saturating_sub(1),
            num_tile_rows_minus1: rows.saturating_sub(1),
            uniform_spacing_flag: true,
            column_widths: Vec::new(),
            row_heights: Vec::new(),
            loop_filter_across_tiles_enabled_flag: true,
        }
    }

    /// colBd: column start positions in CTBs, followed by the picture width
    pub fn column_boundaries(&self, pic_width_in_ctbs: u32) -> Vec<u32> {
        boundaries(
            u32::from(self.num_tile_columns_minus1) + 1,
            self.uniform_spacing_flag,
            &self.column_widths,
            pic_width_in_ctbs,
        )
    }

    /// rowBd: row start positions in CTBs, followed by the picture height
    pub fn row_boundaries(&self, pic_height_in_ctbs: u32) -> Vec<u32> {
        boundaries(
            u32::from(self.num_tile_rows_minus1) + 1,
            self.uniform_spacing_flag,
            &self.row_heights,
            pic_height_in_ctbs,
        )
    }
}

fn boundaries(count: u32, uniform: bool, sizes: &[u16], total: u32) -> Vec<u32> {
    let mut bd = Vec::with_capacity(count as usize + 1);
    bd.push(0);
    for i in 0..count {
        let size = if uniform {
            ((i + 1) * total) / count - (i * total) / count
        } else if i + 1 < count {
            u32::from(sizes.get(i as usize).copied().unwrap_or(0))
        } else {
            total.saturating_sub(bd[i as usize])
        };
        let prev = bd[i as usize];
        bd.push(prev + size);
    }
    bd
}

/// Scaling list coefficients as coded (up-right diagonal order)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingList {
    /// `lists[size_id][matrix_id]`: 16 entries for 4x4, 64 otherwise.
    /// matrix_id is `3 * inter + c_idx`; 32x32 chroma entries are only used for 4:4:4
    pub lists: [[Vec<u8>; 6]; 4],
    /// scaling_list_dc_coef_minus8 + 8 for 16x16 (`[0]`) and 32x32 (`[1]`)
    pub dc: [[u8; 6]; 2],
}

const DEFAULT_8X8_INTRA: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 16, 17, 16, 17, 18, 17, 18, 18, 17, 18, 21, 19, 20,
    21, 20, 19, 21, 24, 22, 22, 24, 24, 22, 22, 24, 25, 25, 27, 30, 27, 25, 25, 29, 31, 35, 35, 31,
    29, 36, 41, 44, 41, 36, 47, 54, 54, 47, 65, 70, 65, 88, 88, 115,
];

const DEFAULT_8X8_INTER: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 17, 17, 17, 17, 18, 18, 18, 18, 18, 18, 20, 20, 20,
    20, 20, 20, 20, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 28, 28, 28, 28, 28,
    28, 33, 33, 33, 33, 33, 41, 41, 41, 41, 54, 54, 54, 71, 71, 91,
];

impl Default for ScalingList {
    /// The default lists (flat 4x4, default intra/inter 8x8 and up)
    fn default() -> Self {
        let flat = vec![16u8; 16];
        let big = |m: usize| {
            if m < 3 {
                DEFAULT_8X8_INTRA.to_vec()
            } else {
                DEFAULT_8X8_INTER.to_vec()
            }
        };
        Self {
            lists: [
                core::array::from_fn(|_| flat.clone()),
                core::array::from_fn(big),
                core::array::from_fn(big),
                core::array::from_fn(big),
            ],
            dc: [[16; 6]; 2],
        }
    }
}

impl ScalingList {
    /// Expand into per-position factors m[x][y] for every size and matrix
    pub fn factors(&self) -> ScalingFactors {
        let diag4 = up_right_diagonal(4);
        let diag8 = up_right_diagonal(8);
        let mut out = ScalingFactors::flat();

        for size_id in 0..4 {
            let size = 4usize << size_id;
            for matrix_id in 0..6 {
                let coeffs = &self.lists[size_id][matrix_id];
                let m = &mut out.m[size_id][matrix_id];
                if size_id == 0 {
                    for (i, &(x, y)) in diag4.iter().enumerate() {
                        m[y as usize * 4 + x as usize] = coeffs.get(i).copied().unwrap_or(16);
                    }
                    continue;
                }
                let rep = size / 8;
                for (i, &(x, y)) in diag8.iter().enumerate() {
                    let v = coeffs.get(i).copied().unwrap_or(16);
                    for j in 0..rep {
                        for k in 0..rep {
                            let xx = x as usize * rep + k;
                            let yy = y as usize * rep + j;
                            m[yy * size + xx] = v;
                        }
                    }
                }
                if size_id >= 2 {
                    m[0] = self.dc[size_id - 2][matrix_id];
                }
            }
        }
        out
    }
}

/// Scaling factors `m[size_id][matrix_id][y * size + x]`
#[derive(Debug, Clone)]
pub struct ScalingFactors {
    m: [[Vec<u8>; 6]; 4],
}

impl ScalingFactors {
    /// All factors 16 (scaling lists disabled)
    pub fn flat() -> Self {
        Self {
            m: core::array::from_fn(|size_id| {
                core::array::from_fn(|_| vec![16u8; 16 << (2 * size_id)])
            }),
        }
    }

    /// Factors for a transform block of `log2_size` (2..=5)
    pub fn matrix(&self, log2_size: u8, inter: bool, c_idx: usize) -> &[u8] {
        let size_id = (log2_size.clamp(2, 5) - 2) as usize;
        &self.m[size_id][3 * usize::from(inter) + c_idx.min(2)]
    }
}

/// Derived CTB addressing for one SPS/PPS pair: tile scan and z-scan orders
#[derive(Debug, Clone)]
pub struct PictureLayout {
    /// PicWidthInCtbsY
    pub width_in_ctbs: u32,
    /// PicHeightInCtbsY
    pub height_in_ctbs: u32,
    /// CtbLog2SizeY
    pub log2_ctb_size: u8,
    /// MinTbLog2SizeY
    pub log2_min_tb_size: u8,
    /// colBd
    pub col_bd: Vec<u32>,
    /// rowBd
    pub row_bd: Vec<u32>,
    rs_to_ts: Vec<u32>,
    ts_to_rs: Vec<u32>,
    tile_id_ts: Vec<u16>,
    min_tb_addr_zs: Vec<u32>,
    min_tb_stride: u32,
}

impl PictureLayout {
    /// Build the address tables for a picture coded with `sps` and `pps`
    pub fn new(sps: &Sps, pps: &Pps) -> Result<Self> {
        sps.validate()?;
        pps.validate(sps)?;

        let w = sps.pic_width_in_ctbs();
        let h = sps.pic_height_in_ctbs();
        let (col_bd, row_bd) = match (&pps.tile_info, pps.tiles_enabled_flag) {
            (Some(tiles), true) => (tiles.column_boundaries(w), tiles.row_boundaries(h)),
            _ => (vec![0, w], vec![0, h]),
        };

        let total = (w * h) as usize;
        let mut rs_to_ts = vec![0u32; total];
        for rs in 0..w * h {
            let tb_x = rs % w;
            let tb_y = rs / w;
            let tile_x = col_bd.windows(2).position(|c| tb_x < c[1]).unwrap_or(0);
            let tile_y = row_bd.windows(2).position(|r| tb_y < r[1]).unwrap_or(0);
            let mut ts = 0;
            for i in 0..tile_x {
                ts += (row_bd[tile_y + 1] - row_bd[tile_y]) * (col_bd[i + 1] - col_bd[i]);
            }
            for j in 0..tile_y {
                ts += w * (row_bd[j + 1] - row_bd[j]);
            }
            ts += (tb_y - row_bd[tile_y]) * (col_bd[tile_x + 1] - col_bd[tile_x]);
            ts += tb_x - col_bd[tile_x];
            rs_to_ts[rs as usize] = ts;
        }

        let mut ts_to_rs = vec![0u32; total];
        for (rs, &ts) in rs_to_ts.iter().enumerate() {
            ts_to_rs[ts as usize] = rs as u32;
        }

        let mut tile_id_ts = vec![0u16; total];
        let mut tile_id = 0u16;
        for j in 0..row_bd.len() - 1 {
            for i in 0..col_bd.len() - 1 {
                for y in row_bd[j]..row_bd[j + 1] {
                    for x in col_bd[i]..col_bd[i + 1] {
                        tile_id_ts[rs_to_ts[(y * w + x) as usize] as usize] = tile_id;
                    }
                }
                tile_id += 1;
            }
        }

        let log2_ctb = sps.log2_ctb_size();
        let log2_min_tb = sps.log2_min_tb_size();
        let shift = u32::from(log2_ctb - log2_min_tb);
        let stride = w << shift;
        let rows = h << shift;
        let mut min_tb_addr_zs = vec![0u32; (stride * rows) as usize];
        for y in 0..rows {
            for x in 0..stride {
                let ctb_rs = (y >> shift) * w + (x >> shift);
                let mut addr = rs_to_ts[ctb_rs as usize] << (2 * shift);
                for i in 0..shift {
                    let m = 1u32 << i;
                    if m & x != 0 {
                        addr += m * m;
                    }
                    if m & y != 0 {
                        addr += 2 * m * m;
                    }
                }
                min_tb_addr_zs[(y * stride + x) as usize] = addr;
            }
        }

        Ok(Self {
            width_in_ctbs: w,
            height_in_ctbs: h,
            log2_ctb_size: log2_ctb,
            log2_min_tb_size: log2_min_tb,
            col_bd,
            row_bd,
            rs_to_ts,
            ts_to_rs,
            tile_id_ts,
            min_tb_addr_zs,
            min_tb_stride: stride,
        })
    }

    /// Number of CTBs in the picture
    pub fn num_ctbs(&self) -> u32 {
        self.width_in_ctbs * self.height_in_ctbs
    }

    /// CtbAddrRsToTs
    pub fn rs_to_ts(&self, rs: u32) -> u32 {
        self.rs_to_ts[rs as usize]
    }

    /// CtbAddrTsToRs
    pub fn ts_to_rs(&self, ts: u32) -> u32 {
        self.ts_to_rs[ts as usize]
    }

    /// TileId of a CTB given in raster scan
    pub fn tile_id_rs(&self, rs: u32) -> u16 {
        self.tile_id_ts[self.rs_to_ts(rs) as usize]
    }

    /// Tile column index containing CTB column `x`
    pub fn tile_column(&self, x: u32) -> usize {
        self.col_bd.windows(2).position(|c| x < c[1]).unwrap_or(0)
    }

    /// Tile row index containing CTB row `y`
    pub fn tile_row(&self, y: u32) -> usize {
        self.row_bd.windows(2).position(|r| y < r[1]).unwrap_or(0)
    }

    /// CTB rectangle (x0, y0, x1, y1) of the tile containing CTB (x, y), exclusive end
    pub fn tile_bounds(&self, x: u32, y: u32) -> (u32, u32, u32, u32) {
        let c = self.tile_column(x);
        let r = self.tile_row(y);
        (self.col_bd[c], self.row_bd[r], self.col_bd[c + 1], self.row_bd[r + 1])
    }

    /// First CTB of a tile
    pub fn is_tile_start(&self, rs: u32) -> bool {
        let ts = self.rs_to_ts(rs);
        ts == 0 || self.tile_id_ts[ts as usize] != self.tile_id_ts[ts as usize - 1]
    }

    /// MinTbAddrZs for a luma position inside the CTB grid
    pub fn min_tb_addr_zs(&self, x: u32, y: u32) -> u32 {
        let tx = x >> self.log2_min_tb_size;
        let ty = y >> self.log2_min_tb_size;
        self.min_tb_addr_zs[(ty * self.min_tb_stride + tx) as usize]
    }
}
