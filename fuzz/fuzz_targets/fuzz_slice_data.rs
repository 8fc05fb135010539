#![no_main]

use libfuzzer_sys::fuzz_target;
use hevc_decoder::hevc::{Pps, SliceHeader, Sps};
use hevc_decoder::{DecoderConfig, PictureDecoder};

/// Slice data fuzzer: arbitrary bytes as the data of one I slice segment.
/// The first byte picks the coding tools; any panic or hang is a bug.
fuzz_target!(|data: &[u8]| {
    let Some((&tools, slice_data)) = data.split_first() else {
        return;
    };

    let sps = Sps {
        pic_width_in_luma_samples: 64,
        pic_height_in_luma_samples: 48,
        log2_diff_max_min_luma_coding_block_size: 2,
        log2_diff_max_min_luma_transform_block_size: 3,
        max_transform_hierarchy_depth_intra: 2,
        amp_enabled_flag: tools & 0x01 != 0,
        strong_intra_smoothing_enabled_flag: tools & 0x02 != 0,
        ..Sps::default()
    };
    let pps = Pps {
        sign_data_hiding_enabled_flag: tools & 0x04 != 0,
        transform_skip_enabled_flag: tools & 0x08 != 0,
        cu_qp_delta_enabled_flag: tools & 0x10 != 0,
        transquant_bypass_enabled_flag: tools & 0x20 != 0,
        constrained_intra_pred_flag: tools & 0x40 != 0,
        ..Pps::default()
    };
    let header = SliceHeader {
        slice_qp_y: 22 + i32::from(tools >> 7) * 10,
        ..SliceHeader::default()
    };

    let decoder = PictureDecoder::new(DecoderConfig::new().with_force_sequential(true));
    let Ok(mut frame) = decoder.begin_picture(&sps, &pps, 0) else {
        return;
    };
    let _ = frame.decode_slice_segment(&header, &[Vec::new(), Vec::new()], slice_data);
    let _ = frame.finish();
});
