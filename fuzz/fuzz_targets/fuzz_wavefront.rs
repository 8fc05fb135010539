#![no_main]

use libfuzzer_sys::fuzz_target;
use hevc_decoder::hevc::{Pps, SliceHeader, Sps, TileInfo};
use hevc_decoder::{DecoderConfig, PictureDecoder};

/// Parallel substream fuzzer: arbitrary slice data split at fuzzer-chosen
/// entry points, decoded with tiles plus wavefront rows on a worker pool.
/// A failing row must never leave another row waiting forever.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let (sizes, slice_data) = data.split_at(4);

    let sps = Sps {
        pic_width_in_luma_samples: 64,
        pic_height_in_luma_samples: 64,
        log2_diff_max_min_luma_coding_block_size: 1,
        log2_diff_max_min_luma_transform_block_size: 2,
        max_transform_hierarchy_depth_intra: 1,
        ..Sps::default()
    };
    let pps = Pps {
        tiles_enabled_flag: true,
        entropy_coding_sync_enabled_flag: true,
        tile_info: Some(TileInfo::uniform(2, 1)),
        ..Pps::default()
    };
    // 2 tile columns x 4 CTB rows: 8 substreams, 7 entry points
    let entry_point_sizes = (0..7).map(|i| u32::from(sizes[i % 4]) + 1).collect();
    let header = SliceHeader {
        entry_point_sizes,
        ..SliceHeader::default()
    };

    let decoder = PictureDecoder::new(DecoderConfig::new().with_threads(4));
    let Ok(mut frame) = decoder.begin_picture(&sps, &pps, 0) else {
        return;
    };
    let _ = frame.decode_slice_segment(&header, &[Vec::new(), Vec::new()], slice_data);
    let _ = frame.finish();
});
