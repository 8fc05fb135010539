//! Full slice segment decodes of PCM pictures across tile and wavefront layouts

mod common;

use std::sync::Arc;

use common::{PcmPicture, expected_sample, intra_header, sps_16_pcm};
use hevc_decoder::hevc::TileInfo;
use hevc_decoder::{DecoderConfig, Integrity, Picture, PictureDecoder, PictureLayout, Pps, RefPicList, Sps};

fn no_refs() -> [RefPicList; 2] {
    [Vec::new(), Vec::new()]
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_pattern(pic: &Picture) {
    for c in 0..3 {
        let plane = pic.plane(c);
        for y in 0..plane.height() {
            for x in 0..plane.width() {
                assert_eq!(
                    plane.get(x, y),
                    expected_sample(c, x, y),
                    "component {c} at ({x}, {y})"
                );
            }
        }
    }
}

fn planes(pic: &Picture) -> Vec<Vec<u16>> {
    (0..3).map(|c| pic.plane(c).to_vec()).collect()
}

/// Encode the whole picture as one slice segment and decode it with `config`
fn decode_single_segment(sps: &Sps, pps: &Pps, config: DecoderConfig) -> Arc<Picture> {
    let layout = PictureLayout::new(sps, pps).unwrap();
    let mut writer = PcmPicture::new(&layout, pps, 26)
        .with_picture_size(sps.pic_width_in_luma_samples, sps.pic_height_in_luma_samples);
    let coded = writer.encode_segment(0, layout.num_ctbs(), false);

    let decoder = PictureDecoder::new(config);
    let mut frame = decoder.begin_picture(sps, pps, 0).unwrap();
    let header = intra_header(0, false, coded.entry_point_sizes);
    frame.decode_slice_segment(&header, &no_refs(), &coded.data).unwrap();
    frame.finish()
}

#[test]
fn pcm_picture_reconstructs_exact_samples() {
    init_logging();
    let sps = sps_16_pcm(48, 32);
    let pps = Pps::default();
    let pic = decode_single_segment(&sps, &pps, DecoderConfig::new().with_force_sequential(true));

    assert_eq!(pic.integrity(), Integrity::Correct);
    assert_pattern(&pic);
    let cu = pic.cu_info(20, 4);
    assert!(cu.pcm);
    assert_eq!(cu.log2_cb_size, 4);
    for rs in 0..6 {
        let info = pic.ctu_info(rs);
        assert!(info.decoded);
        assert_eq!(info.slice_addr, 0);
    }
}

#[test]
fn tiles_decode_identically_in_parallel() {
    init_logging();
    let sps = sps_16_pcm(64, 48);
    let pps = Pps {
        tiles_enabled_flag: true,
        tile_info: Some(TileInfo::uniform(2, 2)),
        ..Pps::default()
    };

    let sequential = decode_single_segment(&sps, &pps, DecoderConfig::new().with_force_sequential(true));
    let parallel = decode_single_segment(&sps, &pps, DecoderConfig::new().with_threads(4));

    assert_eq!(sequential.integrity(), Integrity::Correct);
    assert_eq!(parallel.integrity(), Integrity::Correct);
    assert_pattern(&parallel);
    assert_eq!(planes(&sequential), planes(&parallel));

    let layout = PictureLayout::new(&sps, &pps).unwrap();
    for rs in 0..layout.num_ctbs() {
        assert_eq!(parallel.ctu_info(rs).tile_id, layout.tile_id_rs(rs));
    }
}

#[test]
fn wavefront_rows_decode_identically_for_any_thread_count() {
    init_logging();
    let sps = sps_16_pcm(80, 64);
    let pps = Pps {
        entropy_coding_sync_enabled_flag: true,
        ..Pps::default()
    };

    let reference = decode_single_segment(&sps, &pps, DecoderConfig::new().with_force_sequential(true));
    assert_eq!(reference.integrity(), Integrity::Correct);
    assert_pattern(&reference);
    for threads in [2, 3, 8] {
        let pic = decode_single_segment(&sps, &pps, DecoderConfig::new().with_threads(threads));
        assert_eq!(pic.integrity(), Integrity::Correct, "{threads} threads");
        assert_eq!(planes(&pic), planes(&reference), "{threads} threads");
    }
}

#[test]
fn partial_edge_ctbs_decode_identically_with_wavefronts() {
    init_logging();
    // 40x24 with 16x16 CTBs: the right column and bottom row are cut to 8 samples
    let sps = sps_16_pcm(40, 24);
    let wpp = Pps {
        entropy_coding_sync_enabled_flag: true,
        ..Pps::default()
    };

    let sequential = decode_single_segment(&sps, &Pps::default(), DecoderConfig::new().with_force_sequential(true));
    assert_eq!(sequential.integrity(), Integrity::Correct);
    assert_pattern(&sequential);
    assert_eq!(sequential.cu_info(36, 4).log2_cb_size, 3);
    assert_eq!(sequential.cu_info(36, 4).ct_depth, 1);
    assert_eq!(sequential.cu_info(20, 4).log2_cb_size, 4);
    assert_eq!(sequential.cu_info(4, 20).log2_cb_size, 3);

    for config in [DecoderConfig::new().with_force_sequential(true), DecoderConfig::new().with_threads(3)] {
        let pic = decode_single_segment(&sps, &wpp, config);
        assert_eq!(pic.integrity(), Integrity::Correct);
        assert_eq!(planes(&pic), planes(&sequential));
        for rs in 0..6 {
            assert!(pic.ctu_info(rs).decoded, "CTB {rs}");
        }
    }
}

#[test]
fn wavefronts_inside_tiles() {
    init_logging();
    let sps = sps_16_pcm(96, 48);
    let pps = Pps {
        tiles_enabled_flag: true,
        entropy_coding_sync_enabled_flag: true,
        tile_info: Some(TileInfo::uniform(2, 1)),
        ..Pps::default()
    };
    let pic = decode_single_segment(&sps, &pps, DecoderConfig::new().with_threads(4));
    assert_eq!(pic.integrity(), Integrity::Correct);
    assert_pattern(&pic);
}

#[test]
fn dependent_segment_continues_entropy_state() {
    init_logging();
    let sps = sps_16_pcm(64, 32);
    let pps = Pps {
        dependent_slice_segments_enabled_flag: true,
        ..Pps::default()
    };
    let layout = PictureLayout::new(&sps, &pps).unwrap();
    let mut writer = PcmPicture::new(&layout, &pps, 26);
    let first = writer.encode_segment(0, 3, false);
    let second = writer.encode_segment(3, layout.num_ctbs(), true);

    let decoder = PictureDecoder::new(DecoderConfig::new().with_force_sequential(true));
    let mut frame = decoder.begin_picture(&sps, &pps, 7).unwrap();
    frame
        .decode_slice_segment(&intra_header(0, false, first.entry_point_sizes), &no_refs(), &first.data)
        .unwrap();
    frame
        .decode_slice_segment(&intra_header(3, true, second.entry_point_sizes), &no_refs(), &second.data)
        .unwrap();
    let pic = frame.finish();

    assert_eq!(pic.poc(), 7);
    assert_eq!(pic.integrity(), Integrity::Correct);
    assert_pattern(&pic);
    assert_eq!(pic.ctu_info(5).slice_addr, 0);
}

#[test]
fn dependent_segment_without_predecessor_is_rejected() {
    let sps = sps_16_pcm(32, 16);
    let pps = Pps {
        dependent_slice_segments_enabled_flag: true,
        ..Pps::default()
    };
    let decoder = PictureDecoder::new(DecoderConfig::new().with_force_sequential(true));
    let mut frame = decoder.begin_picture(&sps, &pps, 0).unwrap();
    let result = frame.decode_slice_segment(&intra_header(1, true, Vec::new()), &no_refs(), &[0x80]);
    assert!(result.is_err());
}

#[test]
fn truncated_segment_reports_decoding_errors() {
    init_logging();
    let sps = sps_16_pcm(64, 32);
    let pps = Pps::default();
    let layout = PictureLayout::new(&sps, &pps).unwrap();
    let mut writer = PcmPicture::new(&layout, &pps, 26);
    let coded = writer.encode_segment(0, layout.num_ctbs(), false);
    // the second CTB's PCM samples are cut off
    let truncated = &coded.data[..400];

    let decoder = PictureDecoder::new(DecoderConfig::new().with_force_sequential(true));
    let mut frame = decoder.begin_picture(&sps, &pps, 0).unwrap();
    assert!(frame.decode_slice_segment(&intra_header(0, false, Vec::new()), &no_refs(), truncated).is_err());
    let pic = frame.finish();
    assert_eq!(pic.integrity(), Integrity::DecodingErrors);
    assert!(pic.ctu_info(0).decoded);
    for rs in 1..layout.num_ctbs() {
        assert!(!pic.ctu_info(rs).decoded);
    }
}

#[test]
fn failed_wavefront_row_does_not_block_later_rows() {
    init_logging();
    let sps = sps_16_pcm(64, 48);
    let pps = Pps {
        entropy_coding_sync_enabled_flag: true,
        ..Pps::default()
    };
    let layout = PictureLayout::new(&sps, &pps).unwrap();
    let mut writer = PcmPicture::new(&layout, &pps, 26);
    let coded = writer.encode_segment(0, layout.num_ctbs(), false);

    // each PCM CTB takes about 386 bytes: row 0 keeps two CTBs and the
    // start of the third, which then runs out of PCM samples
    let first = coded.entry_point_sizes[0] as usize;
    let kept = 2 * 386 + 10;
    let mut data = coded.data[..kept].to_vec();
    data.extend_from_slice(&coded.data[first..]);
    let mut sizes = coded.entry_point_sizes.clone();
    sizes[0] = kept as u32;

    let decoder = PictureDecoder::new(DecoderConfig::new().with_threads(3));
    let mut frame = decoder.begin_picture(&sps, &pps, 0).unwrap();
    let header = intra_header(0, false, sizes);
    assert!(frame.decode_slice_segment(&header, &no_refs(), &data).is_err());
    let pic = frame.finish();

    assert_eq!(pic.integrity(), Integrity::DecodingErrors);
    assert!(pic.ctu_info(1).decoded);
    assert!(!pic.ctu_info(2).decoded);
    for rs in 4..layout.num_ctbs() {
        assert!(pic.ctu_info(rs).decoded, "CTB {rs}");
    }
    let luma = pic.plane(0);
    for y in 16..48 {
        for x in 0..64 {
            assert_eq!(luma.get(x, y), expected_sample(0, x, y));
        }
    }
}

#[test]
fn limits_reject_oversized_pictures() {
    let sps = sps_16_pcm(64, 64);
    let pps = Pps::default();
    let config = DecoderConfig::new()
        .with_force_sequential(true)
        .with_limits(hevc_decoder::Limits::none().max_pixels(1024));
    let decoder = PictureDecoder::new(config);
    let err = decoder.begin_picture(&sps, &pps, 0).err().unwrap();
    assert!(format!("{err:?}").contains("LimitExceeded"));
}

#[test]
fn pictures_are_recycled() {
    let sps = sps_16_pcm(32, 32);
    let pps = Pps::default();
    let decoder = PictureDecoder::new(DecoderConfig::new().with_force_sequential(true));
    let first = decoder.begin_picture(&sps, &pps, 0).unwrap().finish();
    assert!(decoder.recycle(first));
    let second = decoder.begin_picture(&sps, &pps, 1).unwrap();
    assert_eq!(second.picture().poc(), 1);
}
