mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{PcmPicture, intra_header, sps_16_pcm};
use hevc_decoder::{DecoderConfig, Integrity, PictureDecoder, PictureLayout, Pps, RefPicList};

/// Fires once it has been polled `budget` times
struct CancelAfter {
    budget: usize,
    polls: AtomicUsize,
}

impl CancelAfter {
    fn new(budget: usize) -> Arc<Self> {
        Arc::new(Self {
            budget,
            polls: AtomicUsize::new(0),
        })
    }
}

impl enough::Stop for CancelAfter {
    fn check(&self) -> Result<(), enough::StopReason> {
        if self.polls.fetch_add(1, Ordering::Relaxed) >= self.budget {
            Err(enough::StopReason::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn no_refs() -> [RefPicList; 2] {
    [Vec::new(), Vec::new()]
}

#[test]
fn cancelled_before_start_decodes_nothing() {
    let sps = sps_16_pcm(64, 32);
    let pps = Pps::default();
    let layout = PictureLayout::new(&sps, &pps).unwrap();
    let coded = PcmPicture::new(&layout, &pps, 26).encode_segment(0, layout.num_ctbs(), false);

    let config = DecoderConfig::new()
        .with_force_sequential(true)
        .with_stop(CancelAfter::new(0));
    let decoder = PictureDecoder::new(config);
    let mut frame = decoder.begin_picture(&sps, &pps, 0).unwrap();
    let err = frame
        .decode_slice_segment(&intra_header(0, false, Vec::new()), &no_refs(), &coded.data)
        .unwrap_err();
    assert!(format!("{err:?}").contains("Cancelled"));

    let pic = frame.finish();
    for rs in 0..layout.num_ctbs() {
        assert!(!pic.ctu_info(rs).decoded);
    }
    assert_ne!(pic.integrity(), Integrity::Correct);
}

#[test]
fn cancellation_mid_segment_stops_at_a_ctu_boundary() {
    let sps = sps_16_pcm(64, 32);
    let pps = Pps::default();
    let layout = PictureLayout::new(&sps, &pps).unwrap();
    let coded = PcmPicture::new(&layout, &pps, 26).encode_segment(0, layout.num_ctbs(), false);

    // one poll for the segment, then one per CTU: three CTUs get through
    let config = DecoderConfig::new()
        .with_force_sequential(true)
        .with_stop(CancelAfter::new(4));
    let decoder = PictureDecoder::new(config);
    let mut frame = decoder.begin_picture(&sps, &pps, 0).unwrap();
    let err = frame
        .decode_slice_segment(&intra_header(0, false, Vec::new()), &no_refs(), &coded.data)
        .unwrap_err();
    assert!(format!("{err:?}").contains("Cancelled"));

    let pic = frame.finish();
    assert_eq!(pic.integrity(), Integrity::DecodingErrors);
    for rs in 0..3 {
        assert!(pic.ctu_info(rs).decoded, "CTB {rs}");
    }
    for rs in 3..layout.num_ctbs() {
        assert!(!pic.ctu_info(rs).decoded, "CTB {rs}");
    }
}
