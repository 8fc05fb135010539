//! Neighbour availability (H.265 6.4.1 and 6.4.2)
//!
//! A neighbouring location is available when it lies inside the picture,
//! precedes the current location in z-scan order, and belongs to the same
//! slice and tile. Slice membership is read from the CTU records, which
//! hold [`SLICE_ADDR_NONE`](super::picture::SLICE_ADDR_NONE) until a CTU
//! starts decoding, so the check never depends on sample values.

use super::params::PictureLayout;
use super::picture::Picture;
use super::slice::PredMode;

/// Z-scan order availability of luma location (xn, yn) seen from (x_curr, y_curr)
pub fn zscan_available(
    pic: &Picture,
    layout: &PictureLayout,
    x_curr: u32,
    y_curr: u32,
    xn: i32,
    yn: i32,
) -> bool {
    if xn < 0 || yn < 0 || xn as u32 >= pic.width() || yn as u32 >= pic.height() {
        return false;
    }
    let (xn, yn) = (xn as u32, yn as u32);
    if layout.min_tb_addr_zs(xn, yn) > layout.min_tb_addr_zs(x_curr, y_curr) {
        return false;
    }
    let nb = pic.ctu_info_at(xn, yn);
    let cur = pic.ctu_info_at(x_curr, y_curr);
    nb.slice_addr == cur.slice_addr && nb.tile_id == cur.tile_id
}

/// Coding block and prediction block a neighbour query is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbLocation {
    /// Luma position of the coding block
    pub x_cb: u32,
    /// Luma position of the coding block
    pub y_cb: u32,
    /// Coding block size in luma samples
    pub cb_size: u32,
    /// Luma position of the prediction block
    pub x_pb: u32,
    /// Luma position of the prediction block
    pub y_pb: u32,
    /// Prediction block width
    pub width: u32,
    /// Prediction block height
    pub height: u32,
    /// partIdx within the coding block
    pub part_idx: u8,
}

impl PbLocation {
    /// The whole coding block as a single prediction block
    pub fn whole_cb(x_cb: u32, y_cb: u32, cb_size: u32) -> Self {
        Self {
            x_cb,
            y_cb,
            cb_size,
            x_pb: x_cb,
            y_pb: y_cb,
            width: cb_size,
            height: cb_size,
            part_idx: 0,
        }
    }
}

/// Prediction block availability: z-scan availability, the NxN partIdx 1
/// exception, and exclusion of intra-coded neighbours
pub fn pb_available(pic: &Picture, layout: &PictureLayout, pb: &PbLocation, xn: i32, yn: i32) -> bool {
    let inside = |v: i32, start: u32| v >= start as i32 && v < (start + pb.cb_size) as i32;
    let same_cb = inside(xn, pb.x_cb) && inside(yn, pb.y_cb);

    let available = if !same_cb {
        zscan_available(pic, layout, pb.x_pb, pb.y_pb, xn, yn)
    } else {
        !(pb.width << 1 == pb.cb_size
            && pb.height << 1 == pb.cb_size
            && pb.part_idx == 1
            && (pb.y_cb + pb.height) as i32 <= yn
            && (pb.x_cb + pb.width) as i32 > xn)
    };
    available && pic.cu_info(xn as u32, yn as u32).pred_mode != PredMode::Intra
}
