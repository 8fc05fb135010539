//! Process-wide lookup tables: coefficient scan orders, significance
//! context maps and wedge partition patterns.
//!
//! The tables are built on first use and shared through [`acquire`].
//! Every decoder holds an `Arc<Tables>`; when the last handle is dropped
//! the tables are freed and rebuilt on the next acquisition.

use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Scan index: up-right diagonal
pub const SCAN_DIAG: usize = 0;
/// Scan index: horizontal
pub const SCAN_HORIZ: usize = 1;
/// Scan index: vertical
pub const SCAN_VERT: usize = 2;

/// 4x4 position to significance context for 4x4 transform blocks
const CTX_IDX_MAP: [u8; 16] = [0, 1, 4, 5, 2, 3, 4, 5, 6, 6, 8, 8, 7, 7, 8, 8];

static SHARED: Mutex<Weak<Tables>> = Mutex::new(Weak::new());

/// Get the shared tables, building them if no other handle is alive
pub fn acquire() -> Arc<Tables> {
    let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(tables) = slot.upgrade() {
        return tables;
    }
    let tables = Arc::new(Tables::build());
    *slot = Arc::downgrade(&tables);
    log::debug!("built scan and context tables");
    tables
}

/// Immutable lookup tables shared by all decode threads
#[derive(Debug)]
pub struct Tables {
    /// `scans[log2_blk][scan_idx]` for 1x1, 2x2, 4x4 and 8x8 grids
    scans: [[Vec<(u8, u8)>; 3]; 4],
    /// Flattened significance context increments, see [`Tables::sig_ctx_inc`]
    sig_ctx: Vec<u8>,
    /// Wedge patterns for block sizes 4, 8, 16, 32
    wedges: [Vec<Wedgelet>; 4],
}

impl Tables {
    fn build() -> Self {
        let scans = core::array::from_fn(|log2| {
            let size = 1u32 << log2;
            [
                up_right_diagonal(size),
                horizontal_scan(size),
                vertical_scan(size),
            ]
        });
        Self {
            scans,
            sig_ctx: build_sig_ctx(),
            wedges: core::array::from_fn(|i| build_wedges(4 << i)),
        }
    }

    /// Scan positions (x, y) for a square grid of `1 << log2_blk` (0..=3)
    pub fn scan(&self, log2_blk: u8, scan_idx: usize) -> &[(u8, u8)] {
        &self.scans[log2_blk as usize][scan_idx]
    }

    /// Context increment of `sig_coeff_flag` (chroma offset included)
    ///
    /// `prev_csbf` holds the coded flag of the right sub-block in bit 0
    /// and the one below in bit 1. (xp, yp) is the position inside the
    /// 4x4 sub-block, `dc_sub_block` is true for sub-block (0, 0).
    #[allow(clippy::too_many_arguments)]
    pub fn sig_ctx_inc(
        &self,
        log2_size: u8,
        chroma: bool,
        scan_idx: usize,
        prev_csbf: u8,
        dc_sub_block: bool,
        xp: u8,
        yp: u8,
    ) -> u8 {
        self.sig_ctx[sig_ctx_index(
            log2_size,
            chroma,
            scan_idx,
            prev_csbf,
            dc_sub_block,
            (yp * 4 + xp) as usize,
        )]
    }

    /// Wedge partition patterns for a block of `1 << log2_size` (2..=5)
    pub fn wedge_patterns(&self, log2_size: u8) -> &[Wedgelet] {
        &self.wedges[(log2_size.clamp(2, 5) - 2) as usize]
    }
}

/// Up-right diagonal scan of a `size` x `size` block
pub(crate) fn up_right_diagonal(size: u32) -> Vec<(u8, u8)> {
    let mut out = Vec::with_capacity((size * size) as usize);
    let (mut x, mut y) = (0i32, 0i32);
    let size = size as i32;
    while out.len() < (size * size) as usize {
        while y >= 0 {
            if x < size && y < size {
                out.push((x as u8, y as u8));
            }
            y -= 1;
            x += 1;
        }
        y = x;
        x = 0;
    }
    out
}

fn horizontal_scan(size: u32) -> Vec<(u8, u8)> {
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x as u8, y as u8)))
        .collect()
}

fn vertical_scan(size: u32) -> Vec<(u8, u8)> {
    (0..size)
        .flat_map(|x| (0..size).map(move |y| (x as u8, y as u8)))
        .collect()
}

fn sig_ctx_index(
    log2_size: u8,
    chroma: bool,
    scan_idx: usize,
    prev_csbf: u8,
    dc_sub_block: bool,
    pos: usize,
) -> usize {
    let mut idx = (log2_size.clamp(2, 5) - 2) as usize;
    idx = idx * 2 + usize::from(chroma);
    idx = idx * 3 + scan_idx;
    idx = idx * 4 + (prev_csbf & 3) as usize;
    idx = idx * 2 + usize::from(dc_sub_block);
    idx * 16 + pos
}

fn build_sig_ctx() -> Vec<u8> {
    let mut table = vec![0u8; 4 * 2 * 3 * 4 * 2 * 16];
    for log2_size in 2u8..=5 {
        for chroma in [false, true] {
            for scan_idx in 0..3 {
                for prev_csbf in 0u8..4 {
                    for dc_sub_block in [false, true] {
                        for pos in 0..16usize {
                            let (xp, yp) = ((pos & 3) as u8, (pos >> 2) as u8);
                            let sig = sig_ctx(log2_size, chroma, scan_idx, prev_csbf, dc_sub_block, xp, yp);
                            let inc = if chroma { 27 + sig } else { sig };
                            table[sig_ctx_index(log2_size, chroma, scan_idx, prev_csbf, dc_sub_block, pos)] =
                                inc;
                        }
                    }
                }
            }
        }
    }
    table
}

fn sig_ctx(
    log2_size: u8,
    chroma: bool,
    scan_idx: usize,
    prev_csbf: u8,
    dc_sub_block: bool,
    xp: u8,
    yp: u8,
) -> u8 {
    if log2_size == 2 {
        return CTX_IDX_MAP[(yp * 4 + xp) as usize];
    }
    if dc_sub_block && xp == 0 && yp == 0 {
        return 0;
    }
    let mut sig = match prev_csbf {
        0 => match xp + yp {
            0 => 2,
            1 | 2 => 1,
            _ => 0,
        },
        1 => match yp {
            0 => 2,
            1 => 1,
            _ => 0,
        },
        2 => match xp {
            0 => 2,
            1 => 1,
            _ => 0,
        },
        _ => 2,
    };
    if !chroma {
        if !dc_sub_block {
            sig += 3;
        }
        if log2_size == 3 {
            sig += if scan_idx == SCAN_DIAG { 9 } else { 15 };
        } else {
            sig += 21;
        }
    } else if log2_size == 3 {
        sig += 9;
    } else {
        sig += 12;
    }
    sig
}

/// One wedge partition of a square block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wedgelet {
    /// Orientation (0..6): which pair of block edges the line joins
    pub orientation: u8,
    /// Line start (x, y) in samples
    pub start: (u8, u8),
    /// Line end (x, y) in samples
    pub end: (u8, u8),
    size: u8,
    bits: Vec<u64>,
}

impl Wedgelet {
    /// Block size in samples
    pub fn size(&self) -> u32 {
        u32::from(self.size)
    }

    /// Partition of sample (x, y): `true` for the region containing the line
    pub fn get(&self, x: u32, y: u32) -> bool {
        let i = (y * u32::from(self.size) + x) as usize;
        self.bits[i / 64] >> (i % 64) & 1 != 0
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Top,
    Right,
    Bottom,
    Left,
}

const ORIENTATIONS: [(Edge, Edge); 6] = [
    (Edge::Top, Edge::Left),
    (Edge::Top, Edge::Right),
    (Edge::Right, Edge::Bottom),
    (Edge::Bottom, Edge::Left),
    (Edge::Top, Edge::Bottom),
    (Edge::Left, Edge::Right),
];

fn edge_point(edge: Edge, i: i32, size: i32) -> (i32, i32) {
    match edge {
        Edge::Top => (i, 0),
        Edge::Right => (size - 1, i),
        Edge::Bottom => (size - 1 - i, size - 1),
        Edge::Left => (0, size - 1 - i),
    }
}

fn build_wedges(size: u32) -> Vec<Wedgelet> {
    let n = size as i32;
    let step = match size {
        4 | 8 => 1,
        16 => 2,
        _ => 4,
    };
    let words = (size * size).div_ceil(64) as usize;
    let mut seen: HashSet<Vec<u64>> = HashSet::new();
    let mut out = Vec::new();

    for (orientation, &(edge_a, edge_b)) in ORIENTATIONS.iter().enumerate() {
        for i in (0..n).step_by(step) {
            for j in (0..n).step_by(step) {
                let start = edge_point(edge_a, i, n);
                let end = edge_point(edge_b, j, n);
                if start == end {
                    continue;
                }
                let bits = rasterize(start, end, n, words);
                let ones: u32 = bits.iter().map(|w| w.count_ones()).sum();
                if ones == 0 || ones == size * size {
                    continue;
                }
                let inverse = invert(&bits, size * size);
                if seen.contains(&bits) || seen.contains(&inverse) {
                    continue;
                }
                seen.insert(bits.clone());
                out.push(Wedgelet {
                    orientation: orientation as u8,
                    start: (start.0 as u8, start.1 as u8),
                    end: (end.0 as u8, end.1 as u8),
                    size: size as u8,
                    bits,
                });
            }
        }
    }
    out
}

/// Line samples (Bresenham) plus every sample on the positive side of the line
fn rasterize(start: (i32, i32), end: (i32, i32), n: i32, words: usize) -> Vec<u64> {
    let mut bits = vec![0u64; words];
    let mut set = |x: i32, y: i32| {
        let i = (y * n + x) as usize;
        bits[i / 64] |= 1 << (i % 64);
    };

    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    for y in 0..n {
        for x in 0..n {
            if dx * (y - start.1) - dy * (x - start.0) > 0 {
                set(x, y);
            }
        }
    }

    let (mut x, mut y) = start;
    let sx = if dx >= 0 { 1 } else { -1 };
    let sy = if dy >= 0 { 1 } else { -1 };
    let (adx, ady) = (dx.abs(), -dy.abs());
    let mut err = adx + ady;
    loop {
        set(x, y);
        if (x, y) == end {
            break;
        }
        let e2 = 2 * err;
        if e2 >= ady {
            err += ady;
            x += sx;
        }
        if e2 <= adx {
            err += adx;
            y += sy;
        }
    }
    bits
}

fn invert(bits: &[u64], len: u32) -> Vec<u64> {
    bits.iter()
        .enumerate()
        .map(|(w, &word)| {
            let valid = len.saturating_sub(w as u32 * 64).min(64);
            let mask = if valid == 64 { u64::MAX } else { (1u64 << valid) - 1 };
            !word & mask
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_scan_4x4() {
        let scan = up_right_diagonal(4);
        assert_eq!(&scan[..6], &[(0, 0), (0, 1), (1, 0), (0, 2), (1, 1), (2, 0)]);
        assert_eq!(scan[15], (3, 3));
    }

    #[test]
    fn test_scans_are_permutations() {
        let tables = acquire();
        for log2 in 0..4u8 {
            for scan_idx in 0..3 {
                let scan = tables.scan(log2, scan_idx);
                let n = 1usize << log2;
                let mut seen = vec![false; n * n];
                for &(x, y) in scan {
                    seen[y as usize * n + x as usize] = true;
                }
                assert!(seen.iter().all(|&s| s));
            }
        }
        assert_eq!(tables.scan(1, SCAN_HORIZ), &[(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert_eq!(tables.scan(1, SCAN_VERT), &[(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_sig_ctx_values() {
        let t = acquire();
        // 4x4 luma uses the fixed position map
        assert_eq!(t.sig_ctx_inc(2, false, SCAN_DIAG, 0, true, 3, 3), 8);
        // DC of a larger block
        assert_eq!(t.sig_ctx_inc(4, false, SCAN_DIAG, 3, true, 0, 0), 0);
        // 8x8 luma, no coded neighbours, first position off-DC: 1 + 9
        assert_eq!(t.sig_ctx_inc(3, false, SCAN_DIAG, 0, true, 1, 0), 10);
        // 8x8 luma horizontal scan, not the DC sub-block: 2 + 3 + 15
        assert_eq!(t.sig_ctx_inc(3, false, SCAN_HORIZ, 1, false, 2, 0), 20);
        // 16x16 chroma, both neighbours coded: 27 + 2 + 12
        assert_eq!(t.sig_ctx_inc(4, true, SCAN_DIAG, 3, false, 3, 3), 41);
        // 4x4 chroma
        assert_eq!(t.sig_ctx_inc(2, true, SCAN_DIAG, 0, true, 0, 0), 27);
    }

    #[test]
    fn test_acquire_shares_while_alive() {
        let a = acquire();
        let b = acquire();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_wedge_patterns_are_proper_and_unique() {
        let tables = acquire();
        for log2 in 2u8..=5 {
            let wedges = tables.wedge_patterns(log2);
            assert!(!wedges.is_empty());
            let n = 1u32 << log2;
            let mut seen = HashSet::new();
            for w in wedges {
                assert_eq!(w.size(), n);
                let ones = (0..n * n).filter(|&i| w.get(i % n, i / n)).count() as u32;
                assert!(ones > 0 && ones < n * n);
                assert!(w.get(u32::from(w.start.0), u32::from(w.start.1)));
                assert!(w.get(u32::from(w.end.0), u32::from(w.end.1)));
                assert!(seen.insert(w.bits.clone()));
                assert!(w.orientation < 6);
            }
        }
    }
}
