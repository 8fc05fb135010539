//! Shared sample planes and metadata grids
//!
//! Every cell is an atomic so that the substreams of one picture can write
//! their own CTUs while readers (neighbour lookups, motion compensation
//! from later pictures) observe finished ones. Cell accesses are relaxed;
//! ordering between a writer and a reader comes from the per-CTU progress
//! counters, which publish with release and are read with acquire.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

/// A plane of samples (up to 16 bits each)
#[derive(Debug)]
pub struct SamplePlane {
    width: u32,
    height: u32,
    data: Box<[AtomicU16]>,
}

impl SamplePlane {
    /// Allocate a plane filled with `fill`
    pub fn new(width: u32, height: u32, fill: u16) -> Self {
        let data = (0..width as usize * height as usize)
            .map(|_| AtomicU16::new(fill))
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Plane width in samples
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Plane height in samples
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sample at (x, y); must be inside the plane
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.data[(y * self.width + x) as usize].load(Ordering::Relaxed)
    }

    /// Sample at (x, y) with coordinates clamped to the plane
    #[inline]
    pub fn get_clamped(&self, x: i32, y: i32) -> u16 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.get(x, y)
    }

    /// Store a sample; out-of-plane writes are ignored
    #[inline]
    pub fn set(&self, x: u32, y: u32, value: u16) {
        if x < self.width && y < self.height {
            self.data[(y * self.width + x) as usize].store(value, Ordering::Relaxed);
        }
    }

    /// Overwrite every sample
    pub fn fill(&self, value: u16) {
        for s in self.data.iter() {
            s.store(value, Ordering::Relaxed);
        }
    }

    /// Copy the plane out in raster order
    pub fn to_vec(&self) -> Vec<u16> {
        self.data.iter().map(|s| s.load(Ordering::Relaxed)).collect()
    }
}

/// A metadata record that packs into 128 bits
pub trait CellValue: Copy + Default {
    /// Pack into two words
    fn pack(self) -> u128;
    /// Inverse of [`CellValue::pack`]
    fn unpack(bits: u128) -> Self;
}

/// A grid of metadata cells covering the picture at `1 << log2_unit` luma
/// samples per cell side
pub struct MetaGrid<T> {
    width: u32,
    height: u32,
    log2_unit: u8,
    cells: Box<[[AtomicU64; 2]]>,
    _record: PhantomData<fn() -> T>,
}

impl<T> core::fmt::Debug for MetaGrid<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MetaGrid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("log2_unit", &self.log2_unit)
            .finish()
    }
}

impl<T: CellValue> MetaGrid<T> {
    /// Grid covering a `pic_width` x `pic_height` luma area
    pub fn new(pic_width: u32, pic_height: u32, log2_unit: u8) -> Self {
        let unit = 1u32 << log2_unit;
        let width = pic_width.div_ceil(unit);
        let height = pic_height.div_ceil(unit);
        let empty = T::default().pack();
        let cells = (0..width as usize * height as usize)
            .map(|_| {
                [
                    AtomicU64::new(empty as u64),
                    AtomicU64::new((empty >> 64) as u64),
                ]
            })
            .collect();
        Self {
            width,
            height,
            log2_unit,
            cells,
            _record: PhantomData,
        }
    }

    /// Log2 of the cell side in luma samples
    pub fn log2_unit(&self) -> u8 {
        self.log2_unit
    }

    /// Grid width in cells
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Record owning luma sample (x, y); the position must be inside the picture
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.get_cell(x >> self.log2_unit, y >> self.log2_unit)
    }

    /// Record of cell (cx, cy)
    #[inline]
    pub fn get_cell(&self, cx: u32, cy: u32) -> T {
        let cell = &self.cells[(cy * self.width + cx) as usize];
        let lo = cell[0].load(Ordering::Relaxed) as u128;
        let hi = cell[1].load(Ordering::Relaxed) as u128;
        T::unpack(lo | hi << 64)
    }

    /// Write `value` to every cell overlapping the luma rectangle
    pub fn set_rect(&self, x: u32, y: u32, w: u32, h: u32, value: T) {
        let bits = value.pack();
        let (lo, hi) = (bits as u64, (bits >> 64) as u64);
        let x0 = x >> self.log2_unit;
        let y0 = y >> self.log2_unit;
        let x1 = ((x + w).div_ceil(1 << self.log2_unit)).min(self.width);
        let y1 = ((y + h).div_ceil(1 << self.log2_unit)).min(self.height);
        for cy in y0..y1 {
            let row = (cy * self.width) as usize;
            for cell in &self.cells[row + x0 as usize..row + x1 as usize] {
                cell[0].store(lo, Ordering::Relaxed);
                cell[1].store(hi, Ordering::Relaxed);
            }
        }
    }

    /// Apply `f` to every cell overlapping the luma rectangle
    pub fn update_rect(&self, x: u32, y: u32, w: u32, h: u32, mut f: impl FnMut(&mut T)) {
        let x0 = x >> self.log2_unit;
        let y0 = y >> self.log2_unit;
        let x1 = ((x + w).div_ceil(1 << self.log2_unit)).min(self.width);
        let y1 = ((y + h).div_ceil(1 << self.log2_unit)).min(self.height);
        for cy in y0..y1 {
            for cx in x0..x1 {
                let mut v = self.get_cell(cx, cy);
                f(&mut v);
                let bits = v.pack();
                let cell = &self.cells[(cy * self.width + cx) as usize];
                cell[0].store(bits as u64, Ordering::Relaxed);
                cell[1].store((bits >> 64) as u64, Ordering::Relaxed);
            }
        }
    }

    /// Reset every cell to the default record
    pub fn reset(&self) {
        let empty = T::default().pack();
        for cell in self.cells.iter() {
            cell[0].store(empty as u64, Ordering::Relaxed);
            cell[1].store((empty >> 64) as u64, Ordering::Relaxed);
        }
    }
}
