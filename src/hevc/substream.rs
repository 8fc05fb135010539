//! Slice segment scheduling over tiles and wavefront rows
//!
//! A slice segment is split at its entry points into substreams. Tile
//! substreams are independent; wavefront substreams (one per CTB row of a
//! tile) start from the context snapshot taken after the second CTU of the
//! row above and wait on the progress of the CTU above-right before every
//! CTU. Substreams are handed to a bounded rayon pool, worker `w` taking
//! substreams `w`, `w + n`, ..., which keeps every wait pointing at a
//! substream that is already running. The result is identical for any
//! worker count.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::OnceLock;

use enough::Stop;
use whereat::At;

use super::availability::zscan_available;
use super::ctu::{CtuDecoder, EntropyState, SliceContext};
use super::params::{PictureLayout, Pps, ScalingFactors, Sps};
use super::picture::{CtuInfo, Integrity, Picture, PicturePool, SliceRefInfo};
use super::progress::PROGRESS_RECONSTRUCTED;
use super::slice::{MergeExtensionSource, RefPicList, SliceHeader};
use super::tables::{self, Tables};
use crate::DecoderConfig;
use crate::error::{HevcError, check_stop};

type Result<T> = core::result::Result<T, HevcError>;

/// Bytes a substream may be read past its end before it counts as truncated
const MAX_OVERRUN: usize = 2;

/// Idle pictures kept for reuse
const POOL_CAPACITY: usize = 4;

/// How a substream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstreamEnd {
    /// end_of_slice_segment_flag was set
    EndOfSliceSegment,
    /// The substream reached a tile or wavefront row boundary
    EndOfSubstream,
}

type SubstreamResult = Result<(SubstreamEnd, EntropyState)>;

/// One entry-point delimited part of a slice segment
#[derive(Debug, Clone, Copy)]
struct Substream<'d> {
    index: usize,
    start_ts: u32,
    /// First CTB (tile scan) of the next substream, or the picture end
    end_ts: u32,
    data: &'d [u8],
}

fn is_row_start(layout: &PictureLayout, rs: u32) -> bool {
    let x = rs % layout.width_in_ctbs;
    x == layout.col_bd[layout.tile_column(x)]
}

fn is_substream_start(layout: &PictureLayout, pps: &Pps, ts: u32) -> bool {
    let rs = layout.ts_to_rs(ts);
    (pps.tiles_enabled_flag && layout.is_tile_start(rs))
        || (pps.entropy_coding_sync_enabled_flag && is_row_start(layout, rs))
}

/// Split slice data at the entry points (byte sizes of every substream but the last)
fn split_substreams<'d>(
    layout: &PictureLayout,
    pps: &Pps,
    header: &SliceHeader,
    data: &'d [u8],
) -> Result<Vec<Substream<'d>>> {
    let num_ctbs = layout.num_ctbs();
    let next_boundary = |from: u32| {
        (from + 1..num_ctbs)
            .find(|&ts| is_substream_start(layout, pps, ts))
            .unwrap_or(num_ctbs)
    };

    let mut starts = Vec::with_capacity(header.entry_point_sizes.len() + 1);
    starts.push(layout.rs_to_ts(header.segment_address));
    for _ in &header.entry_point_sizes {
        let Some(&last) = starts.last() else { break };
        let next = next_boundary(last);
        if next >= num_ctbs {
            return Err(HevcError::InvalidBitstream(
                "more entry points than substream boundaries",
            ));
        }
        starts.push(next);
    }

    let mut substreams = Vec::with_capacity(starts.len());
    let mut offset = 0usize;
    for (index, &start_ts) in starts.iter().enumerate() {
        let len = match header.entry_point_sizes.get(index) {
            Some(&size) => size as usize,
            None => data.len().saturating_sub(offset),
        };
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= data.len())
            .ok_or(HevcError::InvalidBitstream("entry point beyond the slice data"))?;
        substreams.push(Substream {
            index,
            start_ts,
            end_ts: starts.get(index + 1).copied().unwrap_or_else(|| next_boundary(start_ts)),
            data: &data[offset..end],
        });
        offset = end;
    }
    Ok(substreams)
}

/// Decoder for whole pictures: owns the worker pool, the shared tables
/// and the picture pool
pub struct PictureDecoder {
    config: DecoderConfig,
    tables: Arc<Tables>,
    pool: PicturePool,
    workers: Option<rayon::ThreadPool>,
}

impl core::fmt::Debug for PictureDecoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PictureDecoder")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("workers", &self.workers.as_ref().map(|w| w.current_num_threads()))
            .finish()
    }
}

impl PictureDecoder {
    /// Create a decoder; the worker pool is built unless decoding is sequential
    pub fn new(config: DecoderConfig) -> Self {
        let workers = if config.force_sequential || config.threads == 1 {
            None
        } else {
            let mut builder = rayon::ThreadPoolBuilder::new()
                .thread_name(|i| alloc::format!("hevc-substream-{i}"));
            if config.threads > 0 {
                builder = builder.num_threads(config.threads);
            }
            match builder.build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("substream worker pool unavailable, decoding sequentially: {e}");
                    None
                }
            }
        };
        Self {
            config,
            tables: tables::acquire(),
            pool: PicturePool::new(POOL_CAPACITY),
            workers,
        }
    }

    /// Configuration this decoder was built with
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Start reconstructing a picture coded with `sps` / `pps`
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter sets are invalid or the picture
    /// exceeds the configured limits.
    pub fn begin_picture(&self, sps: &Sps, pps: &Pps, poc: i32) -> crate::Result<FrameDecode<'_>> {
        self.config
            .limits
            .check(sps.pic_width_in_luma_samples, sps.pic_height_in_luma_samples)
            .map_err(At::from)?;
        let layout = PictureLayout::new(sps, pps)?;

        let scaling = sps.scaling_list_enabled_flag.then(|| {
            pps.scaling_list
                .as_ref()
                .or(sps.scaling_list.as_ref())
                .cloned()
                .unwrap_or_default()
                .factors()
        });
        let picture = self.pool.acquire(sps, poc);
        log::debug!(
            "begin picture POC {poc}: {}x{}, {} CTBs",
            sps.pic_width_in_luma_samples,
            sps.pic_height_in_luma_samples,
            layout.num_ctbs()
        );

        Ok(FrameDecode {
            decoder: self,
            sps: sps.clone(),
            pps: pps.clone(),
            wpp_states: (0..layout.num_ctbs()).map(|_| OnceLock::new()).collect(),
            layout,
            scaling,
            picture,
            carried: None,
            extensions: None,
            finished: false,
        })
    }

    /// Return a picture to the pool once no references remain
    pub fn recycle(&self, picture: Arc<Picture>) -> bool {
        self.pool.recycle(picture)
    }
}

/// Reconstruction of one picture, fed slice segment by slice segment
pub struct FrameDecode<'d> {
    decoder: &'d PictureDecoder,
    sps: Sps,
    pps: Pps,
    layout: PictureLayout,
    scaling: Option<ScalingFactors>,
    picture: Arc<Picture>,
    /// Context snapshots after the second CTU of each wavefront row, by raster address
    wpp_states: Vec<OnceLock<Box<EntropyState>>>,
    /// State at the end of the previous segment, for a dependent segment
    carried: Option<EntropyState>,
    extensions: Option<Arc<dyn MergeExtensionSource>>,
    finished: bool,
}

impl FrameDecode<'_> {
    /// Picture under reconstruction
    pub fn picture(&self) -> &Arc<Picture> {
        &self.picture
    }

    /// CTB addressing of this picture
    pub fn layout(&self) -> &PictureLayout {
        &self.layout
    }

    /// Supply inter-view / texture merge candidates for following segments
    pub fn set_merge_extensions(&mut self, source: Arc<dyn MergeExtensionSource>) {
        self.extensions = Some(source);
    }

    /// Decode one slice segment of this picture
    ///
    /// `data` is the slice segment data after the header, without
    /// emulation prevention bytes. On error the segment's remaining CTUs
    /// stay undecoded and the picture finishes as `DecodingErrors`.
    ///
    /// # Errors
    ///
    /// Returns the first error of any substream in substream order.
    pub fn decode_slice_segment(
        &mut self,
        header: &SliceHeader,
        ref_lists: &[RefPicList; 2],
        data: &[u8],
    ) -> crate::Result<()> {
        let stop: &(dyn Stop + Sync) = match &self.decoder.config.stop {
            Some(s) => s.as_ref(),
            None => &enough::Unstoppable,
        };
        check_stop(stop)?;
        header.validate(ref_lists)?;
        if header.segment_address >= self.layout.num_ctbs() {
            return Err(HevcError::InvalidBitstream("slice segment address beyond the picture").into());
        }
        if header.dependent_slice_segment_flag && !self.pps.dependent_slice_segments_enabled_flag {
            return Err(HevcError::InvalidBitstream("dependent slice segments are not enabled").into());
        }
        if !header.entry_point_sizes.is_empty()
            && !self.pps.tiles_enabled_flag
            && !self.pps.entropy_coding_sync_enabled_flag
        {
            return Err(HevcError::InvalidBitstream("entry points without tiles or wavefronts").into());
        }

        let carried = if header.dependent_slice_segment_flag {
            Some(self.carried.take().ok_or(HevcError::InvalidBitstream(
                "dependent slice segment without a preceding segment",
            ))?)
        } else {
            self.carried = None;
            None
        };

        let substreams = split_substreams(&self.layout, &self.pps, header, data)?;
        let slice_index = self.picture.add_slice(SliceRefInfo {
            ref_poc: core::array::from_fn(|l| ref_lists[l].iter().map(|r| r.poc).collect()),
            long_term: core::array::from_fn(|l| ref_lists[l].iter().map(|r| r.long_term).collect()),
        });
        log::debug!(
            "slice segment at CTB {} ({:?}, QP {}): {} substream(s), {} bytes",
            header.segment_address,
            header.slice_type,
            header.slice_qp_y,
            substreams.len(),
            data.len()
        );

        let ctx = SliceContext {
            sps: &self.sps,
            pps: &self.pps,
            layout: &self.layout,
            header,
            ref_lists,
            pic: &self.picture,
            tables: &self.decoder.tables,
            scaling: self.scaling.as_ref(),
            extensions: self.extensions.as_deref(),
            slice_index,
        };
        let job = SegmentJob {
            ctx: &ctx,
            stop,
            wpp: self.pps.entropy_coding_sync_enabled_flag,
            wpp_states: &self.wpp_states,
            carried: carried.as_ref(),
            segment_start_ts: substreams.first().map_or(0, |s| s.start_ts),
        };

        let slots: Vec<OnceLock<SubstreamResult>> = substreams.iter().map(|_| OnceLock::new()).collect();
        match &self.decoder.workers {
            Some(pool) if substreams.len() > 1 => {
                let n = pool.current_num_threads().min(substreams.len()).max(1);
                pool.scope(|scope| {
                    for w in 0..n {
                        let (job, substreams, slots) = (&job, &substreams, &slots);
                        scope.spawn(move |_| {
                            for k in (w..substreams.len()).step_by(n) {
                                let _ = slots[k].set(job.run(&substreams[k]));
                            }
                        });
                    }
                });
            }
            _ => {
                for (sub, slot) in substreams.iter().zip(&slots) {
                    let _ = slot.set(job.run(sub));
                }
            }
        }

        let last = substreams.len() - 1;
        let mut first_error = None;
        for (i, slot) in slots.into_iter().enumerate() {
            let result = slot
                .into_inner()
                .unwrap_or(Err(HevcError::InvalidBitstream("substream was not scheduled")));
            let outcome = match result {
                Ok((SubstreamEnd::EndOfSliceSegment, state)) if i == last => {
                    if self.pps.dependent_slice_segments_enabled_flag {
                        self.carried = Some(state);
                    }
                    Ok(())
                }
                Ok((SubstreamEnd::EndOfSliceSegment, _)) => Err(HevcError::InvalidBitstream(
                    "slice segment ended before its last entry point",
                )),
                Ok((SubstreamEnd::EndOfSubstream, _)) if i == last => Err(HevcError::InvalidBitstream(
                    "slice segment crosses a substream boundary without an entry point",
                )),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => {
                self.picture.degrade(Integrity::DecodingErrors);
                Err(e.into())
            }
            None => Ok(()),
        }
    }

    /// Finish the picture: compute its integrity and release all waiters
    pub fn finish(mut self) -> Arc<Picture> {
        self.finished = true;
        let integrity = self.picture.finish_decoding();
        log::debug!("picture POC {} finished: {integrity:?}", self.picture.poc());
        Arc::clone(&self.picture)
    }
}

impl Drop for FrameDecode<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.picture.finish_decoding();
        }
    }
}

/// Shared state of the substreams of one slice segment
struct SegmentJob<'a> {
    ctx: &'a SliceContext<'a>,
    stop: &'a (dyn Stop + Sync),
    wpp: bool,
    wpp_states: &'a [OnceLock<Box<EntropyState>>],
    carried: Option<&'a EntropyState>,
    segment_start_ts: u32,
}

impl SegmentJob<'_> {
    fn run(&self, sub: &Substream<'_>) -> SubstreamResult {
        let mut ts = sub.start_ts;
        let result = self.decode_substream(sub, &mut ts);
        if let Err(e) = &result {
            log::warn!("substream {} failed at CTB {}: {e}", sub.index, self.ctx.layout.ts_to_rs(ts));
            // release CTUs the failed substream will never reach
            let layout = self.ctx.layout;
            self.ctx
                .pic
                .progress()
                .signal_many((ts..sub.end_ts).map(|t| layout.ts_to_rs(t)), PROGRESS_RECONSTRUCTED);
        }
        result
    }

    fn ctu_info(&self, rs: u32, decoded: bool) -> CtuInfo {
        CtuInfo {
            slice_addr: self.ctx.header.slice_address,
            slice_index: self.ctx.slice_index,
            tile_id: self.ctx.layout.tile_id_rs(rs),
            decoded,
        }
    }

    fn decode_substream(&self, sub: &Substream<'_>, ts: &mut u32) -> SubstreamResult {
        let ctx = self.ctx;
        let layout = ctx.layout;
        let pic = ctx.pic;

        let first_rs = layout.ts_to_rs(sub.start_ts);
        pic.set_ctu_info(first_rs, self.ctu_info(first_rs, false));
        let (state, restart_qp) = self.initial_state(sub, first_rs)?;
        let mut decoder = CtuDecoder::new(ctx, sub.data, state);
        if !restart_qp {
            decoder.continue_qp_prediction();
        }
        log::trace!("substream {} starts at CTB {first_rs}", sub.index);

        loop {
            check_stop(self.stop)?;
            let rs = layout.ts_to_rs(*ts);
            pic.set_ctu_info(rs, self.ctu_info(rs, false));
            if self.wpp {
                self.wait_above_right(rs)?;
            }

            decoder.decode_ctu(rs)?;
            if decoder.overrun() > MAX_OVERRUN {
                return Err(HevcError::CabacError("substream data exhausted"));
            }
            if self.wpp && self.is_sync_storage_ctu(rs) {
                let _ = self.wpp_states[rs as usize].set(Box::new(decoder.entropy_state()));
            }
            let end_of_segment = decoder.end_of_slice_segment();
            pic.set_ctu_info(rs, self.ctu_info(rs, true));
            pic.progress().signal(rs, PROGRESS_RECONSTRUCTED);
            log::trace!("CTB {rs} reconstructed");
            *ts += 1;

            if end_of_segment {
                return Ok((SubstreamEnd::EndOfSliceSegment, decoder.entropy_state()));
            }
            if *ts >= layout.num_ctbs() {
                return Err(HevcError::InvalidBitstream("slice segment runs past the last CTB"));
            }
            if *ts >= sub.end_ts {
                decoder.end_of_subset()?;
                return Ok((SubstreamEnd::EndOfSubstream, decoder.entropy_state()));
            }
        }
    }

    /// Context state a substream starts from (9.3.1), and whether QP
    /// prediction restarts from SliceQpY
    fn initial_state(&self, sub: &Substream<'_>, rs: u32) -> Result<(EntropyState, bool)> {
        let ctx = self.ctx;
        let layout = ctx.layout;
        let fresh = || EntropyState::new(ctx.header);

        if layout.is_tile_start(rs) {
            return Ok((fresh(), true));
        }
        if self.wpp && is_row_start(layout, rs) {
            let w = layout.width_in_ctbs;
            let (x, y) = (rs % w, rs / w);
            let (_, tile_y0, tile_x1, _) = layout.tile_bounds(x, y);
            if y > tile_y0 && x + 1 < tile_x1 {
                let tr = (y - 1) * w + x + 1;
                if layout.rs_to_ts(tr) >= self.segment_start_ts {
                    ctx.pic.progress().wait_for(tr, PROGRESS_RECONSTRUCTED)?;
                }
                let log2 = layout.log2_ctb_size;
                let available = zscan_available(
                    ctx.pic,
                    layout,
                    x << log2,
                    y << log2,
                    ((x + 1) << log2) as i32,
                    ((y - 1) << log2) as i32,
                );
                if let Some(saved) = self.wpp_states[tr as usize].get().filter(|_| available) {
                    let mut state = EntropyState::clone(saved);
                    state.qp_y = ctx.header.slice_qp_y;
                    return Ok((state, true));
                }
            }
            // no above-right CTB to sync from: a row start never inherits a
            // dependent segment's state
            return Ok((fresh(), true));
        }
        if sub.index == 0 {
            if let Some(carried) = self.carried {
                return Ok((carried.clone(), false));
            }
        }
        Ok((fresh(), true))
    }

    /// Second CTB of a row within its tile
    fn is_sync_storage_ctu(&self, rs: u32) -> bool {
        let layout = self.ctx.layout;
        let x = rs % layout.width_in_ctbs;
        x == layout.col_bd[layout.tile_column(x)] + 1
    }

    /// Block until the CTU above-right (above, in the last tile column) is done
    fn wait_above_right(&self, rs: u32) -> Result<()> {
        let layout = self.ctx.layout;
        let w = layout.width_in_ctbs;
        let (x, y) = (rs % w, rs / w);
        let (_, tile_y0, tile_x1, _) = layout.tile_bounds(x, y);
        if y == tile_y0 {
            return Ok(());
        }
        let dep_x = if x + 1 < tile_x1 { x + 1 } else { x };
        let dep = (y - 1) * w + dep_x;
        if layout.rs_to_ts(dep) >= self.segment_start_ts {
            self.ctx.pic.progress().wait_for(dep, PROGRESS_RECONSTRUCTED)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hevc::params::TileInfo;

    fn layout(w: u32, h: u32, pps: &Pps) -> PictureLayout {
        let sps = Sps {
            pic_width_in_luma_samples: w,
            pic_height_in_luma_samples: h,
            log2_diff_max_min_luma_coding_block_size: 1,
            log2_diff_max_min_luma_transform_block_size: 2,
            ..Sps::default()
        };
        PictureLayout::new(&sps, pps).unwrap()
    }

    #[test]
    fn test_single_substream_takes_all_data() {
        let pps = Pps::default();
        let layout = layout(64, 32, &pps);
        let header = SliceHeader::default();
        let data = [1u8, 2, 3];
        let subs = split_substreams(&layout, &pps, &header, &data).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].data, &data);
        assert_eq!(subs[0].end_ts, layout.num_ctbs());
    }

    #[test]
    fn test_wavefront_rows_split_at_entry_points() {
        let pps = Pps {
            entropy_coding_sync_enabled_flag: true,
            ..Pps::default()
        };
        // 16x16 CTBs: 4 columns, 2 rows
        let layout = layout(64, 32, &pps);
        let header = SliceHeader {
            entry_point_sizes: vec![2],
            ..SliceHeader::default()
        };
        let data = [1u8, 2, 3, 4, 5];
        let subs = split_substreams(&layout, &pps, &header, &data).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!((subs[0].start_ts, subs[0].end_ts), (0, 4));
        assert_eq!((subs[1].start_ts, subs[1].end_ts), (4, 8));
        assert_eq!(subs[0].data, &[1, 2]);
        assert_eq!(subs[1].data, &[3, 4, 5]);
    }

    #[test]
    fn test_tile_substreams_follow_tile_scan() {
        let pps = Pps {
            tiles_enabled_flag: true,
            tile_info: Some(TileInfo::uniform(2, 1)),
            ..Pps::default()
        };
        let layout = layout(64, 32, &pps);
        let header = SliceHeader {
            entry_point_sizes: vec![1],
            ..SliceHeader::default()
        };
        let subs = split_substreams(&layout, &pps, &header, &[9, 8]).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].start_ts, 4);
        assert_eq!(layout.ts_to_rs(subs[1].start_ts), 2);
    }

    #[test]
    fn test_entry_point_errors() {
        let pps = Pps {
            entropy_coding_sync_enabled_flag: true,
            ..Pps::default()
        };
        let layout = layout(64, 32, &pps);
        let too_long = SliceHeader {
            entry_point_sizes: vec![10],
            ..SliceHeader::default()
        };
        assert!(split_substreams(&layout, &pps, &too_long, &[0; 4]).is_err());
        let too_many = SliceHeader {
            entry_point_sizes: vec![1, 1],
            ..SliceHeader::default()
        };
        assert!(split_substreams(&layout, &pps, &too_many, &[0; 4]).is_err());
    }

    #[test]
    fn test_row_start_inside_tiles() {
        let pps = Pps {
            tiles_enabled_flag: true,
            tile_info: Some(TileInfo::uniform(2, 1)),
            ..Pps::default()
        };
        let layout = layout(64, 32, &pps);
        assert!(is_row_start(&layout, 0));
        assert!(is_row_start(&layout, 2));
        assert!(!is_row_start(&layout, 1));
        assert!(is_row_start(&layout, 6));
    }
}
