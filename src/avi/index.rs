//! Index scanning: legacy `idx1` and OpenDML super/standard indexes.

use binrw::Endian;
use rayon::prelude::*;
use tracing::debug;

use crate::{
    container::{ContainerContext, IndexEntry},
    fields::{parse_struct, ByteStreamExt, FixedSize},
    format::EsType,
    DemuxError, PacketFlags, Result, SeekFlags,
};

use super::{
    chunks::*,
    cursor::{compare_seek_time, ChunkState},
    AviReader,
};

/// Last keyframe before the target: chunk state and chunk header position.
type Selected = Option<(ChunkState, u64)>;

impl AviReader {
    /// Scans `idx1` for `track`. Returns the position of the selected
    /// chunk header, updating the track's chunk state and `time`.
    ///
    /// A forward scan that runs past the last keyframe fails with
    /// `NotFound` on the `reference` track. Other tracks fall back to
    /// their last keyframe, as do backward scans over a truncated index.
    pub(super) fn scan_legacy_index(
        &mut self,
        ctx: &mut ContainerContext,
        track: usize,
        time: &mut i64,
        flags: SeekFlags,
        reference: bool,
    ) -> Result<u64> {
        let timing = self.tracks[track].timing;
        let is_video = ctx.tracks[track].es_type() == EsType::Video;

        let io = ctx.io.as_mut();
        io.seek(self.index_offset)?;

        let count = self.index_size as usize / Idx1Entry::SIZE;
        let mut base = self.data_offset;
        let mut selected_offset = self.data_offset + 4;
        let mut selected_chunk = ChunkState {
            time_pos: timing.time_start,
            ..Default::default()
        };
        let mut chunk = selected_chunk.clone();
        let mut extra = 0_i64;
        let mut encrypted = false;
        let mut found = false;
        let mut truncated = false;

        for i in 0..count {
            let entry: Idx1Entry = match io.read_struct(Endian::Little) {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("'idx1' entry {i} of {count} unreadable: {err}");
                    truncated = true;
                    break;
                }
            };

            // Offsets are relative to 'movi', except in files
            // that store absolute positions.
            if i == 0 && entry.offset as u64 > self.data_offset {
                debug!("'idx1' uses absolute offsets");
                base = 0;
            }

            if entry.flags & (AVIIF_LIST | AVIIF_NOTIME) != 0 {
                continue;
            }
            let Some((kind, entry_track)) = Self::check_track(&ctx.tracks, entry.chunk_id) else {
                continue;
            };
            if entry_track != track {
                continue;
            }
            if kind == DataChunkType::Drm {
                // Seek to the 'dd' chunk, not the data chunk after it.
                encrypted = true;
                extra = -(((entry.size as i64 + 1) & !1) + 8);
                continue;
            }

            let position = base as i64 + entry.offset as i64 + extra;
            extra = 0;
            if position <= self.data_offset as i64 {
                debug!("invalid 'idx1' entry, position {position}");
                return Err(DemuxError::invalid("'idx1' entry points before 'movi'"));
            }

            let keyframe = !is_video || entry.flags & AVIIF_KEYFRAME != 0;
            chunk.flags = match keyframe {
                true => PacketFlags::KEYFRAME,
                false => PacketFlags::empty(),
            };
            chunk.flags.set(PacketFlags::ENCRYPTED, encrypted);
            chunk.time_pos = timing.chunk_time(&chunk);

            let res = compare_seek_time(chunk.time_pos, *time, keyframe, flags);
            if res > 0 {
                found = true;
                break;
            }
            if keyframe {
                selected_chunk = chunk.clone();
                selected_offset = position as u64;
            }
            if res == 0 {
                found = true;
                break;
            }

            chunk.index += 1;
            chunk.offs += entry.size as u64;
            encrypted = false;
        }

        if !found && flags.contains(SeekFlags::FORWARD) {
            if reference || truncated {
                debug!("no keyframe after {}us on reference track {track}", *time);
                return Err(DemuxError::NotFound);
            }
            debug!("no keyframe after {}us on track {track}, using its last one", *time);
        }

        *time = selected_chunk.time_pos;
        self.tracks[track].chunk = selected_chunk;
        Ok(selected_offset)
    }

    /// Scans the OpenDML index of `track`, starting at its `indx` chunk.
    /// Past the last keyframe, the same fallback rules as for `idx1`
    /// apply.
    pub(super) fn scan_super_index(
        &mut self,
        ctx: &mut ContainerContext,
        track: usize,
        time: &mut i64,
        flags: SeekFlags,
        reference: bool,
    ) -> Result<u64> {
        let mut selected = None;
        match self.scan_index_of_indexes(ctx, track, time, flags, &mut selected) {
            Err(DemuxError::NotFound) if !flags.contains(SeekFlags::FORWARD) || !reference => {
                if flags.contains(SeekFlags::FORWARD) {
                    debug!("no keyframe after {}us on track {track}, using its last one", *time);
                }
                let (chunk, position) = selected.ok_or(DemuxError::NotFound)?;
                *time = chunk.time_pos;
                self.tracks[track].chunk = chunk;
                Ok(position)
            }
            other => other,
        }
    }

    fn scan_index_of_indexes(
        &mut self,
        ctx: &mut ContainerContext,
        track: usize,
        time: &mut i64,
        flags: SeekFlags,
        selected: &mut Selected,
    ) -> Result<u64> {
        let index_offset = self.tracks[track].index_offset;
        let index_size = self.tracks[track].index_size;

        let io = ctx.io.as_mut();
        io.seek(index_offset)?;
        let header: IndexHeader = io.read_struct(Endian::Little)?;

        match header.index_type {
            AVI_INDEX_OF_INDEXES => {
                self.check_index_header(ctx, track, &header, index_size)?;
                if header.longs_per_entry != 4 || header.index_sub_type != 0 {
                    debug!("unsupported super index layout");
                    return Err(DemuxError::FormatNotSupported);
                }
                let count = header
                    .entries_in_use
                    .min((index_size - IndexHeader::SIZE as u32) / SuperIndexEntry::SIZE as u32);

                for i in 0..count as u64 {
                    let io = ctx.io.as_mut();
                    io.seek(index_offset + IndexHeader::SIZE as u64 + i * SuperIndexEntry::SIZE as u64)?;
                    let entry: SuperIndexEntry = io.read_struct(Endian::Little)?;
                    if entry.offset == 0 {
                        debug!("super index entry {i} has no offset");
                        return Err(DemuxError::FormatNotSupported);
                    }
                    match self.scan_standard_index(ctx, track, entry.offset, time, flags, selected) {
                        Err(DemuxError::NotFound) => continue,
                        other => return other,
                    }
                }
                Err(DemuxError::NotFound)
            }
            // 'indx' holding the chunk index itself
            AVI_INDEX_OF_CHUNKS => {
                self.scan_standard_index(ctx, track, index_offset - 8, time, flags, selected)
            }
            other => {
                debug!("unsupported index type {other:#x}");
                Err(DemuxError::FormatNotSupported)
            }
        }
    }

    fn check_index_header(
        &self,
        ctx: &ContainerContext,
        track: usize,
        header: &IndexHeader,
        chunk_size: u32,
    ) -> Result<()> {
        let index_track = Self::check_track(&ctx.tracks, header.chunk_id).map(|(_, t)| t);
        if index_track != Some(track) || (chunk_size as usize) < IndexHeader::SIZE {
            debug!("index for '{}' does not match track {track}", header.chunk_id);
            return Err(DemuxError::invalid("index does not match its track"));
        }
        Ok(())
    }

    /// Scans the standard index chunk at `index_offset` (chunk header).
    fn scan_standard_index(
        &mut self,
        ctx: &mut ContainerContext,
        track: usize,
        index_offset: u64,
        time: &mut i64,
        flags: SeekFlags,
        selected: &mut Selected,
    ) -> Result<u64> {
        let timing = self.tracks[track].timing;
        let is_video = ctx.tracks[track].es_type() == EsType::Video;

        let io = ctx.io.as_mut();
        io.seek(index_offset)?;
        let chunk_id = io.read_fourcc()?;
        let chunk_size = io.read_u32_le()?;
        let header: IndexHeader = io.read_struct(Endian::Little)?;
        debug!("standard index '{chunk_id}', {} entries", header.entries_in_use);

        self.check_index_header(ctx, track, &header, chunk_size)?;
        if header.longs_per_entry != 2
            || header.index_sub_type != 0
            || header.index_type != AVI_INDEX_OF_CHUNKS
        {
            debug!("unsupported standard index layout");
            return Err(DemuxError::FormatNotSupported);
        }

        let count = header
            .entries_in_use
            .min((chunk_size - IndexHeader::SIZE as u32) / StandardIndexEntry::SIZE as u32);
        let mut chunk = self.tracks[track].chunk.clone();

        let io = ctx.io.as_mut();
        for _ in 0..count {
            let entry: StandardIndexEntry = io.read_struct(Endian::Little)?;
            // Entries point at chunk data.
            let position = (header.qword + entry.offset as u64).saturating_sub(8);
            let size = entry.size & !AVI_INDEX_DELTAFRAME;

            let keyframe = !is_video || entry.size & AVI_INDEX_DELTAFRAME == 0;
            chunk.flags = match keyframe {
                true => PacketFlags::KEYFRAME,
                false => PacketFlags::empty(),
            };
            chunk.time_pos = timing.chunk_time(&chunk);

            match compare_seek_time(chunk.time_pos, *time, keyframe, flags) {
                0 => {
                    *time = chunk.time_pos;
                    self.tracks[track].chunk = chunk;
                    return Ok(position);
                }
                1 => {
                    let (prev, prev_position) = selected.take().ok_or(DemuxError::NotFound)?;
                    *time = prev.time_pos;
                    self.tracks[track].chunk = prev;
                    return Ok(prev_position);
                }
                _ => (),
            }
            if keyframe {
                *selected = Some((chunk.clone(), position));
            }

            chunk.index += 1;
            chunk.offs += size as u64;
        }

        // Continues in the next standard index.
        self.tracks[track].chunk = chunk;
        Err(DemuxError::NotFound)
    }

    /// All `idx1` entries with a valid stream number, with absolute offsets.
    pub(super) fn legacy_index(&self, ctx: &mut ContainerContext) -> Result<Vec<IndexEntry>> {
        let io = ctx.io.as_mut();
        io.seek(self.index_offset)?;
        let buf = match io.read_vec(self.index_size as usize) {
            Err(DemuxError::Eos) => return Err(DemuxError::invalid("truncated 'idx1'")),
            other => other?,
        };

        let base = match buf.get(..Idx1Entry::SIZE) {
            Some(raw) => match parse_struct::<Idx1Entry>(raw, Endian::Little)?.offset as u64 > self.data_offset {
                true => 0,
                false => self.data_offset,
            },
            None => self.data_offset,
        };

        let entries = buf
            .par_chunks_exact(Idx1Entry::SIZE)
            .filter_map(|raw| parse_struct::<Idx1Entry>(raw, Endian::Little).ok())
            .filter_map(|entry| {
                let track = stream_number(entry.chunk_id)?;
                Some(IndexEntry {
                    track,
                    offset: base + entry.offset as u64,
                    size: entry.size,
                    keyframe: entry.flags & AVIIF_KEYFRAME != 0,
                    list: entry.flags & AVIIF_LIST != 0,
                    no_time: entry.flags & AVIIF_NOTIME != 0,
                })
            })
            .collect::<Vec<_>>();

        debug!("'idx1' holds {} entries", entries.len());
        Ok(entries)
    }
}
