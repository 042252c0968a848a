//! AVI (RIFF) reader, with OpenDML extensions.
//!
//! Layout:
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     avih
//!     LIST 'strl' (one per stream: strh, strf, [strd], [indx])
//!   LIST 'movi'
//!     ##dc / ##db / ##dd / ##wb, optionally grouped in LIST 'rec '
//!   idx1
//! RIFF 'AVIX' (OpenDML continuation)
//!   LIST 'movi' ...
//! ```

mod chunks;
mod cursor;
mod index;

use binrw::Endian;
use tracing::debug;

use crate::{
    container::{Capabilities, ContainerContext, Demuxer, IndexEntry},
    fields::{parse_struct, ByteStreamExt, FixedSize},
    format::{EsFormat, EsFormatFlags, EsType, Track},
    fourcc::codec,
    stream::{ByteStream, StreamStatus},
    DemuxError, FourCC, Packet, PacketFlags, ReadFlags, Result, SeekFlags, SeekMode,
};

use chunks::*;
use cursor::{ChunkState, StreamCursor, StreamState, TrackTiming, AVI_DD_MAX};

pub(crate) use chunks::data_chunk_id;

/// Maximum number of streams handled.
pub(crate) const AVI_TRACKS_MAX: usize = 16;

/// Reader state for one stream.
#[derive(Debug, Clone, Default)]
pub(crate) struct AviTrack {
    pub(crate) timing: TrackTiming,
    pub(crate) chunk: ChunkState,
    pub(crate) cursor: StreamCursor,
    /// Data position of the `indx` chunk, zero if none.
    pub(crate) index_offset: u64,
    pub(crate) index_size: u32,
}

#[derive(Debug)]
pub(crate) struct AviReader {
    pub(crate) tracks: Vec<AviTrack>,
    /// Shared cursor for reads in interleave order.
    pub(crate) global: StreamState,
    /// Position of the `movi` list type.
    pub(crate) data_offset: u64,
    /// `movi` LIST size.
    pub(crate) data_size: u32,
    /// Data position of `idx1`, zero if none found (yet).
    pub(crate) index_offset: u64,
    pub(crate) index_size: u32,
}

pub(crate) fn open(ctx: &mut ContainerContext) -> Result<Box<dyn Demuxer>> {
    let Some(peek) = ctx.io.peek_array::<12>() else {
        return Err(DemuxError::FormatNotSupported);
    };
    if peek[0..4] != RIFF.0 || peek[8..12] != AVI.0 {
        return Err(DemuxError::FormatNotSupported);
    }
    let reader = AviReader::open(ctx)?;
    Ok(Box::new(reader))
}

/// Skips `size` bytes, then pads to an even position.
fn skip_chunk(io: &mut dyn ByteStream, size: u64) {
    io.skip(size);
    sync_chunk(io);
}

fn sync_chunk(io: &mut dyn ByteStream) {
    if io.position() & 1 == 1 {
        io.skip(1);
    }
}

/// Finds chunk `id` at the current level. Returns its size with the
/// stream positioned at the chunk data.
fn find_chunk(io: &mut dyn ByteStream, id: FourCC) -> Result<u32> {
    loop {
        let chunk_id = io.read_fourcc()?;
        let chunk_size = io.read_u32_le()?;
        if chunk_id == id {
            return Ok(chunk_size);
        }
        skip_chunk(io, chunk_size as u64);
    }
}

/// Finds `LIST` of type `list_type`. Returns the list size with the
/// stream positioned at the list type.
fn find_list(io: &mut dyn ByteStream, list_type: FourCC) -> Result<u32> {
    loop {
        let chunk_size = find_chunk(io, LIST)?;
        if io.peek_fourcc() == Some(list_type) {
            return Ok(chunk_size);
        }
        skip_chunk(io, chunk_size as u64);
    }
}

/// Next `movi` data chunk (id, size), descending into `rec ` and `movi`
/// lists and `AVIX` RIFF headers on the way.
fn find_next_data_chunk(io: &mut dyn ByteStream) -> Result<(FourCC, u32)> {
    loop {
        let chunk_id = io.read_fourcc()?;
        let chunk_size = io.read_u32_le()?;

        if chunk_id == LIST {
            match io.peek_fourcc() {
                None => return Err(DemuxError::Eos),
                Some(REC) | Some(MOVI) => io.skip_exact(4)?,
                Some(_) => skip_chunk(io, chunk_size as u64),
            }
        } else if chunk_id == RIFF {
            match io.peek_fourcc() {
                None => return Err(DemuxError::Eos),
                Some(AVIX) => io.skip_exact(4)?,
                Some(_) => skip_chunk(io, chunk_size as u64),
            }
        } else if DataChunkType::from_fourcc(chunk_id).is_some() {
            return Ok((chunk_id, chunk_size));
        } else if chunk_id.is_unknown() && chunk_size == 0 {
            return Err(DemuxError::Eos);
        } else {
            skip_chunk(io, chunk_size as u64);
        }

        match io.status() {
            StreamStatus::Ok => (),
            _ => return Err(io.short_read()),
        }
    }
}

/// Buffers a `##dd` chunk, or drops a buffered one that belongs
/// to another track.
fn read_dd_chunk(
    io: &mut dyn ByteStream,
    state: &mut StreamState,
    kind: DataChunkType,
    chunk_size: u32,
    track_num: usize,
) -> Result<()> {
    if kind == DataChunkType::Drm {
        let size = chunk_size as usize;
        if state.prefix.len != 0 || size > AVI_DD_MAX {
            debug!("cannot handle multiple consecutive 'dd' chunks");
            return Err(DemuxError::FormatNotSupported);
        }
        if io.read(&mut state.prefix.data[..size]) != size {
            return Err(DemuxError::invalid("truncated 'dd' chunk"));
        }
        sync_chunk(io);
        state.prefix.track = track_num;
        state.prefix.len = size;
        state.prefix.offs = 0;
        return Err(DemuxError::Continue);
    }
    if state.prefix.len != 0 && state.prefix.track != track_num {
        debug!(
            "dropping data from '{:02}dd' chunk, not for this track ({track_num})",
            state.prefix.track
        );
        state.prefix.len = 0;
    }
    Ok(())
}

impl AviReader {
    fn open(ctx: &mut ContainerContext) -> Result<Self> {
        let io = ctx.io.as_mut();
        io.skip_exact(12)?;

        find_list(io, HDRL).map_err(|_| DemuxError::invalid("'hdrl' LIST not found"))?;
        io.skip_exact(4)?;

        let avih_size = find_chunk(io, AVIH).map_err(|_| DemuxError::invalid("'avih' not found"))?;
        let avih = parse_struct::<MainHeader>(&io.read_vec(avih_size as usize)?, Endian::Little)?;
        sync_chunk(io);

        let trace = &mut ctx.trace;
        trace.enter("avih");
        trace.field("dwMicroSecPerFrame", avih.micro_sec_per_frame);
        trace.field("dwMaxBytesPerSec", avih.max_bytes_per_sec);
        trace.field("dwPaddingGranularity", avih.padding_granularity);
        trace.field("dwFlags", format_args!("{:#x}", avih.flags));
        trace.field("dwTotalFrames", avih.total_frames);
        trace.field("dwInitialFrames", avih.initial_frames);
        trace.field("dwStreams", avih.streams);
        trace.field("dwSuggestedBufferSize", avih.suggested_buffer_size);
        trace.field("dwWidth", avih.width);
        trace.field("dwHeight", avih.height);
        trace.leave();

        let mut num_streams = avih.streams as usize;
        if num_streams > AVI_TRACKS_MAX {
            debug!("cannot handle {num_streams} tracks, restricted to {AVI_TRACKS_MAX}");
            num_streams = AVI_TRACKS_MAX;
        }

        let mut tracks = Vec::with_capacity(num_streams);
        for _ in 0..num_streams {
            let (track, avi_track) = read_stream_header_list(ctx)?;
            ctx.duration = ctx.duration.max(avi_track.timing.duration);
            ctx.tracks.push(track);
            tracks.push(avi_track);
        }

        let io = ctx.io.as_mut();
        let data_size = find_list(io, MOVI).map_err(|_| DemuxError::invalid("'movi' LIST not found"))?;

        let mut reader = Self {
            tracks,
            global: StreamState::default(),
            data_offset: io.position(),
            data_size,
            index_offset: 0,
            index_size: 0,
        };

        if avih.flags & AVIF_MUSTUSEINDEX != 0 {
            debug!("AVIF_MUSTUSEINDEX not supported, playback might not work properly");
        }

        if io.is_seekable() {
            ctx.capabilities |= Capabilities::CAN_SEEK | Capabilities::FORCE_TRACK;

            if reader.tracks.iter().any(|t| t.index_offset != 0) {
                ctx.capabilities |= Capabilities::HAS_INDEX;
                if avih.flags & AVIF_TRUSTCKTYPE != 0 {
                    ctx.capabilities |= Capabilities::DATA_HAS_KEYFRAME_FLAG;
                }
            } else {
                reader.find_legacy_index(ctx)?;
                ctx.io.seek(reader.data_offset)?;
            }
        }

        let io = ctx.io.as_mut();
        io.skip_exact(4)?;
        reader.global.data_offset = io.position();

        // Seeds per-track cursors, so badly interleaved files do not
        // need to be skipped through when forcing a track.
        let mut time = 0;
        if let Err(err) = reader.seek(ctx, &mut time, SeekMode::Time, SeekFlags::PRECISE) {
            debug!("initial seek failed: {err}");
        }

        match ctx.io.status() {
            StreamStatus::Ok => Ok(reader),
            _ => Err(DemuxError::invalid("stream error after initial seek")),
        }
    }

    /// Looks for `idx1` after the `movi` data.
    fn find_legacy_index(&mut self, ctx: &mut ContainerContext) -> Result<()> {
        let io = ctx.io.as_mut();
        io.seek(self.data_offset)?;
        skip_chunk(io, self.data_size as u64);
        if let Ok(size) = find_chunk(io, IDX1) {
            debug!("'idx1' found");
            self.index_offset = io.position();
            self.index_size = size;
            ctx.capabilities |= Capabilities::HAS_INDEX | Capabilities::DATA_HAS_KEYFRAME_FLAG;
        }
        Ok(())
    }

    /// Track number and chunk type of data chunk `chunk_id`, if it refers
    /// to an existing track of a matching type.
    pub(crate) fn check_track(tracks: &[Track], chunk_id: FourCC) -> Option<(DataChunkType, usize)> {
        let kind = DataChunkType::from_fourcc(chunk_id)?;
        let Some(track_num) = stream_number(chunk_id).filter(|n| *n < tracks.len()) else {
            debug!("invalid track number in '{chunk_id}' ({} tracks)", tracks.len());
            return None;
        };
        let es_type = tracks[track_num].es_type();
        let plausible = match kind.is_video() {
            true => es_type == EsType::Video,
            false => es_type == EsType::Audio,
        };
        if !plausible {
            debug!("suspicious chunk type '{chunk_id}', track {track_num} is {es_type:?}");
            return None;
        }
        Some((kind, track_num))
    }

    /// Reference track for seeking: first enabled video track,
    /// else first enabled track, else track 0.
    fn reference_track(tracks: &[Track]) -> usize {
        tracks
            .iter()
            .position(|t| t.enabled && t.es_type() == EsType::Video)
            .or_else(|| tracks.iter().position(|t| t.enabled))
            .unwrap_or(0)
    }

    fn load_state(&self, local: Option<usize>) -> StreamState {
        match local.and_then(|t| self.tracks[t].cursor.local()) {
            Some(state) => state.clone(),
            None => self.global.clone(),
        }
    }

    fn store_state(&mut self, local: Option<usize>, state: StreamState) {
        match local.map(|t| &mut self.tracks[t].cursor) {
            Some(StreamCursor::Local(own)) => *own = state,
            _ => self.global = state,
        }
    }

    fn seek_to_time(&mut self, ctx: &mut ContainerContext, time: &mut i64, flags: SeekFlags) -> Result<u64> {
        if self.tracks.is_empty() {
            return Err(DemuxError::UnsupportedOperation);
        }
        let start = self.data_offset + 4;

        for track in self.tracks.iter_mut() {
            track.chunk = ChunkState {
                time_pos: track.timing.time_start,
                ..Default::default()
            };
        }
        self.global = StreamState::at(start, 0);
        let mut offsets = vec![start; self.tracks.len()];

        let seek_track = Self::reference_track(&ctx.tracks);
        debug!("seek on track {seek_track}/{}", self.tracks.len());

        let pos = if self.tracks[seek_track].index_offset != 0 {
            debug!("seeking using the super index");
            let pos = self.scan_super_index(ctx, seek_track, time, flags, true)?;
            for i in 0..self.tracks.len() {
                if i != seek_track && self.tracks[i].index_offset != 0 {
                    let mut track_time = *time;
                    offsets[i] = self.scan_super_index(ctx, i, &mut track_time, flags, false)?;
                }
            }
            pos
        } else {
            debug!("seeking using the legacy index");
            if self.index_offset == 0 {
                debug!("no index offset, searching for one");
                self.find_legacy_index(ctx)?;
            }
            if self.index_offset == 0 {
                if *time != 0 {
                    debug!("failed to find the legacy index, unable to seek");
                    return Err(DemuxError::UnsupportedOperation);
                }
                start
            } else {
                let pos = self.scan_legacy_index(ctx, seek_track, time, flags, true)?;
                for i in 0..self.tracks.len() {
                    if i != seek_track {
                        let mut track_time = *time;
                        offsets[i] = self.scan_legacy_index(ctx, i, &mut track_time, flags, false)?;
                    }
                }
                pos
            }
        };
        offsets[seek_track] = pos;

        // Tracks starting at the earliest offset share the global cursor.
        let min = offsets.iter().copied().min().unwrap_or(start);
        let first = offsets.iter().position(|o| *o == min).unwrap_or(0);
        self.global = StreamState::at(min, first);
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.cursor = match offsets[i] == min {
                true => StreamCursor::Global,
                false => StreamCursor::Local(StreamState::at(offsets[i], i)),
            };
        }

        debug!("seek to {}us, position {pos}", *time);
        Ok(pos)
    }
}

/// Parses one `strl` LIST into a track.
fn read_stream_header_list(ctx: &mut ContainerContext) -> Result<(Track, AviTrack)> {
    let io = ctx.io.as_mut();
    let trace = &mut ctx.trace;

    let list_size = find_list(io, STRL).map_err(|_| DemuxError::invalid("'strl' LIST not found"))?;
    let list_offset = io.position();
    io.skip_exact(4)?;

    let mut track = Track::new(EsFormat::default());
    let mut avi_track = AviTrack::default();
    let mut strh_read = false;
    let mut strf_read = false;

    trace.enter("strl");
    while io.position() < list_offset + list_size as u64 {
        let offset = io.position();
        let chunk_id = io.read_fourcc()?;
        let chunk_size = io.read_u32_le()?;
        trace.fourcc("chunk", chunk_id);
        trace.field("size", chunk_size);

        match chunk_id {
            STRH => {
                if strh_read {
                    debug!("rejecting invalid 'strl', found more than one 'strh'");
                    return Err(DemuxError::invalid("duplicate 'strh'"));
                }
                let buf = io.read_vec((chunk_size as usize).min(StreamHeader::SIZE))?;
                let strh = parse_struct::<StreamHeader>(&buf, Endian::Little)?;
                trace_stream_header(trace, &strh);
                apply_stream_header(&strh, &mut track, &mut avi_track);
                strh_read = true;
            }
            STRF => {
                if strf_read {
                    debug!("rejecting invalid 'strl', found more than one 'strf'");
                    return Err(DemuxError::invalid("duplicate 'strf'"));
                }
                let buf = match io.read_vec(chunk_size as usize) {
                    Err(DemuxError::Eos) => return Err(DemuxError::invalid("truncated 'strf'")),
                    other => other?,
                };
                sync_chunk(io);
                apply_stream_format(&buf, &mut track, &mut avi_track)?;
                strf_read = true;
            }
            STRD => {
                let buf = match io.read_vec(chunk_size as usize) {
                    Err(DemuxError::Eos) => return Err(DemuxError::invalid("truncated 'strd'")),
                    other => other?,
                };
                sync_chunk(io);
                // Either codec configuration or DRM data. Keep 'strf' config data.
                if track.format.extradata.is_empty() {
                    track.format.set_extradata(&buf)?;
                }
                track.drm_data = buf;
            }
            INDX => {
                avi_track.index_offset = io.position();
                avi_track.index_size = chunk_size;
            }
            _ => (),
        }

        let left = (offset + chunk_size as u64 + 8).saturating_sub(io.position());
        skip_chunk(io, left);
    }
    trace.leave();

    if !strh_read || !strf_read {
        debug!("invalid 'strl', 'strh' and 'strf' are both required");
        return Err(DemuxError::invalid("'strh' and 'strf' are both required"));
    }

    Ok((track, avi_track))
}

fn trace_stream_header(trace: &mut crate::fields::FieldTrace, strh: &StreamHeader) {
    trace.enter("strh");
    trace.fourcc("fccType", strh.fcc_type);
    trace.fourcc("fccHandler", strh.fcc_handler);
    trace.field("dwFlags", format_args!("{:#x}", strh.flags));
    trace.field("wPriority", strh.priority);
    trace.field("wLanguage", strh.language);
    trace.field("dwInitialFrames", strh.initial_frames);
    trace.field("dwScale", strh.scale);
    trace.field("dwRate", strh.rate);
    trace.field("dwStart", strh.start);
    trace.field("dwLength", strh.length);
    trace.field("dwSuggestedBufferSize", strh.suggested_buffer_size);
    trace.field("dwQuality", strh.quality);
    trace.field("dwSampleSize", strh.sample_size);
    trace.field("rcFrame", format_args!("{:?}", strh.frame));
    trace.leave();
}

fn apply_stream_header(strh: &StreamHeader, track: &mut Track, avi_track: &mut AviTrack) {
    if strh.rate == 0 {
        debug!("invalid dwRate: 0, using 1 as a guess, timestamps will almost certainly be wrong");
    }
    let mut sample_size = strh.sample_size;
    let format = &mut track.format;
    format.flags |= EsFormatFlags::FRAMED;

    let timing = TrackTiming::new(strh.scale, strh.rate, strh.start, strh.length, 0);

    match strh.fcc_type {
        VIDS => {
            format.es_type = EsType::Video;
            format.video.frame_rate_num = timing.time_den;
            format.video.frame_rate_den = timing.time_num;
            if sample_size != 0 {
                debug!("ignoring dwSampleSize ({sample_size}) for video stream");
                sample_size = 0;
            }
        }
        AUDS => {
            format.es_type = EsType::Audio;
            // VBR audio is non-framed
            format.flags.remove(EsFormatFlags::FRAMED);
        }
        TXTS => format.es_type = EsType::Subpicture,
        _ => (),
    }

    if format.codec.is_unknown() {
        format.codec = vfw_fourcc_to_codec(strh.fcc_handler);
    }

    if strh.flags & AVISF_DISABLED != 0 {
        debug!("stream flagged as disabled, demultiplexing it anyway");
    }
    track.enabled = true;

    avi_track.timing = TrackTiming { sample_size, ..timing };
}

fn apply_stream_format(buf: &[u8], track: &mut Track, avi_track: &mut AviTrack) -> Result<()> {
    let format = &mut track.format;
    let extradata = match format.es_type {
        EsType::Video => {
            if buf.len() < BitmapInfoHeader::SIZE {
                return Err(DemuxError::invalid("'strf' too small for BITMAPINFOHEADER"));
            }
            let bih = parse_struct::<BitmapInfoHeader>(buf, Endian::Little)?;
            format.video.width = bih.width.unsigned_abs();
            format.video.height = bih.height.unsigned_abs();
            if !bih.compression.is_unknown() {
                format.codec = vfw_fourcc_to_codec(bih.compression);
            }
            &buf[BitmapInfoHeader::SIZE..]
        }
        EsType::Audio => {
            if buf.len() < WaveFormatEx::MIN_SIZE {
                return Err(DemuxError::invalid("'strf' too small for WAVEFORMAT"));
            }
            let wf = parse_struct::<WaveFormatEx>(buf, Endian::Little)?;
            let extra = match buf.len() >= WaveFormatEx::SIZE {
                true => {
                    let end = (WaveFormatEx::SIZE + wf.cb_size as usize).min(buf.len());
                    &buf[WaveFormatEx::SIZE..end]
                }
                false => &buf[buf.len()..],
            };

            let tag = match wf.format_tag {
                WAVE_FORMAT_EXTENSIBLE if extra.len() >= 8 => u16::from_le_bytes([extra[6], extra[7]]),
                tag => tag,
            };
            let (codec, variant) = waveformat_to_codec(tag);
            format.codec = codec;
            format.codec_variant = variant;
            format.audio.sample_rate = wf.samples_per_sec;
            format.audio.channels = wf.channels as u32;
            format.audio.bits_per_sample = wf.bits_per_sample as u32;
            format.audio.block_align = wf.block_align as u32;
            format.bitrate = wf.avg_bytes_per_sec.saturating_mul(8);

            let block_align = wf.block_align as u32;
            let timing = &mut avi_track.timing;
            if timing.sample_size != 0 && timing.sample_size != block_align {
                debug!(
                    "invalid dwSampleSize ({}), should match nBlockAlign ({block_align}) for audio streams",
                    timing.sample_size
                );
                if block_align != 0 {
                    timing.sample_size = block_align;
                }
            } else if block_align == 1 {
                // Some muxers only set nBlockAlign
                timing.sample_size = 1;
            }
            extra
        }
        _ => &buf[buf.len()..],
    };

    if !extradata.is_empty() {
        format.set_extradata(extradata)?;
    }

    let framed_with_config = [
        codec::MP4A,
        codec::WMA1,
        codec::WMA2,
        codec::WMAP,
        codec::WMAL,
    ];
    if framed_with_config.contains(&format.codec) && !format.extradata.is_empty() {
        // raw AAC / WMA, one frame per chunk
        avi_track.timing.sample_size = 0;
        format.flags |= EsFormatFlags::FRAMED;
    }
    Ok(())
}

impl Demuxer for AviReader {
    fn read(&mut self, ctx: &mut ContainerContext, packet: &mut Packet, flags: ReadFlags) -> Result<()> {
        let forced = match flags.contains(ReadFlags::FORCE_TRACK) {
            true => {
                ctx.track(packet.track)?;
                Some(packet.track)
            }
            false => None,
        };
        // Track reading through its own cursor, if any.
        let local = forced.filter(|t| !self.tracks[*t].cursor.is_global());
        let mut state = self.load_state(local);

        let io = ctx.io.as_mut();
        if io.position() != state.data_offset {
            io.seek(state.data_offset)?;
        }

        if state.chunk_data_left == 0 {
            let (chunk_id, chunk_size) = match find_next_data_chunk(io) {
                Ok(chunk) => chunk,
                Err(err) => {
                    debug!("unable to find the next data chunk: {err}");
                    state.data_offset = io.position();
                    self.store_state(local, state);
                    return Err(err);
                }
            };

            let Some((kind, track_num)) = Self::check_track(&ctx.tracks, chunk_id) else {
                skip_chunk(io, chunk_size as u64);
                debug!("skipping data chunk '{chunk_id}'");
                state.data_offset = io.position();
                self.store_state(local, state);
                return Err(DemuxError::Continue);
            };

            if local.is_none() {
                if let Some(track_state) = self.tracks[track_num].cursor.local() {
                    let next_chunk = (io.position() + chunk_size as u64 + 1) & !1;
                    if track_state.data_offset > next_chunk {
                        // Already delivered through the track's own cursor.
                        skip_chunk(io, chunk_size as u64);
                        debug!("skipping track {track_num}, already read");
                        state.data_offset = io.position();
                        self.store_state(local, state);
                        return Err(DemuxError::Continue);
                    }

                    debug!("reconnecting track {track_num} to the global cursor");
                    let own = std::mem::take(&mut self.tracks[track_num].cursor);
                    if let StreamCursor::Local(own) = own {
                        self.global = own;
                    }
                    return Err(DemuxError::Continue);
                }
            }

            if forced.map_or(true, |t| t == track_num) {
                if let Err(err) = read_dd_chunk(io, &mut state, kind, chunk_size, track_num) {
                    state.data_offset = io.position();
                    self.store_state(local, state);
                    return Err(err);
                }
            }

            state.chunk_size = chunk_size;
            state.chunk_data_left = chunk_size;
            state.current_track = track_num;
        }

        if let Some(target) = forced.filter(|t| *t != state.current_track) {
            let before = io.position();
            skip_chunk(io, state.chunk_data_left as u64);
            let after = io.position();
            debug!("skipping track {} while reading track {target}", state.current_track);

            state.data_offset = before;
            if local.is_none() && self.tracks[state.current_track].cursor.is_global() {
                debug!("using a private cursor for track {target}");
                let mut own = state.clone();
                own.data_offset = after;
                own.chunk_data_left = 0;
                self.tracks[target].cursor = StreamCursor::Local(own);
                self.global = state;
            } else {
                state.data_offset = after;
                state.chunk_data_left = 0;
                self.store_state(local, state);
            }
            return Err(DemuxError::Continue);
        }

        let track_num = state.current_track;
        let avi_track = &mut self.tracks[track_num];
        let sample_size = avi_track.timing.sample_size;
        avi_track
            .chunk
            .flags
            .set(PacketFlags::ENCRYPTED, state.prefix.len != 0);

        packet.track = track_num;
        packet.size = state.chunk_data_left as usize + state.prefix.len;
        packet.flags = avi_track.chunk.flags;
        if state.chunk_data_left == state.chunk_size {
            packet.pts = Some(avi_track.chunk.time_pos);
            if sample_size == 0 {
                packet.flags |= PacketFlags::FRAME;
            }
        } else {
            packet.pts = None;
            if sample_size == 0 {
                packet.flags |= PacketFlags::FRAME_END;
            }
        }
        packet.dts = None;

        if flags.contains(ReadFlags::SKIP) {
            io.skip(state.chunk_data_left as u64);
            sync_chunk(io);
            state.chunk_data_left = 0;
            state.prefix.len = 0;
        }

        if flags.contains(ReadFlags::INFO) {
            state.data_offset = io.position();
            self.store_state(local, state);
            return Ok(());
        }

        let mut budget = packet.buffer_size;
        let total = budget.min(state.prefix.len + state.chunk_data_left as usize);
        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| DemuxError::OutOfMemory(total))?;

        if state.prefix.len != 0 {
            let len = budget.min(state.prefix.len);
            data.extend_from_slice(&state.prefix.pending()[..len]);
            budget -= len;
            state.prefix.len -= len;
            state.prefix.offs += len;
        }

        let len = budget.min(state.chunk_data_left as usize);
        let start = data.len();
        data.resize(start + len, 0);
        let got = io.read(&mut data[start..]);
        data.truncate(start + got);
        state.chunk_data_left -= len as u32;

        packet.size = data.len();
        packet.data = data;
        if state.chunk_data_left != 0 {
            packet.flags.remove(PacketFlags::FRAME_END);
        }

        if state.chunk_data_left == 0 {
            sync_chunk(io);
            let chunk = &mut avi_track.chunk;
            chunk.index += 1;
            chunk.offs += state.chunk_size as u64;
            chunk.flags = PacketFlags::empty();
            chunk.time_pos = avi_track.timing.chunk_time(chunk);
        }

        state.data_offset = io.position();
        self.store_state(local, state);

        match io.status() {
            StreamStatus::Ok => Ok(()),
            _ => Err(io.short_read()),
        }
    }

    fn seek(
        &mut self,
        ctx: &mut ContainerContext,
        time: &mut i64,
        mode: SeekMode,
        flags: SeekFlags,
    ) -> Result<()> {
        if mode != SeekMode::Time || !ctx.io.is_seekable() {
            return Err(DemuxError::UnsupportedOperation);
        }
        debug!("AVI seeking to {}us", *time);

        let position = ctx.io.position();
        let saved_tracks = self.tracks.clone();
        let saved_global = self.global.clone();

        match self.seek_to_time(ctx, time, flags) {
            Ok(pos) => ctx.io.seek(pos),
            Err(err) => {
                self.tracks = saved_tracks;
                self.global = saved_global;
                if let Err(seek_err) = ctx.io.seek(position) {
                    debug!("failed to restore position {position}: {seek_err}");
                }
                Err(err)
            }
        }
    }

    fn index(&mut self, ctx: &mut ContainerContext) -> Result<Vec<IndexEntry>> {
        if !ctx.io.is_seekable() {
            return Err(DemuxError::UnsupportedOperation);
        }
        let position = ctx.io.position();
        if self.index_offset == 0 {
            self.find_legacy_index(ctx)?;
        }
        let result = match self.index_offset {
            0 => Err(DemuxError::NotFound),
            _ => self.legacy_index(ctx),
        };
        ctx.io.seek(position)?;
        result
    }
}
