//! MPEG-1/MPEG-2 Program Stream reader.
//!
//! Program streams have no index. Tracks are discovered by scanning the
//! first packets at open time, and seeking estimates a byte position from
//! the measured data rate before resyncing on the next PES packet.

mod pack;
mod pes;

use tracing::debug;

use crate::{
    container::{Capabilities, ContainerContext, Demuxer},
    fields::ByteStreamExt,
    format::{EsFormat, EsType, Track},
    fourcc::codec,
    stream::{ByteStream, StreamStatus},
    DemuxError, FourCC, Packet, ReadFlags, Result, SeekFlags, SeekMode,
};

use pack::{read_pack_header, read_system_header, SystemClock};
use pes::{PesTimes, PRIVATE_STREAM_1, SKIPPED_STREAM_IDS};

/// Maximum number of tracks.
pub(crate) const PS_TRACKS_MAX: usize = 2;

/// Byte-wise sync attempts, enough to stride one PES packet.
pub(crate) const PS_SYNC_LIMIT: usize = 65_536;

/// Pack or packet start codes scanned for tracks at open time,
/// or when looking for the next PES packet.
pub(crate) const PS_PACK_SCAN_MAX: usize = 128;

/// Packs sampled across the file for the data rate estimate.
const PS_PACK_SEARCH_MAX: u64 = 64;

const PROGRAM_END_CODE: u8 = 0xB9;
const PACK_START_ID: u8 = 0xBA;
const SYSTEM_HEADER_ID: u8 = 0xBB;

const EXTENSIONS: [&str; 6] = ["ps", "vob", "mpg", "mp2", "mp3", "mpeg"];

/// Identifies a track within the program stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PsTrack {
    stream_id: u8,
    /// Private stream 1 only.
    substream_id: u8,
    /// Sub-stream header bytes ahead of the payload.
    payload_offset: u32,
}

/// Payload of the current PES packet.
#[derive(Debug, Clone, Copy, Default)]
struct PesPayload {
    track: usize,
    size: u32,
    left: u32,
    times: PesTimes,
}

#[derive(Debug)]
pub(crate) struct PsReader {
    tracks: Vec<PsTrack>,
    /// First pack or PES start code.
    data_offset: u64,
    data_size: u64,
    clock: SystemClock,
    payload: PesPayload,
    sync_limit: usize,
    scan_limit: usize,
}

pub(crate) fn open(ctx: &mut ContainerContext) -> Result<Box<dyn Demuxer>> {
    // Program streams are hard to detect, so only files that claim to be one are probed.
    match ctx.extension() {
        Some(ext) if EXTENSIONS.contains(&ext.as_str()) => (),
        _ => return Err(DemuxError::FormatNotSupported),
    }

    let sync_limit = ctx.options.sync_limit;
    let code = match find_start_code(ctx.io.as_mut(), sync_limit) {
        Ok(code) => code,
        Err(_) => return Err(DemuxError::FormatNotSupported),
    };
    debug!("using ps reader, found start code 0x000001{code:02x}");

    let mut reader = PsReader {
        tracks: Vec::new(),
        data_offset: ctx.io.position(),
        data_size: 0,
        clock: SystemClock::default(),
        payload: PesPayload::default(),
        sync_limit,
        scan_limit: ctx.options.pack_scan_limit,
    };
    reader.open(ctx)?;
    Ok(Box::new(reader))
}

/// Scans for a pack or PES start code, leaving the stream at it.
/// Returns the start code id. The program end code is `Eos`.
fn find_start_code(io: &mut dyn ByteStream, limit: usize) -> Result<u8> {
    for _ in 0..limit {
        let buf = io.peek_array::<4>().ok_or(DemuxError::Eos)?;
        if buf[..3] == [0, 0, 1] && buf[3] >= PROGRAM_END_CODE {
            return match buf[3] {
                PROGRAM_END_CODE => Err(DemuxError::Eos),
                id => Ok(id),
            };
        }
        if io.skip(1) != 1 {
            return Err(DemuxError::Eos);
        }
    }
    Err(DemuxError::FormatNotSupported)
}

impl PsReader {
    fn open(&mut self, ctx: &mut ContainerContext) -> Result<()> {
        self.scan_tracks(ctx)?;

        if ctx.io.is_seekable() {
            ctx.io.seek(self.data_offset)?;
        } else {
            debug!("stream not seekable, packets scanned for tracks are lost");
        }
        if ctx.tracks.is_empty() {
            debug!("no tracks found");
            return Err(DemuxError::invalid("no program stream tracks found"));
        }

        self.data_size = ctx
            .io
            .size()
            .map_or(0, |size| size.saturating_sub(self.data_offset));

        ctx.duration = match ctx.io.is_seekable() {
            true => self.estimate_duration(ctx)?,
            // program_mux_rate is rarely accurate
            false => match self.clock.mux_rate {
                0 => 0,
                rate => (100_000 * self.data_size as i128 / (5 * rate as i128)) as i64,
            },
        };

        // Ready to read data
        self.clock.scr = None;
        self.clock.bias = None;
        self.clock.high_water = None;

        if ctx.io.is_seekable() {
            ctx.capabilities |= Capabilities::CAN_SEEK;
        }
        match ctx.io.status() {
            StreamStatus::Ok => Ok(()),
            _ => Err(ctx.io.short_read()),
        }
    }

    /// Classifies the stream ids of the first packets into tracks.
    fn scan_tracks(&mut self, ctx: &mut ContainerContext) -> Result<()> {
        for _ in 0..self.scan_limit {
            let io = ctx.io.as_mut();
            let code = match find_start_code(io, self.sync_limit) {
                Ok(code) => code,
                Err(DemuxError::Eos) => break,
                Err(err) => {
                    debug!("lost sync while scanning for tracks: {err}");
                    return Err(DemuxError::corrupted("no start code found"));
                }
            };

            if let Err(err) = self.read_start_code(ctx, code, true) {
                if err.is_eos() {
                    break;
                }
                debug!("lost sync ({err}), scanning for start code");
            }
        }
        Ok(())
    }

    /// Samples pack headers across the file for the data rate. Duration
    /// is the larger of the data rate estimate and the SCR span.
    fn estimate_duration(&mut self, ctx: &mut ContainerContext) -> Result<i64> {
        let io = ctx.io.as_mut();
        let trace = &mut ctx.trace;
        let step = self.data_size / (PS_PACK_SEARCH_MAX + 1);

        let mut position = self.data_offset;
        for _ in 0..PS_PACK_SEARCH_MAX {
            position += step;
            io.seek(position)?;

            while let Ok(code) = find_start_code(io, self.sync_limit) {
                if code == PACK_START_ID {
                    let pack_offset = io.position();
                    if let Ok(pack) = read_pack_header(io, trace) {
                        self.clock.update(&pack, pack_offset);
                        break;
                    }
                } else if skip_packet(io).is_err() {
                    break;
                }
            }
        }

        let mut duration = match self.clock.data_rate {
            0 => 0,
            rate => (1_000_000 * self.data_size as i128 / rate as i128) as i64,
        };
        duration = duration.max(self.clock.span_us());
        debug!("estimated duration {duration}us, data rate {}", self.clock.data_rate);

        io.seek(self.data_offset)?;
        Ok(duration)
    }

    /// Reads whatever starts at start code `code`.
    fn read_start_code(&mut self, ctx: &mut ContainerContext, code: u8, searching: bool) -> Result<()> {
        let io = ctx.io.as_mut();
        match code {
            PACK_START_ID => {
                let pack_offset = io.position();
                let pack = read_pack_header(io, &mut ctx.trace)?;
                self.clock.update(&pack, pack_offset);
                Ok(())
            }
            SYSTEM_HEADER_ID => read_system_header(io, &mut ctx.trace),
            _ => self.read_pes_packet(ctx, searching),
        }
    }

    /// Finds the next PES packet of a known track. Pack and system
    /// headers on the way update the clock.
    fn find_pes_packet(&mut self, ctx: &mut ContainerContext) -> Result<()> {
        self.payload.size = 0;
        for _ in 0..self.scan_limit {
            let code = find_start_code(ctx.io.as_mut(), self.sync_limit)?;
            match self.read_start_code(ctx, code, false) {
                Ok(()) if code > SYSTEM_HEADER_ID => return Ok(()),
                Ok(()) => (),
                Err(err) if err.is_eos() => return Err(err),
                Err(err) => debug!("lost sync ({err}), scanning for start code"),
            }
        }
        Err(DemuxError::corrupted("no PES packet found"))
    }

    fn read_pes_packet(&mut self, ctx: &mut ContainerContext, searching: bool) -> Result<()> {
        let io = ctx.io.as_mut();
        let trace = &mut ctx.trace;

        let header = io.read_array::<6>()?;
        if header[..3] != [0, 0, 1] {
            return Err(DemuxError::corrupted("expected PES start code"));
        }
        let stream_id = header[3];
        let mut length = u16::from_be_bytes([header[4], header[5]]) as u32;
        if stream_id < 0xBC {
            return Err(DemuxError::corrupted(format!("invalid stream id {stream_id:#x}")));
        }
        if SKIPPED_STREAM_IDS.contains(&stream_id) {
            return io.skip_exact(length as u64);
        }

        trace.enter("pes_packet_header");
        trace.field("stream_id", format_args!("{stream_id:#x}"));
        trace.field("PES_packet_length", length);
        let times = pes::read_pes_header(io, trace, &mut length)?;

        let (es_type, codec, variant, substream_id) = match stream_id {
            PRIVATE_STREAM_1 => {
                let (es_type, codec, sub) = pes::read_private_stream_1_coding(io, trace, &mut length)?;
                (es_type, codec, FourCC::UNKNOWN, sub)
            }
            id => {
                let (es_type, codec, variant) = pes::stream_coding(id);
                (es_type, codec, variant, 0)
            }
        };
        trace.leave();

        if es_type == EsType::Unknown || codec.is_unknown() {
            return io.skip_exact(length as u64);
        }

        let Some(track_num) = self.find_track(&mut ctx.tracks, stream_id, substream_id, searching) else {
            return io.skip_exact(length as u64);
        };

        if searching {
            let track = &mut ctx.tracks[track_num];
            track.enabled = true;
            track.format.es_type = es_type;
            track.format.codec = codec;
            track.format.codec_variant = variant;

            if stream_id == PRIVATE_STREAM_1 {
                let before = length;
                pes::read_private_stream_1_format(io, trace, &mut track.format, &mut length)?;
                self.tracks[track_num].payload_offset = before - length;
            }
            return io.skip_exact(length as u64);
        }

        let payload_offset = self.tracks[track_num].payload_offset;
        let size = length
            .checked_sub(payload_offset)
            .ok_or_else(|| DemuxError::corrupted("PES packet shorter than sub-stream header"))?;
        io.skip_exact(payload_offset as u64)?;

        self.payload = PesPayload {
            track: track_num,
            size,
            left: 0,
            times,
        };
        Ok(())
    }

    /// Track for `stream_id`/`substream_id`, created when `create` is set
    /// and the track limit allows.
    fn find_track(&mut self, tracks: &mut Vec<Track>, stream_id: u8, substream_id: u8, create: bool) -> Option<usize> {
        if let Some(i) = self
            .tracks
            .iter()
            .position(|t| t.stream_id == stream_id && t.substream_id == substream_id)
        {
            return Some(i);
        }
        if !create {
            return None;
        }
        if self.tracks.len() >= PS_TRACKS_MAX {
            debug!("could not create track for stream id {stream_id:#x}");
            return None;
        }
        self.tracks.push(PsTrack {
            stream_id,
            substream_id,
            payload_offset: 0,
        });
        tracks.push(Track::new(EsFormat::default()));
        Some(self.tracks.len() - 1)
    }
}

/// Skips a PES packet using its length field.
fn skip_packet(io: &mut dyn ByteStream) -> Result<()> {
    io.skip_exact(4)?;
    let length = io.read_u16_be()?;
    io.skip_exact(length as u64)
}

impl Demuxer for PsReader {
    fn read(&mut self, ctx: &mut ContainerContext, packet: &mut Packet, flags: ReadFlags) -> Result<()> {
        while self.payload.left == 0 {
            if let Err(err) = self.find_pes_packet(ctx) {
                debug!("end of program stream ({err})");
                self.clock.reset_at_eos();
                return Err(DemuxError::Eos);
            }
            self.payload.left = self.payload.size;
        }

        let io = ctx.io.as_mut();
        packet.track = self.payload.track;
        packet.size = self.payload.left as usize;
        packet.flags = Default::default();
        packet.pts = self.clock.pes_time_us(self.payload.times.pts);
        packet.dts = self.clock.pes_time_us(self.payload.times.dts);

        if flags.contains(ReadFlags::SKIP) {
            io.skip(self.payload.left as u64);
            self.payload.left = 0;
            return Ok(());
        }
        if flags.contains(ReadFlags::INFO) {
            return Ok(());
        }

        let len = packet.buffer_size.min(self.payload.left as usize);
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DemuxError::OutOfMemory(len))?;
        data.resize(len, 0);
        // A short read delivers what is there, the status reports it.
        let got = io.read(&mut data);
        data.truncate(got);
        self.payload.left -= got as u32;

        packet.data = data;
        if ctx.tracks[self.payload.track].codec() == codec::PCM_SIGNED_BE {
            pes::swap_lpcm(&mut packet.data);
        }
        packet.size = packet.data.len();

        // Timestamps belong to the first piece of a packet.
        if self.payload.left != 0 {
            self.payload.times = PesTimes::default();
        }

        match ctx.io.status() {
            StreamStatus::Ok => Ok(()),
            _ => Err(ctx.io.short_read()),
        }
    }

    fn seek(&mut self, ctx: &mut ContainerContext, time: &mut i64, mode: SeekMode, _flags: SeekFlags) -> Result<()> {
        if mode != SeekMode::Time || !ctx.io.is_seekable() {
            return Err(DemuxError::UnsupportedOperation);
        }

        let target = match *time {
            0 => self.data_offset,
            _ if ctx.duration == 0 => return Err(DemuxError::UnsupportedOperation),
            // Estimate, may be quite inaccurate.
            t => self.data_offset + (t as i128 * self.data_size as i128 / ctx.duration as i128).max(0) as u64,
        };
        debug!("PS seeking to {}us, position {target}", *time);

        let position = ctx.io.position();
        let saved_clock = self.clock.clone();
        let saved_payload = self.payload;

        let mut at_end = false;
        let result = ctx.io.seek(target).and_then(|()| {
            self.clock.reset_at_seek();
            match self.find_pes_packet(ctx) {
                Ok(()) => Ok(()),
                Err(DemuxError::Eos) => {
                    at_end = true;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        });
        if let Err(err) = result {
            self.clock = saved_clock;
            self.payload = saved_payload;
            if let Err(seek_err) = ctx.io.seek(position) {
                debug!("failed to restore position {position}: {seek_err}");
            }
            return Err(err);
        }

        if at_end {
            // Nothing left to read, the time comes from the position.
            debug!("no PES packet after position {target}");
            self.payload = PesPayload::default();
        }
        self.payload.left = self.payload.size;
        let pts = self.payload.times.pts;
        if let Some(us) = self.clock.pes_time_us(pts) {
            *time = us;
        } else if self.data_size != 0 {
            let pos = ctx.io.position().saturating_sub(self.data_offset);
            *time = (pos as i128 * ctx.duration as i128 / self.data_size as i128) as i64;
        }

        match ctx.io.status() {
            StreamStatus::Ok => Ok(()),
            StreamStatus::Eos if at_end => Ok(()),
            _ => Err(ctx.io.short_read()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::stream::IoStream;

    #[test]
    fn start_code_sync() {
        let mut io = IoStream::new(Cursor::new(vec![0xAB, 0, 0, 0, 1, 0xE0, 0, 0])).unwrap();
        assert_eq!(find_start_code(&mut io, PS_SYNC_LIMIT).unwrap(), 0xE0);
        assert_eq!(io.position(), 2);

        let mut io = IoStream::new(Cursor::new(vec![0, 0, 1, 0xB9])).unwrap();
        assert!(find_start_code(&mut io, PS_SYNC_LIMIT).unwrap_err().is_eos());

        let mut io = IoStream::new(Cursor::new(vec![0x55; 32])).unwrap();
        assert!(matches!(find_start_code(&mut io, 8), Err(DemuxError::FormatNotSupported)));
    }

    #[test]
    fn lost_sync_on_garbage() {
        let mut ctx = ContainerContext::new(
            Box::new(IoStream::new(Cursor::new(vec![0x55; 64])).unwrap()),
            Some("clip.mpg"),
            Default::default(),
        );
        assert!(matches!(open(&mut ctx), Err(DemuxError::FormatNotSupported)));
    }
}
