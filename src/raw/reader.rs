//! Frame reader for bare raw video and YUV4MPEG2 streams.

use tracing::debug;

use crate::{
    container::{Capabilities, ContainerContext, Demuxer},
    fields::ByteStreamExt,
    format::{EsFormat, EsFormatFlags, EsType, Track},
    stream::ByteStream,
    DemuxError, Packet, PacketFlags, ReadFlags, Result, SeekFlags, SeekMode,
};

use super::params::{parse_frame_header, RawParams};

/// Upper bound for a YUV4MPEG2 header line.
const LINE_MAX: usize = 4096;

const FRAME_MARKER: &str = "FRAME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawState {
    FrameHeader,
    Payload,
}

#[derive(Debug)]
pub(crate) struct RawReader {
    params: RawParams,
    y4m: bool,
    /// Position of the first frame (header).
    data_offset: u64,
    /// Size of a `FRAME` line including the newline, zero for bare streams.
    frame_header_size: u32,
    state: RawState,
    frame_index: u64,
    frame_size: u32,
    left: u32,
}

/// Reads a `\n` terminated line, without the newline.
pub(crate) fn read_line(io: &mut dyn ByteStream) -> Result<String> {
    let mut line = Vec::new();
    loop {
        match io.read_u8()? {
            b'\n' => break,
            byte => line.push(byte),
        }
        if line.len() > LINE_MAX {
            return Err(DemuxError::invalid("YUV4MPEG2 line too long"));
        }
    }
    String::from_utf8(line).map_err(|_| DemuxError::invalid("YUV4MPEG2 line is not valid UTF-8"))
}

impl RawReader {
    /// Sets up the single video track once the stream parameters are known.
    /// The stream is positioned at the first frame.
    pub(crate) fn open(ctx: &mut ContainerContext, params: RawParams, y4m: bool) -> Result<Self> {
        let block_size = params.block_size();
        if !y4m && block_size == 0 {
            debug!("raw stream without frame size");
            return Err(DemuxError::FormatNotSupported);
        }

        ctx.trace.enter("raw_video");
        ctx.trace.fourcc("codec", params.codec);
        ctx.trace.field("width", params.width);
        ctx.trace.field("height", params.height);
        ctx.trace.field("frame_rate", format_args!("{}/{}", params.frame_rate_num, params.frame_rate_den));
        ctx.trace.field("block_size", block_size);
        ctx.trace.leave();

        let mut format = EsFormat::new(EsType::Video, params.codec);
        format.video.width = params.width;
        format.video.height = params.height;
        format.video.frame_rate_num = params.frame_rate_num;
        format.video.frame_rate_den = params.frame_rate_den;
        format.video.par_num = params.par_num;
        format.video.par_den = params.par_den;
        format.flags |= EsFormatFlags::FRAMED;
        ctx.tracks.push(Track::new(format));

        let reader = Self {
            params,
            y4m,
            data_offset: ctx.io.position(),
            frame_header_size: match y4m {
                true => FRAME_MARKER.len() as u32 + 1,
                false => 0,
            },
            state: RawState::FrameHeader,
            frame_index: 0,
            frame_size: 0,
            left: 0,
        };

        if block_size != 0 && ctx.io.is_seekable() {
            ctx.capabilities |= Capabilities::CAN_SEEK | Capabilities::SEEK_IS_FAST;
        }
        if let Some(frames) = reader.frame_count(ctx) {
            ctx.duration = reader.frame_time(frames).unwrap_or(0);
        }
        Ok(reader)
    }

    /// Payload size plus frame header size.
    fn frame_stride(&self) -> u64 {
        self.params.block_size() as u64 + self.frame_header_size as u64
    }

    fn frame_count(&self, ctx: &ContainerContext) -> Option<u64> {
        let size = ctx.io.size()?;
        match self.frame_stride() {
            stride if stride == self.frame_header_size as u64 => None,
            stride => Some(size.saturating_sub(self.data_offset) / stride),
        }
    }

    /// Presentation time of frame `index`, in microseconds.
    fn frame_time(&self, index: u64) -> Option<i64> {
        match (self.params.frame_rate_num, self.params.frame_rate_den) {
            (0, _) | (_, 0) => None,
            (num, den) => Some((index as i128 * den as i128 * 1_000_000 / num as i128) as i64),
        }
    }

    /// Reads a `FRAME` line, or just starts the next frame of a bare stream.
    fn read_frame_header(&mut self, ctx: &mut ContainerContext) -> Result<()> {
        let io = ctx.io.as_mut();
        let mut frame_size = self.params.block_size();

        if self.y4m {
            let line = read_line(io)?;
            let params = line
                .strip_prefix(FRAME_MARKER)
                .ok_or_else(|| DemuxError::corrupted("expected YUV4MPEG2 FRAME marker"))?;
            if let Some(size) = parse_frame_header(params)? {
                frame_size = size;
            }
            self.frame_header_size = line.len() as u32 + 1;
        } else if io.peek_array::<1>().is_none() {
            return Err(DemuxError::Eos);
        }

        if frame_size == 0 {
            return Err(DemuxError::corrupted("raw video frame size unknown"));
        }
        self.frame_size = frame_size;
        self.left = frame_size;
        self.state = RawState::Payload;
        Ok(())
    }
}

impl Demuxer for RawReader {
    fn read(&mut self, ctx: &mut ContainerContext, packet: &mut Packet, flags: ReadFlags) -> Result<()> {
        if self.state == RawState::FrameHeader {
            self.read_frame_header(ctx)?;
        }

        let first = self.left == self.frame_size;
        packet.track = 0;
        packet.size = self.left as usize;
        packet.flags = PacketFlags::KEYFRAME;
        if first {
            packet.flags |= PacketFlags::FRAME_START;
            packet.pts = self.frame_time(self.frame_index);
            packet.dts = packet.pts;
        }

        let io = ctx.io.as_mut();
        if flags.contains(ReadFlags::SKIP) {
            io.skip_exact(self.left as u64)?;
            self.left = 0;
        } else if flags.contains(ReadFlags::INFO) {
            return Ok(());
        } else {
            let len = packet.buffer_size.min(self.left as usize);
            let mut data = Vec::new();
            data.try_reserve_exact(len)
                .map_err(|_| DemuxError::OutOfMemory(len))?;
            data.resize(len, 0);
            let got = io.read(&mut data);
            if got == 0 {
                return Err(io.short_read());
            }
            data.truncate(got);
            // A truncated last frame ends here.
            self.left = match got < len {
                true => 0,
                false => self.left - got as u32,
            };
            packet.size = data.len();
            packet.data = data;
        }

        if self.left == 0 {
            packet.flags |= PacketFlags::FRAME_END;
            self.frame_index += 1;
            self.state = RawState::FrameHeader;
        }
        Ok(())
    }

    fn seek(&mut self, ctx: &mut ContainerContext, time: &mut i64, mode: SeekMode, _flags: SeekFlags) -> Result<()> {
        if mode != SeekMode::Time || !ctx.capabilities.contains(Capabilities::CAN_SEEK) {
            return Err(DemuxError::UnsupportedOperation);
        }

        let mut index = match (self.params.frame_rate_num, self.params.frame_rate_den) {
            _ if *time <= 0 => 0,
            (0, _) | (_, 0) => return Err(DemuxError::UnsupportedOperation),
            (num, den) => (*time as i128 * num as i128 / (den as i128 * 1_000_000)) as u64,
        };
        if let Some(frames) = self.frame_count(ctx) {
            index = index.min(frames.saturating_sub(1));
        }

        let position = self.data_offset + index * self.frame_stride();
        debug!("raw video seek to frame {index} at {position}");
        ctx.io.seek(position)?;

        self.frame_index = index;
        self.state = RawState::FrameHeader;
        self.left = 0;
        *time = self.frame_time(index).unwrap_or(0);
        Ok(())
    }
}
