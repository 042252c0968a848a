//! RealVideo elementary stream dumps (`VIDO` files).
//!
//! A variable size file header, then frames of a fixed 20-byte header,
//! a segment table and the frame payload. Packets carry the whole frame
//! so that the segment table reaches the decoder.

use binrw::{BinRead, Endian};
use tracing::debug;

use crate::{
    container::{Capabilities, ContainerContext, Demuxer},
    fields::{parse_struct, ByteStreamExt, FixedSize},
    format::{EsFormat, EsFormatFlags, EsType, Track},
    fourcc::codec,
    DemuxError, FourCC, Packet, PacketFlags, ReadFlags, Result, SeekFlags, SeekMode,
};

const VIDO: FourCC = FourCC::new(b"VIDO");

const SIGNATURE_SIZE: usize = 12;
const FRAME_HEADER_SIZE: usize = 20;
const HEADER_SIZE_MAX: u32 = 1024;
/// Header size from which picture size and frame rate are present.
const VIDEO_INFO_OFFSET: usize = 12;

/// Segment tables larger than this are not inspected.
const SEGMENTS_MAX: u32 = 64;

/// File signature.
#[derive(Debug, Default, Clone, Copy, BinRead)]
#[br(big)]
struct Rv9Signature {
    header_size: u32,
    #[br(map = |b: [u8; 4]| FourCC(b))]
    tag: FourCC,
    #[br(map = |b: [u8; 4]| FourCC(b))]
    codec: FourCC,
}

impl FixedSize for Rv9Signature {
    const SIZE: usize = SIGNATURE_SIZE;
}

#[derive(Debug, Default, Clone, Copy, BinRead)]
#[br(big)]
struct Rv9VideoInfo {
    width: u16,
    height: u16,
    /// 16.16 fixed point.
    #[br(pad_before = 6)]
    frame_rate: u32,
}

impl FixedSize for Rv9VideoInfo {
    const SIZE: usize = 14;
}

#[derive(Debug, Default, Clone, Copy, BinRead)]
#[br(big)]
struct Rv9FrameHeader {
    /// Payload size, after the segment table.
    length: u32,
    /// Milliseconds.
    timestamp: u32,
    sequence: u32,
    flags: u32,
    segments: u32,
}

impl FixedSize for Rv9FrameHeader {
    const SIZE: usize = FRAME_HEADER_SIZE;
}

#[derive(Debug, Default, Clone, Copy, BinRead)]
#[br(big)]
struct Rv9Segment {
    valid: u32,
    /// Relative to the payload.
    offset: u32,
}

impl FixedSize for Rv9Segment {
    const SIZE: usize = 8;
}

/// Picture coding type, from the first byte of the first valid segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameClass {
    Key,
    Delta,
    Unknown,
}

impl FrameClass {
    pub(crate) fn from_picture_byte(byte: u8) -> Self {
        match (byte >> 5) & 3 {
            0 | 1 => Self::Key,
            2 => Self::Delta,
            _ => Self::Unknown,
        }
    }
}

/// Frame being delivered.
#[derive(Debug, Default)]
struct Rv9Frame {
    /// Frame header, segment table and payload prefix already read.
    head: Vec<u8>,
    /// Frame size including header and segment table.
    size: u64,
    delivered: u64,
    pts: Option<i64>,
    flags: PacketFlags,
}

impl Rv9Frame {
    fn left(&self) -> u64 {
        self.size - self.delivered
    }
}

#[derive(Debug)]
pub(crate) struct Rv9Reader {
    data_offset: u64,
    frame: Option<Rv9Frame>,
}

/// Codec for the `RV<n>0` tag of a signature.
fn signature_codec(signature: &Rv9Signature) -> Option<FourCC> {
    match signature.codec.as_bytes() {
        b"RV10" => Some(codec::RV10),
        b"RV20" => Some(codec::RV20),
        b"RV30" => Some(codec::RV30),
        b"RV40" => Some(codec::RV40),
        _ => None,
    }
}

pub(crate) fn open(ctx: &mut ContainerContext) -> Result<Box<dyn Demuxer>> {
    let raw = ctx
        .io
        .peek_array::<SIGNATURE_SIZE>()
        .ok_or(DemuxError::FormatNotSupported)?;
    let signature: Rv9Signature = parse_struct(&raw, Endian::Big)?;
    if signature.tag != VIDO
        || !(SIGNATURE_SIZE as u32..=HEADER_SIZE_MAX).contains(&signature.header_size)
    {
        return Err(DemuxError::FormatNotSupported);
    }
    let fourcc = signature_codec(&signature).ok_or(DemuxError::FormatNotSupported)?;

    Ok(Box::new(Rv9Reader::open(ctx, &signature, fourcc)?))
}

impl Rv9Reader {
    fn open(ctx: &mut ContainerContext, signature: &Rv9Signature, fourcc: FourCC) -> Result<Self> {
        let header = ctx.io.read_vec(signature.header_size as usize)?;

        ctx.trace.enter("rv9_header");
        ctx.trace.field("header_size", signature.header_size);
        ctx.trace.fourcc("codec", signature.codec);

        let mut format = EsFormat::new(EsType::Video, fourcc);
        format.flags |= EsFormatFlags::FRAMED;
        if let Some(raw) = header.get(VIDEO_INFO_OFFSET..VIDEO_INFO_OFFSET + Rv9VideoInfo::SIZE) {
            let info: Rv9VideoInfo = parse_struct(raw, Endian::Big)?;
            ctx.trace.field("width", info.width);
            ctx.trace.field("height", info.height);
            ctx.trace.field("frame_rate", format_args!("{:#x}", info.frame_rate));
            format.video.width = info.width as u32;
            format.video.height = info.height as u32;
            if info.frame_rate != 0 {
                format.video.frame_rate_num = info.frame_rate;
                format.video.frame_rate_den = 1 << 16;
            }
        }
        ctx.trace.leave();

        format.set_extradata(&header)?;
        ctx.tracks.push(Track::new(format));
        if ctx.io.is_seekable() {
            ctx.capabilities |= Capabilities::CAN_SEEK;
        }

        Ok(Self {
            data_offset: ctx.io.position(),
            frame: None,
        })
    }

    /// Reads the next frame header and segment table, and classifies
    /// the frame.
    fn read_frame_header(&mut self, ctx: &mut ContainerContext) -> Result<Rv9Frame> {
        let io = ctx.io.as_mut();
        let mut head = io.read_array::<FRAME_HEADER_SIZE>()?.to_vec();
        let header: Rv9FrameHeader = parse_struct(&head, Endian::Big)?;
        let table_size = header.segments as u64 * Rv9Segment::SIZE as u64;
        let size = Rv9FrameHeader::SIZE as u64 + table_size + header.length as u64;

        let mut class = FrameClass::Unknown;
        if header.segments <= SEGMENTS_MAX {
            let table = io.read_vec(table_size as usize)?;
            head.extend_from_slice(&table);

            let first_valid = table
                .chunks_exact(Rv9Segment::SIZE)
                .filter_map(|raw| parse_struct::<Rv9Segment>(raw, Endian::Big).ok())
                .find(|segment| segment.valid != 0);

            if let Some(segment) = first_valid.filter(|s| s.offset < header.length) {
                let prefix = io.read_vec(segment.offset as usize + 1)?;
                class = prefix
                    .last()
                    .map_or(FrameClass::Unknown, |byte| FrameClass::from_picture_byte(*byte));
                head.extend_from_slice(&prefix);
            }
        } else {
            debug!("RV9 frame {} has {} segments", header.sequence, header.segments);
        }

        let (flags, pts) = match class {
            FrameClass::Key => (PacketFlags::KEYFRAME, Some(header.timestamp as i64 * 1000)),
            FrameClass::Delta => (PacketFlags::empty(), Some(header.timestamp as i64 * 1000)),
            FrameClass::Unknown => (PacketFlags::empty(), None),
        };

        ctx.trace.enter("rv9_frame");
        ctx.trace.field("length", header.length);
        ctx.trace.field("timestamp", header.timestamp);
        ctx.trace.field("sequence", header.sequence);
        ctx.trace.field("flags", format_args!("{:#x}", header.flags));
        ctx.trace.field("segments", header.segments);
        ctx.trace.leave();

        Ok(Rv9Frame {
            head,
            size,
            delivered: 0,
            pts,
            flags,
        })
    }
}

impl Demuxer for Rv9Reader {
    fn read(&mut self, ctx: &mut ContainerContext, packet: &mut Packet, flags: ReadFlags) -> Result<()> {
        let mut frame = match self.frame.take() {
            Some(frame) => frame,
            None => self.read_frame_header(ctx)?,
        };

        packet.track = 0;
        packet.size = frame.left() as usize;
        packet.flags = frame.flags;
        if frame.delivered == 0 {
            packet.flags |= PacketFlags::FRAME_START;
            packet.pts = frame.pts;
        }

        let head_len = frame.head.len() as u64;
        if flags.contains(ReadFlags::SKIP) {
            let from_stream = frame.size - frame.delivered.max(head_len);
            ctx.io.skip_exact(from_stream)?;
            packet.flags |= PacketFlags::FRAME_END;
            return Ok(());
        }
        if flags.contains(ReadFlags::INFO) {
            self.frame = Some(frame);
            return Ok(());
        }

        let len = (packet.buffer_size as u64).min(frame.left()) as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DemuxError::OutOfMemory(len))?;

        if frame.delivered < head_len {
            let start = frame.delivered as usize;
            let end = (start + len).min(frame.head.len());
            data.extend_from_slice(&frame.head[start..end]);
        }
        let from_stream = len - data.len();
        if from_stream != 0 {
            let start = data.len();
            data.resize(len, 0);
            ctx.io.read_exact_into(&mut data[start..])?;
        }

        frame.delivered += data.len() as u64;
        packet.size = data.len();
        packet.data = data;

        match frame.left() {
            0 => packet.flags |= PacketFlags::FRAME_END,
            _ => self.frame = Some(frame),
        }
        Ok(())
    }

    fn seek(&mut self, ctx: &mut ContainerContext, time: &mut i64, mode: SeekMode, _flags: SeekFlags) -> Result<()> {
        if mode != SeekMode::Time || *time != 0 || !ctx.io.is_seekable() {
            return Err(DemuxError::UnsupportedOperation);
        }
        ctx.io.seek(self.data_offset)?;
        self.frame = None;
        Ok(())
    }
}
