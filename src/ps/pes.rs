//! PES packet headers and stream classification.

use crate::{
    bits::BitReader,
    fields::{ByteStreamExt, FieldTrace},
    format::{EsFormat, EsType},
    fourcc::{codec, variant},
    stream::ByteStream,
    DemuxError, FourCC, Result,
};

pub(crate) const PRIVATE_STREAM_1: u8 = 0xBD;

/// Stream ids without PES header fields or payload of interest:
/// program stream map, padding, private stream 2, ECM, EMM,
/// DSM-CC, H.222.1 type E and the program stream directory.
pub(crate) const SKIPPED_STREAM_IDS: [u8; 8] = [0xBC, 0xBE, 0xBF, 0xF0, 0xF1, 0xF2, 0xF8, 0xFF];

/// Timestamps from a PES header, 90 kHz.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PesTimes {
    pub(crate) pts: Option<u64>,
    pub(crate) dts: Option<u64>,
}

fn remaining(length: &mut u32, n: u32) -> Result<()> {
    match length.checked_sub(n) {
        Some(left) => {
            *length = left;
            Ok(())
        }
        None => Err(DemuxError::corrupted("PES header exceeds packet length")),
    }
}

fn peek_u8(io: &mut dyn ByteStream) -> Result<u8> {
    io.peek_array::<1>().map(|[b]| b).ok_or(DemuxError::Eos)
}

/// Reads a 5 byte PTS or 10 byte PTS/DTS pair per `pts_dts`.
/// Other flag values read nothing.
fn read_pes_time(
    io: &mut dyn ByteStream,
    trace: &mut FieldTrace,
    length: &mut u32,
    pts_dts: u8,
) -> Result<Option<PesTimes>> {
    match pts_dts {
        0b10 => {
            remaining(length, 5)?;
            let header = io.read_array::<5>()?;
            let mut bits = BitReader::new(&header);
            bits.marker(4, 0b0010, "'0010' marker bits")?;
            let pts = bits.read_clock33("PTS")?;
            trace.field("PTS", pts);
            Ok(Some(PesTimes { pts: Some(pts), dts: None }))
        }
        0b11 => {
            remaining(length, 10)?;
            let header = io.read_array::<10>()?;
            let mut bits = BitReader::new(&header);
            bits.marker(4, 0b0011, "'0011' marker bits")?;
            let pts = bits.read_clock33("PTS")?;
            bits.marker(4, 0b0001, "'0001' marker bits")?;
            let dts = bits.read_clock33("DTS")?;
            trace.field("PTS", pts);
            trace.field("DTS", dts);
            Ok(Some(PesTimes {
                pts: Some(pts),
                dts: Some(dts),
            }))
        }
        _ => Ok(None),
    }
}

fn read_pes_extension(io: &mut dyn ByteStream, trace: &mut FieldTrace, length: &mut u32) -> Result<()> {
    trace.enter("PES_extension");
    remaining(length, 1)?;
    let [flags] = io.read_array::<1>()?;
    let private_data = flags & 0x80 != 0;
    let pack_header = flags & 0x40 != 0;
    let sequence_counter = flags & 0x20 != 0;
    let pstd_buffer = flags & 0x10 != 0;
    let extension_2 = flags & 0x01 != 0;

    if private_data {
        remaining(length, 16)?;
        io.skip_exact(16)?;
    }

    if pack_header {
        remaining(length, 1)?;
        let [pack_field_length] = io.read_array::<1>()?;
        trace.field("pack_field_length", pack_field_length);
        remaining(length, pack_field_length as u32)?;
        io.skip_exact(pack_field_length as u64)?;
    }

    if sequence_counter {
        remaining(length, 2)?;
        let header = io.read_array::<2>()?;
        let mut bits = BitReader::new(&header);
        bits.marker_bit("marker_bit")?;
        let counter = bits.read_u8(7)?;
        bits.marker_bit("marker_bit")?;
        trace.field("program_packet_sequence_counter", counter);
    }

    if pstd_buffer {
        remaining(length, 2)?;
        let header = io.read_array::<2>()?;
        let mut bits = BitReader::new(&header);
        bits.marker(2, 0b01, "'01' marker bits")?;
        bits.skip(1)?;
        let size = bits.read_u32(13)?;
        trace.field("P-STD_buffer_size", size);
    }

    if extension_2 {
        remaining(length, 1)?;
        let [field_length] = io.read_array::<1>()?;
        if field_length & 0x80 == 0 {
            return Err(DemuxError::corrupted("PES_extension_field_length: marker bit"));
        }
        let field_length = (field_length & 0x7F) as u32;
        trace.field("PES_extension_field_length", field_length);
        remaining(length, field_length)?;
        io.skip_exact(field_length as u64)?;
    }

    trace.leave();
    Ok(())
}

/// Parses the PES header following stream id and packet length.
/// `length` holds the remaining packet length and is reduced
/// by the bytes consumed.
pub(crate) fn read_pes_header(io: &mut dyn ByteStream, trace: &mut FieldTrace, length: &mut u32) -> Result<PesTimes> {
    if *length < 3 {
        return Err(DemuxError::corrupted("PES packet too short"));
    }

    if peek_u8(io)? & 0xC0 == 0x80 {
        read_mpeg2_header(io, trace, length)
    } else {
        read_mpeg1_header(io, trace, length)
    }
}

fn read_mpeg2_header(io: &mut dyn ByteStream, trace: &mut FieldTrace, length: &mut u32) -> Result<PesTimes> {
    let header = io.read_array::<3>()?;
    *length -= 3;
    let mut bits = BitReader::new(&header);
    bits.marker(2, 0b10, "'10' marker bits")?;
    // scrambling control, priority, alignment, copyright, original
    bits.skip(6)?;
    let pts_dts = bits.read_u8(2)?;
    let escr = bits.read_bit()?;
    let es_rate = bits.read_bit()?;
    let trick_mode = bits.read_bit()?;
    let copy_info = bits.read_bit()?;
    let crc = bits.read_bit()?;
    let extension = bits.read_bit()?;
    let mut header_length = bits.read_u32(8)?;
    trace.field("PTS_DTS_flags", pts_dts);
    trace.field("PES_header_data_length", header_length);

    let start = *length;
    let times = read_pes_time(io, trace, length, pts_dts)?.unwrap_or_default();

    if escr {
        remaining(length, 6)?;
        let header = io.read_array::<6>()?;
        let mut bits = BitReader::new(&header);
        bits.skip(2)?;
        let escr_base = bits.read_clock33("ESCR_base")?;
        bits.read_bits(9)?;
        bits.marker_bit("marker_bit")?;
        trace.field("ESCR_base", escr_base);
    }

    if es_rate {
        remaining(length, 3)?;
        let header = io.read_array::<3>()?;
        let mut bits = BitReader::new(&header);
        bits.marker_bit("marker_bit")?;
        let rate = bits.read_u32(22)?;
        bits.marker_bit("marker_bit")?;
        trace.field("ES_rate", rate);
    }

    if trick_mode {
        remaining(length, 1)?;
        let [control] = io.read_array::<1>()?;
        trace.field("trick_mode_control", control >> 5);
    }

    if copy_info {
        remaining(length, 1)?;
        let header = io.read_array::<1>()?;
        let mut bits = BitReader::new(&header);
        bits.marker_bit("marker_bit")?;
    }

    if crc {
        remaining(length, 2)?;
        io.skip_exact(2)?;
    }

    if extension {
        read_pes_extension(io, trace, length)?;
    }

    // Header stuffing
    header_length = header_length.saturating_sub(start - *length);
    if header_length <= *length {
        io.skip_exact(header_length as u64)?;
        *length -= header_length;
    }

    Ok(times)
}

fn read_mpeg1_header(io: &mut dyn ByteStream, trace: &mut FieldTrace, length: &mut u32) -> Result<PesTimes> {
    if *length < 12 {
        return Err(DemuxError::corrupted("MPEG-1 PES packet too short"));
    }

    while *length > 0 && peek_u8(io)? == 0xFF {
        io.skip_exact(1)?;
        *length -= 1;
    }
    if *length == 0 {
        return Err(DemuxError::corrupted("MPEG-1 PES packet is all stuffing"));
    }

    // STD buffer scale and size
    if peek_u8(io)? & 0xC0 == 0x40 {
        remaining(length, 2)?;
        io.skip_exact(2)?;
    }

    let pts_dts = (peek_u8(io)? & 0x30) >> 4;
    match read_pes_time(io, trace, length, pts_dts)? {
        Some(times) => Ok(times),
        None => {
            // '0000 1111'
            remaining(length, 1)?;
            io.skip_exact(1)?;
            Ok(PesTimes::default())
        }
    }
}

/// Elementary stream type, codec and codec variant for a PES stream id.
pub(crate) fn stream_coding(stream_id: u8) -> (EsType, FourCC, FourCC) {
    match stream_id {
        0xE2 => (EsType::Video, codec::H264, FourCC::UNKNOWN),
        0xE0..=0xEF => (EsType::Video, codec::MP2V, FourCC::UNKNOWN),
        0xC0..=0xDF => (EsType::Audio, codec::MPGA, variant::MPGA_L2),
        _ => (EsType::Unknown, FourCC::UNKNOWN, FourCC::UNKNOWN),
    }
}

/// Reads the private stream 1 sub-stream id and classifies it.
pub(crate) fn read_private_stream_1_coding(
    io: &mut dyn ByteStream,
    trace: &mut FieldTrace,
    length: &mut u32,
) -> Result<(EsType, FourCC, u8)> {
    remaining(length, 1)?;
    let [id] = io.read_array::<1>()?;
    trace.field("private_stream_1 byte", format_args!("{id:#x}"));

    let (es_type, codec) = match id {
        // Subpictures carry no codec, and are skipped.
        0x20..=0x3F => (EsType::Subpicture, FourCC::UNKNOWN),
        0x80..=0x87 | 0xC0..=0xCF => (EsType::Audio, codec::AC3),
        0x88..=0x8F | 0x98..=0x9F => (EsType::Audio, codec::DTS),
        0xA0..=0xBF => (EsType::Audio, codec::PCM_SIGNED_BE),
        _ => {
            trace.field("unknown private_stream_1 byte", id);
            (EsType::Unknown, FourCC::UNKNOWN)
        }
    };
    Ok((es_type, codec, id))
}

const LPCM_SAMPLE_RATES: [u32; 4] = [48_000, 96_000, 44_100, 32_000];
const LPCM_BITS: [u32; 4] = [16, 20, 24, 0];

/// Reads the private stream 1 payload header: the LPCM header for
/// PCM tracks, three bytes (frame count, first access unit) otherwise.
pub(crate) fn read_private_stream_1_format(
    io: &mut dyn ByteStream,
    trace: &mut FieldTrace,
    format: &mut EsFormat,
    length: &mut u32,
) -> Result<()> {
    if format.codec != codec::PCM_SIGNED_BE {
        remaining(length, 3)?;
        return io.skip_exact(3);
    }

    remaining(length, 6)?;
    let header = io.read_array::<6>()?;
    let mut bits = BitReader::new(&header);
    // frame count, first access unit, emphasis, mute, reserved, frame number
    bits.skip(32)?;
    let quant = bits.read_u8(2)? as usize;
    let freq = bits.read_u8(2)? as usize;
    bits.skip(1)?;
    let channels = bits.read_u32(3)?;

    let audio = &mut format.audio;
    audio.sample_rate = LPCM_SAMPLE_RATES[freq];
    audio.bits_per_sample = LPCM_BITS[quant];
    audio.channels = channels + 1;
    audio.block_align = (audio.channels * audio.bits_per_sample + 7) / 8;
    trace.field("sample_rate", audio.sample_rate);
    trace.field("bits_per_sample", audio.bits_per_sample);
    trace.field("channels", audio.channels);
    Ok(())
}

/// Swaps each 16 bit word, for LPCM payloads.
pub(crate) fn swap_lpcm(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::stream::IoStream;

    fn pts_bytes(marker: u8, pts: u64) -> [u8; 5] {
        [
            (marker << 4) | ((pts >> 29) & 0x0E) as u8 | 1,
            (pts >> 22) as u8,
            ((pts >> 14) & 0xFE) as u8 | 1,
            (pts >> 7) as u8,
            ((pts << 1) & 0xFE) as u8 | 1,
        ]
    }

    #[test]
    fn mpeg2_header_with_pts() {
        let mut data = vec![0x80, 0x80, 5];
        data.extend_from_slice(&pts_bytes(0b0010, 123_456));
        data.extend_from_slice(&[0xAA; 4]);
        let mut length = data.len() as u32;
        let mut io = IoStream::new(Cursor::new(data)).unwrap();
        let times = read_pes_header(&mut io, &mut FieldTrace::default(), &mut length).unwrap();
        assert_eq!(times.pts, Some(123_456));
        assert_eq!(times.dts, None);
        assert_eq!(length, 4);
        assert_eq!(io.position(), 8);
    }

    #[test]
    fn mpeg2_header_stuffing_is_skipped() {
        // no timestamps, 2 stuffing bytes
        let mut data = vec![0x80, 0x00, 2, 0xFF, 0xFF];
        data.extend_from_slice(&[0x11; 3]);
        let mut length = data.len() as u32;
        let mut io = IoStream::new(Cursor::new(data)).unwrap();
        let times = read_pes_header(&mut io, &mut FieldTrace::default(), &mut length).unwrap();
        assert_eq!(times, PesTimes::default());
        assert_eq!(length, 3);
    }

    #[test]
    fn mpeg1_header_with_stuffing_and_pts() {
        let mut data = vec![0xFF, 0xFF];
        data.extend_from_slice(&pts_bytes(0b0010, 90_000));
        data.extend_from_slice(&[0; 8]);
        let mut length = data.len() as u32;
        let mut io = IoStream::new(Cursor::new(data)).unwrap();
        let times = read_pes_header(&mut io, &mut FieldTrace::default(), &mut length).unwrap();
        assert_eq!(times.pts, Some(90_000));
        assert_eq!(length, 8);
    }

    #[test]
    fn bad_pts_marker() {
        let mut pts = pts_bytes(0b0010, 1);
        pts[2] &= 0xFE;
        let mut data = vec![0x80, 0x80, 5];
        data.extend_from_slice(&pts);
        let mut length = data.len() as u32;
        let mut io = IoStream::new(Cursor::new(data)).unwrap();
        let res = read_pes_header(&mut io, &mut FieldTrace::default(), &mut length);
        assert!(matches!(res, Err(DemuxError::Corrupted(_))));
    }

    #[test]
    fn classification() {
        assert_eq!(stream_coding(0xE2).1, codec::H264);
        assert_eq!(stream_coding(0xE0).1, codec::MP2V);
        assert_eq!(stream_coding(0xC3).2, variant::MPGA_L2);
        assert_eq!(stream_coding(0xBD).0, EsType::Unknown);

        let mut trace = FieldTrace::default();
        for (id, expected) in [
            (0x80, codec::AC3),
            (0x89, codec::DTS),
            (0xA0, codec::PCM_SIGNED_BE),
            (0x20, FourCC::UNKNOWN),
        ] {
            let mut length = 1;
            let mut io = IoStream::new(Cursor::new(vec![id])).unwrap();
            let (_, codec, sub) = read_private_stream_1_coding(&mut io, &mut trace, &mut length).unwrap();
            assert_eq!(codec, expected);
            assert_eq!(sub, id);
        }
    }

    #[test]
    fn lpcm_header() {
        // 20 bit, 96 kHz, 6 channels
        let data = vec![0x01, 0x00, 0x04, 0x00, 0b0101_0101, 0x80];
        let mut format = EsFormat::new(EsType::Audio, codec::PCM_SIGNED_BE);
        let mut length = 10;
        let mut io = IoStream::new(Cursor::new(data)).unwrap();
        read_private_stream_1_format(&mut io, &mut FieldTrace::default(), &mut format, &mut length).unwrap();
        assert_eq!(format.audio.sample_rate, 96_000);
        assert_eq!(format.audio.bits_per_sample, 20);
        assert_eq!(format.audio.channels, 6);
        assert_eq!(format.audio.block_align, 15);
        assert_eq!(length, 4);

        let mut pcm = [1, 2, 3, 4, 5];
        swap_lpcm(&mut pcm);
        assert_eq!(pcm, [2, 1, 4, 3, 5]);
    }
}
