//! RIFF/AVI chunk identifiers and fixed-layout structures.
//! See <https://learn.microsoft.com/en-us/windows/win32/directshow/avi-riff-file-reference>
//! and the OpenDML AVI File Format Extensions 1.02.

use binrw::BinRead;

use crate::{
    fields::FixedSize,
    fourcc::{codec, variant},
    FourCC,
};

pub(crate) const RIFF: FourCC = FourCC::new(b"RIFF");
pub(crate) const LIST: FourCC = FourCC::new(b"LIST");
pub(crate) const AVI: FourCC = FourCC::new(b"AVI ");
pub(crate) const AVIX: FourCC = FourCC::new(b"AVIX");
pub(crate) const HDRL: FourCC = FourCC::new(b"hdrl");
pub(crate) const AVIH: FourCC = FourCC::new(b"avih");
pub(crate) const STRL: FourCC = FourCC::new(b"strl");
pub(crate) const STRH: FourCC = FourCC::new(b"strh");
pub(crate) const STRF: FourCC = FourCC::new(b"strf");
pub(crate) const STRD: FourCC = FourCC::new(b"strd");
pub(crate) const INDX: FourCC = FourCC::new(b"indx");
pub(crate) const MOVI: FourCC = FourCC::new(b"movi");
pub(crate) const REC: FourCC = FourCC::new(b"rec ");
pub(crate) const IDX1: FourCC = FourCC::new(b"idx1");

// 'strh' fccType
pub(crate) const VIDS: FourCC = FourCC::new(b"vids");
pub(crate) const AUDS: FourCC = FourCC::new(b"auds");
pub(crate) const TXTS: FourCC = FourCC::new(b"txts");

// 'avih' dwFlags
pub(crate) const AVIF_MUSTUSEINDEX: u32 = 0x0000_0020;
/// (OpenDML) keyframe information reliable.
pub(crate) const AVIF_TRUSTCKTYPE: u32 = 0x0000_0800;

// 'strh' dwFlags
pub(crate) const AVISF_DISABLED: u32 = 0x0000_0001;

// 'idx1' dwFlags
pub(crate) const AVIIF_LIST: u32 = 0x0000_0001;
pub(crate) const AVIIF_KEYFRAME: u32 = 0x0000_0010;
pub(crate) const AVIIF_NOTIME: u32 = 0x0000_0100;

// OpenDML bIndexType
pub(crate) const AVI_INDEX_OF_INDEXES: u8 = 0x00;
pub(crate) const AVI_INDEX_OF_CHUNKS: u8 = 0x01;
pub(crate) const AVI_INDEX_DELTAFRAME: u32 = 0x8000_0000;

/// Kind of `movi` data chunk, from the two last characters of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataChunkType {
    /// `db`, uncompressed video.
    Uncompressed,
    /// `dc`, compressed video.
    Compressed,
    /// `dd`, DRM data for the next video chunk.
    Drm,
    /// `wb`, audio.
    Audio,
}

impl DataChunkType {
    pub(crate) fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.0[2..] {
            b"db" => Some(Self::Uncompressed),
            b"dc" => Some(Self::Compressed),
            b"dd" => Some(Self::Drm),
            b"wb" => Some(Self::Audio),
            _ => None,
        }
    }

    pub(crate) fn is_video(&self) -> bool {
        !matches!(self, Self::Audio)
    }
}

/// Stream number from the two leading digits of a data chunk id.
pub(crate) fn stream_number(fourcc: FourCC) -> Option<usize> {
    let [hi, lo, ..] = fourcc.0;
    match (hi.is_ascii_digit(), lo.is_ascii_digit()) {
        (true, true) => Some((hi - b'0') as usize * 10 + (lo - b'0') as usize),
        _ => None,
    }
}

/// Data chunk id for `stream`, e.g. `01wb`.
pub(crate) fn data_chunk_id(stream: usize, kind: &[u8; 2]) -> FourCC {
    let stream = stream % 100;
    FourCC([
        b'0' + (stream / 10) as u8,
        b'0' + (stream % 10) as u8,
        kind[0],
        kind[1],
    ])
}

/// `avih`, main AVI header.
#[derive(Debug, Default, BinRead)]
#[br(little)]
pub(crate) struct MainHeader {
    pub(crate) micro_sec_per_frame: u32,
    pub(crate) max_bytes_per_sec: u32,
    pub(crate) padding_granularity: u32,
    pub(crate) flags: u32,
    pub(crate) total_frames: u32,
    pub(crate) initial_frames: u32,
    pub(crate) streams: u32,
    pub(crate) suggested_buffer_size: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    _reserved: [u32; 4],
}

impl FixedSize for MainHeader {
    const SIZE: usize = 56;
}

/// `strh`, stream header.
#[derive(Debug, Default, BinRead)]
#[br(little)]
pub(crate) struct StreamHeader {
    #[br(map = |b: [u8; 4]| FourCC(b))]
    pub(crate) fcc_type: FourCC,
    #[br(map = |b: [u8; 4]| FourCC(b))]
    pub(crate) fcc_handler: FourCC,
    pub(crate) flags: u32,
    pub(crate) priority: u16,
    pub(crate) language: u16,
    pub(crate) initial_frames: u32,
    pub(crate) scale: u32,
    pub(crate) rate: u32,
    pub(crate) start: u32,
    pub(crate) length: u32,
    pub(crate) suggested_buffer_size: u32,
    pub(crate) quality: u32,
    pub(crate) sample_size: u32,
    /// left, top, right, bottom
    pub(crate) frame: [i16; 4],
}

impl FixedSize for StreamHeader {
    const SIZE: usize = 56;
}

/// `strf` for video streams.
#[derive(Debug, Default, BinRead)]
#[br(little)]
pub(crate) struct BitmapInfoHeader {
    pub(crate) size: u32,
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) planes: u16,
    pub(crate) bit_count: u16,
    #[br(map = |b: [u8; 4]| FourCC(b))]
    pub(crate) compression: FourCC,
    pub(crate) size_image: u32,
    pub(crate) x_pels_per_meter: i32,
    pub(crate) y_pels_per_meter: i32,
    pub(crate) clr_used: u32,
    pub(crate) clr_important: u32,
}

impl FixedSize for BitmapInfoHeader {
    const SIZE: usize = 40;
}

/// `strf` for audio streams. `cb_size` is absent in
/// the older 16 byte `WAVEFORMAT`.
#[derive(Debug, Default, BinRead)]
#[br(little)]
pub(crate) struct WaveFormatEx {
    pub(crate) format_tag: u16,
    pub(crate) channels: u16,
    pub(crate) samples_per_sec: u32,
    pub(crate) avg_bytes_per_sec: u32,
    pub(crate) block_align: u16,
    pub(crate) bits_per_sample: u16,
    pub(crate) cb_size: u16,
}

impl FixedSize for WaveFormatEx {
    const SIZE: usize = 18;
}

impl WaveFormatEx {
    pub(crate) const MIN_SIZE: usize = 16;
}

/// `idx1` entry.
#[derive(Debug, Default, Clone, Copy, BinRead)]
#[br(little)]
pub(crate) struct Idx1Entry {
    #[br(map = |b: [u8; 4]| FourCC(b))]
    pub(crate) chunk_id: FourCC,
    pub(crate) flags: u32,
    pub(crate) offset: u32,
    pub(crate) size: u32,
}

impl FixedSize for Idx1Entry {
    const SIZE: usize = 16;
}

/// Common OpenDML index header, following the chunk header.
/// `qword` is `qwBaseOffset` for standard indexes, reserved otherwise.
#[derive(Debug, Default, BinRead)]
#[br(little)]
pub(crate) struct IndexHeader {
    pub(crate) longs_per_entry: u16,
    pub(crate) index_sub_type: u8,
    pub(crate) index_type: u8,
    pub(crate) entries_in_use: u32,
    #[br(map = |b: [u8; 4]| FourCC(b))]
    pub(crate) chunk_id: FourCC,
    pub(crate) qword: u64,
    _reserved: u32,
}

impl FixedSize for IndexHeader {
    const SIZE: usize = 24;
}

/// `indx` super index entry, points at an `ix##` standard index.
#[derive(Debug, Default, BinRead)]
#[br(little)]
pub(crate) struct SuperIndexEntry {
    pub(crate) offset: u64,
    pub(crate) size: u32,
    pub(crate) duration: u32,
}

impl FixedSize for SuperIndexEntry {
    const SIZE: usize = 16;
}

/// `ix##` standard index entry. The top bit of `size`
/// marks delta frames.
#[derive(Debug, Default, BinRead)]
#[br(little)]
pub(crate) struct StandardIndexEntry {
    pub(crate) offset: u32,
    pub(crate) size: u32,
}

impl FixedSize for StandardIndexEntry {
    const SIZE: usize = 8;
}

/// Maps a VfW handler / `biCompression` code to a codec.
pub(crate) fn vfw_fourcc_to_codec(fourcc: FourCC) -> FourCC {
    const TABLE: &[(&[u8; 4], FourCC)] = &[
        (b"XVID", codec::MP4V),
        (b"DIVX", codec::MP4V),
        (b"DX50", codec::MP4V),
        (b"FMP4", codec::MP4V),
        (b"MP4V", codec::MP4V),
        (b"M4S2", codec::MP4V),
        (b"H264", codec::H264),
        (b"X264", codec::H264),
        (b"AVC1", codec::H264),
        (b"DAVC", codec::H264),
        (b"H263", codec::H263),
        (b"MJPG", codec::MJPEG),
        (b"DIV3", codec::DIV3),
        (b"MP43", codec::DIV3),
        (b"WMV1", codec::WMV1),
        (b"WMV2", codec::WMV2),
        (b"WMV3", codec::WMV3),
        (b"WVC1", codec::WVC1),
        (b"VP80", codec::VP8),
        (b"VP6F", codec::VP6),
        (b"MPG1", codec::MP1V),
        (b"MPG2", codec::MP2V),
        (b"I420", codec::I420),
        (b"IYUV", codec::I420),
        (b"YV12", codec::YV12),
        (b"YUY2", codec::YUYV),
        (b"UYVY", codec::UYVY),
    ];
    TABLE
        .iter()
        .find(|(fcc, _)| FourCC::new(fcc).eq_ignore_case(&fourcc))
        .map(|(_, codec)| *codec)
        .unwrap_or(fourcc)
}

/// Maps a `wFormatTag` to codec and codec variant.
pub(crate) fn waveformat_to_codec(format_tag: u16) -> (FourCC, FourCC) {
    match format_tag {
        0x0001 => (codec::PCM_SIGNED_LE, FourCC::UNKNOWN),
        0x0002 => (codec::ADPCM_MS, FourCC::UNKNOWN),
        0x0006 => (codec::ALAW, FourCC::UNKNOWN),
        0x0007 => (codec::MULAW, FourCC::UNKNOWN),
        0x0050 => (codec::MPGA, variant::MPGA_L2),
        0x0055 => (codec::MPGA, variant::MPGA_L3),
        0x00FF | 0x1610 | 0x4143 | 0x706D => (codec::MP4A, FourCC::UNKNOWN),
        0x0160 => (codec::WMA1, FourCC::UNKNOWN),
        0x0161 => (codec::WMA2, FourCC::UNKNOWN),
        0x0162 => (codec::WMAP, FourCC::UNKNOWN),
        0x0163 => (codec::WMAL, FourCC::UNKNOWN),
        0x2000 => (codec::AC3, FourCC::UNKNOWN),
        0x2001 => (codec::DTS, FourCC::UNKNOWN),
        0x566F => (codec::VORBIS, FourCC::UNKNOWN),
        _ => (FourCC::UNKNOWN, FourCC::UNKNOWN),
    }
}

/// `WAVE_FORMAT_EXTENSIBLE`, the actual format tag sits at the
/// start of the `SubFormat` GUID in the extension data.
pub(crate) const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_chunk_ids() {
        let id = FourCC::new(b"01wb");
        assert_eq!(stream_number(id), Some(1));
        assert_eq!(DataChunkType::from_fourcc(id), Some(DataChunkType::Audio));
        assert_eq!(stream_number(FourCC::new(b"ix00")), None);
        assert_eq!(DataChunkType::from_fourcc(FourCC::new(b"ix00")), None);
        assert_eq!(data_chunk_id(12, b"dc"), FourCC::new(b"12dc"));
        assert!(DataChunkType::Drm.is_video());
    }

    #[test]
    fn codec_mapping() {
        assert_eq!(vfw_fourcc_to_codec(FourCC::new(b"xvid")), codec::MP4V);
        assert_eq!(vfw_fourcc_to_codec(FourCC::new(b"H264")), codec::H264);
        assert_eq!(vfw_fourcc_to_codec(FourCC::new(b"abcd")), FourCC::new(b"abcd"));
        assert_eq!(waveformat_to_codec(0x0055), (codec::MPGA, variant::MPGA_L3));
        assert_eq!(waveformat_to_codec(0x1234).0, FourCC::UNKNOWN);
    }
}
