//! Four character codes, used for codecs, codec variants and
//! container chunk identifiers.

use std::fmt;

/// Four character code, stored in file order.
///
/// `FourCC::default()` (all zero bytes) means "unknown".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const UNKNOWN: FourCC = FourCC([0; 4]);

    pub const fn new(fourcc: &[u8; 4]) -> Self {
        Self(*fourcc)
    }

    /// Returns `None` unless `fourcc` is exactly four bytes long.
    pub fn from_slice(fourcc: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = fourcc.try_into().ok()?;
        Some(Self(bytes))
    }

    /// From a little endian value, e.g. as read from a RIFF header.
    pub fn from_u32_le(value: u32) -> Self {
        Self(value.to_le_bytes())
    }

    /// From a big endian value.
    pub fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Pads or truncates `fourcc` to four bytes.
    pub fn from_str(fourcc: &str) -> Self {
        let mut bytes = [b' '; 4];
        fourcc
            .bytes()
            .take(4)
            .enumerate()
            .for_each(|(i, b)| bytes[i] = b);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Case-insensitive comparison, for VfW handler codes
    /// that come in any case (`xvid`, `XVID`).
    pub fn eq_ignore_case(&self, other: &FourCC) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// Lossy string representation
    /// (bytes outside the ASCII range are read as ISO8859-1).
    pub fn to_str(&self) -> String {
        self.0.iter().map(|b| *b as char).collect()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return write!(f, "unknown");
        }
        write!(f, "{}", self.to_str())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC('{}')", self.to_str().escape_default())
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> Self {
        Self(value)
    }
}

/// Codec identifiers reported in `EsFormat::codec`.
pub mod codec {
    use super::FourCC;

    // Video
    pub const H264: FourCC = FourCC::new(b"h264");
    pub const MP1V: FourCC = FourCC::new(b"mp1v");
    pub const MP2V: FourCC = FourCC::new(b"mp2v");
    pub const MP4V: FourCC = FourCC::new(b"mp4v");
    pub const H263: FourCC = FourCC::new(b"h263");
    pub const MJPEG: FourCC = FourCC::new(b"mjpg");
    pub const WMV1: FourCC = FourCC::new(b"wmv1");
    pub const WMV2: FourCC = FourCC::new(b"wmv2");
    pub const WMV3: FourCC = FourCC::new(b"wmv3");
    pub const WVC1: FourCC = FourCC::new(b"wvc1");
    pub const DIV3: FourCC = FourCC::new(b"div3");
    pub const VP6: FourCC = FourCC::new(b"vp6f");
    pub const VP8: FourCC = FourCC::new(b"vp8 ");
    pub const THEORA: FourCC = FourCC::new(b"theo");
    pub const RV10: FourCC = FourCC::new(b"RV10");
    pub const RV20: FourCC = FourCC::new(b"RV20");
    pub const RV30: FourCC = FourCC::new(b"RV30");
    pub const RV40: FourCC = FourCC::new(b"RV40");

    // Uncompressed video
    pub const I420: FourCC = FourCC::new(b"I420");
    pub const YV12: FourCC = FourCC::new(b"YV12");
    pub const I422: FourCC = FourCC::new(b"I422");
    pub const I444: FourCC = FourCC::new(b"I444");
    pub const Y800: FourCC = FourCC::new(b"Y800");
    pub const NV12: FourCC = FourCC::new(b"NV12");
    pub const NV21: FourCC = FourCC::new(b"NV21");
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    pub const YVYU: FourCC = FourCC::new(b"YVYU");
    pub const UYVY: FourCC = FourCC::new(b"UYVY");
    pub const VYUY: FourCC = FourCC::new(b"VYUY");
    pub const RGB16: FourCC = FourCC::new(b"RGB2");
    pub const RGB24: FourCC = FourCC::new(b"RGB3");
    pub const BGR24: FourCC = FourCC::new(b"BGR3");
    pub const RGBA: FourCC = FourCC::new(b"RGBA");
    pub const BGRA: FourCC = FourCC::new(b"BGRA");

    // Audio
    pub const MPGA: FourCC = FourCC::new(b"mpga");
    pub const MP4A: FourCC = FourCC::new(b"mp4a");
    pub const AC3: FourCC = FourCC::new(b"ac3 ");
    pub const EAC3: FourCC = FourCC::new(b"eac3");
    pub const DTS: FourCC = FourCC::new(b"dts ");
    pub const PCM_SIGNED_LE: FourCC = FourCC::new(b"pcml");
    pub const PCM_SIGNED_BE: FourCC = FourCC::new(b"pcmb");
    pub const ALAW: FourCC = FourCC::new(b"alaw");
    pub const MULAW: FourCC = FourCC::new(b"ulaw");
    pub const ADPCM_MS: FourCC = FourCC::new(b"ms\0\x02");
    pub const WMA1: FourCC = FourCC::new(b"wma1");
    pub const WMA2: FourCC = FourCC::new(b"wma2");
    pub const WMAP: FourCC = FourCC::new(b"wmap");
    pub const WMAL: FourCC = FourCC::new(b"wmal");
    pub const VORBIS: FourCC = FourCC::new(b"vorb");
}

/// Codec variants reported in `EsFormat::codec_variant`.
pub mod variant {
    use super::FourCC;

    pub const MPGA_L1: FourCC = FourCC::new(b"mp1 ");
    pub const MPGA_L2: FourCC = FourCC::new(b"mp2 ");
    pub const MPGA_L3: FourCC = FourCC::new(b"mp3 ");
    pub const H264_AVC1: FourCC = FourCC::new(b"avc1");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct() {
        assert_eq!(FourCC::from_slice(b"RIFF"), Some(FourCC::new(b"RIFF")));
        assert_eq!(FourCC::from_slice(b"RIF"), None);
        assert_eq!(FourCC::from_u32_le(0x4646_4952), FourCC::new(b"RIFF"));
        assert_eq!(FourCC::from_u32(0x5249_4646), FourCC::new(b"RIFF"));
        assert_eq!(FourCC::from_str("ac3"), codec::AC3);
    }

    #[test]
    fn display() {
        assert_eq!(codec::H264.to_string(), "h264");
        assert_eq!(FourCC::UNKNOWN.to_string(), "unknown");
        assert!(FourCC::new(b"xvid").eq_ignore_case(&FourCC::new(b"XVID")));
    }
}
