//! Elementary stream format descriptors and tracks.

use bitflags::bitflags;

use crate::{DemuxError, FourCC, Result};

/// Elementary stream type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EsType {
    #[default]
    Unknown,
    Video,
    Audio,
    Subpicture,
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct EsFormatFlags: u32 {
        /// Packets carry whole frames.
        const FRAMED = 0x1;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Frame rate numerator. Zero if unknown.
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    /// Pixel aspect ratio. Zero if unknown.
    pub par_num: u32,
    pub par_den: u32,
}

impl VideoFormat {
    /// Frame duration in microseconds, if the frame rate is known.
    pub fn frame_duration_us(&self) -> Option<i64> {
        match (self.frame_rate_num, self.frame_rate_den) {
            (0, _) | (_, 0) => None,
            (num, den) => Some(1_000_000 * den as i64 / num as i64),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub block_align: u32,
}

/// Format of an elementary stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EsFormat {
    pub es_type: EsType,
    pub codec: FourCC,
    /// E.g. MPEG audio layer.
    pub codec_variant: FourCC,
    /// Bits per second, zero if unknown.
    pub bitrate: u32,
    pub video: VideoFormat,
    pub audio: AudioFormat,
    pub flags: EsFormatFlags,
    /// Codec configuration data.
    pub extradata: Vec<u8>,
}

impl EsFormat {
    pub fn new(es_type: EsType, codec: FourCC) -> Self {
        Self {
            es_type,
            codec,
            ..Default::default()
        }
    }

    pub fn is_framed(&self) -> bool {
        self.flags.contains(EsFormatFlags::FRAMED)
    }

    /// Replaces the extradata with a copy of `data`.
    pub fn set_extradata(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())
            .map_err(|_| DemuxError::OutOfMemory(data.len()))?;
        buf.extend_from_slice(data);
        self.extradata = buf;
        Ok(())
    }
}

/// A track discovered in (or added to) a container.
#[derive(Debug, Default, Clone)]
pub struct Track {
    pub format: EsFormat,
    /// Disabled tracks are still demultiplexed, the flag is
    /// informational for the caller.
    pub enabled: bool,
    /// Opaque DRM data, e.g. from an AVI `strd` chunk.
    pub drm_data: Vec<u8>,
}

impl Track {
    pub fn new(format: EsFormat) -> Self {
        Self {
            format,
            enabled: true,
            drm_data: Vec::new(),
        }
    }

    pub fn es_type(&self) -> EsType {
        self.format.es_type
    }

    pub fn codec(&self) -> FourCC {
        self.format.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fourcc::codec;

    #[test]
    fn frame_duration() {
        let v = VideoFormat {
            frame_rate_num: 25,
            frame_rate_den: 1,
            ..Default::default()
        };
        assert_eq!(v.frame_duration_us(), Some(40_000));
        assert_eq!(VideoFormat::default().frame_duration_us(), None);
    }

    #[test]
    fn new_track_is_enabled() {
        let mut t = Track::new(EsFormat::new(EsType::Audio, codec::MPGA));
        assert!(t.enabled);
        t.format.set_extradata(&[1, 2]).unwrap();
        assert_eq!(t.format.extradata, vec![1, 2]);
        assert!(!t.format.is_framed());
    }
}
