//! Demultiplexed packets and read/seek flags.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u32 {
        const KEYFRAME = 0x01;
        const FRAME_START = 0x02;
        const FRAME_END = 0x04;
        /// Packet holds a complete frame.
        const FRAME = Self::FRAME_START.bits() | Self::FRAME_END.bits();
        const DISCONTINUITY = 0x08;
        const ENCRYPTED = 0x10;
        /// Codec configuration data.
        const CONFIG = 0x20;
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ReadFlags: u32 {
        /// Fill in packet metadata only. The payload stays pending.
        const INFO = 0x1;
        /// Drop the pending payload without copying it.
        const SKIP = 0x2;
        /// Read the track set in `Packet::track`, out of interleave order.
        const FORCE_TRACK = 0x4;
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct SeekFlags: u32 {
        const PRECISE = 0x1;
        /// Seek to the first keyframe at or after the target.
        const FORWARD = 0x2;
    }
}

/// How the seek target is expressed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Microseconds.
    #[default]
    Time,
    /// Per mille of the stream. No reader module supports this.
    Percent,
}

/// A unit of demultiplexed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Track index.
    pub track: usize,
    /// Payload. Empty after `INFO` or `SKIP` reads.
    pub data: Vec<u8>,
    /// Payload size in bytes. For `INFO` reads, the size of the
    /// pending payload.
    pub size: usize,
    /// Maximum number of bytes a single read may deliver.
    pub buffer_size: usize,
    /// Presentation time in microseconds.
    pub pts: Option<i64>,
    /// Decoding time in microseconds.
    pub dts: Option<i64>,
    pub flags: PacketFlags,
}

impl Default for Packet {
    fn default() -> Self {
        Self::with_buffer_size(Self::DEFAULT_BUFFER_SIZE)
    }
}

impl Packet {
    pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            track: 0,
            data: Vec::new(),
            size: 0,
            buffer_size,
            pts: None,
            dts: None,
            flags: PacketFlags::empty(),
        }
    }

    /// Packet targeting `track`, for `ReadFlags::FORCE_TRACK` reads.
    pub fn for_track(track: usize) -> Self {
        Self {
            track,
            ..Default::default()
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Presentation time as `time::Duration`.
    pub fn pts_duration(&self) -> Option<time::Duration> {
        self.pts.map(time::Duration::microseconds)
    }

    /// Clears everything but `track` and `buffer_size`
    /// ahead of the next read.
    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.size = 0;
        self.pts = None;
        self.dts = None;
        self.flags = PacketFlags::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_start_and_end() {
        assert_eq!(
            PacketFlags::FRAME,
            PacketFlags::FRAME_START | PacketFlags::FRAME_END
        );
        assert_eq!(PacketFlags::FRAME.bits(), 0x06);
    }

    #[test]
    fn pts_as_duration() {
        let mut p = Packet::for_track(1);
        assert_eq!(p.pts_duration(), None);
        p.pts = Some(1_500_000);
        assert_eq!(p.pts_duration(), Some(time::Duration::milliseconds(1500)));
        p.reset();
        assert_eq!(p.track, 1);
        assert_eq!(p.pts, None);
    }
}
