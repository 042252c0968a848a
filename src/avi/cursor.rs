//! Per-track chunk cursors and timing.
//!
//! All tracks normally share one global stream cursor and are read in
//! natural interleave order. A track read out of order (`FORCE_TRACK`)
//! gets a private cursor until the global read catches up with it.

use crate::{PacketFlags, SeekFlags};

/// Maximum size of a `##dd` chunk.
pub(crate) const AVI_DD_MAX: usize = 16;

/// Buffered `##dd` payload, prepended to the next data chunk
/// of the same track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DrmPrefix {
    pub(crate) track: usize,
    pub(crate) data: [u8; AVI_DD_MAX],
    pub(crate) offs: usize,
    pub(crate) len: usize,
}

impl DrmPrefix {
    pub(crate) fn pending(&self) -> &[u8] {
        &self.data[self.offs..self.offs + self.len]
    }
}

/// Read position within the `movi` data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StreamState {
    /// Track owning the current chunk.
    pub(crate) current_track: usize,
    /// Where the next read continues.
    pub(crate) data_offset: u64,
    pub(crate) chunk_size: u32,
    pub(crate) chunk_data_left: u32,
    pub(crate) prefix: DrmPrefix,
}

impl StreamState {
    pub(crate) fn at(data_offset: u64, current_track: usize) -> Self {
        Self {
            current_track,
            data_offset,
            ..Default::default()
        }
    }
}

/// Which stream cursor a track reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamCursor {
    Global,
    Local(StreamState),
}

impl Default for StreamCursor {
    fn default() -> Self {
        Self::Global
    }
}

impl StreamCursor {
    pub(crate) fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    pub(crate) fn local(&self) -> Option<&StreamState> {
        match self {
            Self::Global => None,
            Self::Local(state) => Some(state),
        }
    }
}

/// Position of a track in terms of its own chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChunkState {
    /// Chunk count.
    pub(crate) index: u64,
    /// Byte count of all previous chunks.
    pub(crate) offs: u64,
    /// Microseconds.
    pub(crate) time_pos: i64,
    pub(crate) flags: PacketFlags,
}

/// `strh` derived time base, `scale/rate` seconds per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TrackTiming {
    pub(crate) time_num: u32,
    pub(crate) time_den: u32,
    /// Microseconds, from `dwStart`.
    pub(crate) time_start: i64,
    /// Microseconds, from `dwLength`.
    pub(crate) duration: i64,
    /// Zero for chunk-counted streams.
    pub(crate) sample_size: u32,
}

impl TrackTiming {
    /// Reduces `scale/rate` by their GCD. A zero rate is taken as one.
    pub(crate) fn new(scale: u32, rate: u32, start: u32, length: u32, sample_size: u32) -> Self {
        let rate = rate.max(1);
        let div = gcd(scale, rate);
        let mut timing = Self {
            time_num: scale / div,
            time_den: rate / div,
            sample_size,
            ..Default::default()
        };
        timing.time_start = timing.ticks_to_us(start as u64);
        timing.duration = timing.ticks_to_us(length as u64);
        timing
    }

    pub(crate) fn ticks_to_us(&self, ticks: u64) -> i64 {
        if self.time_den == 0 {
            return 0;
        }
        (1_000_000_i128 * self.time_num as i128 * ticks as i128 / self.time_den as i128) as i64
    }

    /// Time of the chunk `chunk` points at.
    pub(crate) fn chunk_time(&self, chunk: &ChunkState) -> i64 {
        match self.sample_size {
            0 => self.time_start + self.ticks_to_us(chunk.index),
            size => {
                let samples = (chunk.offs + size as u64 / 2) / size as u64;
                self.time_start + self.ticks_to_us(samples)
            }
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Keyframe aware comparison of an index entry with a seek target:
/// `0` use this chunk, `1` past the target (use the previous keyframe),
/// `-1` keep scanning.
pub(crate) fn compare_seek_time(chunk_time: i64, seek_time: i64, keyframe: bool, flags: SeekFlags) -> i32 {
    let forward = flags.contains(SeekFlags::FORWARD);
    if chunk_time == seek_time && keyframe && !forward {
        return 0;
    }
    if chunk_time > seek_time && keyframe && forward {
        return 0;
    }
    if chunk_time > seek_time && !forward {
        return 1;
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_reduces_and_converts() {
        // 1001/30000 -> 29.97 fps
        let t = TrackTiming::new(2002, 60000, 0, 30, 0);
        assert_eq!((t.time_num, t.time_den), (1001, 30000));
        assert_eq!(t.ticks_to_us(30), 1_001_000);
        assert_eq!(t.duration, 1_001_000);

        let zero_rate = TrackTiming::new(1, 0, 0, 0, 0);
        assert_eq!(zero_rate.time_den, 1);
    }

    #[test]
    fn chunk_time_cbr_and_vbr() {
        let video = TrackTiming::new(1, 25, 2, 0, 0);
        let chunk = ChunkState {
            index: 3,
            offs: 9999,
            ..Default::default()
        };
        assert_eq!(video.time_start, 80_000);
        assert_eq!(video.chunk_time(&chunk), 80_000 + 120_000);

        // 8 kHz, 2 byte samples, 1000 bytes in: sample 500
        let audio = TrackTiming::new(1, 8000, 0, 0, 2);
        let chunk = ChunkState {
            index: 7,
            offs: 1000,
            ..Default::default()
        };
        assert_eq!(audio.chunk_time(&chunk), 62_500);
    }

    #[test]
    fn seek_comparison() {
        let back = SeekFlags::empty();
        let fwd = SeekFlags::FORWARD;
        assert_eq!(compare_seek_time(100, 100, true, back), 0);
        assert_eq!(compare_seek_time(100, 100, false, back), -1);
        assert_eq!(compare_seek_time(200, 100, false, back), 1);
        assert_eq!(compare_seek_time(200, 100, true, back), 1);
        assert_eq!(compare_seek_time(100, 100, true, fwd), -1);
        assert_eq!(compare_seek_time(200, 100, true, fwd), 0);
        assert_eq!(compare_seek_time(200, 100, false, fwd), -1);
    }

    #[test]
    fn cursor_ownership() {
        let c = StreamCursor::Local(StreamState::at(42, 1));
        assert!(!c.is_global());
        assert_eq!(c.local().map(|s| s.data_offset), Some(42));
        assert!(StreamCursor::default().is_global());
    }
}
