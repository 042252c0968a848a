//! Demultiplex media containers into elementary stream packets.
//! Does not and will not support any kind of video de/encoding.
//!
//! Supported containers:
//! - AVI, including OpenDML (`AVIX`, `indx`/`ix##`) and `idx1` indexes.
//! - MPEG-1/MPEG-2 Program Streams (probed for `.mpg`, `.vob`, `.ps` and similar).
//! - RealVideo `VIDO` elementary stream dumps.
//! - YUV4MPEG2 and bare raw video, with the stream parameters in the file name
//!   (e.g. `clip_CI420W352H288F25#1.yuv`).
//!
//! The AVI layout follows
//! <https://learn.microsoft.com/en-us/windows/win32/directshow/avi-riff-file-reference>
//! and the OpenDML AVI File Format Extensions.
//!
//! ```rs
//! use vcdemux::{Container, OpenOptions, SeekFlags, SeekMode};
//!
//! fn main() -> vcdemux::Result<()> {
//!     let mut container = Container::open_path("VIDEO.AVI", OpenOptions::default())?;
//!
//!     for track in container.tracks() {
//!         println!("{:?} {}", track.es_type(), track.codec());
//!     }
//!     println!("{:?}", container.duration());
//!
//!     // Closest keyframe at or before 10 s.
//!     let reached = container.seek(10_000_000, SeekMode::Time, SeekFlags::empty())?;
//!     println!("seeked to {reached}us");
//!
//!     for packet in container.by_ref().take(25) {
//!         let packet = packet?;
//!         println!("{} {:?} {:?}", packet.track, packet.pts_duration(), packet.flags);
//!     }
//!
//!     container.close()
//! }
//! ```

pub mod bits;
pub mod container;
pub mod errors;
pub mod fields;
pub mod format;
pub mod fourcc;
pub mod packet;
pub mod stream;

// Reader modules
pub(crate) mod avi;
pub(crate) mod ps;
pub(crate) mod raw;
pub(crate) mod rv9;

#[cfg(test)]
mod tests;

pub use bits::BitReader;
pub use container::{Capabilities, Container, IndexEntry, OpenOptions};
pub use errors::{DemuxError, Result};
pub use fields::FieldTrace;
pub use format::{AudioFormat, EsFormat, EsFormatFlags, EsType, Track, VideoFormat};
pub use fourcc::FourCC;
pub use packet::{Packet, PacketFlags, ReadFlags, SeekFlags, SeekMode};
pub use raw::{RawVideoVariant, RawVideoWriter};
pub use stream::{ByteStream, IoStream, StreamStatus};
