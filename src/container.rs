//! Container host: probes the reader modules in order and
//! exposes the opened container's tracks, packets and seeking.

use std::path::Path;

use bitflags::bitflags;
use tracing::debug;

use crate::{
    avi, fields::FieldTrace, ps, raw, rv9,
    stream::{ByteStream, IoStream},
    DemuxError, Packet, ReadFlags, Result, SeekFlags, SeekMode, Track,
};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const CAN_SEEK = 0x1;
        const SEEK_IS_FAST = 0x2;
        const HAS_INDEX = 0x8;
        /// Keyframe flags in packets can be trusted.
        const DATA_HAS_KEYFRAME_FLAG = 0x10;
        /// Tracks can still be added, see `RawVideoWriter::capabilities`.
        const DYNAMIC_TRACK_ADD = 0x20;
        /// Supports `ReadFlags::FORCE_TRACK`.
        const FORCE_TRACK = 0x40;
    }
}

/// Open-time configuration.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// `BufReader` capacity for `Container::open_path`.
    pub buffer_capacity: Option<usize>,
    /// Overrides the URI extension when reader modules
    /// look at it, e.g. `Some("vob")`.
    pub container: Option<String>,
    /// Dump parsed header fields at `TRACE` level.
    pub trace_fields: bool,
    /// Maximum number of bytes scanned for an MPEG start code.
    pub sync_limit: usize,
    /// Maximum number of start codes visited at open / per PES search.
    pub pack_scan_limit: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: None,
            container: None,
            trace_fields: false,
            sync_limit: ps::PS_SYNC_LIMIT,
            pack_scan_limit: ps::PS_PACK_SCAN_MAX,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    pub fn container(mut self, name: &str) -> Self {
        self.container = Some(name.to_ascii_lowercase());
        self
    }

    pub fn trace_fields(mut self, enabled: bool) -> Self {
        self.trace_fields = enabled;
        self
    }

    pub fn sync_limit(mut self, limit: usize) -> Self {
        self.sync_limit = limit;
        self
    }

    pub fn pack_scan_limit(mut self, limit: usize) -> Self {
        self.pack_scan_limit = limit;
        self
    }
}

/// State shared between the host and the reader module.
pub(crate) struct ContainerContext {
    pub(crate) io: Box<dyn ByteStream>,
    pub(crate) uri: Option<String>,
    pub(crate) tracks: Vec<Track>,
    pub(crate) capabilities: Capabilities,
    /// Microseconds, zero if unknown.
    pub(crate) duration: i64,
    pub(crate) trace: FieldTrace,
    pub(crate) options: OpenOptions,
}

impl ContainerContext {
    pub(crate) fn new(io: Box<dyn ByteStream>, uri: Option<&str>, options: OpenOptions) -> Self {
        Self {
            io,
            uri: uri.map(String::from),
            tracks: Vec::new(),
            capabilities: Capabilities::empty(),
            duration: 0,
            trace: FieldTrace::new(options.trace_fields),
            options,
        }
    }

    /// Lower case container hint or URI extension.
    pub(crate) fn extension(&self) -> Option<String> {
        if let Some(hint) = &self.options.container {
            return Some(hint.to_owned());
        }
        let name = self.file_name()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    /// Last path component of the URI. Query and fragment are dropped
    /// for URIs with a scheme, plain paths may contain `#` (`F25#1`).
    pub(crate) fn file_name(&self) -> Option<&str> {
        let uri = self.uri.as_deref()?;
        let path = match uri.contains("://") {
            true => uri.split(|c: char| c == '?' || c == '#').next().unwrap_or(uri),
            false => uri,
        };
        path.rsplit(|c: char| c == '/' || c == '\\').next()
    }

    pub(crate) fn track(&self, index: usize) -> Result<&Track> {
        self.tracks.get(index).ok_or(DemuxError::InvalidTrack(index))
    }

    fn reset_probe(&mut self, start: u64) -> Result<()> {
        self.tracks.clear();
        self.capabilities = Capabilities::empty();
        self.duration = 0;
        if self.io.position() != start && self.io.is_seekable() {
            self.io.seek(start)?;
        }
        Ok(())
    }
}

/// Entry in a container index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub track: usize,
    /// Absolute byte position of the chunk header.
    pub offset: u64,
    /// Payload size in bytes.
    pub size: u32,
    pub keyframe: bool,
    /// Entry refers to a list rather than a data chunk.
    pub list: bool,
    /// Entry does not advance the track clock.
    pub no_time: bool,
}

/// Operations of an opened reader module.
pub(crate) trait Demuxer {
    /// Reads the next packet, or the pending part of the current one.
    fn read(&mut self, ctx: &mut ContainerContext, packet: &mut Packet, flags: ReadFlags) -> Result<()>;

    /// Seeks to `time` (microseconds), updating it to the time reached.
    fn seek(
        &mut self,
        ctx: &mut ContainerContext,
        time: &mut i64,
        mode: SeekMode,
        flags: SeekFlags,
    ) -> Result<()>;

    /// Full container index, if the format has one.
    fn index(&mut self, _ctx: &mut ContainerContext) -> Result<Vec<IndexEntry>> {
        Err(DemuxError::UnsupportedOperation)
    }

    fn close(&mut self, ctx: &mut ContainerContext) -> Result<()> {
        ctx.tracks.clear();
        Ok(())
    }
}

pub(crate) type OpenFn = fn(&mut ContainerContext) -> Result<Box<dyn Demuxer>>;

/// Reader module entry: probes with `peek()` only and
/// returns `DemuxError::FormatNotSupported` on mismatch.
pub(crate) struct ReaderModule {
    pub(crate) name: &'static str,
    pub(crate) open: OpenFn,
}

pub(crate) const READERS: [ReaderModule; 4] = [
    ReaderModule { name: "avi", open: avi::open },
    ReaderModule { name: "ps", open: ps::open },
    ReaderModule { name: "rv9", open: rv9::open },
    ReaderModule { name: "raw", open: raw::open },
];

/// An opened media container.
///
/// ```rs
/// use vcdemux::{Container, OpenOptions};
///
/// fn main() -> vcdemux::Result<()> {
///     let mut container = Container::open_path("VIDEO.AVI", OpenOptions::default())?;
///
///     for track in container.tracks() {
///         println!("{:?} {}", track.es_type(), track.codec());
///     }
///
///     for packet in container.by_ref().take(10) {
///         let packet = packet?;
///         println!("track {} {:?} {} bytes", packet.track, packet.pts, packet.size);
///     }
///
///     container.close()
/// }
/// ```
pub struct Container {
    ctx: ContainerContext,
    demuxer: Box<dyn Demuxer>,
    name: &'static str,
    finished: bool,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("format", &self.name)
            .field("uri", &self.ctx.uri)
            .field("tracks", &self.ctx.tracks)
            .field("capabilities", &self.ctx.capabilities)
            .field("duration", &self.ctx.duration)
            .finish()
    }
}

impl Container {
    /// Opens a container from `stream`. `uri` is only used for its
    /// file name (extension and embedded parameters).
    pub fn open<S>(stream: S, uri: Option<&str>, options: OpenOptions) -> Result<Self>
    where
        S: ByteStream + 'static,
    {
        let mut ctx = ContainerContext::new(Box::new(stream), uri, options);
        let start = ctx.io.position();

        for module in READERS.iter() {
            match (module.open)(&mut ctx) {
                Ok(demuxer) => {
                    debug!(
                        "opened {:?} as '{}' with {} track(s)",
                        ctx.uri,
                        module.name,
                        ctx.tracks.len()
                    );
                    return Ok(Self {
                        ctx,
                        demuxer,
                        name: module.name,
                        finished: false,
                    });
                }
                Err(DemuxError::FormatNotSupported) => {
                    debug!("'{}' rejected {:?}", module.name, ctx.uri);
                    ctx.reset_probe(start)?;
                }
                Err(err) => return Err(err),
            }
        }

        Err(DemuxError::FormatNotSupported)
    }

    /// Opens file at `path`.
    pub fn open_path(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let stream = IoStream::with_capacity(path, options.buffer_capacity)?;
        let uri = path.to_string_lossy().to_string();
        Self::open(stream, Some(&uri), options)
    }

    /// Name of the reader module that accepted the stream.
    pub fn format_name(&self) -> &'static str {
        self.name
    }

    pub fn tracks(&self) -> &[Track] {
        &self.ctx.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.ctx.tracks.get(index)
    }

    /// E.g. for toggling `Track::enabled`.
    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.ctx.tracks.get_mut(index)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.ctx.capabilities
    }

    /// Duration in microseconds, zero if unknown.
    pub fn duration_us(&self) -> i64 {
        self.ctx.duration
    }

    pub fn duration(&self) -> time::Duration {
        time::Duration::microseconds(self.ctx.duration)
    }

    /// Current byte position in the underlying stream.
    pub fn position(&self) -> u64 {
        self.ctx.io.position()
    }

    /// Reads into `packet`. Internal bookkeeping reads
    /// (`DemuxError::Continue`) are retried transparently.
    pub fn read(&mut self, packet: &mut Packet, flags: ReadFlags) -> Result<()> {
        if flags.contains(ReadFlags::FORCE_TRACK)
            && !self.ctx.capabilities.contains(Capabilities::FORCE_TRACK)
        {
            return Err(DemuxError::UnsupportedOperation);
        }
        loop {
            packet.reset();
            match self.demuxer.read(&mut self.ctx, packet, flags) {
                Err(DemuxError::Continue) => continue,
                result => return result,
            }
        }
    }

    /// Reads the next complete packet (up to the default buffer size).
    pub fn read_packet(&mut self) -> Result<Packet> {
        let mut packet = Packet::default();
        self.read(&mut packet, ReadFlags::empty())?;
        Ok(packet)
    }

    /// Seeks to `time` microseconds. Returns the time actually reached.
    pub fn seek(&mut self, time: i64, mode: SeekMode, flags: SeekFlags) -> Result<i64> {
        if mode != SeekMode::Time {
            return Err(DemuxError::UnsupportedOperation);
        }
        let mut time = time;
        self.demuxer.seek(&mut self.ctx, &mut time, mode, flags)?;
        self.finished = false;
        Ok(time)
    }

    /// Full container index (AVI `idx1`).
    pub fn index(&mut self) -> Result<Vec<IndexEntry>> {
        self.demuxer.index(&mut self.ctx)
    }

    /// Releases tracks and module state.
    pub fn close(mut self) -> Result<()> {
        self.demuxer.close(&mut self.ctx)
    }
}

/// Iterates packets until end of stream.
impl Iterator for Container {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_packet() {
            Ok(packet) => Some(Ok(packet)),
            Err(DemuxError::Eos) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn ctx(uri: Option<&str>, options: OpenOptions) -> ContainerContext {
        let io = IoStream::new(Cursor::new(Vec::new())).unwrap();
        ContainerContext::new(Box::new(io), uri, options)
    }

    #[test]
    fn extension_from_uri_or_hint() {
        let c = ctx(Some("http://host/media/Clip.MPG?x=1"), OpenOptions::default());
        assert_eq!(c.extension().as_deref(), Some("mpg"));
        assert_eq!(c.file_name(), Some("Clip.MPG"));

        let c = ctx(Some("/tmp/clip_CI420W4H2F30000#1001.yuv"), OpenOptions::default());
        assert_eq!(c.file_name(), Some("clip_CI420W4H2F30000#1001.yuv"));

        let c = ctx(Some("/media/clip"), OpenOptions::new().container("VOB"));
        assert_eq!(c.extension().as_deref(), Some("vob"));

        let c = ctx(None, OpenOptions::default());
        assert_eq!(c.extension(), None);
    }

    #[test]
    fn unknown_stream_is_rejected() {
        let io = IoStream::new(Cursor::new(vec![0_u8; 64])).unwrap();
        let err = Container::open(io, Some("noise.bin"), OpenOptions::default()).unwrap_err();
        assert!(matches!(err, DemuxError::FormatNotSupported));
    }
}
