//! Raw video output, bare or YUV4MPEG2.

use std::io::Write;

use tracing::debug;

use crate::{
    format::{EsFormat, EsType},
    Capabilities, DemuxError, Packet, PacketFlags, Result,
};

use super::{params::codec_to_colorspace, Y4M_SIGNATURE};

/// Output layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RawVideoVariant {
    /// Stream header, then a `FRAME` line ahead of each frame.
    #[default]
    Yuv4mpeg,
    /// Frame data only. Parameters go in the file name,
    /// see `RawVideoWriter::bare_file_name`.
    Bare,
}

/// Writes the packets of a single video track.
///
/// ```rs
/// use std::fs::File;
/// use vcdemux::{Container, OpenOptions, RawVideoVariant, RawVideoWriter};
///
/// fn main() -> vcdemux::Result<()> {
///     let mut container = Container::open_path("in.y4m", OpenOptions::default())?;
///     let mut writer = RawVideoWriter::new(File::create("out.y4m")?, RawVideoVariant::Yuv4mpeg);
///     writer.add_track(&container.tracks()[0].format)?;
///     for packet in container.by_ref() {
///         writer.write(&packet?)?;
///     }
///     writer.finish()?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RawVideoWriter<W: Write> {
    out: W,
    variant: RawVideoVariant,
    format: Option<EsFormat>,
    header_written: bool,
    frames: u64,
}

impl<W: Write> RawVideoWriter<W> {
    pub fn new(out: W, variant: RawVideoVariant) -> Self {
        Self {
            out,
            variant,
            format: None,
            header_written: false,
            frames: 0,
        }
    }

    /// Adds the video track. Returns its index.
    pub fn add_track(&mut self, format: &EsFormat) -> Result<usize> {
        if format.es_type != EsType::Video {
            return Err(DemuxError::FormatNotSupported);
        }
        if !self.capabilities().contains(Capabilities::DYNAMIC_TRACK_ADD) {
            return Err(DemuxError::UnsupportedOperation);
        }
        if self.variant == RawVideoVariant::Yuv4mpeg
            && (format.video.width == 0 || format.video.height == 0)
        {
            return Err(DemuxError::invalid("YUV4MPEG2 output needs frame dimensions"));
        }
        debug!(
            "raw video output '{}' {}x{}",
            format.codec, format.video.width, format.video.height
        );
        self.format = Some(format.clone());
        Ok(0)
    }

    /// `DYNAMIC_TRACK_ADD` until the track is added.
    pub fn capabilities(&self) -> Capabilities {
        match self.format {
            None => Capabilities::DYNAMIC_TRACK_ADD,
            Some(_) => Capabilities::empty(),
        }
    }

    /// Number of frames started so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Writes the payload of `packet`, with a frame marker if it
    /// starts a frame.
    pub fn write(&mut self, packet: &Packet) -> Result<()> {
        let format = match &self.format {
            Some(format) if packet.track == 0 => format,
            _ => return Err(DemuxError::InvalidTrack(packet.track)),
        };

        let frame_start = packet.flags.contains(PacketFlags::FRAME_START);
        if self.variant == RawVideoVariant::Yuv4mpeg {
            if !self.header_written {
                self.out.write_all(stream_header(format).as_bytes())?;
                self.header_written = true;
            }
            if frame_start {
                self.out.write_all(b"FRAME\n")?;
            }
        }
        if frame_start {
            self.frames += 1;
        }
        self.out.write_all(&packet.data)?;
        Ok(())
    }

    /// Flushes and returns the output.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }

    /// File name for bare output of `format`, readable back
    /// as raw video.
    pub fn bare_file_name(stem: &str, format: &EsFormat) -> String {
        let video = &format.video;
        let mut name = format!("{stem}_C{}W{}H{}", format.codec, video.width, video.height);
        if video.frame_rate_num != 0 && video.frame_rate_den != 0 {
            name.push_str(&format!("F{}#{}", video.frame_rate_num, video.frame_rate_den));
        }
        name.push_str(".yuv");
        name
    }
}

/// YUV4MPEG2 stream header line for `format`.
fn stream_header(format: &EsFormat) -> String {
    let video = &format.video;
    let mut header = format!(
        "{} W{} H{}",
        String::from_utf8_lossy(Y4M_SIGNATURE),
        video.width,
        video.height
    );
    if video.frame_rate_num != 0 && video.frame_rate_den != 0 {
        header.push_str(&format!(" F{}:{}", video.frame_rate_num, video.frame_rate_den));
    }
    if video.par_num != 0 && video.par_den != 0 {
        header.push_str(&format!(" A{}:{}", video.par_num, video.par_den));
    }
    header.push_str(&format!(" C{}\n", codec_to_colorspace(format.codec)));
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fourcc::codec, raw::params::parse_file_name};

    fn format() -> EsFormat {
        let mut format = EsFormat::new(EsType::Video, codec::I420);
        format.video.width = 4;
        format.video.height = 2;
        format.video.frame_rate_num = 25;
        format.video.frame_rate_den = 1;
        format
    }

    fn frame(data: &[u8]) -> Packet {
        Packet {
            data: data.to_vec(),
            size: data.len(),
            flags: PacketFlags::KEYFRAME | PacketFlags::FRAME,
            ..Default::default()
        }
    }

    #[test]
    fn yuv4mpeg_output() {
        let mut writer = RawVideoWriter::new(Vec::new(), RawVideoVariant::Yuv4mpeg);
        assert_eq!(writer.add_track(&format()).unwrap(), 0);
        writer.write(&frame(&[1; 12])).unwrap();
        writer.write(&frame(&[2; 12])).unwrap();
        assert_eq!(writer.frames(), 2);

        let out = writer.finish().unwrap();
        let header = b"YUV4MPEG2 W4 H2 F25:1 C420\n";
        assert_eq!(&out[..header.len()], header);
        assert_eq!(&out[header.len()..header.len() + 6], b"FRAME\n");
        assert_eq!(out.len(), header.len() + 2 * (6 + 12));
    }

    #[test]
    fn single_video_track_only() {
        let mut writer = RawVideoWriter::new(Vec::new(), RawVideoVariant::Bare);
        let audio = EsFormat::new(EsType::Audio, codec::MPGA);
        assert!(matches!(writer.add_track(&audio), Err(DemuxError::FormatNotSupported)));

        let res = writer.write(&frame(&[0; 4]));
        assert!(matches!(res, Err(DemuxError::InvalidTrack(0))));

        assert!(writer.capabilities().contains(Capabilities::DYNAMIC_TRACK_ADD));
        writer.add_track(&format()).unwrap();
        assert!(writer.capabilities().is_empty());
        assert!(matches!(writer.add_track(&format()), Err(DemuxError::UnsupportedOperation)));

        let mut packet = frame(&[0; 4]);
        packet.track = 1;
        assert!(matches!(writer.write(&packet), Err(DemuxError::InvalidTrack(1))));

        writer.write(&frame(&[7; 4])).unwrap();
        assert_eq!(writer.finish().unwrap(), vec![7; 4]);
    }

    #[test]
    fn bare_name_parses_back() {
        let name = RawVideoWriter::<Vec<u8>>::bare_file_name("out", &format());
        assert_eq!(name, "out_CI420W4H2F25#1.yuv");
        let params = parse_file_name(&name).unwrap();
        assert_eq!((params.width, params.height), (4, 2));
        assert_eq!(params.block_size(), 12);
    }
}
