//! Raw video parameters: file name encoding, YUV4MPEG2 header
//! grammar and frame sizes.

use crate::{fourcc::codec, DemuxError, FourCC, Result};

/// Stream parameters from a file name or a YUV4MPEG2 header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawParams {
    pub(crate) codec: FourCC,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) frame_rate_num: u32,
    pub(crate) frame_rate_den: u32,
    pub(crate) par_num: u32,
    pub(crate) par_den: u32,
    /// Explicit frame size, zero if derived from the codec.
    pub(crate) frame_size: u32,
}

impl RawParams {
    /// Frame size: explicit, or from the chroma layout of the codec.
    pub(crate) fn block_size(&self) -> u32 {
        match self.frame_size {
            0 => frame_size(self.codec, self.width, self.height).unwrap_or(0),
            size => size,
        }
    }
}

/// Frame size as a multiple of the luma plane: (numerator, denominator).
fn chroma_ratio(fourcc: FourCC) -> Option<(u64, u64)> {
    const TABLE: [(FourCC, (u64, u64)); 16] = [
        (codec::I420, (3, 2)),
        (codec::YV12, (3, 2)),
        (codec::NV12, (3, 2)),
        (codec::NV21, (3, 2)),
        (codec::I422, (2, 1)),
        (codec::YUYV, (2, 1)),
        (codec::YVYU, (2, 1)),
        (codec::UYVY, (2, 1)),
        (codec::VYUY, (2, 1)),
        (codec::RGB16, (2, 1)),
        (codec::I444, (3, 1)),
        (codec::RGB24, (3, 1)),
        (codec::BGR24, (3, 1)),
        (codec::RGBA, (4, 1)),
        (codec::BGRA, (4, 1)),
        (codec::Y800, (1, 1)),
    ];
    TABLE
        .iter()
        .find(|(c, _)| *c == fourcc)
        .map(|(_, ratio)| *ratio)
}

/// Size of one `width` x `height` frame, for codecs with a known
/// chroma layout.
pub(crate) fn frame_size(fourcc: FourCC, width: u32, height: u32) -> Option<u32> {
    let (num, den) = chroma_ratio(fourcc)?;
    let size = width as u64 * height as u64 * num / den;
    u32::try_from(size).ok()
}

/// Splits `digits` off the start of `s`.
fn take_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

/// Parses `_C<fourcc>W<w>H<h>F<num>#<den>S<size>` from a file name.
/// Everything after the FourCC is optional.
pub(crate) fn parse_file_name(name: &str) -> Option<RawParams> {
    let start = name.rfind("_C")?;
    let rest = &name[start + 2..];
    let fourcc = FourCC::from_slice(rest.as_bytes().get(..4)?)?;
    let mut rest = rest.get(4..)?;

    let mut params = RawParams {
        codec: fourcc,
        ..Default::default()
    };

    loop {
        let mut chars = rest.chars();
        let Some(key) = chars.next() else { break };
        let Some((value, tail)) = take_number(chars.as_str()) else { break };
        rest = tail;
        match key {
            'W' => params.width = value,
            'H' => params.height = value,
            'S' => params.frame_size = value,
            'F' => {
                params.frame_rate_num = value;
                params.frame_rate_den = 1;
                if let Some(den) = rest.strip_prefix('#') {
                    let (den, tail) = take_number(den)?;
                    params.frame_rate_den = den;
                    rest = tail;
                }
            }
            _ => break,
        }
    }
    Some(params)
}

/// Parses `<num>:<den>`.
fn ratio(value: &str) -> Result<(u32, u32)> {
    let (num, den) = value
        .split_once(':')
        .ok_or_else(|| DemuxError::invalid(format!("invalid ratio '{value}'")))?;
    let num = num.parse().map_err(|_| DemuxError::invalid("invalid ratio numerator"))?;
    let den = den.parse().map_err(|_| DemuxError::invalid("invalid ratio denominator"))?;
    Ok((num, den))
}

fn number(key: char, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| DemuxError::invalid(format!("invalid '{key}' parameter '{value}'")))
}

/// Codec for a YUV4MPEG2 colour space token.
pub(crate) fn colorspace_to_codec(token: &str) -> Option<FourCC> {
    match token {
        t if t.starts_with("420") => Some(codec::I420),
        t if t.starts_with("422") => Some(codec::I422),
        t if t.starts_with("444") => Some(codec::I444),
        "mono" => Some(codec::Y800),
        t if t.len() == 4 => FourCC::from_slice(t.as_bytes()),
        _ => None,
    }
}

/// YUV4MPEG2 colour space token for a codec.
pub(crate) fn codec_to_colorspace(fourcc: FourCC) -> String {
    match fourcc {
        c if c == codec::I420 => "420".to_owned(),
        c if c == codec::I422 => "422".to_owned(),
        c if c == codec::I444 => "444".to_owned(),
        c if c == codec::Y800 => "mono".to_owned(),
        c => c.to_str(),
    }
}

/// Parses the parameters of a YUV4MPEG2 stream header, the part
/// after `YUV4MPEG2` up to (not including) the newline.
pub(crate) fn parse_stream_header(line: &str) -> Result<RawParams> {
    let mut params = RawParams {
        codec: codec::I420,
        ..Default::default()
    };

    for token in line.split_ascii_whitespace() {
        let mut chars = token.chars();
        let Some(key) = chars.next() else { continue };
        let value = chars.as_str();
        match key {
            'W' => params.width = number(key, value)?,
            'H' => params.height = number(key, value)?,
            'F' => (params.frame_rate_num, params.frame_rate_den) = ratio(value)?,
            'A' => (params.par_num, params.par_den) = ratio(value)?,
            'C' => {
                params.codec = colorspace_to_codec(value).ok_or_else(|| {
                    DemuxError::invalid(format!("unsupported colour space '{value}'"))
                })?
            }
            // interlacing, extensions
            'I' | 'X' => (),
            _ => return Err(DemuxError::invalid(format!("unknown YUV4MPEG2 parameter '{token}'"))),
        }
    }

    if params.width == 0 || params.height == 0 {
        return Err(DemuxError::invalid("YUV4MPEG2 header without frame dimensions"));
    }
    Ok(params)
}

/// Explicit frame size from the parameters of a `FRAME` header,
/// if present.
pub(crate) fn parse_frame_header(line: &str) -> Result<Option<u32>> {
    let mut size = None;
    for token in line.split_ascii_whitespace() {
        if let Some(value) = token.strip_prefix('S') {
            size = Some(number('S', value)?);
        }
    }
    Ok(size)
}
