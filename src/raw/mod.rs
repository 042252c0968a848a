//! Raw video: bare frame streams described by their file name,
//! and YUV4MPEG2 streams with a text header and `FRAME` markers.
//!
//! Bare file names carry the stream parameters, e.g.
//! `clip_CI420W352H288F25#1.yuv`. Everything after the FourCC is
//! optional. An explicit `S<size>` frame size is needed for codecs
//! without a known chroma layout.

mod params;
mod reader;
mod writer;

use tracing::debug;

use crate::{
    container::{ContainerContext, Demuxer},
    fields::ByteStreamExt,
    DemuxError, Result,
};

use params::{parse_file_name, parse_stream_header};
use reader::{read_line, RawReader};

pub use writer::{RawVideoVariant, RawVideoWriter};

pub(crate) const Y4M_SIGNATURE: &[u8; 9] = b"YUV4MPEG2";

pub(crate) fn open(ctx: &mut ContainerContext) -> Result<Box<dyn Demuxer>> {
    let y4m = ctx.io.peek_array::<9>().as_ref() == Some(Y4M_SIGNATURE);

    let params = match y4m {
        true => {
            let line = read_line(ctx.io.as_mut())?;
            parse_stream_header(&line[Y4M_SIGNATURE.len()..])?
        }
        false => {
            let name = ctx.file_name().ok_or(DemuxError::FormatNotSupported)?;
            let params = parse_file_name(name).ok_or(DemuxError::FormatNotSupported)?;
            debug!("raw video parameters from '{name}'");
            params
        }
    };

    Ok(Box::new(RawReader::open(ctx, params, y4m)?))
}
