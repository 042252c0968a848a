//! Synthetic container files.

/// `idx1` keyframe flag.
const AVIIF_KEYFRAME: u32 = 0x10;

fn chunk(id: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn list(kind: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let mut out = b"LIST".to_vec();
    out.extend_from_slice(&(content.len() as u32 + 4).to_le_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(content);
    out
}

fn le32(out: &mut Vec<u8>, values: &[u32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// A `movi` data chunk.
#[derive(Debug, Clone)]
pub(crate) struct AviChunk {
    pub(crate) id: [u8; 4],
    pub(crate) data: Vec<u8>,
    pub(crate) keyframe: bool,
}

impl AviChunk {
    pub(crate) fn video(data: Vec<u8>, keyframe: bool) -> Self {
        Self { id: *b"00dc", data, keyframe }
    }

    pub(crate) fn audio(data: Vec<u8>) -> Self {
        Self { id: *b"01wb", data, keyframe: true }
    }

    pub(crate) fn drm(data: Vec<u8>) -> Self {
        Self { id: *b"00dd", data, keyframe: false }
    }
}

/// How `idx1` stores chunk positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum IndexOffsets {
    /// Relative to the `movi` list type.
    #[default]
    Relative,
    Absolute,
    /// No `idx1`.
    Missing,
    /// OpenDML: an `indx` super index per stream, no `idx1`. Chunks
    /// from `split` on go to an `AVIX` RIFF, each `movi` ending with
    /// its `ix##` standard indexes.
    OpenDml { split: usize },
}

/// 25 fps H.264 video (stream 0) and optionally 8 kHz 16-bit mono
/// PCM audio (stream 1, `dwSampleSize` 2).
#[derive(Debug, Clone, Default)]
pub(crate) struct AviBuilder {
    pub(crate) audio: bool,
    pub(crate) chunks: Vec<AviChunk>,
    pub(crate) index: IndexOffsets,
}

#[derive(Debug, Clone)]
pub(crate) struct AviFile {
    pub(crate) bytes: Vec<u8>,
    /// Position of the `movi` list type.
    pub(crate) data_offset: u64,
    /// Chunk header position of each chunk.
    pub(crate) chunk_offsets: Vec<u64>,
}

impl AviBuilder {
    pub(crate) fn new(audio: bool, chunks: Vec<AviChunk>) -> Self {
        Self {
            audio,
            chunks,
            index: IndexOffsets::Relative,
        }
    }

    pub(crate) fn index(mut self, index: IndexOffsets) -> Self {
        self.index = index;
        self
    }

    fn video_strl(&self, indx: Option<&Vec<u8>>) -> Vec<u8> {
        let frames = self.chunks.iter().filter(|c| &c.id == b"00dc").count() as u32;
        let mut strh = b"vidsH264".to_vec();
        le32(&mut strh, &[0, 0, 0, 1, 25, 0, frames, 0, 0, 0]);
        strh.extend_from_slice(&[0; 8]);

        let mut strf = Vec::new();
        le32(&mut strf, &[40, 16, 16]);
        strf.extend_from_slice(&1_u16.to_le_bytes());
        strf.extend_from_slice(&24_u16.to_le_bytes());
        strf.extend_from_slice(b"H264");
        le32(&mut strf, &[0, 0, 0, 0, 0]);

        let mut content = chunk(b"strh", &strh);
        content.extend(chunk(b"strf", &strf));
        content.extend(indx.into_iter().flatten());
        list(b"strl", &content)
    }

    fn audio_strl(&self, indx: Option<&Vec<u8>>) -> Vec<u8> {
        let bytes: usize = self
            .chunks
            .iter()
            .filter(|c| &c.id == b"01wb")
            .map(|c| c.data.len())
            .sum();
        let mut strh = b"auds\0\0\0\0".to_vec();
        le32(&mut strh, &[0, 0, 0, 1, 8000, 0, bytes as u32 / 2, 0, 0, 2]);
        strh.extend_from_slice(&[0; 8]);

        let mut strf = Vec::new();
        strf.extend_from_slice(&1_u16.to_le_bytes());
        strf.extend_from_slice(&1_u16.to_le_bytes());
        le32(&mut strf, &[8000, 16000]);
        strf.extend_from_slice(&2_u16.to_le_bytes());
        strf.extend_from_slice(&16_u16.to_le_bytes());
        strf.extend_from_slice(&0_u16.to_le_bytes());

        let mut content = chunk(b"strh", &strh);
        content.extend(chunk(b"strf", &strf));
        content.extend(indx.into_iter().flatten());
        list(b"strl", &content)
    }

    /// `hdrl` LIST, with the `indx` chunks of each stream if any.
    fn header_list(&self, indexes: &[Vec<u8>]) -> Vec<u8> {
        let streams = 1 + self.audio as u32;
        let mut avih = Vec::new();
        le32(&mut avih, &[40_000, 0, 0, 0x10, 0, 0, streams, 0, 16, 16, 0, 0, 0, 0]);

        let mut hdrl = chunk(b"avih", &avih);
        hdrl.extend(self.video_strl(indexes.first()));
        if self.audio {
            hdrl.extend(self.audio_strl(indexes.get(1)));
        }
        list(b"hdrl", &hdrl)
    }

    pub(crate) fn build(&self) -> AviFile {
        if let IndexOffsets::OpenDml { split } = self.index {
            return self.build_open_dml(split);
        }
        let hdrl = self.header_list(&[]);

        let data_offset = (12 + hdrl.len() + 8) as u64;
        let mut movi = Vec::new();
        let mut chunk_offsets = Vec::new();
        for c in &self.chunks {
            chunk_offsets.push(data_offset + 4 + movi.len() as u64);
            movi.extend(chunk(&c.id, &c.data));
        }
        let movi = list(b"movi", &movi);

        let mut idx1 = Vec::new();
        for (c, offset) in self.chunks.iter().zip(&chunk_offsets) {
            let offset = match self.index {
                IndexOffsets::Absolute => *offset,
                _ => offset - data_offset,
            };
            idx1.extend_from_slice(&c.id);
            let flags = match c.keyframe {
                true => AVIIF_KEYFRAME,
                false => 0,
            };
            le32(&mut idx1, &[flags, offset as u32, c.data.len() as u32]);
        }

        let mut body = b"AVI ".to_vec();
        body.extend(hdrl);
        body.extend(movi);
        if self.index != IndexOffsets::Missing {
            body.extend(chunk(b"idx1", &idx1));
        }

        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend(body);

        AviFile {
            bytes,
            data_offset,
            chunk_offsets,
        }
    }

    fn build_open_dml(&self, split: usize) -> AviFile {
        let ids: &[[u8; 4]] = match self.audio {
            true => &[*b"00dc", *b"01wb"],
            false => &[*b"00dc"],
        };
        // Super indexes have a fixed size, real offsets are filled in below.
        let placeholder: Vec<_> = ids.iter().map(|id| super_index(id, &[(0, 0); 2])).collect();
        let hdrl_len = self.header_list(&placeholder).len() as u64;
        let data_offset = 12 + hdrl_len + 8;

        let (first_movi, mut chunk_offsets, first_ix) = movi_segment(&self.chunks[..split], ids, data_offset + 4);
        let avix = 12 + hdrl_len + 12 + first_movi.len() as u64;
        let (second_movi, second_offsets, second_ix) = movi_segment(&self.chunks[split..], ids, avix + 24);
        chunk_offsets.extend(second_offsets);

        let indexes: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| super_index(id, &[first_ix[i], second_ix[i]]))
            .collect();

        let mut first = b"AVI ".to_vec();
        first.extend(self.header_list(&indexes));
        first.extend(list(b"movi", &first_movi));
        let mut second = b"AVIX".to_vec();
        second.extend(list(b"movi", &second_movi));

        let mut bytes = Vec::new();
        for body in [first, second] {
            bytes.extend_from_slice(b"RIFF");
            bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
            bytes.extend(body);
        }

        AviFile {
            bytes,
            data_offset,
            chunk_offsets,
        }
    }
}

/// `movi` content starting at `start`: the chunks, then an `ix##`
/// standard index per stream with `start` as base offset.
/// Returns the content, the chunk offsets and the position and size
/// of each standard index.
fn movi_segment(chunks: &[AviChunk], ids: &[[u8; 4]], start: u64) -> (Vec<u8>, Vec<u64>, Vec<(u64, u32)>) {
    let mut content = Vec::new();
    let mut offsets = Vec::new();
    for c in chunks {
        offsets.push(start + content.len() as u64);
        content.extend(chunk(&c.id, &c.data));
    }

    let mut indexes = Vec::new();
    for (stream, id) in ids.iter().enumerate() {
        let mut entries = Vec::new();
        for (c, offset) in chunks.iter().zip(&offsets).filter(|(c, _)| &c.id == id) {
            let delta = match c.keyframe {
                true => 0,
                false => 0x8000_0000,
            };
            le32(&mut entries, &[(offset + 8 - start) as u32, c.data.len() as u32 | delta]);
        }

        let mut ix = 2_u16.to_le_bytes().to_vec();
        ix.extend_from_slice(&[0, 1]);
        le32(&mut ix, &[entries.len() as u32 / 8]);
        ix.extend_from_slice(id);
        ix.extend_from_slice(&start.to_le_bytes());
        le32(&mut ix, &[0]);
        ix.extend(entries);

        let ix = chunk(&[b'i', b'x', b'0', b'0' + stream as u8], &ix);
        indexes.push((start + content.len() as u64, ix.len() as u32));
        content.extend(ix);
    }
    (content, offsets, indexes)
}

/// `indx` super index over the standard indexes at `entries`
/// (position, size).
fn super_index(id: &[u8; 4], entries: &[(u64, u32)]) -> Vec<u8> {
    let mut out = 4_u16.to_le_bytes().to_vec();
    out.extend_from_slice(&[0, 0]);
    le32(&mut out, &[entries.len() as u32]);
    out.extend_from_slice(id);
    le32(&mut out, &[0, 0, 0]);
    for (offset, size) in entries {
        out.extend_from_slice(&offset.to_le_bytes());
        le32(&mut out, &[*size, 0]);
    }
    chunk(b"indx", &out)
}

/// Video keyframes at chunk 0 and 5, then audio chunks of
/// 100 ms (1600 bytes) interleaved after the sixth frame:
/// `v0 v1 v2 v3 v4 v5 a0 v6 v7 a1`.
pub(crate) fn two_track_avi() -> AviBuilder {
    let mut chunks = Vec::new();
    for i in 0..6_u8 {
        chunks.push(AviChunk::video(vec![i; 10 + i as usize], i == 0 || i == 5));
    }
    chunks.push(AviChunk::audio(vec![0xA0; 1600]));
    chunks.push(AviChunk::video(vec![6; 16], false));
    chunks.push(AviChunk::video(vec![7; 17], false));
    chunks.push(AviChunk::audio(vec![0xA1; 1600]));
    AviBuilder::new(true, chunks)
}

/// MPEG-2 pack header without stuffing or system header.
pub(crate) fn ps_pack(scr_base: u64, mux_rate: u32) -> Vec<u8> {
    let b = scr_base;
    let mut out = vec![0, 0, 1, 0xBA];
    out.push(0x44 | ((b >> 27) & 0x38) as u8 | ((b >> 28) & 0x03) as u8);
    out.push((b >> 20) as u8);
    out.push(((b >> 12) & 0xF8) as u8 | 0x04 | ((b >> 13) & 0x03) as u8);
    out.push((b >> 5) as u8);
    out.push(((b << 3) & 0xF8) as u8 | 0x04);
    out.push(0x01);
    out.push((mux_rate >> 14) as u8);
    out.push((mux_rate >> 6) as u8);
    out.push(((mux_rate << 2) as u8) | 0x03);
    out.push(0xF8);
    out
}

/// MPEG-2 PES packet with an optional PTS (90 kHz).
pub(crate) fn ps_pes(stream_id: u8, pts: Option<u64>, payload: &[u8]) -> Vec<u8> {
    let header_len = match pts {
        Some(_) => 5,
        None => 0,
    };
    let mut out = vec![0, 0, 1, stream_id];
    out.extend_from_slice(&((3 + header_len + payload.len()) as u16).to_be_bytes());
    out.push(0x80);
    out.push(if pts.is_some() { 0x80 } else { 0x00 });
    out.push(header_len as u8);
    if let Some(t) = pts {
        out.push(0x21 | ((t >> 29) & 0x0E) as u8);
        out.push((t >> 22) as u8);
        out.push(((t >> 14) & 0xFE) as u8 | 1);
        out.push((t >> 7) as u8);
        out.push(((t << 1) & 0xFE) as u8 | 1);
    }
    out.extend_from_slice(payload);
    out
}

pub(crate) const PS_END_CODE: [u8; 4] = [0, 0, 1, 0xB9];

/// YUV4MPEG2 stream: `header` is the parameter part of the stream header.
pub(crate) fn y4m(header: &str, frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("YUV4MPEG2{header}\n").into_bytes();
    for frame in frames {
        out.extend_from_slice(b"FRAME\n");
        out.extend_from_slice(frame);
    }
    out
}

/// 26-byte `VIDO` header, 352x288 at 25 fps.
pub(crate) fn rv9_header(codec: &[u8; 4]) -> Vec<u8> {
    let mut out = 26_u32.to_be_bytes().to_vec();
    out.extend_from_slice(b"VIDO");
    out.extend_from_slice(codec);
    out.extend_from_slice(&352_u16.to_be_bytes());
    out.extend_from_slice(&288_u16.to_be_bytes());
    out.extend_from_slice(&[0; 6]);
    out.extend_from_slice(&(25_u32 << 16).to_be_bytes());
    out
}

/// RV9 frame with one valid segment at payload offset 0, whose first
/// byte is `picture`.
pub(crate) fn rv9_frame(timestamp_ms: u32, picture: u8, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for v in [payload_len as u32, timestamp_ms, 0, 0, 1, 1, 0] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.push(picture);
    out.extend(std::iter::repeat(0xAA).take(payload_len - 1));
    out
}
