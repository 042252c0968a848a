//! Pack and system headers, and the system clock derived from them.

use tracing::debug;

use crate::{
    bits::BitReader,
    fields::{ByteStreamExt, FieldTrace},
    stream::ByteStream,
    DemuxError, Result,
};

pub(crate) const PACK_START_CODE: u32 = 0x0000_01BA;
pub(crate) const SYSTEM_HEADER_START_CODE: u32 = 0x0000_01BB;

/// 27 MHz system clock ticks per microsecond.
const TICKS_PER_US: i64 = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackHeader {
    /// System clock reference, 27 MHz ticks.
    pub(crate) scr: i64,
    /// Units of 50 bytes/s.
    pub(crate) mux_rate: u32,
}

/// Reads a pack header (MPEG-2 or MPEG-1 layout) and
/// any system header directly following it.
pub(crate) fn read_pack_header(io: &mut dyn ByteStream, trace: &mut FieldTrace) -> Result<PackHeader> {
    if io.read_u32_be()? != PACK_START_CODE {
        return Err(DemuxError::corrupted("expected pack start code"));
    }
    let [first] = io.peek_array::<1>().ok_or(DemuxError::Eos)?;

    trace.enter("pack_header");
    let (scr_base, scr_ext, mux_rate) = match first & 0x40 != 0 {
        true => {
            let header = io.read_array::<10>()?;
            let mut bits = BitReader::new(&header);
            bits.marker(2, 0b01, "'01' marker bits")?;
            let scr_base = bits.read_clock33("system_clock_reference_base")?;
            let scr_ext = bits.read_bits(9)?;
            bits.marker_bit("marker_bit")?;
            let mux_rate = bits.read_u32(22)?;
            bits.marker_bit("marker_bit")?;
            bits.marker_bit("marker_bit")?;
            bits.skip(5)?;
            let stuffing = bits.read_u8(3)?;
            io.skip_exact(stuffing as u64)?;
            (scr_base, scr_ext, mux_rate)
        }
        // MPEG-1 system stream
        false => {
            let header = io.read_array::<8>()?;
            let mut bits = BitReader::new(&header);
            bits.marker(4, 0b0010, "'0010' marker bits")?;
            let scr_base = bits.read_clock33("system_clock_reference_base")?;
            bits.marker_bit("marker_bit")?;
            let mux_rate = bits.read_u32(22)?;
            bits.marker_bit("marker_bit")?;
            (scr_base, 0, mux_rate)
        }
    };
    trace.field("system_clock_reference_base", scr_base);
    trace.field("system_clock_reference_extension", scr_ext);
    trace.field("program_mux_rate", mux_rate);
    trace.leave();

    if io.peek_array::<4>() == Some(SYSTEM_HEADER_START_CODE.to_be_bytes()) {
        read_system_header(io, trace)?;
    }

    Ok(PackHeader {
        scr: scr_base as i64 * 300 + scr_ext as i64,
        mux_rate,
    })
}

/// Validates and skips a system header.
pub(crate) fn read_system_header(io: &mut dyn ByteStream, trace: &mut FieldTrace) -> Result<()> {
    if io.read_u32_be()? != SYSTEM_HEADER_START_CODE {
        return Err(DemuxError::corrupted("expected system header start code"));
    }
    trace.enter("system_header");

    let mut length = io.read_u16_be()? as u32;
    trace.field("header_length", length);
    if length < 6 {
        return Err(DemuxError::corrupted("system header too short"));
    }
    let header = io.read_array::<6>()?;
    let mut bits = BitReader::new(&header);
    bits.marker_bit("marker_bit")?;
    let rate_bound = bits.read_u32(22)?;
    bits.marker_bit("marker_bit")?;
    let audio_bound = bits.read_u8(6)?;
    // fixed, CSPS, audio lock, video lock
    bits.skip(4)?;
    bits.marker_bit("marker_bit")?;
    let video_bound = bits.read_u8(5)?;
    trace.field("rate_bound", rate_bound);
    trace.field("audio_bound", audio_bound);
    trace.field("video_bound", video_bound);
    length -= 6;

    // stream_id, P-STD buffer bound
    while length >= 3 {
        match io.peek_array::<1>() {
            Some([id]) if id & 0x80 != 0 => {
                trace.field("stream_id", format_args!("{id:#x}"));
                io.skip_exact(3)?;
                length -= 3;
            }
            _ => break,
        }
    }
    io.skip_exact(length as u64)?;
    trace.leave();
    Ok(())
}

/// SCR tracking: offset, bias for zero based timestamps across clock
/// discontinuities, and a moving average byte rate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SystemClock {
    /// First SCR seen.
    pub(crate) scr_offset: Option<i64>,
    /// Most recent SCR.
    pub(crate) scr: Option<i64>,
    /// Added to 27 MHz timestamps.
    pub(crate) bias: Option<i64>,
    pub(crate) mux_rate: u32,
    /// Position of the most recent pack header.
    pub(crate) pack_offset: u64,
    /// Bytes per second.
    pub(crate) data_rate: i64,
    /// Latest timestamp delivered, biased 27 MHz ticks.
    pub(crate) high_water: Option<i64>,
}

impl SystemClock {
    /// Updates the clock with the pack header read at `pack_offset`.
    pub(crate) fn update(&mut self, pack: &PackHeader, pack_offset: u64) {
        let scr = pack.scr;
        if self.scr_offset.is_none() {
            self.scr_offset = Some(scr);
        }

        match self.scr {
            None => self.bias = Some(-scr),
            Some(prev) if scr < prev => {
                // Continue from wherever the timeline had got to.
                let reached = prev + self.bias.unwrap_or(-prev);
                let reached = self.high_water.map_or(reached, |hw| hw.max(reached));
                debug!("system clock discontinuity ({prev} -> {scr})");
                self.bias = Some(reached - scr);
            }
            Some(prev) if scr > prev => {
                let sample = 27_000_000 * pack_offset.saturating_sub(self.pack_offset) as i64 / (scr - prev);
                self.data_rate = match self.data_rate {
                    0 => pack.mux_rate as i64 * 50,
                    avg => (avg * 31 + sample) >> 5,
                };
            }
            Some(_) => (),
        }

        self.pack_offset = pack_offset;
        self.scr = Some(scr);
        self.mux_rate = pack.mux_rate;
    }

    /// Converts a 90 kHz PES timestamp to zero based microseconds.
    /// Unknown until a pack header has set the bias.
    pub(crate) fn pes_time_us(&mut self, time: Option<u64>) -> Option<i64> {
        let biased = 300 * time? as i64 + self.bias?;
        self.high_water = Some(self.high_water.map_or(biased, |hw| hw.max(biased)));
        Some(biased / TICKS_PER_US)
    }

    /// State after the end of the stream: clock unknown, timestamps
    /// relative to the first SCR.
    pub(crate) fn reset_at_eos(&mut self) {
        self.scr = None;
        self.bias = self.scr_offset.map(|offset| -offset);
        self.high_water = None;
    }

    /// State after a seek: the clock restarts from the first SCR.
    pub(crate) fn reset_at_seek(&mut self) {
        self.scr = self.scr_offset;
        self.high_water = None;
        if self.bias.is_none() {
            self.bias = self.scr_offset.map(|offset| -offset);
        }
    }

    /// Span between the first and latest SCR, in microseconds.
    pub(crate) fn span_us(&self) -> i64 {
        match (self.scr_offset, self.scr) {
            (Some(first), Some(last)) if last > first => (last - first) / TICKS_PER_US,
            _ => 0,
        }
    }
}
