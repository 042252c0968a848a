use super::{
    builders::{ps_pack, ps_pes, PS_END_CODE},
    open_bytes, open_with, read_all,
};

/// Pack header plus a PES packet with a PTS and 64 payload bytes.
const UNIT_SIZE: u64 = 14 + 6 + 3 + 5 + 64;
use crate::{fourcc::codec, Capabilities, DemuxError, EsType, IoStream, OpenOptions, SeekFlags, SeekMode};

const MUX_RATE: u32 = 1000;

/// Video and audio with a PTS, then a third stream over the
/// track limit and a video packet without timestamps.
fn program() -> Vec<u8> {
    let mut out = ps_pack(900_000, MUX_RATE);
    out.extend(ps_pes(0xE0, Some(900_000), &[1; 8]));
    out.extend(ps_pes(0xC0, Some(909_000), &[2; 6]));
    out.extend(ps_pes(0xE1, Some(900_000), &[3; 4]));
    out.extend(ps_pes(0xE0, None, &[4; 8]));
    out.extend(PS_END_CODE);
    out
}

#[test]
fn tracks_from_first_packets() {
    let mut container = open_bytes(program(), Some("clip.mpg"));
    assert_eq!(container.format_name(), "ps");
    assert!(container.capabilities().contains(Capabilities::CAN_SEEK));

    let tracks = container.tracks();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].es_type(), EsType::Video);
    assert_eq!(tracks[0].codec(), codec::MP2V);
    assert_eq!(tracks[1].es_type(), EsType::Audio);
    assert_eq!(tracks[1].codec(), codec::MPGA);

    let packets = read_all(&mut container);
    let summary: Vec<_> = packets.iter().map(|p| (p.track, p.pts, p.data.clone())).collect();
    assert_eq!(
        summary,
        vec![
            (0, Some(0), vec![1; 8]),
            (1, Some(100_000), vec![2; 6]),
            (0, None, vec![4; 8]),
        ]
    );
}

#[test]
fn seek_to_start_after_end() {
    let mut container = open_bytes(program(), Some("clip.vob"));
    assert_eq!(read_all(&mut container).len(), 3);

    let reached = container.seek(0, SeekMode::Time, SeekFlags::empty()).unwrap();
    assert_eq!(reached, 0);
    let packet = container.read_packet().unwrap();
    assert_eq!(packet.pts, Some(0));
    assert_eq!(packet.data, vec![1; 8]);
}

/// Twenty packs, 100 ms apart, each with one video packet
/// 100 ms after its SCR.
fn steady_program() -> Vec<u8> {
    let mut out = Vec::new();
    for k in 0..20_u8 {
        let scr = 90_000 + k as u64 * 9_000;
        out.extend(ps_pack(scr, 18));
        out.extend(ps_pes(0xE0, Some(scr + 9_000), &[k + 1; 64]));
    }
    out.extend(PS_END_CODE);
    out
}

#[test]
fn seek_resyncs_to_estimated_position() {
    let data = steady_program();
    let size = data.len() as u64;
    let mut container = open_bytes(data, Some("clip.mpg"));
    let duration = container.duration_us();
    assert!(duration > 1_000_000);

    let target = 1_000_000 * size / duration as u64;
    // First PES packet starting at or after the estimate.
    let unit = (0..20).find(|k| k * UNIT_SIZE + 14 >= target).unwrap();
    assert!(unit > 0 && unit < 19);

    let reached = container.seek(1_000_000, SeekMode::Time, SeekFlags::empty()).unwrap();
    assert_eq!(reached, 100_000 * (unit as i64 + 1));

    let packet = container.read_packet().unwrap();
    assert_eq!(packet.pts, Some(reached));
    assert_eq!(packet.data, vec![unit as u8 + 1; 64]);

    let rest = read_all(&mut container);
    assert_eq!(rest.len(), 19 - unit as usize);
}

#[test]
fn seek_past_last_packet_ends_stream() {
    let mut container = open_bytes(steady_program(), Some("clip.mpg"));
    assert_eq!(container.read_packet().unwrap().pts, Some(100_000));
    let duration = container.duration_us();

    // Lands in the end code: time from the position, not the packet read before.
    let reached = container.seek(duration - 1, SeekMode::Time, SeekFlags::empty()).unwrap();
    assert!(reached > 1_000_000 && reached <= duration);
    assert!(matches!(container.read_packet(), Err(DemuxError::Eos)));

    // The stream is still usable.
    assert_eq!(container.seek(0, SeekMode::Time, SeekFlags::empty()).unwrap(), 100_000);
    assert_eq!(container.read_packet().unwrap().data, vec![1; 64]);
}

#[test]
fn timestamps_continue_across_clock_reset() {
    let mut data = ps_pack(900_000, MUX_RATE);
    data.extend(ps_pes(0xE0, Some(945_000), &[1; 8]));
    // Spliced stream restarting from a lower SCR.
    data.extend(ps_pack(90_000, MUX_RATE));
    data.extend(ps_pes(0xE0, Some(99_000), &[2; 8]));
    data.extend(PS_END_CODE);

    let mut container = open_bytes(data, Some("clip.mpg"));
    let first = container.read_packet().unwrap();
    assert_eq!(first.pts, Some(500_000));

    let second = container.read_packet().unwrap();
    assert_eq!(second.data, vec![2; 8]);
    assert!(second.pts.unwrap() >= first.pts.unwrap());
    assert_eq!(second.pts, Some(600_000));

    assert!(matches!(container.read_packet(), Err(DemuxError::Eos)));
}

#[test]
fn probed_by_extension_or_hint() {
    let io = IoStream::new(std::io::Cursor::new(program())).unwrap();
    let res = crate::Container::open(io, Some("clip.bin"), OpenOptions::default());
    assert!(matches!(res, Err(DemuxError::FormatNotSupported)));

    let container = open_with(program(), None, OpenOptions::new().container("vob"));
    assert_eq!(container.format_name(), "ps");
}
