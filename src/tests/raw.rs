use std::{fs, io::Write};

use super::{builders::y4m, init_logging, open_bytes, read_all};
use crate::{
    fourcc::codec, Capabilities, Container, EsType, OpenOptions, PacketFlags, RawVideoVariant, RawVideoWriter,
    SeekFlags, SeekMode,
};

const HEADER: &str = " W4 H2 F25:1 C420";

/// 4x2 I420 frames, 12 bytes each.
fn frames(count: u8) -> Vec<Vec<u8>> {
    (0..count).map(|i| vec![0x10 + i; 12]).collect()
}

#[test]
fn yuv4mpeg_frames_and_timing() {
    let mut container = open_bytes(y4m(HEADER, &frames(3)), Some("clip.y4m"));
    assert_eq!(container.format_name(), "raw");
    assert_eq!(container.duration_us(), 120_000);
    assert!(container.capabilities().contains(Capabilities::CAN_SEEK));

    let track = &container.tracks()[0];
    assert_eq!(track.es_type(), EsType::Video);
    assert_eq!(track.codec(), codec::I420);
    assert_eq!((track.format.video.width, track.format.video.height), (4, 2));

    let packets = read_all(&mut container);
    let pts: Vec<_> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, vec![Some(0), Some(40_000), Some(80_000)]);
    for (packet, frame) in packets.iter().zip(frames(3)) {
        assert_eq!(packet.data, frame);
        assert!(packet.flags.contains(PacketFlags::KEYFRAME | PacketFlags::FRAME));
    }
}

#[test]
fn yuv4mpeg_seek_by_time() {
    let mut container = open_bytes(y4m(HEADER, &frames(3)), Some("clip.y4m"));

    let reached = container.seek(50_000, SeekMode::Time, SeekFlags::empty()).unwrap();
    assert_eq!(reached, 40_000);
    let packet = container.read_packet().unwrap();
    assert_eq!(packet.pts, Some(40_000));
    assert_eq!(packet.data, vec![0x11; 12]);

    // Past the end: last frame.
    let reached = container.seek(10_000_000, SeekMode::Time, SeekFlags::empty()).unwrap();
    assert_eq!(reached, 80_000);
}

#[test]
fn writer_reproduces_yuv4mpeg_input() {
    let input = y4m(HEADER, &frames(3));
    let mut container = open_bytes(input.clone(), Some("clip.y4m"));

    let mut writer = RawVideoWriter::new(Vec::new(), RawVideoVariant::Yuv4mpeg);
    writer.add_track(&container.tracks()[0].format).unwrap();
    for packet in container.by_ref() {
        writer.write(&packet.unwrap()).unwrap();
    }
    assert_eq!(writer.frames(), 3);
    assert_eq!(writer.finish().unwrap(), input);
}

#[test]
fn bare_frames_named_by_parameters() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip_CI420W4H2F25#1.yuv");
    let mut file = fs::File::create(&path).unwrap();
    for frame in frames(2) {
        file.write_all(&frame).unwrap();
    }
    drop(file);

    let mut container = Container::open_path(&path, OpenOptions::default()).unwrap();
    assert_eq!(container.format_name(), "raw");
    assert_eq!(container.duration_us(), 80_000);

    let packets = read_all(&mut container);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[1].pts, Some(40_000));
    assert_eq!(packets[1].data, vec![0x11; 12]);

    // Without parameters in the name nothing claims the stream.
    let plain = dir.path().join("clip.yuv");
    fs::copy(&path, &plain).unwrap();
    assert!(Container::open_path(&plain, OpenOptions::default()).is_err());
}
