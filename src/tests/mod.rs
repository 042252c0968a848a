//! Whole-container scenarios over synthetic files.

pub(crate) mod builders;

mod ps;
mod raw;

use std::io::Cursor;

use crate::{Container, IoStream, OpenOptions, Packet};

/// `RUST_LOG=vcdemux=debug cargo test -- --nocapture` for reader decisions.
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn open_bytes(bytes: Vec<u8>, uri: Option<&str>) -> Container {
    open_with(bytes, uri, OpenOptions::default())
}

pub(crate) fn open_with(bytes: Vec<u8>, uri: Option<&str>, options: OpenOptions) -> Container {
    init_logging();
    let io = IoStream::new(Cursor::new(bytes)).unwrap();
    let result = Container::open(io, uri, options);
    if let Err(err) = &result {
        println!("{err}");
    }
    result.unwrap()
}

/// Reads packets until end of stream.
pub(crate) fn read_all(container: &mut Container) -> Vec<Packet> {
    container.by_ref().map(|p| p.unwrap()).collect()
}
