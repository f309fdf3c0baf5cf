//! Event identity: the 64-bit event id codec and the event record layout.

pub mod codec;

pub use codec::{CodecError, EventCodec, EventRecord, TWO32};
