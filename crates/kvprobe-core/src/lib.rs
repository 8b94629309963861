//! Core types for kvprobe.
//!
//! This crate holds everything that does not touch a socket: the datagram
//! envelope, the key-value payload codec, the wire numbering shared with the
//! server, the three-valued outcome model and the key generator.

mod codes;
pub mod frame;
mod kv;
mod outcome;
mod sequence;
mod target;

pub use codes::{CodesError, WireCodes};
pub use frame::Frame;
pub use kv::{
    CodecError, Command, ErrorCode, KeyValueCodec, MAX_KEY_LEN, MAX_VALUE_LEN, Request, Response,
    ResponseField,
};
pub use outcome::{Outcome, Status, StatusCounts, Tally, TallySnapshot};
pub use sequence::SequenceGenerator;
pub use target::{Target, TargetParseError};
