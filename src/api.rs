//! Wire-facing types shared between the transport layer and the rest of
//! the runtime: error shapes, envelope payloads, and the pluggable wire
//! encodings that (de)serialize them.

pub mod error;
pub mod message;
pub mod schema;
