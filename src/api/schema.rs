//! Abstracts the wire encoding used for runtime-owned envelopes (join
//! responses, errors, sync snapshots/updates) from the transport and land
//! layers. Action/event payload bytes stay opaque to this layer and are
//! decoded by per-land handler tables (see [`crate::land::hooks`]).

use crate::api::error::ProtocolError;

#[cfg(feature = "json")]
pub mod json;
#[cfg(feature = "msgpack")]
pub mod msgpack;
pub mod opcode;

pub trait Schema {
    fn schema_type() -> SchemaType;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Text,
    Binary,
}

pub trait Deserialize<S>
where
    S: Schema,
    Self: Sized,
{
    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError>;
}

pub trait Serialize<S>
where
    S: Schema,
{
    fn serialize(&self) -> Vec<u8>;
}
