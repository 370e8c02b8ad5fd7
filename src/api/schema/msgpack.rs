//! Binary MessagePack wire codec, opt-in via the `msgpack` feature. Shares
//! the same `serde`-derived envelope types as [`super::json`]; only the
//! wire format differs, so a land's handler code never needs to know which
//! encoding a given session negotiated.

use crate::api::error::ProtocolError;
use crate::api::schema::{Deserialize, Schema, SchemaType, Serialize};

#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePack;

impl Schema for MessagePack {
    fn schema_type() -> SchemaType {
        SchemaType::Binary
    }
}

impl<T> Serialize<MessagePack> for T
where
    T: serde::Serialize,
{
    fn serialize(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("outbound envelopes are always representable in msgpack")
    }
}

impl<T> Deserialize<MessagePack> for T
where
    T: for<'de> serde::de::Deserialize<'de>,
{
    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(buf).map_err(|_| ProtocolError::MalformedEnvelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::message::WireError;

    #[test]
    fn wire_error_round_trips_through_msgpack_bytes() {
        let err = WireError::new("internal", "boom", false);
        let bytes = <WireError as Serialize<MessagePack>>::serialize(&err);
        assert!(!bytes.is_empty());
    }
}
