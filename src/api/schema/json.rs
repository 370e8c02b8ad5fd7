//! Plain-text JSON wire codec. The default [`Encoding`](crate::sync::Encoding)
//! for a new connection and the only one guaranteed present (this module is
//! gated on the `json` feature, which is in `default`).

use crate::api::error::ProtocolError;
use crate::api::schema::{Deserialize, Schema, SchemaType, Serialize};

#[derive(Debug, Default, Clone, Copy)]
pub struct Json;

impl Schema for Json {
    fn schema_type() -> SchemaType {
        SchemaType::Text
    }
}

impl<T> Serialize<Json> for T
where
    T: serde::Serialize,
{
    fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("outbound envelopes are always representable as JSON")
    }
}

impl<T> Deserialize<Json> for T
where
    T: for<'de> serde::de::Deserialize<'de>,
{
    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(buf).map_err(|_| ProtocolError::MalformedEnvelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::message::{InboundEnvelope, WireError};

    #[test]
    fn wire_error_round_trips_through_json_bytes() {
        let err = WireError::new("internal", "boom", false);
        let bytes = <WireError as Serialize<Json>>::serialize(&err);
        assert!(
            String::from_utf8(bytes)
                .unwrap()
                .contains("\"code\":\"internal\"")
        );
    }

    #[test]
    fn malformed_bytes_surface_as_protocol_error() {
        let result = <InboundEnvelope as Deserialize<Json>>::deserialize(b"not json");
        assert_eq!(result.unwrap_err(), ProtocolError::MalformedEnvelope);
    }
}
