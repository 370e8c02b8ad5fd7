//! Positional-array wire codec: the same snapshot/update payloads as
//! [`super::json`], with object keys replaced by array position so a
//! connection that negotiated [`Encoding::OpcodeArray`](crate::sync::Encoding)
//! pays for values, not field names, on every frame.
//!
//! Unlike `json`/`msgpack` this isn't a blanket `serde` passthrough: the
//! field table and `OpKind` ordering are domain knowledge the transport
//! layer must agree on with the client out of band (communicated once, in
//! the join response's field-table digest).

use serde_json::{Value, json};

use crate::sync::diff::OpKind;
use crate::sync::{PatchOp, PathRepr, StateSnapshot, StateUpdate, UpdateKind};

/// Assigns a stable `u16` opcode to each field name of a land's state tree,
/// in declaration order. Rebuilt once per land type at registration; never
/// mutated afterward, so opcodes are stable for the life of the process.
#[derive(Debug, Clone)]
pub struct OpcodeTable {
    fields: Vec<&'static str>,
}

impl OpcodeTable {
    pub fn build(fields: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    fn opcode_of(&self, field: &str) -> Option<u16> {
        self.fields.iter().position(|f| *f == field).map(|i| i as u16)
    }

    fn field_of(&self, opcode: u16) -> Option<&'static str> {
        self.fields.get(opcode as usize).copied()
    }

    /// `[opcode0, value0, opcode1, value1, ...]`, fields not present in the
    /// table are dropped rather than erroring, since a player projection
    /// may legitimately omit server-only fields.
    pub fn encode_snapshot(&self, snapshot: &StateSnapshot) -> Value {
        let mut out = Vec::with_capacity(snapshot.fields.len() * 2);
        for (name, value) in &snapshot.fields {
            let Some(opcode) = self.opcode_of(name) else {
                continue;
            };
            out.push(json!(opcode));
            out.push(value.clone());
        }
        Value::Array(out)
    }

    pub fn decode_snapshot(&self, array: &Value) -> Option<serde_json::Map<String, Value>> {
        let entries = array.as_array()?;
        let mut fields = serde_json::Map::new();
        for pair in entries.chunks_exact(2) {
            let opcode = pair[0].as_u64()? as u16;
            let name = self.field_of(opcode)?;
            fields.insert(name.to_string(), pair[1].clone());
        }
        Some(fields)
    }
}

fn op_kind_code(kind: OpKind) -> u8 {
    match kind {
        OpKind::Add => 0,
        OpKind::Replace => 1,
        OpKind::Remove => 2,
    }
}

fn op_kind_from_code(code: u8) -> Option<OpKind> {
    match code {
        0 => Some(OpKind::Add),
        1 => Some(OpKind::Replace),
        2 => Some(OpKind::Remove),
        _ => None,
    }
}

fn path_to_json(path: &PathRepr) -> Value {
    match path {
        PathRepr::Literal(s) => json!(s),
        PathRepr::Hashed { hash, dynamic_keys } => json!([hash, dynamic_keys]),
    }
}

fn path_from_json(value: &Value) -> Option<PathRepr> {
    if let Some(s) = value.as_str() {
        return Some(PathRepr::Literal(s.to_string()));
    }
    let arr = value.as_array()?;
    let hash = arr.first()?.as_u64()? as u32;
    let dynamic_keys = arr
        .get(1)?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    Some(PathRepr::Hashed { hash, dynamic_keys })
}

/// Every patch becomes a `[kindCode, path, value]` triple; `path` is the
/// literal string or `[hash, dynamicKeys]` pair already produced by the
/// sync engine's path trie.
pub fn encode_update(update: &StateUpdate) -> Value {
    let kind_code = match update.kind {
        UpdateKind::NoChange => 0,
        UpdateKind::FirstSync => 1,
        UpdateKind::Diff => 2,
    };
    let patches: Vec<Value> = update
        .patches
        .iter()
        .map(|p| json!([op_kind_code(p.kind), path_to_json(&p.path), p.value]))
        .collect();
    json!([kind_code, patches])
}

pub fn decode_update(value: &Value) -> Option<StateUpdate> {
    let outer = value.as_array()?;
    let kind = match outer.first()?.as_u64()? {
        0 => UpdateKind::NoChange,
        1 => UpdateKind::FirstSync,
        2 => UpdateKind::Diff,
        _ => return None,
    };
    let patches = outer
        .get(1)?
        .as_array()?
        .iter()
        .map(|entry| {
            let entry = entry.as_array()?;
            let kind = op_kind_from_code(entry.first()?.as_u64()? as u8)?;
            let path = path_from_json(entry.get(1)?)?;
            let value = entry.get(2).filter(|v| !v.is_null()).cloned();
            Some(PatchOp { kind, path, value })
        })
        .collect::<Option<Vec<_>>>()?;
    Some(StateUpdate { kind, patches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PlayerId;
    use crate::sync::Encoding;
    use serde_json::json;

    #[test]
    fn snapshot_round_trips_through_opcode_array() {
        let table = OpcodeTable::build(["tick", "privateStates"]);
        let mut fields = serde_json::Map::new();
        fields.insert("tick".to_string(), json!(7));
        fields.insert("privateStates".to_string(), json!({"1": {"score": 0}}));
        let snapshot = StateSnapshot {
            land_type: "demo",
            player_id: Some(PlayerId(1)),
            encoding: Encoding::OpcodeArray,
            fields,
        };

        let encoded = table.encode_snapshot(&snapshot);
        let decoded = table.decode_snapshot(&encoded).unwrap();
        assert_eq!(decoded, snapshot.fields);
    }

    #[test]
    fn unknown_field_is_dropped_rather_than_erroring() {
        let table = OpcodeTable::build(["tick"]);
        let mut fields = serde_json::Map::new();
        fields.insert("tick".to_string(), json!(1));
        fields.insert("secret".to_string(), json!("nope"));
        let snapshot = StateSnapshot {
            land_type: "demo",
            player_id: None,
            encoding: Encoding::OpcodeArray,
            fields,
        };

        let encoded = table.encode_snapshot(&snapshot);
        assert_eq!(encoded.as_array().unwrap().len(), 2);
    }

    #[test]
    fn update_round_trips_through_opcode_array() {
        let update = StateUpdate {
            kind: UpdateKind::Diff,
            patches: vec![
                PatchOp {
                    kind: OpKind::Replace,
                    path: PathRepr::Literal("tick".to_string()),
                    value: Some(json!(3)),
                },
                PatchOp {
                    kind: OpKind::Remove,
                    path: PathRepr::Hashed {
                        hash: 42,
                        dynamic_keys: vec!["p1".to_string()],
                    },
                    value: None,
                },
            ],
        };

        let encoded = encode_update(&update);
        let decoded = decode_update(&encoded).unwrap();
        assert_eq!(decoded.kind, update.kind);
        assert_eq!(decoded.patches, update.patches);
    }
}
