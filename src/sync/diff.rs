//! Deep-compare of two projected JSON trees into JSON-Patch-shaped
//! operations. Used by [`crate::sync::SyncEngine`] once per field per
//! sync cycle.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawOp {
    pub kind: OpKind,
    /// Path segments from the field root, e.g. `["players", "p1", "hp"]`.
    pub path: Vec<String>,
    pub value: Option<Value>,
}

/// Deep-compare `prev` against `curr`, both rooted at `base_path`, emitting
/// one op per changed leaf or structural change. Object keys are visited in
/// sorted order so the emitted op sequence is deterministic across runs.
pub fn diff_values(prev: &Value, curr: &Value, base_path: &[String], out: &mut Vec<RawOp>) {
    match (prev, curr) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            let mut keys: Vec<&String> = prev_map.keys().chain(curr_map.keys()).collect();
            keys.sort();
            keys.dedup();

            for key in keys {
                let mut path = base_path.to_vec();
                path.push(key.clone());
                match (prev_map.get(key), curr_map.get(key)) {
                    (Some(p), Some(c)) => diff_values(p, c, &path, out),
                    (Some(_), None) => out.push(RawOp {
                        kind: OpKind::Remove,
                        path,
                        value: None,
                    }),
                    (None, Some(c)) => out.push(RawOp {
                        kind: OpKind::Add,
                        path,
                        value: Some(c.clone()),
                    }),
                    (None, None) => unreachable!("key came from one of the two maps"),
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) => {
            // Sequences are compared index-wise; index is the dynamic
            // segment so a trailing truncation reports removes from the
            // tail, keeping patch replay deterministic regardless of
            // ordering on the receiving side.
            let max_len = prev_arr.len().max(curr_arr.len());
            for idx in 0..max_len {
                let mut path = base_path.to_vec();
                path.push(idx.to_string());
                match (prev_arr.get(idx), curr_arr.get(idx)) {
                    (Some(p), Some(c)) => diff_values(p, c, &path, out),
                    (Some(_), None) => out.push(RawOp {
                        kind: OpKind::Remove,
                        path,
                        value: None,
                    }),
                    (None, Some(c)) => out.push(RawOp {
                        kind: OpKind::Add,
                        path,
                        value: Some(c.clone()),
                    }),
                    (None, None) => unreachable!("index within max_len"),
                }
            }
        }
        (p, c) => {
            if p != c {
                out.push(RawOp {
                    kind: OpKind::Replace,
                    path: base_path.to_vec(),
                    value: Some(c.clone()),
                });
            }
        }
    }
}

/// Apply a sequence of ops (in emission order) to `target`, mutating it in
/// place. Used both by the in-process round-trip test and, conceptually,
/// by a client reconstructing state from a diff stream.
pub fn apply_ops(target: &mut Value, ops: &[RawOp]) {
    for op in ops {
        apply_one(target, op);
    }
}

fn apply_one(target: &mut Value, op: &RawOp) {
    if op.path.is_empty() {
        if let Some(v) = &op.value {
            *target = v.clone();
        }
        return;
    }

    let mut cursor = target;
    for segment in &op.path[..op.path.len() - 1] {
        cursor = match cursor {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            Value::Array(arr) => {
                let idx: usize = segment.parse().expect("array path segment must be a usize");
                while arr.len() <= idx {
                    arr.push(Value::Null);
                }
                &mut arr[idx]
            }
            _ => {
                *cursor = Value::Object(Default::default());
                let Value::Object(map) = cursor else {
                    unreachable!()
                };
                map.entry(segment.clone()).or_insert(Value::Null)
            }
        };
    }

    let last = op.path.last().unwrap();
    match (cursor, op.kind) {
        (Value::Object(map), OpKind::Remove) => {
            map.remove(last);
        }
        (Value::Object(map), _) => {
            map.insert(last.clone(), op.value.clone().unwrap_or(Value::Null));
        }
        (Value::Array(arr), OpKind::Remove) => {
            let idx: usize = last.parse().expect("array path segment must be a usize");
            if idx < arr.len() {
                arr.remove(idx);
            }
        }
        (Value::Array(arr), _) => {
            let idx: usize = last.parse().expect("array path segment must be a usize");
            while arr.len() <= idx {
                arr.push(Value::Null);
            }
            arr[idx] = op.value.clone().unwrap_or(Value::Null);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_is_empty_for_equal_trees() {
        let v = json!({"tick": 1});
        let mut ops = Vec::new();
        diff_values(&v, &v, &[], &mut ops);
        assert!(ops.is_empty());
    }

    #[test]
    fn diff_detects_replace_on_scalar_field() {
        let prev = json!({"tick": 1});
        let curr = json!({"tick": 2});
        let mut ops = Vec::new();
        diff_values(&prev, &curr, &[], &mut ops);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OpKind::Replace);
        assert_eq!(ops[0].path, vec!["tick".to_string()]);
    }

    #[test]
    fn diff_detects_add_and_remove_on_maps() {
        let prev = json!({"players": {"p1": {"score": 0}}});
        let curr = json!({"players": {"p2": {"score": 0}}});
        let mut ops = Vec::new();
        diff_values(&prev, &curr, &[], &mut ops);

        let has_remove = ops
            .iter()
            .any(|op| op.kind == OpKind::Remove && op.path == vec!["players", "p1", "score"]);
        let has_add = ops
            .iter()
            .any(|op| op.kind == OpKind::Add && op.path == vec!["players", "p2", "score"]);
        assert!(has_remove && has_add);
    }

    #[test]
    fn apply_ops_reconstructs_current_from_previous_bit_for_bit() {
        let prev = json!({"tick": 1, "players": {"p1": {"score": 0}}});
        let curr = json!({"tick": 2, "players": {"p1": {"score": 5}, "p2": {"score": 0}}});

        let mut ops = Vec::new();
        diff_values(&prev, &curr, &[], &mut ops);

        let mut reconstructed = prev.clone();
        apply_ops(&mut reconstructed, &ops);

        assert_eq!(reconstructed, curr);
    }
}
