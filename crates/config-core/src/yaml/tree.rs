//! A YAML document wrapper that preserves read order, walks dot-delimited
//! paths, and serializes with a recursive alphabetical key sort.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, Result};

/// A parsed YAML document.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Value,
}

/// The three keys an encrypted leaf must have, nothing more, nothing less.
const ENCRYPTED_KEYS: [&str; 3] = ["encrypted", "ciphertext", "hash"];

impl Tree {
    pub fn from_value(root: Value) -> Self {
        Tree { root }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let root: Value = serde_yaml::from_slice(bytes)?;
        Ok(Tree { root })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Returns the node at `path`, recursing one dot-segment at a time.
    pub fn get(&self, path: &str) -> Result<&Value> {
        get_path(&self.root, path)
    }

    /// Sets `value` at `path`, creating any missing intermediate maps or
    /// sequences. Setting past the end of a sequence appends one slot; it
    /// never pads with placeholders.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        set_path(&mut self.root, path, value)
    }

    pub fn is_map(value: &Value) -> bool {
        value.is_mapping()
    }

    pub fn is_sequence(value: &Value) -> bool {
        value.is_sequence()
    }

    /// True if `value` is a mapping with exactly `{encrypted: true,
    /// ciphertext: <str>, hash: <str>}`.
    pub fn is_encrypted(value: &Value) -> bool {
        encrypted_fields(value).is_some()
    }

    /// Decodes the base64 `ciphertext` field of an encrypted leaf.
    pub fn ciphertext_bytes(value: &Value) -> Result<Vec<u8>> {
        let (ciphertext, _hash) = encrypted_fields(value)
            .ok_or_else(|| ConfigError::parse_error("not an encrypted leaf"))?;

        BASE64
            .decode(ciphertext)
            .map_err(|_| ConfigError::parse_error("ciphertext is not valid base64"))
    }

    /// Serializes with a stable, recursive alphabetical key sort and
    /// 2-space indentation.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut sorted = self.root.clone();
        sort_value(&mut sorted);
        let text = serde_yaml::to_string(&sorted)?;
        Ok(text.into_bytes())
    }
}

fn encrypted_fields(value: &Value) -> Option<(&str, &str)> {
    let map = value.as_mapping()?;
    if map.len() != ENCRYPTED_KEYS.len() {
        return None;
    }
    for key in map.keys() {
        let key = key.as_str()?;
        if !ENCRYPTED_KEYS.contains(&key) {
            return None;
        }
    }

    let encrypted = map.get("encrypted")?.as_bool()?;
    if !encrypted {
        return None;
    }
    let ciphertext = map.get("ciphertext")?.as_str()?;
    let hash = map.get("hash")?.as_str()?;
    Some((ciphertext, hash))
}

fn find_in_node<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    match node {
        Value::Mapping(map) => map.get(Value::String(key.to_string())),
        Value::Sequence(seq) => key.parse::<usize>().ok().and_then(|i| seq.get(i)),
        _ => None,
    }
}

fn get_path<'a>(node: &'a Value, path: &str) -> Result<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };

    let found = find_in_node(node, head).ok_or_else(|| ConfigError::not_found(path.to_string()))?;

    match rest {
        Some(rest) => get_path(found, rest),
        None => Ok(found),
    }
}

fn set_path(node: &mut Value, path: &str, value: Value) -> Result<()> {
    let mut segments = path.split('.');
    let head = segments
        .next()
        .expect("split always yields at least one segment");
    let rest: Vec<&str> = segments.collect();

    if rest.is_empty() {
        set_direct(node, head, value)
    } else {
        let rest_path = rest.join(".");
        let next_is_numeric = rest[0].parse::<usize>().is_ok();
        let child = ensure_child(node, head, next_is_numeric)?;
        set_path(child, &rest_path, value)
    }
}

/// Returns a mutable reference to `node`'s child at `key`, creating it (as
/// a sequence if `next_is_numeric`, else a map) if absent.
fn ensure_child<'a>(
    node: &'a mut Value,
    key: &str,
    next_is_numeric: bool,
) -> Result<&'a mut Value> {
    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    let map = node.as_mapping_mut().expect("just normalized to a mapping");
    let yaml_key = Value::String(key.to_string());

    if !map.contains_key(&yaml_key) {
        let placeholder = if next_is_numeric {
            Value::Sequence(Vec::new())
        } else {
            Value::Mapping(Mapping::new())
        };
        map.insert(yaml_key.clone(), placeholder);
    }

    Ok(map
        .get_mut(&yaml_key)
        .expect("just inserted or already present"))
}

fn set_direct(node: &mut Value, key: &str, value: Value) -> Result<()> {
    if let Ok(index) = key.parse::<usize>() {
        if node.is_sequence() || node.is_null() {
            let seq = match node {
                Value::Sequence(seq) => seq,
                _ => {
                    *node = Value::Sequence(Vec::new());
                    node.as_sequence_mut().unwrap()
                }
            };
            if index < seq.len() {
                seq[index] = value;
            } else {
                // Never pad: append exactly one slot past the end.
                seq.push(value);
            }
            return Ok(());
        }
        return Err(ConfigError::input_error(format!(
            "cannot set numeric key {index} on a non-sequence node"
        )));
    }

    if node.is_sequence() {
        return Err(ConfigError::input_error(format!(
            "cannot set non-numeric key {key} on a sequence node"
        )));
    }

    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    let map = node.as_mapping_mut().unwrap();
    map.insert(Value::String(key.to_string()), value);
    Ok(())
}

fn sort_value(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            let mut entries: Vec<(Value, Value)> = std::mem::take(map).into_iter().collect();
            for (_, v) in entries.iter_mut() {
                sort_value(v);
            }
            entries.sort_by_key(|(k, _)| sort_key(k));
            for (k, v) in entries {
                map.insert(k, v);
            }
        }
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                sort_value(item);
            }
        }
        _ => {}
    }
}

fn sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(yaml: &str) -> Tree {
        Tree::from_bytes(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn gets_nested_value() {
        let t = tree("a:\n  b:\n    c: 1\n");
        assert_eq!(t.get("a.b.c").unwrap().as_i64(), Some(1));
    }

    #[test]
    fn gets_sequence_index() {
        let t = tree("a:\n  - x\n  - y\n");
        assert_eq!(t.get("a.1").unwrap().as_str(), Some("y"));
    }

    #[test]
    fn set_creates_missing_maps() {
        let mut t = tree("a: 1\n");
        t.set("b.c.d", Value::String("hi".into())).unwrap();
        assert_eq!(t.get("b.c.d").unwrap().as_str(), Some("hi"));
    }

    #[test]
    fn set_on_sequence_past_end_appends_one_slot() {
        let mut t = tree("a:\n  - x\n");
        t.set("a.5", Value::String("z".into())).unwrap();
        let seq = t.get("a").unwrap().as_sequence().unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[1].as_str(), Some("z"));
    }

    #[test]
    fn set_non_numeric_key_on_sequence_is_rejected() {
        let mut t = tree("a:\n  - x\n  - y\n");
        let err = t.set("a.b", Value::String("z".into())).unwrap_err();
        assert!(matches!(err, ConfigError::InputError(_)));
        let seq = t.get("a").unwrap().as_sequence().unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn detects_encrypted_leaf() {
        let t = tree("secret:\n  encrypted: true\n  ciphertext: aGVsbG8=\n  hash: abc\n");
        assert!(Tree::is_encrypted(t.get("secret").unwrap()));
    }

    #[test]
    fn does_not_misdetect_partial_shape() {
        let t = tree("thing:\n  encrypted: true\n  ciphertext: aGVsbG8=\n");
        assert!(!Tree::is_encrypted(t.get("thing").unwrap()));
    }

    #[test]
    fn serialize_sorts_keys_alphabetically() {
        let t = tree("z: 1\na: 2\nm:\n  z: 1\n  a: 2\n");
        let out = String::from_utf8(t.serialize().unwrap()).unwrap();
        let a_pos = out.find("a:").unwrap();
        let m_pos = out.find("m:").unwrap();
        let z_pos = out.find("z:").unwrap();
        assert!(a_pos < m_pos && m_pos < z_pos);
    }

    #[test]
    fn plaintext_get_on_a_sequence_by_index() {
        let t = tree("list:\n  - a\n  - b\n  - c\n");
        assert_eq!(t.get("list.1").unwrap().as_str(), Some("b"));
        assert!(t.get("list.10").is_err());
    }

    #[test]
    fn plaintext_set_past_the_end_grows_rather_than_pads() {
        let mut t = tree("list:\n  - a\n  - b\n  - c\n");
        t.set("list.5", Value::String("z".into())).unwrap();
        let seq = t.get("list").unwrap().as_sequence().unwrap();
        assert_eq!(seq.len(), 4);
        assert_eq!(t.get("list.3").unwrap().as_str(), Some("z"));
    }

    proptest::proptest! {
        /// Invariant 2 (get-after-set): writing a plain scalar at a fresh
        /// dot-path and reading it back returns exactly what was written.
        #[test]
        fn get_after_set_round_trips_plain_scalars(
            segments in proptest::collection::vec("[a-z]{1,8}", 1..4),
            value in ".{0,64}",
        ) {
            let path = segments.join(".");
            let mut t = Tree::from_value(Value::Mapping(Mapping::new()));
            t.set(&path, Value::String(value.clone())).unwrap();
            proptest::prop_assert_eq!(t.get(&path).unwrap().as_str(), Some(value.as_str()));
        }

        /// Invariant 7 (sort stability): serializing any mapping of
        /// single-level string keys always emits them in ascending order.
        #[test]
        fn serialize_always_sorts_top_level_keys(
            keys in proptest::collection::hash_set("[a-z]{1,6}", 1..8),
        ) {
            let mut map = Mapping::new();
            for key in &keys {
                map.insert(Value::String(key.clone()), Value::Number(1.into()));
            }
            let t = Tree::from_value(Value::Mapping(map));
            let out = t.serialize().unwrap();
            let reparsed: Mapping = serde_yaml::from_slice(&out).unwrap();
            let emitted_order: Vec<String> = reparsed
                .keys()
                .map(|k| k.as_str().unwrap().to_string())
                .collect();

            let mut sorted: Vec<String> = keys.into_iter().collect();
            sorted.sort();
            proptest::prop_assert_eq!(emitted_order, sorted);
        }

        /// Invariant 3 (encrypted leaf detection): adding or removing any of
        /// the three required keys of an encrypted leaf breaks detection.
        #[test]
        fn encrypted_leaf_detection_requires_exactly_the_three_keys(
            ciphertext in "[A-Za-z0-9+/=]{0,32}",
            hash in "[0-9a-f]{0,64}",
            extra in proptest::option::of("[a-z]{1,8}"),
        ) {
            let mut map = Mapping::new();
            map.insert("encrypted".into(), true.into());
            map.insert("ciphertext".into(), ciphertext.into());
            map.insert("hash".into(), hash.into());
            proptest::prop_assert!(Tree::is_encrypted(&Value::Mapping(map.clone())));

            let mut missing_hash = map.clone();
            missing_hash.remove("hash");
            proptest::prop_assert!(!Tree::is_encrypted(&Value::Mapping(missing_hash)));

            if let Some(extra_key) = extra {
                if extra_key != "encrypted" && extra_key != "ciphertext" && extra_key != "hash" {
                    let mut with_extra = map.clone();
                    with_extra.insert(Value::String(extra_key), Value::String("x".into()));
                    proptest::prop_assert!(!Tree::is_encrypted(&Value::Mapping(with_extra)));
                }
            }
        }
    }
}
