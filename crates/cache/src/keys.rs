//! Deterministic cache key derivation
//!
//! An operation's identity (a logical name plus its arguments) is turned
//! into a canonical JSON document with every object's fields sorted, and
//! the document is hashed with XXH3-128. The result is always 32 lowercase
//! hex characters, however large the arguments are.
//!
//! XXH3 is used for speed and uniformity only. Keys are not a security
//! boundary.
//!
//! Arguments that cannot become JSON (maps with non-string keys, for
//! instance) are keyed by their `Debug` form instead. That form is only as
//! stable as the type's iteration order: a `BTreeMap` argument keys the
//! same in every process, a `HashMap` one does not, so it will miss across
//! restarts. Pass ordered collections for such arguments.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use xxhash_rust::xxh3::xxh3_128;

/// Length in characters of every derived key
pub const KEY_LENGTH: usize = 32;

/// Arguments of an operation, both positional and named
///
/// Named arguments are order-insensitive: two parameter sets that name the
/// same values in a different order derive the same key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyParams {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl KeyParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named argument
    pub fn arg<T>(mut self, name: impl Into<String>, value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        self.named.insert(name.into(), to_canonical_value(value));
        self
    }

    /// Add the next positional argument
    pub fn positional<T>(mut self, value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        self.positional.push(to_canonical_value(value));
        self
    }

    /// Build from an iterator of named arguments, in any order
    pub fn from_named<K, I>(args: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let named = args
            .into_iter()
            .map(|(name, value)| (name.into(), canonicalize(value)))
            .collect();
        Self {
            positional: Vec::new(),
            named,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// Derive the cache key for `operation` called with `params`
pub fn derive_key(operation: &str, params: &KeyParams) -> String {
    let document = canonical_document(operation, params);
    format!("{:032x}", xxh3_128(document.as_bytes()))
}

/// The canonical string form that gets hashed
pub fn canonical_document(operation: &str, params: &KeyParams) -> String {
    let mut named = Map::new();
    for (name, value) in &params.named {
        named.insert(name.clone(), value.clone());
    }

    let mut root = Map::new();
    root.insert("args".to_string(), Value::Array(params.positional.clone()));
    root.insert("kwargs".to_string(), Value::Object(named));
    root.insert("op".to_string(), Value::String(operation.to_string()));

    // Serializing a `Value` cannot fail.
    serde_json::to_string(&Value::Object(root)).unwrap_or_default()
}

/// Convert a value to JSON, falling back to its debug string form.
/// The fallback is deterministic only for types with a stable iteration
/// order.
fn to_canonical_value<T>(value: &T) -> Value
where
    T: Serialize + fmt::Debug + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(json) => canonicalize(json),
        Err(e) => {
            tracing::debug!(error = %e, "Key argument not serializable, using its string form");
            Value::String(format!("{value:?}"))
        }
    }
}

/// Rebuild objects with sorted fields so that insertion order never leaks
/// into the hashed form
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_named_argument_order_does_not_matter() {
        let a = KeyParams::new().arg("q", "SELECT 1").arg("p", &[1, 2]);
        let b = KeyParams::new().arg("p", &[1, 2]).arg("q", "SELECT 1");
        assert_eq!(derive_key("query", &a), derive_key("query", &b));
    }

    #[test]
    fn test_from_named_matches_builder() {
        let built = KeyParams::new().arg("q", "SELECT 1").arg("p", &[1, 2]);
        let collected =
            KeyParams::from_named([("p", json!([1, 2])), ("q", json!("SELECT 1"))]);
        assert_eq!(derive_key("query", &built), derive_key("query", &collected));
    }

    #[test]
    fn test_positional_order_matters() {
        let a = KeyParams::new().positional(&1).positional(&2);
        let b = KeyParams::new().positional(&2).positional(&1);
        assert_ne!(derive_key("f", &a), derive_key("f", &b));
    }

    #[test]
    fn test_positional_and_named_are_distinct() {
        let positional = KeyParams::new().positional("x");
        let named = KeyParams::new().arg("0", "x");
        assert_ne!(derive_key("f", &positional), derive_key("f", &named));
    }

    #[test]
    fn test_operation_name_is_part_of_the_key() {
        let params = KeyParams::new().arg("table", "users");
        assert_ne!(derive_key("query", &params), derive_key("profiling", &params));
    }

    #[test]
    fn test_key_is_fixed_length_hex() {
        let huge = "x".repeat(100_000);
        for params in [KeyParams::new(), KeyParams::new().arg("blob", huge.as_str())] {
            let key = derive_key("op", &params);
            assert_eq!(key.len(), KEY_LENGTH);
            assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_nested_maps_are_canonical() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..16 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..16).rev() {
            second.insert(format!("k{i}"), i);
        }
        let a = KeyParams::new().arg("filters", &first);
        let b = KeyParams::new().arg("filters", &second);
        assert_eq!(derive_key("q", &a), derive_key("q", &b));
    }

    #[derive(Debug)]
    struct NotJson(HashMap<(u8, u8), u8>);

    impl Serialize for NotJson {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            // Tuple keys cannot become JSON object keys.
            self.0.serialize(serializer)
        }
    }

    #[test]
    fn test_unserializable_arguments_fall_back_to_string_form() {
        let value = NotJson(HashMap::from([((1, 2), 3)]));
        let params = KeyParams::new().arg("odd", &value);
        let document = canonical_document("op", &params);
        assert!(document.contains("NotJson"));
        assert_eq!(derive_key("op", &params).len(), KEY_LENGTH);
    }

    #[test]
    fn test_ordered_fallback_is_stable_across_insertion_order() {
        let mut first = BTreeMap::new();
        let mut second = BTreeMap::new();
        for i in 0..8u8 {
            first.insert((i, i + 1), i);
        }
        for i in (0..8u8).rev() {
            second.insert((i, i + 1), i);
        }

        let a = KeyParams::new().arg("pairs", &first);
        let b = KeyParams::new().arg("pairs", &second);
        assert!(canonical_document("op", &a).contains("(0, 1)"));
        assert_eq!(derive_key("op", &a), derive_key("op", &b));
    }

    proptest! {
        #[test]
        fn prop_named_order_independence(
            args in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let forward: Vec<_> = args.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let mut backward = forward.clone();
            backward.reverse();

            let a = derive_key("op", &KeyParams::from_named(forward));
            let b = derive_key("op", &KeyParams::from_named(backward));
            prop_assert_eq!(a, b);
        }
    }
}
