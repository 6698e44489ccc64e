//! Two-pass schema coalescence for a batch of dynamic-schema documents:
//! `collect` walks every document recording each scalar leaf's type,
//! `fill` walks them again inserting type-appropriate defaults for any
//! leaf absent from a given document but present at the same path in
//! another. Used per-batch by the analytics-DB sink's Preprocess step,
//! and, via `collect` alone, by `FieldCollector`.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// The scalar shapes the traveler distinguishes. Objects and arrays
/// are recursed into but never carry a type tag of their own — they
/// have no default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    String,
    Int64,
    Float64,
    Bool,
}

impl TypeTag {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(TypeTag::String),
            Value::Bool(_) => Some(TypeTag::Bool),
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Some(TypeTag::Int64)
                } else {
                    Some(TypeTag::Float64)
                }
            }
            _ => None,
        }
    }

    fn default_value(self) -> Value {
        match self {
            TypeTag::String => Value::String(String::new()),
            TypeTag::Int64 => Value::from(0i64),
            TypeTag::Float64 => Value::from(0.0f64),
            TypeTag::Bool => Value::Bool(false),
        }
    }
}

/// Accumulates scalar type observations across a batch of documents
/// and fills in type-appropriate defaults for keys a given document
/// never saw.
#[derive(Debug, Default)]
pub struct SchemaTraveler {
    /// Full dotted/bracketed path -> observed scalar type. Overwritten
    /// on repeated observation (last write wins, matching the source:
    /// a key seen as both `i64` in one doc and `string` in another
    /// settles on whichever was walked last in that batch).
    result: HashMap<String, TypeTag>,
    /// Paths whose observed shape has no default (array of objects
    /// with no scalar leaves, etc).
    unhandled: HashMap<String, ()>,
    /// Per-prefix sibling shape index: every scalar key directly under
    /// that prefix, across every document in the batch. This is what
    /// lets `fill` add a key to a document that never had it at all.
    object_type_map: HashMap<String, HashMap<String, TypeTag>>,
    /// Conservative mode: only fill keys whose observed type is
    /// string.
    string_only: bool,
}

impl SchemaTraveler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string_only(string_only: bool) -> Self {
        Self {
            string_only,
            ..Self::default()
        }
    }

    /// Records every scalar (path, type) pair in `doc`. Assumes the
    /// document's top level is an object, not an array.
    pub fn collect(&mut self, doc: &Map<String, Value>) {
        self.travel_object(doc, "");
    }

    /// Fills missing keys in `doc` with type-appropriate defaults
    /// based on everything `collect` has seen across the batch so
    /// far. Idempotent: running it twice on an already-filled document
    /// is a no-op, because a filled key is now present and the
    /// sibling-fill step only acts on absent keys.
    pub fn fill(&self, doc: &mut Map<String, Value>) {
        self.travel_object_fill(doc, "", 0);
    }

    /// Sorted list of every scalar path observed (excludes array-sampled
    /// paths — those use a `[]`-suffixed prefix segment and are
    /// filtered out here so this matches the plain per-namespace key
    /// view `FieldCollector` needs, not the richer array-aware result
    /// `Preprocess` uses internally).
    pub fn scalar_keys_excluding_arrays(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .result
            .keys()
            .filter(|k| !k.contains("[]"))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn handled_types(&self) -> Vec<&'static str> {
        let mut tags: Vec<TypeTag> = self.result.values().copied().collect();
        tags.sort_by_key(|t| *t as u8);
        tags.dedup();
        tags.into_iter().map(tag_name).collect()
    }

    pub fn unhandled_paths(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.unhandled.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn record_sibling(&mut self, prefix: &str, key: &str, tag: TypeTag) {
        self.object_type_map
            .entry(prefix.to_string())
            .or_default()
            .insert(key.to_string(), tag);
    }

    fn travel_object(&mut self, doc: &Map<String, Value>, prefix: &str) {
        for (key, value) in doc.iter() {
            let global_key = format!("{prefix}{key}");
            match value {
                Value::String(_) | Value::Bool(_) | Value::Number(_) => {
                    let tag = TypeTag::of(value).expect("scalar variant matched above");
                    self.record_sibling(prefix, key, tag);
                    self.result.insert(global_key, tag);
                }
                Value::Object(inner) => {
                    let child_prefix = format!("{global_key}.");
                    self.travel_object(inner, &child_prefix);
                }
                Value::Array(arr) => {
                    let child_prefix = format!("{global_key}[]");
                    self.travel_array(arr, &child_prefix);
                }
                Value::Null => {
                    self.unhandled.insert(global_key, ());
                }
            }
        }
    }

    /// The fill-pass walk: leaves already-present scalars untouched,
    /// recurses into objects/arrays, replaces a null with its batch
    /// default, and — once a whole object level has been walked — adds
    /// any sibling key this document's object never had at all.
    fn travel_object_fill(&self, doc: &mut Map<String, Value>, prefix: &str, level: usize) {
        let keys: Vec<String> = doc.keys().cloned().collect();
        for key in keys {
            let global_key = format!("{prefix}{key}");
            let value = doc.get_mut(&key).expect("key just read from this map");
            match value {
                Value::String(_) | Value::Bool(_) | Value::Number(_) => {
                    // Present with a concrete scalar value already: no fill needed.
                }
                Value::Object(inner) => {
                    let child_prefix = format!("{global_key}.");
                    self.travel_object_fill(inner, &child_prefix, level + 1);
                }
                Value::Array(arr) => {
                    let child_prefix = format!("{global_key}[]");
                    self.travel_array_fill(arr, &child_prefix, level + 1);
                }
                Value::Null => {
                    if level != 0 {
                        if let Some(&tag) = self.result.get(&global_key) {
                            if !self.string_only || tag == TypeTag::String {
                                *value = tag.default_value();
                            }
                        }
                    }
                }
            }
        }

        // Sibling fill: a key present in some other document's object
        // at this same prefix but wholly absent here. Top-level keys
        // are never defaulted (level 0): the sink handles missing
        // top-level fields itself.
        if level != 0 {
            if let Some(siblings) = self.object_type_map.get(prefix) {
                let mut siblings: Vec<(&String, &TypeTag)> = siblings.iter().collect();
                siblings.sort_by_key(|(k, _)| k.as_str());
                for (key, &tag) in siblings {
                    if !doc.contains_key(key) {
                        if !self.string_only || tag == TypeTag::String {
                            doc.insert(key.clone(), tag.default_value());
                        }
                    }
                }
            }
        }
    }

    fn travel_array(&mut self, array: &[Value], prefix: &str) {
        for elem in array.iter() {
            match elem {
                Value::String(_) | Value::Bool(_) | Value::Number(_) => {
                    let tag = TypeTag::of(elem).expect("scalar variant matched above");
                    self.result.insert(prefix.to_string(), tag);
                }
                Value::Object(inner) => {
                    let child_prefix = format!("{prefix}.");
                    self.travel_object(inner, &child_prefix);
                }
                _ => {
                    self.unhandled.insert(prefix.to_string(), ());
                }
            }
        }
    }

    fn travel_array_fill(&self, array: &mut [Value], prefix: &str, level: usize) {
        for elem in array.iter_mut() {
            if let Value::Object(inner) = elem {
                let child_prefix = format!("{prefix}.");
                self.travel_object_fill(inner, &child_prefix, level + 1);
            }
        }
    }
}

fn tag_name(tag: TypeTag) -> &'static str {
    match tag {
        TypeTag::String => "string",
        TypeTag::Int64 => "int64",
        TypeTag::Float64 => "float64",
        TypeTag::Bool => "bool",
    }
}

/// Runs Collect over every document in the batch, then Fill over every
/// document, mutating each in place. This is what the analytics-DB
/// sink calls its Preprocess step.
pub fn coalesce_batch(docs: &mut [Map<String, Value>], string_only: bool) {
    let mut traveler = SchemaTraveler::with_string_only(string_only);
    for doc in docs.iter() {
        traveler.collect(doc);
    }
    for doc in docs.iter_mut() {
        traveler.fill(doc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn fills_sibling_key_absent_from_one_document_but_present_in_another() {
        let mut docs = vec![
            obj(json!({"a": {"x": 1}})),
            obj(json!({"a": {"y": "z"}})),
        ];
        coalesce_batch(&mut docs, false);

        let a0 = docs[0]["a"].as_object().unwrap();
        let a1 = docs[1]["a"].as_object().unwrap();
        assert_eq!(a0.get("y"), Some(&Value::String(String::new())));
        assert_eq!(a1.get("x"), Some(&Value::from(0i64)));
    }

    #[test]
    fn never_defaults_top_level_keys() {
        let mut docs = vec![obj(json!({"a": 1})), obj(json!({"b": 2}))];
        coalesce_batch(&mut docs, false);
        assert!(!docs[0].contains_key("b"));
        assert!(!docs[1].contains_key("a"));
    }

    #[test]
    fn fill_is_idempotent() {
        let mut docs = vec![obj(json!({"a": {"x": 1}})), obj(json!({"a": {"y": "z"}}))];
        let mut traveler = SchemaTraveler::new();
        for doc in docs.iter() {
            traveler.collect(doc);
        }
        traveler.fill(&mut docs[0]);
        let after_first = docs[0].clone();
        traveler.fill(&mut docs[0]);
        assert_eq!(docs[0], after_first);
    }

    #[test]
    fn string_only_mode_skips_non_string_defaults() {
        let mut docs = vec![
            obj(json!({"a": {"x": 1, "y": "z"}})),
            obj(json!({"a": {}})),
        ];
        coalesce_batch(&mut docs, true);
        let a1 = docs[1]["a"].as_object().unwrap();
        assert_eq!(a1.get("y"), Some(&Value::String(String::new())));
        assert!(!a1.contains_key("x"));
    }

    #[test]
    fn null_values_are_replaced_using_the_batch_observed_type() {
        let mut docs = vec![obj(json!({"a": {"x": 1}})), obj(json!({"a": {"x": null}}))];
        coalesce_batch(&mut docs, false);
        let a1 = docs[1]["a"].as_object().unwrap();
        assert_eq!(a1.get("x"), Some(&Value::from(0i64)));
    }

    #[test]
    fn array_of_objects_with_no_scalar_leaves_is_recorded_unhandled() {
        let mut traveler = SchemaTraveler::new();
        let doc = obj(json!({"items": [{"nested": {"k": [1, 2]}}]}));
        traveler.collect(&doc);
        // the inner "k" array of numbers IS handled (scalar leaves);
        // sanity check it shows up rather than in unhandled.
        assert!(traveler
            .result
            .keys()
            .any(|k| k.contains("items[].nested.k[]")));
    }
}
