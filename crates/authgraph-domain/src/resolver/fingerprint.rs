//! Canonical check request fingerprints.
//!
//! The fingerprint identifies a check request by its logical content:
//! `(store, model, tuple key, contextual tuples, context)`. It is stable
//! across processes and insensitive to the order of contextual tuples and
//! context keys, and serves as both the cycle-detection key and the cache
//! key. Because contextual tuples are part of the fingerprint, a request
//! carrying them can never collide with one that does not.

use std::collections::HashMap;
use std::sync::Arc;

use authgraph_storage::{StoredTuple, TupleKey};

/// A stable, order-insensitive identity of a check request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckFingerprint(Arc<str>);

impl CheckFingerprint {
    /// Computes the fingerprint of a request's logical content.
    pub fn new(
        store_id: &str,
        authorization_model_id: &str,
        tuple_key: &TupleKey,
        contextual_tuples: &[StoredTuple],
        context: &HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut out = String::with_capacity(64);
        out.push_str(store_id);
        out.push('/');
        out.push_str(authorization_model_id);
        out.push('|');
        out.push_str(&tuple_key.to_string());

        if !contextual_tuples.is_empty() {
            let mut parts: Vec<String> = contextual_tuples
                .iter()
                .map(contextual_tuple_part)
                .collect();
            parts.sort_unstable();
            out.push_str("|ct:");
            out.push_str(&parts.join(","));
        }

        if !context.is_empty() {
            out.push_str("|ctx:");
            write_canonical_json_object(context, &mut out);
        }

        Self(Arc::from(out.as_str()))
    }

    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn contextual_tuple_part(tuple: &StoredTuple) -> String {
    let mut part = tuple.tuple_key().to_string();
    if let Some(condition) = &tuple.condition_name {
        part.push('[');
        part.push_str(condition);
        if let Some(context) = &tuple.condition_context {
            part.push(':');
            write_canonical_json_object(context, &mut part);
        }
        part.push(']');
    }
    part
}

/// Writes a JSON object with recursively sorted keys.
fn write_canonical_json_object(map: &HashMap<String, serde_json::Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_unstable();
    out.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key).unwrap_or_default());
        out.push(':');
        write_canonical_json(&map[*key], out);
    }
    out.push('}');
}

fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical_json(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).unwrap_or_default()),
    }
}
