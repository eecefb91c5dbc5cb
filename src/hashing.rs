use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a raw record, computed over a canonical serialization
/// with object keys sorted lexicographically at every nesting level. Two
/// records with the same fields in a different order hash identically; any
/// changed value changes the digest.
///
/// This is the change-detection key stored alongside every loaded row: a
/// re-extracted record is skipped when its digest matches what was stored.
pub fn content_hash(record: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(record, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // serde_json's default map preserves no caller ordering guarantees
            // we want to rely on, so sort explicitly.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
