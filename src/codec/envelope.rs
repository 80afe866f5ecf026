use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::utils::{Error, Result};

/// Parses an arbitrary JSON payload.
///
/// A payload that is not JSON can never be decoded, so the failure is
/// reported as permanent.
pub fn decode(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice(raw).map_err(|err| Error::permanent(format!("malformed envelope: {err}")))
}

/// Serializes `value` in canonical form: compact, with object keys sorted at
/// every level.
pub fn reencode(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Canonical(value))?)
}

// Key order of `Value` objects depends on serde_json features enabled elsewhere
// in the dependency graph, so sorting is done here.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Canonical<'_>> =
                    map.iter().map(|(k, v)| (k, Canonical(v))).collect();
                sorted.serialize(serializer)
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            other => other.serialize(serializer),
        }
    }
}
