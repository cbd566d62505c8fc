//! `{"$ref": "<base>/<endpoint>/<recid>"}` record pointers

use serde_json::{json, Value};

use crate::model::{EntityKind, PidKey};

#[derive(Debug, Clone)]
pub struct RefFactory {
    base_url: String,
}

impl RefFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, kind: EntityKind, recid: i64) -> String {
        format!("{}/{}/{}", self.base_url, kind.endpoint(), recid)
    }

    pub fn make(&self, kind: EntityKind, recid: i64) -> Value {
        json!({ "$ref": self.url(kind, recid) })
    }

    /// Search needle matching the serialized pointer to `kind`/`recid`
    pub fn needle(&self, kind: EntityKind, recid: i64) -> String {
        format!("\"{}\"", self.url(kind, recid))
    }
}

/// Control-number pid a pointer refers to
///
/// Only the trailing `<endpoint>/<recid>` is inspected, so pointers minted
/// under a different base url still resolve.
pub fn parse_ref(value: &Value) -> Option<PidKey> {
    let url = value.get("$ref")?.as_str()?;
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let recid: i64 = segments.next()?.parse().ok()?;
    let kind = EntityKind::from_endpoint(segments.next()?)?;
    Some(PidKey::recid(kind, recid))
}
