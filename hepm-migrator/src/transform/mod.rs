//! Record transformer
//!
//! Converts a decoded legacy record into a target body. Cross-record
//! pointers are minted from control numbers and stored as decoded; they are
//! looked up in the identifier store only to report the ones that do not
//! resolve yet. Following redirects to a survivor is left to the relation
//! synchronizer, so the body never depends on merge order.

mod entities;
mod literature;
pub mod refs;

pub use refs::{parse_ref, RefFactory};

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::identifiers::IdentifierManager;
use crate::model::{EntityKind, IntermediateRecord, PidKey};

/// Identifier types minted from record content rather than control numbers
pub const EXTERNAL_PID_TYPES: [&str; 2] = ["doi", "arxiv"];

/// Transformed record, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub kind: EntityKind,
    pub recid: i64,
    pub body: Value,
    pub deleted: bool,
    /// DOI and arXiv identifiers the record should own
    pub external_pids: Vec<PidKey>,
    /// Pointers that do not resolve to a live record yet
    pub unresolved: Vec<PidKey>,
}

impl TransformOutput {
    /// Control-number identifier of the record
    pub fn own_pid(&self) -> PidKey {
        PidKey::recid(self.kind, self.recid)
    }
}

#[derive(Debug, Clone)]
pub struct Transformer {
    refs: RefFactory,
    identifiers: IdentifierManager,
}

impl Transformer {
    pub fn new(records_base_url: &str, identifiers: IdentifierManager) -> Self {
        Self {
            refs: RefFactory::new(records_base_url),
            identifiers,
        }
    }

    pub fn refs(&self) -> &RefFactory {
        &self.refs
    }

    /// Build the target body for `record`
    ///
    /// Records merged into another one have no body of their own; callers
    /// route them to [`IdentifierManager::redirect`] instead.
    pub async fn transform(
        &self,
        conn: &mut SqliteConnection,
        record: &IntermediateRecord,
    ) -> Result<TransformOutput> {
        let kind = record
            .kind
            .ok_or_else(|| MigrationError::Transform("record has no known collection".to_string()))?;
        let recid = record
            .control_number
            .ok_or_else(|| MigrationError::Transform("record has no control number".to_string()))?;
        if let Some(target) = record.merged_into {
            return Err(MigrationError::Transform(format!(
                "record {} was merged into {}",
                recid, target
            )));
        }

        let mut body = match kind {
            EntityKind::Literature => literature::build(record, recid, &self.refs),
            other => entities::build(other, record, recid)?,
        };
        if record.deleted {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("deleted".into(), Value::Bool(true));
            }
        }

        let unresolved = self.unresolved_references(conn, &body).await?;

        let mut external_pids: Vec<PidKey> = Vec::new();
        if kind == EntityKind::Literature {
            let candidates = record
                .dois
                .iter()
                .map(|doi| PidKey::new("doi", doi.trim().to_lowercase()))
                .chain(
                    record
                        .arxiv_eprints
                        .iter()
                        .map(|eprint| PidKey::new("arxiv", eprint.trim())),
                );
            for key in candidates {
                if !key.pid_value.is_empty() && !external_pids.contains(&key) {
                    external_pids.push(key);
                }
            }
        }

        Ok(TransformOutput {
            kind,
            recid,
            body,
            deleted: record.deleted,
            external_pids,
            unresolved,
        })
    }

    /// Pointers of `body` that resolve to no live record
    async fn unresolved_references(&self, conn: &mut SqliteConnection, body: &Value) -> Result<Vec<PidKey>> {
        let mut keys = BTreeSet::new();
        collect_refs(body, &mut keys);

        let mut unresolved = Vec::new();
        for key in keys {
            match self.identifiers.resolve(conn, &key).await {
                Ok(_) => {}
                Err(MigrationError::NotFound { .. }) | Err(MigrationError::Conflict { .. }) => {
                    debug!(pid = %key, "Reference left unlinked");
                    unresolved.push(key);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(unresolved)
    }
}

/// Insert `values` under `key` unless empty
fn put(body: &mut Map<String, Value>, key: &str, values: Vec<Value>) {
    if !values.is_empty() {
        body.insert(key.to_string(), Value::Array(values));
    }
}

// Pointers under `deleted_records` name merged-away identifiers, which
// resolve to the record itself.
const UNFOLLOWED: &str = "deleted_records";

fn collect_refs(value: &Value, out: &mut BTreeSet<PidKey>) {
    if let Some(key) = parse_ref(value) {
        out.insert(key);
        return;
    }
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                if name != UNFOLLOWED {
                    collect_refs(child, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
        _ => {}
    }
}
