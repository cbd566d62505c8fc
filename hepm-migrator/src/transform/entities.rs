//! Bodies for authors, institutions, conferences, experiments and the
//! remaining non-literature kinds

use serde_json::{json, Map, Value};

use crate::error::{MigrationError, Result};
use crate::model::{EntityKind, IntermediateRecord};

pub(super) fn build(kind: EntityKind, record: &IntermediateRecord, recid: i64) -> Result<Value> {
    let mut body = Map::new();
    body.insert("control_number".into(), json!(recid));
    body.insert("_collections".into(), json!([collection_label(kind)]));

    let name = record
        .name
        .as_deref()
        .or_else(|| record.titles.first().map(String::as_str));

    let named = |name: Option<&str>| -> Result<String> {
        match name {
            Some(name) if !name.trim().is_empty() => Ok(name.to_string()),
            _ if record.deleted => Ok(String::new()),
            _ => Err(MigrationError::Transform(format!(
                "{} record {} has no name",
                kind, recid
            ))),
        }
    };

    match kind {
        EntityKind::Author => {
            let mut name_entry = Map::new();
            name_entry.insert("value".into(), json!(named(record.name.as_deref())?));
            if let Some(preferred) = &record.preferred_name {
                name_entry.insert("preferred_name".into(), json!(preferred));
            }
            body.insert("name".into(), Value::Object(name_entry));
        }
        EntityKind::Institution => {
            let name = named(name)?;
            body.insert("legacy_ICN".into(), json!(name));
            body.insert("institution_hierarchy".into(), json!([{ "name": name }]));
        }
        EntityKind::Conference => {
            body.insert("titles".into(), json!([{ "title": named(name)? }]));
            if let Some(cnum) = &record.cnum {
                body.insert("cnum".into(), json!(cnum));
            }
        }
        EntityKind::Experiment => {
            body.insert("legacy_name".into(), json!(named(name)?));
        }
        EntityKind::Journal => {
            body.insert("journal_title".into(), json!({ "title": named(name)? }));
        }
        EntityKind::Job => {
            if let Some(position) = name {
                body.insert("position".into(), json!(position));
            }
        }
        EntityKind::Data | EntityKind::Seminar => {
            if let Some(title) = name {
                body.insert("titles".into(), json!([{ "title": title }]));
            }
        }
        EntityKind::Literature => {
            return Err(MigrationError::Transform(
                "literature records are not entity records".to_string(),
            ))
        }
    }

    Ok(Value::Object(body))
}

fn collection_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Literature => "Literature",
        EntityKind::Author => "Authors",
        EntityKind::Institution => "Institutions",
        EntityKind::Conference => "Conferences",
        EntityKind::Experiment => "Experiments",
        EntityKind::Job => "Jobs",
        EntityKind::Journal => "Journals",
        EntityKind::Data => "Data",
        EntityKind::Seminar => "Seminars",
    }
}
