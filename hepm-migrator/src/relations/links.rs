//! Linked-entity extraction from literature bodies

use std::collections::BTreeSet;

use serde_json::Value;

use crate::db::relations::LinkTable;
use crate::model::{EntityKind, PidKey};
use crate::transform::parse_ref;

/// Kind of relation a pointer establishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkKind {
    Citation,
    Conference,
    Institution,
    Experiment,
}

impl LinkKind {
    /// Join table holding the link (None for citation edges)
    pub fn table(self) -> Option<LinkTable> {
        match self {
            LinkKind::Citation => None,
            LinkKind::Conference => Some(LinkTable::Conference),
            LinkKind::Institution => Some(LinkTable::Institution),
            LinkKind::Experiment => Some(LinkTable::Experiment),
        }
    }

    pub fn target_kind(self) -> EntityKind {
        match self {
            LinkKind::Citation => EntityKind::Literature,
            LinkKind::Conference => EntityKind::Conference,
            LinkKind::Institution => EntityKind::Institution,
            LinkKind::Experiment => EntityKind::Experiment,
        }
    }
}

/// One linked entity, by public identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub kind: LinkKind,
    pub target: PidKey,
}

const LINK_PATHS: [(LinkKind, &[&str]); 6] = [
    (LinkKind::Citation, &["references", "record"]),
    (LinkKind::Conference, &["publication_info", "conference_record"]),
    (LinkKind::Institution, &["authors", "affiliations", "record"]),
    (LinkKind::Institution, &["record_affiliations", "record"]),
    (LinkKind::Institution, &["thesis_info", "institutions", "record"]),
    (LinkKind::Experiment, &["accelerator_experiments", "record"]),
];

/// Every linked entity of a literature body
///
/// Pointers whose identifier type does not match the field are ignored.
pub fn extract_links(body: &Value) -> BTreeSet<Link> {
    let mut links = BTreeSet::new();
    for (kind, path) in LINK_PATHS {
        for pointer in values_at(body, path) {
            if let Some(target) = parse_ref(pointer) {
                if target.pid_type == kind.target_kind().pid_type() {
                    links.insert(Link { kind, target });
                }
            }
        }
    }
    links
}

/// Earliest date carried by a literature body, as an ISO-ish string
///
/// `YYYY`, `YYYY-MM` and `YYYY-MM-DD` compare correctly as strings.
pub fn earliest_date(body: &Value) -> Option<String> {
    let paths: [&[&str]; 4] = [
        &["imprints", "date"],
        &["preprint_date"],
        &["thesis_info", "date"],
        &["publication_info", "year"],
    ];
    paths
        .iter()
        .flat_map(|path| values_at(body, path))
        .filter_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .min()
}

/// Author identities: author record pointers, INSPIRE ids and BAIs
pub fn author_identities(body: &Value) -> BTreeSet<String> {
    let mut identities = BTreeSet::new();
    for pointer in values_at(body, &["authors", "record"]) {
        if let Some(key) = parse_ref(pointer) {
            identities.insert(key.to_string());
        }
    }
    for id in values_at(body, &["authors", "ids"]) {
        if let (Some(schema), Some(value)) = (
            id.get("schema").and_then(Value::as_str),
            id.get("value").and_then(Value::as_str),
        ) {
            identities.insert(format!("{}:{}", schema, value));
        }
    }
    identities
}

/// True when two bodies share at least one author identity
pub fn shares_author(a: &Value, b: &Value) -> bool {
    let left = author_identities(a);
    !left.is_empty() && author_identities(b).iter().any(|id| left.contains(id))
}

/// Values reached by following `path`, descending into arrays on the way
fn values_at<'a>(value: &'a Value, path: &[&str]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    collect(value, path, &mut out);
    out
}

fn collect<'a>(value: &'a Value, path: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect(item, path, out)),
        _ if path.is_empty() => out.push(value),
        Value::Object(map) => {
            if let Some(child) = map.get(path[0]) {
                collect(child, &path[1..], out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "references": [
                {"record": {"$ref": "http://h/api/literature/1"}},
                {"record": {"$ref": "http://h/api/literature/2"}},
                {"reference": {"misc": ["unlinked"]}},
                {"record": {"$ref": "http://h/api/authors/9"}}
            ],
            "publication_info": [{"conference_record": {"$ref": "http://h/api/conferences/5"}, "year": 2015}],
            "authors": [{
                "full_name": "Doe, J.",
                "record": {"$ref": "http://h/api/authors/9"},
                "ids": [{"schema": "INSPIRE BAI", "value": "J.Doe.1"}],
                "affiliations": [{"value": "CERN", "record": {"$ref": "http://h/api/institutions/7"}}]
            }],
            "thesis_info": {"date": "2014-06", "institutions": [{"name": "MIT", "record": {"$ref": "http://h/api/institutions/8"}}]},
            "accelerator_experiments": [{"record": {"$ref": "http://h/api/experiments/3"}}],
            "imprints": [{"date": "2016-09"}]
        })
    }

    #[test]
    fn test_extract_links() {
        let links = extract_links(&body());
        let citations: Vec<_> = links
            .iter()
            .filter(|l| l.kind == LinkKind::Citation)
            .map(|l| l.target.pid_value.as_str())
            .collect();
        assert_eq!(citations, vec!["1", "2"]);
        assert!(links.contains(&Link {
            kind: LinkKind::Conference,
            target: PidKey::new("con", "5")
        }));
        assert!(links.contains(&Link {
            kind: LinkKind::Institution,
            target: PidKey::new("ins", "8")
        }));
        assert_eq!(links.len(), 6);
    }

    #[test]
    fn test_earliest_date_mixes_years_and_dates() {
        assert_eq!(earliest_date(&body()), Some("2014-06".to_string()));
        assert_eq!(earliest_date(&json!({"publication_info": [{"year": 1999}]})), Some("1999".to_string()));
        assert_eq!(earliest_date(&json!({})), None);
    }

    #[test]
    fn test_shared_authors() {
        let other = json!({"authors": [{"full_name": "X", "ids": [{"schema": "INSPIRE BAI", "value": "J.Doe.1"}]}]});
        assert!(shares_author(&body(), &other));
        assert!(!shares_author(&body(), &json!({"authors": [{"full_name": "Doe, J."}]})));
    }
}
