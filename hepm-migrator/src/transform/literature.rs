//! Literature body

use serde_json::{json, Map, Value};

use super::refs::RefFactory;
use super::put;
use crate::model::{EntityKind, IntermediateRecord, LegacyAffiliation, LegacyAuthor};

pub(super) fn build(record: &IntermediateRecord, recid: i64, refs: &RefFactory) -> Value {
    let mut body = Map::new();
    body.insert("control_number".into(), json!(recid));
    body.insert("_collections".into(), json!(["Literature"]));

    put(
        &mut body,
        "titles",
        record.titles.iter().map(|t| json!({ "title": t })).collect(),
    );
    put(
        &mut body,
        "dois",
        record.dois.iter().map(|d| json!({ "value": d })).collect(),
    );
    put(
        &mut body,
        "arxiv_eprints",
        record.arxiv_eprints.iter().map(|e| json!({ "value": e })).collect(),
    );
    put(
        &mut body,
        "authors",
        record.authors.iter().map(|a| author(a, refs)).collect(),
    );
    put(
        &mut body,
        "record_affiliations",
        record
            .record_affiliations
            .iter()
            .map(|a| affiliation(a, refs))
            .collect(),
    );

    if let Some(thesis) = &record.thesis {
        let mut info = Map::new();
        if let Some(institution) = &thesis.institution {
            let mut entry = Map::new();
            entry.insert("name".into(), json!(institution.value));
            if let Some(recid) = institution.record {
                entry.insert("record".into(), refs.make(EntityKind::Institution, recid));
            }
            info.insert("institutions".into(), json!([entry]));
        }
        if let Some(date) = &thesis.date {
            info.insert("date".into(), json!(date));
        }
        if !info.is_empty() {
            body.insert("thesis_info".into(), Value::Object(info));
        }
    }

    put(
        &mut body,
        "publication_info",
        record
            .publication_info
            .iter()
            .map(|info| {
                let mut entry = Map::new();
                if let Some(title) = &info.journal_title {
                    entry.insert("journal_title".into(), json!(title));
                }
                if let Some(volume) = &info.journal_volume {
                    entry.insert("journal_volume".into(), json!(volume));
                }
                if let Some(year) = info.year {
                    entry.insert("year".into(), json!(year));
                }
                if let Some(recid) = info.conference_record {
                    entry.insert("conference_record".into(), refs.make(EntityKind::Conference, recid));
                }
                Value::Object(entry)
            })
            .filter(|entry| entry.as_object().is_some_and(|o| !o.is_empty()))
            .collect(),
    );

    put(
        &mut body,
        "accelerator_experiments",
        record
            .accelerator_experiments
            .iter()
            .map(|exp| {
                let mut entry = Map::new();
                if let Some(name) = &exp.legacy_name {
                    entry.insert("legacy_name".into(), json!(name));
                }
                if let Some(recid) = exp.record {
                    entry.insert("record".into(), refs.make(EntityKind::Experiment, recid));
                }
                Value::Object(entry)
            })
            .collect(),
    );

    put(
        &mut body,
        "references",
        record
            .references
            .iter()
            .map(|reference| {
                let mut inner = Map::new();
                if let Some(pubnote) = &reference.pubnote {
                    inner.insert("publication_info".into(), json!({ "pubnote": pubnote }));
                }
                if let Some(raw) = &reference.raw_text {
                    inner.insert("misc".into(), json!([raw]));
                }
                if let Some(year) = reference.year {
                    inner.insert("publication_year".into(), json!(year));
                }

                let mut entry = Map::new();
                if let Some(recid) = reference.record {
                    entry.insert("record".into(), refs.make(EntityKind::Literature, recid));
                }
                if !inner.is_empty() {
                    entry.insert("reference".into(), Value::Object(inner));
                }
                Value::Object(entry)
            })
            .filter(|entry| entry.as_object().is_some_and(|o| !o.is_empty()))
            .collect(),
    );

    if let Some(date) = &record.imprint_date {
        body.insert("imprints".into(), json!([{ "date": date }]));
    }
    if let Some(date) = &record.preprint_date {
        body.insert("preprint_date".into(), json!(date));
    }

    put(
        &mut body,
        "deleted_records",
        record
            .merged_records
            .iter()
            .map(|recid| refs.make(EntityKind::Literature, *recid))
            .collect(),
    );

    Value::Object(body)
}

fn author(author: &LegacyAuthor, refs: &RefFactory) -> Value {
    let mut entry = Map::new();
    entry.insert("full_name".into(), json!(author.full_name));

    let mut ids = Vec::new();
    if let Some(id) = &author.inspire_id {
        ids.push(json!({ "schema": "INSPIRE ID", "value": id }));
    }
    if let Some(bai) = &author.bai {
        ids.push(json!({ "schema": "INSPIRE BAI", "value": bai }));
    }
    put(&mut entry, "ids", ids);

    if let Some(recid) = author.record {
        entry.insert("record".into(), refs.make(EntityKind::Author, recid));
    }
    put(
        &mut entry,
        "affiliations",
        author.affiliations.iter().map(|a| affiliation(a, refs)).collect(),
    );

    Value::Object(entry)
}

fn affiliation(affiliation: &LegacyAffiliation, refs: &RefFactory) -> Value {
    let mut entry = Map::new();
    entry.insert("value".into(), json!(affiliation.value));
    if let Some(recid) = affiliation.record {
        entry.insert("record".into(), refs.make(EntityKind::Institution, recid));
    }
    Value::Object(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LegacyPublicationInfo, LegacyReference};

    fn refs() -> RefFactory {
        RefFactory::new("http://localhost/api")
    }

    #[test]
    fn test_references_become_pointers_or_literals() {
        let record = IntermediateRecord {
            titles: vec!["A paper".into()],
            references: vec![
                LegacyReference {
                    record: Some(666),
                    ..Default::default()
                },
                LegacyReference {
                    raw_text: Some("J. Doe, unpublished".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let body = build(&record, 667, &refs());
        assert_eq!(body["control_number"], 667);
        assert_eq!(body["references"][0]["record"]["$ref"], "http://localhost/api/literature/666");
        assert!(body["references"][1].get("record").is_none());
        assert_eq!(body["references"][1]["reference"]["misc"][0], "J. Doe, unpublished");
    }

    #[test]
    fn test_author_identities_and_affiliations() {
        let record = IntermediateRecord {
            titles: vec!["T".into()],
            authors: vec![LegacyAuthor {
                full_name: "Doe, J.".into(),
                inspire_id: Some("INSPIRE-00000001".into()),
                bai: Some("J.Doe.1".into()),
                record: Some(1010),
                affiliations: vec![LegacyAffiliation {
                    value: "CERN".into(),
                    record: Some(902725),
                }],
            }],
            ..Default::default()
        };

        let body = build(&record, 1, &refs());
        let author = &body["authors"][0];
        assert_eq!(author["ids"][0]["schema"], "INSPIRE ID");
        assert_eq!(author["ids"][1]["value"], "J.Doe.1");
        assert_eq!(author["record"]["$ref"], "http://localhost/api/authors/1010");
        assert_eq!(
            author["affiliations"][0]["record"]["$ref"],
            "http://localhost/api/institutions/902725"
        );
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let record = IntermediateRecord {
            titles: vec!["T".into()],
            publication_info: vec![LegacyPublicationInfo::default()],
            ..Default::default()
        };
        let body = build(&record, 1, &refs());
        assert!(body.get("publication_info").is_none());
        assert!(body.get("authors").is_none());
        assert!(body.get("deleted_records").is_none());
    }
}
