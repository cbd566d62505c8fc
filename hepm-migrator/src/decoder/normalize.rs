//! MARC field mapping and validity rules

use super::marcxml::{DataField, MarcRecord};
use crate::model::{
    EntityKind, IntermediateRecord, LegacyAffiliation, LegacyAuthor, LegacyExperiment,
    LegacyPublicationInfo, LegacyReference, LegacyThesis,
};

/// Map a parsed MARC record onto the intermediate form
pub fn normalize(marc: &MarcRecord) -> IntermediateRecord {
    let mut record = IntermediateRecord {
        control_number: marc.controlfield("001").and_then(|v| v.parse().ok()),
        modified: marc.controlfield("005").map(str::to_string),
        ..Default::default()
    };

    for field in marc.fields("980", '_', '_') {
        record.collections.extend(field.all('a').map(str::to_string));
        if field.all('c').any(|c| c.eq_ignore_ascii_case("DELETED")) {
            record.deleted = true;
        }
    }
    record.kind = kind_of(&record.collections).ok().flatten();

    record.merged_into = marc
        .fields("970", '_', '_')
        .flat_map(|f| f.all('d'))
        .find_map(|v| v.parse().ok());
    record.merged_records = marc
        .fields("981", '_', '_')
        .flat_map(|f| f.all('a'))
        .filter_map(|v| v.parse().ok())
        .collect();

    record.titles = marc
        .fields("245", '_', '_')
        .filter_map(|f| f.first('a'))
        .map(str::to_string)
        .collect();

    for field in marc.fields("024", '7', '_') {
        let source = field.first('2').or_else(|| field.first('9')).unwrap_or_default();
        if source.eq_ignore_ascii_case("DOI") {
            if let Some(doi) = field.first('a') {
                record.dois.push(doi.to_string());
            }
        }
    }

    for field in marc.fields("037", '_', '_') {
        if field.first('9').is_some_and(|s| s.eq_ignore_ascii_case("arXiv")) {
            if let Some(eprint) = field.first('a') {
                let eprint = eprint.strip_prefix("arXiv:").unwrap_or(eprint);
                record.arxiv_eprints.push(eprint.to_string());
            }
        }
    }

    match record.kind {
        Some(EntityKind::Author) => {
            if let Some(field) = marc.fields("100", '_', '_').next() {
                record.name = field.first('a').map(str::to_string);
                record.preferred_name = field.first('q').map(str::to_string);
            }
        }
        _ => {
            record.authors = marc
                .fields("100", '_', '_')
                .chain(marc.fields("700", '_', '_'))
                .filter_map(author)
                .collect();
        }
    }

    if let Some(field) = marc.fields("110", '_', '_').next() {
        record.name = record.name.take().or_else(|| field.first('a').map(str::to_string));
    }
    if let Some(field) = marc.fields("111", '_', '_').next() {
        record.name = record.name.take().or_else(|| field.first('a').map(str::to_string));
        record.cnum = field.first('g').map(str::to_string);
    }
    if let Some(field) = marc.fields("119", '_', '_').next() {
        record.name = record.name.take().or_else(|| field.first('a').map(str::to_string));
    }
    if let Some(field) = marc.fields("130", '_', '_').next() {
        record.name = record.name.take().or_else(|| field.first('a').map(str::to_string));
    }

    record.imprint_date = marc
        .fields("260", '_', '_')
        .find_map(|f| f.first('c'))
        .map(str::to_string);
    record.preprint_date = marc
        .fields("269", '_', '_')
        .find_map(|f| f.first('c'))
        .map(str::to_string);

    record.thesis = marc.fields("502", '_', '_').next().map(|field| LegacyThesis {
        institution: field.first('c').map(|name| LegacyAffiliation {
            value: name.to_string(),
            record: recid(field.first('z')),
        }),
        date: field.first('d').map(str::to_string),
    });

    record.record_affiliations = marc
        .fields("902", '_', '_')
        .filter_map(|field| {
            field.first('a').map(|value| LegacyAffiliation {
                value: value.to_string(),
                record: recid(field.first('z')),
            })
        })
        .collect();

    record.publication_info = marc
        .fields("773", '_', '_')
        .map(|field| LegacyPublicationInfo {
            journal_title: field.first('p').map(str::to_string),
            journal_volume: field.first('v').map(str::to_string),
            year: field.first('y').and_then(|y| y.parse().ok()),
            conference_record: recid(field.first('0')),
        })
        .collect();

    record.accelerator_experiments = marc
        .fields("693", '_', '_')
        .map(|field| LegacyExperiment {
            legacy_name: field.first('e').map(str::to_string),
            record: recid(field.first('0')),
        })
        .filter(|exp| exp.legacy_name.is_some() || exp.record.is_some())
        .collect();

    record.references = marc
        .fields("999", 'C', '5')
        .map(|field| LegacyReference {
            record: recid(field.first('0')),
            pubnote: field.first('s').map(str::to_string),
            raw_text: field.first('x').map(str::to_string),
            year: field.first('y').and_then(|y| y.parse().ok()),
        })
        .collect();

    record
}

fn author(field: &DataField) -> Option<LegacyAuthor> {
    let full_name = field.first('a')?;
    let values: Vec<&str> = field.all('u').collect();
    let recids: Vec<&str> = field.all('z').collect();
    let affiliations = values
        .iter()
        .enumerate()
        .map(|(i, value)| LegacyAffiliation {
            value: value.to_string(),
            record: recid(recids.get(i).copied()),
        })
        .collect();

    Some(LegacyAuthor {
        full_name: full_name.to_string(),
        inspire_id: field.first('i').map(str::to_string),
        bai: field.first('j').map(str::to_string),
        record: recid(field.first('x')),
        affiliations,
    })
}

fn recid(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok()).filter(|v: &i64| *v > 0)
}

/// Resolve the entity kind from the collection values
///
/// `Ok(None)` when no value is known, `Err` when values disagree.
pub fn kind_of(collections: &[String]) -> Result<Option<EntityKind>, Vec<EntityKind>> {
    let mut kinds: Vec<EntityKind> = Vec::new();
    for kind in collections.iter().filter_map(|c| EntityKind::from_collection(c)) {
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    match kinds.len() {
        0 => Ok(None),
        1 => Ok(Some(kinds[0])),
        _ => Err(kinds),
    }
}

/// Check validity; returns every problem found
pub fn validate(marc: &MarcRecord, record: &IntermediateRecord) -> Vec<String> {
    let mut problems = Vec::new();

    match marc.controlfield("001") {
        None => problems.push("missing control number (001)".to_string()),
        Some(value) if record.control_number.is_none() => {
            problems.push(format!("control number is not numeric: {:?}", value))
        }
        _ => {}
    }

    match kind_of(&record.collections) {
        Ok(Some(_)) => {}
        Ok(None) => problems.push(format!(
            "no known collection in 980: {:?}",
            record.collections
        )),
        Err(kinds) => problems.push(format!(
            "collections map to more than one kind: {:?}",
            kinds
        )),
    }

    let dates = [
        ("260__c", record.imprint_date.as_deref()),
        ("269__c", record.preprint_date.as_deref()),
        ("502__d", record.thesis.as_ref().and_then(|t| t.date.as_deref())),
    ];
    for (field, value) in dates {
        if let Some(value) = value {
            if !is_valid_date(value) {
                problems.push(format!("invalid date in {}: {:?}", field, value));
            }
        }
    }

    if record.kind == Some(EntityKind::Literature)
        && record.titles.is_empty()
        && !record.deleted
        && !record.is_merged_away()
    {
        problems.push("literature record without title (245__a)".to_string());
    }

    problems
}

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD` with real calendar values
pub fn is_valid_date(value: &str) -> bool {
    let parts: Vec<&str> = value.trim().split('-').collect();
    let numeric = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());

    match parts.as_slice() {
        [year] => numeric(year, 4),
        [year, month] => {
            numeric(year, 4)
                && numeric(month, 2)
                && month.parse::<u32>().is_ok_and(|m| (1..=12).contains(&m))
        }
        [year, month, day] => {
            numeric(year, 4)
                && numeric(month, 2)
                && numeric(day, 2)
                && chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").is_ok()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::marcxml::parse_fragment;

    #[test]
    fn test_valid_dates() {
        assert!(is_valid_date("2016"));
        assert!(is_valid_date("2016-09"));
        assert!(is_valid_date("2016-09-22"));
        assert!(!is_valid_date("Definitely not a date"));
        assert!(!is_valid_date("2016-13"));
        assert!(!is_valid_date("2015-02-29"));
        assert!(!is_valid_date("16"));
    }

    #[test]
    fn test_kind_of_collections() {
        assert_eq!(
            kind_of(&["HEP".to_string(), "CORE".to_string()]),
            Ok(Some(EntityKind::Literature))
        );
        assert_eq!(kind_of(&["HEPX".to_string()]), Ok(None));
        assert!(kind_of(&["HEP".to_string(), "HEPNAMES".to_string()]).is_err());
    }

    #[test]
    fn test_author_affiliations_pair_values_with_recids() {
        let xml = r#"<record>
            <controlfield tag="001">10</controlfield>
            <datafield tag="100" ind1=" " ind2=" ">
              <subfield code="a">Smith, J.</subfield>
              <subfield code="i">INSPIRE-00000001</subfield>
              <subfield code="x">1001</subfield>
              <subfield code="u">CERN</subfield>
              <subfield code="z">902725</subfield>
              <subfield code="u">DESY</subfield>
            </datafield>
            <datafield tag="980" ind1=" " ind2=" "><subfield code="a">HEP</subfield></datafield>
        </record>"#;
        let marc = parse_fragment(xml.as_bytes()).unwrap();
        let record = normalize(&marc);

        assert_eq!(record.authors.len(), 1);
        let author = &record.authors[0];
        assert_eq!(author.record, Some(1001));
        assert_eq!(author.inspire_id.as_deref(), Some("INSPIRE-00000001"));
        assert_eq!(author.affiliations[0].record, Some(902725));
        assert_eq!(author.affiliations[1].record, None);

        let problems = validate(&marc, &record);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("without title"));
    }

    #[test]
    fn test_deleted_literature_needs_no_title() {
        let xml = r#"<record>
            <controlfield tag="001">11</controlfield>
            <datafield tag="980" ind1=" " ind2=" "><subfield code="a">HEP</subfield></datafield>
            <datafield tag="980" ind1=" " ind2=" "><subfield code="c">DELETED</subfield></datafield>
        </record>"#;
        let marc = parse_fragment(xml.as_bytes()).unwrap();
        let record = normalize(&marc);
        assert!(record.deleted);
        assert!(validate(&marc, &record).is_empty());
    }

    #[test]
    fn test_hepnames_uses_100_as_name() {
        let xml = r#"<record>
            <controlfield tag="001">669</controlfield>
            <datafield tag="100" ind1=" " ind2=" ">
              <subfield code="a">Doe, Jane</subfield>
              <subfield code="q">Jane Doe</subfield>
            </datafield>
            <datafield tag="980" ind1=" " ind2=" "><subfield code="a">HEPNAMES</subfield></datafield>
        </record>"#;
        let marc = parse_fragment(xml.as_bytes()).unwrap();
        let record = normalize(&marc);
        assert_eq!(record.kind, Some(EntityKind::Author));
        assert_eq!(record.name.as_deref(), Some("Doe, Jane"));
        assert_eq!(record.preferred_name.as_deref(), Some("Jane Doe"));
        assert!(record.authors.is_empty());
    }
}
