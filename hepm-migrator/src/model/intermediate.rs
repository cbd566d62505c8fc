//! Normalized intermediate form of a legacy record
//!
//! Produced by the decoder, stored as `decoded_json` in the mirror and
//! consumed by the transformer.

use super::EntityKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntermediateRecord {
    /// `001`
    pub control_number: Option<i64>,
    /// Raw `005`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    /// Every `980__a` value, as found
    #[serde(default)]
    pub collections: Vec<String>,
    /// Kind derived from the collections (None when missing or ambiguous)
    pub kind: Option<EntityKind>,
    /// `980__c = DELETED`
    #[serde(default)]
    pub deleted: bool,
    /// `970__d`: this record was merged into that one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<i64>,
    /// `981__a`: those records were merged into this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_records: Vec<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub titles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dois: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arxiv_eprints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<LegacyAuthor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub record_affiliations: Vec<LegacyAffiliation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thesis: Option<LegacyThesis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publication_info: Vec<LegacyPublicationInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accelerator_experiments: Vec<LegacyExperiment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<LegacyReference>,
    /// `260__c`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imprint_date: Option<String>,
    /// `269__c`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprint_date: Option<String>,

    /// Entity name: author `100__a`, institution `110__a`, conference
    /// `111__a`, experiment `119__a`, journal `130__a`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Author preferred name (`100__q`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_name: Option<String>,
    /// Conference cnum (`111__g`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnum: Option<String>,
}

impl IntermediateRecord {
    /// True when this record points at another record it was merged into
    pub fn is_merged_away(&self) -> bool {
        self.merged_into.is_some()
    }

    /// True when the record carries a merge marker in either direction
    pub fn has_merge_markers(&self) -> bool {
        self.merged_into.is_some() || !self.merged_records.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyAuthor {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspire_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bai: Option<String>,
    /// Author record control number (`$x`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<LegacyAffiliation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyAffiliation {
    pub value: String,
    /// Institution record control number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyThesis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<LegacyAffiliation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyPublicationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Conference record control number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conference_record: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyExperiment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyReference {
    /// Cited record control number (`$0`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubnote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}
