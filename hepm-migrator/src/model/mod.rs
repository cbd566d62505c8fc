//! Domain model
//!
//! Entity kinds, the normalized intermediate record produced by the
//! decoder, mirror rows, target records and persistent identifiers.

mod intermediate;

pub use intermediate::{
    IntermediateRecord, LegacyAffiliation, LegacyAuthor, LegacyExperiment, LegacyPublicationInfo,
    LegacyReference, LegacyThesis,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of record, selected once at decode time and carried as data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Literature,
    Author,
    Institution,
    Conference,
    Experiment,
    Job,
    Journal,
    Data,
    Seminar,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Literature,
        EntityKind::Author,
        EntityKind::Institution,
        EntityKind::Conference,
        EntityKind::Experiment,
        EntityKind::Job,
        EntityKind::Journal,
        EntityKind::Data,
        EntityKind::Seminar,
    ];

    /// Persistent identifier type minted from the control number
    pub fn pid_type(self) -> &'static str {
        match self {
            EntityKind::Literature => "lit",
            EntityKind::Author => "aut",
            EntityKind::Institution => "ins",
            EntityKind::Conference => "con",
            EntityKind::Experiment => "exp",
            EntityKind::Job => "job",
            EntityKind::Journal => "jou",
            EntityKind::Data => "dat",
            EntityKind::Seminar => "sem",
        }
    }

    /// REST endpoint segment used in `$ref` pointers
    pub fn endpoint(self) -> &'static str {
        match self {
            EntityKind::Literature => "literature",
            EntityKind::Author => "authors",
            EntityKind::Institution => "institutions",
            EntityKind::Conference => "conferences",
            EntityKind::Experiment => "experiments",
            EntityKind::Job => "jobs",
            EntityKind::Journal => "journals",
            EntityKind::Data => "data",
            EntityKind::Seminar => "seminars",
        }
    }

    /// `schema_type` column value
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Literature => "literature",
            EntityKind::Author => "author",
            EntityKind::Institution => "institution",
            EntityKind::Conference => "conference",
            EntityKind::Experiment => "experiment",
            EntityKind::Job => "job",
            EntityKind::Journal => "journal",
            EntityKind::Data => "data",
            EntityKind::Seminar => "seminar",
        }
    }

    pub fn from_pid_type(pid_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.pid_type() == pid_type)
    }

    pub fn from_endpoint(endpoint: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.endpoint() == endpoint)
    }

    /// Map a legacy `980__a` collection value to a kind
    pub fn from_collection(collection: &str) -> Option<Self> {
        match collection.trim().to_ascii_uppercase().as_str() {
            "HEP" | "CORE" | "CITEABLE" | "PUBLISHED" | "THESIS" | "CONFERENCEPAPER"
            | "NONCORE" | "REVIEW" | "LECTURES" | "BOOK" | "PROCEEDINGS" | "INTRODUCTORY" => {
                Some(EntityKind::Literature)
            }
            "HEPNAMES" => Some(EntityKind::Author),
            "INSTITUTION" => Some(EntityKind::Institution),
            "CONFERENCES" => Some(EntityKind::Conference),
            "EXPERIMENT" => Some(EntityKind::Experiment),
            "JOB" | "JOBS" | "JOBHIDDEN" => Some(EntityKind::Job),
            "JOURNALS" | "JOURNALSNEW" => Some(EntityKind::Journal),
            "DATA" => Some(EntityKind::Data),
            "SEMINARS" => Some(EntityKind::Seminar),
            _ => None,
        }
    }

    /// Kinds that other records link to and that carry a derived aggregate
    pub fn is_linkable(self) -> bool {
        matches!(
            self,
            EntityKind::Literature
                | EntityKind::Institution
                | EntityKind::Conference
                | EntityKind::Experiment
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown schema type: {}", s))
    }
}

/// Migration status of a mirror row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigratedStatus {
    Pending,
    Migrated,
    Broken,
}

impl MigratedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MigratedStatus::Pending => "PENDING",
            MigratedStatus::Migrated => "MIGRATED",
            MigratedStatus::Broken => "BROKEN",
        }
    }
}

impl FromStr for MigratedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(MigratedStatus::Pending),
            "MIGRATED" => Ok(MigratedStatus::Migrated),
            "BROKEN" => Ok(MigratedStatus::Broken),
            other => Err(format!("unknown migrated status: {}", other)),
        }
    }
}

/// Row selection for step 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Rows still `PENDING`
    #[default]
    Default,
    /// Every row, forcing full re-migration
    All,
    /// Only `BROKEN` rows
    Broken,
}

/// One row of the legacy mirror
#[derive(Debug, Clone)]
pub struct MirrorEntry {
    pub legacy_id: i64,
    pub raw_payload: Vec<u8>,
    pub decoded: Option<IntermediateRecord>,
    pub valid: Option<bool>,
    pub collection: Option<String>,
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub migrated_status: MigratedStatus,
}

/// Migrated record in the destination store
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub uuid: Uuid,
    pub kind: EntityKind,
    pub json_body: serde_json::Value,
    pub version: i64,
    pub deleted: bool,
}

impl TargetRecord {
    /// Legacy control number carried in the body
    pub fn control_number(&self) -> Option<i64> {
        self.json_body.get("control_number").and_then(|v| v.as_i64())
    }
}

/// Persistent identifier status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PidStatus {
    Registered,
    Redirected,
    Deleted,
}

impl PidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PidStatus::Registered => "REGISTERED",
            PidStatus::Redirected => "REDIRECTED",
            PidStatus::Deleted => "DELETED",
        }
    }
}

impl FromStr for PidStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTERED" => Ok(PidStatus::Registered),
            "REDIRECTED" => Ok(PidStatus::Redirected),
            "DELETED" => Ok(PidStatus::Deleted),
            other => Err(format!("unknown pid status: {}", other)),
        }
    }
}

/// Key of a persistent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PidKey {
    pub pid_type: String,
    pub pid_value: String,
}

impl PidKey {
    pub fn new(pid_type: impl Into<String>, pid_value: impl Into<String>) -> Self {
        Self {
            pid_type: pid_type.into(),
            pid_value: pid_value.into(),
        }
    }

    /// Control-number pid of a record
    pub fn recid(kind: EntityKind, recid: i64) -> Self {
        Self::new(kind.pid_type(), recid.to_string())
    }
}

impl fmt::Display for PidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid_type, self.pid_value)
    }
}

/// Persistent identifier row
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentIdentifier {
    pub key: PidKey,
    pub object_uuid: Uuid,
    pub status: PidStatus,
    pub redirect_target: Option<PidKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_mapping() {
        assert_eq!(EntityKind::from_collection("HEP"), Some(EntityKind::Literature));
        assert_eq!(EntityKind::from_collection("citeable"), Some(EntityKind::Literature));
        assert_eq!(EntityKind::from_collection("HEPNAMES"), Some(EntityKind::Author));
        assert_eq!(EntityKind::from_collection("CONFERENCES"), Some(EntityKind::Conference));
        assert_eq!(EntityKind::from_collection("JOBS"), Some(EntityKind::Job));
        assert_eq!(EntityKind::from_collection("HEPX"), None);
    }

    #[test]
    fn test_kind_round_trips_through_lookup_tables() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_pid_type(kind.pid_type()), Some(kind));
            assert_eq!(EntityKind::from_endpoint(kind.endpoint()), Some(kind));
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_linkable_kinds() {
        assert!(EntityKind::Conference.is_linkable());
        assert!(!EntityKind::Author.is_linkable());
        assert!(!EntityKind::Job.is_linkable());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!("BROKEN".parse::<MigratedStatus>(), Ok(MigratedStatus::Broken));
        assert_eq!(PidStatus::Redirected.as_str(), "REDIRECTED");
        assert!("LOST".parse::<PidStatus>().is_err());
    }
}
