//! Legacy record decoder
//!
//! `decode` is a pure function over bytes: malformed input yields an
//! invalid outcome, never an error. Only reading the container can fail
//! (see [`archive`]).

pub mod archive;
pub mod marcxml;
pub mod normalize;

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::IntermediateRecord;

pub use archive::{read_input, read_input_file, split_records, RecordSplitter};

/// Fragment batches buffered between the reader and its consumer
const READ_AHEAD: usize = 4;

/// Read `path` on a blocking task, sending fragment batches as they complete
///
/// The handle yields the fragment count, or the container error that ended
/// the read. Dropping the receiver stops the reader.
pub fn stream_input_file(path: PathBuf) -> (mpsc::Receiver<Vec<Vec<u8>>>, JoinHandle<std::io::Result<usize>>) {
    let (sender, receiver) = mpsc::channel(READ_AHEAD);
    let reader = tokio::task::spawn_blocking(move || {
        read_input_file(&path, |batch| {
            sender
                .blocking_send(batch)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "fragment consumer stopped"))
        })
    });
    (receiver, reader)
}

/// Result of decoding one fragment
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutcome {
    pub record: IntermediateRecord,
    pub valid: bool,
    /// Every validity problem, joined
    pub error: Option<String>,
}

impl DecodeOutcome {
    /// Legacy id used as mirror key (None when it cannot be recovered)
    pub fn legacy_id(&self) -> Option<i64> {
        self.record.control_number
    }

    /// First collection value, stored alongside the mirror row
    pub fn collection(&self) -> Option<String> {
        self.record.collections.first().cloned()
    }
}

/// Decode one MARCXML fragment
pub fn decode(raw: &[u8]) -> DecodeOutcome {
    match marcxml::parse_fragment(raw) {
        Ok(marc) => {
            let record = normalize::normalize(&marc);
            let problems = normalize::validate(&marc, &record);
            DecodeOutcome {
                valid: problems.is_empty(),
                error: (!problems.is_empty()).then(|| problems.join("; ")),
                record,
            }
        }
        Err(parse_error) => DecodeOutcome {
            record: IntermediateRecord {
                control_number: recover_control_number(raw),
                ..Default::default()
            },
            valid: false,
            error: Some(parse_error),
        },
    }
}

/// Best-effort scan for the `001` value in a fragment that does not parse
pub fn recover_control_number(raw: &[u8]) -> Option<i64> {
    let text = String::from_utf8_lossy(raw);
    let marker = text.find("tag=\"001\"").or_else(|| text.find("tag='001'"))?;
    let rest = &text[marker..];
    let open_end = rest.find('>')?;
    let value = &rest[open_end + 1..];
    let close = value.find('<').unwrap_or(value.len());
    value[..close].trim().parse().ok()
}
