//! Legacy input containers
//!
//! Accepts a single fragment, a `<collection>`, either of those gzipped, or
//! a gzipped (or plain) tar of XML files. Input is read as a stream and
//! split into per-record byte fragments before any XML parsing happens;
//! fragments are handed out in batches as they complete.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_BLOCK: u64 = 512;
const CHUNK_SIZE: usize = 64 * 1024;

/// Stream an input file into record fragment batches
///
/// Only I/O and container (gzip/tar) failures are errors. An error returned
/// by `on_batch` stops reading and is passed through. Returns the number of
/// fragments produced.
pub fn read_input_file<F>(path: &Path, on_batch: F) -> std::io::Result<usize>
where
    F: FnMut(Vec<Vec<u8>>) -> std::io::Result<()>,
{
    let count = read_input(File::open(path)?, on_batch)?;
    debug!(path = %path.display(), fragments = count, "Read legacy input");
    Ok(count)
}

/// Stream any reader into record fragment batches
pub fn read_input<R, F>(reader: R, mut on_batch: F) -> std::io::Result<usize>
where
    R: Read,
    F: FnMut(Vec<Vec<u8>>) -> std::io::Result<()>,
{
    let mut content = gunzip_if_needed(reader)?;

    let mut head = Vec::with_capacity(TAR_BLOCK as usize);
    (&mut content).take(TAR_BLOCK).read_to_end(&mut head)?;
    let tar = is_tar(&head);
    let stream = Cursor::new(head).chain(content);

    if tar {
        return split_tar(stream, &mut on_batch);
    }
    split_stream(stream, &mut on_batch)
}

fn split_tar<R, F>(stream: R, on_batch: &mut F) -> std::io::Result<usize>
where
    R: Read,
    F: FnMut(Vec<Vec<u8>>) -> std::io::Result<()>,
{
    let mut archive = tar::Archive::new(stream);
    let mut count = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().to_string();
        let found = split_stream(gunzip_if_needed(&mut entry)?, on_batch)?;
        debug!(entry = %name, records = found, "Read tar entry");
        count += found;
    }

    Ok(count)
}

/// Wrap `reader` in a gzip decoder when it starts with the gzip magic
fn gunzip_if_needed<'a, R: Read + 'a>(reader: R) -> std::io::Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(reader);
    let gzipped = is_gzip(buffered.fill_buf()?);
    if gzipped {
        Ok(Box::new(GzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

fn split_stream<R, F>(mut reader: R, on_batch: &mut F) -> std::io::Result<usize>
where
    R: Read,
    F: FnMut(Vec<Vec<u8>>) -> std::io::Result<()>,
{
    let mut splitter = RecordSplitter::default();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut count = 0;

    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        let fragments = splitter.push(&chunk[..read]);
        if !fragments.is_empty() {
            count += fragments.len();
            on_batch(fragments)?;
        }
    }

    let rest = splitter.finish();
    if !rest.is_empty() {
        count += rest.len();
        on_batch(rest)?;
    }
    Ok(count)
}

/// Incremental `<record>` splitter holding only the unfinished tail
#[derive(Debug, Default)]
pub struct RecordSplitter {
    pending: Vec<u8>,
}

impl RecordSplitter {
    /// Append bytes and return every record completed by them
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let mut fragments = Vec::new();
        let mut pos = 0;

        let keep_from = loop {
            match find_record_start(&self.pending, pos) {
                Some(start) => match find_record_end(&self.pending, start + 1) {
                    Some(end) => {
                        fragments.push(self.pending[start..end].to_vec());
                        pos = end;
                    }
                    None => break start,
                },
                // A tag split across chunks starts at the last `<`
                None => {
                    break self.pending[pos..]
                        .iter()
                        .rposition(|b| *b == b'<')
                        .map_or(self.pending.len(), |p| p + pos)
                }
            }
        };

        self.pending.drain(..keep_from);
        fragments
    }

    /// Flush what is left; an unterminated record is kept as is
    pub fn finish(self) -> Vec<Vec<u8>> {
        split_records(&self.pending)
    }
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

fn is_tar(bytes: &[u8]) -> bool {
    bytes.len() > TAR_MAGIC_OFFSET + 5 && &bytes[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar"
}

/// Split XML text into `<record>...</record>` fragments at the byte level
///
/// A start tag without a matching end runs to the end of input so the
/// truncated record is still reported (and later found invalid).
pub fn split_records(content: &[u8]) -> Vec<Vec<u8>> {
    let mut fragments = Vec::new();
    let mut pos = 0;

    while let Some(start) = find_record_start(content, pos) {
        match find_record_end(content, start + 1) {
            Some(end) => {
                fragments.push(content[start..end].to_vec());
                pos = end;
            }
            None => {
                fragments.push(content[start..].to_vec());
                break;
            }
        }
    }

    fragments
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Position of the next `<record` or `<prefix:record` start tag
fn find_record_start(content: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(lt) = find(content, b"<", pos) {
        let name_start = lt + 1;
        let name_end = content[name_start..]
            .iter()
            .position(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
            .map(|p| p + name_start)?;
        let name = &content[name_start..name_end];
        if local(name) == b"record" {
            return Some(lt);
        }
        pos = name_start;
    }
    None
}

/// Position just past the matching `</record>` / `</prefix:record>` end tag
fn find_record_end(content: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(lt) = find(content, b"</", pos) {
        let name_start = lt + 2;
        let gt = find(content, b">", name_start)?;
        if local(trim(&content[name_start..gt])) == b"record" {
            return Some(gt + 1);
        }
        pos = gt;
    }
    None
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start..end]
}

fn local(name: &[u8]) -> &[u8] {
    match name.iter().position(|b| *b == b':') {
        Some(colon) => &name[colon + 1..],
        None => name,
    }
}
