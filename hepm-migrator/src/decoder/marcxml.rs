//! MARCXML fragment parsing
//!
//! Turns one `<record>` element into a flat tag/subfield structure. Only
//! structure is checked here; field semantics live in `normalize`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// One `<datafield>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataField {
    pub tag: String,
    pub ind1: char,
    pub ind2: char,
    pub subfields: Vec<(char, String)>,
}

impl DataField {
    /// First value of a subfield code
    pub fn first(&self, code: char) -> Option<&str> {
        self.subfields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Every value of a subfield code, in document order
    pub fn all(&self, code: char) -> impl Iterator<Item = &str> {
        self.subfields
            .iter()
            .filter(move |(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Parsed `<record>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarcRecord {
    pub controlfields: Vec<(String, String)>,
    pub datafields: Vec<DataField>,
}

impl MarcRecord {
    pub fn controlfield(&self, tag: &str) -> Option<&str> {
        self.controlfields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.trim())
    }

    /// Datafields with a tag and indicator pair (`'_'` matches blank)
    pub fn fields<'a>(&'a self, tag: &'a str, ind1: char, ind2: char) -> impl Iterator<Item = &'a DataField> {
        self.datafields
            .iter()
            .filter(move |f| f.tag == tag && indicator_matches(f.ind1, ind1) && indicator_matches(f.ind2, ind2))
    }
}

fn indicator_matches(actual: char, wanted: char) -> bool {
    if wanted == '_' {
        actual == '_' || actual == ' '
    } else {
        actual == wanted
    }
}

#[derive(Clone, Copy)]
enum Open {
    None,
    Control,
    Subfield,
}

/// Parse one MARCXML fragment
///
/// The fragment may be a bare `<record>` or wrapped in `<collection>`; only
/// the first record is read. Errors are human-readable parse failures.
pub fn parse_fragment(raw: &[u8]) -> Result<MarcRecord, String> {
    let mut reader = Reader::from_reader(raw);
    reader.config_mut().trim_text(true);

    let mut record = MarcRecord::default();
    let mut buf = Vec::new();
    let mut seen_record = false;
    let mut depth_in_record = 0usize;
    let mut open = Open::None;
    let mut current_control: Option<String> = None;
    let mut current_field: Option<DataField> = None;
    let mut current_code: char = ' ';
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                match name.as_str() {
                    "record" if !seen_record => {
                        seen_record = true;
                        depth_in_record = 1;
                    }
                    _ if depth_in_record == 0 => {}
                    "controlfield" => {
                        current_control = Some(attribute(e, "tag").unwrap_or_default());
                        open = Open::Control;
                        text.clear();
                        depth_in_record += 1;
                    }
                    "datafield" => {
                        let tag = attribute(e, "tag").unwrap_or_default();
                        current_field = Some(DataField {
                            tag,
                            ind1: indicator(attribute(e, "ind1")),
                            ind2: indicator(attribute(e, "ind2")),
                            subfields: Vec::new(),
                        });
                        depth_in_record += 1;
                    }
                    "subfield" => {
                        current_code = attribute(e, "code")
                            .and_then(|c| c.chars().next())
                            .unwrap_or(' ');
                        open = Open::Subfield;
                        text.clear();
                        depth_in_record += 1;
                    }
                    _ => depth_in_record += 1,
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = local_name(e);
                if depth_in_record == 0 {
                    if name == "record" && !seen_record {
                        seen_record = true;
                        break;
                    }
                    buf.clear();
                    continue;
                }
                match name.as_str() {
                    "controlfield" => {
                        record
                            .controlfields
                            .push((attribute(e, "tag").unwrap_or_default(), String::new()));
                    }
                    "subfield" => {
                        if let Some(field) = current_field.as_mut() {
                            let code = attribute(e, "code")
                                .and_then(|c| c.chars().next())
                                .unwrap_or(' ');
                            field.subfields.push((code, String::new()));
                        }
                    }
                    "datafield" => {
                        record.datafields.push(DataField {
                            tag: attribute(e, "tag").unwrap_or_default(),
                            ind1: indicator(attribute(e, "ind1")),
                            ind2: indicator(attribute(e, "ind2")),
                            subfields: Vec::new(),
                        });
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if !matches!(open, Open::None) {
                    let value = e
                        .unescape()
                        .map_err(|err| format!("invalid text content: {}", err))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::CData(ref e)) => {
                if !matches!(open, Open::None) {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => {
                if depth_in_record == 0 {
                    buf.clear();
                    continue;
                }
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                depth_in_record -= 1;
                match name.as_str() {
                    "record" if depth_in_record == 0 => break,
                    "controlfield" => {
                        if let Some(tag) = current_control.take() {
                            record.controlfields.push((tag, text.trim().to_string()));
                        }
                        open = Open::None;
                    }
                    "subfield" => {
                        if let Some(field) = current_field.as_mut() {
                            field.subfields.push((current_code, text.trim().to_string()));
                        }
                        open = Open::None;
                    }
                    "datafield" => {
                        if let Some(field) = current_field.take() {
                            record.datafields.push(field);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => {
                if depth_in_record > 0 {
                    return Err("unexpected end of input inside <record>".to_string());
                }
                break;
            }
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    if !seen_record {
        return Err("no <record> element found".to_string());
    }

    Ok(record)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.trim().to_string()))
}

fn indicator(value: Option<String>) -> char {
    value
        .and_then(|v| v.chars().next())
        .map(|c| if c == ' ' { '_' } else { c })
        .unwrap_or('_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <record>
          <controlfield tag="001">667</controlfield>
          <controlfield tag="005">20160922232729.0</controlfield>
          <datafield tag="245" ind1=" " ind2=" ">
            <subfield code="a">A &amp; B</subfield>
          </datafield>
          <datafield tag="999" ind1="C" ind2="5">
            <subfield code="0">666</subfield>
            <subfield code="s">Phys.Rev.,D94,054021</subfield>
          </datafield>
        </record>
    "#;

    #[test]
    fn test_parse_fields_and_subfields() {
        let record = parse_fragment(SAMPLE.as_bytes()).unwrap();
        assert_eq!(record.controlfield("001"), Some("667"));
        assert_eq!(record.controlfield("005"), Some("20160922232729.0"));

        let title = record.fields("245", '_', '_').next().unwrap();
        assert_eq!(title.first('a'), Some("A & B"));

        let reference = record.fields("999", 'C', '5').next().unwrap();
        assert_eq!(reference.first('0'), Some("666"));
        assert_eq!(reference.first('s'), Some("Phys.Rev.,D94,054021"));
    }

    #[test]
    fn test_collection_wrapper_and_namespace_prefix() {
        let xml = r#"<marc:collection xmlns:marc="http://www.loc.gov/MARC21/slim">
            <marc:record><marc:controlfield tag="001">1</marc:controlfield></marc:record>
        </marc:collection>"#;
        let record = parse_fragment(xml.as_bytes()).unwrap();
        assert_eq!(record.controlfield("001"), Some("1"));
    }

    #[test]
    fn test_mismatched_tags_are_errors() {
        let xml = "<record><controlfield tag=\"001\">1</datafield></record>";
        assert!(parse_fragment(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_truncated_record_is_error() {
        let xml = "<record><controlfield tag=\"001\">1</controlfield>";
        assert!(parse_fragment(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_no_record_is_error() {
        assert!(parse_fragment(b"<collection/>").is_err());
    }
}
