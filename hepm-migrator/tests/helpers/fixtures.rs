//! MARCXML fixtures
//!
//! `MarcBuilder` writes legacy records the way the legacy system exported
//! them; the named constructors reproduce the records used across tests.

use std::path::{Path, PathBuf};

pub const BASE_URL: &str = "http://localhost:5000/api";

/// Builder for one `<record>`
#[derive(Debug, Clone)]
pub struct MarcBuilder {
    recid: i64,
    modified: Option<String>,
    fields: Vec<String>,
}

impl MarcBuilder {
    pub fn new(recid: i64, collection: &str) -> Self {
        Self {
            recid,
            modified: None,
            fields: Vec::new(),
        }
        .field("980", &[('a', collection)])
    }

    pub fn literature(recid: i64, title: &str) -> Self {
        Self::new(recid, "HEP").field("245", &[('a', title)])
    }

    /// `005` timestamp, `YYYYMMDDhhmmss.0`
    pub fn modified(mut self, timestamp: &str) -> Self {
        self.modified = Some(timestamp.to_string());
        self
    }

    pub fn field(mut self, tag: &str, subfields: &[(char, &str)]) -> Self {
        self.fields.push(datafield(tag, ' ', ' ', subfields));
        self
    }

    pub fn cites(self, recid: i64) -> Self {
        let recid = recid.to_string();
        let mut builder = self;
        builder.fields.push(datafield(
            "999",
            'C',
            '5',
            &[('0', recid.as_str()), ('x', "Some reference")],
        ));
        builder
    }

    pub fn doi(mut self, doi: &str) -> Self {
        self.fields.push(datafield("024", '7', ' ', &[('2', "DOI"), ('a', doi)]));
        self
    }

    pub fn imprint(self, date: &str) -> Self {
        self.field("260", &[('c', date)])
    }

    pub fn conference(self, recid: i64) -> Self {
        let recid = recid.to_string();
        self.field("773", &[('0', recid.as_str()), ('y', "2015")])
    }

    pub fn affiliation(self, recid: i64, name: &str) -> Self {
        let recid = recid.to_string();
        self.field("902", &[('a', name), ('z', recid.as_str())])
    }

    pub fn author(self, name: &str, bai: &str) -> Self {
        self.field("100", &[('a', name), ('j', bai)])
    }

    pub fn merged_into(self, recid: i64) -> Self {
        let recid = recid.to_string();
        self.field("970", &[('d', recid.as_str())])
    }

    pub fn merges(self, recid: i64) -> Self {
        let recid = recid.to_string();
        self.field("981", &[('a', recid.as_str())])
    }

    pub fn deleted(self) -> Self {
        self.field("980", &[('c', "DELETED")])
    }

    pub fn build(&self) -> String {
        let mut xml = String::from("<record>\n");
        xml.push_str(&format!("  <controlfield tag=\"001\">{}</controlfield>\n", self.recid));
        if let Some(modified) = &self.modified {
            xml.push_str(&format!("  <controlfield tag=\"005\">{}</controlfield>\n", modified));
        }
        for field in &self.fields {
            xml.push_str(field);
        }
        xml.push_str("</record>\n");
        xml
    }
}

fn datafield(tag: &str, ind1: char, ind2: char, subfields: &[(char, &str)]) -> String {
    let mut xml = format!("  <datafield tag=\"{}\" ind1=\"{}\" ind2=\"{}\">", tag, ind1, ind2);
    for (code, value) in subfields {
        xml.push_str(&format!("<subfield code=\"{}\">{}</subfield>", code, escape(value)));
    }
    xml.push_str("</datafield>\n");
    xml
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Wrap records in a `<collection>`
pub fn collection(records: &[String]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<collection xmlns=\"http://www.loc.gov/MARC21/slim\">\n");
    for record in records {
        xml.push_str(record);
    }
    xml.push_str("</collection>\n");
    xml
}

/// Write a dump file and return its path
pub fn write_dump(dir: &Path, name: &str, records: &[String]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, collection(records)).expect("write dump");
    path
}

/// Literature record 666
pub fn record_666() -> MarcBuilder {
    MarcBuilder::literature(666, "Partonic structure of the nucleon")
        .modified("20160922232729.0")
        .imprint("2016-09")
}

/// Literature record 667, citing 666
pub fn record_667() -> MarcBuilder {
    MarcBuilder::literature(667, "Parton distributions revisited")
        .modified("20170101000000.0")
        .imprint("2017")
        .cites(666)
}

/// Literature record 668 with an unparseable imprint date
pub fn record_668() -> MarcBuilder {
    MarcBuilder::literature(668, "A record with a bad date")
        .modified("20170101000000.0")
        .imprint("Definitely not a date")
}

/// Author record 669
pub fn record_669() -> MarcBuilder {
    MarcBuilder::new(669, "HEPNAMES")
        .modified("20170101000000.0")
        .field("100", &[('a', "Doe, John"), ('q', "John Doe")])
}

/// The four fixture records, as XML
pub fn standard_dump() -> Vec<String> {
    vec![
        record_666().build(),
        record_667().build(),
        record_668().build(),
        record_669().build(),
    ]
}
