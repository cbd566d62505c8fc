//! Article importer
//!
//! Fetches a new article from arXiv (OAI-PMH, `arXiv` metadata format) or
//! CrossRef by identifier and returns it as a literature body. Articles
//! whose identifier is already in the identifier store are refused.

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::ImporterSettings;
use crate::db::pidstore;
use crate::error::{MigrationError, Result};
use crate::model::PidKey;

const USER_AGENT: &str = concat!("hepm-migrator/", env!("CARGO_PKG_VERSION"));
const RETRY_BASE_MS: u64 = 250;

/// Identifier accepted by [`ArticleImporter::import_article`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleId {
    Arxiv(String),
    Doi(String),
}

impl ArticleId {
    /// Recognise and normalise an arXiv id or DOI
    pub fn parse(identifier: &str) -> Option<Self> {
        normalize_arxiv(identifier)
            .map(ArticleId::Arxiv)
            .or_else(|| normalize_doi(identifier).map(ArticleId::Doi))
    }

    pub fn pid(&self) -> PidKey {
        match self {
            ArticleId::Arxiv(value) => PidKey::new("arxiv", value.as_str()),
            ArticleId::Doi(value) => PidKey::new("doi", value.as_str()),
        }
    }
}

/// arXiv id without prefix or version: `1207.7214`, `hep-th/9711200`
pub fn normalize_arxiv(identifier: &str) -> Option<String> {
    let mut id = identifier.trim();
    if id.len() > 6 && id[..6].eq_ignore_ascii_case("arxiv:") {
        id = &id[6..];
    }
    let id = strip_version(id);

    let new_style = match id.split_once('.') {
        Some((yymm, number)) => {
            yymm.len() == 4
                && yymm.bytes().all(|b| b.is_ascii_digit())
                && (4..=5).contains(&number.len())
                && number.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    };
    let old_style = match id.split_once('/') {
        Some((archive, number)) => {
            !archive.is_empty()
                && archive
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b == b'-' || b == b'.')
                && number.len() == 7
                && number.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    };

    (new_style || old_style).then(|| id.to_string())
}

fn strip_version(id: &str) -> &str {
    match id.rfind('v') {
        Some(pos) if pos > 0 && pos + 1 < id.len() && id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            &id[..pos]
        }
        _ => id,
    }
}

/// Bare lower-case DOI: `10.1088/1361-6633/aa5514`
pub fn normalize_doi(identifier: &str) -> Option<String> {
    let mut doi = identifier.trim();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"] {
        if doi.len() >= prefix.len() && doi[..prefix.len()].eq_ignore_ascii_case(prefix) {
            doi = &doi[prefix.len()..];
            break;
        }
    }
    let (registrant, suffix) = doi.split_once('/')?;
    let valid = registrant.starts_with("10.")
        && registrant.len() > 3
        && registrant[3..].bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && !suffix.trim().is_empty()
        && !doi.chars().any(char::is_whitespace);
    valid.then(|| doi.to_lowercase())
}

pub struct ArticleImporter {
    pool: SqlitePool,
    http_client: reqwest::Client,
    arxiv_url: String,
    crossref_url: String,
    max_retries: u32,
}

impl ArticleImporter {
    pub fn new(pool: SqlitePool, settings: &ImporterSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MigrationError::Upstream(e.to_string()))?;

        Ok(Self {
            pool,
            http_client,
            arxiv_url: settings.arxiv_url.trim_end_matches('/').to_string(),
            crossref_url: settings.crossref_url.trim_end_matches('/').to_string(),
            max_retries: settings.max_retries,
        })
    }

    /// Fetch a new article by arXiv id or DOI
    pub async fn import_article(&self, identifier: &str) -> Result<Value> {
        let id = ArticleId::parse(identifier)
            .ok_or_else(|| MigrationError::UnknownIdentifier(identifier.to_string()))?;

        let pid = id.pid();
        if let Some(existing) = pidstore::get(&self.pool, &pid).await? {
            return Err(MigrationError::ExistingArticle(format!(
                "{} (record {})",
                identifier, existing.object_uuid
            )));
        }

        info!(pid = %pid, "Importing article");
        match &id {
            ArticleId::Arxiv(arxiv_id) => self.import_arxiv(arxiv_id).await,
            ArticleId::Doi(doi) => self.import_doi(doi).await,
        }
    }

    async fn import_arxiv(&self, arxiv_id: &str) -> Result<Value> {
        let identifier = format!("oai:arXiv.org:{}", arxiv_id);
        let request = self.http_client.get(&self.arxiv_url).query(&[
            ("verb", "GetRecord"),
            ("identifier", identifier.as_str()),
            ("metadataPrefix", "arXiv"),
        ]);
        let (status, text) = self.send_with_retry(request, "arXiv").await?;

        if text.contains("Malformed identifier") || text.contains("idDoesNotExist") {
            return Err(MigrationError::not_found("arxiv", arxiv_id));
        }
        if status.is_client_error() {
            return Err(MigrationError::Upstream(format!("arXiv answered {}", status)));
        }
        parse_arxiv_record(&text)
    }

    async fn import_doi(&self, doi: &str) -> Result<Value> {
        let url = format!("{}/{}", self.crossref_url, doi);
        let (status, text) = self.send_with_retry(self.http_client.get(&url), "CrossRef").await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MigrationError::not_found("doi", doi));
        }
        if status.is_client_error() {
            return Err(MigrationError::Upstream(format!("CrossRef answered {}", status)));
        }
        parse_crossref_work(&text)
    }

    /// Send, retrying connection failures and 5xx answers
    async fn send_with_retry(
        &self,
        request: reqwest::RequestBuilder,
        service: &str,
    ) -> Result<(reqwest::StatusCode, String)> {
        let mut attempt = 0u32;
        loop {
            let this_try = request
                .try_clone()
                .ok_or_else(|| MigrationError::Upstream(format!("{} request cannot be retried", service)))?;

            let failure = match this_try.send().await {
                Ok(response) if response.status().is_server_error() => {
                    format!("{} answered {}", service, response.status())
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response
                        .text()
                        .await
                        .map_err(|e| MigrationError::Upstream(e.to_string()))?;
                    debug!(service, status = %status, bytes = text.len(), "Upstream answered");
                    return Ok((status, text));
                }
                Err(e) => format!("cannot contact {}: {}", service, e),
            };

            if attempt >= self.max_retries {
                return Err(MigrationError::Upstream(failure));
            }
            attempt += 1;
            let backoff = Duration::from_millis(RETRY_BASE_MS << (attempt - 1).min(4));
            warn!(service, attempt, error = %failure, "Retrying upstream request");
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Convert an OAI-PMH `GetRecord` answer in `arXiv` format
pub fn parse_arxiv_record(xml: &str) -> Result<Value> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_metadata = false;
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut id = None;
    let mut title = None;
    let mut abstract_text = None;
    let mut created = None;
    let mut doi = None;
    let mut categories = Vec::new();
    let mut authors = Vec::new();
    let mut keyname = String::new();
    let mut forenames = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "arXiv" {
                    in_metadata = true;
                }
                if name == "author" {
                    keyname.clear();
                    forenames.clear();
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Text(e)) => {
                let value = e
                    .unescape()
                    .map_err(|e| MigrationError::Parsing(format!("arXiv record: {}", e)))?;
                text.push_str(&value);
            }
            Ok(Event::End(_)) => {
                let name = path.pop().unwrap_or_default();
                if in_metadata {
                    let value = collapse_whitespace(&text);
                    match name.as_str() {
                        "id" if path.last().is_some_and(|p| p == "arXiv") => id = Some(value),
                        "title" => title = Some(value),
                        "abstract" => abstract_text = Some(value),
                        "created" => created = Some(value),
                        "doi" => doi = Some(value),
                        "categories" => categories = value.split(' ').map(str::to_string).collect(),
                        "keyname" => keyname = value,
                        "forenames" => forenames = value,
                        "author" => authors.push(if forenames.is_empty() {
                            keyname.clone()
                        } else {
                            format!("{}, {}", keyname, forenames)
                        }),
                        "arXiv" => in_metadata = false,
                        _ => {}
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(MigrationError::Parsing(format!("arXiv record: {}", e))),
        }
    }

    let (Some(id), Some(title)) = (id, title) else {
        return Err(MigrationError::Parsing("arXiv answer carries no article".to_string()));
    };

    let mut article = Map::new();
    article.insert("document_type".into(), json!(["article"]));
    article.insert("titles".into(), json!([{ "title": title, "source": "arXiv" }]));
    article.insert(
        "arxiv_eprints".into(),
        json!([{ "value": id, "categories": categories }]),
    );
    if !authors.is_empty() {
        let authors: Vec<Value> = authors.into_iter().map(|name| json!({ "full_name": name })).collect();
        article.insert("authors".into(), Value::Array(authors));
    }
    if let Some(abstract_text) = abstract_text {
        article.insert("abstracts".into(), json!([{ "value": abstract_text, "source": "arXiv" }]));
    }
    if let Some(doi) = doi.filter(|d| !d.is_empty()) {
        article.insert("dois".into(), json!([{ "value": doi.to_lowercase() }]));
    }
    if let Some(created) = created {
        article.insert("preprint_date".into(), Value::String(created));
    }
    Ok(Value::Object(article))
}

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefWork,
}

#[derive(Debug, Deserialize)]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    volume: Option<String>,
    page: Option<String>,
    issued: Option<CrossrefDate>,
    #[serde(rename = "type")]
    work_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

/// Convert a CrossRef `works/<doi>` answer
pub fn parse_crossref_work(body: &str) -> Result<Value> {
    let response: CrossrefResponse =
        serde_json::from_str(body).map_err(|e| MigrationError::Parsing(format!("CrossRef work: {}", e)))?;
    let work = response.message;

    let mut article = Map::new();
    let document_type = match work.work_type.as_deref() {
        Some("book") | Some("monograph") => "book",
        Some("book-chapter") => "book chapter",
        Some("proceedings-article") => "conference paper",
        _ => "article",
    };
    article.insert("document_type".into(), json!([document_type]));
    if let Some(title) = work.title.first() {
        article.insert("titles".into(), json!([{ "title": title, "source": "CrossRef" }]));
    }
    article.insert("dois".into(), json!([{ "value": work.doi.to_lowercase() }]));

    let authors: Vec<Value> = work
        .author
        .iter()
        .filter_map(|a| match (&a.family, &a.given, &a.name) {
            (Some(family), Some(given), _) => Some(format!("{}, {}", family, given)),
            (Some(family), None, _) => Some(family.clone()),
            (None, _, Some(name)) => Some(name.clone()),
            _ => None,
        })
        .map(|name| json!({ "full_name": name }))
        .collect();
    if !authors.is_empty() {
        article.insert("authors".into(), Value::Array(authors));
    }

    let year = work
        .issued
        .as_ref()
        .and_then(|d| d.date_parts.first())
        .and_then(|parts| parts.first().copied().flatten());
    let mut publication_info = Map::new();
    if let Some(journal) = work.container_title.first() {
        publication_info.insert("journal_title".into(), Value::String(journal.clone()));
    }
    if let Some(volume) = work.volume {
        publication_info.insert("journal_volume".into(), Value::String(volume));
    }
    if let Some(page) = work.page {
        publication_info.insert("page_artid".into(), Value::String(page));
    }
    if let Some(year) = year {
        publication_info.insert("year".into(), json!(year));
    }
    if !publication_info.is_empty() {
        article.insert("publication_info".into(), json!([publication_info]));
    }

    Ok(Value::Object(article))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ARXIV_ANSWER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <GetRecord><record>
    <header><identifier>oai:arXiv.org:1207.7214</identifier></header>
    <metadata>
      <arXiv xmlns="http://arxiv.org/OAI/arXiv/">
        <id>1207.7214</id>
        <created>2012-07-31</created>
        <authors>
          <author><keyname>Aad</keyname><forenames>Georges</forenames></author>
          <author><keyname>ATLAS Collaboration</keyname></author>
        </authors>
        <title>Observation of a new particle in the search for the
          Standard Model Higgs boson</title>
        <categories>hep-ex</categories>
        <doi>10.1016/j.physletb.2012.08.020</doi>
        <abstract>A search for the Standard Model Higgs boson.</abstract>
      </arXiv>
    </metadata>
  </record></GetRecord>
</OAI-PMH>"#;

    const CROSSREF_ANSWER: &str = r#"{"status": "ok", "message": {
        "DOI": "10.1088/1361-6633/aa5514",
        "type": "journal-article",
        "title": ["Review of particle physics"],
        "author": [{"given": "C.", "family": "Patrignani"}, {"name": "Particle Data Group"}],
        "container-title": ["Reports on Progress in Physics"],
        "volume": "80",
        "issued": {"date-parts": [[2017, 1]]}
    }}"#;

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = hepm_common::db::init_database(&dir.path().join("import.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn settings(base: &str) -> ImporterSettings {
        ImporterSettings {
            arxiv_url: format!("{}/oai2", base),
            crossref_url: format!("{}/works", base),
            max_retries: 2,
        }
    }

    #[test]
    fn test_identifier_recognition() {
        assert_eq!(
            ArticleId::parse("arXiv:1207.7214v2"),
            Some(ArticleId::Arxiv("1207.7214".to_string()))
        );
        assert_eq!(
            ArticleId::parse("hep-th/9711200"),
            Some(ArticleId::Arxiv("hep-th/9711200".to_string()))
        );
        assert_eq!(
            ArticleId::parse("https://doi.org/10.1088/1361-6633/AA5514"),
            Some(ArticleId::Doi("10.1088/1361-6633/aa5514".to_string()))
        );
        assert_eq!(ArticleId::parse("not an identifier"), None);
        assert_eq!(ArticleId::parse("10.1234"), None);
    }

    #[test]
    fn test_parse_arxiv_record() {
        let article = parse_arxiv_record(ARXIV_ANSWER).unwrap();
        assert_eq!(article["arxiv_eprints"][0]["value"], "1207.7214");
        assert_eq!(article["arxiv_eprints"][0]["categories"][0], "hep-ex");
        assert_eq!(
            article["titles"][0]["title"],
            "Observation of a new particle in the search for the Standard Model Higgs boson"
        );
        assert_eq!(article["authors"][0]["full_name"], "Aad, Georges");
        assert_eq!(article["authors"][1]["full_name"], "ATLAS Collaboration");
        assert_eq!(article["dois"][0]["value"], "10.1016/j.physletb.2012.08.020");
        assert_eq!(article["preprint_date"], "2012-07-31");
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_arxiv_record("<OAI-PMH><GetRecord/></OAI-PMH>"),
            Err(MigrationError::Parsing(_))
        ));
        assert!(matches!(parse_crossref_work("{\"message\": 3}"), Err(MigrationError::Parsing(_))));
    }

    #[test]
    fn test_parse_crossref_work() {
        let article = parse_crossref_work(CROSSREF_ANSWER).unwrap();
        assert_eq!(article["dois"][0]["value"], "10.1088/1361-6633/aa5514");
        assert_eq!(article["authors"][0]["full_name"], "Patrignani, C.");
        assert_eq!(article["authors"][1]["full_name"], "Particle Data Group");
        assert_eq!(article["publication_info"][0]["year"], 2017);
        assert_eq!(article["publication_info"][0]["journal_volume"], "80");
    }

    #[tokio::test]
    async fn test_existing_article_is_refused() {
        let (_dir, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let record = crate::db::records::create(&mut conn, EntityKind::Literature, json!({}), false)
            .await
            .unwrap();
        pidstore::try_register(&mut *conn, &PidKey::new("arxiv", "1207.7214"), record.uuid)
            .await
            .unwrap();
        drop(conn);

        let importer = ArticleImporter::new(pool, &settings("http://127.0.0.1:9")).unwrap();
        let err = importer.import_article("arXiv:1207.7214").await.unwrap_err();
        assert!(matches!(err, MigrationError::ExistingArticle(_)));

        let err = importer.import_article("foo").await.unwrap_err();
        assert!(matches!(err, MigrationError::UnknownIdentifier(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (_dir, pool) = setup().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/oai2",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, String::new())
                    } else {
                        (StatusCode::OK, ARXIV_ANSWER.to_string())
                    }
                }
            }),
        );
        let base = serve(router).await;

        let importer = ArticleImporter::new(pool, &settings(&base)).unwrap();
        let article = importer.import_article("1207.7214").await.unwrap();
        assert_eq!(article["arxiv_eprints"][0]["value"], "1207.7214");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_articles_are_not_found() {
        let (_dir, pool) = setup().await;
        let router = Router::new()
            .route(
                "/oai2",
                get(|| async { "<OAI-PMH><error code=\"badArgument\">Malformed identifier</error></OAI-PMH>" }),
            )
            .route("/works/*doi", get(|| async { StatusCode::NOT_FOUND }));
        let base = serve(router).await;

        let importer = ArticleImporter::new(pool, &settings(&base)).unwrap();
        assert!(matches!(
            importer.import_article("9999.99999").await,
            Err(MigrationError::NotFound { .. })
        ));
        assert!(matches!(
            importer.import_article("10.9999/missing").await,
            Err(MigrationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_gives_up() {
        let (_dir, pool) = setup().await;
        let importer = ArticleImporter::new(
            pool,
            &ImporterSettings {
                max_retries: 1,
                ..settings("http://127.0.0.1:9")
            },
        )
        .unwrap();
        assert!(matches!(
            importer.import_article("10.1000/xyz").await,
            Err(MigrationError::Upstream(_))
        ));
    }
}
