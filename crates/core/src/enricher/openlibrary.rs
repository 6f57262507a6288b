//! Open Library client.
//!
//! ISBN lookups go through the edition endpoint, then follow the edition's
//! work for subjects and class numbers and the work's authors for names.
//! Title/author lookups use the search endpoint and take the best hit.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::ddc::normalize_ddc;
use super::types::{EnrichmentCandidate, LookupQuery, SourceTag};
use super::{check_status, MetadataSource, SourceError};
use crate::config::EnrichmentConfig;

const DEFAULT_BASE_URL: &str = "https://openlibrary.org";
const COVERS_BASE_URL: &str = "https://covers.openlibrary.org";

/// Subjects kept per book.
const MAX_SUBJECTS: usize = 10;
/// Author records fetched per work.
const MAX_AUTHORS: usize = 3;

/// Open Library client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLibraryConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Base URL (default: https://openlibrary.org).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl OpenLibraryConfig {
    pub fn from_enrichment(config: &EnrichmentConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            request_timeout_secs: config.request_timeout_secs,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Open Library client.
pub struct OpenLibraryClient {
    client: Client,
    base_url: String,
}

impl OpenLibraryClient {
    pub fn new(config: OpenLibraryConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        let Some(response) = check_status(response).await? else {
            return Ok(None);
        };
        let parsed = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("{}: {}", path, e)))?;
        Ok(Some(parsed))
    }

    async fn lookup_isbn(&self, isbn: &str) -> Result<Option<EnrichmentCandidate>, SourceError> {
        let Some(edition) = self
            .get_json::<OlEdition>(&format!("/isbn/{}.json", isbn))
            .await?
        else {
            return Ok(None);
        };

        let work = match edition.works.first() {
            Some(work_ref) => self.get_json::<OlWork>(&format!("{}.json", work_ref.key)).await?,
            None => None,
        };

        let mut authors = Vec::new();
        let author_keys = work
            .as_ref()
            .map(|w| w.author_keys())
            .filter(|keys| !keys.is_empty())
            .unwrap_or_else(|| edition.authors.iter().map(|a| a.key.clone()).collect());
        for key in author_keys.iter().take(MAX_AUTHORS) {
            if let Some(author) = self.get_json::<OlAuthor>(&format!("{}.json", key)).await? {
                if let Some(name) = author.name.filter(|n| !n.trim().is_empty()) {
                    authors.push(name);
                }
            }
        }

        Ok(Some(edition_candidate(edition, work, authors)))
    }

    async fn search(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        let url = format!("{}/search.json", self.base_url);
        let mut params: Vec<(&str, &str)> = vec![("title", title), ("limit", "1")];
        if let Some(author) = author {
            params.push(("author", author));
        }

        let response = self.client.get(&url).query(&params).send().await?;
        let Some(response) = check_status(response).await? else {
            return Ok(None);
        };
        let result: OlSearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("search response: {}", e)))?;

        Ok(result.docs.into_iter().next().map(search_candidate))
    }
}

#[async_trait]
impl MetadataSource for OpenLibraryClient {
    fn tag(&self) -> SourceTag {
        SourceTag::OpenLibrary
    }

    async fn lookup(
        &self,
        query: &LookupQuery,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        debug!("Open Library lookup: {}", query);
        match query {
            LookupQuery::Identifier { isbn } => self.lookup_isbn(isbn).await,
            LookupQuery::TitleAuthor { title, author } => {
                self.search(title, author.as_deref()).await
            }
        }
    }
}

fn cover_url(cover_id: i64) -> String {
    format!("{}/b/id/{}-L.jpg", COVERS_BASE_URL, cover_id)
}

fn edition_candidate(
    edition: OlEdition,
    work: Option<OlWork>,
    authors: Vec<String>,
) -> EnrichmentCandidate {
    let mut candidate = EnrichmentCandidate::new(SourceTag::OpenLibrary);
    candidate.title = edition.title;
    candidate.authors = authors;
    candidate.publisher = edition.publishers.into_iter().next();
    candidate.publish_date = edition.publish_date;
    candidate.cover_ref = edition
        .covers
        .iter()
        .find(|id| **id > 0)
        .map(|id| cover_url(*id));
    if let Some(isbn) = edition.isbn_13.into_iter().next() {
        candidate.identifiers.insert("isbn_13".to_string(), isbn);
    }
    if let Some(isbn) = edition.isbn_10.into_iter().next() {
        candidate.identifiers.insert("isbn_10".to_string(), isbn);
    }
    if let Some(key) = edition.key {
        candidate.identifiers.insert("olid".to_string(), key);
    }

    let mut ddc = edition.dewey_decimal_class;
    let mut lcc = edition.lc_classifications;
    let mut subjects = edition.subjects;
    let mut description = edition.description.map(OlText::into_string);

    if let Some(work) = work {
        ddc.extend(work.dewey_number);
        lcc.extend(work.lc_classifications);
        if !work.subjects.is_empty() {
            subjects = work.subjects;
        }
        if description.is_none() {
            description = work.description.map(OlText::into_string);
        }
    }

    candidate.description = description.filter(|d| !d.trim().is_empty());
    candidate.subjects = subjects.into_iter().take(MAX_SUBJECTS).collect();
    candidate.classification_hint = ddc.iter().find_map(|d| normalize_ddc(d));
    if let Some(lcc) = lcc.into_iter().next() {
        candidate.identifiers.insert("lcc".to_string(), lcc);
    }
    candidate
}

fn search_candidate(doc: OlSearchDoc) -> EnrichmentCandidate {
    let mut candidate = EnrichmentCandidate::new(SourceTag::OpenLibrary);
    candidate.title = doc.title;
    candidate.authors = doc.author_name;
    candidate.publisher = doc.publisher.into_iter().next();
    candidate.publish_date = doc.first_publish_year.map(|y| y.to_string());
    candidate.subjects = doc.subject.into_iter().take(MAX_SUBJECTS).collect();
    candidate.classification_hint = doc.ddc.iter().find_map(|d| normalize_ddc(d));
    candidate.cover_ref = doc.cover_i.map(cover_url);
    for isbn in doc.isbn {
        let scheme = match isbn.len() {
            13 => "isbn_13",
            10 => "isbn_10",
            _ => continue,
        };
        candidate
            .identifiers
            .entry(scheme.to_string())
            .or_insert(isbn);
    }
    if let Some(lcc) = doc.lcc.into_iter().next() {
        candidate.identifiers.insert("lcc".to_string(), lcc);
    }
    if let Some(key) = doc.key {
        candidate.identifiers.insert("olid".to_string(), key);
    }
    candidate
}

// Open Library API response types (internal)

/// Descriptions come either as a plain string or as a typed text object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OlText {
    Plain(String),
    Typed { value: String },
}

impl OlText {
    fn into_string(self) -> String {
        match self {
            OlText::Plain(s) | OlText::Typed { value: s } => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OlKeyRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct OlEdition {
    key: Option<String>,
    title: Option<String>,
    #[serde(default)]
    publishers: Vec<String>,
    publish_date: Option<String>,
    description: Option<OlText>,
    #[serde(default)]
    isbn_10: Vec<String>,
    #[serde(default)]
    isbn_13: Vec<String>,
    #[serde(default)]
    covers: Vec<i64>,
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default)]
    dewey_decimal_class: Vec<String>,
    #[serde(default)]
    lc_classifications: Vec<String>,
    #[serde(default)]
    works: Vec<OlKeyRef>,
    #[serde(default)]
    authors: Vec<OlKeyRef>,
}

#[derive(Debug, Deserialize)]
struct OlWork {
    description: Option<OlText>,
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default)]
    dewey_number: Vec<String>,
    #[serde(default)]
    lc_classifications: Vec<String>,
    #[serde(default)]
    authors: Vec<OlWorkAuthor>,
}

impl OlWork {
    fn author_keys(&self) -> Vec<String> {
        self.authors
            .iter()
            .filter_map(|a| a.author.as_ref().map(|r| r.key.clone()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct OlWorkAuthor {
    author: Option<OlKeyRef>,
}

#[derive(Debug, Deserialize)]
struct OlAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OlSearchResponse {
    #[serde(default)]
    docs: Vec<OlSearchDoc>,
}

#[derive(Debug, Deserialize)]
struct OlSearchDoc {
    key: Option<String>,
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    publisher: Vec<String>,
    first_publish_year: Option<i32>,
    #[serde(default)]
    subject: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
    #[serde(default)]
    ddc: Vec<String>,
    #[serde(default)]
    lcc: Vec<String>,
    cover_i: Option<i64>,
}
