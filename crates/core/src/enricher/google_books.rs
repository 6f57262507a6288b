//! Google Books client.
//!
//! Google Books carries no class numbers; its categories become subjects
//! for the classifier's subject mapping.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{EnrichmentCandidate, LookupQuery, SourceTag};
use super::{check_status, MetadataSource, SourceError};
use crate::config::EnrichmentConfig;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/books/v1";

/// Image sizes in order of preference.
const IMAGE_SIZES: &[&str] = &["extraLarge", "large", "medium", "thumbnail"];

/// Google Books client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleBooksConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Optional; raises the anonymous quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL (default: https://www.googleapis.com/books/v1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl GoogleBooksConfig {
    pub fn from_enrichment(config: &EnrichmentConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            request_timeout_secs: config.request_timeout_secs,
            api_key: config.google_books_api_key.clone(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Google Books client.
pub struct GoogleBooksClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleBooksClient {
    pub fn new(config: GoogleBooksConfig) -> Result<Self, SourceError> {
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
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl MetadataSource for GoogleBooksClient {
    fn tag(&self) -> SourceTag {
        SourceTag::GoogleBooks
    }

    async fn lookup(
        &self,
        query: &LookupQuery,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        let q = volume_query(query);
        debug!("Google Books lookup: q='{}'", q);

        let url = format!("{}/volumes", self.base_url);
        let mut params: Vec<(&str, &str)> = vec![("q", q.as_str()), ("maxResults", "1")];
        if let Some(key) = &self.api_key {
            params.push(("key", key.as_str()));
        }

        let response = self.client.get(&url).query(&params).send().await?;
        let Some(response) = check_status(response).await? else {
            return Ok(None);
        };
        let result: GbVolumesResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("volumes response: {}", e)))?;

        if result.total_items == 0 {
            return Ok(None);
        }
        Ok(result
            .items
            .into_iter()
            .next()
            .map(|item| volume_candidate(item.volume_info)))
    }
}

fn volume_query(query: &LookupQuery) -> String {
    match query {
        LookupQuery::Identifier { isbn } => format!("isbn:{}", isbn),
        LookupQuery::TitleAuthor { title, author } => match author {
            Some(author) => format!("intitle:\"{}\" inauthor:\"{}\"", title, author),
            None => format!("intitle:\"{}\"", title),
        },
    }
}

fn volume_candidate(info: GbVolumeInfo) -> EnrichmentCandidate {
    let mut candidate = EnrichmentCandidate::new(SourceTag::GoogleBooks);
    candidate.title = info.title;
    candidate.authors = info.authors;
    candidate.publisher = info.publisher;
    candidate.publish_date = info.published_date;
    candidate.description = info.description;
    candidate.language = info.language;
    candidate.subjects = info.categories;

    for id in info.industry_identifiers {
        let scheme = match id.kind.as_str() {
            "ISBN_13" => "isbn_13",
            "ISBN_10" => "isbn_10",
            _ => continue,
        };
        candidate.identifiers.insert(scheme.to_string(), id.identifier);
    }

    if let Some(links) = info.image_links {
        candidate.cover_ref = IMAGE_SIZES
            .iter()
            .find_map(|size| links.get(*size))
            .map(|url| url.replace("http://", "https://").replace("&edge=curl", ""));
    }
    candidate
}

// Google Books API response types (internal)

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GbVolumesResponse {
    #[serde(default)]
    total_items: u32,
    #[serde(default)]
    items: Vec<GbVolume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GbVolume {
    volume_info: GbVolumeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GbVolumeInfo {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    published_date: Option<String>,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    industry_identifiers: Vec<GbIdentifier>,
    image_links: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct GbIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_query() {
        assert_eq!(
            volume_query(&LookupQuery::isbn("9780134685991")),
            "isbn:9780134685991"
        );
        assert_eq!(
            volume_query(&LookupQuery::title_author(
                "Dune",
                Some("Frank Herbert".to_string())
            )),
            "intitle:\"Dune\" inauthor:\"Frank Herbert\""
        );
    }

    #[test]
    fn test_volume_candidate() {
        let response: GbVolumesResponse = serde_json::from_str(
            r#"{
                "totalItems": 1,
                "items": [{
                    "id": "ka2VUBqHiWkC",
                    "volumeInfo": {
                        "title": "Effective Java",
                        "authors": ["Joshua Bloch"],
                        "publisher": "Addison-Wesley Professional",
                        "publishedDate": "2017-12-27",
                        "language": "en",
                        "categories": ["Computers / Programming Languages / Java"],
                        "industryIdentifiers": [
                            {"type": "ISBN_13", "identifier": "9780134686042"},
                            {"type": "OTHER", "identifier": "UOM:39015"}
                        ],
                        "imageLinks": {
                            "thumbnail": "http://books.google.com/books/content?id=ka2V&printsec=frontcover&img=1&zoom=1&edge=curl"
                        }
                    }
                }]
            }"#,
        )
        .unwrap();
        let info = response.items.into_iter().next().unwrap().volume_info;
        let candidate = volume_candidate(info);
        assert_eq!(candidate.source, SourceTag::GoogleBooks);
        assert_eq!(candidate.subjects, vec!["Computers / Programming Languages / Java"]);
        assert_eq!(candidate.classification_hint, None);
        assert_eq!(candidate.identifiers.len(), 1);
        assert_eq!(
            candidate.cover_ref.as_deref(),
            Some("https://books.google.com/books/content?id=ka2V&printsec=frontcover&img=1&zoom=1")
        );
    }

    #[test]
    fn test_empty_result() {
        let response: GbVolumesResponse = serde_json::from_str(r#"{"kind": "books#volumes", "totalItems": 0}"#).unwrap();
        assert_eq!(response.total_items, 0);
        assert!(response.items.is_empty());
    }
}
