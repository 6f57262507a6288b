//! LibraryThing client.
//!
//! ThingISBN is free and lists the ISBNs of every edition of the work an
//! ISBN belongs to. With a developer key the Common Knowledge API adds the
//! work's title, author and series, and the work's most used tags, which
//! stand in for subjects. LibraryThing cannot search by title, so
//! title/author queries find nothing.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex_lite::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{EnrichmentCandidate, LookupQuery, SourceTag};
use super::{check_status, MetadataSource, SourceError};
use crate::config::EnrichmentConfig;
use crate::inspector::SeriesInfo;

const DEFAULT_BASE_URL: &str = "https://www.librarything.com";
const REST_PATH: &str = "/services/rest/1.1/";

/// Tags kept per work.
const MAX_TAGS: usize = 20;

static SERIES_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#,]\s*(\d+(?:\.\d+)?)").expect("valid series number pattern"));

/// LibraryThing client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryThingConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Developer key for the Common Knowledge API. ThingISBN alone without.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL (default: https://www.librarything.com).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl LibraryThingConfig {
    pub fn from_enrichment(config: &EnrichmentConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            request_timeout_secs: config.request_timeout_secs,
            api_key: config.librarything_api_key.clone(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// LibraryThing client.
pub struct LibraryThingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl LibraryThingClient {
    pub fn new(config: LibraryThingConfig) -> Result<Self, SourceError> {
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
            api_key: config.api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    async fn get_text(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<String>, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        let Some(response) = check_status(response).await? else {
            return Ok(None);
        };
        Ok(Some(response.text().await?))
    }

    async fn related_isbns(&self, isbn: &str) -> Result<Vec<String>, SourceError> {
        let body = self
            .get_text(&format!("/api/thingISBN/{}", isbn), &[])
            .await?;
        match body {
            Some(xml) => parse_isbn_list(&xml),
            None => Ok(Vec::new()),
        }
    }

    async fn work(&self, isbn: &str, api_key: &str) -> Result<Option<LtWork>, SourceError> {
        let params = [
            ("method", "librarything.ck.getwork"),
            ("isbn", isbn),
            ("apikey", api_key),
        ];
        match self.get_text(REST_PATH, &params).await? {
            Some(xml) => parse_work(&xml),
            None => Ok(None),
        }
    }

    async fn tags(&self, work_id: &str, api_key: &str) -> Result<Vec<String>, SourceError> {
        let params = [
            ("method", "librarything.ck.getworktags"),
            ("id", work_id),
            ("apikey", api_key),
        ];
        match self.get_text(REST_PATH, &params).await? {
            Some(xml) => parse_tags(&xml),
            None => Ok(Vec::new()),
        }
    }

    async fn lookup_isbn(&self, isbn: &str) -> Result<Option<EnrichmentCandidate>, SourceError> {
        let related = self.related_isbns(isbn).await?;

        let mut work = None;
        let mut tags = Vec::new();
        if let Some(api_key) = &self.api_key {
            work = self.work(isbn, api_key).await?;
            if let Some(work_id) = work.as_ref().and_then(|w| w.id.as_deref()) {
                tags = self.tags(work_id, api_key).await?;
            }
        }

        Ok(build_candidate(isbn, related, work, tags))
    }
}

#[async_trait]
impl MetadataSource for LibraryThingClient {
    fn tag(&self) -> SourceTag {
        SourceTag::LibraryThing
    }

    async fn lookup(
        &self,
        query: &LookupQuery,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        match query {
            LookupQuery::Identifier { isbn } => {
                debug!("LibraryThing lookup: {}", query);
                self.lookup_isbn(isbn).await
            }
            LookupQuery::TitleAuthor { .. } => Ok(None),
        }
    }
}

/// Work record from `librarything.ck.getwork`.
#[derive(Debug, Default, PartialEq)]
struct LtWork {
    id: Option<String>,
    title: Option<String>,
    author: Option<String>,
    series: Option<String>,
}

/// `None` when LibraryThing knows nothing beyond the ISBN itself.
fn build_candidate(
    isbn: &str,
    related: Vec<String>,
    work: Option<LtWork>,
    tags: Vec<String>,
) -> Option<EnrichmentCandidate> {
    let others: Vec<String> = related.into_iter().filter(|r| r != isbn).collect();
    if others.is_empty() && work.is_none() && tags.is_empty() {
        return None;
    }

    let mut candidate = EnrichmentCandidate::new(SourceTag::LibraryThing);
    if !others.is_empty() {
        candidate
            .identifiers
            .insert("related_isbns".to_string(), others.join(","));
    }
    if let Some(work) = work {
        candidate.title = work.title;
        candidate.authors = work.author.into_iter().collect();
        candidate.series = work.series.as_deref().and_then(parse_series);
        if let Some(id) = work.id {
            candidate.identifiers.insert("librarything".to_string(), id);
        }
    }
    candidate.subjects = tags.into_iter().take(MAX_TAGS).collect();
    Some(candidate)
}

/// Splits "Discworld, #5" or "Discworld #5" into name and number.
fn parse_series(raw: &str) -> Option<SeriesInfo> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let Some(caps) = SERIES_NUMBER.captures(raw) else {
        return Some(SeriesInfo::new(raw, None));
    };
    let index = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok());
    let start = caps.get(0).map(|m| m.start()).unwrap_or(raw.len());
    let name = raw[..start].trim().trim_end_matches(',').trim();
    if name.is_empty() {
        return None;
    }
    Some(SeriesInfo::new(name, index))
}

fn xml_error(what: &str, e: quick_xml::Error) -> SourceError {
    SourceError::Parse(format!("LibraryThing {}: {}", what, e))
}

/// `<idlist><isbn>…</isbn>…</idlist>`
fn parse_isbn_list(xml: &str) -> Result<Vec<String>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_isbn = false;
    let mut isbns = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => in_isbn = e.local_name().as_ref() == b"isbn",
            Ok(Event::Text(t)) if in_isbn => {
                let text = t.unescape().map_err(|e| xml_error("ISBN list", e))?;
                let isbn = text.trim();
                if !isbn.is_empty() {
                    isbns.push(isbn.to_string());
                }
            }
            Ok(Event::End(_)) => in_isbn = false,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error("ISBN list", e)),
        }
        buf.clear();
    }
    Ok(isbns)
}

#[derive(Clone, Copy, PartialEq)]
enum WorkField {
    None,
    Title,
    Author,
    Series,
}

/// First `<item>` of a getwork response.
fn parse_work(xml: &str) -> Result<Option<LtWork>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut work: Option<LtWork> = None;
    let mut depth_in_item = 0usize;
    let mut field = WorkField::None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if depth_in_item > 0 {
                    depth_in_item += 1;
                    // Direct children only.
                    field = match (depth_in_item, name.as_ref()) {
                        (2, b"title") => WorkField::Title,
                        (2, b"author") => WorkField::Author,
                        (2, b"series") => WorkField::Series,
                        _ => WorkField::None,
                    };
                } else if name.as_ref() == b"item" && work.is_none() {
                    depth_in_item = 1;
                    work = Some(LtWork {
                        id: attribute(&e, b"id"),
                        ..Default::default()
                    });
                }
            }
            Ok(Event::Text(t)) if field != WorkField::None => {
                let text = t.unescape().map_err(|e| xml_error("work", e))?;
                let text = text.trim();
                if let (Some(work), false) = (work.as_mut(), text.is_empty()) {
                    let slot = match field {
                        WorkField::Title => Some(&mut work.title),
                        WorkField::Author => Some(&mut work.author),
                        WorkField::Series => Some(&mut work.series),
                        WorkField::None => None,
                    };
                    if let Some(slot) = slot {
                        slot.get_or_insert_with(|| text.to_string());
                    }
                }
            }
            Ok(Event::End(_)) => {
                field = WorkField::None;
                depth_in_item = depth_in_item.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error("work", e)),
        }
        buf.clear();
    }

    Ok(work.filter(|w| w.id.is_some() || w.title.is_some()))
}

/// `name` attributes of every `<tag>`, in response order.
fn parse_tags(xml: &str) -> Result<Vec<String>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut tags = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tag" => {
                if let Some(name) = attribute(&e, b"name") {
                    tags.push(name);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error("tags", e)),
        }
        buf.clear();
    }
    Ok(tags)
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_isbn_list() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<idlist>
  <isbn>0441013597</isbn>
  <isbn>9780441013593</isbn>
  <isbn>0340839937</isbn>
</idlist>"#;
        assert_eq!(
            parse_isbn_list(xml).unwrap(),
            vec!["0441013597", "9780441013593", "0340839937"]
        );
        assert!(parse_isbn_list("<idlist/>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_work() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<response stat="ok">
  <ltml xmlns="http://www.librarything.com/">
    <item id="1060" type="work">
      <author id="216" authorcode="pratchetterry">Terry Pratchett</author>
      <title>Guards! Guards!</title>
      <series>Discworld, #8</series>
      <commonknowledge>
        <title>not the work title</title>
      </commonknowledge>
    </item>
  </ltml>
</response>"#;
        let work = parse_work(xml).unwrap().unwrap();
        assert_eq!(work.id.as_deref(), Some("1060"));
        assert_eq!(work.title.as_deref(), Some("Guards! Guards!"));
        assert_eq!(work.author.as_deref(), Some("Terry Pratchett"));
        assert_eq!(work.series.as_deref(), Some("Discworld, #8"));

        assert_eq!(parse_work(r#"<response stat="fail"/>"#).unwrap(), None);
    }

    #[test]
    fn test_parse_tags() {
        let xml = r#"<response><ltml><item><tags>
            <tag name="fantasy" count="2351"/>
            <tag name="humor" count="1702"/>
            <tag name="" count="3"/>
        </tags></item></ltml></response>"#;
        assert_eq!(parse_tags(xml).unwrap(), vec!["fantasy", "humor"]);
    }

    #[test]
    fn test_parse_series_number() {
        assert_eq!(
            parse_series("Discworld, #8"),
            Some(SeriesInfo::new("Discworld", Some(8.0)))
        );
        assert_eq!(
            parse_series("The Expanse #2.5"),
            Some(SeriesInfo::new("The Expanse", Some(2.5)))
        );
        assert_eq!(
            parse_series("Earthsea"),
            Some(SeriesInfo::new("Earthsea", None))
        );
        assert_eq!(parse_series("  "), None);
    }

    #[test]
    fn test_candidate_from_work_and_related() {
        let work = LtWork {
            id: Some("1060".to_string()),
            title: Some("Guards! Guards!".to_string()),
            author: Some("Terry Pratchett".to_string()),
            series: Some("Discworld, #8".to_string()),
        };
        let candidate = build_candidate(
            "9780062225757",
            vec!["9780062225757".to_string(), "0552134627".to_string()],
            Some(work),
            vec!["fantasy".to_string()],
        )
        .unwrap();
        assert_eq!(candidate.source, SourceTag::LibraryThing);
        assert_eq!(candidate.authors, vec!["Terry Pratchett"]);
        assert_eq!(candidate.subjects, vec!["fantasy"]);
        assert_eq!(candidate.series.as_ref().and_then(|s| s.index), Some(8.0));
        assert_eq!(
            candidate.identifiers.get("related_isbns").map(String::as_str),
            Some("0552134627")
        );
        assert_eq!(candidate.classification_hint, None);
    }

    #[test]
    fn test_nothing_beyond_the_isbn() {
        let only_self = vec!["9780062225757".to_string()];
        assert_eq!(build_candidate("9780062225757", only_self, None, vec![]), None);
    }
}
