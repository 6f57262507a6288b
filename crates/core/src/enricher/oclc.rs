//! OCLC Classify client.
//!
//! Classify answers ISBN and title/author queries with an XML summary of
//! the matching work and the most popular Dewey and LC class numbers
//! assigned to it by member libraries.

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ddc::normalize_ddc;
use super::types::{EnrichmentCandidate, LookupQuery, SourceTag};
use super::{check_status, MetadataSource, SourceError};
use crate::config::EnrichmentConfig;

const DEFAULT_BASE_URL: &str = "https://classify.oclc.org/classify2/Classify";

/// OCLC Classify client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OclcConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Base URL (default: the public Classify endpoint).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl OclcConfig {
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

/// OCLC Classify client.
pub struct OclcClassifyClient {
    client: Client,
    base_url: String,
}

impl OclcClassifyClient {
    pub fn new(config: OclcConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl MetadataSource for OclcClassifyClient {
    fn tag(&self) -> SourceTag {
        SourceTag::Oclc
    }

    async fn lookup(
        &self,
        query: &LookupQuery,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        let mut params: Vec<(&str, String)> = vec![("summary", "true".to_string())];
        match query {
            LookupQuery::Identifier { isbn } => params.push(("isbn", isbn.clone())),
            LookupQuery::TitleAuthor { title, author } => {
                params.push(("title", title.clone()));
                if let Some(author) = author {
                    params.push(("author", author.clone()));
                }
            }
        }

        debug!("OCLC Classify lookup: {}", query);

        let response = self.client.get(&self.base_url).query(&params).send().await?;
        let Some(response) = check_status(response).await? else {
            return Ok(None);
        };
        let body = response.text().await?;

        Ok(parse_classify(&body)?.map(ClassifyWork::into_candidate))
    }
}

/// Response codes that carry a work: single work summary, single work
/// detail, multiple works.
const WORK_CODES: &[&str] = &["0", "2", "4"];

#[derive(Debug, Default, PartialEq)]
struct ClassifyWork {
    title: Option<String>,
    authors: Vec<String>,
    owi: Option<String>,
    ddc: Option<String>,
    lcc: Option<String>,
}

impl ClassifyWork {
    fn into_candidate(self) -> EnrichmentCandidate {
        let mut candidate = EnrichmentCandidate::new(SourceTag::Oclc);
        candidate.title = self.title;
        candidate.authors = self.authors;
        candidate.classification_hint = self.ddc.as_deref().and_then(normalize_ddc);
        if let Some(owi) = self.owi {
            candidate.identifiers.insert("oclc_owi".to_string(), owi);
        }
        if let Some(lcc) = self.lcc {
            candidate.identifiers.insert("lcc".to_string(), lcc);
        }
        candidate
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Other,
    Ddc,
    Lcc,
}

/// Parses a Classify response. `Ok(None)` when the response code says
/// nothing was found or the work carries no useful data.
fn parse_classify(xml: &str) -> Result<Option<ClassifyWork>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut code: Option<String> = None;
    let mut work = ClassifyWork::default();
    let mut seen_work = false;
    let mut section = Section::Other;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"response" => code = attribute(&e, b"code"),
                b"work" if !seen_work => {
                    seen_work = true;
                    work.title = attribute(&e, b"title");
                    work.owi = attribute(&e, b"owi");
                    if let Some(authors) = attribute(&e, b"author") {
                        work.authors = split_authors(&authors);
                    }
                }
                b"ddc" => section = Section::Ddc,
                b"lcc" => section = Section::Lcc,
                b"mostPopular" => {
                    let value = attribute(&e, b"sfa").or_else(|| attribute(&e, b"nsfa"));
                    match section {
                        Section::Ddc if work.ddc.is_none() => work.ddc = value,
                        Section::Lcc if work.lcc.is_none() => work.lcc = value,
                        _ => {}
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                if matches!(e.local_name().as_ref(), b"ddc" | b"lcc") {
                    section = Section::Other;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SourceError::Parse(format!("Classify XML: {}", e))),
        }
        buf.clear();
    }

    match code.as_deref() {
        Some(c) if WORK_CODES.contains(&c) => {}
        _ => return Ok(None),
    }

    if work.title.is_none() && work.ddc.is_none() && work.lcc.is_none() {
        return Ok(None);
    }
    Ok(Some(work))
}

/// Classify lists authors pipe-separated, sometimes with role suffixes in
/// brackets.
fn split_authors(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(|a| match a.find('[') {
            Some(idx) => &a[..idx],
            None => a,
        })
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
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

    const SINGLE_WORK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<classify xmlns="http://classify.oclc.org">
  <response code="0"/>
  <work author="Martin, Robert C. [Author] | Feathers, Michael C." editions="12" owi="1362523213" title="Clean code : a handbook of agile software craftsmanship">123</work>
  <recommendations>
    <ddc>
      <mostPopular holdings="1632" nsfa="005.1" sfa="005.1"/>
      <mostRecent holdings="1632" sfa="005.1"/>
    </ddc>
    <lcc>
      <mostPopular holdings="1500" nsfa="QA76.76.D47" sfa="QA76.76.D47"/>
    </lcc>
  </recommendations>
</classify>"#;

    #[test]
    fn test_parse_single_work() {
        let work = parse_classify(SINGLE_WORK).unwrap().unwrap();
        assert_eq!(
            work.title.as_deref(),
            Some("Clean code : a handbook of agile software craftsmanship")
        );
        assert_eq!(work.authors, vec!["Martin, Robert C.", "Feathers, Michael C."]);
        assert_eq!(work.ddc.as_deref(), Some("005.1"));
        assert_eq!(work.lcc.as_deref(), Some("QA76.76.D47"));

        let candidate = work.into_candidate();
        assert_eq!(candidate.source, SourceTag::Oclc);
        assert_eq!(candidate.classification_hint.as_deref(), Some("005.1"));
        assert_eq!(
            candidate.identifiers.get("oclc_owi").map(String::as_str),
            Some("1362523213")
        );
    }

    #[test]
    fn test_not_found_code() {
        let xml = r#"<classify xmlns="http://classify.oclc.org"><response code="102"/></classify>"#;
        assert_eq!(parse_classify(xml).unwrap(), None);
    }

    #[test]
    fn test_multiple_works_takes_first() {
        let xml = r#"<classify xmlns="http://classify.oclc.org">
  <response code="4"/>
  <works>
    <work author="Herbert, Frank" owi="1" title="Dune" hyr="1965"/>
    <work author="Herbert, Brian" owi="2" title="Dune: House Atreides"/>
  </works>
</classify>"#;
        let work = parse_classify(xml).unwrap().unwrap();
        assert_eq!(work.title.as_deref(), Some("Dune"));
        assert_eq!(work.owi.as_deref(), Some("1"));
        assert_eq!(work.ddc, None);
    }

    #[test]
    fn test_nsfa_fallback() {
        let xml = r#"<classify xmlns="http://classify.oclc.org">
  <response code="2"/>
  <work title="Dune" owi="1"/>
  <recommendations><ddc><mostPopular nsfa="813/.54"/></ddc></recommendations>
</classify>"#;
        let candidate = parse_classify(xml).unwrap().unwrap().into_candidate();
        assert_eq!(candidate.classification_hint.as_deref(), Some("813.54"));
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let result = parse_classify("<classify><response code=\"0\"></classify>");
        assert!(matches!(result, Err(SourceError::Parse(_))));
    }
}
