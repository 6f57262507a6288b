//! Enricher: asks external metadata sources about a book and merges their
//! answers.
//!
//! Sources are queried concurrently. Each request has its own timeout and
//! transient failures are retried with backoff; the whole lookup for one
//! file is capped by a total budget, after which unfinished sources are
//! dropped and the merge proceeds with what arrived. A source that errors
//! or finds nothing is simply absent from the merge.

mod calibre;
mod ddc;
mod google_books;
mod librarything;
mod merge;
mod oclc;
mod openlibrary;
mod types;

pub use calibre::CalibreSource;
pub use ddc::{ddc_class, normalize_ddc};
pub use google_books::{GoogleBooksClient, GoogleBooksConfig};
pub use librarything::{LibraryThingClient, LibraryThingConfig};
pub use merge::{collect_hints, merge, ranked};
pub use oclc::{OclcClassifyClient, OclcConfig};
pub use openlibrary::{OpenLibraryClient, OpenLibraryConfig};
pub use types::*;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::inspector::ExtractedMetadata;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Errors from a metadata source. "No match" is not an error; sources
/// return `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The request exceeded its timeout.
    #[error("Request timed out")]
    Timeout,

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 5xx response.
    #[error("Server error: {status}")]
    Server { status: u16 },

    /// Non-retryable error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The source cannot answer this kind of query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// A local metadata database could not be read.
    #[error("Database error: {0}")]
    Database(String),
}

impl SourceError {
    /// Whether retrying may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SourceError::Timeout | SourceError::RateLimited | SourceError::Server { .. } => true,
            SourceError::Api { .. }
            | SourceError::InvalidQuery(_)
            | SourceError::Parse(_)
            | SourceError::Database(_) => false,
        }
    }
}

/// An external bibliographic source.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Which source this is; decides its trust rank.
    fn tag(&self) -> SourceTag;

    /// Looks a book up. `Ok(None)` means the source has no match.
    async fn lookup(&self, query: &LookupQuery)
        -> Result<Option<EnrichmentCandidate>, SourceError>;
}

/// Maps response statuses shared by all HTTP sources. `Ok(None)` is a 404.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<Option<reqwest::Response>, SourceError> {
    let status = response.status();
    if status == 404 {
        return Ok(None);
    }
    if status == 429 {
        return Err(SourceError::RateLimited);
    }
    if status.is_server_error() {
        return Err(SourceError::Server {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(Some(response))
}

/// Queries every configured source and merges the answers.
pub struct Enricher {
    sources: Vec<Arc<dyn MetadataSource>>,
    rank: TrustRank,
    retry: RetryPolicy,
    request_timeout: Duration,
    total_timeout: Duration,
}

impl Enricher {
    /// Creates an enricher over `sources` with default limits.
    pub fn new(sources: Vec<Arc<dyn MetadataSource>>) -> Self {
        let defaults = EnrichmentConfig::default();
        Self {
            sources,
            rank: TrustRank::default(),
            retry: RetryPolicy::new(defaults.max_retries, defaults.retry_base()),
            request_timeout: defaults.request_timeout(),
            total_timeout: defaults.total_timeout(),
        }
    }

    /// Builds the sources enabled in `config`.
    pub fn from_config(config: &EnrichmentConfig) -> Result<Self, SourceError> {
        let mut sources: Vec<Arc<dyn MetadataSource>> = Vec::new();
        if config.oclc {
            sources.push(Arc::new(OclcClassifyClient::new(OclcConfig::from_enrichment(
                config,
            ))?));
        }
        if config.openlibrary {
            sources.push(Arc::new(OpenLibraryClient::new(
                OpenLibraryConfig::from_enrichment(config),
            )?));
        }
        if config.google_books {
            sources.push(Arc::new(GoogleBooksClient::new(
                GoogleBooksConfig::from_enrichment(config),
            )?));
        }
        if config.librarything {
            sources.push(Arc::new(LibraryThingClient::new(
                LibraryThingConfig::from_enrichment(config),
            )?));
        }
        if let Some(library) = &config.calibre_library {
            sources.push(Arc::new(CalibreSource::new(library)));
        }
        Ok(Self::new(sources).with_limits(config))
    }

    /// Applies retry and timeout settings.
    pub fn with_limits(mut self, config: &EnrichmentConfig) -> Self {
        self.retry = RetryPolicy::new(config.max_retries, config.retry_base());
        self.request_timeout = config.request_timeout();
        self.total_timeout = config.total_timeout();
        self
    }

    pub fn with_trust_rank(mut self, rank: TrustRank) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, request: Duration, total: Duration) -> Self {
        self.request_timeout = request;
        self.total_timeout = total;
        self
    }

    pub fn trust_rank(&self) -> &TrustRank {
        &self.rank
    }

    pub fn source_tags(&self) -> Vec<SourceTag> {
        self.sources.iter().map(|s| s.tag()).collect()
    }

    /// Enriches a book.
    ///
    /// `query` is the identifier lookup when one exists; otherwise a
    /// title/author query is derived from `extracted`. An identifier lookup
    /// that no source matches falls back to title/author. The file's own
    /// metadata and any `manual` candidate take part in the merge.
    pub async fn enrich(
        &self,
        query: Option<LookupQuery>,
        extracted: &ExtractedMetadata,
        manual: Option<EnrichmentCandidate>,
    ) -> EnrichmentOutcome {
        let deadline = Instant::now() + self.total_timeout;
        let fallback = title_author_query(extracted);

        let mut failed_sources = Vec::new();
        let mut candidates = Vec::new();

        let primary = query.or_else(|| fallback.clone());
        if let Some(primary) = &primary {
            let (found, failed) = self.query_all(primary, deadline).await;
            candidates = found;
            failed_sources = failed;

            let was_identifier = matches!(primary, LookupQuery::Identifier { .. });
            if candidates.is_empty() && was_identifier && Instant::now() < deadline {
                if let Some(fallback) = &fallback {
                    debug!(query = %fallback, "No identifier match, trying title/author");
                    let (found, failed) = self.query_all(fallback, deadline).await;
                    candidates = found;
                    failed_sources = failed;
                }
            }
        }

        if let Some(manual) = manual {
            candidates.push(manual);
        }
        candidates.push(EnrichmentCandidate::from_extracted(extracted));

        let merged = merge(&candidates, &self.rank);
        let hints = collect_hints(&candidates, &self.rank);

        EnrichmentOutcome {
            candidates,
            merged,
            hints,
            failed_sources,
        }
    }

    /// Runs `query` against every source until all answer or the deadline
    /// passes.
    async fn query_all(
        &self,
        query: &LookupQuery,
        deadline: Instant,
    ) -> (Vec<EnrichmentCandidate>, Vec<SourceTag>) {
        let mut pending: FuturesUnordered<_> = self
            .sources
            .iter()
            .map(|source| {
                let tag = source.tag();
                let source = Arc::clone(source);
                let timeout = self.request_timeout;
                let retry = self.retry;
                async move {
                    let result = retry_with_backoff(tag.as_str(), retry, || {
                        let source = Arc::clone(&source);
                        async move {
                            match tokio::time::timeout(timeout, source.lookup(query)).await {
                                Ok(result) => result,
                                Err(_) => Err(SourceError::Timeout),
                            }
                        }
                    })
                    .await;
                    (tag, result)
                }
            })
            .collect();

        let mut outstanding: Vec<SourceTag> = self.source_tags();
        let mut found = Vec::new();
        let mut failed = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((tag, result))) => {
                    outstanding.retain(|t| *t != tag);
                    match result {
                        Ok(Some(mut candidate)) => {
                            candidate.source = tag;
                            debug!(source = %tag, query = %query, "Source matched");
                            found.push(candidate);
                        }
                        Ok(None) => debug!(source = %tag, query = %query, "No match"),
                        Err(e) => {
                            warn!(source = %tag, query = %query, error = %e, "Source failed");
                            failed.push(tag);
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        query = %query,
                        skipped = ?outstanding,
                        "Enrichment budget exhausted"
                    );
                    failed.extend(outstanding.drain(..));
                    break;
                }
            }
        }

        (found, failed)
    }
}

/// Title/author query from extracted metadata, if it has a title.
pub fn title_author_query(extracted: &ExtractedMetadata) -> Option<LookupQuery> {
    let title = extracted.title.as_ref()?.trim();
    if title.is_empty() {
        return None;
    }
    Some(LookupQuery::title_author(
        title,
        extracted.authors.first().cloned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockMetadataSource;

    fn extracted() -> ExtractedMetadata {
        ExtractedMetadata {
            title: Some("Clean Code".to_string()),
            authors: vec!["Robert C. Martin".to_string()],
            description: Some("From the file".to_string()),
            ..Default::default()
        }
    }

    fn fast(enricher: Enricher) -> Enricher {
        enricher
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
            .with_timeouts(Duration::from_millis(200), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_merges_sources_by_trust() {
        let oclc = MockMetadataSource::new(SourceTag::Oclc);
        oclc.add_isbn(
            "9780134685991",
            EnrichmentCandidate::new(SourceTag::Oclc)
                .with_title("Effective Java")
                .with_classification("005.1"),
        )
        .await;
        let google = MockMetadataSource::new(SourceTag::GoogleBooks);
        google
            .add_isbn(
                "9780134685991",
                EnrichmentCandidate::new(SourceTag::GoogleBooks)
                    .with_title("Effective Java, Third Edition")
                    .with_authors(vec!["Joshua Bloch"])
                    .with_classification("005.133"),
            )
            .await;

        let enricher = fast(Enricher::new(vec![Arc::new(google), Arc::new(oclc)]));
        let outcome = enricher
            .enrich(Some(LookupQuery::isbn("9780134685991")), &extracted(), None)
            .await;

        assert_eq!(outcome.merged.title.as_deref(), Some("Effective Java"));
        assert_eq!(outcome.merged.authors, vec!["Joshua Bloch"]);
        assert_eq!(outcome.merged.description.as_deref(), Some("From the file"));
        assert_eq!(outcome.hints.len(), 2);
        assert_eq!(outcome.hints[0].source, SourceTag::Oclc);
        assert_eq!(outcome.candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_source_is_excluded_not_fatal() {
        let broken = MockMetadataSource::new(SourceTag::Oclc);
        broken
            .fail_always(|| SourceError::Server { status: 503 })
            .await;
        let open = MockMetadataSource::new(SourceTag::OpenLibrary);
        open.add_isbn(
            "9780134685991",
            EnrichmentCandidate::new(SourceTag::OpenLibrary).with_title("Effective Java"),
        )
        .await;

        let enricher = fast(Enricher::new(vec![Arc::new(broken.clone()), Arc::new(open)]));
        let outcome = enricher
            .enrich(Some(LookupQuery::isbn("9780134685991")), &extracted(), None)
            .await;

        assert_eq!(outcome.merged.title.as_deref(), Some("Effective Java"));
        assert_eq!(outcome.failed_sources, vec![SourceTag::Oclc]);
        // First attempt plus two retries.
        assert_eq!(broken.lookup_count().await, 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let source = MockMetadataSource::new(SourceTag::OpenLibrary);
        let enricher = fast(Enricher::new(vec![Arc::new(source.clone())]));
        let outcome = enricher
            .enrich(Some(LookupQuery::isbn("9780134685991")), &ExtractedMetadata::default(), None)
            .await;
        assert!(outcome.failed_sources.is_empty());
        assert_eq!(source.lookup_count().await, 1);
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_identifier_miss_falls_back_to_title_author() {
        let source = MockMetadataSource::new(SourceTag::OpenLibrary);
        source
            .add_title(
                "Clean Code",
                EnrichmentCandidate::new(SourceTag::OpenLibrary)
                    .with_title("Clean Code")
                    .with_subjects(vec!["Computer programming"]),
            )
            .await;
        let enricher = fast(Enricher::new(vec![Arc::new(source.clone())]));
        let outcome = enricher
            .enrich(Some(LookupQuery::isbn("9780132350884")), &extracted(), None)
            .await;
        assert_eq!(outcome.merged.subjects, vec!["Computer programming"]);
        assert_eq!(source.lookup_count().await, 2);
    }

    #[tokio::test]
    async fn test_total_budget_skips_slow_sources() {
        let slow = MockMetadataSource::new(SourceTag::Oclc);
        slow.set_delay(Duration::from_secs(5)).await;
        let quick = MockMetadataSource::new(SourceTag::GoogleBooks);
        quick
            .add_isbn(
                "9780134685991",
                EnrichmentCandidate::new(SourceTag::GoogleBooks).with_title("Quick"),
            )
            .await;

        let enricher = Enricher::new(vec![Arc::new(slow), Arc::new(quick)])
            .with_retry(RetryPolicy::none())
            .with_timeouts(Duration::from_secs(10), Duration::from_millis(100));
        let outcome = enricher
            .enrich(Some(LookupQuery::isbn("9780134685991")), &extracted(), None)
            .await;

        assert_eq!(outcome.merged.title.as_deref(), Some("Quick"));
        assert_eq!(outcome.failed_sources, vec![SourceTag::Oclc]);
    }

    #[tokio::test]
    async fn test_manual_candidate_outranks_sources() {
        let oclc = MockMetadataSource::new(SourceTag::Oclc);
        oclc.add_isbn(
            "9780134685991",
            EnrichmentCandidate::new(SourceTag::Oclc).with_title("Wrong Book"),
        )
        .await;
        let enricher = fast(Enricher::new(vec![Arc::new(oclc)]));
        let manual = EnrichmentCandidate::new(SourceTag::Manual).with_title("Right Book");
        let outcome = enricher
            .enrich(Some(LookupQuery::isbn("9780134685991")), &extracted(), Some(manual))
            .await;
        assert_eq!(outcome.merged.title.as_deref(), Some("Right Book"));
    }

    #[test]
    fn test_title_author_query() {
        assert_eq!(
            title_author_query(&extracted()),
            Some(LookupQuery::title_author(
                "Clean Code",
                Some("Robert C. Martin".to_string())
            ))
        );
        assert_eq!(title_author_query(&ExtractedMetadata::default()), None);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::Timeout.is_retryable());
        assert!(SourceError::Server { status: 502 }.is_retryable());
        assert!(!SourceError::Parse("bad json".to_string()).is_retryable());
        assert!(!SourceError::Api {
            status: 400,
            message: "bad request".to_string()
        }
        .is_retryable());
    }
}
