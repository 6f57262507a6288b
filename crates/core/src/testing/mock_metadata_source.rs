//! Mock metadata source for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::enricher::{EnrichmentCandidate, LookupQuery, MetadataSource, SourceError, SourceTag};

type ErrorFactory = Arc<dyn Fn() -> SourceError + Send + Sync>;

/// Mock implementation of [`MetadataSource`].
///
/// Answers from in-memory tables keyed by ISBN and by lowercased title,
/// records every query, and can be told to fail or stall. Clones share
/// state, so a test can keep a handle after giving one to the enricher.
#[derive(Clone)]
pub struct MockMetadataSource {
    tag: SourceTag,
    by_isbn: Arc<RwLock<HashMap<String, EnrichmentCandidate>>>,
    by_title: Arc<RwLock<HashMap<String, EnrichmentCandidate>>>,
    queries: Arc<RwLock<Vec<LookupQuery>>>,
    /// If set, the next lookup fails with this error.
    next_error: Arc<RwLock<Option<SourceError>>>,
    /// If set, every lookup fails with an error from this factory.
    always_fail: Arc<RwLock<Option<ErrorFactory>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl MockMetadataSource {
    pub fn new(tag: SourceTag) -> Self {
        Self {
            tag,
            by_isbn: Arc::new(RwLock::new(HashMap::new())),
            by_title: Arc::new(RwLock::new(HashMap::new())),
            queries: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            always_fail: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(None)),
        }
    }

    /// Answer identifier lookups for `isbn` with `candidate`.
    pub async fn add_isbn(&self, isbn: &str, candidate: EnrichmentCandidate) {
        self.by_isbn
            .write()
            .await
            .insert(isbn.to_string(), candidate);
    }

    /// Answer title lookups for `title` (case-insensitive) with `candidate`.
    pub async fn add_title(&self, title: &str, candidate: EnrichmentCandidate) {
        self.by_title
            .write()
            .await
            .insert(title.to_lowercase(), candidate);
    }

    pub async fn recorded_queries(&self) -> Vec<LookupQuery> {
        self.queries.read().await.clone()
    }

    pub async fn lookup_count(&self) -> usize {
        self.queries.read().await.len()
    }

    pub async fn set_next_error(&self, error: SourceError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every lookup fail.
    pub async fn fail_always<F>(&self, make_error: F)
    where
        F: Fn() -> SourceError + Send + Sync + 'static,
    {
        *self.always_fail.write().await = Some(Arc::new(make_error));
    }

    /// Stop failing.
    pub async fn recover(&self) {
        *self.always_fail.write().await = None;
        *self.next_error.write().await = None;
    }

    /// Sleep this long before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }
}

#[async_trait]
impl MetadataSource for MockMetadataSource {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn lookup(
        &self,
        query: &LookupQuery,
    ) -> Result<Option<EnrichmentCandidate>, SourceError> {
        self.queries.write().await.push(query.clone());

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if let Some(make_error) = self.always_fail.read().await.as_ref() {
            return Err(make_error());
        }

        let found = match query {
            LookupQuery::Identifier { isbn } => self.by_isbn.read().await.get(isbn).cloned(),
            LookupQuery::TitleAuthor { title, .. } => self
                .by_title
                .read()
                .await
                .get(&title.to_lowercase())
                .cloned(),
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answers_by_isbn_and_title() {
        let source = MockMetadataSource::new(SourceTag::OpenLibrary);
        source
            .add_isbn(
                "9780441013593",
                EnrichmentCandidate::new(SourceTag::OpenLibrary).with_title("Dune"),
            )
            .await;
        source
            .add_title(
                "Dune",
                EnrichmentCandidate::new(SourceTag::OpenLibrary).with_title("Dune"),
            )
            .await;

        let hit = source.lookup(&LookupQuery::isbn("9780441013593")).await.unwrap();
        assert!(hit.is_some());
        let hit = source
            .lookup(&LookupQuery::title_author("dune", None))
            .await
            .unwrap();
        assert!(hit.is_some());
        let miss = source.lookup(&LookupQuery::isbn("9780000000002")).await.unwrap();
        assert!(miss.is_none());
        assert_eq!(source.lookup_count().await, 3);
    }

    #[tokio::test]
    async fn test_next_error_is_consumed() {
        let source = MockMetadataSource::new(SourceTag::Oclc);
        source.set_next_error(SourceError::Timeout).await;
        assert!(source.lookup(&LookupQuery::isbn("1")).await.is_err());
        assert!(source.lookup(&LookupQuery::isbn("1")).await.is_ok());
    }
}
