use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::config::Config;
use crate::feed::merge::merge;
use crate::feed::{
    AsyncContentReader, Collaborators, Document, Entries, FeedResult, FetchError, HttpReader,
    ReadError, SourceDescriptor,
};

/// Fetcher that overlaps retrieval latency across sources.
///
/// All sources are resolved up front, then read concurrently (at most
/// `max_concurrent` in flight). Each body is parsed as soon as its read
/// completes. Entries are normalized lazily once the caller pulls them.
#[derive(Clone)]
pub struct ConcurrentFetcher {
    collaborators: Collaborators,
    reader: Arc<dyn AsyncContentReader>,
    max_concurrent: usize,
}

impl ConcurrentFetcher {
    pub fn new(
        collaborators: Collaborators,
        reader: Arc<dyn AsyncContentReader>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            collaborators,
            reader,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Builds a fetcher from the default collaborators and an [`HttpReader`].
    pub fn from_config(config: &Config) -> Result<Self, ReadError> {
        let reader = HttpReader::new(&config.fetch)?;
        Ok(Self::new(
            Collaborators::from_config(config),
            Arc::new(reader),
            config.fetch.max_concurrent_fetches,
        ))
    }

    /// Fetches `sources` concurrently and merges their entries in
    /// declaration order.
    ///
    /// With `skip` set this behaves exactly like the sequential fetcher:
    /// `fallback` comes back untouched and no source is touched.
    ///
    /// Otherwise the returned future completes once every source has been
    /// read and parsed. The first resolution, retrieval or parse failure
    /// fails the whole call; reads still in flight are dropped and results
    /// already received are discarded.
    pub async fn fetch(
        &self,
        sources: Vec<SourceDescriptor>,
        skip: bool,
        fallback: Option<Entries>,
    ) -> Result<FeedResult, FetchError> {
        if skip {
            tracing::debug!(sources = sources.len(), "Skip set, passing fallback feed through");
            return Ok(FeedResult {
                entries: fallback.unwrap_or_else(Entries::empty),
                skip,
            });
        }

        // Resolution is cheap and synchronous; a bad source fails before any I/O
        let mut resolved = Vec::with_capacity(sources.len());
        for descriptor in sources {
            let location = self.collaborators.resolve(&descriptor)?;
            resolved.push((descriptor, location));
        }

        let started = Instant::now();
        let documents = self.read_all_concurrently(&resolved).await?;
        tracing::info!(
            sources = documents.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched all sources"
        );

        let normalizer = Arc::clone(&self.collaborators.normalizer);
        let per_source = documents
            .into_iter()
            .map(move |document| normalizer.normalize(document));

        Ok(FeedResult {
            entries: Entries::new(merge(per_source)),
            skip,
        })
    }

    /// Reads and parses every location, returning documents in input order.
    ///
    /// Reads complete in any order; each result is written into the slot of
    /// its source position rather than appended.
    async fn read_all_concurrently(
        &self,
        resolved: &[(SourceDescriptor, Url)],
    ) -> Result<Vec<Document>, FetchError> {
        let mut slots: Vec<Option<Document>> = Vec::with_capacity(resolved.len());
        slots.resize_with(resolved.len(), || None);

        let mut completions = stream::iter(resolved.iter().enumerate())
            .map(move |(index, (descriptor, location))| async move {
                let result = self.read_one(descriptor, location).await;
                (index, result)
            })
            .buffer_unordered(self.max_concurrent);

        while let Some((index, result)) = completions.next().await {
            match result {
                Ok(document) => slots[index] = Some(document),
                Err(e) => {
                    tracing::warn!(
                        source = %e.descriptor(),
                        error = %e,
                        "Source failed, abandoning remaining reads"
                    );
                    return Err(e);
                }
            }
        }

        in_source_order(slots, resolved)
    }

    async fn read_one(
        &self,
        descriptor: &SourceDescriptor,
        location: &Url,
    ) -> Result<Document, FetchError> {
        let raw = self
            .reader
            .read(location)
            .await
            .map_err(|error| FetchError::Retrieval {
                descriptor: descriptor.clone(),
                location: location.clone(),
                error,
            })?;
        self.collaborators.parse(descriptor, location, &raw)
    }
}

/// Unwraps the filled slots, failing on the first source left without a
/// document.
fn in_source_order(
    slots: Vec<Option<Document>>,
    resolved: &[(SourceDescriptor, Url)],
) -> Result<Vec<Document>, FetchError> {
    slots
        .into_iter()
        .zip(resolved)
        .map(|(slot, (descriptor, location))| {
            slot.ok_or_else(|| FetchError::Unfinished {
                descriptor: descriptor.clone(),
                location: location.clone(),
            })
        })
        .collect()
}
