use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::feed::merge::merge;
use crate::feed::{
    BlockingReader, ContentReader, DocumentParser, Entries, EntryNormalizer, FeedParser,
    FeedResult, Normalize, ParseError, ReadError, Resolve, ResolveError, SourceDescriptor,
    SourceResolver,
};

/// Errors that abort a fetch.
///
/// None of these are retried or turned into partial results. In sequential
/// mode they show up as the failing item of the entry sequence; in
/// concurrent mode they are returned from the fetch itself.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source descriptor could not be turned into a location
    #[error("Cannot resolve source '{descriptor}': {error}")]
    Resolution {
        descriptor: SourceDescriptor,
        #[source]
        error: ResolveError,
    },
    /// The location could not be read
    #[error("Failed to read {location}: {error}")]
    Retrieval {
        descriptor: SourceDescriptor,
        location: Url,
        #[source]
        error: ReadError,
    },
    /// The content is not a feed
    #[error("Failed to parse {location}: {error}")]
    Parse {
        descriptor: SourceDescriptor,
        location: Url,
        #[source]
        error: ParseError,
    },
    /// The source was scheduled but never produced a result
    #[error("No result received for {location}")]
    Unfinished {
        descriptor: SourceDescriptor,
        location: Url,
    },
}

impl FetchError {
    /// The source the failure belongs to.
    pub fn descriptor(&self) -> &SourceDescriptor {
        match self {
            FetchError::Resolution { descriptor, .. }
            | FetchError::Retrieval { descriptor, .. }
            | FetchError::Parse { descriptor, .. }
            | FetchError::Unfinished { descriptor, .. } => descriptor,
        }
    }
}

/// The resolve, parse and normalize collaborators shared by both fetchers.
///
/// Reading is the only step whose shape differs between the sequential and
/// concurrent modes, so the reader lives on the fetcher itself.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn Resolve>,
    pub parser: Arc<dyn DocumentParser>,
    pub normalizer: Arc<dyn Normalize>,
}

impl Collaborators {
    pub fn new(
        resolver: Arc<dyn Resolve>,
        parser: Arc<dyn DocumentParser>,
        normalizer: Arc<dyn Normalize>,
    ) -> Self {
        Self {
            resolver,
            parser,
            normalizer,
        }
    }

    /// The built-in resolver, `feed-rs` parser and entry normalizer.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(SourceResolver::new(&config.resolve)),
            Arc::new(FeedParser),
            Arc::new(EntryNormalizer),
        )
    }

    pub(crate) fn resolve(&self, descriptor: &SourceDescriptor) -> Result<Url, FetchError> {
        let location = self
            .resolver
            .resolve(descriptor)
            .map_err(|error| FetchError::Resolution {
                descriptor: descriptor.clone(),
                error,
            })?;
        tracing::debug!(source = %descriptor, location = %location, "Resolved source");
        Ok(location)
    }

    pub(crate) fn parse(
        &self,
        descriptor: &SourceDescriptor,
        location: &Url,
        raw: &[u8],
    ) -> Result<crate::feed::Document, FetchError> {
        let document = self
            .parser
            .parse(raw)
            .map_err(|error| FetchError::Parse {
                descriptor: descriptor.clone(),
                location: location.clone(),
                error,
            })?;
        tracing::debug!(
            location = %location,
            bytes = raw.len(),
            items = document.entries.len(),
            "Parsed feed"
        );
        Ok(document)
    }
}

/// Blocking fetcher.
///
/// Sources are opened one at a time, in order, and only when the consumer of
/// the returned entries reaches them.
#[derive(Clone)]
pub struct SequentialFetcher {
    collaborators: Collaborators,
    reader: Arc<dyn ContentReader>,
}

impl SequentialFetcher {
    pub fn new(collaborators: Collaborators, reader: Arc<dyn ContentReader>) -> Self {
        Self {
            collaborators,
            reader,
        }
    }

    /// Builds a fetcher from the default collaborators and a blocking reader.
    ///
    /// Must be called outside of an async context (see [`BlockingReader`]).
    pub fn from_config(config: &Config) -> Result<Self, ReadError> {
        let reader = BlockingReader::new(&config.fetch)?;
        Ok(Self::new(
            Collaborators::from_config(config),
            Arc::new(reader),
        ))
    }

    /// Fetches `sources` and merges their entries in declaration order.
    ///
    /// With `skip` set, `fallback` is handed back untouched (an absent
    /// fallback becomes an empty sequence) and no source is resolved, read
    /// or parsed.
    ///
    /// Otherwise nothing happens until the returned entries are pulled. Each
    /// source is resolved, read (blocking the calling thread), parsed and
    /// normalized when the consumer advances into it. The first failure is
    /// yielded as an `Err` item and ends the sequence; sources after it are
    /// never touched.
    pub fn fetch(
        &self,
        sources: Vec<SourceDescriptor>,
        skip: bool,
        fallback: Option<Entries>,
    ) -> FeedResult {
        if skip {
            tracing::debug!(sources = sources.len(), "Skip set, passing fallback feed through");
            return FeedResult {
                entries: fallback.unwrap_or_else(Entries::empty),
                skip,
            };
        }

        let this = self.clone();
        let per_source = sources
            .into_iter()
            .map(move |descriptor| match this.open(&descriptor) {
                Ok(entries) => entries,
                Err(e) => Entries::failed(e),
            });

        FeedResult {
            entries: Entries::new(merge(per_source)),
            skip,
        }
    }

    fn open(&self, descriptor: &SourceDescriptor) -> Result<Entries, FetchError> {
        let location = self.collaborators.resolve(descriptor)?;
        let raw = self
            .reader
            .read(&location)
            .map_err(|error| FetchError::Retrieval {
                descriptor: descriptor.clone(),
                location: location.clone(),
                error,
            })?;
        let document = self.collaborators.parse(descriptor, &location, &raw)?;
        Ok(self.collaborators.normalizer.normalize(document))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feed::{Document, Entry};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Resolver that maps `name` to `test://feeds/name`, failing on names
    /// starting with `bad`.
    pub(crate) struct FakeResolver {
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Resolve for FakeResolver {
        fn resolve(&self, source: &SourceDescriptor) -> Result<Url, ResolveError> {
            self.calls.lock().unwrap().push(source.to_string());
            if source.as_str().starts_with("bad") {
                return Err(ResolveError::Empty);
            }
            Ok(Url::parse(&format!("test://feeds/{}", source)).unwrap())
        }
    }

    /// Serves canned feed bodies keyed by the last path segment.
    pub(crate) struct FakeReader {
        pub bodies: HashMap<String, String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeReader {
        pub fn new(bodies: &[(&str, String)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn body_for(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
            let name = location.path().trim_start_matches('/').to_string();
            self.calls.lock().unwrap().push(name.clone());
            self.bodies
                .get(&name)
                .map(|b| b.clone().into_bytes())
                .ok_or(ReadError::HttpStatus(404))
        }
    }

    impl ContentReader for FakeReader {
        fn read(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
            self.body_for(location)
        }
    }

    /// Parser that counts calls before delegating to `feed-rs`.
    pub(crate) struct CountingParser {
        pub calls: Mutex<usize>,
    }

    impl CountingParser {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }
    }

    impl DocumentParser for CountingParser {
        fn parse(&self, raw: &[u8]) -> Result<Document, ParseError> {
            *self.calls.lock().unwrap() += 1;
            FeedParser.parse(raw)
        }
    }

    /// Normalizer that counts documents before delegating to [`EntryNormalizer`].
    pub(crate) struct CountingNormalizer {
        pub calls: Mutex<usize>,
    }

    impl CountingNormalizer {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }
    }

    impl Normalize for CountingNormalizer {
        fn normalize(&self, document: Document) -> Entries {
            *self.calls.lock().unwrap() += 1;
            EntryNormalizer.normalize(document)
        }
    }

    pub(crate) fn rss(titles: &[&str]) -> String {
        let items: String = titles
            .iter()
            .map(|t| format!("<item><guid>{t}</guid><title>{t}</title></item>"))
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel>{items}</channel></rss>"#)
    }

    pub(crate) fn titles(entries: Vec<Entry>) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.title().unwrap_or_default().to_string())
            .collect()
    }

    struct Harness {
        resolver: Arc<FakeResolver>,
        reader: Arc<FakeReader>,
        parser: Arc<CountingParser>,
        fetcher: SequentialFetcher,
    }

    fn harness(bodies: &[(&str, String)]) -> Harness {
        let resolver = Arc::new(FakeResolver::new());
        let reader = Arc::new(FakeReader::new(bodies));
        let parser = Arc::new(CountingParser::new());
        let fetcher = SequentialFetcher::new(
            Collaborators::new(resolver.clone(), parser.clone(), Arc::new(EntryNormalizer)),
            reader.clone(),
        );
        Harness {
            resolver,
            reader,
            parser,
            fetcher,
        }
    }

    fn sources(names: &[&str]) -> Vec<SourceDescriptor> {
        names.iter().map(|n| SourceDescriptor::from(*n)).collect()
    }

    #[test]
    fn test_skip_returns_fallback_untouched() {
        let h = harness(&[("a", rss(&["a1"]))]);
        let mut fallback_entry = Entry::new();
        fallback_entry.insert("title", "kept");

        let result = h.fetcher.fetch(
            sources(&["a", "b"]),
            true,
            Some(Entries::once(fallback_entry.clone())),
        );
        let (entries, skip) = result.into_parts();

        assert!(skip);
        assert_eq!(entries.try_collect().unwrap(), vec![fallback_entry]);
        assert!(h.resolver.calls.lock().unwrap().is_empty());
        assert!(h.reader.calls.lock().unwrap().is_empty());
        assert_eq!(*h.parser.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_skip_with_absent_fallback_is_empty() {
        let h = harness(&[]);
        let result = h.fetcher.fetch(sources(&["a"]), true, None);
        assert!(result.skip);
        assert_eq!(result.entries.count(), 0);
    }

    #[test]
    fn test_merges_in_source_order() {
        let h = harness(&[("a", rss(&["a1", "a2"])), ("b", rss(&["b1", "b2"]))]);
        let result = h.fetcher.fetch(sources(&["a", "b"]), false, None);

        assert!(!result.skip);
        assert_eq!(
            titles(result.entries.try_collect().unwrap()),
            vec!["a1", "a2", "b1", "b2"]
        );
    }

    #[test]
    fn test_fallback_ignored_when_not_skipping() {
        let h = harness(&[("a", rss(&["a1"]))]);
        let mut fallback_entry = Entry::new();
        fallback_entry.insert("title", "ignored");

        let result = h
            .fetcher
            .fetch(sources(&["a"]), false, Some(Entries::once(fallback_entry)));
        assert_eq!(titles(result.entries.try_collect().unwrap()), vec!["a1"]);
    }

    #[test]
    fn test_nothing_happens_until_pulled() {
        let h = harness(&[("a", rss(&["a1"]))]);
        let result = h.fetcher.fetch(sources(&["a"]), false, None);

        assert!(h.resolver.calls.lock().unwrap().is_empty());
        assert!(h.reader.calls.lock().unwrap().is_empty());
        drop(result);
    }

    #[test]
    fn test_second_source_untouched_after_first_entry() {
        let h = harness(&[("a", rss(&["a1", "a2"])), ("b", rss(&["b1"]))]);
        let mut entries = h.fetcher.fetch(sources(&["a", "b"]), false, None).entries;

        let first = entries.next().unwrap().unwrap();
        assert_eq!(first.title(), Some("a1"));
        assert_eq!(*h.resolver.calls.lock().unwrap(), vec!["a"]);
        assert_eq!(*h.reader.calls.lock().unwrap(), vec!["a"]);
        assert_eq!(*h.parser.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_retrieval_failure_is_fail_fast() {
        let h = harness(&[("a", rss(&["a1"])), ("c", rss(&["c1"]))]);
        let mut entries = h
            .fetcher
            .fetch(sources(&["a", "b", "c"]), false, None)
            .entries;

        assert_eq!(entries.next().unwrap().unwrap().title(), Some("a1"));
        match entries.next() {
            Some(Err(FetchError::Retrieval { descriptor, .. })) => {
                assert_eq!(descriptor.as_str(), "b")
            }
            other => panic!("Expected retrieval error, got {:?}", other),
        }
        assert!(entries.next().is_none());
        assert_eq!(*h.reader.calls.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_failure_aborts_whole_collection() {
        let h = harness(&[("a", rss(&["a1"]))]);
        let result = h.fetcher.fetch(sources(&["a", "b"]), false, None);
        assert!(result.entries.try_collect().is_err());
    }

    #[test]
    fn test_resolution_failure_before_any_read() {
        let h = harness(&[("a", rss(&["a1"]))]);
        let mut entries = h.fetcher.fetch(sources(&["bad", "a"]), false, None).entries;

        assert!(matches!(
            entries.next(),
            Some(Err(FetchError::Resolution { .. }))
        ));
        assert!(entries.next().is_none());
        assert!(h.reader.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_failure_surfaces_mid_iteration() {
        let h = harness(&[("a", rss(&["a1"])), ("b", "<not valid xml".to_string())]);
        let mut entries = h.fetcher.fetch(sources(&["a", "b"]), false, None).entries;

        assert!(entries.next().unwrap().is_ok());
        let err = entries.next().unwrap().unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
        assert_eq!(err.descriptor().as_str(), "b");
    }

    #[test]
    fn test_empty_source_list() {
        let h = harness(&[]);
        let result = h.fetcher.fetch(Vec::new(), false, None);
        assert!(!result.skip);
        assert_eq!(result.entries.count(), 0);
    }
}
