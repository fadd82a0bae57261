use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::feed::FetchError;

/// One normalized feed item: an ordered mapping of field name to value.
///
/// The field set is whatever the normalizer produced. Fetchers and the
/// merger only move entries around; they never look inside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entry(Map<String, Value>);

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Shortcut for the string value of `title`.
    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(Value::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Looks up a dotted path (`author.name`).
    ///
    /// A flattened key containing the dots wins over walking nested maps,
    /// matching how the normalizer stores nested attributes.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }

        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Entry {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A lazy, single-pass sequence of entries.
///
/// `Entries` is consumed by value, so it cannot be iterated twice. The
/// first `Err` item is terminal: after yielding it the sequence reports
/// exhaustion, and nothing past the failure is ever pulled from the
/// underlying producer.
pub struct Entries {
    inner: Box<dyn Iterator<Item = Result<Entry, FetchError>> + Send>,
    done: bool,
}

impl Entries {
    pub fn new<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Result<Entry, FetchError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(iter.into_iter()),
            done: false,
        }
    }

    /// Wraps an infallible sequence of entries.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Entry>,
        I::IntoIter: Send + 'static,
    {
        Self::new(entries.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn once(entry: Entry) -> Self {
        Self::from_entries(std::iter::once(entry))
    }

    /// A sequence whose only item is `error`.
    pub fn failed(error: FetchError) -> Self {
        Self::new(std::iter::once(Err(error)))
    }

    /// Drains the sequence, stopping at the first error.
    pub fn try_collect(self) -> Result<Vec<Entry>, FetchError> {
        self.collect()
    }
}

impl Iterator for Entries {
    type Item = Result<Entry, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(entry)) => Some(Ok(entry)),
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl std::iter::FusedIterator for Entries {}

impl fmt::Debug for Entries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entries").field("done", &self.done).finish()
    }
}

/// What a fetch hands back to the pipeline: the combined entries and the
/// skip flag it was invoked with.
#[derive(Debug)]
pub struct FeedResult {
    pub entries: Entries,
    pub skip: bool,
}

impl FeedResult {
    pub fn into_parts(self) -> (Entries, bool) {
        (self.entries, self.skip)
    }
}
