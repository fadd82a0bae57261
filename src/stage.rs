//! Adapter between the pipeline's item/conf shapes and the fetchers.
//!
//! A stage conf carries its sources under the configured `extract` key
//! (`url` by default), either as one source conf or a list of them:
//!
//! ```json
//! { "url": [{ "value": "feeds/news.xml" }, { "subkey": "link" }] }
//! ```
//!
//! `value` is a literal location; `subkey` names a field of the current
//! item whose value is the location. When the stage is skipped, the current
//! item itself is passed through as a one-entry feed.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::StageConfig;
use crate::feed::{
    ConcurrentFetcher, Entries, Entry, FeedResult, FetchError, SequentialFetcher,
    SourceDescriptor,
};

#[derive(Debug, Error)]
pub enum StageError {
    /// The conf has nothing under the extract key
    #[error("Stage conf has no '{0}' key")]
    MissingSources(String),
    /// A single source conf was given but listize is off
    #[error("Expected a list of sources under '{0}'")]
    NotAList(String),
    /// A source conf is neither a string, `{value}` nor `{subkey}`
    #[error("Invalid source conf: {0}")]
    InvalidSource(String),
    /// A `subkey` source names a field the item does not have (or that is not a string)
    #[error("Item has no string field '{0}'")]
    MissingSubkey(String),
    /// Fetching failed before any entries were produced
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// One entry of the stage's source list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SourceConf {
    Literal(String),
    Value { value: String },
    Subkey { subkey: String },
}

impl SourceConf {
    fn descriptor(&self, item: &Entry) -> Result<SourceDescriptor, StageError> {
        match self {
            SourceConf::Literal(location) | SourceConf::Value { value: location } => {
                Ok(SourceDescriptor::from(location.as_str()))
            }
            SourceConf::Subkey { subkey } => item
                .lookup(subkey)
                .and_then(Value::as_str)
                .map(SourceDescriptor::from)
                .ok_or_else(|| StageError::MissingSubkey(subkey.clone())),
        }
    }
}

/// The fetch stage as the pipeline framework invokes it: once per item.
#[derive(Debug, Clone, Default)]
pub struct FetchStage {
    options: StageConfig,
}

impl FetchStage {
    pub fn new(options: StageConfig) -> Self {
        Self { options }
    }

    /// Extracts the ordered source list from `conf`, resolving `subkey`
    /// references against `item`.
    pub fn sources(&self, conf: &Value, item: &Entry) -> Result<Vec<SourceDescriptor>, StageError> {
        let key = &self.options.extract;
        let raw = conf
            .get(key)
            .ok_or_else(|| StageError::MissingSources(key.clone()))?;

        let confs: Vec<SourceConf> = match raw {
            Value::Array(list) => list
                .iter()
                .map(parse_source_conf)
                .collect::<Result<_, _>>()?,
            single if self.options.listize => vec![parse_source_conf(single)?],
            _ => return Err(StageError::NotAList(key.clone())),
        };

        confs.iter().map(|c| c.descriptor(item)).collect()
    }

    /// Runs the stage with the blocking fetcher.
    ///
    /// Fetch failures surface while iterating the returned entries; only
    /// conf problems are reported here.
    pub fn run(
        &self,
        fetcher: &SequentialFetcher,
        conf: &Value,
        item: Entry,
        skip: bool,
    ) -> Result<FeedResult, StageError> {
        if skip {
            return Ok(fetcher.fetch(Vec::new(), true, Some(Entries::once(item))));
        }
        let sources = self.sources(conf, &item)?;
        tracing::debug!(sources = sources.len(), "Running fetch stage");
        Ok(fetcher.fetch(sources, false, None))
    }

    /// Runs the stage with the concurrent fetcher.
    pub async fn run_async(
        &self,
        fetcher: &ConcurrentFetcher,
        conf: &Value,
        item: Entry,
        skip: bool,
    ) -> Result<FeedResult, StageError> {
        if skip {
            return Ok(fetcher
                .fetch(Vec::new(), true, Some(Entries::once(item)))
                .await?);
        }
        let sources = self.sources(conf, &item)?;
        tracing::debug!(sources = sources.len(), "Running fetch stage");
        Ok(fetcher.fetch(sources, false, None).await?)
    }
}

fn parse_source_conf(raw: &Value) -> Result<SourceConf, StageError> {
    SourceConf::deserialize(raw).map_err(|_| StageError::InvalidSource(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item_with_link(link: &str) -> Entry {
        let mut item = Entry::new();
        item.insert("link", link);
        item
    }

    fn names(sources: Vec<SourceDescriptor>) -> Vec<String> {
        sources.into_iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_value_and_subkey_sources_in_order() {
        let stage = FetchStage::default();
        let conf = json!({ "url": [{ "value": "a.xml" }, { "subkey": "link" }, "c.xml"] });

        let sources = stage
            .sources(&conf, &item_with_link("https://example.com/b.xml"))
            .unwrap();
        assert_eq!(
            names(sources),
            vec!["a.xml", "https://example.com/b.xml", "c.xml"]
        );
    }

    #[test]
    fn test_single_source_is_listized() {
        let stage = FetchStage::default();
        let conf = json!({ "url": { "value": "a.xml" } });
        assert_eq!(names(stage.sources(&conf, &Entry::new()).unwrap()), vec!["a.xml"]);
    }

    #[test]
    fn test_single_source_rejected_without_listize() {
        let stage = FetchStage::new(StageConfig {
            listize: false,
            ..StageConfig::default()
        });
        let conf = json!({ "url": { "value": "a.xml" } });
        assert!(matches!(
            stage.sources(&conf, &Entry::new()),
            Err(StageError::NotAList(_))
        ));
    }

    #[test]
    fn test_custom_extract_key() {
        let stage = FetchStage::new(StageConfig {
            extract: "feeds".to_string(),
            ..StageConfig::default()
        });
        let conf = json!({ "feeds": ["a.xml"] });
        assert_eq!(names(stage.sources(&conf, &Entry::new()).unwrap()), vec!["a.xml"]);

        let conf = json!({ "url": ["a.xml"] });
        assert!(matches!(
            stage.sources(&conf, &Entry::new()),
            Err(StageError::MissingSources(k)) if k == "feeds"
        ));
    }

    #[test]
    fn test_missing_subkey() {
        let stage = FetchStage::default();
        let conf = json!({ "url": [{ "subkey": "enclosure.url" }] });
        assert!(matches!(
            stage.sources(&conf, &Entry::new()),
            Err(StageError::MissingSubkey(k)) if k == "enclosure.url"
        ));
    }

    #[test]
    fn test_nested_subkey() {
        let stage = FetchStage::default();
        let mut item = Entry::new();
        item.insert("enclosure", json!({ "url": "https://example.com/feed" }));
        let conf = json!({ "url": [{ "subkey": "enclosure.url" }] });
        assert_eq!(
            names(stage.sources(&conf, &item).unwrap()),
            vec!["https://example.com/feed"]
        );
    }

    #[test]
    fn test_invalid_source_conf() {
        let stage = FetchStage::default();
        let conf = json!({ "url": [{ "bogus": 1 }] });
        assert!(matches!(
            stage.sources(&conf, &Entry::new()),
            Err(StageError::InvalidSource(_))
        ));
    }
}
