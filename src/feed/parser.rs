use feed_rs::parser;
use thiserror::Error;

/// A parsed feed document, as produced by `feed-rs`.
pub type Document = feed_rs::model::Feed;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Content is not a recognizable RSS, Atom, RDF or JSON feed
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

/// Turns raw content into a structured feed document.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<Document, ParseError>;
}

/// `feed-rs` backed parser. Understands RSS 0.9x/1.0/2.0, Atom and JSON Feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedParser;

impl DocumentParser for FeedParser {
    fn parse(&self, raw: &[u8]) -> Result<Document, ParseError> {
        parser::parse(raw).map_err(|e| ParseError::Malformed(e.to_string()))
    }
}
