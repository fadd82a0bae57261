//! Feed fetching: resolve, read, parse, normalize and merge.
//!
//! Each configured source goes through the same chain:
//!
//! - [`resolver`] - source descriptor to absolute location
//! - [`reader`] - location to raw bytes (blocking and async variants)
//! - [`parser`] - raw bytes to a document using the `feed-rs` crate
//! - [`normalizer`] - document to a lazy sequence of [`Entry`] values
//!
//! The per-source sequences are concatenated in source order by [`merge`].
//!
//! Two fetchers drive the chain:
//!
//! - [`SequentialFetcher`] - blocking, opens each source only when the
//!   consumer reaches it
//! - [`ConcurrentFetcher`] - async, reads every source at once and returns
//!   after the last one arrives
//!
//! Both hand back a [`FeedResult`] and honor the skip flag by passing the
//! caller's fallback entries through without touching any source.
//!
//! # Example
//!
//! ```ignore
//! use feedpipe::config::Config;
//! use feedpipe::feed::{SequentialFetcher, SourceDescriptor};
//!
//! let fetcher = SequentialFetcher::from_config(&Config::default())?;
//! let result = fetcher.fetch(vec![SourceDescriptor::from("feed.xml")], false, None);
//! for entry in result.entries {
//!     println!("{:?}", entry?.title());
//! }
//! ```

mod concurrent;
mod entry;
mod fetcher;
pub mod merge;
mod normalizer;
mod parser;
mod reader;
mod resolver;

pub use concurrent::ConcurrentFetcher;
pub use entry::{Entries, Entry, FeedResult};
pub use fetcher::{Collaborators, FetchError, SequentialFetcher};
pub use merge::merge;
pub use normalizer::{EntryNormalizer, Normalize};
pub use parser::{Document, DocumentParser, FeedParser, ParseError};
pub use reader::{AsyncContentReader, BlockingReader, ContentReader, HttpReader, ReadError};
pub use resolver::{Resolve, ResolveError, SourceDescriptor, SourceResolver};
