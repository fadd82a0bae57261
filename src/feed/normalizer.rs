use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::feed::{Document, Entries, Entry};

/// Turns a parsed document into a lazy sequence of normalized entries.
///
/// Never fails: missing or odd fields degrade to `null`.
pub trait Normalize: Send + Sync {
    fn normalize(&self, document: Document) -> Entries;
}

/// Default normalizer.
///
/// Each feed item becomes an [`Entry`] with flattened keys (`author.name`,
/// `author.uri`) next to the nested `y:*` views downstream stages expect.
/// Items are converted one at a time as the sequence is pulled.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryNormalizer;

impl Normalize for EntryNormalizer {
    fn normalize(&self, document: Document) -> Entries {
        Entries::from_entries(document.entries.into_iter().map(normalize_entry))
    }
}

fn normalize_entry(item: feed_rs::model::Entry) -> Entry {
    let link = item
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| item.links.first())
        .map(|l| l.href.clone());
    let comments = item
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("replies"))
        .map(|l| l.href.clone());
    let title = item.title.map(|t| t.content);
    let content = item.content.and_then(|c| c.body);
    let summary = item.summary.map(|s| s.content).or_else(|| content.clone());
    let published = item.published.or(item.updated);
    let updated = item.updated.or(item.published);
    let author = item.authors.into_iter().next();
    let author_name = author.as_ref().map(|a| a.name.clone());
    let author_uri = author.and_then(|a| a.uri);

    let existing_id = if item.id.is_empty() {
        None
    } else {
        Some(item.id.as_str())
    };
    let id = generate_guid(
        existing_id,
        link.as_deref(),
        title.as_deref().unwrap_or(""),
        published.map(|dt| dt.timestamp()),
    );

    // Every entry carries the same keys; absent values are null
    let mut entry = Entry::new();
    entry.insert("title", title.clone());
    entry.insert("link", link.clone());
    entry.insert("summary", summary);
    entry.insert("content", content);
    entry.insert("comments", comments);
    entry.insert("updated", updated.map(|dt| dt.to_rfc3339()));
    entry.insert("updated_parsed", updated.map(|dt| dt.timestamp()));
    entry.insert("published", published.map(|dt| dt.to_rfc3339()));
    entry.insert("published_parsed", published.map(|dt| dt.timestamp()));
    entry.insert("pubDate", published.map(|dt| dt.to_rfc2822()));
    entry.insert("y:published", published.map(date_parts));
    entry.insert("author", author_name.clone());
    entry.insert("author.name", author_name.clone());
    entry.insert("author.uri", author_uri);
    entry.insert("dc:creator", author_name);
    entry.insert(
        "y:id",
        json!({
            "value": id,
            "permalink": link.as_deref() == Some(id.as_str()),
        }),
    );
    entry.insert("id", id);
    entry.insert("y:title", title);
    entry
}

fn date_parts(dt: DateTime<Utc>) -> Value {
    json!({
        "year": dt.year(),
        "month": dt.month(),
        "day": dt.day(),
        "hour": dt.hour(),
        "minute": dt.minute(),
        "second": dt.second(),
        "day_of_week": dt.weekday().num_days_from_monday(),
        "day_of_year": dt.ordinal(),
        "utime": dt.timestamp(),
    })
}

/// Stable identifier for an item.
///
/// Uses the feed's own id when it has one, otherwise a SHA-256 over link,
/// title and publication time so repeated fetches agree.
fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
