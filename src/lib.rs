//! # feedpipe
//!
//! A pipeline stage that fetches one or more RSS/Atom feeds and presents
//! their entries as a single lazy sequence.
//!
//! ```text
//! sources → resolve → read → parse → normalize → merge → entries
//! ```
//!
//! - [`feed`]: the fetch chain, the merger and both fetchers
//! - [`stage`]: pipeline conf/item adapter
//! - [`config`]: TOML configuration

pub mod config;
pub mod feed;
pub mod stage;
