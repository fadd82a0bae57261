use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::ResolveConfig;

/// One configured feed location, exactly as the pipeline supplied it.
///
/// Cloning is cheap (`Arc<str>`), so descriptors can be moved into lazy
/// per-source closures without copying the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDescriptor(Arc<str>);

impl SourceDescriptor {
    pub fn new(location: impl Into<Arc<str>>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceDescriptor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceDescriptor {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Errors that can occur while turning a source descriptor into a location.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The descriptor was empty or whitespace.
    #[error("Empty source location")]
    Empty,
    /// The descriptor looked like a URL but could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http, https or file.
    #[error("Unsupported scheme: {0} (only http/https/file allowed)")]
    UnsupportedScheme(String),
    /// A filesystem path could not be expressed as a `file://` URL.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Maps a source descriptor to an absolute, fetchable location.
pub trait Resolve: Send + Sync {
    fn resolve(&self, source: &SourceDescriptor) -> Result<Url, ResolveError>;
}

/// Default resolver.
///
/// Absolute `http`, `https` and `file` URLs are kept as they are. Anything
/// without a scheme is a filesystem path: absolute paths are used directly,
/// relative ones are joined onto `base_dir` (the working directory when
/// unset) and converted to a `file://` URL.
///
/// With `deny_private_hosts` set, HTTP(S) URLs that point at localhost or a
/// private network are rejected to prevent SSRF through pipeline input.
#[derive(Debug, Clone, Default)]
pub struct SourceResolver {
    base_dir: Option<PathBuf>,
    deny_private_hosts: bool,
}

impl SourceResolver {
    pub fn new(config: &ResolveConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            deny_private_hosts: config.deny_private_hosts,
        }
    }

    fn resolve_path(&self, raw: &str) -> Result<Url, ResolveError> {
        let path = Path::new(raw);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            let base = match &self.base_dir {
                Some(dir) => dir.clone(),
                None => std::env::current_dir()
                    .map_err(|e| ResolveError::InvalidPath(format!("{}: {}", raw, e)))?,
            };
            base.join(path)
        };

        Url::from_file_path(&absolute)
            .map_err(|_| ResolveError::InvalidPath(absolute.display().to_string()))
    }

    fn check_host(&self, url: &Url) -> Result<(), ResolveError> {
        if !self.deny_private_hosts || url.scheme() == "file" {
            return Ok(());
        }

        if let Some(host) = url.host_str() {
            if host == "localhost" {
                return Err(ResolveError::Localhost);
            }

            // Strip brackets from IPv6 addresses for parsing
            let host_for_parse = host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host);

            if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
                if ip.is_loopback() {
                    return Err(ResolveError::Localhost);
                }
                if is_private_ip(&ip) {
                    return Err(ResolveError::PrivateIp(ip.to_string()));
                }
            }
        }

        Ok(())
    }
}

impl Resolve for SourceResolver {
    fn resolve(&self, source: &SourceDescriptor) -> Result<Url, ResolveError> {
        let raw = source.as_str().trim();
        if raw.is_empty() {
            return Err(ResolveError::Empty);
        }

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => return self.resolve_path(raw),
            Err(e) => return Err(ResolveError::InvalidUrl(e)),
        };

        match url.scheme() {
            "http" | "https" | "file" => {}
            // Windows drive letters parse as a one-letter scheme
            scheme if scheme.len() == 1 && cfg!(windows) => return self.resolve_path(raw),
            scheme => return Err(ResolveError::UnsupportedScheme(scheme.to_owned())),
        }

        self.check_host(&url)?;
        Ok(url)
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
