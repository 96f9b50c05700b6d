//! Input resolver
//!
//! Turns raw user input (typed URL, dropped file, CLI argument) into a
//! canonical `PlayableRef`. Classification only: the resolver never touches
//! the filesystem, so existence checks stay with the caller.

use crate::models::PlayableRef;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// URL schemes accepted as remote media
pub const REMOTE_SCHEMES: [&str; 2] = ["http", "https"];

/// Rejected playback input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Invalid input: {reason}")]
    InvalidInput { input: String, reason: String },
}

impl ResolveError {
    fn invalid(input: &str, reason: impl Into<String>) -> Self {
        ResolveError::InvalidInput {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Classifies and normalizes playback requests
#[derive(Debug, Clone, Default)]
pub struct InputResolver {
    /// Relative paths are resolved against this directory
    base_dir: Option<PathBuf>,
}

impl InputResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative local paths against `dir`
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    pub fn set_base_dir(&mut self, dir: Option<PathBuf>) {
        self.base_dir = dir;
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Classify `raw` as a remote http(s) URL or a local path
    pub fn resolve(&self, raw: &str) -> Result<PlayableRef, ResolveError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(ResolveError::invalid(raw, "empty input"));
        }

        match Url::parse(input) {
            // "C:\videos\a.mp4" parses with scheme "c"
            Ok(url) if url.scheme().len() == 1 => Ok(self.local(input)),
            Ok(url) => Self::remote(input, url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.local(input)),
            Err(url::ParseError::EmptyHost) => Err(ResolveError::invalid(raw, "URL has no host")),
            Err(e) if looks_like_url(input) => {
                Err(ResolveError::invalid(raw, format!("malformed URL: {}", e)))
            }
            Err(_) => Ok(self.local(input)),
        }
    }

    fn remote(input: &str, url: Url) -> Result<PlayableRef, ResolveError> {
        if !REMOTE_SCHEMES.contains(&url.scheme()) {
            return Err(ResolveError::invalid(
                input,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(PlayableRef::Remote(url)),
            _ => Err(ResolveError::invalid(input, "URL has no host")),
        }
    }

    fn local(&self, input: &str) -> PlayableRef {
        let path = PathBuf::from(input);
        match &self.base_dir {
            Some(base) if path.is_relative() => PlayableRef::Local(base.join(path)),
            _ => PlayableRef::Local(path),
        }
    }
}

/// `scheme://` prefix check used to tell broken URLs from odd file names
fn looks_like_url(input: &str) -> bool {
    input.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
    })
}
