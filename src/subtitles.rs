//! Subtitle matcher
//!
//! Derives subtitle file candidates for a video and merges them with
//! provider downloads. Path computation is pure; the only filesystem
//! question ("does this file exist?") goes through an injected `PathProbe`.

use crate::models::{SubFormat, SubtitleCandidate, SubtitleSource};
use std::fmt;
use std::path::{Path, PathBuf};

/// Existence check capability
pub trait PathProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// Probe backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl PathProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

impl<F> PathProbe for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn exists(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Finds `dir/stem.<lang>.<ext>` files next to a video
pub struct SubtitleMatcher {
    languages: Vec<String>,
    probe: Box<dyn PathProbe>,
}

impl SubtitleMatcher {
    pub fn new(languages: Vec<String>, probe: impl PathProbe + 'static) -> Self {
        Self {
            languages,
            probe: Box::new(probe),
        }
    }

    /// Matcher probing the real filesystem
    pub fn with_fs(languages: Vec<String>) -> Self {
        Self::new(languages, FsProbe)
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Every path that could hold a subtitle for `video`, with its language.
    /// Languages in preference order, extensions in `SubFormat::LOOKUP_ORDER`.
    pub fn candidate_paths(&self, video: &Path) -> Vec<(String, PathBuf)> {
        let Some(stem) = video.file_stem().map(|s| s.to_string_lossy()) else {
            return Vec::new();
        };
        let stem: &str = &stem;
        let dir = video.parent().unwrap_or_else(|| Path::new(""));

        self.languages
            .iter()
            .flat_map(|lang| {
                SubFormat::LOOKUP_ORDER.iter().map(move |format| {
                    let name = format!("{}.{}.{}", stem, lang, format.extension());
                    (lang.clone(), dir.join(name))
                })
            })
            .collect()
    }

    /// Candidates the probe confirms
    pub fn local_candidates(&self, video: &Path) -> Vec<SubtitleCandidate> {
        self.candidate_paths(video)
            .into_iter()
            .filter(|(_, path)| self.probe.exists(path))
            .map(|(language_code, path)| SubtitleCandidate {
                path,
                language_code,
                source: SubtitleSource::Local,
            })
            .collect()
    }

    /// Local candidates first, then downloads. Only exact path duplicates are
    /// dropped; two files for the same language are both kept.
    pub fn merge(
        local: Vec<SubtitleCandidate>,
        downloaded: Vec<SubtitleCandidate>,
    ) -> Vec<SubtitleCandidate> {
        let mut merged: Vec<SubtitleCandidate> = Vec::with_capacity(local.len() + downloaded.len());
        for candidate in local.into_iter().chain(downloaded) {
            if !merged.iter().any(|c| c.path == candidate.path) {
                merged.push(candidate);
            }
        }
        merged
    }

    /// First candidate for the most preferred language that has one
    pub fn preferred<'a>(&self, candidates: &'a [SubtitleCandidate]) -> Option<&'a SubtitleCandidate> {
        self.languages
            .iter()
            .find_map(|lang| candidates.iter().find(|c| &c.language_code == lang))
            .or_else(|| candidates.first())
    }
}

impl fmt::Debug for SubtitleMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtitleMatcher")
            .field("languages", &self.languages)
            .finish_non_exhaustive()
    }
}
