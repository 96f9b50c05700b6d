//! Stremio Subtitle Provider
//!
//! Free subtitle lookup using Stremio's public OpenSubtitles v3 addon.
//! No API key required. Videos are identified by IMDB ID when known,
//! otherwise by their OpenSubtitles hash, size and file name.
//!
//! Downloads are cached in ~/.cache/castplay/subtitles/

use crate::models::{SubtitleCandidate, SubtitleSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Bytes hashed from each end of the file
const HASH_CHUNK_SIZE: u64 = 64 * 1024;

/// Errors from subtitle lookup and download
#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("Subtitle request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Subtitle provider returned status {0}")]
    Status(u16),
    #[error("Subtitle cache error: {0}")]
    Io(#[from] io::Error),
    #[error("Video has neither an IMDB ID nor a hash")]
    NoIdentity,
}

// =============================================================================
// Video Identity
// =============================================================================

/// What a provider needs to find subtitles for one video
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoIdentity {
    pub file_name: String,
    pub size: u64,
    /// OpenSubtitles hash, hex encoded
    pub hash: Option<String>,
    pub imdb_id: Option<String>,
}

impl VideoIdentity {
    /// Identity of a local file. Blocking: reads 128 KiB of the file.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        let hash = opensubtitles_hash(&mut file, size)?.map(|h| format!("{:016x}", h));

        Ok(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
            hash,
            imdb_id: None,
        })
    }

    /// Stem used to name cached downloads
    fn cache_stem(&self) -> String {
        Path::new(&self.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "video".to_string())
    }
}

/// OpenSubtitles hash: file size plus the wrapping sum of the first and last
/// 64 KiB read as little-endian u64 words. None for files under 64 KiB.
pub fn opensubtitles_hash<R: Read + Seek>(reader: &mut R, size: u64) -> io::Result<Option<u64>> {
    if size < HASH_CHUNK_SIZE {
        return Ok(None);
    }

    let mut hash = size;
    for offset in [0, size - HASH_CHUNK_SIZE] {
        reader.seek(SeekFrom::Start(offset))?;
        let mut chunk = vec![0u8; HASH_CHUNK_SIZE as usize];
        reader.read_exact(&mut chunk)?;
        for word in chunk.chunks_exact(8) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(word);
            hash = hash.wrapping_add(u64::from_le_bytes(bytes));
        }
    }

    Ok(Some(hash))
}

// =============================================================================
// Provider Capability
// =============================================================================

/// Fetches subtitle files for a video
#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    async fn query(&self, video: &VideoIdentity) -> Result<Vec<SubtitleCandidate>, SubtitleError>;
}

/// Query `provider`, degrading any failure to an empty list
pub async fn query_or_empty(
    provider: &dyn SubtitleProvider,
    video: &VideoIdentity,
) -> Vec<SubtitleCandidate> {
    match provider.query(video).await {
        Ok(found) => found,
        Err(e) => {
            warn!(file = %video.file_name, error = %e, "subtitle lookup failed");
            Vec::new()
        }
    }
}

// =============================================================================
// Stremio Client
// =============================================================================

/// Stremio subtitle response
#[derive(Debug, Deserialize)]
struct StremioResponse {
    subtitles: Vec<StremioSubtitle>,
}

/// Single subtitle from Stremio
#[derive(Debug, Deserialize)]
struct StremioSubtitle {
    id: String,
    url: String,
    lang: String,
}

/// Subtitle provider using Stremio's free public endpoint
pub struct StremioSubtitles {
    base_url: String,
    client: reqwest::Client,
    cache_dir: PathBuf,
    /// Configured 2-letter codes, preference order
    languages: Vec<String>,
    /// Downloads kept per language
    per_language: usize,
}

impl StremioSubtitles {
    /// Create a new provider (free, no API key)
    pub fn new(languages: Vec<String>) -> Self {
        Self::with_base_url("https://opensubtitles-v3.strem.io", languages)
    }

    /// Create with custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>, languages: Vec<String>) -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("castplay")
            .join("subtitles");

        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            cache_dir,
            languages,
            per_language: 1,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_per_language(mut self, count: usize) -> Self {
        self.per_language = count.max(1);
        self
    }

    /// Addon URL for `video`
    fn lookup_url(&self, video: &VideoIdentity) -> Result<String, SubtitleError> {
        let id = match (&video.imdb_id, &video.hash) {
            (Some(imdb), _) => normalize_imdb_id(imdb),
            (None, Some(hash)) => hash.clone(),
            (None, None) => return Err(SubtitleError::NoIdentity),
        };

        let mut extra = Vec::new();
        if let Some(hash) = &video.hash {
            extra.push(format!("videoHash={}", hash));
        }
        if video.size > 0 {
            extra.push(format!("videoSize={}", video.size));
        }
        if !video.file_name.is_empty() {
            extra.push(format!("filename={}", urlencoding::encode(&video.file_name)));
        }

        Ok(if extra.is_empty() {
            format!("{}/subtitles/movie/{}.json", self.base_url, id)
        } else {
            format!("{}/subtitles/movie/{}/{}.json", self.base_url, id, extra.join("&"))
        })
    }

    /// Fetch the subtitle listing for `video`
    async fn search(&self, video: &VideoIdentity) -> Result<Vec<StremioSubtitle>, SubtitleError> {
        let url = self.lookup_url(video)?;
        debug!(url = %url, "querying subtitles");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SubtitleError::Status(response.status().as_u16()));
        }

        let listing: StremioResponse = response.json().await?;
        Ok(listing.subtitles)
    }

    /// Download one subtitle into the cache, reusing a cached copy
    async fn download(&self, subtitle: &StremioSubtitle, target: &Path) -> Result<(), SubtitleError> {
        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            return Ok(());
        }

        let response = self.client.get(&subtitle.url).send().await?;
        if !response.status().is_success() {
            return Err(SubtitleError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, &body).await?;
        Ok(())
    }
}

#[async_trait]
impl SubtitleProvider for StremioSubtitles {
    async fn query(&self, video: &VideoIdentity) -> Result<Vec<SubtitleCandidate>, SubtitleError> {
        let listing = self.search(video).await?;
        let stem = video.cache_stem();
        let mut found = Vec::new();

        for lang in &self.languages {
            let matching = listing
                .iter()
                .filter(|s| language_matches(lang, &s.lang))
                .take(self.per_language);

            for subtitle in matching {
                let target = self
                    .cache_dir
                    .join(format!("{}.{}.{}.srt", stem, lang, sanitize_id(&subtitle.id)));

                match self.download(subtitle, &target).await {
                    Ok(()) => found.push(SubtitleCandidate {
                        path: target,
                        language_code: lang.clone(),
                        source: SubtitleSource::Downloaded,
                    }),
                    Err(e) => warn!(id = %subtitle.id, error = %e, "subtitle download failed"),
                }
            }
        }

        Ok(found)
    }
}

/// Normalize IMDB ID to have "tt" prefix
fn normalize_imdb_id(imdb_id: &str) -> String {
    if imdb_id.starts_with("tt") {
        imdb_id.to_string()
    } else {
        format!("tt{}", imdb_id)
    }
}

/// Keep subtitle ids safe as file name parts
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Does a provider language (usually ISO 639-2) match a configured code?
pub fn language_matches(configured: &str, provided: &str) -> bool {
    let base = configured.split('-').next().unwrap_or(configured);
    let provided = provided.to_lowercase();

    provided == configured
        || provided == base
        || iso639_2_codes(base).contains(&provided.as_str())
}

/// ISO 639-2 (bibliographic and terminology) codes for a 2-letter code
fn iso639_2_codes(code: &str) -> &'static [&'static str] {
    match code {
        "en" => &["eng"],
        "de" => &["ger", "deu"],
        "fr" => &["fre", "fra"],
        "es" => &["spa"],
        "it" => &["ita"],
        "pt" => &["por", "pob"],
        "ru" => &["rus"],
        "ja" => &["jpn"],
        "ko" => &["kor"],
        "zh" => &["chi", "zho"],
        "ar" => &["ara"],
        "hi" => &["hin"],
        "nl" => &["dut", "nld"],
        "pl" => &["pol"],
        "tr" => &["tur"],
        "sv" => &["swe"],
        "no" => &["nor"],
        "da" => &["dan"],
        "fi" => &["fin"],
        "el" => &["gre", "ell"],
        "he" => &["heb"],
        "hu" => &["hun"],
        "cs" => &["cze", "ces"],
        "ro" => &["rum", "ron"],
        "bg" => &["bul"],
        "hr" => &["hrv"],
        "sl" => &["slv"],
        "sr" => &["srp"],
        "uk" => &["ukr"],
        "vi" => &["vie"],
        "th" => &["tha"],
        "id" => &["ind"],
        "ms" => &["may", "msa"],
        "is" => &["ice", "isl"],
        _ => &[],
    }
}
