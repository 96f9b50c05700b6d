//! API clients for external services
//!
//! - Subtitles: OpenSubtitles via the Stremio addon protocol

pub mod subtitles;

pub use subtitles::{StremioSubtitles, SubtitleProvider, VideoIdentity};
