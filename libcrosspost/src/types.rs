//! Core types for Crosspost

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SubmitError;

/// Prefix Reddit uses for a user's profile subreddit (`u_<handle>`)
pub const PROFILE_PREFIX: &str = "u_";

/// Build the destination name for posting to a user's own profile
pub fn profile_destination(username: &str) -> String {
    format!("{}{}", PROFILE_PREFIX, username.trim_start_matches("u/"))
}

/// Returns true if the destination addresses a user profile rather than a subreddit
pub fn is_profile_destination(subreddit: &str) -> bool {
    subreddit.starts_with(PROFILE_PREFIX)
}

/// Kind of Reddit post
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    #[serde(rename = "self")]
    SelfText,
    Link,
    Image,
    Video,
    Gallery,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfText => "self",
            Self::Link => "link",
            Self::Image => "image",
            Self::Video => "video",
            Self::Gallery => "gallery",
        }
    }
}

impl std::fmt::Display for PostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported media types for uploads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
    WebP,
    Mp4,
    Mov,
    WebM,
}

impl MediaType {
    /// Parse media type from a MIME string (e.g., "image/jpeg")
    pub fn from_mime_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            "video/mp4" => Some(Self::Mp4),
            "video/quicktime" => Some(Self::Mov),
            "video/webm" => Some(Self::WebM),
            _ => None,
        }
    }

    /// Detect media type from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            "mp4" => Some(Self::Mp4),
            "mov" => Some(Self::Mov),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Mp4 => "video/mp4",
            Self::Mov => "video/quicktime",
            Self::WebM => "video/webm",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Mov | Self::WebM)
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local file to upload with a post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub media_type: MediaType,
    pub caption: Option<String>,
    /// Still image shown before a video plays; Reddit requires one for videos
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<PathBuf>,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>, media_type: MediaType) -> Self {
        Self {
            path: path.into(),
            media_type,
            caption: None,
            poster: None,
        }
    }

    /// Build a media file, detecting its type from the file extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let media_type = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaType::from_extension)?;
        Some(Self::new(path, media_type))
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_poster(mut self, poster: impl Into<PathBuf>) -> Self {
        self.poster = Some(poster.into());
        self
    }

    /// The poster frame as an uploadable image, if it is one
    pub fn poster_image(&self) -> Option<MediaFile> {
        self.poster
            .as_deref()
            .and_then(|path| MediaFile::from_path(path))
            .filter(|poster| !poster.media_type.is_video())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    }
}

/// The payload of a queue item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PostContent {
    Text(String),
    Url(String),
    File(MediaFile),
    Files(Vec<MediaFile>),
}

/// One planned post to one destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueItemData {
    pub subreddit: String,
    pub title: String,
    pub flair_id: Option<String>,
    pub title_suffix: Option<String>,
    pub custom_title: Option<String>,
    pub kind: PostKind,
    pub content: PostContent,
}

impl QueueItemData {
    /// Title sent to Reddit: the custom title if set, otherwise the base title
    /// followed by the destination's suffix
    pub fn effective_title(&self) -> String {
        if let Some(custom) = self.custom_title.as_deref().filter(|t| !t.trim().is_empty()) {
            return custom.to_string();
        }
        match self.title_suffix.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(suffix) => format!("{} {}", self.title, suffix),
            None => self.title.clone(),
        }
    }

    pub fn is_profile(&self) -> bool {
        is_profile_destination(&self.subreddit)
    }

    /// Check that the payload matches `kind`
    pub fn validate(&self) -> std::result::Result<(), SubmitError> {
        let consistent = match (&self.kind, &self.content) {
            (PostKind::SelfText, PostContent::Text(_)) => true,
            (PostKind::Link, PostContent::Url(_)) => true,
            (PostKind::Image, PostContent::File(f)) => !f.media_type.is_video(),
            (PostKind::Video, PostContent::File(f)) => f.media_type.is_video(),
            (PostKind::Gallery, PostContent::Files(files)) => !files.is_empty(),
            _ => false,
        };

        if !consistent {
            return Err(SubmitError::Validation(format!(
                "{} post for {} carries a mismatched payload",
                self.kind, self.subreddit
            )));
        }

        if let (PostKind::Video, PostContent::File(video)) = (&self.kind, &self.content) {
            if video.poster_image().is_none() {
                return Err(SubmitError::Validation(format!(
                    "Video post for {} needs a poster image (jpeg, png, gif or webp)",
                    self.subreddit
                )));
            }
        }

        Ok(())
    }
}
