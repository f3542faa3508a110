//! Destination resolution
//!
//! Expands the user's selection (subreddits, optional own-profile post) and
//! the composed content into one [`QueueItemData`] per destination. The
//! content kind is decided by the attached files and URL only; every
//! destination receives the same payload with its own flair and title
//! overrides.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CrosspostError, Result};
use crate::types::{profile_destination, MediaFile, PostContent, PostKind, QueueItemData};

/// Which content input the composer is in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    /// Attached files are used; the URL field is ignored
    #[default]
    Files,
    /// The URL field is used; attached files are ignored
    Url,
}

/// Everything the resolver needs to build a queue
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub subreddits: Vec<String>,
    pub post_to_profile: bool,
    /// Authenticated user's handle, required when `post_to_profile` is set
    pub username: Option<String>,
    pub media_mode: MediaMode,
    pub title: String,
    pub body: Option<String>,
    pub caption: Option<String>,
    pub url: Option<String>,
    pub files: Vec<MediaFile>,
    pub flairs: HashMap<String, String>,
    pub title_suffixes: HashMap<String, String>,
    pub custom_titles: HashMap<String, String>,
}

/// Normalize a user-typed subreddit name (`r/rust `, `/r/rust` → `rust`)
pub fn normalize_subreddit(name: &str) -> String {
    let trimmed = name.trim().trim_start_matches('/');
    trimmed
        .strip_prefix("r/")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
        .to_string()
}

/// Build the ordered destination list
pub fn destinations(request: &ResolveRequest) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut names: Vec<String> = request
        .subreddits
        .iter()
        .map(|s| normalize_subreddit(s))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect();

    if request.post_to_profile {
        let username = request
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                CrosspostError::InvalidInput(
                    "Posting to your profile requires a known username".to_string(),
                )
            })?;
        let profile = profile_destination(username);
        if seen.insert(profile.to_lowercase()) {
            names.push(profile);
        }
    }

    Ok(names)
}

/// Decide the post kind and payload shared by every destination
pub fn classify(request: &ResolveRequest) -> (PostKind, PostContent) {
    if request.media_mode == MediaMode::Files {
        match request.files.as_slice() {
            [] => {}
            [file] => {
                let kind = if file.media_type.is_video() {
                    PostKind::Video
                } else {
                    PostKind::Image
                };
                return (kind, PostContent::File(file.clone()));
            }
            files => return (PostKind::Gallery, PostContent::Files(files.to_vec())),
        }
    }

    if request.media_mode == MediaMode::Url {
        if let Some(url) = request.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return (PostKind::Link, PostContent::Url(url.to_string()));
        }
    }

    let text = request
        .body
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .or(request.caption.as_deref())
        .unwrap_or_default()
        .to_string();
    (PostKind::SelfText, PostContent::Text(text))
}

/// Expand a request into one queue item per destination
pub fn resolve(request: &ResolveRequest) -> Result<Vec<QueueItemData>> {
    let names = destinations(request)?;
    let (kind, content) = classify(request);

    debug!(
        "Resolved {} destination(s) as {} posts",
        names.len(),
        kind
    );

    let flairs = overrides(&request.flairs);
    let suffixes = overrides(&request.title_suffixes);
    let custom_titles = overrides(&request.custom_titles);

    Ok(names
        .into_iter()
        .map(|subreddit| QueueItemData {
            flair_id: lookup(&flairs, &subreddit),
            title_suffix: lookup(&suffixes, &subreddit),
            custom_title: lookup(&custom_titles, &subreddit),
            title: request.title.clone(),
            kind,
            content: content.clone(),
            subreddit,
        })
        .collect())
}

/// Per-destination overrides keyed the way destinations are deduplicated
fn overrides(map: &HashMap<String, String>) -> HashMap<String, &str> {
    map.iter()
        .map(|(name, value)| (normalize_subreddit(name).to_lowercase(), value.as_str()))
        .collect()
}

fn lookup(overrides: &HashMap<String, &str>, subreddit: &str) -> Option<String> {
    overrides.get(&subreddit.to_lowercase()).map(|v| v.to_string())
}
