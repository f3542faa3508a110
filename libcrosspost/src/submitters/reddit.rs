//! Reddit submitter
//!
//! Talks to the OAuth API with a bearer token. Text and link posts go
//! straight to `/api/submit`. Images and videos are first uploaded through a
//! media lease (`/api/media/asset.json` followed by a multipart upload to the
//! returned storage URL); galleries use `/api/submit_gallery_post.json` with
//! the uploaded asset IDs.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{Identity, Submitted, Submitter};
use crate::config::RedditConfig;
use crate::error::{CrosspostError, Result, SubmitError};
use crate::types::{MediaFile, PostContent, PostKind, QueueItemData};

const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const REDDIT_WEB_BASE: &str = "https://www.reddit.com";

type SubmitResult<T> = std::result::Result<T, SubmitError>;

/// `{"json": {"errors": [...], "data": {...}}}` envelope of `api_type=json` calls
#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    json: JsonBody,
}

#[derive(Debug, Deserialize)]
struct JsonBody {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    url: Option<String>,
    user_submitted_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaLease {
    args: LeaseArgs,
    asset: LeaseAsset,
}

#[derive(Debug, Deserialize)]
struct LeaseArgs {
    action: String,
    fields: Vec<LeaseField>,
}

#[derive(Debug, Deserialize)]
struct LeaseField {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct LeaseAsset {
    asset_id: String,
}

#[derive(Debug, Deserialize)]
struct Me {
    name: String,
}

/// An uploaded media asset
#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadedAsset {
    asset_id: String,
    url: String,
}

pub struct RedditSubmitter {
    http: Client,
    token: SecretString,
    api_base: String,
}

impl RedditSubmitter {
    /// Build a submitter from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the access token is not set.
    pub fn new(config: &RedditConfig) -> Result<Self> {
        let token = config.access_token()?;
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()
            .map_err(|e| CrosspostError::Submit(SubmitError::Network(e.to_string())))?;

        Ok(Self {
            http,
            token,
            api_base: REDDIT_API_BASE.to_string(),
        })
    }

    /// Point the client at another API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn submit_form(&self, form: Vec<(&str, String)>) -> SubmitResult<JsonBody> {
        let response = self
            .http
            .post(self.endpoint("/api/submit"))
            .bearer_auth(self.token.expose_secret())
            .form(&form)
            .send()
            .await?;

        parse_envelope(check_status(response).await?).await
    }

    async fn submit_gallery(
        &self,
        item: &QueueItemData,
        assets: &[(UploadedAsset, &MediaFile)],
    ) -> SubmitResult<JsonBody> {
        let items: Vec<serde_json::Value> = assets
            .iter()
            .map(|(asset, file)| {
                json!({
                    "media_id": asset.asset_id,
                    "caption": file.caption.clone().unwrap_or_default(),
                    "outbound_url": "",
                })
            })
            .collect();

        let body = json!({
            "sr": item.subreddit,
            "title": item.effective_title(),
            "api_type": "json",
            "show_error_list": true,
            "sendreplies": true,
            "flair_id": item.flair_id,
            "items": items,
        });

        let response = self
            .http
            .post(self.endpoint("/api/submit_gallery_post.json"))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await?;

        parse_envelope(check_status(response).await?).await
    }

    /// Request an upload lease and push the file to the returned storage URL
    async fn upload(&self, file: &MediaFile) -> SubmitResult<UploadedAsset> {
        let data = tokio::fs::read(&file.path).await.map_err(|e| {
            SubmitError::Validation(format!("Cannot read {}: {}", file.path.display(), e))
        })?;

        let response = self
            .http
            .post(self.endpoint("/api/media/asset.json"))
            .bearer_auth(self.token.expose_secret())
            .form(&[
                ("filepath", file.file_name()),
                ("mimetype", file.media_type.as_str().to_string()),
            ])
            .send()
            .await?;

        let text = check_status(response).await?.text().await?;
        let lease: MediaLease = serde_json::from_str(&text).map_err(|e| {
            SubmitError::Rejected(format!("Unexpected media lease response: {}", e))
        })?;

        let action = absolute_url(&lease.args.action);
        let key = lease
            .args
            .fields
            .iter()
            .find(|f| f.name == "key")
            .map(|f| f.value.clone())
            .ok_or_else(|| SubmitError::Rejected("Media lease has no upload key".to_string()))?;

        let mut form = reqwest::multipart::Form::new();
        for field in lease.args.fields {
            form = form.text(field.name, field.value);
        }
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file.file_name())
            .mime_str(file.media_type.as_str())
            .map_err(|e| SubmitError::Validation(format!("Invalid mime type: {}", e)))?;
        form = form.part("file", part);

        debug!("Uploading {} to {}", file.file_name(), action);
        let upload = self.http.post(&action).multipart(form).send().await?;
        if !upload.status().is_success() {
            return Err(SubmitError::Rejected(format!(
                "Media upload failed with status {}",
                upload.status()
            )));
        }

        Ok(UploadedAsset {
            asset_id: lease.asset.asset_id,
            url: format!("{}/{}", action.trim_end_matches('/'), key),
        })
    }
}

#[async_trait]
impl Submitter for RedditSubmitter {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn submit(&self, item: &QueueItemData) -> SubmitResult<Submitted> {
        item.validate()?;

        let body = match &item.content {
            PostContent::Text(text) => {
                let mut form = base_form(item);
                form.push(("text", text.clone()));
                self.submit_form(form).await?
            }
            PostContent::Url(url) => {
                let mut form = base_form(item);
                form.push(("url", url.clone()));
                self.submit_form(form).await?
            }
            PostContent::File(file) => {
                let poster = match item.kind {
                    PostKind::Video => {
                        let image = file.poster_image().ok_or_else(|| {
                            SubmitError::Validation(format!(
                                "Video post for {} needs a poster image",
                                item.subreddit
                            ))
                        })?;
                        Some(self.upload(&image).await?)
                    }
                    _ => None,
                };
                let asset = self.upload(file).await?;
                let mut form = base_form(item);
                form.push(("url", asset.url));
                if let Some(poster) = poster {
                    form.push(("video_poster_url", poster.url));
                }
                self.submit_form(form).await?
            }
            PostContent::Files(files) => {
                let mut assets = Vec::with_capacity(files.len());
                for file in files {
                    assets.push((self.upload(file).await?, file));
                }
                self.submit_gallery(item, &assets).await?
            }
        };

        let url = submitted_url(body, &item.subreddit)?;
        info!("Reddit accepted post to {}: {}", item.subreddit, url);
        Ok(Submitted { url })
    }
}

#[async_trait]
impl Identity for RedditSubmitter {
    async fn username(&self) -> Result<String> {
        let response = self
            .http
            .get(self.endpoint("/api/v1/me"))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(SubmitError::from)?;

        let text = check_status(response)
            .await?
            .text()
            .await
            .map_err(SubmitError::from)?;
        let me: Me = serde_json::from_str(&text)
            .map_err(|e| SubmitError::Rejected(format!("Unexpected /api/v1/me response: {}", e)))?;
        Ok(me.name)
    }
}

/// Form fields shared by every `/api/submit` call
fn base_form(item: &QueueItemData) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("sr", item.subreddit.clone()),
        ("kind", item.kind.as_str().to_string()),
        ("title", item.effective_title()),
        ("api_type", "json".to_string()),
        ("resubmit", "true".to_string()),
        ("sendreplies", "true".to_string()),
    ];
    if let Some(flair_id) = &item.flair_id {
        form.push(("flair_id", flair_id.clone()));
    }
    form
}

/// Map HTTP failures to submission errors
async fn check_status(response: Response) -> SubmitResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => {
            SubmitError::Authentication("Reddit rejected the access token".to_string())
        }
        StatusCode::FORBIDDEN => SubmitError::Rejected(format!("Forbidden: {}", body.trim())),
        StatusCode::TOO_MANY_REQUESTS => {
            SubmitError::RateLimit("Too many requests, try again later".to_string())
        }
        _ if status.is_server_error() => {
            SubmitError::Network(format!("Reddit server error {}", status))
        }
        _ => SubmitError::Rejected(format!("Status {}: {}", status, body.trim())),
    })
}

async fn parse_envelope(response: Response) -> SubmitResult<JsonBody> {
    let text = response.text().await?;
    let envelope: JsonEnvelope = serde_json::from_str(&text)
        .map_err(|e| SubmitError::Rejected(format!("Unexpected response: {}", e)))?;
    Ok(envelope.json)
}

/// Turn a submit response into the post URL, or the first reported error
fn submitted_url(body: JsonBody, subreddit: &str) -> SubmitResult<String> {
    if let Some(error) = body.errors.first() {
        return Err(api_error(error));
    }

    let data = body.data;
    Ok(data
        .as_ref()
        .and_then(|d| d.url.clone())
        .or_else(|| data.and_then(|d| d.user_submitted_page))
        .unwrap_or_else(|| format!("{}/r/{}", REDDIT_WEB_BASE, subreddit)))
}

/// Reddit reports errors as `[CODE, message, field]`
fn api_error(error: &[serde_json::Value]) -> SubmitError {
    let code = error.first().and_then(|v| v.as_str()).unwrap_or("UNKNOWN");
    let message = error
        .get(1)
        .and_then(|v| v.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or(code)
        .to_string();

    match code {
        "RATELIMIT" => SubmitError::RateLimit(message),
        "USER_REQUIRED" => SubmitError::Authentication(message),
        _ => SubmitError::Rejected(message),
    }
}

/// Lease actions come back protocol-relative (`//bucket.s3...`)
fn absolute_url(action: &str) -> String {
    if action.starts_with("//") {
        format!("https:{}", action)
    } else {
        action.to_string()
    }
}
