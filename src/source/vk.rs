// src/source/vk.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::channel::ChannelRef;
use crate::error::{FetchError, FormatError};
use crate::source::{Attachment, GroupInfo, PhotoSize, RawPost, SourceClient, WallFilter};

pub const DEFAULT_API_BASE: &str = "https://api.vk.com/method";
pub const API_VERSION: &str = "5.199";

// VK error codes we treat specially.
const RATE_LIMIT_CODES: [i64; 2] = [6, 29];
const INVALID_CHANNEL_CODES: [i64; 5] = [15, 18, 30, 100, 203];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GroupsResponse {
    // API >= 5.139
    Wrapped { groups: Vec<VkGroup> },
    Flat(Vec<VkGroup>),
}

#[derive(Debug, Deserialize)]
struct VkGroup {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct WallResponse {
    #[serde(default)]
    items: Vec<VkPost>,
}

#[derive(Debug, Deserialize)]
struct VkPost {
    id: i64,
    owner_id: i64,
    #[serde(default)]
    from_id: i64,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<Value>,
    #[serde(default)]
    is_pinned: u8,
}

/// Client for the VK wall API.
#[derive(Clone)]
pub struct VkClient {
    http: reqwest::Client,
    base: String,
    token: String,
    filter: WallFilter,
    timeout: Duration,
}

impl VkClient {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: DEFAULT_API_BASE.to_string(),
            token,
            filter: WallFilter::Owner,
            timeout: Duration::from_secs(30),
        }
    }

    /// Point the client at a different API root (tests, proxies).
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_filter(mut self, filter: WallFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        subject: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let t0 = std::time::Instant::now();
        let url = format!("{}/{}", self.base, method);
        let rsp = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .query(params)
            .query(&[("access_token", self.token.as_str()), ("v", API_VERSION)])
            .send()
            .await?;
        let status = rsp.status();
        let body = rsp.text().await?;
        histogram!("relay_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let env: Envelope<T> = serde_json::from_str(&body).map_err(|e| FetchError::Decode {
            method: method.to_string(),
            reason: format!("status {status}: {e}"),
        })?;

        if let Some(err) = env.error {
            return Err(map_api_error(method, subject, err));
        }
        env.response.ok_or_else(|| FetchError::Decode {
            method: method.to_string(),
            reason: format!("status {status}: no `response` field"),
        })
    }
}

fn map_api_error(method: &str, subject: &str, err: ApiError) -> FetchError {
    if RATE_LIMIT_CODES.contains(&err.error_code) {
        FetchError::RateLimited {
            method: method.to_string(),
            message: err.error_msg,
        }
    } else if INVALID_CHANNEL_CODES.contains(&err.error_code) {
        FetchError::InvalidChannel {
            channel: subject.to_string(),
            reason: format!("{} ({})", err.error_msg, err.error_code),
        }
    } else {
        FetchError::Api {
            method: method.to_string(),
            code: err.error_code,
            message: err.error_msg,
        }
    }
}

#[async_trait]
impl SourceClient for VkClient {
    async fn resolve(&self, channel: &ChannelRef) -> Result<GroupInfo, FetchError> {
        let subject = channel.to_string();
        let rsp: GroupsResponse = self
            .call(
                "groups.getById",
                &subject,
                &[("group_id", subject.clone()), ("fields", "screen_name".into())],
            )
            .await?;

        let groups = match rsp {
            GroupsResponse::Wrapped { groups } => groups,
            GroupsResponse::Flat(groups) => groups,
        };
        let group = groups
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::InvalidChannel {
                channel: subject.clone(),
                reason: "no such community".into(),
            })?;

        let id = group.id.checked_abs().ok_or_else(|| FetchError::Decode {
            method: "groups.getById".into(),
            reason: format!("community id {} out of range", group.id),
        })?;
        Ok(GroupInfo {
            id,
            screen_name: group.screen_name,
            name: group.name,
        })
    }

    async fn latest_posts(&self, channel_id: i64, count: u32) -> Result<Vec<RawPost>, FetchError> {
        let owner_id = channel_id
            .checked_abs()
            .map(|id| -id)
            .ok_or_else(|| FetchError::InvalidChannel {
                channel: channel_id.to_string(),
                reason: "community id out of range".into(),
            })?;
        let rsp: WallResponse = self
            .call(
                "wall.get",
                &channel_id.to_string(),
                &[
                    ("owner_id", owner_id.to_string()),
                    ("count", count.to_string()),
                    ("filter", self.filter.as_str().to_string()),
                ],
            )
            .await?;

        let posts: Vec<RawPost> = rsp.items.into_iter().map(into_raw_post).collect();
        counter!("relay_posts_fetched_total").increment(posts.len() as u64);
        Ok(posts)
    }

    fn name(&self) -> &'static str {
        "vk"
    }
}

fn into_raw_post(p: VkPost) -> RawPost {
    let attachments = p
        .attachments
        .iter()
        .map(|v| match decode_attachment(v) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(
                    target: "relay",
                    owner_id = p.owner_id,
                    post_id = p.id,
                    error = %e,
                    "unreadable attachment, treating as no media"
                );
                Attachment::Unsupported(attachment_kind(v).to_string())
            }
        })
        .collect();

    RawPost {
        id: p.id,
        owner_id: p.owner_id,
        from_id: p.from_id,
        created_at: DateTime::<Utc>::from_timestamp(p.date, 0).unwrap_or_default(),
        text: p.text,
        attachments,
        pinned: p.is_pinned != 0,
    }
}

fn attachment_kind(v: &Value) -> &str {
    v.get("type").and_then(Value::as_str).unwrap_or("unknown")
}

/// Decode one `attachments[]` entry. Unknown kinds are not an error.
pub fn decode_attachment(v: &Value) -> Result<Attachment, FormatError> {
    let kind = attachment_kind(v);
    let malformed = |reason: &str| FormatError::MalformedAttachment {
        kind: kind.to_string(),
        reason: reason.to_string(),
    };

    match kind {
        "photo" => {
            let sizes = v
                .pointer("/photo/sizes")
                .and_then(Value::as_array)
                .ok_or_else(|| malformed("missing photo.sizes"))?;
            let sizes = sizes
                .iter()
                .filter_map(|s| {
                    Some(PhotoSize {
                        kind: s.get("type")?.as_str()?.to_string(),
                        url: s.get("url")?.as_str()?.to_string(),
                        width: s.get("width").and_then(Value::as_u64).unwrap_or(0) as u32,
                        height: s.get("height").and_then(Value::as_u64).unwrap_or(0) as u32,
                    })
                })
                .collect::<Vec<_>>();
            if sizes.is_empty() {
                return Err(malformed("no usable size variants"));
            }
            Ok(Attachment::Photo { sizes })
        }
        "video" => Ok(Attachment::Video {
            title: v
                .pointer("/video/title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "link" => {
            let url = v
                .pointer("/link/url")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing link.url"))?;
            Ok(Attachment::Link {
                url: url.to_string(),
                title: v
                    .pointer("/link/title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        other => Ok(Attachment::Unsupported(other.to_string())),
    }
}
