// src/source/mod.rs
pub mod vk;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::channel::ChannelRef;
use crate::error::FetchError;

/// Community metadata returned by resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: i64,
    pub screen_name: String,
    pub name: String,
}

/// Which wall posts to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WallFilter {
    /// Only posts authored by the community itself.
    #[default]
    Owner,
    All,
}

impl WallFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            WallFilter::Owner => "owner",
            WallFilter::All => "all",
        }
    }
}

/// One size variant of a photo, e.g. `z` at 1280px.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoSize {
    pub kind: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Photo { sizes: Vec<PhotoSize> },
    Video { title: String },
    Link { url: String, title: String },
    /// Anything else, including attachments whose shape we could not read.
    Unsupported(String),
}

/// A wall post as fetched. Transient: lives for one polling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPost {
    pub id: i64,
    /// Wall owner; negative for community walls.
    pub owner_id: i64,
    /// Author; negative when the community posted it.
    pub from_id: i64,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub pinned: bool,
}

impl RawPost {
    pub fn is_community_authored(&self) -> bool {
        self.from_id < 0
    }
}

/// Latest post of a listing. Wall ids grow monotonically, so the highest id
/// wins regardless of where a pinned post sits.
pub fn newest(posts: &[RawPost]) -> Option<&RawPost> {
    posts.iter().max_by_key(|p| (p.id, p.created_at))
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Resolve a configured reference to a numeric community id.
    async fn resolve(&self, channel: &ChannelRef) -> Result<GroupInfo, FetchError>;

    /// Most recent `count` posts from the wall of community `channel_id`.
    /// A pinned post, however old, is listed first; use [`newest`] to pick
    /// the latest one.
    async fn latest_posts(&self, channel_id: i64, count: u32) -> Result<Vec<RawPost>, FetchError>;

    fn name(&self) -> &'static str;
}
