//! # Post formatting
//! Pure, deterministic rendering of a wall post into an [`OutboundMessage`].
//!
//! Lengths are counted in Unicode scalar values (`char`s), so truncation is
//! stable regardless of byte width.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::channel::ChannelMeta;
use crate::classify::Category;
use crate::delivery::Destination;
use crate::source::{Attachment, PhotoSize, RawPost};

pub const ELLIPSIS: &str = "...";
pub const DEFAULT_DISPLAY_NAME: &str = "VK Bot";
pub const MAX_DISPLAY_NAME_CHARS: usize = 32;

const COLOR_NORMAL: u32 = 0x4A76A8;
const COLOR_CALENDAR: u32 = 0xF1C40F;

/// `[format]` section of the config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub max_text_chars: usize,
    pub max_photos: usize,
    /// Named size tags, best first.
    pub photo_size_priority: Vec<String>,
    pub include_photos: bool,
    pub include_links: bool,
    pub max_links: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_text_chars: 1800,
            max_photos: 9,
            photo_size_priority: ["z", "y", "x", "w", "r"].map(String::from).to_vec(),
            include_photos: true,
            include_links: true,
            max_links: 3,
        }
    }
}

/// Destination-ready message. Transport encoding lives in `delivery`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub category: Category,
    /// Per-channel destination override, if configured.
    pub destination: Option<Destination>,
    pub display_name: String,
    pub title: String,
    pub body_text: String,
    pub media_refs: Vec<String>,
    pub link_refs: Vec<String>,
    pub post_url: String,
    pub channel_url: String,
    pub accent_color: u32,
    pub created_at: DateTime<Utc>,
}

pub trait Formatter: Send + Sync {
    fn format(&self, post: &RawPost, channel: &ChannelMeta, category: Category) -> OutboundMessage;
}

/// Default strategy, styled for Discord embeds.
#[derive(Debug, Clone, Default)]
pub struct DiscordFormatter {
    opts: FormatOptions,
}

impl DiscordFormatter {
    pub fn new(opts: FormatOptions) -> Self {
        Self { opts }
    }
}

impl Formatter for DiscordFormatter {
    fn format(&self, post: &RawPost, channel: &ChannelMeta, category: Category) -> OutboundMessage {
        let (title, accent_color) = match category {
            Category::Calendar => ("🗓 Event", COLOR_CALENDAR),
            _ => ("📢 New post", COLOR_NORMAL),
        };

        let media_refs = if self.opts.include_photos {
            extract_photo_urls(
                &post.attachments,
                &self.opts.photo_size_priority,
                self.opts.max_photos,
            )
        } else {
            Vec::new()
        };
        let link_refs = if self.opts.include_links {
            extract_link_urls(&post.attachments, self.opts.max_links)
        } else {
            Vec::new()
        };

        OutboundMessage {
            category,
            destination: channel.destination.clone(),
            display_name: sanitize_display_name(&channel.display_name),
            title: title.to_string(),
            body_text: truncate_text(&post.text, self.opts.max_text_chars),
            media_refs,
            link_refs,
            post_url: post_url(post.owner_id, post.id),
            channel_url: channel.url(),
            accent_color,
            created_at: post.created_at,
        }
    }
}

/// Cut `text` to at most `max` chars; when cut, the result ends in [`ELLIPSIS`].
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let marker_len = ELLIPSIS.chars().count();
    if max <= marker_len {
        return ELLIPSIS.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - marker_len).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Keep alphanumerics, space, `-` and `_`; fall back to [`DEFAULT_DISPLAY_NAME`].
pub fn sanitize_display_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim();
    let name = if cleaned.is_empty() {
        DEFAULT_DISPLAY_NAME
    } else {
        cleaned
    };
    name.chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}

/// Canonical `https://vk.com/wall{owner}_{id}` link.
pub fn post_url(owner_id: i64, post_id: i64) -> String {
    format!("https://vk.com/wall{owner_id}_{post_id}")
}

/// Best size by named priority, else the last declared size.
pub fn select_photo_size<'a>(sizes: &'a [PhotoSize], priority: &[String]) -> Option<&'a PhotoSize> {
    priority
        .iter()
        .find_map(|tag| sizes.iter().find(|s| &s.kind == tag))
        .or_else(|| sizes.last())
}

/// One URL per photo, in attachment order, across all attachments, up to `cap`.
pub fn extract_photo_urls(attachments: &[Attachment], priority: &[String], cap: usize) -> Vec<String> {
    attachments
        .iter()
        .filter_map(|a| match a {
            Attachment::Photo { sizes } => select_photo_size(sizes, priority),
            _ => None,
        })
        .map(|s| s.url.clone())
        .take(cap)
        .collect()
}

pub fn extract_link_urls(attachments: &[Attachment], cap: usize) -> Vec<String> {
    attachments
        .iter()
        .filter_map(|a| match a {
            Attachment::Link { url, .. } if !url.is_empty() => Some(url.clone()),
            _ => None,
        })
        .take(cap)
        .collect()
}
