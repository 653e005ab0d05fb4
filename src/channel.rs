// src/channel.rs
//! Tracked channels: how they are referenced in config and what we know about
//! them once resolved against the upstream API.

use std::fmt;

use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::{error, info};

use crate::delivery::Destination;
use crate::source::SourceClient;

/// A channel as written in config. Parsed once; never re-guessed at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelRef {
    /// Screen name such as `durov` or `club1`.
    Handle(String),
    /// Positive community id.
    NumericId(i64),
}

impl ChannelRef {
    /// Accepts `name`, `vk.com/name`, `https://vk.com/name`, `123` and `-123`.
    /// Returns `None` for values that are empty after stripping.
    pub fn parse(raw: &str) -> Option<Self> {
        static RE_PREFIX: OnceCell<Regex> = OnceCell::new();
        let re = RE_PREFIX.get_or_init(|| {
            Regex::new(r"(?i)^(?:https?://)?(?:m\.|www\.)?vk\.com/").expect("vk prefix regex")
        });

        let trimmed = raw.trim();
        let stripped = re.replace(trimmed, "");
        let value = stripped.trim_matches('/').trim();
        if value.is_empty() {
            return None;
        }

        match value.parse::<i64>() {
            Ok(0) => None,
            Ok(id) => id.checked_abs().map(ChannelRef::NumericId),
            Err(_) => Some(ChannelRef::Handle(value.to_string())),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Handle(h) => write!(f, "{h}"),
            ChannelRef::NumericId(id) => write!(f, "{id}"),
        }
    }
}

/// One configured channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub reference: ChannelRef,
    pub display_name: Option<String>,
    pub destination: Option<Destination>,
}

/// A channel after resolution: numeric id plus presentation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    /// Positive community id. Wall owner id is `-id`.
    pub id: i64,
    pub screen_name: String,
    pub display_name: String,
    pub destination: Option<Destination>,
}

impl ChannelMeta {
    pub fn url(&self) -> String {
        if self.screen_name.is_empty() {
            format!("https://vk.com/club{}", self.id)
        } else {
            format!("https://vk.com/{}", self.screen_name)
        }
    }
}

/// Resolve every configured channel once. Channels that fail to resolve are
/// logged and dropped; the rest keep their configured order.
pub async fn resolve_channels(source: &dyn SourceClient, channels: &[Channel]) -> Vec<ChannelMeta> {
    let mut out = Vec::with_capacity(channels.len());
    for ch in channels {
        match source.resolve(&ch.reference).await {
            Ok(group) => {
                let display_name = ch
                    .display_name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or(group.name);
                info!(
                    target: "relay",
                    channel = %ch.reference,
                    channel_id = group.id,
                    name = %display_name,
                    "channel resolved"
                );
                out.push(ChannelMeta {
                    id: group.id,
                    screen_name: group.screen_name,
                    display_name,
                    destination: ch.destination.clone(),
                });
            }
            Err(e) => {
                error!(
                    target: "relay",
                    channel = %ch.reference,
                    error = %e,
                    "failed to resolve channel, it will not be polled"
                );
            }
        }
    }
    out
}
