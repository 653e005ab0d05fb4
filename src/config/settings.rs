// src/config/settings.rs
use std::time::Duration;

use serde::Deserialize;

use crate::channel::{Channel, ChannelRef};
use crate::classify::MarkerSet;
use crate::config::credentials::check_destination;
use crate::delivery::discord::{MAX_DESCRIPTION_CHARS, MAX_EMBEDS};
use crate::delivery::Destination;
use crate::error::ConfigError;
use crate::format::FormatOptions;
use crate::source::WallFilter;

/// Whole settings file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub channels: Vec<ChannelEntry>,
    pub bot: BotSettings,
    pub markers: MarkerSet,
    pub format: FormatOptions,
    pub delivery: DeliverySettings,
    /// e.g. "0.0.0.0:9000"; no exporter when absent.
    pub metrics_addr: Option<String>,
}

/// Config files carry ids either as numbers or as strings/handles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawChannelId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelEntry {
    pub id: RawChannelId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub interval_secs: u64,
    pub fetch_count: u32,
    pub wall_filter: WallFilter,
    pub channel_delay_ms: u64,
    pub error_delay_ms: u64,
    pub cooldown_secs: u64,
    pub dedup_high_water: usize,
    pub dedup_low_water: usize,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            fetch_count: 2,
            wall_filter: WallFilter::Owner,
            channel_delay_ms: 1_000,
            error_delay_ms: 2_000,
            cooldown_secs: 30,
            dedup_high_water: 50,
            dedup_low_water: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub timeout_secs: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 5,
            timeout_secs: 30,
        }
    }
}

impl DeliverySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Settings {
    /// Reject values the poller cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };
        if self.bot.interval_secs == 0 {
            return Err(invalid("bot.interval_secs", "must be at least 1"));
        }
        if self.bot.fetch_count == 0 || self.bot.fetch_count > 100 {
            return Err(invalid("bot.fetch_count", "must be within 1..=100"));
        }
        if self.bot.dedup_high_water == 0 {
            return Err(invalid("bot.dedup_high_water", "must be at least 1"));
        }
        if self.bot.dedup_low_water > self.bot.dedup_high_water {
            return Err(invalid(
                "bot.dedup_low_water",
                "must not exceed bot.dedup_high_water",
            ));
        }
        if self.format.max_text_chars < 16 || self.format.max_text_chars > MAX_DESCRIPTION_CHARS {
            return Err(invalid(
                "format.max_text_chars",
                &format!("must be within 16..={MAX_DESCRIPTION_CHARS}"),
            ));
        }
        if self.format.max_photos > MAX_EMBEDS {
            return Err(invalid(
                "format.max_photos",
                &format!("must be at most {MAX_EMBEDS}"),
            ));
        }
        if self.delivery.max_attempts == 0 {
            return Err(invalid("delivery.max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Turn config entries into typed channels. Ids are parsed here, once.
    pub fn channels(&self) -> Result<Vec<Channel>, ConfigError> {
        self.channels
            .iter()
            .map(|entry| -> Result<Channel, ConfigError> {
                let reference = match &entry.id {
                    RawChannelId::Number(0) => None,
                    RawChannelId::Number(n) => n.checked_abs().map(ChannelRef::NumericId),
                    RawChannelId::Text(s) => ChannelRef::parse(s),
                }
                .ok_or_else(|| ConfigError::Invalid {
                    field: "channels.id",
                    reason: format!("cannot parse channel id {:?}", entry.id),
                })?;

                let destination = entry
                    .webhook_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(|url| Destination {
                        webhook_url: url.to_string(),
                        thread_id: entry.thread_id.clone().filter(|t| !t.trim().is_empty()),
                    });
                if let Some(dest) = &destination {
                    check_destination("channels.webhook_url", dest)?;
                }

                Ok(Channel {
                    reference,
                    display_name: entry.name.clone(),
                    destination,
                })
            })
            .collect()
    }
}
