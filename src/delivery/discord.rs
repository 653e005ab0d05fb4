use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, warn};

use super::{Ack, DeliveryClient, Destination};
use crate::error::DeliveryError;
use crate::format::{truncate_text, OutboundMessage};

/// Statuses Discord answers a fire-and-forget webhook with.
pub const ACCEPTED_STATUSES: [u16; 2] = [200, 204];
/// Discord refuses a message with more embeds than this.
pub const MAX_EMBEDS: usize = 10;
/// Discord's limit on an embed description.
pub const MAX_DESCRIPTION_CHARS: usize = 4096;

#[derive(Clone)]
pub struct DiscordWebhook {
    client: Client,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl Default for DiscordWebhook {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscordWebhook {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Total attempts including the first; 0 is treated as 1.
    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Fixed wait between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, url: &Url, payload: &WebhookPayload) -> Result<u16, DeliveryError> {
        let rsp = self
            .client
            .post(url.clone())
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = rsp.status().as_u16();
        if ACCEPTED_STATUSES.contains(&status) {
            return Ok(status);
        }
        let body = rsp.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status,
            body: body.chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl DeliveryClient for DiscordWebhook {
    async fn send(
        &self,
        destination: &Destination,
        message: &OutboundMessage,
    ) -> Result<Ack, DeliveryError> {
        let url = destination.endpoint()?;
        let payload = WebhookPayload::from_message(message);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("relay_delivery_attempts_total").increment(1);

            match self.attempt(&url, &payload).await {
                Ok(status) => {
                    debug!(target: "delivery", status, attempt, post_url = %message.post_url, "webhook accepted");
                    return Ok(Ack {
                        status,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!(
                        target: "delivery",
                        attempt,
                        max_attempts = self.max_attempts,
                        post_url = %message.post_url,
                        error = %e,
                        "webhook attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        return Err(DeliveryError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

/// Discord `execute webhook` body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub content: String,
    pub username: String,
    pub embeds: Vec<Embed>,
}

impl WebhookPayload {
    /// The first embed carries the text; each further photo gets its own
    /// embed with the same `url`, which Discord renders as a gallery.
    pub fn from_message(m: &OutboundMessage) -> Self {
        let mut tail = String::new();
        for link in &m.link_refs {
            tail.push_str(&format!("\n🔗 {link}"));
        }
        tail.push_str(&format!("\n\n[Open post]({})", m.post_url));

        // the body gives way so the links and the post link always fit
        let budget = MAX_DESCRIPTION_CHARS.saturating_sub(tail.chars().count());
        let body = truncate_text(&m.body_text, budget);
        let description = if body.is_empty() {
            truncate_text(tail.trim_start_matches('\n'), MAX_DESCRIPTION_CHARS)
        } else {
            format!("{body}{tail}")
        };

        let mut images = m.media_refs.iter().take(MAX_EMBEDS);
        let mut embeds = vec![Embed {
            title: Some(m.title.clone()),
            description: Some(description),
            url: Some(m.post_url.clone()),
            color: Some(m.accent_color),
            timestamp: Some(m.created_at.to_rfc3339()),
            footer: Some(EmbedFooter {
                text: m.channel_url.trim_start_matches("https://").to_string(),
            }),
            image: images.next().map(|u| EmbedImage { url: u.clone() }),
        }];
        embeds.extend(images.map(|u| Embed {
            url: Some(m.post_url.clone()),
            image: Some(EmbedImage { url: u.clone() }),
            ..Embed::default()
        }));

        Self {
            content: format!(
                "**{} from [{}](<{}>)**",
                m.title, m.display_name, m.channel_url
            ),
            username: m.display_name.clone(),
            embeds,
        }
    }
}
