pub mod discord;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::classify::Category;
use crate::error::DeliveryError;
use crate::format::OutboundMessage;

/// An outbound webhook, optionally routed into a forum thread.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Destination {
    pub webhook_url: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl Destination {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Full request URL, with `thread_id` appended as a query parameter.
    pub fn endpoint(&self) -> Result<Url, DeliveryError> {
        let mut url = Url::parse(&self.webhook_url)
            .map_err(|e| DeliveryError::InvalidUrl(format!("{e}")))?;
        if let Some(thread) = self.thread_id.as_deref().filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("thread_id", thread);
        }
        Ok(url)
    }
}

/// Successful delivery receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
    pub attempts: u32,
}

#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(
        &self,
        destination: &Destination,
        message: &OutboundMessage,
    ) -> Result<Ack, DeliveryError>;
}

/// Category → destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub main: Destination,
    pub calendar: Option<Destination>,
}

impl Routes {
    /// Calendar posts go to the calendar destination when one is configured;
    /// everything else goes to the channel override, then the main webhook.
    pub fn select<'a>(
        &'a self,
        category: Category,
        channel_override: Option<&'a Destination>,
    ) -> &'a Destination {
        let by_category = match category {
            Category::Calendar => self.calendar.as_ref(),
            _ => None,
        };
        by_category.or(channel_override).unwrap_or(&self.main)
    }
}
