// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod channel;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod format;
pub mod scheduler;
pub mod source;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::classify::Category;
pub use crate::error::{ConfigError, DeliveryError, FetchError, FormatError};
pub use crate::scheduler::{Poller, PollerCfg, RelayContext};

use std::sync::Arc;

use tracing::warn;

use crate::channel::resolve_channels;
use crate::classify::MarkerClassifier;
use crate::config::{Credentials, Settings};
use crate::delivery::discord::DiscordWebhook;
use crate::format::DiscordFormatter;
use crate::source::vk::VkClient;

/// Wire the default strategies (VK source, marker classifier, Discord
/// formatter and webhook) from validated settings and credentials, then
/// resolve every configured channel once.
pub async fn build_poller(settings: &Settings, creds: Credentials) -> anyhow::Result<Poller> {
    let channels = settings.channels()?;
    if channels.is_empty() {
        warn!("no channels configured; the poller will idle");
    }

    let source = VkClient::new(creds.vk_token)
        .with_filter(settings.bot.wall_filter)
        .with_timeout(settings.delivery.timeout_secs);
    let delivery = DiscordWebhook::new()
        .with_timeout(settings.delivery.timeout_secs)
        .with_retries(settings.delivery.max_attempts)
        .with_backoff(settings.delivery.backoff());

    let ctx = RelayContext {
        source: Arc::new(source),
        classifier: Box::new(MarkerClassifier::new(&settings.markers)),
        formatter: Box::new(DiscordFormatter::new(settings.format.clone())),
        delivery: Arc::new(delivery),
        routes: creds.routes,
    };

    let resolved = resolve_channels(ctx.source.as_ref(), &channels).await;
    if resolved.len() < channels.len() {
        warn!(
            configured = channels.len(),
            resolved = resolved.len(),
            "some channels could not be resolved"
        );
    }

    Ok(Poller::new(ctx, resolved, PollerCfg::from(settings)))
}
