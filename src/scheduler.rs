// src/scheduler.rs
//! Polling loop: Initializing → Polling → Sleeping → (Polling | ShuttingDown) → Terminated.
//!
//! Channels are processed strictly one after another on a single task, so the
//! dedup store needs no locking. Shutdown is cooperative: the flag is checked
//! before every channel and on every sleep tick, never mid-request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tracing::{debug, error, info, warn};

use crate::channel::ChannelMeta;
use crate::classify::{Category, Classifier};
use crate::config::Settings;
use crate::dedup::DedupStore;
use crate::delivery::{DeliveryClient, Routes};
use crate::error::FetchError;
use crate::format::Formatter;
use crate::source::{newest, RawPost, SourceClient};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollerCfg {
    pub interval: Duration,
    pub fetch_count: u32,
    pub channel_delay: Duration,
    pub error_delay: Duration,
    pub cooldown: Duration,
    /// Granularity of interruptible sleeps.
    pub tick: Duration,
    pub dedup_high_water: usize,
    pub dedup_low_water: usize,
}

impl Default for PollerCfg {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for PollerCfg {
    fn from(s: &Settings) -> Self {
        Self {
            interval: Duration::from_secs(s.bot.interval_secs),
            fetch_count: s.bot.fetch_count,
            channel_delay: Duration::from_millis(s.bot.channel_delay_ms),
            error_delay: Duration::from_millis(s.bot.error_delay_ms),
            cooldown: Duration::from_secs(s.bot.cooldown_secs),
            tick: Duration::from_secs(1),
            dedup_high_water: s.bot.dedup_high_water,
            dedup_low_water: s.bot.dedup_low_water,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    Initializing,
    Polling,
    Sleeping,
    ShuttingDown,
    Terminated,
}

/// Everything a pass needs besides its own state. Strategies are pluggable.
pub struct RelayContext {
    pub source: Arc<dyn SourceClient>,
    pub classifier: Box<dyn Classifier>,
    pub formatter: Box<dyn Formatter>,
    pub delivery: Arc<dyn DeliveryClient>,
    pub routes: Routes,
}

/// What happened to one channel during a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// First successful fetch for a channel whose bootstrap failed; its
    /// newest post was recorded as the starting point, not delivered.
    Baselined,
    /// Wall is empty.
    Empty,
    /// Newest post was already seen.
    Unchanged,
    Delivered { post_id: i64, category: Category },
    Skipped { post_id: i64, category: Category },
    /// Delivery exhausted its retries; the post stays unseen.
    DeliveryFailed { post_id: i64 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub delivered: usize,
    pub skipped: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub fetch_errors: usize,
}

impl PassReport {
    fn record(&mut self, outcome: &ChannelOutcome) {
        match outcome {
            ChannelOutcome::Baselined | ChannelOutcome::Empty | ChannelOutcome::Unchanged => {
                self.unchanged += 1
            }
            ChannelOutcome::Delivered { .. } => self.delivered += 1,
            ChannelOutcome::Skipped { .. } => self.skipped += 1,
            ChannelOutcome::DeliveryFailed { .. } => self.failed += 1,
        }
    }
}

pub struct Poller {
    ctx: RelayContext,
    channels: Vec<ChannelMeta>,
    cfg: PollerCfg,
    seen: DedupStore,
    /// Per channel: has a starting point been recorded yet.
    baselined: Vec<bool>,
    state: PollerState,
    shutdown: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(ctx: RelayContext, channels: Vec<ChannelMeta>, cfg: PollerCfg) -> Self {
        Self {
            ctx,
            baselined: vec![false; channels.len()],
            channels,
            cfg,
            seen: DedupStore::new(),
            state: PollerState::Initializing,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Store `true` into the returned flag to stop the poller gracefully.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn seen(&self) -> &DedupStore {
        &self.seen
    }

    pub fn channels(&self) -> &[ChannelMeta] {
        &self.channels
    }

    fn set_state(&mut self, next: PollerState) {
        if self.state != next {
            debug!(target: "relay", from = ?self.state, to = ?next, "poller state");
            self.state = next;
        }
    }

    /// Mark the newest post of every channel as seen so history is never replayed.
    /// Channels whose fetch fails here are baselined on their first good fetch.
    pub async fn bootstrap(&mut self) {
        self.set_state(PollerState::Initializing);
        for idx in 0..self.channels.len() {
            if self.is_shutdown_requested() {
                break;
            }
            if self.baselined[idx] {
                continue;
            }
            let channel_id = self.channels[idx].id;
            // a pinned post is listed first, so look past it
            let count = self.cfg.fetch_count.max(2);
            let fetched = self.ctx.source.latest_posts(channel_id, count).await;
            match fetched {
                Ok(posts) => self.record_baseline(idx, &posts),
                Err(e) => {
                    counter!("relay_fetch_errors_total").increment(1);
                    warn!(target: "relay", channel_id, error = %e, "bootstrap fetch failed, will retry on next pass");
                }
            }
            self.sleep_interruptible(self.cfg.channel_delay).await;
        }
        gauge!("relay_dedup_size").set(self.seen.len() as f64);
    }

    fn record_baseline(&mut self, idx: usize, posts: &[RawPost]) {
        let channel_id = self.channels[idx].id;
        match newest(posts) {
            Some(post) => {
                self.seen.mark_seen(channel_id, post.id, Utc::now());
                info!(target: "relay", channel_id, post_id = post.id, "channel initialized");
            }
            None => info!(target: "relay", channel_id, "channel initialized, wall is empty"),
        }
        self.baselined[idx] = true;
    }

    /// One pass over every channel in configured order.
    ///
    /// Per-channel failures are logged and never stop the pass. The pass as a
    /// whole fails only when every channel failed to fetch (upstream outage).
    pub async fn poll_once(&mut self) -> anyhow::Result<PassReport> {
        self.set_state(PollerState::Polling);
        let mut report = PassReport::default();

        for idx in 0..self.channels.len() {
            if self.is_shutdown_requested() {
                break;
            }
            let channel_id = self.channels[idx].id;
            match self.process_channel(idx).await {
                Ok(outcome) => {
                    report.record(&outcome);
                    self.sleep_interruptible(self.cfg.channel_delay).await;
                }
                Err(e) => {
                    report.fetch_errors += 1;
                    counter!("relay_fetch_errors_total").increment(1);
                    error!(target: "relay", channel_id, error = %e, "channel fetch failed");
                    self.sleep_interruptible(self.cfg.error_delay).await;
                }
            }
        }

        gauge!("relay_last_pass_ts").set(Utc::now().timestamp() as f64);
        gauge!("relay_dedup_size").set(self.seen.len() as f64);

        if !self.channels.is_empty() && report.fetch_errors == self.channels.len() {
            anyhow::bail!("all {} channels failed to fetch", report.fetch_errors);
        }
        Ok(report)
    }

    /// fetch → is-new → classify → (skip | format → deliver) → mark seen.
    pub async fn process_channel(&mut self, idx: usize) -> Result<ChannelOutcome, FetchError> {
        let posts = self
            .ctx
            .source
            .latest_posts(self.channels[idx].id, self.cfg.fetch_count)
            .await?;

        if !self.baselined[idx] {
            self.record_baseline(idx, &posts);
            return Ok(ChannelOutcome::Baselined);
        }

        let meta = &self.channels[idx];
        let Some(post) = newest(&posts) else {
            return Ok(ChannelOutcome::Empty);
        };
        if !self.seen.is_new(meta.id, post.id) {
            return Ok(ChannelOutcome::Unchanged);
        }

        let category = self.ctx.classifier.classify(post);
        info!(
            target: "relay",
            channel_id = meta.id,
            post_id = post.id,
            category = category.as_str(),
            "new post"
        );

        if category.is_skipped() {
            self.seen.mark_seen(meta.id, post.id, Utc::now());
            counter!("relay_posts_skipped_total", "category" => category.as_str()).increment(1);
            let outcome = ChannelOutcome::Skipped {
                post_id: post.id,
                category,
            };
            self.prune();
            return Ok(outcome);
        }

        let message = self.ctx.formatter.format(post, meta, category);
        let destination = self
            .ctx
            .routes
            .select(category, message.destination.as_ref());

        match self.ctx.delivery.send(destination, &message).await {
            Ok(ack) => {
                self.seen.mark_seen(meta.id, post.id, Utc::now());
                counter!("relay_posts_delivered_total", "category" => category.as_str()).increment(1);
                info!(
                    target: "relay",
                    channel_id = meta.id,
                    post_id = post.id,
                    status = ack.status,
                    attempts = ack.attempts,
                    "post delivered"
                );
                let outcome = ChannelOutcome::Delivered {
                    post_id: post.id,
                    category,
                };
                self.prune();
                Ok(outcome)
            }
            Err(e) => {
                counter!("relay_delivery_failures_total").increment(1);
                error!(
                    target: "relay",
                    channel_id = meta.id,
                    post_id = post.id,
                    attempts = e.attempts(),
                    error = %e,
                    "delivery failed, post will be retried next pass"
                );
                Ok(ChannelOutcome::DeliveryFailed { post_id: post.id })
            }
        }
    }

    fn prune(&mut self) {
        let evicted = self
            .seen
            .prune(self.cfg.dedup_high_water, self.cfg.dedup_low_water);
        if evicted > 0 {
            counter!("relay_dedup_evicted_total").increment(evicted as u64);
            debug!(target: "relay", evicted, remaining = self.seen.len(), "dedup store pruned");
        }
    }

    /// Sleep in `tick` steps. Returns false if shutdown was requested.
    async fn sleep_interruptible(&self, total: Duration) -> bool {
        let tick = if self.cfg.tick.is_zero() {
            Duration::from_millis(10)
        } else {
            self.cfg.tick
        };
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.is_shutdown_requested() {
                return false;
            }
            let step = remaining.min(tick);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        !self.is_shutdown_requested()
    }

    /// Bootstrap, then poll until shutdown is requested.
    pub async fn run(mut self) -> DedupStore {
        info!(
            target: "relay",
            source = self.ctx.source.name(),
            channels = self.channels.len(),
            interval_secs = self.cfg.interval.as_secs(),
            "poller starting"
        );
        self.bootstrap().await;

        loop {
            if self.is_shutdown_requested() {
                break;
            }
            match self.poll_once().await {
                Ok(report) => {
                    info!(
                        target: "relay",
                        delivered = report.delivered,
                        skipped = report.skipped,
                        unchanged = report.unchanged,
                        failed = report.failed,
                        fetch_errors = report.fetch_errors,
                        "polling pass finished"
                    );
                }
                Err(e) => {
                    error!(target: "relay", error = %e, cooldown_secs = self.cfg.cooldown.as_secs(), "polling pass failed");
                    self.set_state(PollerState::Sleeping);
                    if !self.sleep_interruptible(self.cfg.cooldown).await {
                        break;
                    }
                    continue;
                }
            }

            self.set_state(PollerState::Sleeping);
            if !self.sleep_interruptible(self.cfg.interval).await {
                break;
            }
        }

        self.set_state(PollerState::ShuttingDown);
        info!(target: "relay", seen = self.seen.len(), "poller shutting down");
        self.set_state(PollerState::Terminated);
        self.seen
    }
}
