// tests/relay_scenarios.rs
//
// Poller end-to-end with a scripted source. Delivery is either recorded in
// memory or sent to a mock webhook server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vk_discord_relay::channel::{ChannelMeta, ChannelRef};
use vk_discord_relay::classify::MarkerClassifier;
use vk_discord_relay::delivery::discord::DiscordWebhook;
use vk_discord_relay::delivery::{Ack, DeliveryClient, Destination, Routes};
use vk_discord_relay::format::{DiscordFormatter, OutboundMessage};
use vk_discord_relay::scheduler::{ChannelOutcome, PollerState};
use vk_discord_relay::source::{GroupInfo, RawPost, SourceClient};
use vk_discord_relay::{Category, DeliveryError, FetchError, Poller, PollerCfg, RelayContext};

const CHANNEL: i64 = 5;

#[derive(Default)]
struct ScriptedSource {
    walls: Mutex<HashMap<i64, Vec<RawPost>>>,
    failing: Mutex<HashSet<i64>>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    fn set_wall(&self, channel_id: i64, posts: Vec<RawPost>) {
        self.walls.lock().unwrap().insert(channel_id, posts);
    }

    fn set_failing(&self, channel_id: i64, failing: bool) {
        let mut f = self.failing.lock().unwrap();
        if failing {
            f.insert(channel_id);
        } else {
            f.remove(&channel_id);
        }
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn resolve(&self, channel: &ChannelRef) -> Result<GroupInfo, FetchError> {
        match channel {
            ChannelRef::NumericId(id) => Ok(GroupInfo {
                id: *id,
                screen_name: format!("club{id}"),
                name: format!("Club {id}"),
            }),
            ChannelRef::Handle(h) => Err(FetchError::InvalidChannel {
                channel: h.clone(),
                reason: "unknown".into(),
            }),
        }
    }

    async fn latest_posts(&self, channel_id: i64, count: u32) -> Result<Vec<RawPost>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&channel_id) {
            return Err(FetchError::RateLimited {
                method: "wall.get".into(),
                message: "scripted".into(),
            });
        }
        Ok(self
            .walls
            .lock()
            .unwrap()
            .get(&channel_id)
            .map(|posts| posts.iter().take(count as usize).cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(Destination, OutboundMessage)>>,
}

impl RecordingDelivery {
    fn sent(&self) -> Vec<(Destination, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryClient for RecordingDelivery {
    async fn send(
        &self,
        destination: &Destination,
        message: &OutboundMessage,
    ) -> Result<Ack, DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.clone(), message.clone()));
        Ok(Ack {
            status: 204,
            attempts: 1,
        })
    }
}

fn post(id: i64, text: &str, pinned: bool) -> RawPost {
    RawPost {
        id,
        owner_id: -CHANNEL,
        from_id: -CHANNEL,
        created_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + id, 0).unwrap(),
        text: text.into(),
        attachments: vec![],
        pinned,
    }
}

fn meta(id: i64, destination: Option<Destination>) -> ChannelMeta {
    ChannelMeta {
        id,
        screen_name: format!("club{id}"),
        display_name: format!("Club {id}"),
        destination,
    }
}

fn fast_cfg() -> PollerCfg {
    PollerCfg {
        interval: Duration::from_millis(20),
        channel_delay: Duration::ZERO,
        error_delay: Duration::ZERO,
        cooldown: Duration::from_millis(20),
        tick: Duration::from_millis(2),
        ..PollerCfg::default()
    }
}

fn routes() -> Routes {
    Routes {
        main: Destination::new("https://discord.test/main"),
        calendar: Some(Destination::new("https://discord.test/forum").with_thread("77")),
    }
}

fn poller(
    source: Arc<ScriptedSource>,
    delivery: Arc<dyn DeliveryClient>,
    routes: Routes,
    channels: Vec<ChannelMeta>,
) -> Poller {
    let ctx = RelayContext {
        source,
        classifier: Box::new(MarkerClassifier::default()),
        formatter: Box::new(DiscordFormatter::default()),
        delivery,
        routes,
    };
    Poller::new(ctx, channels, fast_cfg())
}

#[tokio::test]
async fn scenario_a_baseline_post_is_never_delivered() {
    let source = Arc::new(ScriptedSource::default());
    source.set_wall(CHANNEL, vec![post(10, "old news", false)]);
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(source, delivery.clone(), routes(), vec![meta(CHANNEL, None)]);

    p.bootstrap().await;
    assert!(!p.seen().is_new(CHANNEL, 10));

    let report = p.poll_once().await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.delivered, 0);
    assert!(delivery.sent().is_empty());
}

#[tokio::test]
async fn scenario_b_calendar_post_goes_to_calendar_destination() {
    let source = Arc::new(ScriptedSource::default());
    source.set_wall(CHANNEL, vec![post(10, "old news", false)]);
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(source.clone(), delivery.clone(), routes(), vec![meta(CHANNEL, None)]);
    p.bootstrap().await;

    source.set_wall(
        CHANNEL,
        vec![post(11, "race day 🗓", false), post(10, "old news", false)],
    );
    let outcome = p.process_channel(0).await.unwrap();
    assert_eq!(
        outcome,
        ChannelOutcome::Delivered {
            post_id: 11,
            category: Category::Calendar
        }
    );

    let sent = delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.webhook_url, "https://discord.test/forum");
    assert_eq!(sent[0].0.thread_id.as_deref(), Some("77"));
    assert_eq!(sent[0].1.post_url, "https://vk.com/wall-5_11");
    assert!(!p.seen().is_new(CHANNEL, 11));

    // second pass sees the same post and does nothing
    let report = p.poll_once().await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(delivery.sent().len(), 1);
}

#[tokio::test]
async fn scenario_c_pinned_post_is_marked_without_delivery() {
    let source = Arc::new(ScriptedSource::default());
    source.set_wall(CHANNEL, vec![post(10, "old", false)]);
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(source.clone(), delivery.clone(), routes(), vec![meta(CHANNEL, None)]);
    p.bootstrap().await;

    source.set_wall(CHANNEL, vec![post(12, "read the rules", true), post(10, "old", false)]);
    let report = p.poll_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(!p.seen().is_new(CHANNEL, 12));
    assert!(delivery.sent().is_empty());

    source.set_wall(CHANNEL, vec![post(13, "new stream 🎥", false)]);
    assert_eq!(
        p.process_channel(0).await.unwrap(),
        ChannelOutcome::Skipped {
            post_id: 13,
            category: Category::SkippedVideo
        }
    );
    assert!(delivery.sent().is_empty());
}

#[tokio::test]
async fn scenario_d_failed_delivery_is_retried_next_pass() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/main"))
        .respond_with(ResponseTemplate::new(500))
        .expect(6)
        .mount(&server)
        .await;

    let source = Arc::new(ScriptedSource::default());
    let webhook = DiscordWebhook::new()
        .with_retries(3)
        .with_backoff(Duration::from_millis(5));
    let routes = Routes {
        main: Destination::new(format!("{}/main", server.uri())),
        calendar: None,
    };
    let mut p = poller(source.clone(), Arc::new(webhook), routes, vec![meta(CHANNEL, None)]);
    p.bootstrap().await;
    assert!(p.seen().is_empty());

    source.set_wall(CHANNEL, vec![post(14, "plain update", false)]);

    let first = p.poll_once().await.unwrap();
    assert_eq!(first.failed, 1);
    assert!(p.seen().is_new(CHANNEL, 14));
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(3));

    let second = p.poll_once().await.unwrap();
    assert_eq!(second.failed, 1);
    assert!(p.seen().is_new(CHANNEL, 14));
}

#[tokio::test]
async fn delivered_post_reaches_real_webhook_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/forum"))
        .and(query_param("thread_id", "77"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let source = Arc::new(ScriptedSource::default());
    let routes = Routes {
        main: Destination::new(format!("{}/main", server.uri())),
        calendar: Some(Destination::new(format!("{}/forum", server.uri())).with_thread("77")),
    };
    let webhook = Arc::new(DiscordWebhook::new().with_backoff(Duration::from_millis(5)));
    let mut p = poller(source.clone(), webhook, routes, vec![meta(CHANNEL, None)]);
    p.bootstrap().await;

    source.set_wall(CHANNEL, vec![post(20, "📅 club meeting", false)]);
    assert_eq!(p.poll_once().await.unwrap().delivered, 1);
    assert_eq!(p.poll_once().await.unwrap().unchanged, 1);
}

#[tokio::test]
async fn fetch_error_is_isolated_to_its_channel() {
    let source = Arc::new(ScriptedSource::default());
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(
        source.clone(),
        delivery.clone(),
        routes(),
        vec![meta(1, None), meta(2, None)],
    );
    p.bootstrap().await;

    source.set_failing(1, true);
    source.set_wall(1, vec![post(30, "lost for now", false)]);
    source.set_wall(2, vec![post(31, "fine", false)]);

    let report = p.poll_once().await.unwrap();
    assert_eq!(report.fetch_errors, 1);
    assert_eq!(report.delivered, 1);
    assert!(p.seen().is_new(1, 30));

    source.set_failing(1, false);
    let report = p.poll_once().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(!p.seen().is_new(1, 30));
}

#[tokio::test]
async fn pass_fails_when_every_channel_fails() {
    let source = Arc::new(ScriptedSource::default());
    source.set_failing(1, true);
    source.set_failing(2, true);
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(source, delivery, routes(), vec![meta(1, None), meta(2, None)]);
    assert!(p.poll_once().await.is_err());
}

#[tokio::test]
async fn channel_override_is_used_for_normal_posts() {
    let source = Arc::new(ScriptedSource::default());
    let delivery = Arc::new(RecordingDelivery::default());
    let own = Destination::new("https://discord.test/own");
    let mut p = poller(
        source.clone(),
        delivery.clone(),
        routes(),
        vec![meta(CHANNEL, Some(own.clone()))],
    );
    p.bootstrap().await;

    source.set_wall(CHANNEL, vec![post(40, "hello", false)]);
    p.poll_once().await.unwrap();
    assert_eq!(delivery.sent()[0].0, own);
}

#[tokio::test]
async fn dedup_store_stays_within_water_marks() {
    let source = Arc::new(ScriptedSource::default());
    let delivery = Arc::new(RecordingDelivery::default());
    let ctx = RelayContext {
        source: source.clone(),
        classifier: Box::new(MarkerClassifier::default()),
        formatter: Box::new(DiscordFormatter::default()),
        delivery: delivery.clone(),
        routes: routes(),
    };
    let cfg = PollerCfg {
        dedup_high_water: 3,
        dedup_low_water: 2,
        ..fast_cfg()
    };
    let mut p = Poller::new(ctx, vec![meta(CHANNEL, None)], cfg);
    p.bootstrap().await;

    for id in 100..110 {
        source.set_wall(CHANNEL, vec![post(id, "tick", false)]);
        p.poll_once().await.unwrap();
        assert!(p.seen().len() <= 3);
        assert!(!p.seen().is_new(CHANNEL, id), "just-delivered post must survive prune");
    }
    assert_eq!(delivery.sent().len(), 10);
}

#[tokio::test]
async fn run_stops_on_shutdown_request() {
    let source = Arc::new(ScriptedSource::default());
    source.set_wall(CHANNEL, vec![post(50, "baseline", false)]);
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(source, delivery.clone(), routes(), vec![meta(CHANNEL, None)]);
    assert_eq!(p.state(), PollerState::Initializing);
    p.bootstrap().await;

    let shutdown = p.shutdown_handle();
    let handle = tokio::spawn(p.run());
    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown.store(true, Ordering::SeqCst);

    let seen = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poller stopped promptly")
        .expect("poller task did not panic");
    assert!(!seen.is_new(CHANNEL, 50));
    assert!(delivery.sent().is_empty());
}

#[tokio::test]
async fn old_pinned_post_does_not_hide_new_posts() {
    let source = Arc::new(ScriptedSource::default());
    source.set_wall(
        CHANNEL,
        vec![post(3, "rules", true), post(10, "old news", false)],
    );
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(source.clone(), delivery.clone(), routes(), vec![meta(CHANNEL, None)]);
    p.bootstrap().await;
    assert!(!p.seen().is_new(CHANNEL, 10));

    source.set_wall(
        CHANNEL,
        vec![
            post(3, "rules", true),
            post(11, "fresh", false),
            post(10, "old news", false),
        ],
    );
    assert_eq!(
        p.process_channel(0).await.unwrap(),
        ChannelOutcome::Delivered {
            post_id: 11,
            category: Category::Normal
        }
    );
    assert_eq!(p.process_channel(0).await.unwrap(), ChannelOutcome::Unchanged);
    let sent = delivery.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.post_url, "https://vk.com/wall-5_11");
}

#[tokio::test]
async fn channel_that_failed_bootstrap_is_baselined_before_delivery() {
    let source = Arc::new(ScriptedSource::default());
    source.set_wall(CHANNEL, vec![post(30, "weeks old", false)]);
    source.set_failing(CHANNEL, true);
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(source.clone(), delivery.clone(), routes(), vec![meta(CHANNEL, None)]);
    p.bootstrap().await;
    assert!(p.seen().is_empty());

    source.set_failing(CHANNEL, false);
    assert_eq!(p.process_channel(0).await.unwrap(), ChannelOutcome::Baselined);
    assert!(!p.seen().is_new(CHANNEL, 30));
    assert!(delivery.sent().is_empty());

    source.set_wall(CHANNEL, vec![post(31, "new", false), post(30, "weeks old", false)]);
    assert_eq!(p.poll_once().await.unwrap().delivered, 1);
    assert_eq!(delivery.sent()[0].1.post_url, "https://vk.com/wall-5_31");
}

#[tokio::test]
async fn run_cools_down_after_failed_pass_and_resumes() {
    let source = Arc::new(ScriptedSource::default());
    let delivery = Arc::new(RecordingDelivery::default());
    let mut p = poller(
        source.clone(),
        delivery.clone(),
        routes(),
        vec![meta(1, None), meta(2, None)],
    );
    p.bootstrap().await;

    source.set_failing(1, true);
    source.set_failing(2, true);
    let before = source.fetches.load(Ordering::SeqCst);

    let shutdown = p.shutdown_handle();
    let handle = tokio::spawn(p.run());

    // several failed passes, each followed by the cooldown
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(source.fetches.load(Ordering::SeqCst) - before >= 4);
    assert!(delivery.sent().is_empty());

    source.set_wall(2, vec![post(60, "back online", false)]);
    source.set_failing(1, false);
    source.set_failing(2, false);

    let mut delivered = false;
    for _ in 0..200 {
        if !delivery.sent().is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.store(true, Ordering::SeqCst);

    let seen = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poller stopped promptly")
        .expect("poller task did not panic");
    assert!(delivered, "post was not delivered after recovery");
    assert_eq!(delivery.sent().len(), 1);
    assert!(!seen.is_new(2, 60));
}
