use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use campaign_channels::TemplateContentGenerator;
use campaign_core::channels::{ChannelProvider, ChannelRegistry, OutboundMessage, ProviderResponse};
use campaign_core::config::{AppConfig, SpreadPolicy};
use campaign_core::event_bus::{CaptureSink, EventType};
use campaign_core::types::{
    Campaign, CampaignStatus, Channel, Customer, DeliveryReceipt, DeliveryStatus, MessageVariant,
    ReceiptStatus, ScheduleWindow,
};
use campaign_core::{CampaignError, CampaignResult};
use campaign_dispatch::{CampaignService, DeliveryTicker, NewCampaign};
use campaign_management::InMemoryStores;
use campaign_segmentation::SegmentBuilder;

// ─── Test doubles ──────────────────────────────────────────────────────────

/// Provider whose behaviour is scripted per destination.
struct ScriptedProvider {
    channel: Channel,
    reject: HashSet<String>,
    /// Destination -> failures left before it starts succeeding.
    flaky: Mutex<HashMap<String, usize>>,
    delivered: Mutex<Vec<OutboundMessage>>,
    calls: AtomicUsize,
    /// Holds the first send until released.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    gated: AtomicBool,
}

impl ScriptedProvider {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            reject: HashSet::new(),
            flaky: Mutex::new(HashMap::new()),
            delivered: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
            gated: AtomicBool::new(false),
        }
    }

    fn rejecting(mut self, destination: &str) -> Self {
        self.reject.insert(destination.to_string());
        self
    }

    fn flaky(self, destination: &str, failures: usize) -> Self {
        self.flaky.lock().insert(destination.to_string(), failures);
        self
    }

    fn gated(mut self, started: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((started, release));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn delivered_to(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|m| m.destination.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> CampaignResult<ProviderResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((started, release)) = &self.gate {
            if !self.gated.swap(true, Ordering::SeqCst) {
                started.notify_one();
                release.notified().await;
            }
        }

        if self.reject.contains(&message.destination) {
            return Err(CampaignError::provider(
                "scripted",
                Some(message.customer_id),
                "mailbox unavailable",
            ));
        }
        {
            let mut flaky = self.flaky.lock();
            if let Some(left) = flaky.get_mut(&message.destination) {
                if *left > 0 {
                    *left -= 1;
                    return Err(CampaignError::provider(
                        "scripted",
                        Some(message.customer_id),
                        "temporarily unavailable",
                    ));
                }
            }
        }

        self.delivered.lock().push(message.clone());
        Ok(ProviderResponse {
            provider_message_id: format!("msg-{n}"),
            accepted_at: Utc::now(),
            detail: None,
        })
    }
}

struct Harness {
    stores: InMemoryStores,
    service: CampaignService,
    provider: Arc<ScriptedProvider>,
    sink: Arc<CaptureSink>,
}

fn harness(customers: Vec<Customer>, provider: ScriptedProvider, config: AppConfig) -> Harness {
    let stores = InMemoryStores::with_customers(customers);
    let provider = Arc::new(provider);
    let sink = Arc::new(CaptureSink::new());
    let service = CampaignService::builder(
        stores.stores(),
        Arc::new(TemplateContentGenerator::new("Acme")),
    )
    .config(config)
    .channels(ChannelRegistry::new().with_provider(provider.clone()))
    .event_sink(sink.clone())
    .build()
    .unwrap();
    Harness {
        stores,
        service,
        provider,
        sink,
    }
}

fn customer(name: &str, spent: f64) -> Customer {
    let mut c = Customer::new(name);
    c.email = Some(format!("{}@example.com", name.to_lowercase()));
    c.total_spent = spent;
    c
}

fn variants() -> Vec<MessageVariant> {
    vec![
        MessageVariant::new(Some("Hello {{firstName}}"), "Hi {{name}}, spring is here."),
        MessageVariant::new(Some("Just for you"), "Hi {{name}}, a VIP preview.").with_tags(&["vip"]),
    ]
}

impl Harness {
    async fn campaign_for_spenders_over(&self, amount: f64) -> Campaign {
        let segment = self
            .service
            .create_segment(SegmentBuilder::new("spenders").spent_over(amount).build().unwrap())
            .await
            .unwrap();
        let mut request = NewCampaign::new("spring", Channel::Email, segment.id);
        request.goal = "Spring sale".into();
        request.message_variants = variants();
        self.service.create_campaign(request).await.unwrap()
    }

    async fn started_campaign(&self, amount: f64) -> Campaign {
        let campaign = self.campaign_for_spenders_over(amount).await;
        self.service.start_campaign(campaign.id).await.unwrap()
    }

    async fn campaign(&self, id: Uuid) -> Campaign {
        self.service.get_campaign(id).await.unwrap()
    }
}

fn assert_send<T: Send>(_: &T) {}

fn statuses(campaign: &Campaign) -> (usize, usize, usize) {
    let count = |s| campaign.deliveries().iter().filter(|d| d.status == s).count();
    (
        count(DeliveryStatus::Scheduled),
        count(DeliveryStatus::Delivered),
        count(DeliveryStatus::Failed),
    )
}

// ─── Scenarios ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn big_spender_segment_matches_last_two() {
    let h = harness(
        vec![customer("a", 50.0), customer("b", 150.0), customer("c", 200.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.campaign_for_spenders_over(100.0).await;
    let audience = h
        .service
        .preview_segment(campaign.target_segment_id, 1, None)
        .await
        .unwrap();

    let names: Vec<&str> = audience.customers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
    assert_eq!(audience.total, 2);
}

#[tokio::test]
async fn two_delivered_one_failed_completes_campaign() {
    let h = harness(
        vec![customer("a", 150.0), customer("b", 150.0), customer("c", 150.0)],
        ScriptedProvider::new(Channel::Email).rejecting("c@example.com"),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    assert_eq!(campaign.status, CampaignStatus::Running);
    assert_eq!(campaign.deliveries().len(), 3);

    let report = h.service.execute_campaign(campaign.id).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.status, CampaignStatus::Completed);

    let stats = h.service.get_campaign_stats(campaign.id).await.unwrap();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.failed, 1);
    assert!((stats.delivery_rate - 66.7).abs() < 0.05);

    let stored = h.campaign(campaign.id).await;
    assert!(stored.completed_at.is_some());
    assert_eq!(h.sink.count_type(EventType::CampaignCompleted), 1);
    assert_eq!(h.sink.count_type(EventType::DeliveryFailed), 1);
}

#[tokio::test]
async fn stop_keeps_unsent_records_scheduled_and_is_terminal() {
    let mut config = AppConfig::default();
    config.scheduler.spread_policy = SpreadPolicy::Even;
    let h = harness(
        (0..5).map(|i| customer(&format!("c{i}"), 500.0)).collect(),
        ScriptedProvider::new(Channel::Email),
        config,
    );
    let campaign = h.campaign_for_spenders_over(100.0).await;
    let t0 = Utc::now();
    h.service
        .schedule_campaign(
            campaign.id,
            ScheduleWindow::starting_at(t0, Duration::hours(5)).unwrap(),
        )
        .await
        .unwrap();
    h.service.start_campaign(campaign.id).await.unwrap();

    let report = h
        .service
        .orchestrator()
        .execute_at(campaign.id, t0 + Duration::minutes(150))
        .await
        .unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.remaining, 2);

    let stopped = h.service.stop_campaign(campaign.id).await.unwrap();
    assert_eq!(stopped.status, CampaignStatus::Stopped);
    assert_eq!(statuses(&stopped), (2, 3, 0));

    let err = h.service.execute_campaign(campaign.id).await.unwrap_err();
    assert!(matches!(err, CampaignError::InvalidState { .. }));
    let err = h.service.start_campaign(campaign.id).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_state");
    assert_eq!(statuses(&h.campaign(campaign.id).await), (2, 3, 0));
}

// ─── Properties ────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_execute_does_not_resend() {
    let mut config = AppConfig::default();
    config.scheduler.spread_policy = SpreadPolicy::Even;
    let h = harness(
        (0..4).map(|i| customer(&format!("c{i}"), 500.0)).collect(),
        ScriptedProvider::new(Channel::Email),
        config,
    );
    let campaign = h.campaign_for_spenders_over(0.0).await;
    let t0 = Utc::now();
    h.service
        .schedule_campaign(
            campaign.id,
            ScheduleWindow::starting_at(t0, Duration::hours(4)).unwrap(),
        )
        .await
        .unwrap();
    h.service.start_campaign(campaign.id).await.unwrap();

    let at = t0 + Duration::minutes(90);
    let first = h.service.orchestrator().execute_at(campaign.id, at).await.unwrap();
    let version = h.campaign(campaign.id).await.version;
    let second = h.service.orchestrator().execute_at(campaign.id, at).await.unwrap();

    assert_eq!(first.delivered, 2);
    assert_eq!(second.due, 0);
    assert_eq!(second.attempted, 0);
    assert_eq!(h.provider.calls(), 2);

    let stored = h.campaign(campaign.id).await;
    assert_eq!(stored.version, version);
    assert!(stored.deliveries().iter().all(|d| d.attempts.len() <= 1));
}

#[tokio::test]
async fn record_count_matches_audience_through_the_run() {
    let h = harness(
        vec![
            customer("a", 150.0),
            customer("b", 10.0),
            customer("c", 300.0),
            customer("d", 120.0),
        ],
        ScriptedProvider::new(Channel::Email).rejecting("d@example.com"),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    let audience = 3;
    let (s, d, f) = statuses(&campaign);
    assert_eq!(s + d + f, audience);

    h.service.execute_campaign(campaign.id).await.unwrap();
    let (s, d, f) = statuses(&h.campaign(campaign.id).await);
    assert_eq!(s + d + f, audience);
    assert_eq!((d, f), (2, 1));
}

#[tokio::test]
async fn starting_twice_does_not_rematerialize() {
    let h = harness(
        vec![customer("a", 150.0), customer("b", 150.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    h.stores.customers.insert(customer("late", 999.0));

    let err = h.service.start_campaign(campaign.id).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_state");
    assert_eq!(h.campaign(campaign.id).await.deliveries().len(), 2);
}

// ─── Delivery details ──────────────────────────────────────────────────────

#[tokio::test]
async fn failed_attempt_is_retried_after_backoff() {
    let mut config = AppConfig::default();
    config.dispatch.retry.max_attempts = 3;
    config.dispatch.retry.backoff_secs = 60;
    let h = harness(
        vec![customer("a", 150.0), customer("b", 150.0)],
        ScriptedProvider::new(Channel::Email).flaky("b@example.com", 1),
        config,
    );
    let campaign = h.started_campaign(100.0).await;
    let orchestrator = h.service.orchestrator();
    let t0 = Utc::now();

    let first = orchestrator.execute_at(campaign.id, t0).await.unwrap();
    assert_eq!(first.delivered, 1);
    assert_eq!(first.retry_scheduled, 1);
    assert_eq!(first.status, CampaignStatus::Running);

    let stored = h.campaign(campaign.id).await;
    let retrying = &stored.deliveries()[1];
    assert_eq!(retrying.status, DeliveryStatus::Scheduled);
    assert_eq!(retrying.scheduled_time, t0 + Duration::seconds(60));
    assert_eq!(retrying.failed_attempts(), 1);

    let early = orchestrator
        .execute_at(campaign.id, t0 + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(early.due, 0);

    let retried = orchestrator
        .execute_at(campaign.id, t0 + Duration::seconds(61))
        .await
        .unwrap();
    assert_eq!(retried.delivered, 1);
    assert_eq!(retried.status, CampaignStatus::Completed);

    let stats = h.service.get_campaign_stats(campaign.id).await.unwrap();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.attempts, 3);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let mut config = AppConfig::default();
    config.dispatch.retry.max_attempts = 2;
    config.dispatch.retry.backoff_secs = 10;
    let h = harness(
        vec![customer("a", 150.0)],
        ScriptedProvider::new(Channel::Email).rejecting("a@example.com"),
        config,
    );
    let campaign = h.started_campaign(100.0).await;
    let orchestrator = h.service.orchestrator();
    let t0 = Utc::now();

    orchestrator.execute_at(campaign.id, t0).await.unwrap();
    let last = orchestrator
        .execute_at(campaign.id, t0 + Duration::seconds(11))
        .await
        .unwrap();
    assert_eq!(last.failed, 1);
    assert_eq!(last.status, CampaignStatus::Completed);
    assert_eq!(h.campaign(campaign.id).await.deliveries()[0].attempts.len(), 2);
}

#[tokio::test]
async fn unreachable_customers_fail_without_provider_call() {
    let mut config = AppConfig::default();
    config.dispatch.retry.max_attempts = 5;
    let mut no_email = customer("ghost", 150.0);
    no_email.email = None;
    let h = harness(
        vec![customer("a", 150.0), no_email],
        ScriptedProvider::new(Channel::Email),
        config,
    );
    let campaign = h.started_campaign(100.0).await;

    let report = h.service.execute_campaign(campaign.id).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.retry_scheduled, 0);
    assert_eq!(h.provider.calls(), 1);

    let stored = h.campaign(campaign.id).await;
    let failed = &stored.deliveries()[1];
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert!(failed.attempts[0]
        .error
        .as_deref()
        .unwrap()
        .contains("has no email address"));
}

#[tokio::test]
async fn variant_follows_customer_tags() {
    let mut vip = customer("vip", 800.0);
    vip.tags = vec!["vip".into()];
    let h = harness(
        vec![customer("plain", 150.0), vip],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    h.service.execute_campaign(campaign.id).await.unwrap();

    let stored = h.campaign(campaign.id).await;
    let chosen: Vec<Option<usize>> = stored.deliveries().iter().map(|d| d.variant_index).collect();
    assert_eq!(chosen, vec![Some(0), Some(1)]);

    let sent = h.provider.delivered.lock().clone();
    let plain = sent
        .iter()
        .find(|m| m.destination == "plain@example.com")
        .unwrap();
    assert_eq!(plain.subject.as_deref(), Some("Hello plain"));
}

#[tokio::test]
async fn missing_provider_fails_campaign() {
    let h = harness(
        vec![customer("a", 150.0)],
        ScriptedProvider::new(Channel::Sms),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;

    let report = h.service.execute_campaign(campaign.id).await.unwrap();
    assert_eq!(report.status, CampaignStatus::Failed);

    let stored = h.campaign(campaign.id).await;
    assert!(stored.failure_reason.unwrap().contains("email"));
    assert_eq!(statuses(&h.campaign(campaign.id).await), (1, 0, 0));
    assert_eq!(h.sink.count_type(EventType::CampaignFailed), 1);
}

// ─── Failure recovery ──────────────────────────────────────────────────────

#[tokio::test]
async fn failed_commit_is_recovered_without_resending() {
    let h = harness(
        vec![customer("a", 150.0), customer("b", 150.0), customer("c", 150.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    h.stores.campaigns.inject_update_failures(1);

    let err = h.service.execute_campaign(campaign.id).await.unwrap_err();
    assert_eq!(err.kind(), "storage_error");
    assert_eq!(h.provider.calls(), 3);
    assert!(h.service.orchestrator().has_pending_outcomes(campaign.id));
    assert_eq!(statuses(&h.campaign(campaign.id).await), (3, 0, 0));
    assert_eq!(h.sink.count_type(EventType::DeliverySucceeded), 0);

    let report = h.service.execute_campaign(campaign.id).await.unwrap();
    assert_eq!(report.recovered, 3);
    assert_eq!(report.due, 0);
    assert_eq!(report.status, CampaignStatus::Completed);
    assert_eq!(h.provider.calls(), 3);
    assert!(!h.service.orchestrator().has_pending_outcomes(campaign.id));
    assert_eq!(h.sink.count_type(EventType::DeliverySucceeded), 3);
}

#[tokio::test]
async fn customer_store_outage_aborts_tick_before_sending() {
    struct Offline;

    #[async_trait]
    impl campaign_core::store::CustomerStore for Offline {
        async fn get(&self, _id: Uuid) -> CampaignResult<Option<Customer>> {
            Err(CampaignError::Storage("customer store offline".into()))
        }

        async fn fetch_page(
            &self,
            _query: &campaign_core::store::CustomerQuery,
            _offset: usize,
            _limit: usize,
        ) -> CampaignResult<campaign_core::store::CustomerPage> {
            Err(CampaignError::Storage("customer store offline".into()))
        }
    }

    let h = harness(
        vec![customer("a", 150.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;

    let mut stores = h.stores.stores();
    stores.customers = Arc::new(Offline);
    let offline = CampaignService::builder(stores, Arc::new(TemplateContentGenerator::default()))
        .channels(ChannelRegistry::new().with_provider(h.provider.clone()))
        .build()
        .unwrap();

    let err = offline.execute_campaign(campaign.id).await.unwrap_err();
    assert_eq!(err.kind(), "storage_error");
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.campaign(campaign.id).await.status, CampaignStatus::Running);
}

// ─── Receipts ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn failure_receipt_marks_delivered_record_failed() {
    let h = harness(
        vec![customer("a", 150.0), customer("b", 150.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    h.service.execute_campaign(campaign.id).await.unwrap();

    let stored = h.campaign(campaign.id).await;
    let message_id = stored.deliveries()[0].attempts[0]
        .provider_message_id
        .clone()
        .unwrap();
    let receipt = DeliveryReceipt {
        provider_message_id: message_id,
        status: ReceiptStatus::Undelivered,
        received_at: Utc::now(),
        error_code: Some("30003".into()),
    };

    let updated = h
        .service
        .reconcile_receipt(campaign.id, receipt.clone())
        .await
        .unwrap();
    let record = &updated.deliveries()[0];
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert!(record.delivered_at.is_none());
    assert_eq!(record.receipts.len(), 1);

    let again = h.service.reconcile_receipt(campaign.id, receipt).await.unwrap();
    assert_eq!(again.deliveries()[0].receipts.len(), 1);
    assert_eq!(h.sink.count_type(EventType::ReceiptReconciled), 1);

    let stats = h.service.get_campaign_stats(campaign.id).await.unwrap();
    assert_eq!((stats.delivered, stats.failed), (1, 1));
}

#[tokio::test]
async fn unknown_receipt_is_not_found() {
    let h = harness(
        vec![customer("a", 150.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    let err = h
        .service
        .reconcile_receipt(
            campaign.id,
            DeliveryReceipt {
                provider_message_id: "nope".into(),
                status: ReceiptStatus::Delivered,
                received_at: Utc::now(),
                error_code: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

// ─── Concurrency ───────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_during_tick_halts_further_dispatches() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut config = AppConfig::default();
    config.dispatch.max_concurrent_dispatches = 1;
    let h = harness(
        (0..5).map(|i| customer(&format!("c{i}"), 500.0)).collect(),
        ScriptedProvider::new(Channel::Email).gated(started.clone(), release.clone()),
        config,
    );
    let campaign = h.started_campaign(100.0).await;
    let service = Arc::new(h.service);

    let tick = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.execute_campaign(campaign.id).await })
    };
    started.notified().await;

    let stop = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.stop_campaign(campaign.id).await })
    };
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    release.notify_one();

    let report = tick.await.unwrap().unwrap();
    assert!(report.cancelled);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.status, CampaignStatus::Stopped);

    let stopped = stop.await.unwrap().unwrap();
    assert_eq!(stopped.status, CampaignStatus::Stopped);
    assert_eq!(statuses(&stopped), (4, 1, 0));
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(h.sink.count_type(EventType::CampaignStopped), 1);
}

#[tokio::test]
async fn concurrent_ticks_send_each_record_once() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let h = harness(
        (0..5).map(|i| customer(&format!("c{i}"), 500.0)).collect(),
        ScriptedProvider::new(Channel::Email).gated(started.clone(), release.clone()),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    let service = Arc::new(h.service);

    let id = campaign.id;
    let spawn_tick = move |service: &Arc<CampaignService>| {
        let service = Arc::clone(service);
        tokio::spawn(async move { service.execute_campaign(id).await })
    };
    let first = spawn_tick(&service);
    started.notified().await;
    let second = spawn_tick(&service);
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    release.notify_one();

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();
    assert_eq!(a.delivered + b.delivered, 5);
    assert_eq!(h.provider.calls(), 5);

    let stored = service.get_campaign(id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert!(stored.deliveries().iter().all(|d| d.attempts.len() == 1));
}

#[tokio::test]
async fn concurrent_starts_materialize_once() {
    let h = harness(
        vec![customer("a", 150.0), customer("b", 150.0), customer("c", 150.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.campaign_for_spenders_over(100.0).await;
    let service = Arc::new(h.service);
    assert_send(&service.start_campaign(campaign.id));
    assert_send(&service.schedule_campaign(
        campaign.id,
        ScheduleWindow::starting_at(Utc::now(), Duration::hours(1)).unwrap(),
    ));

    let id = campaign.id;
    let starts: Vec<_> = (0..2)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.start_campaign(id).await })
        })
        .collect();
    let mut ok = 0;
    for start in starts {
        match start.await.unwrap() {
            Ok(_) => ok += 1,
            Err(err) => assert_eq!(err.kind(), "invalid_state"),
        }
    }
    assert_eq!(ok, 1);

    let stored = service.get_campaign(campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Running);
    assert_eq!(stored.deliveries().len(), 3);
    assert_eq!(h.sink.count_type(EventType::CampaignStarted), 1);
}

#[test]
fn non_positive_default_window_fails_the_build() {
    let mut config = AppConfig::default();
    config.scheduler.default_window_hours = 0;
    let result = CampaignService::builder(
        InMemoryStores::new().stores(),
        Arc::new(TemplateContentGenerator::default()),
    )
    .config(config)
    .build();
    assert!(matches!(result, Err(CampaignError::Config(_))));
}

#[tokio::test]
async fn tick_all_runs_every_running_campaign() {
    let h = harness(
        vec![customer("a", 150.0), customer("b", 50.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let first = h.started_campaign(100.0).await;
    let second = h.started_campaign(0.0).await;
    let draft = h.campaign_for_spenders_over(0.0).await;

    let mut reports = h.service.orchestrator().tick_all().await.unwrap();
    reports.sort_by_key(|r| r.delivered);
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].delivered, 1);
    assert_eq!(reports[1].delivered, 2);

    for id in [first.id, second.id] {
        assert_eq!(h.campaign(id).await.status, CampaignStatus::Completed);
    }
    assert_eq!(h.campaign(draft.id).await.status, CampaignStatus::Draft);
    assert_eq!(h.service.stats_overview().totals.delivered, 3);
}

#[tokio::test]
async fn ticker_delivers_until_shutdown() {
    let h = harness(
        vec![customer("a", 150.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let campaign = h.started_campaign(100.0).await;
    let ticker = DeliveryTicker::new(
        Arc::clone(h.service.orchestrator()),
        StdDuration::from_millis(10),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { ticker.run(shutdown_rx).await });

    let completed = tokio::time::timeout(StdDuration::from_secs(2), async {
        loop {
            if h.campaign(campaign.id).await.status == CampaignStatus::Completed {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await;
    assert!(completed.is_ok());
    assert_eq!(h.provider.delivered_to(), vec!["a@example.com".to_string()]);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(1), handle)
        .await
        .expect("ticker should stop")
        .unwrap();
}

// ─── Segments ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn segment_count_goes_stale_when_rules_change() {
    let h = harness(
        vec![customer("a", 150.0), customer("b", 50.0)],
        ScriptedProvider::new(Channel::Email),
        AppConfig::default(),
    );
    let segment = h
        .service
        .create_segment(SegmentBuilder::new("s").spent_over(100.0).build().unwrap())
        .await
        .unwrap();

    let counted = h.service.refresh_segment_count(segment.id).await.unwrap();
    assert_eq!(counted.customer_count, 1);
    assert!(counted.count_is_exact());

    let changed = h
        .service
        .update_segment_rules(segment.id, Vec::new(), Default::default())
        .await
        .unwrap();
    assert!(!changed.count_is_exact());
    assert_eq!(changed.customer_count, 1);

    let recounted = h.service.refresh_segment_count(segment.id).await.unwrap();
    assert_eq!(recounted.customer_count, 2);
    assert_eq!(h.sink.count_type(EventType::SegmentCountRefreshed), 2);

    let stats = h.service.segment_stats(segment.id).await.unwrap();
    assert_eq!(stats.count, 2);
    assert!((stats.average_total_spent - 100.0).abs() < f64::EPSILON);
}
