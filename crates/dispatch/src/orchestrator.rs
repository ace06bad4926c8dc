//! Campaign lifecycle and the delivery tick.
//!
//! Every write to a campaign (start, schedule, tick, stop, receipt) holds
//! that campaign's keyed lock, so one writer runs per campaign while
//! different campaigns proceed in parallel. Within a tick, per-customer sends
//! fan out to a bounded `JoinSet`; the campaign is committed once after all
//! of the tick's results are in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use campaign_core::channels::{ChannelProvider, ChannelRegistry, OutboundMessage};
use campaign_core::config::DispatchConfig;
use campaign_core::event_bus::{campaign_event, noop_sink, EventSink, EventType, PipelineEvent};
use campaign_core::locks::{KeyGuard, KeyedLocks};
use campaign_core::store::{CampaignStore, CustomerStore};
use campaign_core::types::{
    Campaign, CampaignStatus, Channel, Customer, DeliveryAttempt, DeliveryReceipt, DeliveryRecord, DeliveryStatus,
    Schedule, ScheduleWindow,
};
use campaign_core::{CampaignError, CampaignResult};
use campaign_intelligent_delivery::DeliveryScheduler;
use campaign_reporting::{aggregate, StatsAggregator};
use campaign_segmentation::SegmentEvaluator;

use crate::ledger::PendingLedger;
use crate::retry::RetryPolicy;
use crate::state_machine::{CampaignAction, CampaignStateMachine};
use crate::variant::{destination, render, select_variant};

/// What one tick did to one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    /// Records that were due when the tick started.
    pub due: usize,
    /// Records that received an attempt this tick.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub retry_scheduled: usize,
    /// Records still `scheduled` after the tick.
    pub remaining: usize,
    /// Outcomes restored from an earlier tick whose commit failed.
    pub recovered: usize,
    /// Whether a stop request cut the tick short.
    pub cancelled: bool,
}

impl TickReport {
    fn new(campaign: &Campaign) -> Self {
        Self {
            campaign_id: campaign.id,
            status: campaign.status,
            due: 0,
            attempted: 0,
            delivered: 0,
            failed: 0,
            retry_scheduled: 0,
            remaining: campaign.pending_count(),
            recovered: 0,
            cancelled: false,
        }
    }
}

/// A rendered message waiting for a dispatch slot.
struct DispatchJob {
    index: usize,
    variant_index: usize,
    message: OutboundMessage,
}

struct Outcome {
    variant_index: Option<usize>,
    attempt: DeliveryAttempt,
    /// Unreachable recipients are failed outright.
    retryable: bool,
}

pub struct DispatchOrchestrator {
    campaigns: Arc<dyn CampaignStore>,
    customers: Arc<dyn CustomerStore>,
    evaluator: Arc<SegmentEvaluator>,
    scheduler: Arc<DeliveryScheduler>,
    channels: ChannelRegistry,
    state_machine: CampaignStateMachine,
    retry: RetryPolicy,
    locks: KeyedLocks,
    stop_flags: DashMap<Uuid, Arc<AtomicBool>>,
    ledger: PendingLedger,
    max_concurrent: usize,
    provider_timeout: Duration,
    default_window: chrono::Duration,
    event_sink: Arc<dyn EventSink>,
    stats: Arc<StatsAggregator>,
}

impl DispatchOrchestrator {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        customers: Arc<dyn CustomerStore>,
        evaluator: Arc<SegmentEvaluator>,
        scheduler: Arc<DeliveryScheduler>,
        channels: ChannelRegistry,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            campaigns,
            customers,
            evaluator,
            scheduler,
            channels,
            state_machine: CampaignStateMachine::new(),
            retry: RetryPolicy::from_config(&config.retry),
            locks: KeyedLocks::new(),
            stop_flags: DashMap::new(),
            ledger: PendingLedger::new(),
            max_concurrent: config.max_concurrent_dispatches.max(1),
            provider_timeout: Duration::from_millis(config.provider_timeout_ms),
            default_window: chrono::Duration::hours(24),
            event_sink: noop_sink(),
            stats: Arc::new(StatsAggregator::new()),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsAggregator>) -> Self {
        self.stats = stats;
        self
    }

    /// Window used when a draft campaign is started without one.
    pub fn with_default_window(mut self, length: chrono::Duration) -> Self {
        self.default_window = length;
        self
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn state_machine(&self) -> &CampaignStateMachine {
        &self.state_machine
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn has_pending_outcomes(&self, campaign_id: Uuid) -> bool {
        self.ledger.has_pending(campaign_id)
    }

    // ── Loading and committing ──────────────────────────────────────────

    pub async fn load(&self, campaign_id: Uuid) -> CampaignResult<Campaign> {
        self.campaigns
            .get(campaign_id)
            .await?
            .ok_or_else(|| CampaignError::not_found("campaign", campaign_id))
    }

    async fn lock(&self, campaign_id: Uuid) -> KeyGuard {
        self.locks.acquire(campaign_id).await
    }

    /// Loads the campaign and folds in outcomes parked by a failed commit.
    /// Callers must hold the campaign lock.
    async fn load_for_write(
        &self,
        campaign_id: Uuid,
    ) -> CampaignResult<(Campaign, usize, Vec<PipelineEvent>)> {
        let mut campaign = self.load(campaign_id).await?;
        let (recovered, events) = self.ledger.apply(&mut campaign);
        Ok((campaign, recovered, events))
    }

    /// Persists the campaign, then releases parked outcomes and publishes the
    /// events. Nothing is emitted if the write fails.
    async fn commit(&self, campaign: Campaign, events: Vec<PipelineEvent>) -> CampaignResult<Campaign> {
        let campaign_id = campaign.id;
        let stored = match self.campaigns.update(campaign).await {
            Ok(stored) => stored,
            Err(err) => {
                error!(
                    campaign_id = %campaign_id,
                    error = %err,
                    kind = err.kind(),
                    "Failed to persist campaign"
                );
                metrics::counter!("dispatch.commit_failures").increment(1);
                return Err(err);
            }
        };

        self.ledger.clear(campaign_id);
        for event in events {
            self.event_sink.emit(event);
        }
        self.stats.record(
            campaign_id,
            stored.status,
            aggregate(stored.deliveries(), stored.channel, stored.status),
        );
        if stored.status.is_terminal() {
            self.stop_flags.remove(&campaign_id);
        }
        Ok(stored)
    }

    fn stop_flag(&self, campaign_id: Uuid) -> Arc<AtomicBool> {
        Arc::clone(
            &self
                .stop_flags
                .entry(campaign_id)
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    fn lifecycle_event(&self, campaign: &Campaign) -> Option<PipelineEvent> {
        let event_type = match campaign.status {
            CampaignStatus::Scheduled => EventType::CampaignScheduled,
            CampaignStatus::Running => EventType::CampaignStarted,
            CampaignStatus::Completed => EventType::CampaignCompleted,
            CampaignStatus::Stopped => EventType::CampaignStopped,
            CampaignStatus::Failed => EventType::CampaignFailed,
            CampaignStatus::Draft => return None,
        };
        let event = campaign_event(event_type, campaign.id, None);
        Some(match &campaign.failure_reason {
            Some(reason) if campaign.status == CampaignStatus::Failed => event.with_detail(reason.clone()),
            _ => event,
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Evaluates the target segment and plans one delivery per match.
    async fn materialize(
        &self,
        campaign: &Campaign,
        window: &ScheduleWindow,
    ) -> CampaignResult<Vec<DeliveryRecord>> {
        window.validate()?;
        let segment = self.evaluator.get_segment(campaign.target_segment_id).await?;
        let audience = self.evaluator.collect_audience(&segment).await?;
        self.scheduler.plan(campaign, audience, window).await
    }

    fn require_variants(campaign: &Campaign) -> CampaignResult<()> {
        if campaign.message_variants.is_empty() {
            return Err(CampaignError::validation(
                format!("campaign {}", campaign.id),
                "at least one message variant is required",
            ));
        }
        Ok(())
    }

    /// Plans a draft campaign's deliveries over `window` and moves it to
    /// `scheduled`.
    pub async fn schedule(&self, campaign_id: Uuid, window: ScheduleWindow) -> CampaignResult<Campaign> {
        let _guard = self.lock(campaign_id).await;
        let (mut campaign, _, mut events) = self.load_for_write(campaign_id).await?;
        self.state_machine.check(&campaign, CampaignAction::Schedule)?;
        Self::require_variants(&campaign)?;

        let records = self.materialize(&campaign, &window).await?;
        let planned = records.len();
        campaign.schedule = Some(Schedule::new(window, records));
        self.state_machine
            .apply(&mut campaign, CampaignAction::Schedule, Utc::now())?;
        events.extend(self.lifecycle_event(&campaign));

        let stored = self.commit(campaign, events).await?;
        info!(
            campaign_id = %campaign_id,
            planned,
            start = %window.start_date,
            end = %window.end_date,
            "Campaign scheduled"
        );
        Ok(stored)
    }

    /// Starts a draft or scheduled campaign. A draft is materialized now over
    /// its stored window, or a default window beginning now; a scheduled
    /// campaign keeps the plan it already has.
    pub async fn start(&self, campaign_id: Uuid) -> CampaignResult<Campaign> {
        let _guard = self.lock(campaign_id).await;
        let (mut campaign, _, mut events) = self.load_for_write(campaign_id).await?;
        self.state_machine.check(&campaign, CampaignAction::Start)?;
        Self::require_variants(&campaign)?;

        let now = Utc::now();
        if campaign.status == CampaignStatus::Draft {
            let window = match campaign.schedule.as_ref().map(Schedule::window) {
                Some(window) => window,
                None => ScheduleWindow::starting_at(now, self.default_window)?,
            };
            let records = self.materialize(&campaign, &window).await?;
            campaign.schedule = Some(Schedule::new(window, records));
        }

        self.state_machine
            .apply(&mut campaign, CampaignAction::Start, now)?;
        let planned = campaign.deliveries().len();
        events.extend(
            self.lifecycle_event(&campaign)
                .map(|e| e.with_detail(format!("{planned} deliveries"))),
        );

        let stored = self.commit(campaign, events).await?;
        info!(campaign_id = %campaign_id, planned, "Campaign started");
        Ok(stored)
    }

    /// Stops a scheduled or running campaign. Records not yet attempted stay
    /// `scheduled`. A tick in progress sees the request before its next
    /// dispatch and winds down; the stop then commits under the lock.
    pub async fn stop(&self, campaign_id: Uuid) -> CampaignResult<Campaign> {
        let current = self.load(campaign_id).await?;
        self.state_machine.check(&current, CampaignAction::Stop)?;
        self.stop_flag(campaign_id).store(true, Ordering::SeqCst);

        let _guard = self.lock(campaign_id).await;
        let (mut campaign, _, mut events) = self.load_for_write(campaign_id).await?;
        if campaign.status == CampaignStatus::Stopped {
            self.stop_flags.remove(&campaign_id);
            return Ok(campaign);
        }
        if let Err(err) = self
            .state_machine
            .apply(&mut campaign, CampaignAction::Stop, Utc::now())
        {
            self.stop_flags.remove(&campaign_id);
            return Err(err);
        }
        events.extend(self.lifecycle_event(&campaign));

        let stored = self.commit(campaign, events).await?;
        info!(
            campaign_id = %campaign_id,
            unsent = stored.pending_count(),
            "Campaign stopped"
        );
        Ok(stored)
    }

    // ── Delivery tick ───────────────────────────────────────────────────

    pub async fn execute(&self, campaign_id: Uuid) -> CampaignResult<TickReport> {
        self.execute_at(campaign_id, Utc::now()).await
    }

    /// Runs one delivery tick with `now` as the due-time cutoff. Completed
    /// campaigns are a no-op; any other status than `running` is rejected.
    pub async fn execute_at(&self, campaign_id: Uuid, now: DateTime<Utc>) -> CampaignResult<TickReport> {
        let started = Instant::now();
        let _guard = self.lock(campaign_id).await;
        let (mut campaign, recovered, mut events) = self.load_for_write(campaign_id).await?;

        match campaign.status {
            CampaignStatus::Running => {}
            CampaignStatus::Completed => return Ok(TickReport::new(&campaign)),
            status => {
                return Err(CampaignError::InvalidState {
                    campaign_id,
                    status,
                    action: "execute",
                })
            }
        }

        let mut report = TickReport::new(&campaign);
        report.recovered = recovered;
        let mut dirty = recovered > 0;

        if let Some(reason) = self.undeliverable_reason(&campaign) {
            warn!(campaign_id = %campaign_id, reason = %reason, "Campaign cannot be dispatched");
            self.state_machine.fail(&mut campaign, reason, now)?;
            events.extend(self.lifecycle_event(&campaign));
            let stored = self.commit(campaign, events).await?;
            report.status = stored.status;
            return Ok(report);
        }

        let cancel = self.stop_flag(campaign_id);
        if let Some(provider) = self.channels.get(campaign.channel) {
            let due: Vec<usize> = campaign
                .deliveries()
                .iter()
                .enumerate()
                .filter(|(_, record)| record.is_due(now))
                .map(|(index, _)| index)
                .collect();
            report.due = due.len();

            if !due.is_empty() {
                let (outcomes, cancelled) = self.dispatch_due(&campaign, &due, provider, &cancel).await?;
                report.cancelled = cancelled;
                report.attempted = outcomes.len();
                let touched = self.apply_outcomes(&mut campaign, outcomes, now, &mut report, &mut events);
                dirty |= !touched.is_empty();
                self.ledger.stage(campaign_id, touched, events.clone());
            }
        }

        if campaign.all_settled() {
            self.state_machine
                .apply(&mut campaign, CampaignAction::Complete, now)?;
            events.extend(self.lifecycle_event(&campaign));
            dirty = true;
        } else if cancel.load(Ordering::SeqCst) {
            report.cancelled = true;
            self.state_machine
                .apply(&mut campaign, CampaignAction::Stop, now)?;
            events.extend(self.lifecycle_event(&campaign));
            dirty = true;
        }

        report.remaining = campaign.pending_count();
        report.status = campaign.status;
        if dirty {
            let stored = self.commit(campaign, events).await?;
            report.status = stored.status;
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!("dispatch.tick_latency_ms").record(elapsed_ms);
        info!(
            campaign_id = %campaign_id,
            status = %report.status,
            due = report.due,
            delivered = report.delivered,
            failed = report.failed,
            retry_scheduled = report.retry_scheduled,
            remaining = report.remaining,
            elapsed_ms,
            "Dispatch tick finished"
        );
        Ok(report)
    }

    /// Why a running campaign with pending records can never be delivered.
    fn undeliverable_reason(&self, campaign: &Campaign) -> Option<String> {
        if campaign.all_settled() {
            return None;
        }
        if self.channels.get(campaign.channel).is_none() {
            return Some(format!("no provider registered for channel {}", campaign.channel));
        }
        if campaign.message_variants.is_empty() {
            return Some("campaign has no message variants".to_string());
        }
        None
    }

    /// Sends the due records. Recipients that cannot be reached are failed
    /// without a provider call. Returns the outcomes by record index and
    /// whether a stop request left some records unsent.
    async fn dispatch_due(
        &self,
        campaign: &Campaign,
        due: &[usize],
        provider: Arc<dyn ChannelProvider>,
        cancel: &AtomicBool,
    ) -> CampaignResult<(Vec<(usize, Outcome)>, bool)> {
        let records = campaign.deliveries();
        let customer_ids: Vec<Uuid> = due.iter().map(|&i| records[i].customer_id).collect();

        // A store failure here aborts the tick before anything is sent.
        let customers: Vec<_> = stream::iter(customer_ids)
            .map(|id| {
                let store = Arc::clone(&self.customers);
                async move { store.get(id).await }
            })
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        let mut outcomes = Vec::with_capacity(due.len());
        let mut jobs = Vec::with_capacity(due.len());
        for (&index, customer) in due.iter().zip(customers) {
            match prepare_job(campaign, index, customer.as_ref()) {
                Ok(job) => jobs.push(job),
                Err(reason) => outcomes.push((
                    index,
                    Outcome {
                        variant_index: None,
                        attempt: DeliveryAttempt::failure(Utc::now(), reason),
                        retryable: false,
                    },
                )),
            }
        }

        let mut pending = jobs.into_iter();
        let mut in_flight = JoinSet::new();
        loop {
            while in_flight.len() < self.max_concurrent && !cancel.load(Ordering::SeqCst) {
                let Some(job) = pending.next() else {
                    break;
                };
                let provider = Arc::clone(&provider);
                let timeout = self.provider_timeout;
                in_flight.spawn(async move { send_one(provider, job, timeout).await });
            }

            match in_flight.join_next().await {
                Some(Ok((index, outcome))) => outcomes.push((index, outcome)),
                Some(Err(err)) => {
                    // The record keeps its `scheduled` status for the next tick.
                    error!(campaign_id = %campaign.id, error = %err, "Dispatch task failed");
                }
                None => break,
            }
        }

        let unsent = pending.len();
        if unsent > 0 {
            info!(
                campaign_id = %campaign.id,
                unsent,
                "Stop requested, remaining dispatches skipped"
            );
        }
        Ok((outcomes, unsent > 0))
    }

    /// Records each outcome on its delivery record and applies the retry
    /// policy. Returns the touched records for the ledger.
    fn apply_outcomes(
        &self,
        campaign: &mut Campaign,
        mut outcomes: Vec<(usize, Outcome)>,
        now: DateTime<Utc>,
        report: &mut TickReport,
        events: &mut Vec<PipelineEvent>,
    ) -> Vec<(usize, DeliveryRecord)> {
        outcomes.sort_by_key(|(index, _)| *index);
        let campaign_id = campaign.id;
        let channel = campaign.channel.as_str();
        let Some(records) = campaign.deliveries_mut() else {
            return Vec::new();
        };

        let mut touched = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes {
            let Some(record) = records.get_mut(index) else {
                continue;
            };
            let customer_id = Some(record.customer_id);
            let error = outcome.attempt.error.clone().unwrap_or_default();
            let succeeded = outcome.attempt.succeeded();
            let attempted_at = outcome.attempt.timestamp;

            if outcome.variant_index.is_some() {
                record.variant_index = outcome.variant_index;
            }
            record.attempts.push(outcome.attempt);
            metrics::counter!("dispatch.attempts", "channel" => channel).increment(1);

            if succeeded {
                record.status = DeliveryStatus::Delivered;
                record.delivered_at = Some(attempted_at);
                report.delivered += 1;
                metrics::counter!("dispatch.delivered", "channel" => channel).increment(1);
                events.push(campaign_event(EventType::DeliverySucceeded, campaign_id, customer_id));
            } else if outcome.retryable && self.retry.should_retry(record.failed_attempts()) {
                let failures = record.failed_attempts();
                record.scheduled_time = self.retry.next_attempt_at(now, failures);
                report.retry_scheduled += 1;
                debug!(
                    campaign_id = %campaign_id,
                    customer_id = %record.customer_id,
                    failures,
                    retry_at = %record.scheduled_time,
                    "Delivery failed, retry scheduled"
                );
                events.push(
                    campaign_event(EventType::DeliveryRetryScheduled, campaign_id, customer_id)
                        .with_detail(error),
                );
            } else {
                record.status = DeliveryStatus::Failed;
                report.failed += 1;
                metrics::counter!("dispatch.failed", "channel" => channel).increment(1);
                warn!(
                    campaign_id = %campaign_id,
                    customer_id = %record.customer_id,
                    error = %error,
                    "Delivery failed"
                );
                events.push(
                    campaign_event(EventType::DeliveryFailed, campaign_id, customer_id)
                        .with_detail(error),
                );
            }
            touched.push((index, record.clone()));
        }
        touched
    }

    // ── Receipts ────────────────────────────────────────────────────────

    /// Attaches an asynchronous provider receipt to the attempt that carried
    /// its message id. A failure receipt on a delivered record marks it
    /// failed. Receipts already recorded are ignored.
    pub async fn reconcile_receipt(
        &self,
        campaign_id: Uuid,
        receipt: DeliveryReceipt,
    ) -> CampaignResult<Campaign> {
        let _guard = self.lock(campaign_id).await;
        let (mut campaign, _, mut events) = self.load_for_write(campaign_id).await?;

        let message_id = receipt.provider_message_id.clone();
        let record = campaign
            .deliveries_mut()
            .and_then(|records| {
                records.iter_mut().find(|record| {
                    record
                        .attempts
                        .iter()
                        .any(|a| a.provider_message_id.as_deref() == Some(message_id.as_str()))
                })
            })
            .ok_or_else(|| CampaignError::not_found("delivery receipt", &message_id))?;

        if record
            .receipts
            .iter()
            .any(|r| r.provider_message_id == receipt.provider_message_id && r.status == receipt.status)
        {
            return Ok(campaign);
        }

        let customer_id = record.customer_id;
        let status = receipt.status;
        if status.is_failure() && record.status == DeliveryStatus::Delivered {
            record.status = DeliveryStatus::Failed;
            record.delivered_at = None;
            warn!(
                campaign_id = %campaign_id,
                customer_id = %customer_id,
                provider_message_id = %message_id,
                "Provider reported delivery failure after acceptance"
            );
        }
        record.receipts.push(receipt);
        events.push(
            campaign_event(EventType::ReceiptReconciled, campaign_id, Some(customer_id))
                .with_detail(format!("{status:?}").to_lowercase()),
        );

        self.commit(campaign, events).await
    }

    // ── All campaigns ───────────────────────────────────────────────────

    /// Runs one tick for every running campaign in parallel. A failing
    /// campaign is logged and does not affect the others.
    pub async fn tick_all(self: &Arc<Self>) -> CampaignResult<Vec<TickReport>> {
        let running = self.campaigns.list_by_status(CampaignStatus::Running).await?;
        let mut ticks = JoinSet::new();
        for campaign in running {
            let this = Arc::clone(self);
            ticks.spawn(async move { (campaign.id, this.execute(campaign.id).await) });
        }

        let mut reports = Vec::new();
        while let Some(joined) = ticks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((campaign_id, Err(err))) => error!(
                    campaign_id = %campaign_id,
                    error = %err,
                    kind = err.kind(),
                    "Campaign tick failed"
                ),
                Err(err) => error!(error = %err, "Campaign tick task failed"),
            }
        }
        Ok(reports)
    }
}

/// Builds the outbound message for one record, or the reason the recipient
/// cannot be reached.
fn prepare_job(
    campaign: &Campaign,
    index: usize,
    customer: Option<&Customer>,
) -> Result<DispatchJob, String> {
    let customer_id = campaign.deliveries()[index].customer_id;
    let customer = customer.ok_or_else(|| format!("customer {customer_id} not found"))?;
    let to = destination(campaign.channel, customer).ok_or_else(|| {
        let field = match campaign.channel {
            Channel::Email => "email address",
            Channel::Sms => "phone number",
        };
        format!("customer {customer_id} has no {field}")
    })?;
    let (variant_index, variant) = select_variant(&campaign.message_variants, customer)
        .ok_or_else(|| format!("campaign {} has no message variants", campaign.id))?;

    Ok(DispatchJob {
        index,
        variant_index,
        message: OutboundMessage {
            campaign_id: campaign.id,
            customer_id,
            channel: campaign.channel,
            destination: to.to_string(),
            subject: variant.subject.as_deref().map(|s| render(s, customer)),
            body: render(&variant.body, customer),
        },
    })
}

async fn send_one(
    provider: Arc<dyn ChannelProvider>,
    job: DispatchJob,
    timeout: Duration,
) -> (usize, Outcome) {
    let sent = tokio::time::timeout(timeout, provider.send(&job.message)).await;
    let attempt = match sent {
        Ok(Ok(response)) => {
            debug!(
                campaign_id = %job.message.campaign_id,
                customer_id = %job.message.customer_id,
                provider = provider.name(),
                provider_message_id = %response.provider_message_id,
                "Message accepted"
            );
            DeliveryAttempt::success(
                response.accepted_at,
                response.provider_message_id,
                response.detail,
            )
        }
        Ok(Err(err)) => DeliveryAttempt::failure(Utc::now(), err.to_string()),
        Err(_) => DeliveryAttempt::failure(
            Utc::now(),
            format!(
                "provider {} timed out after {}ms",
                provider.name(),
                timeout.as_millis()
            ),
        ),
    };
    (
        job.index,
        Outcome {
            variant_index: Some(job.variant_index),
            attempt,
            retryable: true,
        },
    )
}
