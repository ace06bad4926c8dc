//! Caller-facing campaign operations. HTTP handlers and the binary go
//! through `CampaignService`; it wires the evaluator, scheduler, and
//! orchestrator over one set of stores.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use campaign_core::channels::ChannelRegistry;
use campaign_core::config::AppConfig;
use campaign_core::content::ContentGenerator;
use campaign_core::event_bus::{noop_sink, EventSink};
use campaign_core::store::{CampaignStore, Stores};
use campaign_core::types::{
    Campaign, CampaignStats, CampaignStatus, CampaignType, Channel, DeliveryReceipt,
    MessageVariant, Rule, RuleCombinator, Schedule, ScheduleWindow, Segment,
};
use campaign_core::{CampaignError, CampaignResult};
use campaign_intelligent_delivery::{DeliveryScheduler, SendTimePredictor};
use campaign_reporting::stats::StatsOverview;
use campaign_reporting::{aggregate, build_report, CampaignReport, StatsAggregator};
use campaign_segmentation::{SegmentEvaluator, SegmentPreview, SegmentStats};

use crate::orchestrator::{DispatchOrchestrator, TickReport};

const ALL_STATUSES: [CampaignStatus; 6] = [
    CampaignStatus::Draft,
    CampaignStatus::Scheduled,
    CampaignStatus::Running,
    CampaignStatus::Completed,
    CampaignStatus::Failed,
    CampaignStatus::Stopped,
];

/// Input for [`CampaignService::create_campaign`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    pub name: String,
    #[serde(default)]
    pub goal: String,
    pub channel: Channel,
    #[serde(default, rename = "type")]
    pub campaign_type: CampaignType,
    pub target_segment_id: Uuid,
    /// Generated from the goal when empty.
    #[serde(default)]
    pub message_variants: Vec<MessageVariant>,
    #[serde(default)]
    pub optimize_send_time: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub window: Option<ScheduleWindow>,
}

impl NewCampaign {
    pub fn new(name: impl Into<String>, channel: Channel, target_segment_id: Uuid) -> Self {
        Self {
            name: name.into(),
            goal: String::new(),
            channel,
            campaign_type: CampaignType::default(),
            target_segment_id,
            message_variants: Vec::new(),
            optimize_send_time: false,
            tags: Vec::new(),
            window: None,
        }
    }
}

pub struct CampaignServiceBuilder {
    stores: Stores,
    content: Arc<dyn ContentGenerator>,
    config: AppConfig,
    channels: ChannelRegistry,
    predictor: Option<Arc<dyn SendTimePredictor>>,
    event_sink: Arc<dyn EventSink>,
}

impl CampaignServiceBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn channels(mut self, channels: ChannelRegistry) -> Self {
        self.channels = channels;
        self
    }

    pub fn predictor(mut self, predictor: Arc<dyn SendTimePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Fails with `CampaignError::Config` when the scheduler settings are out
    /// of range.
    pub fn build(self) -> CampaignResult<CampaignService> {
        let default_window = self.config.scheduler.default_window()?;
        let evaluator = Arc::new(
            SegmentEvaluator::new(
                Arc::clone(&self.stores.customers),
                Arc::clone(&self.stores.segments),
                &self.config.segmentation,
            )
            .with_event_sink(Arc::clone(&self.event_sink)),
        );

        let mut scheduler = DeliveryScheduler::new(&self.config.scheduler);
        if let Some(predictor) = self.predictor {
            scheduler = scheduler.with_predictor(predictor);
        }

        let orchestrator = DispatchOrchestrator::new(
            Arc::clone(&self.stores.campaigns),
            Arc::clone(&self.stores.customers),
            Arc::clone(&evaluator),
            Arc::new(scheduler),
            self.channels,
            &self.config.dispatch,
        )
        .with_event_sink(self.event_sink)
        .with_stats(Arc::new(StatsAggregator::new()))
        .with_default_window(default_window);

        info!(
            node_id = %self.config.node_id,
            channels = ?orchestrator.channels().channels(),
            "Campaign service ready"
        );

        Ok(CampaignService {
            campaigns: self.stores.campaigns,
            evaluator,
            orchestrator: Arc::new(orchestrator),
            content: self.content,
        })
    }
}

pub struct CampaignService {
    campaigns: Arc<dyn CampaignStore>,
    evaluator: Arc<SegmentEvaluator>,
    orchestrator: Arc<DispatchOrchestrator>,
    content: Arc<dyn ContentGenerator>,
}

impl CampaignService {
    pub fn builder(stores: Stores, content: Arc<dyn ContentGenerator>) -> CampaignServiceBuilder {
        CampaignServiceBuilder {
            stores,
            content,
            config: AppConfig::default(),
            channels: ChannelRegistry::new(),
            predictor: None,
            event_sink: noop_sink(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<DispatchOrchestrator> {
        &self.orchestrator
    }

    pub fn evaluator(&self) -> &Arc<SegmentEvaluator> {
        &self.evaluator
    }

    // ── Segments ────────────────────────────────────────────────────────

    pub async fn create_segment(&self, segment: Segment) -> CampaignResult<Segment> {
        SegmentEvaluator::validate_segment(&segment)?;
        let stored = self.evaluator.segments().insert(segment).await?;
        info!(segment_id = %stored.id, rules = stored.rules.len(), "Segment created");
        Ok(stored)
    }

    /// Replaces a segment's rules. The cached count stays as it was but is
    /// no longer reported as exact until the next refresh.
    pub async fn update_segment_rules(
        &self,
        segment_id: Uuid,
        rules: Vec<Rule>,
        combinator: RuleCombinator,
    ) -> CampaignResult<Segment> {
        let mut segment = self.evaluator.get_segment(segment_id).await?;
        segment.set_rules(rules, combinator);
        SegmentEvaluator::validate_segment(&segment)?;
        self.evaluator.segments().update(segment).await
    }

    pub async fn get_segment(&self, segment_id: Uuid) -> CampaignResult<Segment> {
        self.evaluator.get_segment(segment_id).await
    }

    pub async fn list_segments(&self) -> CampaignResult<Vec<Segment>> {
        self.evaluator.segments().list().await
    }

    pub async fn preview_segment(
        &self,
        segment_id: Uuid,
        page: usize,
        limit: Option<usize>,
    ) -> CampaignResult<SegmentPreview> {
        self.evaluator.preview(segment_id, page, limit).await
    }

    pub async fn segment_stats(&self, segment_id: Uuid) -> CampaignResult<SegmentStats> {
        let segment = self.evaluator.get_segment(segment_id).await?;
        self.evaluator.stats(&segment, Utc::now()).await
    }

    pub async fn refresh_segment_count(&self, segment_id: Uuid) -> CampaignResult<Segment> {
        self.evaluator.update_count(segment_id).await
    }

    // ── Campaigns ───────────────────────────────────────────────────────

    /// Creates a draft campaign. Variants are generated from the goal and the
    /// target segment when none are given, and tags suggested by the content
    /// generator are merged into the supplied ones.
    pub async fn create_campaign(&self, request: NewCampaign) -> CampaignResult<Campaign> {
        if request.name.trim().is_empty() {
            return Err(CampaignError::validation("campaign", "name is required"));
        }
        if let Some(window) = &request.window {
            window.validate()?;
        }
        let segment = self.evaluator.get_segment(request.target_segment_id).await?;

        let mut variants = request.message_variants;
        if variants.is_empty() {
            variants = self
                .content
                .generate(&request.goal, &segment.descriptor())
                .await?;
        }
        if variants.is_empty() {
            return Err(CampaignError::validation(
                "campaign",
                "at least one message variant is required",
            ));
        }

        let mut tags = request.tags;
        tags.extend(self.content.suggest_tags(&request.goal));
        tags.sort();
        tags.dedup();

        let mut campaign = Campaign::new(request.name, request.channel, segment.id);
        campaign.goal = request.goal;
        campaign.campaign_type = request.campaign_type;
        campaign.message_variants = variants;
        campaign.optimize_send_time = request.optimize_send_time;
        campaign.tags = tags;
        campaign.schedule = request.window.map(|w| Schedule::new(w, Vec::new()));

        let stored = self.campaigns.insert(campaign).await?;
        info!(
            campaign_id = %stored.id,
            segment_id = %segment.id,
            channel = %stored.channel,
            variants = stored.message_variants.len(),
            "Campaign created"
        );
        Ok(stored)
    }

    pub async fn get_campaign(&self, campaign_id: Uuid) -> CampaignResult<Campaign> {
        self.orchestrator.load(campaign_id).await
    }

    pub async fn list_campaigns(&self, status: Option<CampaignStatus>) -> CampaignResult<Vec<Campaign>> {
        match status {
            Some(status) => self.campaigns.list_by_status(status).await,
            None => {
                let mut all = Vec::new();
                for status in ALL_STATUSES {
                    all.extend(self.campaigns.list_by_status(status).await?);
                }
                all.sort_by_key(|c| c.created_at);
                Ok(all)
            }
        }
    }

    pub async fn schedule_campaign(
        &self,
        campaign_id: Uuid,
        window: ScheduleWindow,
    ) -> CampaignResult<Campaign> {
        self.orchestrator.schedule(campaign_id, window).await
    }

    pub async fn start_campaign(&self, campaign_id: Uuid) -> CampaignResult<Campaign> {
        self.orchestrator.start(campaign_id).await
    }

    /// Runs one delivery tick now. Safe to call repeatedly.
    pub async fn execute_campaign(&self, campaign_id: Uuid) -> CampaignResult<TickReport> {
        self.orchestrator.execute(campaign_id).await
    }

    pub async fn stop_campaign(&self, campaign_id: Uuid) -> CampaignResult<Campaign> {
        self.orchestrator.stop(campaign_id).await
    }

    pub async fn reconcile_receipt(
        &self,
        campaign_id: Uuid,
        receipt: DeliveryReceipt,
    ) -> CampaignResult<Campaign> {
        self.orchestrator.reconcile_receipt(campaign_id, receipt).await
    }

    // ── Reporting ───────────────────────────────────────────────────────

    pub async fn get_campaign_stats(&self, campaign_id: Uuid) -> CampaignResult<CampaignStats> {
        let campaign = self.orchestrator.load(campaign_id).await?;
        Ok(aggregate(campaign.deliveries(), campaign.channel, campaign.status))
    }

    pub async fn get_campaign_report(&self, campaign_id: Uuid) -> CampaignResult<CampaignReport> {
        let campaign = self.orchestrator.load(campaign_id).await?;
        Ok(build_report(&campaign, self.content.as_ref()).await)
    }

    /// Totals across every campaign touched since this process started.
    pub fn stats_overview(&self) -> StatsOverview {
        self.orchestrator.stats().overview()
    }
}
