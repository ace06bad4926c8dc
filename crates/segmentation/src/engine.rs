//! Segment evaluator. Streams a segment's matching customers out of the
//! customer store page by page, and maintains the cached segment count.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use campaign_core::config::SegmentationConfig;
use campaign_core::event_bus::{noop_sink, segment_event, EventSink, EventType};
use campaign_core::locks::KeyedLocks;
use campaign_core::store::{CustomerQuery, CustomerStore, SegmentStore};
use campaign_core::types::{Customer, RuleCombinator, Segment};
use campaign_core::{CampaignError, CampaignResult};

use crate::computed::{RecencyBucket, RecencyDistribution};
use crate::predicates::{segment_matches, validate_rule};

/// Lazy, finite stream of matched customers. Each call to
/// [`SegmentEvaluator::evaluate`] restarts from the first page.
pub type AudienceStream = BoxStream<'static, CampaignResult<Customer>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStats {
    pub segment_id: Uuid,
    pub count: u64,
    pub average_total_spent: f64,
    pub days_since_last_order: RecencyDistribution,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPreview {
    pub segment_id: Uuid,
    pub page: usize,
    pub limit: usize,
    pub total: u64,
    pub pages: u64,
    pub customers: Vec<Customer>,
}

pub struct SegmentEvaluator {
    customers: Arc<dyn CustomerStore>,
    segments: Arc<dyn SegmentStore>,
    locks: KeyedLocks,
    page_size: usize,
    preview_limit: usize,
    event_sink: Arc<dyn EventSink>,
}

impl SegmentEvaluator {
    pub fn new(
        customers: Arc<dyn CustomerStore>,
        segments: Arc<dyn SegmentStore>,
        config: &SegmentationConfig,
    ) -> Self {
        Self {
            customers,
            segments,
            locks: KeyedLocks::new(),
            page_size: config.page_size.max(1),
            preview_limit: config.preview_limit.max(1),
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn segments(&self) -> &Arc<dyn SegmentStore> {
        &self.segments
    }

    pub async fn get_segment(&self, segment_id: Uuid) -> CampaignResult<Segment> {
        self.segments
            .get(segment_id)
            .await?
            .ok_or_else(|| CampaignError::not_found("segment", segment_id))
    }

    /// Rejects structurally invalid rules, naming the segment and rule index.
    pub fn validate_segment(segment: &Segment) -> CampaignResult<()> {
        for (index, rule) in segment.rules.iter().enumerate() {
            validate_rule(rule).map_err(|message| {
                CampaignError::validation(
                    format!("segment {} rule {}", segment.id, index),
                    message,
                )
            })?;
        }
        Ok(())
    }

    /// Opens a stream over the customers matching `segment`. Pages are fetched
    /// only as the stream is polled. Rules are offered to the store as a
    /// pushdown hint and every customer is re-checked here regardless.
    pub fn evaluate(&self, segment: &Segment) -> CampaignResult<AudienceStream> {
        Self::validate_segment(segment)?;

        if segment.rules.is_empty() && segment.combinator == RuleCombinator::Or {
            return Ok(stream::empty().boxed());
        }

        let query = CustomerQuery {
            rules: segment.rules.clone(),
            combinator: segment.combinator,
        };
        let store = Arc::clone(&self.customers);
        let page_size = self.page_size;

        let pages = stream::try_unfold(Some(0usize), move |cursor| {
            let store = Arc::clone(&store);
            let query = query.clone();
            async move {
                let Some(offset) = cursor else {
                    return Ok(None);
                };
                let page = store.fetch_page(&query, offset, page_size).await?;
                debug!(offset, fetched = page.customers.len(), "Fetched customer page");
                // A store that does not advance would loop forever.
                let next = page.next_offset.filter(|next| *next > offset);
                let customers = stream::iter(page.customers.into_iter().map(Ok::<_, CampaignError>));
                Ok::<_, CampaignError>(Some((customers, next)))
            }
        });

        let rules = segment.rules.clone();
        let combinator = segment.combinator;
        let matched = pages
            .try_flatten()
            .try_filter(move |customer| future::ready(segment_matches(&rules, combinator, customer)))
            .inspect_ok(|_| metrics::counter!("segment.evaluated").increment(1));

        Ok(matched.boxed())
    }

    /// Drains the stream into memory, preserving store order.
    pub async fn collect_audience(&self, segment: &Segment) -> CampaignResult<Vec<Customer>> {
        self.evaluate(segment)?.try_collect().await
    }

    pub async fn count(&self, segment: &Segment) -> CampaignResult<u64> {
        self.evaluate(segment)?
            .try_fold(0u64, |n, _| future::ready(Ok(n + 1)))
            .await
    }

    /// Recounts the segment and persists `customer_count` for its current rules
    /// version. One refresh per segment runs at a time; repeating it without a
    /// population change stores the same count.
    pub async fn update_count(&self, segment_id: Uuid) -> CampaignResult<Segment> {
        let _guard = self.locks.acquire(segment_id).await;

        let mut segment = self.get_segment(segment_id).await?;
        let rules_version = segment.rules_version;
        let count = self.count(&segment).await?;

        segment.record_count(count, rules_version, Utc::now());
        let stored = self.segments.update(segment).await?;

        info!(
            segment_id = %segment_id,
            count,
            rules_version,
            "Segment count refreshed"
        );
        self.event_sink.emit(
            segment_event(EventType::SegmentCountRefreshed, segment_id)
                .with_detail(count.to_string()),
        );
        Ok(stored)
    }

    pub async fn stats(&self, segment: &Segment, now: DateTime<Utc>) -> CampaignResult<SegmentStats> {
        let (count, spent, recency) = self
            .evaluate(segment)?
            .try_fold(
                (0u64, 0f64, RecencyDistribution::default()),
                |(count, spent, mut recency), customer| {
                    recency.record(RecencyBucket::of(&customer, now));
                    future::ready(Ok((count + 1, spent + customer.total_spent, recency)))
                },
            )
            .await?;

        let average_total_spent = if count == 0 {
            0.0
        } else {
            spent / count as f64
        };

        Ok(SegmentStats {
            segment_id: segment.id,
            count,
            average_total_spent,
            days_since_last_order: recency,
            computed_at: now,
        })
    }

    /// One page (1-based) of matched customers with the total match count.
    /// `limit` defaults to and is capped by the configured preview limit.
    pub async fn preview(
        &self,
        segment_id: Uuid,
        page: usize,
        limit: Option<usize>,
    ) -> CampaignResult<SegmentPreview> {
        if page == 0 {
            return Err(CampaignError::validation(
                format!("segment {segment_id} preview"),
                "page numbers start at 1",
            ));
        }
        let limit = limit
            .unwrap_or(self.preview_limit)
            .clamp(1, self.preview_limit);
        let segment = self.get_segment(segment_id).await?;
        let skip = (page - 1).saturating_mul(limit);

        let (total, customers) = self
            .evaluate(&segment)?
            .try_fold((0u64, Vec::new()), |(total, mut picked), customer| {
                let position = total as usize;
                if position >= skip && picked.len() < limit {
                    picked.push(customer);
                }
                future::ready(Ok((total + 1, picked)))
            })
            .await?;

        Ok(SegmentPreview {
            segment_id,
            page,
            limit,
            total,
            pages: total.div_ceil(limit as u64),
            customers,
        })
    }
}
