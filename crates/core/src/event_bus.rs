//! Event bus trait for emitting pipeline events from any module.
//!
//! Modules accept an `Arc<dyn EventSink>` to publish lifecycle and delivery
//! events to analytics, audit, or webhook consumers.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CampaignScheduled,
    CampaignStarted,
    CampaignCompleted,
    CampaignStopped,
    CampaignFailed,
    DeliverySucceeded,
    DeliveryFailed,
    DeliveryRetryScheduled,
    ReceiptReconciled,
    SegmentCountRefreshed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: Option<Uuid>,
    pub segment_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Trait for emitting pipeline events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: PipelineEvent) {}
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Campaign-scoped event.
pub fn campaign_event(
    event_type: EventType,
    campaign_id: Uuid,
    customer_id: Option<Uuid>,
) -> PipelineEvent {
    PipelineEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id: Some(campaign_id),
        segment_id: None,
        customer_id,
        detail: None,
        timestamp: Utc::now(),
    }
}

/// Segment-scoped event.
pub fn segment_event(event_type: EventType, segment_id: Uuid) -> PipelineEvent {
    PipelineEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id: None,
        segment_id: Some(segment_id),
        customer_id: None,
        detail: None,
        timestamp: Utc::now(),
    }
}
