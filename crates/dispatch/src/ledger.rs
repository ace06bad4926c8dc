//! Outcomes of ticks whose commit failed.
//!
//! A tick that sent messages but could not persist the campaign parks the
//! updated records here. The next tick for the campaign folds them back in
//! before selecting due records, so accepted sends are never repeated.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use campaign_core::event_bus::PipelineEvent;
use campaign_core::types::{Campaign, DeliveryRecord};

#[derive(Debug, Default, Clone)]
struct PendingTick {
    records: BTreeMap<usize, DeliveryRecord>,
    events: Vec<PipelineEvent>,
}

#[derive(Debug, Default)]
pub struct PendingLedger {
    pending: DashMap<Uuid, PendingTick>,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks records touched by a tick, keyed by their index in the
    /// campaign's delivery list. Later stages overwrite earlier ones for the
    /// same index. `events` replaces the parked events: a tick stages the
    /// events it recovered together with its own.
    pub fn stage(
        &self,
        campaign_id: Uuid,
        records: impl IntoIterator<Item = (usize, DeliveryRecord)>,
        events: Vec<PipelineEvent>,
    ) {
        let mut entry = self.pending.entry(campaign_id).or_default();
        entry.records.extend(records);
        entry.events = events;
    }

    /// Folds parked records into `campaign`. A parked record replaces the
    /// stored one only if it belongs to the same customer and carries more
    /// attempts. Returns how many records were restored and the events that
    /// were never emitted.
    pub fn apply(&self, campaign: &mut Campaign) -> (usize, Vec<PipelineEvent>) {
        let Some(pending) = self.pending.get(&campaign.id).map(|p| p.clone()) else {
            return (0, Vec::new());
        };
        let Some(records) = campaign.deliveries_mut() else {
            return (0, Vec::new());
        };

        let mut recovered = 0;
        for (index, parked) in pending.records {
            let Some(stored) = records.get_mut(index) else {
                continue;
            };
            if stored.customer_id == parked.customer_id
                && parked.attempts.len() > stored.attempts.len()
            {
                *stored = parked;
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(
                campaign_id = %campaign.id,
                recovered,
                "Restored delivery outcomes from uncommitted tick"
            );
        }
        (recovered, pending.events)
    }

    pub fn clear(&self, campaign_id: Uuid) {
        self.pending.remove(&campaign_id);
    }

    pub fn has_pending(&self, campaign_id: Uuid) -> bool {
        self.pending.contains_key(&campaign_id)
    }
}
