//! Delivery statistics. Pure folds over delivery records; nothing here
//! touches storage.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campaign_core::types::{
    CampaignStats, CampaignStatus, Channel, ChannelStats, DeliveryRecord, DeliveryStatus,
};

/// Percentage of `delivered` over `denominator`, 0 when nothing counts yet.
pub fn delivery_rate(delivered: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        delivered as f64 / denominator as f64 * 100.0
    }
}

/// Folds a campaign's delivery records into statistics. While the campaign
/// is running, records still waiting to be sent are left out of the rate
/// denominator; once it stops running every record counts.
pub fn aggregate(records: &[DeliveryRecord], channel: Channel, status: CampaignStatus) -> CampaignStats {
    let mut stats = CampaignStats::default();
    for record in records {
        stats.total += 1;
        match record.status {
            DeliveryStatus::Scheduled => stats.scheduled += 1,
            DeliveryStatus::Delivered => stats.delivered += 1,
            DeliveryStatus::Failed => stats.failed += 1,
        }
        stats.attempts += record.attempts.len() as u64;
        if record.attempts.len() > 1 {
            stats.retried += 1;
        }
    }

    stats.rate_denominator = if status == CampaignStatus::Running {
        stats.total - stats.scheduled
    } else {
        stats.total
    };
    stats.delivery_rate = delivery_rate(stats.delivered, stats.rate_denominator);

    if stats.total > 0 {
        stats.channel_breakdown.insert(
            channel,
            ChannelStats {
                total: stats.total,
                scheduled: stats.scheduled,
                delivered: stats.delivered,
                failed: stats.failed,
            },
        );
    }
    stats
}

/// Sums several campaigns' statistics. The merged rate is recomputed from the
/// summed counts, not averaged.
pub fn merge<'a>(all: impl IntoIterator<Item = &'a CampaignStats>) -> CampaignStats {
    let mut merged = CampaignStats::default();
    for stats in all {
        merged.total += stats.total;
        merged.scheduled += stats.scheduled;
        merged.delivered += stats.delivered;
        merged.failed += stats.failed;
        merged.attempts += stats.attempts;
        merged.retried += stats.retried;
        merged.rate_denominator += stats.rate_denominator;
        for (channel, part) in &stats.channel_breakdown {
            let entry = merged.channel_breakdown.entry(*channel).or_default();
            entry.total += part.total;
            entry.scheduled += part.scheduled;
            entry.delivered += part.delivered;
            entry.failed += part.failed;
        }
    }
    merged.delivery_rate = delivery_rate(merged.delivered, merged.rate_denominator);
    merged
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub stats: CampaignStats,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOverview {
    pub campaigns: u64,
    pub running: u64,
    pub totals: CampaignStats,
    pub generated_at: DateTime<Utc>,
}

/// Latest statistics per campaign, refreshed after every tick, for
/// cross-campaign overviews without re-reading the delivery trails.
#[derive(Default)]
pub struct StatsAggregator {
    snapshots: DashMap<Uuid, StatsSnapshot>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, campaign_id: Uuid, status: CampaignStatus, stats: CampaignStats) {
        self.snapshots.insert(
            campaign_id,
            StatsSnapshot {
                campaign_id,
                status,
                stats,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, campaign_id: Uuid) -> Option<StatsSnapshot> {
        self.snapshots.get(&campaign_id).map(|s| s.clone())
    }

    pub fn overview(&self) -> StatsOverview {
        let all: Vec<StatsSnapshot> = self.snapshots.iter().map(|s| s.value().clone()).collect();
        StatsOverview {
            campaigns: all.len() as u64,
            running: all
                .iter()
                .filter(|s| s.status == CampaignStatus::Running)
                .count() as u64,
            totals: merge(all.iter().map(|s| &s.stats)),
            generated_at: Utc::now(),
        }
    }
}
