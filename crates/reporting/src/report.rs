//! Campaign report: delivery statistics plus a generated narrative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use campaign_core::content::ContentGenerator;
use campaign_core::types::{Campaign, CampaignStats, CampaignStatus};

use crate::stats::aggregate;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignReport {
    pub campaign_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub stats: CampaignStats,
    pub summary: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Builds the report for `campaign`. A generator failure degrades to a plain
/// counts-only summary rather than failing the report.
pub async fn build_report(campaign: &Campaign, generator: &dyn ContentGenerator) -> CampaignReport {
    let stats = aggregate(campaign.deliveries(), campaign.channel, campaign.status);
    let summary = match generator.summarize(&stats).await {
        Ok(summary) => summary,
        Err(err) => {
            warn!(
                campaign_id = %campaign.id,
                error = %err,
                "Summary generation failed, using plain summary"
            );
            format!(
                "{} delivered, {} failed, {} scheduled.",
                stats.delivered, stats.failed, stats.scheduled
            )
        }
    };

    CampaignReport {
        campaign_id: campaign.id,
        name: campaign.name.clone(),
        status: campaign.status,
        stats,
        summary,
        failure_reason: campaign.failure_reason.clone(),
        generated_at: Utc::now(),
    }
}
