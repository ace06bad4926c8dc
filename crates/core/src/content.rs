//! Content generation contract. Called when a campaign is created and when a
//! report is produced, never on the dispatch path.

use async_trait::async_trait;

use crate::error::CampaignResult;
use crate::types::{CampaignStats, MessageVariant};

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produce message variants for a campaign goal aimed at a segment.
    async fn generate(
        &self,
        goal: &str,
        segment_descriptor: &str,
    ) -> CampaignResult<Vec<MessageVariant>>;

    /// Natural-language summary of delivery statistics.
    async fn summarize(&self, stats: &CampaignStats) -> CampaignResult<String>;

    /// Tags describing the campaign, derived from its goal.
    fn suggest_tags(&self, _goal: &str) -> Vec<String> {
        Vec::new()
    }
}
