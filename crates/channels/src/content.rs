//! Template-driven content generation. Produces deterministic message
//! variants from a campaign goal and audience description, short delivery
//! summaries, and goal-derived campaign tags.

use async_trait::async_trait;

use campaign_core::content::ContentGenerator;
use campaign_core::types::{CampaignStats, MessageVariant};
use campaign_core::{CampaignError, CampaignResult};

/// Goal keywords and the tag each one implies.
const TAG_KEYWORDS: &[(&str, &str)] = &[
    ("discount", "promotion"),
    ("sale", "promotion"),
    ("offer", "promotion"),
    ("% off", "promotion"),
    ("coupon", "promotion"),
    ("welcome", "onboarding"),
    ("onboard", "onboarding"),
    ("miss you", "win-back"),
    ("come back", "win-back"),
    ("inactive", "win-back"),
    ("win back", "win-back"),
    ("launch", "product-launch"),
    ("new arrival", "product-launch"),
    ("holiday", "seasonal"),
    ("christmas", "seasonal"),
    ("black friday", "seasonal"),
    ("summer", "seasonal"),
    ("vip", "loyalty"),
    ("loyal", "loyalty"),
    ("reward", "loyalty"),
    ("newsletter", "newsletter"),
];

#[derive(Debug, Clone, Default)]
pub struct TemplateContentGenerator {
    brand: String,
}

impl TemplateContentGenerator {
    pub fn new(brand: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
        }
    }

    fn sign_off(&self) -> String {
        if self.brand.is_empty() {
            String::new()
        } else {
            format!("\n\n{}", self.brand)
        }
    }
}

#[async_trait]
impl ContentGenerator for TemplateContentGenerator {
    async fn generate(
        &self,
        goal: &str,
        segment_descriptor: &str,
    ) -> CampaignResult<Vec<MessageVariant>> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(CampaignError::validation(
                "content generation",
                "campaign goal is empty",
            ));
        }
        let audience = segment_descriptor.trim();
        let sign_off = self.sign_off();

        Ok(vec![
            MessageVariant::new(
                Some(&format!("Picked for you: {goal}")),
                format!(
                    "Hi {{{{name}}}}, as one of our most valued customers you get first access: {goal}. Shop now.{sign_off}"
                ),
            )
            .with_tags(&["vip", "loyal"]),
            MessageVariant::new(
                Some(&format!("We saved something for you: {goal}")),
                format!(
                    "Hi {{{{name}}}}, it has been a while. Come back and enjoy this: {goal}.{sign_off}"
                ),
            )
            .with_tags(&["inactive", "lapsed"]),
            MessageVariant::new(
                Some(&capitalize(goal)),
                format!(
                    "Hi {{{{name}}}}, {goal}. Made for {audience}. Don't miss out.{sign_off}"
                ),
            ),
        ])
    }

    async fn summarize(&self, stats: &CampaignStats) -> CampaignResult<String> {
        if stats.total == 0 {
            return Ok("No deliveries were planned for this campaign.".to_string());
        }

        let mut summary = format!(
            "{} of {} messages delivered ({:.1}% delivery rate), {} failed",
            stats.delivered, stats.rate_denominator, stats.delivery_rate, stats.failed
        );
        if stats.scheduled > 0 {
            summary.push_str(&format!(", {} still scheduled", stats.scheduled));
        }
        summary.push('.');

        if stats.retried > 0 {
            summary.push_str(&format!(
                " {} recipients needed more than one attempt.",
                stats.retried
            ));
        }

        for (channel, breakdown) in &stats.channel_breakdown {
            summary.push_str(&format!(
                " {}: {} delivered, {} failed.",
                channel, breakdown.delivered, breakdown.failed
            ));
        }

        let recommendation = if stats.rate_denominator == 0 {
            "Deliveries have not been attempted yet."
        } else if stats.delivery_rate >= 95.0 {
            "Delivery health is excellent."
        } else if stats.delivery_rate >= 80.0 {
            "Review failed recipients for stale contact details."
        } else {
            "Delivery rate is low: verify provider configuration and clean the audience's contact data before the next send."
        };
        summary.push(' ');
        summary.push_str(recommendation);

        Ok(summary)
    }

    fn suggest_tags(&self, goal: &str) -> Vec<String> {
        let goal = goal.to_lowercase();
        let mut tags: Vec<String> = TAG_KEYWORDS
            .iter()
            .filter(|(keyword, _)| goal.contains(keyword))
            .map(|(_, tag)| tag.to_string())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
