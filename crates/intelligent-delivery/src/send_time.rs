//! Send-time optimization: predicts the best time to send each customer a
//! message.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campaign_core::types::{CampaignType, Customer};
use campaign_core::CampaignResult;

/// Predicts a send time for one customer. Implementations may be slow or
/// fail; the scheduler bounds each call with a timeout and falls back to the
/// window start.
#[async_trait]
pub trait SendTimePredictor: Send + Sync {
    async fn predict(
        &self,
        customer: &Customer,
        campaign_type: CampaignType,
        not_before: DateTime<Utc>,
    ) -> CampaignResult<DateTime<Utc>>;
}

/// Metadata key a customer record may carry to pin its preferred hour (UTC).
pub const PREFERRED_HOUR_KEY: &str = "preferredSendHour";

/// Minimum sample size before a personal profile overrides the global curve.
const PERSONAL_PROFILE_MIN_MESSAGES: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementProfile {
    pub customer_id: Uuid,
    pub hourly_open_rates: [f32; 24],
    pub total_messages: u64,
    pub total_opens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendTimeRecommendation {
    pub customer_id: Uuid,
    pub hour: u32,
    pub confidence: f32,
    pub predicted_open_rate: f32,
    pub method: OptimizationMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    CustomerPreference,
    PersonalOptimal,
    GlobalBest,
}

/// Deterministic predictor driven by hourly open-rate curves: a customer's
/// own curve once enough history exists, otherwise the global curve.
pub struct EngagementSendTimePredictor {
    profiles: dashmap::DashMap<Uuid, EngagementProfile>,
    global_hourly_rates: [f32; 24],
}

impl EngagementSendTimePredictor {
    pub fn new() -> Self {
        let global_hourly_rates = [
            0.02, 0.01, 0.01, 0.01, 0.01, 0.02, 0.04, 0.06, 0.08, 0.09, 0.08, 0.07, 0.06, 0.05,
            0.05, 0.05, 0.05, 0.06, 0.06, 0.05, 0.04, 0.03, 0.03, 0.02,
        ];
        Self {
            profiles: dashmap::DashMap::new(),
            global_hourly_rates,
        }
    }

    pub fn update_profile(&self, profile: EngagementProfile) {
        self.profiles.insert(profile.customer_id, profile);
    }

    pub fn recommend(&self, customer: &Customer) -> SendTimeRecommendation {
        if let Some(hour) = preferred_hour(customer) {
            return SendTimeRecommendation {
                customer_id: customer.id,
                hour,
                confidence: 1.0,
                predicted_open_rate: self.global_hourly_rates[hour as usize],
                method: OptimizationMethod::CustomerPreference,
            };
        }

        if let Some(profile) = self.profiles.get(&customer.id) {
            if profile.total_messages >= PERSONAL_PROFILE_MIN_MESSAGES {
                let hour = best_hour(&profile.hourly_open_rates, 10);
                return SendTimeRecommendation {
                    customer_id: customer.id,
                    hour: hour as u32,
                    confidence: 0.85,
                    predicted_open_rate: profile.hourly_open_rates[hour],
                    method: OptimizationMethod::PersonalOptimal,
                };
            }
        }

        let hour = best_hour(&self.global_hourly_rates, 9);
        SendTimeRecommendation {
            customer_id: customer.id,
            hour: hour as u32,
            confidence: 0.5,
            predicted_open_rate: self.global_hourly_rates[hour],
            method: OptimizationMethod::GlobalBest,
        }
    }
}

impl Default for EngagementSendTimePredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SendTimePredictor for EngagementSendTimePredictor {
    async fn predict(
        &self,
        customer: &Customer,
        campaign_type: CampaignType,
        not_before: DateTime<Utc>,
    ) -> CampaignResult<DateTime<Utc>> {
        // Transactional messages go out as soon as allowed.
        if campaign_type == CampaignType::Transactional {
            return Ok(not_before);
        }
        let recommendation = self.recommend(customer);
        Ok(next_occurrence_of_hour(not_before, recommendation.hour))
    }
}

fn preferred_hour(customer: &Customer) -> Option<u32> {
    customer
        .metadata
        .get(PREFERRED_HOUR_KEY)
        .and_then(serde_json::Value::as_u64)
        .filter(|h| *h < 24)
        .map(|h| h as u32)
}

fn best_hour(rates: &[f32; 24], fallback: usize) -> usize {
    rates
        .iter()
        .enumerate()
        .max_by(|a, b| {
            a.1.partial_cmp(b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Prefer the earliest hour on ties.
                .then_with(|| b.0.cmp(&a.0))
        })
        .map(|(i, _)| i)
        .unwrap_or(fallback)
}

/// First instant at `hour:00` UTC that is not before `not_before`.
pub fn next_occurrence_of_hour(not_before: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    let candidate = not_before.date_naive().and_time(time).and_utc();
    if candidate >= not_before {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}
