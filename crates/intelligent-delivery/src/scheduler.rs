//! Delivery planning. Assigns each audience member one scheduled delivery
//! inside the campaign window.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use campaign_core::config::{SchedulerConfig, SpreadPolicy};
use campaign_core::types::{Campaign, Customer, DeliveryRecord, ScheduleWindow};
use campaign_core::CampaignResult;

use crate::send_time::SendTimePredictor;

pub struct DeliveryScheduler {
    predictor: Option<Arc<dyn SendTimePredictor>>,
    spread_policy: SpreadPolicy,
    predictor_timeout: Duration,
    predictor_concurrency: usize,
}

impl DeliveryScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            predictor: None,
            spread_policy: config.spread_policy,
            predictor_timeout: Duration::from_millis(config.predictor_timeout_ms),
            predictor_concurrency: config.predictor_concurrency.max(1),
        }
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn SendTimePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Builds one `scheduled` record per distinct customer, in audience order.
    /// Later duplicates of a customer id are dropped. Predicted times are
    /// clamped into `window`; a failed or late prediction falls back to the
    /// window start.
    pub async fn plan(
        &self,
        campaign: &Campaign,
        audience: Vec<Customer>,
        window: &ScheduleWindow,
    ) -> CampaignResult<Vec<DeliveryRecord>> {
        window.validate()?;

        let mut seen = HashSet::with_capacity(audience.len());
        let audience: Vec<Customer> = audience
            .into_iter()
            .filter(|c| seen.insert(c.id))
            .collect();

        let times = match (&self.predictor, campaign.optimize_send_time) {
            (Some(predictor), true) => self.predict_times(predictor, campaign, &audience, window).await,
            _ => spread_times(self.spread_policy, window, audience.len()),
        };

        debug!(
            campaign_id = %campaign.id,
            records = audience.len(),
            "Planned deliveries"
        );

        Ok(audience
            .iter()
            .zip(times)
            .map(|(customer, at)| DeliveryRecord::scheduled(customer.id, at))
            .collect())
    }

    async fn predict_times(
        &self,
        predictor: &Arc<dyn SendTimePredictor>,
        campaign: &Campaign,
        audience: &[Customer],
        window: &ScheduleWindow,
    ) -> Vec<DateTime<Utc>> {
        let campaign_id = campaign.id;
        let campaign_type = campaign.campaign_type;
        let window = *window;
        let timeout = self.predictor_timeout;

        // Each future owns its inputs so the plan can be driven from a
        // spawned task. `buffered` keeps results in audience order.
        let predictions = audience.iter().cloned().map(|customer| {
            let predictor = Arc::clone(predictor);
            async move {
                let predicted = tokio::time::timeout(
                    timeout,
                    predictor.predict(&customer, campaign_type, window.start_date),
                )
                .await;
                match predicted {
                    Ok(Ok(at)) => window.clamp(at),
                    Ok(Err(err)) => {
                        warn!(
                            campaign_id = %campaign_id,
                            customer_id = %customer.id,
                            error = %err,
                            "Send-time prediction failed, using window start"
                        );
                        metrics::counter!("scheduler.predictor_fallbacks").increment(1);
                        window.start_date
                    }
                    Err(_) => {
                        warn!(
                            campaign_id = %campaign_id,
                            customer_id = %customer.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Send-time prediction timed out, using window start"
                        );
                        metrics::counter!("scheduler.predictor_fallbacks").increment(1);
                        window.start_date
                    }
                }
            }
        });

        stream::iter(predictions)
            .buffered(self.predictor_concurrency)
            .collect()
            .await
    }
}

fn spread_times(policy: SpreadPolicy, window: &ScheduleWindow, n: usize) -> Vec<DateTime<Utc>> {
    match policy {
        SpreadPolicy::WindowStart => vec![window.start_date; n],
        SpreadPolicy::Even => {
            let span_ms = (window.end_date - window.start_date).num_milliseconds() as i128;
            (0..n)
                .map(|i| {
                    let offset = span_ms * i as i128 / n as i128;
                    window.start_date + chrono::Duration::milliseconds(offset as i64)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use campaign_core::types::Channel;
    use campaign_core::CampaignError;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn window() -> ScheduleWindow {
        ScheduleWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn audience(n: usize) -> Vec<Customer> {
        (0..n).map(|i| Customer::new(format!("c{i}"))).collect()
    }

    fn campaign(optimize: bool) -> Campaign {
        let mut c = Campaign::new("plan", Channel::Email, Uuid::new_v4());
        c.optimize_send_time = optimize;
        c
    }

    /// Returns `window start + offset_hours`, or fails / stalls for tagged
    /// customers.
    struct ScriptedPredictor {
        offset_hours: i64,
    }

    #[async_trait]
    impl SendTimePredictor for ScriptedPredictor {
        async fn predict(
            &self,
            customer: &Customer,
            _campaign_type: campaign_core::types::CampaignType,
            not_before: DateTime<Utc>,
        ) -> CampaignResult<DateTime<Utc>> {
            if customer.has_tag("fail") {
                return Err(CampaignError::Storage("model offline".into()));
            }
            if customer.has_tag("slow") {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(not_before + chrono::Duration::hours(self.offset_hours))
        }
    }

    fn scheduler(policy: SpreadPolicy) -> DeliveryScheduler {
        DeliveryScheduler::new(&SchedulerConfig {
            spread_policy: policy,
            predictor_timeout_ms: 50,
            predictor_concurrency: 4,
            default_window_hours: 24,
        })
    }

    #[tokio::test]
    async fn duplicates_collapse_first_wins() {
        let mut people = audience(3);
        people.push(people[1].clone());
        people.insert(0, people[2].clone());

        let records = scheduler(SpreadPolicy::WindowStart)
            .plan(&campaign(false), people.clone(), &window())
            .await
            .unwrap();

        let ids: Vec<Uuid> = records.iter().map(|r| r.customer_id).collect();
        assert_eq!(ids, vec![people[0].id, people[1].id, people[2].id]);
        assert!(records.iter().all(|r| r.scheduled_time == window().start_date));
    }

    #[tokio::test]
    async fn even_spread_divides_window() {
        let records = scheduler(SpreadPolicy::Even)
            .plan(&campaign(false), audience(4), &window())
            .await
            .unwrap();
        let hours: Vec<f64> = records
            .iter()
            .map(|r| (r.scheduled_time - window().start_date).num_minutes() as f64 / 60.0)
            .collect();
        assert_eq!(hours, vec![0.0, 2.5, 5.0, 7.5]);
    }

    #[tokio::test]
    async fn predictions_are_clamped_into_window() {
        let s = scheduler(SpreadPolicy::WindowStart)
            .with_predictor(Arc::new(ScriptedPredictor { offset_hours: 48 }));
        let records = s.plan(&campaign(true), audience(2), &window()).await.unwrap();
        assert!(records.iter().all(|r| r.scheduled_time == window().end_date));
    }

    #[tokio::test]
    async fn predictor_ignored_unless_campaign_opts_in() {
        let s = scheduler(SpreadPolicy::WindowStart)
            .with_predictor(Arc::new(ScriptedPredictor { offset_hours: 3 }));
        let records = s.plan(&campaign(false), audience(2), &window()).await.unwrap();
        assert!(records.iter().all(|r| r.scheduled_time == window().start_date));
    }

    #[tokio::test]
    async fn predictor_failures_fall_back_to_start() {
        let mut people = audience(3);
        people[0].tags.push("fail".into());
        people[1].tags.push("slow".into());

        let s = scheduler(SpreadPolicy::WindowStart)
            .with_predictor(Arc::new(ScriptedPredictor { offset_hours: 3 }));
        let records = s.plan(&campaign(true), people, &window()).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].scheduled_time, window().start_date);
        assert_eq!(records[1].scheduled_time, window().start_date);
        assert_eq!(
            records[2].scheduled_time,
            window().start_date + chrono::Duration::hours(3)
        );
    }

    #[tokio::test]
    async fn plan_is_deterministic() {
        let people = audience(5);
        let s = scheduler(SpreadPolicy::Even)
            .with_predictor(Arc::new(ScriptedPredictor { offset_hours: 1 }));
        for optimize in [false, true] {
            let a = s.plan(&campaign(optimize), people.clone(), &window()).await.unwrap();
            let b = s.plan(&campaign(optimize), people.clone(), &window()).await.unwrap();
            assert_eq!(a, b);
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn predicted_plan_runs_on_a_spawned_task() {
        let s = Arc::new(
            scheduler(SpreadPolicy::WindowStart)
                .with_predictor(Arc::new(ScriptedPredictor { offset_hours: 2 })),
        );
        let c = campaign(true);
        let w = window();
        assert_send(&s.plan(&c, audience(2), &w));

        let records = tokio::spawn({
            let s = Arc::clone(&s);
            async move { s.plan(&c, audience(2), &w).await }
        })
        .await
        .unwrap()
        .unwrap();
        assert!(records
            .iter()
            .all(|r| r.scheduled_time == w.start_date + chrono::Duration::hours(2)));
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let inverted = ScheduleWindow {
            start_date: window().end_date,
            end_date: window().start_date,
        };
        let err = scheduler(SpreadPolicy::WindowStart)
            .plan(&campaign(false), audience(1), &inverted)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
