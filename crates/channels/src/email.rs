//! SendGrid-style email provider with delivery analytics.
//!
//! Sends are simulated: the provider validates the recipient, builds the API
//! payload, and assigns a message id. Inbound webhook events update
//! per-campaign analytics and, for delivery outcomes, produce receipts the
//! dispatch layer reconciles against the delivery trail.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use campaign_core::channels::{ChannelProvider, OutboundMessage, ProviderResponse};
use campaign_core::config::EmailConfig;
use campaign_core::types::{Channel, DeliveryReceipt, ReceiptStatus};
use campaign_core::{CampaignError, CampaignResult};

pub const PROVIDER_NAME: &str = "sendgrid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailEventType {
    Processed,
    Deferred,
    Delivered,
    Open,
    Click,
    Bounce,
    Dropped,
    SpamReport,
    Unsubscribe,
    GroupUnsubscribe,
}

impl EmailEventType {
    /// Delivery outcome carried by the event, if any. Engagement events
    /// (opens, clicks, unsubscribes) only feed analytics.
    pub fn receipt_status(&self) -> Option<ReceiptStatus> {
        match self {
            EmailEventType::Processed | EmailEventType::Deferred => Some(ReceiptStatus::Queued),
            EmailEventType::Delivered => Some(ReceiptStatus::Delivered),
            EmailEventType::Bounce => Some(ReceiptStatus::Bounced),
            EmailEventType::Dropped => Some(ReceiptStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailWebhookEvent {
    pub sg_message_id: String,
    pub event: EmailEventType,
    pub email: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailAnalytics {
    pub campaign_id: Uuid,
    pub total_sent: u64,
    pub delivered: u64,
    pub opens: u64,
    pub unique_opens: u64,
    pub clicks: u64,
    pub unique_clicks: u64,
    pub bounces: u64,
    pub spam_reports: u64,
    pub unsubscribes: u64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub bounce_rate: f64,
}

pub struct EmailProvider {
    config: EmailConfig,
    /// Analytics keyed by campaign id.
    analytics: DashMap<Uuid, EmailAnalytics>,
    /// Maps provider message id -> campaign id for webhook lookups.
    message_index: DashMap<String, Uuid>,
    unique_opens: DashMap<Uuid, HashSet<String>>,
    unique_clicks: DashMap<Uuid, HashSet<String>>,
}

impl EmailProvider {
    pub fn new(config: EmailConfig) -> Self {
        info!(
            from = %config.from_email,
            "Email provider initialized"
        );
        Self {
            config,
            analytics: DashMap::new(),
            message_index: DashMap::new(),
            unique_opens: DashMap::new(),
            unique_clicks: DashMap::new(),
        }
    }

    /// Apply a webhook event. Returns the owning campaign and a receipt when
    /// the event reports a delivery outcome for a message this provider sent.
    pub fn process_webhook(&self, event: &EmailWebhookEvent) -> Option<(Uuid, DeliveryReceipt)> {
        let campaign_id = match self.message_index.get(&event.sg_message_id) {
            Some(entry) => *entry.value(),
            None => {
                warn!(
                    sg_message_id = %event.sg_message_id,
                    "Webhook for unknown message id, skipping"
                );
                return None;
            }
        };

        debug!(
            event_type = ?event.event,
            campaign_id = %campaign_id,
            email = %event.email,
            "Processing email webhook"
        );

        metrics::counter!(
            "email.webhook_events",
            "type" => format!("{:?}", event.event)
        )
        .increment(1);

        self.analytics
            .entry(campaign_id)
            .and_modify(|a| {
                match event.event {
                    EmailEventType::Delivered => a.delivered += 1,
                    EmailEventType::Open => {
                        a.opens += 1;
                        let mut unique = self.unique_opens.entry(campaign_id).or_default();
                        if unique.insert(event.email.clone()) {
                            a.unique_opens += 1;
                        }
                    }
                    EmailEventType::Click => {
                        a.clicks += 1;
                        let mut unique = self.unique_clicks.entry(campaign_id).or_default();
                        if unique.insert(event.email.clone()) {
                            a.unique_clicks += 1;
                        }
                    }
                    EmailEventType::Bounce | EmailEventType::Dropped => a.bounces += 1,
                    EmailEventType::SpamReport => a.spam_reports += 1,
                    EmailEventType::Unsubscribe | EmailEventType::GroupUnsubscribe => {
                        a.unsubscribes += 1
                    }
                    EmailEventType::Processed | EmailEventType::Deferred => {}
                }

                if a.total_sent > 0 {
                    let sent = a.total_sent as f64;
                    a.open_rate = a.unique_opens as f64 / sent;
                    a.click_rate = a.unique_clicks as f64 / sent;
                    a.bounce_rate = a.bounces as f64 / sent;
                }
            })
            .or_insert_with(|| EmailAnalytics {
                campaign_id,
                ..Default::default()
            });

        let status = event.event.receipt_status()?;
        Some((
            campaign_id,
            DeliveryReceipt {
                provider_message_id: event.sg_message_id.clone(),
                status,
                received_at: event.timestamp,
                error_code: event.reason.clone(),
            },
        ))
    }

    pub fn get_analytics(&self, campaign_id: Uuid) -> Option<EmailAnalytics> {
        self.analytics.get(&campaign_id).map(|a| a.clone())
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }
}

#[async_trait]
impl ChannelProvider for EmailProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, message: &OutboundMessage) -> CampaignResult<ProviderResponse> {
        if !is_valid_email(&message.destination) {
            metrics::counter!("email.rejected").increment(1);
            return Err(CampaignError::provider(
                PROVIDER_NAME,
                Some(message.customer_id),
                format!("invalid recipient address '{}'", message.destination),
            ));
        }

        let subject = message.subject.as_deref().unwrap_or_default();
        debug!(
            campaign_id = %message.campaign_id,
            customer_id = %message.customer_id,
            to = %message.destination,
            subject = %subject,
            "Sending email"
        );

        let payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": message.destination}],
                "custom_args": {
                    "campaign_id": message.campaign_id,
                    "customer_id": message.customer_id
                }
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": subject,
            "content": [{
                "type": "text/html",
                "value": message.body
            }]
        });

        let sg_message_id = format!("sg-{}", Uuid::new_v4());
        self.message_index
            .insert(sg_message_id.clone(), message.campaign_id);
        self.analytics
            .entry(message.campaign_id)
            .or_insert_with(|| EmailAnalytics {
                campaign_id: message.campaign_id,
                ..Default::default()
            })
            .total_sent += 1;

        metrics::counter!("email.messages_sent").increment(1);

        Ok(ProviderResponse {
            provider_message_id: sg_message_id,
            accepted_at: Utc::now(),
            detail: Some(serde_json::json!({
                "from": payload["from"]["email"],
                "personalizations": payload["personalizations"].as_array().map_or(0, Vec::len),
            })),
        })
    }
}

/// Minimal structural check: one `@`, a non-empty local part, and a dotted
/// domain without whitespace.
pub fn is_valid_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !address.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> EmailProvider {
        EmailProvider::new(EmailConfig::default())
    }

    fn message(to: &str) -> OutboundMessage {
        OutboundMessage {
            campaign_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            channel: Channel::Email,
            destination: to.to_string(),
            subject: Some("Spring sale".into()),
            body: "<p>20% off</p>".into(),
        }
    }

    #[test]
    fn address_validation() {
        assert!(is_valid_email("ana@example.com"));
        assert!(is_valid_email("first.last+tag@mail.example.co"));
        assert!(!is_valid_email("ana.example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ana@localhost"));
        assert!(!is_valid_email("ana@@example.com"));
        assert!(!is_valid_email("ana @example.com"));
        assert!(!is_valid_email("ana@example.com."));
    }

    #[tokio::test]
    async fn send_assigns_message_id_and_counts() {
        let p = provider();
        let msg = message("ana@example.com");
        let resp = p.send(&msg).await.unwrap();
        assert!(resp.provider_message_id.starts_with("sg-"));
        assert_eq!(p.get_analytics(msg.campaign_id).unwrap().total_sent, 1);
    }

    #[tokio::test]
    async fn invalid_address_is_a_provider_failure() {
        let err = provider().send(&message("nope")).await.unwrap_err();
        assert_eq!(err.kind(), "provider_failure");
    }

    #[tokio::test]
    async fn webhooks_update_analytics_and_emit_receipts() {
        let p = provider();
        let msg = message("ana@example.com");
        let resp = p.send(&msg).await.unwrap();
        let event = |kind| EmailWebhookEvent {
            sg_message_id: resp.provider_message_id.clone(),
            event: kind,
            email: "ana@example.com".into(),
            timestamp: Utc::now(),
            reason: None,
        };

        let (campaign_id, receipt) = p.process_webhook(&event(EmailEventType::Delivered)).unwrap();
        assert_eq!(campaign_id, msg.campaign_id);
        assert_eq!(receipt.status, ReceiptStatus::Delivered);

        assert!(p.process_webhook(&event(EmailEventType::Open)).is_none());
        assert!(p.process_webhook(&event(EmailEventType::Open)).is_none());

        let analytics = p.get_analytics(msg.campaign_id).unwrap();
        assert_eq!(analytics.delivered, 1);
        assert_eq!(analytics.opens, 2);
        assert_eq!(analytics.unique_opens, 1);
        assert!((analytics.open_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_message_id_is_ignored() {
        let event = EmailWebhookEvent {
            sg_message_id: "sg-missing".into(),
            event: EmailEventType::Bounce,
            email: "x@example.com".into(),
            timestamp: Utc::now(),
            reason: Some("mailbox full".into()),
        };
        assert!(provider().process_webhook(&event).is_none());
    }
}
