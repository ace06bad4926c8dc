//! Twilio-style SMS provider. Validates E.164 recipients, counts segments,
//! and turns status callbacks into delivery receipts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campaign_core::channels::{ChannelProvider, OutboundMessage, ProviderResponse};
use campaign_core::config::SmsConfig;
use campaign_core::types::{Channel, DeliveryReceipt, ReceiptStatus};
use campaign_core::{CampaignError, CampaignResult};

pub const PROVIDER_NAME: &str = "twilio";

/// An SMS message with delivery tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub provider_id: String,
    pub campaign_id: Uuid,
    pub customer_id: Uuid,
    pub to: String,
    pub from: String,
    pub body: String,
    pub status: ReceiptStatus,
    pub status_callback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub segments: u32,
}

/// Body of a Twilio status callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsStatusCallback {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "MessageStatus")]
    pub message_status: String,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
}

/// A delivery event received from a status callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsDeliveryEvent {
    pub provider_id: String,
    pub status: ReceiptStatus,
    pub timestamp: DateTime<Utc>,
    pub error_code: Option<String>,
}

pub struct SmsProvider {
    config: SmsConfig,
    /// Messages keyed by provider id (Twilio `SM...` sid).
    messages: DashMap<String, SmsMessage>,
    /// Delivery events keyed by recipient phone number.
    delivery_events: DashMap<String, Vec<SmsDeliveryEvent>>,
}

impl SmsProvider {
    pub fn new(config: SmsConfig) -> Self {
        tracing::info!(
            from = %config.from_number,
            callbacks = config.status_callback_url.is_some(),
            "SMS provider initialized"
        );
        Self {
            config,
            messages: DashMap::new(),
            delivery_events: DashMap::new(),
        }
    }

    pub fn get_message(&self, provider_id: &str) -> Option<SmsMessage> {
        self.messages.get(provider_id).map(|m| m.clone())
    }

    /// Apply a status callback addressed to `campaign_id`. Returns the receipt
    /// to reconcile, or `None` for unknown sids, unrecognized statuses, and
    /// sids owned by another campaign. Ignored callbacks leave the message
    /// untouched.
    pub fn handle_status_callback(
        &self,
        campaign_id: Uuid,
        callback: &SmsStatusCallback,
    ) -> Option<DeliveryReceipt> {
        let provider_id = callback.message_sid.as_str();
        let Some(status) = ReceiptStatus::parse(&callback.message_status) else {
            tracing::warn!(status = %callback.message_status, "Unknown SMS status in callback");
            return None;
        };

        let now = Utc::now();
        let to_number = match self.messages.get_mut(provider_id) {
            Some(msg) if msg.campaign_id != campaign_id => {
                tracing::warn!(
                    provider_id = %provider_id,
                    campaign_id = %campaign_id,
                    owner = %msg.campaign_id,
                    "Status callback addressed to the wrong campaign"
                );
                return None;
            }
            Some(mut msg) => {
                msg.status = status;
                msg.updated_at = now;
                msg.to.clone()
            }
            None => {
                tracing::warn!(provider_id = %provider_id, "Status callback for unknown provider_id");
                return None;
            }
        };

        self.delivery_events
            .entry(to_number)
            .or_default()
            .push(SmsDeliveryEvent {
                provider_id: provider_id.to_string(),
                status,
                timestamp: now,
                error_code: callback.error_code.clone(),
            });

        tracing::debug!(
            provider_id = %provider_id,
            campaign_id = %campaign_id,
            status = %callback.message_status,
            "SMS status callback processed"
        );

        metrics::counter!(
            "sms.status_callbacks",
            "status" => callback.message_status.to_ascii_lowercase()
        )
        .increment(1);

        Some(DeliveryReceipt {
            provider_message_id: provider_id.to_string(),
            status,
            received_at: now,
            error_code: callback.error_code.clone(),
        })
    }

    /// Calculate the number of SMS segments for a message body.
    /// GSM 7-bit encoding: 160 chars per segment.
    /// Unicode (UCS-2): 70 chars per segment.
    pub fn calculate_segments(body: &str) -> u32 {
        if body.is_empty() {
            return 1;
        }

        let is_gsm = body.chars().all(is_gsm_7bit);
        let char_count = body.chars().count() as u32;

        if is_gsm {
            // 153 per segment once concatenated (UDH overhead)
            if char_count <= 160 {
                1
            } else {
                char_count.div_ceil(153)
            }
        } else if char_count <= 70 {
            1
        } else {
            char_count.div_ceil(67)
        }
    }

    /// Up to `limit` most recently created messages for a campaign.
    pub fn list_messages(&self, campaign_id: Uuid, limit: usize) -> Vec<SmsMessage> {
        let mut messages: Vec<SmsMessage> = self
            .messages
            .iter()
            .filter(|entry| entry.campaign_id == campaign_id)
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        messages
    }

    pub fn get_delivery_events(&self, to: &str) -> Vec<SmsDeliveryEvent> {
        self.delivery_events
            .get(to)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &SmsConfig {
        &self.config
    }

    fn status_callback_for(&self, campaign_id: Uuid) -> Option<String> {
        self.config.status_callback_url.as_ref().map(|base| {
            format!(
                "{}/api/v1/campaigns/{}/sms-status",
                base.trim_end_matches('/'),
                campaign_id
            )
        })
    }
}

#[async_trait]
impl ChannelProvider for SmsProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> CampaignResult<ProviderResponse> {
        if !is_e164(&message.destination) {
            metrics::counter!("sms.rejected").increment(1);
            return Err(CampaignError::provider(
                PROVIDER_NAME,
                Some(message.customer_id),
                format!("'{}' is not an E.164 phone number", message.destination),
            ));
        }

        let now = Utc::now();
        let provider_id = format!("SM{}", Uuid::new_v4().simple());
        let segments = Self::calculate_segments(&message.body);

        let msg = SmsMessage {
            provider_id: provider_id.clone(),
            campaign_id: message.campaign_id,
            customer_id: message.customer_id,
            to: message.destination.clone(),
            from: self.config.from_number.clone(),
            body: message.body.clone(),
            status: ReceiptStatus::Queued,
            status_callback: self.status_callback_for(message.campaign_id),
            created_at: now,
            updated_at: now,
            segments,
        };

        tracing::info!(
            campaign_id = %message.campaign_id,
            customer_id = %message.customer_id,
            provider_id = %provider_id,
            segments,
            "SMS message queued"
        );

        metrics::counter!("sms.messages_sent").increment(1);
        metrics::counter!("sms.segments_sent").increment(u64::from(segments));

        self.messages.insert(provider_id.clone(), msg);

        Ok(ProviderResponse {
            provider_message_id: provider_id,
            accepted_at: now,
            detail: Some(serde_json::json!({
                "from": self.config.from_number,
                "segments": segments,
            })),
        })
    }
}

/// `+` followed by 8 to 15 digits, the first of which is non-zero.
pub fn is_e164(number: &str) -> bool {
    let Some(digits) = number.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

/// Check whether a character is in the GSM 7-bit default alphabet.
fn is_gsm_7bit(c: char) -> bool {
    matches!(c,
        'A'..='Z' | 'a'..='z' | '0'..='9'
        | ' ' | '!' | '"' | '#' | '$' | '%' | '&' | '\'' | '(' | ')'
        | '*' | '+' | ',' | '-' | '.' | '/' | ':' | ';' | '<' | '='
        | '>' | '?' | '@' | '_' | '\n' | '\r'
        | '\u{00A3}' // Pound sign
        | '\u{00A5}' // Yen sign
        | '\u{00E8}' // e-grave
        | '\u{00E9}' // e-acute
        | '\u{00F9}' // u-grave
        | '\u{00EC}' // i-grave
        | '\u{00F2}' // o-grave
        | '\u{00C7}' // C-cedilla
        | '\u{00D8}' // O-stroke
        | '\u{00F8}' // o-stroke
        | '\u{00C5}' // A-ring
        | '\u{00E5}' // a-ring
        | '\u{0394}' // Greek Delta
        | '\u{03A6}' // Greek Phi
        | '\u{0393}' // Greek Gamma
        | '\u{039B}' // Greek Lambda
        | '\u{03A9}' // Greek Omega
        | '\u{03A0}' // Greek Pi
        | '\u{03A8}' // Greek Psi
        | '\u{03A3}' // Greek Sigma
        | '\u{0398}' // Greek Theta
        | '\u{039E}' // Greek Xi
        | '\u{00C6}' // AE ligature
        | '\u{00E6}' // ae ligature
        | '\u{00DF}' // Sharp s
        | '\u{00C9}' // E-acute
        | '\u{00A4}' // Currency sign
        | '\u{00A1}' // Inverted exclamation
        | '\u{00BF}' // Inverted question
        | '\u{00C4}' // A-umlaut
        | '\u{00D6}' // O-umlaut
        | '\u{00D1}' // N-tilde
        | '\u{00DC}' // U-umlaut
        | '\u{00A7}' // Section sign
        | '\u{00E4}' // a-umlaut
        | '\u{00F6}' // o-umlaut
        | '\u{00F1}' // n-tilde
        | '\u{00FC}' // u-umlaut
        | '\u{00E0}' // a-grave
        // GSM extension characters (counted as 2 but still GSM)
        | '{' | '}' | '[' | ']' | '~' | '\\' | '^' | '|' | '\u{20AC}' // Euro sign
    )
}
