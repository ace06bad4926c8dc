//! Domain types shared by every stage of the campaign pipeline: customers,
//! segment rules, campaigns, schedules, and the per-recipient delivery trail.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CampaignError, CampaignResult};

// ─── Customers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
}

/// A customer record as read from the customer store. The pipeline never
/// writes customers back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub last_order_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: None,
            phone: None,
            address: Address::default(),
            total_spent: 0.0,
            last_order_date: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

// ─── Segment rules ──────────────────────────────────────────────────────────

/// Customer attribute a rule addresses. `tags` is the only collection-typed
/// field; every other field is a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleField {
    TotalSpent,
    LastOrderDate,
    Tags,
    City,
    Country,
    #[serde(other)]
    Unknown,
}

impl RuleField {
    pub fn is_collection(&self) -> bool {
        matches!(self, RuleField::Tags)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleField::TotalSpent => "totalSpent",
            RuleField::LastOrderDate => "lastOrderDate",
            RuleField::Tags => "tags",
            RuleField::City => "city",
            RuleField::Country => "country",
            RuleField::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Between,
    #[serde(other)]
    Unknown,
}

impl RuleOperator {
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            RuleOperator::GreaterThan | RuleOperator::LessThan | RuleOperator::Between
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub field: RuleField,
    pub operator: RuleOperator,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<serde_json::Value>,
}

impl Rule {
    pub fn new(
        field: RuleField,
        operator: RuleOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            value2: None,
        }
    }

    pub fn between(
        field: RuleField,
        low: impl Into<serde_json::Value>,
        high: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field,
            operator: RuleOperator::Between,
            value: low.into(),
            value2: Some(high.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCombinator {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// A named audience definition. `customer_count` is a cache that is exact
/// only while `counted_version == Some(rules_version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, alias = "ruleOperator")]
    pub combinator: RuleCombinator,
    #[serde(default)]
    pub customer_count: u64,
    #[serde(default)]
    pub rules_version: u64,
    #[serde(default)]
    pub counted_version: Option<u64>,
    /// Mirrors `count_is_exact()` for API consumers.
    #[serde(default, skip_deserializing)]
    pub count_is_exact: bool,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Segment {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>, combinator: RuleCombinator) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            rules,
            combinator,
            customer_count: 0,
            rules_version: 1,
            counted_version: None,
            count_is_exact: false,
            last_updated: now,
            created_at: now,
            version: 0,
        }
    }

    /// Replaces the rule set. The cached count becomes stale until the next
    /// recount.
    pub fn set_rules(&mut self, rules: Vec<Rule>, combinator: RuleCombinator) {
        self.rules = rules;
        self.combinator = combinator;
        self.rules_version += 1;
        self.count_is_exact = false;
        self.last_updated = Utc::now();
    }

    pub fn record_count(&mut self, count: u64, rules_version: u64, at: DateTime<Utc>) {
        self.customer_count = count;
        self.counted_version = Some(rules_version);
        self.count_is_exact = rules_version == self.rules_version;
        self.last_updated = at;
    }

    pub fn count_is_exact(&self) -> bool {
        self.counted_version == Some(self.rules_version)
    }

    /// Short human-readable description used when generating content.
    pub fn descriptor(&self) -> String {
        match &self.description {
            Some(desc) if !desc.is_empty() => format!("{}: {}", self.name, desc),
            _ => self.name.clone(),
        }
    }
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    #[default]
    Promotional,
    Transactional,
    Reengagement,
    Newsletter,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Stopped
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageVariant {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MessageVariant {
    pub fn new(subject: Option<&str>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.map(str::to_string),
            body: body.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// Inclusive delivery window. Construction rejects `end_date < start_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWindow {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl ScheduleWindow {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> CampaignResult<Self> {
        let window = Self {
            start_date,
            end_date,
        };
        window.validate()?;
        Ok(window)
    }

    /// Window of `length` beginning at `start_date`. Negative lengths are
    /// treated as zero; an end past the representable range is rejected.
    pub fn starting_at(start_date: DateTime<Utc>, length: Duration) -> CampaignResult<Self> {
        let end_date = start_date
            .checked_add_signed(length.max(Duration::zero()))
            .ok_or_else(|| {
                CampaignError::validation(
                    "schedule window",
                    format!("window of {length} from {start_date} is out of range"),
                )
            })?;
        Ok(Self {
            start_date,
            end_date,
        })
    }

    pub fn validate(&self) -> CampaignResult<()> {
        if self.end_date < self.start_date {
            return Err(CampaignError::validation(
                "schedule window",
                format!(
                    "end date {} is before start date {}",
                    self.end_date, self.start_date
                ),
            ));
        }
        Ok(())
    }

    pub fn clamp(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.clamp(self.start_date, self.end_date)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_date && at <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub deliveries: Vec<DeliveryRecord>,
}

impl Schedule {
    pub fn new(window: ScheduleWindow, deliveries: Vec<DeliveryRecord>) -> Self {
        Self {
            start_date: window.start_date,
            end_date: window.end_date,
            deliveries,
        }
    }

    pub fn window(&self) -> ScheduleWindow {
        ScheduleWindow {
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub goal: String,
    pub channel: Channel,
    #[serde(default, rename = "type")]
    pub campaign_type: CampaignType,
    pub target_segment_id: Uuid,
    #[serde(default)]
    pub message_variants: Vec<MessageVariant>,
    pub status: CampaignStatus,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub optimize_send_time: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl Campaign {
    pub fn new(name: impl Into<String>, channel: Channel, target_segment_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            goal: String::new(),
            channel,
            campaign_type: CampaignType::default(),
            target_segment_id,
            message_variants: Vec::new(),
            status: CampaignStatus::Draft,
            schedule: None,
            optimize_send_time: false,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            stopped_at: None,
            failure_reason: None,
            version: 0,
        }
    }

    pub fn deliveries(&self) -> &[DeliveryRecord] {
        self.schedule
            .as_ref()
            .map(|s| s.deliveries.as_slice())
            .unwrap_or_default()
    }

    pub fn deliveries_mut(&mut self) -> Option<&mut Vec<DeliveryRecord>> {
        self.schedule.as_mut().map(|s| &mut s.deliveries)
    }

    pub fn pending_count(&self) -> usize {
        self.deliveries()
            .iter()
            .filter(|d| d.status == DeliveryStatus::Scheduled)
            .count()
    }

    /// True once no delivery record is left in `scheduled`.
    pub fn all_settled(&self) -> bool {
        self.pending_count() == 0
    }
}

// ─── Delivery trail ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Scheduled,
    Delivered,
    Failed,
}

/// One recipient's delivery lifecycle within a campaign. Records are only
/// appended to and status-transitioned, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub customer_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variant_index: Option<usize>,
    #[serde(default)]
    pub attempts: Vec<DeliveryAttempt>,
    #[serde(default)]
    pub receipts: Vec<DeliveryReceipt>,
}

impl DeliveryRecord {
    pub fn scheduled(customer_id: Uuid, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            scheduled_time,
            status: DeliveryStatus::Scheduled,
            delivered_at: None,
            variant_index: None,
            attempts: Vec::new(),
            receipts: Vec::new(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Scheduled && self.scheduled_time <= now
    }

    pub fn failed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Failure)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub provider_response: Option<serde_json::Value>,
}

impl DeliveryAttempt {
    pub fn success(
        timestamp: DateTime<Utc>,
        provider_message_id: impl Into<String>,
        provider_response: Option<serde_json::Value>,
    ) -> Self {
        Self {
            timestamp,
            outcome: AttemptOutcome::Success,
            error: None,
            provider_message_id: Some(provider_message_id.into()),
            provider_response,
        }
    }

    pub fn failure(timestamp: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            outcome: AttemptOutcome::Failure,
            error: Some(error.into()),
            provider_message_id: None,
            provider_response: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Status reported by a provider callback after the send call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Undelivered,
    Bounced,
}

impl ReceiptStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ReceiptStatus::Failed | ReceiptStatus::Undelivered | ReceiptStatus::Bounced
        )
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "queued" | "accepted" | "processed" => Some(ReceiptStatus::Queued),
            "sent" | "sending" => Some(ReceiptStatus::Sent),
            "delivered" => Some(ReceiptStatus::Delivered),
            "failed" | "dropped" => Some(ReceiptStatus::Failed),
            "undelivered" => Some(ReceiptStatus::Undelivered),
            "bounce" | "bounced" => Some(ReceiptStatus::Bounced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    pub status: ReceiptStatus,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub error_code: Option<String>,
}

// ─── Reporting ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub total: u64,
    pub scheduled: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Campaign-level delivery statistics. `delivery_rate` is a percentage of
/// `rate_denominator`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub total: u64,
    pub scheduled: u64,
    pub delivered: u64,
    pub failed: u64,
    pub attempts: u64,
    pub retried: u64,
    pub rate_denominator: u64,
    pub delivery_rate: f64,
    pub channel_breakdown: BTreeMap<Channel, ChannelStats>,
}
