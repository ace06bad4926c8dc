//! Computed properties. Derived customer attributes calculated on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campaign_core::types::Customer;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Whole days since the last order, rounded up. `None` when the customer has
/// never ordered.
pub fn days_since_last_order(customer: &Customer, now: DateTime<Utc>) -> Option<i64> {
    customer.last_order_date.map(|last| {
        let ms = (now - last).num_milliseconds().abs();
        (ms + DAY_MS - 1) / DAY_MS
    })
}

/// Recency buckets used by segment stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecencyBucket {
    #[serde(rename = "0-30")]
    UpTo30,
    #[serde(rename = "31-60")]
    UpTo60,
    #[serde(rename = "61-90")]
    UpTo90,
    #[serde(rename = "90+")]
    Over90,
    NeverOrdered,
}

impl RecencyBucket {
    pub fn for_days(days: Option<i64>) -> Self {
        match days {
            None => RecencyBucket::NeverOrdered,
            Some(d) if d <= 30 => RecencyBucket::UpTo30,
            Some(d) if d <= 60 => RecencyBucket::UpTo60,
            Some(d) if d <= 90 => RecencyBucket::UpTo90,
            Some(_) => RecencyBucket::Over90,
        }
    }

    pub fn of(customer: &Customer, now: DateTime<Utc>) -> Self {
        Self::for_days(days_since_last_order(customer, now))
    }
}

/// Counts per recency bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecencyDistribution {
    #[serde(rename = "0-30")]
    pub up_to_30: u64,
    #[serde(rename = "31-60")]
    pub up_to_60: u64,
    #[serde(rename = "61-90")]
    pub up_to_90: u64,
    #[serde(rename = "90+")]
    pub over_90: u64,
    pub never_ordered: u64,
}

impl RecencyDistribution {
    pub fn record(&mut self, bucket: RecencyBucket) {
        match bucket {
            RecencyBucket::UpTo30 => self.up_to_30 += 1,
            RecencyBucket::UpTo60 => self.up_to_60 += 1,
            RecencyBucket::UpTo90 => self.up_to_90 += 1,
            RecencyBucket::Over90 => self.over_90 += 1,
            RecencyBucket::NeverOrdered => self.never_ordered += 1,
        }
    }
}
