//! Outbound channel contract.
//!
//! Concrete email/SMS providers live in `campaign-channels`; the dispatch
//! pipeline only sees `ChannelProvider` trait objects looked up by channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CampaignResult;
use crate::types::Channel;

/// A rendered message addressed to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub campaign_id: Uuid,
    pub customer_id: Uuid,
    pub channel: Channel,
    /// Email address or phone number, depending on the channel.
    pub destination: String,
    pub subject: Option<String>,
    pub body: String,
}

/// What a provider hands back when it accepts a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider_message_id: String,
    pub accepted_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn channel(&self) -> Channel;

    /// Hand one message to the provider. Rejections are reported as
    /// `CampaignError::ProviderFailure`.
    async fn send(&self, message: &OutboundMessage) -> CampaignResult<ProviderResponse>;
}

/// Providers keyed by the channel they serve.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Registers a provider, replacing any previous one for the same channel.
    pub fn register(&mut self, provider: Arc<dyn ChannelProvider>) {
        tracing::info!(
            channel = %provider.channel(),
            provider = provider.name(),
            "Channel provider registered"
        );
        self.providers.insert(provider.channel(), provider);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelProvider>> {
        self.providers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.providers.keys().copied().collect();
        channels.sort();
        channels
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}
