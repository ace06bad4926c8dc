//! Storage contracts consumed by the pipeline. Implementations must apply
//! optimistic concurrency on `update`: the caller passes the version it read
//! and the store rejects the write with `PersistenceConflict` if it moved.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CampaignResult;
use crate::types::{Campaign, CampaignStatus, Customer, Rule, RuleCombinator, Segment};

/// Filter offered to the customer store. Stores may push the rules down into
/// their own query engine or ignore them and return every customer; callers
/// re-check matches either way.
#[derive(Debug, Clone, Default)]
pub struct CustomerQuery {
    pub rules: Vec<Rule>,
    pub combinator: RuleCombinator,
}

impl CustomerQuery {
    pub fn all() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CustomerPage {
    pub customers: Vec<Customer>,
    /// Offset of the next page, `None` once the population is exhausted.
    pub next_offset: Option<usize>,
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn get(&self, id: Uuid) -> CampaignResult<Option<Customer>>;

    async fn fetch_page(
        &self,
        query: &CustomerQuery,
        offset: usize,
        limit: usize,
    ) -> CampaignResult<CustomerPage>;
}

#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> CampaignResult<Option<Segment>>;

    async fn insert(&self, segment: Segment) -> CampaignResult<Segment>;

    /// Persists `segment` if its `version` matches the stored one and returns
    /// the stored copy with the bumped version.
    async fn update(&self, segment: Segment) -> CampaignResult<Segment>;

    async fn list(&self) -> CampaignResult<Vec<Segment>>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get(&self, id: Uuid) -> CampaignResult<Option<Campaign>>;

    async fn insert(&self, campaign: Campaign) -> CampaignResult<Campaign>;

    /// Same contract as [`SegmentStore::update`].
    async fn update(&self, campaign: Campaign) -> CampaignResult<Campaign>;

    async fn list_by_status(&self, status: CampaignStatus) -> CampaignResult<Vec<Campaign>>;
}

/// The three stores the pipeline reads and writes, bundled for wiring.
#[derive(Clone)]
pub struct Stores {
    pub customers: Arc<dyn CustomerStore>,
    pub segments: Arc<dyn SegmentStore>,
    pub campaigns: Arc<dyn CampaignStore>,
}
