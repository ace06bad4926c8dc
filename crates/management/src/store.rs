//! In-memory stores backed by DashMap.
//!
//! Production: replace with PostgreSQL (sqlx) or similar ACID store.
//! These implement the same storage contracts for development and testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use campaign_core::store::{
    CampaignStore, CustomerPage, CustomerQuery, CustomerStore, SegmentStore, Stores,
};
use campaign_core::types::{Address, Campaign, CampaignStatus, Customer, Segment};
use campaign_core::{CampaignError, CampaignResult};
use campaign_segmentation::segment_matches;

// ─── Customers ─────────────────────────────────────────────────────────────

/// Customer population in insertion order. Rule pushdown filters pages
/// before slicing, like a database `WHERE` would.
#[derive(Default)]
pub struct InMemoryCustomerStore {
    customers: RwLock<Vec<Customer>>,
    pushdown: bool,
    page_fetches: AtomicUsize,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self {
            pushdown: true,
            ..Self::default()
        }
    }

    pub fn with_customers(customers: Vec<Customer>) -> Self {
        let store = Self::new();
        *store.customers.write() = customers;
        store
    }

    /// Disables pushdown: every page is an unfiltered slice of the population.
    pub fn without_pushdown(mut self) -> Self {
        self.pushdown = false;
        self
    }

    pub fn insert(&self, customer: Customer) {
        self.customers.write().push(customer);
    }

    pub fn len(&self) -> usize {
        self.customers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.read().is_empty()
    }

    /// Number of `fetch_page` calls served so far.
    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn get(&self, id: Uuid) -> CampaignResult<Option<Customer>> {
        Ok(self.customers.read().iter().find(|c| c.id == id).cloned())
    }

    async fn fetch_page(
        &self,
        query: &CustomerQuery,
        offset: usize,
        limit: usize,
    ) -> CampaignResult<CustomerPage> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        let customers = self.customers.read();
        let mut matching = customers
            .iter()
            .filter(|c| !self.pushdown || segment_matches(&query.rules, query.combinator, c))
            .skip(offset);

        let page: Vec<Customer> = matching.by_ref().take(limit).cloned().collect();
        let next_offset = matching.next().map(|_| offset + page.len());
        Ok(CustomerPage {
            customers: page,
            next_offset,
        })
    }
}

// ─── Segments ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySegmentStore {
    segments: DashMap<Uuid, Segment>,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SegmentStore for InMemorySegmentStore {
    async fn get(&self, id: Uuid) -> CampaignResult<Option<Segment>> {
        Ok(self.segments.get(&id).map(|s| s.value().clone()))
    }

    async fn insert(&self, segment: Segment) -> CampaignResult<Segment> {
        self.segments.insert(segment.id, segment.clone());
        Ok(segment)
    }

    async fn update(&self, segment: Segment) -> CampaignResult<Segment> {
        let mut entry = self
            .segments
            .get_mut(&segment.id)
            .ok_or_else(|| CampaignError::not_found("segment", segment.id))?;
        if entry.version != segment.version {
            return Err(CampaignError::PersistenceConflict {
                entity: "segment",
                id: segment.id,
                expected: segment.version,
                actual: entry.version,
            });
        }
        let mut stored = segment;
        stored.version += 1;
        *entry = stored.clone();
        Ok(stored)
    }

    async fn list(&self) -> CampaignResult<Vec<Segment>> {
        let mut segments: Vec<Segment> = self.segments.iter().map(|s| s.value().clone()).collect();
        segments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(segments)
    }
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
    failing_updates: AtomicUsize,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` updates fail with a storage error.
    pub fn inject_update_failures(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    /// Overwrites the stored copy without a version check.
    pub fn put(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id, campaign);
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn get(&self, id: Uuid) -> CampaignResult<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|c| c.value().clone()))
    }

    async fn insert(&self, campaign: Campaign) -> CampaignResult<Campaign> {
        self.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn update(&self, campaign: Campaign) -> CampaignResult<Campaign> {
        let injected = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CampaignError::Storage(format!(
                "campaign {} write rejected",
                campaign.id
            )));
        }

        let mut entry = self
            .campaigns
            .get_mut(&campaign.id)
            .ok_or_else(|| CampaignError::not_found("campaign", campaign.id))?;
        if entry.version != campaign.version {
            return Err(CampaignError::PersistenceConflict {
                entity: "campaign",
                id: campaign.id,
                expected: campaign.version,
                actual: entry.version,
            });
        }
        let mut stored = campaign;
        stored.version += 1;
        *entry = stored.clone();
        Ok(stored)
    }

    async fn list_by_status(&self, status: CampaignStatus) -> CampaignResult<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.value().clone())
            .collect();
        campaigns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(campaigns)
    }
}

// ─── Bundle ────────────────────────────────────────────────────────────────

/// The three in-memory stores, keeping concrete handles for seeding and
/// fault injection alongside the trait-object bundle.
#[derive(Clone)]
pub struct InMemoryStores {
    pub customers: Arc<InMemoryCustomerStore>,
    pub segments: Arc<InMemorySegmentStore>,
    pub campaigns: Arc<InMemoryCampaignStore>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::with_customers(Vec::new())
    }

    pub fn with_customers(customers: Vec<Customer>) -> Self {
        Self {
            customers: Arc::new(InMemoryCustomerStore::with_customers(customers)),
            segments: Arc::new(InMemorySegmentStore::new()),
            campaigns: Arc::new(InMemoryCampaignStore::new()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            customers: self.customers.clone(),
            segments: self.segments.clone(),
            campaigns: self.campaigns.clone(),
        }
    }
}

impl Default for InMemoryStores {
    fn default() -> Self {
        Self::new()
    }
}

/// A small demo population for development servers.
pub fn demo_customers() -> Vec<Customer> {
    let now = Utc::now();
    let seed = [
        ("Ana Lima", "Lisbon", "PT", 420.0, Some(12_i64), &["vip", "loyal"][..]),
        ("Ben Okafor", "Lagos", "NG", 75.5, Some(45), &["newsletter"][..]),
        ("Chen Wei", "Singapore", "SG", 1250.0, Some(3), &["vip"][..]),
        ("Dana Cohen", "Tel Aviv", "IL", 15.0, Some(140), &["inactive"][..]),
        ("Eli Novak", "Prague", "CZ", 0.0, None, &[][..]),
        ("Fatima Zahra", "Casablanca", "MA", 230.0, Some(70), &["loyal"][..]),
    ];

    let customers: Vec<Customer> = seed
        .iter()
        .enumerate()
        .map(|(i, (name, city, country, spent, days_ago, tags))| {
            let mut customer = Customer::new(*name);
            let handle = name.to_lowercase().replace(' ', ".");
            customer.email = Some(format!("{handle}@example.com"));
            customer.phone = Some(format!("+1555010{i:04}"));
            customer.address = Address {
                city: Some((*city).to_string()),
                country: Some((*country).to_string()),
                ..Address::default()
            };
            customer.total_spent = *spent;
            customer.last_order_date = days_ago.map(|d| now - Duration::days(d));
            customer.tags = tags.iter().map(|t| (*t).to_string()).collect();
            customer
        })
        .collect();

    info!(customers = customers.len(), "Demo customers generated");
    customers
}
