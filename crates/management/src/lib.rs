//! Management backend: in-memory stores and the REST adapter over
//! `CampaignService`.
//!
//! Data stored in DashMap (development); swap to PostgreSQL for production.

pub mod handlers;
pub mod router;
pub mod store;

pub use handlers::{ApiError, ManagementState};
pub use router::management_router;
pub use store::{
    demo_customers, InMemoryCampaignStore, InMemoryCustomerStore, InMemorySegmentStore,
    InMemoryStores,
};
