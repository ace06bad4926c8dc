//! Campaign reporting: delivery statistics folded from the delivery trail,
//! cross-campaign rollups, and narrated campaign reports.

pub mod report;
pub mod stats;

pub use report::{build_report, CampaignReport};
pub use stats::{aggregate, merge, StatsAggregator};
