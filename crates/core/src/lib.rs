pub mod channels;
pub mod config;
pub mod content;
pub mod error;
pub mod event_bus;
pub mod locks;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult};
