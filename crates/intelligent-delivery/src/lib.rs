//! Intelligent delivery: per-customer send-time prediction and delivery
//! planning across a campaign window.

pub mod scheduler;
pub mod send_time;

pub use scheduler::DeliveryScheduler;
pub use send_time::{EngagementSendTimePredictor, SendTimePredictor};
