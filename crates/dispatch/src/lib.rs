//! Campaign dispatch: lifecycle state machine, the delivery tick, retry
//! policy, and the service facade over the whole pipeline.

pub mod ledger;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod state_machine;
pub mod ticker;
pub mod variant;

pub use orchestrator::{DispatchOrchestrator, TickReport};
pub use retry::RetryPolicy;
pub use service::{CampaignService, CampaignServiceBuilder, NewCampaign};
pub use state_machine::{CampaignAction, CampaignStateMachine, StateTransition};
pub use ticker::DeliveryTicker;
