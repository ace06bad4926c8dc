use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campaign_core::types::{Campaign, CampaignStatus};
use campaign_core::{CampaignError, CampaignResult};

/// Lifecycle commands a campaign accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignAction {
    Schedule,
    Start,
    Complete,
    Fail,
    Stop,
}

impl CampaignAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignAction::Schedule => "schedule",
            CampaignAction::Start => "start",
            CampaignAction::Complete => "complete",
            CampaignAction::Fail => "fail",
            CampaignAction::Stop => "stop",
        }
    }
}

/// Describes a single valid state transition for a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub action: CampaignAction,
}

/// Guards the campaign lifecycle by enforcing a finite set of valid
/// transitions. Terminal states (`completed`, `failed`, `stopped`) have no
/// outgoing edges.
#[derive(Debug, Clone)]
pub struct CampaignStateMachine {
    transitions: Vec<StateTransition>,
}

impl CampaignStateMachine {
    pub fn new() -> Self {
        use CampaignAction as A;
        use CampaignStatus as S;

        let transitions = [
            (S::Draft, S::Scheduled, A::Schedule),
            (S::Draft, S::Running, A::Start),
            (S::Scheduled, S::Running, A::Start),
            (S::Scheduled, S::Stopped, A::Stop),
            (S::Running, S::Completed, A::Complete),
            (S::Running, S::Failed, A::Fail),
            (S::Running, S::Stopped, A::Stop),
        ]
        .into_iter()
        .map(|(from, to, action)| StateTransition { from, to, action })
        .collect();

        Self { transitions }
    }

    pub fn can_transition(&self, from: CampaignStatus, to: CampaignStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Target state of `action` from `from`, if the action is accepted there.
    pub fn target(&self, from: CampaignStatus, action: CampaignAction) -> Option<CampaignStatus> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.action == action)
            .map(|t| t.to)
    }

    pub fn allowed_actions(&self, from: CampaignStatus) -> Vec<CampaignAction> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.action)
            .collect()
    }

    /// Checks `action` against the campaign's current status without
    /// changing it.
    pub fn check(&self, campaign: &Campaign, action: CampaignAction) -> CampaignResult<CampaignStatus> {
        self.target(campaign.status, action)
            .ok_or(CampaignError::InvalidState {
                campaign_id: campaign.id,
                status: campaign.status,
                action: action.as_str(),
            })
    }

    /// Moves the campaign to the action's target state and stamps the
    /// matching lifecycle timestamp.
    pub fn apply(
        &self,
        campaign: &mut Campaign,
        action: CampaignAction,
        now: DateTime<Utc>,
    ) -> CampaignResult<()> {
        let to = self.check(campaign, action)?;
        campaign.status = to;
        campaign.updated_at = now;
        match action {
            CampaignAction::Schedule => campaign.scheduled_at = Some(now),
            CampaignAction::Start => campaign.started_at = Some(now),
            CampaignAction::Complete => campaign.completed_at = Some(now),
            CampaignAction::Stop => campaign.stopped_at = Some(now),
            CampaignAction::Fail => {}
        }
        Ok(())
    }

    pub fn fail(&self, campaign: &mut Campaign, reason: impl Into<String>, now: DateTime<Utc>) -> CampaignResult<()> {
        self.apply(campaign, CampaignAction::Fail, now)?;
        campaign.failure_reason = Some(reason.into());
        Ok(())
    }
}

impl Default for CampaignStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
