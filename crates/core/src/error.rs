use thiserror::Error;
use uuid::Uuid;

use crate::types::CampaignStatus;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Campaign {campaign_id} cannot {action} while {status}")]
    InvalidState {
        campaign_id: Uuid,
        status: CampaignStatus,
        action: &'static str,
    },

    #[error("Validation error in {context}: {message}")]
    Validation { context: String, message: String },

    #[error("Provider {provider} failed: {message}")]
    ProviderFailure {
        provider: String,
        customer_id: Option<Uuid>,
        message: String,
    },

    #[error("Persistence conflict on {entity} {id}: expected version {expected}, found {actual}")]
    PersistenceConflict {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CampaignError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(context: impl Into<String>, message: impl Into<String>) -> Self {
        CampaignError::Validation {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn provider(
        provider: impl Into<String>,
        customer_id: Option<Uuid>,
        message: impl Into<String>,
    ) -> Self {
        CampaignError::ProviderFailure {
            provider: provider.into(),
            customer_id,
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used by the HTTP adapter and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CampaignError::NotFound { .. } => "not_found",
            CampaignError::InvalidState { .. } => "invalid_state",
            CampaignError::Validation { .. } => "validation_error",
            CampaignError::ProviderFailure { .. } => "provider_failure",
            CampaignError::PersistenceConflict { .. } => "persistence_conflict",
            CampaignError::Storage(_) => "storage_error",
            CampaignError::Config(_) => "config_error",
            CampaignError::Serialization(_) => "serialization_error",
            CampaignError::Internal(_) => "internal_error",
        }
    }
}

impl From<config::ConfigError> for CampaignError {
    fn from(err: config::ConfigError) -> Self {
        CampaignError::Config(err.to_string())
    }
}
