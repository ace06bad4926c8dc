//! Axum REST handlers. Each one maps a request onto a `CampaignService`
//! operation and the error kind onto an HTTP status.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campaign_channels::{EmailProvider, EmailWebhookEvent, SmsProvider, SmsStatusCallback};
use campaign_core::types::{
    Campaign, CampaignStats, CampaignStatus, DeliveryReceipt, Rule, RuleCombinator,
    ScheduleWindow, Segment,
};
use campaign_core::CampaignError;
use campaign_dispatch::{CampaignService, NewCampaign, TickReport};
use campaign_reporting::stats::StatsOverview;
use campaign_reporting::CampaignReport;
use campaign_segmentation::{SegmentPreview, SegmentStats};

/// Shared handler state.
#[derive(Clone)]
pub struct ManagementState {
    pub service: Arc<CampaignService>,
    pub email: Option<Arc<EmailProvider>>,
    pub sms: Option<Arc<SmsProvider>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// `CampaignError` rendered as a JSON error body.
pub struct ApiError(CampaignError);

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CampaignError::NotFound { .. } => StatusCode::NOT_FOUND,
            CampaignError::InvalidState { .. } | CampaignError::PersistenceConflict { .. } => {
                StatusCode::CONFLICT
            }
            CampaignError::Validation { .. } | CampaignError::Serialization(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CampaignError::ProviderFailure { .. } => StatusCode::BAD_GATEWAY,
            CampaignError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            CampaignError::Config(_) | CampaignError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = self.0.kind(), "Request failed");
        }
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ─── Health ────────────────────────────────────────────────────────────────

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ─── Segments ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSegmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, alias = "ruleOperator")]
    pub combinator: RuleCombinator,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRulesRequest {
    pub rules: Vec<Rule>,
    #[serde(default, alias = "ruleOperator")]
    pub combinator: RuleCombinator,
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn first_page() -> usize {
    1
}

pub async fn create_segment(
    State(state): State<ManagementState>,
    Json(req): Json<CreateSegmentRequest>,
) -> Result<(StatusCode, Json<Segment>), ApiError> {
    let mut segment = Segment::new(req.name, req.rules, req.combinator);
    segment.description = req.description;
    let segment = state.service.create_segment(segment).await?;
    metrics::counter!("management.segments.created").increment(1);
    Ok((StatusCode::CREATED, Json(segment)))
}

pub async fn list_segments(State(state): State<ManagementState>) -> ApiResult<Vec<Segment>> {
    Ok(Json(state.service.list_segments().await?))
}

pub async fn get_segment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Segment> {
    Ok(Json(state.service.get_segment(id).await?))
}

pub async fn update_segment_rules(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRulesRequest>,
) -> ApiResult<Segment> {
    Ok(Json(
        state
            .service
            .update_segment_rules(id, req.rules, req.combinator)
            .await?,
    ))
}

pub async fn preview_segment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PreviewParams>,
) -> ApiResult<SegmentPreview> {
    Ok(Json(
        state
            .service
            .preview_segment(id, params.page, params.limit)
            .await?,
    ))
}

pub async fn segment_stats(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SegmentStats> {
    Ok(Json(state.service.segment_stats(id).await?))
}

pub async fn refresh_segment_count(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Segment> {
    Ok(Json(state.service.refresh_segment_count(id).await?))
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<CampaignStatus>,
}

pub async fn create_campaign(
    State(state): State<ManagementState>,
    Json(req): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = state.service.create_campaign(req).await?;
    metrics::counter!("management.campaigns.created").increment(1);
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn list_campaigns(
    State(state): State<ManagementState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Campaign>> {
    Ok(Json(state.service.list_campaigns(params.status).await?))
}

pub async fn get_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Campaign> {
    Ok(Json(state.service.get_campaign(id).await?))
}

pub async fn schedule_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Json(window): Json<ScheduleWindow>,
) -> ApiResult<Campaign> {
    Ok(Json(state.service.schedule_campaign(id, window).await?))
}

pub async fn start_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Campaign> {
    Ok(Json(state.service.start_campaign(id).await?))
}

pub async fn execute_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TickReport> {
    Ok(Json(state.service.execute_campaign(id).await?))
}

pub async fn stop_campaign(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Campaign> {
    Ok(Json(state.service.stop_campaign(id).await?))
}

pub async fn campaign_stats(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CampaignStats> {
    Ok(Json(state.service.get_campaign_stats(id).await?))
}

pub async fn campaign_report(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CampaignReport> {
    Ok(Json(state.service.get_campaign_report(id).await?))
}

pub async fn stats_overview(State(state): State<ManagementState>) -> Json<StatsOverview> {
    Json(state.service.stats_overview())
}

// ─── Receipts ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAck {
    pub reconciled: usize,
    pub ignored: usize,
}

pub async fn reconcile_receipt(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Json(receipt): Json<DeliveryReceipt>,
) -> ApiResult<Campaign> {
    Ok(Json(state.service.reconcile_receipt(id, receipt).await?))
}

/// Twilio-style form callback for one SMS.
pub async fn sms_status_callback(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Form(callback): Form<SmsStatusCallback>,
) -> Result<(StatusCode, Json<ReceiptAck>), ApiError> {
    let receipt = state
        .sms
        .as_ref()
        .and_then(|sms| sms.handle_status_callback(id, &callback));

    let ack = match receipt {
        Some(receipt) => {
            state.service.reconcile_receipt(id, receipt).await?;
            ReceiptAck { reconciled: 1, ignored: 0 }
        }
        None => ReceiptAck { reconciled: 0, ignored: 1 },
    };
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// SendGrid-style batched event webhook. Events that do not map to a known
/// message or a delivery outcome are counted as ignored.
pub async fn email_webhook(
    State(state): State<ManagementState>,
    Json(events): Json<Vec<EmailWebhookEvent>>,
) -> Result<(StatusCode, Json<ReceiptAck>), ApiError> {
    let mut ack = ReceiptAck { reconciled: 0, ignored: 0 };
    let Some(email) = state.email.as_ref() else {
        ack.ignored = events.len();
        return Ok((StatusCode::ACCEPTED, Json(ack)));
    };

    for event in &events {
        match email.process_webhook(event) {
            Some((campaign_id, receipt)) => {
                match state.service.reconcile_receipt(campaign_id, receipt).await {
                    Ok(_) => ack.reconciled += 1,
                    Err(CampaignError::NotFound { .. }) => ack.ignored += 1,
                    Err(err) => return Err(err.into()),
                }
            }
            None => ack.ignored += 1,
        }
    }
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (CampaignError::not_found("campaign", Uuid::nil()), StatusCode::NOT_FOUND),
            (
                CampaignError::InvalidState {
                    campaign_id: Uuid::nil(),
                    status: CampaignStatus::Stopped,
                    action: "execute",
                },
                StatusCode::CONFLICT,
            ),
            (CampaignError::validation("rule 0", "missing value2"), StatusCode::UNPROCESSABLE_ENTITY),
            (CampaignError::Storage("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn segment_request_accepts_rule_operator_alias() {
        let req: CreateSegmentRequest = serde_json::from_value(serde_json::json!({
            "name": "big spenders",
            "rules": [{ "field": "totalSpent", "operator": "greaterThan", "value": 100 }],
            "ruleOperator": "OR"
        }))
        .unwrap();
        assert_eq!(req.rules.len(), 1);
        assert_eq!(req.combinator, RuleCombinator::Or);
    }
}
