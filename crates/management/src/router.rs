//! API router: mounts every endpoint under /api/v1.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, ManagementState};

/// Build the API router over `state`.
pub fn management_router(state: ManagementState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Segments
        .route("/api/v1/segments", get(handlers::list_segments).post(handlers::create_segment))
        .route("/api/v1/segments/:id", get(handlers::get_segment))
        .route("/api/v1/segments/:id/rules", put(handlers::update_segment_rules))
        .route("/api/v1/segments/:id/preview", get(handlers::preview_segment))
        .route("/api/v1/segments/:id/stats", get(handlers::segment_stats))
        .route("/api/v1/segments/:id/refresh-count", post(handlers::refresh_segment_count))
        // Campaigns
        .route("/api/v1/campaigns", get(handlers::list_campaigns).post(handlers::create_campaign))
        .route("/api/v1/campaigns/:id", get(handlers::get_campaign))
        .route("/api/v1/campaigns/:id/schedule", post(handlers::schedule_campaign))
        .route("/api/v1/campaigns/:id/start", post(handlers::start_campaign))
        .route("/api/v1/campaigns/:id/execute", post(handlers::execute_campaign))
        .route("/api/v1/campaigns/:id/stop", post(handlers::stop_campaign))
        .route("/api/v1/campaigns/:id/stats", get(handlers::campaign_stats))
        .route("/api/v1/campaigns/:id/report", get(handlers::campaign_report))
        // Receipts
        .route("/api/v1/campaigns/:id/receipts", post(handlers::reconcile_receipt))
        .route("/api/v1/campaigns/:id/sms-status", post(handlers::sms_status_callback))
        .route("/api/v1/webhooks/email", post(handlers::email_webhook))
        // Monitoring
        .route("/api/v1/stats/overview", get(handlers::stats_overview))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
