use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    error::AppResult,
    models::CatalogRecord,
    routes::AppState,
    services::context::{self, RawRecommendationRequest},
};

/// Handler for the recommendations endpoint
///
/// Thin adapter: normalizes raw query parameters into a context and hands it
/// to the orchestrator. All degradation happens below this layer.
pub async fn recommend(
    State(state): State<AppState>,
    Query(params): Query<RawRecommendationRequest>,
) -> AppResult<Json<Vec<CatalogRecord>>> {
    let ctx = context::build(params);
    let records = state.orchestrator.get_recommendations(&ctx).await?;
    Ok(Json(records))
}
