use crate::{
    auth::Principal, errors::AppError, services::search_service::SearchResults, state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// `GET /search?q=`
pub async fn search(
    _principal: Principal,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResults>, AppError> {
    Ok(Json(state.search.search(&query.q).await?))
}
