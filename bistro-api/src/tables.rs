use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{get, patch},
    Json, Router,
};
use bistro_shared::{Table, TableStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TableFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceToggle {
    pub maintenance: bool,
}

/// Staff only.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tables", get(list_tables))
        .route("/tables/{id}/maintenance", patch(set_maintenance))
}

async fn list_tables(
    State(state): State<AppState>,
    filter: Result<Query<TableFilter>, QueryRejection>,
) -> Result<Json<Vec<Table>>, AppError> {
    let Query(filter) = filter?;
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<TableStatus>)
        .transpose()
        .map_err(|e| AppError::invalid("status", e.to_string()))?;

    Ok(Json(state.bookings.list_tables(status).await?))
}

async fn set_maintenance(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MaintenanceToggle>, JsonRejection>,
) -> Result<Json<Table>, AppError> {
    let Path(id) = path?;
    let Json(toggle) = payload?;
    Ok(Json(state.bookings.set_maintenance(id, toggle.maintenance).await?))
}
