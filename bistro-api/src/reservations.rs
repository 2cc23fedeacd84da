use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use bistro_booking::Availability;
use bistro_core::{FieldError, ValidationErrors};
use bistro_shared::serde_helpers::parse_time;
use bistro_shared::{BookingRequest, Reservation, ReservationStatus};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::authorize_staff;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableAssignment {
    pub table_id: Uuid,
}

/// Raw availability query; parsed by hand so every bad field is reported.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityParams {
    pub date: Option<String>,
    pub time: Option<String>,
    #[serde(alias = "guests")]
    pub party_size: Option<String>,
}

impl AvailabilityParams {
    fn parse(&self) -> Result<(NaiveDate, NaiveTime, u32), ValidationErrors> {
        let mut errors = Vec::new();

        let date = self
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());
        if date.is_none() {
            errors.push(FieldError::new("date", "must be a calendar date (YYYY-MM-DD)"));
        }

        let time = self.time.as_deref().and_then(|t| parse_time(t).ok());
        if time.is_none() {
            errors.push(FieldError::new("time", "must be a time of day (HH:MM)"));
        }

        let party_size = self
            .party_size
            .as_deref()
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p > 0);
        if party_size.is_none() {
            errors.push(FieldError::new("partySize", "must be a positive integer"));
        }

        match (date, time, party_size) {
            (Some(date), Some(time), Some(party_size)) => Ok((date, time, party_size)),
            _ => Err(ValidationErrors(errors)),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations/availability", get(check_availability))
        .route("/reservations/code/{code}", get(find_by_code))
        .route("/reservations/{id}/status", patch(change_status))
}

/// Routes behind the staff gate.
pub fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/reservations", get(list_reservations))
        .route("/reservations/{id}", get(get_reservation))
        .route("/reservations/{id}/table", patch(assign_table))
}

async fn create_reservation(
    State(state): State<AppState>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let Json(request) = payload?;
    let reservation = state.bookings.create(&request).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn check_availability(
    State(state): State<AppState>,
    params: Result<Query<AvailabilityParams>, QueryRejection>,
) -> Result<Json<Availability>, AppError> {
    let Query(params) = params?;
    let (date, time, party_size) = params.parse().map_err(AppError::ValidationError)?;
    let availability = state
        .availability
        .find_available(date, time, party_size)
        .await?;
    Ok(Json(availability))
}

async fn list_reservations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Reservation>>, AppError> {
    Ok(Json(state.bookings.list().await?))
}

async fn get_reservation(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Reservation>, AppError> {
    let Path(id) = path?;
    Ok(Json(state.bookings.get(id).await?))
}

async fn find_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.bookings.find_by_code(&code).await?))
}

/// Guests may cancel their own booking; every other move is staff work.
async fn change_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<Json<Reservation>, AppError> {
    let Path(id) = path?;
    let Json(change) = payload?;
    let target: ReservationStatus = change
        .status
        .parse()
        .map_err(|e| AppError::invalid("status", format!("{e}")))?;
    if target != ReservationStatus::Cancelled {
        authorize_staff(&state.auth, &headers)?;
    }

    Ok(Json(state.bookings.change_status(id, target).await?))
}

async fn assign_table(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<TableAssignment>, JsonRejection>,
) -> Result<Json<Reservation>, AppError> {
    let Path(id) = path?;
    let Json(assignment) = payload?;
    Ok(Json(state.bookings.assign_table(id, assignment.table_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_params_report_every_bad_field() {
        let params = AvailabilityParams {
            date: Some("tomorrow".to_string()),
            time: None,
            party_size: Some("0".to_string()),
        };
        let errors = params.parse().unwrap_err();
        let fields: Vec<&str> = errors.fields().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["date", "time", "partySize"]);
    }

    #[test]
    fn test_availability_params_parse() {
        let params = AvailabilityParams {
            date: Some("2024-01-20".to_string()),
            time: Some("19:30".to_string()),
            party_size: Some("4".to_string()),
        };
        let (date, time, party) = params.parse().unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 20).unwrap());
        assert_eq!(time, NaiveTime::from_hms_opt(19, 30, 0).unwrap());
        assert_eq!(party, 4);
    }
}
