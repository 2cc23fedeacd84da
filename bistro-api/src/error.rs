use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bistro_booking::BookingError;
use bistro_core::ValidationErrors;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    ValidationError(ValidationErrors),
    AuthenticationError(String),
    AuthorizationError(String),
    NotFoundError(String),
    ConflictError(String),
    InternalServerError(String),
}

impl AppError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        AppError::ValidationError(ValidationErrors::single(field, message))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::ValidationError(errors) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Validation failed",
                    "fields": errors.fields(),
                }),
            ),
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(errors) => AppError::ValidationError(errors),
            err @ BookingError::SlotConflict { .. } => AppError::ConflictError(err.to_string()),
            err @ BookingError::InvalidTransition { .. } => AppError::ConflictError(err.to_string()),
            err @ BookingError::NotFound { .. } => AppError::NotFoundError(err.to_string()),
            BookingError::Internal(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::invalid("body", rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::invalid("query", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::invalid("path", rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_shared::ReservationStatus;

    #[test]
    fn test_booking_errors_map_to_status_codes() {
        let cases = [
            (
                BookingError::validation("partySize", "must be at least 1"),
                StatusCode::BAD_REQUEST,
            ),
            (
                BookingError::InvalidTransition {
                    from: ReservationStatus::Pending,
                    to: ReservationStatus::Seated,
                },
                StatusCode::CONFLICT,
            ),
            (
                BookingError::NotFound {
                    entity: "Reservation",
                    id: "x".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                BookingError::Internal("pool timed out".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }
}
