use axum::{http::Method, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod health;
pub mod live;
pub mod middleware;
pub mod reservations;
pub mod state;
pub mod tables;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let staff = Router::new()
        .merge(reservations::staff_routes())
        .merge(tables::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::staff_auth_middleware,
        ));

    Router::new()
        .merge(health::routes())
        .merge(reservations::routes())
        .merge(live::routes())
        .merge(staff)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
