pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod game_loop;
pub mod processor;
pub mod rooms;
pub mod session;
pub mod state;
pub mod ws;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the Axum router over the shared state.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(api::ping))
        .route("/user/signup", post(api::signup))
        .route("/user/token", post(api::token))
        .route("/user/logout", post(api::logout))
        .route("/room", post(api::create_room))
        .route("/room/{room_id}", get(ws::room_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
