//! # sb-api
//!
//! The web routing and orchestration layer for Sigmaboard.

pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod realtime;
pub mod session;
pub mod state;
pub mod vote;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;

pub use realtime::Notifier;
pub use state::AppState;

/// Room for the non-file form fields on top of the upload ceiling.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Builds the application router.
///
/// # Developer Note
/// Only page and API routes run the identity middleware. Static assets,
/// uploads and the health probe never create aliases.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);

    let pages: Router<AppState> = Router::new()
        .route("/", get(handlers::feed))
        .route("/feed", get(handlers::feed))
        .route("/photos", get(handlers::photos))
        .route("/text", get(handlers::text))
        .route("/post/{id}", get(handlers::view_post))
        .route("/post/{id}/add_comment", post(handlers::add_comment))
        .route(
            "/create_post",
            get(handlers::create_post_form).post(handlers::create_post),
        )
        .route("/delete_post/{id}", post(handlers::delete_post))
        .route("/delete_comment/{id}", post(handlers::delete_comment))
        .route("/vote", post(vote::cast_vote))
        .route("/ws", get(realtime::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            identity::assign_identity,
        ));

    let assets: Router<AppState> = Router::new()
        .route("/static/app.js", get(handlers::app_js))
        .route("/static/app.css", get(handlers::app_css))
        .route("/healthz", get(handlers::healthz))
        .nest_service("/uploads", ServeDir::new(&state.upload_dir));

    pages
        .merge(assets)
        .layer(middleware::nosniff())
        .layer(middleware::referrer_policy())
        .layer(middleware::request_tracing())
        .with_state(state)
}
