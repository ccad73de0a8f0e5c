// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{health, queue, quiz, simulation_history},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Health is public; everything else under `/api` requires a bearer token.
/// * Queue maintenance additionally requires the admin role.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let history_routes = Router::new()
        .route(
            "/",
            get(simulation_history::list_history).post(simulation_history::create_history),
        )
        .route("/statistics", get(simulation_history::get_statistics))
        .route(
            "/{id}",
            get(simulation_history::get_history)
                .put(simulation_history::update_history)
                .delete(simulation_history::delete_history),
        );

    let quiz_routes = Router::new()
        .route(
            "/session",
            post(quiz::start_session)
                .get(quiz::get_session)
                .delete(quiz::reset_session),
        )
        .route("/session/answers", put(quiz::answer_question))
        .route("/session/position", put(quiz::navigate))
        .route("/session/finalize", post(quiz::finalize_session));

    let queue_routes = Router::new()
        .route("/status", get(queue::queue_status))
        .merge(
            Router::new()
                .route("/", delete(queue::clear_queue))
                .route(
                    "/dead-letters",
                    get(queue::dead_letters).delete(queue::clear_dead_letters),
                )
                .layer(middleware::from_fn(admin_middleware)),
        );

    // Auth runs before the admin check on the nested queue routes.
    let protected_routes = Router::new()
        .nest("/simulation-history", history_routes)
        .nest("/quiz", quiz_routes)
        .nest("/queue", queue_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route(
            "/api/health",
            get(health::health_check).head(health::health_head),
        )
        .nest("/api", protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
