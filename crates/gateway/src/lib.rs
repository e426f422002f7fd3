//! JSON/HTTP API over the vision core, for controllers in the hosting
//! app and for CLI adjuncts.

pub mod error;
pub mod handlers;
pub mod state;

use {
    axum::{
        Json, Router,
        extract::State,
        response::IntoResponse,
        routing::{delete, get, post, put},
    },
    tower_http::trace::TraceLayer,
    tracing::info,
};

pub use state::AppState;

/// Build the full API router over the given state.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Projects
        .route("/projects", post(handlers::projects::create).get(handlers::projects::list))
        .route(
            "/projects/{id}",
            get(handlers::projects::get).delete(handlers::projects::delete),
        )
        .route("/projects/{id}/settings", put(handlers::projects::update))
        // Pages
        .route("/pages", post(handlers::pages::create).get(handlers::pages::list))
        .route(
            "/pages/{id}",
            get(handlers::pages::get)
                .put(handlers::pages::update)
                .delete(handlers::pages::delete),
        )
        // Browser configs
        .route(
            "/browser_configs",
            post(handlers::profiles::create).get(handlers::profiles::list),
        )
        .route(
            "/browser_configs/{id}",
            get(handlers::profiles::get).delete(handlers::profiles::delete),
        )
        // Snapshots
        .route("/snapshots", post(handlers::snapshots::create))
        .route("/snapshots/{id}", get(handlers::snapshots::get))
        .route("/snapshots/{id}/compare", post(handlers::snapshots::compare))
        // Test runs
        .route("/test_runs", post(handlers::test_runs::create))
        .route("/test_runs/{id}", get(handlers::test_runs::get))
        // Comparisons
        .route("/comparisons/{id}", get(handlers::comparisons::get))
        .route("/comparisons/{id}/approve", post(handlers::comparisons::approve))
        .route("/comparisons/{id}/reject", post(handlers::comparisons::reject))
        .route(
            "/comparisons/{id}/update_baseline",
            post(handlers::comparisons::update_baseline),
        )
        // Credentials
        .route(
            "/credentials",
            post(handlers::credentials::create).get(handlers::credentials::list),
        )
        .route(
            "/credentials/{id}",
            get(handlers::credentials::get).delete(handlers::credentials::delete),
        )
        .route("/credentials/{id}/test", post(handlers::credentials::test))
        // Sessions
        .route(
            "/sessions",
            post(handlers::sessions::create).get(handlers::sessions::list),
        )
        .route("/sessions/{id}", delete(handlers::sessions::close))
        .route("/sessions/{id}/state", get(handlers::sessions::get_state))
        .route("/sessions/{id}/perform", post(handlers::sessions::perform))
        .route("/sessions/{id}/ai", post(handlers::sessions::ai))
        .route("/sessions/{id}/extract", post(handlers::sessions::extract))
        .route("/sessions/{id}/screenshot", get(handlers::sessions::screenshot))
        // AI tasks
        .route("/tasks", post(handlers::tasks::create).get(handlers::tasks::list))
        .route("/tasks/{id}", get(handlers::tasks::get))
        .route("/tasks/{id}/stop", post(handlers::tasks::stop));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .merge(api);

    #[cfg(feature = "prometheus")]
    {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve the API until the process is stopped.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "gateway listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let vault_healthy = match state.vault.as_ref() {
        Some(vault) => Some(vault.healthy().await),
        None => None,
    };

    Json(serde_json::json!({
        "status": "ok",
        "browser_providers": state.browsers.provider_names(),
        "vault": vault_healthy,
    }))
}

#[cfg(feature = "prometheus")]
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.as_ref() {
        Some(handle) => handle.render().into_response(),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
