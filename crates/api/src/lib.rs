//! `api` crate — the HTTP REST surface.
//!
//! Two collaborator-facing route groups under `/api/v3`: the client/GUI/CLI
//! surface (`handlers::workflow`) and the Coordinator surface the
//! Distributor process calls (`handlers::distributor`). A background
//! `queue::Reaper` is spawned alongside the listener at startup so a single
//! `serve()` call stands up the whole server-side subsystem.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use db::DbPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: ServerConfig,
}

fn router(state: AppState) -> Router {
    use handlers::{distributor, workflow};

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let workflow_routes = Router::new()
        .route("/workflow", post(workflow::bind_workflow))
        .route("/workflow/:id/set_resume", post(workflow::set_resume))
        .route("/workflow/:id/is_resumable", get(workflow::is_resumable))
        .route(
            "/workflow/:id/max_concurrently_running",
            get(workflow::get_max_concurrently_running).put(workflow::update_max_concurrently_running),
        )
        .route("/workflow/:id/status", get(workflow::workflow_status))
        .route("/workflow/:id/tasks", get(workflow::workflow_tasks))
        .route("/workflow/:id/task_status_updates", post(workflow::task_status_updates))
        .route("/workflow/:id/task_template_dag", get(workflow::task_template_dag))
        .route(
            "/array/:id/max_concurrently_running",
            put(workflow::update_array_max_concurrently_running),
        )
        .route("/workflow/:id/reset", post(workflow::reset_workflow))
        .route("/task/:id", get(workflow::get_task))
        .route("/task/:id/status", put(workflow::update_task_status))
        .route("/task/:id/filepaths", get(workflow::task_filepaths));

    let distributor_routes = Router::new()
        .route("/array/:id/queue_task_batch", post(distributor::queue_task_batch))
        .route("/array/:id/transition_to_launched", post(distributor::transition_to_launched))
        .route("/task_instance/:id/log_distributor_id", post(distributor::log_distributor_id))
        .route("/task_instance/:id/log_running", post(distributor::log_running))
        .route("/task_instance/:id/log_done", post(distributor::log_done))
        .route("/task_instance/:id/log_error", post(distributor::log_error))
        .route("/task_instance/:id/log_resource_error", post(distributor::log_resource_error))
        .route("/task_instance/:id/log_no_heartbeat", post(distributor::log_no_heartbeat))
        .route("/task_instance/:id/heartbeat", post(distributor::heartbeat));

    Router::new()
        .nest("/api/v3", workflow_routes.merge(distributor_routes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the HTTP listener and run the server forever, with the Reaper
/// running alongside it as a background task.
pub async fn serve(pool: DbPool, config: ServerConfig) -> Result<(), std::io::Error> {
    let bind = config.bind.clone();
    let reaper_config = queue::ReaperConfig {
        scan_interval: std::time::Duration::from_secs(config.reaper_interval_secs),
        ..Default::default()
    };
    let reaper = queue::Reaper::new(pool.clone(), hostname(), reaper_config);
    tokio::spawn(async move {
        reaper.run_forever().await;
    });

    let app = router(AppState { pool, config });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "jobmon-api".to_owned())
}
