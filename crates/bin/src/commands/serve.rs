//! Serve command - runs the push-pull server over HTTP.

use std::{path::Path, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio::signal::unix::{SignalKind, signal};

use orda::{
    Server, ServerConfig,
    constants::{CLIENT_PATH, HEALTH_PATH, PUSHPULL_PATH},
    pushpull::{ClientRequest, PushPullRequest},
    server::InMemoryPersistence,
};

use super::health::HealthReport;
use crate::cli::ServeArgs;

/// Body of failed requests
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u32,
    msg: String,
}

fn error_response(err: orda::Error) -> Response {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_server_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    };
    let body = ErrorBody {
        code: err.code(),
        msg: err.reason(),
    };
    (status, Json(body)).into_response()
}

async fn load_config(args: &ServeArgs) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&json)?
        }
        None => ServerConfig::default(),
    };
    if let Some(interval) = args.snapshot_interval {
        config.snapshot_interval = interval;
    }
    if args.no_auto_create {
        config.auto_create_collection = false;
    }
    Ok(config)
}

async fn load_persistence(path: Option<&Path>) -> orda::Result<InMemoryPersistence> {
    match path {
        Some(path) => {
            let persistence = InMemoryPersistence::load_from_file(path).await?;
            tracing::info!("Loaded server state from {}", path.display());
            Ok(persistence)
        }
        None => Ok(InMemoryPersistence::new()),
    }
}

/// Run the push-pull server
pub async fn run(args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args).await?;
    tracing::info!(?config, "Starting server");

    let persistence = Arc::new(load_persistence(args.data_file.as_deref()).await?);
    let server = Server::with_persistence(config, persistence.clone());

    let app = Router::new()
        .route(HEALTH_PATH, get(handle_health))
        .route(CLIENT_PATH, post(handle_client))
        .route(PUSHPULL_PATH, post(handle_push_pull))
        .with_state(server);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    println!("Orda server listening on http://{local_addr}");
    println!();
    println!("Available endpoints:");
    println!("  GET  {HEALTH_PATH:<16} - Health check");
    println!("  POST {CLIENT_PATH:<16} - Client registration");
    println!("  POST {PUSHPULL_PATH:<16} - Push-pull");
    println!();
    println!("Press Ctrl+C to shutdown");

    let mut sigterm = signal(SignalKind::terminate())?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, initiating graceful shutdown..."),
            }
        })
        .await?;

    if let Some(path) = &args.data_file {
        match persistence.save_to_file(path).await {
            Ok(()) => {
                tracing::info!("Server state saved to {}", path.display());
                println!("\nServer state saved successfully");
            }
            Err(e) => {
                tracing::error!("Failed to save server state: {e}");
                eprintln!("Failed to save server state: {e}");
            }
        }
    }

    println!("Server shut down");
    Ok(())
}

/// Handler for GET /health
async fn handle_health() -> Json<HealthReport> {
    Json(HealthReport::healthy("inmemory"))
}

/// Handler for POST /api/v1/client
async fn handle_client(
    State(server): State<Server>,
    Json(request): Json<ClientRequest>,
) -> Response {
    match server.process_client(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::warn!("Client registration failed: {e}");
            error_response(e)
        }
    }
}

/// Handler for POST /api/v1/pushpull
async fn handle_push_pull(
    State(server): State<Server>,
    Json(request): Json<PushPullRequest>,
) -> Response {
    match server.process_push_pull(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::warn!("Push-pull failed: {e}");
            error_response(e)
        }
    }
}
