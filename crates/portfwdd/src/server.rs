//! HTTP control surface
//!
//! - `GET /` lists the rules as JSON
//! - `POST /add` and `POST /remove` take url-encoded forms
//!
//! Accepted changes redirect back to `/`. Rejections are answered with
//! `200` and the plain-text reason.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use portfwd_common::{AddRequest, ForwardingRule, FwdError, FwdResult, Method, RemoveRequest};

use crate::fwd_mgr::{AddOutcome, FwdMgr, RemoveOutcome};

/// Manager shared between request handlers
pub type SharedMgr = Arc<Mutex<FwdMgr>>;

/// Build the control surface router
pub fn router(mgr: SharedMgr) -> Router {
    Router::new()
        .route("/", get(list_rules))
        .route("/add", post(add_rule))
        .route("/remove", post(remove_rule))
        .with_state(mgr)
}

/// Serve until Ctrl-C or SIGTERM
///
/// Live resources are left in place on shutdown.
pub async fn serve(addr: SocketAddr, mgr: SharedMgr) -> FwdResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| FwdError::internal(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("Listening on {}", addr);

    axum::serve(listener, router(mgr))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| FwdError::internal(format!("Server error: {}", e)))?;

    info!("Control surface stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn list_rules(State(mgr): State<SharedMgr>) -> Json<Vec<ForwardingRule>> {
    Json(mgr.lock().await.list_rules())
}

async fn add_rule(State(mgr): State<SharedMgr>, Form(req): Form<AddRequest>) -> Response {
    let result = mgr.lock().await.add_rule(&req).await;
    match result {
        Ok(AddOutcome::Added(_)) => Redirect::to("/").into_response(),
        Ok(AddOutcome::AlreadyForwarded) => "Port already forwarded".into_response(),
        Err(e) => rejection(req.method.as_deref(), e),
    }
}

async fn remove_rule(State(mgr): State<SharedMgr>, Form(req): Form<RemoveRequest>) -> Response {
    let result = mgr.lock().await.remove_rule(&req).await;
    match result {
        Ok(RemoveOutcome::Removed(_) | RemoveOutcome::Discarded) => {
            Redirect::to("/").into_response()
        }
        Ok(RemoveOutcome::NotForwarded) => "Port not forwarded".into_response(),
        Err(e) => rejection(req.method.as_deref(), e),
    }
}

fn rejection(method: Option<&str>, e: FwdError) -> Response {
    if e.is_validation() {
        return e.to_string().into_response();
    }
    if let FwdError::Store { .. } = e {
        error!("{}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    // Backend failure; the method name already passed validation.
    let backend = method
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .and_then(|m| m.parse::<Method>().ok())
        .unwrap_or_default();
    format!("{} add failed: {}", backend, e).into_response()
}
