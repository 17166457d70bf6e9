//! The HTTP API the viewer talks to.
//!
//! Every request carries its own GitHub credentials, so the only shared state is the session store and the
//! upstream clients. See: [`router`]

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    agent::AgentClient,
    env::GITHUB_API_URL,
    error::Result,
    session::{SessionBackend, SessionStore, rpc::CopilotCli},
    shutdown,
    workflow::GitHubClient,
};

pub mod failure;
mod handlers;

pub use failure::{ApiFailure, status_for};

/// The state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// The GitHub REST API base URL that per-request clients are created against.
    pub github_api_url: Arc<str>,
    /// The sessions of the latest fetch.
    pub sessions: Arc<SessionStore>,
    /// Opens connections to the session RPC.
    pub session_backend: Arc<dyn SessionBackend>,
    /// The hosted agent.
    pub agent: Arc<AgentClient>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("github_api_url", &self.github_api_url)
            .field("sessions", &self.sessions)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates the state from the environment, spawning the Copilot CLI for session fetches.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent client cannot be built.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            github_api_url: Arc::from(GITHUB_API_URL.as_str()),
            sessions: Arc::new(SessionStore::new()),
            session_backend: Arc::new(CopilotCli::default()),
            agent: Arc::new(AgentClient::from_env()?),
        })
    }

    fn github(&self, token: &str, owner: &str, repo: &str) -> Result<GitHubClient> {
        GitHubClient::with_base_url(&self.github_api_url, token, owner, repo)
    }
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/connect", post(handlers::connect))
        .route("/api/runs", get(handlers::gatekeeper_runs))
        .route("/api/runs/{run_id}/artifact", get(handlers::gatekeeper_artifact))
        .route("/api/frd/runs", get(handlers::feature_runs))
        .route("/api/frd/runs/{run_id}/artifact", get(handlers::feature_artifact))
        .route("/api/all-runs", get(handlers::all_runs))
        .route("/api/sessions/fetch", post(handlers::fetch_sessions))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/sessions/{session_id}", get(handlers::get_session))
        .route("/api/agent/query", post(handlers::query_agent))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serves the API on `address` until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(state: AppState, address: &str) -> Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// Allows any origin, method and header, without credentials. Preflight requests are answered here.
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let requested_headers = request
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));

        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        allow_any_origin(headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested_headers);
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
        return response;
    }

    let mut response = next.run(request).await;
    allow_any_origin(response.headers_mut());
    response
}

fn allow_any_origin(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}
