//! The route handlers. Malformed requests are rejected with `400` and a `detail` body.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::{
    server::{ApiFailure, AppState},
    session::{self, SessionMetadata, SessionRecord},
    workflow::{
        RunSummary,
        artifact::ArtifactResult,
        parse_repository_url,
    },
};

type ApiResult<T> = Result<Json<T>, ApiFailure>;

const DEFAULT_PER_PAGE: usize = 10;
const DEFAULT_SESSION_LIMIT: usize = 50;

/// The analysis workflows the viewer shows, with the artifact each one publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnalysisKind {
    Gatekeeper,
    FeatureRequirement,
}

impl AnalysisKind {
    const fn workflow_name(self) -> &'static str {
        match self {
            Self::Gatekeeper => "Gatekeeper Analysis",
            Self::FeatureRequirement => "Feature Requirement Analysis",
        }
    }

    const fn artifact_name(self) -> &'static str {
        match self {
            Self::Gatekeeper => "gatekeeper-final-analysis",
            Self::FeatureRequirement => "feature-requirement-analysis",
        }
    }
}

const fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

const fn default_session_limit() -> usize {
    DEFAULT_SESSION_LIMIT
}

#[derive(Debug, Deserialize)]
pub(super) struct ConnectRequest {
    github_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
pub(super) struct ConnectResponse {
    owner: String,
    repo: String,
    full_name: String,
    description: Option<String>,
    default_branch: String,
}

pub(super) async fn connect(
    State(state): State<AppState>,
    request: Result<Json<ConnectRequest>, JsonRejection>,
) -> ApiResult<ConnectResponse> {
    let Json(request) = request?;
    let failure = ApiFailure::scrubbing(&request.token);
    let (owner, repo) = parse_repository_url(&request.github_url).map_err(&failure)?;
    let repository = state
        .github(&request.token, &owner, &repo)
        .map_err(&failure)?
        .validate()
        .await
        .map_err(&failure)?;

    info!("connected to {owner}/{repo}");
    Ok(Json(ConnectResponse {
        full_name: repository
            .full_name
            .unwrap_or_else(|| format!("{owner}/{repo}")),
        description: repository.description,
        default_branch: repository
            .default_branch
            .unwrap_or_else(|| String::from("main")),
        owner,
        repo,
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct RunsQuery {
    owner: String,
    repo: String,
    token: String,
    workflow_name: Option<String>,
    #[serde(default = "default_per_page")]
    per_page: usize,
}

async fn runs(state: AppState, kind: AnalysisKind, query: RunsQuery) -> ApiResult<Vec<RunSummary>> {
    let failure = ApiFailure::scrubbing(&query.token);
    let workflow_name = query
        .workflow_name
        .as_deref()
        .unwrap_or(kind.workflow_name());

    let client = state
        .github(&query.token, &query.owner, &query.repo)
        .map_err(&failure)?;
    let Some(workflow_id) = client
        .resolve_workflow_id(workflow_name)
        .await
        .map_err(&failure)?
    else {
        return Err(ApiFailure::new(
            StatusCode::NOT_FOUND,
            format!(
                "Workflow '{workflow_name}' not found in {}/{}",
                client.owner(),
                client.repo()
            ),
        ));
    };

    let runs = client
        .list_runs(workflow_id, query.per_page)
        .await
        .map_err(&failure)?;
    Ok(Json(runs))
}

pub(super) async fn gatekeeper_runs(
    State(state): State<AppState>,
    query: Result<Query<RunsQuery>, QueryRejection>,
) -> ApiResult<Vec<RunSummary>> {
    let Query(query) = query?;
    runs(state, AnalysisKind::Gatekeeper, query).await
}

pub(super) async fn feature_runs(
    State(state): State<AppState>,
    query: Result<Query<RunsQuery>, QueryRejection>,
) -> ApiResult<Vec<RunSummary>> {
    let Query(query) = query?;
    runs(state, AnalysisKind::FeatureRequirement, query).await
}

#[derive(Debug, Deserialize)]
pub(super) struct ArtifactQuery {
    owner: String,
    repo: String,
    token: String,
    artifact_name: Option<String>,
}

async fn artifact(
    state: AppState,
    kind: AnalysisKind,
    run_id: u64,
    query: ArtifactQuery,
) -> ApiResult<ArtifactResult> {
    let failure = ApiFailure::scrubbing(&query.token);
    let artifact_name = query
        .artifact_name
        .as_deref()
        .unwrap_or(kind.artifact_name());

    let result = state
        .github(&query.token, &query.owner, &query.repo)
        .map_err(&failure)?
        .fetch_artifact(run_id, artifact_name)
        .await
        .map_err(&failure)?;

    match result {
        ArtifactResult::Missing { error, available } => Err(ApiFailure::new(
            StatusCode::NOT_FOUND,
            json!({ "error": error, "available": available }),
        )),
        result => Ok(Json(result)),
    }
}

pub(super) async fn gatekeeper_artifact(
    State(state): State<AppState>,
    run_id: Result<Path<u64>, PathRejection>,
    query: Result<Query<ArtifactQuery>, QueryRejection>,
) -> ApiResult<ArtifactResult> {
    let (Path(run_id), Query(query)) = (run_id?, query?);
    artifact(state, AnalysisKind::Gatekeeper, run_id, query).await
}

pub(super) async fn feature_artifact(
    State(state): State<AppState>,
    run_id: Result<Path<u64>, PathRejection>,
    query: Result<Query<ArtifactQuery>, QueryRejection>,
) -> ApiResult<ArtifactResult> {
    let (Path(run_id), Query(query)) = (run_id?, query?);
    artifact(state, AnalysisKind::FeatureRequirement, run_id, query).await
}

#[derive(Debug, Deserialize)]
pub(super) struct AllRunsQuery {
    owner: String,
    repo: String,
    token: String,
    #[serde(default = "default_per_page")]
    per_page: usize,
}

pub(super) async fn all_runs(
    State(state): State<AppState>,
    query: Result<Query<AllRunsQuery>, QueryRejection>,
) -> ApiResult<Vec<RunSummary>> {
    let Query(query) = query?;
    let failure = ApiFailure::scrubbing(&query.token);
    let runs = state
        .github(&query.token, &query.owner, &query.repo)
        .map_err(&failure)?
        .list_all_runs(query.per_page)
        .await
        .map_err(&failure)?;
    Ok(Json(runs))
}

#[derive(Debug, Deserialize)]
pub(super) struct FetchRequest {
    token: String,
    #[serde(default = "default_session_limit")]
    limit: usize,
    #[serde(default)]
    fetch_all: bool,
}

pub(super) async fn fetch_sessions(
    State(state): State<AppState>,
    request: Result<Json<FetchRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = request?;
    let snapshot = session::fetch_sessions(
        state.session_backend.as_ref(),
        &request.token,
        request.limit,
        request.fetch_all,
    )
    .await
    .map_err(|err| ApiFailure::with_prefix("Fetch failed: ", &err, Some(request.token.trim())))?;

    let count = snapshot.sessions.len();
    state.sessions.replace(snapshot);

    info!("stored {count} fetched sessions");
    Ok(Json(json!({
        "count": count,
        "message": format!("Fetched {count} session(s) successfully"),
    })))
}

pub(super) async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionMetadata>> {
    Json(state.sessions.sessions())
}

pub(super) async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionRecord> {
    state.sessions.get(&session_id).map(Json).ok_or_else(|| {
        ApiFailure::new(
            StatusCode::NOT_FOUND,
            format!("Session '{session_id}' not found. Fetch sessions first."),
        )
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct AgentQuery {
    context: String,
    query: String,
}

pub(super) async fn query_agent(
    State(state): State<AppState>,
    request: Result<Json<AgentQuery>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = request?;
    if request.query.trim().is_empty() {
        return Err(ApiFailure::new(
            StatusCode::BAD_REQUEST,
            "Query cannot be empty",
        ));
    }
    if request.context.trim().is_empty() {
        return Err(ApiFailure::new(
            StatusCode::BAD_REQUEST,
            "Context cannot be empty. Please load context first.",
        ));
    }

    let response = state
        .agent
        .query(&request.context, &request.query)
        .await
        .map_err(|err| ApiFailure::with_prefix("Agent call failed: ", &err, None))?;
    info!("relayed a query to {}", state.agent.agent_name());
    Ok(Json(json!({ "response": response })))
}
