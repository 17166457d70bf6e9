//! GitHub Actions workflows from GitHub REST API and the client to fetch them.

#![cfg(feature = "workflow")]

use std::fmt::Display;

use regex::Regex;
use reqwest::{
    Response, StatusCode,
    header::{self, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::{
    env::REQUEST_TIMEOUT,
    error::{Error, Result},
    static_lazy_lock,
};

pub mod artifact;
pub mod extract;

/// The prefix of fine-grained personal access tokens.
pub const FINE_GRAINED_TOKEN_PREFIX: &str = "github_pat_";

/// The status of a finished workflow run.
pub const COMPLETED: &str = "completed";

/// The length of the abbreviated commit hash in a [`RunSummary`].
pub const SHORT_SHA_LEN: usize = 7;

const WORKFLOW_PAGE_SIZE: usize = 100;
const USER_AGENT: &str = concat!("gatekeeper-viewer/", env!("CARGO_PKG_VERSION"));
const ACCESS_DENIED_HINT: &str = "Access denied (403). Your token may lack the required scope. \
     Classic PATs need 'repo' scope; fine-grained PATs need 'Actions: Read' and \
     'Contents: Read' permissions for this repository.";

static_lazy_lock! {
    REPOSITORY_URL_PATTERN: Option<Regex> = Regex::new(
        r"^(?:https?://)?(?:www\.)?github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$",
    )
    .ok();
}

/// Extracts `(owner, repo)` from a GitHub repository URL.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the URL does not point to a GitHub repository.
pub fn parse_repository_url(url: &str) -> Result<(String, String)> {
    REPOSITORY_URL_PATTERN
        .as_ref()
        .and_then(|pattern| pattern.captures(url.trim()))
        .map(|captures| (captures[1].to_owned(), captures[2].to_owned()))
        .ok_or_else(|| Error::InvalidInput(format!("Invalid GitHub URL: {url}")))
}

/// Selects the `Authorization` scheme for a token: `Bearer` for fine-grained tokens, `token` otherwise.
pub fn authorization_scheme(token: &str) -> &'static str {
    if token.starts_with(FINE_GRAINED_TOKEN_PREFIX) {
        "Bearer"
    } else {
        "token"
    }
}

/// Represents the part of a repository from GitHub REST API that the viewer needs.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Repository {
    pub full_name: Option<String>,
    pub description: Option<String>,
    pub default_branch: Option<String>,
}

/// Represents workflows from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct Workflows {
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

/// Represents a GitHub Actions workflow from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct Workflow {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

impl Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} at {})", self.name, self.id, self.path)
    }
}

/// Represents workflow runs from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowRuns {
    #[serde(default)]
    pub workflow_runs: Vec<WorkflowRun>,
}

/// Represents a GitHub Actions workflow run from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowRun {
    pub id: u64,
    /// The name of the workflow this run belongs to.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub html_url: String,
    pub head_sha: String,
    #[serde(default)]
    pub display_title: String,
    pub run_number: u64,
    #[serde(default)]
    pub actor: Option<Actor>,
}

/// The user who triggered a [`WorkflowRun`].
#[derive(Debug, Deserialize, Clone)]
pub struct Actor {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// A normalized snapshot of one workflow run, as served to the viewer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub html_url: String,
    /// The first [`SHORT_SHA_LEN`] characters of the head commit.
    pub head_sha: String,
    pub display_title: String,
    pub run_number: u64,
    /// The login of the actor, `unknown` if absent.
    pub actor: String,
    pub actor_avatar: String,
    /// Only set by [`GitHubClient::list_all_runs`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
}

impl From<WorkflowRun> for RunSummary {
    fn from(run: WorkflowRun) -> Self {
        let (actor, actor_avatar) = run.actor.map_or_else(
            || (String::from("unknown"), String::new()),
            |actor| (actor.login, actor.avatar_url),
        );

        Self {
            id: run.id,
            status: run.status.unwrap_or_default(),
            conclusion: run.conclusion,
            created_at: run.created_at,
            updated_at: run.updated_at,
            html_url: run.html_url,
            head_sha: run.head_sha.chars().take(SHORT_SHA_LEN).collect(),
            display_title: run.display_title,
            run_number: run.run_number,
            actor,
            actor_avatar,
            workflow_name: None,
        }
    }
}

/// A credentialed client for the GitHub REST API, bound to a single repository.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    /// Creates a client against an explicit API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the token cannot be sent as a header, or [`Error::Http`] if the
    /// HTTP client fails to build.
    pub fn with_base_url(base_url: &str, token: &str, owner: &str, repo: &str) -> Result<Self> {
        let mut authorization =
            HeaderValue::from_str(&format!("{} {token}", authorization_scheme(token))).map_err(
                |_| Error::InvalidInput(String::from("The token contains invalid characters.")),
            )?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, authorization);
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(*REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            owner: owner.to_owned(),
            repo: repo.to_owned(),
        })
    }

    /// The owner of the repository.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The name of the repository.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.base_url, self.owner, self.repo)
    }

    async fn get_json<T>(&self, url: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        debug!("requesting {url}…");
        let response = classify(self.http.get(url).query(query).send().await?)?;
        Ok(response.json::<T>().await?)
    }

    /// Fetches the repository descriptor, which also validates the token and the repository access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`], [`Error::AccessDenied`] or [`Error::NotFound`] for the matching upstream
    /// statuses, and [`Error::Http`] for anything else.
    pub async fn validate(&self) -> Result<Repository> {
        let repository = self.get_json(&self.repo_url(""), &[]).await?;
        info!("validated access to {}/{}", self.owner, self.repo);
        Ok(repository)
    }

    /// Finds the id of the workflow whose name equals `name` exactly.
    ///
    /// # Errors
    ///
    /// See: [`Self::validate`]
    pub async fn resolve_workflow_id(&self, name: &str) -> Result<Option<u64>> {
        let listing: Workflows = self
            .get_json(
                &self.repo_url("/actions/workflows"),
                &[("per_page", WORKFLOW_PAGE_SIZE.to_string())],
            )
            .await?;

        let workflow = listing.workflows.into_iter().find(|w| w.name == name);
        match &workflow {
            Some(workflow) => debug!("resolved workflow {workflow}"),
            None => warn!("no workflow named {name:?} in {}/{}", self.owner, self.repo),
        }
        Ok(workflow.map(|w| w.id))
    }

    /// Lists the latest completed runs of a workflow, newest first, at most `per_page` of them.
    ///
    /// # Errors
    ///
    /// See: [`Self::validate`]
    pub async fn list_runs(&self, workflow_id: u64, per_page: usize) -> Result<Vec<RunSummary>> {
        let listing: WorkflowRuns = self
            .get_json(
                &self.repo_url(&format!("/actions/workflows/{workflow_id}/runs")),
                &[
                    ("per_page", per_page.to_string()),
                    ("status", COMPLETED.to_owned()),
                ],
            )
            .await?;

        let runs: Vec<RunSummary> = listing
            .workflow_runs
            .into_iter()
            .filter(|run| run.status.as_deref() == Some(COMPLETED))
            .take(per_page)
            .map(RunSummary::from)
            .collect();

        info!(
            "fetched {} completed runs of workflow {workflow_id}",
            runs.len()
        );
        Ok(runs)
    }

    /// Lists the latest runs across all workflows, each tagged with its workflow name.
    ///
    /// # Errors
    ///
    /// See: [`Self::validate`]
    pub async fn list_all_runs(&self, per_page: usize) -> Result<Vec<RunSummary>> {
        let listing: WorkflowRuns = self
            .get_json(
                &self.repo_url("/actions/runs"),
                &[("per_page", per_page.to_string())],
            )
            .await?;

        let runs: Vec<RunSummary> = listing
            .workflow_runs
            .into_iter()
            .take(per_page)
            .map(|run| {
                let workflow_name = run.name.clone().unwrap_or_else(|| String::from("Unknown"));
                RunSummary {
                    workflow_name: Some(workflow_name),
                    ..RunSummary::from(run)
                }
            })
            .collect();

        info!(
            "fetched {} runs across all workflows of {}/{}",
            runs.len(),
            self.owner,
            self.repo
        );
        Ok(runs)
    }
}

/// Translates upstream statuses into [`Error`] categories.
fn classify(response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(Error::Auth(String::from(
            "Invalid token: check that your PAT is correct and not expired.",
        ))),
        StatusCode::FORBIDDEN => Err(Error::AccessDenied(ACCESS_DENIED_HINT.to_owned())),
        StatusCode::NOT_FOUND => Err(Error::NotFound(String::from(
            "Repository not found or not accessible with this token.",
        ))),
        _ => Ok(response.error_for_status()?),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;

    use serde_json::{Value, json};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    pub(crate) fn run(id: u64, status: &str, workflow: Option<&str>) -> Value {
        json!({
            "id": id,
            "name": workflow,
            "status": status,
            "conclusion": if status == COMPLETED { Value::from("success") } else { Value::Null },
            "created_at": "2026-03-01T10:00:00Z",
            "updated_at": "2026-03-01T10:05:00Z",
            "html_url": format!("https://github.com/acme/widgets/actions/runs/{id}"),
            "head_sha": "0123456789abcdef0123456789abcdef01234567",
            "display_title": format!("Analysis #{id}"),
            "run_number": id,
            "actor": { "login": "octocat", "avatar_url": "https://avatars.example/octocat" },
        })
    }

    fn client(server: &MockServer, token: &str) -> GitHubClient {
        GitHubClient::with_base_url(&server.uri(), token, "acme", "widgets").unwrap()
    }

    #[test]
    fn fine_grained_tokens_use_bearer() {
        assert_eq!(authorization_scheme("github_pat_11AAAA"), "Bearer");
        assert_eq!(authorization_scheme("ghp_classic"), "token");
        assert_eq!(authorization_scheme("gho_oauth"), "token");
    }

    #[test]
    fn repository_urls_are_parsed() {
        for url in [
            "https://github.com/acme/widgets",
            "http://www.github.com/acme/widgets/",
            "github.com/acme/widgets.git",
            "  https://github.com/acme/widgets.git/  ",
        ] {
            assert_eq!(
                parse_repository_url(url).unwrap(),
                (String::from("acme"), String::from("widgets")),
                "{url}"
            );
        }
        assert_eq!(
            parse_repository_url("https://github.com/acme/my.repo").unwrap().1,
            "my.repo"
        );
    }

    #[test]
    fn foreign_urls_are_rejected() {
        for url in [
            "https://gitlab.com/acme/widgets",
            "https://github.com/acme",
            "https://github.com/acme/widgets/tree/main",
        ] {
            let err = parse_repository_url(url).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{url}");
        }
    }

    #[tokio::test]
    async fn authorization_header_follows_token_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets"))
            .and(header("authorization", "Bearer github_pat_fine"))
            .and(header("x-github-api-version", "2022-11-28"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "full_name": "acme/widgets",
                "description": null,
                "default_branch": "trunk",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets"))
            .and(header("authorization", "token ghp_classic"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let repository = client(&server, "github_pat_fine").validate().await.unwrap();
        assert_eq!(repository.full_name.as_deref(), Some("acme/widgets"));
        assert_eq!(repository.default_branch.as_deref(), Some("trunk"));

        let repository = client(&server, "ghp_classic").validate().await.unwrap();
        assert_eq!(repository.full_name, None);
    }

    #[tokio::test]
    async fn upstream_statuses_are_classified() {
        for (status, kind) in [
            (401_u16, ErrorKind::Auth),
            (403, ErrorKind::AccessDenied),
            (404, ErrorKind::NotFound),
            (500, ErrorKind::Transport),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = client(&server, "ghp_x").validate().await.unwrap_err();
            assert_eq!(err.kind(), kind, "status {status}");
        }
    }

    #[tokio::test]
    async fn access_denied_names_required_scopes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server, "ghp_x").validate().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'repo' scope"));
        assert!(message.contains("Actions: Read"));
    }

    #[tokio::test]
    async fn workflow_ids_resolve_by_exact_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/actions/workflows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 3,
                "workflows": [
                    { "id": 1, "name": "gatekeeper analysis", "path": ".github/workflows/a.yml" },
                    { "id": 2, "name": "Gatekeeper Analysis", "path": ".github/workflows/b.yml" },
                    { "id": 3, "name": "Feature Requirement Analysis", "path": ".github/workflows/c.yml" },
                ],
            })))
            .mount(&server)
            .await;

        let client = client(&server, "ghp_x");
        assert_eq!(
            client.resolve_workflow_id("Gatekeeper Analysis").await.unwrap(),
            Some(2)
        );
        assert_eq!(
            client
                .resolve_workflow_id("Feature Requirement Analysis")
                .await
                .unwrap(),
            Some(3)
        );
        assert_eq!(client.resolve_workflow_id("GATEKEEPER ANALYSIS").await.unwrap(), None);
    }

    #[tokio::test]
    async fn completed_runs_are_filtered_and_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/actions/workflows/2/runs"))
            .and(query_param("status", "completed"))
            .and(query_param("per_page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 4,
                "workflow_runs": [
                    run(40, "in_progress", None),
                    run(39, COMPLETED, None),
                    run(38, COMPLETED, None),
                    run(37, COMPLETED, None),
                ],
            })))
            .mount(&server)
            .await;

        let runs = client(&server, "ghp_x").list_runs(2, 2).await.unwrap();
        assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![39, 38]);
        assert!(runs.iter().all(|r| r.status == COMPLETED));
        assert_eq!(runs[0].head_sha, "0123456");
        assert_eq!(runs[0].actor, "octocat");
        assert_eq!(runs[0].workflow_name, None);
    }

    #[tokio::test]
    async fn all_runs_carry_workflow_names() {
        let server = MockServer::start().await;
        let mut anonymous = run(7, COMPLETED, None);
        anonymous["actor"] = Value::Null;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/actions/runs"))
            .and(query_param("per_page", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 2,
                "workflow_runs": [run(8, "queued", Some("Gatekeeper Analysis")), anonymous],
            })))
            .mount(&server)
            .await;

        let runs = client(&server, "ghp_x").list_all_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].workflow_name.as_deref(), Some("Gatekeeper Analysis"));
        assert_eq!(runs[1].workflow_name.as_deref(), Some("Unknown"));
        assert_eq!(runs[1].actor, "unknown");
        assert_eq!(runs[1].actor_avatar, "");

        let serialized = serde_json::to_value(&runs[0]).unwrap();
        assert_eq!(serialized["workflow_name"], "Gatekeeper Analysis");
        assert_eq!(serialized["actor_avatar"], "https://avatars.example/octocat");
    }
}
