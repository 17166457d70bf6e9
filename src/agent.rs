//! Relays questions with their context to the hosted agent.

#![cfg(feature = "agent")]

use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    env::{AGENT_API_VERSION, AGENT_ENDPOINT, AGENT_NAME, AGENT_TOKEN, REQUEST_TIMEOUT},
    error::{Error, Result},
};

/// Marks the start of the context block in a prompt.
pub const CONTEXT_START: &str = "=== CONTEXT START ===";

/// Marks the end of the context block in a prompt.
pub const CONTEXT_END: &str = "=== CONTEXT END ===";

/// Embeds a context block and a question into a single prompt.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "You are provided with context data from workflow analyses and copilot sessions.\n\
         Use this context to answer the user's question accurately.\n\
         \n\
         {CONTEXT_START}\n\
         {context}\n\
         {CONTEXT_END}\n\
         \n\
         User Question: {query}"
    )
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AgentResponse {
    fn text(self) -> String {
        self.output_text.unwrap_or_else(|| {
            self.output
                .into_iter()
                .flat_map(|item| item.content)
                .filter(|content| content.kind == "output_text")
                .map(|content| content.text)
                .collect()
        })
    }
}

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    input: [Value; 1],
    agent: AgentReference<'a>,
}

#[derive(Debug, Serialize)]
struct AgentReference<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// A client for an agent hosted behind an OpenAI-compatible responses endpoint.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    endpoint: String,
    agent_name: String,
    api_version: String,
}

impl AgentClient {
    /// Creates a client from the configured [`AGENT_ENDPOINT`], [`AGENT_NAME`] and [`AGENT_TOKEN`].
    ///
    /// # Errors
    ///
    /// See: [`Self::with_endpoint`]
    pub fn from_env() -> Result<Self> {
        Self::with_endpoint(
            &AGENT_ENDPOINT,
            &AGENT_NAME,
            &AGENT_API_VERSION,
            AGENT_TOKEN.as_deref(),
        )
    }

    /// Creates a client for an explicit endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the token cannot be sent as a header, or [`Error::Http`] if the
    /// HTTP client fails to build.
    pub fn with_endpoint(
        endpoint: &str,
        agent_name: &str,
        api_version: &str,
        token: Option<&str>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut authorization = HeaderValue::from_str(&format!("Bearer {token}")).map_err(
                |_| Error::InvalidInput(String::from("The agent token contains invalid characters.")),
            )?;
            authorization.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, authorization);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(*REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            agent_name: agent_name.to_owned(),
            api_version: api_version.to_owned(),
        })
    }

    /// The name of the agent queries are sent to.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Asks the agent `query` about `context` and returns its text output.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the agent answers with a non-success status, or the answer is
    /// malformed.
    pub async fn query(&self, context: &str, query: &str) -> Result<String> {
        let url = format!("{}/openai/responses", self.endpoint);
        let request = AgentRequest {
            input: [json!({ "role": "user", "content": build_prompt(context, query) })],
            agent: AgentReference {
                name: &self.agent_name,
                kind: "agent_reference",
            },
        };

        debug!("querying agent {} at {url}…", self.agent_name);
        let response: AgentResponse = self
            .http
            .post(&url)
            .query(&[("api-version", &self.api_version)])
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = response.text();
        info!("agent {} answered with {} bytes", self.agent_name, text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, body_string_contains, header, method, path, query_param},
    };

    fn client(server: &MockServer) -> AgentClient {
        AgentClient::with_endpoint(
            &format!("{}/api/projects/demo/", server.uri()),
            "gatekeeper-agent",
            "2025-05-15-preview",
            Some("azure-token"),
        )
        .unwrap()
    }

    #[test]
    fn prompts_wrap_the_context() {
        let prompt = build_prompt("run 42 failed", "why?");
        let start = prompt.find(CONTEXT_START).unwrap();
        let end = prompt.find(CONTEXT_END).unwrap();
        assert!(start < prompt.find("run 42 failed").unwrap());
        assert!(prompt.find("run 42 failed").unwrap() < end);
        assert!(prompt.ends_with("User Question: why?"));
    }

    #[tokio::test]
    async fn queries_reference_the_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/projects/demo/openai/responses"))
            .and(query_param("api-version", "2025-05-15-preview"))
            .and(header("authorization", "Bearer azure-token"))
            .and(body_partial_json(json!({
                "agent": { "name": "gatekeeper-agent", "type": "agent_reference" },
            })))
            .and(body_string_contains("User Question: what broke?"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "output_text": "the build" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let answer = client(&server).query("ctx", "what broke?").await.unwrap();
        assert_eq!(answer, "the build");
    }

    #[tokio::test]
    async fn output_items_are_joined_without_output_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": [
                    { "type": "reasoning", "content": [] },
                    { "type": "message", "content": [
                        { "type": "output_text", "text": "Three " },
                        { "type": "refusal", "text": "ignored" },
                        { "type": "output_text", "text": "services." },
                    ] },
                ],
            })))
            .mount(&server)
            .await;

        let answer = client(&server).query("ctx", "impact?").await.unwrap();
        assert_eq!(answer, "Three services.");
    }

    #[tokio::test]
    async fn failures_are_unclassified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).query("ctx", "q").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
