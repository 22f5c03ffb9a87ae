//! Anthropic Messages API backed [`PlanningOracle`].
//!
//! Each oracle question is one request: a system prompt fixing the required
//! JSON shape, a user turn carrying the actual request/context, and a
//! `serde_json` parse of the first text block in the reply. Mirrors the
//! request/response struct shape `sandbox::remote::RemoteSandboxProvider`
//! already uses for its own reqwest calls, and the message envelope
//! `adapters/substrates/anthropic_api.rs` in the wider agent-swarm pack
//! builds for the same API.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use crate::mission::types::{Classification, ClarifyingQuestion, ProjectContext};

use super::{MissionPlan, PlanningError, PlanningOracle};

#[derive(Debug, Clone)]
pub struct AnthropicOracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl AnthropicOracleConfig {
    /// Reads the key from `ANTHROPIC_API_KEY` when `api_key` is empty, the
    /// same fallback `AnthropicApiConfig::get_api_key` uses upstream.
    pub fn with_env_fallback(mut self) -> Self {
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                self.api_key = key;
            }
        }
        self
    }
}

impl Default for AnthropicOracleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-opus-4-6".to_string(),
            api_version: "2023-06-01".to_string(),
            max_tokens: 4096,
            timeout_seconds: 120,
        }
    }
}

pub struct AnthropicPlanningOracle {
    client: Client,
    config: AnthropicOracleConfig,
}

impl AnthropicPlanningOracle {
    pub fn new(config: AnthropicOracleConfig) -> Self {
        Self { client: Client::new(), config }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, PlanningError> {
        if self.config.api_key.is_empty() {
            return Err(PlanningError::OracleUnavailable("no Anthropic API key configured".to_string()));
        }

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages: vec![InputMessage { role: "user", content: user }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .json(&request)
            .send()
            .await
            .map_err(|e| PlanningError::OracleUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlanningError::OracleUnavailable(format!("anthropic returned {status}: {body}")));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| PlanningError::Unparseable(e.to_string()))?;

        body.content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
            })
            .ok_or_else(|| PlanningError::Unparseable("no text content block in response".to_string()))
    }

    /// The model is asked for strict JSON but agents wrap it in prose or
    /// fenced code blocks often enough that extracting the outermost
    /// `{...}`/`[...]` span is worth doing before handing it to serde_json.
    fn extract_json(text: &str) -> &str {
        let start = text.find(['{', '[']);
        let end = text.rfind(['}', ']']);
        match (start, end) {
            (Some(s), Some(e)) if e >= s => &text[s..=e],
            _ => text.trim(),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<InputMessage<'a>>,
}

#[derive(Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
}

#[async_trait]
impl PlanningOracle for AnthropicPlanningOracle {
    async fn classify(&self, request: &str) -> Result<Classification, PlanningError> {
        let system = "Classify the user's request. Reply with only a JSON object \
            {\"category\": string, \"summary\": string}. category is a short \
            label such as \"feature\", \"bugfix\", \"refactor\", or \"infra\".";
        let raw = self.complete(system, request).await?;
        serde_json::from_str(Self::extract_json(&raw)).map_err(|e| PlanningError::Unparseable(e.to_string()))
    }

    async fn clarifying_questions(
        &self,
        request: &str,
        classification: &Classification,
    ) -> Result<Vec<ClarifyingQuestion>, PlanningError> {
        let system = "Given a request and its classification, list any questions that must \
            be answered before planning work against it. Reply with only a JSON array of \
            {\"question_id\": string, \"question\": string}. An empty array means nothing \
            needs clarifying.";
        let user = format!("request: {request}\ncategory: {}\nsummary: {}", classification.category, classification.summary);
        let raw = self.complete(system, &user).await?;
        serde_json::from_str(Self::extract_json(&raw)).map_err(|e| PlanningError::Unparseable(e.to_string()))
    }

    async fn product_spec(
        &self,
        request: &str,
        classification: &Classification,
        clarifying_answers: Option<&str>,
    ) -> Result<String, PlanningError> {
        let system = "Write a short product specification for the request below, covering \
            what should be built and why. Reply with plain text, no JSON, no headers.";
        let mut user = format!("request: {request}\ncategory: {}\nsummary: {}", classification.category, classification.summary);
        if let Some(answers) = clarifying_answers {
            user.push_str(&format!("\nclarifying answers: {answers}"));
        }
        self.complete(system, &user).await
    }

    async fn plan(&self, product_spec: &str, project: &ProjectContext) -> Result<MissionPlan, PlanningError> {
        let system = "Break the product specification into an ordered list of agent tasks. \
            Reply with only a JSON object {\"tasks\": [...], \"execution_strategy\": \"sequential\"|\"parallel\"}. \
            Each task is {\"id\": string, \"agent\": \"researcher\"|\"coder\"|\"refactorer\"|\"tester\"|\"reviewer\"|\"deployer\", \
            \"description\": string, \"success_criteria\": string, \"dependencies\": [string], \
            \"target_files\": [string], \"max_iterations\": number, \"on_failure\": \"retry\"|\"replan\"|\"skip\"|\"abort\"}. \
            Task ids must be unique and dependencies must reference earlier task ids.";
        let user = format!(
            "product spec:\n{product_spec}\n\nproject language: {}\nproject framework: {}\nfile tree:\n{}",
            project.language.as_deref().unwrap_or("unknown"),
            project.framework.as_deref().unwrap_or("unknown"),
            project.file_tree.join("\n"),
        );
        let raw = self.complete(system, &user).await?;
        let plan: MissionPlan = serde_json::from_str(Self::extract_json(&raw)).map_err(|e| PlanningError::Unparseable(e.to_string()))?;

        if plan.tasks.is_empty() {
            return Err(PlanningError::Unparseable("plan contains no tasks".to_string()));
        }
        Ok(plan)
    }
}
