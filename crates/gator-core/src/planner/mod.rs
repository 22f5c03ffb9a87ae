//! The LLM-driven oracle seam (classify / clarify / specify / plan) and the
//! pure plan-validation and deployment-task-materialization logic built on
//! top of it.
//!
//! [`PlanningOracle`] is the port; concrete substrates (a hosted model API, a
//! CLI-driven agent, a test double) live behind it the same way
//! [`crate::sandbox::SandboxProvider`] hides local vs. remote execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mission::types::{AgentRole, Classification, ClarifyingQuestion, OnFailure, ProjectContext};

pub mod anthropic_oracle;
pub use anthropic_oracle::{AnthropicOracleConfig, AnthropicPlanningOracle};

#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("oracle returned unparseable output: {0}")]
    Unparseable(String),

    #[error("plan has a dependency cycle involving task {0}")]
    DependencyCycle(String),

    #[error("plan references unknown task id {0}")]
    DanglingReference(String),
}

/// One task as proposed by the Planner, before the engine materializes it
/// into a full [`crate::mission::types::Task`] with status/iteration fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: String,
    pub agent: AgentRole,
    pub description: String,
    pub success_criteria: String,
    pub dependencies: Vec<String>,
    pub target_files: Vec<String>,
    pub max_iterations: u32,
    pub on_failure: OnFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionPlan {
    pub tasks: Vec<TaskPlan>,
    pub execution_strategy: crate::mission::types::ExecutionStrategy,
}

/// Defaults used to synthesize a deployment manifest when no planned task
/// already creates one (§4.2).
#[derive(Debug, Clone)]
pub struct DeployerDefaults {
    pub memory_mb: u32,
    pub instances: u32,
    pub buildpack: String,
    pub health_check_path: String,
    pub timeout_seconds: u64,
    pub jre_version: Option<String>,
    pub service_bindings: Vec<String>,
}

impl Default for DeployerDefaults {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            instances: 1,
            buildpack: "cloudfoundry/cnb:cnb".to_string(),
            health_check_path: "/health".to_string(),
            timeout_seconds: 120,
            jre_version: None,
            service_bindings: Vec::new(),
        }
    }
}

pub const DEPLOY_TASK_ID: &str = "TASK-DEPLOY";
const DEPLOY_MAX_ITERATIONS: u32 = 3;

/// The LLM-backed oracle port for the three planning-phase questions the
/// engine asks: what is this (classify), what do we still need to know
/// (clarify), and what's the plan (plan). Specifying is folded into `plan`
/// when a `productSpec` is required by the caller's interaction mode.
#[async_trait]
pub trait PlanningOracle: Send + Sync {
    async fn classify(&self, request: &str) -> Result<Classification, PlanningError>;

    async fn clarifying_questions(
        &self,
        request: &str,
        classification: &Classification,
    ) -> Result<Vec<ClarifyingQuestion>, PlanningError>;

    async fn product_spec(
        &self,
        request: &str,
        classification: &Classification,
        clarifying_answers: Option<&str>,
    ) -> Result<String, PlanningError>;

    async fn plan(
        &self,
        product_spec: &str,
        project: &ProjectContext,
    ) -> Result<MissionPlan, PlanningError>;
}

/// Validate dependency references and reject cycles. Fatal at plan intake
/// (§4.2, §3 invariant 3) — a plan that fails this never reaches the
/// engine's task list.
pub fn validate_plan(plan: &MissionPlan) -> Result<(), PlanningError> {
    let ids: std::collections::HashSet<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();

    for task in &plan.tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(PlanningError::DanglingReference(dep.clone()));
            }
        }
    }

    let mut visiting = std::collections::HashSet::new();
    let mut visited = std::collections::HashSet::new();
    for task in &plan.tasks {
        detect_cycle(plan, &task.id, &mut visiting, &mut visited)?;
    }

    Ok(())
}

fn detect_cycle<'a>(
    plan: &'a MissionPlan,
    task_id: &'a str,
    visiting: &mut std::collections::HashSet<&'a str>,
    visited: &mut std::collections::HashSet<&'a str>,
) -> Result<(), PlanningError> {
    if visited.contains(task_id) {
        return Ok(());
    }
    if !visiting.insert(task_id) {
        return Err(PlanningError::DependencyCycle(task_id.to_string()));
    }

    if let Some(task) = plan.tasks.iter().find(|t| t.id == task_id) {
        for dep in &task.dependencies {
            detect_cycle(plan, dep, visiting, visited)?;
        }
    }

    visiting.remove(task_id);
    visited.insert(task_id);
    Ok(())
}

/// Appends the virtual DEPLOYER task when `createDeploymentTask=true`. It
/// depends on every branch-producing task (CODER and REFACTORER, never
/// RESEARCHER/TESTER/REVIEWER) and either reuses a manifest a planned task
/// already produces, or embeds a generated template built from `defaults`.
pub fn append_deployment_task(plan: &mut MissionPlan, manifest_path: &str, defaults: &DeployerDefaults) {
    let coder_ids: Vec<String> = plan
        .tasks
        .iter()
        .filter(|t| t.agent.produces_branch())
        .map(|t| t.id.clone())
        .collect();

    let manifest_created_by_task = plan
        .tasks
        .iter()
        .any(|t| t.target_files.iter().any(|f| f == manifest_path));

    let description = if manifest_created_by_task {
        format!("Deploy the application using the manifest produced at `{manifest_path}`.")
    } else {
        generated_manifest_description(manifest_path, defaults)
    };

    plan.tasks.push(TaskPlan {
        id: DEPLOY_TASK_ID.to_string(),
        agent: AgentRole::Deployer,
        description,
        success_criteria: "deployment succeeds and a route is reachable".to_string(),
        dependencies: coder_ids,
        target_files: Vec::new(),
        max_iterations: DEPLOY_MAX_ITERATIONS,
        on_failure: OnFailure::Retry,
    });
}

fn generated_manifest_description(manifest_path: &str, defaults: &DeployerDefaults) -> String {
    let mut doc = format!(
        "No task produces `{manifest_path}`; create it from this template before deploying:\n\
         memory: {}M\n\
         instances: {}\n\
         buildpack: {}\n\
         health-check-http-endpoint: {}\n\
         timeout: {}\n",
        defaults.memory_mb, defaults.instances, defaults.buildpack, defaults.health_check_path, defaults.timeout_seconds
    );
    if let Some(jre) = &defaults.jre_version {
        doc.push_str(&format!("JBP_CONFIG_OPEN_JDK_JRE: {{ jre: {{ version: {jre} }} }}\n"));
    }
    if !defaults.service_bindings.is_empty() {
        doc.push_str("services:\n");
        for service in &defaults.service_bindings {
            doc.push_str(&format!("  - {service}\n"));
        }
    }
    doc
}
