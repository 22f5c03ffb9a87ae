//! Builds per-role instruction documents and drives the open/wait/capture/
//! detect/teardown lifecycle against a [`SandboxProvider`].
//!
//! The dispatcher never decides PASSED/FAILED on its own — it only reports
//! what actually happened (exit code, captured output, file changes) plus
//! the "lazy model" reclassification for code-producing roles. The
//! evaluator owns the quality-gate decision.

use std::time::Instant;

use crate::mission::types::{AgentRole, FileRecord, ProjectContext, ReviewFeedback, Task, TaskStatus};
use crate::sandbox::{OpenParams, SandboxError, SandboxProvider};

const MAX_DEPENDENCIES_LISTED: usize = 50;
const MAX_FILE_TREE_ENTRIES: usize = 200;
const MAX_CONTEXT_CHARS: usize = 4_000;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// What a dispatch actually observed, before the evaluator applies any
/// quality-gate policy on top of it.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub output: String,
    pub file_changes: Vec<FileRecord>,
    pub elapsed_ms: u64,
}

pub struct AgentDispatcher<'a> {
    provider: &'a dyn SandboxProvider,
    runtime_tag: String,
    branch_prefix: String,
}

impl<'a> AgentDispatcher<'a> {
    pub fn new(provider: &'a dyn SandboxProvider, runtime_tag: impl Into<String>, branch_prefix: impl Into<String>) -> Self {
        Self {
            provider,
            runtime_tag: runtime_tag.into(),
            branch_prefix: branch_prefix.into(),
        }
    }

    /// Dispatch one task: build its instruction, open/wait/capture/detect,
    /// always teardown, then apply the lazy-model guard for code-producing
    /// roles.
    pub async fn dispatch(
        &self,
        task: &Task,
        project: &ProjectContext,
        project_path: &str,
        git_remote_url: Option<&str>,
        prior_review: Option<&ReviewFeedback>,
        memory_mb: u32,
        cpu_millis: u32,
        timeout_seconds: u64,
    ) -> Result<DispatchOutcome, DispatchError> {
        let instruction_text = build_instruction(task, project, prior_review, &self.branch_prefix);

        let open_params = OpenParams {
            agent: task.agent,
            task_id: task.id.clone(),
            project_path: project_path.to_string(),
            instruction_text,
            env: Vec::new(),
            memory_mb,
            cpu_millis,
            git_remote_url: git_remote_url.map(|s| s.to_string()),
            runtime_tag: self.runtime_tag.clone(),
            iteration: task.iteration,
        };

        let started = Instant::now();
        let sandbox_id = self.provider.open(open_params).await?;

        let dispatch_result = self.run_to_completion(&sandbox_id, task, project_path, timeout_seconds).await;

        // Always tear down regardless of how the run went.
        let teardown_result = self.provider.teardown(&sandbox_id).await;

        let (exit_code, output, file_changes) = dispatch_result?;
        teardown_result?;

        let elapsed_ms = started.elapsed().as_millis() as u64;

        let status = if task.agent.produces_branch() {
            if exit_code.is_success() && !file_changes.is_empty() {
                TaskStatus::Verifying
            } else {
                TaskStatus::Failed
            }
        } else if exit_code.is_success() {
            TaskStatus::Passed
        } else {
            TaskStatus::Failed
        };

        Ok(DispatchOutcome {
            task_id: task.id.clone(),
            status,
            output,
            file_changes,
            elapsed_ms,
        })
    }

    async fn run_to_completion(
        &self,
        sandbox_id: &str,
        task: &Task,
        project_path: &str,
        timeout_seconds: u64,
    ) -> Result<(crate::sandbox::ExitCode, String, Vec<FileRecord>), DispatchError> {
        let exit_code = self.provider.wait_for_completion(sandbox_id, timeout_seconds).await?;
        let output = self.provider.capture_output(sandbox_id).await?;
        let file_changes = if task.agent.produces_branch() {
            self.provider.detect_changes(&task.id, project_path).await?
        } else {
            Vec::new()
        };
        Ok((exit_code, output, file_changes))
    }
}

fn truncate_context(context: &str) -> String {
    if context.chars().count() <= MAX_CONTEXT_CHARS {
        return context.to_string();
    }
    let truncated: String = context.chars().take(MAX_CONTEXT_CHARS).collect();
    format!("{truncated}\n... [truncated]")
}

/// Role-specific constraints appended to every instruction document.
fn role_constraints(agent: AgentRole, branch_prefix: &str, task_id: &str) -> String {
    match agent {
        AgentRole::Coder => format!(
            "Commit your changes on branch `{branch_prefix}/{task_id}`. Make the smallest change \
             that satisfies the success criteria. A run with no staged changes is treated as a failure."
        ),
        AgentRole::Refactorer => format!(
            "Work on branch `{branch_prefix}/{task_id}`. Preserve existing behavior; this is a \
             refactor, not a feature change. A run with no staged changes is treated as a failure."
        ),
        AgentRole::Tester => {
            "Check out the parent task's branch read-only. Run the test suite and report results as \
             `Tests run: N`, `Failures: N`, `Errors: N` plus a short summary. Do not push."
                .to_string()
        }
        AgentRole::Reviewer => {
            "Check out the parent task's branch read-only. Review the diff against the success \
             criteria and report `Score: N/10`, `Approved: yes|no`, and bulleted `Issues:`/`Suggestions:` \
             sections. Do not push."
                .to_string()
        }
        AgentRole::Researcher => {
            "Do not create or modify files. Investigate and report findings as plain text.".to_string()
        }
        AgentRole::Deployer => {
            "Deploy the current mainline. Report success or failure using the deployment platform's \
             own status markers; on success include the route/URL."
                .to_string()
        }
    }
}

/// Builds the deterministic per-role instruction document (§4.4.1).
pub fn build_instruction(
    task: &Task,
    project: &ProjectContext,
    prior_review: Option<&ReviewFeedback>,
    branch_prefix: &str,
) -> String {
    let mut doc = String::new();

    doc.push_str(&format!("# Objective\n{}\n\n", task.description));

    let context = truncate_context(&task.input_context);
    if !context.is_empty() {
        doc.push_str(&format!("# Additional context\n{context}\n\n"));
    }

    doc.push_str("# Project\n");
    doc.push_str(&format!("Language: {}\n", project.language.as_deref().unwrap_or("unknown")));
    doc.push_str(&format!("Framework: {}\n\n", project.framework.as_deref().unwrap_or("unknown")));

    if !task.dependencies.is_empty() {
        doc.push_str("# Dependencies\n");
        for dep in task.dependencies.iter().take(MAX_DEPENDENCIES_LISTED) {
            doc.push_str(&format!("- {dep}\n"));
        }
        if task.dependencies.len() > MAX_DEPENDENCIES_LISTED {
            doc.push_str(&format!("- ... and {} more\n", task.dependencies.len() - MAX_DEPENDENCIES_LISTED));
        }
        doc.push('\n');
    }

    if !project.file_tree.is_empty() {
        doc.push_str("# File tree\n");
        for entry in project.file_tree.iter().take(MAX_FILE_TREE_ENTRIES) {
            doc.push_str(&format!("{entry}\n"));
        }
        if project.file_tree.len() > MAX_FILE_TREE_ENTRIES {
            doc.push_str(&format!("... and {} more entries\n", project.file_tree.len() - MAX_FILE_TREE_ENTRIES));
        }
        doc.push('\n');
    }

    doc.push_str(&format!("# Success criteria\n{}\n\n", task.success_criteria));

    doc.push_str("# Constraints\n");
    doc.push_str(&role_constraints(task.agent, branch_prefix, &task.id));
    doc.push('\n');

    if task.iteration > 0 {
        if let Some(review) = prior_review {
            doc.push('\n');
            doc.push_str(&format!("# Prior review feedback (attempt {})\n", task.iteration));
            doc.push_str(&format!("Score: {}/10\n", review.score));
            if !review.issues.is_empty() {
                doc.push_str("Issues:\n");
                for issue in &review.issues {
                    doc.push_str(&format!("- {issue}\n"));
                }
            }
            if !review.suggestions.is_empty() {
                doc.push_str("Suggestions:\n");
                for suggestion in &review.suggestions {
                    doc.push_str(&format!("- {suggestion}\n"));
                }
            }
        }
    }

    doc
}
