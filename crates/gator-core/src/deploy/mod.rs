//! The DEPLOYER output classifier.
//!
//! Classifies a deployment worker's captured output into one of six
//! outcomes using the literal substring/regex markers that are part of the
//! wire contract (spec §6) — these patterns must not drift, since a remote
//! worker and this orchestrator are independently maintained.

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Success { deployment_url: String },
    BuildFailure,
    StagingFailure,
    AppCrashed,
    HealthCheckTimeout,
    ServiceBindingFailure { service_name: Option<String> },
}

impl DeploymentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "SUCCESS",
            Self::BuildFailure => "BUILD_FAILURE",
            Self::StagingFailure => "STAGING_FAILURE",
            Self::AppCrashed => "APP_CRASHED",
            Self::HealthCheckTimeout => "HEALTH_CHECK_TIMEOUT",
            Self::ServiceBindingFailure { .. } => "SERVICE_BINDING_FAILURE",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

/// Classify captured DEPLOYER output per spec §6's marker table, evaluated
/// in the order SUCCESS, BUILD_FAILURE, STAGING_FAILURE, APP_CRASHED,
/// HEALTH_CHECK_TIMEOUT, SERVICE_BINDING_FAILURE.
pub fn classify(output: &str) -> DeploymentOutcome {
    let success_markers = ["App started", "instances running", "status: running", "requested state: started"];
    let has_route_line = output.contains("routes:") || output.contains("route:");

    if contains_any(output, &success_markers) && has_route_line {
        let url = extract_deployment_url(output).unwrap_or_default();
        return DeploymentOutcome::Success { deployment_url: url };
    }

    if contains_any(output, &["BUILD FAILURE", "Compilation error"]) {
        return DeploymentOutcome::BuildFailure;
    }

    if contains_any(output, &["Staging error", "Unable to detect buildpack"]) {
        return DeploymentOutcome::StagingFailure;
    }

    if contains_any(output, &["CRASHED", "App instance exited"]) {
        return DeploymentOutcome::AppCrashed;
    }

    if output.to_lowercase().contains("health check timeout") || output.to_lowercase().contains("health check failed") {
        return DeploymentOutcome::HealthCheckTimeout;
    }

    if let Some(service) = extract_service_binding_failure(output) {
        return DeploymentOutcome::ServiceBindingFailure { service_name: service };
    }

    DeploymentOutcome::AppCrashed
}

fn extract_deployment_url(output: &str) -> Option<String> {
    let routes_pattern = Regex::new(r"routes?:\s*(\S+)").unwrap();
    if let Some(caps) = routes_pattern.captures(output) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    let https_pattern = Regex::new(r"https?://\S+\.apps\.\S+").unwrap();
    https_pattern.find(output).map(|m| m.as_str().to_string())
}

fn extract_service_binding_failure(output: &str) -> Option<Option<String>> {
    let not_found = Regex::new(r"Could not find service\s+(\S+)").unwrap();
    if let Some(caps) = not_found.captures(output) {
        return Some(caps.get(1).map(|m| m.as_str().to_string()));
    }

    let binding_failed = Regex::new(r"Binding service\s+(\S+).*FAILED").unwrap();
    if let Some(caps) = binding_failed.captures(output) {
        return Some(caps.get(1).map(|m| m.as_str().to_string()));
    }

    None
}

/// Build the diagnostic note written into a failed DEPLOYER task's
/// `input_context` before retry (spec §4.6.4).
pub fn failure_diagnostic(outcome: &DeploymentOutcome) -> String {
    match outcome {
        DeploymentOutcome::Success { .. } => String::new(),
        DeploymentOutcome::BuildFailure => "BUILD_FAILURE: the build did not compile.".to_string(),
        DeploymentOutcome::StagingFailure => "STAGING_FAILURE: buildpack detection or staging failed.".to_string(),
        DeploymentOutcome::AppCrashed => "APP_CRASHED: the application instance exited after staging.".to_string(),
        DeploymentOutcome::HealthCheckTimeout => {
            "HEALTH_CHECK_TIMEOUT: the app did not pass its health check in time.".to_string()
        }
        DeploymentOutcome::ServiceBindingFailure { service_name } => {
            let name = service_name.clone().unwrap_or_else(|| "<unknown>".to_string());
            format!(
                "SERVICE_BINDING_FAILURE: service '{name}' could not be bound. \
                 Run `cf create-service` for '{name}' before retrying."
            )
        }
    }
}
