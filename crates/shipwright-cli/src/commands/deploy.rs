//! `shipwright deploy`: run one deployment to a terminal status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shipwright_core::{DesiredStateDescriptor, DescriptorFile, DescriptorOverrides, ShipwrightConfig};
use shipwright_platform::{EnvSecretProvider, HttpPlatform};
use shipwright_registry::{Credentials, OciRegistry, RetryingRegistry};
use shipwright_rollout::{DeploymentOutcome, Orchestrator, OrchestratorError, RolloutPolicy};
use shipwright_state::{AttemptError, AttemptStatus, StateStore};
use tokio::sync::watch;
use tracing::{info, warn};

use super::history::render_text;
use super::{
    Settings, EXIT_CANCELLED, EXIT_ERROR, EXIT_INVALID, EXIT_ROLLBACK_FAILED, EXIT_ROLLED_BACK, EXIT_TIMEOUT,
    EXIT_UNAUTHORIZED,
};

/// What the user asked for on the command line.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub descriptor: PathBuf,
    pub service: Option<String>,
    pub image: Option<String>,
    pub timeout: Option<Duration>,
    /// `None` keeps the configured setting.
    pub rollback: Option<bool>,
}

/// Returns the process exit code.
pub async fn deploy(settings: &Settings, request: DeployRequest) -> anyhow::Result<u8> {
    let descriptor = load_descriptor(&settings.config, &request)?;
    let policy = rollout_policy(&settings.config, &request)?;
    let orchestrator = connect(&settings.config, settings.open_state()?, policy)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling deployment");
            let _ = cancel_tx.send(true);
        }
    });

    let service = descriptor.service_name.clone();
    info!(
        service = %service,
        revision = descriptor.revision,
        image = %descriptor.image,
        rollback = policy.rollback_enabled,
        "deploying"
    );

    let code = match orchestrator.deploy(descriptor, cancel_rx).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            exit_code(&outcome)
        }
        Err(OrchestratorError::Validation {
            service,
            revision,
            problems,
        }) => {
            eprintln!("✗ {service} revision {revision} is invalid:");
            for problem in &problems {
                eprintln!("  - {problem}");
            }
            EXIT_INVALID
        }
        Err(e) => return Err(e).context("deployment failed"),
    };

    println!();
    print!("{}", render_text(&orchestrator.history(&service)?));
    Ok(code)
}

/// Read the descriptor file and apply `--service` / `--image`.
fn load_descriptor(config: &ShipwrightConfig, request: &DeployRequest) -> anyhow::Result<DesiredStateDescriptor> {
    let overrides = DescriptorOverrides {
        service_name: request.service.clone(),
        image: request.image.clone(),
    };
    let descriptor = DescriptorFile::from_file(&request.descriptor)?
        .into_descriptor(&overrides, &config.registry.endpoint)
        .with_context(|| format!("resolving descriptor {}", request.descriptor.display()))?;
    Ok(descriptor)
}

fn rollout_policy(config: &ShipwrightConfig, request: &DeployRequest) -> anyhow::Result<RolloutPolicy> {
    let mut policy = RolloutPolicy::from_config(config)?;
    if let Some(timeout) = request.timeout {
        policy = policy.with_convergence_timeout(timeout);
    }
    if let Some(enabled) = request.rollback {
        policy = policy.with_rollback(enabled);
    }
    Ok(policy)
}

/// Wire the orchestrator to the configured registry and platform.
fn connect(config: &ShipwrightConfig, state: StateStore, policy: RolloutPolicy) -> anyhow::Result<Orchestrator> {
    let registry = RetryingRegistry::new(
        OciRegistry::new(
            &config.registry.endpoint,
            Credentials::from_env(&config.registry.token_env),
        ),
        config.retry_policy()?,
        config.registry_timeout()?,
    );
    let platform = Arc::new(HttpPlatform::from_env(
        &config.platform.address,
        &config.platform.token_env,
        config.platform_timeout()?,
    ));

    Ok(Orchestrator::new(
        Arc::new(registry),
        platform.clone(),
        platform,
        Arc::new(EnvSecretProvider::new()),
        state,
        policy,
    ))
}

fn print_outcome(outcome: &DeploymentOutcome) {
    let attempt = &outcome.attempt;
    match outcome.status {
        AttemptStatus::Converged => println!(
            "✓ {} revision {} converged after {} polls",
            attempt.service_name, attempt.target_revision, attempt.polls
        ),
        AttemptStatus::RolledBack => {
            println!(
                "✗ {} revision {} failed: {}",
                attempt.service_name,
                attempt.target_revision,
                error_text(outcome.error())
            );
            if let Some(rollback) = &outcome.rollback {
                println!("  ↺ rolled back as revision {}", rollback.target_revision);
            }
        }
        _ => {
            println!(
                "✗ {} revision {} failed: {}",
                attempt.service_name,
                attempt.target_revision,
                error_text(outcome.error())
            );
            if let Some(rollback) = &outcome.rollback {
                println!("  ✗ {}", error_text(rollback.last_error.as_ref()));
            }
        }
    }
}

fn error_text(error: Option<&AttemptError>) -> String {
    error.map_or_else(|| "unknown error".to_string(), ToString::to_string)
}

/// Process exit code for a finished deployment.
pub fn exit_code(outcome: &DeploymentOutcome) -> u8 {
    match outcome.status {
        AttemptStatus::Converged => 0,
        AttemptStatus::RolledBack => EXIT_ROLLED_BACK,
        _ if outcome.rollback.is_some() => EXIT_ROLLBACK_FAILED,
        _ => match outcome.error() {
            Some(AttemptError::Validation { .. }) => EXIT_INVALID,
            Some(AttemptError::ConvergenceTimeout) => EXIT_TIMEOUT,
            Some(AttemptError::Cancelled) => EXIT_CANCELLED,
            Some(AttemptError::Unauthorized { .. }) => EXIT_UNAUTHORIZED,
            Some(AttemptError::RollbackFailed { .. }) => EXIT_ROLLBACK_FAILED,
            Some(AttemptError::Platform { .. }) | None => EXIT_ERROR,
        },
    }
}
