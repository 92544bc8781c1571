//! Project-scope (landing zone) orchestration.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use preflight_azure::CloudReads;
use preflight_checks::{run_tier1_check, ProjectCheckContext};
use preflight_config::ResolvedConfig;
use preflight_core::{
    CheckOutcome, MachineDecl, ProjectDecl, ProjectReadiness, Severity, TIER1_CHECKS,
};

/// Everything one project scope needs, owned so the scope can run on a
/// worker task.
pub(crate) struct ProjectScope {
    pub decl: ProjectDecl,
    /// Machines associated with this project (quota projection input).
    pub machines: Vec<MachineDecl>,
    /// Outcomes recorded before any check runs (conflicting-declaration
    /// warnings).
    pub preamble: Vec<CheckOutcome>,
    pub cloud: Arc<dyn CloudReads>,
    pub config: Arc<ResolvedConfig>,
    pub principal_id: String,
    pub now: DateTime<Utc>,
    pub cancel: CancellationToken,
    /// Wall-clock budget for the whole scope.
    pub budget: Duration,
}

/// Runs the enabled Tier-1 checks in canonical order with fail-fast.
///
/// A scope that was cancelled before starting reports one synthetic
/// `run cancelled` warning per enabled check; a cancellation arriving
/// mid-scope lets the current check finish and then stops.
pub(crate) async fn validate_project(scope: ProjectScope) -> ProjectReadiness {
    let key = scope.decl.key();
    let enabled: Vec<_> = TIER1_CHECKS
        .iter()
        .copied()
        .filter(|id| scope.config.is_enabled(*id))
        .collect();

    if scope.cancel.is_cancelled() {
        let outcomes = scope
            .preamble
            .into_iter()
            .chain(enabled.iter().map(|id| CheckOutcome::cancelled(*id)))
            .collect();
        return ProjectReadiness::from_outcomes(key, outcomes, false);
    }

    let ctx = ProjectCheckContext {
        decl: &scope.decl,
        machines: &scope.machines,
        principal_id: &scope.principal_id,
        cloud: scope.cloud.as_ref(),
        config: &scope.config,
        now: scope.now,
    };

    let deadline = Instant::now() + scope.budget;
    let mut outcomes = scope.preamble;
    let mut short_circuited = false;

    for (position, id) in enabled.iter().enumerate() {
        if scope.cancel.is_cancelled() {
            tracing::debug!(project = %key, "cancelled mid-scope, stopping after current check");
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            outcomes.push(CheckOutcome::failure(*id, "validation budget exhausted"));
            break;
        }
        let outcome = match tokio::time::timeout(remaining, run_tier1_check(*id, &ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                outcomes.push(CheckOutcome::failure(
                    *id,
                    format!("check timed out after {}s", scope.budget.as_secs()),
                ));
                break;
            }
        };
        let is_critical = outcome.severity == Severity::Critical;
        tracing::debug!(project = %key, check = %id, severity = %outcome.severity, "tier-1 check finished");
        outcomes.push(outcome);

        if is_critical && scope.config.global().fail_fast {
            for _ in enabled.iter().skip(position + 1) {
                outcomes.push(CheckOutcome::skipped());
            }
            short_circuited = true;
            break;
        }
    }

    let readiness = ProjectReadiness::from_outcomes(key, outcomes, short_circuited);
    tracing::info!(
        project = %readiness.project_key,
        rolled_up = %readiness.rolled_up,
        short_circuited = readiness.short_circuited,
        "project readiness evaluated"
    );
    readiness
}
