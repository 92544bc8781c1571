//! Machine-scope (server readiness) orchestration.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use preflight_azure::CloudReads;
use preflight_checks::{run_tier2_check, MachineCheckContext};
use preflight_config::ResolvedConfig;
use preflight_core::{
    CheckId, CheckOutcome, MachineDecl, MachineReadiness, ProjectDecl, Severity, SkipReason,
    TIER2_CHECKS,
};

/// Everything one machine scope needs, owned so the scope can run on a
/// worker task.
pub(crate) struct MachineScope {
    pub decl: MachineDecl,
    /// The declared project this machine resolved to, with its Tier-1
    /// verdict. `None` when the association is missing or names an
    /// undeclared project.
    pub project: Option<(ProjectDecl, Severity)>,
    pub cloud: Arc<dyn CloudReads>,
    pub config: Arc<ResolvedConfig>,
    pub principal_id: String,
    pub cancel: CancellationToken,
    pub budget: Duration,
}

/// Applies the dependency gate, then runs the enabled Tier-2 checks in
/// canonical order with fail-fast (scoped to this machine only).
pub(crate) async fn validate_machine(scope: MachineScope) -> MachineReadiness {
    let name = scope.decl.target_name.clone();
    let key = scope.decl.project_key.clone();

    let Some((project, tier1_verdict)) = scope.project else {
        tracing::debug!(machine = %name, "no declared project resolves for this machine");
        return MachineReadiness::skipped(name, key, SkipReason::UnknownProject);
    };
    if tier1_verdict.blocks_dependents() {
        tracing::debug!(machine = %name, project = %project.key(), "landing zone failed, skipping server checks");
        return MachineReadiness::skipped(name, key, SkipReason::PrerequisiteFailed);
    }

    if let Err(err) = scope.decl.validate() {
        let outcome = CheckOutcome::critical(CheckId::InputDeclaration, "declaration is incomplete")
            .with_detail(err.to_string());
        return MachineReadiness::from_outcomes(name, key, vec![outcome]);
    }

    let enabled: Vec<_> = TIER2_CHECKS
        .iter()
        .copied()
        .filter(|id| scope.config.is_enabled(*id))
        .collect();

    if scope.cancel.is_cancelled() {
        let outcomes = enabled.iter().map(|id| CheckOutcome::cancelled(*id)).collect();
        return MachineReadiness::from_outcomes(name, key, outcomes);
    }

    let ctx = MachineCheckContext {
        decl: &scope.decl,
        project: &project,
        principal_id: &scope.principal_id,
        cloud: scope.cloud.as_ref(),
        config: &scope.config,
    };

    let deadline = Instant::now() + scope.budget;
    let mut outcomes = Vec::with_capacity(enabled.len());

    for (position, id) in enabled.iter().enumerate() {
        if scope.cancel.is_cancelled() {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            outcomes.push(CheckOutcome::failure(*id, "validation budget exhausted"));
            break;
        }
        let outcome = match tokio::time::timeout(remaining, run_tier2_check(*id, &ctx)).await {
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
        tracing::debug!(machine = %name, check = %id, severity = %outcome.severity, "tier-2 check finished");
        outcomes.push(outcome);

        if is_critical && scope.config.global().fail_fast {
            for _ in enabled.iter().skip(position + 1) {
                outcomes.push(CheckOutcome::skipped());
            }
            break;
        }
    }

    let readiness = MachineReadiness::from_outcomes(name, key, outcomes);
    tracing::info!(
        machine = %readiness.target_name,
        rolled_up = %readiness.rolled_up,
        "machine readiness evaluated"
    );
    readiness
}
