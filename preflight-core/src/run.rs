use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decl::ProjectKey;
use crate::outcome::{CheckOutcome, Severity};

/// Why a machine scope was skipped without running any checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The machine's `project_key` does not name any declared project.
    UnknownProject,
    /// The associated project's readiness rolled up to failure or worse.
    PrerequisiteFailed,
}

/// Aggregate verdict for one project scope (Tier 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReadiness {
    pub project_key: ProjectKey,
    pub outcomes: Vec<CheckOutcome>,
    pub rolled_up: Severity,
    /// True when a `critical` outcome cut the scope short.
    pub short_circuited: bool,
}

impl ProjectReadiness {
    /// Builds the aggregate, computing the rolled-up severity.
    pub fn from_outcomes(
        project_key: ProjectKey,
        outcomes: Vec<CheckOutcome>,
        short_circuited: bool,
    ) -> Self {
        let rolled_up = Severity::rolled_up(&outcomes);
        Self { project_key, outcomes, rolled_up, short_circuited }
    }

    /// Whether machines associated with this project may proceed to
    /// Tier-2 validation. Warnings do not block.
    pub fn permits_machines(&self) -> bool {
        !self.rolled_up.blocks_dependents()
    }
}

/// Aggregate verdict for one machine scope (Tier 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineReadiness {
    pub target_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<ProjectKey>,
    pub outcomes: Vec<CheckOutcome>,
    pub rolled_up: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<SkipReason>,
}

impl MachineReadiness {
    /// Builds the aggregate for a machine whose checks actually ran.
    pub fn from_outcomes(
        target_name: impl Into<String>,
        project_key: Option<ProjectKey>,
        outcomes: Vec<CheckOutcome>,
    ) -> Self {
        let rolled_up = Severity::rolled_up(&outcomes);
        Self {
            target_name: target_name.into(),
            project_key,
            outcomes,
            rolled_up,
            skipped_reason: None,
        }
    }

    /// Builds the aggregate for a machine that was skipped before any
    /// check ran. Skipped machines carry no outcomes and roll up to
    /// `failure`.
    pub fn skipped(
        target_name: impl Into<String>,
        project_key: Option<ProjectKey>,
        reason: SkipReason,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            project_key,
            outcomes: Vec::new(),
            rolled_up: Severity::Failure,
            skipped_reason: Some(reason),
        }
    }
}

/// Full report of one engine invocation.
///
/// Projects key on their [`ProjectKey`] string form; the map is ordered so
/// the serialized report is stable across runs with identical inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub projects: BTreeMap<ProjectKey, ProjectReadiness>,
    pub machines: Vec<MachineReadiness>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Hex SHA-256 of the canonicalized resolved configuration.
    pub config_fingerprint: String,
}

impl Run {
    /// Worst severity anywhere in the run.
    pub fn worst_severity(&self) -> Severity {
        self.projects
            .values()
            .map(|p| p.rolled_up)
            .chain(self.machines.iter().map(|m| m.rolled_up))
            .max()
            .unwrap_or(Severity::Ok)
    }
}
