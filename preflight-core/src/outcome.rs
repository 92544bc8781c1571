use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a single validation check. The set is closed: orchestrators
/// iterate [`TIER1_CHECKS`] and [`TIER2_CHECKS`] in canonical order and the
/// configuration layer refuses dotted paths that name anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckId {
    /// Caller holds a required role on the migrate project's subscription.
    #[serde(rename = "access.rbac.migrate_project")]
    MigrateProjectRbac,
    /// Declared appliance exists, matches its declared kind, and has a
    /// recent heartbeat.
    #[serde(rename = "appliance.health")]
    ApplianceHealth,
    /// Replication cache storage account is present (or auto-created).
    #[serde(rename = "storage.cache")]
    CacheStorage,
    /// Regional vCPU quota leaves room for the declared machines.
    #[serde(rename = "quota.vcpu")]
    VcpuQuota,
    /// Target region is a real region of the target subscription.
    #[serde(rename = "server.region")]
    ServerRegion,
    /// Target resource group exists.
    #[serde(rename = "server.resource_group")]
    ServerResourceGroup,
    /// Target vnet/subnet exist, are undelegated, and have free addresses.
    #[serde(rename = "server.vnet_subnet")]
    ServerVnetSubnet,
    /// Target VM size is offered and unrestricted in the target region.
    #[serde(rename = "server.sku")]
    ServerSku,
    /// Declared disk kind is supported by the target VM size.
    #[serde(rename = "server.disk_type")]
    ServerDiskType,
    /// Machine was discovered by the project's appliance.
    #[serde(rename = "server.discovery")]
    ServerDiscovery,
    /// Caller holds a required role on the target resource group.
    #[serde(rename = "server.rbac.rg")]
    ServerResourceGroupRbac,
    /// Synthetic outcome for a declaration that failed input validation.
    #[serde(rename = "input.declaration")]
    InputDeclaration,
    /// Synthetic outcome recorded for checks skipped by fail-fast.
    #[serde(rename = "__skipped__")]
    Skipped,
}

/// Tier-1 (project readiness) checks in canonical execution order.
/// Access comes first so a `critical` verdict can short-circuit the scope.
pub const TIER1_CHECKS: [CheckId; 4] = [
    CheckId::MigrateProjectRbac,
    CheckId::ApplianceHealth,
    CheckId::CacheStorage,
    CheckId::VcpuQuota,
];

/// Tier-2 (machine readiness) checks in canonical execution order.
pub const TIER2_CHECKS: [CheckId; 7] = [
    CheckId::ServerRegion,
    CheckId::ServerResourceGroup,
    CheckId::ServerVnetSubnet,
    CheckId::ServerSku,
    CheckId::ServerDiskType,
    CheckId::ServerDiscovery,
    CheckId::ServerResourceGroupRbac,
];

impl CheckId {
    /// Dotted name as it appears in configuration and serialized runs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckId::MigrateProjectRbac => "access.rbac.migrate_project",
            CheckId::ApplianceHealth => "appliance.health",
            CheckId::CacheStorage => "storage.cache",
            CheckId::VcpuQuota => "quota.vcpu",
            CheckId::ServerRegion => "server.region",
            CheckId::ServerResourceGroup => "server.resource_group",
            CheckId::ServerVnetSubnet => "server.vnet_subnet",
            CheckId::ServerSku => "server.sku",
            CheckId::ServerDiskType => "server.disk_type",
            CheckId::ServerDiscovery => "server.discovery",
            CheckId::ServerResourceGroupRbac => "server.rbac.rg",
            CheckId::InputDeclaration => "input.declaration",
            CheckId::Skipped => "__skipped__",
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TIER1_CHECKS
            .iter()
            .chain(TIER2_CHECKS.iter())
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown check id: {s}"))
    }
}

/// Classification of one check's verdict, ordered by how bad it is.
///
/// `Critical` additionally triggers fail-fast within the scope that
/// produced it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Ok,
    Warning,
    Failure,
    Critical,
}

impl Severity {
    /// Maximum severity across a set of outcomes, `Ok` when empty.
    pub fn rolled_up<'a>(outcomes: impl IntoIterator<Item = &'a CheckOutcome>) -> Severity {
        outcomes
            .into_iter()
            .map(|o| o.severity)
            .max()
            .unwrap_or(Severity::Ok)
    }

    /// Whether this severity blocks dependent (Tier-2) validation.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Severity::Failure | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "ok"),
            Severity::Warning => write!(f, "warning"),
            Severity::Failure => write!(f, "failure"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// The result of one check against one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check_id: CheckId,
    pub severity: Severity,
    /// One-line human-readable verdict.
    pub summary: String,
    /// Optional longer explanation (candidate lists, measured values).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Provider request id (or other correlation handle) for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause_trace: Option<String>,
}

impl CheckOutcome {
    pub fn new(check_id: CheckId, severity: Severity, summary: impl Into<String>) -> Self {
        Self { check_id, severity, summary: summary.into(), detail: None, cause_trace: None }
    }

    pub fn ok(check_id: CheckId, summary: impl Into<String>) -> Self {
        Self::new(check_id, Severity::Ok, summary)
    }

    pub fn warning(check_id: CheckId, summary: impl Into<String>) -> Self {
        Self::new(check_id, Severity::Warning, summary)
    }

    pub fn failure(check_id: CheckId, summary: impl Into<String>) -> Self {
        Self::new(check_id, Severity::Failure, summary)
    }

    pub fn critical(check_id: CheckId, summary: impl Into<String>) -> Self {
        Self::new(check_id, Severity::Critical, summary)
    }

    /// Synthetic outcome recorded for a check skipped by fail-fast.
    pub fn skipped() -> Self {
        Self::ok(CheckId::Skipped, "Remaining checks skipped due to critical failure")
    }

    /// Synthetic outcome recorded for a scope that never started because
    /// the run was cancelled.
    pub fn cancelled(check_id: CheckId) -> Self {
        Self::warning(check_id, "run cancelled")
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_cause(mut self, cause_trace: impl Into<String>) -> Self {
        self.cause_trace = Some(cause_trace.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn severity_orders_by_badness() {
        assert!(Severity::Ok < Severity::Warning);
        assert!(Severity::Warning < Severity::Failure);
        assert!(Severity::Failure < Severity::Critical);
    }

    #[test]
    fn rolled_up_of_empty_set_is_ok() {
        assert_eq!(Severity::rolled_up([]), Severity::Ok);
    }

    #[test]
    fn check_id_round_trips_through_str() {
        for id in TIER1_CHECKS.iter().chain(TIER2_CHECKS.iter()) {
            assert_eq!(id.as_str().parse::<CheckId>().unwrap(), *id);
        }
        assert!("server.unknown".parse::<CheckId>().is_err());
        // Synthetic ids are not addressable from configuration.
        assert!("__skipped__".parse::<CheckId>().is_err());
    }

    #[test]
    fn check_id_serde_uses_dotted_names() {
        let json = serde_json::to_string(&CheckId::ServerVnetSubnet).unwrap();
        assert_eq!(json, "\"server.vnet_subnet\"");
        let back: CheckId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CheckId::ServerVnetSubnet);
    }

    #[test]
    fn skipped_outcome_counts_as_ok() {
        let outcomes =
            vec![CheckOutcome::critical(CheckId::MigrateProjectRbac, "boom"), CheckOutcome::skipped()];
        assert_eq!(Severity::rolled_up(&outcomes), Severity::Critical);
        assert_eq!(outcomes[1].severity, Severity::Ok);
    }

    fn arb_severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Ok),
            Just(Severity::Warning),
            Just(Severity::Failure),
            Just(Severity::Critical),
        ]
    }

    proptest! {
        #[test]
        fn rolled_up_is_max(severities in proptest::collection::vec(arb_severity(), 0..12)) {
            let outcomes: Vec<CheckOutcome> = severities
                .iter()
                .map(|s| CheckOutcome::new(CheckId::ServerRegion, *s, "x"))
                .collect();
            let expected = severities.iter().copied().max().unwrap_or(Severity::Ok);
            prop_assert_eq!(Severity::rolled_up(&outcomes), expected);
        }

        #[test]
        fn rolled_up_is_order_insensitive(severities in proptest::collection::vec(arb_severity(), 0..12)) {
            let forward: Vec<CheckOutcome> = severities
                .iter()
                .map(|s| CheckOutcome::new(CheckId::ServerSku, *s, "x"))
                .collect();
            let mut reversed = forward.clone();
            reversed.reverse();
            prop_assert_eq!(Severity::rolled_up(&forward), Severity::rolled_up(&reversed));
        }
    }
}
