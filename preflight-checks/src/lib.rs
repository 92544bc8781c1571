//! Validation check library for Migrate Preflight.
//!
//! Each check is a plain async function `(context) -> CheckOutcome`,
//! independently invocable and free of shared state. The orchestrators
//! iterate the canonical orders from `preflight-core`
//! ([`preflight_core::TIER1_CHECKS`], [`preflight_core::TIER2_CHECKS`]) and
//! dispatch through [`run_tier1_check`] / [`run_tier2_check`].
//!
//! Checks never panic and never abort a run: a provider failure is mapped
//! into an outcome whose severity follows the engine's failure semantics
//! (auth failures at subscription/project scope are `critical`, everything
//! else degrades to `failure` or `warning`).

mod context;
mod disks;
mod outcome;
mod roles;
mod tier1;
mod tier2;

pub use context::{MachineCheckContext, ProjectCheckContext};

use preflight_core::{CheckId, CheckOutcome};

/// Runs one Tier-1 (project readiness) check.
pub async fn run_tier1_check(id: CheckId, ctx: &ProjectCheckContext<'_>) -> CheckOutcome {
    match id {
        CheckId::MigrateProjectRbac => tier1::migrate_project_rbac(ctx).await,
        CheckId::ApplianceHealth => tier1::appliance_health(ctx).await,
        CheckId::CacheStorage => tier1::cache_storage(ctx).await,
        CheckId::VcpuQuota => tier1::vcpu_quota(ctx).await,
        other => CheckOutcome::failure(other, "not a project-level check"),
    }
}

/// Runs one Tier-2 (machine readiness) check.
pub async fn run_tier2_check(id: CheckId, ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    match id {
        CheckId::ServerRegion => tier2::target_region(ctx).await,
        CheckId::ServerResourceGroup => tier2::target_resource_group(ctx).await,
        CheckId::ServerVnetSubnet => tier2::vnet_subnet(ctx).await,
        CheckId::ServerSku => tier2::target_sku(ctx).await,
        CheckId::ServerDiskType => tier2::disk_type(ctx).await,
        CheckId::ServerDiscovery => tier2::discovery(ctx).await,
        CheckId::ServerResourceGroupRbac => tier2::resource_group_rbac(ctx).await,
        other => CheckOutcome::failure(other, "not a machine-level check"),
    }
}
