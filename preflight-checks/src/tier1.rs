//! Landing-zone (project readiness) checks.

use preflight_azure::{ApplianceHealth, CloudError};
use preflight_core::{CheckId, CheckOutcome, Severity};

use crate::context::ProjectCheckContext;
use crate::outcome::from_cloud_error;
use crate::roles::holds_any_role;

/// Usage family covering regional vCPUs across all VM series.
const VCPU_FAMILY: &str = "cores";

/// Subscription accessibility and project-level RBAC.
///
/// An unreachable subscription is the canonical fail-fast trigger: nothing
/// else in the scope can be judged without it, so the verdict is
/// `critical`. A reachable subscription where the principal holds none of
/// the required roles is equally terminal for the landing zone.
pub(crate) async fn migrate_project_rbac(ctx: &ProjectCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::MigrateProjectRbac;
    let sub = &ctx.decl.subscription_id;

    match ctx.cloud.get_subscription(sub).await {
        Ok(_) => {}
        Err(err @ (CloudError::NotFound { .. } | CloudError::Forbidden { .. })) => {
            let outcome = CheckOutcome::critical(id, format!("subscription {sub} not accessible"))
                .with_detail(err.to_string());
            return match err.request_id() {
                Some(request_id) => outcome.with_cause(request_id),
                None => outcome,
            };
        }
        Err(err) => return from_cloud_error(id, &err, Severity::Critical),
    }

    let scope = format!("/subscriptions/{sub}");
    let assigned = match ctx.cloud.list_role_assignments(&scope, ctx.principal_id).await {
        Ok(assigned) => assigned,
        Err(err) => return from_cloud_error(id, &err, Severity::Critical),
    };

    let required = &ctx.config.tier1().project_rbac.required_roles;
    if holds_any_role(&assigned, required) {
        CheckOutcome::ok(id, format!("principal holds a required role on {sub}"))
    } else {
        CheckOutcome::critical(
            id,
            format!(
                "principal {} holds none of the required roles on subscription {sub}",
                ctx.principal_id
            ),
        )
        .with_detail(format!("required any of: {}", required.join(", ")))
    }
}

/// Declared project exists, its appliance is registered, matches its
/// declared kind, and reported a heartbeat recently enough.
pub(crate) async fn appliance_health(ctx: &ProjectCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ApplianceHealth;
    let decl = ctx.decl;

    let projects = match ctx
        .cloud
        .list_migrate_projects(&decl.subscription_id, &decl.resource_group)
        .await
    {
        Ok(projects) => projects,
        Err(err) => return from_cloud_error(id, &err, Severity::Critical),
    };
    if !projects.iter().any(|p| p.name.eq_ignore_ascii_case(&decl.project_name)) {
        return CheckOutcome::failure(
            id,
            format!(
                "migrate project {} does not exist in {}",
                decl.project_name, decl.resource_group
            ),
        );
    }

    let appliances = match ctx
        .cloud
        .list_appliances(&decl.subscription_id, &decl.resource_group, &decl.project_name)
        .await
    {
        Ok(appliances) => appliances,
        Err(err) => return from_cloud_error(id, &err, Severity::Critical),
    };

    let Some(appliance) = appliances
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(&decl.appliance_name))
    else {
        return CheckOutcome::failure(
            id,
            format!(
                "appliance {} is not registered with project {}",
                decl.appliance_name, decl.project_name
            ),
        );
    };

    if let Some(kind) = appliance.kind {
        if kind != decl.appliance_kind {
            return CheckOutcome::failure(
                id,
                format!(
                    "appliance {} is a {kind} appliance, declared as {}",
                    appliance.name, decl.appliance_kind
                ),
            );
        }
    }

    let max_age_hours = ctx.config.tier1().appliance_health.max_heartbeat_age_hours;
    match appliance.last_heartbeat {
        None => CheckOutcome::warning(
            id,
            format!("appliance {} has never reported a heartbeat", appliance.name),
        ),
        Some(heartbeat) => {
            let age = ctx.now.signed_duration_since(heartbeat);
            // The boundary is inclusive: exactly max_age is already stale.
            if age.num_hours() >= max_age_hours {
                CheckOutcome::warning(
                    id,
                    format!(
                        "appliance {} last reported {} hours ago (threshold {max_age_hours})",
                        appliance.name,
                        age.num_hours()
                    ),
                )
            } else if appliance.health == ApplianceHealth::Critical
                || appliance.health == ApplianceHealth::Degraded
            {
                CheckOutcome::warning(
                    id,
                    format!("appliance {} reports degraded health", appliance.name),
                )
            } else {
                CheckOutcome::ok(id, format!("appliance {} is healthy", appliance.name))
            }
        }
    }
}

/// The replication cache storage account exists (or is created when
/// auto-create is enabled) and lives in the project region.
pub(crate) async fn cache_storage(ctx: &ProjectCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::CacheStorage;
    let decl = ctx.decl;
    let account_name = &decl.cache_storage_account;

    let lookup = ctx
        .cloud
        .get_storage_account(
            &decl.subscription_id,
            &decl.cache_storage_resource_group,
            account_name,
        )
        .await;

    let account = match lookup {
        Ok(account) => account,
        Err(err) if err.is_not_found() => {
            if !ctx.config.tier1().cache_storage.auto_create {
                return CheckOutcome::failure(
                    id,
                    format!("cache storage account {account_name} does not exist"),
                );
            }
            match ctx
                .cloud
                .create_storage_account(
                    &decl.subscription_id,
                    &decl.cache_storage_resource_group,
                    account_name,
                    &decl.region,
                )
                .await
            {
                Ok(account) => {
                    return CheckOutcome::ok(
                        id,
                        format!("created cache storage account {}", account.name),
                    );
                }
                Err(err) => {
                    return from_cloud_error(id, &err, Severity::Failure);
                }
            }
        }
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };

    if !region_eq(&account.location, &decl.region) {
        CheckOutcome::warning(
            id,
            format!(
                "cache storage account {account_name} is in {}, project region is {}",
                account.location, decl.region
            ),
        )
    } else {
        CheckOutcome::ok(id, format!("cache storage account {account_name} is ready"))
    }
}

/// Regional vCPU quota leaves room for every machine declared into this
/// project's region.
pub(crate) async fn vcpu_quota(ctx: &ProjectCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::VcpuQuota;
    let decl = ctx.decl;

    let usage = match ctx
        .cloud
        .get_vcpu_usage(&decl.subscription_id, &decl.region, VCPU_FAMILY)
        .await
    {
        Ok(usage) => usage,
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };
    if usage.limit <= 0 {
        return CheckOutcome::failure(
            id,
            format!("subscription has no vCPU quota in {}", decl.region),
        );
    }

    let skus = match ctx
        .cloud
        .list_vm_skus(&decl.subscription_id, &decl.region)
        .await
    {
        Ok(skus) => skus,
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };

    let mut declared: i64 = 0;
    let mut unknown_skus: Vec<&str> = Vec::new();
    for machine in ctx.machines {
        if !region_eq(&machine.target_region, &decl.region) {
            continue;
        }
        let vcpus = skus
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(&machine.target_sku))
            .and_then(|s| s.vcpus());
        match vcpus {
            Some(v) => declared += i64::from(v),
            None => unknown_skus.push(&machine.target_sku),
        }
    }
    unknown_skus.sort_unstable();
    unknown_skus.dedup();

    let projected = usage.current + declared;
    let projected_pct = (projected as f64 / usage.limit as f64) * 100.0;
    let mut detail = format!(
        "current {}, declared {declared}, limit {} ({projected_pct:.0}% projected)",
        usage.current, usage.limit
    );
    if !unknown_skus.is_empty() {
        detail.push_str(&format!(
            "; vCPUs unknown for {} (counted as zero)",
            unknown_skus.join(", ")
        ));
    }

    let warn_at = f64::from(ctx.config.tier1().vcpu_quota.warn_threshold_percent);
    if projected > usage.limit || projected_pct >= 100.0 {
        CheckOutcome::failure(
            id,
            format!(
                "insufficient vCPU quota in {}: {declared} declared, {} available",
                decl.region,
                usage.available()
            ),
        )
        .with_detail(detail)
    } else if projected_pct >= warn_at {
        CheckOutcome::warning(
            id,
            format!(
                "vCPU quota in {} would be {projected_pct:.0}% used after migration",
                decl.region
            ),
        )
        .with_detail(detail)
    } else {
        CheckOutcome::ok(id, format!("vCPU quota in {} has headroom", decl.region))
            .with_detail(detail)
    }
}

/// Region comparison tolerant of display spellings (`East US` vs `eastus`).
pub(crate) fn region_eq(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use preflight_azure::{
        Appliance, CloudError, FakeCloud, SkuCapability, StorageAccount, VcpuUsage, VmSku,
    };
    use preflight_config::{ConfigDocument, ResolvedConfig};
    use preflight_core::{ApplianceKind, DiskType, MachineDecl, ProjectDecl};

    const CONTRIBUTOR: &str =
        "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/b24988ac-6180-42a0-ab88-20f7382dd24c";

    fn project() -> ProjectDecl {
        ProjectDecl {
            subscription_id: "sub-1".into(),
            resource_group: "rg-a".into(),
            project_name: "wave1".into(),
            region: "eastus".into(),
            appliance_name: "appl-1".into(),
            appliance_kind: ApplianceKind::Vmware,
            cache_storage_account: "cache1".into(),
            cache_storage_resource_group: "rg-a".into(),
            recovery_vault_name: None,
        }
    }

    fn machine(sku: &str) -> MachineDecl {
        MachineDecl {
            source_name: None,
            target_name: "web01".into(),
            target_region: "eastus".into(),
            target_subscription: "sub-1".into(),
            target_resource_group: "rg-b".into(),
            target_vnet: "vnet-1".into(),
            target_subnet: "default".into(),
            target_sku: sku.into(),
            target_disk_type: DiskType::PremiumLrs,
            project_key: None,
        }
    }

    fn sku(name: &str, vcpus: u32) -> VmSku {
        VmSku {
            name: name.into(),
            resource_type: Some("virtualMachines".into()),
            capabilities: vec![SkuCapability { name: "vCPUs".into(), value: vcpus.to_string() }],
            restrictions: vec![],
        }
    }

    fn ctx<'a>(
        decl: &'a ProjectDecl,
        machines: &'a [MachineDecl],
        cloud: &'a FakeCloud,
        config: &'a ResolvedConfig,
    ) -> ProjectCheckContext<'a> {
        ProjectCheckContext { decl, machines, principal_id: "principal-1", cloud, config, now: Utc::now() }
    }

    fn defaults() -> ResolvedConfig {
        ResolvedConfig::defaults()
    }

    #[tokio::test]
    async fn rbac_passes_with_contributor() {
        let decl = project();
        let cloud = FakeCloud::default()
            .with_subscription("sub-1", "Production")
            .with_roles("/subscriptions/sub-1", "principal-1", &[CONTRIBUTOR]);
        let config = defaults();
        let outcome = migrate_project_rbac(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
    }

    #[tokio::test]
    async fn rbac_missing_subscription_is_critical() {
        let decl = project();
        let cloud = FakeCloud::default();
        let config = defaults();
        let outcome = migrate_project_rbac(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Critical);
        assert!(outcome.summary.contains("not accessible"), "{}", outcome.summary);
        // No role lookup once the subscription is unreachable.
        assert_eq!(cloud.calls_of("list_role_assignments"), 0);
    }

    #[tokio::test]
    async fn rbac_without_required_role_is_critical() {
        let decl = project();
        let cloud = FakeCloud::default()
            .with_subscription("sub-1", "Production")
            .with_roles("/subscriptions/sub-1", "principal-1", &[]);
        let config = defaults();
        let outcome = migrate_project_rbac(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Critical);
        assert!(outcome.detail.as_deref().unwrap().contains("Contributor"));
    }

    #[tokio::test]
    async fn rbac_preserves_request_id_on_forbidden() {
        let decl = project();
        let mut cloud = FakeCloud::default();
        cloud.subscriptions.insert(
            "sub-1".into(),
            Err(CloudError::Forbidden {
                scope: "subscription sub-1".into(),
                request_id: Some("req-42".into()),
            }),
        );
        let config = defaults();
        let outcome = migrate_project_rbac(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Critical);
        assert_eq!(outcome.cause_trace.as_deref(), Some("req-42"));
    }

    fn healthy_appliance(heartbeat_hours_ago: i64) -> Appliance {
        Appliance {
            name: "appl-1".into(),
            kind: Some(ApplianceKind::Vmware),
            last_heartbeat: Some(Utc::now() - Duration::hours(heartbeat_hours_ago)),
            health: ApplianceHealth::Healthy,
        }
    }

    fn appliance_cloud(appliances: Vec<Appliance>) -> FakeCloud {
        FakeCloud::default()
            .with_migrate_project("sub-1", "rg-a", "wave1")
            .with_appliances("sub-1", "rg-a", "wave1", appliances)
    }

    #[tokio::test]
    async fn appliance_healthy() {
        let decl = project();
        let cloud = appliance_cloud(vec![healthy_appliance(1)]);
        let config = defaults();
        let outcome = appliance_health(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
    }

    #[tokio::test]
    async fn missing_migrate_project_is_failure() {
        let decl = project();
        let cloud = FakeCloud::default().with_appliances(
            "sub-1",
            "rg-a",
            "wave1",
            vec![healthy_appliance(1)],
        );
        let config = defaults();
        let outcome = appliance_health(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Failure);
        assert!(outcome.summary.contains("does not exist"), "{}", outcome.summary);
        assert_eq!(cloud.calls_of("list_appliances"), 0);
    }

    #[tokio::test]
    async fn appliance_absent_is_failure() {
        let decl = project();
        let cloud = appliance_cloud(vec![]);
        let config = defaults();
        let outcome = appliance_health(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Failure);
    }

    #[tokio::test]
    async fn appliance_stale_heartbeat_is_warning_inclusive_boundary() {
        let decl = project();
        let config = defaults();

        let cloud = appliance_cloud(vec![healthy_appliance(24)]);
        let outcome = appliance_health(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Warning);

        let cloud = appliance_cloud(vec![healthy_appliance(23)]);
        let outcome = appliance_health(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
    }

    #[tokio::test]
    async fn appliance_kind_mismatch_is_failure() {
        let decl = project();
        let mut appliance = healthy_appliance(1);
        appliance.kind = Some(ApplianceKind::Hyperv);
        let cloud = appliance_cloud(vec![appliance]);
        let config = defaults();
        let outcome = appliance_health(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Failure);
        assert!(outcome.summary.contains("hyperv"), "{}", outcome.summary);
    }

    #[tokio::test]
    async fn storage_present_in_region_is_ok() {
        let decl = project();
        let cloud = FakeCloud::default().with_storage_account(
            "sub-1",
            "rg-a",
            StorageAccount { name: "cache1".into(), location: "eastus".into(), kind: None },
        );
        let config = defaults();
        let outcome = cache_storage(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
    }

    #[tokio::test]
    async fn storage_region_mismatch_is_warning() {
        let decl = project();
        let cloud = FakeCloud::default().with_storage_account(
            "sub-1",
            "rg-a",
            StorageAccount { name: "cache1".into(), location: "westus2".into(), kind: None },
        );
        let config = defaults();
        let outcome = cache_storage(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn storage_missing_without_auto_create_is_failure() {
        let decl = project();
        let cloud = FakeCloud::default();
        let config = defaults();
        let outcome = cache_storage(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Failure);
        assert_eq!(cloud.calls_of("create_storage_account"), 0);
    }

    fn auto_create_config() -> ResolvedConfig {
        ConfigDocument::default()
            .resolve(None, &[("storage.cache.auto_create".to_string(), true.into())])
            .unwrap()
    }

    #[tokio::test]
    async fn storage_missing_with_auto_create_creates_once() {
        let decl = project();
        let cloud = FakeCloud::default();
        let config = auto_create_config();

        let outcome = cache_storage(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
        assert!(outcome.summary.contains("created"), "{}", outcome.summary);
        assert_eq!(cloud.calls_of("create_storage_account"), 1);

        // Second evaluation sees the account and does not create again.
        let outcome = cache_storage(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
        assert_eq!(cloud.calls_of("create_storage_account"), 1);
    }

    #[tokio::test]
    async fn storage_create_failure_is_failure() {
        let decl = project();
        let mut cloud = FakeCloud::default();
        cloud.create_storage_error = Some(CloudError::Forbidden {
            scope: "storage account cache1".into(),
            request_id: None,
        });
        let config = auto_create_config();
        let outcome = cache_storage(&ctx(&decl, &[], &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Failure);
    }

    #[tokio::test]
    async fn quota_warn_boundary() {
        // current 100 + declared 80 of limit 200 = 90% >= 80% threshold.
        let decl = project();
        let machines = vec![machine("Standard_D40_v5"), machine("Standard_D40_v5")];
        let cloud = FakeCloud::default()
            .with_usage("sub-1", "eastus", "cores", VcpuUsage { current: 100, limit: 200 })
            .with_skus("sub-1", "eastus", vec![sku("Standard_D40_v5", 40)]);
        let config = defaults();
        let outcome = vcpu_quota(&ctx(&decl, &machines, &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn quota_below_threshold_is_ok() {
        let decl = project();
        let machines = vec![machine("Standard_D2_v5")];
        let cloud = FakeCloud::default()
            .with_usage("sub-1", "eastus", "cores", VcpuUsage { current: 100, limit: 200 })
            .with_skus("sub-1", "eastus", vec![sku("Standard_D2_v5", 2)]);
        let config = defaults();
        let outcome = vcpu_quota(&ctx(&decl, &machines, &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
    }

    #[tokio::test]
    async fn quota_exactly_full_is_failure() {
        let decl = project();
        let machines = vec![machine("Standard_D100")];
        let cloud = FakeCloud::default()
            .with_usage("sub-1", "eastus", "cores", VcpuUsage { current: 100, limit: 200 })
            .with_skus("sub-1", "eastus", vec![sku("Standard_D100", 100)]);
        let config = defaults();
        let outcome = vcpu_quota(&ctx(&decl, &machines, &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Failure);
    }

    #[tokio::test]
    async fn quota_ignores_machines_in_other_regions() {
        let decl = project();
        let mut far_machine = machine("Standard_D40_v5");
        far_machine.target_region = "westeurope".into();
        let machines = vec![far_machine];
        let cloud = FakeCloud::default()
            .with_usage("sub-1", "eastus", "cores", VcpuUsage { current: 0, limit: 10 })
            .with_skus("sub-1", "eastus", vec![sku("Standard_D40_v5", 40)]);
        let config = defaults();
        let outcome = vcpu_quota(&ctx(&decl, &machines, &cloud, &config)).await;
        assert_eq!(outcome.severity, Severity::Ok);
    }

    #[test]
    fn region_comparison_tolerates_display_names() {
        assert!(region_eq("East US", "eastus"));
        assert!(region_eq("eastus", "EASTUS"));
        assert!(!region_eq("eastus", "eastus2"));
    }
}
