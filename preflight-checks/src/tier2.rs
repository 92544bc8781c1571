//! Per-machine (server readiness) checks.

use preflight_azure::CloudError;
use preflight_core::{CheckId, CheckOutcome, Severity};

use crate::context::MachineCheckContext;
use crate::disks::{disk_support, DiskSupport};
use crate::outcome::from_cloud_error;
use crate::roles::holds_any_role;
use crate::tier1::region_eq;

/// Addresses Azure reserves in every subnet (network, gateway, two DNS,
/// broadcast).
const RESERVED_SUBNET_IPS: u64 = 5;

/// Declared target region is one the target subscription can deploy to.
pub(crate) async fn target_region(ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ServerRegion;
    let decl = ctx.decl;

    let locations = match ctx.cloud.list_locations(&decl.target_subscription).await {
        Ok(locations) => locations,
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };

    let known = locations.iter().any(|l| {
        region_eq(&l.name, &decl.target_region)
            || l.display_name
                .as_deref()
                .map(|d| region_eq(d, &decl.target_region))
                .unwrap_or(false)
    });
    if known {
        CheckOutcome::ok(id, format!("region {} is available", decl.target_region))
    } else {
        CheckOutcome::failure(
            id,
            format!(
                "region {} is not offered to subscription {}",
                decl.target_region, decl.target_subscription
            ),
        )
    }
}

/// Target resource group exists; a region mismatch is informational only
/// (resource-group location is metadata placement, not a deployment
/// constraint).
pub(crate) async fn target_resource_group(ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ServerResourceGroup;
    let decl = ctx.decl;

    match ctx
        .cloud
        .get_resource_group(&decl.target_subscription, &decl.target_resource_group)
        .await
    {
        Ok(group) if !region_eq(&group.location, &decl.target_region) => CheckOutcome::warning(
            id,
            format!(
                "resource group {} is in {}, machine targets {}",
                group.name, group.location, decl.target_region
            ),
        ),
        Ok(group) => CheckOutcome::ok(id, format!("resource group {} exists", group.name)),
        Err(err) => from_cloud_error(id, &err, Severity::Failure),
    }
}

/// Target vnet/subnet exist, carry no delegation, and have free addresses.
pub(crate) async fn vnet_subnet(ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ServerVnetSubnet;
    let decl = ctx.decl;

    let subnet = match ctx
        .cloud
        .get_subnet(
            &decl.target_subscription,
            &decl.target_resource_group,
            &decl.target_vnet,
            &decl.target_subnet,
        )
        .await
    {
        Ok(subnet) => subnet,
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };

    if !subnet.delegations.is_empty() {
        return CheckOutcome::failure(
            id,
            format!(
                "subnet {} is delegated to {} and cannot host VMs",
                subnet.name,
                subnet.delegations.join(", ")
            ),
        );
    }

    let capacity = match prefix_capacity(&subnet.address_prefix) {
        Some(capacity) => capacity,
        None => {
            return CheckOutcome::failure(
                id,
                format!(
                    "subnet {} has an unusable address prefix {}",
                    subnet.name, subnet.address_prefix
                ),
            );
        }
    };
    let free = capacity as i64 - RESERVED_SUBNET_IPS as i64 - i64::from(subnet.used_ip_count);
    let detail = format!(
        "{} has {free} free of {capacity} addresses ({} in use, {RESERVED_SUBNET_IPS} reserved)",
        subnet.address_prefix, subnet.used_ip_count
    );

    if free <= 0 {
        CheckOutcome::failure(
            id,
            format!("subnet {} has no free addresses", subnet.name),
        )
        .with_detail(detail)
    } else if (free as f64) <= capacity as f64 * 0.05 {
        CheckOutcome::warning(
            id,
            format!("subnet {} is nearly exhausted ({free} addresses left)", subnet.name),
        )
        .with_detail(detail)
    } else {
        CheckOutcome::ok(id, format!("subnet {} has room", subnet.name)).with_detail(detail)
    }
}

/// Target VM size is offered and unrestricted in the target region.
pub(crate) async fn target_sku(ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ServerSku;
    let decl = ctx.decl;

    let skus = match ctx
        .cloud
        .list_vm_skus(&decl.target_subscription, &decl.target_region)
        .await
    {
        Ok(skus) => skus,
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };

    let Some(sku) = skus.iter().find(|s| s.name.eq_ignore_ascii_case(&decl.target_sku)) else {
        return CheckOutcome::failure(
            id,
            format!(
                "VM size {} is not offered in {} for subscription {}",
                decl.target_sku, decl.target_region, decl.target_subscription
            ),
        );
    };

    if sku.has_blocking_restriction() {
        return CheckOutcome::failure(
            id,
            format!("VM size {} is restricted in {}", sku.name, decl.target_region),
        );
    }
    if sku.is_deprecated() {
        return CheckOutcome::warning(
            id,
            format!("VM size {} is deprecated", sku.name),
        );
    }
    CheckOutcome::ok(id, format!("VM size {} is available", sku.name))
}

/// Declared disk kind is compatible with the target VM size.
pub(crate) async fn disk_type(ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ServerDiskType;
    let decl = ctx.decl;
    let table = ctx.config.tier2().disk_type.supported.as_ref();

    // The SKU snapshot is only consulted when no table overrides it; the
    // list is the same cached snapshot the SKU check reads.
    let skus = if table.is_none() {
        match ctx
            .cloud
            .list_vm_skus(&decl.target_subscription, &decl.target_region)
            .await
        {
            Ok(skus) => Some(skus),
            Err(err) => return from_cloud_error(id, &err, Severity::Failure),
        }
    } else {
        None
    };
    let sku = skus
        .as_ref()
        .and_then(|s| s.iter().find(|s| s.name.eq_ignore_ascii_case(&decl.target_sku)));

    match disk_support(table, &decl.target_sku, sku, decl.target_disk_type) {
        DiskSupport::Supported => CheckOutcome::ok(
            id,
            format!("{} supports {} disks", decl.target_sku, decl.target_disk_type),
        ),
        DiskSupport::Unsupported { reason } => CheckOutcome::failure(
            id,
            format!("{} is not usable with {}", decl.target_disk_type, decl.target_sku),
        )
        .with_detail(reason),
        DiskSupport::Unknown { reason } => CheckOutcome::failure(
            id,
            format!("disk support for {} cannot be determined", decl.target_sku),
        )
        .with_detail(reason),
    }
}

/// The machine was discovered by the project's appliance, exactly once,
/// and is not already replicating.
pub(crate) async fn discovery(ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ServerDiscovery;
    let project = ctx.project;
    let lookup_name = ctx.decl.discovery_name();

    let candidates = match ctx
        .cloud
        .search_discovered_by_name(
            &project.subscription_id,
            &project.resource_group,
            &project.project_name,
            lookup_name,
        )
        .await
    {
        Ok(candidates) => candidates,
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };

    let exact: Vec<_> = candidates.iter().filter(|m| m.matches_name(lookup_name)).collect();
    match exact.as_slice() {
        [] => CheckOutcome::failure(
            id,
            format!(
                "{lookup_name} has not been discovered in project {}",
                project.project_name
            ),
        ),
        [machine] => match &machine.replication_state {
            Some(state) => CheckOutcome::warning(
                id,
                format!("{lookup_name} already has replication enabled ({state})"),
            )
            .with_detail(format!("discovery record {}", machine.id)),
            None => CheckOutcome::ok(id, format!("{lookup_name} is discovered")),
        },
        many => CheckOutcome::warning(
            id,
            format!("{} discovered machines match {lookup_name}", many.len()),
        )
        .with_detail(
            many.iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
    }
}

/// Caller holds a required role on the target resource group.
pub(crate) async fn resource_group_rbac(ctx: &MachineCheckContext<'_>) -> CheckOutcome {
    let id = CheckId::ServerResourceGroupRbac;
    let decl = ctx.decl;
    let scope = format!(
        "/subscriptions/{}/resourceGroups/{}",
        decl.target_subscription, decl.target_resource_group
    );

    let assigned = match ctx.cloud.list_role_assignments(&scope, ctx.principal_id).await {
        Ok(assigned) => assigned,
        Err(err @ CloudError::Forbidden { .. }) => {
            let outcome = CheckOutcome::failure(
                id,
                format!(
                    "insufficient permission to verify permissions on {}",
                    decl.target_resource_group
                ),
            );
            return match err.request_id() {
                Some(request_id) => outcome.with_cause(request_id),
                None => outcome,
            };
        }
        Err(err) => return from_cloud_error(id, &err, Severity::Failure),
    };

    let required = &ctx.config.tier2().rg_rbac.required_roles;
    if holds_any_role(&assigned, required) {
        CheckOutcome::ok(
            id,
            format!("principal holds a required role on {}", decl.target_resource_group),
        )
    } else {
        CheckOutcome::failure(
            id,
            format!(
                "principal {} holds none of the required roles on resource group {}",
                ctx.principal_id, decl.target_resource_group
            ),
        )
        .with_detail(format!("required any of: {}", required.join(", ")))
    }
}

/// Usable host capacity of an IPv4 CIDR prefix.
fn prefix_capacity(prefix: &str) -> Option<u64> {
    let (address, len) = prefix.split_once('/')?;
    address.parse::<std::net::Ipv4Addr>().ok()?;
    let len: u32 = len.parse().ok()?;
    if len > 32 {
        return None;
    }
    Some(1u64 << (32 - len))
}
