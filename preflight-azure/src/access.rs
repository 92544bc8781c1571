use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use preflight_core::ApplianceKind;

use crate::cache::ResponseCache;
use crate::client::ArmClient;
use crate::error::CloudError;
use crate::models::{
    Appliance, ApplianceHealth, DiscoveredMachine, Location, MigrateProject, ResourceGroup,
    StorageAccount, SubnetInfo, Subscription, VcpuUsage, VmSku,
};

const SUBSCRIPTIONS_API: &str = "2022-12-01";
const AUTHORIZATION_API: &str = "2022-04-01";
const RESOURCES_API: &str = "2021-04-01";
const COMPUTE_API: &str = "2021-07-01";
const NETWORK_API: &str = "2023-09-01";
const STORAGE_API: &str = "2023-01-01";
const MIGRATE_API: &str = "2020-05-01";
const RESOURCE_GRAPH_API: &str = "2021-03-01";

/// Typed read surface of the cloud control plane.
///
/// This is the seam between the validation logic and Azure: checks and the
/// matcher only ever see this trait, so tests drive them with an in-memory
/// implementation while production wires in [`CloudAccess`].
///
/// Operations returning `Arc<Vec<_>>` are cached per run; repeated calls
/// share one snapshot and concurrent first calls share one upstream fetch.
#[async_trait]
pub trait CloudReads: Send + Sync {
    async fn get_subscription(&self, subscription: &str) -> Result<Subscription, CloudError>;

    /// Role-definition ids assigned to the principal at (or above) the
    /// given scope, e.g. `/subscriptions/{id}` or
    /// `/subscriptions/{id}/resourceGroups/{rg}`.
    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &str,
    ) -> Result<BTreeSet<String>, CloudError>;

    async fn get_resource_group(
        &self,
        subscription: &str,
        resource_group: &str,
    ) -> Result<ResourceGroup, CloudError>;

    async fn list_locations(&self, subscription: &str) -> Result<Arc<Vec<Location>>, CloudError>;

    async fn list_vm_skus(
        &self,
        subscription: &str,
        region: &str,
    ) -> Result<Arc<Vec<VmSku>>, CloudError>;

    async fn get_subnet(
        &self,
        subscription: &str,
        resource_group: &str,
        vnet: &str,
        subnet: &str,
    ) -> Result<SubnetInfo, CloudError>;

    async fn get_storage_account(
        &self,
        subscription: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccount, CloudError>;

    /// The engine's only write, gated behind `storage.cache.auto_create`.
    async fn create_storage_account(
        &self,
        subscription: &str,
        resource_group: &str,
        name: &str,
        region: &str,
    ) -> Result<StorageAccount, CloudError>;

    /// Usage for one quota family (e.g. `cores`) in a region.
    async fn get_vcpu_usage(
        &self,
        subscription: &str,
        region: &str,
        family: &str,
    ) -> Result<VcpuUsage, CloudError>;

    async fn list_migrate_projects(
        &self,
        subscription: &str,
        resource_group: &str,
    ) -> Result<Vec<MigrateProject>, CloudError>;

    async fn list_appliances(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
    ) -> Result<Arc<Vec<Appliance>>, CloudError>;

    async fn list_discovered_machines(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
    ) -> Result<Arc<Vec<DiscoveredMachine>>, CloudError>;

    /// Discovered machines whose any known name contains `fragment`,
    /// case-insensitively. Served from the cached discovery snapshot.
    async fn search_discovered_by_name(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
        fragment: &str,
    ) -> Result<Vec<DiscoveredMachine>, CloudError> {
        let machines = self
            .list_discovered_machines(subscription, resource_group, project)
            .await?;
        Ok(machines
            .iter()
            .filter(|m| m.name_contains(fragment))
            .cloned()
            .collect())
    }
}

/// Production [`CloudReads`] backed by [`ArmClient`] and the per-run
/// response cache.
pub struct CloudAccess {
    client: ArmClient,
    cache: ResponseCache,
}

impl CloudAccess {
    pub fn new(client: ArmClient) -> Self {
        Self { client, cache: ResponseCache::new() }
    }
}

// ---- wire shapes -----------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleAssignmentWire {
    properties: RoleAssignmentProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleAssignmentProperties {
    role_definition_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VnetWire {
    #[allow(dead_code)]
    name: String,
    properties: VnetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VnetProperties {
    #[serde(default)]
    subnets: Vec<SubnetWire>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetWire {
    name: String,
    properties: SubnetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetProperties {
    #[serde(default)]
    address_prefix: Option<String>,
    #[serde(default)]
    address_prefixes: Option<Vec<String>>,
    #[serde(default)]
    delegations: Vec<DelegationWire>,
    #[serde(default)]
    ip_configurations: Vec<SubResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegationWire {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: Option<DelegationProperties>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegationProperties {
    #[serde(default)]
    service_name: Option<String>,
}

#[derive(Deserialize)]
struct SubResource {
    #[allow(dead_code)]
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageWire {
    name: UsageName,
    current_value: i64,
    limit: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageName {
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateProjectWire {
    name: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplianceWire {
    name: String,
    #[serde(default)]
    properties: Option<ApplianceProperties>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplianceProperties {
    #[serde(default)]
    appliance_type: Option<String>,
    #[serde(default)]
    last_heartbeat_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    health_status: Option<String>,
}

#[derive(Deserialize)]
struct GraphQueryResponse {
    #[serde(default)]
    data: Vec<GraphApplianceRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphApplianceRow {
    name: String,
    #[serde(default)]
    appliance_type: Option<String>,
    #[serde(default)]
    last_heartbeat_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    health_status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveredMachineWire {
    id: String,
    #[serde(default)]
    name: Option<String>,
    properties: DiscoveredMachineProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveredMachineProperties {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    fqdn: Option<String>,
    #[serde(default)]
    ip_addresses: Vec<String>,
    #[serde(default)]
    replication_status: Option<String>,
}

fn parse_appliance_kind(raw: Option<&str>) -> Option<ApplianceKind> {
    match raw?.to_ascii_lowercase().as_str() {
        "vmware" => Some(ApplianceKind::Vmware),
        "hyperv" | "hyper-v" => Some(ApplianceKind::Hyperv),
        "physical" | "server" => Some(ApplianceKind::Physical),
        _ => None,
    }
}

fn parse_health(raw: Option<&str>) -> ApplianceHealth {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("healthy") => ApplianceHealth::Healthy,
        Some("degraded") | Some("warning") => ApplianceHealth::Degraded,
        Some("critical") | Some("unhealthy") => ApplianceHealth::Critical,
        _ => ApplianceHealth::Unknown,
    }
}

fn appliance_from_wire(wire: ApplianceWire) -> Appliance {
    let props = wire.properties.unwrap_or(ApplianceProperties {
        appliance_type: None,
        last_heartbeat_utc: None,
        health_status: None,
    });
    Appliance {
        name: wire.name,
        kind: parse_appliance_kind(props.appliance_type.as_deref()),
        last_heartbeat: props.last_heartbeat_utc,
        health: parse_health(props.health_status.as_deref()),
    }
}

fn machine_from_wire(wire: DiscoveredMachineWire) -> DiscoveredMachine {
    let record_name = wire.name.unwrap_or_default();
    let display = wire.properties.display_name.clone().unwrap_or_else(|| record_name.clone());
    let mut aliases = Vec::new();
    if !record_name.is_empty() && !record_name.eq_ignore_ascii_case(&display) {
        aliases.push(record_name);
    }
    if let Some(fqdn) = wire.properties.fqdn {
        if !fqdn.eq_ignore_ascii_case(&display) {
            aliases.push(fqdn);
        }
    }
    DiscoveredMachine {
        id: wire.id,
        name: display,
        aliases,
        ip_addresses: wire.properties.ip_addresses,
        replication_state: wire.properties.replication_status,
    }
}

#[async_trait]
impl CloudReads for CloudAccess {
    async fn get_subscription(&self, subscription: &str) -> Result<Subscription, CloudError> {
        let path = format!("subscriptions/{subscription}?api-version={SUBSCRIPTIONS_API}");
        self.client
            .get_json(&path, &format!("subscription {subscription}"))
            .await
    }

    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &str,
    ) -> Result<BTreeSet<String>, CloudError> {
        let scope = scope.trim_matches('/');
        let path = format!(
            "{scope}/providers/Microsoft.Authorization/roleAssignments\
             ?api-version={AUTHORIZATION_API}&$filter=assignedTo('{principal_id}')"
        );
        let assignments: Vec<RoleAssignmentWire> = self
            .client
            .get_all_pages(&path, &format!("role assignments at {scope}"))
            .await?;
        Ok(assignments
            .into_iter()
            .map(|a| a.properties.role_definition_id)
            .collect())
    }

    async fn get_resource_group(
        &self,
        subscription: &str,
        resource_group: &str,
    ) -> Result<ResourceGroup, CloudError> {
        let path = format!(
            "subscriptions/{subscription}/resourcegroups/{resource_group}\
             ?api-version={RESOURCES_API}"
        );
        self.client
            .get_json(&path, &format!("resource group {resource_group}"))
            .await
    }

    async fn list_locations(&self, subscription: &str) -> Result<Arc<Vec<Location>>, CloudError> {
        self.cache
            .locations
            .get_or_fetch(subscription.to_string(), || async {
                let path =
                    format!("subscriptions/{subscription}/locations?api-version={SUBSCRIPTIONS_API}");
                let locations: Vec<Location> = self
                    .client
                    .get_all_pages(&path, &format!("locations of {subscription}"))
                    .await?;
                tracing::debug!(subscription, count = locations.len(), "cached location list");
                Ok(Arc::new(locations))
            })
            .await
    }

    async fn list_vm_skus(
        &self,
        subscription: &str,
        region: &str,
    ) -> Result<Arc<Vec<VmSku>>, CloudError> {
        let key = (subscription.to_string(), region.to_ascii_lowercase());
        self.cache
            .skus
            .get_or_fetch(key, || async {
                let path = format!(
                    "subscriptions/{subscription}/providers/Microsoft.Compute/skus\
                     ?api-version={COMPUTE_API}&$filter=location eq '{region}'"
                );
                let skus: Vec<VmSku> = self
                    .client
                    .get_all_pages(&path, &format!("VM sizes in {region}"))
                    .await?;
                let skus: Vec<VmSku> = skus
                    .into_iter()
                    .filter(|s| {
                        s.resource_type
                            .as_deref()
                            .map(|t| t.eq_ignore_ascii_case("virtualMachines"))
                            .unwrap_or(true)
                    })
                    .collect();
                tracing::debug!(subscription, region, count = skus.len(), "cached SKU list");
                Ok(Arc::new(skus))
            })
            .await
    }

    async fn get_subnet(
        &self,
        subscription: &str,
        resource_group: &str,
        vnet: &str,
        subnet: &str,
    ) -> Result<SubnetInfo, CloudError> {
        // One vnet GET serves both the vnet-existence and subnet checks;
        // the subnet is picked out of the embedded collection.
        let path = format!(
            "subscriptions/{subscription}/resourceGroups/{resource_group}\
             /providers/Microsoft.Network/virtualNetworks/{vnet}?api-version={NETWORK_API}"
        );
        let wire: VnetWire = self
            .client
            .get_json(&path, &format!("virtual network {vnet}"))
            .await?;
        let found = wire
            .properties
            .subnets
            .into_iter()
            .find(|s| s.name.eq_ignore_ascii_case(subnet))
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("subnet {subnet} in virtual network {vnet}"),
                request_id: None,
            })?;
        let prefix = found
            .properties
            .address_prefix
            .or_else(|| {
                found
                    .properties
                    .address_prefixes
                    .as_ref()
                    .and_then(|p| p.first().cloned())
            })
            .ok_or_else(|| CloudError::Malformed {
                reason: format!("subnet {subnet} has no address prefix"),
                request_id: None,
            })?;
        let delegations = found
            .properties
            .delegations
            .into_iter()
            .map(|d| {
                d.properties
                    .and_then(|p| p.service_name)
                    .or(d.name)
                    .unwrap_or_else(|| "unnamed delegation".to_string())
            })
            .collect();
        Ok(SubnetInfo {
            name: found.name,
            address_prefix: prefix,
            delegations,
            used_ip_count: found.properties.ip_configurations.len() as u32,
        })
    }

    async fn get_storage_account(
        &self,
        subscription: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccount, CloudError> {
        let path = format!(
            "subscriptions/{subscription}/resourceGroups/{resource_group}\
             /providers/Microsoft.Storage/storageAccounts/{name}?api-version={STORAGE_API}"
        );
        self.client
            .get_json(&path, &format!("storage account {name}"))
            .await
    }

    async fn create_storage_account(
        &self,
        subscription: &str,
        resource_group: &str,
        name: &str,
        region: &str,
    ) -> Result<StorageAccount, CloudError> {
        let path = format!(
            "subscriptions/{subscription}/resourceGroups/{resource_group}\
             /providers/Microsoft.Storage/storageAccounts/{name}?api-version={STORAGE_API}"
        );
        let body = serde_json::json!({
            "location": region,
            "kind": "StorageV2",
            "sku": { "name": "Standard_LRS" },
        });
        tracing::info!(name, resource_group, region, "creating cache storage account");
        self.client
            .put_json(&path, body, &format!("storage account {name}"))
            .await
    }

    async fn get_vcpu_usage(
        &self,
        subscription: &str,
        region: &str,
        family: &str,
    ) -> Result<VcpuUsage, CloudError> {
        let path = format!(
            "subscriptions/{subscription}/providers/Microsoft.Compute\
             /locations/{region}/usages?api-version={COMPUTE_API}"
        );
        let usages: Vec<UsageWire> = self
            .client
            .get_all_pages(&path, &format!("compute usages in {region}"))
            .await?;
        usages
            .into_iter()
            .find(|u| u.name.value.eq_ignore_ascii_case(family))
            .map(|u| VcpuUsage { current: u.current_value, limit: u.limit })
            .ok_or_else(|| CloudError::Malformed {
                reason: format!("usage family {family} absent from {region} response"),
                request_id: None,
            })
    }

    async fn list_migrate_projects(
        &self,
        subscription: &str,
        resource_group: &str,
    ) -> Result<Vec<MigrateProject>, CloudError> {
        let path = format!(
            "subscriptions/{subscription}/resourceGroups/{resource_group}\
             /providers/Microsoft.Migrate/migrateProjects?api-version={MIGRATE_API}"
        );
        let projects: Vec<MigrateProjectWire> = self
            .client
            .get_all_pages(&path, &format!("migrate projects in {resource_group}"))
            .await?;
        Ok(projects
            .into_iter()
            .map(|p| MigrateProject { name: p.name, location: p.location })
            .collect())
    }

    async fn list_appliances(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
    ) -> Result<Arc<Vec<Appliance>>, CloudError> {
        let key = (
            subscription.to_string(),
            resource_group.to_string(),
            project.to_string(),
        );
        self.cache
            .appliances
            .get_or_fetch(key, || async {
                match self
                    .list_appliances_direct(subscription, resource_group, project)
                    .await
                {
                    Ok(appliances) => Ok(Arc::new(appliances)),
                    // Older projects don't expose the appliance collection;
                    // fall back to a resource-graph query.
                    Err(err) if err.is_not_found() => {
                        tracing::debug!(
                            project,
                            "appliance collection missing, falling back to graph query"
                        );
                        let appliances = self
                            .list_appliances_via_graph(subscription, project)
                            .await?;
                        Ok(Arc::new(appliances))
                    }
                    Err(err) => Err(err),
                }
            })
            .await
    }

    async fn list_discovered_machines(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
    ) -> Result<Arc<Vec<DiscoveredMachine>>, CloudError> {
        let key = (
            subscription.to_string(),
            resource_group.to_string(),
            project.to_string(),
        );
        self.cache
            .discovered
            .get_or_fetch(key, || async {
                let path = format!(
                    "subscriptions/{subscription}/resourceGroups/{resource_group}\
                     /providers/Microsoft.Migrate/migrateProjects/{project}/machines\
                     ?api-version={MIGRATE_API}"
                );
                let machines: Vec<DiscoveredMachineWire> = self
                    .client
                    .get_all_pages(&path, &format!("discovered machines of {project}"))
                    .await?;
                let machines: Vec<DiscoveredMachine> =
                    machines.into_iter().map(machine_from_wire).collect();
                tracing::debug!(project, count = machines.len(), "cached discovery snapshot");
                Ok(Arc::new(machines))
            })
            .await
    }
}

impl CloudAccess {
    async fn list_appliances_direct(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
    ) -> Result<Vec<Appliance>, CloudError> {
        let path = format!(
            "subscriptions/{subscription}/resourceGroups/{resource_group}\
             /providers/Microsoft.Migrate/migrateProjects/{project}/appliances\
             ?api-version={MIGRATE_API}"
        );
        let wires: Vec<ApplianceWire> = self
            .client
            .get_all_pages(&path, &format!("appliances of {project}"))
            .await?;
        Ok(wires.into_iter().map(appliance_from_wire).collect())
    }

    async fn list_appliances_via_graph(
        &self,
        subscription: &str,
        project: &str,
    ) -> Result<Vec<Appliance>, CloudError> {
        let path = format!(
            "providers/Microsoft.ResourceGraph/resources?api-version={RESOURCE_GRAPH_API}"
        );
        let query = format!(
            "resources \
             | where type in~ ('microsoft.offazure/vmwaresites', 'microsoft.offazure/hypervsites', 'microsoft.offazure/serversites') \
             | where properties.discoverySolutionId contains '{project}' \
             | project name, applianceType = properties.applianceName, \
               lastHeartbeatUtc = properties.agentDetails.lastHeartBeatUtc, \
               healthStatus = properties.agentDetails.healthStatus"
        );
        let body = serde_json::json!({
            "subscriptions": [subscription],
            "query": query,
        });
        let response: GraphQueryResponse = self
            .client
            .post_json(&path, body, &format!("appliance graph query for {project}"))
            .await?;
        Ok(response
            .data
            .into_iter()
            .map(|row| Appliance {
                name: row.name,
                kind: parse_appliance_kind(row.appliance_type.as_deref()),
                last_heartbeat: row.last_heartbeat_utc,
                health: parse_health(row.health_status.as_deref()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appliance_kind_parsing() {
        assert_eq!(parse_appliance_kind(Some("VMware")), Some(ApplianceKind::Vmware));
        assert_eq!(parse_appliance_kind(Some("Hyper-V")), Some(ApplianceKind::Hyperv));
        assert_eq!(parse_appliance_kind(Some("physical")), Some(ApplianceKind::Physical));
        assert_eq!(parse_appliance_kind(Some("container")), None);
        assert_eq!(parse_appliance_kind(None), None);
    }

    #[test]
    fn health_parsing_defaults_to_unknown() {
        assert_eq!(parse_health(Some("Healthy")), ApplianceHealth::Healthy);
        assert_eq!(parse_health(Some("warning")), ApplianceHealth::Degraded);
        assert_eq!(parse_health(Some("Unhealthy")), ApplianceHealth::Critical);
        assert_eq!(parse_health(Some("???")), ApplianceHealth::Unknown);
        assert_eq!(parse_health(None), ApplianceHealth::Unknown);
    }

    #[test]
    fn machine_wire_mapping_collects_aliases() {
        let wire = DiscoveredMachineWire {
            id: "machines/1".into(),
            name: Some("machine-1".into()),
            properties: DiscoveredMachineProperties {
                display_name: Some("web01".into()),
                fqdn: Some("web01.corp.local".into()),
                ip_addresses: vec!["10.1.0.4".into()],
                replication_status: None,
            },
        };
        let machine = machine_from_wire(wire);
        assert_eq!(machine.name, "web01");
        assert_eq!(machine.aliases, vec!["machine-1", "web01.corp.local"]);
    }

    #[test]
    fn machine_wire_mapping_without_display_name() {
        let wire = DiscoveredMachineWire {
            id: "machines/2".into(),
            name: Some("db01".into()),
            properties: DiscoveredMachineProperties {
                display_name: None,
                fqdn: None,
                ip_addresses: vec![],
                replication_status: Some("replicating".into()),
            },
        };
        let machine = machine_from_wire(wire);
        assert_eq!(machine.name, "db01");
        assert!(machine.aliases.is_empty());
        assert_eq!(machine.replication_state.as_deref(), Some("replicating"));
    }
}
