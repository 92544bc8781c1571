//! In-memory [`CloudReads`] double for tests.
//!
//! Enabled through the `fake` cargo feature; downstream crates pull it in
//! from dev-dependencies only. Entries are plain maps keyed by
//! [`fake_key`]; absent entries behave like the real control plane (404
//! for single resources, empty collections for lists). Every call is
//! recorded so tests can assert how often an operation went "upstream".

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::access::CloudReads;
use crate::error::CloudError;
use crate::models::{
    Appliance, DiscoveredMachine, Location, MigrateProject, ResourceGroup, StorageAccount,
    SubnetInfo, Subscription, VcpuUsage, VmSku,
};

/// Joins key parts the way every `FakeCloud` map expects.
pub fn fake_key(parts: &[&str]) -> String {
    parts.join("|")
}

/// Configurable in-memory cloud. Construct with [`Default::default`] and
/// fill the maps the test cares about.
#[derive(Default)]
pub struct FakeCloud {
    /// `sub` → subscription (or injected error).
    pub subscriptions: HashMap<String, Result<Subscription, CloudError>>,
    /// `scope|principal` → assigned role-definition ids (or injected error).
    pub role_assignments: HashMap<String, Result<BTreeSet<String>, CloudError>>,
    /// `sub|rg` → resource group.
    pub resource_groups: HashMap<String, Result<ResourceGroup, CloudError>>,
    /// `sub` → locations.
    pub locations: HashMap<String, Result<Vec<Location>, CloudError>>,
    /// `sub|region` → SKUs.
    pub skus: HashMap<String, Result<Vec<VmSku>, CloudError>>,
    /// `sub|rg|vnet|subnet` → subnet facts.
    pub subnets: HashMap<String, Result<SubnetInfo, CloudError>>,
    /// `sub|rg|name` → storage account. Mutated by the create operation.
    pub storage_accounts: Mutex<HashMap<String, Result<StorageAccount, CloudError>>>,
    /// When set, the create operation fails with this error.
    pub create_storage_error: Option<CloudError>,
    /// `sub|region|family` → usage.
    pub usages: HashMap<String, Result<VcpuUsage, CloudError>>,
    /// `sub|rg` → migrate projects.
    pub migrate_projects: HashMap<String, Result<Vec<MigrateProject>, CloudError>>,
    /// `sub|rg|project` → appliances.
    pub appliances: HashMap<String, Result<Vec<Appliance>, CloudError>>,
    /// `sub|rg|project` → discovered machines.
    pub discovered: HashMap<String, Result<Vec<DiscoveredMachine>, CloudError>>,
    /// Every operation invocation, as `"op:key"`.
    pub calls: Mutex<Vec<String>>,
}

impl FakeCloud {
    fn record(&self, op: &str, key: &str) {
        self.calls.lock().expect("calls mutex poisoned").push(format!("{op}:{key}"));
    }

    /// How many times the named operation was invoked.
    pub fn calls_of(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn with_subscription(mut self, sub: &str, display_name: &str) -> Self {
        self.subscriptions.insert(
            sub.to_string(),
            Ok(Subscription {
                subscription_id: sub.to_string(),
                display_name: display_name.to_string(),
                state: Some("Enabled".to_string()),
            }),
        );
        self
    }

    pub fn with_roles(mut self, scope: &str, principal: &str, definition_ids: &[&str]) -> Self {
        self.role_assignments.insert(
            fake_key(&[scope, principal]),
            Ok(definition_ids.iter().map(|s| (*s).to_string()).collect()),
        );
        self
    }

    pub fn with_resource_group(mut self, sub: &str, rg: &str, location: &str) -> Self {
        self.resource_groups.insert(
            fake_key(&[sub, rg]),
            Ok(ResourceGroup { name: rg.to_string(), location: location.to_string() }),
        );
        self
    }

    pub fn with_locations(mut self, sub: &str, names: &[&str]) -> Self {
        self.locations.insert(
            sub.to_string(),
            Ok(names
                .iter()
                .map(|n| Location { name: (*n).to_string(), display_name: None })
                .collect()),
        );
        self
    }

    pub fn with_skus(mut self, sub: &str, region: &str, skus: Vec<VmSku>) -> Self {
        self.skus.insert(fake_key(&[sub, region]), Ok(skus));
        self
    }

    pub fn with_subnet(
        mut self,
        sub: &str,
        rg: &str,
        vnet: &str,
        subnet: SubnetInfo,
    ) -> Self {
        let key = fake_key(&[sub, rg, vnet, &subnet.name]);
        self.subnets.insert(key, Ok(subnet));
        self
    }

    pub fn with_storage_account(mut self, sub: &str, rg: &str, account: StorageAccount) -> Self {
        let key = fake_key(&[sub, rg, &account.name]);
        self.storage_accounts
            .get_mut()
            .expect("storage mutex poisoned")
            .insert(key, Ok(account));
        self
    }

    pub fn with_usage(mut self, sub: &str, region: &str, family: &str, usage: VcpuUsage) -> Self {
        self.usages.insert(fake_key(&[sub, region, family]), Ok(usage));
        self
    }

    pub fn with_migrate_project(mut self, sub: &str, rg: &str, name: &str) -> Self {
        let key = fake_key(&[sub, rg]);
        let entry = self
            .migrate_projects
            .entry(key)
            .or_insert_with(|| Ok(Vec::new()));
        if let Ok(projects) = entry {
            projects.push(MigrateProject { name: name.to_string(), location: None });
        }
        self
    }

    pub fn with_appliances(
        mut self,
        sub: &str,
        rg: &str,
        project: &str,
        appliances: Vec<Appliance>,
    ) -> Self {
        self.appliances.insert(fake_key(&[sub, rg, project]), Ok(appliances));
        self
    }

    pub fn with_discovered(
        mut self,
        sub: &str,
        rg: &str,
        project: &str,
        machines: Vec<DiscoveredMachine>,
    ) -> Self {
        self.discovered.insert(fake_key(&[sub, rg, project]), Ok(machines));
        self
    }
}

fn get_entry<V: Clone>(
    map: &HashMap<String, Result<V, CloudError>>,
    key: &str,
    resource: String,
) -> Result<V, CloudError> {
    match map.get(key) {
        Some(entry) => entry.clone(),
        None => Err(CloudError::NotFound { resource, request_id: None }),
    }
}

fn list_entry<V: Clone>(
    map: &HashMap<String, Result<Vec<V>, CloudError>>,
    key: &str,
) -> Result<Vec<V>, CloudError> {
    map.get(key).cloned().unwrap_or_else(|| Ok(Vec::new()))
}

#[async_trait]
impl CloudReads for FakeCloud {
    async fn get_subscription(&self, subscription: &str) -> Result<Subscription, CloudError> {
        self.record("get_subscription", subscription);
        get_entry(&self.subscriptions, subscription, format!("subscription {subscription}"))
    }

    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &str,
    ) -> Result<BTreeSet<String>, CloudError> {
        let key = fake_key(&[scope, principal_id]);
        self.record("list_role_assignments", &key);
        self.role_assignments
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Ok(BTreeSet::new()))
    }

    async fn get_resource_group(
        &self,
        subscription: &str,
        resource_group: &str,
    ) -> Result<ResourceGroup, CloudError> {
        let key = fake_key(&[subscription, resource_group]);
        self.record("get_resource_group", &key);
        get_entry(&self.resource_groups, &key, format!("resource group {resource_group}"))
    }

    async fn list_locations(&self, subscription: &str) -> Result<Arc<Vec<Location>>, CloudError> {
        self.record("list_locations", subscription);
        list_entry(&self.locations, subscription).map(Arc::new)
    }

    async fn list_vm_skus(
        &self,
        subscription: &str,
        region: &str,
    ) -> Result<Arc<Vec<VmSku>>, CloudError> {
        let key = fake_key(&[subscription, region]);
        self.record("list_vm_skus", &key);
        list_entry(&self.skus, &key).map(Arc::new)
    }

    async fn get_subnet(
        &self,
        subscription: &str,
        resource_group: &str,
        vnet: &str,
        subnet: &str,
    ) -> Result<SubnetInfo, CloudError> {
        let key = fake_key(&[subscription, resource_group, vnet, subnet]);
        self.record("get_subnet", &key);
        get_entry(
            &self.subnets,
            &key,
            format!("subnet {subnet} in virtual network {vnet}"),
        )
    }

    async fn get_storage_account(
        &self,
        subscription: &str,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccount, CloudError> {
        let key = fake_key(&[subscription, resource_group, name]);
        self.record("get_storage_account", &key);
        let accounts = self.storage_accounts.lock().expect("storage mutex poisoned");
        match accounts.get(&key) {
            Some(entry) => entry.clone(),
            None => Err(CloudError::NotFound {
                resource: format!("storage account {name}"),
                request_id: None,
            }),
        }
    }

    async fn create_storage_account(
        &self,
        subscription: &str,
        resource_group: &str,
        name: &str,
        region: &str,
    ) -> Result<StorageAccount, CloudError> {
        let key = fake_key(&[subscription, resource_group, name]);
        self.record("create_storage_account", &key);
        if let Some(err) = &self.create_storage_error {
            return Err(err.clone());
        }
        let account = StorageAccount {
            name: name.to_string(),
            location: region.to_string(),
            kind: Some("StorageV2".to_string()),
        };
        self.storage_accounts
            .lock()
            .expect("storage mutex poisoned")
            .insert(key, Ok(account.clone()));
        Ok(account)
    }

    async fn get_vcpu_usage(
        &self,
        subscription: &str,
        region: &str,
        family: &str,
    ) -> Result<VcpuUsage, CloudError> {
        let key = fake_key(&[subscription, region, family]);
        self.record("get_vcpu_usage", &key);
        get_entry(&self.usages, &key, format!("usage family {family} in {region}"))
    }

    async fn list_migrate_projects(
        &self,
        subscription: &str,
        resource_group: &str,
    ) -> Result<Vec<MigrateProject>, CloudError> {
        let key = fake_key(&[subscription, resource_group]);
        self.record("list_migrate_projects", &key);
        list_entry(&self.migrate_projects, &key)
    }

    async fn list_appliances(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
    ) -> Result<Arc<Vec<Appliance>>, CloudError> {
        let key = fake_key(&[subscription, resource_group, project]);
        self.record("list_appliances", &key);
        list_entry(&self.appliances, &key).map(Arc::new)
    }

    async fn list_discovered_machines(
        &self,
        subscription: &str,
        resource_group: &str,
        project: &str,
    ) -> Result<Arc<Vec<DiscoveredMachine>>, CloudError> {
        let key = fake_key(&[subscription, resource_group, project]);
        self.record("list_discovered_machines", &key);
        list_entry(&self.discovered, &key).map(Arc::new)
    }
}
