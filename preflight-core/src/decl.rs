use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InputError;

/// Kind of migration appliance running in the source environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplianceKind {
    Vmware,
    Hyperv,
    Physical,
}

impl fmt::Display for ApplianceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplianceKind::Vmware => write!(f, "vmware"),
            ApplianceKind::Hyperv => write!(f, "hyperv"),
            ApplianceKind::Physical => write!(f, "physical"),
        }
    }
}

/// Managed-disk kind declared for a target machine.
///
/// Wire names follow the lowercase convention used by the input layer
/// (`premium_lrs`); [`DiskType::azure_name`] gives the ARM spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskType {
    StandardLrs,
    StandardSsdLrs,
    StandardSsdZrs,
    PremiumLrs,
    PremiumZrs,
    PremiumV2Lrs,
    UltraSsdLrs,
}

impl DiskType {
    /// ARM storage account type string (e.g. `Premium_LRS`).
    pub fn azure_name(&self) -> &'static str {
        match self {
            DiskType::StandardLrs => "Standard_LRS",
            DiskType::StandardSsdLrs => "StandardSSD_LRS",
            DiskType::StandardSsdZrs => "StandardSSD_ZRS",
            DiskType::PremiumLrs => "Premium_LRS",
            DiskType::PremiumZrs => "Premium_ZRS",
            DiskType::PremiumV2Lrs => "PremiumV2_LRS",
            DiskType::UltraSsdLrs => "UltraSSD_LRS",
        }
    }

    /// Whether this disk kind requires a premium-storage-capable VM size.
    pub fn requires_premium_capable_sku(&self) -> bool {
        matches!(
            self,
            DiskType::PremiumLrs
                | DiskType::PremiumZrs
                | DiskType::PremiumV2Lrs
                | DiskType::UltraSsdLrs
        )
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.azure_name())
    }
}

impl FromStr for DiskType {
    type Err = String;

    /// Accepts both the lowercase wire form and the ARM spelling,
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard_lrs" => Ok(DiskType::StandardLrs),
            "standard_ssd_lrs" | "standardssd_lrs" => Ok(DiskType::StandardSsdLrs),
            "standard_ssd_zrs" | "standardssd_zrs" => Ok(DiskType::StandardSsdZrs),
            "premium_lrs" => Ok(DiskType::PremiumLrs),
            "premium_zrs" => Ok(DiskType::PremiumZrs),
            "premium_v2_lrs" | "premiumv2_lrs" => Ok(DiskType::PremiumV2Lrs),
            "ultra_ssd_lrs" | "ultrassd_lrs" => Ok(DiskType::UltraSsdLrs),
            other => Err(format!("unknown disk type: {other}")),
        }
    }
}

/// Dedup identity for project-level validation:
/// `(subscription, resource group, project name)`.
///
/// Serializes as a single `sub/rg/project` string so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectKey {
    pub subscription_id: String,
    pub resource_group: String,
    pub project_name: String,
}

impl ProjectKey {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            project_name: project_name.into(),
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.subscription_id, self.resource_group, self.project_name
        )
    }
}

impl FromStr for ProjectKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(sub), Some(rg), Some(project)) if !sub.is_empty() && !rg.is_empty() && !project.is_empty() => {
                Ok(ProjectKey::new(sub, rg, project))
            }
            _ => Err(format!("malformed project key: {s}")),
        }
    }
}

impl Serialize for ProjectKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProjectKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// User-declared migration project context ("landing zone").
///
/// Produced by the input layer, immutable for the run. Field presence is
/// validated by [`ProjectDecl::validate`]; whether the named resources
/// actually exist is the job of the check library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDecl {
    pub subscription_id: String,
    pub resource_group: String,
    pub project_name: String,
    pub region: String,
    pub appliance_name: String,
    pub appliance_kind: ApplianceKind,
    pub cache_storage_account: String,
    pub cache_storage_resource_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_vault_name: Option<String>,
}

impl ProjectDecl {
    /// Dedup key for this declaration.
    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(&self.subscription_id, &self.resource_group, &self.project_name)
    }

    /// Checks that every required field is non-empty.
    pub fn validate(&self) -> Result<(), InputError> {
        let entity = format!("project {}", self.project_name);
        let required = [
            ("subscription_id", &self.subscription_id),
            ("resource_group", &self.resource_group),
            ("project_name", &self.project_name),
            ("region", &self.region),
            ("appliance_name", &self.appliance_name),
            ("cache_storage_account", &self.cache_storage_account),
            ("cache_storage_resource_group", &self.cache_storage_resource_group),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(InputError::MissingField { entity: entity.clone(), field });
            }
        }
        Ok(())
    }

    /// Whether two declarations with the same key disagree on any field.
    pub fn conflicts_with(&self, other: &ProjectDecl) -> bool {
        debug_assert_eq!(self.key(), other.key());
        self != other
    }
}

/// User-declared per-machine migration target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineDecl {
    /// Name of the machine in the source environment, when it differs
    /// from the target name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    pub target_name: String,
    pub target_region: String,
    pub target_subscription: String,
    pub target_resource_group: String,
    pub target_vnet: String,
    pub target_subnet: String,
    pub target_sku: String,
    pub target_disk_type: DiskType,
    /// Declared project association. Left empty when the caller wants the
    /// intelligent matcher to fill it in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<ProjectKey>,
}

impl MachineDecl {
    /// Name to look up in the discovery inventory: the declared source
    /// name when present, otherwise the target name.
    pub fn discovery_name(&self) -> &str {
        self.source_name.as_deref().unwrap_or(&self.target_name)
    }

    /// Checks that every required field is non-empty.
    pub fn validate(&self) -> Result<(), InputError> {
        let entity = format!("machine {}", self.target_name);
        let required = [
            ("target_name", &self.target_name),
            ("target_region", &self.target_region),
            ("target_subscription", &self.target_subscription),
            ("target_resource_group", &self.target_resource_group),
            ("target_vnet", &self.target_vnet),
            ("target_subnet", &self.target_subnet),
            ("target_sku", &self.target_sku),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(InputError::MissingField { entity: entity.clone(), field });
            }
        }
        Ok(())
    }
}
