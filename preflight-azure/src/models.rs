use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use preflight_core::ApplianceKind;

/// Subscription existence and display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// One region offered to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Resource group existence and the region of its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuCapability {
    pub name: String,
    pub value: String,
}

/// An active restriction on a VM size (e.g. not purchasable in a zone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuRestriction {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub restriction_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restriction_info: Option<SkuRestrictionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuRestrictionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
}

/// A VM size as offered in one region of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSku {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<SkuCapability>,
    #[serde(default)]
    pub restrictions: Vec<SkuRestriction>,
}

impl VmSku {
    fn capability(&self, name: &str) -> Option<&str> {
        self.capabilities
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.value.as_str())
    }

    /// Number of vCPUs this size provisions, when the provider reports it.
    pub fn vcpus(&self) -> Option<u32> {
        self.capability("vCPUs").and_then(|v| v.parse().ok())
    }

    /// Whether the size can attach premium (or ultra) storage.
    pub fn premium_io_supported(&self) -> bool {
        self.capability("PremiumIO")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Whether the provider has flagged this size as deprecated.
    pub fn is_deprecated(&self) -> bool {
        self.capability("DeprecationStatus")
            .map(|v| !v.is_empty() && !v.eq_ignore_ascii_case("none"))
            .unwrap_or(false)
    }

    /// Whether any restriction blocks provisioning. A restriction scoped
    /// to specific zones blocks only when every zone it lists is affected
    /// together with all other restrictions; a location-level restriction
    /// always blocks.
    pub fn has_blocking_restriction(&self) -> bool {
        self.restrictions.iter().any(|r| {
            match r.restriction_type.as_deref() {
                Some("Location") | None => true,
                Some("Zone") => false,
                Some(_) => true,
            }
        }) || self.all_zones_restricted()
    }

    /// Whether zone-scoped restrictions collectively cover every zone the
    /// provider mentions for this size.
    fn all_zones_restricted(&self) -> bool {
        let zone_restrictions: Vec<&SkuRestriction> = self
            .restrictions
            .iter()
            .filter(|r| r.restriction_type.as_deref() == Some("Zone"))
            .collect();
        if zone_restrictions.is_empty() {
            return false;
        }
        // Zones the provider offers for this size are not listed separately
        // in this response shape, so three zones is the provider-wide
        // maximum we compare against.
        let mut restricted: Vec<String> = zone_restrictions
            .iter()
            .flat_map(|r| {
                r.restriction_info
                    .as_ref()
                    .and_then(|i| i.zones.clone())
                    .unwrap_or_default()
            })
            .collect();
        restricted.sort();
        restricted.dedup();
        restricted.len() >= 3
    }
}

/// Subnet facts the vnet/subnet check needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetInfo {
    pub name: String,
    /// CIDR prefix, e.g. `10.1.0.0/24`.
    pub address_prefix: String,
    /// Service names of delegations attached to the subnet.
    pub delegations: Vec<String>,
    /// Count of IP configurations already placed in the subnet.
    pub used_ip_count: u32,
}

/// Storage account existence, region and kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageAccount {
    pub name: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Regional usage for one quota family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcpuUsage {
    pub current: i64,
    pub limit: i64,
}

impl VcpuUsage {
    pub fn available(&self) -> i64 {
        (self.limit - self.current).max(0)
    }
}

/// A migrate project visible in a resource group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrateProject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Reported health of a migration appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplianceHealth {
    Healthy,
    Degraded,
    Critical,
    #[default]
    Unknown,
}

/// A migration appliance registered with a migrate project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appliance {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ApplianceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub health: ApplianceHealth,
}

/// A source machine reported into a migrate project by an appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMachine {
    /// Provider-assigned id of the discovery record.
    pub id: String,
    /// Primary display name.
    pub name: String,
    /// Other names the appliance knows the machine by (BIOS name, FQDN).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// Present when replication has already been enabled for the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_state: Option<String>,
}

impl DiscoveredMachine {
    fn known_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Case-insensitive exact match against any known name.
    pub fn matches_name(&self, candidate: &str) -> bool {
        self.known_names().any(|n| n.eq_ignore_ascii_case(candidate))
    }

    /// Case-insensitive substring match against any known name.
    pub fn name_contains(&self, fragment: &str) -> bool {
        let fragment = fragment.to_ascii_lowercase();
        self.known_names().any(|n| n.to_ascii_lowercase().contains(&fragment))
    }
}
