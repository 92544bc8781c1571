use std::collections::BTreeMap;

use preflight_azure::VmSku;
use preflight_core::DiskType;

/// Verdict of the disk-support lookup for one SKU.
pub(crate) enum DiskSupport {
    Supported,
    Unsupported { reason: String },
    /// Neither the configured table nor the SKU snapshot can answer.
    Unknown { reason: String },
}

/// Answers "does this VM size take this disk kind?" from the configured
/// table when one is supplied, otherwise from the size's own advertised
/// capabilities.
pub(crate) fn disk_support(
    table: Option<&BTreeMap<String, Vec<DiskType>>>,
    sku_name: &str,
    sku: Option<&VmSku>,
    disk: DiskType,
) -> DiskSupport {
    if let Some(table) = table {
        return support_from_table(table, sku_name, disk);
    }
    support_from_capabilities(sku_name, sku, disk)
}

/// Longest-prefix match of the SKU name against the configured table.
fn support_from_table(
    table: &BTreeMap<String, Vec<DiskType>>,
    sku_name: &str,
    disk: DiskType,
) -> DiskSupport {
    let lowered = sku_name.to_ascii_lowercase();
    let entry = table
        .iter()
        .filter(|(prefix, _)| lowered.starts_with(&prefix.to_ascii_lowercase()))
        .max_by_key(|(prefix, _)| prefix.len());
    match entry {
        Some((prefix, kinds)) if kinds.contains(&disk) => {
            tracing::debug!(sku = sku_name, family = %prefix, disk = %disk, "disk kind allowed by table");
            DiskSupport::Supported
        }
        Some((prefix, _)) => DiskSupport::Unsupported {
            reason: format!("{disk} is not listed for SKU family {prefix}"),
        },
        None => DiskSupport::Unknown {
            reason: format!("no disk-support entry covers SKU {sku_name}"),
        },
    }
}

fn support_from_capabilities(
    sku_name: &str,
    sku: Option<&VmSku>,
    disk: DiskType,
) -> DiskSupport {
    let Some(sku) = sku else {
        return DiskSupport::Unknown {
            reason: format!("SKU {sku_name} is not offered here, disk support cannot be judged"),
        };
    };
    match disk {
        DiskType::UltraSsdLrs => {
            let ultra = sku
                .capabilities
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case("UltraSSDAvailable")
                    && c.value.eq_ignore_ascii_case("true"));
            if ultra {
                DiskSupport::Supported
            } else {
                DiskSupport::Unsupported {
                    reason: format!("{} does not offer ultra disks", sku.name),
                }
            }
        }
        _ if disk.requires_premium_capable_sku() => {
            if sku.premium_io_supported() {
                DiskSupport::Supported
            } else {
                DiskSupport::Unsupported {
                    reason: format!("{} cannot attach premium storage", sku.name),
                }
            }
        }
        _ => DiskSupport::Supported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_azure::SkuCapability;

    fn sku(name: &str, capabilities: &[(&str, &str)]) -> VmSku {
        VmSku {
            name: name.into(),
            resource_type: Some("virtualMachines".into()),
            capabilities: capabilities
                .iter()
                .map(|(n, v)| SkuCapability { name: (*n).into(), value: (*v).into() })
                .collect(),
            restrictions: vec![],
        }
    }

    #[test]
    fn capabilities_gate_premium_disks() {
        let premium_capable = sku("Standard_D2s_v5", &[("PremiumIO", "True")]);
        assert!(matches!(
            disk_support(None, "Standard_D2s_v5", Some(&premium_capable), DiskType::PremiumLrs),
            DiskSupport::Supported
        ));

        let standard_only = sku("Standard_D2_v5", &[("PremiumIO", "False")]);
        assert!(matches!(
            disk_support(None, "Standard_D2_v5", Some(&standard_only), DiskType::PremiumLrs),
            DiskSupport::Unsupported { .. }
        ));
        assert!(matches!(
            disk_support(None, "Standard_D2_v5", Some(&standard_only), DiskType::StandardLrs),
            DiskSupport::Supported
        ));
    }

    #[test]
    fn ultra_requires_explicit_capability() {
        let with_ultra =
            sku("Standard_E4s_v5", &[("PremiumIO", "True"), ("UltraSSDAvailable", "True")]);
        assert!(matches!(
            disk_support(None, "Standard_E4s_v5", Some(&with_ultra), DiskType::UltraSsdLrs),
            DiskSupport::Supported
        ));

        let without = sku("Standard_D2s_v5", &[("PremiumIO", "True")]);
        assert!(matches!(
            disk_support(None, "Standard_D2s_v5", Some(&without), DiskType::UltraSsdLrs),
            DiskSupport::Unsupported { .. }
        ));
    }

    #[test]
    fn unknown_sku_is_inconclusive() {
        assert!(matches!(
            disk_support(None, "Standard_X1", None, DiskType::PremiumLrs),
            DiskSupport::Unknown { .. }
        ));
    }

    #[test]
    fn table_lookup_uses_longest_prefix() {
        let table = BTreeMap::from([
            ("Standard_D".to_string(), vec![DiskType::StandardLrs]),
            (
                "Standard_D2s".to_string(),
                vec![DiskType::StandardLrs, DiskType::PremiumLrs],
            ),
        ]);
        assert!(matches!(
            disk_support(Some(&table), "Standard_D2s_v5", None, DiskType::PremiumLrs),
            DiskSupport::Supported
        ));
        assert!(matches!(
            disk_support(Some(&table), "Standard_D4_v5", None, DiskType::PremiumLrs),
            DiskSupport::Unsupported { .. }
        ));
        assert!(matches!(
            disk_support(Some(&table), "Standard_M64", None, DiskType::PremiumLrs),
            DiskSupport::Unknown { .. }
        ));
    }
}
