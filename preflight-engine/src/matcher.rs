//! Intelligent matcher: associates machines declared without a project to
//! the best-matching declared project.
//!
//! Scoring, per candidate project: `+10` for a case-insensitive exact name
//! match in the project's discovery inventory, `+5` for a substring match,
//! `+3` when the machine's target region equals the project region, `+2`
//! when a name-matched discovery record carries an IP inside the machine's
//! declared subnet. Ties break toward the lexicographically smallest
//! project key; a machine scoring zero everywhere stays unassigned.
//!
//! The matcher never fails: every provider error just removes that
//! evidence from the score.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use preflight_azure::{CloudReads, DiscoveredMachine};
use preflight_core::{MachineDecl, ProjectDecl, ProjectKey};

const SCORE_EXACT_NAME: i32 = 10;
const SCORE_SUBSTRING_NAME: i32 = 5;
const SCORE_REGION: i32 = 3;
const SCORE_SUBNET_IP: i32 = 2;

/// Fills `project_key` on machines missing one, where some candidate
/// scores positive.
pub(crate) async fn assign_projects(
    machines: &mut [MachineDecl],
    projects: &BTreeMap<ProjectKey, ProjectDecl>,
    cloud: &dyn CloudReads,
) {
    for machine in machines.iter_mut().filter(|m| m.project_key.is_none()) {
        let mut best: Option<(i32, ProjectKey)> = None;
        for (key, project) in projects {
            let score = score_candidate(machine, project, cloud).await;
            tracing::debug!(machine = %machine.target_name, project = %key, score, "matcher scored candidate");
            // Strictly-greater keeps the earliest (smallest) key on ties.
            if score > 0 && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, key.clone()));
            }
        }
        match best {
            Some((score, key)) => {
                tracing::info!(
                    machine = %machine.target_name,
                    project = %key,
                    score,
                    "matcher associated machine to project"
                );
                machine.project_key = Some(key);
            }
            None => {
                tracing::warn!(
                    machine = %machine.target_name,
                    "no declared project matches this machine"
                );
            }
        }
    }
}

async fn score_candidate(
    machine: &MachineDecl,
    project: &ProjectDecl,
    cloud: &dyn CloudReads,
) -> i32 {
    let mut score = 0;
    let lookup_name = machine.discovery_name();

    let name_matched: Option<DiscoveredMachine> = match cloud
        .list_discovered_machines(
            &project.subscription_id,
            &project.resource_group,
            &project.project_name,
        )
        .await
    {
        Ok(discovered) => {
            if let Some(exact) = discovered.iter().find(|m| m.matches_name(lookup_name)) {
                score += SCORE_EXACT_NAME;
                Some(exact.clone())
            } else if let Some(partial) = discovered.iter().find(|m| m.name_contains(lookup_name))
            {
                score += SCORE_SUBSTRING_NAME;
                Some(partial.clone())
            } else {
                None
            }
        }
        Err(err) => {
            tracing::debug!(project = %project.key(), error = %err, "discovery unavailable for scoring");
            None
        }
    };

    if region_matches(&machine.target_region, &project.region) {
        score += SCORE_REGION;
    }

    if let Some(record) = name_matched {
        if record_ip_in_declared_subnet(machine, &record, cloud).await {
            score += SCORE_SUBNET_IP;
        }
    }

    score
}

async fn record_ip_in_declared_subnet(
    machine: &MachineDecl,
    record: &DiscoveredMachine,
    cloud: &dyn CloudReads,
) -> bool {
    if record.ip_addresses.is_empty() {
        return false;
    }
    let subnet = match cloud
        .get_subnet(
            &machine.target_subscription,
            &machine.target_resource_group,
            &machine.target_vnet,
            &machine.target_subnet,
        )
        .await
    {
        Ok(subnet) => subnet,
        Err(_) => return false,
    };
    record
        .ip_addresses
        .iter()
        .any(|ip| ip_in_prefix(ip, &subnet.address_prefix))
}

fn region_matches(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    normalize(a) == normalize(b)
}

fn ip_in_prefix(ip: &str, prefix: &str) -> bool {
    let Some((network, len)) = prefix.split_once('/') else {
        return false;
    };
    let (Ok(ip), Ok(network), Ok(len)) = (
        ip.parse::<Ipv4Addr>(),
        network.parse::<Ipv4Addr>(),
        len.parse::<u32>(),
    ) else {
        return false;
    };
    if len > 32 {
        return false;
    }
    let mask: u32 = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_prefix_membership() {
        assert!(ip_in_prefix("10.1.0.12", "10.1.0.0/24"));
        assert!(!ip_in_prefix("10.1.1.12", "10.1.0.0/24"));
        assert!(ip_in_prefix("10.200.0.1", "10.0.0.0/8"));
        assert!(ip_in_prefix("1.2.3.4", "0.0.0.0/0"));
        assert!(!ip_in_prefix("fe80::1", "10.0.0.0/8"));
        assert!(!ip_in_prefix("10.0.0.1", "10.0.0.0/40"));
    }
}
