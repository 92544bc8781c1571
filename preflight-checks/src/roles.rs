use std::collections::BTreeSet;

/// Well-known built-in role definitions, so configuration can name roles
/// the way operators do while ARM reports definition ids.
const BUILTIN_ROLES: &[(&str, &str)] = &[
    ("Owner", "8e3af657-a8ff-443c-a75c-2fe8c4bcb635"),
    ("Contributor", "b24988ac-6180-42a0-ab88-20f7382dd24c"),
    ("Reader", "acdd72a7-3385-48ef-bd42-f606fba81ae7"),
    ("Virtual Machine Contributor", "9980e02c-c2be-4d73-94e8-173b1dc7cf3c"),
    ("Network Contributor", "4d97b98b-1d4f-4787-a291-c67834d212e7"),
    ("Storage Account Contributor", "17d1049b-9a84-46fb-8f53-869881c3d3ab"),
];

fn looks_like_definition_id(role: &str) -> bool {
    // Bare GUID or a full roleDefinitions resource path.
    role.contains('/') || (role.len() == 36 && role.bytes().filter(|b| *b == b'-').count() == 4)
}

/// Resolves a configured role (name, GUID, or full definition path) to the
/// id fragment assignments are matched against.
fn definition_fragment(role: &str) -> String {
    if looks_like_definition_id(role) {
        return role.rsplit('/').next().unwrap_or(role).to_ascii_lowercase();
    }
    BUILTIN_ROLES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(role))
        .map(|(_, guid)| (*guid).to_string())
        // Unknown custom role names can only match literally.
        .unwrap_or_else(|| role.to_ascii_lowercase())
}

/// Whether any of the required roles appears among the assigned
/// role-definition ids.
pub(crate) fn holds_any_role(assigned: &BTreeSet<String>, required: &[String]) -> bool {
    required.iter().any(|role| {
        let fragment = definition_fragment(role);
        assigned
            .iter()
            .any(|id| id.to_ascii_lowercase().ends_with(&fragment))
    })
}
