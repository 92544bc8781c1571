use preflight_azure::CloudError;
use preflight_core::{CheckId, CheckOutcome, Severity};

/// Maps a cloud failure to an outcome.
///
/// `auth_severity` is what a 401/403 degrades to: `critical` when the
/// inaccessible scope is the subscription or project (fail-fast trigger),
/// `failure` for resource-level scopes.
pub(crate) fn from_cloud_error(
    check_id: CheckId,
    err: &CloudError,
    auth_severity: Severity,
) -> CheckOutcome {
    let outcome = match err {
        CloudError::NotFound { resource, .. } => {
            CheckOutcome::failure(check_id, format!("{resource} not found"))
        }
        CloudError::Forbidden { scope, .. } => {
            CheckOutcome::new(check_id, auth_severity, format!("access denied to {scope}"))
        }
        CloudError::Throttled { .. } => {
            CheckOutcome::failure(check_id, "provider throttled the request past the retry budget")
        }
        CloudError::Transient { status, .. } => CheckOutcome::failure(
            check_id,
            format!("provider failed with HTTP {status} past the retry budget"),
        ),
        CloudError::Malformed { reason, .. } => {
            CheckOutcome::failure(check_id, format!("unusable provider response: {reason}"))
        }
        CloudError::Network { reason } => {
            CheckOutcome::failure(check_id, format!("network failure: {reason}"))
        }
        CloudError::Credential { reason } => {
            CheckOutcome::new(check_id, auth_severity, format!("credential rejected: {reason}"))
        }
        CloudError::Cancelled => CheckOutcome::warning(check_id, "run cancelled"),
    };
    match err.request_id() {
        Some(request_id) => outcome.with_cause(request_id),
        None => outcome,
    }
}
