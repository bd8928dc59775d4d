pub mod command;
pub mod context;
pub mod executor;
pub mod manifest;

use crate::error::PortalError;

/// Validates that `value` is a DNS-1123 label: lowercase alphanumerics and
/// `-`, 1–63 chars, starting and ending alphanumeric. Everything we embed as
/// a resource name, namespace, or cluster alias must pass this, so user data
/// can never smuggle flag-like or shell-like syntax into an argument vector.
pub(crate) fn validate_dns_label(value: &str, what: &str) -> Result<(), PortalError> {
    let ok = !value.is_empty()
        && value.len() <= 63
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if ok {
        Ok(())
    } else {
        Err(PortalError::Validation(format!(
            "{what} must be a DNS-1123 label (lowercase alphanumerics and '-'): {value:?}"
        )))
    }
}
