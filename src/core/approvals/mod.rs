use crate::core::auth::AuthUser;
use crate::core::config::{AllowedApprover, ApprovalRequirement, WorkflowConfiguration};
use crate::core::entities::{ApprovalToken, CardEntry};
use crate::core::placeholder;
use tracing::debug;

/// Tokens recorded for the key that have not been voided.
pub fn active_tokens<'a>(card: &'a CardEntry, key: &str) -> Vec<&'a ApprovalToken> {
    card.approval_tokens_for(key)
        .iter()
        .filter(|token| token.is_active())
        .collect()
}

/// The authoritative token for a key: the active token with the greatest
/// date. Returns `None` when no active token exists.
pub fn latest_token<'a>(card: &'a CardEntry, key: &str) -> Option<&'a ApprovalToken> {
    active_tokens(card, key)
        .into_iter()
        .max_by_key(|token| token.date)
}

/// An approval requirement is satisfied when the latest active token exists
/// and is not negative. A negative latest token overrides any earlier
/// positive one.
pub fn is_requirement_satisfied(card: &CardEntry, requirement: &ApprovalRequirement) -> bool {
    match latest_token(card, &requirement.key) {
        Some(token) => !token.is_negative,
        None => false,
    }
}

/// Whether the user may record an approval under `approval_key` for this
/// card. A `by` pattern that fails to resolve skips to the next allowed
/// rule instead of propagating.
pub fn can_user_approve(
    user: &AuthUser,
    approval_key: &str,
    card: &CardEntry,
    configuration: &WorkflowConfiguration,
) -> bool {
    let definition = match configuration.approval(approval_key) {
        Some(definition) => definition,
        None => {
            debug!(
                workflow = %configuration.workflow_id,
                key = approval_key,
                "approval key not defined in configuration"
            );
            return false;
        }
    };
    let context = placeholder::with_context(card);
    for allowed in &definition.allowed {
        let AllowedApprover::Basic { by } = allowed;
        let pattern = match by {
            None => return true,
            Some(pattern) => pattern,
        };
        match context.resolve(pattern) {
            Ok(approver) => {
                if approver == user.uid || approver.eq_ignore_ascii_case(&user.email) {
                    return true;
                }
            }
            Err(err) => {
                debug!(key = approval_key, pattern = %pattern, %err, "approver pattern did not resolve, trying next rule");
            }
        }
    }
    false
}
