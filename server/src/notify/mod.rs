//! Outbound notification sink.
//!
//! Delivery (e-mail, in-app) lives outside this service; the core only emits
//! fire-and-forget events at delegation lifecycle points. Implementations must
//! never fail the calling mutation; there is nothing to propagate.

use std::fmt::Debug;

use crate::delegation::PermissionDelegation;

/// Sink for permission lifecycle notifications.
pub trait Notifier: Send + Sync + Debug {
    fn delegation_created(&self, delegation: &PermissionDelegation);
    fn delegation_revoked(&self, delegation: &PermissionDelegation);
    fn delegation_expired(&self, delegation: &PermissionDelegation);
}

/// Default sink: structured log events on the notification target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn delegation_created(&self, delegation: &PermissionDelegation) {
        tracing::info!(
            target: "brigade::notify",
            delegation_id = %delegation.id,
            delegatee = %delegation.delegatee_id,
            slug = %delegation.permission_slug,
            valid_until = %delegation.valid_until,
            "Delegation created"
        );
    }

    fn delegation_revoked(&self, delegation: &PermissionDelegation) {
        tracing::info!(
            target: "brigade::notify",
            delegation_id = %delegation.id,
            delegatee = %delegation.delegatee_id,
            slug = %delegation.permission_slug,
            "Delegation revoked"
        );
    }

    fn delegation_expired(&self, delegation: &PermissionDelegation) {
        tracing::info!(
            target: "brigade::notify",
            delegation_id = %delegation.id,
            delegatee = %delegation.delegatee_id,
            slug = %delegation.permission_slug,
            valid_until = %delegation.valid_until,
            "Delegation expired"
        );
    }
}
