//! Resource-ownership validation for inbound events
//!
//! An event is only acted upon when the envelope's resource owner and the
//! payload's tenant, client and player identifiers are all present.

use crate::amqp::messages::{EventEnvelope, PlayerQueuedPayload};
use crate::utils::is_present;

/// Identifier checked by the ownership validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnershipField {
    ResourceOwnerId,
    TenantId,
    ClientId,
    PlayerId,
}

impl std::fmt::Display for OwnershipField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnershipField::ResourceOwnerId => write!(f, "resourceOwnerId"),
            OwnershipField::TenantId => write!(f, "tenantId"),
            OwnershipField::ClientId => write!(f, "clientId"),
            OwnershipField::PlayerId => write!(f, "playerId"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Ownership invalid: {field} is missing or blank")]
pub struct OwnershipError {
    pub field: OwnershipField,
}

/// Payloads that carry a multi-tenancy scope
pub trait OwnedPayload {
    fn tenant_id(&self) -> &str;
    fn client_id(&self) -> &str;
    fn player_id(&self) -> &str;
}

impl OwnedPayload for PlayerQueuedPayload {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn player_id(&self) -> &str {
        &self.player_id
    }
}

/// Check the ownership identifiers of an envelope+payload pair.
///
/// Fields are checked in order resourceOwnerId, tenantId, clientId, playerId;
/// the first blank one is reported.
pub fn validate_ownership<P: OwnedPayload>(
    envelope: &EventEnvelope,
    payload: &P,
) -> Result<(), OwnershipError> {
    let checks = [
        (OwnershipField::ResourceOwnerId, envelope.resource_owner_id.as_str()),
        (OwnershipField::TenantId, payload.tenant_id()),
        (OwnershipField::ClientId, payload.client_id()),
        (OwnershipField::PlayerId, payload.player_id()),
    ];

    match checks.iter().find(|(_, value)| !is_present(value)) {
        Some((field, _)) => Err(OwnershipError { field: *field }),
        None => Ok(()),
    }
}
