use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use gatepass_core::{InvitationId, UserId};

use crate::Event;

/// An audit event ready to be appended (not yet assigned a sequence number).
///
/// Built from a typed domain event with [`UncommittedEvent::from_typed`], which
/// captures the metadata the audit trail needs (type, version, actor,
/// description, payload) without the store knowing the domain types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub invitation_id: InvitationId,

    pub event_type: String,
    pub event_version: u32,
    pub description: String,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,

    pub payload: Option<JsonValue>,
}

/// A persisted audit event.
///
/// Sequence numbers are assigned by the store during append and are
/// monotonically increasing per invitation (1, 2, 3, ...), with no gaps while
/// the invitation exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub invitation_id: InvitationId,

    /// Monotonically increasing position in the invitation's audit trail.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub description: String,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,

    pub payload: Option<JsonValue>,
}

impl UncommittedEvent {
    /// Wrap a typed domain event for the given invitation.
    pub fn from_typed<E>(invitation_id: InvitationId, event_id: Uuid, event: &E) -> Self
    where
        E: Event,
    {
        Self {
            event_id,
            invitation_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            description: event.description(),
            actor_id: event.actor_id(),
            occurred_at: event.occurred_at(),
            payload: event.payload(),
        }
    }

    /// Promote to a stored record at the given stream position.
    pub fn into_stored(self, sequence_number: u64) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            invitation_id: self.invitation_id,
            sequence_number,
            event_type: self.event_type,
            event_version: self.event_version,
            description: self.description,
            actor_id: self.actor_id,
            occurred_at: self.occurred_at,
            payload: self.payload,
        }
    }
}
