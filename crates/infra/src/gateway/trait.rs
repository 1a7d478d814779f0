use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use gatepass_core::{InvitationId, LocationId, PurposeId, TemplateId, UserId, VisitorId};
use gatepass_events::{StoredEvent, UncommittedEvent};
use gatepass_invitations::{Invitation, InvitationNumber};

use super::records::{LocationRecord, PurposeRecord, TemplateRecord, UserRecord, VisitorRecord};

/// Persistence operation error.
///
/// These are **infrastructure errors** (storage, constraints) as opposed to
/// domain errors (validation, state legality).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (e.g. duplicate invitation number).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The invitation number is already taken. Callers may retry with a
    /// fresh number.
    #[error("invitation number already taken: {0}")]
    NumberTaken(String),

    /// A write targeted a row that does not exist.
    #[error("record not found: {0}")]
    Missing(String),

    /// A stored row could not be turned back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Connection, lock or driver failure.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Read side of the persistence boundary plus the entry point to atomic writes.
///
/// Reads outside a unit of work observe committed data only. Everything that
/// mutates goes through [`UnitOfWork`].
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    type Tx: UnitOfWork;

    /// Open an atomic unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn invitation(&self, id: InvitationId) -> Result<Option<Invitation>, StoreError>;

    async fn invitation_by_number(
        &self,
        number: &InvitationNumber,
    ) -> Result<Option<Invitation>, StoreError>;

    async fn invitation_by_qr(&self, payload: &str) -> Result<Option<Invitation>, StoreError>;

    /// Whether any invitation already carries `number`.
    async fn number_exists(&self, number: &InvitationNumber) -> Result<bool, StoreError>;

    /// Audit trail of an invitation in sequence order. Empty if it has none.
    async fn events(&self, id: InvitationId) -> Result<Vec<StoredEvent>, StoreError>;

    async fn user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn visitor(&self, id: VisitorId) -> Result<Option<VisitorRecord>, StoreError>;

    async fn purpose(&self, id: PurposeId) -> Result<Option<PurposeRecord>, StoreError>;

    async fn location(&self, id: LocationId) -> Result<Option<LocationRecord>, StoreError>;

    async fn template(&self, id: TemplateId) -> Result<Option<TemplateRecord>, StoreError>;

    /// Recompute `visit_count` / `last_visit_at` from the visitor's check-ins.
    ///
    /// Runs in its own short write, outside any workflow unit of work.
    async fn refresh_visitor_statistics(&self, visitor_id: VisitorId) -> Result<(), StoreError>;
}

/// One atomic unit of work.
///
/// Nothing written through a unit is visible to other readers until
/// [`UnitOfWork::commit`] succeeds. Dropping a unit without committing rolls it
/// back, which is also what happens when the owning future is cancelled.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Reserve the surrogate id for a new invitation.
    async fn next_invitation_id(&mut self) -> Result<InvitationId, StoreError>;

    /// Load an invitation and lock it until the unit ends.
    async fn invitation_for_update(
        &mut self,
        id: InvitationId,
    ) -> Result<Option<Invitation>, StoreError>;

    /// Insert a new invitation. A duplicate number fails with
    /// [`StoreError::NumberTaken`], any other duplicate with
    /// [`StoreError::UniqueViolation`].
    async fn insert_invitation(&mut self, invitation: &Invitation) -> Result<(), StoreError>;

    async fn update_invitation(&mut self, invitation: &Invitation) -> Result<(), StoreError>;

    /// Delete an invitation together with its audit trail.
    ///
    /// Returns the number of events removed.
    async fn delete_invitation(&mut self, id: InvitationId) -> Result<u64, StoreError>;

    /// Append to the invitation's audit trail, assigning the next sequence number.
    async fn append_event(&mut self, event: UncommittedEvent) -> Result<StoredEvent, StoreError>;

    async fn increment_template_usage(
        &mut self,
        template_id: TemplateId,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
