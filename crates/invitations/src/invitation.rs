use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use gatepass_core::{Aggregate, AggregateRoot, DomainError, InvitationId, UserId};
use gatepass_events::{Command, Event};

use crate::details::InvitationDetails;
use crate::number::InvitationNumber;
use crate::status::{InitialStatus, InvitationStatus};

/// Full persisted state of an invitation.
///
/// This is what gateways store and load. `status` is the *stored* status; the
/// lazily evaluated `Expired` status is never written here on its own, use
/// [`Invitation::effective_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationSnapshot {
    pub id: InvitationId,
    pub number: InvitationNumber,
    pub status: InvitationStatus,
    /// Number of transitions applied; equals the audit trail length.
    pub version: u64,
    pub details: InvitationDetails,
    pub qr_payload: Option<String>,

    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,

    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UserId>,
    pub approval_comments: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UserId>,
    pub rejection_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancellation_reason: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_in_by: Option<UserId>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub checked_out_by: Option<UserId>,
}

/// Aggregate root: Invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    state: InvitationSnapshot,
}

impl Invitation {
    /// Validate the creation request and produce the new aggregate together
    /// with its `InvitationCreated` event (version 1).
    pub fn create(cmd: &CreateInvitation) -> Result<(Self, InvitationEvent), DomainError> {
        cmd.details.validate()?;

        let created = InvitationCreated {
            invitation_id: cmd.invitation_id,
            number: cmd.number.clone(),
            status: cmd.initial_status.into(),
            details: cmd.details.clone(),
            actor_id: cmd.actor_id,
            occurred_at: cmd.occurred_at,
        };

        let mut invitation = Self::from_created(&created);
        let event = InvitationEvent::Created(created);
        invitation.apply(&event);
        Ok((invitation, event))
    }

    /// Rebuild an aggregate from persisted state, re-checking the invariants
    /// a well-behaved store must already hold.
    pub fn restore(snapshot: InvitationSnapshot) -> Result<Self, DomainError> {
        snapshot.details.schedule.validate()?;
        if snapshot.details.expected_visitor_count < 1 {
            return Err(DomainError::invariant(
                "stored invitation has an expected visitor count below 1",
            ));
        }
        if snapshot.status == InvitationStatus::Expired {
            return Err(DomainError::invariant(
                "expired is derived and must not be stored",
            ));
        }
        Ok(Self { state: snapshot })
    }

    fn from_created(e: &InvitationCreated) -> Self {
        Self {
            state: InvitationSnapshot {
                id: e.invitation_id,
                number: e.number.clone(),
                status: e.status,
                version: 0,
                details: e.details.clone(),
                qr_payload: None,
                created_at: e.occurred_at,
                created_by: e.actor_id,
                updated_at: e.occurred_at,
                updated_by: e.actor_id,
                submitted_at: e.status.is_pending_approval().then_some(e.occurred_at),
                approved_at: None,
                approved_by: None,
                approval_comments: None,
                rejected_at: None,
                rejected_by: None,
                rejection_reason: None,
                cancelled_at: None,
                cancelled_by: None,
                cancellation_reason: None,
                checked_in_at: None,
                checked_in_by: None,
                checked_out_at: None,
                checked_out_by: None,
            },
        }
    }

    pub fn invitation_id(&self) -> InvitationId {
        self.state.id
    }

    pub fn number(&self) -> &InvitationNumber {
        &self.state.number
    }

    /// Stored status, ignoring lazy expiry.
    pub fn status(&self) -> InvitationStatus {
        self.state.status
    }

    /// Status as observed at `at`: an invitation whose schedule ended before
    /// the visitor arrived reads as `Expired`.
    pub fn effective_status(&self, at: DateTime<Utc>) -> InvitationStatus {
        if self.state.status.can_expire() && self.state.details.schedule.has_ended(at) {
            InvitationStatus::Expired
        } else {
            self.state.status
        }
    }

    pub fn can_be_cancelled(&self, at: DateTime<Utc>) -> bool {
        self.effective_status(at).can_be_cancelled()
    }

    pub fn is_deletable(&self) -> bool {
        self.state.status.is_deletable()
    }

    pub fn details(&self) -> &InvitationDetails {
        &self.state.details
    }

    pub fn qr_payload(&self) -> Option<&str> {
        self.state.qr_payload.as_deref()
    }

    pub fn snapshot(&self) -> &InvitationSnapshot {
        &self.state
    }

    pub fn into_snapshot(self) -> InvitationSnapshot {
        self.state
    }

    /// Attach the QR payload. It is write-once.
    pub fn assign_qr_payload(&mut self, payload: impl Into<String>) -> Result<(), DomainError> {
        if self.state.qr_payload.is_some() {
            return Err(DomainError::invariant("QR payload is already assigned"));
        }
        let payload = payload.into();
        if payload.trim().is_empty() {
            return Err(DomainError::validation("QR payload must not be empty"));
        }
        self.state.qr_payload = Some(payload);
        Ok(())
    }
}

impl AggregateRoot for Invitation {
    type Id = InvitationId;

    fn id(&self) -> &Self::Id {
        &self.state.id
    }

    fn version(&self) -> u64 {
        self.state.version
    }
}

/// Command: CreateInvitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvitation {
    pub invitation_id: InvitationId,
    pub number: InvitationNumber,
    pub details: InvitationDetails,
    pub initial_status: InitialStatus,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitInvitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitInvitation {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveInvitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveInvitation {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub comments: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectInvitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectInvitation {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvitation {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CheckInVisitor. The actor is the front-desk operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInVisitor {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CheckOutVisitor. The actor is the front-desk operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutVisitor {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Lifecycle commands on an existing invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationCommand {
    Submit(SubmitInvitation),
    Approve(ApproveInvitation),
    Reject(RejectInvitation),
    Cancel(CancelInvitation),
    CheckIn(CheckInVisitor),
    CheckOut(CheckOutVisitor),
}

impl InvitationCommand {
    pub fn invitation_id(&self) -> InvitationId {
        match self {
            InvitationCommand::Submit(c) => c.invitation_id,
            InvitationCommand::Approve(c) => c.invitation_id,
            InvitationCommand::Reject(c) => c.invitation_id,
            InvitationCommand::Cancel(c) => c.invitation_id,
            InvitationCommand::CheckIn(c) => c.invitation_id,
            InvitationCommand::CheckOut(c) => c.invitation_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InvitationCommand::Submit(_) => "submit",
            InvitationCommand::Approve(_) => "approve",
            InvitationCommand::Reject(_) => "reject",
            InvitationCommand::Cancel(_) => "cancel",
            InvitationCommand::CheckIn(_) => "check_in",
            InvitationCommand::CheckOut(_) => "check_out",
        }
    }
}

impl Command for InvitationCommand {
    fn actor_id(&self) -> UserId {
        match self {
            InvitationCommand::Submit(c) => c.actor_id,
            InvitationCommand::Approve(c) => c.actor_id,
            InvitationCommand::Reject(c) => c.actor_id,
            InvitationCommand::Cancel(c) => c.actor_id,
            InvitationCommand::CheckIn(c) => c.actor_id,
            InvitationCommand::CheckOut(c) => c.actor_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvitationCommand::Submit(c) => c.occurred_at,
            InvitationCommand::Approve(c) => c.occurred_at,
            InvitationCommand::Reject(c) => c.occurred_at,
            InvitationCommand::Cancel(c) => c.occurred_at,
            InvitationCommand::CheckIn(c) => c.occurred_at,
            InvitationCommand::CheckOut(c) => c.occurred_at,
        }
    }
}

impl Command for CreateInvitation {
    fn actor_id(&self) -> UserId {
        self.actor_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Event: InvitationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationCreated {
    pub invitation_id: InvitationId,
    pub number: InvitationNumber,
    pub status: InvitationStatus,
    pub details: InvitationDetails,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvitationSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationSubmitted {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvitationApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationApproved {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub comments: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvitationRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationRejected {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvitationCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationCancelled {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub reason: Option<String>,
    pub previous_status: InvitationStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VisitorCheckedIn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorCheckedIn {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VisitorCheckedOut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorCheckedOut {
    pub invitation_id: InvitationId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationEvent {
    Created(InvitationCreated),
    Submitted(InvitationSubmitted),
    Approved(InvitationApproved),
    Rejected(InvitationRejected),
    Cancelled(InvitationCancelled),
    CheckedIn(VisitorCheckedIn),
    CheckedOut(VisitorCheckedOut),
}

impl InvitationEvent {
    pub fn invitation_id(&self) -> InvitationId {
        match self {
            InvitationEvent::Created(e) => e.invitation_id,
            InvitationEvent::Submitted(e) => e.invitation_id,
            InvitationEvent::Approved(e) => e.invitation_id,
            InvitationEvent::Rejected(e) => e.invitation_id,
            InvitationEvent::Cancelled(e) => e.invitation_id,
            InvitationEvent::CheckedIn(e) => e.invitation_id,
            InvitationEvent::CheckedOut(e) => e.invitation_id,
        }
    }
}

impl Event for InvitationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvitationEvent::Created(_) => "invitation.created",
            InvitationEvent::Submitted(_) => "invitation.submitted",
            InvitationEvent::Approved(_) => "invitation.approved",
            InvitationEvent::Rejected(_) => "invitation.rejected",
            InvitationEvent::Cancelled(_) => "invitation.cancelled",
            InvitationEvent::CheckedIn(_) => "invitation.checked_in",
            InvitationEvent::CheckedOut(_) => "invitation.checked_out",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvitationEvent::Created(e) => e.occurred_at,
            InvitationEvent::Submitted(e) => e.occurred_at,
            InvitationEvent::Approved(e) => e.occurred_at,
            InvitationEvent::Rejected(e) => e.occurred_at,
            InvitationEvent::Cancelled(e) => e.occurred_at,
            InvitationEvent::CheckedIn(e) => e.occurred_at,
            InvitationEvent::CheckedOut(e) => e.occurred_at,
        }
    }

    fn actor_id(&self) -> UserId {
        match self {
            InvitationEvent::Created(e) => e.actor_id,
            InvitationEvent::Submitted(e) => e.actor_id,
            InvitationEvent::Approved(e) => e.actor_id,
            InvitationEvent::Rejected(e) => e.actor_id,
            InvitationEvent::Cancelled(e) => e.actor_id,
            InvitationEvent::CheckedIn(e) => e.actor_id,
            InvitationEvent::CheckedOut(e) => e.actor_id,
        }
    }

    fn description(&self) -> String {
        match self {
            InvitationEvent::Created(e) => {
                format!("Invitation {} created as {}", e.number, e.status)
            }
            InvitationEvent::Submitted(_) => "Invitation submitted for approval".to_string(),
            InvitationEvent::Approved(_) => "Invitation approved".to_string(),
            InvitationEvent::Rejected(e) => format!("Invitation rejected: {}", e.reason),
            InvitationEvent::Cancelled(e) => match &e.reason {
                Some(reason) => format!("Invitation cancelled: {reason}"),
                None => "Invitation cancelled".to_string(),
            },
            InvitationEvent::CheckedIn(_) => "Visitor checked in".to_string(),
            InvitationEvent::CheckedOut(_) => "Visitor checked out".to_string(),
        }
    }

    fn payload(&self) -> Option<JsonValue> {
        match self {
            InvitationEvent::Created(e) => Some(serde_json::json!({
                "number": e.number,
                "status": e.status,
                "visitor_id": e.details.visitor_id,
                "host_id": e.details.host_id,
                "template_id": e.details.template_id,
                "scheduled_start": e.details.schedule.start,
                "scheduled_end": e.details.schedule.end,
            })),
            InvitationEvent::Approved(e) => e
                .comments
                .as_ref()
                .map(|comments| serde_json::json!({ "comments": comments })),
            InvitationEvent::Rejected(e) => Some(serde_json::json!({ "reason": e.reason })),
            InvitationEvent::Cancelled(e) => Some(serde_json::json!({
                "reason": e.reason,
                "previous_status": e.previous_status,
            })),
            InvitationEvent::Submitted(_)
            | InvitationEvent::CheckedIn(_)
            | InvitationEvent::CheckedOut(_) => None,
        }
    }
}

impl Aggregate for Invitation {
    type Command = InvitationCommand;
    type Event = InvitationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        let state = &mut self.state;
        match event {
            InvitationEvent::Created(e) => {
                let version = state.version;
                *state = Self::from_created(e).state;
                state.version = version;
            }
            InvitationEvent::Submitted(e) => {
                state.status = InvitationStatus::Submitted;
                state.submitted_at = Some(e.occurred_at);
                touch(state, e.actor_id, e.occurred_at);
            }
            InvitationEvent::Approved(e) => {
                state.status = InvitationStatus::Approved;
                state.approved_at = Some(e.occurred_at);
                state.approved_by = Some(e.actor_id);
                state.approval_comments = e.comments.clone();
                touch(state, e.actor_id, e.occurred_at);
            }
            InvitationEvent::Rejected(e) => {
                state.status = InvitationStatus::Rejected;
                state.rejected_at = Some(e.occurred_at);
                state.rejected_by = Some(e.actor_id);
                state.rejection_reason = Some(e.reason.clone());
                touch(state, e.actor_id, e.occurred_at);
            }
            InvitationEvent::Cancelled(e) => {
                state.status = InvitationStatus::Cancelled;
                state.cancelled_at = Some(e.occurred_at);
                state.cancelled_by = Some(e.actor_id);
                state.cancellation_reason = e.reason.clone();
                touch(state, e.actor_id, e.occurred_at);
            }
            InvitationEvent::CheckedIn(e) => {
                state.status = InvitationStatus::CheckedIn;
                state.checked_in_at = Some(e.occurred_at);
                state.checked_in_by = Some(e.actor_id);
                touch(state, e.actor_id, e.occurred_at);
            }
            InvitationEvent::CheckedOut(e) => {
                state.status = InvitationStatus::CheckedOut;
                state.checked_out_at = Some(e.occurred_at);
                state.checked_out_by = Some(e.actor_id);
                touch(state, e.actor_id, e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        state.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Self::Event, Self::Error> {
        self.ensure_invitation_id(command.invitation_id())?;
        let current = self.effective_status(command.occurred_at());
        if current == InvitationStatus::Expired {
            return Err(DomainError::invalid_state(format!(
                "cannot {} invitation {}: it expired at {}",
                command.name(),
                self.state.number,
                self.state.details.schedule.end.to_rfc3339()
            )));
        }

        match command {
            InvitationCommand::Submit(cmd) => self.handle_submit(current, cmd),
            InvitationCommand::Approve(cmd) => self.handle_approve(current, cmd),
            InvitationCommand::Reject(cmd) => self.handle_reject(current, cmd),
            InvitationCommand::Cancel(cmd) => self.handle_cancel(current, cmd),
            InvitationCommand::CheckIn(cmd) => self.handle_check_in(current, cmd),
            InvitationCommand::CheckOut(cmd) => self.handle_check_out(current, cmd),
        }
    }
}

fn touch(state: &mut InvitationSnapshot, actor_id: UserId, at: DateTime<Utc>) {
    state.updated_at = at;
    state.updated_by = actor_id;
}

fn normalized(text: Option<&String>) -> Option<String> {
    text.map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl Invitation {
    fn ensure_invitation_id(&self, invitation_id: InvitationId) -> Result<(), DomainError> {
        if self.state.id != invitation_id {
            return Err(DomainError::invariant("invitation_id mismatch"));
        }
        Ok(())
    }

    fn handle_submit(
        &self,
        current: InvitationStatus,
        cmd: &SubmitInvitation,
    ) -> Result<InvitationEvent, DomainError> {
        if current != InvitationStatus::Draft {
            return Err(DomainError::invalid_state(format!(
                "only draft invitations can be submitted (status: {current})"
            )));
        }

        Ok(InvitationEvent::Submitted(InvitationSubmitted {
            invitation_id: cmd.invitation_id,
            actor_id: cmd.actor_id,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_approve(
        &self,
        current: InvitationStatus,
        cmd: &ApproveInvitation,
    ) -> Result<InvitationEvent, DomainError> {
        if !current.is_pending_approval() {
            return Err(DomainError::invalid_state(format!(
                "only submitted or under-review invitations can be approved (status: {current})"
            )));
        }

        Ok(InvitationEvent::Approved(InvitationApproved {
            invitation_id: cmd.invitation_id,
            actor_id: cmd.actor_id,
            comments: normalized(cmd.comments.as_ref()),
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_reject(
        &self,
        current: InvitationStatus,
        cmd: &RejectInvitation,
    ) -> Result<InvitationEvent, DomainError> {
        if !current.is_pending_approval() {
            return Err(DomainError::invalid_state(format!(
                "only submitted or under-review invitations can be rejected (status: {current})"
            )));
        }

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }

        Ok(InvitationEvent::Rejected(InvitationRejected {
            invitation_id: cmd.invitation_id,
            actor_id: cmd.actor_id,
            reason: reason.to_string(),
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_cancel(
        &self,
        current: InvitationStatus,
        cmd: &CancelInvitation,
    ) -> Result<InvitationEvent, DomainError> {
        if !current.can_be_cancelled() {
            return Err(DomainError::invalid_state(format!(
                "invitation cannot be cancelled (status: {current})"
            )));
        }

        Ok(InvitationEvent::Cancelled(InvitationCancelled {
            invitation_id: cmd.invitation_id,
            actor_id: cmd.actor_id,
            reason: normalized(cmd.reason.as_ref()),
            previous_status: current,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_check_in(
        &self,
        current: InvitationStatus,
        cmd: &CheckInVisitor,
    ) -> Result<InvitationEvent, DomainError> {
        if current != InvitationStatus::Approved {
            return Err(DomainError::invalid_state(format!(
                "only approved invitations can be checked in (status: {current})"
            )));
        }

        Ok(InvitationEvent::CheckedIn(VisitorCheckedIn {
            invitation_id: cmd.invitation_id,
            actor_id: cmd.actor_id,
            occurred_at: cmd.occurred_at,
        }))
    }

    fn handle_check_out(
        &self,
        current: InvitationStatus,
        cmd: &CheckOutVisitor,
    ) -> Result<InvitationEvent, DomainError> {
        if current != InvitationStatus::CheckedIn {
            return Err(DomainError::invalid_state(format!(
                "only checked-in visitors can be checked out (status: {current})"
            )));
        }

        Ok(InvitationEvent::CheckedOut(VisitorCheckedOut {
            invitation_id: cmd.invitation_id,
            actor_id: cmd.actor_id,
            occurred_at: cmd.occurred_at,
        }))
    }
}
