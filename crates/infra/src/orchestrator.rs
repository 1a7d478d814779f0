//! Invitation workflow orchestration.
//!
//! Every transition follows the same template:
//!
//! ```text
//! 1. load the invitation and the entities it references (fail fast, no writes)
//! 2. evaluate preconditions: state legality, field rules, capacity on create
//! 3. begin a unit of work                      ┐
//! 4. re-load with a row lock, re-check, mutate │ under the transaction
//! 5. append exactly one audit event            │ timeout; any failure or
//! 6. create only: QR payload, template usage   │ cancellation rolls the
//! 7. commit                                    ┘ whole unit back
//! 8. spawn best-effort side effects (notifications, visitor statistics)
//! ```
//!
//! Create draws its invitation number before step 3. If the store still
//! reports the number as taken at insert, the unit is rolled back and rerun
//! with a fresh number from the same attempt budget.
//!
//! The returned projection is built from the committed in-memory aggregate;
//! the gateway is not re-read after commit.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tracing::{Span, debug, field, info, instrument, warn};
use uuid::Uuid;

use gatepass_core::{Aggregate, InvitationId, UserId};
use gatepass_events::{StoredEvent, UncommittedEvent};
use gatepass_invitations::{
    ApproveInvitation, CancelInvitation, CheckInVisitor, CheckOutVisitor, CreateInvitation,
    InitialStatus, Invitation, InvitationCommand, InvitationDetails, InvitationNumber,
    RejectInvitation, SubmitInvitation,
};

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    Base64QrEncoder, CapacityOracle, CapacityRequest, LoggingNotificationSink, Notification,
    NotificationKind, NotificationSink, QrEncoder, QrFacts, UnlimitedCapacity,
};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::gateway::{PersistenceGateway, StoreError, UnitOfWork, UserRecord};
use crate::identifier::{NumberGenerator, NumberSource, RandomNumberSource};
use crate::resolver;
use crate::side_effects::SideEffectSupervisor;
use crate::view::{DeletedInvitation, InvitationView, ResolvedView};

/// Suggestions carried by a capacity denial.
pub const MAX_ALTERNATIVE_SLOTS: usize = 3;

/// Input of [`WorkflowOrchestrator::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvitation {
    pub details: InvitationDetails,
    pub initial_status: InitialStatus,
}

/// Runs invitation transitions against a persistence gateway.
pub struct WorkflowOrchestrator<G> {
    gateway: Arc<G>,
    capacity: Arc<dyn CapacityOracle>,
    qr: Arc<dyn QrEncoder>,
    notifications: Arc<dyn NotificationSink>,
    numbers: NumberGenerator,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
    side_effects: SideEffectSupervisor,
}

impl<G> core::fmt::Debug for WorkflowOrchestrator<G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("config", &self.config)
            .field("numbers", &self.numbers)
            .field("side_effects", &self.side_effects.stats())
            .finish_non_exhaustive()
    }
}

impl<G> WorkflowOrchestrator<G>
where
    G: PersistenceGateway + 'static,
{
    /// Orchestrator with the default collaborators: unlimited capacity,
    /// base64 QR payloads, log-only notifications, random numbers and the
    /// system clock.
    pub fn new(gateway: Arc<G>, config: WorkflowConfig) -> Self {
        let numbers = NumberGenerator::new(
            config.number_prefix.clone(),
            config.number_max_attempts,
            Arc::new(RandomNumberSource),
        );
        Self {
            gateway,
            capacity: Arc::new(UnlimitedCapacity),
            qr: Arc::new(Base64QrEncoder),
            notifications: Arc::new(LoggingNotificationSink),
            numbers,
            clock: Arc::new(SystemClock),
            config,
            side_effects: SideEffectSupervisor::new(),
        }
    }

    pub fn with_capacity_oracle(mut self, oracle: Arc<dyn CapacityOracle>) -> Self {
        self.capacity = oracle;
        self
    }

    pub fn with_qr_encoder(mut self, encoder: Arc<dyn QrEncoder>) -> Self {
        self.qr = encoder;
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    pub fn with_number_source(mut self, source: Arc<dyn NumberSource>) -> Self {
        self.numbers = NumberGenerator::new(
            self.config.number_prefix.clone(),
            self.config.number_max_attempts,
            source,
        );
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn side_effects(&self) -> &SideEffectSupervisor {
        &self.side_effects
    }

    /// Create an invitation in `Draft`, `Submitted` or `UnderReview`.
    #[instrument(
        skip(self, request),
        fields(
            operation = "create",
            actor_id = %actor_id,
            invitation_id = field::Empty,
            invitation_number = field::Empty
        ),
        err
    )]
    pub async fn create(
        &self,
        actor_id: UserId,
        request: NewInvitation,
    ) -> Result<InvitationView, WorkflowError> {
        let now = self.clock.now();
        let NewInvitation {
            details,
            initial_status,
        } = request;

        // 1-2) Field rules, referenced entities, capacity.
        details.validate()?;
        self.require_user(actor_id, "actor").await?;
        self.require_user(details.host_id, "host").await?;
        let visitor = self
            .gateway
            .visitor(details.visitor_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("visitor", details.visitor_id))?;
        if let Some(purpose_id) = details.purpose_id {
            self.gateway
                .purpose(purpose_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("purpose", purpose_id))?;
        }
        if let Some(location_id) = details.location_id {
            self.gateway
                .location(location_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("location", location_id))?;
        }
        if let Some(template_id) = details.template_id {
            self.gateway
                .template(template_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("template", template_id))?;
        }
        self.check_capacity(&details, visitor.is_vip).await?;

        // 3-7) Atomic unit. A number that passed the availability check but
        // lost the race to a concurrent insert is retried with a fresh one,
        // drawing from the same attempt budget.
        let mut budget = self.numbers.budget();
        let invitation = loop {
            let number = self
                .numbers
                .generate_within(self.gateway.as_ref(), now, &mut budget)
                .await?;
            let unit = self.insert_created(&number, &details, initial_status, actor_id, now);
            match self.within_unit("create", unit).await? {
                Some(invitation) => break invitation,
                None => debug!(
                    attempt = budget.used(),
                    invitation_number = %number,
                    "invitation number taken at insert; retrying"
                ),
            }
        };

        Span::current().record("invitation_number", field::display(invitation.number()));
        Span::current().record("invitation_id", field::display(invitation.invitation_id()));
        info!(status = %invitation.status(), "invitation created");

        // 8) Side effects.
        let host_notice = self.notification(
            &invitation,
            NotificationKind::InvitationCreated,
            format!("Invitation {} created", invitation.number()),
            format!(
                "A visit for \"{}\" is scheduled from {} to {}.",
                invitation.details().subject,
                invitation.details().schedule.start.to_rfc3339(),
                invitation.details().schedule.end.to_rfc3339()
            ),
        );
        self.notify_user(invitation.details().host_id, host_notice);
        if invitation.status().is_pending_approval() {
            let approval_notice = self.notification(
                &invitation,
                NotificationKind::ApprovalRequested,
                format!("Invitation {} awaits approval", invitation.number()),
                format!("\"{}\" needs an approval decision.", invitation.details().subject),
            );
            self.notify_role(self.config.approver_role.clone(), approval_notice);
        }

        Ok(InvitationView::new(&invitation, now))
    }

    /// `Draft -> Submitted`.
    #[instrument(skip(self), fields(operation = "submit", actor_id = %actor_id, invitation_id = %id), err)]
    pub async fn submit(
        &self,
        actor_id: UserId,
        id: InvitationId,
    ) -> Result<InvitationView, WorkflowError> {
        let now = self.clock.now();
        self.require_user(actor_id, "actor").await?;
        let current = self.load(id).await?;

        let command = InvitationCommand::Submit(SubmitInvitation {
            invitation_id: id,
            actor_id,
            occurred_at: now,
        });
        let invitation = self.transition(current, command).await?;

        if invitation.status().is_pending_approval() {
            let notice = self.notification(
                &invitation,
                NotificationKind::ApprovalRequested,
                format!("Invitation {} awaits approval", invitation.number()),
                format!("\"{}\" needs an approval decision.", invitation.details().subject),
            );
            self.notify_role(self.config.approver_role.clone(), notice);
        }

        Ok(InvitationView::new(&invitation, now))
    }

    /// `Submitted | UnderReview -> Approved`.
    #[instrument(skip(self, comments), fields(operation = "approve", actor_id = %actor_id, invitation_id = %id), err)]
    pub async fn approve(
        &self,
        actor_id: UserId,
        id: InvitationId,
        comments: Option<String>,
    ) -> Result<InvitationView, WorkflowError> {
        let now = self.clock.now();
        self.require_user(actor_id, "actor").await?;
        let current = self.load(id).await?;

        let command = InvitationCommand::Approve(ApproveInvitation {
            invitation_id: id,
            actor_id,
            comments,
            occurred_at: now,
        });
        let invitation = self.transition(current, command).await?;

        let notice = self.notification(
            &invitation,
            NotificationKind::InvitationApproved,
            format!("Invitation {} approved", invitation.number()),
            invitation
                .snapshot()
                .approval_comments
                .clone()
                .unwrap_or_else(|| "Your visitor invitation was approved.".to_string()),
        );
        self.notify_user(invitation.details().host_id, notice);

        Ok(InvitationView::new(&invitation, now))
    }

    /// `Submitted | UnderReview -> Rejected`. The reason is mandatory.
    #[instrument(skip(self, reason), fields(operation = "reject", actor_id = %actor_id, invitation_id = %id), err)]
    pub async fn reject(
        &self,
        actor_id: UserId,
        id: InvitationId,
        reason: String,
    ) -> Result<InvitationView, WorkflowError> {
        let now = self.clock.now();
        self.require_user(actor_id, "actor").await?;
        let current = self.load(id).await?;

        let command = InvitationCommand::Reject(RejectInvitation {
            invitation_id: id,
            actor_id,
            reason,
            occurred_at: now,
        });
        let invitation = self.transition(current, command).await?;

        let notice = self.notification(
            &invitation,
            NotificationKind::InvitationRejected,
            format!("Invitation {} rejected", invitation.number()),
            invitation
                .snapshot()
                .rejection_reason
                .clone()
                .unwrap_or_default(),
        );
        self.notify_user(invitation.details().host_id, notice);

        Ok(InvitationView::new(&invitation, now))
    }

    /// Any non-terminal status before check-in `-> Cancelled`.
    #[instrument(skip(self, reason), fields(operation = "cancel", actor_id = %actor_id, invitation_id = %id), err)]
    pub async fn cancel(
        &self,
        actor_id: UserId,
        id: InvitationId,
        reason: Option<String>,
    ) -> Result<InvitationView, WorkflowError> {
        let now = self.clock.now();
        self.require_user(actor_id, "actor").await?;
        let current = self.load(id).await?;

        let command = InvitationCommand::Cancel(CancelInvitation {
            invitation_id: id,
            actor_id,
            reason,
            occurred_at: now,
        });
        let invitation = self.transition(current, command).await?;
        Ok(InvitationView::new(&invitation, now))
    }

    /// `Approved -> CheckedIn`, resolving the visitor's reference first.
    #[instrument(
        skip(self, reference),
        fields(operation = "check_in", actor_id = %operator_id, invitation_id = field::Empty),
        err
    )]
    pub async fn check_in(
        &self,
        operator_id: UserId,
        reference: &str,
    ) -> Result<InvitationView, WorkflowError> {
        let now = self.clock.now();
        self.require_user(operator_id, "operator").await?;
        let resolved = resolver::resolve(self.gateway.as_ref(), reference).await?;
        let id = resolved.invitation.invitation_id();
        Span::current().record("invitation_id", field::display(id));

        let command = InvitationCommand::CheckIn(CheckInVisitor {
            invitation_id: id,
            actor_id: operator_id,
            occurred_at: now,
        });
        let invitation = self.transition(resolved.invitation, command).await?;

        let visitor_id = invitation.details().visitor_id;
        let gateway = Arc::clone(&self.gateway);
        self.side_effects
            .spawn("refresh_visitor_statistics", async move {
                gateway
                    .refresh_visitor_statistics(visitor_id)
                    .await
                    .map_err(anyhow::Error::from)
            });

        if invitation.details().requirements.requires_escort {
            let notice = self.notification(
                &invitation,
                NotificationKind::EscortRequired,
                format!("Escort needed for {}", invitation.number()),
                format!("Visitor for \"{}\" has arrived and needs an escort.", invitation.details().subject),
            );
            self.notify_role(self.config.security_role.clone(), notice);
        }

        Ok(InvitationView::new(&invitation, now))
    }

    /// `CheckedIn -> CheckedOut`, resolving the visitor's reference first.
    #[instrument(
        skip(self, reference),
        fields(operation = "check_out", actor_id = %operator_id, invitation_id = field::Empty),
        err
    )]
    pub async fn check_out(
        &self,
        operator_id: UserId,
        reference: &str,
    ) -> Result<InvitationView, WorkflowError> {
        let now = self.clock.now();
        self.require_user(operator_id, "operator").await?;
        let resolved = resolver::resolve(self.gateway.as_ref(), reference).await?;
        let id = resolved.invitation.invitation_id();
        Span::current().record("invitation_id", field::display(id));

        let command = InvitationCommand::CheckOut(CheckOutVisitor {
            invitation_id: id,
            actor_id: operator_id,
            occurred_at: now,
        });
        let invitation = self.transition(resolved.invitation, command).await?;
        Ok(InvitationView::new(&invitation, now))
    }

    /// Physically remove a cancelled or rejected invitation and its audit trail.
    #[instrument(skip(self), fields(operation = "delete", actor_id = %actor_id, invitation_id = %id), err)]
    pub async fn delete(
        &self,
        actor_id: UserId,
        id: InvitationId,
    ) -> Result<DeletedInvitation, WorkflowError> {
        self.require_user(actor_id, "actor").await?;
        let current = self.load(id).await?;
        ensure_deletable(&current)?;

        let receipt = self
            .within_unit("delete", async {
                let mut tx = self.gateway.begin().await?;
                let invitation = tx
                    .invitation_for_update(id)
                    .await?
                    .ok_or_else(|| WorkflowError::not_found("invitation", id))?;
                ensure_deletable(&invitation)?;

                let events_removed = tx.delete_invitation(id).await?;
                tx.commit().await?;
                Ok::<_, WorkflowError>(DeletedInvitation {
                    id,
                    number: invitation.number().clone(),
                    final_status: invitation.status(),
                    events_removed,
                })
            })
            .await?;

        info!(
            invitation_number = %receipt.number,
            events_removed = receipt.events_removed,
            "invitation deleted"
        );
        Ok(receipt)
    }

    /// Current projection of one invitation.
    pub async fn get(&self, id: InvitationId) -> Result<InvitationView, WorkflowError> {
        let invitation = self.load(id).await?;
        Ok(InvitationView::new(&invitation, self.clock.now()))
    }

    /// Audit trail of one invitation, oldest first.
    pub async fn history(&self, id: InvitationId) -> Result<Vec<StoredEvent>, WorkflowError> {
        self.load(id).await?;
        Ok(self.gateway.events(id).await?)
    }

    /// Resolve a reference without changing anything.
    pub async fn resolve(&self, reference: &str) -> Result<ResolvedView, WorkflowError> {
        let resolved = resolver::resolve(self.gateway.as_ref(), reference).await?;
        Ok(ResolvedView {
            view: InvitationView::new(&resolved.invitation, self.clock.now()),
            matched_by: resolved.matched_by,
        })
    }

    async fn load(&self, id: InvitationId) -> Result<Invitation, WorkflowError> {
        self.gateway
            .invitation(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("invitation", id))
    }

    async fn require_user(
        &self,
        id: UserId,
        entity: &'static str,
    ) -> Result<UserRecord, WorkflowError> {
        self.gateway
            .user(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(entity, id))
    }

    async fn check_capacity(
        &self,
        details: &InvitationDetails,
        is_vip: bool,
    ) -> Result<(), WorkflowError> {
        let request = CapacityRequest {
            location_id: details.location_id,
            when: details.schedule.start,
            expected_visitor_count: details.expected_visitor_count,
            is_vip,
        };
        let verdict = self
            .capacity
            .validate(&request)
            .await
            .map_err(|e| WorkflowError::dependency(format!("capacity oracle failed: {e:#}")))?;
        if verdict.is_available {
            return Ok(());
        }

        let message = if verdict.messages.is_empty() {
            "no capacity for the requested window".to_string()
        } else {
            verdict.messages.join("; ")
        };
        Err(WorkflowError::CapacityExceeded {
            message,
            alternatives: verdict
                .alternative_slots
                .into_iter()
                .take(MAX_ALTERNATIVE_SLOTS)
                .collect(),
        })
    }

    /// The create unit of work. `None` when the store reports the number as
    /// already taken; the unit has then been rolled back.
    async fn insert_created(
        &self,
        number: &InvitationNumber,
        details: &InvitationDetails,
        initial_status: InitialStatus,
        actor_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, WorkflowError> {
        let mut tx = self.gateway.begin().await?;
        let invitation_id = tx.next_invitation_id().await?;

        let (mut invitation, event) = Invitation::create(&CreateInvitation {
            invitation_id,
            number: number.clone(),
            details: details.clone(),
            initial_status,
            actor_id,
            occurred_at: now,
        })?;

        let payload = self.qr.encode(&QrFacts::for_invitation(&invitation))?;
        invitation.assign_qr_payload(payload)?;

        match tx.insert_invitation(&invitation).await {
            Err(StoreError::NumberTaken(_)) => return Ok(None),
            inserted => inserted?,
        }
        tx.append_event(UncommittedEvent::from_typed(
            invitation_id,
            Uuid::now_v7(),
            &event,
        ))
        .await?;
        if let Some(template_id) = invitation.details().template_id {
            tx.increment_template_usage(template_id, now).await?;
        }
        match tx.commit().await {
            Err(StoreError::NumberTaken(_)) => Ok(None),
            committed => {
                committed?;
                Ok(Some(invitation))
            }
        }
    }

    /// Steps 2-7 for a transition on an existing invitation.
    ///
    /// `current` is the committed state read before the unit opened; it only
    /// serves the fail-fast check. The decision that counts is taken again on
    /// the locked row.
    async fn transition(
        &self,
        current: Invitation,
        command: InvitationCommand,
    ) -> Result<Invitation, WorkflowError> {
        current.handle(&command)?;

        let id = command.invitation_id();
        let operation = command.name();
        let invitation = self
            .within_unit(operation, async {
                let mut tx = self.gateway.begin().await?;
                let mut invitation = tx
                    .invitation_for_update(id)
                    .await?
                    .ok_or_else(|| WorkflowError::not_found("invitation", id))?;

                let event = invitation.handle(&command)?;
                invitation.apply(&event);

                tx.update_invitation(&invitation).await?;
                tx.append_event(UncommittedEvent::from_typed(id, Uuid::now_v7(), &event))
                    .await?;
                tx.commit().await?;
                Ok::<_, WorkflowError>(invitation)
            })
            .await?;

        info!(
            operation,
            invitation_number = %invitation.number(),
            status = %invitation.status(),
            "invitation transitioned"
        );
        Ok(invitation)
    }

    /// Bound a unit of work by the transaction timeout.
    ///
    /// On timeout the unit's future is dropped, which drops the open
    /// transaction and rolls it back.
    async fn within_unit<T>(
        &self,
        operation: &'static str,
        unit: impl Future<Output = Result<T, WorkflowError>>,
    ) -> Result<T, WorkflowError> {
        let timeout = self.config.transaction_timeout;
        match tokio::time::timeout(timeout, unit).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, ?timeout, "unit of work timed out; rolled back");
                Err(WorkflowError::dependency(format!(
                    "{operation} timed out after {}ms and was rolled back",
                    timeout.as_millis()
                )))
            }
        }
    }

    fn notification(
        &self,
        invitation: &Invitation,
        kind: NotificationKind,
        subject: String,
        body: String,
    ) -> Notification {
        Notification {
            kind,
            invitation_id: invitation.invitation_id(),
            invitation_number: invitation.number().clone(),
            subject,
            body,
        }
    }

    fn notify_user(&self, user_id: UserId, notification: Notification) {
        let sink = Arc::clone(&self.notifications);
        self.side_effects.spawn("notify_user", async move {
            sink.notify_user(user_id, &notification).await
        });
    }

    fn notify_role(&self, role: String, notification: Notification) {
        let sink = Arc::clone(&self.notifications);
        self.side_effects.spawn("notify_role", async move {
            sink.notify_role(&role, &notification).await
        });
    }
}

fn ensure_deletable(invitation: &Invitation) -> Result<(), WorkflowError> {
    if !invitation.is_deletable() {
        return Err(WorkflowError::InvalidState(format!(
            "only cancelled or rejected invitations can be deleted (status: {})",
            invitation.status()
        )));
    }
    Ok(())
}
