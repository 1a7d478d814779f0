use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use gatepass_core::{InvitationId, LocationId, PurposeId, TemplateId, UserId, VisitorId};
use gatepass_events::{StoredEvent, UncommittedEvent};
use gatepass_invitations::{Invitation, InvitationNumber};

use super::records::{LocationRecord, PurposeRecord, TemplateRecord, UserRecord, VisitorRecord};
use super::r#trait::{PersistenceGateway, StoreError, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct State {
    last_invitation_id: i64,
    invitations: HashMap<InvitationId, Invitation>,
    events: HashMap<InvitationId, Vec<StoredEvent>>,
    users: HashMap<UserId, UserRecord>,
    visitors: HashMap<VisitorId, VisitorRecord>,
    purposes: HashMap<PurposeId, PurposeRecord>,
    locations: HashMap<LocationId, LocationRecord>,
    templates: HashMap<TemplateId, TemplateRecord>,
}

impl State {
    fn find_by_number(&self, number: &InvitationNumber) -> Option<&Invitation> {
        self.invitations.values().find(|i| i.number() == number)
    }
}

/// One-shot failures armed by tests.
#[derive(Debug, Default)]
struct Faults {
    fail_next_append: AtomicBool,
    fail_next_commit: AtomicBool,
    commit_delay_ms: AtomicU64,
    stale_number_checks: AtomicBool,
}

/// In-memory persistence gateway.
///
/// Intended for tests/dev. Units of work are fully serialized: a unit holds the
/// state lock from `begin` until it ends and works on a private copy that
/// replaces the shared state on commit. Plain reads also take the lock, so a
/// task must not read through the gateway while it holds an open unit.
///
/// `begin` clones the entire state, so every unit of work costs time and
/// memory linear in the number of stored invitations and events. Fine for
/// tests and benchmarks of a few thousand invitations; not a production store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_visitor(&self, visitor: VisitorRecord) {
        self.state.lock().await.visitors.insert(visitor.id, visitor);
    }

    pub async fn insert_purpose(&self, purpose: PurposeRecord) {
        self.state.lock().await.purposes.insert(purpose.id, purpose);
    }

    pub async fn insert_location(&self, location: LocationRecord) {
        self.state.lock().await.locations.insert(location.id, location);
    }

    pub async fn insert_template(&self, template: TemplateRecord) {
        self.state.lock().await.templates.insert(template.id, template);
    }

    pub async fn invitation_count(&self) -> usize {
        self.state.lock().await.invitations.len()
    }

    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.values().map(Vec::len).sum()
    }

    /// The next `append_event` fails with a backend error.
    pub fn fail_next_append(&self) {
        self.faults.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// The next `commit` fails with a backend error.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// `number_exists` always answers "free", like a reader that has not yet
    /// seen a concurrent insert. Collisions then surface at insert time.
    pub fn stale_number_checks(&self) {
        self.faults.stale_number_checks.store(true, Ordering::SeqCst);
    }

    /// Every commit sleeps for `delay` before publishing its changes.
    pub fn delay_commits(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.faults.commit_delay_ms.store(millis, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryUnitOfWork {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        })
    }

    async fn invitation(&self, id: InvitationId) -> Result<Option<Invitation>, StoreError> {
        Ok(self.state.lock().await.invitations.get(&id).cloned())
    }

    async fn invitation_by_number(
        &self,
        number: &InvitationNumber,
    ) -> Result<Option<Invitation>, StoreError> {
        Ok(self.state.lock().await.find_by_number(number).cloned())
    }

    async fn invitation_by_qr(&self, payload: &str) -> Result<Option<Invitation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .invitations
            .values()
            .find(|i| i.qr_payload() == Some(payload))
            .cloned())
    }

    async fn number_exists(&self, number: &InvitationNumber) -> Result<bool, StoreError> {
        if self.faults.stale_number_checks.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.state.lock().await.find_by_number(number).is_some())
    }

    async fn events(&self, id: InvitationId) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .events
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn visitor(&self, id: VisitorId) -> Result<Option<VisitorRecord>, StoreError> {
        Ok(self.state.lock().await.visitors.get(&id).cloned())
    }

    async fn purpose(&self, id: PurposeId) -> Result<Option<PurposeRecord>, StoreError> {
        Ok(self.state.lock().await.purposes.get(&id).cloned())
    }

    async fn location(&self, id: LocationId) -> Result<Option<LocationRecord>, StoreError> {
        Ok(self.state.lock().await.locations.get(&id).cloned())
    }

    async fn template(&self, id: TemplateId) -> Result<Option<TemplateRecord>, StoreError> {
        Ok(self.state.lock().await.templates.get(&id).cloned())
    }

    async fn refresh_visitor_statistics(&self, visitor_id: VisitorId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let check_ins: Vec<DateTime<Utc>> = state
            .invitations
            .values()
            .filter(|i| i.details().visitor_id == visitor_id)
            .filter_map(|i| i.snapshot().checked_in_at)
            .collect();

        let visitor = state
            .visitors
            .get_mut(&visitor_id)
            .ok_or_else(|| StoreError::Missing(format!("visitor {visitor_id}")))?;
        visitor.visit_count = check_ins.len() as u64;
        visitor.last_visit_at = check_ins.into_iter().max();
        Ok(())
    }
}

/// Unit of work over [`InMemoryGateway`].
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<Faults>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn next_invitation_id(&mut self) -> Result<InvitationId, StoreError> {
        let next = self.working.last_invitation_id + 1;
        let id = InvitationId::new(next).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.working.last_invitation_id = next;
        Ok(id)
    }

    async fn invitation_for_update(
        &mut self,
        id: InvitationId,
    ) -> Result<Option<Invitation>, StoreError> {
        // The whole state is already locked for this unit.
        Ok(self.working.invitations.get(&id).cloned())
    }

    async fn insert_invitation(&mut self, invitation: &Invitation) -> Result<(), StoreError> {
        let id = *gatepass_core::AggregateRoot::id(invitation);
        if self.working.invitations.contains_key(&id) {
            return Err(StoreError::UniqueViolation(format!("invitation id {id}")));
        }
        if self.working.find_by_number(invitation.number()).is_some() {
            return Err(StoreError::NumberTaken(invitation.number().to_string()));
        }
        self.working.invitations.insert(id, invitation.clone());
        Ok(())
    }

    async fn update_invitation(&mut self, invitation: &Invitation) -> Result<(), StoreError> {
        let id = *gatepass_core::AggregateRoot::id(invitation);
        let slot = self
            .working
            .invitations
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("invitation {id}")))?;
        *slot = invitation.clone();
        Ok(())
    }

    async fn delete_invitation(&mut self, id: InvitationId) -> Result<u64, StoreError> {
        if self.working.invitations.remove(&id).is_none() {
            return Err(StoreError::Missing(format!("invitation {id}")));
        }
        let removed = self.working.events.remove(&id).unwrap_or_default();
        Ok(removed.len() as u64)
    }

    async fn append_event(&mut self, event: UncommittedEvent) -> Result<StoredEvent, StoreError> {
        if self.faults.fail_next_append.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected append failure".to_string()));
        }
        if !self.working.invitations.contains_key(&event.invitation_id) {
            return Err(StoreError::Missing(format!(
                "invitation {}",
                event.invitation_id
            )));
        }

        let stream = self.working.events.entry(event.invitation_id).or_default();
        let next = stream.last().map(|e| e.sequence_number).unwrap_or(0) + 1;
        let stored = event.into_stored(next);
        stream.push(stored.clone());
        Ok(stored)
    }

    async fn increment_template_usage(
        &mut self,
        template_id: TemplateId,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let template = self
            .working
            .templates
            .get_mut(&template_id)
            .ok_or_else(|| StoreError::Missing(format!("template {template_id}")))?;
        template.usage_count += 1;
        template.last_used_at = Some(used_at);
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let delay = self.faults.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected commit failure".to_string()));
        }

        let Self {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Dropping the working copy discards every write.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone};
    use gatepass_invitations::{
        CreateInvitation, InitialStatus, InvitationDetails, VisitRequirements, VisitWindow,
    };
    use uuid::Uuid;

    fn invitation(id: i64, suffix: &str, visitor_id: VisitorId) -> Invitation {
        let start = Utc.with_ymd_and_hms(2024, 12, 1, 13, 0, 0).unwrap();
        let cmd = CreateInvitation {
            invitation_id: InvitationId::new(id).unwrap(),
            number: InvitationNumber::compose(
                "VIS",
                NaiveDate::from_ymd_opt(2024, 11, 30).unwrap(),
                suffix,
            )
            .unwrap(),
            details: InvitationDetails {
                visitor_id,
                host_id: UserId::new(),
                purpose_id: None,
                location_id: None,
                template_id: None,
                schedule: VisitWindow {
                    start,
                    end: start + ChronoDuration::hours(1),
                },
                expected_visitor_count: 1,
                requirements: VisitRequirements::default(),
                subject: "Audit".to_string(),
                message: None,
                special_instructions: None,
                parking_instructions: None,
            },
            initial_status: InitialStatus::Draft,
            actor_id: UserId::new(),
            occurred_at: start - ChronoDuration::days(1),
        };
        Invitation::create(&cmd).unwrap().0
    }

    fn event_for(id: InvitationId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            invitation_id: id,
            event_type: "invitation.created".to_string(),
            event_version: 1,
            description: "created".to_string(),
            actor_id: UserId::new(),
            occurred_at: Utc::now(),
            payload: None,
        }
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let gateway = InMemoryGateway::new();
        let mut tx = gateway.begin().await.unwrap();
        let id = tx.next_invitation_id().await.unwrap();
        tx.insert_invitation(&invitation(id.get(), "AAAAAA", VisitorId::new()))
            .await
            .unwrap();
        let stored = tx.append_event(event_for(id)).await.unwrap();
        assert_eq!(stored.sequence_number, 1);
        tx.commit().await.unwrap();

        assert!(gateway.invitation(id).await.unwrap().is_some());
        assert_eq!(gateway.events(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropped_unit_rolls_back() {
        let gateway = InMemoryGateway::new();
        {
            let mut tx = gateway.begin().await.unwrap();
            let id = tx.next_invitation_id().await.unwrap();
            tx.insert_invitation(&invitation(id.get(), "AAAAAA", VisitorId::new()))
                .await
                .unwrap();
        }
        assert_eq!(gateway.invitation_count().await, 0);

        // The id sequence is rolled back too.
        let mut tx = gateway.begin().await.unwrap();
        assert_eq!(tx.next_invitation_id().await.unwrap().get(), 1);
    }

    #[tokio::test]
    async fn duplicate_number_is_reported_as_taken() {
        let gateway = InMemoryGateway::new();
        let mut tx = gateway.begin().await.unwrap();
        tx.insert_invitation(&invitation(1, "AAAAAA", VisitorId::new()))
            .await
            .unwrap();
        let err = tx
            .insert_invitation(&invitation(2, "AAAAAA", VisitorId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NumberTaken(n) if n == "VIS-20241130-AAAAAA"));
    }

    #[tokio::test]
    async fn delete_cascades_to_events() {
        let gateway = InMemoryGateway::new();
        let id = InvitationId::new(1).unwrap();
        let mut tx = gateway.begin().await.unwrap();
        tx.insert_invitation(&invitation(1, "AAAAAA", VisitorId::new()))
            .await
            .unwrap();
        tx.append_event(event_for(id)).await.unwrap();
        tx.append_event(event_for(id)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = gateway.begin().await.unwrap();
        assert_eq!(tx.delete_invitation(id).await.unwrap(), 2);
        tx.commit().await.unwrap();

        assert!(gateway.invitation(id).await.unwrap().is_none());
        assert!(gateway.events(id).await.unwrap().is_empty());
        assert_eq!(gateway.event_count().await, 0);
    }

    #[tokio::test]
    async fn injected_commit_failure_discards_writes() {
        let gateway = InMemoryGateway::new();
        gateway.fail_next_commit();

        let mut tx = gateway.begin().await.unwrap();
        tx.insert_invitation(&invitation(1, "AAAAAA", VisitorId::new()))
            .await
            .unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(gateway.invitation_count().await, 0);
    }

    #[tokio::test]
    async fn visitor_statistics_count_only_check_ins() {
        let gateway = InMemoryGateway::new();
        let visitor_id = VisitorId::new();
        gateway
            .insert_visitor(VisitorRecord {
                id: visitor_id,
                full_name: "Ada Byron".to_string(),
                email: None,
                company: None,
                is_vip: false,
                visit_count: 0,
                last_visit_at: None,
            })
            .await;

        let mut tx = gateway.begin().await.unwrap();
        tx.insert_invitation(&invitation(1, "AAAAAA", visitor_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        gateway.refresh_visitor_statistics(visitor_id).await.unwrap();
        let visitor = gateway.visitor(visitor_id).await.unwrap().unwrap();
        assert_eq!(visitor.visit_count, 0);
        assert!(visitor.last_visit_at.is_none());

        assert!(matches!(
            gateway.refresh_visitor_statistics(VisitorId::new()).await,
            Err(StoreError::Missing(_))
        ));
    }
}
