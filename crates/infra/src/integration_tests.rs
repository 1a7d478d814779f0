//! Integration tests for the full invitation workflow.
//!
//! Tests: Orchestrator → InMemoryGateway → audit trail → side effects
//!
//! Verifies:
//! - Every successful transition appends exactly one event, failed ones none
//! - Failures inside a unit of work (QR, append, commit, timeout) roll back
//! - Reference resolution precedence and QR round trips
//! - Side-effect failures never fail the transition

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    use gatepass_core::{InvitationId, TemplateId, UserId, VisitorId};
    use gatepass_invitations::{
        InitialStatus, InvitationDetails, InvitationStatus, VisitRequirements, VisitWindow,
    };

    use crate::clock::FixedClock;
    use crate::collaborators::{
        Base64QrEncoder, CapacityOracle, CapacityRequest, CapacityVerdict, Notification,
        NotificationKind, NotificationSink, QrEncoder, QrError, QrFacts,
    };
    use crate::config::WorkflowConfig;
    use crate::error::{WorkflowError, WorkflowErrorKind};
    use crate::gateway::{InMemoryGateway, PersistenceGateway, TemplateRecord, UserRecord, VisitorRecord};
    use crate::identifier::NumberSource;
    use crate::orchestrator::{NewInvitation, WorkflowOrchestrator};
    use crate::resolver::MatchedBy;

    // ---------------------------------------------------------------------
    // Test collaborators
    // ---------------------------------------------------------------------

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Recipient {
        User(UserId),
        Role(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(Recipient, NotificationKind)>>,
        fail: AtomicBool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: AtomicBool::new(true),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(Recipient, NotificationKind)> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, recipient: Recipient, kind: NotificationKind) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("mail relay unavailable");
            }
            self.sent.lock().unwrap().push((recipient, kind));
            Ok(())
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify_user(&self, user_id: UserId, n: &Notification) -> anyhow::Result<()> {
            self.record(Recipient::User(user_id), n.kind)
        }

        async fn notify_role(&self, role: &str, n: &Notification) -> anyhow::Result<()> {
            self.record(Recipient::Role(role.to_string()), n.kind)
        }
    }

    struct FailingQr;

    impl QrEncoder for FailingQr {
        fn encode(&self, _facts: &QrFacts) -> Result<String, QrError> {
            Err(QrError::Encoder("printer offline".to_string()))
        }
    }

    /// Payload of invitation N is the text "N - 1".
    struct PreviousIdQr;

    impl QrEncoder for PreviousIdQr {
        fn encode(&self, facts: &QrFacts) -> Result<String, QrError> {
            Ok((facts.invitation_id.get() - 1).to_string())
        }
    }

    /// Replays a fixed list of suffixes, repeating the last one.
    struct ScriptedNumbers(Mutex<Vec<&'static str>>);

    impl NumberSource for ScriptedNumbers {
        fn suffix(&self) -> String {
            let mut queue = self.0.lock().unwrap();
            if queue.len() > 1 {
                queue.remove(0).to_string()
            } else {
                queue[0].to_string()
            }
        }
    }

    struct Denying {
        alternatives: usize,
    }

    #[async_trait]
    impl CapacityOracle for Denying {
        async fn validate(&self, request: &CapacityRequest) -> anyhow::Result<CapacityVerdict> {
            let slots = (1..=self.alternatives as i64)
                .map(|h| VisitWindow {
                    start: request.when + ChronoDuration::hours(h),
                    end: request.when + ChronoDuration::hours(h + 1),
                })
                .collect();
            Ok(CapacityVerdict::denied(
                ["Lobby is full", "Try later"],
                slots,
            ))
        }
    }

    struct BrokenOracle;

    #[async_trait]
    impl CapacityOracle for BrokenOracle {
        async fn validate(&self, _request: &CapacityRequest) -> anyhow::Result<CapacityVerdict> {
            anyhow::bail!("capacity service timed out")
        }
    }

    // ---------------------------------------------------------------------
    // Fixture
    // ---------------------------------------------------------------------

    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, 9, 0, 0).unwrap()
    }

    fn visit_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, 13, 0, 0).unwrap()
    }

    struct Fixture {
        orchestrator: WorkflowOrchestrator<InMemoryGateway>,
        gateway: Arc<InMemoryGateway>,
        clock: Arc<FixedClock>,
        sink: Arc<RecordingSink>,
        host: UserId,
        approver: UserId,
        operator: UserId,
        visitor: VisitorId,
        template: TemplateId,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with(WorkflowConfig::default(), RecordingSink::default()).await
        }

        async fn with(config: WorkflowConfig, sink: RecordingSink) -> Self {
            gatepass_observability::init_for_tests();

            let gateway = Arc::new(InMemoryGateway::new());
            let host = UserId::new();
            let approver = UserId::new();
            let operator = UserId::new();
            for (id, name, role) in [
                (host, "Grace Host", "employee"),
                (approver, "Alan Approver", "approver"),
                (operator, "Front Desk", "security"),
            ] {
                gateway
                    .insert_user(UserRecord {
                        id,
                        display_name: name.to_string(),
                        role: role.to_string(),
                        active: true,
                    })
                    .await;
            }

            let visitor = VisitorId::new();
            gateway
                .insert_visitor(VisitorRecord {
                    id: visitor,
                    full_name: "Ada Visitor".to_string(),
                    email: Some("ada@example.com".to_string()),
                    company: Some("Analytical Engines".to_string()),
                    is_vip: false,
                    visit_count: 0,
                    last_visit_at: None,
                })
                .await;

            let template = TemplateId::new();
            gateway
                .insert_template(TemplateRecord {
                    id: template,
                    name: "Interview".to_string(),
                    usage_count: 0,
                    last_used_at: None,
                })
                .await;

            let clock = Arc::new(FixedClock::new(morning()));
            let sink = Arc::new(sink);
            let orchestrator = WorkflowOrchestrator::new(Arc::clone(&gateway), config)
                .with_clock(clock.clone())
                .with_notification_sink(sink.clone());

            Self {
                orchestrator,
                gateway,
                clock,
                sink,
                host,
                approver,
                operator,
                visitor,
                template,
            }
        }

        fn details(&self) -> InvitationDetails {
            InvitationDetails {
                visitor_id: self.visitor,
                host_id: self.host,
                purpose_id: None,
                location_id: None,
                template_id: Some(self.template),
                schedule: VisitWindow {
                    start: visit_start(),
                    end: visit_start() + ChronoDuration::hours(1),
                },
                expected_visitor_count: 1,
                requirements: VisitRequirements::default(),
                subject: "Onsite interview".to_string(),
                message: Some("Bring ID".to_string()),
                special_instructions: None,
                parking_instructions: None,
            }
        }

        fn request(&self, initial_status: InitialStatus) -> NewInvitation {
            NewInvitation {
                details: self.details(),
                initial_status,
            }
        }

        async fn create(&self, initial_status: InitialStatus) -> InvitationId {
            self.orchestrator
                .create(self.host, self.request(initial_status))
                .await
                .unwrap()
                .id()
        }

        async fn approved(&self) -> InvitationId {
            let id = self.create(InitialStatus::Submitted).await;
            self.orchestrator.approve(self.approver, id, None).await.unwrap();
            id
        }

        async fn status(&self, id: InvitationId) -> InvitationStatus {
            self.gateway.invitation(id).await.unwrap().unwrap().status()
        }

        async fn event_count(&self, id: InvitationId) -> usize {
            self.orchestrator.history(id).await.unwrap().len()
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn full_lifecycle_records_one_event_per_transition() {
        let fx = Fixture::new().await;

        let created = fx
            .orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();
        assert_eq!(created.effective_status, InvitationStatus::Draft);
        assert!(created.number().as_str().starts_with("VIS-20241201-"));
        assert!(created.invitation.qr_payload.is_some());
        let id = created.id();

        fx.orchestrator.submit(fx.host, id).await.unwrap();
        fx.orchestrator
            .approve(fx.approver, id, Some("welcome".to_string()))
            .await
            .unwrap();

        fx.clock.set(visit_start() + ChronoDuration::minutes(3));
        let checked_in = fx
            .orchestrator
            .check_in(fx.operator, created.number().as_str())
            .await
            .unwrap();
        assert_eq!(checked_in.effective_status, InvitationStatus::CheckedIn);
        assert_eq!(checked_in.invitation.checked_in_by, Some(fx.operator));

        // Staying past the scheduled end does not expire a checked-in visit.
        fx.clock.set(visit_start() + ChronoDuration::hours(2));
        let payload = created.invitation.qr_payload.clone().unwrap();
        let checked_out = fx.orchestrator.check_out(fx.operator, &payload).await.unwrap();
        assert_eq!(checked_out.effective_status, InvitationStatus::CheckedOut);
        assert_eq!(checked_out.invitation.version, 5);

        let history = fx.orchestrator.history(id).await.unwrap();
        let types: Vec<_> = history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "invitation.created",
                "invitation.submitted",
                "invitation.approved",
                "invitation.checked_in",
                "invitation.checked_out",
            ]
        );
        let sequence: Vec<_> = history.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequence, vec![1, 2, 3, 4, 5]);
        assert_eq!(history[2].payload, Some(serde_json::json!({ "comments": "welcome" })));

        fx.orchestrator.side_effects().drain().await;
        let visitor = fx.gateway.visitor(fx.visitor).await.unwrap().unwrap();
        assert_eq!(visitor.visit_count, 1);
        assert_eq!(
            visitor.last_visit_at,
            Some(visit_start() + ChronoDuration::minutes(3))
        );
    }

    #[tokio::test]
    async fn create_increments_template_usage() {
        let fx = Fixture::new().await;
        fx.create(InitialStatus::Draft).await;
        fx.create(InitialStatus::Draft).await;

        let template = fx.gateway.template(fx.template).await.unwrap().unwrap();
        assert_eq!(template.usage_count, 2);
        assert_eq!(template.last_used_at, Some(morning()));
    }

    #[tokio::test]
    async fn create_with_end_before_start_fails_without_mutation() {
        let fx = Fixture::new().await;
        let mut request = fx.request(InitialStatus::Draft);
        request.details.schedule = VisitWindow {
            start: Utc.with_ymd_and_hms(2024, 12, 1, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 12, 1, 13, 0, 0).unwrap(),
        };

        let err = fx.orchestrator.create(fx.host, request).await.unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::ValidationFailed);
        assert_eq!(fx.gateway.invitation_count().await, 0);
        assert_eq!(fx.gateway.event_count().await, 0);
    }

    #[tokio::test]
    async fn create_requires_existing_visitor_and_actor() {
        let fx = Fixture::new().await;

        let mut request = fx.request(InitialStatus::Draft);
        request.details.visitor_id = VisitorId::new();
        let err = fx.orchestrator.create(fx.host, request).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { entity: "visitor", .. }));

        let err = fx
            .orchestrator
            .create(UserId::new(), fx.request(InitialStatus::Draft))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { entity: "actor", .. }));

        assert_eq!(fx.gateway.invitation_count().await, 0);
    }

    #[tokio::test]
    async fn reject_with_empty_reason_leaves_status_unchanged() {
        let fx = Fixture::new().await;
        let id = fx.create(InitialStatus::Submitted).await;

        let err = fx
            .orchestrator
            .reject(fx.approver, id, "   ".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::ValidationFailed);
        assert_eq!(fx.status(id).await, InvitationStatus::Submitted);
        assert_eq!(fx.event_count(id).await, 1);

        let rejected = fx
            .orchestrator
            .reject(fx.approver, id, "No escort available".to_string())
            .await
            .unwrap();
        assert_eq!(rejected.effective_status, InvitationStatus::Rejected);
        assert_eq!(fx.event_count(id).await, 2);
    }

    #[tokio::test]
    async fn check_in_on_draft_is_invalid_state_and_appends_nothing() {
        let fx = Fixture::new().await;
        let id = fx.create(InitialStatus::Draft).await;

        let err = fx
            .orchestrator
            .check_in(fx.operator, &id.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::InvalidState);
        assert_eq!(fx.status(id).await, InvitationStatus::Draft);
        assert_eq!(fx.event_count(id).await, 1);
    }

    #[tokio::test]
    async fn cancel_on_checked_in_is_invalid_state() {
        let fx = Fixture::new().await;
        let id = fx.approved().await;
        fx.clock.set(visit_start());
        fx.orchestrator
            .check_in(fx.operator, &id.to_string())
            .await
            .unwrap();

        let err = fx
            .orchestrator
            .cancel(fx.host, id, Some("changed plans".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::InvalidState);
        assert_eq!(fx.status(id).await, InvitationStatus::CheckedIn);
    }

    #[tokio::test]
    async fn expired_invitations_refuse_transitions() {
        let fx = Fixture::new().await;
        let id = fx.create(InitialStatus::Submitted).await;

        fx.clock.set(visit_start() + ChronoDuration::hours(3));
        let view = fx.orchestrator.get(id).await.unwrap();
        assert_eq!(view.effective_status, InvitationStatus::Expired);
        assert_eq!(view.invitation.status, InvitationStatus::Submitted);
        assert!(!view.can_be_cancelled);

        let err = fx.orchestrator.approve(fx.approver, id, None).await.unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::InvalidState);
        assert_eq!(fx.event_count(id).await, 1);
    }

    // ---------------------------------------------------------------------
    // Delete
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn delete_requires_cancelled_or_rejected() {
        let fx = Fixture::new().await;
        let id = fx.approved().await;

        let err = fx.orchestrator.delete(fx.host, id).await.unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::InvalidState);
        assert_eq!(fx.event_count(id).await, 2);

        fx.orchestrator.cancel(fx.host, id, None).await.unwrap();
        let receipt = fx.orchestrator.delete(fx.host, id).await.unwrap();
        assert_eq!(receipt.final_status, InvitationStatus::Cancelled);
        assert_eq!(receipt.events_removed, 3);

        assert!(fx.gateway.invitation(id).await.unwrap().is_none());
        assert_eq!(fx.gateway.event_count().await, 0);
        assert!(matches!(
            fx.orchestrator.history(id).await,
            Err(WorkflowError::NotFound { .. })
        ));
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn qr_payload_resolves_to_its_invitation() {
        let fx = Fixture::new().await;
        let created = fx
            .orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();
        let payload = created.invitation.qr_payload.clone().unwrap();

        let resolved = fx.orchestrator.resolve(&payload).await.unwrap();
        assert_eq!(resolved.matched_by, MatchedBy::QrPayload);
        assert_eq!(resolved.view.id(), created.id());

        let facts = Base64QrEncoder.decode(&payload).unwrap();
        assert_eq!(&facts.invitation_number, created.number());
    }

    #[tokio::test]
    async fn numeric_id_takes_precedence_over_other_matches() {
        let fx = Fixture::new().await;
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&fx.gateway), WorkflowConfig::default())
            .with_clock(fx.clock.clone())
            .with_qr_encoder(Arc::new(PreviousIdQr));

        let a = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();
        let b = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();
        // "1" is A's id and B's QR payload.
        assert_eq!(a.id().get(), 1);
        assert_eq!(b.invitation.qr_payload.as_deref(), Some("1"));

        let resolved = orchestrator.resolve("1").await.unwrap();
        assert_eq!(resolved.view.id(), a.id());
        assert_eq!(resolved.matched_by, MatchedBy::SurrogateId);
    }

    #[tokio::test]
    async fn blank_or_unknown_references_fail_check_in() {
        let fx = Fixture::new().await;
        fx.approved().await;

        let err = fx.orchestrator.check_in(fx.operator, " \r\n").await.unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::ValidationFailed);

        let err = fx
            .orchestrator
            .check_in(fx.operator, "VIS-20241201-NOPE00")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::NotFound);
    }

    // ---------------------------------------------------------------------
    // Atomicity
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn qr_failure_aborts_creation_entirely() {
        let fx = Fixture::new().await;
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&fx.gateway), WorkflowConfig::default())
            .with_qr_encoder(Arc::new(FailingQr));

        let err = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::DependencyFailure);

        assert_eq!(fx.gateway.invitation_count().await, 0);
        assert_eq!(fx.gateway.event_count().await, 0);
        let template = fx.gateway.template(fx.template).await.unwrap().unwrap();
        assert_eq!(template.usage_count, 0);
    }

    #[tokio::test]
    async fn append_failure_rolls_back_the_status_change() {
        let fx = Fixture::new().await;
        let id = fx.create(InitialStatus::Draft).await;

        fx.gateway.fail_next_append();
        let err = fx.orchestrator.submit(fx.host, id).await.unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::DependencyFailure);
        assert_eq!(fx.status(id).await, InvitationStatus::Draft);
        assert_eq!(fx.event_count(id).await, 1);

        // The gateway is usable again afterwards.
        fx.orchestrator.submit(fx.host, id).await.unwrap();
        assert_eq!(fx.status(id).await, InvitationStatus::Submitted);
    }

    #[tokio::test]
    async fn commit_failure_rolls_back_creation() {
        let fx = Fixture::new().await;
        fx.gateway.fail_next_commit();

        let err = fx
            .orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::DependencyFailure);
        assert_eq!(fx.gateway.invitation_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unit_of_work_past_the_timeout_is_rolled_back() {
        let config = WorkflowConfig::default().with_transaction_timeout(Duration::from_millis(50));
        let fx = Fixture::with(config, RecordingSink::default()).await;
        fx.gateway.delay_commits(Duration::from_secs(5));

        let err = fx
            .orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::DependencyFailure);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(fx.gateway.invitation_count().await, 0);
        assert_eq!(fx.gateway.event_count().await, 0);
    }

    #[tokio::test]
    async fn number_taken_at_insert_is_retried_with_a_fresh_one() {
        let fx = Fixture::new().await;
        // Both creates see AAAAAA as free; the store rejects the second insert.
        fx.gateway.stale_number_checks();
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&fx.gateway), WorkflowConfig::default())
            .with_clock(fx.clock.clone())
            .with_number_source(Arc::new(ScriptedNumbers(Mutex::new(vec![
                "AAAAAA", "AAAAAA", "BBBBBB",
            ]))));

        let first = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();
        let second = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();

        assert_eq!(first.number().as_str(), "VIS-20241201-AAAAAA");
        assert_eq!(second.number().as_str(), "VIS-20241201-BBBBBB");
        assert_eq!(fx.gateway.invitation_count().await, 2);
        assert_eq!(fx.gateway.event_count().await, 2);
        // The rolled-back attempt left no trace.
        let template = fx.gateway.template(fx.template).await.unwrap().unwrap();
        assert_eq!(template.usage_count, 2);
    }

    #[tokio::test]
    async fn insert_collisions_share_the_attempt_budget() {
        let fx = Fixture::new().await;
        fx.gateway.stale_number_checks();
        let config = WorkflowConfig::default().with_number_max_attempts(2);
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&fx.gateway), config)
            .with_clock(fx.clock.clone())
            .with_number_source(Arc::new(ScriptedNumbers(Mutex::new(vec!["AAAAAA"]))));

        orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();
        let err = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::GenerationExhausted { attempts: 2 }));
        assert_eq!(fx.gateway.invitation_count().await, 1);
        assert_eq!(fx.gateway.event_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_creates_on_the_same_candidate_both_succeed() {
        let fx = Fixture::new().await;
        fx.gateway.stale_number_checks();
        let orchestrator = Arc::new(
            WorkflowOrchestrator::new(Arc::clone(&fx.gateway), WorkflowConfig::default())
                .with_clock(fx.clock.clone())
                .with_number_source(Arc::new(ScriptedNumbers(Mutex::new(vec![
                    "AAAAAA", "AAAAAA", "BBBBBB",
                ])))),
        );

        let (a, b) = tokio::join!(
            orchestrator.create(fx.host, fx.request(InitialStatus::Draft)),
            orchestrator.create(fx.host, fx.request(InitialStatus::Submitted)),
        );

        let mut numbers = vec![
            a.unwrap().number().as_str().to_string(),
            b.unwrap().number().as_str().to_string(),
        ];
        numbers.sort();
        assert_eq!(numbers, vec!["VIS-20241201-AAAAAA", "VIS-20241201-BBBBBB"]);
    }

    #[tokio::test]
    async fn invalid_prefix_from_builder_keeps_creates_working() {
        let fx = Fixture::new().await;
        let config = WorkflowConfig::default().with_number_prefix("vis");
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&fx.gateway), config)
            .with_clock(fx.clock.clone());

        let view = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap();
        assert!(view.number().as_str().starts_with("VIS-20241201-"));
    }

    // ---------------------------------------------------------------------
    // Capacity
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn capacity_denial_carries_at_most_three_alternatives() {
        let fx = Fixture::new().await;
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&fx.gateway), WorkflowConfig::default())
            .with_capacity_oracle(Arc::new(Denying { alternatives: 5 }));

        let err = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap_err();
        match err {
            WorkflowError::CapacityExceeded {
                message,
                alternatives,
            } => {
                assert_eq!(message, "Lobby is full; Try later");
                assert_eq!(alternatives.len(), 3);
            }
            other => panic!("Expected CapacityExceeded, got {other:?}"),
        }
        assert_eq!(fx.gateway.invitation_count().await, 0);
    }

    #[tokio::test]
    async fn capacity_oracle_errors_are_dependency_failures() {
        let fx = Fixture::new().await;
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&fx.gateway), WorkflowConfig::default())
            .with_capacity_oracle(Arc::new(BrokenOracle));

        let err = orchestrator
            .create(fx.host, fx.request(InitialStatus::Draft))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), WorkflowErrorKind::DependencyFailure);
        assert_eq!(fx.gateway.invitation_count().await, 0);
    }

    // ---------------------------------------------------------------------
    // Side effects
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn notifications_follow_the_workflow() {
        let fx = Fixture::new().await;
        let id = fx.create(InitialStatus::Submitted).await;
        fx.orchestrator.approve(fx.approver, id, None).await.unwrap();
        fx.orchestrator.side_effects().drain().await;

        let sent = fx.sink.sent();
        assert!(sent.contains(&(Recipient::User(fx.host), NotificationKind::InvitationCreated)));
        assert!(sent.contains(&(
            Recipient::Role("approver".to_string()),
            NotificationKind::ApprovalRequested
        )));
        assert!(sent.contains(&(Recipient::User(fx.host), NotificationKind::InvitationApproved)));
    }

    #[tokio::test]
    async fn escort_requirement_alerts_security_on_check_in() {
        let fx = Fixture::new().await;
        let mut request = fx.request(InitialStatus::Submitted);
        request.details.requirements.requires_escort = true;
        let id = fx.orchestrator.create(fx.host, request).await.unwrap().id();
        fx.orchestrator.approve(fx.approver, id, None).await.unwrap();

        fx.clock.set(visit_start());
        fx.orchestrator
            .check_in(fx.operator, &id.to_string())
            .await
            .unwrap();
        fx.orchestrator.side_effects().drain().await;

        assert!(fx.sink.sent().contains(&(
            Recipient::Role("security".to_string()),
            NotificationKind::EscortRequired
        )));
    }

    #[tokio::test]
    async fn notification_failure_leaves_the_transition_committed() {
        let fx = Fixture::with(WorkflowConfig::default(), RecordingSink::failing()).await;
        let id = fx.create(InitialStatus::Submitted).await;
        let approved = fx.orchestrator.approve(fx.approver, id, None).await.unwrap();
        fx.orchestrator.side_effects().drain().await;

        assert_eq!(approved.effective_status, InvitationStatus::Approved);
        assert_eq!(fx.status(id).await, InvitationStatus::Approved);
        let stats = fx.orchestrator.side_effects().stats();
        assert!(stats.failed >= 3, "{stats:?}");
    }

    // ---------------------------------------------------------------------
    // Concurrency
    // ---------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_get_unique_numbers() {
        let fx = Fixture::new().await;
        let orchestrator = Arc::new(fx.orchestrator);

        let mut handles = Vec::new();
        for _ in 0..100 {
            let orchestrator = Arc::clone(&orchestrator);
            let actor = fx.host;
            let details = InvitationDetails {
                visitor_id: fx.visitor,
                host_id: fx.host,
                purpose_id: None,
                location_id: None,
                template_id: None,
                schedule: VisitWindow {
                    start: visit_start(),
                    end: visit_start() + ChronoDuration::hours(1),
                },
                expected_visitor_count: 1,
                requirements: VisitRequirements::default(),
                subject: "Town hall".to_string(),
                message: None,
                special_instructions: None,
                parking_instructions: None,
            };
            handles.push(tokio::spawn(async move {
                orchestrator
                    .create(
                        actor,
                        NewInvitation {
                            details,
                            initial_status: InitialStatus::Draft,
                        },
                    )
                    .await
            }));
        }

        let mut numbers = HashSet::new();
        let mut ids = HashSet::new();
        for handle in handles {
            let view = handle.await.unwrap().unwrap();
            numbers.insert(view.number().clone());
            ids.insert(view.id());
        }
        assert_eq!(numbers.len(), 100);
        assert_eq!(ids.len(), 100);
        assert_eq!(fx.gateway.invitation_count().await, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_decisions_on_one_invitation_have_one_winner() {
        let fx = Fixture::new().await;
        let id = fx.create(InitialStatus::Submitted).await;

        let (approve, reject) = tokio::join!(
            fx.orchestrator.approve(fx.approver, id, None),
            fx.orchestrator.reject(fx.approver, id, "double booked".to_string()),
        );

        let outcomes = [approve.is_ok(), reject.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let loser = approve.err().or(reject.err()).unwrap();
        assert_eq!(loser.kind(), WorkflowErrorKind::InvalidState);
        assert_eq!(fx.event_count(id).await, 2);
    }
}
