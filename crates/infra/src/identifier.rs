//! Invitation number generation with bounded retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use gatepass_invitations::InvitationNumber;
use gatepass_invitations::number::{SUFFIX_ALPHABET, SUFFIX_LEN};

use crate::error::WorkflowError;
use crate::gateway::PersistenceGateway;

/// Produces candidate suffixes. Uniqueness is checked by the generator.
pub trait NumberSource: Send + Sync {
    /// A [`SUFFIX_LEN`]-character string drawn from [`SUFFIX_ALPHABET`].
    fn suffix(&self) -> String;
}

/// Uniformly random suffixes from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNumberSource;

impl NumberSource for RandomNumberSource {
    fn suffix(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..SUFFIX_LEN)
            .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
            .collect()
    }
}

/// Generates invitation numbers that do not collide with any stored one.
///
/// There is no cross-process coordination: two generators can still pick the
/// same candidate concurrently, and the store's unique constraint settles it.
#[derive(Clone)]
pub struct NumberGenerator {
    prefix: String,
    max_attempts: u32,
    source: Arc<dyn NumberSource>,
}

impl core::fmt::Debug for NumberGenerator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NumberGenerator")
            .field("prefix", &self.prefix)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl NumberGenerator {
    pub fn new(prefix: impl Into<String>, max_attempts: u32, source: Arc<dyn NumberSource>) -> Self {
        Self {
            prefix: prefix.into(),
            max_attempts: max_attempts.max(1),
            source,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Compose a candidate for the given creation instant without checking the store.
    pub fn candidate(&self, at: DateTime<Utc>) -> Result<InvitationNumber, WorkflowError> {
        InvitationNumber::compose(&self.prefix, at.date_naive(), &self.source.suffix())
            .map_err(|e| WorkflowError::dependency(format!("number source produced {e}")))
    }

    /// A fresh budget of `max_attempts` candidates for one invitation.
    pub fn budget(&self) -> AttemptBudget {
        AttemptBudget {
            used: 0,
            max: self.max_attempts,
        }
    }

    /// Try up to `max_attempts` candidates and return the first unused one.
    pub async fn generate<G>(
        &self,
        gateway: &G,
        at: DateTime<Utc>,
    ) -> Result<InvitationNumber, WorkflowError>
    where
        G: PersistenceGateway + ?Sized,
    {
        self.generate_within(gateway, at, &mut self.budget()).await
    }

    /// Like [`NumberGenerator::generate`], drawing from a budget the caller
    /// keeps across retries.
    ///
    /// A number reported free here can still be taken by a concurrent insert
    /// before ours lands. The caller then comes back with the same budget, so
    /// store-level collisions count against the same bound.
    pub async fn generate_within<G>(
        &self,
        gateway: &G,
        at: DateTime<Utc>,
        budget: &mut AttemptBudget,
    ) -> Result<InvitationNumber, WorkflowError>
    where
        G: PersistenceGateway + ?Sized,
    {
        while budget.take() {
            let candidate = self.candidate(at)?;
            if !gateway.number_exists(&candidate).await? {
                return Ok(candidate);
            }
            debug!(
                attempt = budget.used(),
                invitation_number = %candidate,
                "invitation number collision"
            );
        }

        warn!(
            attempts = budget.used(),
            "giving up on invitation number generation"
        );
        Err(budget.exhausted())
    }
}

/// Candidates tried so far for one invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    used: u32,
    max: u32,
}

impl AttemptBudget {
    /// Spend one attempt. `false` once the bound is reached.
    pub fn take(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn exhausted(&self) -> WorkflowError {
        WorkflowError::GenerationExhausted { attempts: self.max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{InMemoryGateway, UnitOfWork};
    use chrono::{Duration, NaiveDate, TimeZone};
    use gatepass_core::{InvitationId, UserId, VisitorId};
    use gatepass_invitations::{
        CreateInvitation, InitialStatus, Invitation, InvitationDetails, VisitRequirements,
        VisitWindow,
    };
    use std::sync::Mutex;

    /// Replays a fixed list of suffixes, repeating the last one.
    struct Scripted(Mutex<Vec<&'static str>>);

    impl NumberSource for Scripted {
        fn suffix(&self) -> String {
            let mut queue = self.0.lock().unwrap();
            if queue.len() > 1 {
                queue.remove(0).to_string()
            } else {
                queue[0].to_string()
            }
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, 8, 30, 0).unwrap()
    }

    async fn store_number(gateway: &InMemoryGateway, id: i64, suffix: &str) {
        let start = at() + Duration::hours(4);
        let cmd = CreateInvitation {
            invitation_id: InvitationId::new(id).unwrap(),
            number: InvitationNumber::compose(
                "VIS",
                NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
                suffix,
            )
            .unwrap(),
            details: InvitationDetails {
                visitor_id: VisitorId::new(),
                host_id: UserId::new(),
                purpose_id: None,
                location_id: None,
                template_id: None,
                schedule: VisitWindow {
                    start,
                    end: start + Duration::hours(1),
                },
                expected_visitor_count: 1,
                requirements: VisitRequirements::default(),
                subject: "Interview".to_string(),
                message: None,
                special_instructions: None,
                parking_instructions: None,
            },
            initial_status: InitialStatus::Draft,
            actor_id: UserId::new(),
            occurred_at: at(),
        };
        let (invitation, _) = Invitation::create(&cmd).unwrap();
        let mut tx = gateway.begin().await.unwrap();
        tx.insert_invitation(&invitation).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[test]
    fn random_suffixes_use_the_alphabet() {
        for _ in 0..100 {
            let suffix = RandomNumberSource.suffix();
            assert_eq!(suffix.len(), SUFFIX_LEN);
            assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn candidate_embeds_prefix_and_date() {
        let generator = NumberGenerator::new("GUEST", 10, Arc::new(Scripted(Mutex::new(vec!["ABC123"]))));
        let number = generator.candidate(at()).unwrap();
        assert_eq!(number.as_str(), "GUEST-20241201-ABC123");
    }

    #[tokio::test]
    async fn retries_past_collisions() {
        let gateway = InMemoryGateway::new();
        store_number(&gateway, 1, "AAAAAA").await;

        let source = Scripted(Mutex::new(vec!["AAAAAA", "AAAAAA", "BBBBBB"]));
        let generator = NumberGenerator::new("VIS", 10, Arc::new(source));
        let number = generator.generate(&gateway, at()).await.unwrap();
        assert_eq!(number.as_str(), "VIS-20241201-BBBBBB");
    }

    #[tokio::test]
    async fn exhausts_after_the_bound() {
        let gateway = InMemoryGateway::new();
        store_number(&gateway, 1, "AAAAAA").await;

        let generator =
            NumberGenerator::new("VIS", 3, Arc::new(Scripted(Mutex::new(vec!["AAAAAA"]))));
        let err = generator.generate(&gateway, at()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::GenerationExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn budget_is_shared_across_calls() {
        let gateway = InMemoryGateway::new();
        let source = Scripted(Mutex::new(vec!["AAAAAA", "BBBBBB", "CCCCCC"]));
        let generator = NumberGenerator::new("VIS", 2, Arc::new(source));

        let mut budget = generator.budget();
        let first = generator.generate_within(&gateway, at(), &mut budget).await.unwrap();
        let second = generator.generate_within(&gateway, at(), &mut budget).await.unwrap();
        assert_eq!(first.as_str(), "VIS-20241201-AAAAAA");
        assert_eq!(second.as_str(), "VIS-20241201-BBBBBB");
        assert_eq!(budget.used(), 2);

        let err = generator
            .generate_within(&gateway, at(), &mut budget)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::GenerationExhausted { attempts: 2 }));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let generator = NumberGenerator::new("VIS", 0, Arc::new(RandomNumberSource));
        assert_eq!(generator.max_attempts(), 1);
    }
}
