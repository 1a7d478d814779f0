//! Maps a scanned or typed reference to exactly one invitation.

use tracing::debug;

use gatepass_core::InvitationId;
use gatepass_invitations::{Invitation, InvitationNumber};

use crate::error::WorkflowError;
use crate::gateway::PersistenceGateway;

/// Lookup strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchedBy {
    SurrogateId,
    InvitationNumber,
    QrPayload,
}

impl MatchedBy {
    pub const CHAIN: [MatchedBy; 3] = [
        MatchedBy::SurrogateId,
        MatchedBy::InvitationNumber,
        MatchedBy::QrPayload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchedBy::SurrogateId => "surrogate_id",
            MatchedBy::InvitationNumber => "invitation_number",
            MatchedBy::QrPayload => "qr_payload",
        }
    }

    /// Run this strategy. A reference that does not parse for the strategy is
    /// a miss, not an error.
    async fn lookup<G>(self, gateway: &G, reference: &str) -> Result<Option<Invitation>, WorkflowError>
    where
        G: PersistenceGateway + ?Sized,
    {
        let found = match self {
            MatchedBy::SurrogateId => match reference.parse::<InvitationId>() {
                Ok(id) => gateway.invitation(id).await?,
                Err(_) => None,
            },
            MatchedBy::InvitationNumber => match InvitationNumber::parse(reference) {
                Ok(number) => gateway.invitation_by_number(&number).await?,
                Err(_) => None,
            },
            MatchedBy::QrPayload => gateway.invitation_by_qr(reference).await?,
        };
        Ok(found)
    }
}

/// Result of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub invitation: Invitation,
    pub matched_by: MatchedBy,
}

/// Resolve `reference` by trying each strategy of [`MatchedBy::CHAIN`]; the
/// first hit wins.
///
/// Surrounding whitespace (scanner CR/LF) is ignored. A blank reference is a
/// validation failure; no match at all is `NotFound`.
pub async fn resolve<G>(gateway: &G, reference: &str) -> Result<Resolved, WorkflowError>
where
    G: PersistenceGateway + ?Sized,
{
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(WorkflowError::ValidationFailed(
            "invitation reference must not be empty".to_string(),
        ));
    }

    for strategy in MatchedBy::CHAIN {
        if let Some(invitation) = strategy.lookup(gateway, reference).await? {
            debug!(
                matched_by = strategy.as_str(),
                invitation_id = %invitation.invitation_id(),
                "reference resolved"
            );
            return Ok(Resolved {
                invitation,
                matched_by: strategy,
            });
        }
    }

    Err(WorkflowError::not_found("invitation", reference))
}
