//! Read projections returned by the workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatepass_core::InvitationId;
use gatepass_invitations::{Invitation, InvitationNumber, InvitationSnapshot, InvitationStatus};

use crate::resolver::MatchedBy;

/// Invitation as seen at `observed_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationView {
    #[serde(flatten)]
    pub invitation: InvitationSnapshot,
    /// Stored status with lazy expiry applied.
    pub effective_status: InvitationStatus,
    pub can_be_cancelled: bool,
    pub is_deletable: bool,
    pub observed_at: DateTime<Utc>,
}

impl InvitationView {
    pub fn new(invitation: &Invitation, observed_at: DateTime<Utc>) -> Self {
        Self {
            invitation: invitation.snapshot().clone(),
            effective_status: invitation.effective_status(observed_at),
            can_be_cancelled: invitation.can_be_cancelled(observed_at),
            is_deletable: invitation.is_deletable(),
            observed_at,
        }
    }

    pub fn id(&self) -> InvitationId {
        self.invitation.id
    }

    pub fn number(&self) -> &InvitationNumber {
        &self.invitation.number
    }
}

/// A view plus the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedView {
    pub view: InvitationView,
    pub matched_by: MatchedBy,
}

/// Receipt of a physical deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedInvitation {
    pub id: InvitationId,
    pub number: InvitationNumber,
    pub final_status: InvitationStatus,
    pub events_removed: u64,
}
