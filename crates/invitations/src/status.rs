//! Invitation status lifecycle.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use gatepass_core::DomainError;

/// Invitation status lifecycle.
///
/// ```text
/// Draft ──submit──▶ Submitted ─┬─approve─▶ Approved ──check-in──▶ CheckedIn ──check-out──▶ CheckedOut
///                  UnderReview ┘   └─reject─▶ Rejected
///
/// Draft | Submitted | UnderReview | Approved ──cancel──▶ Cancelled
/// Draft | Submitted | UnderReview | Approved ──(end passes)──▶ Expired   (lazy)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    CheckedIn,
    CheckedOut,
    Cancelled,
    Expired,
}

impl InvitationStatus {
    pub const ALL: [InvitationStatus; 9] = [
        InvitationStatus::Draft,
        InvitationStatus::Submitted,
        InvitationStatus::UnderReview,
        InvitationStatus::Approved,
        InvitationStatus::Rejected,
        InvitationStatus::CheckedIn,
        InvitationStatus::CheckedOut,
        InvitationStatus::Cancelled,
        InvitationStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvitationStatus::Draft => "draft",
            InvitationStatus::Submitted => "submitted",
            InvitationStatus::UnderReview => "under_review",
            InvitationStatus::Approved => "approved",
            InvitationStatus::Rejected => "rejected",
            InvitationStatus::CheckedIn => "checked_in",
            InvitationStatus::CheckedOut => "checked_out",
            InvitationStatus::Cancelled => "cancelled",
            InvitationStatus::Expired => "expired",
        }
    }

    /// No further transition is possible from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvitationStatus::Rejected
                | InvitationStatus::Cancelled
                | InvitationStatus::CheckedOut
                | InvitationStatus::Expired
        )
    }

    /// Waiting on an approver decision.
    pub fn is_pending_approval(self) -> bool {
        matches!(self, InvitationStatus::Submitted | InvitationStatus::UnderReview)
    }

    /// Statuses that lapse to `Expired` once the schedule end passes.
    pub fn can_expire(self) -> bool {
        matches!(
            self,
            InvitationStatus::Draft
                | InvitationStatus::Submitted
                | InvitationStatus::UnderReview
                | InvitationStatus::Approved
        )
    }

    /// Any non-terminal status before the visitor has arrived.
    pub fn can_be_cancelled(self) -> bool {
        !self.is_terminal() && self != InvitationStatus::CheckedIn
    }

    /// Physical deletion is only allowed for invitations that never happened.
    pub fn is_deletable(self) -> bool {
        matches!(self, InvitationStatus::Cancelled | InvitationStatus::Rejected)
    }
}

impl core::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvitationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown invitation status: {s:?}")))
    }
}

/// Status an invitation is created in.
///
/// `Submitted` and `UnderReview` bypass the draft stage and go straight to the
/// approvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialStatus {
    #[default]
    Draft,
    Submitted,
    UnderReview,
}

impl From<InitialStatus> for InvitationStatus {
    fn from(value: InitialStatus) -> Self {
        match value {
            InitialStatus::Draft => InvitationStatus::Draft,
            InitialStatus::Submitted => InvitationStatus::Submitted,
            InitialStatus::UnderReview => InvitationStatus::UnderReview,
        }
    }
}
