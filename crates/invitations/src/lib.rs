//! Visitor invitation domain module.
//!
//! This crate contains the business rules for invitations, implemented purely
//! as deterministic domain logic (no IO, no clock, no storage).

pub mod details;
pub mod invitation;
pub mod number;
pub mod status;

pub use details::{InvitationDetails, VisitRequirements, VisitWindow};
pub use invitation::{
    ApproveInvitation, CancelInvitation, CheckInVisitor, CheckOutVisitor, CreateInvitation,
    Invitation, InvitationApproved, InvitationCancelled, InvitationCommand, InvitationCreated,
    InvitationEvent, InvitationRejected, InvitationSnapshot, InvitationSubmitted,
    RejectInvitation, SubmitInvitation, VisitorCheckedIn, VisitorCheckedOut,
};
pub use number::InvitationNumber;
pub use status::{InitialStatus, InvitationStatus};
