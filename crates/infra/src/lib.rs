//! Infrastructure layer: persistence gateways, collaborators and the
//! invitation workflow built on top of them.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identifier;
pub mod orchestrator;
pub mod resolver;
pub mod side_effects;
pub mod view;

mod integration_tests;

pub use config::WorkflowConfig;
pub use error::{WorkflowError, WorkflowErrorKind};
pub use orchestrator::{NewInvitation, WorkflowOrchestrator};
pub use view::{DeletedInvitation, InvitationView, ResolvedView};
