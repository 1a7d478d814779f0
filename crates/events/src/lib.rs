//! Audit event mechanics shared by the workflow engine.
//!
//! Domain crates describe *what happened* through the [`Event`] trait; the
//! records in [`record`] are what the persistence gateway appends to an
//! invitation's audit trail.

pub mod command;
pub mod event;
pub mod record;

pub use command::Command;
pub use event::Event;
pub use record::{StoredEvent, UncommittedEvent};
