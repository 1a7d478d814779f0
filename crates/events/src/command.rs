use chrono::{DateTime, Utc};

use gatepass_core::UserId;

/// A command carries the **intent** of an actor at a given instant.
///
/// Commands are transient (never persisted) and are turned into exactly one
/// event when accepted. Rejected commands leave no trace in the audit trail.
///
/// The instant is part of the command so that time-dependent rules (lazy
/// expiry) stay deterministic: aggregates never read the clock.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// The acting user.
    fn actor_id(&self) -> UserId;

    /// When the command was issued.
    fn occurred_at(&self) -> DateTime<Utc>;
}
