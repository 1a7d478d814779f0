use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use gatepass_core::UserId;

/// A domain-agnostic audit event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "invitation.checked_in").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// The user whose action produced the event.
    fn actor_id(&self) -> UserId;

    /// Human-readable, single-line summary for the audit trail.
    fn description(&self) -> String;

    /// Optional structured details (reasons, operator notes).
    fn payload(&self) -> Option<JsonValue> {
        None
    }
}
