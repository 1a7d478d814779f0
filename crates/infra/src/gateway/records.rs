//! Reference data read alongside invitations.
//!
//! These records are owned by the administration layer; the workflow only
//! reads them, except for the visitor statistics and template usage counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatepass_core::{LocationId, PurposeId, TemplateId, UserId, VisitorId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    pub role: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub id: VisitorId,
    pub full_name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub is_vip: bool,
    /// Number of invitations with a recorded check-in.
    pub visit_count: u64,
    pub last_visit_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurposeRecord {
    pub id: PurposeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: LocationId,
    pub name: String,
    pub max_capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub name: String,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}
