//! Capacity checks on invitation creation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatepass_core::LocationId;
use gatepass_invitations::VisitWindow;

/// What the oracle is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityRequest {
    pub location_id: Option<LocationId>,
    pub when: DateTime<Utc>,
    pub expected_visitor_count: u32,
    pub is_vip: bool,
}

/// Oracle answer. A denial explains itself and may suggest other windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityVerdict {
    pub is_available: bool,
    pub messages: Vec<String>,
    pub alternative_slots: Vec<VisitWindow>,
}

impl CapacityVerdict {
    pub fn available() -> Self {
        Self {
            is_available: true,
            messages: Vec::new(),
            alternative_slots: Vec::new(),
        }
    }

    pub fn denied(
        messages: impl IntoIterator<Item = impl Into<String>>,
        alternative_slots: Vec<VisitWindow>,
    ) -> Self {
        Self {
            is_available: false,
            messages: messages.into_iter().map(Into::into).collect(),
            alternative_slots,
        }
    }
}

/// Black-box capacity check.
///
/// An `Err` means the oracle itself failed, not that capacity is exhausted.
#[async_trait]
pub trait CapacityOracle: Send + Sync {
    async fn validate(&self, request: &CapacityRequest) -> anyhow::Result<CapacityVerdict>;
}

/// Oracle that never denies.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedCapacity;

#[async_trait]
impl CapacityOracle for UnlimitedCapacity {
    async fn validate(&self, _request: &CapacityRequest) -> anyhow::Result<CapacityVerdict> {
        Ok(CapacityVerdict::available())
    }
}
