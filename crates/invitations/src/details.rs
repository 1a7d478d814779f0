//! Invitation creation input and its field rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatepass_core::{DomainError, LocationId, PurposeId, TemplateId, UserId, VisitorId};

pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 2000;

/// Scheduled visit window (UTC). `end` must be strictly after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl VisitWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.end <= self.start {
            return Err(DomainError::validation(format!(
                "scheduled end ({}) must be after scheduled start ({})",
                self.end.to_rfc3339(),
                self.start.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// The window has closed at `at`.
    pub fn has_ended(&self, at: DateTime<Utc>) -> bool {
        at >= self.end
    }
}

/// Requirement flags the front desk must honor on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisitRequirements {
    pub requires_escort: bool,
    pub requires_badge: bool,
    pub requires_parking: bool,
}

/// Everything the requester supplies when creating an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationDetails {
    pub visitor_id: VisitorId,
    pub host_id: UserId,
    pub purpose_id: Option<PurposeId>,
    pub location_id: Option<LocationId>,
    pub template_id: Option<TemplateId>,
    pub schedule: VisitWindow,
    pub expected_visitor_count: u32,
    pub requirements: VisitRequirements,
    pub subject: String,
    pub message: Option<String>,
    pub special_instructions: Option<String>,
    pub parking_instructions: Option<String>,
}

impl InvitationDetails {
    /// Field rules checked before anything touches the store.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.schedule.validate()?;

        if self.expected_visitor_count < 1 {
            return Err(DomainError::validation(
                "expected visitor count must be at least 1",
            ));
        }

        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(DomainError::validation("subject must not be empty"));
        }
        if subject.chars().count() > MAX_SUBJECT_LEN {
            return Err(DomainError::validation(format!(
                "subject must be at most {MAX_SUBJECT_LEN} characters"
            )));
        }

        for (field, value) in [
            ("message", &self.message),
            ("special_instructions", &self.special_instructions),
            ("parking_instructions", &self.parking_instructions),
        ] {
            if let Some(text) = value {
                if text.chars().count() > MAX_TEXT_LEN {
                    return Err(DomainError::validation(format!(
                        "{field} must be at most {MAX_TEXT_LEN} characters"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn details() -> InvitationDetails {
        InvitationDetails {
            visitor_id: VisitorId::new(),
            host_id: UserId::new(),
            purpose_id: None,
            location_id: None,
            template_id: None,
            schedule: VisitWindow {
                start: Utc.with_ymd_and_hms(2024, 12, 1, 13, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 12, 1, 14, 0, 0).unwrap(),
            },
            expected_visitor_count: 1,
            requirements: VisitRequirements::default(),
            subject: "Quarterly review".to_string(),
            message: None,
            special_instructions: None,
            parking_instructions: None,
        }
    }

    #[test]
    fn valid_details_pass() {
        assert!(details().validate().is_ok());
    }

    #[test]
    fn end_before_start_is_rejected() {
        let mut d = details();
        d.schedule = VisitWindow {
            start: Utc.with_ymd_and_hms(2024, 12, 1, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 12, 1, 13, 0, 0).unwrap(),
        };
        assert!(matches!(d.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn zero_length_window_is_rejected() {
        let at = Utc.with_ymd_and_hms(2024, 12, 1, 14, 0, 0).unwrap();
        assert!(VisitWindow::new(at, at).is_err());
    }

    #[test]
    fn zero_visitors_is_rejected() {
        let mut d = details();
        d.expected_visitor_count = 0;
        assert!(matches!(d.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn blank_subject_is_rejected() {
        let mut d = details();
        d.subject = "   ".to_string();
        assert!(matches!(d.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn oversized_free_text_is_rejected() {
        let mut d = details();
        d.special_instructions = Some("x".repeat(MAX_TEXT_LEN + 1));
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("special_instructions"));
    }
}
