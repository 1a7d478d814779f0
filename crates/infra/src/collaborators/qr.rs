//! QR payload encoding.
//!
//! The payload is opaque to everything but the encoder; resolution matches it
//! byte for byte against the stored value.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatepass_core::{InvitationId, VisitorId};
use gatepass_invitations::{Invitation, InvitationNumber};

pub const QR_PAYLOAD_PREFIX: &str = "GPQR1.";

#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR facts could not be serialized: {0}")]
    Serialize(String),

    #[error("QR payload is malformed: {0}")]
    Malformed(String),

    #[error("QR encoder failed: {0}")]
    Encoder(String),
}

/// The facts encoded into an invitation's QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrFacts {
    pub invitation_id: InvitationId,
    pub invitation_number: InvitationNumber,
    pub visitor_id: VisitorId,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
}

impl QrFacts {
    pub fn for_invitation(invitation: &Invitation) -> Self {
        let details = invitation.details();
        Self {
            invitation_id: invitation.invitation_id(),
            invitation_number: invitation.number().clone(),
            visitor_id: details.visitor_id,
            scheduled_start: details.schedule.start,
            scheduled_end: details.schedule.end,
        }
    }
}

/// Turns invitation facts into a scannable payload. Must be deterministic.
pub trait QrEncoder: Send + Sync {
    fn encode(&self, facts: &QrFacts) -> Result<String, QrError>;
}

/// `GPQR1.` followed by the URL-safe, unpadded base64 of the JSON facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64QrEncoder;

impl Base64QrEncoder {
    /// Recover the facts from a payload produced by [`Base64QrEncoder::encode`].
    pub fn decode(&self, payload: &str) -> Result<QrFacts, QrError> {
        let body = payload
            .strip_prefix(QR_PAYLOAD_PREFIX)
            .ok_or_else(|| QrError::Malformed(format!("missing {QR_PAYLOAD_PREFIX} prefix")))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| QrError::Malformed(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| QrError::Malformed(e.to_string()))
    }
}

impl QrEncoder for Base64QrEncoder {
    fn encode(&self, facts: &QrFacts) -> Result<String, QrError> {
        let json = serde_json::to_vec(facts).map_err(|e| QrError::Serialize(e.to_string()))?;
        Ok(format!("{QR_PAYLOAD_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn facts() -> QrFacts {
        QrFacts {
            invitation_id: InvitationId::new(12).unwrap(),
            invitation_number: InvitationNumber::compose(
                "VIS",
                NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
                "Q9Q9Q9",
            )
            .unwrap(),
            visitor_id: VisitorId::new(),
            scheduled_start: Utc.with_ymd_and_hms(2024, 12, 1, 13, 0, 0).unwrap(),
            scheduled_end: Utc.with_ymd_and_hms(2024, 12, 1, 14, 0, 0).unwrap(),
        }
    }

    #[test]
    fn encoding_is_deterministic_and_prefixed() {
        let facts = facts();
        let a = Base64QrEncoder.encode(&facts).unwrap();
        let b = Base64QrEncoder.encode(&facts).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(QR_PAYLOAD_PREFIX));
        assert!(!a.contains(['+', '/', '=', ' ']));
    }

    #[test]
    fn decode_recovers_the_facts() {
        let facts = facts();
        let payload = Base64QrEncoder.encode(&facts).unwrap();
        assert_eq!(Base64QrEncoder.decode(&payload).unwrap(), facts);
    }

    #[test]
    fn decode_rejects_foreign_payloads() {
        assert!(matches!(
            Base64QrEncoder.decode("VIS-20241201-Q9Q9Q9"),
            Err(QrError::Malformed(_))
        ));
        assert!(Base64QrEncoder.decode("GPQR1.***").is_err());
    }
}
