//! Fire-and-forget notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use gatepass_core::{InvitationId, UserId};
use gatepass_invitations::InvitationNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InvitationCreated,
    ApprovalRequested,
    InvitationApproved,
    InvitationRejected,
    EscortRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub invitation_id: InvitationId,
    pub invitation_number: InvitationNumber,
    pub subject: String,
    pub body: String,
}

/// Delivery channel for notifications.
///
/// Errors are reported back so the caller can log them; the workflow never
/// propagates them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_user(&self, user_id: UserId, notification: &Notification) -> anyhow::Result<()>;

    async fn notify_role(&self, role: &str, notification: &Notification) -> anyhow::Result<()>;
}

/// Sink that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify_user(&self, user_id: UserId, notification: &Notification) -> anyhow::Result<()> {
        info!(
            recipient = %user_id,
            kind = ?notification.kind,
            invitation_number = %notification.invitation_number,
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }

    async fn notify_role(&self, role: &str, notification: &Notification) -> anyhow::Result<()> {
        info!(
            role,
            kind = ?notification.kind,
            invitation_number = %notification.invitation_number,
            subject = %notification.subject,
            "role notification"
        );
        Ok(())
    }
}
