//! External collaborators the workflow consults but does not own.

pub mod capacity;
pub mod notification;
pub mod qr;

pub use capacity::{CapacityOracle, CapacityRequest, CapacityVerdict, UnlimitedCapacity};
pub use notification::{LoggingNotificationSink, Notification, NotificationKind, NotificationSink};
pub use qr::{Base64QrEncoder, QR_PAYLOAD_PREFIX, QrEncoder, QrError, QrFacts};
