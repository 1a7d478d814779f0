//! Workflow configuration.

use std::time::Duration;

use tracing::warn;

use gatepass_invitations::number::validate_prefix;

pub const DEFAULT_NUMBER_PREFIX: &str = "VIS";
pub const DEFAULT_NUMBER_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_APPROVER_ROLE: &str = "approver";
pub const DEFAULT_SECURITY_ROLE: &str = "security";

/// Tunables of the invitation workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Prefix of generated invitation numbers (1-8 uppercase letters).
    pub number_prefix: String,
    /// Candidates tried before giving up with `GenerationExhausted` (>= 1).
    pub number_max_attempts: u32,
    /// Upper bound on one unit of work, begin to commit.
    pub transaction_timeout: Duration,
    /// Role notified when an invitation waits for approval.
    pub approver_role: String,
    /// Role notified when a visitor who needs an escort checks in.
    pub security_role: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            number_prefix: DEFAULT_NUMBER_PREFIX.to_string(),
            number_max_attempts: DEFAULT_NUMBER_MAX_ATTEMPTS,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            approver_role: DEFAULT_APPROVER_ROLE.to_string(),
            security_role: DEFAULT_SECURITY_ROLE.to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Load from `GATEPASS_*` environment variables.
    ///
    /// Absent variables keep their default; invalid ones are logged and also
    /// fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WorkflowConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(prefix) = lookup("GATEPASS_NUMBER_PREFIX") {
            let prefix = prefix.trim().to_string();
            match validate_prefix(&prefix) {
                Ok(()) => config.number_prefix = prefix,
                Err(e) => warn!(error = %e, "ignoring GATEPASS_NUMBER_PREFIX"),
            }
        }

        if let Some(raw) = lookup("GATEPASS_NUMBER_MAX_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(0) => {
                    warn!("GATEPASS_NUMBER_MAX_ATTEMPTS must be at least 1; using 1");
                    config.number_max_attempts = 1;
                }
                Ok(attempts) => config.number_max_attempts = attempts,
                Err(e) => warn!(value = %raw, error = %e, "ignoring GATEPASS_NUMBER_MAX_ATTEMPTS"),
            }
        }

        if let Some(raw) = lookup("GATEPASS_TX_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.transaction_timeout = Duration::from_millis(ms),
                Ok(_) => warn!("GATEPASS_TX_TIMEOUT_MS must be positive; keeping default"),
                Err(e) => warn!(value = %raw, error = %e, "ignoring GATEPASS_TX_TIMEOUT_MS"),
            }
        }

        if let Some(role) = non_blank(lookup("GATEPASS_APPROVER_ROLE")) {
            config.approver_role = role;
        }
        if let Some(role) = non_blank(lookup("GATEPASS_SECURITY_ROLE")) {
            config.security_role = role;
        }

        config
    }

    /// Use `prefix` for new invitation numbers. An invalid prefix is logged
    /// and the current one is kept.
    pub fn with_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        match validate_prefix(&prefix) {
            Ok(()) => self.number_prefix = prefix,
            Err(e) => warn!(error = %e, prefix = %prefix, "ignoring invalid number prefix"),
        }
        self
    }

    pub fn with_number_max_attempts(mut self, attempts: u32) -> Self {
        self.number_max_attempts = attempts.max(1);
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
