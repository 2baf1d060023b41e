//! Durable audit trail of moderator actions
//!
//! Entries are keyed by time so a window of the log is one range scan, the
//! same layout the report history uses.
use crate::deal::TimeStamp;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    #[n(0)]
    DealOpened,
    #[n(1)]
    DealCompleted,
    #[n(2)]
    DealCancelled,
    #[n(3)]
    LimitGranted,
    #[n(4)]
    LimitRevoked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::DealOpened => "deal opened",
            AuditAction::DealCompleted => "deal completed",
            AuditAction::DealCancelled => "deal cancelled",
            AuditAction::LimitGranted => "limit granted",
            AuditAction::LimitRevoked => "limit revoked",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    #[n(0)]
    pub at: TimeStamp,
    #[n(1)]
    pub actor: String,
    #[n(2)]
    pub action: AuditAction,
    #[n(3)]
    pub subject: String, // deal id or moderator id
    #[n(4)]
    pub detail: String,
}

impl AuditEntry {
    pub fn new(
        at: TimeStamp,
        actor: impl Into<String>,
        action: AuditAction,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            at,
            actor: actor.into(),
            action,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

/// One line as it would be posted to a log channel.
impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} by {}",
            self.at.to_datetime_utc().format("%Y-%m-%d %H:%M:%S"),
            self.action.as_str(),
            self.subject,
            self.actor
        )?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_log_line() {
        let entry = AuditEntry::new(
            TimeStamp::new_with(2025, 5, 4, 10, 30, 0),
            "mod-a",
            AuditAction::DealOpened,
            "#Escrow3",
            "50 primary",
        );
        assert_eq!(
            entry.to_string(),
            "[2025-05-04 10:30:00] deal opened #Escrow3 by mod-a: 50 primary"
        );

        let bare = AuditEntry::new(
            TimeStamp::new_with(2025, 5, 4, 10, 30, 0),
            "owner",
            AuditAction::LimitRevoked,
            "mod-a",
            "",
        );
        assert_eq!(
            bare.to_string(),
            "[2025-05-04 10:30:00] limit revoked mod-a by owner"
        );
    }
}
