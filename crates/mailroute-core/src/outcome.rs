//! Routing outcomes and decision context.

use serde::{Deserialize, Serialize};

use crate::membership::{PostingStatus, Role};

/// Terminal classification result of processing one inbound message.
///
/// Exactly one outcome is produced per message and it is never
/// revised afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingOutcome {
    /// Routing failed (unparseable input).
    Failure,
    /// Message stored for moderator review as spam.
    IncomingSpam,
    /// Message approved and posted to a group.
    Approved,
    /// Message held for moderator approval.
    Pending,
    /// Message stored as a chat message to a user.
    ToUser,
    /// System command handled (digest off, unsubscribe, bounce, ...).
    ToSystem,
    /// Read receipt processed.
    Receipt,
    /// Handover/calendar response processed.
    Tryst,
    /// Message dropped or unroutable.
    Dropped,
    /// Message delivered to the group's volunteer chat.
    ToVolunteers,
}

impl RoutingOutcome {
    /// Parse from a stored string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Failure" => Some(Self::Failure),
            "IncomingSpam" => Some(Self::IncomingSpam),
            "Approved" => Some(Self::Approved),
            "Pending" => Some(Self::Pending),
            "ToUser" => Some(Self::ToUser),
            "ToSystem" => Some(Self::ToSystem),
            "Receipt" => Some(Self::Receipt),
            "Tryst" => Some(Self::Tryst),
            "Dropped" => Some(Self::Dropped),
            "ToVolunteers" => Some(Self::ToVolunteers),
            _ => None,
        }
    }

    /// Convert to the stored string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Failure => "Failure",
            Self::IncomingSpam => "IncomingSpam",
            Self::Approved => "Approved",
            Self::Pending => "Pending",
            Self::ToUser => "ToUser",
            Self::ToSystem => "ToSystem",
            Self::Receipt => "Receipt",
            Self::Tryst => "Tryst",
            Self::Dropped => "Dropped",
            Self::ToVolunteers => "ToVolunteers",
        }
    }

    /// Whether this outcome stored a moderator-visible message row.
    #[must_use]
    pub const fn is_saved(self) -> bool {
        matches!(self, Self::Approved | Self::Pending | Self::IncomingSpam)
    }

    /// Whether this outcome discarded the message.
    #[must_use]
    pub const fn is_discarded(self) -> bool {
        matches!(self, Self::Dropped | Self::Failure)
    }
}

impl std::fmt::Display for RoutingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral decision trace attached to an outcome for diagnosis.
///
/// Not part of the outcome's identity; consumed by logging and by the
/// replay harness when explaining mismatches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingContext {
    /// Human-readable reason for the decision.
    pub reason: Option<String>,
    /// User the decision concerned.
    pub user_id: Option<i64>,
    /// Group the decision concerned.
    pub group_id: Option<i64>,
    /// Chat the decision concerned.
    pub chat_id: Option<i64>,
    /// Row id of the stored message, if one was written.
    pub message_row_id: Option<i64>,
    /// Posting-status override in effect, if any.
    pub posting_status: Option<PostingStatus>,
    /// Sender's membership role.
    pub membership_role: Option<Role>,
    /// Whether the group's moderation default was on.
    pub group_moderated: Option<bool>,
    /// Whether a membership-level override decided the outcome.
    pub override_applied: bool,
}

impl RoutingContext {
    /// Context consisting only of a drop/decision reason.
    #[must_use]
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// One routing decision: the terminal outcome plus its trace.
///
/// In dry-run mode this describes what would have been written.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// The terminal outcome.
    pub outcome: RoutingOutcome,
    /// Diagnostic trace for the decision.
    pub context: RoutingContext,
}

impl RoutingDecision {
    pub(crate) fn new(outcome: RoutingOutcome, context: RoutingContext) -> Self {
        Self { outcome, context }
    }

    pub(crate) fn dropped(reason: impl Into<String>) -> Self {
        Self::new(RoutingOutcome::Dropped, RoutingContext::reason(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RoutingOutcome; 10] = [
        RoutingOutcome::Failure,
        RoutingOutcome::IncomingSpam,
        RoutingOutcome::Approved,
        RoutingOutcome::Pending,
        RoutingOutcome::ToUser,
        RoutingOutcome::ToSystem,
        RoutingOutcome::Receipt,
        RoutingOutcome::Tryst,
        RoutingOutcome::Dropped,
        RoutingOutcome::ToVolunteers,
    ];

    #[test]
    fn test_outcome_string_roundtrip() {
        for outcome in ALL {
            assert_eq!(RoutingOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }

    #[test]
    fn test_unknown_outcome_string() {
        assert_eq!(RoutingOutcome::parse("Error"), None);
    }

    #[test]
    fn test_saved_and_discarded_partition() {
        for outcome in ALL {
            assert!(!(outcome.is_saved() && outcome.is_discarded()));
        }
        assert!(RoutingOutcome::Approved.is_saved());
        assert!(RoutingOutcome::IncomingSpam.is_saved());
        assert!(RoutingOutcome::Dropped.is_discarded());
    }
}
