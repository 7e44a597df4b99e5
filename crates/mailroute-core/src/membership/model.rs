//! Membership data models.

use serde::Serialize;

/// Per-membership posting status. An explicit value always wins over
/// the group's own moderation default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PostingStatus {
    /// Follow the group default.
    Default,
    /// Posts go straight to Approved.
    Unmoderated,
    /// Posts are held for moderation.
    Moderated,
    /// Posts are discarded.
    Prohibited,
}

impl PostingStatus {
    /// Parses the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEFAULT" => Some(Self::Default),
            "UNMODERATED" => Some(Self::Unmoderated),
            "MODERATED" => Some(Self::Moderated),
            "PROHIBITED" => Some(Self::Prohibited),
            _ => None,
        }
    }

    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Unmoderated => "UNMODERATED",
            Self::Moderated => "MODERATED",
            Self::Prohibited => "PROHIBITED",
        }
    }
}

/// Role of a member within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Ordinary member.
    Member,
    /// Moderator. Moderator-initiated posts are held for review.
    Moderator,
    /// Group owner, treated as a moderator for routing.
    Owner,
}

impl Role {
    /// Parses the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Member" => Some(Self::Member),
            "Moderator" => Some(Self::Moderator),
            "Owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Member => "Member",
            Self::Moderator => "Moderator",
            Self::Owner => "Owner",
        }
    }

    /// Whether this role moderates the group.
    #[must_use]
    pub const fn is_moderator(self) -> bool {
        matches!(self, Self::Moderator | Self::Owner)
    }
}

/// A community group.
#[derive(Debug, Clone)]
pub struct Group {
    /// Row id.
    pub id: i64,
    /// Short name, the local part of the group's post address.
    pub short_name: String,
    /// Group moderation default: hold posts for review.
    pub moderated: bool,
    /// Emergency override forcing every post to Pending.
    pub moderate_all: bool,
}

/// A user's membership of one group.
#[derive(Debug, Clone)]
pub struct Membership {
    /// Member.
    pub user_id: i64,
    /// Group.
    pub group_id: i64,
    /// Role within the group.
    pub role: Role,
    /// Explicit posting status, when set.
    pub posting_status: PostingStatus,
    /// Mail frequency in hours; 0 means digest off.
    pub email_frequency: i64,
}

/// One address registered to a user.
#[derive(Debug, Clone)]
pub struct UserEmail {
    /// Row id, the key the bounce ledger records against.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// The address itself, stored lowercase.
    pub email: String,
    /// Preferred delivery address for the user.
    pub preferred: bool,
    /// First-bounce timestamp, unset until a permanent bounce lands.
    pub bounced: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posting_status_round_trip() {
        for status in [
            PostingStatus::Default,
            PostingStatus::Unmoderated,
            PostingStatus::Moderated,
            PostingStatus::Prohibited,
        ] {
            assert_eq!(PostingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PostingStatus::parse("bogus"), None);
    }

    #[test]
    fn test_role_moderates() {
        assert!(!Role::Member.is_moderator());
        assert!(Role::Moderator.is_moderator());
        assert!(Role::Owner.is_moderator());
        assert_eq!(Role::parse("Owner"), Some(Role::Owner));
        assert_eq!(Role::parse(""), None);
    }
}
