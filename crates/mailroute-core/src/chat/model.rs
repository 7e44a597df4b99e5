//! Chat data models.

/// Kind of chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    /// Between two members.
    User2User,
    /// Between a member and a group's volunteers.
    User2Mod,
}

impl ChatType {
    /// Parses the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "User2User" => Some(Self::User2User),
            "User2Mod" => Some(Self::User2Mod),
            _ => None,
        }
    }

    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User2User => "User2User",
            Self::User2Mod => "User2Mod",
        }
    }
}

/// A chat room.
#[derive(Debug, Clone)]
pub struct ChatRoom {
    /// Row id, the id encoded in notify addresses.
    pub id: i64,
    /// Room kind.
    pub chat_type: ChatType,
    /// First participant.
    pub user1: Option<i64>,
    /// Second participant, for member-to-member rooms.
    pub user2: Option<i64>,
    /// Owning group, for volunteer rooms.
    pub group_id: Option<i64>,
    /// Latest chat message id, bumped on every store.
    pub latest_message: Option<i64>,
}

impl ChatRoom {
    /// Whether a user may post into this room.
    #[must_use]
    pub fn involves(&self, user_id: i64) -> bool {
        self.user1 == Some(user_id) || self.user2 == Some(user_id)
    }
}

/// A member's accept/decline answer to a handover arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrystResponse {
    /// Confirmed the arrangement.
    Accepted,
    /// Declined the arrangement.
    Declined,
}

impl TrystResponse {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Declined => "Declined",
        }
    }
}

/// A handover arrangement between two members.
#[derive(Debug, Clone)]
pub struct Tryst {
    /// Row id, the id encoded in handover addresses.
    pub id: i64,
    /// First party.
    pub user1: i64,
    /// Second party.
    pub user2: i64,
}

impl Tryst {
    /// Whether a user is a party to this arrangement.
    #[must_use]
    pub const fn involves(&self, user_id: i64) -> bool {
        self.user1 == user_id || self.user2 == user_id
    }
}
