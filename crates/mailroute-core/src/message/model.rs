//! Message data models.

use crate::outcome::RoutingOutcome;

/// Which moderation queue a stored group post lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// Live on the group.
    Approved,
    /// Held for moderator review.
    Pending,
    /// Quarantined for moderator review as spam.
    Spam,
}

impl Collection {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Pending => "Pending",
            Self::Spam => "Spam",
        }
    }
}

/// A previously stored message, as the duplicate check sees it.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Row id.
    pub id: i64,
    /// Message-ID it was stored under, possibly group-suffixed.
    pub message_id: String,
    /// Outcome recorded at storage time.
    pub outcome: Option<RoutingOutcome>,
    /// Sending user, when known.
    pub from_user: Option<i64>,
}

/// A new group post ready to store.
#[derive(Debug, Clone)]
pub struct NewPost {
    /// Message-ID, already group-suffixed.
    pub message_id: String,
    /// SMTP envelope sender.
    pub envelope_from: String,
    /// Sending user.
    pub from_user: i64,
    /// Derived from-address.
    pub from_address: String,
    /// Decoded subject.
    pub subject: String,
    /// Plain-text body.
    pub text_body: String,
    /// Outcome being recorded.
    pub outcome: RoutingOutcome,
    /// Spam diagnostic, for posts stored as spam.
    pub spam_reason: Option<String>,
    /// Target group.
    pub group_id: i64,
    /// Queue the post lands in.
    pub collection: Collection,
}

/// A chat-bound email ready to store.
#[derive(Debug, Clone)]
pub struct NewChatEmail {
    /// Message-ID (generated when the mail carried none).
    pub message_id: String,
    /// SMTP envelope sender.
    pub envelope_from: String,
    /// Sending user.
    pub from_user: i64,
    /// Derived from-address.
    pub from_address: String,
    /// Decoded subject.
    pub subject: String,
    /// Plain-text body stored as the chat message.
    pub text_body: String,
    /// Target chat room.
    pub chat_id: i64,
    /// Outcome being recorded.
    pub outcome: RoutingOutcome,
}
