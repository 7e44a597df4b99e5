//! Recipient address classification.
//!
//! Every recipient address maps to exactly one family, in fixed
//! priority order; anything unrecognised falls into
//! [`AddressFamily::Unrecognized`] (which the router drops). There is
//! no unclassified state.

use crate::config::RouterConfig;

/// A system-command address at the user domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    /// `digestoff-<user>-<group>`: clear the digest preference.
    DigestOff {
        /// Target user.
        user_id: i64,
        /// Target group.
        group_id: i64,
    },
    /// `unsubscribe-<user>-<group>`: one-click membership removal.
    Unsubscribe {
        /// Target user.
        user_id: i64,
        /// Target group.
        group_id: i64,
    },
    /// `readreceipt-<chat>-<user>-<msg>`: chat read receipt.
    ReadReceipt {
        /// Chat room.
        chat_id: i64,
        /// Reading user.
        user_id: i64,
        /// Last message seen.
        chat_message_id: i64,
    },
    /// `handover-<tryst>-<user>`: calendar handover response.
    TrystResponse {
        /// Handover arrangement.
        tryst_id: i64,
        /// Responding user.
        user_id: i64,
    },
}

/// The closed set of address families a recipient can classify into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFamily {
    /// System-command address.
    SystemCommand(SystemCommand),
    /// `notify-<chat>-<user>[-<msg>]`: reply to a chat notification,
    /// pending the bounce check.
    ChatNotifyReply {
        /// Chat room the notification came from.
        chat_id: i64,
        /// User the notification was sent to.
        user_id: i64,
        /// Originating chat message, when encoded.
        chat_message_id: Option<i64>,
    },
    /// `bounce-<user>-<nonce>`: VERP return path.
    BounceReturnPath {
        /// User the bounced mail was sent to.
        user_id: i64,
    },
    /// `<short>@<group domain>`: candidate group post.
    GroupPost {
        /// Group short name.
        group: String,
    },
    /// `<short>-volunteers@<group domain>`: mail to group volunteers.
    GroupVolunteers {
        /// Group short name.
        group: String,
    },
    /// `<short>-subscribe@<group domain>`: membership add.
    GroupSubscribe {
        /// Group short name.
        group: String,
    },
    /// `<short>-unsubscribe@<group domain>`: membership removal.
    GroupUnsubscribe {
        /// Group short name.
        group: String,
    },
    /// No family matched; the router drops these.
    Unrecognized,
}

/// Classifies a recipient address into exactly one family.
///
/// Total over arbitrary input: malformed addresses, wrong domains and
/// non-numeric id segments all classify as `Unrecognized`.
#[must_use]
pub fn classify(recipient: &str, config: &RouterConfig) -> AddressFamily {
    let recipient = recipient.trim().to_lowercase();
    let Some((local, domain)) = recipient.split_once('@') else {
        return AddressFamily::Unrecognized;
    };

    if domain == config.user_domain {
        return classify_user_local(local);
    }

    if domain == config.group_domain {
        return classify_group_local(local);
    }

    AddressFamily::Unrecognized
}

fn classify_user_local(local: &str) -> AddressFamily {
    if let Some(rest) = local.strip_prefix("digestoff-") {
        if let Some([user_id, group_id]) = numeric_segments::<2>(rest) {
            return AddressFamily::SystemCommand(SystemCommand::DigestOff { user_id, group_id });
        }
    }

    if let Some(rest) = local.strip_prefix("unsubscribe-") {
        if let Some([user_id, group_id]) = numeric_segments::<2>(rest) {
            return AddressFamily::SystemCommand(SystemCommand::Unsubscribe { user_id, group_id });
        }
    }

    if let Some(rest) = local.strip_prefix("readreceipt-") {
        if let Some([chat_id, user_id, chat_message_id]) = numeric_segments::<3>(rest) {
            return AddressFamily::SystemCommand(SystemCommand::ReadReceipt {
                chat_id,
                user_id,
                chat_message_id,
            });
        }
    }

    if let Some(rest) = local.strip_prefix("handover-") {
        if let Some([tryst_id, user_id]) = numeric_segments::<2>(rest) {
            return AddressFamily::SystemCommand(SystemCommand::TrystResponse { tryst_id, user_id });
        }
    }

    if let Some(rest) = local.strip_prefix("notify-") {
        let segments: Vec<&str> = rest.split('-').collect();
        if segments.len() >= 2 {
            if let (Ok(chat_id), Ok(user_id)) =
                (segments[0].parse::<i64>(), segments[1].parse::<i64>())
            {
                let chat_message_id = segments.get(2).and_then(|s| s.parse::<i64>().ok());
                return AddressFamily::ChatNotifyReply {
                    chat_id,
                    user_id,
                    chat_message_id,
                };
            }
        }
    }

    if let Some(rest) = local.strip_prefix("bounce-") {
        // bounce-<user>-<nonce>; the nonce is opaque
        if let Some((user, nonce)) = rest.split_once('-') {
            if !nonce.is_empty() {
                if let Ok(user_id) = user.parse::<i64>() {
                    return AddressFamily::BounceReturnPath { user_id };
                }
            }
        }
    }

    AddressFamily::Unrecognized
}

fn classify_group_local(local: &str) -> AddressFamily {
    if let Some(group) = local.strip_suffix("-volunteers") {
        if !group.is_empty() {
            return AddressFamily::GroupVolunteers {
                group: group.to_string(),
            };
        }
    }

    if let Some(group) = local.strip_suffix("-subscribe") {
        if !group.is_empty() {
            return AddressFamily::GroupSubscribe {
                group: group.to_string(),
            };
        }
    }

    if let Some(group) = local.strip_suffix("-unsubscribe") {
        if !group.is_empty() {
            return AddressFamily::GroupUnsubscribe {
                group: group.to_string(),
            };
        }
    }

    if local.is_empty() {
        return AddressFamily::Unrecognized;
    }

    AddressFamily::GroupPost {
        group: local.to_string(),
    }
}

/// Parses exactly N dash-separated numeric segments.
fn numeric_segments<const N: usize>(s: &str) -> Option<[i64; N]> {
    let mut out = [0i64; N];
    let mut segments = s.split('-');
    for slot in &mut out {
        *slot = segments.next()?.parse().ok()?;
    }
    segments.next().is_none().then_some(out)
}
