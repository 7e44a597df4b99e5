//! The routing engine.
//!
//! One terminal [`RoutingOutcome`] per message. The duplicate check
//! runs before everything else so MTA retries are idempotent, and
//! commit mode and dry-run mode never diverge in their decision, only
//! in whether storage is touched. The replay harness relies on that
//! equivalence.

use chrono::{Duration, Utc};
use tracing::debug;

use mailroute_mime::ParsedMail;

use crate::Result;
use crate::address::{self, AddressFamily, SystemCommand};
use crate::bounce::{self, BounceVerdict};
use crate::chat::{ChatRoom, TrystResponse};
use crate::config::RouterConfig;
use crate::ledger::BounceRecord;
use crate::membership::{Group, Membership, PostingStatus, Role};
use crate::message::{Collection, NewChatEmail, NewPost};
use crate::outcome::{RoutingContext, RoutingDecision, RoutingOutcome};
use crate::spam::{SpamChecker, SpamVerdict};
use crate::store::Store;

/// TAKEN/RECEIVED subjects mark a completed exchange rather than a new
/// post.
fn is_completion_subject(subject: &str) -> bool {
    let subject = subject.trim_start();
    ["taken", "received"].iter().any(|word| {
        subject
            .get(..word.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(word))
            && subject[word.len()..].trim_start().starts_with(':')
    })
}

/// Routes parsed messages to terminal outcomes.
pub struct RoutingEngine<S> {
    store: Store,
    spam: S,
    config: RouterConfig,
}

impl<S: SpamChecker> RoutingEngine<S> {
    /// Creates an engine over a store and spam checker.
    #[must_use]
    pub const fn new(store: Store, spam: S, config: RouterConfig) -> Self {
        Self {
            store,
            spam,
            config,
        }
    }

    /// The backing store this engine routes into.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Routes a message, committing storage side effects.
    ///
    /// # Errors
    ///
    /// Returns an error only for store faults; content-level problems
    /// all map to terminal outcomes.
    pub async fn route(&self, mail: &ParsedMail) -> Result<RoutingDecision> {
        self.route_inner(mail, true).await
    }

    /// Routes a message with no writes, reporting what commit mode
    /// would have decided.
    ///
    /// # Errors
    ///
    /// Returns an error only for store faults.
    pub async fn route_dry_run(&self, mail: &ParsedMail) -> Result<RoutingDecision> {
        self.route_inner(mail, false).await
    }

    async fn route_inner(&self, mail: &ParsedMail, commit: bool) -> Result<RoutingDecision> {
        if !mail.is_usable() {
            return Ok(RoutingDecision::new(
                RoutingOutcome::Failure,
                RoutingContext::reason("unparseable input"),
            ));
        }

        // Idempotence under MTA retries: a known Message-ID returns
        // the recorded outcome with zero writes, before anything else.
        if let Some(message_id) = &mail.message_id {
            if let Some(stored) = self.store.messages().find_by_message_id(message_id).await? {
                debug!(message_id, "duplicate delivery");
                let mut context = RoutingContext::reason("duplicate delivery");
                context.user_id = stored.from_user;
                context.message_row_id = Some(stored.id);
                return Ok(RoutingDecision::new(
                    stored.outcome.unwrap_or(RoutingOutcome::Dropped),
                    context,
                ));
            }
        }

        match address::classify(&mail.envelope_to, &self.config) {
            AddressFamily::SystemCommand(command) => {
                self.route_system_command(mail, command, commit).await
            }
            AddressFamily::ChatNotifyReply {
                chat_id, user_id, ..
            } => self.route_chat_reply(mail, chat_id, user_id, commit).await,
            AddressFamily::BounceReturnPath { user_id } => {
                self.route_bounce(mail, user_id, commit).await
            }
            AddressFamily::GroupPost { group } => {
                self.route_group_post(mail, &group, commit).await
            }
            AddressFamily::GroupVolunteers { group } => {
                self.route_volunteers(mail, &group, commit).await
            }
            AddressFamily::GroupSubscribe { group } => {
                self.route_subscribe(mail, &group, commit).await
            }
            AddressFamily::GroupUnsubscribe { group } => {
                self.route_unsubscribe(mail, &group, commit).await
            }
            AddressFamily::Unrecognized => Ok(RoutingDecision::dropped(
                if mail.is_auto_submitted() {
                    "automated mail to unrecognised address"
                } else {
                    "unrecognised recipient address"
                },
            )),
        }
    }

    /// Chat replies run the bounce detector first: a notification
    /// email can itself bounce back at the notify address, and such
    /// bounces must never be stored as chat content.
    async fn route_chat_reply(
        &self,
        mail: &ParsedMail,
        chat_id: i64,
        user_id: i64,
        commit: bool,
    ) -> Result<RoutingDecision> {
        if let Some(verdict) = bounce::detect(mail) {
            let mut decision = self
                .apply_bounce(&verdict, self.preferred_email_for(user_id).await?, commit)
                .await?;
            decision.context.user_id = Some(user_id);
            decision.context.chat_id = Some(chat_id);
            decision
                .context
                .reason
                .get_or_insert_with(|| "bounce on chat notification".to_string());
            return Ok(decision);
        }

        if mail.is_auto_submitted() {
            return Ok(RoutingDecision::dropped("automated reply to chat address"));
        }

        let Some(room) = self.store.chats().find_room(chat_id).await? else {
            return Ok(RoutingDecision::dropped("unknown chat"));
        };
        if !room.involves(user_id) {
            return Ok(RoutingDecision::dropped("user not in chat"));
        }
        if !self.store.memberships().user_exists(user_id).await? {
            return Ok(RoutingDecision::dropped("unknown user"));
        }

        let Some(text) = mail.effective_text().filter(|t| !t.trim().is_empty()) else {
            return Ok(RoutingDecision::dropped("no usable text in reply"));
        };

        if self.reply_from_stranger_to_stale_chat(mail, &room, user_id).await? {
            return Ok(RoutingDecision::dropped(
                "reply to stale chat from unfamiliar address",
            ));
        }

        let mut context = RoutingContext {
            user_id: Some(user_id),
            chat_id: Some(chat_id),
            ..RoutingContext::default()
        };

        if commit {
            let memberships = self.store.memberships();
            if let Some(addr) = &mail.from_address {
                memberships.add_email_if_missing(user_id, addr).await?;
            }
            memberships.touch_last_access(user_id).await?;

            let row_id = self
                .store
                .messages()
                .insert_chat_email(&NewChatEmail {
                    message_id: self.message_id_of(mail),
                    envelope_from: mail.envelope_from.clone(),
                    from_user: user_id,
                    from_address: self.from_address_of(mail),
                    subject: mail.subject.clone().unwrap_or_default(),
                    text_body: text,
                    chat_id,
                    outcome: RoutingOutcome::ToUser,
                })
                .await?;
            context.message_row_id = Some(row_id);
        }

        Ok(RoutingDecision::new(RoutingOutcome::ToUser, context))
    }

    /// A reply whose sending address we have never seen, into a chat
    /// with no recent activity, is list-harvester traffic.
    async fn reply_from_stranger_to_stale_chat(
        &self,
        mail: &ParsedMail,
        room: &ChatRoom,
        user_id: i64,
    ) -> Result<bool> {
        let Some(addr) = &mail.from_address else {
            return Ok(false);
        };
        if let Some(email) = self.store.memberships().find_email(addr).await? {
            // Known address, but owned by someone outside the chat
            return Ok(email.user_id != user_id && !room.involves(email.user_id));
        }
        let stale_before = Utc::now() - Duration::days(self.config.stale_chat_days);
        Ok(self
            .store
            .chats()
            .last_activity(room.id)
            .await?
            .is_some_and(|latest| latest < stale_before))
    }

    async fn route_bounce(
        &self,
        mail: &ParsedMail,
        user_id: i64,
        commit: bool,
    ) -> Result<RoutingDecision> {
        let Some(verdict) = bounce::detect(mail) else {
            return Ok(RoutingDecision::new(
                RoutingOutcome::ToSystem,
                RoutingContext::reason("non-DSN mail at bounce address"),
            ));
        };

        let email = match &verdict.recipient {
            Some(addr) => self.store.memberships().find_email(addr).await?,
            None => None,
        };
        let email = match email {
            Some(email) => Some(email),
            None => self.preferred_email_for(user_id).await?,
        };

        let mut decision = self.apply_bounce(&verdict, email, commit).await?;
        decision.context.user_id.get_or_insert(user_id);
        Ok(decision)
    }

    /// Bounce side effects report through a ToSystem outcome rather
    /// than the content-routing outcomes moderators consume.
    async fn apply_bounce(
        &self,
        verdict: &BounceVerdict,
        email: Option<crate::membership::UserEmail>,
        commit: bool,
    ) -> Result<RoutingDecision> {
        let Some(email) = email else {
            return Ok(RoutingDecision::new(
                RoutingOutcome::ToSystem,
                RoutingContext::reason("bounced address not registered"),
            ));
        };

        if commit {
            let ledger = self.store.bounces();
            ledger
                .record(&BounceRecord::new(
                    email.id,
                    verdict.diagnostic.clone(),
                    verdict.permanent,
                ))
                .await?;
            if verdict.permanent {
                ledger.mark_email_bounced_if_unset(email.id).await?;
                if ledger.unresolved_permanent(email.id).await? >= 1 {
                    ledger.suspend_user(email.user_id).await?;
                }
            }
        }

        let mut context = RoutingContext::reason(format!(
            "{} bounce: {}",
            if verdict.permanent {
                "permanent"
            } else {
                "transient"
            },
            verdict.diagnostic
        ));
        context.user_id = Some(email.user_id);
        Ok(RoutingDecision::new(RoutingOutcome::ToSystem, context))
    }

    async fn route_group_post(
        &self,
        mail: &ParsedMail,
        group_name: &str,
        commit: bool,
    ) -> Result<RoutingDecision> {
        if mail
            .envelope_from
            .eq_ignore_ascii_case(&mail.envelope_to)
        {
            return Ok(RoutingDecision::dropped("self-sent message"));
        }
        if mail.is_auto_submitted() {
            return Ok(RoutingDecision::dropped("automated mail to group address"));
        }
        let Some(group) = self
            .store
            .memberships()
            .group_by_short_name(group_name)
            .await?
        else {
            return Ok(RoutingDecision::dropped("unknown group"));
        };

        let sender = self.resolve_sender(mail).await?;

        // Completion markers close out an earlier post; acknowledged
        // without creating a message.
        if is_completion_subject(mail.subject.as_deref().unwrap_or_default()) {
            let mut context = RoutingContext::reason("completion marker");
            context.group_id = Some(group.id);
            context.user_id = sender;
            return Ok(RoutingDecision::new(RoutingOutcome::ToSystem, context));
        }

        // A positive spam verdict wins over every moderation path.
        if let SpamVerdict::Spam { score, reason } = self.spam.check(&mail.raw).await {
            debug!(score, "group post flagged as spam");
            return self
                .store_post(mail, &group, sender, RoutingOutcome::IncomingSpam, Collection::Spam, Some(reason), None, commit)
                .await;
        }

        let membership = match sender {
            Some(user_id) => {
                self.store
                    .memberships()
                    .find_membership(user_id, group.id)
                    .await?
            }
            None => None,
        };

        let (outcome, collection, context_seed) =
            Self::moderation_decision(&group, membership.as_ref());
        if outcome == RoutingOutcome::Dropped {
            let mut context = context_seed;
            context.reason = Some("posting prohibited".to_string());
            context.group_id = Some(group.id);
            context.user_id = sender;
            return Ok(RoutingDecision::new(RoutingOutcome::Dropped, context));
        }

        self.store_post(mail, &group, sender, outcome, collection, None, Some(context_seed), commit)
            .await
    }

    /// An explicit membership override always wins over the group
    /// default; the group-wide moderate-everything switch and a
    /// moderator sender both force Pending otherwise.
    fn moderation_decision(
        group: &Group,
        membership: Option<&Membership>,
    ) -> (RoutingOutcome, Collection, RoutingContext) {
        let mut context = RoutingContext {
            group_moderated: Some(group.moderated),
            posting_status: membership.map(|m| m.posting_status),
            membership_role: membership.map(|m| m.role),
            ..RoutingContext::default()
        };

        if let Some(membership) = membership {
            match membership.posting_status {
                PostingStatus::Prohibited => {
                    context.override_applied = true;
                    return (RoutingOutcome::Dropped, Collection::Pending, context);
                }
                PostingStatus::Unmoderated => {
                    context.override_applied = true;
                    return (RoutingOutcome::Approved, Collection::Approved, context);
                }
                PostingStatus::Moderated => {
                    context.override_applied = true;
                    return (RoutingOutcome::Pending, Collection::Pending, context);
                }
                PostingStatus::Default => {}
            }
        }

        let hold = membership.is_none()
            || group.moderated
            || group.moderate_all
            || membership.is_some_and(|m| m.role.is_moderator());
        if hold {
            (RoutingOutcome::Pending, Collection::Pending, context)
        } else {
            (RoutingOutcome::Approved, Collection::Approved, context)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_post(
        &self,
        mail: &ParsedMail,
        group: &Group,
        sender: Option<i64>,
        outcome: RoutingOutcome,
        collection: Collection,
        spam_reason: Option<String>,
        context_seed: Option<RoutingContext>,
        commit: bool,
    ) -> Result<RoutingDecision> {
        let mut context = context_seed.unwrap_or_default();
        context.group_id = Some(group.id);
        context.user_id = sender;
        if spam_reason.is_some() {
            context.reason.clone_from(&spam_reason);
        }

        if commit {
            let memberships = self.store.memberships();
            let from_user = match sender {
                Some(user_id) => user_id,
                // First contact from this address: give it a user row
                // so the post has an owner moderators can act on.
                None => {
                    let user_id = memberships.create_user().await?;
                    if let Some(addr) = &mail.from_address {
                        memberships.add_email_if_missing(user_id, addr).await?;
                    }
                    user_id
                }
            };
            memberships.touch_last_access(from_user).await?;

            let row_id = self
                .store
                .messages()
                .insert_post(&NewPost {
                    message_id: format!("{}-{}", self.message_id_of(mail), group.id),
                    envelope_from: mail.envelope_from.clone(),
                    from_user,
                    from_address: self.from_address_of(mail),
                    subject: mail.subject.clone().unwrap_or_default(),
                    text_body: mail.effective_text().unwrap_or_default(),
                    outcome,
                    spam_reason,
                    group_id: group.id,
                    collection,
                })
                .await?;
            context.user_id = Some(from_user);
            context.message_row_id = Some(row_id);
        }

        Ok(RoutingDecision::new(outcome, context))
    }

    async fn route_volunteers(
        &self,
        mail: &ParsedMail,
        group_name: &str,
        commit: bool,
    ) -> Result<RoutingDecision> {
        if mail.is_auto_submitted() {
            return Ok(RoutingDecision::dropped(
                "automated mail to volunteers address",
            ));
        }
        let Some(group) = self
            .store
            .memberships()
            .group_by_short_name(group_name)
            .await?
        else {
            return Ok(RoutingDecision::dropped("unknown group"));
        };
        let Some(text) = mail.effective_text().filter(|t| !t.trim().is_empty()) else {
            return Ok(RoutingDecision::dropped("no usable text"));
        };

        let sender = self.resolve_sender(mail).await?;

        let mut context = RoutingContext {
            group_id: Some(group.id),
            user_id: sender,
            ..RoutingContext::default()
        };

        if commit {
            let memberships = self.store.memberships();
            let from_user = match sender {
                Some(user_id) => user_id,
                None => {
                    let user_id = memberships.create_user().await?;
                    if let Some(addr) = &mail.from_address {
                        memberships.add_email_if_missing(user_id, addr).await?;
                    }
                    user_id
                }
            };
            let chat_id = self.store.chats().volunteers_room(from_user, group.id).await?;
            let row_id = self
                .store
                .messages()
                .insert_chat_email(&NewChatEmail {
                    message_id: self.message_id_of(mail),
                    envelope_from: mail.envelope_from.clone(),
                    from_user,
                    from_address: self.from_address_of(mail),
                    subject: mail.subject.clone().unwrap_or_default(),
                    text_body: text,
                    chat_id,
                    outcome: RoutingOutcome::ToVolunteers,
                })
                .await?;
            context.user_id = Some(from_user);
            context.chat_id = Some(chat_id);
            context.message_row_id = Some(row_id);
        }

        Ok(RoutingDecision::new(RoutingOutcome::ToVolunteers, context))
    }

    async fn route_subscribe(
        &self,
        mail: &ParsedMail,
        group_name: &str,
        commit: bool,
    ) -> Result<RoutingDecision> {
        if mail.is_auto_submitted() {
            return Ok(RoutingDecision::dropped(
                "automated mail to subscribe address",
            ));
        }
        let Some(group) = self
            .store
            .memberships()
            .group_by_short_name(group_name)
            .await?
        else {
            return Ok(RoutingDecision::dropped("unknown group"));
        };

        let sender = self.resolve_sender(mail).await?;

        let mut context = RoutingContext::reason("subscribed by mail");
        context.group_id = Some(group.id);
        context.user_id = sender;

        if commit {
            let memberships = self.store.memberships();
            let user_id = match sender {
                Some(user_id) => user_id,
                None => {
                    let user_id = memberships.create_user().await?;
                    if let Some(addr) = &mail.from_address {
                        memberships.add_email_if_missing(user_id, addr).await?;
                    }
                    user_id
                }
            };
            memberships
                .add_membership(user_id, group.id, Role::Member, PostingStatus::Default)
                .await?;
            memberships.touch_last_access(user_id).await?;
            context.user_id = Some(user_id);
        }

        Ok(RoutingDecision::new(RoutingOutcome::ToSystem, context))
    }

    async fn route_unsubscribe(
        &self,
        mail: &ParsedMail,
        group_name: &str,
        commit: bool,
    ) -> Result<RoutingDecision> {
        let Some(group) = self
            .store
            .memberships()
            .group_by_short_name(group_name)
            .await?
        else {
            return Ok(RoutingDecision::dropped("unknown group"));
        };

        let sender = self.resolve_sender(mail).await?;

        let mut context = RoutingContext::reason("unsubscribed by mail");
        context.group_id = Some(group.id);
        context.user_id = sender;

        // Idempotent either way: unknown senders and non-members both
        // end up not subscribed.
        if commit {
            if let Some(user_id) = sender {
                self.store
                    .memberships()
                    .remove_membership(user_id, group.id)
                    .await?;
            }
        }

        Ok(RoutingDecision::new(RoutingOutcome::ToSystem, context))
    }

    async fn route_system_command(
        &self,
        mail: &ParsedMail,
        command: SystemCommand,
        commit: bool,
    ) -> Result<RoutingDecision> {
        match command {
            SystemCommand::DigestOff { user_id, group_id } => {
                if commit {
                    self.store
                        .memberships()
                        .set_digest_off(user_id, group_id)
                        .await?;
                }
                let mut context = RoutingContext::reason("digest off");
                context.user_id = Some(user_id);
                context.group_id = Some(group_id);
                Ok(RoutingDecision::new(RoutingOutcome::ToSystem, context))
            }
            SystemCommand::Unsubscribe { user_id, group_id } => {
                if commit {
                    self.store
                        .memberships()
                        .remove_membership(user_id, group_id)
                        .await?;
                }
                let mut context = RoutingContext::reason("one-click unsubscribe");
                context.user_id = Some(user_id);
                context.group_id = Some(group_id);
                Ok(RoutingDecision::new(RoutingOutcome::ToSystem, context))
            }
            SystemCommand::ReadReceipt {
                chat_id,
                user_id,
                chat_message_id,
            } => {
                let Some(room) = self.store.chats().find_room(chat_id).await? else {
                    return Ok(RoutingDecision::dropped("unknown chat"));
                };
                if !room.involves(user_id) {
                    return Ok(RoutingDecision::dropped("user not in chat"));
                }
                if commit {
                    self.store
                        .chats()
                        .mark_read(chat_id, user_id, chat_message_id)
                        .await?;
                }
                let context = RoutingContext {
                    user_id: Some(user_id),
                    chat_id: Some(chat_id),
                    ..RoutingContext::default()
                };
                Ok(RoutingDecision::new(RoutingOutcome::Receipt, context))
            }
            SystemCommand::TrystResponse { tryst_id, user_id } => {
                let Some(tryst) = self.store.trysts().find(tryst_id).await? else {
                    return Ok(RoutingDecision::dropped("unknown handover"));
                };
                if !tryst.involves(user_id) {
                    return Ok(RoutingDecision::dropped("user not party to handover"));
                }
                let response = Self::tryst_response_of(mail);
                if commit {
                    self.store
                        .trysts()
                        .record_response(tryst_id, user_id, response)
                        .await?;
                }
                let mut context = RoutingContext::reason(response.as_str());
                context.user_id = Some(user_id);
                Ok(RoutingDecision::new(RoutingOutcome::Tryst, context))
            }
        }
    }

    /// Declines are detected from the reply text; anything else is an
    /// acceptance, matching the single-tap mail buttons we send.
    fn tryst_response_of(mail: &ParsedMail) -> TrystResponse {
        let text = mail.effective_text().unwrap_or_default().to_lowercase();
        let declined = text
            .lines()
            .take(3)
            .any(|line| {
                let line = line.trim();
                line == "no"
                    || line.contains("decline")
                    || line.contains("cancel")
                    || line.contains("can't make")
                    || line.contains("cannot make")
            });
        if declined {
            TrystResponse::Declined
        } else {
            TrystResponse::Accepted
        }
    }

    /// Maps the derived from-address to an existing user, if any.
    async fn resolve_sender(&self, mail: &ParsedMail) -> Result<Option<i64>> {
        let Some(addr) = &mail.from_address else {
            return Ok(None);
        };
        Ok(self
            .store
            .memberships()
            .find_email(addr)
            .await?
            .map(|email| email.user_id))
    }

    async fn preferred_email_for(
        &self,
        user_id: i64,
    ) -> Result<Option<crate::membership::UserEmail>> {
        self.store.memberships().preferred_email(user_id).await
    }

    fn message_id_of(&self, mail: &ParsedMail) -> String {
        mail.message_id.clone().unwrap_or_else(|| {
            format!("{}@{}", Utc::now().timestamp_micros(), self.config.user_domain)
        })
    }

    fn from_address_of(&self, mail: &ParsedMail) -> String {
        mail.from_address
            .clone()
            .unwrap_or_else(|| mail.envelope_from.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::spam::DisabledChecker;

    struct StubChecker(SpamVerdict);

    impl SpamChecker for StubChecker {
        async fn check(&self, _raw: &[u8]) -> SpamVerdict {
            self.0.clone()
        }
    }

    async fn engine() -> RoutingEngine<DisabledChecker> {
        let store = Store::in_memory().await.unwrap();
        RoutingEngine::new(store, DisabledChecker, RouterConfig::default())
    }

    fn mail(raw: &str, from: &str, to: &str) -> ParsedMail {
        ParsedMail::parse(raw.as_bytes(), from, to)
    }

    fn offer_mail(message_id: &str) -> String {
        format!(
            concat!(
                "From: Alice <alice@example.com>\r\n",
                "Message-ID: <{}>\r\n",
                "Subject: OFFER: Chair (Bristol)\r\n",
                "\r\n",
                "Good condition, collection only.\r\n",
            ),
            message_id
        )
    }

    async fn seed_member<S: SpamChecker>(
        engine: &RoutingEngine<S>,
        group: &str,
        moderated: bool,
        email: &str,
    ) -> (i64, i64) {
        let memberships = engine.store.memberships();
        let user = memberships.create_user().await.unwrap();
        memberships.add_email(user, email, true).await.unwrap();
        let group = memberships.create_group(group, moderated).await.unwrap();
        memberships
            .add_membership(user, group, Role::Member, PostingStatus::Default)
            .await
            .unwrap();
        (user, group)
    }

    #[tokio::test]
    async fn test_group_post_approved_for_default_member() {
        let engine = engine().await;
        let (user, group) =
            seed_member(&engine, "bristol", false, "alice@example.com").await;

        let mail = mail(
            &offer_mail("post1@example.com"),
            "alice@example.com",
            "bristol@groups.example.org",
        );
        let decision = engine.route(&mail).await.unwrap();

        assert_eq!(decision.outcome, RoutingOutcome::Approved);
        assert_eq!(decision.context.user_id, Some(user));
        assert_eq!(decision.context.group_id, Some(group));
        assert_eq!(engine.store.messages().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_reports_same_outcome_with_zero_writes() {
        let engine = engine().await;
        seed_member(&engine, "bristol", false, "alice@example.com").await;

        let mail = mail(
            &offer_mail("dup@example.com"),
            "alice@example.com",
            "bristol@groups.example.org",
        );
        let first = engine.route(&mail).await.unwrap();
        let second = engine.route(&mail).await.unwrap();

        assert_eq!(first.outcome, RoutingOutcome::Approved);
        assert_eq!(second.outcome, RoutingOutcome::Approved);
        assert_eq!(second.context.reason.as_deref(), Some("duplicate delivery"));
        assert_eq!(engine.store.messages().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_moderated_group_holds_post() {
        let engine = engine().await;
        seed_member(&engine, "bristol", true, "alice@example.com").await;

        let mail = mail(
            &offer_mail("mod@example.com"),
            "alice@example.com",
            "bristol@groups.example.org",
        );
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Pending);
        assert!(!decision.context.override_applied);
    }

    #[tokio::test]
    async fn test_unmoderated_override_beats_moderated_group() {
        let engine = engine().await;
        let (user, group) =
            seed_member(&engine, "bristol", true, "alice@example.com").await;
        let memberships = engine.store.memberships();
        memberships.remove_membership(user, group).await.unwrap();
        memberships
            .add_membership(user, group, Role::Member, PostingStatus::Unmoderated)
            .await
            .unwrap();

        let mail = mail(
            &offer_mail("ovr@example.com"),
            "alice@example.com",
            "bristol@groups.example.org",
        );
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Approved);
        assert!(decision.context.override_applied);
    }

    #[tokio::test]
    async fn test_prohibited_override_drops_without_storing() {
        let engine = engine().await;
        let (user, group) =
            seed_member(&engine, "bristol", false, "alice@example.com").await;
        let memberships = engine.store.memberships();
        memberships.remove_membership(user, group).await.unwrap();
        memberships
            .add_membership(user, group, Role::Member, PostingStatus::Prohibited)
            .await
            .unwrap();

        let mail = mail(
            &offer_mail("proh@example.com"),
            "alice@example.com",
            "bristol@groups.example.org",
        );
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Dropped);
        assert_eq!(engine.store.messages().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_moderate_all_forces_pending() {
        let engine = engine().await;
        let (_, group) = seed_member(&engine, "bristol", false, "alice@example.com").await;
        engine
            .store
            .memberships()
            .set_moderate_all(group, true)
            .await
            .unwrap();

        let mail = mail(
            &offer_mail("big@example.com"),
            "alice@example.com",
            "bristol@groups.example.org",
        );
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Pending);
    }

    #[tokio::test]
    async fn test_moderator_post_held_for_review() {
        let engine = engine().await;
        let memberships = engine
            .store
            .memberships();
        let user = memberships.create_user().await.unwrap();
        memberships
            .add_email(user, "mod@example.com", true)
            .await
            .unwrap();
        let group = memberships.create_group("bristol", false).await.unwrap();
        memberships
            .add_membership(user, group, Role::Moderator, PostingStatus::Default)
            .await
            .unwrap();

        let mail = mail(
            &offer_mail("modpost@example.com"),
            "mod@example.com",
            "bristol@groups.example.org",
        );
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Pending);
    }

    #[tokio::test]
    async fn test_spam_verdict_overrides_moderation() {
        let store = Store::in_memory().await.unwrap();
        let engine = RoutingEngine::new(
            store,
            StubChecker(SpamVerdict::Spam {
                score: 15.5,
                reason: "spamassassin score 15.5".to_string(),
            }),
            RouterConfig::default(),
        );
        seed_member(&engine, "bristol", false, "alice@example.com").await;

        let raw = concat!(
            "From: Alice <alice@example.com>\r\n",
            "Message-ID: <spam@example.com>\r\n",
            "Subject: cheap watches!!!\r\n",
            "\r\n",
            "buy now\r\n",
        );
        let mail = mail(raw, "alice@example.com", "bristol@groups.example.org");
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::IncomingSpam);
        assert_eq!(engine.store.messages().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_spam_verdict_screens_exchange_format_subjects_too() {
        let store = Store::in_memory().await.unwrap();
        let engine = RoutingEngine::new(
            store,
            StubChecker(SpamVerdict::Spam {
                score: 15.5,
                reason: "spamassassin score 15.5".to_string(),
            }),
            RouterConfig::default(),
        );
        seed_member(&engine, "bristol", false, "alice@example.com").await;

        let raw = concat!(
            "From: Alice <alice@example.com>\r\n",
            "Message-ID: <stdspam@example.com>\r\n",
            "Subject: OFFER: cheap watches (everywhere)\r\n",
            "\r\n",
            "buy now\r\n",
        );
        let mail = mail(raw, "alice@example.com", "bristol@groups.example.org");
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::IncomingSpam);
    }

    #[tokio::test]
    async fn test_completion_marker_acknowledged_without_message_row() {
        let engine = engine().await;
        let (user, group) =
            seed_member(&engine, "bristol", false, "alice@example.com").await;

        for subject in ["TAKEN: Chair (Bristol)", "Received : the lamp"] {
            let raw = format!(
                concat!(
                    "From: Alice <alice@example.com>\r\n",
                    "Message-ID: <done-{}@example.com>\r\n",
                    "Subject: {}\r\n",
                    "\r\n",
                    "Gone to a lovely couple, thanks all.\r\n",
                ),
                subject.len(),
                subject
            );
            let decision = engine
                .route(&mail(&raw, "alice@example.com", "bristol@groups.example.org"))
                .await
                .unwrap();
            assert_eq!(decision.outcome, RoutingOutcome::ToSystem);
            assert_eq!(decision.context.reason.as_deref(), Some("completion marker"));
            assert_eq!(decision.context.user_id, Some(user));
            assert_eq!(decision.context.group_id, Some(group));
        }
        assert_eq!(engine.store.messages().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_digestoff_clears_flag_without_message_row() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let user = memberships.create_user().await.unwrap();
        let group = memberships.create_group("bristol", false).await.unwrap();
        memberships
            .add_membership(user, group, Role::Member, PostingStatus::Default)
            .await
            .unwrap();

        let raw = concat!(
            "From: alice@example.com\r\n",
            "Subject: digest off\r\n",
            "\r\n",
            "please\r\n",
        );
        let to = format!("digestoff-{user}-{group}@users.example.org");
        let decision = engine
            .route(&ParsedMail::parse(raw.as_bytes(), "alice@example.com", &to))
            .await
            .unwrap();

        assert_eq!(decision.outcome, RoutingOutcome::ToSystem);
        assert_eq!(
            memberships
                .find_membership(user, group)
                .await
                .unwrap()
                .unwrap()
                .email_frequency,
            0
        );
        assert_eq!(engine.store.messages().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bounce_to_chat_address_never_stored_as_chat() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let alice = memberships.create_user().await.unwrap();
        let bob = memberships.create_user().await.unwrap();
        memberships
            .add_email(bob, "bob@example.com", true)
            .await
            .unwrap();
        let chat = engine
            .store
            .chats()
            .create_user_chat(alice, bob)
            .await
            .unwrap();

        let raw = concat!(
            "From: MAILER-DAEMON@mx.example.net\r\n",
            "Subject: Undelivered Mail Returned to Sender\r\n",
            "\r\n",
            "This is the mail system at host mx.example.net.\r\n",
            "Undelivered Mail Returned to Sender.\r\n",
            "<bob@example.com>: host mx.example.com said: 550 user unknown\r\n",
        );
        let to = format!("notify-{chat}-{bob}@users.example.org");
        let decision = engine
            .route(&ParsedMail::parse(raw.as_bytes(), "", &to))
            .await
            .unwrap();

        assert_eq!(decision.outcome, RoutingOutcome::ToSystem);
        assert_eq!(engine.store.chats().message_count().await.unwrap(), 0);
        let email = memberships.find_email("bob@example.com").await.unwrap().unwrap();
        assert_eq!(
            engine.store.bounces().unresolved_permanent(email.id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_single_marker_reply_stored_as_chat() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let alice = memberships.create_user().await.unwrap();
        let bob = memberships.create_user().await.unwrap();
        memberships
            .add_email(bob, "bob@example.com", true)
            .await
            .unwrap();
        let chat = engine
            .store
            .chats()
            .create_user_chat(alice, bob)
            .await
            .unwrap();

        let raw = concat!(
            "From: Bob <bob@example.com>\r\n",
            "Message-ID: <reply1@example.com>\r\n",
            "Subject: Re: chair\r\n",
            "\r\n",
            "Sorry it could not be delivered yesterday.\r\n",
            "Still interested, sorry for the mixup!\r\n",
        );
        let to = format!("notify-{chat}-{bob}@users.example.org");
        let decision = engine
            .route(&ParsedMail::parse(raw.as_bytes(), "bob@example.com", &to))
            .await
            .unwrap();

        assert_eq!(decision.outcome, RoutingOutcome::ToUser);
        assert_eq!(engine.store.chats().message_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_permanent_bounce_suspends_user() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let user = memberships.create_user().await.unwrap();
        memberships
            .add_email(user, "gone@example.com", true)
            .await
            .unwrap();

        let raw = concat!(
            "From: MAILER-DAEMON@mx.example.net\r\n",
            "Subject: Undelivered Mail Returned to Sender\r\n",
            "\r\n",
            "Undelivered Mail Returned to Sender.\r\n",
            "Mail delivery failed.\r\n",
            "<gone@example.com>: host mx.example.com said: 550 user unknown\r\n",
        );
        let to = format!("bounce-{user}-1706710000@users.example.org");
        let decision = engine
            .route(&ParsedMail::parse(raw.as_bytes(), "", &to))
            .await
            .unwrap();

        assert_eq!(decision.outcome, RoutingOutcome::ToSystem);
        assert!(engine.store.bounces().is_user_suspended(user).await.unwrap());
        let email = memberships.find_email("gone@example.com").await.unwrap().unwrap();
        assert!(email.bounced.is_some());
    }

    #[tokio::test]
    async fn test_transient_bounce_does_not_suspend() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let user = memberships.create_user().await.unwrap();
        memberships
            .add_email(user, "busy@example.com", true)
            .await
            .unwrap();

        let raw = concat!(
            "From: MAILER-DAEMON@mx.example.net\r\n",
            "Subject: Delayed Mail\r\n",
            "\r\n",
            "Undelivered Mail Returned to Sender.\r\n",
            "Mail delivery failed.\r\n",
            "<busy@example.com>: host mx.example.com said: 421 try again later\r\n",
        );
        let to = format!("bounce-{user}-1706710000@users.example.org");
        engine
            .route(&ParsedMail::parse(raw.as_bytes(), "", &to))
            .await
            .unwrap();

        assert!(!engine.store.bounces().is_user_suspended(user).await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_matches_commit_decision_with_no_writes() {
        let engine = engine().await;
        seed_member(&engine, "bristol", false, "alice@example.com").await;

        let mail = mail(
            &offer_mail("dry@example.com"),
            "alice@example.com",
            "bristol@groups.example.org",
        );
        let dry = engine.route_dry_run(&mail).await.unwrap();
        assert_eq!(dry.outcome, RoutingOutcome::Approved);
        assert_eq!(engine.store.messages().count().await.unwrap(), 0);

        let committed = engine.route(&mail).await.unwrap();
        assert_eq!(committed.outcome, dry.outcome);
        assert_eq!(engine.store.messages().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_input_is_failure() {
        let engine = engine().await;
        let decision = engine
            .route(&ParsedMail::parse(b"", "a@example.com", "b@example.com"))
            .await
            .unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Failure);
    }

    #[tokio::test]
    async fn test_unrecognised_address_dropped() {
        let engine = engine().await;
        let raw = "From: x@example.com\r\nSubject: hi\r\n\r\nhello\r\n";
        let decision = engine
            .route(&ParsedMail::parse(raw.as_bytes(), "x@example.com", "whoever@elsewhere.net"))
            .await
            .unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe_by_mail() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let group = memberships.create_group("bristol", false).await.unwrap();

        let raw = concat!(
            "From: newbie@example.com\r\n",
            "Subject: join\r\n",
            "\r\n",
            "please\r\n",
        );
        let decision = engine
            .route(&ParsedMail::parse(
                raw.as_bytes(),
                "newbie@example.com",
                "bristol-subscribe@groups.example.org",
            ))
            .await
            .unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::ToSystem);
        let user = decision.context.user_id.unwrap();
        assert!(memberships.find_membership(user, group).await.unwrap().is_some());

        let decision = engine
            .route(&ParsedMail::parse(
                raw.as_bytes(),
                "newbie@example.com",
                "bristol-unsubscribe@groups.example.org",
            ))
            .await
            .unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::ToSystem);
        assert!(memberships.find_membership(user, group).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_receipt_and_tryst() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let alice = memberships.create_user().await.unwrap();
        let bob = memberships.create_user().await.unwrap();
        let chat = engine.store.chats().create_user_chat(alice, bob).await.unwrap();
        let tryst = engine.store.trysts().create(alice, bob).await.unwrap();

        let raw = "From: a@example.com\r\nSubject: read\r\n\r\nseen\r\n";
        let to = format!("readreceipt-{chat}-{alice}-5@users.example.org");
        let decision = engine
            .route(&ParsedMail::parse(raw.as_bytes(), "a@example.com", &to))
            .await
            .unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Receipt);
        assert_eq!(engine.store.chats().last_seen(chat, alice).await.unwrap(), Some(5));

        let raw = "From: a@example.com\r\nSubject: handover\r\n\r\nYes, see you then\r\n";
        let to = format!("handover-{tryst}-{alice}@users.example.org");
        let decision = engine
            .route(&ParsedMail::parse(raw.as_bytes(), "a@example.com", &to))
            .await
            .unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Tryst);
        assert_eq!(
            engine.store.trysts().response_of(tryst, alice).await.unwrap().as_deref(),
            Some("Accepted")
        );
    }

    #[tokio::test]
    async fn test_volunteers_mail_lands_in_volunteer_chat() {
        let engine = engine().await;
        let memberships = engine.store.memberships();
        let user = memberships.create_user().await.unwrap();
        memberships
            .add_email(user, "alice@example.com", true)
            .await
            .unwrap();
        memberships.create_group("bristol", false).await.unwrap();

        let raw = concat!(
            "From: alice@example.com\r\n",
            "Message-ID: <vol@example.com>\r\n",
            "Subject: question for the team\r\n",
            "\r\n",
            "How do I edit my post?\r\n",
        );
        let decision = engine
            .route(&ParsedMail::parse(
                raw.as_bytes(),
                "alice@example.com",
                "bristol-volunteers@groups.example.org",
            ))
            .await
            .unwrap();

        assert_eq!(decision.outcome, RoutingOutcome::ToVolunteers);
        assert!(decision.context.chat_id.is_some());
        assert_eq!(engine.store.chats().message_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_self_sent_group_post_dropped() {
        let engine = engine().await;
        engine
            .store
            .memberships()
            .create_group("bristol", false)
            .await
            .unwrap();

        let mail = mail(
            &offer_mail("selfsent@example.com"),
            "bristol@groups.example.org",
            "bristol@groups.example.org",
        );
        let decision = engine.route(&mail).await.unwrap();
        assert_eq!(decision.outcome, RoutingOutcome::Dropped);
        assert_eq!(engine.store.messages().count().await.unwrap(), 0);
    }
}
