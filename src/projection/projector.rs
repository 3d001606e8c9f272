//! Conversation Projector
//!
//! Folds normalized events into one observing user's conversation list
//! and, when a conversation is open, its message list. The reducer is
//! synchronous and owns no I/O; the actor in [`super::actor`] serializes
//! calls into it and performs the side effects it reports.
//!
//! # Rules
//!
//! - Events that involve neither participant are ignored.
//! - A `MessageCreated` id already seen is a duplicate delivery and leaves
//!   the state untouched.
//! - The last-message fields only move forward in `created_at`; equal
//!   timestamps go to the later arrival.
//! - A conversation moves to the front when its last message advances.
//! - Unread counts never go below zero and a read is applied at most
//!   once per message id.
//! - A message arriving in the open, viewed conversation is read
//!   immediately, inside the same `apply` call.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use super::ledger::DeliveryLedger;
use crate::shared::config::SyncConfig;
use crate::shared::messaging::{
    ConversationSummary, EventKind, Message, MessageId, NormalizedEvent, ProfileSnippet, UserId,
};

/// The conversation currently shown to the observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConversation {
    pub other_user_id: UserId,
    /// Oldest first when opened, later arrivals appended
    pub messages: Vec<Message>,
    /// Whether the thread is on screen; arrivals are then read at once
    pub viewing: bool,
}

/// Read-only copy of projector state handed to presentation code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionSnapshot {
    /// Most recent activity first
    pub conversations: Vec<ConversationSummary>,
    pub open: Option<OpenConversation>,
}

impl ProjectionSnapshot {
    pub fn conversation_with(&self, other: &UserId) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|s| &s.other_user_id == other)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .fold(0u32, |acc, s| acc.saturating_add(s.unread_count))
    }
}

/// Outcome of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyEffect {
    Updated,
    /// At-least-once delivery repeated an event already applied
    DuplicateIgnored,
    /// The event involves neither side of this projector
    Irrelevant,
}

/// What an `apply` call changed and what the caller still has to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub effect: ApplyEffect,
    /// Messages read locally because their thread was being viewed;
    /// these still need persisting
    pub self_reads: Vec<MessageId>,
    /// Users whose new summary has no display info yet
    pub unresolved_profiles: Vec<UserId>,
}

impl ApplyReport {
    fn new(effect: ApplyEffect) -> Self {
        Self {
            effect,
            self_reads: Vec::new(),
            unresolved_profiles: Vec::new(),
        }
    }
}

/// Result of clearing a conversation's unread state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadBatch {
    /// Open-list messages flipped to read
    pub message_ids: Vec<MessageId>,
    /// Unread count before clearing
    pub cleared: u32,
}

impl ReadBatch {
    /// Nothing was unread, so there is nothing to persist
    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty() && self.cleared == 0
    }
}

#[derive(Debug, Clone)]
struct CountedUnread {
    other: UserId,
    created_at: DateTime<Utc>,
}

/// Reducer state for one observing user
#[derive(Debug, Clone)]
pub struct ConversationProjector {
    observer: UserId,
    conversations: Vec<ConversationSummary>,
    open: Option<OpenConversation>,
    created: DeliveryLedger,
    reads: DeliveryLedger,
    /// Unread messages known by id, mapped to their conversation. Any
    /// unread count above these came from a fetched summary.
    counted_unread: HashMap<MessageId, CountedUnread>,
    preview_len: usize,
}

impl ConversationProjector {
    pub fn new(observer: UserId, config: &SyncConfig) -> Self {
        Self::with_limits(observer, config.ledger_capacity, config.preview_len)
    }

    pub fn with_limits(observer: UserId, ledger_capacity: usize, preview_len: usize) -> Self {
        Self {
            observer,
            conversations: Vec::new(),
            open: None,
            created: DeliveryLedger::new(ledger_capacity),
            reads: DeliveryLedger::new(ledger_capacity),
            counted_unread: HashMap::new(),
            preview_len,
        }
    }

    pub fn observer(&self) -> &UserId {
        &self.observer
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn open(&self) -> Option<&OpenConversation> {
        self.open.as_ref()
    }

    pub fn summary(&self, other: &UserId) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|s| &s.other_user_id == other)
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        ProjectionSnapshot {
            conversations: self.conversations.clone(),
            open: self.open.clone(),
        }
    }

    /// Apply one event, plus any reads it triggers, and report the outcome
    /// of the original event.
    pub fn apply(&mut self, event: NormalizedEvent) -> ApplyReport {
        let mut report = ApplyReport::new(ApplyEffect::Irrelevant);
        let mut queue = VecDeque::from([event]);
        let mut first = true;
        while let Some(event) = queue.pop_front() {
            let effect = match event.kind {
                EventKind::MessageCreated => self.apply_created(&event, &mut queue, &mut report),
                EventKind::MessageRead => self.apply_read(&event.message),
            };
            if first {
                report.effect = effect;
                first = false;
            }
        }
        report
    }

    fn apply_created(
        &mut self,
        event: &NormalizedEvent,
        queue: &mut VecDeque<NormalizedEvent>,
        report: &mut ApplyReport,
    ) -> ApplyEffect {
        let message = &event.message;
        let Some(other) = message.other_participant(&self.observer).cloned() else {
            tracing::debug!(
                observer = %self.observer,
                message_id = %message.id,
                "[Projector] Ignoring message between other users"
            );
            return ApplyEffect::Irrelevant;
        };

        // The ledger is bounded; the open list and the unread index still
        // remember ids it has evicted
        let fresh = self.created.insert(&message.id);
        if !fresh || self.counted_unread.contains_key(&message.id) || self.is_in_open(&other, &message.id) {
            tracing::trace!(message_id = %message.id, "[Projector] Duplicate delivery");
            return ApplyEffect::DuplicateIgnored;
        }

        let (position, mut summary) = match self.position_of(&other) {
            Some(i) => (Some(i), self.conversations.remove(i)),
            None => {
                let profile = event.profile_of(&other).cloned();
                if profile.is_none() {
                    report.unresolved_profiles.push(other.clone());
                }
                let summary =
                    ConversationSummary::new(&self.observer, other.clone(), profile.unwrap_or_default());
                (None, summary)
            }
        };

        if summary.other_user.is_empty() {
            if let Some(profile) = event.profile_of(&other) {
                summary.other_user = profile.clone();
            }
        }

        let advanced = summary.accepts_as_latest(message);
        if advanced {
            summary.update_last_message(message, self.preview_len);
        }

        let unread = message.is_addressed_to(&self.observer)
            && !message.is_read
            && !self.reads.contains(&message.id);
        if unread {
            summary.unread_count = summary.unread_count.saturating_add(1);
            self.count_unread(message, &other);
        }

        match position {
            Some(i) if !advanced => self.conversations.insert(i, summary),
            _ => self.conversations.insert(0, summary),
        }

        if let Some(open) = self.open.as_mut().filter(|o| o.other_user_id == other) {
            if !open.messages.iter().any(|m| m.id == message.id) {
                open.messages.push(message.clone());
            }
            if open.viewing && unread {
                let mut read = message.clone();
                read.is_read = true;
                report.self_reads.push(read.id.clone());
                queue.push_back(NormalizedEvent::read(read));
            }
        }

        ApplyEffect::Updated
    }

    fn apply_read(&mut self, message: &Message) -> ApplyEffect {
        let Some(other) = message.other_participant(&self.observer).cloned() else {
            return ApplyEffect::Irrelevant;
        };
        if !self.reads.insert(&message.id) {
            return ApplyEffect::DuplicateIgnored;
        }

        if let Some(open) = self.open.as_mut().filter(|o| o.other_user_id == other) {
            if let Some(local) = open.messages.iter_mut().find(|m| m.id == message.id) {
                local.is_read = true;
            }
        }

        if message.is_addressed_to(&self.observer) {
            let counted = if self.counted_unread.remove(&message.id).is_some() {
                true
            } else if self.created.contains(&message.id) {
                // Created already read, nothing was counted
                false
            } else {
                // Unknown id: only a fetched count can still include it
                let known = self.known_unread(&other);
                self.summary(&other).map_or(false, |s| s.unread_count as usize > known)
            };
            if counted {
                if let Some(summary) = self.summary_mut(&other) {
                    summary.unread_count = summary.unread_count.saturating_sub(1);
                }
            }
        }
        ApplyEffect::Updated
    }

    /// Seed the list from a fetched conversation list. Local summaries whose
    /// last message is newer than the fetched one are kept, counting the
    /// fetched unread messages plus the newer arrivals. Returns users whose
    /// display info is still missing.
    pub fn hydrate(&mut self, fetched: Vec<ConversationSummary>) -> Vec<UserId> {
        for mut incoming in fetched {
            if incoming.other_user_id == self.observer {
                continue;
            }
            match self.position_of(&incoming.other_user_id) {
                Some(i) => {
                    // Live arrivals newer than the fetched state are not in
                    // its unread count
                    let newer_unread = self
                        .counted_unread
                        .values()
                        .filter(|c| {
                            c.other == incoming.other_user_id
                                && Some(c.created_at) > incoming.last_message_at
                        })
                        .count();
                    let local = &mut self.conversations[i];
                    if local.last_message_at > incoming.last_message_at {
                        local.unread_count = incoming
                            .unread_count
                            .saturating_add(u32::try_from(newer_unread).unwrap_or(u32::MAX));
                        continue;
                    }
                    if incoming.other_user.is_empty() {
                        incoming.other_user = local.other_user.clone();
                    }
                    *local = incoming;
                }
                None => self.conversations.push(incoming),
            }
        }
        // Stable sort keeps arrival order among equal timestamps
        self.conversations
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        self.conversations
            .iter()
            .filter(|s| s.other_user.is_empty())
            .map(|s| s.other_user_id.clone())
            .collect()
    }

    /// Make `other` the open conversation with the given history.
    ///
    /// If `other` is already open, fetched messages are merged by id into
    /// the messages applied since, so opening with an empty history first
    /// and merging the fetch later loses nothing that arrived in between.
    pub fn open_conversation(&mut self, other: UserId, mut fetched: Vec<Message>) {
        fetched.retain(|m| m.other_participant(&self.observer) == Some(&other));
        let (mut messages, viewing) = match self.open.take() {
            Some(open) if open.other_user_id == other => (open.messages, open.viewing),
            _ => (Vec::new(), false),
        };

        for mut message in fetched {
            if let Some(local) = messages.iter_mut().find(|m| m.id == message.id) {
                local.is_read |= message.is_read;
                continue;
            }
            self.created.insert(&message.id);
            if self.reads.contains(&message.id) {
                message.is_read = true;
            }
            if message.is_read {
                self.reads.insert(&message.id);
            } else if message.is_addressed_to(&self.observer) {
                self.count_unread(&message, &other);
            }
            messages.push(message);
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        tracing::debug!(
            observer = %self.observer,
            other = %other,
            messages = messages.len(),
            "[Projector] Conversation opened"
        );
        self.open = Some(OpenConversation {
            other_user_id: other,
            messages,
            viewing,
        });
    }

    /// Returns `false` when no conversation is open
    pub fn set_viewing(&mut self, viewing: bool) -> bool {
        match self.open.as_mut() {
            Some(open) => {
                open.viewing = viewing;
                true
            }
            None => false,
        }
    }

    pub fn close_conversation(&mut self) -> Option<UserId> {
        self.open.take().map(|open| open.other_user_id)
    }

    /// Read every unread message from `other` in the open list and set the
    /// conversation's unread count to zero.
    pub fn mark_conversation_read(&mut self, other: &UserId) -> ReadBatch {
        let cleared = self.summary(other).map(|s| s.unread_count).unwrap_or(0);
        let pending: Vec<Message> = self
            .open
            .as_ref()
            .filter(|o| &o.other_user_id == other)
            .map(|o| {
                o.messages
                    .iter()
                    .filter(|m| m.is_addressed_to(&self.observer) && !m.is_read)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut message_ids = Vec::with_capacity(pending.len());
        for mut message in pending {
            message.is_read = true;
            self.apply_read(&message);
            message_ids.push(message.id);
        }
        if let Some(summary) = self.summary_mut(other) {
            summary.unread_count = 0;
        }
        self.counted_unread.retain(|_, counted| &counted.other != other);
        ReadBatch {
            message_ids,
            cleared,
        }
    }

    /// Fill display info for `user`. Returns `true` if a summary changed.
    pub fn set_profile(&mut self, user: &UserId, profile: ProfileSnippet) -> bool {
        if profile.is_empty() {
            return false;
        }
        match self.summary_mut(user) {
            Some(summary) if summary.other_user != profile => {
                summary.other_user = profile;
                true
            }
            _ => false,
        }
    }

    fn count_unread(&mut self, message: &Message, other: &UserId) {
        self.counted_unread.insert(
            message.id.clone(),
            CountedUnread {
                other: other.clone(),
                created_at: message.created_at,
            },
        );
    }

    fn is_in_open(&self, other: &UserId, id: &MessageId) -> bool {
        self.open
            .as_ref()
            .filter(|o| &o.other_user_id == other)
            .is_some_and(|o| o.messages.iter().any(|m| &m.id == id))
    }

    fn known_unread(&self, other: &UserId) -> usize {
        self.counted_unread.values().filter(|c| &c.other == other).count()
    }

    fn position_of(&self, other: &UserId) -> Option<usize> {
        self.conversations.iter().position(|s| &s.other_user_id == other)
    }

    fn summary_mut(&mut self, other: &UserId) -> Option<&mut ConversationSummary> {
        self.conversations.iter_mut().find(|s| &s.other_user_id == other)
    }
}
