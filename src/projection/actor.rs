//! # Projector Actor
//!
//! Runs one [`ConversationProjector`] on its own task and feeds it from an
//! unbounded command channel. Every mutation of an observer's conversation
//! state goes through this channel, so events coming from several feeds
//! are applied one at a time in delivery order.
//!
//! After each command the actor publishes a fresh [`ProjectionSnapshot`]
//! on a `watch` channel. An arrival and the read it triggers are handled
//! by one command, so readers never observe the unread blip in between.
//!
//! Side effects reported by the reducer run on spawned tasks:
//!
//! - self-emitted reads are persisted with [`MessageStore::mark_read`]
//! - summaries without display info are resolved through the
//!   [`ProfileDirectory`] and folded back in as a command

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::projector::{ApplyEffect, ApplyReport, ConversationProjector, ProjectionSnapshot, ReadBatch};
use crate::gateway::{MessageStore, ProfileDirectory};
use crate::metrics::SyncMetrics;
use crate::realtime::registry::Dispatch;
use crate::shared::config::SyncConfig;
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::messaging::{ConversationSummary, Message, MessageId, NormalizedEvent, ProfileSnippet, UserId};

const COMPONENT: &str = "projector";

enum Command {
    Event(NormalizedEvent),
    Apply {
        event: NormalizedEvent,
        reply: oneshot::Sender<ApplyReport>,
    },
    Hydrate {
        summaries: Vec<ConversationSummary>,
        reply: oneshot::Sender<()>,
    },
    Open {
        other: UserId,
        messages: Vec<Message>,
        reply: oneshot::Sender<()>,
    },
    SetViewing(bool),
    Close,
    MarkConversationRead {
        other: UserId,
        reply: oneshot::Sender<ReadBatch>,
    },
    ProfileResolved {
        user: UserId,
        profile: Option<ProfileSnippet>,
    },
    Shutdown,
}

/// Cloneable front door to a running projector actor
#[derive(Clone)]
pub struct ProjectorHandle {
    observer: UserId,
    tx: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ProjectionSnapshot>,
}

impl std::fmt::Debug for ProjectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectorHandle")
            .field("observer", &self.observer)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ProjectorHandle {
    pub fn observer(&self) -> &UserId {
        &self.observer
    }

    /// Queue an event. Returns `false` if the actor has stopped, in which
    /// case the event is dropped.
    pub fn dispatch(&self, event: NormalizedEvent) -> bool {
        self.tx.send(Command::Event(event)).is_ok()
    }

    /// Registry callback feeding this actor. It does not keep the actor
    /// alive on its own.
    pub fn dispatcher(&self) -> Dispatch {
        let weak = self.tx.downgrade();
        Arc::new(move |event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::Event(event));
            }
        })
    }

    /// Apply an event and wait for the reducer's report
    pub async fn apply(&self, event: NormalizedEvent) -> SyncResult<ApplyReport> {
        self.request(|reply| Command::Apply { event, reply }).await
    }

    pub async fn hydrate(&self, summaries: Vec<ConversationSummary>) -> SyncResult<()> {
        self.request(|reply| Command::Hydrate { summaries, reply }).await
    }

    pub async fn open_conversation(&self, other: UserId, messages: Vec<Message>) -> SyncResult<()> {
        self.request(|reply| Command::Open {
            other,
            messages,
            reply,
        })
        .await
    }

    pub fn set_viewing(&self, viewing: bool) -> SyncResult<()> {
        self.send(Command::SetViewing(viewing))
    }

    pub fn close_conversation(&self) -> SyncResult<()> {
        self.send(Command::Close)
    }

    pub async fn mark_conversation_read(&self, other: UserId) -> SyncResult<ReadBatch> {
        self.request(|reply| Command::MarkConversationRead { other, reply })
            .await
    }

    /// Latest published state
    pub fn snapshot(&self) -> ProjectionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProjectionSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the actor after the commands already queued
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.tx
            .send(command)
            .map_err(|_| SyncError::closed(COMPONENT))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| SyncError::closed(COMPONENT))
    }
}

/// Single writer for one observer's conversation state
pub struct ProjectorActor {
    projector: ConversationProjector,
    rx: mpsc::UnboundedReceiver<Command>,
    /// Used to fold lookups back in without keeping the actor alive
    tx: mpsc::WeakUnboundedSender<Command>,
    snapshots: watch::Sender<ProjectionSnapshot>,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn ProfileDirectory>,
    metrics: Arc<SyncMetrics>,
    pending_profiles: HashSet<UserId>,
}

impl ProjectorActor {
    /// Start the actor on the current runtime
    pub fn spawn(
        observer: UserId,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ProfileDirectory>,
        metrics: Arc<SyncMetrics>,
        config: &SyncConfig,
    ) -> (ProjectorHandle, JoinHandle<()>) {
        let projector = ConversationProjector::new(observer.clone(), config);
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(projector.snapshot());
        let actor = Self {
            projector,
            rx,
            tx: tx.downgrade(),
            snapshots,
            store,
            directory,
            metrics,
            pending_profiles: HashSet::new(),
        };
        let task = tokio::spawn(actor.run());
        let handle = ProjectorHandle {
            observer,
            tx,
            snapshots: snapshot_rx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        tracing::info!(observer = %self.projector.observer(), "[Projector] Actor started");
        while let Some(command) = self.rx.recv().await {
            if !self.handle(command) {
                break;
            }
            self.publish();
        }
        tracing::info!(observer = %self.projector.observer(), "[Projector] Actor stopped");
    }

    /// Returns `false` to stop the loop
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Event(event) => {
                let report = self.projector.apply(event);
                self.after_apply(&report);
            }
            Command::Apply { event, reply } => {
                let report = self.projector.apply(event);
                self.after_apply(&report);
                self.publish();
                let _ = reply.send(report);
            }
            Command::Hydrate { summaries, reply } => {
                let unresolved = self.projector.hydrate(summaries);
                self.resolve_profiles(unresolved);
                self.publish();
                let _ = reply.send(());
            }
            Command::Open {
                other,
                messages,
                reply,
            } => {
                self.projector.open_conversation(other, messages);
                self.publish();
                let _ = reply.send(());
            }
            Command::SetViewing(viewing) => {
                if !self.projector.set_viewing(viewing) {
                    tracing::debug!("[Projector] No open conversation to view");
                }
            }
            Command::Close => {
                if let Some(other) = self.projector.close_conversation() {
                    tracing::debug!(other = %other, "[Projector] Conversation closed");
                }
            }
            Command::MarkConversationRead { other, reply } => {
                let batch = self.projector.mark_conversation_read(&other);
                self.publish();
                let _ = reply.send(batch);
            }
            Command::ProfileResolved { user, profile } => {
                self.pending_profiles.remove(&user);
                if let Some(profile) = profile {
                    self.projector.set_profile(&user, profile);
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Replies are sent after publishing so callers see their change
    fn publish(&self) {
        self.snapshots.send_replace(self.projector.snapshot());
    }

    fn after_apply(&mut self, report: &ApplyReport) {
        match report.effect {
            ApplyEffect::Updated => self.metrics.record_event_applied(),
            ApplyEffect::DuplicateIgnored => self.metrics.record_duplicate(),
            ApplyEffect::Irrelevant => {}
        }
        if !report.self_reads.is_empty() {
            self.persist_reads(report.self_reads.clone());
        }
        if !report.unresolved_profiles.is_empty() {
            self.resolve_profiles(report.unresolved_profiles.clone());
        }
    }

    fn persist_reads(&self, ids: Vec<MessageId>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for id in ids {
                if let Err(e) = store.mark_read(&id).await {
                    tracing::warn!(message_id = %id, "[Projector] Failed to persist read: {}", e);
                }
            }
        });
    }

    fn resolve_profiles(&mut self, users: Vec<UserId>) {
        for user in users {
            if !self.pending_profiles.insert(user.clone()) {
                continue;
            }
            let directory = Arc::clone(&self.directory);
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let profile = match directory.lookup(&user).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        tracing::warn!(user = %user, "[Projector] Profile lookup failed: {}", e);
                        None
                    }
                };
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(Command::ProfileResolved { user, profile });
                }
            });
        }
    }
}
