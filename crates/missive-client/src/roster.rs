//! Conversation list projector.
//!
//! Projects the viewer's conversations, newest activity first, with one
//! live profile subscription per direct-chat peer so presence changes and
//! renames land in the list without a refetch.

use std::collections::{HashMap, HashSet};

use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use missive_shared::{Conversation, ConversationView, UserId, UserProfile};
use missive_store::{ConversationStore, QueryFeed, UserDirectory};

/// Handle to a running conversation-list projection.
///
/// Dropping the handle (or calling [`ConversationList::close`]) stops the
/// projection task and every per-peer profile subscription it spawned.
pub struct ConversationList {
    view_rx: watch::Receiver<Vec<ConversationView>>,
}

impl ConversationList {
    /// Starts projecting the conversation list for `viewer`.
    pub async fn open(
        viewer: UserId,
        conversations: ConversationStore,
        directory: UserDirectory,
    ) -> Self {
        let list_feed = conversations.watch_for_user(&viewer).await;
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(Vec::new());

        tokio::spawn(
            RosterLoop {
                viewer,
                list_feed,
                tracker: ProfileTracker::new(directory, updates_tx),
                updates_rx,
                conversations: Vec::new(),
                profiles: HashMap::new(),
                view_tx,
            }
            .run(),
        );

        Self { view_rx }
    }

    /// Latest published entries, newest activity first.
    pub fn entries(&self) -> Vec<ConversationView> {
        self.view_rx.borrow().clone()
    }

    /// Waits for the next list change. Returns `false` once the projection
    /// has stopped.
    pub async fn changed(&mut self) -> bool {
        self.view_rx.changed().await.is_ok()
    }

    /// Stops the projection. Dropping the handle has the same effect.
    pub fn close(self) {}
}

struct RosterLoop {
    viewer: UserId,
    list_feed: QueryFeed,
    tracker: ProfileTracker,
    updates_rx: mpsc::UnboundedReceiver<(UserId, Option<UserProfile>)>,
    conversations: Vec<Conversation>,
    profiles: HashMap<UserId, UserProfile>,
    view_tx: watch::Sender<Vec<ConversationView>>,
}

impl RosterLoop {
    async fn run(mut self) {
        self.resync().await;
        loop {
            select! {
                alive = self.list_feed.changed() => {
                    if !alive {
                        break;
                    }
                    self.resync().await;
                }
                update = self.updates_rx.recv() => {
                    // The tracker keeps a sender alive, so `None` only
                    // happens on shutdown.
                    let Some((uid, profile)) = update else { break };
                    match profile {
                        Some(profile) => {
                            self.profiles.insert(uid, profile);
                        }
                        None => {
                            self.profiles.remove(&uid);
                        }
                    }
                    self.publish();
                }
                _ = self.view_tx.closed() => break,
            }
        }
        self.tracker.shutdown();
        debug!(viewer = %self.viewer, "conversation list projection stopped");
    }

    /// Re-reads the list feed, re-aims the per-peer subscriptions at the
    /// current membership and publishes.
    async fn resync(&mut self) {
        self.conversations = self
            .list_feed
            .current()
            .iter()
            .filter_map(|doc| match doc.decode::<Conversation>() {
                Ok(convo) => Some(convo),
                Err(err) => {
                    warn!(doc = %doc.id, error = %err, "skipping undecodable conversation");
                    None
                }
            })
            .collect();

        let wanted: HashSet<UserId> = self
            .conversations
            .iter()
            .filter_map(|c| c.other_participant(&self.viewer).cloned())
            .collect();
        self.tracker.sync(&wanted).await;
        self.profiles.retain(|uid, _| wanted.contains(uid));
        self.publish();
    }

    fn publish(&self) {
        let entries: Vec<ConversationView> = self
            .conversations
            .iter()
            .map(|c| ConversationView {
                conversation: c.clone(),
                peer: c
                    .other_participant(&self.viewer)
                    .and_then(|uid| self.profiles.get(uid))
                    .cloned(),
            })
            .collect();
        self.view_tx.send_if_modified(move |state| {
            if *state == entries {
                false
            } else {
                *state = entries;
                true
            }
        });
    }
}

/// One live profile subscription per direct-chat peer, kept in step with
/// the current conversation list.
struct ProfileTracker {
    directory: UserDirectory,
    updates_tx: mpsc::UnboundedSender<(UserId, Option<UserProfile>)>,
    tasks: HashMap<UserId, JoinHandle<()>>,
}

impl ProfileTracker {
    fn new(
        directory: UserDirectory,
        updates_tx: mpsc::UnboundedSender<(UserId, Option<UserProfile>)>,
    ) -> Self {
        Self {
            directory,
            updates_tx,
            tasks: HashMap::new(),
        }
    }

    /// Drops subscriptions for peers that left the list and opens one for
    /// each new peer.
    async fn sync(&mut self, wanted: &HashSet<UserId>) {
        self.tasks.retain(|uid, task| {
            if wanted.contains(uid) {
                true
            } else {
                task.abort();
                false
            }
        });
        for uid in wanted {
            if self.tasks.contains_key(uid) {
                continue;
            }
            let mut feed = self.directory.watch(uid).await;
            let tx = self.updates_tx.clone();
            let peer = uid.clone();
            let task = tokio::spawn(async move {
                loop {
                    let profile = feed.current().and_then(|doc| {
                        match doc.decode::<UserProfile>() {
                            Ok(profile) => Some(profile),
                            Err(err) => {
                                warn!(uid = %peer, error = %err, "skipping undecodable profile");
                                None
                            }
                        }
                    });
                    if tx.send((peer.clone(), profile)).is_err() {
                        break;
                    }
                    if !feed.changed().await {
                        break;
                    }
                }
            });
            self.tasks.insert(uid.clone(), task);
        }
    }

    fn shutdown(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
