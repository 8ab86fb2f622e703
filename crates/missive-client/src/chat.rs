//! Chat screen projector.
//!
//! Combines the live message feed, the conversation document and the peer
//! profile into one renderable state, applies the local search filter, and
//! flips foreign unread messages to read the moment unread work appears.

use serde::Serialize;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, warn};

use missive_shared::{
    Conversation, ConversationId, ConversationView, Message, MessageStatus, Result, UserId,
    UserProfile,
};
use missive_store::{
    ConversationStore, DocFeed, Document, MessageStore, QueryFeed, UserDirectory,
};

/// Everything the chat screen renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatViewState {
    /// Full message list, oldest first.
    pub messages: Vec<Message>,
    /// Conversation plus the resolved peer profile for direct chats.
    pub detail: Option<ConversationView>,
    /// Messages matching the current search filter, oldest first.
    pub filtered: Vec<Message>,
}

/// Handle to a running chat projection.
///
/// Dropping the handle (or calling [`ChatScreen::close`]) stops the
/// projection task, which in turn releases every live feed it held.
#[derive(Debug)]
pub struct ChatScreen {
    view_rx: watch::Receiver<ChatViewState>,
    filter_tx: watch::Sender<String>,
}

impl ChatScreen {
    /// Opens `conversation_id` for `viewer` and starts projecting.
    ///
    /// Fails with `NotFound` when the conversation does not exist.
    pub async fn open(
        viewer: UserId,
        conversation_id: ConversationId,
        conversations: ConversationStore,
        messages: MessageStore,
        directory: UserDirectory,
    ) -> Result<Self> {
        let detail = conversations.get(&conversation_id).await?;
        let peer = detail.other_participant(&viewer).cloned();

        let message_feed = messages.watch(&conversation_id).await;
        let convo_feed = conversations.watch(&conversation_id).await;
        let peer_feed = match &peer {
            Some(uid) => Some(directory.watch(uid).await),
            None => None,
        };

        let (filter_tx, filter_rx) = watch::channel(String::new());
        let (view_tx, view_rx) = watch::channel(ChatViewState::default());

        tokio::spawn(
            ChatLoop {
                viewer,
                conversation_id,
                messages,
                message_feed,
                convo_feed,
                peer_feed,
                filter_rx,
                view_tx,
                had_unread: false,
            }
            .run(),
        );

        Ok(Self { view_rx, filter_tx })
    }

    /// Latest published view state.
    pub fn view(&self) -> ChatViewState {
        self.view_rx.borrow().clone()
    }

    /// Waits for the next view change. Returns `false` once the projection
    /// has stopped.
    pub async fn view_changed(&mut self) -> bool {
        self.view_rx.changed().await.is_ok()
    }

    /// Replaces the message search filter (case-insensitive substring).
    pub fn set_filter(&self, needle: &str) {
        self.filter_tx.send_replace(needle.to_string());
    }

    /// Stops the projection and releases its feeds. Dropping the handle
    /// has the same effect.
    pub fn close(self) {}
}

struct ChatLoop {
    viewer: UserId,
    conversation_id: ConversationId,
    messages: MessageStore,
    message_feed: QueryFeed,
    convo_feed: DocFeed,
    peer_feed: Option<DocFeed>,
    filter_rx: watch::Receiver<String>,
    view_tx: watch::Sender<ChatViewState>,
    /// Whether foreign unread messages were still outstanding after the
    /// previous recompute. The read marker fires only on the rising edge,
    /// so one unread burst costs one write batch.
    had_unread: bool,
}

impl ChatLoop {
    async fn run(mut self) {
        // Project the snapshot that existed at subscription time before
        // waiting for changes.
        self.recompute().await;
        loop {
            select! {
                alive = self.message_feed.changed() => {
                    if !alive {
                        break;
                    }
                    self.recompute().await;
                }
                alive = self.convo_feed.changed() => {
                    if !alive {
                        break;
                    }
                    self.recompute().await;
                }
                alive = watch_peer(self.peer_feed.as_mut()) => {
                    if !alive {
                        break;
                    }
                    self.recompute().await;
                }
                res = self.filter_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                    self.recompute().await;
                }
                _ = self.view_tx.closed() => break,
            }
        }
        debug!(conversation = %self.conversation_id, "chat projection stopped");
    }

    async fn recompute(&mut self) {
        let messages = decode_messages(&self.message_feed.current());
        let conversation = self
            .convo_feed
            .current()
            .and_then(|doc| decode_or_log::<Conversation>(&doc));
        let peer = self
            .peer_feed
            .as_ref()
            .and_then(|feed| feed.current())
            .and_then(|doc| decode_or_log::<UserProfile>(&doc));

        let needle = self.filter_rx.borrow().trim().to_lowercase();
        let filtered = filter_messages(&messages, &needle);
        let mut has_unread = messages
            .iter()
            .any(|m| m.sender_id != self.viewer && m.status != MessageStatus::Read);

        let detail = conversation.map(|conversation| ConversationView { conversation, peer });
        let next = ChatViewState {
            messages,
            detail,
            filtered,
        };
        self.view_tx.send_if_modified(move |state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        if has_unread && !self.had_unread {
            match self
                .messages
                .mark_as_read(&self.conversation_id, &self.viewer)
                .await
            {
                Ok(count) => {
                    debug!(conversation = %self.conversation_id, count, "marked messages read");
                    // The batch empties the unread set at its commit, so a
                    // later snapshot showing unread work is a new edge even
                    // if the feed coalesced away the read echo.
                    has_unread = false;
                }
                Err(err) => {
                    warn!(conversation = %self.conversation_id, error = %err, "mark-as-read failed")
                }
            }
        }
        self.had_unread = has_unread;
    }
}

/// Waits on the peer-profile feed when there is one. A chat without a peer
/// never resolves this branch.
async fn watch_peer(feed: Option<&mut DocFeed>) -> bool {
    match feed {
        Some(feed) => feed.changed().await,
        None => std::future::pending().await,
    }
}

fn decode_messages(docs: &[Document]) -> Vec<Message> {
    docs.iter().filter_map(decode_or_log::<Message>).collect()
}

fn decode_or_log<T: serde::de::DeserializeOwned>(doc: &Document) -> Option<T> {
    match doc.decode::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(doc = %doc.id, error = %err, "skipping undecodable document");
            None
        }
    }
}

/// Case-insensitive substring filter. A blank needle keeps everything.
fn filter_messages(messages: &[Message], needle: &str) -> Vec<Message> {
    if needle.is_empty() {
        return messages.to_vec();
    }
    messages
        .iter()
        .filter(|m| m.text.to_lowercase().contains(needle))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
