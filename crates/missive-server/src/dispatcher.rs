//! Notification dispatcher.
//!
//! Consumes the message creation feed and turns every new message into at
//! most one push, then advances the message to DELIVERED. One event is one
//! isolated unit of work: failures are logged and never retried, and the
//! worker loop never stops on an error.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use missive_shared::constants::APP_NAME;
use missive_shared::{Conversation, Message, Result, UserId};
use missive_store::{ConversationStore, Document, MessageStore, UserDirectory};

use crate::push::{PushGateway, PushNotification};

/// Fallback sender name when the profile document is missing.
const UNKNOWN_SENDER: &str = "Someone";

pub struct NotificationDispatcher {
    conversations: ConversationStore,
    messages: MessageStore,
    directory: UserDirectory,
    gateway: Arc<dyn PushGateway>,
}

impl NotificationDispatcher {
    pub fn new(
        conversations: ConversationStore,
        messages: MessageStore,
        directory: UserDirectory,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            conversations,
            messages,
            directory,
            gateway,
        }
    }

    /// Runs until the message store shuts down.
    pub async fn run(self) {
        let mut feed = self.messages.creation_feed().await;
        info!("notification dispatcher running");
        while let Some(doc) = feed.next().await {
            self.handle_created(&doc).await;
        }
        info!("notification dispatcher stopped");
    }

    /// One unit of work per created message document.
    async fn handle_created(&self, doc: &Document) {
        let message: Message = match doc.decode() {
            Ok(message) => message,
            Err(err) => {
                warn!(doc = %doc.id, error = %err, "skipping undecodable message event");
                return;
            }
        };
        if let Err(err) = self.notify(&message).await {
            warn!(message = %message.id, error = %err, "dispatch failed");
        }
    }

    async fn notify(&self, message: &Message) -> Result<()> {
        let conversation = match self.conversations.get(&message.conversation_id).await {
            Ok(conversation) => conversation,
            Err(err) => {
                debug!(
                    conversation = %message.conversation_id,
                    error = %err,
                    "conversation gone, skipping push"
                );
                return Ok(());
            }
        };
        let sender_name = self.sender_name(&message.sender_id).await;

        let outcome = if conversation.is_group {
            self.push_group(&conversation, message, &sender_name).await
        } else {
            self.push_direct(&conversation, message, &sender_name).await
        };
        if let Err(err) = outcome {
            warn!(message = %message.id, error = %err, "push failed");
        }

        // Delivery receipt is independent of the push outcome.
        self.messages.mark_delivered(&message.id).await
    }

    async fn sender_name(&self, sender: &UserId) -> String {
        match self.directory.find(sender).await {
            Ok(Some(profile)) => profile.username,
            Ok(None) => UNKNOWN_SENDER.to_string(),
            Err(err) => {
                warn!(uid = %sender, error = %err, "sender profile lookup failed");
                UNKNOWN_SENDER.to_string()
            }
        }
    }

    /// Multicast to every other participant that has a push token.
    async fn push_group(
        &self,
        conversation: &Conversation,
        message: &Message,
        sender_name: &str,
    ) -> Result<()> {
        let recipients: Vec<&UserId> = conversation
            .participants
            .iter()
            .filter(|uid| **uid != message.sender_id)
            .collect();
        let profiles = join_all(recipients.iter().map(|uid| self.directory.find(uid))).await;

        let mut tokens = Vec::new();
        for resolved in profiles {
            match resolved {
                Ok(Some(profile)) => {
                    if let Some(token) = profile.push_token {
                        if !token.is_empty() {
                            tokens.push(token);
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "recipient profile lookup failed"),
            }
        }

        if tokens.is_empty() {
            debug!(conversation = %conversation.id, "no push tokens, skipping group push");
            return Ok(());
        }

        let notification = PushNotification {
            title: conversation
                .group_name
                .clone()
                .unwrap_or_else(|| APP_NAME.to_string()),
            body: format!("{sender_name}: {}", message.text),
            conversation_id: conversation.id.clone(),
            message_id: message.id.clone(),
        };
        let summary = self.gateway.send_multicast(&tokens, &notification).await?;
        info!(
            conversation = %conversation.id,
            success = summary.success,
            failure = summary.failure,
            "group push dispatched"
        );
        Ok(())
    }

    /// Single push to the one counterpart of a direct chat.
    async fn push_direct(
        &self,
        conversation: &Conversation,
        message: &Message,
        sender_name: &str,
    ) -> Result<()> {
        let Some(recipient) = conversation.other_participant(&message.sender_id) else {
            debug!(conversation = %conversation.id, "no counterpart, skipping push");
            return Ok(());
        };
        let token = match self.directory.find(recipient).await? {
            Some(profile) => profile.push_token.filter(|t| !t.is_empty()),
            None => None,
        };
        let Some(token) = token else {
            debug!(uid = %recipient, "recipient has no push token, skipping push");
            return Ok(());
        };

        let notification = PushNotification {
            title: sender_name.to_string(),
            body: message.text.clone(),
            conversation_id: conversation.id.clone(),
            message_id: message.id.clone(),
        };
        self.gateway.send(&token, &notification).await?;
        info!(conversation = %conversation.id, "direct push dispatched");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use missive_shared::{ConversationId, MessageId, MessageStatus, MissiveError};
    use missive_store::{collections, Database, NewProfile, Patch};

    use crate::push::MulticastSummary;

    #[derive(Debug, Clone)]
    enum RecordedPush {
        Single {
            token: String,
            notification: PushNotification,
        },
        Multicast {
            tokens: Vec<String>,
            notification: PushNotification,
        },
    }

    /// Gateway that records every call; optionally fails them all.
    struct RecordingPush {
        calls: Mutex<Vec<RecordedPush>>,
        fail: bool,
    }

    impl RecordingPush {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl PushGateway for RecordingPush {
        async fn send(&self, token: &str, notification: &PushNotification) -> Result<()> {
            self.calls.lock().await.push(RecordedPush::Single {
                token: token.to_string(),
                notification: notification.clone(),
            });
            if self.fail {
                return Err(MissiveError::Remote("push service down".to_string()));
            }
            Ok(())
        }

        async fn send_multicast(
            &self,
            tokens: &[String],
            notification: &PushNotification,
        ) -> Result<MulticastSummary> {
            self.calls.lock().await.push(RecordedPush::Multicast {
                tokens: tokens.to_vec(),
                notification: notification.clone(),
            });
            if self.fail {
                return Err(MissiveError::Remote("push service down".to_string()));
            }
            Ok(MulticastSummary {
                success: tokens.len(),
                failure: 0,
            })
        }
    }

    struct Fixture {
        db: Database,
        conversations: ConversationStore,
        messages: MessageStore,
        directory: UserDirectory,
        gateway: Arc<RecordingPush>,
    }

    fn fixture(fail_pushes: bool) -> Fixture {
        let db = Database::new();
        Fixture {
            conversations: ConversationStore::new(db.clone()),
            messages: MessageStore::new(db.clone()),
            directory: UserDirectory::new(db.clone()),
            gateway: Arc::new(RecordingPush::new(fail_pushes)),
            db,
        }
    }

    fn spawn_dispatcher(fx: &Fixture) {
        let dispatcher = NotificationDispatcher::new(
            fx.conversations.clone(),
            fx.messages.clone(),
            fx.directory.clone(),
            fx.gateway.clone(),
        );
        tokio::spawn(dispatcher.run());
    }

    async fn register(fx: &Fixture, uid: &str, username: &str, token: Option<&str>) -> UserId {
        let uid = UserId::new(uid);
        fx.directory
            .upsert_profile(&NewProfile {
                uid: uid.clone(),
                username: username.to_string(),
                phone: format!("+1555000{:04}", username.len()),
            })
            .await
            .unwrap();
        if let Some(token) = token {
            fx.directory.set_push_token(&uid, Some(token)).await.unwrap();
        }
        uid
    }

    /// Lets the spawned dispatcher subscribe or drain its queue.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_status(fx: &Fixture, id: &MessageId, want: MessageStatus) {
        for _ in 0..200 {
            if fx.messages.get(id).await.unwrap().status >= want {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("message never reached {want:?}");
    }

    #[tokio::test]
    async fn group_fanout_multicasts_to_exactly_the_token_holders() {
        let fx = fixture(false);
        let alice = register(&fx, "alice", "alice", None).await;
        let bob = register(&fx, "bob", "bob", Some("tok-bob")).await;
        let carol = register(&fx, "carol", "carol", Some("tok-carol")).await;
        let dave = register(&fx, "dave", "dave", None).await;
        let group = fx
            .conversations
            .create_group("Crew", &[bob, carol, dave], &alice)
            .await
            .unwrap();

        spawn_dispatcher(&fx);
        settle().await;
        let msg = fx
            .messages
            .append(&group, &alice, "hello crew")
            .await
            .unwrap();
        wait_for_status(&fx, &msg, MessageStatus::Delivered).await;

        let calls = fx.gateway.calls.lock().await;
        assert_eq!(calls.len(), 1, "one multicast for the whole group");
        match &calls[0] {
            RecordedPush::Multicast {
                tokens,
                notification,
            } => {
                let mut tokens = tokens.clone();
                tokens.sort();
                assert_eq!(tokens, vec!["tok-bob", "tok-carol"]);
                assert_eq!(notification.title, "Crew");
                assert_eq!(notification.body, "alice: hello crew");
                assert_eq!(notification.conversation_id, group);
                assert_eq!(notification.message_id, msg);
            }
            other => panic!("expected a multicast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn direct_messages_push_to_the_single_counterpart() {
        let fx = fixture(false);
        let alice = register(&fx, "alice", "Alice", None).await;
        let bob = register(&fx, "bob", "Bob", Some("tok-bob")).await;
        let convo = fx
            .conversations
            .create_or_get_direct(&alice, &bob)
            .await
            .unwrap();

        spawn_dispatcher(&fx);
        settle().await;
        let msg = fx.messages.append(&convo, &alice, "hi").await.unwrap();
        wait_for_status(&fx, &msg, MessageStatus::Delivered).await;

        let calls = fx.gateway.calls.lock().await;
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            RecordedPush::Single {
                token,
                notification,
            } => {
                assert_eq!(token, "tok-bob");
                assert_eq!(notification.title, "Alice");
                assert_eq!(notification.body, "hi");
            }
            other => panic!("expected a single push, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivery_receipt_lands_even_when_the_push_service_fails() {
        let fx = fixture(true);
        let alice = register(&fx, "alice", "Alice", None).await;
        let bob = register(&fx, "bob", "Bob", Some("tok-bob")).await;
        let convo = fx
            .conversations
            .create_or_get_direct(&alice, &bob)
            .await
            .unwrap();

        spawn_dispatcher(&fx);
        settle().await;
        let msg = fx.messages.append(&convo, &alice, "hi").await.unwrap();

        wait_for_status(&fx, &msg, MessageStatus::Delivered).await;
        assert_eq!(fx.gateway.calls.lock().await.len(), 1, "push was attempted");
    }

    #[tokio::test]
    async fn no_tokens_means_no_push_but_still_a_receipt() {
        let fx = fixture(false);
        let alice = register(&fx, "alice", "Alice", None).await;
        // Bob never signed in; no profile document at all.
        let bob = UserId::new("bob");
        let convo = fx
            .conversations
            .create_or_get_direct(&alice, &bob)
            .await
            .unwrap();

        spawn_dispatcher(&fx);
        settle().await;
        let msg = fx.messages.append(&convo, &alice, "hi").await.unwrap();

        wait_for_status(&fx, &msg, MessageStatus::Delivered).await;
        assert!(fx.gateway.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn read_status_survives_a_late_delivery_receipt() {
        let fx = fixture(false);
        let alice = register(&fx, "alice", "Alice", None).await;
        let bob = register(&fx, "bob", "Bob", None).await;
        let convo = fx
            .conversations
            .create_or_get_direct(&alice, &bob)
            .await
            .unwrap();

        spawn_dispatcher(&fx);
        settle().await;
        // The reader gets there before the dispatcher drains its queue.
        let msg = fx.messages.append(&convo, &bob, "hi").await.unwrap();
        fx.messages.mark_as_read(&convo, &alice).await.unwrap();
        assert_eq!(
            fx.messages.get(&msg).await.unwrap().status,
            MessageStatus::Read
        );

        settle().await;
        assert_eq!(
            fx.messages.get(&msg).await.unwrap().status,
            MessageStatus::Read,
            "receipt must not downgrade READ"
        );
    }

    #[tokio::test]
    async fn an_orphaned_message_gets_no_push_and_no_receipt() {
        let fx = fixture(false);
        spawn_dispatcher(&fx);
        settle().await;

        // Raw write: a message pointing at a conversation that never existed.
        let message = Message {
            id: MessageId::new("m-orphan"),
            conversation_id: ConversationId::new("ghost"),
            sender_id: UserId::new("bob"),
            text: "hello?".to_string(),
            timestamp: None,
            status: MessageStatus::Sent,
        };
        fx.db
            .create(
                collections::MESSAGES,
                "m-orphan",
                Patch::from_model(&message).unwrap(),
            )
            .await
            .unwrap();
        settle().await;

        assert!(fx.gateway.calls.lock().await.is_empty());
        assert_eq!(
            fx.messages.get(&message.id).await.unwrap().status,
            MessageStatus::Sent
        );
    }
}
