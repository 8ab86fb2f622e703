//! Message store: atomic append, live message feeds, status transitions.

use serde_json::json;
use tracing::debug;

use missive_shared::constants::MAX_MESSAGE_LEN;
use missive_shared::{
    ConversationId, Message, MessageId, MessageStatus, MissiveError, Result, UserId,
};

use crate::conversations::ConversationStore;
use crate::database::{collections, Database, Filter, Query, SortOrder};
use crate::document::{Guard, Patch, WriteBatch};
use crate::live::{CreationFeed, QueryFeed};

/// Typed operations over the `messages` collection.
#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends a message and rewrites the parent conversation's preview in
    /// one atomic batch: afterwards either both are visible or neither is.
    ///
    /// The message commits with status `Sent` and a server-assigned
    /// timestamp; its id is allocated up front and returned.
    pub async fn append(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        text: &str,
    ) -> Result<MessageId> {
        if text.trim().is_empty() {
            return Err(MissiveError::Validation(
                "message text is empty".to_string(),
            ));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(MissiveError::Validation(
                "message text is too long".to_string(),
            ));
        }
        if self
            .db
            .get(collections::CONVERSATIONS, conversation_id.as_str())
            .await
            .is_none()
        {
            return Err(MissiveError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }

        let id = MessageId::new(self.db.allocate_id());
        let message = Message {
            id: id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: sender.clone(),
            text: text.to_string(),
            timestamp: None,
            status: MessageStatus::Sent,
        };

        let mut batch = WriteBatch::new();
        batch.create(
            collections::MESSAGES,
            id.as_str(),
            Patch::from_model(&message)?.server_timestamp("timestamp"),
        );
        batch.update(
            collections::CONVERSATIONS,
            conversation_id.as_str(),
            ConversationStore::preview_patch(text),
        );
        self.db.apply(batch).await?;

        debug!(message = %id, conversation = %conversation_id, "message appended");
        Ok(id)
    }

    /// Loads one message.
    pub async fn get(&self, id: &MessageId) -> Result<Message> {
        match self.db.get(collections::MESSAGES, id.as_str()).await {
            Some(doc) => doc.decode(),
            None => Err(MissiveError::NotFound(format!("message {id}"))),
        }
    }

    /// Live feed of a conversation's messages, oldest first.  The full list
    /// is re-emitted after every change.
    pub async fn watch(&self, conversation_id: &ConversationId) -> QueryFeed {
        let q = Self::conversation_query(conversation_id);
        self.db.watch_query(collections::MESSAGES, q).await
    }

    /// One-off read of the same list the live feed carries.
    pub async fn list(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let q = Self::conversation_query(conversation_id);
        self.db
            .query(collections::MESSAGES, &q)
            .await
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    fn conversation_query(conversation_id: &ConversationId) -> Query {
        Query::new()
            .filter(Filter::Eq("conversation_id".into(), json!(conversation_id)))
            .order_by("timestamp", SortOrder::Asc)
    }

    /// Marks every foreign not-yet-read message in the conversation as read,
    /// in a single batch.  Returns how many messages transitioned; returns 0
    /// without writing when nothing qualifies.
    pub async fn mark_as_read(
        &self,
        conversation_id: &ConversationId,
        reader: &UserId,
    ) -> Result<usize> {
        let q = Query::new().filter(Filter::Eq(
            "conversation_id".into(),
            json!(conversation_id),
        ));
        let docs = self.db.query(collections::MESSAGES, &q).await;

        let mut batch = WriteBatch::new();
        for doc in &docs {
            let message: Message = doc.decode()?;
            if message.sender_id != *reader && message.status < MessageStatus::Read {
                batch.update(
                    collections::MESSAGES,
                    doc.id.as_str(),
                    Patch::new().set("status", json!(MessageStatus::Read)),
                );
            }
        }
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        self.db.apply(batch).await?;
        debug!(conversation = %conversation_id, count, "messages marked read");
        Ok(count)
    }

    /// Transitions a message from `Sent` to `Delivered`.
    ///
    /// The write is guarded on the current status, so a message a fast
    /// reader already marked `Read` stays `Read`.  No-ops on anything past
    /// `Sent`.
    pub async fn mark_delivered(&self, id: &MessageId) -> Result<()> {
        let message = self.get(id).await?;
        if message.status >= MessageStatus::Delivered {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        batch.update_if(
            collections::MESSAGES,
            id.as_str(),
            Guard::field_equals("status", json!(MessageStatus::Sent)),
            Patch::new().set("status", json!(MessageStatus::Delivered)),
        );
        self.db.apply(batch).await
    }

    /// Creation trigger over the `messages` collection: one event per
    /// committed append, in commit order.
    pub async fn creation_feed(&self) -> CreationFeed {
        self.db.on_create(collections::MESSAGES).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: Database,
        conversations: ConversationStore,
        messages: MessageStore,
        alice: UserId,
        bob: UserId,
    }

    async fn fixture() -> (Fixture, ConversationId) {
        let db = Database::new();
        let f = Fixture {
            conversations: ConversationStore::new(db.clone()),
            messages: MessageStore::new(db.clone()),
            alice: UserId::new("alice"),
            bob: UserId::new("bob"),
            db,
        };
        let convo = f
            .conversations
            .create_or_get_direct(&f.alice, &f.bob)
            .await
            .unwrap();
        (f, convo)
    }

    #[tokio::test]
    async fn append_commits_message_and_preview_together() {
        let (f, convo) = fixture().await;
        let id = f.messages.append(&convo, &f.alice, "hello").await.unwrap();

        let message = f.messages.get(&id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.sender_id, f.alice);
        assert!(message.timestamp.is_some());

        // Preview fields come out of the same commit, so the timestamps
        // match exactly.
        let detail = f.conversations.get(&convo).await.unwrap();
        assert_eq!(detail.last_message, "hello");
        assert_eq!(detail.last_message_ts, message.timestamp);
    }

    #[tokio::test]
    async fn append_rejects_blank_text_without_writing() {
        let (f, convo) = fixture().await;
        let before = f.db.commit_seq().await;

        let err = f.messages.append(&convo, &f.alice, "   ").await.unwrap_err();
        assert!(matches!(err, MissiveError::Validation(_)));
        assert_eq!(f.db.commit_seq().await, before);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_writes_nothing() {
        let (f, _convo) = fixture().await;
        let before = f.db.commit_seq().await;

        let missing = ConversationId::new("nope");
        let err = f.messages.append(&missing, &f.alice, "hi").await.unwrap_err();
        assert!(matches!(err, MissiveError::NotFound(_)));

        assert_eq!(f.db.commit_seq().await, before);
        assert!(f.messages.list(&missing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn feed_lists_messages_in_send_order() {
        let (f, convo) = fixture().await;
        let mut feed = f.messages.watch(&convo).await;

        f.messages.append(&convo, &f.alice, "one").await.unwrap();
        f.messages.append(&convo, &f.bob, "two").await.unwrap();
        f.messages.append(&convo, &f.alice, "three").await.unwrap();

        assert!(feed.changed().await);
        let texts: Vec<String> = feed
            .current()
            .iter()
            .map(|d| d.decode::<Message>().unwrap().text)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn mark_as_read_transitions_foreign_messages_in_one_batch() {
        let (f, convo) = fixture().await;
        f.messages.append(&convo, &f.bob, "one").await.unwrap();
        f.messages.append(&convo, &f.bob, "two").await.unwrap();
        f.messages.append(&convo, &f.bob, "three").await.unwrap();
        let own = f.messages.append(&convo, &f.alice, "mine").await.unwrap();

        let before = f.db.commit_seq().await;
        let count = f.messages.mark_as_read(&convo, &f.alice).await.unwrap();
        assert_eq!(count, 3);
        // One batch, one commit.
        assert_eq!(f.db.commit_seq().await, before + 1);

        for message in f.messages.list(&convo).await.unwrap() {
            if message.id == own {
                assert_eq!(message.status, MessageStatus::Sent);
            } else {
                assert_eq!(message.status, MessageStatus::Read);
            }
        }
    }

    #[tokio::test]
    async fn mark_as_read_without_unread_is_a_pure_noop() {
        let (f, convo) = fixture().await;
        f.messages.append(&convo, &f.bob, "one").await.unwrap();
        f.messages.mark_as_read(&convo, &f.alice).await.unwrap();

        let before = f.db.commit_seq().await;
        let count = f.messages.mark_as_read(&convo, &f.alice).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(f.db.commit_seq().await, before);
    }

    #[tokio::test]
    async fn read_status_never_regresses() {
        let (f, convo) = fixture().await;
        let id = f.messages.append(&convo, &f.bob, "hi").await.unwrap();

        f.messages.mark_as_read(&convo, &f.alice).await.unwrap();
        assert_eq!(f.messages.get(&id).await.unwrap().status, MessageStatus::Read);

        // A late delivery confirmation must not downgrade the status.
        f.messages.mark_delivered(&id).await.unwrap();
        assert_eq!(f.messages.get(&id).await.unwrap().status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn delivery_then_read_walks_the_ladder() {
        let (f, convo) = fixture().await;
        let id = f.messages.append(&convo, &f.bob, "hi").await.unwrap();

        f.messages.mark_delivered(&id).await.unwrap();
        assert_eq!(
            f.messages.get(&id).await.unwrap().status,
            MessageStatus::Delivered
        );
        // Idempotent.
        f.messages.mark_delivered(&id).await.unwrap();
        assert_eq!(
            f.messages.get(&id).await.unwrap().status,
            MessageStatus::Delivered
        );

        let count = f.messages.mark_as_read(&convo, &f.alice).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(f.messages.get(&id).await.unwrap().status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn creation_feed_sees_each_append_once() {
        let (f, convo) = fixture().await;
        let mut feed = f.messages.creation_feed().await;

        let first = f.messages.append(&convo, &f.alice, "one").await.unwrap();
        f.messages.mark_as_read(&convo, &f.bob).await.unwrap();
        let second = f.messages.append(&convo, &f.bob, "two").await.unwrap();

        let doc = feed.next().await.unwrap();
        assert_eq!(doc.decode::<Message>().unwrap().id, first);
        // The read transition in between produced no creation event.
        let doc = feed.next().await.unwrap();
        assert_eq!(doc.decode::<Message>().unwrap().id, second);
    }
}
